//! The tracing collector.
//!
//! Reference counting frees acyclic garbage immediately; this module
//! adds the mark/sweep pass that reclaims cycles. Marking is tri-color
//! over the cell arena: white cells are unvisited, gray cells sit on
//! the worklist, black cells are fully scanned. The caller supplies
//! the root values (global object, API-held values, active frame
//! stacks); the interned-string table is always a root.
//!
//! Sweeping fires native-handle finalizers on dying objects before
//! their memory is reused, exactly once per handle.

use crate::heap::{Heap, HeapCell};
use crate::object::ObjectData;
use crate::property::{InternalSlot, PropertyName, PropertySlot};
use core_types::{CompactPtr, Value};

/// Mark state of a cell during collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GcMark {
    /// Not yet reached.
    White,
    /// Reached, waiting on the worklist.
    Gray,
    /// Reached and fully scanned.
    Black,
}

/// Collection statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GcStats {
    /// Arena capacity in cells.
    pub capacity: usize,
    /// Currently allocated cells.
    pub allocated: usize,
    /// Number of collections performed.
    pub collections: u64,
    /// Total cells reclaimed over the heap's lifetime (both the
    /// immediate-free path and sweeping).
    pub cells_freed: u64,
    /// Cells reclaimed by the most recent collection.
    pub last_collected: usize,
}

impl Heap {
    /// Runs a full mark/sweep collection.
    ///
    /// `roots` must cover every value the mutator can still reach:
    /// the global object, registry objects, values handed out through
    /// the embedding API, and the operand stacks and environments of
    /// active frames. Returns the number of cells reclaimed.
    pub fn collect(&mut self, roots: &[Value]) -> usize {
        self.gc_active = true;

        for cell in self.cells.iter_mut() {
            cell.mark = GcMark::White;
        }

        let mut worklist: Vec<CompactPtr> = Vec::new();
        for &root in roots {
            self.gc_mark_value(root, &mut worklist);
        }
        let interned: Vec<CompactPtr> = self.interned.values().copied().collect();
        for ptr in interned {
            self.gc_mark_leaf(ptr);
        }

        while let Some(ptr) = worklist.pop() {
            let index = Heap::index(ptr);
            if self.cells[index].mark == GcMark::Black {
                continue;
            }
            self.cells[index].mark = GcMark::Black;
            self.gc_scan_object(ptr, &mut worklist);
        }

        let reclaimed = self.sweep();
        self.gc_active = false;
        self.gc_requested = false;
        self.stats.collections += 1;
        self.stats.last_collected = reclaimed;
        reclaimed
    }

    fn gc_mark_leaf(&mut self, ptr: CompactPtr) {
        self.cells[Heap::index(ptr)].mark = GcMark::Black;
    }

    fn gc_mark_object(&mut self, ptr: CompactPtr, worklist: &mut Vec<CompactPtr>) {
        let cell = &mut self.cells[Heap::index(ptr)];
        if cell.mark == GcMark::White {
            cell.mark = GcMark::Gray;
            worklist.push(ptr);
        }
    }

    fn gc_mark_value(&mut self, value: Value, worklist: &mut Vec<CompactPtr>) {
        let payload = if value.is_abrupt() { value.abrupt_payload() } else { value };
        if payload.is_float() {
            self.gc_mark_leaf(payload.as_float_ptr());
        } else if payload.is_string() && !payload.is_magic_string() {
            self.gc_mark_leaf(payload.as_string_ptr());
        } else if payload.is_object() {
            self.gc_mark_object(payload.as_object_ptr(), worklist);
        }
    }

    /// Scans one object cell: prototype link, every property slot and
    /// internal slot, and the kind-specific payload (captured scope,
    /// bound-function triple, environment links).
    fn gc_scan_object(&mut self, ptr: CompactPtr, worklist: &mut Vec<CompactPtr>) {
        let (prototype, mut chain, data) = {
            let record = self.object(ptr);
            (record.prototype, record.properties, record.data.clone())
        };

        if !prototype.is_null() {
            self.gc_mark_object(prototype, worklist);
        }

        while !chain.is_null() {
            let node = *self.property(chain);
            self.gc_mark_leaf(chain);
            if let PropertyName::Str(name_ptr) = node.name {
                self.gc_mark_leaf(name_ptr);
            }
            match node.slot {
                PropertySlot::Value(value) => self.gc_mark_value(value, worklist),
                PropertySlot::Accessor { getter, setter } => {
                    if !getter.is_null() {
                        self.gc_mark_object(getter, worklist);
                    }
                    if !setter.is_null() {
                        self.gc_mark_object(setter, worklist);
                    }
                }
                PropertySlot::Internal(slot) => {
                    if let InternalSlot::PrimitiveValue(value) = slot {
                        self.gc_mark_value(value, worklist);
                    }
                }
            }
            chain = node.next;
        }

        match data {
            ObjectData::None | ObjectData::External(_) | ObjectData::Builtin(_) => {}
            ObjectData::Function(function) => {
                if !function.scope.is_null() {
                    self.gc_mark_object(function.scope, worklist);
                }
            }
            ObjectData::Bound(bound) => {
                if !bound.target.is_null() {
                    self.gc_mark_object(bound.target, worklist);
                }
                self.gc_mark_value(bound.bound_this, worklist);
                for arg in bound.bound_args {
                    self.gc_mark_value(arg, worklist);
                }
            }
            ObjectData::LexEnv(env) => {
                if !env.outer.is_null() {
                    self.gc_mark_object(env.outer, worklist);
                }
                if !env.binding_object.is_null() {
                    self.gc_mark_object(env.binding_object, worklist);
                }
            }
        }
    }

    /// Frees every white cell. Finalizers run in a first pass so a
    /// handle callback never observes partially reclaimed memory.
    fn sweep(&mut self) -> usize {
        for index in 1..self.cells.len() {
            if self.cells[index].mark != GcMark::White {
                continue;
            }
            let head = match &self.cells[index].cell {
                HeapCell::Object(record) => record.properties,
                _ => continue,
            };
            self.run_handle_finalizers(head);
        }

        let mut reclaimed = 0;
        for index in 1..self.cells.len() {
            if self.cells[index].mark != GcMark::White {
                continue;
            }
            if matches!(self.cells[index].cell, HeapCell::Free { .. }) {
                continue;
            }
            self.cells[index].cell = HeapCell::Free {
                next: self.free_head,
            };
            self.cells[index].refs = 0;
            self.free_head = index as u16;
            self.free_count += 1;
            self.stats.cells_freed += 1;
            reclaimed += 1;
        }
        reclaimed
    }

    fn run_handle_finalizers(&mut self, head: CompactPtr) {
        let mut chain = head;
        while !chain.is_null() {
            let node = self.property_mut(chain);
            let next = node.next;
            if let PropertySlot::Internal(InternalSlot::NativeHandle(ref mut handle)) = node.slot {
                if let Some(callback) = handle.free_callback.take() {
                    callback(handle.data);
                }
            }
            chain = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ObjectKind, ObjectRecord};
    use crate::property::{NativeHandleSlot, PropertyAttrs, PropertyNode};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn new_object(heap: &mut Heap) -> CompactPtr {
        heap.alloc_object(ObjectRecord::new(ObjectKind::General, CompactPtr::NULL, true))
            .unwrap()
    }

    #[test]
    fn test_collect_reclaims_prototype_cycle() {
        let mut heap = Heap::new();
        let a = new_object(&mut heap);
        let b = new_object(&mut heap);

        // a.prototype = b, b.prototype = a: a cycle refcounts miss.
        heap.ref_cell(b);
        heap.object_mut(a).prototype = b;
        heap.ref_cell(a);
        heap.object_mut(b).prototype = a;

        heap.deref_cell(a);
        heap.deref_cell(b);
        assert_eq!(heap.allocated_cells(), 2, "cycle survives refcounting");

        let reclaimed = heap.collect(&[]);
        assert_eq!(reclaimed, 2);
        assert_eq!(heap.allocated_cells(), 0);
    }

    #[test]
    fn test_collect_keeps_roots_and_reachable() {
        let mut heap = Heap::new();
        let object = new_object(&mut heap);
        let text = heap.alloc_string("held by property").unwrap();
        let name_ref = heap.copy_value(text);
        let name = heap.property_name_from(name_ref);
        let node = PropertyNode::data(name, text, PropertyAttrs::all());
        let node_ptr = heap.alloc_property(node).unwrap();
        heap.object_mut(object).properties = node_ptr;

        let allocated = heap.allocated_cells();
        let reclaimed = heap.collect(&[Value::object_ptr(object)]);
        assert_eq!(reclaimed, 0);
        assert_eq!(heap.allocated_cells(), allocated);
    }

    #[test]
    fn test_collect_keeps_interned_strings() {
        let mut heap = Heap::new();
        let interned = heap.intern_string("interned root").unwrap();
        heap.free_value(interned);
        heap.collect(&[]);
        assert_eq!(heap.string_text(interned), "interned root");
    }

    static FINALIZED: AtomicUsize = AtomicUsize::new(0);

    fn count_finalize(_data: usize) {
        FINALIZED.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_sweep_runs_finalizer_exactly_once() {
        FINALIZED.store(0, Ordering::SeqCst);
        let mut heap = Heap::new();
        let object = new_object(&mut heap);
        let node_ptr = heap
            .alloc_property(PropertyNode::internal(InternalSlot::NativeHandle(
                NativeHandleSlot {
                    data: 7,
                    free_callback: Some(count_finalize),
                },
            )))
            .unwrap();
        heap.object_mut(object).properties = node_ptr;

        // Make the object unreachable without letting refcounting free
        // it: put it in a self cycle.
        heap.ref_cell(object);
        heap.object_mut(object).prototype = object;
        heap.deref_cell(object);
        assert_eq!(heap.allocated_cells(), 2);

        heap.collect(&[]);
        assert_eq!(FINALIZED.load(Ordering::SeqCst), 1);
        assert_eq!(heap.allocated_cells(), 0);

        heap.collect(&[]);
        assert_eq!(FINALIZED.load(Ordering::SeqCst), 1, "finalizer must not refire");
    }

    #[test]
    fn test_immediate_free_also_runs_finalizer() {
        FINALIZED.store(0, Ordering::SeqCst);
        let mut heap = Heap::new();
        let object = new_object(&mut heap);
        let node_ptr = heap
            .alloc_property(PropertyNode::internal(InternalSlot::NativeHandle(
                NativeHandleSlot {
                    data: 9,
                    free_callback: Some(count_finalize),
                },
            )))
            .unwrap();
        heap.object_mut(object).properties = node_ptr;

        heap.deref_cell(object);
        assert_eq!(FINALIZED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_collect_updates_stats() {
        let mut heap = Heap::new();
        let garbage = new_object(&mut heap);
        heap.ref_cell(garbage);
        heap.object_mut(garbage).prototype = garbage;
        heap.deref_cell(garbage);

        heap.collect(&[]);
        let stats = heap.stats();
        assert_eq!(stats.collections, 1);
        assert_eq!(stats.last_collected, 1);
        assert!(stats.cells_freed >= 1);
    }
}
