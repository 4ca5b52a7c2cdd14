//! The bounded cell arena.
//!
//! All engine values that do not fit a tagged word live in one arena of
//! uniform cells addressed by 16-bit compact pointers: heap doubles,
//! strings, property nodes, and object records. Cell zero is reserved
//! so the null compact pointer never addresses a live cell.
//!
//! Cells are reference counted with a saturating count; a count
//! reaching zero outside a collection frees the cell immediately and
//! releases everything it holds. The tracing collector in the `gc`
//! module reclaims cycles the counts cannot see.

use crate::gc::{GcMark, GcStats};
use crate::object::{ObjectData, ObjectRecord};
use crate::property::{InternalSlot, PropertyName, PropertyNode, PropertySlot};
use core_types::{CompactPtr, FatalCode, MagicStringId, Value};
use std::collections::HashMap;
use std::rc::Rc;

/// Default arena capacity in cells: the largest count a 16-bit compact
/// pointer can address with cell zero reserved (512 KiB at the default
/// cell alignment).
pub const DEFAULT_CELL_CAPACITY: usize = 0xFFFF;

/// Remaining-cell margin below which a collection is requested.
const GC_PRESSURE_MARGIN: usize = 256;

/// Error returned when the arena cannot satisfy an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfMemory;

/// A heap string cell.
#[derive(Debug, Clone)]
pub struct HeapString {
    /// The character data.
    pub text: Rc<str>,
    /// True for strings owned by the interned-string table.
    pub interned: bool,
}

/// The payload of one arena cell.
#[derive(Debug, Clone)]
pub enum HeapCell {
    /// A free-list entry.
    Free {
        /// Next free cell, or zero.
        next: u16,
    },
    /// A heap-allocated double.
    Double(f64),
    /// A string.
    Str(HeapString),
    /// A property chain node.
    Property(PropertyNode),
    /// An object record.
    Object(ObjectRecord),
}

pub(crate) struct Cell {
    pub(crate) refs: u16,
    pub(crate) mark: GcMark,
    pub(crate) cell: HeapCell,
}

/// The engine heap: a bounded arena plus the interned-string table.
pub struct Heap {
    pub(crate) cells: Vec<Cell>,
    pub(crate) free_head: u16,
    pub(crate) free_count: usize,
    pub(crate) capacity: usize,
    pub(crate) interned: HashMap<Rc<str>, CompactPtr>,
    pub(crate) gc_active: bool,
    pub(crate) gc_requested: bool,
    pub(crate) pending_fatal: Option<FatalCode>,
    pub(crate) stats: GcStats,
}

impl Heap {
    /// Creates a heap with the default capacity.
    pub fn new() -> Self {
        Heap::with_capacity(DEFAULT_CELL_CAPACITY)
    }

    /// Creates a heap bounded to `capacity` cells.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.min(DEFAULT_CELL_CAPACITY).max(16);
        let mut cells = Vec::with_capacity(64);
        // Cell zero backs the null compact pointer and is never used.
        cells.push(Cell {
            refs: 0,
            mark: GcMark::White,
            cell: HeapCell::Free { next: 0 },
        });
        Heap {
            cells,
            free_head: 0,
            free_count: 0,
            capacity,
            interned: HashMap::new(),
            gc_active: false,
            gc_requested: false,
            pending_fatal: None,
            stats: GcStats::default(),
        }
    }

    /// Number of live cells.
    pub fn allocated_cells(&self) -> usize {
        self.cells.len() - 1 - self.free_count
    }

    /// Number of cells still allocatable without a collection.
    pub fn available_cells(&self) -> usize {
        self.capacity - self.allocated_cells()
    }

    /// True once allocation pressure has requested a collection.
    pub fn should_collect(&self) -> bool {
        self.gc_requested
    }

    /// Explicitly requests a collection at the next opportunity.
    pub fn request_collection(&mut self) {
        self.gc_requested = true;
    }

    /// Takes the pending fatal code, if an operation signaled one.
    pub fn take_pending_fatal(&mut self) -> Option<FatalCode> {
        self.pending_fatal.take()
    }

    /// Current collection statistics.
    pub fn stats(&self) -> GcStats {
        let mut stats = self.stats;
        stats.capacity = self.capacity;
        stats.allocated = self.allocated_cells();
        stats
    }

    pub(crate) fn index(ptr: CompactPtr) -> usize {
        debug_assert!(!ptr.is_null());
        ptr.index() as usize
    }

    /// Allocates one cell. The returned cell starts with one reference
    /// owned by the caller.
    pub fn alloc(&mut self, cell: HeapCell) -> Result<CompactPtr, OutOfMemory> {
        debug_assert!(!matches!(cell, HeapCell::Free { .. }));
        let ptr = if self.free_head != 0 {
            let index = self.free_head as usize;
            let next = match self.cells[index].cell {
                HeapCell::Free { next } => next,
                _ => unreachable!("free list points at a live cell"),
            };
            self.free_head = next;
            self.free_count -= 1;
            self.cells[index] = Cell {
                refs: 1,
                mark: GcMark::White,
                cell,
            };
            CompactPtr::new(index as u16)
        } else if self.cells.len() <= self.capacity {
            let index = self.cells.len();
            self.cells.push(Cell {
                refs: 1,
                mark: GcMark::White,
                cell,
            });
            CompactPtr::new(index as u16)
        } else {
            self.gc_requested = true;
            return Err(OutOfMemory);
        };

        if self.available_cells() < GC_PRESSURE_MARGIN {
            self.gc_requested = true;
        }
        Ok(ptr)
    }

    /// Allocates an object record cell.
    pub fn alloc_object(&mut self, record: ObjectRecord) -> Result<CompactPtr, OutOfMemory> {
        self.alloc(HeapCell::Object(record))
    }

    /// Allocates a property node cell.
    pub fn alloc_property(&mut self, node: PropertyNode) -> Result<CompactPtr, OutOfMemory> {
        self.alloc(HeapCell::Property(node))
    }

    /// Builds a number value: integer-tagged when the double
    /// round-trips, heap double otherwise.
    pub fn make_number(&mut self, value: f64) -> Result<Value, OutOfMemory> {
        if Value::fits_integer(value) {
            Ok(Value::integer(value as i32))
        } else {
            let ptr = self.alloc(HeapCell::Double(value))?;
            Ok(Value::float_ptr(ptr))
        }
    }

    /// Reads the numeric payload of an integer or float value.
    pub fn number_of(&self, value: Value) -> f64 {
        if value.is_integer() {
            value.as_integer() as f64
        } else {
            self.double(value.as_float_ptr())
        }
    }

    /// Reads a heap double cell.
    pub fn double(&self, ptr: CompactPtr) -> f64 {
        match &self.cells[Self::index(ptr)].cell {
            HeapCell::Double(value) => *value,
            _ => unreachable!("compact pointer does not address a double"),
        }
    }

    /// Builds a string value, preferring the magic table and the
    /// interned-string table over a fresh cell.
    ///
    /// The caller owns one reference to the result.
    pub fn alloc_string(&mut self, text: &str) -> Result<Value, OutOfMemory> {
        if let Some(id) = MagicStringId::lookup(text) {
            return Ok(Value::magic_string(id));
        }
        if let Some(&ptr) = self.interned.get(text) {
            self.ref_cell(ptr);
            return Ok(Value::string_ptr(ptr));
        }
        let ptr = self.alloc(HeapCell::Str(HeapString {
            text: text.into(),
            interned: false,
        }))?;
        Ok(Value::string_ptr(ptr))
    }

    /// Builds an interned string value.
    ///
    /// Interned strings are part of the collector's root set and live
    /// for the lifetime of the heap; the caller still owns one
    /// reference to the result so interned and plain strings flow
    /// through the same release discipline.
    pub fn intern_string(&mut self, text: &str) -> Result<Value, OutOfMemory> {
        if let Some(id) = MagicStringId::lookup(text) {
            return Ok(Value::magic_string(id));
        }
        if let Some(&ptr) = self.interned.get(text) {
            self.ref_cell(ptr);
            return Ok(Value::string_ptr(ptr));
        }
        let shared: Rc<str> = text.into();
        let ptr = self.alloc(HeapCell::Str(HeapString {
            text: Rc::clone(&shared),
            interned: true,
        }))?;
        // The table owns the allocation reference; give the caller its
        // own.
        self.interned.insert(shared, ptr);
        self.ref_cell(ptr);
        Ok(Value::string_ptr(ptr))
    }

    /// Reads the text of a string value (magic or heap).
    pub fn string_text(&self, value: Value) -> &str {
        debug_assert!(value.is_string());
        if value.is_magic_string() {
            value.as_magic_string().text()
        } else {
            match &self.cells[Self::index(value.as_string_ptr())].cell {
                HeapCell::Str(s) => &s.text,
                _ => unreachable!("compact pointer does not address a string"),
            }
        }
    }

    /// Compares two string values by content.
    pub fn strings_equal(&self, a: Value, b: Value) -> bool {
        if a == b {
            return true;
        }
        if a.is_magic_string() && b.is_magic_string() {
            return false;
        }
        self.string_text(a) == self.string_text(b)
    }

    /// Reads the text of a property name.
    pub fn property_name_text(&self, name: PropertyName) -> &str {
        match name {
            PropertyName::Magic(id) => id.text(),
            PropertyName::Str(ptr) => match &self.cells[Self::index(ptr)].cell {
                HeapCell::Str(s) => &s.text,
                _ => unreachable!("property name does not address a string"),
            },
        }
    }

    /// Builds a property name from a string value, taking one
    /// reference for heap-backed names.
    pub fn property_name_from(&mut self, value: Value) -> PropertyName {
        debug_assert!(value.is_string());
        if value.is_magic_string() {
            PropertyName::Magic(value.as_magic_string())
        } else {
            let ptr = value.as_string_ptr();
            self.ref_cell(ptr);
            PropertyName::Str(ptr)
        }
    }

    /// Reads an object record.
    pub fn object(&self, ptr: CompactPtr) -> &ObjectRecord {
        match &self.cells[Self::index(ptr)].cell {
            HeapCell::Object(record) => record,
            _ => unreachable!("compact pointer does not address an object"),
        }
    }

    /// Mutable access to an object record.
    pub fn object_mut(&mut self, ptr: CompactPtr) -> &mut ObjectRecord {
        match &mut self.cells[Self::index(ptr)].cell {
            HeapCell::Object(record) => record,
            _ => unreachable!("compact pointer does not address an object"),
        }
    }

    /// Reads a property node.
    pub fn property(&self, ptr: CompactPtr) -> &PropertyNode {
        match &self.cells[Self::index(ptr)].cell {
            HeapCell::Property(node) => node,
            _ => unreachable!("compact pointer does not address a property"),
        }
    }

    /// Mutable access to a property node.
    pub fn property_mut(&mut self, ptr: CompactPtr) -> &mut PropertyNode {
        match &mut self.cells[Self::index(ptr)].cell {
            HeapCell::Property(node) => node,
            _ => unreachable!("compact pointer does not address a property"),
        }
    }

    /// Current reference count of a cell (test and assertion support).
    pub fn cell_refs(&self, ptr: CompactPtr) -> u16 {
        self.cells[Self::index(ptr)].refs
    }

    /// Increments a cell's reference count, saturating. Saturation
    /// signals `ERR_REF_COUNT_LIMIT` through the pending-fatal slot.
    pub fn ref_cell(&mut self, ptr: CompactPtr) {
        let cell = &mut self.cells[Self::index(ptr)];
        if cell.refs == u16::MAX {
            return;
        }
        cell.refs += 1;
        if cell.refs == u16::MAX {
            self.pending_fatal = Some(FatalCode::RefCountLimit);
        }
    }

    /// Decrements a cell's reference count. Outside a collection, a
    /// count reaching zero frees the cell immediately; during the mark
    /// phase the cell is kept, because it may be revived as reachable.
    pub fn deref_cell(&mut self, ptr: CompactPtr) {
        let index = Self::index(ptr);
        let cell = &mut self.cells[index];
        if cell.refs == u16::MAX {
            // Saturated counts are pinned.
            return;
        }
        debug_assert!(cell.refs > 0, "dereferencing a dead cell");
        cell.refs -= 1;
        if cell.refs == 0 && !self.gc_active {
            self.free_cell(ptr);
        }
    }

    /// Takes one reference to whatever heap cell `value` points at and
    /// returns the value unchanged.
    pub fn copy_value(&mut self, value: Value) -> Value {
        let payload = if value.is_abrupt() { value.abrupt_payload() } else { value };
        if payload.is_float() {
            self.ref_cell(payload.as_float_ptr());
        } else if payload.is_string() && !payload.is_magic_string() {
            self.ref_cell(payload.as_string_ptr());
        } else if payload.is_object() {
            self.ref_cell(payload.as_object_ptr());
        }
        value
    }

    /// Releases one reference held through `value`.
    pub fn free_value(&mut self, value: Value) {
        let payload = if value.is_abrupt() { value.abrupt_payload() } else { value };
        if payload.is_float() {
            self.deref_cell(payload.as_float_ptr());
        } else if payload.is_string() && !payload.is_magic_string() {
            self.deref_cell(payload.as_string_ptr());
        } else if payload.is_object() {
            self.deref_cell(payload.as_object_ptr());
        }
    }

    fn deref_cell_if(&mut self, ptr: CompactPtr) {
        if !ptr.is_null() {
            self.deref_cell(ptr);
        }
    }

    /// Reclaims one cell and releases everything it holds. Native
    /// handle finalizers on the dying object fire here.
    pub(crate) fn free_cell(&mut self, ptr: CompactPtr) {
        let index = Self::index(ptr);
        let payload = std::mem::replace(
            &mut self.cells[index].cell,
            HeapCell::Free {
                next: self.free_head,
            },
        );
        self.cells[index].refs = 0;
        self.free_head = index as u16;
        self.free_count += 1;
        self.stats.cells_freed += 1;

        match payload {
            HeapCell::Free { .. } => unreachable!("double free of cell {}", index),
            HeapCell::Double(_) => {}
            HeapCell::Str(string) => {
                // Interned strings hold a permanent table reference and
                // are only dropped wholesale at heap teardown.
                debug_assert!(!string.interned, "interned string reached zero references");
            }
            HeapCell::Property(node) => self.release_property_contents(node),
            HeapCell::Object(record) => self.release_object_contents(record),
        }
    }

    pub(crate) fn release_property_contents(&mut self, node: PropertyNode) {
        if let PropertyName::Str(name_ptr) = node.name {
            self.deref_cell(name_ptr);
        }
        match node.slot {
            PropertySlot::Value(value) => self.free_value(value),
            PropertySlot::Accessor { getter, setter } => {
                self.deref_cell_if(getter);
                self.deref_cell_if(setter);
            }
            PropertySlot::Internal(slot) => match slot {
                InternalSlot::PrimitiveValue(value) => self.free_value(value),
                InternalSlot::NativeHandle(handle) => {
                    if let Some(callback) = handle.free_callback {
                        callback(handle.data);
                    }
                }
                InternalSlot::ClassTag(_) | InternalSlot::BuiltinMaskHigh(_) => {}
            },
        }
    }

    pub(crate) fn release_object_contents(&mut self, record: ObjectRecord) {
        self.deref_cell_if(record.prototype);

        let mut chain = record.properties;
        while !chain.is_null() {
            let next = self.property(chain).next;
            self.deref_cell(chain);
            chain = next;
        }

        match record.data {
            ObjectData::None | ObjectData::External(_) | ObjectData::Builtin(_) => {}
            ObjectData::Function(function) => self.deref_cell_if(function.scope),
            ObjectData::Bound(bound) => {
                self.deref_cell_if(bound.target);
                self.free_value(bound.bound_this);
                for arg in bound.bound_args {
                    self.free_value(arg);
                }
            }
            ObjectData::LexEnv(env) => {
                self.deref_cell_if(env.outer);
                self.deref_cell_if(env.binding_object);
            }
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("capacity", &self.capacity)
            .field("allocated", &self.allocated_cells())
            .field("interned", &self.interned.len())
            .field("gc_requested", &self.gc_requested)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectKind;
    use crate::property::PropertyAttrs;

    #[test]
    fn test_make_number_paths() {
        let mut heap = Heap::new();
        let small = heap.make_number(42.0).unwrap();
        assert!(small.is_integer());
        assert_eq!(small.as_integer(), 42);

        let fraction = heap.make_number(0.5).unwrap();
        assert!(fraction.is_float());
        assert_eq!(heap.number_of(fraction), 0.5);

        // -0 must keep its sign through the heap path.
        let negative_zero = heap.make_number(-0.0).unwrap();
        assert!(negative_zero.is_float());
        assert!(heap.number_of(negative_zero).is_sign_negative());
    }

    #[test]
    fn test_string_magic_and_heap() {
        let mut heap = Heap::new();
        let magic = heap.alloc_string("length").unwrap();
        assert!(magic.is_magic_string());
        assert_eq!(heap.string_text(magic), "length");

        let plain = heap.alloc_string("not magic at all").unwrap();
        assert!(plain.is_string() && !plain.is_magic_string());
        assert_eq!(heap.string_text(plain), "not magic at all");
    }

    #[test]
    fn test_interned_strings_shared() {
        let mut heap = Heap::new();
        let a = heap.intern_string("shared name").unwrap();
        let b = heap.intern_string("shared name").unwrap();
        assert_eq!(a, b);
        // One cell: table ref + two caller refs.
        assert_eq!(heap.cell_refs(a.as_string_ptr()), 3);
        heap.free_value(a);
        heap.free_value(b);
        // The table reference keeps the cell alive.
        assert_eq!(heap.cell_refs(b.as_string_ptr()), 1);
        assert_eq!(heap.string_text(b), "shared name");
    }

    #[test]
    fn test_copy_free_restores_counts() {
        let mut heap = Heap::new();
        let value = heap.alloc_string("refcounted text").unwrap();
        let ptr = value.as_string_ptr();
        assert_eq!(heap.cell_refs(ptr), 1);

        let copied = heap.copy_value(value);
        assert_eq!(copied, value);
        assert_eq!(heap.cell_refs(ptr), 2);
        heap.free_value(copied);
        assert_eq!(heap.cell_refs(ptr), 1);
    }

    #[test]
    fn test_zero_refs_frees_immediately() {
        let mut heap = Heap::new();
        let value = heap.alloc_string("short lived").unwrap();
        let allocated = heap.allocated_cells();
        heap.free_value(value);
        assert_eq!(heap.allocated_cells(), allocated - 1);
    }

    #[test]
    fn test_free_list_reuse() {
        let mut heap = Heap::new();
        let first = heap.alloc_string("first transient").unwrap();
        let ptr = first.as_string_ptr();
        heap.free_value(first);
        let second = heap.alloc_string("second transient").unwrap();
        assert_eq!(second.as_string_ptr(), ptr);
        heap.free_value(second);
    }

    #[test]
    fn test_object_release_cascades() {
        let mut heap = Heap::new();
        let name = heap.alloc_string("cascading value").unwrap();
        let object = heap
            .alloc_object(ObjectRecord::new(ObjectKind::General, CompactPtr::NULL, true))
            .unwrap();
        let node = PropertyNode::data(
            heap.property_name_from(name),
            Value::integer(1),
            PropertyAttrs::all(),
        );
        let node_ptr = heap.alloc_property(node).unwrap();
        heap.object_mut(object).properties = node_ptr;

        // Drop the local string reference; the property keeps it alive.
        heap.free_value(name);
        assert_eq!(heap.cell_refs(name.as_string_ptr()), 1);

        // Releasing the object frees the chain and the name string.
        let before = heap.allocated_cells();
        heap.deref_cell(object);
        assert_eq!(heap.allocated_cells(), before - 3);
    }

    #[test]
    fn test_out_of_memory_and_pressure() {
        let mut heap = Heap::with_capacity(20);
        let mut held = Vec::new();
        loop {
            match heap.alloc(HeapCell::Double(1.0)) {
                Ok(ptr) => held.push(ptr),
                Err(OutOfMemory) => break,
            }
        }
        assert!(heap.should_collect());
        assert_eq!(heap.available_cells(), 0);
        for ptr in held {
            heap.deref_cell(ptr);
        }
        assert!(heap.allocated_cells() == 0);
    }

    #[test]
    fn test_saturation_signals_fatal() {
        let mut heap = Heap::new();
        let value = heap.alloc_string("pinned forever").unwrap();
        let ptr = value.as_string_ptr();
        for _ in 0..u16::MAX {
            heap.ref_cell(ptr);
        }
        assert_eq!(heap.take_pending_fatal(), Some(FatalCode::RefCountLimit));
        // Saturated cells are pinned: deref keeps them alive.
        heap.deref_cell(ptr);
        assert_eq!(heap.cell_refs(ptr), u16::MAX);
    }
}
