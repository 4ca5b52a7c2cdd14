//! Property chain nodes.
//!
//! Every object owns a singly-linked chain of property nodes. Named
//! data and accessor properties share the chain with internal slots
//! (class tags, wrapper primitive values, native handles); the slot
//! variant distinguishes them.

use core_types::{CompactPtr, MagicStringId, Value};

/// A property name: a magic string id or a heap string pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyName {
    /// A statically known string.
    Magic(MagicStringId),
    /// A compact pointer to a heap string cell.
    Str(CompactPtr),
}

/// Attribute bits of a named property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyAttrs {
    /// `[[Writable]]` (meaningful for data properties only).
    pub writable: bool,
    /// `[[Enumerable]]`.
    pub enumerable: bool,
    /// `[[Configurable]]`.
    pub configurable: bool,
}

impl PropertyAttrs {
    /// Writable, enumerable, and configurable.
    pub const fn all() -> Self {
        PropertyAttrs {
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Neither writable, enumerable, nor configurable.
    pub const fn none() -> Self {
        PropertyAttrs {
            writable: false,
            enumerable: false,
            configurable: false,
        }
    }

    /// Writable only; the attribute set of hidden engine-created
    /// value properties such as a function's materialized `prototype`.
    pub const fn writable_only() -> Self {
        PropertyAttrs {
            writable: true,
            enumerable: false,
            configurable: false,
        }
    }
}

/// An internal slot stored in the property chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalSlot {
    /// The `[[Class]]` tag, when it differs from the kind default.
    ClassTag(MagicStringId),
    /// The `[[PrimitiveValue]]` of wrapper objects.
    PrimitiveValue(Value),
    /// Instantiation mask for built-in descriptor slots 32 and above.
    BuiltinMaskHigh(u32),
    /// An embedder-owned native pointer with its free callback.
    NativeHandle(NativeHandleSlot),
}

/// The payload of [`InternalSlot::NativeHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeHandleSlot {
    /// The embedder's opaque pointer value.
    pub data: usize,
    /// Callback invoked exactly once when the owning object is
    /// collected. `None` once fired or when the embedder passed none.
    pub free_callback: Option<fn(usize)>,
}

/// The value slot of a property node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertySlot {
    /// A named data property.
    Value(Value),
    /// A named accessor property; either pointer may be null.
    Accessor {
        /// Getter function object, or null.
        getter: CompactPtr,
        /// Setter function object, or null.
        setter: CompactPtr,
    },
    /// An internal slot; never visible to scripts.
    Internal(InternalSlot),
}

/// A node in an object's property chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropertyNode {
    /// The property name.
    pub name: PropertyName,
    /// Attribute bits.
    pub attrs: PropertyAttrs,
    /// The value slot.
    pub slot: PropertySlot,
    /// Next node in the chain, or null.
    pub next: CompactPtr,
}

impl PropertyNode {
    /// Creates a data property node with no successor.
    pub fn data(name: PropertyName, value: Value, attrs: PropertyAttrs) -> Self {
        PropertyNode {
            name,
            attrs,
            slot: PropertySlot::Value(value),
            next: CompactPtr::NULL,
        }
    }

    /// Creates an internal-slot node with no successor.
    pub fn internal(slot: InternalSlot) -> Self {
        PropertyNode {
            name: PropertyName::Magic(MagicStringId::Empty),
            attrs: PropertyAttrs::none(),
            slot: PropertySlot::Internal(slot),
            next: CompactPtr::NULL,
        }
    }

    /// Returns true for internal-slot nodes.
    pub fn is_internal(&self) -> bool {
        matches!(self.slot, PropertySlot::Internal(_))
    }

    /// Returns true for accessor properties.
    pub fn is_accessor(&self) -> bool {
        matches!(self.slot, PropertySlot::Accessor { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attrs_presets() {
        assert!(PropertyAttrs::all().writable);
        assert!(PropertyAttrs::all().enumerable);
        assert!(!PropertyAttrs::none().configurable);
        let hidden = PropertyAttrs::writable_only();
        assert!(hidden.writable && !hidden.enumerable && !hidden.configurable);
    }

    #[test]
    fn test_node_constructors() {
        let node = PropertyNode::data(
            PropertyName::Magic(MagicStringId::Length),
            Value::integer(2),
            PropertyAttrs::none(),
        );
        assert!(!node.is_internal());
        assert!(!node.is_accessor());
        assert!(node.next.is_null());

        let slot = PropertyNode::internal(InternalSlot::PrimitiveValue(Value::TRUE));
        assert!(slot.is_internal());
    }
}
