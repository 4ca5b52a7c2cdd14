//! The built-in registry seam.
//!
//! The object model consults built-in descriptor tables when a lazy
//! property is first accessed, and dispatches built-in routine calls
//! by `(built-in id, routine id)`. Both go through the
//! [`BuiltinProvider`] installed on the context, so the interpreter
//! stays agnostic of which built-in library the embedding ships.

use crate::context::Context;
use core_types::{MagicStringId, Value};
use memory_manager::PropertyAttrs;

/// The fixed enumeration of built-in objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum BuiltinId {
    Global = 0,
    ObjectConstructor,
    ObjectPrototype,
    FunctionConstructor,
    FunctionPrototype,
    ErrorConstructor,
    ErrorPrototype,
    TypeErrorConstructor,
    TypeErrorPrototype,
    RangeErrorConstructor,
    RangeErrorPrototype,
    ReferenceErrorConstructor,
    ReferenceErrorPrototype,
    SyntaxErrorConstructor,
    SyntaxErrorPrototype,
    UriErrorConstructor,
    UriErrorPrototype,
    EvalErrorConstructor,
    EvalErrorPrototype,
}

/// Number of built-in ids.
pub const BUILTIN_COUNT: usize = 19;

/// Routine id of the global `eval` function. The compiler marks
/// direct-eval call sites; the interpreter recognizes the callee by
/// this well-known id.
pub const GLOBAL_ROUTINE_EVAL: u16 = 1;

impl BuiltinId {
    /// Raw id stored in object records.
    pub fn to_raw(self) -> u8 {
        self as u8
    }

    /// Rebuilds an id from its raw form.
    pub fn from_raw(raw: u8) -> BuiltinId {
        const ALL: [BuiltinId; BUILTIN_COUNT] = [
            BuiltinId::Global,
            BuiltinId::ObjectConstructor,
            BuiltinId::ObjectPrototype,
            BuiltinId::FunctionConstructor,
            BuiltinId::FunctionPrototype,
            BuiltinId::ErrorConstructor,
            BuiltinId::ErrorPrototype,
            BuiltinId::TypeErrorConstructor,
            BuiltinId::TypeErrorPrototype,
            BuiltinId::RangeErrorConstructor,
            BuiltinId::RangeErrorPrototype,
            BuiltinId::ReferenceErrorConstructor,
            BuiltinId::ReferenceErrorPrototype,
            BuiltinId::SyntaxErrorConstructor,
            BuiltinId::SyntaxErrorPrototype,
            BuiltinId::UriErrorConstructor,
            BuiltinId::UriErrorPrototype,
            BuiltinId::EvalErrorConstructor,
            BuiltinId::EvalErrorPrototype,
        ];
        ALL[raw as usize]
    }
}

/// The descriptor value of one built-in property.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BuiltinValue {
    /// The `undefined` value.
    Undefined,
    /// The `null` value.
    Null,
    /// A boolean constant.
    Boolean(bool),
    /// A numeric constant.
    Number(f64),
    /// A magic string constant.
    String(MagicStringId),
    /// A reference to another built-in object.
    Builtin(BuiltinId),
    /// A routine of the owning built-in.
    Routine {
        /// Routine id dispatched through [`BuiltinProvider::call`].
        id: u16,
        /// The routine's `length` property value.
        length: u8,
    },
}

/// One entry of a built-in descriptor table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuiltinPropertyDesc {
    /// The property name.
    pub name: MagicStringId,
    /// Attribute bits of the materialized property.
    pub attrs: PropertyAttrs,
    /// The descriptor value.
    pub value: BuiltinValue,
}

/// Shape of a built-in object itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuiltinTemplate {
    /// The built-in serving as `[[Prototype]]`, if any.
    pub prototype: Option<BuiltinId>,
    /// True for callable built-ins (constructors, `Function.prototype`).
    pub callable: bool,
    /// `[[Class]]` override; `None` keeps the kind default.
    pub class_tag: Option<MagicStringId>,
}

/// The built-in library installed on a context.
pub trait BuiltinProvider {
    /// Object shape of a built-in.
    fn template(&self, id: BuiltinId) -> BuiltinTemplate;

    /// Descriptor table of a built-in. The first 32 entries are
    /// tracked by the object's instantiation bitset; entries beyond
    /// that use the secondary mask internal slot.
    fn descriptors(&self, id: BuiltinId) -> &'static [BuiltinPropertyDesc];

    /// Calls routine `routine` of built-in `id`.
    fn call(
        &self,
        ctx: &mut Context,
        id: BuiltinId,
        routine: u16,
        this: Value,
        args: &[Value],
    ) -> Value;

    /// Invokes the construct entry of built-in `id`.
    fn construct(&self, ctx: &mut Context, id: BuiltinId, args: &[Value]) -> Value;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_id_round_trip() {
        for raw in 0..BUILTIN_COUNT as u8 {
            let id = BuiltinId::from_raw(raw);
            assert_eq!(id.to_raw(), raw);
        }
    }
}
