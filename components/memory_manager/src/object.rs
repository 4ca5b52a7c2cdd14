//! Object records.
//!
//! Every object is one heap cell: a kind tag, flags, the prototype
//! pointer, the property-chain head, and kind-specific extended data.
//! Function kinds are extended records carrying their callable payload;
//! lexical environments are objects whose property chain is the
//! binding table.

use bytecode_system::CompiledCode;
use core_types::{CompactPtr, Value};
use std::rc::Rc;

/// The kind tag of an object record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// An ordinary object.
    General,
    /// A plain function compiled from source.
    Function,
    /// A function produced by `Function.prototype.bind`.
    BoundFunction,
    /// A host function registered by the embedder.
    ExternalFunction,
    /// A built-in routine dispatched through the registry.
    BuiltinFunction,
    /// An array exotic object.
    Array,
    /// A String wrapper object.
    StringObject,
    /// An Arguments exotic object.
    Arguments,
    /// A declarative lexical environment.
    LexEnvDeclarative,
    /// An object-bound lexical environment (`with`, global).
    LexEnvObject,
}

impl ObjectKind {
    /// Returns true for the function kinds (callable objects).
    pub fn is_function(self) -> bool {
        matches!(
            self,
            ObjectKind::Function
                | ObjectKind::BoundFunction
                | ObjectKind::ExternalFunction
                | ObjectKind::BuiltinFunction
        )
    }

    /// Returns true for the lexical environment kinds.
    pub fn is_lex_env(self) -> bool {
        matches!(self, ObjectKind::LexEnvDeclarative | ObjectKind::LexEnvObject)
    }
}

/// Payload of a plain function object.
#[derive(Debug, Clone)]
pub struct FunctionData {
    /// The compiled body.
    pub code: Rc<CompiledCode>,
    /// The captured scope: a lexical environment cell.
    pub scope: CompactPtr,
}

/// Payload of a bound function object.
#[derive(Debug, Clone)]
pub struct BoundFunctionData {
    /// The wrapped target function object.
    pub target: CompactPtr,
    /// The bound `this` value.
    pub bound_this: Value,
    /// Arguments prepended on every call.
    pub bound_args: Vec<Value>,
}

/// Payload of an external (host) function object.
#[derive(Debug, Clone, Copy)]
pub struct ExternalFunctionData {
    /// Index into the context's external handler table.
    pub handler: u32,
}

/// Payload of a built-in object or routine.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinData {
    /// The built-in id (raw form of the registry enumeration).
    pub builtin_id: u8,
    /// Routine id within the built-in, zero for non-routine objects.
    pub routine_id: u16,
    /// Bitset of descriptor slots 0..32 already materialized.
    pub instantiated_mask: u32,
}

/// Payload of a lexical environment.
#[derive(Debug, Clone, Copy)]
pub struct LexEnvData {
    /// The outer environment, or null for the global environment.
    pub outer: CompactPtr,
    /// The wrapped binding object for object-bound environments.
    pub binding_object: CompactPtr,
    /// True when the environment provides its binding object as `this`
    /// (`with` environments).
    pub provide_this: bool,
}

/// Kind-specific extended data of an object record.
#[derive(Debug, Clone)]
pub enum ObjectData {
    /// No extended data (general objects, arrays, wrappers, arguments).
    None,
    /// Plain function payload.
    Function(FunctionData),
    /// Bound function payload.
    Bound(BoundFunctionData),
    /// External function payload.
    External(ExternalFunctionData),
    /// Built-in payload.
    Builtin(BuiltinData),
    /// Lexical environment payload.
    LexEnv(LexEnvData),
}

/// An object record: one heap cell.
#[derive(Debug, Clone)]
pub struct ObjectRecord {
    /// The kind tag.
    pub kind: ObjectKind,
    /// Whether new properties may be added.
    pub extensible: bool,
    /// Set for objects owned by the built-in registry.
    pub is_builtin: bool,
    /// The prototype object, or null.
    pub prototype: CompactPtr,
    /// Head of the property chain, or null.
    pub properties: CompactPtr,
    /// Kind-specific payload.
    pub data: ObjectData,
}

impl ObjectRecord {
    /// Creates a record with an empty property chain.
    pub fn new(kind: ObjectKind, prototype: CompactPtr, extensible: bool) -> Self {
        ObjectRecord {
            kind,
            extensible,
            is_builtin: false,
            prototype,
            properties: CompactPtr::NULL,
            data: ObjectData::None,
        }
    }

    /// Returns true for callable objects.
    pub fn is_callable(&self) -> bool {
        self.kind.is_function()
    }

    /// Returns the built-in payload, if this is a registry object.
    pub fn builtin(&self) -> Option<&BuiltinData> {
        match &self.data {
            ObjectData::Builtin(data) => Some(data),
            _ => None,
        }
    }

    /// Returns the lexical environment payload.
    ///
    /// The record must be a lexical environment kind.
    pub fn lex_env(&self) -> &LexEnvData {
        match &self.data {
            ObjectData::LexEnv(data) => data,
            _ => unreachable!("object record is not a lexical environment"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_predicates() {
        assert!(ObjectKind::Function.is_function());
        assert!(ObjectKind::BoundFunction.is_function());
        assert!(ObjectKind::BuiltinFunction.is_function());
        assert!(!ObjectKind::General.is_function());
        assert!(ObjectKind::LexEnvDeclarative.is_lex_env());
        assert!(!ObjectKind::Array.is_lex_env());
    }

    #[test]
    fn test_new_record() {
        let record = ObjectRecord::new(ObjectKind::General, CompactPtr::NULL, true);
        assert!(record.extensible);
        assert!(!record.is_builtin);
        assert!(record.properties.is_null());
        assert!(!record.is_callable());
        assert!(record.builtin().is_none());
    }
}
