//! Lexical environments.
//!
//! Environments are objects whose property chain is the binding
//! table. Declarative environments hold bindings directly;
//! object-bound environments (the global environment, `with` blocks)
//! delegate to their binding object. Every environment points to an
//! outer environment; the chain terminates at the global environment.

use crate::context::Context;
use crate::objects;
use core_types::{CompactPtr, Value};
use memory_manager::{
    LexEnvData, ObjectData, ObjectKind, ObjectRecord, PropertyAttrs, PropertyName, PropertyNode,
    PropertySlot,
};

/// Creates a declarative environment chained to `outer`.
pub fn create_declarative_env(ctx: &mut Context, outer: CompactPtr) -> CompactPtr {
    if !outer.is_null() {
        ctx.heap.ref_cell(outer);
    }
    let mut record = ObjectRecord::new(ObjectKind::LexEnvDeclarative, CompactPtr::NULL, true);
    record.data = ObjectData::LexEnv(LexEnvData {
        outer,
        binding_object: CompactPtr::NULL,
        provide_this: false,
    });
    ctx.alloc_object(record)
}

/// Creates an object environment wrapping `binding_object`.
pub fn create_object_env(
    ctx: &mut Context,
    binding_object: CompactPtr,
    outer: CompactPtr,
    provide_this: bool,
) -> CompactPtr {
    if !outer.is_null() {
        ctx.heap.ref_cell(outer);
    }
    ctx.heap.ref_cell(binding_object);
    let mut record = ObjectRecord::new(ObjectKind::LexEnvObject, CompactPtr::NULL, true);
    record.data = ObjectData::LexEnv(LexEnvData {
        outer,
        binding_object,
        provide_this,
    });
    ctx.alloc_object(record)
}

/// The outer environment, or null for the global environment.
pub fn outer_of(ctx: &Context, env: CompactPtr) -> CompactPtr {
    ctx.heap.object(env).lex_env().outer
}

fn binding_object_of(ctx: &Context, env: CompactPtr) -> CompactPtr {
    ctx.heap.object(env).lex_env().binding_object
}

/// True when this single environment has a binding for `name`.
pub fn has_binding(ctx: &mut Context, env: CompactPtr, name: &str) -> bool {
    match ctx.heap.object(env).kind {
        ObjectKind::LexEnvDeclarative => objects::find_own_node(ctx, env, name).is_some(),
        ObjectKind::LexEnvObject => {
            let object = binding_object_of(ctx, env);
            objects::has_property(ctx, object, name)
        }
        _ => unreachable!("not a lexical environment"),
    }
}

/// Creates (or overwrites) a binding in this environment.
///
/// `mutable` is false for the immutable self-binding of named
/// function expressions; `deletable` is true for eval-introduced
/// bindings.
pub fn declare_binding(
    ctx: &mut Context,
    env: CompactPtr,
    name: &str,
    value: Value,
    mutable: bool,
    deletable: bool,
) {
    match ctx.heap.object(env).kind {
        ObjectKind::LexEnvDeclarative => {
            if let Some(node) = objects::find_own_node(ctx, env, name) {
                let copied = ctx.heap.copy_value(value);
                let mut old = Value::EMPTY;
                if let PropertySlot::Value(ref mut slot) = ctx.heap.property_mut(node).slot {
                    old = std::mem::replace(slot, copied);
                }
                ctx.heap.free_value(old);
                return;
            }
            let copied = ctx.heap.copy_value(value);
            let name_value = ctx.alloc_string(name);
            let prop_name = ctx.heap.property_name_from(name_value);
            ctx.heap.free_value(name_value);
            ctx.append_property(
                env,
                PropertyNode::data(
                    prop_name,
                    copied,
                    PropertyAttrs {
                        writable: mutable,
                        enumerable: false,
                        configurable: deletable,
                    },
                ),
            );
        }
        ObjectKind::LexEnvObject => {
            let object = binding_object_of(ctx, env);
            let desc = objects::PropertyDescriptor {
                value: Some(value),
                writable: Some(mutable),
                enumerable: Some(true),
                configurable: Some(deletable),
                ..Default::default()
            };
            let result = objects::define_own_property(ctx, object, name, &desc, false);
            debug_assert!(!result.is_abrupt());
            ctx.heap.free_value(result);
        }
        _ => unreachable!("not a lexical environment"),
    }
}

/// Resolves `name` along the environment chain and returns its value,
/// or a `ReferenceError` completion when unresolvable.
pub fn get_ident_value(ctx: &mut Context, env: CompactPtr, name: &str) -> Value {
    let mut current = env;
    while !current.is_null() {
        match ctx.heap.object(current).kind {
            ObjectKind::LexEnvDeclarative => {
                if let Some(node) = objects::find_own_node(ctx, current, name) {
                    if let PropertySlot::Value(value) = ctx.heap.property(node).slot {
                        return ctx.heap.copy_value(value);
                    }
                }
            }
            ObjectKind::LexEnvObject => {
                let object = binding_object_of(ctx, current);
                if objects::has_property(ctx, object, name) {
                    return objects::get(ctx, object, name, Value::object_ptr(object));
                }
            }
            _ => unreachable!("not a lexical environment"),
        }
        current = outer_of(ctx, current);
    }
    ctx.throw_reference_error(&format!("'{}' is not defined", name))
}

/// True when `name` resolves somewhere along the chain.
pub fn ident_is_resolvable(ctx: &mut Context, env: CompactPtr, name: &str) -> bool {
    let mut current = env;
    while !current.is_null() {
        if has_binding(ctx, current, name) {
            return true;
        }
        current = outer_of(ctx, current);
    }
    false
}

/// Assigns to `name` along the chain. An unresolvable name creates a
/// global property in sloppy mode and throws `ReferenceError` in
/// strict mode.
pub fn put_ident_value(
    ctx: &mut Context,
    env: CompactPtr,
    name: &str,
    value: Value,
    strict: bool,
) -> Value {
    let mut current = env;
    while !current.is_null() {
        match ctx.heap.object(current).kind {
            ObjectKind::LexEnvDeclarative => {
                if let Some(node) = objects::find_own_node(ctx, current, name) {
                    if !ctx.heap.property(node).attrs.writable {
                        if strict {
                            return ctx.throw_type_error(&format!(
                                "assignment to constant binding '{}'",
                                name
                            ));
                        }
                        return Value::TRUE;
                    }
                    let copied = ctx.heap.copy_value(value);
                    let mut old = Value::EMPTY;
                    if let PropertySlot::Value(ref mut slot) = ctx.heap.property_mut(node).slot {
                        old = std::mem::replace(slot, copied);
                    }
                    ctx.heap.free_value(old);
                    return Value::TRUE;
                }
            }
            ObjectKind::LexEnvObject => {
                let object = binding_object_of(ctx, current);
                if objects::has_property(ctx, object, name) {
                    return objects::put(ctx, object, name, value, strict, Value::object_ptr(object));
                }
            }
            _ => unreachable!("not a lexical environment"),
        }
        current = outer_of(ctx, current);
    }

    if strict {
        return ctx.throw_reference_error(&format!("'{}' is not defined", name));
    }
    let global = ctx.global_object();
    objects::put(ctx, global, name, value, false, Value::object_ptr(global))
}

/// `delete` on an identifier (sloppy mode only; the parser rejects it
/// in strict mode). Deletes the binding where it is found.
pub fn delete_ident(ctx: &mut Context, env: CompactPtr, name: &str) -> Value {
    let mut current = env;
    while !current.is_null() {
        match ctx.heap.object(current).kind {
            ObjectKind::LexEnvDeclarative => {
                if let Some(node) = objects::find_own_node(ctx, current, name) {
                    if !ctx.heap.property(node).attrs.configurable {
                        return Value::FALSE;
                    }
                    return objects::delete_property(ctx, current, name, false);
                }
            }
            ObjectKind::LexEnvObject => {
                let object = binding_object_of(ctx, current);
                if objects::has_property(ctx, object, name) {
                    return objects::delete_property(ctx, object, name, false);
                }
            }
            _ => unreachable!("not a lexical environment"),
        }
        current = outer_of(ctx, current);
    }
    Value::TRUE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declarative_binding_round_trip() {
        let mut ctx = Context::new();
        let global_env = ctx.global_env();
        let env = create_declarative_env(&mut ctx, global_env);
        declare_binding(&mut ctx, env, "local", Value::integer(5), true, false);
        assert!(has_binding(&mut ctx, env, "local"));
        assert_eq!(get_ident_value(&mut ctx, env, "local"), Value::integer(5));

        let result = put_ident_value(&mut ctx, env, "local", Value::integer(9), true);
        assert_eq!(result, Value::TRUE);
        assert_eq!(get_ident_value(&mut ctx, env, "local"), Value::integer(9));
    }

    #[test]
    fn test_outer_chain_resolution() {
        let mut ctx = Context::new();
        let global_env = ctx.global_env();
        let outer = create_declarative_env(&mut ctx, global_env);
        declare_binding(&mut ctx, outer, "captured", Value::integer(1), true, false);
        let inner = create_declarative_env(&mut ctx, outer);
        assert_eq!(get_ident_value(&mut ctx, inner, "captured"), Value::integer(1));
    }

    #[test]
    fn test_unresolvable_reference() {
        let mut ctx = Context::new();
        let env = ctx.global_env();
        let result = get_ident_value(&mut ctx, env, "missing_name");
        assert!(result.is_abrupt());
    }

    #[test]
    fn test_sloppy_assignment_creates_global() {
        let mut ctx = Context::new();
        let global_env = ctx.global_env();
        let env = create_declarative_env(&mut ctx, global_env);
        let result = put_ident_value(&mut ctx, env, "implicit", Value::integer(3), false);
        assert_eq!(result, Value::TRUE);
        let global = ctx.global_object();
        assert_eq!(
            objects::get(&mut ctx, global, "implicit", Value::object_ptr(global)),
            Value::integer(3)
        );
    }

    #[test]
    fn test_strict_assignment_to_unresolvable_throws() {
        let mut ctx = Context::new();
        let env = ctx.global_env();
        let result = put_ident_value(&mut ctx, env, "missing_name", Value::integer(1), true);
        assert!(result.is_abrupt());
    }

    #[test]
    fn test_immutable_binding() {
        let mut ctx = Context::new();
        let global_env = ctx.global_env();
        let env = create_declarative_env(&mut ctx, global_env);
        declare_binding(&mut ctx, env, "fixed", Value::integer(1), false, false);

        // Sloppy mode ignores the write, strict mode throws.
        let sloppy = put_ident_value(&mut ctx, env, "fixed", Value::integer(2), false);
        assert_eq!(sloppy, Value::TRUE);
        assert_eq!(get_ident_value(&mut ctx, env, "fixed"), Value::integer(1));
        let strict = put_ident_value(&mut ctx, env, "fixed", Value::integer(2), true);
        assert!(strict.is_abrupt());
    }

    #[test]
    fn test_global_env_is_object_env() {
        let mut ctx = Context::new();
        let global = ctx.global_object();
        let desc = objects::PropertyDescriptor::data(Value::integer(11));
        objects::define_own_property(&mut ctx, global, "shared", &desc, false);
        let env = ctx.global_env();
        assert_eq!(get_ident_value(&mut ctx, env, "shared"), Value::integer(11));
    }

    #[test]
    fn test_delete_ident() {
        let mut ctx = Context::new();
        let global_env = ctx.global_env();
        let env = create_declarative_env(&mut ctx, global_env);
        declare_binding(&mut ctx, env, "gone", Value::integer(1), true, true);
        assert_eq!(delete_ident(&mut ctx, env, "gone"), Value::TRUE);
        assert!(!has_binding(&mut ctx, env, "gone"));

        declare_binding(&mut ctx, env, "stays", Value::integer(1), true, false);
        assert_eq!(delete_ident(&mut ctx, env, "stays"), Value::FALSE);
        assert!(has_binding(&mut ctx, env, "stays"));
    }
}
