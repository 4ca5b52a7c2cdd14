//! The function object protocol.
//!
//! `[[Call]]`, `[[Construct]]` and `[[HasInstance]]` dispatch over
//! the four function kinds: plain functions compiled from source,
//! built-in routines dispatched through the registry, external
//! functions registered by the embedder, and bound functions wrapping
//! a target with a fixed `this` and leading arguments.

use crate::context::Context;
use crate::conversion;
use crate::lex_env;
use crate::objects;
use crate::provider::BuiltinId;
use crate::vm;
use bytecode_system::{CodeFlags, CompiledCode};
use core_types::{CompactPtr, Value};
use memory_manager::{
    BoundFunctionData, ExternalFunctionData, FunctionData, ObjectData, ObjectKind, ObjectRecord,
};
use std::rc::Rc;

fn function_prototype_ptr(ctx: &mut Context) -> CompactPtr {
    if ctx.provider().is_some() {
        let proto = ctx.builtin_object(BuiltinId::FunctionPrototype);
        ctx.heap.ref_cell(proto);
        proto
    } else {
        CompactPtr::NULL
    }
}

/// Creates a plain function object closing over `scope`.
///
/// A named function expression gets an intermediate declarative
/// environment carrying the immutable self-binding.
pub fn create_function(ctx: &mut Context, code: Rc<CompiledCode>, scope: CompactPtr) -> Value {
    let named_expression = code.flags.contains(CodeFlags::NAMED_EXPRESSION);
    let name = code.name_string().map(|s| s.to_string());

    let effective_scope = if named_expression && name.is_some() {
        lex_env::create_declarative_env(ctx, scope)
    } else {
        ctx.heap.ref_cell(scope);
        scope
    };

    let prototype = function_prototype_ptr(ctx);
    let mut record = ObjectRecord::new(ObjectKind::Function, prototype, true);
    record.data = ObjectData::Function(FunctionData {
        code,
        scope: effective_scope,
    });
    let ptr = ctx.alloc_object(record);
    let value = Value::object_ptr(ptr);

    if named_expression {
        if let Some(name) = name {
            lex_env::declare_binding(ctx, effective_scope, &name, value, false, false);
        }
    }
    value
}

/// Creates an external (host) function object.
pub fn create_external_function(ctx: &mut Context, handler: u32) -> Value {
    let prototype = function_prototype_ptr(ctx);
    let mut record = ObjectRecord::new(ObjectKind::ExternalFunction, prototype, true);
    record.data = ObjectData::External(ExternalFunctionData { handler });
    Value::object_ptr(ctx.alloc_object(record))
}

/// Creates a bound function (§15.3.4.5).
pub fn create_bound_function(
    ctx: &mut Context,
    target: Value,
    bound_this: Value,
    bound_args: &[Value],
) -> Value {
    debug_assert!(is_callable(ctx, target));
    let target_ptr = target.as_object_ptr();
    ctx.heap.ref_cell(target_ptr);
    let this_copy = ctx.heap.copy_value(bound_this);
    let args_copy: Vec<Value> = bound_args
        .iter()
        .map(|arg| ctx.heap.copy_value(*arg))
        .collect();

    let prototype = function_prototype_ptr(ctx);
    let mut record = ObjectRecord::new(ObjectKind::BoundFunction, prototype, true);
    record.data = ObjectData::Bound(BoundFunctionData {
        target: target_ptr,
        bound_this: this_copy,
        bound_args: args_copy,
    });
    Value::object_ptr(ctx.alloc_object(record))
}

/// `IsCallable`.
pub fn is_callable(ctx: &Context, value: Value) -> bool {
    value.is_object() && ctx.heap.object(value.as_object_ptr()).is_callable()
}

/// True for function kinds that implement `[[Construct]]`: plain,
/// external, and bound functions, plus built-in constructors (but not
/// every built-in routine).
pub fn is_constructor(ctx: &Context, value: Value) -> bool {
    if !value.is_object() {
        return false;
    }
    let record = ctx.heap.object(value.as_object_ptr());
    match record.kind {
        ObjectKind::Function | ObjectKind::ExternalFunction | ObjectKind::BoundFunction => true,
        ObjectKind::BuiltinFunction => record.builtin().map_or(false, |b| b.routine_id == 0),
        _ => false,
    }
}

/// `[[Call]]`.
pub fn op_function_call(ctx: &mut Context, func: Value, this: Value, args: &[Value]) -> Value {
    if !is_callable(ctx, func) {
        return ctx.throw_type_error("value is not a function");
    }
    let func_ptr = func.as_object_ptr();
    let kind = ctx.heap.object(func_ptr).kind;
    match kind {
        ObjectKind::Function => {
            let (code, scope) = match &ctx.heap.object(func_ptr).data {
                ObjectData::Function(data) => (data.code.clone(), data.scope),
                _ => unreachable!("plain function without function data"),
            };

            // Compute the this binding: strict functions observe the
            // caller's value exactly; sloppy functions substitute the
            // global object for undefined/null and box primitives.
            let this_binding = if code.is_strict() {
                ctx.heap.copy_value(this)
            } else if this.is_undefined() || this.is_null() || this.is_empty() {
                let global = ctx.global_object();
                ctx.heap.ref_cell(global);
                Value::object_ptr(global)
            } else if !this.is_object() {
                let boxed = conversion::to_object(ctx, this);
                if boxed.is_abrupt() {
                    return boxed;
                }
                boxed
            } else {
                ctx.heap.copy_value(this)
            };

            // A function whose bindings cannot escape runs directly in
            // its captured scope.
            let env = if code.flags.contains(CodeFlags::LEX_ENV_NOT_NEEDED) {
                ctx.heap.ref_cell(scope);
                scope
            } else {
                lex_env::create_declarative_env(ctx, scope)
            };

            let result = vm::vm_run(ctx, &code, this_binding, env, false, Some(func), args);
            ctx.heap.free_value(this_binding);
            ctx.heap.deref_cell(env);
            result
        }
        ObjectKind::BuiltinFunction => {
            let data = *ctx
                .heap
                .object(func_ptr)
                .builtin()
                .expect("built-in function without built-in data");
            let Some(provider) = ctx.provider() else {
                return ctx.throw_type_error("no built-in library installed");
            };
            provider.call(
                ctx,
                BuiltinId::from_raw(data.builtin_id),
                data.routine_id,
                this,
                args,
            )
        }
        ObjectKind::ExternalFunction => {
            let handler_id = match &ctx.heap.object(func_ptr).data {
                ObjectData::External(data) => data.handler,
                _ => unreachable!("external function without external data"),
            };
            let handler = ctx.external_handler(handler_id);
            handler(ctx, this, args)
        }
        ObjectKind::BoundFunction => {
            let (target, bound_this, bound_args) = match &ctx.heap.object(func_ptr).data {
                ObjectData::Bound(data) => {
                    (data.target, data.bound_this, data.bound_args.clone())
                }
                _ => unreachable!("bound function without bound data"),
            };
            let mut merged = bound_args;
            merged.extend_from_slice(args);
            op_function_call(ctx, Value::object_ptr(target), bound_this, &merged)
        }
        _ => unreachable!("is_callable admitted a non-function"),
    }
}

/// `[[Construct]]`.
pub fn op_function_construct(ctx: &mut Context, func: Value, args: &[Value]) -> Value {
    if !is_constructor(ctx, func) {
        return ctx.throw_type_error("value is not a constructor");
    }
    let func_ptr = func.as_object_ptr();
    let kind = ctx.heap.object(func_ptr).kind;
    match kind {
        ObjectKind::Function | ObjectKind::ExternalFunction => {
            // The new object's prototype is the function's `prototype`
            // property when it is an object, `Object.prototype`
            // otherwise.
            let proto_value = objects::get(ctx, func_ptr, "prototype", func);
            if proto_value.is_abrupt() {
                return proto_value;
            }
            let prototype = if proto_value.is_object() {
                let ptr = proto_value.as_object_ptr();
                ctx.heap.ref_cell(ptr);
                ptr
            } else if ctx.provider().is_some() {
                let ptr = ctx.builtin_object(BuiltinId::ObjectPrototype);
                ctx.heap.ref_cell(ptr);
                ptr
            } else {
                CompactPtr::NULL
            };
            ctx.heap.free_value(proto_value);

            let created =
                Value::object_ptr(ctx.alloc_object(ObjectRecord::new(
                    ObjectKind::General,
                    prototype,
                    true,
                )));
            let result = op_function_call(ctx, func, created, args);
            if result.is_abrupt() {
                ctx.heap.free_value(created);
                return result;
            }
            if result.is_object() {
                ctx.heap.free_value(created);
                return result;
            }
            ctx.heap.free_value(result);
            created
        }
        ObjectKind::BoundFunction => {
            let (target, bound_args) = match &ctx.heap.object(func_ptr).data {
                ObjectData::Bound(data) => (data.target, data.bound_args.clone()),
                _ => unreachable!("bound function without bound data"),
            };
            let target_value = Value::object_ptr(target);
            if !is_constructor(ctx, target_value) {
                return ctx.throw_type_error("bound target is not a constructor");
            }
            let mut merged = bound_args;
            merged.extend_from_slice(args);
            op_function_construct(ctx, target_value, &merged)
        }
        ObjectKind::BuiltinFunction => {
            let data = *ctx
                .heap
                .object(func_ptr)
                .builtin()
                .expect("built-in function without built-in data");
            let Some(provider) = ctx.provider() else {
                return ctx.throw_type_error("no built-in library installed");
            };
            provider.construct(ctx, BuiltinId::from_raw(data.builtin_id), args)
        }
        _ => unreachable!("is_constructor admitted a non-constructor"),
    }
}

/// `[[HasInstance]]` (§15.3.5.3, §15.3.4.5.3).
pub fn op_function_has_instance(ctx: &mut Context, func: Value, value: Value) -> Value {
    if !is_callable(ctx, func) {
        return ctx.throw_type_error("right-hand side of 'instanceof' is not callable");
    }
    let func_ptr = func.as_object_ptr();
    if ctx.heap.object(func_ptr).kind == ObjectKind::BoundFunction {
        let target = match &ctx.heap.object(func_ptr).data {
            ObjectData::Bound(data) => data.target,
            _ => unreachable!("bound function without bound data"),
        };
        return op_function_has_instance(ctx, Value::object_ptr(target), value);
    }
    if !is_constructor(ctx, func) {
        return ctx.throw_type_error("function has no [[HasInstance]]");
    }
    if !value.is_object() {
        return Value::FALSE;
    }

    let proto_value = objects::get(ctx, func_ptr, "prototype", func);
    if proto_value.is_abrupt() {
        return proto_value;
    }
    if !proto_value.is_object() {
        ctx.heap.free_value(proto_value);
        return ctx.throw_type_error("function prototype is not an object");
    }
    let target_proto = proto_value.as_object_ptr();

    let mut current = ctx.heap.object(value.as_object_ptr()).prototype;
    let result = loop {
        if current.is_null() {
            break Value::FALSE;
        }
        if current == target_proto {
            break Value::TRUE;
        }
        current = ctx.heap.object(current).prototype;
    };
    ctx.heap.free_value(proto_value);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::PropertyDescriptor;

    fn trivial_code() -> Rc<CompiledCode> {
        let mut code = CompiledCode::new();
        code.code = vec![bytecode_system::Opcode::Return.to_byte()];
        Rc::new(code)
    }

    #[test]
    fn test_is_callable_kinds() {
        let mut ctx = Context::new();
        let scope = ctx.global_env();
        let func = create_function(&mut ctx, trivial_code(), scope);
        assert!(is_callable(&ctx, func));
        assert!(is_constructor(&ctx, func));
        assert!(!is_callable(&ctx, Value::integer(1)));
        let plain = objects::create_plain_object(&mut ctx);
        assert!(!is_callable(&ctx, plain));
    }

    #[test]
    fn test_call_non_callable_is_type_error() {
        let mut ctx = Context::new();
        let result = op_function_call(&mut ctx, Value::integer(7), Value::UNDEFINED, &[]);
        assert!(result.is_abrupt());
    }

    #[test]
    fn test_external_function_call() {
        fn double_it(ctx: &mut Context, _this: Value, args: &[Value]) -> Value {
            let n = ctx.heap.number_of(args[0]);
            ctx.make_number(n * 2.0)
        }
        let mut ctx = Context::new();
        let handler = ctx.register_external(double_it);
        let func = create_external_function(&mut ctx, handler);
        let result = op_function_call(&mut ctx, func, Value::UNDEFINED, &[Value::integer(21)]);
        assert_eq!(result, Value::integer(42));
    }

    #[test]
    fn test_bound_function_merges_arguments() {
        fn sum(ctx: &mut Context, _this: Value, args: &[Value]) -> Value {
            let total: f64 = args.iter().map(|a| ctx.heap.number_of(*a)).sum();
            ctx.make_number(total)
        }
        let mut ctx = Context::new();
        let handler = ctx.register_external(sum);
        let target = create_external_function(&mut ctx, handler);
        let bound = create_bound_function(
            &mut ctx,
            target,
            Value::UNDEFINED,
            &[Value::integer(10), Value::integer(20)],
        );
        let result = op_function_call(&mut ctx, bound, Value::UNDEFINED, &[Value::integer(12)]);
        assert_eq!(result, Value::integer(42));
    }

    #[test]
    fn test_construct_returns_object_override() {
        fn return_this_t(ctx: &mut Context, this: Value, _args: &[Value]) -> Value {
            // Writes this.t = 12, returns a primitive: construct must
            // hand back the created object.
            let obj = this.as_object_ptr();
            let desc = PropertyDescriptor::data(Value::integer(12));
            let r = objects::define_own_property(ctx, obj, "t", &desc, false);
            ctx.heap.free_value(r);
            Value::integer(99)
        }
        let mut ctx = Context::new();
        let handler = ctx.register_external(return_this_t);
        let ctor = create_external_function(&mut ctx, handler);
        let instance = op_function_construct(&mut ctx, ctor, &[]);
        assert!(instance.is_object());
        let t = objects::get(&mut ctx, instance.as_object_ptr(), "t", instance);
        assert_eq!(t, Value::integer(12));
    }

    #[test]
    fn test_has_instance_walks_prototype_chain() {
        let mut ctx = Context::new();
        let scope = ctx.global_env();
        let func = create_function(&mut ctx, trivial_code(), scope);
        let instance = op_function_construct(&mut ctx, func, &[]);
        assert!(instance.is_object());
        assert_eq!(op_function_has_instance(&mut ctx, func, instance), Value::TRUE);

        let unrelated = objects::create_plain_object(&mut ctx);
        assert_eq!(op_function_has_instance(&mut ctx, func, unrelated), Value::FALSE);
        assert_eq!(
            op_function_has_instance(&mut ctx, func, Value::integer(1)),
            Value::FALSE
        );
    }

    #[test]
    fn test_function_lazy_length_and_prototype() {
        let mut ctx = Context::new();
        let mut code = CompiledCode::new();
        code.argument_count = 2;
        code.code = vec![bytecode_system::Opcode::Return.to_byte()];
        let scope = ctx.global_env();
        let func = create_function(&mut ctx, Rc::new(code), scope);
        let func_ptr = func.as_object_ptr();

        let length = objects::get(&mut ctx, func_ptr, "length", func);
        assert_eq!(length, Value::integer(2));
        // Repeated reads are idempotent.
        let again = objects::get(&mut ctx, func_ptr, "length", func);
        assert_eq!(again, Value::integer(2));

        let proto = objects::get(&mut ctx, func_ptr, "prototype", func);
        assert!(proto.is_object());
        let constructor =
            objects::get(&mut ctx, proto.as_object_ptr(), "constructor", proto);
        assert_eq!(constructor, func);

        // The prototype slot itself is non-configurable.
        let deleted = objects::delete_property(&mut ctx, func_ptr, "prototype", false);
        assert_eq!(deleted, Value::FALSE);
    }

    #[test]
    fn test_strict_function_thrower_accessors_share_identity() {
        let mut ctx = Context::new();
        let mut code = CompiledCode::new();
        code.flags.insert(CodeFlags::STRICT);
        code.code = vec![bytecode_system::Opcode::Return.to_byte()];
        let scope = ctx.global_env();
        let func = create_function(&mut ctx, Rc::new(code), scope);
        let func_ptr = func.as_object_ptr();

        let caller = objects::get(&mut ctx, func_ptr, "caller", func);
        assert!(caller.is_abrupt(), "thrower getter throws TypeError");

        let caller_node = objects::get_own_property(&mut ctx, func_ptr, "caller").unwrap();
        let arguments_node = objects::get_own_property(&mut ctx, func_ptr, "arguments").unwrap();
        let getter_of = |ctx: &Context, node: CompactPtr| match ctx.heap.property(node).slot {
            memory_manager::PropertySlot::Accessor { getter, .. } => getter,
            _ => panic!("expected accessor"),
        };
        let g1 = getter_of(&ctx, caller_node);
        let g2 = getter_of(&ctx, arguments_node);
        assert_eq!(g1, g2, "one shared thrower per context");
        assert_eq!(g1, ctx.thrower());
    }
}
