//! The `Function` constructor and `Function.prototype`.

use bytecode_system::Literal;
use core_types::{MagicStringId, Value};
use interpreter::{
    conversion, function, objects, BuiltinId, BuiltinPropertyDesc, BuiltinValue, Context,
};
use memory_manager::PropertyAttrs;
use parser::{parse_program, ProgramKind};
use std::rc::Rc;

const ROUTINE_CALL: u16 = 1;
const ROUTINE_APPLY: u16 = 2;
const ROUTINE_BIND: u16 = 3;

const ROUTINE_ATTRS: PropertyAttrs = PropertyAttrs {
    writable: true,
    enumerable: false,
    configurable: true,
};

/// Descriptor table of the `Function` constructor.
pub(crate) static CONSTRUCTOR_DESCRIPTORS: [BuiltinPropertyDesc; 2] = [
    BuiltinPropertyDesc {
        name: MagicStringId::Prototype,
        attrs: PropertyAttrs::none(),
        value: BuiltinValue::Builtin(BuiltinId::FunctionPrototype),
    },
    BuiltinPropertyDesc {
        name: MagicStringId::Length,
        attrs: PropertyAttrs::none(),
        value: BuiltinValue::Number(1.0),
    },
];

/// Descriptor table of `Function.prototype`.
pub(crate) static PROTOTYPE_DESCRIPTORS: [BuiltinPropertyDesc; 5] = [
    BuiltinPropertyDesc {
        name: MagicStringId::Constructor,
        attrs: ROUTINE_ATTRS,
        value: BuiltinValue::Builtin(BuiltinId::FunctionConstructor),
    },
    BuiltinPropertyDesc {
        name: MagicStringId::Length,
        attrs: PropertyAttrs::none(),
        value: BuiltinValue::Number(0.0),
    },
    BuiltinPropertyDesc {
        name: MagicStringId::Call,
        attrs: ROUTINE_ATTRS,
        value: BuiltinValue::Routine {
            id: ROUTINE_CALL,
            length: 1,
        },
    },
    BuiltinPropertyDesc {
        name: MagicStringId::Apply,
        attrs: ROUTINE_ATTRS,
        value: BuiltinValue::Routine {
            id: ROUTINE_APPLY,
            length: 2,
        },
    },
    BuiltinPropertyDesc {
        name: MagicStringId::Bind,
        attrs: ROUTINE_ATTRS,
        value: BuiltinValue::Routine {
            id: ROUTINE_BIND,
            length: 1,
        },
    },
];

/// `new Function(p1, ..., pn, body)` (§15.3.2.1): the parameter texts
/// and the body compile like a function declaration in the global
/// environment.
pub(crate) fn construct(ctx: &mut Context, args: &[Value]) -> Value {
    let mut texts = Vec::with_capacity(args.len());
    for &arg in args {
        let string = conversion::to_string_value(ctx, arg);
        if string.is_abrupt() {
            return string;
        }
        texts.push(ctx.string_text(string).to_string());
        ctx.heap.free_value(string);
    }
    let (body, params) = match texts.split_last() {
        Some((body, params)) => (body.clone(), params.join(", ")),
        None => (String::new(), String::new()),
    };
    let source = format!("function anonymous({}) {{\n{}\n}}", params, body);
    let program = match parse_program(&source, false, ProgramKind::Global) {
        Ok(program) => program,
        Err(error) => return ctx.throw_error(error.kind, &error.message),
    };
    let Some(function_literal) = program.declarations.iter().find_map(|d| d.function) else {
        return ctx.throw_type_error("Function constructor produced no function");
    };
    let code = match program.literal(function_literal as usize) {
        Literal::Function(code) => Rc::clone(code),
        _ => return ctx.throw_type_error("Function constructor produced no function"),
    };
    let env = ctx.global_env();
    function::create_function(ctx, code, env)
}

pub(crate) fn call_prototype_routine(
    ctx: &mut Context,
    routine: u16,
    this: Value,
    args: &[Value],
) -> Value {
    match routine {
        // Function.prototype itself is callable and returns undefined
        // for any arguments (§15.3.4).
        0 => Value::UNDEFINED,
        ROUTINE_CALL => call_method(ctx, this, args),
        ROUTINE_APPLY => apply_method(ctx, this, args),
        ROUTINE_BIND => bind_method(ctx, this, args),
        _ => ctx.throw_type_error("unknown Function routine"),
    }
}

/// `Function.prototype.call` (§15.3.4.4).
fn call_method(ctx: &mut Context, this: Value, args: &[Value]) -> Value {
    if !function::is_callable(ctx, this) {
        return ctx.throw_type_error("Function.prototype.call called on non-callable");
    }
    let this_arg = args.first().copied().unwrap_or(Value::UNDEFINED);
    let rest = if args.is_empty() { &[] } else { &args[1..] };
    function::op_function_call(ctx, this, this_arg, rest)
}

/// `Function.prototype.apply` (§15.3.4.3).
fn apply_method(ctx: &mut Context, this: Value, args: &[Value]) -> Value {
    if !function::is_callable(ctx, this) {
        return ctx.throw_type_error("Function.prototype.apply called on non-callable");
    }
    let this_arg = args.first().copied().unwrap_or(Value::UNDEFINED);
    let arg_array = args.get(1).copied().unwrap_or(Value::UNDEFINED);

    let call_args = if arg_array.is_undefined() || arg_array.is_null() {
        Vec::new()
    } else if arg_array.is_object() {
        let array_ptr = arg_array.as_object_ptr();
        let length_value = objects::get(ctx, array_ptr, "length", arg_array);
        if length_value.is_abrupt() {
            return length_value;
        }
        let length = match conversion::to_uint32(ctx, length_value) {
            Ok(length) => length,
            Err(abrupt) => {
                ctx.heap.free_value(length_value);
                return abrupt;
            }
        };
        ctx.heap.free_value(length_value);
        let mut gathered = Vec::with_capacity(length as usize);
        for index in 0..length {
            let element = objects::get(ctx, array_ptr, &index.to_string(), arg_array);
            if element.is_abrupt() {
                for value in gathered {
                    ctx.heap.free_value(value);
                }
                return element;
            }
            gathered.push(element);
        }
        gathered
    } else {
        return ctx.throw_type_error("second argument to apply must be an array-like object");
    };

    let result = function::op_function_call(ctx, this, this_arg, &call_args);
    for value in call_args {
        ctx.heap.free_value(value);
    }
    result
}

/// `Function.prototype.bind` (§15.3.4.5).
fn bind_method(ctx: &mut Context, this: Value, args: &[Value]) -> Value {
    if !function::is_callable(ctx, this) {
        return ctx.throw_type_error("Function.prototype.bind called on non-callable");
    }
    let bound_this = args.first().copied().unwrap_or(Value::UNDEFINED);
    let bound_args = if args.is_empty() { &[] } else { &args[1..] };
    function::create_bound_function(ctx, this, bound_this, bound_args)
}
