//! The global object.

use core_types::{MagicStringId, Value};
use interpreter::{
    vm, BuiltinId, BuiltinPropertyDesc, BuiltinValue, Context, GLOBAL_ROUTINE_EVAL,
};
use memory_manager::PropertyAttrs;
use parser::{parse_program, ProgramKind};

const VALUE_ATTRS: PropertyAttrs = PropertyAttrs::none();
const BUILTIN_ATTRS: PropertyAttrs = PropertyAttrs {
    writable: true,
    enumerable: false,
    configurable: true,
};

/// Descriptor table of the global object.
pub(crate) static DESCRIPTORS: [BuiltinPropertyDesc; 13] = [
    BuiltinPropertyDesc {
        name: MagicStringId::Undefined,
        attrs: VALUE_ATTRS,
        value: BuiltinValue::Undefined,
    },
    BuiltinPropertyDesc {
        name: MagicStringId::NaN,
        attrs: VALUE_ATTRS,
        value: BuiltinValue::Number(f64::NAN),
    },
    BuiltinPropertyDesc {
        name: MagicStringId::Infinity,
        attrs: VALUE_ATTRS,
        value: BuiltinValue::Number(f64::INFINITY),
    },
    BuiltinPropertyDesc {
        name: MagicStringId::Eval,
        attrs: BUILTIN_ATTRS,
        value: BuiltinValue::Routine {
            id: GLOBAL_ROUTINE_EVAL,
            length: 1,
        },
    },
    BuiltinPropertyDesc {
        name: MagicStringId::ObjectClass,
        attrs: BUILTIN_ATTRS,
        value: BuiltinValue::Builtin(BuiltinId::ObjectConstructor),
    },
    BuiltinPropertyDesc {
        name: MagicStringId::FunctionClass,
        attrs: BUILTIN_ATTRS,
        value: BuiltinValue::Builtin(BuiltinId::FunctionConstructor),
    },
    BuiltinPropertyDesc {
        name: MagicStringId::ErrorClass,
        attrs: BUILTIN_ATTRS,
        value: BuiltinValue::Builtin(BuiltinId::ErrorConstructor),
    },
    BuiltinPropertyDesc {
        name: MagicStringId::TypeErrorClass,
        attrs: BUILTIN_ATTRS,
        value: BuiltinValue::Builtin(BuiltinId::TypeErrorConstructor),
    },
    BuiltinPropertyDesc {
        name: MagicStringId::RangeErrorClass,
        attrs: BUILTIN_ATTRS,
        value: BuiltinValue::Builtin(BuiltinId::RangeErrorConstructor),
    },
    BuiltinPropertyDesc {
        name: MagicStringId::ReferenceErrorClass,
        attrs: BUILTIN_ATTRS,
        value: BuiltinValue::Builtin(BuiltinId::ReferenceErrorConstructor),
    },
    BuiltinPropertyDesc {
        name: MagicStringId::SyntaxErrorClass,
        attrs: BUILTIN_ATTRS,
        value: BuiltinValue::Builtin(BuiltinId::SyntaxErrorConstructor),
    },
    BuiltinPropertyDesc {
        name: MagicStringId::UriErrorClass,
        attrs: BUILTIN_ATTRS,
        value: BuiltinValue::Builtin(BuiltinId::UriErrorConstructor),
    },
    BuiltinPropertyDesc {
        name: MagicStringId::EvalErrorClass,
        attrs: BUILTIN_ATTRS,
        value: BuiltinValue::Builtin(BuiltinId::EvalErrorConstructor),
    },
];

pub(crate) fn call_routine(
    ctx: &mut Context,
    routine: u16,
    _this: Value,
    args: &[Value],
) -> Value {
    match routine {
        GLOBAL_ROUTINE_EVAL => indirect_eval(ctx, args),
        _ => ctx.throw_type_error("global object is not callable"),
    }
}

/// Indirect `eval`: the argument runs as sloppy eval code in the
/// global environment regardless of the caller (§10.4.2). The
/// compiler routes direct calls through the interpreter instead.
fn indirect_eval(ctx: &mut Context, args: &[Value]) -> Value {
    let Some(&source) = args.first() else {
        return Value::UNDEFINED;
    };
    if !source.is_string() {
        return ctx.heap.copy_value(source);
    }
    let text = ctx.string_text(source).to_string();
    let code = match parse_program(&text, false, ProgramKind::Eval) {
        Ok(code) => code,
        Err(error) => return ctx.throw_error(error.kind, &error.message),
    };
    let global = ctx.global_object();
    ctx.heap.ref_cell(global);
    let this = Value::object_ptr(global);
    let env = ctx.global_env();
    let result = vm::vm_run(ctx, &code, this, env, true, None, &[]);
    ctx.heap.free_value(this);
    result
}
