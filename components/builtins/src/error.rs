//! The `Error` constructor family.

use core_types::{ErrorKind, MagicStringId, Value};
use interpreter::{
    conversion, objects, BuiltinId, BuiltinPropertyDesc, BuiltinValue, Context,
};
use memory_manager::PropertyAttrs;

const ROUTINE_TO_STRING: u16 = 1;

const ROUTINE_ATTRS: PropertyAttrs = PropertyAttrs {
    writable: true,
    enumerable: false,
    configurable: true,
};

/// Descriptor table of the `Error` constructor.
pub(crate) static ERROR_CONSTRUCTOR_DESCRIPTORS: [BuiltinPropertyDesc; 2] = [
    BuiltinPropertyDesc {
        name: MagicStringId::Prototype,
        attrs: PropertyAttrs::none(),
        value: BuiltinValue::Builtin(BuiltinId::ErrorPrototype),
    },
    BuiltinPropertyDesc {
        name: MagicStringId::Length,
        attrs: PropertyAttrs::none(),
        value: BuiltinValue::Number(1.0),
    },
];

/// Descriptor table of `Error.prototype`.
pub(crate) static ERROR_PROTOTYPE_DESCRIPTORS: [BuiltinPropertyDesc; 4] = [
    BuiltinPropertyDesc {
        name: MagicStringId::Constructor,
        attrs: ROUTINE_ATTRS,
        value: BuiltinValue::Builtin(BuiltinId::ErrorConstructor),
    },
    BuiltinPropertyDesc {
        name: MagicStringId::Name,
        attrs: ROUTINE_ATTRS,
        value: BuiltinValue::String(MagicStringId::ErrorClass),
    },
    BuiltinPropertyDesc {
        name: MagicStringId::Message,
        attrs: ROUTINE_ATTRS,
        value: BuiltinValue::String(MagicStringId::Empty),
    },
    BuiltinPropertyDesc {
        name: MagicStringId::ToString,
        attrs: ROUTINE_ATTRS,
        value: BuiltinValue::Routine {
            id: ROUTINE_TO_STRING,
            length: 0,
        },
    },
];

macro_rules! native_error_tables {
    ($ctor:ident, $proto:ident, $ctor_id:expr, $proto_id:expr, $class:expr) => {
        /// Descriptor table of a native error constructor.
        pub(crate) static $ctor: [BuiltinPropertyDesc; 2] = [
            BuiltinPropertyDesc {
                name: MagicStringId::Prototype,
                attrs: PropertyAttrs::none(),
                value: BuiltinValue::Builtin($proto_id),
            },
            BuiltinPropertyDesc {
                name: MagicStringId::Length,
                attrs: PropertyAttrs::none(),
                value: BuiltinValue::Number(1.0),
            },
        ];

        /// Descriptor table of a native error prototype.
        pub(crate) static $proto: [BuiltinPropertyDesc; 3] = [
            BuiltinPropertyDesc {
                name: MagicStringId::Constructor,
                attrs: ROUTINE_ATTRS,
                value: BuiltinValue::Builtin($ctor_id),
            },
            BuiltinPropertyDesc {
                name: MagicStringId::Name,
                attrs: ROUTINE_ATTRS,
                value: BuiltinValue::String($class),
            },
            BuiltinPropertyDesc {
                name: MagicStringId::Message,
                attrs: ROUTINE_ATTRS,
                value: BuiltinValue::String(MagicStringId::Empty),
            },
        ];
    };
}

native_error_tables!(
    TYPE_ERROR_CONSTRUCTOR_DESCRIPTORS,
    TYPE_ERROR_PROTOTYPE_DESCRIPTORS,
    BuiltinId::TypeErrorConstructor,
    BuiltinId::TypeErrorPrototype,
    MagicStringId::TypeErrorClass
);
native_error_tables!(
    RANGE_ERROR_CONSTRUCTOR_DESCRIPTORS,
    RANGE_ERROR_PROTOTYPE_DESCRIPTORS,
    BuiltinId::RangeErrorConstructor,
    BuiltinId::RangeErrorPrototype,
    MagicStringId::RangeErrorClass
);
native_error_tables!(
    REFERENCE_ERROR_CONSTRUCTOR_DESCRIPTORS,
    REFERENCE_ERROR_PROTOTYPE_DESCRIPTORS,
    BuiltinId::ReferenceErrorConstructor,
    BuiltinId::ReferenceErrorPrototype,
    MagicStringId::ReferenceErrorClass
);
native_error_tables!(
    SYNTAX_ERROR_CONSTRUCTOR_DESCRIPTORS,
    SYNTAX_ERROR_PROTOTYPE_DESCRIPTORS,
    BuiltinId::SyntaxErrorConstructor,
    BuiltinId::SyntaxErrorPrototype,
    MagicStringId::SyntaxErrorClass
);
native_error_tables!(
    URI_ERROR_CONSTRUCTOR_DESCRIPTORS,
    URI_ERROR_PROTOTYPE_DESCRIPTORS,
    BuiltinId::UriErrorConstructor,
    BuiltinId::UriErrorPrototype,
    MagicStringId::UriErrorClass
);
native_error_tables!(
    EVAL_ERROR_CONSTRUCTOR_DESCRIPTORS,
    EVAL_ERROR_PROTOTYPE_DESCRIPTORS,
    BuiltinId::EvalErrorConstructor,
    BuiltinId::EvalErrorPrototype,
    MagicStringId::EvalErrorClass
);

fn error_kind_of(id: BuiltinId) -> ErrorKind {
    match id {
        BuiltinId::TypeErrorConstructor => ErrorKind::TypeError,
        BuiltinId::RangeErrorConstructor => ErrorKind::RangeError,
        BuiltinId::ReferenceErrorConstructor => ErrorKind::ReferenceError,
        BuiltinId::SyntaxErrorConstructor => ErrorKind::SyntaxError,
        BuiltinId::UriErrorConstructor => ErrorKind::UriError,
        BuiltinId::EvalErrorConstructor => ErrorKind::EvalError,
        _ => ErrorKind::Error,
    }
}

/// `new Error(message?)` and friends (§15.11.2, §15.11.7).
pub(crate) fn construct(ctx: &mut Context, id: BuiltinId, args: &[Value]) -> Value {
    let message = match args.first() {
        Some(&arg) if !arg.is_undefined() => {
            let string = conversion::to_string_value(ctx, arg);
            if string.is_abrupt() {
                return string;
            }
            let text = ctx.string_text(string).to_string();
            ctx.heap.free_value(string);
            Some(text)
        }
        _ => None,
    };
    ctx.create_error(error_kind_of(id), message.as_deref().unwrap_or(""))
}

pub(crate) fn call_prototype_routine(ctx: &mut Context, routine: u16, this: Value) -> Value {
    match routine {
        ROUTINE_TO_STRING => to_string(ctx, this),
        _ => ctx.throw_type_error("error prototype is not callable"),
    }
}

/// `Error.prototype.toString` (§15.11.4.4).
fn to_string(ctx: &mut Context, this: Value) -> Value {
    if !this.is_object() {
        return ctx.throw_type_error("Error.prototype.toString called on non-object");
    }
    let this_ptr = this.as_object_ptr();

    let name_value = objects::get(ctx, this_ptr, "name", this);
    if name_value.is_abrupt() {
        return name_value;
    }
    let name = if name_value.is_undefined() {
        "Error".to_string()
    } else {
        let string = conversion::to_string_value(ctx, name_value);
        if string.is_abrupt() {
            ctx.heap.free_value(name_value);
            return string;
        }
        let text = ctx.string_text(string).to_string();
        ctx.heap.free_value(string);
        text
    };
    ctx.heap.free_value(name_value);

    let message_value = objects::get(ctx, this_ptr, "message", this);
    if message_value.is_abrupt() {
        return message_value;
    }
    let message = if message_value.is_undefined() {
        String::new()
    } else {
        let string = conversion::to_string_value(ctx, message_value);
        if string.is_abrupt() {
            ctx.heap.free_value(message_value);
            return string;
        }
        let text = ctx.string_text(string).to_string();
        ctx.heap.free_value(string);
        text
    };
    ctx.heap.free_value(message_value);

    let text = if message.is_empty() {
        name
    } else if name.is_empty() {
        message
    } else {
        format!("{}: {}", name, message)
    };
    ctx.alloc_string(&text)
}
