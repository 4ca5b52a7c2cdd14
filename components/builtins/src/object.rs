//! The `Object` constructor and `Object.prototype`.

use core_types::{MagicStringId, Value};
use interpreter::{
    conversion, objects, BuiltinId, BuiltinPropertyDesc, BuiltinValue, Context,
    PropertyDescriptor,
};
use memory_manager::{PropertyAttrs, PropertySlot};

const ROUTINE_DEFINE_PROPERTY: u16 = 1;
const ROUTINE_GET_OWN_PROPERTY_DESCRIPTOR: u16 = 2;
const ROUTINE_GET_PROTOTYPE_OF: u16 = 3;
const ROUTINE_KEYS: u16 = 4;

const ROUTINE_TO_STRING: u16 = 1;
const ROUTINE_VALUE_OF: u16 = 2;
const ROUTINE_HAS_OWN_PROPERTY: u16 = 3;

const ROUTINE_ATTRS: PropertyAttrs = PropertyAttrs {
    writable: true,
    enumerable: false,
    configurable: true,
};

/// Descriptor table of the `Object` constructor.
pub(crate) static CONSTRUCTOR_DESCRIPTORS: [BuiltinPropertyDesc; 6] = [
    BuiltinPropertyDesc {
        name: MagicStringId::Prototype,
        attrs: PropertyAttrs::none(),
        value: BuiltinValue::Builtin(BuiltinId::ObjectPrototype),
    },
    BuiltinPropertyDesc {
        name: MagicStringId::Length,
        attrs: PropertyAttrs::none(),
        value: BuiltinValue::Number(1.0),
    },
    BuiltinPropertyDesc {
        name: MagicStringId::DefineProperty,
        attrs: ROUTINE_ATTRS,
        value: BuiltinValue::Routine {
            id: ROUTINE_DEFINE_PROPERTY,
            length: 3,
        },
    },
    BuiltinPropertyDesc {
        name: MagicStringId::GetOwnPropertyDescriptor,
        attrs: ROUTINE_ATTRS,
        value: BuiltinValue::Routine {
            id: ROUTINE_GET_OWN_PROPERTY_DESCRIPTOR,
            length: 2,
        },
    },
    BuiltinPropertyDesc {
        name: MagicStringId::GetPrototypeOf,
        attrs: ROUTINE_ATTRS,
        value: BuiltinValue::Routine {
            id: ROUTINE_GET_PROTOTYPE_OF,
            length: 1,
        },
    },
    BuiltinPropertyDesc {
        name: MagicStringId::Keys,
        attrs: ROUTINE_ATTRS,
        value: BuiltinValue::Routine {
            id: ROUTINE_KEYS,
            length: 1,
        },
    },
];

/// Descriptor table of `Object.prototype`.
pub(crate) static PROTOTYPE_DESCRIPTORS: [BuiltinPropertyDesc; 4] = [
    BuiltinPropertyDesc {
        name: MagicStringId::Constructor,
        attrs: ROUTINE_ATTRS,
        value: BuiltinValue::Builtin(BuiltinId::ObjectConstructor),
    },
    BuiltinPropertyDesc {
        name: MagicStringId::ToString,
        attrs: ROUTINE_ATTRS,
        value: BuiltinValue::Routine {
            id: ROUTINE_TO_STRING,
            length: 0,
        },
    },
    BuiltinPropertyDesc {
        name: MagicStringId::ValueOf,
        attrs: ROUTINE_ATTRS,
        value: BuiltinValue::Routine {
            id: ROUTINE_VALUE_OF,
            length: 0,
        },
    },
    BuiltinPropertyDesc {
        name: MagicStringId::HasOwnProperty,
        attrs: ROUTINE_ATTRS,
        value: BuiltinValue::Routine {
            id: ROUTINE_HAS_OWN_PROPERTY,
            length: 1,
        },
    },
];

/// `new Object(value?)` / `Object(value?)` (§15.2.1, §15.2.2).
pub(crate) fn construct(ctx: &mut Context, args: &[Value]) -> Value {
    match args.first() {
        Some(&value) if !value.is_undefined() && !value.is_null() => {
            conversion::to_object(ctx, value)
        }
        _ => objects::create_plain_object(ctx),
    }
}

pub(crate) fn call_constructor_routine(ctx: &mut Context, routine: u16, args: &[Value]) -> Value {
    match routine {
        0 => construct(ctx, args),
        ROUTINE_DEFINE_PROPERTY => define_property(ctx, args),
        ROUTINE_GET_OWN_PROPERTY_DESCRIPTOR => get_own_property_descriptor(ctx, args),
        ROUTINE_GET_PROTOTYPE_OF => get_prototype_of(ctx, args),
        ROUTINE_KEYS => keys(ctx, args),
        _ => ctx.throw_type_error("unknown Object routine"),
    }
}

fn require_object(ctx: &mut Context, args: &[Value], who: &str) -> Result<Value, Value> {
    match args.first() {
        Some(&value) if value.is_object() => Ok(value),
        _ => Err(ctx.throw_type_error(&format!("{} called on non-object", who))),
    }
}

fn name_argument(ctx: &mut Context, args: &[Value], index: usize) -> Result<String, Value> {
    let value = args.get(index).copied().unwrap_or(Value::UNDEFINED);
    let string = conversion::to_string_value(ctx, value);
    if string.is_abrupt() {
        return Err(string);
    }
    let name = ctx.string_text(string).to_string();
    ctx.heap.free_value(string);
    Ok(name)
}

/// `Object.defineProperty(obj, name, attributes)` (§15.2.3.6).
fn define_property(ctx: &mut Context, args: &[Value]) -> Value {
    let object = match require_object(ctx, args, "Object.defineProperty") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match name_argument(ctx, args, 1) {
        Ok(n) => n,
        Err(e) => return e,
    };
    let attributes = args.get(2).copied().unwrap_or(Value::UNDEFINED);
    let descriptor = match to_property_descriptor(ctx, attributes) {
        Ok(d) => d,
        Err(e) => return e,
    };
    let result =
        objects::define_own_property(ctx, object.as_object_ptr(), &name, &descriptor, true);
    release_descriptor(ctx, descriptor);
    if result.is_abrupt() {
        return result;
    }
    ctx.heap.copy_value(object)
}

/// ToPropertyDescriptor (§8.10.5).
fn to_property_descriptor(ctx: &mut Context, value: Value) -> Result<PropertyDescriptor, Value> {
    if !value.is_object() {
        return Err(ctx.throw_type_error("property descriptor must be an object"));
    }
    let source = value.as_object_ptr();
    let mut descriptor = PropertyDescriptor::default();

    let mut read =
        |ctx: &mut Context, field: MagicStringId| -> Result<Option<Value>, Value> {
            if !objects::has_property(ctx, source, field.text()) {
                return Ok(None);
            }
            let read = objects::get(ctx, source, field.text(), value);
            if read.is_abrupt() {
                return Err(read);
            }
            Ok(Some(read))
        };

    if let Some(v) = read(ctx, MagicStringId::Value)? {
        descriptor.value = Some(v);
    }
    if let Some(v) = read(ctx, MagicStringId::Writable)? {
        descriptor.writable = Some(conversion::to_boolean(ctx, v));
        ctx.heap.free_value(v);
    }
    if let Some(v) = read(ctx, MagicStringId::Enumerable)? {
        descriptor.enumerable = Some(conversion::to_boolean(ctx, v));
        ctx.heap.free_value(v);
    }
    if let Some(v) = read(ctx, MagicStringId::Configurable)? {
        descriptor.configurable = Some(conversion::to_boolean(ctx, v));
        ctx.heap.free_value(v);
    }
    if let Some(v) = read(ctx, MagicStringId::Get)? {
        if !v.is_undefined() && !interpreter::function::is_callable(ctx, v) {
            ctx.heap.free_value(v);
            release_descriptor(ctx, descriptor);
            return Err(ctx.throw_type_error("getter must be callable"));
        }
        descriptor.getter = Some(v);
    }
    if let Some(v) = read(ctx, MagicStringId::Set)? {
        if !v.is_undefined() && !interpreter::function::is_callable(ctx, v) {
            ctx.heap.free_value(v);
            release_descriptor(ctx, descriptor);
            return Err(ctx.throw_type_error("setter must be callable"));
        }
        descriptor.setter = Some(v);
    }
    if (descriptor.getter.is_some() || descriptor.setter.is_some())
        && (descriptor.value.is_some() || descriptor.writable.is_some())
    {
        release_descriptor(ctx, descriptor);
        return Err(ctx.throw_type_error(
            "property descriptor cannot be both a data and an accessor descriptor",
        ));
    }
    Ok(descriptor)
}

fn release_descriptor(ctx: &mut Context, descriptor: PropertyDescriptor) {
    for value in [descriptor.value, descriptor.getter, descriptor.setter]
        .into_iter()
        .flatten()
    {
        ctx.heap.free_value(value);
    }
}

/// `Object.getOwnPropertyDescriptor(obj, name)` (§15.2.3.3).
fn get_own_property_descriptor(ctx: &mut Context, args: &[Value]) -> Value {
    let object = match require_object(ctx, args, "Object.getOwnPropertyDescriptor") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match name_argument(ctx, args, 1) {
        Ok(n) => n,
        Err(e) => return e,
    };
    let Some(node_ptr) = objects::get_own_property(ctx, object.as_object_ptr(), &name) else {
        return Value::UNDEFINED;
    };
    let node = *ctx.heap.property(node_ptr);

    let result = objects::create_plain_object(ctx);
    let result_ptr = result.as_object_ptr();
    let mut set = |ctx: &mut Context, field: MagicStringId, value: Value| {
        let desc = PropertyDescriptor::data(value);
        let r = objects::define_own_property(ctx, result_ptr, field.text(), &desc, false);
        ctx.heap.free_value(r);
    };

    match node.slot {
        PropertySlot::Value(value) => {
            set(ctx, MagicStringId::Value, value);
            set(ctx, MagicStringId::Writable, Value::boolean(node.attrs.writable));
        }
        PropertySlot::Accessor { getter, setter } => {
            let getter_value = if getter.is_null() {
                Value::UNDEFINED
            } else {
                Value::object_ptr(getter)
            };
            let setter_value = if setter.is_null() {
                Value::UNDEFINED
            } else {
                Value::object_ptr(setter)
            };
            set(ctx, MagicStringId::Get, getter_value);
            set(ctx, MagicStringId::Set, setter_value);
        }
        PropertySlot::Internal(_) => {
            ctx.heap.free_value(result);
            return Value::UNDEFINED;
        }
    }
    set(ctx, MagicStringId::Enumerable, Value::boolean(node.attrs.enumerable));
    set(
        ctx,
        MagicStringId::Configurable,
        Value::boolean(node.attrs.configurable),
    );
    result
}

/// `Object.getPrototypeOf(obj)` (§15.2.3.2).
fn get_prototype_of(ctx: &mut Context, args: &[Value]) -> Value {
    let object = match require_object(ctx, args, "Object.getPrototypeOf") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let proto = ctx.heap.object(object.as_object_ptr()).prototype;
    if proto.is_null() {
        Value::NULL
    } else {
        ctx.heap.ref_cell(proto);
        Value::object_ptr(proto)
    }
}

/// `Object.keys(obj)` (§15.2.3.14).
fn keys(ctx: &mut Context, args: &[Value]) -> Value {
    let object = match require_object(ctx, args, "Object.keys") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut names = Vec::new();
    objects::own_property_names(ctx, object.as_object_ptr(), &mut names, None);

    let array = objects::create_array(ctx, 0);
    let array_ptr = array.as_object_ptr();
    for (index, name) in names.iter().enumerate() {
        let value = ctx.alloc_string(name);
        let desc = PropertyDescriptor::data(value);
        let r = objects::define_own_property(ctx, array_ptr, &index.to_string(), &desc, false);
        ctx.heap.free_value(r);
        ctx.heap.free_value(value);
    }
    array
}

pub(crate) fn call_prototype_routine(
    ctx: &mut Context,
    routine: u16,
    this: Value,
    args: &[Value],
) -> Value {
    match routine {
        ROUTINE_TO_STRING => to_string(ctx, this),
        ROUTINE_VALUE_OF => conversion::to_object(ctx, this),
        ROUTINE_HAS_OWN_PROPERTY => has_own_property(ctx, this, args),
        _ => ctx.throw_type_error("Object.prototype is not callable"),
    }
}

/// `Object.prototype.toString` (§15.2.4.2).
fn to_string(ctx: &mut Context, this: Value) -> Value {
    if this.is_undefined() {
        return ctx.alloc_string("[object Undefined]");
    }
    if this.is_null() {
        return ctx.alloc_string("[object Null]");
    }
    let object = conversion::to_object(ctx, this);
    if object.is_abrupt() {
        return object;
    }
    let class = ctx.class_of(object.as_object_ptr());
    ctx.heap.free_value(object);
    ctx.alloc_string(&format!("[object {}]", class.text()))
}

/// `Object.prototype.hasOwnProperty` (§15.2.4.5).
fn has_own_property(ctx: &mut Context, this: Value, args: &[Value]) -> Value {
    let name = match name_argument(ctx, args, 0) {
        Ok(n) => n,
        Err(e) => return e,
    };
    let object = conversion::to_object(ctx, this);
    if object.is_abrupt() {
        return object;
    }
    let found = objects::get_own_property(ctx, object.as_object_ptr(), &name).is_some()
        || string_index_exists(ctx, object, &name);
    ctx.heap.free_value(object);
    Value::boolean(found)
}

fn string_index_exists(ctx: &mut Context, object: Value, name: &str) -> bool {
    if ctx.heap.object(object.as_object_ptr()).kind != memory_manager::ObjectKind::StringObject {
        return false;
    }
    let Some(index) = objects::array_index_of(name) else {
        return false;
    };
    let Some(primitive) = conversion::primitive_value_of(ctx, object.as_object_ptr()) else {
        return false;
    };
    ctx.string_text(primitive).chars().nth(index as usize).is_some()
}
