//! The object model operations.
//!
//! The `[[Get]]`/`[[Put]]`/`[[Delete]]`/`[[DefineOwnProperty]]`/
//! `[[HasProperty]]`/`[[DefaultValue]]` internal methods of ECMA-262
//! §8.12, plus enumeration. Lazy properties (function `length` and
//! `prototype`, strict-mode `caller`/`arguments` throwers, built-in
//! descriptors) are materialized on first access by
//! [`get_own_property`]; a materialized slot is recorded in the
//! owner's instantiation bitset so deletion is not undone by a second
//! access.

use crate::context::Context;
use crate::conversion::{self, PreferredType};
use crate::function;
use crate::provider::{BuiltinId, BuiltinValue};
use core_types::{CompactPtr, MagicStringId, Value};
use memory_manager::{
    InternalSlot, ObjectData, ObjectKind, ObjectRecord, PropertyAttrs, PropertyName, PropertyNode,
    PropertySlot,
};

/// A property descriptor as used by `[[DefineOwnProperty]]`.
///
/// Absent fields are `None`; accessor fields hold `undefined` or a
/// function object value when explicitly present.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PropertyDescriptor {
    /// `[[Value]]`.
    pub value: Option<Value>,
    /// `[[Writable]]`.
    pub writable: Option<bool>,
    /// `[[Enumerable]]`.
    pub enumerable: Option<bool>,
    /// `[[Configurable]]`.
    pub configurable: Option<bool>,
    /// `[[Get]]`.
    pub getter: Option<Value>,
    /// `[[Set]]`.
    pub setter: Option<Value>,
}

impl PropertyDescriptor {
    /// A writable/enumerable/configurable data descriptor.
    pub fn data(value: Value) -> Self {
        PropertyDescriptor {
            value: Some(value),
            writable: Some(true),
            enumerable: Some(true),
            configurable: Some(true),
            getter: None,
            setter: None,
        }
    }

    /// True when any accessor field is present.
    pub fn is_accessor(&self) -> bool {
        self.getter.is_some() || self.setter.is_some()
    }

    /// True when any data field is present.
    pub fn is_data(&self) -> bool {
        self.value.is_some() || self.writable.is_some()
    }

    /// True when neither data nor accessor fields are present.
    pub fn is_generic(&self) -> bool {
        !self.is_accessor() && !self.is_data()
    }
}

/// SameValue (§9.12): like strict equality but NaN equals NaN and the
/// zeroes are distinguished.
pub fn same_value(ctx: &Context, a: Value, b: Value) -> bool {
    if a.is_number() && b.is_number() {
        let an = ctx.heap.number_of(a);
        let bn = ctx.heap.number_of(b);
        if an.is_nan() && bn.is_nan() {
            return true;
        }
        return an == bn && an.is_sign_positive() == bn.is_sign_positive();
    }
    conversion::strict_equals(ctx, a, b)
}

/// Parses a canonical array index name.
pub fn array_index_of(name: &str) -> Option<u32> {
    if name.is_empty() || name.len() > 10 {
        return None;
    }
    if name != "0" && name.starts_with('0') {
        return None;
    }
    if !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u64 = name.parse().ok()?;
    if value >= u32::MAX as u64 {
        return None;
    }
    Some(value as u32)
}

fn name_matches(ctx: &Context, name: PropertyName, text: &str) -> bool {
    match name {
        PropertyName::Magic(id) => id.text() == text,
        PropertyName::Str(_) => ctx.heap.property_name_text(name) == text,
    }
}

/// Scans an object's chain for a named (non-internal) property.
pub fn find_own_node(ctx: &Context, object: CompactPtr, name: &str) -> Option<CompactPtr> {
    let mut cursor = ctx.heap.object(object).properties;
    while !cursor.is_null() {
        let node = ctx.heap.property(cursor);
        let next = node.next;
        if !node.is_internal() && name_matches(ctx, node.name, name) {
            return Some(cursor);
        }
        cursor = next;
    }
    None
}

// ----- lazy materialization ---------------------------------------------

fn builtin_mask_high(ctx: &Context, object: CompactPtr) -> u32 {
    match ctx.find_internal_property(object, |slot| {
        matches!(slot, InternalSlot::BuiltinMaskHigh(_))
    }) {
        Some(node) => match ctx.heap.property(node).slot {
            PropertySlot::Internal(InternalSlot::BuiltinMaskHigh(mask)) => mask,
            _ => 0,
        },
        None => 0,
    }
}

fn builtin_slot_instantiated(ctx: &Context, object: CompactPtr, index: usize) -> bool {
    let record = ctx.heap.object(object);
    let Some(data) = record.builtin() else { return true };
    if index < 32 {
        data.instantiated_mask & (1 << index) != 0
    } else if index < 64 {
        builtin_mask_high(ctx, object) & (1 << (index - 32)) != 0
    } else {
        true
    }
}

fn mark_builtin_slot(ctx: &mut Context, object: CompactPtr, index: usize) {
    if index < 32 {
        if let ObjectData::Builtin(ref mut data) = ctx.heap.object_mut(object).data {
            data.instantiated_mask |= 1 << index;
        }
        return;
    }
    if index >= 64 {
        return;
    }
    let bit = 1u32 << (index - 32);
    let existing = ctx.find_internal_property(object, |slot| {
        matches!(slot, InternalSlot::BuiltinMaskHigh(_))
    });
    match existing {
        Some(node) => {
            if let PropertySlot::Internal(InternalSlot::BuiltinMaskHigh(ref mut mask)) =
                ctx.heap.property_mut(node).slot
            {
                *mask |= bit;
            }
        }
        None => {
            ctx.add_internal_property(object, InternalSlot::BuiltinMaskHigh(bit));
        }
    }
}

/// Materializes a built-in descriptor value.
fn instantiate_builtin_value(
    ctx: &mut Context,
    owner: BuiltinId,
    value: BuiltinValue,
) -> PropertySlot {
    match value {
        BuiltinValue::Undefined => PropertySlot::Value(Value::UNDEFINED),
        BuiltinValue::Null => PropertySlot::Value(Value::NULL),
        BuiltinValue::Boolean(b) => PropertySlot::Value(Value::boolean(b)),
        BuiltinValue::Number(n) => {
            let v = ctx.make_number(n);
            PropertySlot::Value(v)
        }
        BuiltinValue::String(id) => PropertySlot::Value(Value::magic_string(id)),
        BuiltinValue::Builtin(id) => {
            let ptr = ctx.builtin_object(id);
            ctx.heap.ref_cell(ptr);
            PropertySlot::Value(Value::object_ptr(ptr))
        }
        BuiltinValue::Routine { id, .. } => {
            let routine = ctx.create_builtin_routine(owner, id);
            PropertySlot::Value(routine)
        }
    }
}

fn materialize_builtin_property(
    ctx: &mut Context,
    object: CompactPtr,
    name: &str,
) -> Option<CompactPtr> {
    let record = ctx.heap.object(object);
    let data = *record.builtin()?;
    if data.routine_id != 0 {
        // Built-in routines materialize only `length`.
        if name != "length" {
            return None;
        }
        let provider = ctx.provider()?;
        let owner = BuiltinId::from_raw(data.builtin_id);
        let length = provider
            .descriptors(owner)
            .iter()
            .find_map(|desc| match desc.value {
                BuiltinValue::Routine { id, length } if id == data.routine_id => Some(length),
                _ => None,
            })
            .unwrap_or(0);
        let node = PropertyNode::data(
            PropertyName::Magic(MagicStringId::Length),
            Value::integer(length as i32),
            PropertyAttrs::none(),
        );
        return Some(ctx.append_property(object, node));
    }

    let provider = ctx.provider()?;
    let id = BuiltinId::from_raw(data.builtin_id);
    let descriptors = provider.descriptors(id);
    let (index, desc) = descriptors
        .iter()
        .enumerate()
        .find(|(_, d)| d.name.text() == name)?;
    if builtin_slot_instantiated(ctx, object, index) {
        return None;
    }
    mark_builtin_slot(ctx, object, index);
    let slot = instantiate_builtin_value(ctx, id, desc.value);
    let node = PropertyNode {
        name: PropertyName::Magic(desc.name),
        attrs: desc.attrs,
        slot,
        next: CompactPtr::NULL,
    };
    Some(ctx.append_property(object, node))
}

fn materialize_function_property(
    ctx: &mut Context,
    object: CompactPtr,
    name: &str,
) -> Option<CompactPtr> {
    let record = ctx.heap.object(object);
    let ObjectData::Function(ref data) = record.data else { return None };
    let code = data.code.clone();

    match name {
        "length" => {
            let node = PropertyNode::data(
                PropertyName::Magic(MagicStringId::Length),
                Value::integer(code.argument_count as i32),
                PropertyAttrs::none(),
            );
            Some(ctx.append_property(object, node))
        }
        "prototype" => {
            let proto_of_proto = if ctx.provider().is_some() {
                let p = ctx.builtin_object(BuiltinId::ObjectPrototype);
                ctx.heap.ref_cell(p);
                p
            } else {
                CompactPtr::NULL
            };
            let fresh =
                ctx.alloc_object(ObjectRecord::new(ObjectKind::General, proto_of_proto, true));
            ctx.heap.ref_cell(object);
            ctx.append_property(
                fresh,
                PropertyNode::data(
                    PropertyName::Magic(MagicStringId::Constructor),
                    Value::object_ptr(object),
                    PropertyAttrs {
                        writable: true,
                        enumerable: false,
                        configurable: true,
                    },
                ),
            );
            let node = PropertyNode::data(
                PropertyName::Magic(MagicStringId::Prototype),
                Value::object_ptr(fresh),
                PropertyAttrs::writable_only(),
            );
            Some(ctx.append_property(object, node))
        }
        "caller" | "arguments" if code.is_strict() => {
            let thrower = ctx.thrower();
            ctx.heap.ref_cell(thrower);
            ctx.heap.ref_cell(thrower);
            let magic = if name == "caller" {
                MagicStringId::Caller
            } else {
                MagicStringId::Arguments
            };
            let node = PropertyNode {
                name: PropertyName::Magic(magic),
                attrs: PropertyAttrs::none(),
                slot: PropertySlot::Accessor {
                    getter: thrower,
                    setter: thrower,
                },
                next: CompactPtr::NULL,
            };
            Some(ctx.append_property(object, node))
        }
        _ => None,
    }
}

fn materialize_string_object_property(
    ctx: &mut Context,
    object: CompactPtr,
    name: &str,
) -> Option<CompactPtr> {
    if name != "length" {
        return None;
    }
    let primitive = conversion::primitive_value_of(ctx, object)?;
    let length = ctx.string_text(primitive).chars().count() as i32;
    let node = PropertyNode::data(
        PropertyName::Magic(MagicStringId::Length),
        Value::integer(length),
        PropertyAttrs::none(),
    );
    Some(ctx.append_property(object, node))
}

/// `get_own_property`: returns the property node, materializing lazy
/// properties on first access.
pub fn get_own_property(ctx: &mut Context, object: CompactPtr, name: &str) -> Option<CompactPtr> {
    if let Some(node) = find_own_node(ctx, object, name) {
        return Some(node);
    }
    let kind = ctx.heap.object(object).kind;
    let is_builtin = ctx.heap.object(object).is_builtin;
    match kind {
        ObjectKind::Function => materialize_function_property(ctx, object, name),
        ObjectKind::StringObject => materialize_string_object_property(ctx, object, name),
        _ if is_builtin => materialize_builtin_property(ctx, object, name),
        _ => None,
    }
}

/// An own string-object character, synthesized without materializing
/// a property node.
fn string_object_char(ctx: &mut Context, object: CompactPtr, name: &str) -> Option<Value> {
    if ctx.heap.object(object).kind != ObjectKind::StringObject {
        return None;
    }
    let index = array_index_of(name)?;
    let primitive = conversion::primitive_value_of(ctx, object)?;
    let ch = ctx.string_text(primitive).chars().nth(index as usize)?;
    Some(ctx.alloc_string(&ch.to_string()))
}

/// `[[Get]]`: walks the prototype chain; accessor getters run with
/// `receiver` as `this`.
pub fn get(ctx: &mut Context, object: CompactPtr, name: &str, receiver: Value) -> Value {
    let mut current = object;
    loop {
        if let Some(ch) = string_object_char(ctx, current, name) {
            return ch;
        }
        if let Some(node_ptr) = get_own_property(ctx, current, name) {
            let node = *ctx.heap.property(node_ptr);
            match node.slot {
                PropertySlot::Value(value) => return ctx.heap.copy_value(value),
                PropertySlot::Accessor { getter, .. } => {
                    if getter.is_null() {
                        return Value::UNDEFINED;
                    }
                    return function::op_function_call(
                        ctx,
                        Value::object_ptr(getter),
                        receiver,
                        &[],
                    );
                }
                PropertySlot::Internal(_) => unreachable!("internal nodes are never named"),
            }
        }
        let proto = ctx.heap.object(current).prototype;
        if proto.is_null() {
            return Value::UNDEFINED;
        }
        current = proto;
    }
}

/// `[[HasProperty]]`.
pub fn has_property(ctx: &mut Context, object: CompactPtr, name: &str) -> bool {
    let mut current = object;
    loop {
        if ctx.heap.object(current).kind == ObjectKind::StringObject {
            if let Some(index) = array_index_of(name) {
                if let Some(primitive) = conversion::primitive_value_of(ctx, current) {
                    if ctx.string_text(primitive).chars().nth(index as usize).is_some() {
                        return true;
                    }
                }
            }
        }
        if get_own_property(ctx, current, name).is_some() {
            return true;
        }
        let proto = ctx.heap.object(current).prototype;
        if proto.is_null() {
            return false;
        }
        current = proto;
    }
}

fn reject(ctx: &mut Context, throw: bool, message: &str) -> Value {
    if throw {
        ctx.throw_type_error(message)
    } else {
        Value::FALSE
    }
}

/// Reads an array's `length` value.
pub fn array_length(ctx: &Context, object: CompactPtr) -> u32 {
    match find_own_node(ctx, object, "length") {
        Some(node) => match ctx.heap.property(node).slot {
            PropertySlot::Value(v) => ctx.heap.number_of(v) as u32,
            _ => 0,
        },
        None => 0,
    }
}

fn set_array_length_value(ctx: &mut Context, object: CompactPtr, length: u32) {
    if let Some(node) = find_own_node(ctx, object, "length") {
        let new_value = ctx.make_number(length as f64);
        let mut old = Value::EMPTY;
        if let PropertySlot::Value(ref mut slot) = ctx.heap.property_mut(node).slot {
            old = std::mem::replace(slot, new_value);
        }
        ctx.heap.free_value(old);
    }
}

/// Truncating an array's `length` removes the elements beyond it.
fn truncate_array(ctx: &mut Context, object: CompactPtr, new_length: u32) {
    let mut doomed = Vec::new();
    {
        let mut cursor = ctx.heap.object(object).properties;
        while !cursor.is_null() {
            let node = ctx.heap.property(cursor);
            let next = node.next;
            if !node.is_internal() {
                let text = ctx.heap.property_name_text(node.name).to_string();
                if let Some(index) = array_index_of(&text) {
                    if index >= new_length {
                        doomed.push(text);
                    }
                }
            }
            cursor = next;
        }
    }
    for name in doomed {
        remove_own_property(ctx, object, &name);
    }
}

fn array_note_index_write(ctx: &mut Context, object: CompactPtr, name: &str) {
    if ctx.heap.object(object).kind != ObjectKind::Array {
        return;
    }
    if let Some(index) = array_index_of(name) {
        if index as u64 + 1 > array_length(ctx, object) as u64 {
            set_array_length_value(ctx, object, index + 1);
        }
    }
}

/// Unlinks and frees an own property node.
fn remove_own_property(ctx: &mut Context, object: CompactPtr, name: &str) {
    let mut prev = CompactPtr::NULL;
    let mut cursor = ctx.heap.object(object).properties;
    while !cursor.is_null() {
        let node = ctx.heap.property(cursor);
        let next = node.next;
        if !node.is_internal() && name_matches(ctx, node.name, name) {
            if prev.is_null() {
                ctx.heap.object_mut(object).properties = next;
            } else {
                ctx.heap.property_mut(prev).next = next;
            }
            // Detach before release so the free path does not walk
            // into the rest of the chain.
            ctx.heap.property_mut(cursor).next = CompactPtr::NULL;
            ctx.heap.deref_cell(cursor);
            return;
        }
        prev = cursor;
        cursor = next;
    }
}

/// `[[Put]]` (§8.12.5).
pub fn put(
    ctx: &mut Context,
    object: CompactPtr,
    name: &str,
    value: Value,
    throw: bool,
    receiver: Value,
) -> Value {
    // Own property first.
    if let Some(node_ptr) = get_own_property(ctx, object, name) {
        let node = *ctx.heap.property(node_ptr);
        match node.slot {
            PropertySlot::Value(old) => {
                if !node.attrs.writable {
                    return reject(ctx, throw, "cannot assign to read-only property");
                }
                if ctx.heap.object(object).kind == ObjectKind::Array && name == "length" {
                    return put_array_length(ctx, object, value, throw);
                }
                let copied = ctx.heap.copy_value(value);
                if let PropertySlot::Value(ref mut slot) = ctx.heap.property_mut(node_ptr).slot {
                    *slot = copied;
                }
                ctx.heap.free_value(old);
                array_note_index_write(ctx, object, name);
                return Value::TRUE;
            }
            PropertySlot::Accessor { setter, .. } => {
                if setter.is_null() {
                    return reject(ctx, throw, "cannot assign to a getter-only property");
                }
                let result =
                    function::op_function_call(ctx, Value::object_ptr(setter), receiver, &[value]);
                if result.is_abrupt() {
                    return result;
                }
                ctx.heap.free_value(result);
                return Value::TRUE;
            }
            PropertySlot::Internal(_) => unreachable!("internal nodes are never named"),
        }
    }

    // Inherited setter or write barrier.
    let mut proto = ctx.heap.object(object).prototype;
    while !proto.is_null() {
        if let Some(node_ptr) = get_own_property(ctx, proto, name) {
            let node = *ctx.heap.property(node_ptr);
            match node.slot {
                PropertySlot::Accessor { setter, .. } => {
                    if setter.is_null() {
                        return reject(ctx, throw, "cannot assign to a getter-only property");
                    }
                    let result = function::op_function_call(
                        ctx,
                        Value::object_ptr(setter),
                        receiver,
                        &[value],
                    );
                    if result.is_abrupt() {
                        return result;
                    }
                    ctx.heap.free_value(result);
                    return Value::TRUE;
                }
                PropertySlot::Value(_) => {
                    if !node.attrs.writable {
                        return reject(ctx, throw, "cannot assign to read-only property");
                    }
                    break;
                }
                PropertySlot::Internal(_) => unreachable!("internal nodes are never named"),
            }
        }
        proto = ctx.heap.object(proto).prototype;
    }

    // Create an own data property.
    if !ctx.heap.object(object).extensible {
        return reject(ctx, throw, "cannot add property to a non-extensible object");
    }
    let copied = ctx.heap.copy_value(value);
    let name_value = ctx.alloc_string(name);
    let prop_name = ctx.heap.property_name_from(name_value);
    ctx.heap.free_value(name_value);
    ctx.append_property(
        object,
        PropertyNode::data(prop_name, copied, PropertyAttrs::all()),
    );
    array_note_index_write(ctx, object, name);
    Value::TRUE
}

fn put_array_length(ctx: &mut Context, object: CompactPtr, value: Value, throw: bool) -> Value {
    let number = conversion::to_number(ctx, value);
    if number.is_abrupt() {
        return number;
    }
    let n = ctx.heap.number_of(number);
    ctx.heap.free_value(number);
    let new_length = n as u32;
    if new_length as f64 != n {
        return reject(ctx, throw, "invalid array length");
    }
    let old_length = array_length(ctx, object);
    if new_length < old_length {
        truncate_array(ctx, object, new_length);
    }
    set_array_length_value(ctx, object, new_length);
    Value::TRUE
}

/// `[[Delete]]`.
pub fn delete_property(ctx: &mut Context, object: CompactPtr, name: &str, throw: bool) -> Value {
    match get_own_property(ctx, object, name) {
        None => Value::TRUE,
        Some(node_ptr) => {
            if !ctx.heap.property(node_ptr).attrs.configurable {
                if throw {
                    return ctx.throw_type_error("cannot delete a non-configurable property");
                }
                return Value::FALSE;
            }
            remove_own_property(ctx, object, name);
            Value::TRUE
        }
    }
}

/// `[[DefineOwnProperty]]` (§8.12.9), all descriptor transitions.
pub fn define_own_property(
    ctx: &mut Context,
    object: CompactPtr,
    name: &str,
    desc: &PropertyDescriptor,
    throw: bool,
) -> Value {
    let current = get_own_property(ctx, object, name);

    let Some(node_ptr) = current else {
        if !ctx.heap.object(object).extensible {
            return reject(ctx, throw, "cannot define property on a non-extensible object");
        }
        let attrs = PropertyAttrs {
            writable: desc.writable.unwrap_or(false),
            enumerable: desc.enumerable.unwrap_or(false),
            configurable: desc.configurable.unwrap_or(false),
        };
        let slot = if desc.is_accessor() {
            PropertySlot::Accessor {
                getter: accessor_ptr(ctx, desc.getter),
                setter: accessor_ptr(ctx, desc.setter),
            }
        } else {
            let value = desc.value.unwrap_or(Value::UNDEFINED);
            PropertySlot::Value(ctx.heap.copy_value(value))
        };
        let name_value = ctx.alloc_string(name);
        let prop_name = ctx.heap.property_name_from(name_value);
        ctx.heap.free_value(name_value);
        ctx.append_property(
            object,
            PropertyNode {
                name: prop_name,
                attrs,
                slot,
                next: CompactPtr::NULL,
            },
        );
        array_note_index_write(ctx, object, name);
        return Value::TRUE;
    };

    if desc.is_generic() && desc.enumerable.is_none() && desc.configurable.is_none() {
        return Value::TRUE;
    }

    let node = *ctx.heap.property(node_ptr);
    let current_is_accessor = node.is_accessor();

    if !node.attrs.configurable {
        if desc.configurable == Some(true) {
            return reject(ctx, throw, "cannot redefine a non-configurable property");
        }
        if let Some(enumerable) = desc.enumerable {
            if enumerable != node.attrs.enumerable {
                return reject(ctx, throw, "cannot redefine a non-configurable property");
            }
        }
        if !desc.is_generic() && desc.is_accessor() != current_is_accessor {
            return reject(ctx, throw, "cannot redefine a non-configurable property");
        }
        if !current_is_accessor {
            if !node.attrs.writable {
                if desc.writable == Some(true) {
                    return reject(ctx, throw, "cannot redefine a non-configurable property");
                }
                if let (Some(new_value), PropertySlot::Value(old_value)) = (desc.value, node.slot) {
                    if !same_value(ctx, new_value, old_value) {
                        return reject(ctx, throw, "cannot redefine a non-configurable property");
                    }
                }
            }
        } else if let PropertySlot::Accessor { getter, setter } = node.slot {
            if let Some(new_getter) = desc.getter {
                if accessor_value(getter) != new_getter {
                    return reject(ctx, throw, "cannot redefine a non-configurable property");
                }
            }
            if let Some(new_setter) = desc.setter {
                if accessor_value(setter) != new_setter {
                    return reject(ctx, throw, "cannot redefine a non-configurable property");
                }
            }
        }
    }

    // All checks passed: apply the transition in place.
    let new_is_accessor = if desc.is_accessor() {
        true
    } else if desc.is_data() {
        false
    } else {
        current_is_accessor
    };

    let new_slot = if new_is_accessor {
        let (old_getter, old_setter) = match node.slot {
            PropertySlot::Accessor { getter, setter } if current_is_accessor => (getter, setter),
            _ => (CompactPtr::NULL, CompactPtr::NULL),
        };
        let getter = match desc.getter {
            Some(v) => accessor_ptr(ctx, Some(v)),
            None => {
                if !old_getter.is_null() {
                    ctx.heap.ref_cell(old_getter);
                }
                old_getter
            }
        };
        let setter = match desc.setter {
            Some(v) => accessor_ptr(ctx, Some(v)),
            None => {
                if !old_setter.is_null() {
                    ctx.heap.ref_cell(old_setter);
                }
                old_setter
            }
        };
        PropertySlot::Accessor { getter, setter }
    } else {
        let value = match desc.value {
            Some(v) => ctx.heap.copy_value(v),
            None => match node.slot {
                PropertySlot::Value(old) if !current_is_accessor => ctx.heap.copy_value(old),
                _ => Value::UNDEFINED,
            },
        };
        PropertySlot::Value(value)
    };

    let new_attrs = PropertyAttrs {
        writable: desc.writable.unwrap_or(if current_is_accessor {
            false
        } else {
            node.attrs.writable
        }),
        enumerable: desc.enumerable.unwrap_or(node.attrs.enumerable),
        configurable: desc.configurable.unwrap_or(node.attrs.configurable),
    };

    let old_slot = {
        let live = ctx.heap.property_mut(node_ptr);
        live.attrs = new_attrs;
        std::mem::replace(&mut live.slot, new_slot)
    };
    release_slot(ctx, old_slot);
    array_note_index_write(ctx, object, name);
    Value::TRUE
}

fn accessor_value(ptr: CompactPtr) -> Value {
    if ptr.is_null() {
        Value::UNDEFINED
    } else {
        Value::object_ptr(ptr)
    }
}

fn accessor_ptr(ctx: &mut Context, value: Option<Value>) -> CompactPtr {
    match value {
        Some(v) if v.is_object() => {
            let ptr = v.as_object_ptr();
            ctx.heap.ref_cell(ptr);
            ptr
        }
        _ => CompactPtr::NULL,
    }
}

fn release_slot(ctx: &mut Context, slot: PropertySlot) {
    match slot {
        PropertySlot::Value(value) => ctx.heap.free_value(value),
        PropertySlot::Accessor { getter, setter } => {
            if !getter.is_null() {
                ctx.heap.deref_cell(getter);
            }
            if !setter.is_null() {
                ctx.heap.deref_cell(setter);
            }
        }
        PropertySlot::Internal(_) => unreachable!("internal slots are not replaced"),
    }
}

/// `[[DefaultValue]]` (§8.12.8): invokes `toString`/`valueOf` in hint
/// order.
pub fn default_value(ctx: &mut Context, object: CompactPtr, hint: PreferredType) -> Value {
    let receiver = Value::object_ptr(object);
    let order: [MagicStringId; 2] = match hint {
        PreferredType::String => [MagicStringId::ToString, MagicStringId::ValueOf],
        _ => [MagicStringId::ValueOf, MagicStringId::ToString],
    };
    for method_name in order {
        let method = get(ctx, object, method_name.text(), receiver);
        if method.is_abrupt() {
            return method;
        }
        if function::is_callable(ctx, method) {
            let result = function::op_function_call(ctx, method, receiver, &[]);
            ctx.heap.free_value(method);
            if result.is_abrupt() || !result.is_object() {
                return result;
            }
            ctx.heap.free_value(result);
        } else {
            ctx.heap.free_value(method);
        }
    }
    ctx.throw_type_error("cannot convert object to primitive value")
}

/// `enumerate`: appends own property names to the given collections.
/// Built-ins contribute their not-yet-instantiated descriptor slots;
/// plain functions contribute `length` and `prototype`.
pub fn own_property_names(
    ctx: &mut Context,
    object: CompactPtr,
    main_out: &mut Vec<String>,
    mut non_enumerable_out: Option<&mut Vec<String>>,
) {
    fn push_unique(list: &mut Vec<String>, name: String) {
        if !list.iter().any(|existing| *existing == name) {
            list.push(name);
        }
    }

    let record = ctx.heap.object(object);
    let kind = record.kind;
    let is_builtin = record.is_builtin;
    let routine = record.builtin().map(|b| b.routine_id).unwrap_or(0);

    // String wrapper characters come before named properties.
    if kind == ObjectKind::StringObject {
        if let Some(primitive) = conversion::primitive_value_of(ctx, object) {
            let count = ctx.string_text(primitive).chars().count();
            for index in 0..count {
                push_unique(main_out, index.to_string());
            }
        }
        if let Some(out) = non_enumerable_out.as_mut() {
            push_unique(out, "length".to_string());
        }
    }

    let mut cursor = ctx.heap.object(object).properties;
    while !cursor.is_null() {
        let node = ctx.heap.property(cursor);
        let next = node.next;
        if !node.is_internal() {
            let text = ctx.heap.property_name_text(node.name).to_string();
            if node.attrs.enumerable {
                push_unique(main_out, text);
            } else if let Some(out) = non_enumerable_out.as_mut() {
                push_unique(out, text);
            }
        }
        cursor = next;
    }

    if is_builtin && routine == 0 {
        if let Some(provider) = ctx.provider() {
            let id = BuiltinId::from_raw(
                ctx.heap
                    .object(object)
                    .builtin()
                    .map(|b| b.builtin_id)
                    .unwrap_or(0),
            );
            for (index, desc) in provider.descriptors(id).iter().enumerate() {
                if builtin_slot_instantiated(ctx, object, index) {
                    continue;
                }
                let text = desc.name.text().to_string();
                if desc.attrs.enumerable {
                    push_unique(main_out, text);
                } else if let Some(out) = non_enumerable_out.as_mut() {
                    push_unique(out, text);
                }
            }
        }
    }

    if kind == ObjectKind::Function {
        if let Some(out) = non_enumerable_out.as_mut() {
            push_unique(out, "length".to_string());
            push_unique(out, "prototype".to_string());
        }
    }
    if kind.is_function() && is_builtin && routine != 0 {
        if let Some(out) = non_enumerable_out {
            push_unique(out, "length".to_string());
        }
    }
}

/// Collects the for-in name set: enumerable own names along the
/// prototype chain, shadowed names visited once, non-enumerable
/// shadows suppressing inherited names.
pub fn for_in_names(ctx: &mut Context, object: CompactPtr) -> Vec<String> {
    let mut result = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    let mut current = object;
    loop {
        let mut enumerable = Vec::new();
        let mut hidden = Vec::new();
        own_property_names(ctx, current, &mut enumerable, Some(&mut hidden));
        for name in enumerable {
            if !seen.contains(&name) {
                seen.push(name.clone());
                result.push(name);
            }
        }
        for name in hidden {
            if !seen.contains(&name) {
                seen.push(name);
            }
        }
        let proto = ctx.heap.object(current).prototype;
        if proto.is_null() {
            return result;
        }
        current = proto;
    }
}

/// Creates a plain object with `Object.prototype` (when installed).
pub fn create_plain_object(ctx: &mut Context) -> Value {
    let prototype = if ctx.provider().is_some() {
        let proto = ctx.builtin_object(BuiltinId::ObjectPrototype);
        ctx.heap.ref_cell(proto);
        proto
    } else {
        CompactPtr::NULL
    };
    let ptr = ctx.alloc_object(ObjectRecord::new(ObjectKind::General, prototype, true));
    Value::object_ptr(ptr)
}

/// Creates an array with a zero `length`.
pub fn create_array(ctx: &mut Context, length: u32) -> Value {
    let prototype = if ctx.provider().is_some() {
        let proto = ctx.builtin_object(BuiltinId::ObjectPrototype);
        ctx.heap.ref_cell(proto);
        proto
    } else {
        CompactPtr::NULL
    };
    let ptr = ctx.alloc_object(ObjectRecord::new(ObjectKind::Array, prototype, true));
    let length_value = ctx.make_number(length as f64);
    ctx.append_property(
        ptr,
        PropertyNode::data(
            PropertyName::Magic(MagicStringId::Length),
            length_value,
            PropertyAttrs::writable_only(),
        ),
    );
    Value::object_ptr(ptr)
}

// ----- reference-style helpers used by the interpreter ------------------

/// `GetValue` on a property reference with an arbitrary base value.
pub fn get_value_of(ctx: &mut Context, base: Value, key: Value) -> Value {
    if base.is_undefined() || base.is_null() {
        let key_text = describe_key(ctx, key);
        return ctx
            .throw_type_error(&format!("cannot read property '{}' of undefined or null", key_text));
    }
    let key_string = conversion::to_string_value(ctx, key);
    if key_string.is_abrupt() {
        return key_string;
    }
    let name = ctx.string_text(key_string).to_string();
    let result = if base.is_object() {
        get(ctx, base.as_object_ptr(), &name, base)
    } else {
        // Primitive base: box, read through the wrapper, observe the
        // primitive as `this` in accessors.
        let wrapper = conversion::to_object(ctx, base);
        if wrapper.is_abrupt() {
            ctx.heap.free_value(key_string);
            return wrapper;
        }
        let result = get(ctx, wrapper.as_object_ptr(), &name, base);
        ctx.heap.free_value(wrapper);
        result
    };
    ctx.heap.free_value(key_string);
    result
}

/// `PutValue` on a property reference with an arbitrary base value.
pub fn put_value_of(ctx: &mut Context, base: Value, key: Value, value: Value, strict: bool) -> Value {
    if base.is_undefined() || base.is_null() {
        let key_text = describe_key(ctx, key);
        return ctx
            .throw_type_error(&format!("cannot set property '{}' of undefined or null", key_text));
    }
    let key_string = conversion::to_string_value(ctx, key);
    if key_string.is_abrupt() {
        return key_string;
    }
    let name = ctx.string_text(key_string).to_string();
    let result = if base.is_object() {
        put(ctx, base.as_object_ptr(), &name, value, strict, base)
    } else {
        let wrapper = conversion::to_object(ctx, base);
        if wrapper.is_abrupt() {
            ctx.heap.free_value(key_string);
            return wrapper;
        }
        let result = put(ctx, wrapper.as_object_ptr(), &name, value, strict, base);
        ctx.heap.free_value(wrapper);
        result
    };
    ctx.heap.free_value(key_string);
    result
}

fn describe_key(ctx: &Context, key: Value) -> String {
    if key.is_string() {
        ctx.string_text(key).to_string()
    } else if key.is_integer() {
        key.as_integer().to_string()
    } else {
        "...".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_desc(value: Value) -> PropertyDescriptor {
        PropertyDescriptor::data(value)
    }

    #[test]
    fn test_define_and_get() {
        let mut ctx = Context::new();
        let obj = create_plain_object(&mut ctx).as_object_ptr();
        let result = define_own_property(&mut ctx, obj, "answer", &data_desc(Value::integer(42)), false);
        assert_eq!(result, Value::TRUE);
        let value = get(&mut ctx, obj, "answer", Value::object_ptr(obj));
        assert_eq!(value, Value::integer(42));
        assert_eq!(get(&mut ctx, obj, "missing", Value::object_ptr(obj)), Value::UNDEFINED);
    }

    #[test]
    fn test_get_walks_prototype_chain() {
        let mut ctx = Context::new();
        let proto = create_plain_object(&mut ctx).as_object_ptr();
        define_own_property(&mut ctx, proto, "inherited", &data_desc(Value::integer(7)), false);

        ctx.heap.ref_cell(proto);
        let mut record = ObjectRecord::new(ObjectKind::General, proto, true);
        record.data = ObjectData::None;
        let child = ctx.alloc_object(record);
        assert_eq!(
            get(&mut ctx, child, "inherited", Value::object_ptr(child)),
            Value::integer(7)
        );
        assert!(has_property(&mut ctx, child, "inherited"));
        assert!(get_own_property(&mut ctx, child, "inherited").is_none());
    }

    #[test]
    fn test_put_respects_read_only() {
        let mut ctx = Context::new();
        let obj = create_plain_object(&mut ctx).as_object_ptr();
        let desc = PropertyDescriptor {
            value: Some(Value::integer(1)),
            writable: Some(false),
            enumerable: Some(true),
            configurable: Some(true),
            ..Default::default()
        };
        define_own_property(&mut ctx, obj, "ro", &desc, false);

        let receiver = Value::object_ptr(obj);
        assert_eq!(put(&mut ctx, obj, "ro", Value::integer(2), false, receiver), Value::FALSE);
        let thrown = put(&mut ctx, obj, "ro", Value::integer(2), true, receiver);
        assert!(thrown.is_abrupt());
        assert_eq!(get(&mut ctx, obj, "ro", receiver), Value::integer(1));
    }

    #[test]
    fn test_put_rejects_on_non_extensible() {
        let mut ctx = Context::new();
        let obj = create_plain_object(&mut ctx).as_object_ptr();
        ctx.heap.object_mut(obj).extensible = false;
        let receiver = Value::object_ptr(obj);
        assert_eq!(put(&mut ctx, obj, "nope", Value::TRUE, false, receiver), Value::FALSE);
    }

    #[test]
    fn test_delete_non_configurable_fails_and_keeps_property() {
        let mut ctx = Context::new();
        let obj = create_plain_object(&mut ctx).as_object_ptr();
        let desc = PropertyDescriptor {
            value: Some(Value::integer(5)),
            writable: Some(true),
            enumerable: Some(true),
            configurable: Some(false),
            ..Default::default()
        };
        define_own_property(&mut ctx, obj, "keep", &desc, false);

        assert_eq!(delete_property(&mut ctx, obj, "keep", false), Value::FALSE);
        assert!(delete_property(&mut ctx, obj, "keep", true).is_abrupt());
        assert_eq!(
            get(&mut ctx, obj, "keep", Value::object_ptr(obj)),
            Value::integer(5)
        );

        define_own_property(&mut ctx, obj, "gone", &data_desc(Value::integer(6)), false);
        assert_eq!(delete_property(&mut ctx, obj, "gone", false), Value::TRUE);
        assert!(get_own_property(&mut ctx, obj, "gone").is_none());
    }

    #[test]
    fn test_define_own_property_transitions() {
        let mut ctx = Context::new();
        let obj = create_plain_object(&mut ctx).as_object_ptr();

        // Data -> data with a narrower attribute set.
        define_own_property(&mut ctx, obj, "p", &data_desc(Value::integer(1)), false);
        let narrowed = PropertyDescriptor {
            writable: Some(false),
            ..Default::default()
        };
        assert_eq!(define_own_property(&mut ctx, obj, "p", &narrowed, false), Value::TRUE);

        // Non-configurable data property cannot become writable again.
        let frozen = PropertyDescriptor {
            configurable: Some(false),
            ..Default::default()
        };
        define_own_property(&mut ctx, obj, "p", &frozen, false);
        let widen = PropertyDescriptor {
            writable: Some(true),
            ..Default::default()
        };
        assert_eq!(define_own_property(&mut ctx, obj, "p", &widen, false), Value::FALSE);
        assert!(define_own_property(&mut ctx, obj, "p", &widen, true).is_abrupt());

        // Value change on a non-writable, non-configurable property
        // is rejected unless it is the same value.
        let same = PropertyDescriptor {
            value: Some(Value::integer(1)),
            ..Default::default()
        };
        assert_eq!(define_own_property(&mut ctx, obj, "p", &same, false), Value::TRUE);
        let different = PropertyDescriptor {
            value: Some(Value::integer(2)),
            ..Default::default()
        };
        assert_eq!(define_own_property(&mut ctx, obj, "p", &different, false), Value::FALSE);
    }

    #[test]
    fn test_enumerate_own_names() {
        let mut ctx = Context::new();
        let obj = create_plain_object(&mut ctx).as_object_ptr();
        define_own_property(&mut ctx, obj, "a", &data_desc(Value::integer(1)), false);
        define_own_property(&mut ctx, obj, "b", &data_desc(Value::integer(2)), false);
        let hidden = PropertyDescriptor {
            value: Some(Value::integer(3)),
            writable: Some(true),
            enumerable: Some(false),
            configurable: Some(true),
            ..Default::default()
        };
        define_own_property(&mut ctx, obj, "hidden", &hidden, false);

        let mut main = Vec::new();
        let mut non_enum = Vec::new();
        own_property_names(&mut ctx, obj, &mut main, Some(&mut non_enum));
        assert_eq!(main, ["a", "b"]);
        assert_eq!(non_enum, ["hidden"]);
    }

    #[test]
    fn test_for_in_shadowing() {
        let mut ctx = Context::new();
        let proto = create_plain_object(&mut ctx).as_object_ptr();
        define_own_property(&mut ctx, proto, "shared", &data_desc(Value::integer(1)), false);
        define_own_property(&mut ctx, proto, "only_proto", &data_desc(Value::integer(2)), false);

        ctx.heap.ref_cell(proto);
        let child = ctx.alloc_object(ObjectRecord::new(ObjectKind::General, proto, true));
        define_own_property(&mut ctx, child, "shared", &data_desc(Value::integer(3)), false);

        let names = for_in_names(&mut ctx, child);
        assert_eq!(
            names.iter().filter(|n| n.as_str() == "shared").count(),
            1,
            "shadowed names are visited once"
        );
        assert!(names.iter().any(|n| n == "only_proto"));
    }

    #[test]
    fn test_array_length_tracks_writes() {
        let mut ctx = Context::new();
        let array = create_array(&mut ctx, 0).as_object_ptr();
        assert_eq!(array_length(&ctx, array), 0);

        let receiver = Value::object_ptr(array);
        put(&mut ctx, array, "0", Value::integer(10), false, receiver);
        put(&mut ctx, array, "4", Value::integer(50), false, receiver);
        assert_eq!(array_length(&ctx, array), 5);

        // Truncation deletes elements past the new length.
        let two = Value::integer(2);
        put(&mut ctx, array, "length", two, false, receiver);
        assert_eq!(array_length(&ctx, array), 2);
        assert!(get_own_property(&mut ctx, array, "4").is_none());
        assert_eq!(get(&mut ctx, array, "0", receiver), Value::integer(10));
    }

    #[test]
    fn test_array_index_of() {
        assert_eq!(array_index_of("0"), Some(0));
        assert_eq!(array_index_of("42"), Some(42));
        assert_eq!(array_index_of("007"), None);
        assert_eq!(array_index_of("-1"), None);
        assert_eq!(array_index_of("4294967295"), None);
        assert_eq!(array_index_of("x"), None);
    }

    #[test]
    fn test_get_value_of_primitive_bases() {
        let mut ctx = Context::new();
        let text = ctx.alloc_string("abc");
        let key = ctx.alloc_string("length");
        let length = get_value_of(&mut ctx, text, key);
        assert_eq!(length, Value::integer(3));

        let zero = Value::integer(0);
        let ch = get_value_of(&mut ctx, text, zero);
        assert!(ch.is_string());
        assert_eq!(ctx.string_text(ch), "a");

        let on_undefined = get_value_of(&mut ctx, Value::UNDEFINED, key);
        assert!(on_undefined.is_abrupt());
    }
}
