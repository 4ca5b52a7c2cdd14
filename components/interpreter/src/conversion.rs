//! Abstract conversion operations.
//!
//! The conversions of ECMA-262 §9: ToBoolean, ToNumber, ToString,
//! ToPrimitive, ToObject, the modular integer conversions backing the
//! bitwise operators, and the equality algorithms. Converting never
//! mutates the source value; results are fresh owned values. Integer
//! fast paths and the double path agree bitwise, including the sign
//! of zero and NaN propagation.

use crate::context::Context;
use crate::objects;
use crate::provider::BuiltinId;
use core_types::{CompactPtr, MagicStringId, Value};
use memory_manager::{InternalSlot, ObjectData, ObjectKind, ObjectRecord, PropertySlot};

/// Hint passed to ToPrimitive / `[[DefaultValue]]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferredType {
    /// No hint (treated as number for every class this engine ships).
    None,
    /// Prefer `valueOf`.
    Number,
    /// Prefer `toString`.
    String,
}

/// ToBoolean. Never allocates and never throws.
pub fn to_boolean(ctx: &Context, value: Value) -> bool {
    debug_assert!(!value.is_abrupt());
    if value.is_boolean() {
        return value.as_boolean();
    }
    if value.is_undefined() || value.is_null() || value.is_empty() {
        return false;
    }
    if value.is_integer() {
        return value.as_integer() != 0;
    }
    if value.is_float() {
        let n = ctx.heap.double(value.as_float_ptr());
        return !n.is_nan() && n != 0.0;
    }
    if value.is_string() {
        return !ctx.string_text(value).is_empty();
    }
    true
}

/// ToNumber. Returns a number value or an abrupt completion (object
/// conversion may run script).
pub fn to_number(ctx: &mut Context, value: Value) -> Value {
    if value.is_number() {
        return ctx.heap.copy_value(value);
    }
    if value.is_undefined() {
        return ctx.make_number(f64::NAN);
    }
    if value.is_null() {
        return Value::integer(0);
    }
    if value.is_boolean() {
        return Value::integer(if value.as_boolean() { 1 } else { 0 });
    }
    if value.is_string() {
        let n = string_to_number(ctx.string_text(value));
        return ctx.make_number(n);
    }
    debug_assert!(value.is_object());
    let primitive = to_primitive(ctx, value, PreferredType::Number);
    if primitive.is_abrupt() {
        return primitive;
    }
    let result = to_number(ctx, primitive);
    ctx.heap.free_value(primitive);
    result
}

/// Reads the numeric payload of a value already known to be a number.
pub fn number_of(ctx: &Context, value: Value) -> f64 {
    ctx.heap.number_of(value)
}

/// The ToNumber string grammar: optional whitespace, decimal or hex
/// literal, `Infinity`; anything else is NaN, the empty string is +0.
pub fn string_to_number(text: &str) -> f64 {
    let trimmed = text.trim_matches(|c: char| {
        c.is_whitespace() || c == '\u{FEFF}' || c == '\u{2028}' || c == '\u{2029}'
    });
    if trimmed.is_empty() {
        return 0.0;
    }

    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return f64::NAN;
        }
        let mut value = 0.0f64;
        for b in hex.bytes() {
            value = value * 16.0 + (b as char).to_digit(16).unwrap() as f64;
        }
        return value;
    }

    let (sign, magnitude) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    if magnitude == "Infinity" {
        return sign * f64::INFINITY;
    }
    // The remaining forms are a strict subset of Rust's float grammar;
    // reject the forms Rust accepts but ECMAScript does not.
    if magnitude.is_empty()
        || magnitude.contains(|c: char| !c.is_ascii_digit() && c != '.' && c != 'e' && c != 'E' && c != '+' && c != '-')
    {
        return f64::NAN;
    }
    match magnitude.parse::<f64>() {
        Ok(value) => sign * value,
        Err(_) => f64::NAN,
    }
}

/// The ToString number grammar of §9.8.1.
pub fn number_to_string(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let magnitude = value.abs();
    if (1e-6..1e21).contains(&magnitude) {
        if value.fract() == 0.0 && magnitude < 9.007_199_254_740_992e15 {
            return format!("{}", value as i64);
        }
        return format!("{}", value);
    }
    // Exponential range: patch Rust's `{:e}` into the ECMAScript
    // `d.dddde±x` form (explicit plus sign on positive exponents).
    let formatted = format!("{:e}", value);
    match formatted.find('e') {
        Some(pos) if formatted.as_bytes().get(pos + 1) != Some(&b'-') => {
            format!("{}e+{}", &formatted[..pos], &formatted[pos + 1..])
        }
        _ => formatted,
    }
}

/// ToString. Returns a string value or an abrupt completion.
pub fn to_string_value(ctx: &mut Context, value: Value) -> Value {
    if value.is_string() {
        return ctx.heap.copy_value(value);
    }
    if value.is_undefined() {
        return Value::magic_string(MagicStringId::Undefined);
    }
    if value.is_null() {
        return Value::magic_string(MagicStringId::Null);
    }
    if value.is_boolean() {
        return Value::magic_string(if value.as_boolean() {
            MagicStringId::True
        } else {
            MagicStringId::False
        });
    }
    if value.is_number() {
        let text = number_to_string(number_of(ctx, value));
        return ctx.alloc_string(&text);
    }
    debug_assert!(value.is_object());
    let primitive = to_primitive(ctx, value, PreferredType::String);
    if primitive.is_abrupt() {
        return primitive;
    }
    if primitive.is_object() {
        ctx.heap.free_value(primitive);
        return ctx.throw_type_error("cannot convert object to primitive value");
    }
    let result = to_string_value(ctx, primitive);
    ctx.heap.free_value(primitive);
    result
}

/// ToPrimitive: pass primitives through, run `[[DefaultValue]]` on
/// objects.
pub fn to_primitive(ctx: &mut Context, value: Value, hint: PreferredType) -> Value {
    if !value.is_object() {
        return ctx.heap.copy_value(value);
    }
    objects::default_value(ctx, value.as_object_ptr(), hint)
}

/// ToObject: wraps primitives, rejects `undefined` and `null`.
pub fn to_object(ctx: &mut Context, value: Value) -> Value {
    if value.is_object() {
        return ctx.heap.copy_value(value);
    }
    if value.is_undefined() || value.is_null() {
        return ctx.throw_type_error("cannot convert undefined or null to object");
    }

    let (kind, class_tag) = if value.is_string() {
        (ObjectKind::StringObject, MagicStringId::StringClass)
    } else if value.is_number() {
        (ObjectKind::General, MagicStringId::NumberClass)
    } else {
        (ObjectKind::General, MagicStringId::BooleanClass)
    };
    let prototype = if ctx.provider().is_some() {
        let proto = ctx.builtin_object(BuiltinId::ObjectPrototype);
        ctx.heap.ref_cell(proto);
        proto
    } else {
        CompactPtr::NULL
    };
    let ptr = ctx.alloc_object(ObjectRecord::new(kind, prototype, true));
    if kind != ObjectKind::StringObject {
        ctx.add_internal_property(ptr, InternalSlot::ClassTag(class_tag));
    }
    let primitive = ctx.heap.copy_value(value);
    ctx.add_internal_property(ptr, InternalSlot::PrimitiveValue(primitive));
    Value::object_ptr(ptr)
}

/// Reads a wrapper object's `[[PrimitiveValue]]`.
pub fn primitive_value_of(ctx: &Context, object: CompactPtr) -> Option<Value> {
    let node = ctx.find_internal_property(object, |slot| {
        matches!(slot, InternalSlot::PrimitiveValue(_))
    })?;
    match ctx.heap.property(node).slot {
        PropertySlot::Internal(InternalSlot::PrimitiveValue(value)) => Some(value),
        _ => None,
    }
}

/// ToInt32 (modular).
pub fn to_int32(ctx: &mut Context, value: Value) -> Result<i32, Value> {
    let number = to_number(ctx, value);
    if number.is_abrupt() {
        return Err(number);
    }
    let n = number_of(ctx, number);
    ctx.heap.free_value(number);
    Ok(double_to_int32(n))
}

/// ToUint32 (modular).
pub fn to_uint32(ctx: &mut Context, value: Value) -> Result<u32, Value> {
    Ok(to_int32(ctx, value)? as u32)
}

fn double_to_int32(n: f64) -> i32 {
    if !n.is_finite() || n == 0.0 {
        return 0;
    }
    let modulo = 4_294_967_296.0;
    let mut m = n.trunc() % modulo;
    if m < 0.0 {
        m += modulo;
    }
    if m >= 2_147_483_648.0 {
        (m - modulo) as i32
    } else {
        m as i32
    }
}

/// The `typeof` operator result.
pub fn typeof_of(ctx: &Context, value: Value) -> MagicStringId {
    if value.is_undefined() || value.is_empty() {
        MagicStringId::Undefined
    } else if value.is_null() {
        MagicStringId::ObjectType
    } else if value.is_boolean() {
        MagicStringId::BooleanType
    } else if value.is_number() {
        MagicStringId::NumberType
    } else if value.is_string() {
        MagicStringId::StringType
    } else {
        debug_assert!(value.is_object());
        if ctx.heap.object(value.as_object_ptr()).is_callable() {
            MagicStringId::FunctionType
        } else {
            MagicStringId::ObjectType
        }
    }
}

/// The strict equality comparison (§11.9.6). Never runs script.
pub fn strict_equals(ctx: &Context, a: Value, b: Value) -> bool {
    if a == b {
        // Identical words: equal unless a NaN double compares to
        // itself.
        if a.is_float() {
            return !ctx.heap.double(a.as_float_ptr()).is_nan();
        }
        return true;
    }
    if a.is_number() && b.is_number() {
        return ctx.heap.number_of(a) == ctx.heap.number_of(b);
    }
    if a.is_string() && b.is_string() {
        return ctx.heap.strings_equal(a, b);
    }
    false
}

/// The abstract equality comparison (§11.9.3). May run script through
/// ToPrimitive and so may return an abrupt completion.
pub fn abstract_equals(ctx: &mut Context, a: Value, b: Value) -> Value {
    // Same type families use strict semantics.
    if (a.is_number() && b.is_number())
        || (a.is_string() && b.is_string())
        || (a.is_boolean() && b.is_boolean())
        || (a.is_object() && b.is_object())
        || (a.is_undefined() && b.is_undefined())
        || (a.is_null() && b.is_null())
    {
        return Value::boolean(strict_equals(ctx, a, b));
    }

    // null == undefined in both directions.
    if (a.is_null() && b.is_undefined()) || (a.is_undefined() && b.is_null()) {
        return Value::TRUE;
    }

    // Number vs string, booleans, and object-to-primitive coercion.
    if a.is_number() && b.is_string() {
        let bn = string_to_number(ctx.string_text(b));
        return Value::boolean(ctx.heap.number_of(a) == bn);
    }
    if a.is_string() && b.is_number() {
        let an = string_to_number(ctx.string_text(a));
        return Value::boolean(an == ctx.heap.number_of(b));
    }
    if a.is_boolean() {
        let an = Value::integer(if a.as_boolean() { 1 } else { 0 });
        return abstract_equals(ctx, an, b);
    }
    if b.is_boolean() {
        let bn = Value::integer(if b.as_boolean() { 1 } else { 0 });
        return abstract_equals(ctx, a, bn);
    }
    if (a.is_number() || a.is_string()) && b.is_object() {
        let prim = to_primitive(ctx, b, PreferredType::None);
        if prim.is_abrupt() {
            return prim;
        }
        let result = abstract_equals(ctx, a, prim);
        ctx.heap.free_value(prim);
        return result;
    }
    if a.is_object() && (b.is_number() || b.is_string()) {
        let prim = to_primitive(ctx, a, PreferredType::None);
        if prim.is_abrupt() {
            return prim;
        }
        let result = abstract_equals(ctx, prim, b);
        ctx.heap.free_value(prim);
        return result;
    }

    Value::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_boolean() {
        let mut ctx = Context::new();
        assert!(!to_boolean(&ctx, Value::UNDEFINED));
        assert!(!to_boolean(&ctx, Value::NULL));
        assert!(!to_boolean(&ctx, Value::integer(0)));
        assert!(to_boolean(&ctx, Value::integer(-1)));

        let nan = ctx.make_number(f64::NAN);
        assert!(!to_boolean(&ctx, nan));
        let negative_zero = ctx.make_number(-0.0);
        assert!(!to_boolean(&ctx, negative_zero));

        let empty = ctx.alloc_string("");
        assert!(!to_boolean(&ctx, empty));
        let full = ctx.alloc_string("x");
        assert!(to_boolean(&ctx, full));
    }

    #[test]
    fn test_string_to_number_grammar() {
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("   "), 0.0);
        assert_eq!(string_to_number("42"), 42.0);
        assert_eq!(string_to_number("  3.5  "), 3.5);
        assert_eq!(string_to_number("-7"), -7.0);
        assert_eq!(string_to_number("+7"), 7.0);
        assert_eq!(string_to_number("0xFF"), 255.0);
        assert_eq!(string_to_number("1e3"), 1000.0);
        assert_eq!(string_to_number("Infinity"), f64::INFINITY);
        assert_eq!(string_to_number("-Infinity"), f64::NEG_INFINITY);
        assert!(string_to_number("12abc").is_nan());
        assert!(string_to_number("0x").is_nan());
        assert!(string_to_number("inf").is_nan());
        assert!(string_to_number("NaN").is_nan());
    }

    #[test]
    fn test_number_to_string_shapes() {
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(0.0), "0");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(42.0), "42");
        assert_eq!(number_to_string(-1.5), "-1.5");
        assert_eq!(number_to_string(f64::INFINITY), "Infinity");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(1e-7), "1e-7");
        assert_eq!(number_to_string(1e20), "100000000000000000000");
    }

    #[test]
    fn test_round_trip_to_number_of_to_string() {
        let mut ctx = Context::new();
        for n in [0.5, -2.25, 1234.0, 1e-7, 3.3e22, f64::INFINITY] {
            let value = ctx.make_number(n);
            let text = to_string_value(&mut ctx, value);
            let parsed = string_to_number(ctx.string_text(text));
            assert_eq!(parsed, n, "ToNumber(ToString({})) must round-trip", n);
        }
    }

    #[test]
    fn test_to_int32_wraps() {
        assert_eq!(double_to_int32(0.0), 0);
        assert_eq!(double_to_int32(-1.0), -1);
        assert_eq!(double_to_int32(4_294_967_296.0), 0);
        assert_eq!(double_to_int32(2_147_483_648.0), -2_147_483_648);
        assert_eq!(double_to_int32(f64::NAN), 0);
        assert_eq!(double_to_int32(f64::INFINITY), 0);
    }

    #[test]
    fn test_strict_equals_numbers_and_strings() {
        let mut ctx = Context::new();
        let half_a = ctx.make_number(0.5);
        let half_b = ctx.make_number(0.5);
        assert!(strict_equals(&ctx, half_a, half_b));
        let three = ctx.make_number(3.0);
        assert!(strict_equals(&ctx, Value::integer(3), three));

        let nan = ctx.make_number(f64::NAN);
        assert!(!strict_equals(&ctx, nan, nan));

        let s1 = ctx.alloc_string("same text");
        let s2 = ctx.alloc_string("same text");
        assert!(strict_equals(&ctx, s1, s2));
        let s3 = ctx.alloc_string("other text");
        assert!(!strict_equals(&ctx, s1, s3));
    }

    #[test]
    fn test_abstract_equals_coercions() {
        let mut ctx = Context::new();
        assert_eq!(abstract_equals(&mut ctx, Value::NULL, Value::UNDEFINED), Value::TRUE);
        let five_str = ctx.alloc_string("5");
        assert_eq!(
            abstract_equals(&mut ctx, Value::integer(5), five_str),
            Value::TRUE
        );
        assert_eq!(
            abstract_equals(&mut ctx, Value::TRUE, Value::integer(1)),
            Value::TRUE
        );
        assert_eq!(
            abstract_equals(&mut ctx, Value::NULL, Value::integer(0)),
            Value::FALSE
        );
    }

    #[test]
    fn test_to_object_wrappers() {
        let mut ctx = Context::new();
        let s = ctx.alloc_string("wrapped");
        let wrapper = to_object(&mut ctx, s);
        assert!(wrapper.is_object());
        let ptr = wrapper.as_object_ptr();
        assert_eq!(ctx.heap.object(ptr).kind, ObjectKind::StringObject);
        assert_eq!(primitive_value_of(&ctx, ptr), Some(s));

        let failed = to_object(&mut ctx, Value::UNDEFINED);
        assert!(failed.is_abrupt());
    }
}
