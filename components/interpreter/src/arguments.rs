//! The Arguments exotic object.

use crate::context::Context;
use crate::provider::BuiltinId;
use core_types::{CompactPtr, MagicStringId, Value};
use memory_manager::{
    ObjectKind, ObjectRecord, PropertyAttrs, PropertyName, PropertyNode, PropertySlot,
};

/// Creates the Arguments object for a call (§10.6).
///
/// Indexed properties snapshot the call's arguments; `callee` is the
/// function in sloppy mode and the shared thrower accessor pair in
/// strict mode (which also installs `caller`).
pub fn create_arguments(
    ctx: &mut Context,
    callee: Option<Value>,
    args: &[Value],
    strict: bool,
) -> Value {
    let prototype = if ctx.provider().is_some() {
        let proto = ctx.builtin_object(BuiltinId::ObjectPrototype);
        ctx.heap.ref_cell(proto);
        proto
    } else {
        CompactPtr::NULL
    };
    let ptr = ctx.alloc_object(ObjectRecord::new(ObjectKind::Arguments, prototype, true));

    for (index, arg) in args.iter().enumerate() {
        let copied = ctx.heap.copy_value(*arg);
        let name_value = ctx.alloc_string(&index.to_string());
        let name = ctx.heap.property_name_from(name_value);
        ctx.heap.free_value(name_value);
        ctx.append_property(ptr, PropertyNode::data(name, copied, PropertyAttrs::all()));
    }

    ctx.append_property(
        ptr,
        PropertyNode::data(
            PropertyName::Magic(MagicStringId::Length),
            Value::integer(args.len() as i32),
            PropertyAttrs {
                writable: true,
                enumerable: false,
                configurable: true,
            },
        ),
    );

    if strict {
        for magic in [MagicStringId::Callee, MagicStringId::Caller] {
            let thrower = ctx.thrower();
            ctx.heap.ref_cell(thrower);
            ctx.heap.ref_cell(thrower);
            ctx.append_property(
                ptr,
                PropertyNode {
                    name: PropertyName::Magic(magic),
                    attrs: PropertyAttrs::none(),
                    slot: PropertySlot::Accessor {
                        getter: thrower,
                        setter: thrower,
                    },
                    next: CompactPtr::NULL,
                },
            );
        }
    } else if let Some(callee) = callee {
        let copied = ctx.heap.copy_value(callee);
        ctx.append_property(
            ptr,
            PropertyNode::data(
                PropertyName::Magic(MagicStringId::Callee),
                copied,
                PropertyAttrs {
                    writable: true,
                    enumerable: false,
                    configurable: true,
                },
            ),
        );
    }

    Value::object_ptr(ptr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects;

    #[test]
    fn test_sloppy_arguments_shape() {
        let mut ctx = Context::new();
        let callee = objects::create_plain_object(&mut ctx);
        let args = [Value::integer(1), Value::integer(2)];
        let arguments = create_arguments(&mut ctx, Some(callee), &args, false);
        let ptr = arguments.as_object_ptr();

        assert_eq!(ctx.heap.object(ptr).kind, ObjectKind::Arguments);
        assert_eq!(objects::get(&mut ctx, ptr, "length", arguments), Value::integer(2));
        assert_eq!(objects::get(&mut ctx, ptr, "0", arguments), Value::integer(1));
        assert_eq!(objects::get(&mut ctx, ptr, "1", arguments), Value::integer(2));
        assert_eq!(objects::get(&mut ctx, ptr, "callee", arguments), callee);
    }

    #[test]
    fn test_strict_arguments_restrict_callee() {
        let mut ctx = Context::new();
        let arguments = create_arguments(&mut ctx, None, &[], true);
        let ptr = arguments.as_object_ptr();
        let callee = objects::get(&mut ctx, ptr, "callee", arguments);
        assert!(callee.is_abrupt());
        let caller = objects::get(&mut ctx, ptr, "caller", arguments);
        assert!(caller.is_abrupt());
    }

    #[test]
    fn test_arguments_enumerates_indices_only() {
        let mut ctx = Context::new();
        let args = [Value::TRUE];
        let arguments = create_arguments(&mut ctx, None, &args, false);
        let mut main = Vec::new();
        own_names(&mut ctx, arguments, &mut main);
        assert_eq!(main, ["0"]);
    }

    fn own_names(ctx: &mut Context, value: Value, main: &mut Vec<String>) {
        objects::own_property_names(ctx, value.as_object_ptr(), main, None);
    }
}
