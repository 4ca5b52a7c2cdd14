//! The built-in library of the Petrel JavaScript engine.
//!
//! [`CoreBuiltins`] implements the interpreter's registry seam: one
//! descriptor table per built-in id, lazily materialized by the object
//! model, and the routine dispatch keyed by `(built-in id, routine
//! id)`. The library covers the protocol floor of the engine: the
//! global object, `Object` and its prototype, `Function.prototype`
//! with `call`/`apply`/`bind`, and the `Error` constructor family.
//!
//! # Example
//!
//! ```
//! use builtins::CoreBuiltins;
//! use interpreter::Engine;
//!
//! let mut engine = Engine::with_provider(CoreBuiltins::new());
//! let result = engine.eval("Object.keys({ a: 1 }).length", false);
//! assert_eq!(engine.get_number(result), 1.0);
//! engine.free_value(result);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod function;
mod global;
mod object;

use core_types::Value;
use interpreter::{
    BuiltinId, BuiltinPropertyDesc, BuiltinProvider, BuiltinTemplate, Context,
};
use std::rc::Rc;

/// The default built-in provider.
pub struct CoreBuiltins;

impl CoreBuiltins {
    /// Creates the provider behind an `Rc` for context installation.
    pub fn new() -> Rc<CoreBuiltins> {
        Rc::new(CoreBuiltins)
    }
}

impl BuiltinProvider for CoreBuiltins {
    fn template(&self, id: BuiltinId) -> BuiltinTemplate {
        use core_types::MagicStringId;
        match id {
            BuiltinId::Global => BuiltinTemplate {
                prototype: Some(BuiltinId::ObjectPrototype),
                callable: false,
                class_tag: None,
            },
            BuiltinId::ObjectPrototype => BuiltinTemplate {
                prototype: None,
                callable: false,
                class_tag: None,
            },
            BuiltinId::ObjectConstructor
            | BuiltinId::FunctionConstructor
            | BuiltinId::ErrorConstructor => BuiltinTemplate {
                prototype: Some(BuiltinId::FunctionPrototype),
                callable: true,
                class_tag: None,
            },
            BuiltinId::FunctionPrototype => BuiltinTemplate {
                prototype: Some(BuiltinId::ObjectPrototype),
                callable: true,
                class_tag: None,
            },
            // The native error constructors inherit from the Error
            // constructor (§15.11.7).
            BuiltinId::TypeErrorConstructor
            | BuiltinId::RangeErrorConstructor
            | BuiltinId::ReferenceErrorConstructor
            | BuiltinId::SyntaxErrorConstructor
            | BuiltinId::UriErrorConstructor
            | BuiltinId::EvalErrorConstructor => BuiltinTemplate {
                prototype: Some(BuiltinId::ErrorConstructor),
                callable: true,
                class_tag: None,
            },
            BuiltinId::ErrorPrototype => BuiltinTemplate {
                prototype: Some(BuiltinId::ObjectPrototype),
                callable: false,
                class_tag: Some(MagicStringId::ErrorClass),
            },
            BuiltinId::TypeErrorPrototype
            | BuiltinId::RangeErrorPrototype
            | BuiltinId::ReferenceErrorPrototype
            | BuiltinId::SyntaxErrorPrototype
            | BuiltinId::UriErrorPrototype
            | BuiltinId::EvalErrorPrototype => BuiltinTemplate {
                prototype: Some(BuiltinId::ErrorPrototype),
                callable: false,
                class_tag: Some(MagicStringId::ErrorClass),
            },
        }
    }

    fn descriptors(&self, id: BuiltinId) -> &'static [BuiltinPropertyDesc] {
        match id {
            BuiltinId::Global => &global::DESCRIPTORS,
            BuiltinId::ObjectConstructor => &object::CONSTRUCTOR_DESCRIPTORS,
            BuiltinId::ObjectPrototype => &object::PROTOTYPE_DESCRIPTORS,
            BuiltinId::FunctionConstructor => &function::CONSTRUCTOR_DESCRIPTORS,
            BuiltinId::FunctionPrototype => &function::PROTOTYPE_DESCRIPTORS,
            BuiltinId::ErrorConstructor => &error::ERROR_CONSTRUCTOR_DESCRIPTORS,
            BuiltinId::ErrorPrototype => &error::ERROR_PROTOTYPE_DESCRIPTORS,
            BuiltinId::TypeErrorConstructor => &error::TYPE_ERROR_CONSTRUCTOR_DESCRIPTORS,
            BuiltinId::TypeErrorPrototype => &error::TYPE_ERROR_PROTOTYPE_DESCRIPTORS,
            BuiltinId::RangeErrorConstructor => &error::RANGE_ERROR_CONSTRUCTOR_DESCRIPTORS,
            BuiltinId::RangeErrorPrototype => &error::RANGE_ERROR_PROTOTYPE_DESCRIPTORS,
            BuiltinId::ReferenceErrorConstructor => {
                &error::REFERENCE_ERROR_CONSTRUCTOR_DESCRIPTORS
            }
            BuiltinId::ReferenceErrorPrototype => &error::REFERENCE_ERROR_PROTOTYPE_DESCRIPTORS,
            BuiltinId::SyntaxErrorConstructor => &error::SYNTAX_ERROR_CONSTRUCTOR_DESCRIPTORS,
            BuiltinId::SyntaxErrorPrototype => &error::SYNTAX_ERROR_PROTOTYPE_DESCRIPTORS,
            BuiltinId::UriErrorConstructor => &error::URI_ERROR_CONSTRUCTOR_DESCRIPTORS,
            BuiltinId::UriErrorPrototype => &error::URI_ERROR_PROTOTYPE_DESCRIPTORS,
            BuiltinId::EvalErrorConstructor => &error::EVAL_ERROR_CONSTRUCTOR_DESCRIPTORS,
            BuiltinId::EvalErrorPrototype => &error::EVAL_ERROR_PROTOTYPE_DESCRIPTORS,
        }
    }

    fn call(
        &self,
        ctx: &mut Context,
        id: BuiltinId,
        routine: u16,
        this: Value,
        args: &[Value],
    ) -> Value {
        match id {
            BuiltinId::Global => global::call_routine(ctx, routine, this, args),
            BuiltinId::ObjectConstructor => object::call_constructor_routine(ctx, routine, args),
            BuiltinId::ObjectPrototype => object::call_prototype_routine(ctx, routine, this, args),
            BuiltinId::FunctionConstructor => function::construct(ctx, args),
            BuiltinId::FunctionPrototype => {
                function::call_prototype_routine(ctx, routine, this, args)
            }
            // Calling an error constructor behaves like constructing
            // it (§15.11.1).
            BuiltinId::ErrorConstructor
            | BuiltinId::TypeErrorConstructor
            | BuiltinId::RangeErrorConstructor
            | BuiltinId::ReferenceErrorConstructor
            | BuiltinId::SyntaxErrorConstructor
            | BuiltinId::UriErrorConstructor
            | BuiltinId::EvalErrorConstructor => error::construct(ctx, id, args),
            BuiltinId::ErrorPrototype
            | BuiltinId::TypeErrorPrototype
            | BuiltinId::RangeErrorPrototype
            | BuiltinId::ReferenceErrorPrototype
            | BuiltinId::SyntaxErrorPrototype
            | BuiltinId::UriErrorPrototype
            | BuiltinId::EvalErrorPrototype => error::call_prototype_routine(ctx, routine, this),
        }
    }

    fn construct(&self, ctx: &mut Context, id: BuiltinId, args: &[Value]) -> Value {
        match id {
            BuiltinId::ObjectConstructor => object::construct(ctx, args),
            BuiltinId::FunctionConstructor => function::construct(ctx, args),
            BuiltinId::ErrorConstructor
            | BuiltinId::TypeErrorConstructor
            | BuiltinId::RangeErrorConstructor
            | BuiltinId::ReferenceErrorConstructor
            | BuiltinId::SyntaxErrorConstructor
            | BuiltinId::UriErrorConstructor
            | BuiltinId::EvalErrorConstructor => error::construct(ctx, id, args),
            _ => ctx.throw_type_error("value is not a constructor"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interpreter::Engine;

    fn engine() -> Engine {
        Engine::with_provider(CoreBuiltins::new())
    }

    fn eval_number(engine: &mut Engine, source: &str) -> f64 {
        let result = engine.eval(source, false);
        assert!(result.is_number(), "{:?} evaluating {:?}", result, source);
        let n = engine.get_number(result);
        engine.free_value(result);
        n
    }

    fn eval_string(engine: &mut Engine, source: &str) -> String {
        let result = engine.eval(source, false);
        assert!(result.is_string(), "{:?} evaluating {:?}", result, source);
        let text = engine.get_string(result);
        engine.free_value(result);
        text
    }

    fn eval_boolean(engine: &mut Engine, source: &str) -> bool {
        let result = engine.eval(source, false);
        assert!(result.is_boolean(), "{:?} evaluating {:?}", result, source);
        engine.get_boolean(result)
    }

    #[test]
    fn test_global_constants() {
        let mut engine = engine();
        assert!(eval_boolean(&mut engine, "undefined === void 0"));
        assert!(eval_boolean(&mut engine, "NaN !== NaN"));
        assert!(eval_boolean(&mut engine, "Infinity > 1e308"));
    }

    #[test]
    fn test_object_constructor_and_prototype() {
        let mut engine = engine();
        assert_eq!(eval_string(&mut engine, "({}).toString()"), "[object Object]");
        assert_eq!(
            eval_string(&mut engine, "Object.prototype.toString.call([])"),
            "[object Array]"
        );
        assert!(eval_boolean(&mut engine, "({ a: 1 }).hasOwnProperty('a')"));
        assert!(!eval_boolean(&mut engine, "({ a: 1 }).hasOwnProperty('b')"));
        assert!(eval_boolean(&mut engine, "typeof Object === 'function'"));
        assert!(eval_boolean(&mut engine, "new Object() instanceof Object"));
    }

    #[test]
    fn test_object_define_property() {
        let mut engine = engine();
        assert_eq!(
            eval_number(
                &mut engine,
                "var o = {}; Object.defineProperty(o, 'x', { value: 7 }); o.x"
            ),
            7.0
        );
        // Non-writable by default.
        assert_eq!(
            eval_number(
                &mut engine,
                "var o = {}; Object.defineProperty(o, 'x', { value: 7 }); o.x = 9; o.x"
            ),
            7.0
        );
        assert_eq!(
            eval_number(
                &mut engine,
                "var o = {}; Object.defineProperty(o, 'v', \
                 { get: function () { return 41; } }); o.v + 1"
            ),
            42.0
        );
    }

    #[test]
    fn test_object_keys_and_descriptor() {
        let mut engine = engine();
        assert_eq!(eval_number(&mut engine, "Object.keys({ a: 1, b: 2 }).length"), 2.0);
        assert_eq!(
            eval_string(&mut engine, "Object.keys({ a: 1, b: 2 })[0]"),
            "a"
        );
        assert!(eval_boolean(
            &mut engine,
            "Object.getOwnPropertyDescriptor({ a: 1 }, 'a').writable"
        ));
        assert!(eval_boolean(
            &mut engine,
            "Object.getOwnPropertyDescriptor({}, 'missing') === undefined"
        ));
        assert!(eval_boolean(
            &mut engine,
            "Object.getPrototypeOf({}) === Object.prototype"
        ));
    }

    #[test]
    fn test_function_prototype_call_and_apply() {
        let mut engine = engine();
        assert_eq!(
            eval_number(
                &mut engine,
                "function f() { return this.t; } this.t = 1; f.call({ t: 7 })"
            ),
            7.0
        );
        assert_eq!(
            eval_number(
                &mut engine,
                "function add(a, b) { return a + b; } add.apply(null, [20, 22])"
            ),
            42.0
        );
        assert_eq!(
            eval_number(&mut engine, "function n() { return 5; } n.apply(null)"),
            5.0
        );
    }

    #[test]
    fn test_function_prototype_bind() {
        let mut engine = engine();
        assert_eq!(
            eval_number(
                &mut engine,
                "var b = f.bind({ x: 3 }, 10); function f(a) { return this.x + a; } b(5)"
            ),
            13.0
        );
        assert_eq!(
            eval_number(
                &mut engine,
                "function Point(x, y) { this.x = x; this.y = y; } \
                 var P1 = Point.bind(null, 1); var p = new P1(2); p.x + p.y"
            ),
            3.0
        );
    }

    #[test]
    fn test_function_constructor_compiles() {
        let mut engine = engine();
        assert_eq!(
            eval_number(&mut engine, "new Function('a', 'b', 'return a + b;')(40, 2)"),
            42.0
        );
    }

    #[test]
    fn test_error_family() {
        let mut engine = engine();
        assert_eq!(
            eval_string(&mut engine, "new Error('boom').message"),
            "boom"
        );
        assert_eq!(eval_string(&mut engine, "new TypeError('t').name"), "TypeError");
        assert_eq!(
            eval_string(&mut engine, "new RangeError('r').toString()"),
            "RangeError: r"
        );
        assert!(eval_boolean(
            &mut engine,
            "new TypeError('t') instanceof TypeError"
        ));
        assert!(eval_boolean(&mut engine, "new TypeError('t') instanceof Error"));
        assert!(eval_boolean(
            &mut engine,
            "(function () { try { null.x; } catch (e) { return e instanceof TypeError; } })()"
        ));
    }

    #[test]
    fn test_indirect_eval_runs_global() {
        let mut engine = engine();
        assert_eq!(eval_number(&mut engine, "eval('30 + 12')"), 42.0);
        assert_eq!(
            eval_number(&mut engine, "var x = 2; eval('x') + 40"),
            42.0
        );
    }

    #[test]
    fn test_direct_eval_sees_locals() {
        let mut engine = engine();
        assert_eq!(
            eval_number(
                &mut engine,
                "function f() { var local = 40; return eval('local + 2'); } f()"
            ),
            42.0
        );
    }

    #[test]
    fn test_enumeration_sees_uninstantiated_builtins() {
        let mut engine = engine();
        // `name` on an error prototype is lazy but not enumerable, so
        // for-in must not yield it; reading it must still work.
        assert_eq!(eval_string(&mut engine, "TypeError.prototype.name"), "TypeError");
        assert_eq!(
            eval_number(&mut engine, "var n = 0; for (var k in TypeError.prototype) { n++; } n"),
            0.0
        );
    }
}
