//! End-to-end scenarios over the full engine: compiler, interpreter,
//! object model, and the core built-in library together.

use builtins::CoreBuiltins;
use core_types::Value;
use interpreter::Engine;

fn engine() -> Engine {
    Engine::with_provider(CoreBuiltins::new())
}

fn eval_number(engine: &mut Engine, source: &str) -> f64 {
    let result = engine.eval(source, false);
    assert!(
        result.is_number(),
        "expected a number, got {:?} evaluating {:?}",
        result,
        source
    );
    let n = engine.get_number(result);
    engine.free_value(result);
    n
}

fn eval_string(engine: &mut Engine, source: &str) -> String {
    let result = engine.eval(source, false);
    assert!(
        result.is_string(),
        "expected a string, got {:?} evaluating {:?}",
        result,
        source
    );
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
fn scenario_call_binds_this() {
    // function f(){return this.t} this.t=1; f.call({t:7})
    let mut engine = engine();
    let n = eval_number(
        &mut engine,
        "function f() { return this.t; } this.t = 1; f.call({ t: 7 })",
    );
    assert_eq!(n, 7.0);
}

#[test]
fn scenario_construct_returns_fresh_object() {
    // function A(){this.t=12} (new A()).t
    let mut engine = engine();
    let n = eval_number(&mut engine, "function A() { this.t = 12; } (new A()).t");
    assert_eq!(n, 12.0);
}

#[test]
fn scenario_bind_merges_arguments_after_hoisting() {
    // var b=f.bind({x:3},10); function f(a){return this.x+a} b(5)
    // Bound arguments come first, so f sees a === 10 and this.x === 3.
    let mut engine = engine();
    let n = eval_number(
        &mut engine,
        "var b = f.bind({ x: 3 }, 10); function f(a) { return this.x + a; } b(5)",
    );
    assert_eq!(n, 13.0);

    // The call-site argument is visible as the second parameter.
    let n = eval_number(
        &mut engine,
        "var b2 = g.bind({ x: 3 }, 10); function g(a, c) { return this.x + a + c; } b2(5)",
    );
    assert_eq!(n, 18.0);
}

#[test]
fn scenario_strict_arguments_assignment_is_parse_error() {
    // "use strict"; var x=1; function g(){arguments=2} g()
    let mut engine = engine();
    let result = engine.eval(
        "\"use strict\"; var x = 1; function g() { arguments = 2; } g()",
        false,
    );
    assert!(result.is_abrupt(), "strict assignment must fail at parse");
    let payload = result.abrupt_payload();
    let name = engine.get_property(payload, "name");
    assert_eq!(engine.get_string(name), "SyntaxError");
    engine.free_value(name);
    engine.free_value(result);
}

#[test]
fn scenario_try_catch_finally_runs_once() {
    // try{throw {m:"e"}}catch(e){e.m}finally{/*observed*/}
    let mut engine = engine();
    let text = eval_string(
        &mut engine,
        "var observed = 0; var got = ''; \
         try { throw { m: 'e' }; } catch (e) { got = e.m; } finally { observed++; } \
         got + observed",
    );
    assert_eq!(text, "e1");
}

#[test]
fn scenario_for_in_observes_throwing_getter() {
    // A throwing getter installed via defineProperty propagates out of
    // the for-in body that reads it.
    let mut engine = engine();
    let result = engine.eval(
        "var that = {}; \
         Object.defineProperty(that, 'k', { get: function () { throw 1; }, enumerable: true }); \
         var out; for (var k in that) { out = that[k]; } out",
        false,
    );
    assert!(result.is_abrupt(), "the getter's throw must propagate");
    assert_eq!(result.abrupt_payload(), Value::integer(1));
    engine.free_value(result);
}

// ----- quantified properties ---------------------------------------------

#[test]
fn property_strict_call_observes_this_exactly() {
    let mut engine = engine();
    assert_eq!(
        eval_string(
            &mut engine,
            "function f() { 'use strict'; return typeof this; } f.call(5)"
        ),
        "number",
    );
    assert!(eval_boolean(
        &mut engine,
        "function id() { 'use strict'; return this; } id.call(null) === null"
    ));
}

#[test]
fn property_function_length_is_stable() {
    let mut engine = engine();
    assert_eq!(
        eval_number(&mut engine, "function f(a, b) {} f.length + f.length"),
        4.0,
        "repeated reads are idempotent"
    );
    assert!(!eval_boolean(
        &mut engine,
        "function f(a, b) {} delete f.length"
    ));
    assert_eq!(eval_number(&mut engine, "function g(a, b, c) {} g.length"), 3.0);
}

#[test]
fn property_delete_non_configurable_keeps_property() {
    let mut engine = engine();
    assert!(!eval_boolean(
        &mut engine,
        "var o = {}; Object.defineProperty(o, 'p', { value: 1 }); delete o.p"
    ));
    assert_eq!(
        eval_number(
            &mut engine,
            "var o = {}; Object.defineProperty(o, 'p', { value: 1 }); delete o.p; o.p"
        ),
        1.0
    );
}

#[test]
fn property_enumeration_yields_each_name_once() {
    let mut engine = engine();
    let text = eval_string(
        &mut engine,
        "var o = { a: 1, b: 2, c: 3 }; var seen = {}; var out = ''; \
         for (var k in o) { if (seen[k]) { out = 'dup'; break; } seen[k] = true; out += k; } out",
    );
    assert_eq!(text, "abc");
}

#[test]
fn property_accessor_throw_propagates_from_assignment() {
    let mut engine = engine();
    let result = engine.eval(
        "var o = {}; Object.defineProperty(o, 'w', { set: function () { throw 'stop'; } }); \
         o.w = 1;",
        false,
    );
    assert!(result.is_abrupt());
    let payload = result.abrupt_payload();
    assert_eq!(engine.get_string(payload), "stop");
    engine.free_value(result);
}

// ----- broader behavior ---------------------------------------------------

#[test]
fn test_closures_capture_environments() {
    let mut engine = engine();
    let n = eval_number(
        &mut engine,
        "function make(start) { return function (n) { start += n; return start; }; } \
         var acc = make(10); acc(1); acc(2); acc(3)",
    );
    assert_eq!(n, 16.0);
}

#[test]
fn test_prototype_chain_through_constructor() {
    let mut engine = engine();
    let n = eval_number(
        &mut engine,
        "function Shape(n) { this.n = n; } \
         Shape.prototype.describe = function () { return this.n * 2; } \
         var s = new Shape(21); s.describe()",
    );
    assert_eq!(n, 42.0);
}

#[test]
fn test_exceptions_cross_frames() {
    let mut engine = engine();
    let text = eval_string(
        &mut engine,
        "function deep(n) { if (n === 0) { throw new RangeError('bottom'); } return deep(n - 1); } \
         var got = ''; try { deep(5); } catch (e) { got = e.name + ':' + e.message; } got",
    );
    assert_eq!(text, "RangeError:bottom");
}

#[test]
fn test_getter_setter_object_literals() {
    let mut engine = engine();
    let n = eval_number(
        &mut engine,
        "var backing = 1; \
         var o = { get v() { return backing; }, set v(x) { backing = x; } }; \
         o.v = 20; o.v + backing",
    );
    assert_eq!(n, 40.0);
}

#[test]
fn test_instanceof_through_bound_functions() {
    let mut engine = engine();
    assert!(eval_boolean(
        &mut engine,
        "function T() {} var B = T.bind(null); new B() instanceof T"
    ));
}

#[test]
fn test_global_this_is_global_object() {
    let mut engine = engine();
    assert!(eval_boolean(&mut engine, "var marker = 9; this.marker === 9"));
}

#[test]
fn test_uncaught_error_renders_with_name_and_message() {
    let mut engine = engine();
    let result = engine.eval("null.x", false);
    assert!(result.is_abrupt());
    let payload = result.abrupt_payload();
    let rendered = engine.to_display_string(payload);
    assert!(rendered.starts_with("TypeError"), "{}", rendered);
    engine.free_value(result);
}

#[test]
fn test_gc_survives_deep_script_structures() {
    let mut engine = engine();
    let n = eval_number(
        &mut engine,
        "var root = {}; var cursor = root; \
         for (var i = 0; i < 200; i++) { cursor.next = { index: i }; cursor = cursor.next; } \
         var count = 0; cursor = root; while (cursor.next) { count++; cursor = cursor.next; } count",
    );
    assert_eq!(n, 200.0);
    let reclaimed = engine.gc();
    // The chain is garbage after the completion value is dropped.
    let _ = reclaimed;
    let again = eval_number(&mut engine, "1 + 1");
    assert_eq!(again, 2.0);
}
