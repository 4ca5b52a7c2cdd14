//! Engine integration: frames, collection, and the embedding surface
//! working together (no built-in library installed).

use core_types::Value;
use interpreter::{Context, Engine};

#[test]
fn test_recursion_and_frame_teardown() {
    let mut engine = Engine::new();
    let result = engine.eval(
        "function fib(n) { return n < 2 ? n : fib(n - 1) + fib(n - 2); } fib(12)",
        false,
    );
    assert_eq!(engine.get_number(result), 144.0);
    engine.free_value(result);
}

#[test]
fn test_collection_between_evals_keeps_globals() {
    let mut engine = Engine::new();
    let setup = engine.eval("var kept = { tag: 'still here' }; 0", false);
    engine.free_value(setup);

    engine.gc();

    let read = engine.eval("kept.tag", false);
    assert_eq!(engine.get_string(read), "still here");
    engine.free_value(read);
}

#[test]
fn test_collection_reclaims_cyclic_script_garbage() {
    let mut engine = Engine::new();
    // Self-referential objects survive the reference-counting fast
    // path when overwritten; only the tracing collector reclaims them.
    let result = engine.eval(
        "for (var i = 0; i < 50; i++) { var tmp = { index: i }; tmp.me = tmp; } 1",
        false,
    );
    engine.free_value(result);
    let reclaimed = engine.gc();
    assert!(reclaimed > 0, "cyclic loop garbage must be collected");
}

#[test]
fn test_host_function_reentry_into_script_values() {
    fn concat(ctx: &mut Context, _this: Value, args: &[Value]) -> Value {
        let mut text = String::new();
        for &arg in args {
            if arg.is_string() {
                text.push_str(ctx.string_text(arg));
            }
        }
        ctx.alloc_string(&text)
    }

    let mut engine = Engine::new();
    let func = engine.create_external_function(concat);
    engine.set_global("joinStrings", func);
    engine.free_value(func);

    let result = engine.eval("joinStrings('a', 'b', 'c')", false);
    assert_eq!(engine.get_string(result), "abc");
    engine.free_value(result);
}

#[test]
fn test_host_thrown_completion_is_catchable() {
    fn explode(ctx: &mut Context, _this: Value, _args: &[Value]) -> Value {
        ctx.throw_type_error("host says no")
    }

    let mut engine = Engine::new();
    let func = engine.create_external_function(explode);
    engine.set_global("explode", func);
    engine.free_value(func);

    let result = engine.eval(
        "var got = ''; try { explode(); } catch (e) { got = 'caught'; } got",
        false,
    );
    assert_eq!(engine.get_string(result), "caught");
    engine.free_value(result);
}

#[test]
fn test_acquired_values_survive_collection() {
    let mut engine = Engine::new();
    let created = engine.eval("({ answer: 42 })", false);
    assert!(created.is_object());
    let held = engine.acquire_value(created);
    engine.free_value(created);

    engine.gc();

    let answer = engine.get_property(held, "answer");
    assert_eq!(engine.get_number(answer), 42.0);
    engine.free_value(answer);
    engine.release_value(held);
}

#[test]
fn test_operand_stack_drains_after_errors() {
    let mut engine = Engine::new();
    for source in [
        "missingName",
        "null.x",
        "(function () { throw 1; })()",
        "var o = {}; o.a.b",
    ] {
        let result = engine.eval(source, false);
        assert!(result.is_abrupt(), "source: {}", source);
        engine.free_value(result);
    }
    // A later well-formed program still runs to completion.
    let ok = engine.eval("40 + 2", false);
    assert_eq!(engine.get_number(ok), 42.0);
    engine.free_value(ok);
}
