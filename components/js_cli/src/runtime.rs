//! Runtime orchestration for the CLI.
//!
//! The [`Runtime`] owns one engine with the core built-in library
//! installed, registers the CLI host functions (`print`), and provides
//! the file/eval/snapshot entry points `main` dispatches to.

use crate::error::{CliError, CliResult};
use builtins::CoreBuiltins;
use bytecode_system::{disassemble, snapshot};
use core_types::Value;
use interpreter::{conversion, Context, Engine};
use serde::Serialize;

/// Snapshot header summary for `--snapshot-info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotSummary {
    /// Format version.
    pub version: u32,
    /// Compact-pointer width in bytes.
    pub pointer_width: u8,
    /// True when the root section is global-scope code.
    pub is_global: bool,
    /// Number of function sections.
    pub section_count: u32,
    /// Total buffer size in bytes.
    pub total_size: usize,
}

/// The CLI runtime: engine plus presentation options.
pub struct Runtime {
    engine: Engine,
    print_bytecode: bool,
    strict: bool,
}

impl Runtime {
    /// Creates a runtime with the core built-ins and the `print` host
    /// function installed.
    pub fn new() -> Self {
        let mut engine = Engine::with_provider(CoreBuiltins::new());
        let print = engine.create_external_function(print_handler);
        engine.set_global("print", print);
        engine.free_value(print);
        Runtime {
            engine,
            print_bytecode: false,
            strict: false,
        }
    }

    /// Enables byte-code listings before execution.
    pub fn with_print_bytecode(mut self, enabled: bool) -> Self {
        self.print_bytecode = enabled;
        self
    }

    /// Forces strict-mode compilation.
    pub fn with_strict(mut self, enabled: bool) -> Self {
        self.strict = enabled;
        self
    }

    /// Direct access to the engine.
    pub fn engine(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Executes a script file.
    pub fn execute_file(&mut self, path: &str) -> CliResult<Value> {
        let source = std::fs::read_to_string(path)?;
        self.execute_string(&source)
    }

    /// Compiles and executes source text.
    pub fn execute_string(&mut self, source: &str) -> CliResult<Value> {
        let code = self.engine.parse(source, self.strict)?;
        if self.print_bytecode {
            eprintln!("{}", disassemble(&code));
        }
        let result = self.engine.run(&code);
        if result.is_abrupt() {
            let payload = result.abrupt_payload();
            let rendered = self.engine.to_display_string(payload);
            self.engine.free_value(result);
            return Err(CliError::Script(rendered));
        }
        Ok(result)
    }

    /// Renders a result value for terminal output.
    pub fn render(&mut self, value: Value) -> String {
        self.engine.to_display_string(value)
    }

    /// Releases a value returned by an execute entry point.
    pub fn release(&mut self, value: Value) {
        self.engine.free_value(value);
    }

    /// Compiles `source` and writes a snapshot file; returns its size.
    pub fn save_snapshot(&mut self, source: &str, out_path: &str) -> CliResult<usize> {
        let bytes = self
            .engine
            .parse_and_save_snapshot(source, true, self.strict)?;
        std::fs::write(out_path, &bytes)?;
        Ok(bytes.len())
    }

    /// Executes a snapshot file.
    pub fn execute_snapshot_file(&mut self, path: &str) -> CliResult<Value> {
        let bytes = std::fs::read(path)?;
        let result = self.engine.exec_snapshot(&bytes, true);
        if result.is_abrupt() {
            let payload = result.abrupt_payload();
            let rendered = self.engine.to_display_string(payload);
            self.engine.free_value(result);
            return Err(CliError::Script(rendered));
        }
        Ok(result)
    }

    /// Reads a snapshot file's header summary.
    pub fn snapshot_info(&mut self, path: &str) -> CliResult<SnapshotSummary> {
        let bytes = std::fs::read(path)?;
        let info =
            snapshot::inspect(&bytes).map_err(|error| CliError::Snapshot(error.to_string()))?;
        Ok(SnapshotSummary {
            version: info.version,
            pointer_width: info.pointer_width,
            is_global: info.is_global,
            section_count: info.section_count,
            total_size: info.total_size,
        })
    }

    /// Renders a snapshot summary as text or JSON.
    pub fn render_snapshot_info(&self, info: &SnapshotSummary, json: bool) -> String {
        if json {
            serde_json::to_string_pretty(info).unwrap_or_else(|_| "{}".to_string())
        } else {
            format!(
                "snapshot version {} ({} sections, {} bytes, {}-byte pointers, {})",
                info.version,
                info.section_count,
                info.total_size,
                info.pointer_width,
                if info.is_global { "global" } else { "eval" },
            )
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new()
    }
}

/// The `print` host function: writes its arguments separated by
/// spaces, followed by a newline.
fn print_handler(ctx: &mut Context, _this: Value, args: &[Value]) -> Value {
    let mut pieces = Vec::with_capacity(args.len());
    for &arg in args {
        let string = conversion::to_string_value(ctx, arg);
        if string.is_abrupt() {
            return string;
        }
        pieces.push(ctx.string_text(string).to_string());
        ctx.heap.free_value(string);
    }
    println!("{}", pieces.join(" "));
    Value::UNDEFINED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_string_result() {
        let mut runtime = Runtime::new();
        let value = runtime.execute_string("6 * 7").unwrap();
        assert_eq!(runtime.render(value), "42");
        runtime.release(value);
    }

    #[test]
    fn test_execute_string_parse_error() {
        let mut runtime = Runtime::new();
        match runtime.execute_string("var = 1;") {
            Err(CliError::Parse(_)) => {}
            other => panic!("expected a parse error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_execute_string_script_error_rendered() {
        let mut runtime = Runtime::new();
        match runtime.execute_string("undefinedName") {
            Err(CliError::Script(rendered)) => {
                assert!(rendered.contains("ReferenceError"), "{}", rendered);
            }
            other => panic!("expected a script error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_strict_mode_flag() {
        let mut runtime = Runtime::new().with_strict(true);
        assert!(runtime.execute_string("with ({}) {}").is_err());
    }
}
