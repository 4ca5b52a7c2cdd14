//! The interactive REPL.

use crate::error::{CliError, CliResult};
use crate::runtime::Runtime;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

/// Runs the read-eval-print loop until end of input.
pub fn run(runtime: &mut Runtime) -> CliResult<()> {
    let mut editor =
        DefaultEditor::new().map_err(|error| CliError::Readline(error.to_string()))?;
    println!("Petrel JavaScript engine (type Ctrl-D to exit)");
    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(&line);
                match runtime.execute_string(&line) {
                    Ok(value) => {
                        let rendered = runtime.render(value);
                        runtime.release(value);
                        println!("{}", rendered);
                    }
                    Err(error) => eprintln!("{}", error),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => return Ok(()),
            Err(error) => return Err(CliError::Readline(error.to_string())),
        }
    }
}
