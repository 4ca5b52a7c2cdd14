//! Petrel JavaScript engine CLI.
//!
//! Entry point of `petrel-js`: parses the command line and delegates
//! to the [`Runtime`].

use clap::Parser;
use core_types::Value;
use js_cli::{repl, Cli, CliError, Runtime};

fn main() {
    let cli = Cli::parse();
    let mut runtime = Runtime::new()
        .with_print_bytecode(cli.print_bytecode)
        .with_strict(cli.strict);

    let status = dispatch(&cli, &mut runtime);
    std::process::exit(status);
}

fn dispatch(cli: &Cli, runtime: &mut Runtime) -> i32 {
    if let Some(path) = &cli.snapshot_info {
        return match runtime.snapshot_info(path) {
            Ok(info) => {
                println!("{}", runtime.render_snapshot_info(&info, cli.json));
                0
            }
            Err(error) => report(error),
        };
    }

    if let Some(path) = &cli.exec_snapshot {
        return match runtime.execute_snapshot_file(path) {
            Ok(value) => finish_value(runtime, value),
            Err(error) => report(error),
        };
    }

    if let Some(out_path) = &cli.save_snapshot {
        let source = match read_input(cli) {
            Ok(Some(source)) => source,
            Ok(None) => {
                eprintln!("Error: --save-snapshot needs a file or --eval input");
                return 1;
            }
            Err(error) => return report(error),
        };
        return match runtime.save_snapshot(&source, out_path) {
            Ok(size) => {
                println!("wrote {} ({} bytes)", out_path, size);
                0
            }
            Err(error) => report(error),
        };
    }

    if let Some(file) = &cli.file {
        return match runtime.execute_file(file) {
            Ok(value) => finish_value(runtime, value),
            Err(error) => report(error),
        };
    }

    if let Some(code) = &cli.eval {
        return match runtime.execute_string(code) {
            Ok(value) => finish_value(runtime, value),
            Err(error) => report(error),
        };
    }

    if cli.repl {
        return match repl::run(runtime) {
            Ok(()) => 0,
            Err(error) => report(error),
        };
    }

    println!("Petrel JavaScript engine");
    println!();
    println!("Usage:");
    println!("  petrel-js <FILE>                 Execute a script file");
    println!("  petrel-js --eval <CODE>          Evaluate inline source");
    println!("  petrel-js --repl                 Start the interactive REPL");
    println!("  petrel-js --save-snapshot <OUT>  Compile input to a snapshot");
    println!("  petrel-js --exec-snapshot <F>    Execute a snapshot file");
    println!("  petrel-js --snapshot-info <F>    Inspect a snapshot header");
    println!();
    println!("Run 'petrel-js --help' for all options.");
    0
}

fn read_input(cli: &Cli) -> Result<Option<String>, CliError> {
    if let Some(file) = &cli.file {
        return Ok(Some(std::fs::read_to_string(file)?));
    }
    Ok(cli.eval.clone())
}

fn finish_value(runtime: &mut Runtime, value: Value) -> i32 {
    if !value.is_undefined() {
        let rendered = runtime.render(value);
        println!("{}", rendered);
    }
    runtime.release(value);
    0
}

fn report(error: CliError) -> i32 {
    eprintln!("Error: {}", error);
    1
}
