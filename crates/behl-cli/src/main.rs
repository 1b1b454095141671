//! Command-line runner for `behl` scripts: a file runner, an `-e <source>`
//! inline-source flag, and a `--repl` interactive loop. `argv` is parsed by
//! hand (`std::env::args`) rather than with `clap`, matching the rest of
//! this workspace's preference for a hand-written pipeline over a generic
//! framework for a handful of flags.

use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use behl::{Engine, EngineConfig, ScriptError};

enum Mode {
    RunFile(String),
    Inline(String),
    Repl,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Mode, String> {
    let _argv0 = args.next();
    let mut mode = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-e" => {
                let source = args.next().ok_or("-e requires a source string")?;
                mode = Some(Mode::Inline(source));
            }
            "--repl" => mode = Some(Mode::Repl),
            "-h" | "--help" => return Err(usage()),
            path if mode.is_none() => mode = Some(Mode::RunFile(path.to_string())),
            other => return Err(format!("unexpected argument '{other}'\n{}", usage())),
        }
    }
    mode.ok_or_else(usage)
}

fn usage() -> String {
    "usage: behl <file.behl> | behl -e <source> | behl --repl".to_string()
}

fn main() -> ExitCode {
    let mode = match parse_args(std::env::args()) {
        Ok(mode) => mode,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };

    let mut engine = Engine::new(EngineConfig::default());

    match mode {
        Mode::RunFile(path) => match engine.run_file(&path) {
            Ok(value) => {
                print_result(&mut engine, value);
                ExitCode::SUCCESS
            }
            Err(err) => {
                report(&err);
                ExitCode::FAILURE
            }
        },
        Mode::Inline(source) => match engine.eval(&source, "<command-line>") {
            Ok(value) => {
                print_result(&mut engine, value);
                ExitCode::SUCCESS
            }
            Err(err) => {
                report(&err);
                ExitCode::FAILURE
            }
        },
        Mode::Repl => run_repl(&mut engine),
    }
}

fn print_result(engine: &mut Engine, value: behl::Value) {
    if matches!(value, behl::Value::Nil) {
        return;
    }
    match engine.vm().display_string(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("error formatting result: {e}"),
    }
}

fn report(err: &ScriptError) {
    eprint!("{err}");
}

fn run_repl(engine: &mut Engine) -> ExitCode {
    println!("behl REPL (core, math built in). Ctrl-D to exit.");
    let stdin = io::stdin();
    let mut input_id = 0u32;
    loop {
        print!("> ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                println!();
                return ExitCode::SUCCESS;
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("error reading input: {e}");
                return ExitCode::FAILURE;
            }
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let filename = format!("<repl-{input_id}>");
        input_id += 1;
        match engine.eval(&wrap_as_return(trimmed), &filename) {
            Ok(value) => print_result(engine, value),
            Err(_) => match engine.eval(trimmed, &filename) {
                Ok(value) => print_result(engine, value),
                Err(err) => report(&err),
            },
        }
    }
}

/// A bare expression like `1 + 2` isn't a valid statement on its own; try it
/// as an implicit `return` first and fall back to the raw line (statements,
/// declarations) if that doesn't parse.
fn wrap_as_return(line: &str) -> String {
    if line.ends_with(';') || line.ends_with('}') {
        line.to_string()
    } else {
        format!("return {line};")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_file_mode() {
        let args = ["behl", "script.behl"].into_iter().map(str::to_string);
        assert!(matches!(parse_args(args).unwrap(), Mode::RunFile(p) if p == "script.behl"));
    }

    #[test]
    fn parses_inline_mode() {
        let args = ["behl", "-e", "return 1;"].into_iter().map(str::to_string);
        assert!(matches!(parse_args(args).unwrap(), Mode::Inline(s) if s == "return 1;"));
    }

    #[test]
    fn parses_repl_mode() {
        let args = ["behl", "--repl"].into_iter().map(str::to_string);
        assert!(matches!(parse_args(args).unwrap(), Mode::Repl));
    }

    #[test]
    fn missing_mode_is_an_error() {
        let args = ["behl"].into_iter().map(str::to_string);
        assert!(parse_args(args).is_err());
    }
}
