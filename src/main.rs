mod cli_reporter;

use cli_reporter::CliReporter;
use ember::vm::Vm;
use rustyline::error::ReadlineError;
use rustyline::Editor;
use std::{env, fs, process};

const HELP_MSG: &str = "usage:
  ember [file]

Runs FILE if given, otherwise starts an interactive REPL.

  --help     print this message
  --version  print the version and exit
";

fn main() {
    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("--help") => println!("{} {}\n\n{HELP_MSG}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        Some("--version") => println!("{}", env!("CARGO_PKG_VERSION")),
        Some(path) => {
            if args.next().is_some() {
                eprintln!("unexpected extra argument");
                process::exit(exitcode::USAGE);
            }
            run_file(&path);
        }
        None => run_repl(),
    }
}

fn run_file(path: &str) {
    let source = fs::read_to_string(path).unwrap_or_else(|err| {
        eprintln!("couldn't read '{}': {}", path, err);
        process::exit(exitcode::IOERR);
    });

    let mut vm = Vm::new();
    apply_stress_gc_env(&vm);
    let mut reporter = CliReporter::new();
    match ember::interpret(&source, &mut vm, &mut reporter) {
        Ok(()) => process::exit(exitcode::OK),
        Err(()) if reporter.had_runtime_error => process::exit(exitcode::SOFTWARE),
        Err(()) => process::exit(exitcode::DATAERR),
    }
}

/// Forces a collection on every allocation when `EMBER_STRESS_GC` is set, so
/// heap bugs surface without needing to wait for `next_gc` to trip.
fn apply_stress_gc_env(vm: &Vm) {
    if env::var_os("EMBER_STRESS_GC").is_some() {
        vm.heap().stress.set(true);
    }
}

fn run_repl() {
    let mut rl = Editor::<()>::new();
    let mut vm = Vm::new();
    apply_stress_gc_env(&vm);
    loop {
        match rl.readline("> ") {
            Ok(line) => {
                rl.add_history_entry(line.as_str());
                let mut reporter = CliReporter::new();
                let _ = ember::interpret(&line, &mut vm, &mut reporter);
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("readline error: {}", err);
                break;
            }
        }
    }
}
