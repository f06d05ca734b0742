//! Garnet CLI: compile and execute `.gr` script files.

use std::env;
use std::fs;
use std::process;
use std::rc::Rc;

use garnet::bytecode::CompilerOptions;
use garnet::error::{reporter, GarnetError, RuntimeErrorKind, SourceInfo};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const EXIT_ERROR: i32 = 1;
const EXIT_RUNTIME_ERROR: i32 = 2;
const EXIT_ASSERTION_FAILED: i32 = 3;

/// CLI options parsed from arguments.
struct Options {
    script: String,
    /// Arguments after the script path, forwarded to the program.
    #[allow(dead_code)]
    script_args: Vec<String>,
    verbose: bool,
    warnings_error: bool,
}

fn print_usage() {
    eprintln!("Garnet {} - the Garnet interpreter", VERSION);
    eprintln!();
    eprintln!("Usage: garnet [options] script.gr [script-args...]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -h, --help             Show this help message and exit");
    eprintln!("  -V, --version          Print version information and exit");
    eprintln!("  -v, --verbose          Print timing, disassembly, and warnings");
    eprintln!("  -we, --warnings-error  Promote warnings to errors");
    eprintln!();
    eprintln!("Arguments after the script path are forwarded to the program.");
}

fn parse_args() -> Options {
    let args: Vec<String> = env::args().skip(1).collect();

    let mut script = None;
    let mut script_args = Vec::new();
    let mut verbose = false;
    let mut warnings_error = false;

    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        if script.is_some() {
            // Everything after the script path belongs to the script
            script_args.push(arg.clone());
        } else {
            match arg.as_str() {
                "-h" | "--help" => {
                    print_usage();
                    process::exit(0);
                }
                "-V" | "--version" => {
                    println!("Garnet {}", VERSION);
                    process::exit(0);
                }
                "-v" | "--verbose" => verbose = true,
                "-we" | "--warnings-error" => warnings_error = true,
                flag if flag.starts_with('-') => {
                    eprintln!("Unknown option: {}", flag);
                    eprintln!();
                    print_usage();
                    process::exit(EXIT_ERROR);
                }
                path => {
                    if !path.ends_with(".gr") {
                        eprintln!("Expected a .gr script file, got '{}'", path);
                        process::exit(EXIT_ERROR);
                    }
                    script = Some(path.to_string());
                }
            }
        }
        i += 1;
    }

    let Some(script) = script else {
        print_usage();
        process::exit(EXIT_ERROR);
    };

    Options {
        script,
        script_args,
        verbose,
        warnings_error,
    }
}

fn main() {
    let options = parse_args();

    let source = match fs::read_to_string(&options.script) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Could not read file '{}': {}", options.script, e);
            process::exit(EXIT_ERROR);
        }
    };

    let source_info = SourceInfo::new(options.script.clone(), &source);
    let compiler_options = CompilerOptions {
        verbose: options.verbose,
        warnings_error: options.warnings_error,
    };

    match garnet::run(&source, Rc::clone(&source_info), compiler_options) {
        Ok(()) => {}
        Err(GarnetError::Compile(e)) => {
            eprintln!("{}", e);
            eprintln!("Terminating process due to compilation errors.");
            process::exit(EXIT_ERROR);
        }
        Err(GarnetError::Runtime(e)) => {
            reporter::print_runtime_error(&e, &source_info);
            let code = if e.kind == RuntimeErrorKind::AssertionFailed {
                EXIT_ASSERTION_FAILED
            } else {
                EXIT_RUNTIME_ERROR
            };
            process::exit(code);
        }
        Err(GarnetError::Io(e)) => {
            eprintln!("IO error: {}", e);
            process::exit(EXIT_ERROR);
        }
    }
}
