//! Output helpers shared by all subcommands.
//!
//! Global flags are carried in environment variables so any module can check
//! them without threading a context struct through every call.

use serde::Serialize;

/// Whether `--json` was passed.
pub fn is_json() -> bool {
    std::env::var("CHEQUEFLOW_JSON").is_ok_and(|v| v == "1")
}

/// Whether `--quiet` was passed.
pub fn is_quiet() -> bool {
    std::env::var("CHEQUEFLOW_QUIET").is_ok_and(|v| v == "1")
}

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("  Error serializing output: {err}"),
    }
}
