//! Printing results for operators and for machines.

use std::path::Path;

use etl_rs_core::{EtlError, EtlResult};
use serde::Serialize;

use crate::command::CommandContext;

/// Prints `value` as JSON under `--json`, otherwise the text `human` builds.
pub fn emit<T: Serialize>(ctx: &CommandContext, value: &T, human: impl FnOnce() -> String) -> EtlResult<()> {
    if ctx.json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", human());
    }
    Ok(())
}

/// Prints the last failure reason and where the full report lives.
pub fn failure(code: &str, reason: &str, report: Option<&Path>) {
    eprintln!("error [{code}]: {reason}");
    if let Some(path) = report {
        eprintln!("report: {}", path.display());
    }
}

/// Prints an error that ended a command before it produced a result.
pub fn error(err: &EtlError, json: bool) {
    if json {
        let doc = serde_json::json!({
            "code": err.code(),
            "reason": err.reason(),
            "exit_code": err.exit_code(),
        });
        println!("{doc}");
    } else {
        failure(err.code(), &err.reason(), None);
    }
}
