//! External command invocation for regenerate/reingest hooks.
//!
//! Commands are opaque argv vectors supplied by configuration. The outcome is
//! captured (exit code, output tails) and returned; the caller decides whether
//! a failure matters. Nothing here blocks longer than the child process runs.

use crate::core::error::DriftguardError;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;

/// Bytes of stdout/stderr retained per invocation, enough for diagnostics
/// without unbounded event rows.
const OUTPUT_TAIL_BYTES: usize = 4096;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExternalOutcome {
    pub event_id: String,
    pub command: Vec<String>,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout_tail: String,
    pub stderr_tail: String,
}

fn tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let start = text.len().saturating_sub(OUTPUT_TAIL_BYTES);
    // Keep the tail on a char boundary.
    let mut start = start;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

/// Spawn `argv` in `cwd` and wait for it, capturing output.
///
/// Returns `Err` only when the process cannot be spawned at all; a nonzero
/// exit is a normal `ExternalOutcome` with `success == false`.
pub fn run_command(argv: &[String], cwd: &Path) -> Result<ExternalOutcome, DriftguardError> {
    let (program, args) = argv.split_first().ok_or_else(|| {
        DriftguardError::ValidationError("external command is empty".to_string())
    })?;

    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .output()
        .map_err(DriftguardError::IoError)?;

    Ok(ExternalOutcome {
        event_id: time::new_event_id(),
        command: argv.to_vec(),
        exit_code: output.status.code(),
        success: output.status.success(),
        stdout_tail: tail(&output.stdout),
        stderr_tail: tail(&output.stderr),
    })
}
