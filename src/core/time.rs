//! Shared timestamp, event-id, and deadline helpers.

use crate::core::error::DriftguardError;
use std::time::{Duration, Instant};
use ulid::Ulid;

/// Returns unix-epoch seconds with `Z` suffix (e.g. `1771220592Z`).
pub fn now_epoch_z() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{}Z", secs)
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// Wall-clock deadline for long-running operations.
///
/// Checked at item boundaries only (between tables, between files); a single
/// row mutation or file hash is never interrupted mid-flight.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn expires_in(d: Duration) -> Self {
        Self {
            at: Instant::now() + d,
        }
    }

    pub fn check(&self, operation: &str) -> Result<(), DriftguardError> {
        if Instant::now() >= self.at {
            Err(DriftguardError::DeadlineExceeded(operation.to_string()))
        } else {
            Ok(())
        }
    }
}

/// Deadline check for `Option<&Deadline>` call sites.
pub fn check_deadline(deadline: Option<&Deadline>, operation: &str) -> Result<(), DriftguardError> {
    match deadline {
        Some(d) => d.check(operation),
        None => Ok(()),
    }
}
