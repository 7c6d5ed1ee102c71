//! Clock and identifier helpers for ledger entries, diagnostics and receipts.
//!
//! Timestamps are whole seconds since the unix epoch followed by `Z`
//! (`1771220592Z`); they sort lexically within the same digit count and are
//! what the ledger stores in `approvedDate` and `last-modified`.

use std::time::{SystemTime, UNIX_EPOCH};
use ulid::Ulid;

/// Current time as `<seconds>Z`. A clock set before 1970 reads as `0Z`.
pub fn epoch_seconds_z() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{secs}Z")
}

/// Fresh ULID, used for diagnostic event ids, session ids and receipts.
pub fn event_id() -> String {
    Ulid::new().to_string()
}

/// Suffix for backup file names: `<seconds>Z-<ulid>`.
pub fn backup_stamp() -> String {
    format!("{}-{}", epoch_seconds_z(), event_id())
}
