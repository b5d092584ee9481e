// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since UNIX epoch.
pub type Timestamp = u64;

/// Sentinel expiration of an access control entry which never expires.
///
/// Chosen to fit into a signed 64-bit integer column.
pub const NEVER_EXPIRES: Timestamp = i64::MAX as u64;

/// Current system time in milliseconds since UNIX epoch.
pub fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is not behind")
        .as_millis() as Timestamp
}
