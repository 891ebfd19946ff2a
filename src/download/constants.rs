//! Constants for the download module (timeouts, relay sizing, defaults).

use std::time::Duration;

/// Default per-request timeout (100 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(100);

/// Default number of retries granted to a probe or a segment request.
pub const DEFAULT_TIMEOUT_RETRIES: u32 = 3;

/// Default linear backoff increment (1 second per consumed retry).
pub const DEFAULT_BACKOFF_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of segments for range-addressable resources.
pub const DEFAULT_SEGMENTS_PER_FILE: usize = 4;

/// Default cap on concurrent connections across the whole process.
pub const DEFAULT_CONNECTION_LIMIT: usize = 10;

/// Number of network chunks a segment relay buffers before the producer waits.
pub const RELAY_CAPACITY: usize = 16;

/// Prefix of segment scratch files.
pub const SCRATCH_PREFIX: &str = "multidownloader-segment-";
