use std::time::Duration;

// Default values for the configuration

/// Length of the plain frame header, in bytes.
/// stream_id (4) + seq (8) + closing (1)
pub const FRAME_HEADER_LEN: usize = 13;

/// Length of the record length prefix on the physical connection, in bytes.
pub const RECORD_PREFIX_LEN: usize = 4;

/// The maximum size of one obfuscated record, in bytes. (1MB)
pub const MAX_RECORD_LEN: usize = 1 << 20;

/// The default maximum payload carried by a single data frame, in bytes. (16KB)
pub const DEFAULT_MAX_FRAME_PAYLOAD: usize = 16384;
/// The minimum accepted payload limit for a data frame, in bytes.
pub const MIN_MAX_FRAME_PAYLOAD: usize = 64;

/// The default number of inbound streams waiting for `accept`.
pub const DEFAULT_ACCEPT_BACKLOG: usize = 1024;

/// Number of shards of the session stream table.
pub const STREAM_TABLE_SHARDS: usize = 16;

/// Session key length for the AEAD obfuscators.
pub const SESSION_KEY_LEN: usize = 32;

/// How long closing a session waits for each connection to flush.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
