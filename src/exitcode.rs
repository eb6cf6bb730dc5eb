//! Standard exit codes (BSD sysexits.h compatible)

/// Successful termination
pub const OK: i32 = 0;

/// Command line usage error
pub const USAGE: i32 = 64;

/// Data format error (bad plan, bad snapshot, unprocessable request)
pub const DATAERR: i32 = 65;

/// Cannot open input (template or repeater not found)
pub const NOINPUT: i32 = 66;

/// Service unavailable (a run is already in progress for the scope)
pub const UNAVAILABLE: i32 = 69;

/// Internal software error
pub const SOFTWARE: i32 = 70;

/// Input/output error
pub const IOERR: i32 = 74;

/// Permission denied (template owned by another organization)
pub const NOPERM: i32 = 77;

/// Configuration error
pub const CONFIG: i32 = 78;
