/// Size of a page in bytes (8 KB)
pub const PAGE_SIZE: usize = 8192;

/// Minimum number of pages the page cache must be allowed to hold.
/// Opening a database with a smaller capacity fails with `MemTooSmall`.
pub const MIN_CACHE_CAPACITY: usize = 10;

/// Suffix of the data file holding the pages
pub const DB_SUFFIX: &str = ".db";

/// Suffix of the transaction state file
pub const XID_SUFFIX: &str = ".xid";

/// Suffix of the write-ahead log file
pub const LOG_SUFFIX: &str = ".log";

/// How long a cache getter sleeps before retrying when another thread is
/// loading the same key
pub const CACHE_RETRY_SLEEP_MS: u64 = 1;
