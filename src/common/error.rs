use thiserror::Error;

use super::types::Xid;

/// Database error types
#[derive(Error, Debug)]
pub enum DbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Page cache is full")]
    CacheFull,

    #[error("Page cache capacity {got} is below the minimum of 10 pages")]
    MemTooSmall { got: usize },

    #[error("Record of {size} bytes does not fit in a page (max {max})")]
    DataTooLarge { size: usize, max: usize },

    #[error("No page with enough free space available")]
    DatabaseBusy,

    #[error("Lock request would deadlock")]
    Deadlock,

    #[error("Concurrent update conflict, transaction aborted")]
    ConcurrentUpdate,

    #[error("Entry backed by an invalid data item")]
    NullEntry,

    #[error("Corrupt transaction state file")]
    BadXidFile,

    #[error("Corrupt write-ahead log file")]
    BadLogFile,

    #[error("Transaction {0} is not active")]
    TransactionNotFound(Xid),
}

pub type Result<T> = std::result::Result<T, DbError>;
