//! Minidb - the storage and transaction core of an educational relational
//! database.
//!
//! The crate provides durable storage of variable-length records with
//! multi-version concurrency control, pessimistic row locking with deadlock
//! detection, and write-ahead logging that recovers the store after
//! arbitrary crashes.
//!
//! # Architecture
//!
//! The system is organized into four layers:
//!
//! - **Transaction Manager** (`txn`): persistent per-transaction state
//!   (active / committed / aborted) in the XID file
//! - **Storage** (`storage`): the paged data file behind a reference-counted
//!   page cache, the free-space index, the write-ahead log, and crash
//!   recovery
//! - **MVCC** (`mvcc`): versioned records, snapshot-based visibility at two
//!   isolation levels, and the wait-for-graph lock table
//! - **Db facade** (`db`): wires the three managers over one storage prefix
//!
//! # Example
//!
//! ```rust,no_run
//! use minidb::{Db, IsolationLevel};
//!
//! let db = Db::create("demo", 64).unwrap();
//!
//! let xid = db.begin(IsolationLevel::ReadCommitted).unwrap();
//! let uid = db.insert(xid, b"Hello, World!").unwrap();
//! db.commit(xid).unwrap();
//!
//! let reader = db.begin(IsolationLevel::RepeatableRead).unwrap();
//! assert_eq!(db.read(reader, uid).unwrap().unwrap(), b"Hello, World!");
//! db.commit(reader).unwrap();
//!
//! db.close().unwrap();
//! ```

pub mod common;
pub mod db;
pub mod mvcc;
pub mod storage;
pub mod txn;

// Re-export commonly used types at the crate root
pub use common::{DbError, PageId, Result, Uid, Xid};
pub use db::Db;
pub use mvcc::IsolationLevel;
