#![forbid(unsafe_code)]

//! SQLite backend for the sift analysis coordination engine. One database
//! file in WAL mode is the cross-process substrate: locks, request
//! tracking, work queues, the result cache, the module catalog and root
//! documents are all tables, and transactions provide the atomic
//! acquire/claim semantics the contracts require.

mod store;

pub use store::{SqliteStore, StoreError};
