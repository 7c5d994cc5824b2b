//! Row store boundary.
//!
//! The kernel reads and writes flat [`Record`](aggregraph_core::Record)s
//! through these traits and makes no assumption about the backing storage.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::{InMemoryRecordStore, TableSchema};
pub use r#trait::{RecordSource, RecordStore, RowOp};
