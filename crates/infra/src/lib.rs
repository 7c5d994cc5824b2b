//! Persistence layer: record stores, deep fetch, diff-and-cascade persist.
//!
//! - [`record_store`]: flat row storage behind an atomic batch `apply`
//! - [`fetcher`]: rebuilds an aggregate graph from rows
//! - [`persister`]: diffs a submitted graph against the stored one and emits
//!   row mutations plus lifecycle events
//! - [`repository`]: the public facade tying both to a store and a bus

pub mod config;
pub mod fetcher;
pub mod persister;
pub mod provider;
pub mod record_store;
pub mod repository;

#[cfg(test)]
mod fixtures;

pub use config::RepositoryConfig;
pub use fetcher::{BackReference, FetchContext, FetchResult, GraphFetcher};
pub use persister::{PersistPhase, Persister};
pub use provider::{ForeignKeyLookup, ProviderRegistry, RecordProvider};
pub use record_store::{InMemoryRecordStore, RecordSource, RecordStore, RowOp, TableSchema};
pub use repository::AggregateRepository;
