//! Storage backends for the Tinylink URL shortener.
//!
//! Every backend implements [`tinylink_core::Repository`]:
//!
//! - [`InMemoryRepository`] keeps links in process memory (development, tests).
//! - [`FileRepository`] adds an append-only journal replayed on startup.
//! - [`PostgresRepository`] stores links and ownership in PostgreSQL and
//!   soft-deletes through the batched [`purge`] pipeline.

pub mod file;
pub mod memory;
pub mod postgres;
pub mod purge;

pub use file::FileRepository;
pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;
pub use purge::{DeletionPipeline, PurgeConfig, PurgeStore};
pub use tinylink_core::{Error, Repository, StorageError};
