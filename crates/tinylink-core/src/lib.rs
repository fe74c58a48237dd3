//! Core types and traits for the Tinylink URL shortener.
//!
//! This crate provides the short code codec, the repository contract every
//! storage backend implements, and the error taxonomy shared by backends and
//! adapters.

pub mod base62;
pub mod deletion;
pub mod error;
pub mod repository;
pub mod shortcode;

pub use deletion::{DeletionNotifier, DeletionOutcome, DeletionTicket};
pub use error::{CodecError, Error, Result, StorageError};
pub use repository::{BatchItem, BatchResult, Repository, SaveOutcome, SaveStatus, UserLink};
pub use shortcode::ShortCode;
