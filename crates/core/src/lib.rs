//! `sibyl-core` — domain foundation for the question-answering pipeline.
//!
//! This crate contains **pure domain** primitives (no IO, no runtime): the
//! job record and its state machine, retrieved-passage types, and the
//! domain-level error taxonomy. Infrastructure concerns (stores, channels,
//! adapters) live in `sibyl-infra`.

pub mod error;
pub mod id;
pub mod job;
pub mod passage;

pub use error::{DomainError, DomainResult};
pub use id::JobId;
pub use job::{Job, JobStatus, SourceRef, validate_question};
pub use passage::{Passage, RetrievalMethod};
