//! Resumable batch enrichment of text records through unreliable, paid
//! external collaborators.
//!
//! A [`Pipeline`](pipeline::Pipeline) selects disjoint work sets from an
//! item pool, runs each through a [`BatchRunner`](runner::BatchRunner) that
//! checkpoints after every batch, and picks up where it left off after a
//! crash.

pub mod classifier;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod record;
pub mod recovery;
pub mod report;
pub mod runner;
pub mod selection;
pub mod snapshot;
pub mod state_machine;

pub use error::{EnrichError, Fault, FaultKind, Result};
