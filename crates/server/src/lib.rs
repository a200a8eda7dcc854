//! HTTP chunk-reception and reassembly server for Hopper.
//!
//! This crate provides the HTTP surface:
//! - The upload orchestrator (chunked and whole-file paths)
//! - Entry guard (upload gate and anti-forgery tokens)
//! - The file persistence seam
//! - Background sweep of abandoned sessions
//! - Capability discovery and metrics

pub mod auth;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod persist;
pub mod routes;
pub mod state;
pub mod sweep;

pub use error::ApiError;
pub use persist::{FilePersister, LocalFilePersister, PersistCandidate};
pub use routes::create_router;
pub use state::{AppState, SessionLocks};
