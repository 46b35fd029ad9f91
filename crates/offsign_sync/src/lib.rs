//! # OffSign Sync
//!
//! Background synchronization for OffSign: drains the offline submission
//! queue built by `offsign_core` against a remote endpoint, resolving
//! conflicts and surfacing progress as typed events.
//!
//! ## Design
//!
//! - [`SubmissionTransport`] is the seam to the network; production code
//!   implements it over its HTTP client, tests use [`MockEndpoint`]
//! - [`Connectivity`] is an injected watch-channel signal, so the engine
//!   never probes platform globals itself
//! - [`SyncManager`] runs at most one pass at a time over a queue
//!   snapshot; retry pacing is a fixed-interval sweep, with per-item
//!   exponential backoff computed for diagnostics only
//! - A submission that exhausts its retry ceiling stays queued and
//!   visible in the error list but is excluded from automatic passes
//!   until the user clears it

mod config;
mod connectivity;
mod error;
mod manager;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use connectivity::Connectivity;
pub use error::{SyncError, SyncResult};
pub use manager::{SkipReason, SyncManager, SyncReport, SyncState, SyncStats};
pub use transport::{
    ConflictInfo, DeliveryOutcome, MockEndpoint, ScriptedResponse, SubmissionRequest,
    SubmissionTransport,
};
