//! services/client/src/sync/mod.rs
//!
//! The synchronization layer between the remote real-time store and local state:
//! the readiness gate, the profile and schedule synchronizers, and the coordinator
//! that re-keys all of them whenever the auth session changes.

pub mod coordinator;
pub mod gate;
pub mod profile;
pub mod schedule;

pub use coordinator::SessionCoordinator;
pub use gate::{GateState, OpenReason, ReadinessGate};
pub use profile::{MutationState, ProfileSync};
pub use schedule::ScheduleSync;

use study_sync_core::ports::PortError;

/// Failures surfaced by synchronizer operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The operation needs a signed-in user.
    #[error("No active session")]
    NoSession,

    /// Rejected before any remote call was made.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// The write failed and the optimistic local change was reverted.
    #[error("Changes could not be saved and were reverted: {0}")]
    RolledBack(PortError),

    /// The remote call failed; local state was left as it was.
    #[error("Remote operation failed: {0}")]
    Port(#[from] PortError),
}
