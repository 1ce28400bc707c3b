//! State management module for the Stratoform engine.
//!
//! This module provides persistent state storage for tracking applied
//! resources, scaling-group membership, and apply history.

mod store;
mod local;
mod lock;
mod types;

pub use store::StateStore;
pub use local::LocalStateStore;
pub use lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
pub use types::{
    ApplyHistoryEntry, ApplyOperation, GroupRecord, MemberRecord, ResourceRecord, TierState,
    STATE_VERSION,
};
