//! Membership storage.
//!
//! The in-memory store implements both halves of the membership contract: the
//! trusted [`MembershipBackend`](projectgate_auth::MembershipBackend) reads
//! consumed by effective-access resolution, and the
//! [`MembershipStore`](projectgate_auth::MembershipStore) mutations that
//! publish invalidation events.

pub mod in_memory;

pub use in_memory::{InMemoryMembershipStore, MembershipCounts};
