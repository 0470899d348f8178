//! `projectgate-core`: identifier and error primitives shared by every crate.
//!
//! This crate has no infrastructure concerns and no authorization logic.

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{OrganisationId, ProjectId, ResourceId, UserId};
