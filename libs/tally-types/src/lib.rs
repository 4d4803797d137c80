//! Shared billing types for Tally services.
//!
//! This crate provides:
//! - Access tier, plan and billing status enums
//! - The typed billing metadata mirrored into the identity provider
//! - API response types for the billing sync endpoint

mod errors;
mod metadata;
mod responses;
mod tier;

pub use errors::{ErrorCode, ParseEnumError};
pub use metadata::BillingMetadata;
pub use responses::{SyncMethod, SyncReason, SyncResponse};
pub use tier::{BillingStatus, Plan, Tier};
