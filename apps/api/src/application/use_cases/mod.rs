pub mod billing_sync;
pub mod billing_writer;
pub mod subscription_lookup;
pub mod tier_resolver;
