pub mod billing_record;
pub mod invoice_status;
pub mod price_tier_table;
pub mod subscription_status;
