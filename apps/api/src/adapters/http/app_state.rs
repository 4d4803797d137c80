use std::sync::Arc;

use crate::{
    application::use_cases::billing_sync::BillingSyncUseCases,
    infra::{RequestThrottle, config::HttpConfig},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<HttpConfig>,
    pub billing_sync_use_cases: Arc<BillingSyncUseCases>,
    pub throttle: Arc<dyn RequestThrottle>,
}
