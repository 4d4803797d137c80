//! Operator tool: re-derive one user's billing state from Stripe.
//!
//! ```text
//! sync-billing <email>
//! ```
//!
//! Prints a JSON report and exits non-zero when no subscription was applied.

use std::process::ExitCode;

use dotenvy::dotenv;
use tally_api::{
    application::validators,
    infra::{
        config::{DatabaseConfig, IdentityConfig, StripeConfig, process_env},
        setup::{init_billing_use_cases, init_tracing},
    },
};

const USAGE: &str = "usage: sync-billing <email>";

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenv().ok();
    init_tracing();

    let mut args = std::env::args().skip(1);
    let (Some(email), None) = (args.next(), args.next()) else {
        eprintln!("{USAGE}");
        return Ok(ExitCode::from(2));
    };
    if !validators::is_valid_email(&email) {
        eprintln!("{USAGE}");
        return Ok(ExitCode::from(2));
    }

    let stripe = StripeConfig::from_source(&process_env)?;
    let identity = IdentityConfig::from_source(&process_env)?;
    let database = DatabaseConfig::from_source(&process_env)?;
    let use_cases = init_billing_use_cases(&stripe, &identity, &database).await?;

    let report = use_cases.manual_override(&email).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.succeeded() {
        tracing::info!(email = %report.email, tier = %report.tier, "Manual billing sync applied");
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::warn!(email = %report.email, message = %report.message, "Manual billing sync found nothing to apply");
        Ok(ExitCode::FAILURE)
    }
}
