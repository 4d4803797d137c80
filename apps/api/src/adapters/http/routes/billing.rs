use axum::{
    Json, Router,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
};
use axum_extra::extract::CookieJar;
use serde::Serialize;

use crate::{
    adapters::http::{app_state::AppState, routes::billing_webhooks, session},
    app_error::AppResult,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/verify", post(verify_billing))
        .route("/portal", post(create_portal_session))
        .route("/webhook", post(billing_webhooks::handle_webhook))
}

/// POST /api/billing/verify
///
/// Called on app load. Reconciles the caller's billing record against Stripe
/// and reports how the subscription was found. Repeat calls inside the
/// cooldown are 429.
async fn verify_billing(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> AppResult<impl IntoResponse> {
    let user_id =
        session::current_user_id(&headers, &jar, &app_state.config.session_jwt_secret)?;
    app_state.throttle.claim_sync(&user_id).await?;

    let response = app_state
        .billing_sync_use_cases
        .sync_user(&user_id)
        .await?;

    Ok(Json(response))
}

#[derive(Serialize)]
struct PortalResponse {
    url: String,
}

/// POST /api/billing/portal
async fn create_portal_session(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> AppResult<impl IntoResponse> {
    let user_id =
        session::current_user_id(&headers, &jar, &app_state.config.session_jwt_secret)?;

    let url = app_state
        .billing_sync_use_cases
        .create_portal_session(&user_id, &app_state.config.portal_return_url)
        .await?;

    Ok(Json(PortalResponse { url }))
}
