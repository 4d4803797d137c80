use axum::http::{HeaderMap, header::AUTHORIZATION};
use axum_extra::extract::CookieJar;
use secrecy::SecretString;

use crate::{
    app_error::{AppError, AppResult},
    application::jwt,
};

/// Cookie the identity provider's frontend SDK stores the session token in.
pub const SESSION_COOKIE: &str = "__session";

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// The bearer header wins over the cookie when both are present.
pub fn current_user_id(
    headers: &HeaderMap,
    jar: &CookieJar,
    secret: &SecretString,
) -> AppResult<String> {
    let token = match bearer_token(headers) {
        Some(token) => token.to_string(),
        None => jar
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .ok_or(AppError::InvalidCredentials)?,
    };
    let claims = jwt::verify(&token, secret)?;
    Ok(claims.sub)
}
