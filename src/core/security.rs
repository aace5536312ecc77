//! Request identity.
//!
//! Authentication itself happens in front of this service; the gateway
//! forwards the authenticated user id in a header. When a shared API key is
//! configured the gateway must also present it.

use axum::http::HeaderMap;
use subtle::ConstantTimeEq;

use crate::core::config::settings::AuthSettings;
use crate::core::errors::ApiError;

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: String,
}

pub fn require_identity(headers: &HeaderMap, auth: &AuthSettings) -> Result<UserIdentity, ApiError> {
    if let Some(expected) = auth.api_key.as_deref().filter(|key| !key.is_empty()) {
        require_api_key(headers, expected)?;
    }

    let user_id = headers
        .get(auth.user_header.as_str())
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or("");

    if user_id.is_empty() {
        return Err(ApiError::Unauthorized);
    }

    Ok(UserIdentity {
        user_id: user_id.to_string(),
    })
}

fn require_api_key(headers: &HeaderMap, expected: &str) -> Result<(), ApiError> {
    let header_value = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if header_value.is_empty() {
        return Err(ApiError::Unauthorized);
    }

    if !bool::from(header_value.as_bytes().ct_eq(expected.as_bytes())) {
        return Err(ApiError::Unauthorized);
    }

    Ok(())
}
