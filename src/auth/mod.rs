use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::error::ErrorResponse;

/// HTTP Basic credentials guarding the admin surface.
pub struct AuthService {
    login: String,
    password: String,
}

impl AuthService {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }

    /// Check an `Authorization` header value.
    ///
    /// Both fields are always compared so timing does not reveal which one differed.
    pub fn validate_header(&self, value: &str) -> bool {
        let Some((login, password)) = decode_basic(value) else {
            return false;
        };

        let login_ok = login.as_bytes().ct_eq(self.login.as_bytes());
        let password_ok = password.as_bytes().ct_eq(self.password.as_bytes());
        (login_ok & password_ok).into()
    }
}

/// Split `Basic base64(login:password)` into its parts
fn decode_basic(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (login, password) = decoded.split_once(':')?;
    Some((login.to_string(), password.to_string()))
}

pub async fn auth_middleware(
    State(auth_service): State<Arc<AuthService>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .map(|value| auth_service.validate_header(value))
        .unwrap_or(false);

    if authorized {
        return next.run(request).await;
    }

    warn!(path = %request.uri().path(), "Rejected admin request");
    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: "invalid or missing credentials".to_string(),
        }),
    )
        .into_response();
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"admin\""),
    );
    response
}
