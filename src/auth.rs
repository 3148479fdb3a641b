use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::config::BasicCredentials;

const REALM_HEADER: &str = "Basic realm=Restricted";

/// Proof that the request carried the gateway's shared Basic credentials.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub user: String,
}

#[derive(Debug)]
pub struct Unauthorized;

impl IntoResponse for Unauthorized {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            [(WWW_AUTHENTICATE, REALM_HEADER)],
            "Unauthorized",
        )
            .into_response()
    }
}

impl<S> FromRequestParts<S> for BasicAuth
where
    Arc<BasicCredentials>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Unauthorized;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let expected = Arc::<BasicCredentials>::from_ref(state);
        let (user, password) = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_basic)
            .ok_or(Unauthorized)?;

        if credentials_match(&expected, &user, &password) {
            Ok(BasicAuth { user })
        } else {
            tracing::warn!(user = %user, "rejected basic auth credentials");
            Err(Unauthorized)
        }
    }
}

fn parse_basic(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

fn credentials_match(expected: &BasicCredentials, user: &str, password: &str) -> bool {
    let user_ok = expected.user.as_bytes().ct_eq(user.as_bytes());
    let password_ok = expected.password.as_bytes().ct_eq(password.as_bytes());
    (user_ok & password_ok).into()
}
