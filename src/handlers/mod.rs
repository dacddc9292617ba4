pub mod health;
pub mod orders;
pub mod wallets;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::ApiError;

/// Caller identity, taken from the `x-participant-id` header set by the
/// upstream auth gateway. This service trusts the gateway; there is no
/// token handling here.
#[derive(Debug, Clone, Copy)]
pub struct ParticipantId(pub i64);

const PARTICIPANT_HEADER: &str = "x-participant-id";

impl<S> FromRequestParts<S> for ParticipantId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(PARTICIPANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ApiError::Unauthorized(format!("missing {PARTICIPANT_HEADER} header"))
            })?;

        let id: i64 = raw.parse().map_err(|_| {
            ApiError::Unauthorized(format!("invalid {PARTICIPANT_HEADER} header"))
        })?;

        Ok(ParticipantId(id))
    }
}
