//! Operator identity middleware
//!
//! Identity is issued elsewhere; this only verifies the HS256 bearer token
//! and records who is acting.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{AppError, ErrorResponse};
use crate::AppState;

/// The operator behind a request
#[derive(Clone, Debug)]
pub struct Operator {
    pub user_id: Uuid,
    pub name: Option<String>,
}

impl Operator {
    /// Name shown in logs, falling back to the operator id
    pub fn label(&self) -> String {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.user_id.to_string())
    }
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    exp: i64,
    iat: i64,
}

fn decode_operator(token: &str, secret: &str) -> Result<Operator, AppError> {
    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| AppError::Unauthorized(format!("Invalid token: {}", e)))?;

    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| AppError::Unauthorized("Invalid operator ID in token".to_string()))?;

    Ok(Operator {
        user_id,
        name: claims.name,
    })
}

/// Issue a token the middleware accepts. Used by tooling and tests.
pub fn encode_operator_token(
    operator: &Operator,
    secret: &str,
    ttl: Duration,
) -> Result<String, AppError> {
    let now = Utc::now();
    let claims = Claims {
        sub: operator.user_id.to_string(),
        name: operator.name.clone(),
        exp: (now + ttl).timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Token encoding failed: {}", e)))
}

/// Validate the bearer token and attach the [`Operator`] to the request
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
    {
        Some(token) => token.to_string(),
        None => {
            return AppError::Unauthorized("Missing or invalid Authorization header".to_string())
                .into_response()
        }
    };

    match decode_operator(&token, &state.config.jwt.secret) {
        Ok(operator) => {
            // Service logs inside the request inherit who is acting
            let span = tracing::info_span!(
                "operator",
                operator_id = %operator.user_id,
                operator_name = %operator.label(),
            );
            tracing::debug!(parent: &span, "operator authenticated");
            request.extensions_mut().insert(operator);
            next.run(request).instrument(span).await
        }
        Err(err) => err.into_response(),
    }
}

/// Extractor for the authenticated operator
#[derive(Clone, Debug)]
pub struct CurrentOperator(pub Operator);

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for CurrentOperator
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Operator>()
            .cloned()
            .map(CurrentOperator)
            .ok_or_else(|| {
                let err = AppError::Unauthorized("Authentication required".to_string());
                (
                    StatusCode::UNAUTHORIZED,
                    Json(ErrorResponse {
                        error: err.detail(),
                    }),
                )
            })
    }
}
