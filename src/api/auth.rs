//! Bearer-token authentication extractor and authorization helpers.

use crate::error::ApiError;
use crate::types::{AuthPrincipal, UserRole};
use crate::AppState;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use base64::Engine;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct TokenClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    services: Vec<String>,
    #[serde(default)]
    can_ingest: bool,
}

/// Decode a claims token: base64url(JSON), optionally `dev.`-prefixed,
/// tolerant of missing padding.
pub fn decode_claims_token(token: &str) -> Result<AuthPrincipal, ApiError> {
    let raw = token.strip_prefix("dev.").unwrap_or(token);
    let trimmed = raw.trim_end_matches('=');
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(trimmed.as_bytes())
        .map_err(|e| ApiError::Unauthenticated(format!("invalid auth token: {e}")))?;
    let claims: TokenClaims = serde_json::from_slice(&decoded)
        .map_err(|e| ApiError::Unauthenticated(format!("invalid auth token: {e}")))?;
    Ok(AuthPrincipal {
        subject: claims.sub.unwrap_or_else(|| "unknown".to_string()),
        role: claims
            .role
            .as_deref()
            .map(UserRole::from_claim)
            .unwrap_or(UserRole::Viewer),
        services: claims.services,
        can_ingest: claims.can_ingest,
    })
}

impl FromRequestParts<Arc<AppState>> for AuthPrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if !state.settings.auth_enabled {
            return Ok(AuthPrincipal::dev_admin());
        }

        let token = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::Unauthenticated("missing bearer token".to_string()))?;

        if let Some(shared) = &state.settings.auth_shared_token {
            if token == shared {
                return Ok(AuthPrincipal::shared_token_admin());
            }
        }

        decode_claims_token(token)
    }
}

/// Service-scoped ACL: admins see everything; everyone else needs the
/// incident's service in their claim set (or `*`).
pub fn authorize_service(principal: &AuthPrincipal, service: &str) -> Result<(), ApiError> {
    if principal.allows_service(service) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!(
            "forbidden for service={service}"
        )))
    }
}

/// Ingest endpoints require `role=admin` or the `can_ingest` claim.
pub fn require_ingest(principal: &AuthPrincipal) -> Result<(), ApiError> {
    if principal.allows_ingest() {
        Ok(())
    } else {
        Err(ApiError::Forbidden("ingest permission required".to_string()))
    }
}

/// Admin-only endpoints (data purge).
pub fn require_admin(principal: &AuthPrincipal) -> Result<(), ApiError> {
    if principal.role == UserRole::Admin {
        Ok(())
    } else {
        Err(ApiError::Forbidden("admin role required".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_claims(claims: &serde_json::Value) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(claims.to_string().as_bytes())
    }

    #[test]
    fn test_decode_claims_token() {
        let token = encode_claims(&serde_json::json!({
            "sub": "viewer-a",
            "role": "viewer",
            "services": ["payments-api"],
            "can_ingest": false,
        }));
        let principal = decode_claims_token(&token).expect("decode");
        assert_eq!(principal.subject, "viewer-a");
        assert_eq!(principal.role, UserRole::Viewer);
        assert_eq!(principal.services, vec!["payments-api"]);
        assert!(!principal.can_ingest);
    }

    #[test]
    fn test_decode_with_dev_prefix_and_padding() {
        let raw = encode_claims(&serde_json::json!({"sub": "r", "role": "responder"}));
        let padded = format!("dev.{raw}==");
        let principal = decode_claims_token(&padded).expect("decode");
        assert_eq!(principal.role, UserRole::Responder);
    }

    #[test]
    fn test_garbage_token_is_unauthenticated() {
        assert!(matches!(
            decode_claims_token("!!!not-base64!!!"),
            Err(ApiError::Unauthenticated(_))
        ));
    }

    #[test]
    fn test_unknown_role_becomes_viewer() {
        let token = encode_claims(&serde_json::json!({"sub": "x", "role": "root"}));
        let principal = decode_claims_token(&token).expect("decode");
        assert_eq!(principal.role, UserRole::Viewer);
    }

    #[test]
    fn test_authorization_helpers() {
        let viewer = AuthPrincipal {
            subject: "v".into(),
            role: UserRole::Viewer,
            services: vec!["checkout-api".into()],
            can_ingest: false,
        };
        assert!(authorize_service(&viewer, "checkout-api").is_ok());
        assert!(authorize_service(&viewer, "payments-api").is_err());
        assert!(require_ingest(&viewer).is_err());
        assert!(require_admin(&viewer).is_err());
        assert!(require_admin(&AuthPrincipal::dev_admin()).is_ok());
    }
}
