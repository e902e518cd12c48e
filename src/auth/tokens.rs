// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HS256 access and refresh token issuance and verification.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use super::claims::{Claims, TokenKind};
use super::{AuthError, Role};
use crate::config::Config;

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// A signed token and its lifetime.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Access and refresh token issued together at login and refresh.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

/// Signs and verifies portal JWTs.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("issuer", &self.issuer)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(secret: &str, issuer: impl Into<String>, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.into(),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.jwt_secret,
            config.jwt_issuer.clone(),
            config.access_token_ttl,
            config.refresh_token_ttl,
        )
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Sign one token of `kind` for `user_id`.
    pub fn issue(
        &self,
        user_id: &str,
        role: Role,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, AuthError> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| AuthError::Internal(format!("token lifetime out of range: {e}")))?;
        let expires_at = now + ttl;
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            iat_ms: now.timestamp_millis(),
            exp: expires_at.timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
            typ: kind,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("token signing failed: {e}")))?;

        Ok(IssuedToken {
            token,
            token_id: claims.jti,
            expires_at,
        })
    }

    pub fn issue_pair(&self, user_id: &str, role: Role, now: DateTime<Utc>) -> Result<TokenPair, AuthError> {
        Ok(TokenPair {
            access: self.issue(user_id, role, TokenKind::Access, now)?,
            refresh: self.issue(user_id, role, TokenKind::Refresh, now)?,
        })
    }

    /// Verify signature, expiry, issuer and token kind.
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = CLOCK_SKEW_LEEWAY;
        validation.set_issuer(&[&self.issuer]);
        validation.validate_aud = false;

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken,
            })?
            .claims;

        if claims.typ != expected {
            return Err(AuthError::InvalidTokenType);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(
            "unit-test-secret",
            "dbt-portal",
            Duration::from_secs(3600),
            Duration::from_secs(7 * 24 * 3600),
        )
    }

    #[test]
    fn issued_access_token_verifies() {
        let svc = service();
        let issued = svc
            .issue("user_123", Role::FieldOfficer, TokenKind::Access, Utc::now())
            .unwrap();

        let claims = svc.verify(&issued.token, TokenKind::Access).unwrap();
        assert_eq!(claims.sub, "user_123");
        assert_eq!(claims.role, Role::FieldOfficer);
        assert_eq!(claims.jti, issued.token_id);
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let svc = service();
        let pair = svc.issue_pair("user_123", Role::Beneficiary, Utc::now()).unwrap();

        assert!(matches!(
            svc.verify(&pair.refresh.token, TokenKind::Access),
            Err(AuthError::InvalidTokenType)
        ));
        assert!(svc.verify(&pair.refresh.token, TokenKind::Refresh).is_ok());
        assert_ne!(pair.access.token_id, pair.refresh.token_id);
    }

    #[test]
    fn expired_token_is_rejected_after_leeway() {
        let svc = service();
        let issued_at = Utc::now() - chrono::Duration::hours(2);
        let issued = svc
            .issue("user_123", Role::Admin, TokenKind::Access, issued_at)
            .unwrap();

        assert!(matches!(
            svc.verify(&issued.token, TokenKind::Access),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let other = TokenService::new(
            "another-secret",
            "dbt-portal",
            Duration::from_secs(60),
            Duration::from_secs(60),
        );
        let issued = other
            .issue("user_123", Role::Admin, TokenKind::Access, Utc::now())
            .unwrap();

        assert!(matches!(
            service().verify(&issued.token, TokenKind::Access),
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(
            service().verify("not-a-jwt", TokenKind::Access),
            Err(AuthError::InvalidToken)
        ));
    }
}
