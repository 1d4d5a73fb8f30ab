//! Signed, time-bounded tokens carrying grants.
//!
//! Tokens are JWTs signed with an HMAC algorithm (HS256 by default). The
//! claims carry the subject, issuer, audience list, grants and a JWT id.
//! Verification checks the signature, expiry, issuer, audience and, when
//! requested, the subject. Every mismatch fails closed.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::auth::grants::{GrantTrie, check_grants};
use crate::clock::Clock;
use crate::config::AuthConfig;
use crate::error::{ConfigError, TokenError};

/// Claims as they appear inside the signed token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub jti: String,
    pub sub: String,
    pub iss: String,
    pub aud: Vec<String>,
    pub grants: Vec<String>,
    pub iat: i64,
    pub exp: i64,
}

/// An issued token. Never mutated; reissue instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub id: Uuid,
    pub subject: String,
    pub issuer: String,
    pub audience: Vec<String>,
    pub grants: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Expected claims for [`Token::verify`].
#[derive(Debug, Clone)]
pub struct VerifyOptions<'a> {
    pub issuer: &'a str,
    pub audience: &'a [String],
    pub subject: Option<&'a str>,
    /// Expiry is checked against this instant, with no leeway.
    pub now: DateTime<Utc>,
}

impl Token {
    pub fn to_claims(&self) -> TokenClaims {
        TokenClaims {
            jti: self.id.to_string(),
            sub: self.subject.clone(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            grants: self.grants.clone(),
            iat: self.created_at.timestamp(),
            exp: self.expires_at.timestamp(),
        }
    }

    fn from_claims(claims: TokenClaims) -> Result<Self, TokenError> {
        let id = Uuid::parse_str(&claims.jti)
            .map_err(|e| TokenError::Invalid(format!("bad jti: {e}")))?;
        let created_at = timestamp(claims.iat)?;
        let expires_at = timestamp(claims.exp)?;
        Ok(Self {
            id,
            subject: claims.sub,
            issuer: claims.iss,
            audience: claims.aud,
            grants: claims.grants,
            created_at,
            expires_at,
        })
    }

    /// Sign the token into its compact JWT form.
    pub fn sign(&self, secret: &SecretString, algorithm: Algorithm) -> Result<String, TokenError> {
        encode(
            &Header::new(algorithm),
            &self.to_claims(),
            &EncodingKey::from_secret(secret.expose_secret().as_bytes()),
        )
        .map_err(|e| TokenError::Issue(e.to_string()))
    }

    /// Decode and validate a raw token.
    pub fn verify(
        raw: &str,
        secret: &SecretString,
        algorithm: Algorithm,
        options: &VerifyOptions<'_>,
    ) -> Result<Self, TokenError> {
        let mut validation = Validation::new(algorithm);
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.set_issuer(&[options.issuer]);
        validation.set_audience(options.audience);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.sub = options.subject.map(str::to_string);

        let data = decode::<TokenClaims>(
            raw,
            &DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            &validation,
        )?;
        let token = Self::from_claims(data.claims)?;
        if token.is_expired_at(options.now) {
            return Err(TokenError::Expired);
        }
        Ok(token)
    }

    /// Whether this token's grants cover every required permission.
    pub fn check_grants<S: AsRef<str>>(&self, required: &[S]) -> bool {
        check_grants(&GrantTrie::new(&self.grants), required)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, TokenError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| TokenError::Invalid(format!("bad timestamp {secs}")))
}

/// Parse an algorithm name, accepting only the HMAC family.
pub fn parse_algorithm(name: &str) -> Result<Algorithm, ConfigError> {
    let algorithm = Algorithm::from_str(name).map_err(|e| ConfigError::InvalidValue {
        key: "token algorithm".into(),
        message: e.to_string(),
    })?;
    match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(algorithm),
        other => Err(ConfigError::InvalidValue {
            key: "token algorithm".into(),
            message: format!("{other:?} needs a key pair; only HMAC algorithms are supported"),
        }),
    }
}

/// Issues and verifies tokens with the configured secret and claims.
pub struct TokenIssuer {
    config: Arc<AuthConfig>,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    pub fn new(config: Arc<AuthConfig>, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    /// Issue a token for `subject`. Returns the token and its signed form.
    pub fn issue(
        &self,
        subject: &str,
        grants: Vec<String>,
    ) -> Result<(Token, String), TokenError> {
        let now = self.clock.now();
        let lifetime = Duration::from_std(self.config.token_lifetime)
            .map_err(|e| TokenError::Issue(format!("bad lifetime: {e}")))?;

        let token = Token {
            id: Uuid::new_v4(),
            subject: subject.to_string(),
            issuer: self.config.issuer.clone(),
            audience: self.config.audience.clone(),
            grants,
            created_at: now,
            expires_at: now + lifetime,
        };
        let raw = token.sign(&self.config.secret, self.config.algorithm)?;
        debug!(token_id = %token.id, subject, "Issued token");
        Ok((token, raw))
    }

    /// Verify a raw token against the configured issuer and audience.
    /// Expiry follows the issuer's clock.
    pub fn verify(&self, raw: &str, subject: Option<&str>) -> Result<Token, TokenError> {
        Token::verify(
            raw,
            &self.config.secret,
            self.config.algorithm,
            &VerifyOptions {
                issuer: &self.config.issuer,
                audience: &self.config.audience,
                subject,
                now: self.clock.now(),
            },
        )
    }
}
