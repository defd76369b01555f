//! JWT token generation and validation
//!
//! Implements access/refresh tokens with HMAC-SHA256 signing.
//! Every token carries its kind (`access` or `refresh`); callers must check
//! the kind explicitly, the codec only verifies signature, issuer and expiry.

use checkin_core::AuthConfig;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Token kind marker embedded in the claims
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Access => write!(f, "access"),
            TokenKind::Refresh => write!(f, "refresh"),
        }
    }
}

/// JWT Claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Token issuer
    pub iss: String,
    /// Subject - principal ID
    pub sub: String,
    /// JWT ID - keeps tokens issued within the same second distinct
    pub jti: String,
    /// Issued at timestamp (Unix epoch)
    pub iat: u64,
    /// Expiration timestamp (Unix epoch)
    pub exp: u64,
    /// Principal's role at issuance time
    pub role: String,
    /// Access or refresh
    pub token_type: TokenKind,
}

impl Claims {
    /// Parse the subject as a principal ID
    pub fn subject_id(&self) -> Result<Uuid, JwtError> {
        Uuid::parse_str(&self.sub).map_err(|_| JwtError::InvalidToken)
    }

    /// Time left until the token stops being accepted, `None` once it has
    ///
    /// Validation runs with zero leeway and accepts a token through the whole
    /// second named by `exp`, so the window ends at `exp + 1s`.
    pub fn remaining_ttl(&self) -> Option<Duration> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
        let valid_until = Duration::from_secs(self.exp.saturating_add(1));
        valid_until.checked_sub(now).filter(|ttl| !ttl.is_zero())
    }
}

/// JWT token generation and validation errors
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Failed to encode JWT: {0}")]
    EncodingError(#[from] jsonwebtoken::errors::Error),

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    ExpiredToken,

    #[error("System time error: {0}")]
    SystemTimeError(#[from] std::time::SystemTimeError),
}

/// JWT Configuration
///
/// Built once from [`AuthConfig`] at startup and handed to every component
/// that signs or verifies tokens.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Secret key for HMAC signing
    pub secret: String,
    /// Token issuer identifier
    pub issuer: String,
    /// Access token lifetime in seconds
    pub access_expiration_secs: u64,
    /// Refresh token lifetime in seconds
    pub refresh_expiration_secs: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self::from(&AuthConfig::default())
    }
}

impl From<&AuthConfig> for JwtConfig {
    fn from(config: &AuthConfig) -> Self {
        Self {
            secret: config.jwt_secret.clone(),
            issuer: config.jwt_issuer.clone(),
            access_expiration_secs: config.access_ttl_secs,
            refresh_expiration_secs: config.refresh_ttl_secs,
        }
    }
}

/// Generate a short-lived access token
///
/// # Example
///
/// ```no_run
/// use checkin_api::auth::jwt::{issue_access_token, JwtConfig};
/// use uuid::Uuid;
///
/// let config = JwtConfig::default();
/// let token = issue_access_token(&config, Uuid::new_v4(), "organizer")
///     .expect("Failed to generate token");
/// ```
pub fn issue_access_token(config: &JwtConfig, subject: Uuid, role: &str) -> Result<String, JwtError> {
    issue_token(
        config,
        subject,
        role,
        TokenKind::Access,
        config.access_expiration_secs,
    )
}

/// Generate a refresh token
///
/// Same contract as [`issue_access_token`] with the longer refresh lifetime.
pub fn issue_refresh_token(
    config: &JwtConfig,
    subject: Uuid,
    role: &str,
) -> Result<String, JwtError> {
    issue_token(
        config,
        subject,
        role,
        TokenKind::Refresh,
        config.refresh_expiration_secs,
    )
}

fn issue_token(
    config: &JwtConfig,
    subject: Uuid,
    role: &str,
    kind: TokenKind,
    ttl_secs: u64,
) -> Result<String, JwtError> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();

    let claims = Claims {
        iss: config.issuer.clone(),
        sub: subject.to_string(),
        jti: Uuid::new_v4().to_string(),
        iat: now,
        exp: now + ttl_secs,
        role: role.to_string(),
        token_type: kind,
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )?;

    Ok(token)
}

/// Verify signature, issuer and expiry and extract the claims
///
/// # Returns
///
/// * `Ok(Claims)` - Decoded and validated claims (kind not checked)
/// * `Err(JwtError::ExpiredToken)` - Valid token whose expiry has passed
/// * `Err(JwtError::InvalidToken)` - Bad signature, wrong secret, malformed
pub fn parse_and_verify(config: &JwtConfig, token: &str) -> Result<Claims, JwtError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[&config.issuer]);
    validation.set_required_spec_claims(&["exp", "iss", "sub"]);
    validation.leeway = 0;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::ExpiredToken,
        _ => JwtError::InvalidToken,
    })?;

    Ok(token_data.claims)
}
