//! Authentication service layer
//!
//! Register, login, refresh and logout over a principal's session:
//!
//! ```text
//! Anonymous --register/login--> Authenticated(A, R)
//! Authenticated(A, R) --refresh(R)--> Authenticated(A', R')   R revoked first
//! Authenticated(A, R) --logout(A, R)--> Anonymous             A and R revoked
//! ```

use super::jwt::{
    issue_access_token, issue_refresh_token, parse_and_verify, Claims, JwtConfig, JwtError,
    TokenKind,
};
use super::password::{
    hash_password_with_config, validate_password_strength, verify_password, PasswordConfig,
};
use super::revocation::RevocationStore;
use crate::audit::{audit_log, AuditContext, AuditEvent};
use crate::error::AppError;
use checkin_core::{
    is_reserved_email, normalize_email, NewPrincipal, PrincipalPublic, PrincipalRepository, Role,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Message for every credential failure, whatever the cause
pub const INVALID_CREDENTIALS: &str = "invalid credentials";

/// Verified in place of a real hash when the email matches no active principal
const PLACEHOLDER_PASSWORD: &str = "Placeholder-Credential-0!";

/// Principal registration request
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(email(message = "invalid email format"))]
    pub email: String,
    pub password: String,
    #[validate(length(min = 1, max = 100, message = "name must be 1-100 characters"))]
    pub name: String,
    /// `organizer` (default) or `staff`
    pub role: Option<String>,
}

/// Login request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Token refresh request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Logout request; the access token travels in the Authorization header
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

/// Token pair with the sanitized principal
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Always `Bearer`
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    pub user: PrincipalPublic,
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    principals: Arc<dyn PrincipalRepository>,
    revocations: Arc<dyn RevocationStore>,
    jwt_config: JwtConfig,
    password_config: PasswordConfig,
    /// Hash of `PLACEHOLDER_PASSWORD` under `password_config`, built on first use
    placeholder_hash: Arc<OnceLock<String>>,
}

impl AuthService {
    pub fn new(
        principals: Arc<dyn PrincipalRepository>,
        revocations: Arc<dyn RevocationStore>,
        jwt_config: JwtConfig,
    ) -> Self {
        Self {
            principals,
            revocations,
            jwt_config,
            password_config: PasswordConfig::default(),
            placeholder_hash: Arc::new(OnceLock::new()),
        }
    }

    /// Override the Argon2 cost parameters for new hashes
    pub fn with_password_config(mut self, password_config: PasswordConfig) -> Self {
        self.password_config = password_config;
        self.placeholder_hash = Arc::new(OnceLock::new());
        self
    }

    /// Register a new principal and sign them in
    ///
    /// # Errors
    ///
    /// * `BadRequest` - Invalid email, empty name, weak password, unknown role
    /// * `Conflict` - Email already registered
    pub async fn register(
        &self,
        request: RegisterRequest,
        context: &AuditContext,
    ) -> Result<AuthResponse, AppError> {
        let result = self.create_principal(request.clone()).await;

        match &result {
            Ok(principal) => audit_log(&AuditEvent::RegistrationSuccess {
                user_id: principal.id,
                email: principal.email.clone(),
                role: principal.role.to_string(),
                context: context.clone(),
            }),
            Err(e) => audit_log(&AuditEvent::RegistrationFailure {
                email: normalize_email(&request.email),
                reason: e.to_string(),
                context: context.clone(),
            }),
        }

        self.issue_pair(result?)
    }

    async fn create_principal(
        &self,
        mut request: RegisterRequest,
    ) -> Result<PrincipalPublic, AppError> {
        request.email = normalize_email(&request.email);
        request
            .validate()
            .map_err(|e| AppError::BadRequest(validation_message(&e)))?;
        if is_reserved_email(&request.email) {
            return Err(AppError::BadRequest("email domain is reserved".to_string()));
        }

        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::BadRequest("name is required".to_string()));
        }

        validate_password_strength(&request.password)
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        let role = match request.role.as_deref() {
            None => Role::Organizer,
            Some(raw) => raw.parse::<Role>()?,
        };
        if role == Role::Admin {
            return Err(AppError::BadRequest(
                "admin accounts cannot be self-registered".to_string(),
            ));
        }

        let email = request.email;
        if self.principals.exists_by_email(&email).await? {
            return Err(AppError::Conflict("email already registered".to_string()));
        }

        let password_config = self.password_config.clone();
        let password = request.password;
        let password_hash =
            tokio::task::spawn_blocking(move || hash_password_with_config(&password, &password_config))
                .await
                .map_err(|e| AppError::Internal(format!("Password hashing task failed: {e}")))?
                .map_err(|e| AppError::Internal(e.to_string()))?;

        // A concurrent registration can still win between the check and here;
        // the store's uniqueness check reports it as Conflict.
        let principal = self
            .principals
            .create(NewPrincipal {
                email,
                password_hash,
                name,
                role,
            })
            .await?;

        Ok(principal)
    }

    /// Authenticate with email and password
    ///
    /// Unknown email, soft-deleted account and wrong password all fail with the
    /// same `Unauthorized("invalid credentials")`.
    pub async fn login(
        &self,
        request: LoginRequest,
        context: &AuditContext,
    ) -> Result<AuthResponse, AppError> {
        let email = normalize_email(&request.email);

        let principal = self
            .principals
            .find_by_email_with_password(&email)
            .await?
            .filter(|principal| !principal.is_deleted());

        // Unknown and deleted accounts still pay for one Argon2 verification
        let password_hash = principal.as_ref().map(|p| p.password_hash.clone());
        let valid = self.verify_credentials(request.password, password_hash).await?;

        let principal = match principal {
            Some(principal) if valid => principal,
            Some(_) => return Err(self.login_failed(&email, "password mismatch", context)),
            None => return Err(self.login_failed(&email, "unknown email", context)),
        };

        audit_log(&AuditEvent::LoginSuccess {
            user_id: principal.id,
            email: principal.email.clone(),
            context: context.clone(),
        });

        self.issue_pair(principal.to_public())
    }

    /// Run the password check on a blocking thread
    ///
    /// Without a stored hash the password is checked against the placeholder
    /// hash and the result discarded, so the call always costs one verification.
    async fn verify_credentials(
        &self,
        password: String,
        password_hash: Option<String>,
    ) -> Result<bool, AppError> {
        let placeholder_hash = self.placeholder_hash.clone();
        let password_config = self.password_config.clone();

        tokio::task::spawn_blocking(move || match password_hash {
            Some(hash) => verify_password(&password, &hash),
            None => {
                let hash = match placeholder_hash.get() {
                    Some(hash) => hash,
                    None => {
                        let hash = hash_password_with_config(PLACEHOLDER_PASSWORD, &password_config)?;
                        placeholder_hash.get_or_init(|| hash)
                    }
                };
                verify_password(&password, hash).map(|_| false)
            }
        })
        .await
        .map_err(|e| AppError::Internal(format!("Password verification task failed: {e}")))?
        .map_err(|e| AppError::Internal(e.to_string()))
    }

    fn login_failed(&self, email: &str, reason: &str, context: &AuditContext) -> AppError {
        audit_log(&AuditEvent::LoginFailure {
            email: email.to_string(),
            reason: reason.to_string(),
            context: context.clone(),
        });
        AppError::Unauthorized(INVALID_CREDENTIALS.to_string())
    }

    /// Exchange a refresh token for a new pair (single-use rotation)
    ///
    /// Checks run in order: signature and structure, expiry, kind, revocation.
    /// The old refresh token is revoked before the new pair is issued; of any
    /// number of concurrent exchanges of the same token exactly one succeeds.
    ///
    /// `access_token` is the caller's current access token, if it sent one.
    /// When it verifies and belongs to the same subject it is revoked too.
    pub async fn refresh(
        &self,
        request: RefreshRequest,
        access_token: Option<&str>,
        context: &AuditContext,
    ) -> Result<AuthResponse, AppError> {
        let token = request.refresh_token.trim();

        let claims = parse_and_verify(&self.jwt_config, token).map_err(|e| match e {
            JwtError::ExpiredToken => {
                AppError::Unauthorized("refresh token has expired".to_string())
            }
            _ => AppError::Unauthorized("invalid refresh token".to_string()),
        })?;

        if claims.token_type != TokenKind::Refresh {
            return Err(AppError::Unauthorized("invalid token type".to_string()));
        }

        let subject = claims
            .subject_id()
            .map_err(|_| AppError::Unauthorized("invalid refresh token".to_string()))?;

        if self.revocations.is_revoked(token).await? {
            return Err(self.refresh_reused(subject, &claims, context));
        }

        let ttl = claims
            .remaining_ttl()
            .ok_or_else(|| AppError::Unauthorized("refresh token has expired".to_string()))?;

        // Revoke-before-issue: only the caller that records the revocation proceeds
        if !self.revocations.add_if_absent(token, ttl).await? {
            return Err(self.refresh_reused(subject, &claims, context));
        }

        // Best effort: the refresh token is already spent, so a store error here
        // must not cost the caller the new pair
        if let Some(access_token) = access_token {
            if let Err(e) = self.revoke_paired_access_token(access_token, subject).await {
                tracing::warn!(
                    user_id = %subject,
                    error = %e,
                    "Failed to revoke paired access token"
                );
            }
        }

        // Principal may have been deleted since issuance; its role may have changed
        let principal = self
            .principals
            .find_by_id(subject)
            .await?
            .ok_or_else(|| AppError::Unauthorized("invalid refresh token".to_string()))?;

        audit_log(&AuditEvent::TokenRefresh {
            user_id: principal.id,
            context: context.clone(),
        });

        self.issue_pair(principal)
    }

    fn refresh_reused(&self, subject: Uuid, claims: &Claims, context: &AuditContext) -> AppError {
        audit_log(&AuditEvent::RefreshTokenReuse {
            user_id: Some(subject),
            token_id: claims.jti.clone(),
            context: context.clone(),
        });
        AppError::Unauthorized("refresh token has been revoked".to_string())
    }

    async fn revoke_paired_access_token(&self, token: &str, subject: Uuid) -> Result<(), AppError> {
        let Ok(claims) = parse_and_verify(&self.jwt_config, token) else {
            return Ok(());
        };
        if claims.token_type != TokenKind::Access || claims.subject_id().ok() != Some(subject) {
            return Ok(());
        }
        if let Some(ttl) = claims.remaining_ttl() {
            self.revocations.add(token, ttl).await?;
        }
        Ok(())
    }

    /// Revoke the caller's access and refresh tokens
    ///
    /// * Refresh token is required in the body; access token comes from the
    ///   Authorization header and may be absent.
    /// * Expired tokens need no revocation and are skipped.
    /// * Malformed, wrong-kind or already revoked tokens fail `Unauthorized`,
    ///   as do tokens belonging to different principals.
    /// * Both tokens are validated before either is revoked.
    pub async fn logout(
        &self,
        access_token: Option<&str>,
        request: LogoutRequest,
        context: &AuditContext,
    ) -> Result<(), AppError> {
        let refresh_token = request
            .refresh_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::BadRequest("refresh_token is required".to_string()))?;

        let refresh = self.revocable(refresh_token, TokenKind::Refresh).await?;
        let access = match access_token {
            Some(token) => self.revocable(token, TokenKind::Access).await?,
            None => None,
        };

        if let (Some(access_claims), Some(refresh_claims)) = (&access, &refresh) {
            if access_claims.sub != refresh_claims.sub {
                return Err(AppError::Unauthorized("invalid token".to_string()));
            }
        }

        let mut user_id = None;
        let mut revoked_tokens = 0;
        for (token, claims) in [(access_token, access), (Some(refresh_token), refresh)]
            .into_iter()
            .filter_map(|(token, claims)| Some((token?, claims?)))
        {
            // Recomputed at write time so the entry never outlives the token
            if let Some(ttl) = claims.remaining_ttl() {
                self.revocations.add(token, ttl).await?;
                revoked_tokens += 1;
            }
            user_id = claims.subject_id().ok().or(user_id);
        }

        audit_log(&AuditEvent::Logout {
            user_id,
            revoked_tokens,
            context: context.clone(),
        });

        Ok(())
    }

    /// Claims of a token that still needs revoking, `None` if already expired
    async fn revocable(
        &self,
        token: &str,
        expected: TokenKind,
    ) -> Result<Option<Claims>, AppError> {
        let claims = match parse_and_verify(&self.jwt_config, token) {
            Ok(claims) => claims,
            Err(JwtError::ExpiredToken) => return Ok(None),
            Err(_) => return Err(AppError::Unauthorized("invalid token".to_string())),
        };

        if claims.token_type != expected {
            return Err(AppError::Unauthorized("invalid token type".to_string()));
        }
        if self.revocations.is_revoked(token).await? {
            return Err(AppError::Unauthorized("token has been revoked".to_string()));
        }
        if claims.remaining_ttl().is_none() {
            return Ok(None);
        }

        Ok(Some(claims))
    }

    /// Active principal by id
    pub async fn get_principal(&self, id: Uuid) -> Result<PrincipalPublic, AppError> {
        self.principals
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("principal".to_string()))
    }

    /// Soft-delete and anonymize a principal
    ///
    /// The original email becomes free for a new registration. Tokens already
    /// issued to the principal cannot be refreshed afterwards.
    pub async fn delete_principal(&self, id: Uuid, deleted_by: Uuid) -> Result<(), AppError> {
        self.principals.soft_delete(id, deleted_by).await?;

        audit_log(&AuditEvent::PrincipalDeleted {
            user_id: id,
            deleted_by,
        });

        Ok(())
    }

    fn issue_pair(&self, principal: PrincipalPublic) -> Result<AuthResponse, AppError> {
        let role = principal.role.as_str();

        let access_token = issue_access_token(&self.jwt_config, principal.id, role)
            .map_err(|e| AppError::Internal(format!("Failed to generate access token: {e}")))?;
        let refresh_token = issue_refresh_token(&self.jwt_config, principal.id, role)
            .map_err(|e| AppError::Internal(format!("Failed to generate refresh token: {e}")))?;

        Ok(AuthResponse {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.jwt_config.access_expiration_secs,
            user: principal,
        })
    }
}

fn validation_message(errors: &validator::ValidationErrors) -> String {
    errors
        .field_errors()
        .values()
        .flat_map(|errs| errs.iter())
        .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
        .unwrap_or_else(|| "invalid request".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::revocation::{MokaRevocationStore, RevocationError};
    use checkin_core::InMemoryStore;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    fn service() -> (AuthService, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let service = AuthService::new(
            store.clone(),
            Arc::new(MokaRevocationStore::new()),
            JwtConfig::default(),
        )
        .with_password_config(PasswordConfig::minimal());
        (service, store)
    }

    fn register_request(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            password: "Secret123!".to_string(),
            name: "A".to_string(),
            role: Some("organizer".to_string()),
        }
    }

    fn ctx() -> AuditContext {
        AuditContext::default()
    }

    fn expired_token(kind: TokenKind, subject: Uuid) -> String {
        use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

        let config = JwtConfig::default();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let claims = Claims {
            iss: config.issuer.clone(),
            sub: subject.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now - 7200,
            exp: now - 3600,
            role: "organizer".to_string(),
            token_type: kind,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(config.secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_register_issues_pair_without_hash() {
        let (service, _) = service();
        let response = service
            .register(register_request("A@X.com"), &ctx())
            .await
            .unwrap();

        assert!(!response.access_token.is_empty());
        assert!(!response.refresh_token.is_empty());
        assert_eq!(response.token_type, "Bearer");
        assert_eq!(response.user.email, "a@x.com");
        assert_eq!(response.user.role, Role::Organizer);

        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("argon2"));
    }

    #[tokio::test]
    async fn test_register_validation() {
        let (service, _) = service();

        let mut bad_email = register_request("not-an-email");
        bad_email.email = "not-an-email".to_string();
        assert!(matches!(
            service.register(bad_email, &ctx()).await,
            Err(AppError::BadRequest(_))
        ));

        let mut weak = register_request("weak@x.com");
        weak.password = "password".to_string();
        assert!(matches!(
            service.register(weak, &ctx()).await,
            Err(AppError::BadRequest(_))
        ));

        let mut blank_name = register_request("blank@x.com");
        blank_name.name = "   ".to_string();
        assert!(matches!(
            service.register(blank_name, &ctx()).await,
            Err(AppError::BadRequest(_))
        ));

        let mut admin = register_request("admin@x.com");
        admin.role = Some("admin".to_string());
        assert!(matches!(
            service.register(admin, &ctx()).await,
            Err(AppError::BadRequest(_))
        ));

        let mut unknown = register_request("role@x.com");
        unknown.role = Some("viewer".to_string());
        assert!(matches!(
            service.register(unknown, &ctx()).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_register_duplicate_email_conflicts() {
        let (service, _) = service();
        service
            .register(register_request("a@x.com"), &ctx())
            .await
            .unwrap();

        assert!(matches!(
            service.register(register_request(" A@x.com "), &ctx()).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let (service, _) = service();
        service
            .register(register_request("a@x.com"), &ctx())
            .await
            .unwrap();

        let unknown = service
            .login(
                LoginRequest {
                    email: "nonexistent@x.com".to_string(),
                    password: "Secret123!".to_string(),
                },
                &ctx(),
            )
            .await
            .unwrap_err();
        let mismatch = service
            .login(
                LoginRequest {
                    email: "a@x.com".to_string(),
                    password: "Wrong123!".to_string(),
                },
                &ctx(),
            )
            .await
            .unwrap_err();

        assert!(matches!(unknown, AppError::Unauthorized(_)));
        assert!(matches!(mismatch, AppError::Unauthorized(_)));
        assert_eq!(unknown.to_string(), mismatch.to_string());
        assert_eq!(unknown.to_string(), INVALID_CREDENTIALS);
    }

    #[tokio::test]
    async fn test_unknown_email_still_verifies_a_password() {
        let (service, _) = service();
        assert!(service.placeholder_hash.get().is_none());

        // Even the placeholder password itself must not sign anyone in
        let err = service
            .login(
                LoginRequest {
                    email: "nobody@x.com".to_string(),
                    password: PLACEHOLDER_PASSWORD.to_string(),
                },
                &ctx(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), INVALID_CREDENTIALS);

        let hash = service.placeholder_hash.get().unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(hash.contains("m=8,t=1,p=1"));
        assert!(verify_password(PLACEHOLDER_PASSWORD, hash).unwrap());
    }

    #[tokio::test]
    async fn test_deleted_principal_login_uses_placeholder_hash() {
        let (service, _) = service();
        let registered = service
            .register(register_request("gone@x.com"), &ctx())
            .await
            .unwrap();
        service
            .delete_principal(registered.user.id, Uuid::new_v4())
            .await
            .unwrap();
        assert!(service.placeholder_hash.get().is_none());

        let err = service
            .login(
                LoginRequest {
                    email: "gone@x.com".to_string(),
                    password: "Secret123!".to_string(),
                },
                &ctx(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), INVALID_CREDENTIALS);
        assert!(service.placeholder_hash.get().is_some());
    }

    #[tokio::test]
    async fn test_wrong_password_does_not_touch_placeholder_hash() {
        let (service, _) = service();
        service
            .register(register_request("a@x.com"), &ctx())
            .await
            .unwrap();

        let err = service
            .login(
                LoginRequest {
                    email: "a@x.com".to_string(),
                    password: "Wrong123!".to_string(),
                },
                &ctx(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), INVALID_CREDENTIALS);
        assert!(service.placeholder_hash.get().is_none());
    }

    #[tokio::test]
    async fn test_register_rejects_anonymized_placeholder_email() {
        let (service, store) = service();
        let victim = service
            .register(register_request("victim@x.com"), &ctx())
            .await
            .unwrap();
        let (placeholder, _) = checkin_core::anonymized_identity(victim.user.id);

        for email in [placeholder.clone(), placeholder.to_uppercase()] {
            let err = service
                .register(register_request(&email), &ctx())
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)), "{email}: {err}");
        }

        service
            .delete_principal(victim.user.id, Uuid::new_v4())
            .await
            .unwrap();
        let holder = store
            .find_by_email_with_password(&placeholder)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(holder.id, victim.user.id);
        assert!(holder.is_deleted());
    }

    #[tokio::test]
    async fn test_deleted_principal_cannot_login_and_email_is_reusable() {
        let (service, _) = service();
        let registered = service
            .register(register_request("gone@x.com"), &ctx())
            .await
            .unwrap();

        service
            .delete_principal(registered.user.id, Uuid::new_v4())
            .await
            .unwrap();

        let err = service
            .login(
                LoginRequest {
                    email: "gone@x.com".to_string(),
                    password: "Secret123!".to_string(),
                },
                &ctx(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), INVALID_CREDENTIALS);

        let again = service
            .register(register_request("gone@x.com"), &ctx())
            .await
            .unwrap();
        assert_ne!(again.user.id, registered.user.id);
    }

    #[tokio::test]
    async fn test_refresh_is_single_use() {
        let (service, _) = service();
        let pair = service
            .register(register_request("a@x.com"), &ctx())
            .await
            .unwrap();

        let rotated = service
            .refresh(
                RefreshRequest {
                    refresh_token: pair.refresh_token.clone(),
                },
                None,
                &ctx(),
            )
            .await
            .unwrap();
        assert_ne!(rotated.refresh_token, pair.refresh_token);
        assert_ne!(rotated.access_token, pair.access_token);

        let reused = service
            .refresh(
                RefreshRequest {
                    refresh_token: pair.refresh_token,
                },
                None,
                &ctx(),
            )
            .await
            .unwrap_err();
        assert_eq!(reused.to_string(), "refresh token has been revoked");
    }

    #[tokio::test]
    async fn test_concurrent_refresh_has_single_winner() {
        let (service, _) = service();
        let pair = service
            .register(register_request("a@x.com"), &ctx())
            .await
            .unwrap();

        let attempts = (0..8).map(|_| {
            let service = service.clone();
            let refresh_token = pair.refresh_token.clone();
            tokio::spawn(async move {
                service
                    .refresh(RefreshRequest { refresh_token }, None, &AuditContext::default())
                    .await
            })
        });
        let results = futures::future::join_all(attempts).await;

        let successes = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
        let unauthorized = results
            .iter()
            .filter(|r| matches!(r, Ok(Err(AppError::Unauthorized(_)))))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(unauthorized, 7);
    }

    #[tokio::test]
    async fn test_refresh_rejects_access_token_and_expired_token() {
        let (service, _) = service();
        let pair = service
            .register(register_request("a@x.com"), &ctx())
            .await
            .unwrap();

        let wrong_kind = service
            .refresh(
                RefreshRequest {
                    refresh_token: pair.access_token,
                },
                None,
                &ctx(),
            )
            .await
            .unwrap_err();
        assert_eq!(wrong_kind.to_string(), "invalid token type");

        let expired = service
            .refresh(
                RefreshRequest {
                    refresh_token: expired_token(TokenKind::Refresh, pair.user.id),
                },
                None,
                &ctx(),
            )
            .await
            .unwrap_err();
        assert_eq!(expired.to_string(), "refresh token has expired");

        let garbage = service
            .refresh(
                RefreshRequest {
                    refresh_token: "garbage".to_string(),
                },
                None,
                &ctx(),
            )
            .await
            .unwrap_err();
        assert_eq!(garbage.to_string(), "invalid refresh token");
    }

    #[tokio::test]
    async fn test_refresh_revokes_paired_access_token() {
        let (service, _) = service();
        let pair = service
            .register(register_request("a@x.com"), &ctx())
            .await
            .unwrap();

        service
            .refresh(
                RefreshRequest {
                    refresh_token: pair.refresh_token,
                },
                Some(&pair.access_token),
                &ctx(),
            )
            .await
            .unwrap();

        assert!(service
            .revocations
            .is_revoked(&pair.access_token)
            .await
            .unwrap());
    }

    /// Consumes refresh tokens normally but fails every plain `add`
    struct FlakyAddStore {
        inner: MokaRevocationStore,
    }

    #[async_trait::async_trait]
    impl RevocationStore for FlakyAddStore {
        async fn add(&self, _token: &str, _ttl: Duration) -> Result<(), RevocationError> {
            Err(RevocationError::Store("connection reset".to_string()))
        }

        async fn add_if_absent(&self, token: &str, ttl: Duration) -> Result<bool, RevocationError> {
            self.inner.add_if_absent(token, ttl).await
        }

        async fn is_revoked(&self, token: &str) -> Result<bool, RevocationError> {
            self.inner.is_revoked(token).await
        }
    }

    #[tokio::test]
    async fn test_refresh_survives_paired_access_revocation_failure() {
        let store = Arc::new(InMemoryStore::new());
        let service = AuthService::new(
            store,
            Arc::new(FlakyAddStore {
                inner: MokaRevocationStore::new(),
            }),
            JwtConfig::default(),
        )
        .with_password_config(PasswordConfig::minimal());
        let pair = service
            .register(register_request("a@x.com"), &ctx())
            .await
            .unwrap();

        let rotated = service
            .refresh(
                RefreshRequest {
                    refresh_token: pair.refresh_token.clone(),
                },
                Some(&pair.access_token),
                &ctx(),
            )
            .await
            .unwrap();
        assert_ne!(rotated.refresh_token, pair.refresh_token);
        assert!(service
            .revocations
            .is_revoked(&pair.refresh_token)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_logout_revokes_both_tokens_once() {
        let (service, _) = service();
        let pair = service
            .register(register_request("a@x.com"), &ctx())
            .await
            .unwrap();
        let request = LogoutRequest {
            refresh_token: Some(pair.refresh_token.clone()),
        };

        service
            .logout(Some(&pair.access_token), request.clone(), &ctx())
            .await
            .unwrap();
        assert!(service
            .revocations
            .is_revoked(&pair.access_token)
            .await
            .unwrap());
        assert!(service
            .revocations
            .is_revoked(&pair.refresh_token)
            .await
            .unwrap());

        let second = service
            .logout(Some(&pair.access_token), request, &ctx())
            .await
            .unwrap_err();
        assert_eq!(second.to_string(), "token has been revoked");
    }

    #[tokio::test]
    async fn test_logout_with_expired_access_token_succeeds() {
        let (service, _) = service();
        let pair = service
            .register(register_request("a@x.com"), &ctx())
            .await
            .unwrap();
        let expired_access = expired_token(TokenKind::Access, pair.user.id);

        service
            .logout(
                Some(&expired_access),
                LogoutRequest {
                    refresh_token: Some(pair.refresh_token.clone()),
                },
                &ctx(),
            )
            .await
            .unwrap();

        assert!(service
            .revocations
            .is_revoked(&pair.refresh_token)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_logout_rejects_bad_input() {
        let (service, _) = service();
        let pair = service
            .register(register_request("a@x.com"), &ctx())
            .await
            .unwrap();
        let other = service
            .register(register_request("b@x.com"), &ctx())
            .await
            .unwrap();

        let missing = service
            .logout(Some(&pair.access_token), LogoutRequest::default(), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(missing, AppError::BadRequest(_)));

        let malformed = service
            .logout(
                Some("garbage"),
                LogoutRequest {
                    refresh_token: Some(pair.refresh_token.clone()),
                },
                &ctx(),
            )
            .await
            .unwrap_err();
        assert_eq!(malformed.to_string(), "invalid token");

        let swapped = service
            .logout(
                Some(&pair.refresh_token),
                LogoutRequest {
                    refresh_token: Some(pair.access_token.clone()),
                },
                &ctx(),
            )
            .await
            .unwrap_err();
        assert_eq!(swapped.to_string(), "invalid token type");

        let mixed = service
            .logout(
                Some(&pair.access_token),
                LogoutRequest {
                    refresh_token: Some(other.refresh_token.clone()),
                },
                &ctx(),
            )
            .await
            .unwrap_err();
        assert_eq!(mixed.to_string(), "invalid token");

        // Nothing was revoked by the rejected attempts
        assert!(!service
            .revocations
            .is_revoked(&pair.access_token)
            .await
            .unwrap());
        assert!(!service
            .revocations
            .is_revoked(&other.refresh_token)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_refresh_after_principal_deleted_fails() {
        let (service, _) = service();
        let pair = service
            .register(register_request("a@x.com"), &ctx())
            .await
            .unwrap();
        service
            .delete_principal(pair.user.id, Uuid::new_v4())
            .await
            .unwrap();

        let err = service
            .refresh(
                RefreshRequest {
                    refresh_token: pair.refresh_token,
                },
                None,
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }
}
