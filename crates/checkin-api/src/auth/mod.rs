//! Authentication and authorization module
//!
//! - Token issuance and verification (HS256 JWT, access and refresh kinds)
//! - Password hashing with Argon2
//! - Revocation store for tokens withdrawn before expiry
//! - Gate middleware for authentication and role checks
//! - Authentication service for register, login, refresh and logout

pub mod jwt;
pub mod middleware;
pub mod password;
pub mod revocation;
pub mod service;

pub use jwt::{
    issue_access_token, issue_refresh_token, parse_and_verify, Claims, JwtConfig, JwtError,
    TokenKind,
};
pub use middleware::{
    auth_middleware, bearer_token, optional_auth_middleware, require_role, AuthError, AuthGate,
    AuthenticatedUser,
};
pub use password::{hash_password, validate_password_strength, verify_password, PasswordConfig};
pub use revocation::{MokaRevocationStore, PgRevocationStore, RevocationError, RevocationStore};
pub use service::{
    AuthResponse, AuthService, LoginRequest, LogoutRequest, RefreshRequest, RegisterRequest,
};
