//! Authentication: password hashing, access-token signing and the
//! refresh-token session protocol.

pub mod password_service;
pub mod refresh_token;
pub mod refresh_token_repository;
pub mod session_service;
pub mod token_signer;

pub use password_service::{PasswordPolicy, PasswordService};
pub use refresh_token::RefreshToken;
pub use refresh_token_repository::{CachedRefreshTokenRepository, RefreshTokenRepository};
pub use session_service::{LoginCommand, LoginResult, SessionService, SessionTokens};
pub use token_signer::{AccessTokenClaims, AccessTokenSigner, JwtAccessTokenSigner};
