//! Access token signing
//!
//! Access tokens are short-lived JWTs. The session protocol only depends on
//! [`AccessTokenSigner`]; [`JwtAccessTokenSigner`] supports RS256 with PEM
//! keys and falls back to an HS256 shared secret.

use std::fs;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::info;

use gk_config::SessionConfig;

use crate::authorization::resolver;
use crate::principal::Principal;
use crate::shared::entity::Entity;
use crate::shared::error::{AccessError, Result};
use crate::shared::tsid::TsidGenerator;

/// Signs an access token for a principal whose associations are loaded.
pub trait AccessTokenSigner: Send + Sync {
    fn sign_access_token(&self, principal: &Principal) -> Result<String>;
}

/// JWT claims for access tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (principal ID)
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    pub jti: String,
    pub email: String,
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

pub struct JwtAccessTokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    issuer: String,
    audience: String,
    expiry: Duration,
}

impl JwtAccessTokenSigner {
    /// RS256 with PEM-encoded keys.
    pub fn new_with_rsa(config: &SessionConfig, private_key_pem: &str, public_key_pem: &str) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| AccessError::configuration(format!("Invalid RSA private key: {}", e)))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| AccessError::configuration(format!("Invalid RSA public key: {}", e)))?;

        info!("Access token signer initialized with RS256");
        Self::build(config, encoding_key, decoding_key, Algorithm::RS256)
    }

    /// HS256 with the configured shared secret.
    pub fn new_with_secret(config: &SessionConfig) -> Result<Self> {
        if config.jwt_secret.is_empty() {
            return Err(AccessError::configuration("session.jwt_secret is empty"));
        }
        let encoding_key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());

        info!("Access token signer initialized with HS256");
        Self::build(config, encoding_key, decoding_key, Algorithm::HS256)
    }

    /// RS256 when both key paths are configured, HS256 otherwise.
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        if !config.uses_rsa() {
            return Self::new_with_secret(config);
        }
        let private_key = fs::read_to_string(&config.private_key_path).map_err(|e| {
            AccessError::configuration(format!("Cannot read {}: {}", config.private_key_path, e))
        })?;
        let public_key = fs::read_to_string(&config.public_key_path).map_err(|e| {
            AccessError::configuration(format!("Cannot read {}: {}", config.public_key_path, e))
        })?;
        Self::new_with_rsa(config, &private_key, &public_key)
    }

    fn build(
        config: &SessionConfig,
        encoding_key: EncodingKey,
        decoding_key: DecodingKey,
        algorithm: Algorithm,
    ) -> Result<Self> {
        config
            .check_lifetimes()
            .map_err(|e| AccessError::configuration(e.to_string()))?;
        Ok(Self {
            encoding_key,
            decoding_key,
            algorithm,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            expiry: Duration::seconds(config.access_token_expiry_secs),
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Validate signature, issuer, audience and expiry.
    pub fn validate(&self, token: &str) -> Result<AccessTokenClaims> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AccessError::TokenExpired,
                _ => AccessError::invalid_token(e.to_string()),
            })
    }
}

impl AccessTokenSigner for JwtAccessTokenSigner {
    fn sign_access_token(&self, principal: &Principal) -> Result<String> {
        let now = Utc::now();
        let claims = AccessTokenClaims {
            sub: principal.id().to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: (now + self.expiry).timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            jti: TsidGenerator::generate(),
            email: principal.email().to_string(),
            username: principal.username().to_string(),
            roles: resolver::get_all_roles(principal).into_iter().collect(),
            permissions: resolver::get_all_permissions(principal).into_iter().collect(),
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| AccessError::internal(format!("Failed to encode JWT: {}", e)))
    }
}
