//! Cryptographic primitives for the OAuth server
//!
//! - RS256 JWT signing/verification of access tokens (`jsonwebtoken`)
//! - AES-256-GCM envelope encryption of auth codes and refresh tokens
//! - RSA-2048 key pair generation (PKCS#8 / SPKI PEM)
//! - PKCE verification, client secret hashing, random identifiers
//! - Argon2id hashing of host user passwords

use crate::{PressGateError, Result};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// AES-GCM nonce length in bytes
const NONCE_LEN: usize = 12;

/// 256-bit symmetric key for envelope encryption
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(key.as_slice());
        Self(bytes)
    }

    /// Persisted form (standard base64)
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| PressGateError::crypto(format!("Invalid encryption key encoding: {}", e)))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| PressGateError::crypto("Encryption key must be 32 bytes"))?;
        Ok(Self(bytes))
    }

    /// Encrypt a serializable payload; output is base64url(nonce || ciphertext)
    pub fn seal<T: Serialize>(&self, payload: &T) -> Result<String> {
        let plaintext = serde_json::to_vec(payload)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|e| PressGateError::crypto(format!("Encryption failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(nonce.as_slice());
        sealed.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    /// Decrypt and deserialize a payload produced by [`EncryptionKey::seal`]
    pub fn open<T: DeserializeOwned>(&self, sealed: &str) -> Result<T> {
        let data = URL_SAFE_NO_PAD
            .decode(sealed.trim())
            .map_err(|_| PressGateError::crypto("Encrypted payload is not valid base64url"))?;

        if data.len() <= NONCE_LEN {
            return Err(PressGateError::crypto("Encrypted payload too short"));
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0));
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| PressGateError::crypto("Decryption failed"))?;

        Ok(serde_json::from_slice(&plaintext)?)
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// PEM-encoded RSA key pair
#[derive(Clone)]
pub struct RsaKeyPair {
    pub private_pem: String,
    pub public_pem: String,
}

/// Generate an RSA key pair (CPU heavy; call from a blocking task)
pub fn generate_rsa_key_pair(bits: usize) -> Result<RsaKeyPair> {
    let private_key = RsaPrivateKey::new(&mut rand_core::OsRng, bits)
        .map_err(|e| PressGateError::crypto(format!("Failed to generate RSA private key: {}", e)))?;
    let public_key = RsaPublicKey::from(&private_key);

    let private_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| PressGateError::crypto(format!("Failed to export private key: {}", e)))?
        .to_string();
    let public_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| PressGateError::crypto(format!("Failed to export public key: {}", e)))?;

    Ok(RsaKeyPair {
        private_pem,
        public_pem,
    })
}

/// Access token JWT claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Client id the token was issued to
    pub aud: String,
    /// Access token id (primary key of the token record)
    pub jti: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    /// Host user id, decimal
    pub sub: String,
    pub scopes: Vec<String>,
}

/// Sign access token claims with the RSA private key (RS256)
pub fn sign_access_token(claims: &AccessTokenClaims, private_pem: &str) -> Result<String> {
    let key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
        .map_err(|e| PressGateError::crypto(format!("Invalid private key: {}", e)))?;
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), claims, &key)
        .map_err(|e| PressGateError::crypto(format!("Failed to sign access token: {}", e)))
}

/// Why a JWT failed verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JwtRejection {
    Expired,
    NotYetValid,
    BadSignature,
    Malformed,
}

impl JwtRejection {
    pub fn describe(self) -> &'static str {
        match self {
            JwtRejection::Expired => "Access token has expired",
            JwtRejection::NotYetValid => "Access token is not yet valid",
            JwtRejection::BadSignature => "Access token could not be verified",
            JwtRejection::Malformed => "Access token is malformed",
        }
    }
}

/// Build the RS256 decoding key from the public PEM
pub fn decoding_key(public_pem: &str) -> Result<DecodingKey> {
    DecodingKey::from_rsa_pem(public_pem.as_bytes())
        .map_err(|e| PressGateError::crypto(format!("Invalid public key: {}", e)))
}

/// Verify signature, `exp` and `nbf` (no leeway) and return the claims
pub fn verify_access_token(
    token: &str,
    key: &DecodingKey,
) -> std::result::Result<AccessTokenClaims, JwtRejection> {
    use jsonwebtoken::errors::ErrorKind;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.leeway = 0;
    validation.validate_nbf = true;
    // aud is the client id, checked against the token record instead
    validation.validate_aud = false;
    validation.set_required_spec_claims(&["exp", "nbf", "sub"]);

    jsonwebtoken::decode::<AccessTokenClaims>(token, key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => JwtRejection::Expired,
            ErrorKind::ImmatureSignature => JwtRejection::NotYetValid,
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => JwtRejection::BadSignature,
            _ => JwtRejection::Malformed,
        })
}

/// Random 40-character hex identifier (code ids, jti, refresh token ids)
pub fn generate_identifier() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 20];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate secure client secret
pub fn generate_client_secret() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hex digest used to store client secrets
pub fn hash_client_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Constant-time check of a presented secret against its stored hash
pub fn verify_client_secret(secret: &str, hashed: &str) -> bool {
    let computed = hash_client_secret(secret);
    computed.as_bytes().ct_eq(hashed.as_bytes()).into()
}

/// Supported PKCE transformation
pub fn is_supported_pkce_method(method: &str) -> bool {
    matches!(method, "S256" | "plain")
}

/// Verify a PKCE code verifier (RFC 7636 §4.6)
pub fn verify_pkce(verifier: &str, challenge: &str, method: &str) -> bool {
    // RFC 7636 §4.1: 43..128 unreserved characters
    if verifier.len() < 43
        || verifier.len() > 128
        || !verifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
    {
        return false;
    }

    let computed = match method {
        "S256" => URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())),
        "plain" => verifier.to_string(),
        _ => return false,
    };

    computed.as_bytes().ct_eq(challenge.as_bytes()).into()
}

/// Hash a host user password (Argon2id PHC string)
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut rand_core::OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PressGateError::crypto(format!("Argon2 password hashing failed: {}", e)))
}

/// Check a password against a stored PHC string; malformed hashes never match
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(password_hash) else {
        tracing::error!("Stored password hash is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
