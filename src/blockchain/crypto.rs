use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Failed to sign message: {0}")]
    SigningError(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),
}

/// A wallet address: the uncompressed SEC1 secp256k1 public key, hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Address(pub String);

impl Address {
    /// Creates an address from a public key
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        let point = public_key.to_encoded_point(false);
        Address(hex::encode(point.as_bytes()))
    }

    /// Parses the address back into a public key
    pub fn to_public_key(&self) -> Result<VerifyingKey, CryptoError> {
        let bytes = hex::decode(&self.0).map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        VerifyingKey::from_sec1_bytes(&bytes)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address(s.to_string())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Address(s)
    }
}

/// A DER encoded ECDSA signature, hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DigitalSignature(pub String);

impl DigitalSignature {
    pub fn from_signature(signature: &Signature) -> Self {
        DigitalSignature(hex::encode(signature.to_der().as_bytes()))
    }

    /// Decodes the DER signature. High-S signatures produced by other
    /// signers are normalised so they verify.
    pub fn to_signature(&self) -> Result<Signature, CryptoError> {
        let bytes = hex::decode(&self.0).map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        let signature =
            Signature::from_der(&bytes).map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;

        Ok(signature.normalize_s().unwrap_or(signature))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Represents a wallet with a secp256k1 keypair
#[derive(Debug, Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    address: Address,
}

impl Wallet {
    /// Creates a new wallet with a random keypair
    pub fn new() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        Self::from_signing_key(signing_key)
    }

    /// Creates a wallet from an existing 32-byte secret key
    pub fn from_secret_key(secret_key_bytes: &[u8]) -> Result<Self, CryptoError> {
        let signing_key = SigningKey::from_slice(secret_key_bytes)
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;

        Ok(Self::from_signing_key(signing_key))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = Address::from_public_key(signing_key.verifying_key());
        Wallet {
            signing_key,
            address,
        }
    }

    /// Gets the wallet's address (its public key)
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn public_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Signs an already-hashed 32-byte message
    pub fn sign_prehash(&self, digest: &[u8]) -> Result<DigitalSignature, CryptoError> {
        let signature: Signature = self
            .signing_key
            .sign_prehash(digest)
            .map_err(|e| CryptoError::SigningError(e.to_string()))?;

        Ok(DigitalSignature::from_signature(&signature))
    }

    /// Exports the wallet's secret key as bytes
    pub fn export_secret_key(&self) -> Vec<u8> {
        self.signing_key.to_bytes().to_vec()
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

/// Verifies a signature over a prehashed message.
///
/// Decoding failures of the key or signature are errors; a well-formed
/// signature that does not match yields `Ok(false)`.
pub fn verify_signature(
    digest: &[u8],
    signature: &DigitalSignature,
    address: &Address,
) -> Result<bool, CryptoError> {
    let public_key = address.to_public_key()?;
    let signature = signature.to_signature()?;

    Ok(public_key.verify_prehash(digest, &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    fn digest(message: &[u8]) -> Vec<u8> {
        Sha256::digest(message).to_vec()
    }

    #[test]
    fn test_wallet_creation() {
        let wallet = Wallet::new();
        // 0x04 prefix plus two 32-byte coordinates
        assert_eq!(wallet.address().0.len(), 130);
        assert!(wallet.address().0.starts_with("04"));
    }

    #[test]
    fn test_signing_and_verification() {
        let wallet = Wallet::new();
        let message = digest(b"Hello, world!");

        let signature = wallet.sign_prehash(&message).unwrap();

        let result = verify_signature(&message, &signature, wallet.address()).unwrap();
        assert!(result);

        let wrong_message = digest(b"Wrong message");
        let result = verify_signature(&wrong_message, &signature, wallet.address()).unwrap();
        assert!(!result);
    }

    #[test]
    fn test_verification_with_other_key_fails() {
        let wallet = Wallet::new();
        let other = Wallet::new();
        let message = digest(b"donation");

        let signature = wallet.sign_prehash(&message).unwrap();
        assert!(!verify_signature(&message, &signature, other.address()).unwrap());
    }

    #[test]
    fn test_address_conversion() {
        let wallet = Wallet::new();
        let public_key = wallet.address().to_public_key().unwrap();
        assert_eq!(&public_key, wallet.public_key());
    }

    #[test]
    fn test_secret_key_roundtrip() {
        let wallet = Wallet::new();
        let restored = Wallet::from_secret_key(&wallet.export_secret_key()).unwrap();
        assert_eq!(restored.address(), wallet.address());
    }

    #[test]
    fn test_garbage_inputs_are_errors() {
        let message = digest(b"x");
        let wallet = Wallet::new();
        let signature = wallet.sign_prehash(&message).unwrap();

        assert!(verify_signature(&message, &signature, &Address::from("not-hex")).is_err());
        assert!(verify_signature(
            &message,
            &DigitalSignature("deadbeef".to_string()),
            wallet.address()
        )
        .is_err());
        assert!(Wallet::from_secret_key(&[0u8; 3]).is_err());
    }
}
