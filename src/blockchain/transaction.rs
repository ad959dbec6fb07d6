use chrono::{SecondsFormat, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use super::crypto::{verify_signature, Address, CryptoError, DigitalSignature, Wallet};

/// How the mint sentinel renders inside a fingerprint
const MINT_FINGERPRINT: &str = "null";

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Transaction must include sender and recipient address")]
    MalformedTransaction,

    #[error("Signing key does not belong to the sender")]
    UnauthorizedSigner,

    #[error("No signature in this transaction")]
    MissingSignature,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Transaction already signed")]
    AlreadySigned,

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),
}

/// Who a transaction moves value from.
///
/// Only `User` senders need a signature. The other variants are the
/// identities allowed to create value or move it without one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User(Address),
    /// Coinbase: no sender at all
    Mint,
    Faucet(Address),
    SystemOperator(Address),
}

impl Sender {
    /// The sending address, if there is one
    pub fn address(&self) -> Option<&Address> {
        match self {
            Sender::User(address) | Sender::Faucet(address) | Sender::SystemOperator(address) => {
                Some(address)
            }
            Sender::Mint => None,
        }
    }

    pub fn requires_signature(&self) -> bool {
        matches!(self, Sender::User(_))
    }

    fn fingerprint_str(&self) -> &str {
        self.address().map_or(MINT_FINGERPRINT, Address::as_str)
    }
}

/// Represents a transaction in the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Sender of the value
    #[schema(value_type = Object)]
    pub sender: Sender,

    /// Recipient's address (public key hex)
    pub recipient: Address,

    /// Amount being transferred
    pub amount: f64,

    /// ISO-8601 creation time, kept verbatim because it is part of the fingerprint
    #[schema(example = "2025-01-01T12:00:00.000Z")]
    pub timestamp: String,

    /// DER signature over the fingerprint
    pub signature: Option<DigitalSignature>,
}

/// Current time in the fixed ISO-8601 form used by transactions and blocks
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Whether `amount` prints the same through `f64::to_string` as it does in a
/// JavaScript client. JavaScript switches to exponent notation below 1e-6 and
/// from 1e21 up, and prints negative zero as `0`; Rust does neither.
pub fn is_portable_amount(amount: f64) -> bool {
    if amount == 0.0 {
        return amount.is_sign_positive();
    }
    (1e-6..1e21).contains(&amount.abs())
}

impl Transaction {
    /// Creates a new unsigned transaction stamped with the current time
    pub fn new(sender: Sender, recipient: impl Into<Address>, amount: f64) -> Self {
        Self::with_timestamp(sender, recipient, amount, now_timestamp())
    }

    /// Creates a new unsigned transaction with a caller-supplied timestamp.
    /// Nothing is validated here; the ledger does that on submission.
    pub fn with_timestamp(
        sender: Sender,
        recipient: impl Into<Address>,
        amount: f64,
        timestamp: impl Into<String>,
    ) -> Self {
        Transaction {
            sender,
            recipient: recipient.into(),
            amount,
            timestamp: timestamp.into(),
            signature: None,
        }
    }

    /// Creates a new coinbase transaction (mining reward)
    pub fn new_coinbase(recipient: impl Into<Address>, amount: f64) -> Self {
        Self::new(Sender::Mint, recipient, amount)
    }

    /// Raw SHA-256 of sender, recipient, amount and timestamp.
    ///
    /// The amount is rendered with `f64::to_string`, which only matches a
    /// JavaScript signer for amounts accepted by [`is_portable_amount`].
    pub fn fingerprint_digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.sender.fingerprint_str().as_bytes());
        hasher.update(self.recipient.as_str().as_bytes());
        hasher.update(self.amount.to_string().as_bytes());
        hasher.update(self.timestamp.as_bytes());
        hasher.finalize().into()
    }

    /// Hex fingerprint, also used as the transaction id
    pub fn fingerprint(&self) -> String {
        hex::encode(self.fingerprint_digest())
    }

    /// Signs the transaction with the sender's wallet
    pub fn sign(&mut self, wallet: &Wallet) -> Result<(), TransactionError> {
        if self.signature.is_some() {
            return Err(TransactionError::AlreadySigned);
        }

        match &self.sender {
            Sender::User(address) if address == wallet.address() => {}
            _ => return Err(TransactionError::UnauthorizedSigner),
        }

        let signature = wallet.sign_prehash(&self.fingerprint_digest())?;
        self.signature = Some(signature);

        Ok(())
    }

    /// Attaches a signature produced elsewhere (e.g. by a browser wallet)
    pub fn attach_signature(&mut self, signature: DigitalSignature) -> Result<(), TransactionError> {
        if self.signature.is_some() {
            return Err(TransactionError::AlreadySigned);
        }
        self.signature = Some(signature);
        Ok(())
    }

    /// Checks the transaction's authorization.
    ///
    /// Privileged senders are always valid. A user transaction without a
    /// signature is an error; otherwise the verification result is returned,
    /// with undecodable keys or signatures counting as a failed verification.
    pub fn is_valid(&self) -> Result<bool, TransactionError> {
        let address = match &self.sender {
            Sender::Mint | Sender::Faucet(_) | Sender::SystemOperator(_) => return Ok(true),
            Sender::User(address) => address,
        };

        let signature = match &self.signature {
            Some(sig) if !sig.is_empty() => sig,
            _ => return Err(TransactionError::MissingSignature),
        };

        match verify_signature(&self.fingerprint_digest(), signature, address) {
            Ok(valid) => Ok(valid),
            Err(err) => {
                debug!("Signature of {} could not be checked: {}", self.fingerprint(), err);
                Ok(false)
            }
        }
    }

    /// Checks if the transaction is a coinbase transaction
    pub fn is_coinbase(&self) -> bool {
        self.sender == Sender::Mint
    }

    /// Appends the v1 canonical encoding of this transaction to `out`.
    /// Every field is written as `<byte length>:<value>` so that field
    /// boundaries are unambiguous.
    pub(crate) fn write_canonical(&self, out: &mut String) {
        let amount = self.amount.to_string();
        let signature = self.signature.as_ref().map_or("", |sig| sig.0.as_str());
        let fields: [&str; 5] = [
            self.sender.fingerprint_str(),
            self.recipient.as_str(),
            &amount,
            &self.timestamp,
            signature,
        ];
        for field in fields {
            out.push_str(&field.len().to_string());
            out.push(':');
            out.push_str(field);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_portable_amounts() {
        for amount in [0.0, 1.0, 10.5, 0.000001, -3.25, 1e20] {
            assert!(is_portable_amount(amount), "{}", amount);
        }
        for amount in [-0.0, 1e-7, 1e21, -2e-9, f64::NAN, f64::INFINITY] {
            assert!(!is_portable_amount(amount), "{}", amount);
        }
        assert_eq!(0.000001f64.to_string(), "0.000001");
    }

    #[test]
    fn test_new_transaction() {
        let sender_wallet = Wallet::new();
        let recipient_wallet = Wallet::new();

        let transaction = Transaction::new(
            Sender::User(sender_wallet.address().clone()),
            recipient_wallet.address().clone(),
            10.5,
        );

        assert_eq!(transaction.sender.address(), Some(sender_wallet.address()));
        assert_eq!(transaction.recipient, *recipient_wallet.address());
        assert_eq!(transaction.amount, 10.5);
        assert!(transaction.timestamp.ends_with('Z'));
        assert!(transaction.signature.is_none());
    }

    #[test]
    fn test_fingerprint_matches_plain_concatenation() {
        let tx = Transaction::with_timestamp(
            Sender::User(Address::from("04alice")),
            "04bob",
            10.0,
            "2025-01-01T00:00:00.000Z",
        );

        let expected = hex::encode(Sha256::digest(b"04alice04bob102025-01-01T00:00:00.000Z"));
        assert_eq!(tx.fingerprint(), expected);
        assert_eq!(tx.fingerprint(), tx.clone().fingerprint());
    }

    #[test]
    fn test_mint_fingerprint_uses_null() {
        let tx = Transaction::with_timestamp(Sender::Mint, "04miner", 100.0, "t");
        let expected = hex::encode(Sha256::digest(b"null04miner100t"));
        assert_eq!(tx.fingerprint(), expected);
    }

    #[test]
    fn test_fingerprint_ignores_signature() {
        let wallet = Wallet::new();
        let mut tx = Transaction::new(Sender::User(wallet.address().clone()), "04bob", 1.0);
        let before = tx.fingerprint();
        tx.sign(&wallet).unwrap();
        assert_eq!(tx.fingerprint(), before);
    }

    #[test]
    fn test_sign_transaction() {
        let sender_wallet = Wallet::new();
        let recipient_wallet = Wallet::new();

        let mut transaction = Transaction::new(
            Sender::User(sender_wallet.address().clone()),
            recipient_wallet.address().clone(),
            10.5,
        );

        transaction.sign(&sender_wallet).unwrap();

        assert!(transaction.signature.is_some());
        assert!(transaction.is_valid().unwrap());
    }

    #[test]
    fn test_sign_with_foreign_key_is_rejected() {
        let sender_wallet = Wallet::new();
        let intruder = Wallet::new();

        let mut transaction =
            Transaction::new(Sender::User(sender_wallet.address().clone()), "04bob", 5.0);

        assert!(matches!(
            transaction.sign(&intruder),
            Err(TransactionError::UnauthorizedSigner)
        ));
        assert!(transaction.signature.is_none());
    }

    #[test]
    fn test_sign_twice_is_rejected() {
        let wallet = Wallet::new();
        let mut tx = Transaction::new(Sender::User(wallet.address().clone()), "04bob", 5.0);
        tx.sign(&wallet).unwrap();
        assert!(matches!(tx.sign(&wallet), Err(TransactionError::AlreadySigned)));
    }

    #[test]
    fn test_privileged_senders_cannot_be_signed() {
        let wallet = Wallet::new();
        let mut tx = Transaction::new(Sender::Mint, wallet.address().clone(), 5.0);
        assert!(matches!(tx.sign(&wallet), Err(TransactionError::UnauthorizedSigner)));
    }

    #[test]
    fn test_privileged_senders_are_valid_unsigned() {
        let coinbase = Transaction::new_coinbase("04miner", 100.0);
        let faucet = Transaction::new(Sender::Faucet(Address::from("meowcoin-faucet")), "04a", 5.0);
        let system = Transaction::new(Sender::SystemOperator(Address::from("04sys")), "04a", 5.0);

        assert!(coinbase.is_coinbase());
        assert!(coinbase.is_valid().unwrap());
        assert!(faucet.is_valid().unwrap());
        assert!(system.is_valid().unwrap());
    }

    #[test]
    fn test_missing_or_empty_signature() {
        let wallet = Wallet::new();
        let mut tx = Transaction::new(Sender::User(wallet.address().clone()), "04bob", 5.0);
        assert!(matches!(tx.is_valid(), Err(TransactionError::MissingSignature)));

        tx.signature = Some(DigitalSignature(String::new()));
        assert!(matches!(tx.is_valid(), Err(TransactionError::MissingSignature)));
    }

    #[test]
    fn test_tampered_or_garbage_signature_is_invalid() {
        let wallet = Wallet::new();
        let mut tx = Transaction::new(Sender::User(wallet.address().clone()), "04bob", 5.0);
        tx.sign(&wallet).unwrap();

        let mut tampered = tx.clone();
        tampered.amount = 500.0;
        assert!(!tampered.is_valid().unwrap());

        let mut garbage = tx.clone();
        garbage.signature = Some(DigitalSignature("zz".to_string()));
        assert!(!garbage.is_valid().unwrap());
    }

    #[test]
    fn test_attached_signature_verifies() {
        let wallet = Wallet::new();
        let tx = Transaction::new(Sender::User(wallet.address().clone()), "04bob", 7.0);
        let signature = wallet.sign_prehash(&tx.fingerprint_digest()).unwrap();

        let mut submitted = tx.clone();
        submitted.attach_signature(signature).unwrap();
        assert!(submitted.is_valid().unwrap());
    }

    #[test]
    fn test_canonical_encoding_is_length_prefixed() {
        let tx = Transaction::with_timestamp(Sender::Mint, "ab", 1.5, "t");
        let mut out = String::new();
        tx.write_canonical(&mut out);
        assert_eq!(out, "4:null2:ab3:1.51:t0:");
    }
}
