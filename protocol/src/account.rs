//! # Account Addresses
//!
//! An [`Account`] is the opaque identity of a vault participant: an owner
//! whose balance is custodied, a delegate acting on an owner's behalf, or the
//! custodian of the external token ledger. It is a fixed-width 20-byte
//! address rendered as `0x`-prefixed lowercase hex:
//!
//! ```text
//! 0x5fbdb2315678afecb367f032d93f642f64180aa3
//! ```
//!
//! The vault never looks inside an account. Equality, ordering and hashing
//! are all it needs for map keys.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of an account address in bytes.
pub const ACCOUNT_LENGTH: usize = 20;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while parsing an account address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountError {
    /// The decoded address does not have exactly [`ACCOUNT_LENGTH`] bytes.
    #[error("invalid account length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Expected number of bytes.
        expected: usize,
        /// Actual number of bytes.
        actual: usize,
    },

    /// The address is not valid hexadecimal.
    #[error("invalid account hex: {0}")]
    InvalidHex(String),
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// A 20-byte account address.
///
/// # Examples
///
/// ```
/// use zap_vault::Account;
///
/// let alice = Account::from_label("alice");
/// let parsed: Account = alice.to_string().parse().unwrap();
/// assert_eq!(alice, parsed);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Account([u8; ACCOUNT_LENGTH]);

impl Account {
    /// Wraps raw address bytes.
    pub const fn from_bytes(bytes: [u8; ACCOUNT_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Returns the raw address bytes.
    pub fn as_bytes(&self) -> &[u8; ACCOUNT_LENGTH] {
        &self.0
    }

    /// Derives a deterministic account from a human-readable label.
    ///
    /// Takes the first 20 bytes of `SHA-256(label)`. Used for devnet
    /// identities and tests, where "alice" should mean the same account
    /// on every run.
    pub fn from_label(label: &str) -> Self {
        let digest = Sha256::digest(label.as_bytes());
        let mut bytes = [0u8; ACCOUNT_LENGTH];
        bytes.copy_from_slice(&digest[..ACCOUNT_LENGTH]);
        Self(bytes)
    }

    /// Generates a random account from the thread-local RNG.
    pub fn random() -> Self {
        let mut bytes = [0u8; ACCOUNT_LENGTH];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Returns the lowercase hex encoding without the `0x` prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Account({})", self)
    }
}

impl FromStr for Account {
    type Err = AccountError;

    /// Parses 40 hex digits, with or without a `0x`/`0X` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);

        let decoded = hex::decode(digits).map_err(|e| AccountError::InvalidHex(e.to_string()))?;
        let bytes: [u8; ACCOUNT_LENGTH] = decoded.as_slice().try_into().map_err(|_| {
            AccountError::InvalidLength {
                expected: ACCOUNT_LENGTH,
                actual: decoded.len(),
            }
        })?;

        Ok(Self(bytes))
    }
}

impl Serialize for Account {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Account {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
