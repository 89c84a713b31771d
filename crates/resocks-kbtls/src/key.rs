//! Connection keys: the shared secret all tunnel trust is derived from.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use rcgen::{KeyPair, PKCS_ED25519};
use rustls::pki_types::PrivatePkcs8KeyDer;

use crate::error::KbtlsError;

/// Length of a connection key in bytes (an ed25519 seed).
pub const KEY_LEN: usize = 32;

const MAX_GENERATE_ATTEMPTS: usize = 10;

/// PKCS#8 v1 header for a bare ed25519 seed (RFC 8410).
const ED25519_PKCS8_PREFIX: [u8; 16] = [
    0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x04, 0x22, 0x04, 0x20,
];

/// A 32-byte shared secret, used as the seed of the CA's ed25519 key.
///
/// Any byte array converts into a key, but every consumer rejects the
/// all-zero key before doing anything with it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConnectionKey([u8; KEY_LEN]);

impl ConnectionKey {
    /// Generate a fresh random key from the OS random source.
    pub fn generate() -> Result<Self, KbtlsError> {
        Self::generate_with(&mut OsRng)
    }

    pub(crate) fn generate_with<R: RngCore>(rng: &mut R) -> Result<Self, KbtlsError> {
        let mut bytes = [0u8; KEY_LEN];

        for _ in 0..MAX_GENERATE_ATTEMPTS {
            rng.try_fill_bytes(&mut bytes)?;

            if !is_zero(&bytes) {
                return Ok(Self(bytes));
            }
        }

        Err(KbtlsError::Exhausted(MAX_GENERATE_ATTEMPTS))
    }

    /// Whether the key consists only of zero bytes.
    pub fn is_zero(&self) -> bool {
        is_zero(&self.0)
    }

    /// Fail with [`KbtlsError::ZeroKey`] for the all-zero key.
    pub fn check(&self) -> Result<(), KbtlsError> {
        if self.is_zero() {
            return Err(KbtlsError::ZeroKey);
        }
        Ok(())
    }

    /// Unpadded base64 of the ed25519 public key belonging to this key.
    ///
    /// The CA's subject and serial number carry this identity, so a CA can be
    /// matched to a key out of band.
    pub fn public_key(&self) -> Result<String, KbtlsError> {
        let key_pair = self.signing_key()?;
        Ok(STANDARD_NO_PAD.encode(key_pair.public_key_raw()))
    }

    /// DNS-safe rendering of the public key, used as certificate name and SNI.
    ///
    /// Lowercase hex split into two 32-character labels.
    pub fn tls_name(&self) -> Result<String, KbtlsError> {
        let key_pair = self.signing_key()?;
        Ok(dns_name_for(key_pair.public_key_raw()))
    }

    /// The CA key pair, derived deterministically from the seed.
    pub(crate) fn signing_key(&self) -> Result<KeyPair, KbtlsError> {
        self.check()?;

        let mut der = Vec::with_capacity(ED25519_PKCS8_PREFIX.len() + KEY_LEN);
        der.extend_from_slice(&ED25519_PKCS8_PREFIX);
        der.extend_from_slice(&self.0);

        let key_pair =
            KeyPair::from_pkcs8_der_and_sign_algo(&PrivatePkcs8KeyDer::from(der), &PKCS_ED25519)?;
        Ok(key_pair)
    }
}

impl From<[u8; KEY_LEN]> for ConnectionKey {
    fn from(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }
}

impl FromStr for ConnectionKey {
    type Err = KbtlsError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        if key.is_empty() {
            return Err(KbtlsError::EmptyKey);
        }

        let decoded = STANDARD_NO_PAD.decode(key)?;
        let bytes: [u8; KEY_LEN] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| KbtlsError::KeyLength(decoded.len()))?;

        let key = Self(bytes);
        key.check()?;
        Ok(key)
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&STANDARD_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConnectionKey(..)")
    }
}

fn dns_name_for(public_key: &[u8]) -> String {
    let hex: String = public_key.iter().map(|b| format!("{b:02x}")).collect();
    let (first, second) = hex.split_at(hex.len() / 2);
    format!("{first}.{second}")
}

fn is_zero(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == 0)
}
