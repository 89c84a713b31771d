//! Deterministic certificate authority derived from a connection key.

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, PKCS_ED25519, SanType, SerialNumber,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tracing::debug;

use crate::error::KbtlsError;
use crate::key::ConnectionKey;

/// Validity of issued leaf certificates.
const LEAF_VALIDITY_DAYS: i64 = 365;

/// Which side of the handshake a leaf certificate is issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafRole {
    Server,
    Client,
}

impl LeafRole {
    fn usage(self) -> ExtendedKeyUsagePurpose {
        match self {
            LeafRole::Server => ExtendedKeyUsagePurpose::ServerAuth,
            LeafRole::Client => ExtendedKeyUsagePurpose::ClientAuth,
        }
    }
}

/// A leaf certificate together with its freshly generated private key.
pub struct IssuedCert {
    pub cert: CertificateDer<'static>,
    pub key: PrivateKeyDer<'static>,
}

/// CA certificate and key, fully determined by a [`ConnectionKey`].
///
/// The same key always yields a byte-identical certificate: ed25519
/// signatures are deterministic and every field is fixed. The serial number
/// is the raw public key, the subject common name its base64 form.
pub struct KeyedCa {
    cert: Certificate,
    key_pair: KeyPair,
    public_key: String,
}

impl KeyedCa {
    /// Derive the CA for `key`. Fails for the all-zero key.
    pub fn new(key: &ConnectionKey) -> Result<Self, KbtlsError> {
        let key_pair = key.signing_key()?;
        let public_key = key.public_key()?;

        let mut distinguished_name = DistinguishedName::new();
        distinguished_name.push(DnType::CommonName, public_key.clone());

        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name;
        params.serial_number = Some(SerialNumber::from_slice(key_pair.public_key_raw()));
        params.not_before = rcgen::date_time_ymd(1970, 1, 1);
        params.not_after = rcgen::date_time_ymd(9999, 1, 1);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyCertSign,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
        ];

        let cert = params.self_signed(&key_pair)?;

        Ok(Self {
            cert,
            key_pair,
            public_key,
        })
    }

    /// DER encoding of the CA certificate.
    pub fn der(&self) -> &CertificateDer<'static> {
        self.cert.der()
    }

    /// Base64 public key identity of this CA.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Issue a one-year leaf certificate for `name` with a new key pair.
    pub fn issue(&self, name: &str, role: LeafRole) -> Result<IssuedCert, KbtlsError> {
        let leaf_key = KeyPair::generate_for(&PKCS_ED25519)?;

        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params.subject_alt_names.push(SanType::DnsName(
            name.to_string()
                .try_into()
                .map_err(|_| KbtlsError::CertificateName(name.to_string()))?,
        ));

        let now = time::OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + time::Duration::days(LEAF_VALIDITY_DAYS);
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![role.usage()];
        params.use_authority_key_identifier_extension = true;

        let cert = params.signed_by(&leaf_key, &self.cert, &self.key_pair)?;
        debug!(name, role = ?role, "issued leaf certificate");

        Ok(IssuedCert {
            cert: cert.der().clone(),
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf_key.serialize_der())),
        })
    }
}
