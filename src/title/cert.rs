// title/cert.rs from ctrcheck (c) 2025 ctrcheck Contributors
// https://github.com/ctrcheck/ctrcheck
//
// Implements the structures and methods required for parsing the certificate
// asset that Ticket and TMD signatures are verified against.

use byteorder::{BigEndian, ByteOrder};
use rsa::{BigUint, RsaPublicKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("unexpected signature type 0x{0:08x}")]
    SignatureType(u32),
    #[error("unexpected key type 0x{0:08x}")]
    KeyType(u32),
    #[error("certificate data ends before the expected length")]
    Truncated,
    #[error("certificate contains an invalid RSA public key")]
    Key(#[from] rsa::Error),
}

/// A certificate used to verify digital signatures.
#[derive(Debug, Clone)]
pub struct Certificate {
    name: String,
    public_key: RsaPublicKey,
    raw: Vec<u8>,
}

impl Certificate {
    /// Creates a new Certificate instance from the binary data at the start
    /// of the given slice.
    pub fn from_bytes(data: &[u8]) -> Result<Certificate, CertificateError> {
        if data.len() < 0x4 {
            return Err(CertificateError::Truncated);
        }
        let signature_type = BigEndian::read_u32(data);
        let sig_len = match signature_type {
            0x10003 => 0x240,
            0x10004 => 0x140,
            _ => return Err(CertificateError::SignatureType(signature_type)),
        };
        if data.len() < sig_len + 0x88 {
            return Err(CertificateError::Truncated);
        }
        let key_type = BigEndian::read_u32(&data[sig_len + 0x40..]);
        let mod_len = match key_type {
            0x0 => 0x200,
            0x1 => 0x100,
            _ => return Err(CertificateError::KeyType(key_type)),
        };
        // The certificate is padded out to the next multiple of 64 after the
        // exponent.
        let cert_len = (sig_len + 0x88 + mod_len + 0x4 + 0x3f) & !0x3f;
        if data.len() < cert_len {
            return Err(CertificateError::Truncated);
        }
        let name = String::from_utf8_lossy(&data[sig_len + 0x44..sig_len + 0x84])
            .trim_end_matches('\0')
            .to_owned();
        let modulus = BigUint::from_bytes_be(&data[sig_len + 0x88..sig_len + 0x88 + mod_len]);
        let exponent = BigEndian::read_u32(&data[sig_len + 0x88 + mod_len..]);
        let public_key = RsaPublicKey::new(modulus, BigUint::from(exponent))?;
        Ok(Certificate {
            name,
            public_key,
            raw: data[..cert_len].to_vec(),
        })
    }

    /// Gets the name of the certificate as a string.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the RSA public key contained in the certificate.
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// Gets the raw bytes of the certificate, including its padding. Embedded
    /// certificate chains are compared against these bytes bit-for-bit.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

/// The certificates used to verify the signatures of tickets and TMDs.
#[derive(Debug, Clone)]
pub struct CertificateSet {
    pub ca: Certificate,
    pub ticket: Certificate,
    pub tmd: Certificate,
}

/// The retail and debug certificate sets parsed from the certificate asset.
/// Only the retail set is used for verification; the debug set is parsed so
/// that a malformed asset is rejected up front.
#[derive(Debug, Clone)]
pub struct CertificateStore {
    pub retail: CertificateSet,
    pub debug: CertificateSet,
}

impl CertificateStore {
    /// Parses the certificate asset blob. The asset is a 0x10-byte preamble
    /// followed by six certificates: the debug CA/Ticket/TMD triple, then the
    /// retail triple with the TMD certificate ahead of the Ticket one. That
    /// ordering is a fixed property of the asset, not a mistake.
    pub fn from_asset(data: &[u8]) -> Result<CertificateStore, CertificateError> {
        if data.len() < 0x10 {
            return Err(CertificateError::Truncated);
        }
        let mut offset = 0x10;
        let mut certs = Vec::with_capacity(6);
        for _ in 0..6 {
            let cert = Certificate::from_bytes(&data[offset..])?;
            offset += cert.raw().len();
            certs.push(cert);
        }
        let mut certs = certs.into_iter();
        let debug = CertificateSet {
            ca: certs.next().unwrap(),
            ticket: certs.next().unwrap(),
            tmd: certs.next().unwrap(),
        };
        let retail_ca = certs.next().unwrap();
        let retail_tmd = certs.next().unwrap();
        let retail_ticket = certs.next().unwrap();
        Ok(CertificateStore {
            retail: CertificateSet {
                ca: retail_ca,
                ticket: retail_ticket,
                tmd: retail_tmd,
            },
            debug,
        })
    }
}
