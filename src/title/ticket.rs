// title/ticket.rs from ctrcheck (c) 2025 ctrcheck Contributors
// https://github.com/ctrcheck/ctrcheck
//
// Implements parsing and signature verification for CTR tickets.

use std::io::Read;

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use crate::hexfmt::{Hex32, Hex64};
use crate::reader::Reader;
use crate::title::cert::CertificateStore;
use crate::title::{commonkeys, crypto};

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("signature type must be 0x00010004, got 0x{0:08x}")]
    SignatureType(u32),
    #[error("unexpected signature issuer `{issuer}`, expected `{expected}`")]
    UnexpectedIssuer { issuer: String, expected: String },
    #[error("common key index must be less than 6, got {0}")]
    CommonKeyIndex(u8),
    #[error("invalid {0} certificate in certs trailer")]
    TrailerCert(&'static str),
    #[error("extraneous data after {0} bytes")]
    ExtraneousData(u64),
    #[error("ticket data could not be read")]
    IO(#[from] std::io::Error),
}

/// A title key in both the encrypted form carried by the ticket and the form
/// decrypted with the selected common key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TitleKey {
    pub encrypted: [u8; 16],
    pub decrypted: [u8; 16],
}

/// The result of checking a ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketInfo {
    pub legit: bool,
    pub ticket_id: Hex64,
    pub console_id: Hex32,
    pub title_id: Hex64,
    pub title_key: TitleKey,
    pub certs_trailer: bool,
}

/// Reads a ticket from the given source and verifies it against the retail
/// certificates. Structural problems are errors; a bad signature only clears
/// the `legit` flag. Standalone ticket files may carry a trailing certificate
/// chain, which must then match the retail Ticket and CA certificates
/// exactly.
pub fn check_ticket<R: Read>(input: R, certs: &CertificateStore) -> Result<TicketInfo, TicketError> {
    let mut reader = Reader::new(input);

    let mut ticket = [0u8; 0x350];
    reader.read_exact(&mut ticket)?;

    let signature_type = BigEndian::read_u32(&ticket);
    if signature_type != 0x10004 {
        return Err(TicketError::SignatureType(signature_type));
    }

    let signature = &ticket[0x4..0x104];
    let data = &ticket[0x140..];

    let issuer = String::from_utf8_lossy(&data[..0x40])
        .trim_end_matches('\0')
        .to_owned();
    let expected = format!(
        "Root-{}-{}",
        certs.retail.ca.name(),
        certs.retail.ticket.name()
    );
    if issuer != expected {
        return Err(TicketError::UnexpectedIssuer { issuer, expected });
    }

    let legit = crypto::verify_signature(certs.retail.ticket.public_key(), data, signature);

    let encrypted_title_key: [u8; 16] = data[0x7f..0x8f].try_into().unwrap();
    let ticket_id = BigEndian::read_u64(&data[0x90..]);
    let console_id = BigEndian::read_u32(&data[0x98..]);
    let title_id = BigEndian::read_u64(&data[0x9c..]);
    let common_key_index = data[0xb1];

    let common_key = commonkeys::get_common_key(common_key_index)
        .ok_or(TicketError::CommonKeyIndex(common_key_index))?;
    let decrypted_title_key = crypto::decrypt_title_key(encrypted_title_key, common_key, title_id);

    let ticket_cert = certs.retail.ticket.raw();
    let ca_cert = certs.retail.ca.raw();
    let mut trailer = vec![0u8; ticket_cert.len() + ca_cert.len()];
    let certs_trailer = reader.read_exact_or_eof(&mut trailer)?;
    if certs_trailer {
        if trailer[..ticket_cert.len()] != *ticket_cert {
            return Err(TicketError::TrailerCert("ticket"));
        }
        if trailer[ticket_cert.len()..] != *ca_cert {
            return Err(TicketError::TrailerCert("CA"));
        }
    }

    let end = reader.offset();
    if !reader.at_eof()? {
        return Err(TicketError::ExtraneousData(end));
    }

    Ok(TicketInfo {
        legit,
        ticket_id: Hex64(ticket_id),
        console_id: Hex32(console_id),
        title_id: Hex64(title_id),
        title_key: TitleKey {
            encrypted: encrypted_title_key,
            decrypted: decrypted_title_key,
        },
        certs_trailer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::title::testutil;

    const TITLE_ID: u64 = 0x000400000fedcc00;
    const TITLE_KEY: [u8; 16] = [0xd0; 16];

    #[test]
    fn test_valid_ticket() {
        let fixture = testutil::fixture();
        let ticket = testutil::build_ticket(TITLE_ID, TITLE_KEY);
        let info = check_ticket(Cursor::new(&ticket), &fixture.store).unwrap();
        assert!(info.legit);
        assert_eq!(info.title_id, Hex64(TITLE_ID));
        assert_eq!(info.ticket_id, Hex64(testutil::TICKET_ID));
        assert_eq!(info.console_id, Hex32(0));
        assert_eq!(info.title_key.decrypted, TITLE_KEY);
        assert!(!info.certs_trailer);
    }

    #[test]
    fn test_corrupted_signature_is_not_legit() {
        let fixture = testutil::fixture();
        let mut ticket = testutil::build_ticket(TITLE_ID, TITLE_KEY);
        ticket[0x10] ^= 1;
        let info = check_ticket(Cursor::new(&ticket), &fixture.store).unwrap();
        assert!(!info.legit);
        // Everything else still parses.
        assert_eq!(info.title_key.decrypted, TITLE_KEY);
    }

    #[test]
    fn test_modified_data_is_not_legit() {
        let fixture = testutil::fixture();
        let mut ticket = testutil::build_ticket(TITLE_ID, TITLE_KEY);
        // Bump the ticket ID, which is covered by the signature.
        ticket[0x140 + 0x97] ^= 1;
        let info = check_ticket(Cursor::new(&ticket), &fixture.store).unwrap();
        assert!(!info.legit);
    }

    #[test]
    fn test_bad_signature_type() {
        let fixture = testutil::fixture();
        let mut ticket = testutil::build_ticket(TITLE_ID, TITLE_KEY);
        ticket[0x3] = 0x03;
        assert!(matches!(
            check_ticket(Cursor::new(&ticket), &fixture.store),
            Err(TicketError::SignatureType(0x10003))
        ));
    }

    #[test]
    fn test_bad_issuer() {
        let fixture = testutil::fixture();
        let mut ticket = testutil::build_ticket(TITLE_ID, TITLE_KEY);
        ticket[0x140] = b'B';
        let err = check_ticket(Cursor::new(&ticket), &fixture.store).unwrap_err();
        assert!(matches!(err, TicketError::UnexpectedIssuer { .. }));
    }

    #[test]
    fn test_common_key_index_out_of_range() {
        let fixture = testutil::fixture();
        let mut ticket = testutil::build_ticket(TITLE_ID, TITLE_KEY);
        ticket[0x140 + 0xb1] = 6;
        assert!(matches!(
            check_ticket(Cursor::new(&ticket), &fixture.store),
            Err(TicketError::CommonKeyIndex(6))
        ));
    }

    #[test]
    fn test_truncated_ticket() {
        let fixture = testutil::fixture();
        let ticket = testutil::build_ticket(TITLE_ID, TITLE_KEY);
        assert!(matches!(
            check_ticket(Cursor::new(&ticket[..0x200]), &fixture.store),
            Err(TicketError::IO(_))
        ));
    }

    #[test]
    fn test_certs_trailer() {
        let fixture = testutil::fixture();
        let mut ticket = testutil::build_ticket(TITLE_ID, TITLE_KEY);
        ticket.extend_from_slice(fixture.store.retail.ticket.raw());
        ticket.extend_from_slice(fixture.store.retail.ca.raw());
        let info = check_ticket(Cursor::new(&ticket), &fixture.store).unwrap();
        assert!(info.certs_trailer);
        assert!(info.legit);
    }

    #[test]
    fn test_wrong_trailer_certificate() {
        let fixture = testutil::fixture();
        let mut ticket = testutil::build_ticket(TITLE_ID, TITLE_KEY);
        // TMD certificate where the ticket certificate belongs.
        ticket.extend_from_slice(fixture.store.retail.tmd.raw());
        ticket.extend_from_slice(fixture.store.retail.ca.raw());
        assert!(matches!(
            check_ticket(Cursor::new(&ticket), &fixture.store),
            Err(TicketError::TrailerCert("ticket"))
        ));
    }

    #[test]
    fn test_truncated_trailer() {
        let fixture = testutil::fixture();
        let mut ticket = testutil::build_ticket(TITLE_ID, TITLE_KEY);
        ticket.extend_from_slice(&fixture.store.retail.ticket.raw()[..0x100]);
        assert!(matches!(
            check_ticket(Cursor::new(&ticket), &fixture.store),
            Err(TicketError::IO(_))
        ));
    }

    #[test]
    fn test_extraneous_data() {
        let fixture = testutil::fixture();
        let mut ticket = testutil::build_ticket(TITLE_ID, TITLE_KEY);
        ticket.extend_from_slice(fixture.store.retail.ticket.raw());
        ticket.extend_from_slice(fixture.store.retail.ca.raw());
        let trailer_end = ticket.len() as u64;
        ticket.push(0);
        assert!(matches!(
            check_ticket(Cursor::new(&ticket), &fixture.store),
            Err(TicketError::ExtraneousData(n)) if n == trailer_end
        ));
    }
}
