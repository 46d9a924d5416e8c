// title/testutil.rs from ctrcheck (c) 2025 ctrcheck Contributors
// https://github.com/ctrcheck/ctrcheck
//
// Test-only fixtures: a synthetic certificate store backed by freshly
// generated RSA-2048 signing keys, and builders for tickets, TMDs, NCCH
// partitions, SMDH blobs, and whole CIA containers. The builders produce
// well-formed data by default; tests introduce their own corruption.

use std::sync::OnceLock;

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockEncryptMut, KeyIvInit, StreamCipher};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use rsa::pkcs1v15::Pkcs1v15Sign;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use sha2::Sha256;

use crate::hexfmt::Hex32;
use crate::title::cert::CertificateStore;
use crate::title::crypto::{self, Aes128Ctr};
use crate::title::tmd::{ContentType, TmdContent};
use crate::title::commonkeys;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

pub const TICKET_ID: u64 = 0x0123456789abcdef;
pub const CONTENT_ID: u32 = 0x1f;

pub struct Fixture {
    pub store: CertificateStore,
    pub ticket_key: RsaPrivateKey,
    pub tmd_key: RsaPrivateKey,
}

static FIXTURE: OnceLock<Fixture> = OnceLock::new();

/// A certificate store built from generated keys, shared by all tests in the
/// binary. Key generation is slow enough to be worth doing once.
pub fn fixture() -> &'static Fixture {
    FIXTURE.get_or_init(|| {
        let mut rng = rand::thread_rng();
        let ca_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let ticket_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let tmd_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();

        let mut asset = vec![0u8; 0x10];
        asset.extend_from_slice(&build_cert(0x10003, "CA00000004", &ca_key));
        asset.extend_from_slice(&build_cert(0x10004, "XS00000009", &ticket_key));
        asset.extend_from_slice(&build_cert(0x10004, "CP0000000a", &tmd_key));
        asset.extend_from_slice(&build_cert(0x10003, "CA00000003", &ca_key));
        // The retail TMD certificate sits ahead of the Ticket one.
        asset.extend_from_slice(&build_cert(0x10004, "CP0000000b", &tmd_key));
        asset.extend_from_slice(&build_cert(0x10004, "XS0000000c", &ticket_key));

        let store = CertificateStore::from_asset(&asset).unwrap();
        Fixture {
            store,
            ticket_key,
            tmd_key,
        }
    })
}

/// Builds a certificate slot holding the public half of the given key.
pub fn build_cert(signature_type: u32, name: &str, key: &RsaPrivateKey) -> Vec<u8> {
    let sig_len = match signature_type {
        0x10003 => 0x240,
        0x10004 => 0x140,
        _ => panic!("unsupported signature type"),
    };
    let cert_len = (sig_len + 0x88 + 0x100 + 0x4 + 0x3f) & !0x3f;
    let mut cert = vec![0u8; cert_len];
    BigEndian::write_u32(&mut cert, signature_type);
    BigEndian::write_u32(&mut cert[sig_len + 0x40..], 0x1);
    cert[sig_len + 0x44..sig_len + 0x44 + name.len()].copy_from_slice(name.as_bytes());
    let modulus = key.n().to_bytes_be();
    cert[sig_len + 0x188 - modulus.len()..sig_len + 0x188].copy_from_slice(&modulus);
    BigEndian::write_u32(&mut cert[sig_len + 0x188..], 65537);
    cert
}

/// Signs data the way the console's certificates do: RSA-PKCS#1-v1.5 over
/// its SHA-256 digest.
pub fn sign(key: &RsaPrivateKey, data: &[u8]) -> Vec<u8> {
    key.sign(Pkcs1v15Sign::new::<Sha256>(), &crypto::sha256(data))
        .unwrap()
}

/// Encrypts a title key under the indexed common key, inverting the ticket
/// parser's decryption.
pub fn encrypt_title_key(title_key: [u8; 16], index: u8, title_id: u64) -> [u8; 16] {
    let common_key = commonkeys::get_common_key(index).unwrap();
    let mut iv = [0u8; 16];
    BigEndian::write_u64(&mut iv, title_id);
    let mut block = title_key;
    Aes128CbcEnc::new(&common_key.into(), &iv.into())
        .encrypt_padded_mut::<NoPadding>(&mut block, 16)
        .unwrap();
    block
}

/// Encrypts a content payload the way a CIA stores it.
pub fn encrypt_content(plain: &[u8], title_key: [u8; 16], index: u16) -> Vec<u8> {
    let mut buf = plain.to_vec();
    let len = buf.len();
    Aes128CbcEnc::new(&title_key.into(), &crypto::content_iv(index).into())
        .encrypt_padded_mut::<NoPadding>(&mut buf, len)
        .unwrap();
    buf
}

/// Builds a well-formed, signed ticket for the given title, carrying the
/// given (decrypted) title key under common key 0.
pub fn build_ticket(title_id: u64, title_key: [u8; 16]) -> Vec<u8> {
    let fixture = fixture();
    let mut ticket = vec![0u8; 0x350];
    BigEndian::write_u32(&mut ticket, 0x10004);
    {
        let data = &mut ticket[0x140..];
        let issuer = format!(
            "Root-{}-{}",
            fixture.store.retail.ca.name(),
            fixture.store.retail.ticket.name()
        );
        data[..issuer.len()].copy_from_slice(issuer.as_bytes());
        let encrypted = encrypt_title_key(title_key, 0, title_id);
        data[0x7f..0x8f].copy_from_slice(&encrypted);
        BigEndian::write_u64(&mut data[0x90..], TICKET_ID);
        BigEndian::write_u32(&mut data[0x98..], 0);
        BigEndian::write_u64(&mut data[0x9c..], title_id);
        data[0xb1] = 0;
    }
    let signature = sign(&fixture.ticket_key, &ticket[0x140..]);
    ticket[0x4..0x104].copy_from_slice(&signature);
    ticket
}

/// Shorthand for a TMD content chunk record.
pub fn content(id: u32, index: u16, content_type: ContentType, size: u64, hash: [u8; 32]) -> TmdContent {
    TmdContent {
        id: Hex32(id),
        index,
        content_type,
        size,
        hash,
    }
}

/// Builds a well-formed, signed TMD listing the given contents, with a
/// single content info record covering all of them.
pub fn build_tmd(title_id: u64, title_version: u16, contents: &[TmdContent]) -> Vec<u8> {
    let fixture = fixture();
    let mut tmd = vec![0u8; 0xb04];
    BigEndian::write_u32(&mut tmd, 0x10004);

    let mut chunks = Vec::with_capacity(contents.len() * 0x30);
    for content in contents {
        let mut record = [0u8; 0x30];
        BigEndian::write_u32(&mut record, content.id.0);
        BigEndian::write_u16(&mut record[0x4..], content.index);
        BigEndian::write_u16(&mut record[0x6..], content.content_type.bits());
        BigEndian::write_u64(&mut record[0x8..], content.size);
        record[0x10..].copy_from_slice(&content.hash);
        chunks.extend_from_slice(&record);
    }

    if !contents.is_empty() {
        let info = &mut tmd[0x204..0x228];
        BigEndian::write_u16(&mut info[0x2..], contents.len() as u16);
        let hash = crypto::sha256(&chunks);
        info[0x4..0x24].copy_from_slice(&hash);
    }

    {
        let header = &mut tmd[0x140..0x204];
        let issuer = format!(
            "Root-{}-{}",
            fixture.store.retail.ca.name(),
            fixture.store.retail.tmd.name()
        );
        header[..issuer.len()].copy_from_slice(issuer.as_bytes());
        BigEndian::write_u64(&mut header[0x4c..], title_id);
        BigEndian::write_u16(&mut header[0x9c..], title_version);
        BigEndian::write_u16(&mut header[0x9e..], contents.len() as u16);
    }
    refresh_tmd_info_hash(&mut tmd);
    let signature = sign(&fixture.tmd_key, &tmd[0x140..0x204]);
    tmd[0x4..0x104].copy_from_slice(&signature);

    tmd.extend_from_slice(&chunks);
    tmd
}

/// Rewrites the header's hash over the content info records. Needed after a
/// test edits the info records directly; the signature is left stale.
pub fn refresh_tmd_info_hash(tmd: &mut [u8]) {
    let hash = crypto::sha256(&tmd[0x204..0xb04]);
    tmd[0x1e4..0x204].copy_from_slice(&hash);
}

/// Builds a minimal NCCH partition of the given total size with no ExeFS.
pub fn build_ncch(program_id: u64, size: usize) -> Vec<u8> {
    assert!(size >= 0x1e0);
    let mut data = vec![0u8; size];
    data[0x100..0x104].copy_from_slice(b"NCCH");
    LittleEndian::write_u64(&mut data[0x108..], program_id);
    LittleEndian::write_u64(&mut data[0x118..], program_id);
    data[0x188 + 7] = 0x4;
    data
}

pub enum ExefsCrypto {
    None,
    Scrambled,
}

/// Builds an NCCH partition carrying an ExeFS whose only file is the given
/// SMDH icon, optionally encrypted with the scrambler-derived key.
pub fn build_ncch_with_exefs(program_id: u64, smdh: &[u8], crypto_mode: ExefsCrypto) -> Vec<u8> {
    let exefs_offset = 0x200usize;
    let exefs_units = 0x1du32;
    let exefs_size = exefs_units as usize * 0x200;
    let mut data = vec![0u8; exefs_offset + exefs_size];

    // The leading quarter of the signature doubles as KeyY.
    for (i, byte) in data[..0x10].iter_mut().enumerate() {
        *byte = i as u8 + 1;
    }
    data[0x100..0x104].copy_from_slice(b"NCCH");
    LittleEndian::write_u64(&mut data[0x108..], program_id);
    LittleEndian::write_u64(&mut data[0x118..], program_id);
    LittleEndian::write_u32(&mut data[0x1a0..], 1);
    LittleEndian::write_u32(&mut data[0x1a4..], exefs_units);

    {
        let exefs = &mut data[exefs_offset..];
        exefs[..4].copy_from_slice(b"icon");
        LittleEndian::write_u32(&mut exefs[0xc..], 0x36c0);
        exefs[0x200..0x200 + smdh.len()].copy_from_slice(smdh);
    }

    match crypto_mode {
        ExefsCrypto::None => data[0x188 + 7] = 0x4,
        ExefsCrypto::Scrambled => {
            let key_y = u128::from_be_bytes(data[..0x10].try_into().unwrap());
            let key = crypto::scramble(crypto::NCCH_KEY_X, key_y);
            let mut iv = [0u8; 16];
            BigEndian::write_u64(&mut iv, program_id);
            iv[8] = 2;
            Aes128Ctr::new(&key.into(), &iv.into()).apply_keystream(&mut data[exefs_offset..]);
        }
    }
    data
}

/// Builds an SMDH blob with the given English titles and region flags.
pub fn build_smdh(short: &str, long: &str, publisher: &str, region_flags: u32) -> Vec<u8> {
    let mut data = vec![0u8; 0x36c0];
    data[..4].copy_from_slice(b"SMDH");
    write_utf16_le(&mut data[0x208..0x288], short);
    write_utf16_le(&mut data[0x288..0x388], long);
    write_utf16_le(&mut data[0x388..0x408], publisher);
    LittleEndian::write_u32(&mut data[0x2018..], region_flags);
    data
}

fn write_utf16_le(dst: &mut [u8], s: &str) {
    for (i, unit) in s.encode_utf16().enumerate() {
        LittleEndian::write_u16(&mut dst[i * 2..], unit);
    }
}

/// The record half of a content section in a [`CiaSpec`].
pub struct RecordSpec {
    pub id: u32,
    pub index: u16,
    pub content_type: ContentType,
}

/// One content section in a [`CiaSpec`]. The payload itself is generated at
/// build time; `size` is the payload size for present contents and the
/// recorded size for absent ones.
pub struct ContentSpec {
    pub record: RecordSpec,
    pub present: bool,
    pub size: usize,
}

/// A description of the CIA container to build, with switches for the
/// malformations the tests exercise.
pub struct CiaSpec {
    pub title_id: u64,
    pub title_key: [u8; 16],
    pub title_version: u16,
    pub contents: Vec<ContentSpec>,
    pub with_icon: bool,
    pub meta: bool,
    pub ticket_title_id: Option<u64>,
    pub ticket_signature_type: Option<u32>,
    pub corrupt_ticket_signature: bool,
    pub ticket_trailer: bool,
    pub swap_chain_certs: bool,
    pub corrupt_first_content_byte: bool,
    pub corrupt_ncch_magic: bool,
    pub ncch_program_id: Option<u64>,
    pub extra_bitmap_index: Option<u16>,
    pub dirty_padding: bool,
}

impl CiaSpec {
    pub fn new(title_id: u64, title_key: [u8; 16]) -> Self {
        CiaSpec {
            title_id,
            title_key,
            title_version: 1041,
            contents: Vec::new(),
            with_icon: false,
            meta: false,
            ticket_title_id: None,
            ticket_signature_type: None,
            corrupt_ticket_signature: false,
            ticket_trailer: false,
            swap_chain_certs: false,
            corrupt_first_content_byte: false,
            corrupt_ncch_magic: false,
            ncch_program_id: None,
            extra_bitmap_index: None,
            dirty_padding: false,
        }
    }

    /// A CIA with a single 0x200-byte encrypted content.
    pub fn single_content(title_id: u64, title_key: [u8; 16]) -> Self {
        let mut spec = Self::new(title_id, title_key);
        spec.contents.push(ContentSpec {
            record: RecordSpec {
                id: CONTENT_ID,
                index: 0,
                content_type: ContentType::ENCRYPTED,
            },
            present: true,
            size: 0x200,
        });
        spec
    }

    /// A CIA whose second content is optional and absent.
    pub fn with_missing_optional(title_id: u64, title_key: [u8; 16]) -> Self {
        let mut spec = Self::single_content(title_id, title_key);
        spec.contents.push(ContentSpec {
            record: RecordSpec {
                id: CONTENT_ID + 1,
                index: 1,
                content_type: ContentType::ENCRYPTED.union(ContentType::OPTIONAL),
            },
            present: false,
            size: 0x4000,
        });
        spec
    }

    /// A CIA whose first content carries an ExeFS icon.
    pub fn with_icon(title_id: u64, title_key: [u8; 16]) -> Self {
        let mut spec = Self::single_content(title_id, title_key);
        spec.with_icon = true;
        spec
    }
}

fn pad_to_64(buf: &mut Vec<u8>) {
    let len = (buf.len() + 0x3f) & !0x3f;
    buf.resize(len, 0);
}

/// Assembles a CIA container from the given spec.
pub fn build_cia(spec: CiaSpec) -> Vec<u8> {
    let fixture = fixture();
    let retail = &fixture.store.retail;
    let ticket_title_id = spec.ticket_title_id.unwrap_or(spec.title_id);
    let program_id = spec.ncch_program_id.unwrap_or(spec.title_id);

    // Generate the payloads and derive the TMD records from them.
    let mut records = Vec::with_capacity(spec.contents.len());
    let mut blobs: Vec<Option<Vec<u8>>> = Vec::with_capacity(spec.contents.len());
    for (i, section) in spec.contents.iter().enumerate() {
        if !section.present {
            records.push(content(
                section.record.id,
                section.record.index,
                section.record.content_type,
                section.size as u64,
                [0x22; 32],
            ));
            blobs.push(None);
            continue;
        }

        let mut payload = if spec.with_icon && i == 0 {
            let smdh = build_smdh("Example", "An example application", "Examplesoft", 0x01);
            build_ncch_with_exefs(program_id, &smdh, ExefsCrypto::None)
        } else {
            build_ncch(program_id, section.size)
        };
        if spec.corrupt_ncch_magic && i == 0 {
            payload[0x100] = b'X';
        }

        let hash = crypto::sha256(&payload);
        let size = payload.len() as u64;
        let mut blob = payload;
        if section.record.content_type.contains(ContentType::ENCRYPTED) {
            blob = encrypt_content(&blob, spec.title_key, section.record.index);
        }
        if spec.corrupt_first_content_byte && i == 0 {
            blob[0] ^= 1;
        }
        records.push(content(
            section.record.id,
            section.record.index,
            section.record.content_type,
            size,
            hash,
        ));
        blobs.push(Some(blob));
    }

    let mut ticket = build_ticket(ticket_title_id, spec.title_key);
    if let Some(signature_type) = spec.ticket_signature_type {
        BigEndian::write_u32(&mut ticket, signature_type);
    }
    if spec.corrupt_ticket_signature {
        ticket[0x10] ^= 1;
    }
    if spec.ticket_trailer {
        ticket.extend_from_slice(retail.ticket.raw());
        ticket.extend_from_slice(retail.ca.raw());
    }

    let tmd = build_tmd(spec.title_id, spec.title_version, &records);

    let mut bitmap = [0u8; 0x2000];
    let mut content_len = 0u64;
    for (section, blob) in spec.contents.iter().zip(&blobs) {
        if let Some(blob) = blob {
            bitmap[section.record.index as usize / 8] |= 1 << (7 - section.record.index % 8);
            content_len += blob.len() as u64;
        }
    }
    if let Some(index) = spec.extra_bitmap_index {
        bitmap[index as usize / 8] |= 1 << (7 - index % 8);
    }

    let certs_len = retail.ca.raw().len() + retail.ticket.raw().len() + retail.tmd.raw().len();
    let mut cia = vec![0u8; 0x2020];
    LittleEndian::write_u32(&mut cia, 0x2020);
    LittleEndian::write_u32(&mut cia[0x8..], certs_len as u32);
    LittleEndian::write_u32(&mut cia[0xc..], ticket.len() as u32);
    LittleEndian::write_u32(&mut cia[0x10..], tmd.len() as u32);
    LittleEndian::write_u32(&mut cia[0x14..], if spec.meta { 0x3ac0 } else { 0 });
    LittleEndian::write_u64(&mut cia[0x18..], content_len);
    cia[0x20..0x2020].copy_from_slice(&bitmap);

    pad_to_64(&mut cia);
    if spec.dirty_padding {
        // Alignment padding content is unspecified and must not be checked.
        cia[0x2030] = 0xff;
    }
    if spec.swap_chain_certs {
        cia.extend_from_slice(retail.ca.raw());
        cia.extend_from_slice(retail.tmd.raw());
        cia.extend_from_slice(retail.ticket.raw());
    } else {
        cia.extend_from_slice(retail.ca.raw());
        cia.extend_from_slice(retail.ticket.raw());
        cia.extend_from_slice(retail.tmd.raw());
    }
    pad_to_64(&mut cia);
    cia.extend_from_slice(&ticket);
    pad_to_64(&mut cia);
    cia.extend_from_slice(&tmd);
    pad_to_64(&mut cia);
    for blob in blobs.into_iter().flatten() {
        cia.extend_from_slice(&blob);
    }
    if spec.meta {
        pad_to_64(&mut cia);
        cia.resize(cia.len() + 0x3ac0, 0);
    }
    cia
}
