//! Publications file codec
//!
//! A publications file is the trust anchor distributed to clients. It lists
//! published calendar roots and the fingerprints of keys allowed to sign
//! rounds, and it is signed by the publisher.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! header (36 bytes):
//!   u16 version
//!   i64 first publication seconds
//!   u32 data block begin
//!   u16 publication cell size
//!   u32 number of publications
//!   u32 key hashes begin
//!   u16 key hash cell size
//!   u16 number of key hashes
//!   u32 signature block begin
//!   u32 reserved
//! cell: i64 seconds, u32 nanos, u8 hash algorithm id, digest
//! signature block: 32-byte publisher key, 64-byte Ed25519 signature
//!   over bytes [0, signature block begin)
//! ```

use crate::verify::verify_signature;
use kts_types::{Digest, Error, HashAlgorithm, PublicKey, Result, Signature, Timestamp};
use serde::Serialize;

pub const VERSION: u16 = 1;
pub const HEADER_LEN: usize = 36;
/// seconds + nanos + algorithm id + 32-byte digest
pub const CELL_LEN: usize = 8 + 4 + 1 + Digest::LEN;
pub const SIGNATURE_BLOCK_LEN: usize = PublicKey::LEN + Signature::LEN;

/// Calendar tree nodes are BLAKE3
const CELL_ALGORITHM: HashAlgorithm = HashAlgorithm::Blake3;

/// A published calendar root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicationRecord {
    pub time: Timestamp,
    pub root: Digest,
}

/// Fingerprint of a round signing key, trusted from `published_at` onwards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRecord {
    pub published_at: Timestamp,
    pub fingerprint: Digest,
}

/// Summary returned by [`PublicationsFile::verification_info`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationInfo {
    pub publications_count: usize,
    pub key_hash_count: usize,
    pub first_publication: Option<Timestamp>,
    pub last_publication: Option<Timestamp>,
    pub publisher: PublicKey,
}

/// A decoded, signature-checked publications file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationsFile {
    publications: Vec<PublicationRecord>,
    key_hashes: Vec<KeyRecord>,
    publisher: PublicKey,
}

impl PublicationsFile {
    pub fn publications(&self) -> &[PublicationRecord] {
        &self.publications
    }

    pub fn key_hashes(&self) -> &[KeyRecord] {
        &self.key_hashes
    }

    pub fn publisher(&self) -> &PublicKey {
        &self.publisher
    }

    pub fn last_publication_time(&self) -> Option<Timestamp> {
        self.publications.last().map(|p| p.time)
    }

    /// Publication with exactly this time
    pub fn publication_at(&self, time: &Timestamp) -> Option<&PublicationRecord> {
        self.publications
            .binary_search_by(|p| p.time.cmp(time))
            .ok()
            .map(|i| &self.publications[i])
    }

    /// Earliest publication at or after `time`
    pub fn first_publication_from(&self, time: &Timestamp) -> Option<&PublicationRecord> {
        let i = self.publications.partition_point(|p| p.time < *time);
        self.publications.get(i)
    }

    /// True if `fingerprint` was published no later than `at`
    pub fn is_key_trusted(&self, fingerprint: &Digest, at: &Timestamp) -> bool {
        self.key_hashes
            .iter()
            .any(|k| k.fingerprint == *fingerprint && k.published_at <= *at)
    }

    pub fn verification_info(&self) -> VerificationInfo {
        VerificationInfo {
            publications_count: self.publications.len(),
            key_hash_count: self.key_hashes.len(),
            first_publication: self.publications.first().map(|p| p.time),
            last_publication: self.last_publication_time(),
            publisher: self.publisher.clone(),
        }
    }

    /// Decode and verify a publications file
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = Header::parse(bytes)?;
        header.validate(bytes.len())?;

        let publications = (0..header.num_publications as usize)
            .map(|i| {
                let offset = header.data_block_begin as usize + i * header.publication_cell_size as usize;
                let (time, root) = parse_cell(&bytes[offset..offset + header.publication_cell_size as usize])?;
                Ok(PublicationRecord { time, root })
            })
            .collect::<Result<Vec<_>>>()?;

        if publications.windows(2).any(|w| w[0].time >= w[1].time) {
            return Err(invalid("publications are not in ascending order"));
        }
        match publications.first() {
            Some(first) if first.time.seconds != header.first_publication_seconds => {
                return Err(invalid("first publication time does not match header"));
            }
            _ => {}
        }

        let key_hashes = (0..header.num_key_hashes as usize)
            .map(|i| {
                let offset = header.key_hashes_begin as usize + i * header.key_hash_cell_size as usize;
                let (published_at, fingerprint) = parse_cell(&bytes[offset..offset + header.key_hash_cell_size as usize])?;
                Ok(KeyRecord {
                    published_at,
                    fingerprint,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let sig_begin = header.signature_block_begin as usize;
        let publisher = PublicKey::from_slice(&bytes[sig_begin..sig_begin + PublicKey::LEN])?;
        let signature = Signature::from_slice(&bytes[sig_begin + PublicKey::LEN..sig_begin + SIGNATURE_BLOCK_LEN])?;
        verify_signature(&publisher, &signature, &bytes[..sig_begin])
            .map_err(|e| invalid(&format!("signature check failed: {}", e)))?;

        Ok(Self {
            publications,
            key_hashes,
            publisher,
        })
    }
}

/// Assembles and signs publications files
#[derive(Debug, Clone, Default)]
pub struct PublicationsFileBuilder {
    publications: Vec<PublicationRecord>,
    key_hashes: Vec<KeyRecord>,
}

impl PublicationsFileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_publication(&mut self, time: Timestamp, root: Digest) -> &mut Self {
        self.publications.push(PublicationRecord { time, root });
        self
    }

    pub fn add_key(&mut self, published_at: Timestamp, key: &PublicKey) -> &mut Self {
        self.key_hashes.push(KeyRecord {
            published_at,
            fingerprint: key.fingerprint(),
        });
        self
    }

    /// Encode the file, signing it with `sign`.
    ///
    /// Publications are sorted and deduplicated by time first.
    pub fn encode<F, E>(&self, publisher: &PublicKey, sign: F) -> std::result::Result<Vec<u8>, E>
    where
        F: FnOnce(&[u8]) -> std::result::Result<Signature, E>,
    {
        let mut publications = self.publications.clone();
        publications.sort_by_key(|p| p.time);
        publications.dedup_by_key(|p| p.time);

        let data_block_begin = HEADER_LEN;
        let key_hashes_begin = data_block_begin + publications.len() * CELL_LEN;
        let signature_block_begin = key_hashes_begin + self.key_hashes.len() * CELL_LEN;

        let mut out = Vec::with_capacity(signature_block_begin + SIGNATURE_BLOCK_LEN);
        out.extend_from_slice(&VERSION.to_be_bytes());
        out.extend_from_slice(&publications.first().map_or(0, |p| p.time.seconds).to_be_bytes());
        out.extend_from_slice(&(data_block_begin as u32).to_be_bytes());
        out.extend_from_slice(&(CELL_LEN as u16).to_be_bytes());
        out.extend_from_slice(&(publications.len() as u32).to_be_bytes());
        out.extend_from_slice(&(key_hashes_begin as u32).to_be_bytes());
        out.extend_from_slice(&(CELL_LEN as u16).to_be_bytes());
        out.extend_from_slice(&(self.key_hashes.len() as u16).to_be_bytes());
        out.extend_from_slice(&(signature_block_begin as u32).to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());

        for p in &publications {
            write_cell(&mut out, &p.time, &p.root);
        }
        for k in &self.key_hashes {
            write_cell(&mut out, &k.published_at, &k.fingerprint);
        }

        let signature = sign(&out)?;
        out.extend_from_slice(publisher.as_bytes());
        out.extend_from_slice(signature.as_bytes());
        Ok(out)
    }
}

struct Header {
    version: u16,
    first_publication_seconds: i64,
    data_block_begin: u32,
    publication_cell_size: u16,
    num_publications: u32,
    key_hashes_begin: u32,
    key_hash_cell_size: u16,
    num_key_hashes: u16,
    signature_block_begin: u32,
}

impl Header {
    fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(invalid("file too short"));
        }
        let mut r = Reader { bytes, pos: 0 };
        let version = r.u16();
        if version != VERSION {
            return Err(Error::VersionMismatch {
                expected: VERSION as u32,
                actual: version as u32,
            });
        }
        if bytes.len() < HEADER_LEN {
            return Err(invalid("truncated header"));
        }
        Ok(Self {
            version,
            first_publication_seconds: r.i64(),
            data_block_begin: r.u32(),
            publication_cell_size: r.u16(),
            num_publications: r.u32(),
            key_hashes_begin: r.u32(),
            key_hash_cell_size: r.u16(),
            num_key_hashes: r.u16(),
            signature_block_begin: r.u32(),
        })
    }

    fn validate(&self, len: usize) -> Result<()> {
        debug_assert_eq!(self.version, VERSION);
        let data_begin = self.data_block_begin as u64;
        let keys_begin = self.key_hashes_begin as u64;
        let sig_begin = self.signature_block_begin as u64;

        if data_begin < HEADER_LEN as u64 || keys_begin < data_begin || sig_begin < keys_begin {
            return Err(invalid("block offsets out of order"));
        }
        if sig_begin + SIGNATURE_BLOCK_LEN as u64 != len as u64 {
            return Err(invalid("signature block does not end the file"));
        }
        if (self.publication_cell_size as usize) < CELL_LEN
            || (self.key_hash_cell_size as usize) < CELL_LEN
        {
            return Err(invalid("cell size too small"));
        }
        if (keys_begin - data_begin) / (self.publication_cell_size as u64) < self.num_publications as u64 {
            return Err(invalid("publication block too small"));
        }
        if (sig_begin - keys_begin) / (self.key_hash_cell_size as u64) < self.num_key_hashes as u64 {
            return Err(invalid("key hash block too small"));
        }
        Ok(())
    }
}

/// Cursor over a buffer already checked to be long enough
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u16(&mut self) -> u16 {
        u16::from_be_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_be_bytes(self.take())
    }

    fn i64(&mut self) -> i64 {
        i64::from_be_bytes(self.take())
    }
}

fn parse_cell(cell: &[u8]) -> Result<(Timestamp, Digest)> {
    let mut r = Reader { bytes: cell, pos: 0 };
    let seconds = r.i64();
    let nanos = r.u32();
    let time = Timestamp::new(seconds, nanos)?;
    let algorithm = HashAlgorithm::from_id(r.take::<1>()[0])?;
    if algorithm != CELL_ALGORITHM {
        return Err(Error::UnsupportedHashAlgorithm(format!(
            "{} in publications cell",
            algorithm
        )));
    }
    let digest = Digest::from_slice(&cell[r.pos..r.pos + Digest::LEN])?;
    Ok((time, digest))
}

fn write_cell(out: &mut Vec<u8>, time: &Timestamp, digest: &Digest) {
    out.extend_from_slice(&time.to_be_bytes());
    out.push(CELL_ALGORITHM.id());
    out.extend_from_slice(digest.as_bytes());
}

fn invalid(reason: &str) -> Error {
    Error::InvalidPublicationsFile(reason.to_string())
}
