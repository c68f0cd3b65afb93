//! Archive wire format
//!
//! ```text
//! [MAGIC 8B]["VLTEXPRT"] [VERSION u16] [SALT 16B] [ITERATIONS u32] [KEY CHECK 32B]
//! entry*:
//!   [KIND 0x01] [PATH_LEN u16] [PATH utf-8] [IV 16B]
//!   [PLAINTEXT_LEN u64] [CIPHERTEXT_LEN u64] [CIPHERTEXT]
//!   [STATUS u8] [TAG 32B]
//! [KIND 0xFF] [ENTRY_COUNT u32] [MANIFEST TAG 32B]
//! ```
//!
//! Integers are little-endian. Every entry keeps its declared framing even
//! when its source failed mid-stream, so readers can always step over it.

use std::io::{self, Read};

use crate::crypto::{ciphertext_len, Iv, Salt, Tag, IV_LEN, SALT_LEN, TAG_LEN};
use crate::error::{ExportError, Result};

/// Magic bytes identifying an export archive
pub const MAGIC: &[u8; 8] = b"VLTEXPRT";

/// Current format version
pub const FORMAT_VERSION: u16 = 0x0001;

/// Record kinds
pub const KIND_ENTRY: u8 = 0x01;
pub const KIND_END: u8 = 0xFF;

/// Entry status written after the ciphertext
pub const STATUS_SEALED: u8 = 0x01;
pub const STATUS_ABANDONED: u8 = 0x00;

/// MAGIC + VERSION + SALT + ITERATIONS
pub const HEADER_LEN: usize = 8 + 2 + SALT_LEN + 4;

fn truncated(what: &str) -> ExportError {
    ExportError::InvalidArchive(format!("truncated {}", what))
}

fn read_array<const N: usize, R: Read + ?Sized>(reader: &mut R) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn eof_as(what: &'static str) -> impl Fn(io::Error) -> ExportError {
    move |e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            truncated(what)
        } else {
            ExportError::Io(e)
        }
    }
}

/// Archive-wide parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub version: u16,
    pub salt: Salt,
    pub iterations: u32,
}

impl ArchiveHeader {
    pub fn new(salt: Salt, iterations: u32) -> Self {
        Self {
            version: FORMAT_VERSION,
            salt,
            iterations,
        }
    }

    /// Header bytes covered by the key check tag
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.iterations.to_le_bytes());
        out
    }

    /// Reads the header and its key check tag
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<(Self, Tag)> {
        let magic: [u8; 8] = read_array(reader).map_err(eof_as("header"))?;
        if &magic != MAGIC {
            return Err(ExportError::InvalidArchive("invalid magic bytes".into()));
        }

        let version = u16::from_le_bytes(read_array(reader).map_err(eof_as("header"))?);
        if version != FORMAT_VERSION {
            return Err(ExportError::UnsupportedVersion {
                expected: FORMAT_VERSION,
                got: version,
            });
        }

        let salt: Salt = read_array(reader).map_err(eof_as("header"))?;
        let iterations = u32::from_le_bytes(read_array(reader).map_err(eof_as("header"))?);
        let key_check: Tag = read_array(reader).map_err(eof_as("header"))?;

        Ok((
            Self {
                version,
                salt,
                iterations,
            },
            key_check,
        ))
    }
}

/// Per-entry header preceding the ciphertext
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    /// Path as stored; validated by the reader before use
    pub path: String,
    pub iv: Iv,
    pub plaintext_len: u64,
    pub ciphertext_len: u64,
}

impl EntryHeader {
    pub fn new(path: &str, iv: Iv, plaintext_len: u64) -> Result<Self> {
        if path.len() > u16::MAX as usize {
            return Err(ExportError::PathTraversalRejected(format!(
                "path longer than {} bytes",
                u16::MAX
            )));
        }
        let ciphertext_len = ciphertext_len(plaintext_len).ok_or_else(|| {
            ExportError::SourceReadFailure {
                path: path.to_string(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "file too large to encrypt"),
            }
        })?;
        Ok(Self {
            path: path.to_string(),
            iv,
            plaintext_len,
            ciphertext_len,
        })
    }

    /// Encoded record including the kind byte
    pub fn to_bytes(&self) -> Vec<u8> {
        let path = self.path.as_bytes();
        let mut out = Vec::with_capacity(1 + 2 + path.len() + IV_LEN + 16);
        out.push(KIND_ENTRY);
        out.extend_from_slice(&(path.len() as u16).to_le_bytes());
        out.extend_from_slice(path);
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.plaintext_len.to_le_bytes());
        out.extend_from_slice(&self.ciphertext_len.to_le_bytes());
        out
    }

    /// Reads the remainder after the kind byte
    fn read_body<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let path_len = u16::from_le_bytes(read_array(reader).map_err(eof_as("entry header"))?);
        let mut path = vec![0u8; path_len as usize];
        reader.read_exact(&mut path).map_err(eof_as("entry header"))?;
        let path = String::from_utf8(path)
            .map_err(|_| ExportError::InvalidArchive("entry path is not UTF-8".into()))?;

        let iv: Iv = read_array(reader).map_err(eof_as("entry header"))?;
        let plaintext_len = u64::from_le_bytes(read_array(reader).map_err(eof_as("entry header"))?);
        let ciphertext_len = u64::from_le_bytes(read_array(reader).map_err(eof_as("entry header"))?);

        let expected = self::ciphertext_len(plaintext_len).ok_or_else(|| {
            ExportError::InvalidArchive(format!("entry {} declares an impossible length", path))
        })?;
        if ciphertext_len != expected {
            return Err(ExportError::InvalidArchive(format!(
                "entry {} declares inconsistent lengths",
                path
            )));
        }

        Ok(Self {
            path,
            iv,
            plaintext_len,
            ciphertext_len,
        })
    }
}

/// Status and tag following an entry's ciphertext
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryTrailer {
    pub status: u8,
    pub tag: Tag,
}

impl EntryTrailer {
    pub fn sealed(tag: Tag) -> Self {
        Self {
            status: STATUS_SEALED,
            tag,
        }
    }

    pub fn abandoned() -> Self {
        Self {
            status: STATUS_ABANDONED,
            tag: [0u8; TAG_LEN],
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.status == STATUS_SEALED
    }

    pub fn to_bytes(&self) -> [u8; 1 + TAG_LEN] {
        let mut out = [0u8; 1 + TAG_LEN];
        out[0] = self.status;
        out[1..].copy_from_slice(&self.tag);
        out
    }

    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let bytes: [u8; 1 + TAG_LEN] = read_array(reader).map_err(eof_as("entry trailer"))?;
        let status = bytes[0];
        if status != STATUS_SEALED && status != STATUS_ABANDONED {
            return Err(ExportError::InvalidArchive(format!("unknown entry status {:#04x}", status)));
        }
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&bytes[1..]);
        Ok(Self { status, tag })
    }
}

/// Terminating record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndMarker {
    pub entry_count: u32,
    pub tag: Tag,
}

impl EndMarker {
    /// Bytes covered by the manifest tag (kind + count)
    pub fn prefix_bytes(entry_count: u32) -> [u8; 5] {
        let mut out = [0u8; 5];
        out[0] = KIND_END;
        out[1..].copy_from_slice(&entry_count.to_le_bytes());
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Self::prefix_bytes(self.entry_count).to_vec();
        out.extend_from_slice(&self.tag);
        out
    }

    fn read_body<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let entry_count = u32::from_le_bytes(read_array(reader).map_err(eof_as("end marker"))?);
        let tag: Tag = read_array(reader).map_err(eof_as("end marker"))?;
        Ok(Self { entry_count, tag })
    }
}

/// Next record in the entry stream
#[derive(Debug)]
pub enum Record {
    Entry(EntryHeader),
    End(EndMarker),
}

/// Reads the next record; `Ok(None)` on a clean EOF between records,
/// meaning the archive stops before its end marker.
pub fn read_record<R: Read + ?Sized>(reader: &mut R) -> Result<Option<Record>> {
    let mut kind = [0u8; 1];
    loop {
        match reader.read(&mut kind) {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ExportError::Io(e)),
        }
    }

    match kind[0] {
        KIND_ENTRY => Ok(Some(Record::Entry(EntryHeader::read_body(reader)?))),
        KIND_END => Ok(Some(Record::End(EndMarker::read_body(reader)?))),
        other => Err(ExportError::InvalidArchive(format!("unknown record kind {:#04x}", other))),
    }
}

/// True for errors caused by the archive simply ending early
pub fn is_truncation(err: &ExportError) -> bool {
    matches!(err, ExportError::InvalidArchive(msg) if msg.starts_with("truncated"))
}
