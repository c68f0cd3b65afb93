//! HMAC-SHA256 tags over archive bytes (encrypt-then-MAC)

use std::io::{self, Read, Write};

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::secret::ArchiveKeys;
use crate::error::{ExportError, Result};

pub type HmacSha256 = Hmac<Sha256>;

/// Tag length in bytes
pub const TAG_LEN: usize = 32;

pub type Tag = [u8; TAG_LEN];

/// Fresh MAC keyed with the archive MAC subkey
pub fn new_mac(keys: &ArchiveKeys) -> Result<HmacSha256> {
    <HmacSha256 as Mac>::new_from_slice(keys.mac_key())
        .map_err(|e| ExportError::DerivationFailure(e.to_string()))
}

pub fn finalize_tag(mac: HmacSha256) -> Tag {
    mac.finalize().into_bytes().into()
}

/// Constant-time tag check
pub fn verify_tag(mac: HmacSha256, expected: &Tag) -> bool {
    mac.verify_slice(expected).is_ok()
}

/// Tag over a single buffer
pub fn compute_tag(keys: &ArchiveKeys, data: &[u8]) -> Result<Tag> {
    let mut mac = new_mac(keys)?;
    mac.update(data);
    Ok(finalize_tag(mac))
}

/// Writer that authenticates and counts every byte passed through
pub struct MacWriter<W> {
    inner: W,
    mac: HmacSha256,
    written: u64,
}

impl<W: Write> MacWriter<W> {
    pub fn new(inner: W, mac: HmacSha256) -> Self {
        Self {
            inner,
            mac,
            written: 0,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_parts(self) -> (W, HmacSha256, u64) {
        (self.inner, self.mac, self.written)
    }
}

impl<W: Write> Write for MacWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.mac.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reader that authenticates and counts every byte read
pub struct MacReader<R> {
    inner: R,
    mac: HmacSha256,
    read: u64,
}

impl<R: Read> MacReader<R> {
    pub fn new(inner: R, mac: HmacSha256) -> Self {
        Self {
            inner,
            mac,
            read: 0,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.read
    }

    pub fn into_parts(self) -> (R, HmacSha256, u64) {
        (self.inner, self.mac, self.read)
    }
}

impl<R: Read> Read for MacReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.mac.update(&buf[..n]);
        self.read += n as u64;
        Ok(n)
    }
}
