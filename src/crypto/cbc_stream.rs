//! AES-256-CBC with PKCS#7 over byte streams, one chunk in memory at a time

use std::io::{self, Read, Write};

use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

use super::{Iv, BLOCK_LEN, KEY_LEN};
use crate::error::ExportError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Where a streaming transform broke
#[derive(Debug, Error)]
pub enum StreamFault {
    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    #[error("invalid padding or truncated ciphertext")]
    Padding,
}

impl From<StreamFault> for ExportError {
    fn from(fault: StreamFault) -> Self {
        match fault {
            StreamFault::Read(e) => ExportError::Io(e),
            StreamFault::Write(e) => ExportError::DestinationWriteFailure(e),
            StreamFault::Padding => ExportError::PaddingOrAuthenticationError,
        }
    }
}

/// Ciphertext size for a plaintext of `plaintext_len` bytes (always one padding block or more).
///
/// `None` when the padded size does not fit in a `u64`.
pub fn ciphertext_len(plaintext_len: u64) -> Option<u64> {
    (plaintext_len / BLOCK_LEN as u64)
        .checked_add(1)?
        .checked_mul(BLOCK_LEN as u64)
}

/// Fills `buf` unless the reader hits EOF first
fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn check_chunk_size(chunk_size: usize) -> Result<(), StreamFault> {
    if chunk_size == 0 || chunk_size % BLOCK_LEN != 0 {
        return Err(StreamFault::Write(io::Error::new(
            io::ErrorKind::InvalidInput,
            "chunk size must be a non-zero multiple of the block size",
        )));
    }
    Ok(())
}

/// Encrypts `reader` into `writer`, returning the plaintext byte count
pub fn encrypt_stream<R, W>(
    reader: &mut R,
    writer: &mut W,
    key: &[u8; KEY_LEN],
    iv: &Iv,
    chunk_size: usize,
) -> Result<u64, StreamFault>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    check_chunk_size(chunk_size)?;

    let mut cipher = Aes256CbcEnc::new(GenericArray::from_slice(key), GenericArray::from_slice(iv));
    let mut buf = Zeroizing::new(vec![0u8; chunk_size]);
    let mut total = 0u64;

    loop {
        let n = read_full(reader, &mut buf).map_err(StreamFault::Read)?;
        total += n as u64;

        if n < chunk_size {
            let full = n - n % BLOCK_LEN;
            for block in buf[..full].chunks_exact_mut(BLOCK_LEN) {
                cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
            }
            writer.write_all(&buf[..full]).map_err(StreamFault::Write)?;

            let rem = n - full;
            let mut last = [0u8; BLOCK_LEN * 2];
            last[..rem].copy_from_slice(&buf[full..n]);
            let result = cipher
                .encrypt_padded_mut::<Pkcs7>(&mut last, rem)
                .map(|ct| writer.write_all(ct));
            last.zeroize();
            match result {
                Ok(write) => write.map_err(StreamFault::Write)?,
                Err(_) => return Err(StreamFault::Padding),
            }
            break;
        }

        for block in buf.chunks_exact_mut(BLOCK_LEN) {
            cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        writer.write_all(&buf).map_err(StreamFault::Write)?;
    }

    Ok(total)
}

/// Decrypts `reader` into `writer`, returning the plaintext byte count.
///
/// Only the final block is held back for unpadding. Plaintext reaches
/// `writer` before the padding check, so callers must stage the output.
pub fn decrypt_stream<R, W>(
    reader: &mut R,
    writer: &mut W,
    key: &[u8; KEY_LEN],
    iv: &Iv,
    chunk_size: usize,
) -> Result<u64, StreamFault>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    check_chunk_size(chunk_size)?;

    let mut cipher = Aes256CbcDec::new(GenericArray::from_slice(key), GenericArray::from_slice(iv));
    let mut buf = Zeroizing::new(vec![0u8; chunk_size + BLOCK_LEN]);
    let mut held = 0usize;
    let mut total = 0u64;

    loop {
        let want = buf.len() - held;
        let n = read_full(reader, &mut buf[held..]).map_err(StreamFault::Read)?;
        let avail = held + n;

        if n < want {
            if avail == 0 || avail % BLOCK_LEN != 0 {
                return Err(StreamFault::Padding);
            }
            let body = avail - BLOCK_LEN;
            for block in buf[..body].chunks_exact_mut(BLOCK_LEN) {
                cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
            }
            writer.write_all(&buf[..body]).map_err(StreamFault::Write)?;
            total += body as u64;

            let tail = cipher
                .decrypt_padded_mut::<Pkcs7>(&mut buf[body..avail])
                .map_err(|_| StreamFault::Padding)?;
            writer.write_all(tail).map_err(StreamFault::Write)?;
            total += tail.len() as u64;
            break;
        }

        let body = avail - BLOCK_LEN;
        for block in buf[..body].chunks_exact_mut(BLOCK_LEN) {
            cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        writer.write_all(&buf[..body]).map_err(StreamFault::Write)?;
        total += body as u64;

        buf.copy_within(body..avail, 0);
        held = BLOCK_LEN;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use proptest::prelude::*;

    use super::*;

    const KEY: [u8; KEY_LEN] = [0x42; KEY_LEN];
    const IV: Iv = [0x24; 16];

    fn encrypt(plain: &[u8], chunk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        encrypt_stream(&mut Cursor::new(plain), &mut out, &KEY, &IV, chunk).unwrap();
        out
    }

    fn decrypt(cipher: &[u8], key: &[u8; KEY_LEN], chunk: usize) -> Result<Vec<u8>, StreamFault> {
        let mut out = Vec::new();
        decrypt_stream(&mut Cursor::new(cipher), &mut out, key, &IV, chunk)?;
        Ok(out)
    }

    #[test]
    fn test_padding_lengths() {
        assert_eq!(encrypt(b"", 64).len(), 16);
        assert_eq!(encrypt(b"hello", 64).len(), 16);
        assert_eq!(encrypt(&[0u8; 16], 64).len(), 32);
        assert_eq!(ciphertext_len(0), Some(16));
        assert_eq!(ciphertext_len(16), Some(32));
        assert_eq!(ciphertext_len(17), Some(32));
    }

    #[test]
    fn test_ciphertext_len_overflow() {
        assert_eq!(ciphertext_len(u64::MAX), None);
        assert_eq!(ciphertext_len(u64::MAX - 15), None);
        assert_eq!(ciphertext_len(u64::MAX - 16), Some(u64::MAX - 15));
    }

    #[test]
    fn test_chunk_boundaries() {
        for len in [0usize, 15, 16, 31, 32, 63, 64, 65, 127, 128, 129, 1000] {
            let plain: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let ct = encrypt(&plain, 32);
            assert_eq!(Some(ct.len() as u64), ciphertext_len(len as u64));
            assert_eq!(decrypt(&ct, &KEY, 32).unwrap(), plain, "len {}", len);
            // Chunking must not change the ciphertext
            assert_eq!(ct, encrypt(&plain, 4096));
        }
    }

    #[test]
    fn test_matches_one_shot_cbc() {
        let plain = b"ALFA vault export - one shot comparison across blocks";
        let expected = Aes256CbcEnc::new(GenericArray::from_slice(&KEY), GenericArray::from_slice(&IV))
            .encrypt_padded_vec_mut::<Pkcs7>(plain);
        assert_eq!(encrypt(plain, 16), expected);
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let ct = encrypt(b"some secret data that spans blocks", 64);
        assert!(matches!(decrypt(&ct[..ct.len() - 3], &KEY, 64), Err(StreamFault::Padding)));
        assert!(matches!(decrypt(&[], &KEY, 64), Err(StreamFault::Padding)));
    }

    #[test]
    fn test_wrong_key_does_not_roundtrip() {
        let plain = b"Secret data".to_vec();
        let ct = encrypt(&plain, 64);
        match decrypt(&ct, &[0x11; KEY_LEN], 64) {
            Err(StreamFault::Padding) => {}
            Ok(out) => assert_ne!(out, plain),
            Err(other) => panic!("unexpected fault: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unaligned_chunk() {
        let mut out = Vec::new();
        let result = encrypt_stream(&mut Cursor::new(b"x"), &mut out, &KEY, &IV, 10);
        assert!(matches!(result, Err(StreamFault::Write(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_roundtrip(plain in proptest::collection::vec(any::<u8>(), 0..2048), chunk_blocks in 1usize..8) {
            let chunk = chunk_blocks * BLOCK_LEN;
            let ct = encrypt(&plain, chunk);
            prop_assert_eq!(decrypt(&ct, &KEY, chunk).unwrap(), plain);
        }
    }
}
