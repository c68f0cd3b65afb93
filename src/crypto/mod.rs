//! Cryptographic primitives - PBKDF2, AES-256-CBC, HKDF, HMAC-SHA256

mod cbc_stream;
mod hkdf_derive;
mod mac;
mod pbkdf2_kdf;
mod random;
mod secret;

pub use cbc_stream::{ciphertext_len, decrypt_stream, encrypt_stream, StreamFault};
pub use hkdf_derive::split_keys;
pub use mac::{
    compute_tag, finalize_tag, new_mac, verify_tag, HmacSha256, MacReader, MacWriter, Tag, TAG_LEN,
};
pub use pbkdf2_kdf::{derive_key, KdfParams, KEY_BITS, MIN_ITERATIONS};
pub use random::{OsEntropy, RandomnessSource, RngEntropy};
pub use secret::{ArchiveKeys, DerivedKey, Password};

/// Symmetric key length (AES-256)
pub const KEY_LEN: usize = 32;

/// Salt length
pub const SALT_LEN: usize = 16;

/// IV length (one AES block)
pub const IV_LEN: usize = 16;

/// AES block size
pub const BLOCK_LEN: usize = 16;

pub type Salt = [u8; SALT_LEN];

pub type Iv = [u8; IV_LEN];
