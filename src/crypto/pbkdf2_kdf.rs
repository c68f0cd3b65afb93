//! PBKDF2-HMAC-SHA256 key derivation from the export password

use hmac::Hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

use super::secret::{DerivedKey, Password};
use super::{Salt, KEY_LEN};
use crate::error::{ExportError, Result};

/// Lowest iteration count accepted for derivation
pub const MIN_ITERATIONS: u32 = 65_536;

/// Only supported derived key size
pub const KEY_BITS: u32 = 256;

/// Derivation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Iterations (time cost)
    pub iterations: u32,
    /// Output length in bits
    pub key_bits: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: MIN_ITERATIONS,
            key_bits: KEY_BITS,
        }
    }
}

impl KdfParams {
    pub fn with_iterations(iterations: u32) -> Self {
        Self {
            iterations,
            ..Default::default()
        }
    }
}

/// Derives the archive key from a password.
///
/// The password is consumed and wiped on every return path.
pub fn derive_key(password: Password, salt: &Salt, params: &KdfParams) -> Result<DerivedKey> {
    if password.is_empty() {
        return Err(ExportError::InvalidCredentialInput);
    }
    if params.iterations < MIN_ITERATIONS {
        return Err(ExportError::DerivationFailure(format!(
            "iteration count {} below minimum {}",
            params.iterations, MIN_ITERATIONS
        )));
    }
    if params.key_bits != KEY_BITS {
        return Err(ExportError::DerivationFailure(format!(
            "unsupported key length {} bits",
            params.key_bits
        )));
    }

    let mut output = [0u8; KEY_LEN];
    pbkdf2::pbkdf2::<Hmac<Sha256>>(password.expose_bytes(), salt, params.iterations, &mut output)
        .map_err(|e| ExportError::DerivationFailure(e.to_string()))?;

    let key = DerivedKey::new(output);
    output.zeroize();
    Ok(key)
}
