//! HKDF split of the derived key into cipher and MAC subkeys

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use super::secret::{ArchiveKeys, DerivedKey};
use super::KEY_LEN;
use crate::error::{ExportError, Result};

/// Predefined derivation purposes
pub mod purposes {
    pub const CIPHER: &str = "vault-export:v1:aes-256-cbc";
    pub const MAC: &str = "vault-export:v1:hmac-sha256";
}

/// Derives a fixed-length subkey for one purpose
fn derive_subkey(key: &DerivedKey, purpose: &str) -> Result<[u8; KEY_LEN]> {
    let hk = Hkdf::<Sha256>::new(None, key.expose());
    let mut okm = [0u8; KEY_LEN];
    hk.expand(purpose.as_bytes(), &mut okm)
        .map_err(|e| ExportError::DerivationFailure(e.to_string()))?;
    Ok(okm)
}

/// Splits the derived key so encryption and authentication never share a key
pub fn split_keys(key: &DerivedKey) -> Result<ArchiveKeys> {
    let mut cipher = derive_subkey(key, purposes::CIPHER)?;
    let mut mac = derive_subkey(key, purposes::MAC)?;
    let keys = ArchiveKeys::new(cipher, mac);
    cipher.zeroize();
    mac.zeroize();
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subkeys_differ() {
        let key = DerivedKey::new([42u8; KEY_LEN]);
        let keys = split_keys(&key).unwrap();

        assert_ne!(keys.cipher_key(), keys.mac_key());
        assert_ne!(keys.cipher_key(), key.expose());
    }

    #[test]
    fn test_split_deterministic() {
        let k1 = split_keys(&DerivedKey::new([42u8; KEY_LEN])).unwrap();
        let k2 = split_keys(&DerivedKey::new([42u8; KEY_LEN])).unwrap();

        assert_eq!(k1.cipher_key(), k2.cipher_key());
        assert_eq!(k1.mac_key(), k2.mac_key());
    }
}
