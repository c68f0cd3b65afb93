//! Secret material: the user's password and keys derived from it

use std::fmt;

use secrecy::{ExposeSecret, SecretBox};
use zeroize::Zeroize;

use super::KEY_LEN;

/// User password, zeroized when dropped.
///
/// Key derivation takes it by value, so the engine never holds it past the
/// derivation call.
pub struct Password {
    inner: SecretBox<String>,
}

impl Password {
    pub fn new(password: String) -> Self {
        Self {
            inner: SecretBox::new(Box::new(password)),
        }
    }

    /// Moves the caller's buffer into a `Password`, leaving it empty
    pub fn take_from(buffer: &mut String) -> Self {
        Self::new(std::mem::take(buffer))
    }

    /// Copies a character buffer and wipes the original
    pub fn from_chars(chars: &mut [char]) -> Self {
        let password: String = chars.iter().collect();
        chars.zeroize();
        Self::new(password)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.expose_secret().is_empty()
    }

    pub(crate) fn expose_bytes(&self) -> &[u8] {
        self.inner.expose_secret().as_bytes()
    }
}

impl From<String> for Password {
    fn from(password: String) -> Self {
        Self::new(password)
    }
}

impl From<&str> for Password {
    fn from(password: &str) -> Self {
        Self::new(password.to_string())
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password([REDACTED])")
    }
}

/// 256-bit key derived from a password and salt
pub struct DerivedKey {
    inner: SecretBox<[u8; KEY_LEN]>,
}

impl DerivedKey {
    pub(crate) fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            inner: SecretBox::new(Box::new(bytes)),
        }
    }

    pub(crate) fn expose(&self) -> &[u8; KEY_LEN] {
        self.inner.expose_secret()
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey([REDACTED])")
    }
}

/// Encryption and MAC subkeys split from a [`DerivedKey`]
pub struct ArchiveKeys {
    cipher: SecretBox<[u8; KEY_LEN]>,
    mac: SecretBox<[u8; KEY_LEN]>,
}

impl ArchiveKeys {
    pub(crate) fn new(cipher: [u8; KEY_LEN], mac: [u8; KEY_LEN]) -> Self {
        Self {
            cipher: SecretBox::new(Box::new(cipher)),
            mac: SecretBox::new(Box::new(mac)),
        }
    }

    pub(crate) fn cipher_key(&self) -> &[u8; KEY_LEN] {
        self.cipher.expose_secret()
    }

    pub(crate) fn mac_key(&self) -> &[u8; KEY_LEN] {
        self.mac.expose_secret()
    }
}

impl fmt::Debug for ArchiveKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ArchiveKeys([REDACTED])")
    }
}
