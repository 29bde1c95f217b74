//! Trusted root keys for update manifest authentication
//!
//! Root keys are provisioned into the device image (or a protected flash
//! region) and are looked up by the key id (`kid`) named in the signing key
//! envelope of an update manifest signature.

/// Ed25519 public key length in bytes
pub const ROOT_KEY_LEN: usize = 32;

/// A trusted Ed25519 root key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RootKey {
    /// Key identifier as it appears in the `kid` header field
    pub kid: &'static str,
    /// Raw Ed25519 public key
    pub public_key: [u8; ROOT_KEY_LEN],
}

/// Source of trusted root keys
pub trait TrustStore {
    /// Look up a root key by its key id
    ///
    /// `kid` is the raw header value. Returns `None` when the key is unknown
    /// or has been disabled on this device.
    fn root_key(&self, kid: &[u8]) -> Option<[u8; ROOT_KEY_LEN]>;
}

impl TrustStore for [RootKey] {
    fn root_key(&self, kid: &[u8]) -> Option<[u8; ROOT_KEY_LEN]> {
        self.iter()
            .find(|key| key.kid.as_bytes() == kid)
            .map(|key| key.public_key)
    }
}

impl<const N: usize> TrustStore for [RootKey; N] {
    fn root_key(&self, kid: &[u8]) -> Option<[u8; ROOT_KEY_LEN]> {
        self.as_slice().root_key(kid)
    }
}

impl<T: TrustStore + ?Sized> TrustStore for &T {
    fn root_key(&self, kid: &[u8]) -> Option<[u8; ROOT_KEY_LEN]> {
        (**self).root_key(kid)
    }
}
