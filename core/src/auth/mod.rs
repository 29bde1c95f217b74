//! Update manifest authentication
//!
//! `updateManifestSignature` is a compact JWS over the manifest bytes:
//!
//! ```text
//! base64url(header) "." base64url(payload) "." base64url(signature)
//!
//! header  = {"alg":"EdDSA","sjwk":"<compact JWS>"}   signing key chained to a root
//!         | {"alg":"EdDSA","kid":"<root key id>"}    signed by a root key directly
//! payload = ""                                       detached: the manifest itself
//!         | {"sha256":"<base64 SHA-256 of manifest>"}
//! ```
//!
//! The `sjwk` member is itself a compact JWS whose header names a root key
//! (`kid`) from the device `TrustStore` and whose payload is the signing key
//! as an OKP JWK. Only Ed25519 (`EdDSA`) is accepted at either level.
//!
//! ## Failure reporting
//!
//! Every failure surfaces as `AduError::AuthenticationFailed`. The internal
//! cause is logged at `warn` level and never returned.
//!
//! ## Scratch
//!
//! Decoded headers, the signing JWK and the detached signing input are laid
//! out in the caller's scratch buffer; see `scratch_len`.

mod jws;

use adu_hal::TrustStore;
use ed25519_dalek::PUBLIC_KEY_LENGTH;

use crate::error::AduError;
use crate::json::JsonSpan;

use jws::{CompactJws, Header};

/// Internal authentication failure cause, logged but never surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum AuthFault {
    /// No signature was supplied
    MissingSignature,
    /// Not a three-segment compact serialization
    Envelope,
    /// Invalid base64 or a decoded value of the wrong length
    Encoding,
    /// Header, JWK or payload is not a well-formed JSON object
    Header,
    /// Algorithm other than `EdDSA`
    UnsupportedAlgorithm,
    /// Header names neither `sjwk` nor `kid`
    MissingKey,
    /// `kid` is not in the trust store
    UnknownRootKey,
    /// Malformed or non-Ed25519 public key
    InvalidKey,
    /// `sjwk` not signed by the named root key
    KeyChain,
    /// Embedded manifest digest does not match
    DigestMismatch,
    /// Manifest signature does not verify
    BadSignature,
    /// Scratch buffer exhausted
    Scratch,
}

/// Bump allocator over the caller's scratch buffer
pub(crate) struct Scratch<'s> {
    remaining: &'s mut [u8],
}

impl<'s> Scratch<'s> {
    pub fn new(buf: &'s mut [u8]) -> Self {
        Self { remaining: buf }
    }

    /// Carve the next `len` bytes off the buffer
    pub fn take(&mut self, len: usize) -> Result<&'s mut [u8], AuthFault> {
        if len > self.remaining.len() {
            return Err(AuthFault::Scratch);
        }
        let (head, tail) = core::mem::take(&mut self.remaining).split_at_mut(len);
        self.remaining = tail;
        Ok(head)
    }
}

/// Scratch space sufficient to verify `signature_len` bytes of signature
/// over `manifest_len` bytes of manifest
pub const fn scratch_len(manifest_len: usize, signature_len: usize) -> usize {
    3 * signature_len + manifest_len + 16
}

/// Authenticate an update manifest against its signature
///
/// # Arguments
///
/// * `manifest` - Manifest bytes exactly as received, already unescaped
/// * `signature` - The request's `updateManifestSignature`
/// * `trust` - Root keys provisioned on the device
/// * `scratch` - Working memory, at least `scratch_len` bytes
///
/// # Returns
///
/// `Ok(())` when the signature chain verifies, `InvalidArgument` for an
/// empty manifest, and `AuthenticationFailed` for everything else,
/// including an empty signature or an undersized scratch buffer.
pub fn verify_manifest<T: TrustStore + ?Sized>(
    manifest: &[u8],
    signature: JsonSpan<'_>,
    trust: &T,
    scratch: &mut [u8],
) -> Result<(), AduError> {
    if manifest.is_empty() {
        return Err(AduError::InvalidArgument);
    }

    match verify(manifest, signature.as_bytes(), trust, Scratch::new(scratch)) {
        Ok(()) => {
            info!("Update manifest signature verified");
            Ok(())
        }
        Err(fault) => {
            warn!("Update manifest authentication failed: {:?}", fault);
            Err(AduError::AuthenticationFailed)
        }
    }
}

fn verify<T: TrustStore + ?Sized>(
    manifest: &[u8],
    signature: &[u8],
    trust: &T,
    mut scratch: Scratch<'_>,
) -> Result<(), AuthFault> {
    if signature.is_empty() {
        return Err(AuthFault::MissingSignature);
    }

    let jws = CompactJws::split(signature)?;
    let header = Header::parse(jws::decode_segment(jws.header, &mut scratch)?)?;
    header.require_eddsa()?;

    let signing_key = if !header.sjwk.is_empty() {
        signing_key(header.sjwk, trust, &mut scratch)?
    } else if !header.kid.is_empty() {
        trust
            .root_key(header.kid.as_bytes())
            .ok_or(AuthFault::UnknownRootKey)?
    } else {
        return Err(AuthFault::MissingKey);
    };

    if jws.is_detached() {
        let signing_input = scratch.take(jws.header.len() + 1 + manifest.len())?;
        let (encoded_header, rest) = signing_input.split_at_mut(jws.header.len());
        encoded_header.copy_from_slice(jws.header);
        rest[0] = b'.';
        rest[1..].copy_from_slice(manifest);
        jws::verify_ed25519(&signing_key, signing_input, jws.signature)
    } else {
        jws::check_manifest_digest(jws::decode_segment(jws.payload, &mut scratch)?, manifest)?;
        jws::verify_ed25519(&signing_key, jws.signing_input(), jws.signature)
    }
}

/// Validate the `sjwk` chain and return the signing key it carries
fn signing_key<T: TrustStore + ?Sized>(
    sjwk: JsonSpan<'_>,
    trust: &T,
    scratch: &mut Scratch<'_>,
) -> Result<[u8; PUBLIC_KEY_LENGTH], AuthFault> {
    // base64url and '.' never need escaping
    if sjwk.has_escapes() {
        return Err(AuthFault::Encoding);
    }
    let jws = CompactJws::split(sjwk.as_bytes())?;
    if jws.is_detached() {
        return Err(AuthFault::Envelope);
    }

    let header = Header::parse(jws::decode_segment(jws.header, scratch)?)?;
    header.require_eddsa()?;
    let root_key = trust
        .root_key(header.kid.as_bytes())
        .ok_or(AuthFault::UnknownRootKey)?;
    jws::verify_ed25519(&root_key, jws.signing_input(), jws.signature).map_err(|fault| {
        match fault {
            AuthFault::BadSignature => AuthFault::KeyChain,
            other => other,
        }
    })?;

    let key = jws::parse_jwk(jws::decode_segment(jws.payload, scratch)?)?;
    debug!("Signing key chained to root key");
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use adu_hal::RootKey;
    use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
    use base64::Engine as _;
    use ed25519_dalek::{Signer, SigningKey};
    use proptest::prelude::*;
    use sha2::{Digest, Sha256};
    use std::format;
    use std::string::String;
    use std::vec::Vec as StdVec;

    const ROOT_KID: &str = "ADU.200702.R";
    const MANIFEST: &[u8] = br#"{"updateId":{"provider":"Contoso","name":"Thermostat","version":"1.1"},"files":{"f1":{"fileName":"fw.bin","sizeInBytes":4,"hashes":{"sha256":"AAAA"}}}}"#;

    fn root() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    fn signer() -> SigningKey {
        SigningKey::from_bytes(&[9u8; 32])
    }

    fn trust() -> [RootKey; 1] {
        [RootKey {
            kid: ROOT_KID,
            public_key: root().verifying_key().to_bytes(),
        }]
    }

    fn b64(bytes: &[u8]) -> String {
        URL_SAFE_NO_PAD.encode(bytes)
    }

    fn sign(key: &SigningKey, message: &[u8]) -> String {
        b64(&key.sign(message).to_bytes())
    }

    fn sjwk(root: &SigningKey, kid: &str, signer: &SigningKey) -> String {
        let header = b64(format!(r#"{{"alg":"EdDSA","kid":"{}"}}"#, kid).as_bytes());
        let jwk = format!(
            r#"{{"kty":"OKP","crv":"Ed25519","x":"{}"}}"#,
            b64(&signer.verifying_key().to_bytes())
        );
        let signed = format!("{}.{}", header, b64(jwk.as_bytes()));
        let signature = sign(root, signed.as_bytes());
        format!("{}.{}", signed, signature)
    }

    fn detached(header_json: &str, key: &SigningKey, manifest: &[u8]) -> String {
        let header = b64(header_json.as_bytes());
        let mut input = format!("{}.", header).into_bytes();
        input.extend_from_slice(manifest);
        format!("{}..{}", header, sign(key, &input))
    }

    fn chained_signature(manifest: &[u8]) -> String {
        let header = format!(
            r#"{{"alg":"EdDSA","sjwk":"{}"}}"#,
            sjwk(&root(), ROOT_KID, &signer())
        );
        detached(&header, &signer(), manifest)
    }

    fn check(manifest: &[u8], signature: &str) -> Result<(), AduError> {
        let mut scratch = [0u8; 2048];
        verify_manifest(
            manifest,
            JsonSpan::new(signature.as_bytes()),
            &trust(),
            &mut scratch,
        )
    }

    #[test]
    fn test_detached_chained_signature() {
        assert_eq!(check(MANIFEST, &chained_signature(MANIFEST)), Ok(()));
    }

    #[test]
    fn test_embedded_digest_signature() {
        let header = b64(format!(
            r#"{{"alg":"EdDSA","sjwk":"{}"}}"#,
            sjwk(&root(), ROOT_KID, &signer())
        )
        .as_bytes());
        let payload = b64(format!(
            r#"{{"sha256":"{}"}}"#,
            STANDARD.encode(Sha256::digest(MANIFEST))
        )
        .as_bytes());
        let signed = format!("{}.{}", header, payload);
        let signature = format!("{}.{}", signed, sign(&signer(), signed.as_bytes()));

        assert_eq!(check(MANIFEST, &signature), Ok(()));
        assert_eq!(
            check(br#"{"updateId":{}}"#, &signature),
            Err(AduError::AuthenticationFailed)
        );
    }

    #[test]
    fn test_signed_by_root_directly() {
        let header = format!(r#"{{"alg":"EdDSA","kid":"{}"}}"#, ROOT_KID);
        assert_eq!(check(MANIFEST, &detached(&header, &root(), MANIFEST)), Ok(()));
    }

    #[test]
    fn test_empty_signature_fails() {
        assert_eq!(check(MANIFEST, ""), Err(AduError::AuthenticationFailed));
    }

    #[test]
    fn test_empty_manifest_is_invalid_argument() {
        assert_eq!(
            check(b"", &chained_signature(MANIFEST)),
            Err(AduError::InvalidArgument)
        );
    }

    #[test]
    fn test_unknown_root_key_fails() {
        let header = format!(
            r#"{{"alg":"EdDSA","sjwk":"{}"}}"#,
            sjwk(&root(), "ADU.999999.R", &signer())
        );
        assert_eq!(
            check(MANIFEST, &detached(&header, &signer(), MANIFEST)),
            Err(AduError::AuthenticationFailed)
        );
    }

    #[test]
    fn test_rogue_root_fails() {
        // Correct kid, but the sjwk is signed by a key the device does not trust
        let rogue = SigningKey::from_bytes(&[3u8; 32]);
        let header = format!(
            r#"{{"alg":"EdDSA","sjwk":"{}"}}"#,
            sjwk(&rogue, ROOT_KID, &signer())
        );
        assert_eq!(
            check(MANIFEST, &detached(&header, &signer(), MANIFEST)),
            Err(AduError::AuthenticationFailed)
        );
    }

    #[test]
    fn test_signature_by_other_key_fails() {
        let header = format!(
            r#"{{"alg":"EdDSA","sjwk":"{}"}}"#,
            sjwk(&root(), ROOT_KID, &signer())
        );
        let other = SigningKey::from_bytes(&[5u8; 32]);
        assert_eq!(
            check(MANIFEST, &detached(&header, &other, MANIFEST)),
            Err(AduError::AuthenticationFailed)
        );
    }

    #[test]
    fn test_unsupported_algorithm_fails() {
        let header = format!(r#"{{"alg":"RS256","kid":"{}"}}"#, ROOT_KID);
        assert_eq!(
            check(MANIFEST, &detached(&header, &root(), MANIFEST)),
            Err(AduError::AuthenticationFailed)
        );
    }

    #[test]
    fn test_header_without_key_fails() {
        let header = r#"{"alg":"EdDSA"}"#;
        assert_eq!(
            check(MANIFEST, &detached(header, &root(), MANIFEST)),
            Err(AduError::AuthenticationFailed)
        );
    }

    #[test]
    fn test_malformed_envelope_fails() {
        let signature = chained_signature(MANIFEST);
        let two_segments = signature.replacen("..", ".", 1);
        assert_eq!(check(MANIFEST, &two_segments), Err(AduError::AuthenticationFailed));
        assert_eq!(
            check(MANIFEST, "not base64!..c2ln"),
            Err(AduError::AuthenticationFailed)
        );
    }

    #[test]
    fn test_small_scratch_fails_closed() {
        let signature = chained_signature(MANIFEST);
        let mut scratch = [0u8; 64];
        assert_eq!(
            verify_manifest(
                MANIFEST,
                JsonSpan::new(signature.as_bytes()),
                &trust(),
                &mut scratch
            ),
            Err(AduError::AuthenticationFailed)
        );
    }

    #[test]
    fn test_scratch_len_is_sufficient() {
        let signature = chained_signature(MANIFEST);
        let mut scratch: StdVec<u8> =
            std::vec![0; scratch_len(MANIFEST.len(), signature.len())];
        assert_eq!(
            verify_manifest(
                MANIFEST,
                JsonSpan::new(signature.as_bytes()),
                &trust(),
                &mut scratch
            ),
            Ok(())
        );
    }

    #[test]
    fn test_scratch_take() {
        let mut buf = [0u8; 8];
        let mut scratch = Scratch::new(&mut buf);
        assert_eq!(scratch.take(5).map(|s| s.len()), Ok(5));
        assert_eq!(scratch.take(4).map(|s| s.len()), Err(AuthFault::Scratch));
        assert_eq!(scratch.take(3).map(|s| s.len()), Ok(3));
        assert_eq!(scratch.take(0).map(|s| s.len()), Ok(0));
    }

    proptest! {
        #[test]
        fn prop_tampered_manifest_fails(index in 0..MANIFEST.len(), flip in 1u8..=255) {
            let signature = chained_signature(MANIFEST);
            let mut tampered = MANIFEST.to_vec();
            tampered[index] ^= flip;
            prop_assert_eq!(check(&tampered, &signature), Err(AduError::AuthenticationFailed));
        }
    }
}
