//! Compact JWS envelopes, JOSE headers and signing-key JWKs

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use ed25519_dalek::{Signature, VerifyingKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use heapless::String;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::json::{self, JsonSpan};

use super::{AuthFault, Scratch};

/// Room for unescaping one JWK or payload member
const MAX_MEMBER_LEN: usize = 128;

/// A compact JWS split into its three segments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CompactJws<'a> {
    /// base64url JOSE header
    pub header: &'a [u8],
    /// base64url payload; empty for the detached form
    pub payload: &'a [u8],
    /// base64url signature
    pub signature: &'a [u8],
    signing_input: &'a [u8],
}

impl<'a> CompactJws<'a> {
    /// Split `header.payload.signature`
    ///
    /// Exactly two separators are required and the header and signature
    /// segments must not be empty.
    pub fn split(token: &'a [u8]) -> Result<Self, AuthFault> {
        let mut dots = token
            .iter()
            .enumerate()
            .filter(|&(_, &byte)| byte == b'.')
            .map(|(i, _)| i);
        let (first, second) = match (dots.next(), dots.next(), dots.next()) {
            (Some(first), Some(second), None) => (first, second),
            _ => return Err(AuthFault::Envelope),
        };

        let jws = Self {
            header: &token[..first],
            payload: &token[first + 1..second],
            signature: &token[second + 1..],
            signing_input: &token[..second],
        };
        if jws.header.is_empty() || jws.signature.is_empty() {
            return Err(AuthFault::Envelope);
        }
        Ok(jws)
    }

    /// `header.payload` as transmitted, the signing input of the embedded form
    pub fn signing_input(&self) -> &'a [u8] {
        self.signing_input
    }

    pub fn is_detached(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Fields of a JOSE header the authenticator acts on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub(crate) struct Header<'a> {
    #[serde(borrow)]
    pub alg: JsonSpan<'a>,
    /// Root key id, when the header is signed by a root key
    #[serde(borrow)]
    pub kid: JsonSpan<'a>,
    /// Signed JWK carrying the signing key, itself a compact JWS
    #[serde(borrow)]
    pub sjwk: JsonSpan<'a>,
}

impl<'a> Header<'a> {
    pub fn parse(json: &'a [u8]) -> Result<Self, AuthFault> {
        json::from_slice(json).map_err(|_| {
            debug!("JOSE header rejected");
            AuthFault::Header
        })
    }

    /// Only Ed25519 is accepted; everything else fails closed
    pub fn require_eddsa(&self) -> Result<(), AuthFault> {
        if self.alg.matches("EdDSA") {
            Ok(())
        } else {
            Err(AuthFault::UnsupportedAlgorithm)
        }
    }
}

/// OKP JSON Web Key; other members such as `kid` are ignored
#[derive(Default, Deserialize)]
#[serde(default)]
struct Jwk {
    kty: String<8>,
    crv: String<16>,
    x: String<64>,
}

/// Payload of the embedded JWS form
#[derive(Default, Deserialize)]
#[serde(default)]
struct ManifestDigest {
    sha256: String<64>,
}

/// Deserialize a small JOSE object whose members unescape into owned strings
fn read_object<'a, T: Deserialize<'a>>(json: &'a [u8]) -> Result<T, AuthFault> {
    let mut scratch = [0u8; MAX_MEMBER_LEN];
    json::from_slice_escaped(json, &mut scratch).map_err(|_| {
        debug!("JOSE object rejected");
        AuthFault::Header
    })
}

/// Extract the Ed25519 public key from an OKP JWK
pub(crate) fn parse_jwk(json: &[u8]) -> Result<[u8; PUBLIC_KEY_LENGTH], AuthFault> {
    let jwk: Jwk = read_object(json)?;
    if jwk.kty.as_str() != "OKP" || jwk.crv.as_str() != "Ed25519" {
        return Err(AuthFault::InvalidKey);
    }
    let mut raw = [0u8; 48];
    let raw = decode_member(&URL_SAFE_NO_PAD, &jwk.x, &mut raw)?;
    raw.try_into().map_err(|_| AuthFault::InvalidKey)
}

/// Check an embedded `{"sha256":"<base64>"}` payload against the manifest
pub(crate) fn check_manifest_digest(payload_json: &[u8], manifest: &[u8]) -> Result<(), AuthFault> {
    let payload: ManifestDigest = read_object(payload_json)?;
    let mut expected = [0u8; 48];
    let expected = decode_member(&STANDARD, &payload.sha256, &mut expected)?;
    if Sha256::digest(manifest).as_slice() != expected {
        return Err(AuthFault::DigestMismatch);
    }
    Ok(())
}

/// base64url-decode a JWS segment into scratch
pub(crate) fn decode_segment<'s>(
    segment: &[u8],
    scratch: &mut Scratch<'s>,
) -> Result<&'s [u8], AuthFault> {
    let out = scratch.take(base64::decoded_len_estimate(segment.len()))?;
    let len = URL_SAFE_NO_PAD
        .decode_slice(segment, &mut *out)
        .map_err(|_| AuthFault::Encoding)?;
    let out: &'s [u8] = out;
    Ok(&out[..len])
}

/// Verify an Ed25519 signature given as a base64url segment
pub(crate) fn verify_ed25519(
    public_key: &[u8; PUBLIC_KEY_LENGTH],
    message: &[u8],
    signature: &[u8],
) -> Result<(), AuthFault> {
    let key = VerifyingKey::from_bytes(public_key).map_err(|_| AuthFault::InvalidKey)?;
    let mut raw = [0u8; 96];
    let len = URL_SAFE_NO_PAD
        .decode_slice(signature, &mut raw)
        .map_err(|_| AuthFault::Encoding)?;
    let raw: &[u8; SIGNATURE_LENGTH] = raw[..len].try_into().map_err(|_| AuthFault::Encoding)?;
    key.verify_strict(message, &Signature::from_bytes(raw))
        .map_err(|_| AuthFault::BadSignature)
}

fn decode_member<'o, E: Engine>(
    engine: &E,
    member: &str,
    out: &'o mut [u8],
) -> Result<&'o [u8], AuthFault> {
    let len = engine
        .decode_slice(member.as_bytes(), &mut *out)
        .map_err(|_| AuthFault::Encoding)?;
    Ok(&out[..len])
}
