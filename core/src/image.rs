//! Downloaded update file verification
//!
//! Update files arrive in chunks from a transport the engine does not own.
//! `ImageVerifier` hashes them as they stream past and compares the result
//! with the manifest entry once the download completes.
//!
//! ```
//! use adu_core::image::ImageVerifier;
//! use adu_core::json::JsonSpan;
//! use adu_core::manifest::{FileHash, UpdateFile};
//!
//! let mut file = UpdateFile::default();
//! file.size_in_bytes = 3;
//! file.hashes
//!     .push(FileHash {
//!         algorithm_id: JsonSpan::new(b"sha256"),
//!         hash_value: JsonSpan::new(b"ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0="),
//!     })
//!     .unwrap();
//!
//! let mut verifier = ImageVerifier::new(&file).unwrap();
//! verifier.update(b"ab");
//! verifier.update(b"c");
//! assert!(verifier.finish().is_ok());
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::error::AduError;
use crate::manifest::UpdateFile;

const SHA256_LEN: usize = 32;

/// Streaming SHA-256 and size check for one update file
#[derive(Debug, Clone)]
pub struct ImageVerifier {
    hasher: Sha256,
    expected_digest: [u8; SHA256_LEN],
    /// `None` when the manifest size is negative and cannot be checked
    expected_size: Option<u64>,
    received: u64,
}

impl ImageVerifier {
    /// Start verifying `file` against its `sha256` manifest hash
    ///
    /// # Returns
    ///
    /// `AuthenticationFailed` when the manifest lists no `sha256` hash,
    /// `ParseFailed` when the listed hash is not a base64 SHA-256 digest.
    pub fn new(file: &UpdateFile<'_>) -> Result<Self, AduError> {
        let hash = file.hash("sha256").ok_or_else(|| {
            warn!("Update file has no sha256 hash");
            AduError::AuthenticationFailed
        })?;

        let mut text = [0u8; 64];
        let text = hash.unescape_into(&mut text).map_err(|e| {
            warn!("Update file sha256 hash is malformed: {}", e);
            AduError::ParseFailed
        })?;
        let mut decoded = [0u8; 48];
        let len = STANDARD
            .decode_slice(text, &mut decoded)
            .map_err(|_| AduError::ParseFailed)?;
        let expected_digest = decoded[..len]
            .try_into()
            .map_err(|_| AduError::ParseFailed)?;

        Ok(Self {
            hasher: Sha256::new(),
            expected_digest,
            expected_size: u64::try_from(file.size_in_bytes).ok(),
            received: 0,
        })
    }

    /// Feed the next chunk of the file
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.received += chunk.len() as u64;
    }

    /// Bytes fed so far
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Compare the streamed file with the manifest entry
    pub fn finish(self) -> Result<(), AduError> {
        if let Some(expected) = self.expected_size {
            if expected != self.received {
                warn!(
                    "Update file size mismatch: expected {}, received {}",
                    expected,
                    self.received
                );
                return Err(AduError::AuthenticationFailed);
            }
        }
        if self.hasher.finalize().as_slice() != self.expected_digest {
            warn!("Update file digest mismatch");
            return Err(AduError::AuthenticationFailed);
        }
        debug!("Update file verified ({} bytes)", self.received);
        Ok(())
    }
}
