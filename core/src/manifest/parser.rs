//! Update request and update manifest parsers
//!
//! # Update request
//!
//! The ADU `service` object looks like:
//!
//! ```text
//! {
//!   "workflow": {"action": 3, "id": "...", "retryTimestamp": "..."},
//!   "updateManifest": "<JSON-escaped manifest>",
//!   "updateManifestSignature": "<compact JWS>",
//!   "fileUrls": {"<file id>": "<url>", ...}
//! }
//! ```
//!
//! `parse_request` deserializes the object once, records where each string
//! sits in the caller's buffer (`RequestLayout`), unescapes the
//! `updateManifest` string in place and then binds the request views to the
//! rewritten buffer. After a successful parse the manifest bytes are plain
//! JSON ready for `verify_manifest` and `parse_manifest`.
//!
//! # Update manifest
//!
//! `parse_manifest` is a single read-only pass; parsing the same bytes twice
//! yields equal trees.
//!
//! # Bounds
//!
//! Every array is bounded by a constant in `crate::config`. Overflowing one
//! fails the whole parse; no partially populated request or manifest is
//! ever returned.

use core::ops::Range;

use heapless::Vec;
use serde::Deserialize;

use crate::config::MAX_FILE_URLS;
use crate::error::AduError;
use crate::json::de::{members, nullable};
use crate::json::{self, unescape_in_place, JsonSpan};

use super::{FileUrl, UpdateManifest, UpdateRequest, Workflow, WorkflowAction};

/// The `service` object as it appears on the wire
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct ServiceObject<'a> {
    #[serde(borrow)]
    workflow: Workflow<'a>,
    #[serde(borrow, deserialize_with = "nullable")]
    update_manifest: JsonSpan<'a>,
    #[serde(borrow, deserialize_with = "nullable")]
    update_manifest_signature: JsonSpan<'a>,
    #[serde(borrow, deserialize_with = "members")]
    file_urls: Vec<FileUrl<'a>, MAX_FILE_URLS>,
}

/// Positions of a service object's strings within the buffer it was read from
///
/// Lets the request outlive the shared borrow taken while deserializing, so
/// the manifest can be rewritten in place before the views are bound.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RequestLayout {
    action: WorkflowAction,
    workflow_id: Range<usize>,
    retry_timestamp: Range<usize>,
    manifest: Range<usize>,
    signature: Range<usize>,
    file_urls: Vec<(Range<usize>, Range<usize>), MAX_FILE_URLS>,
}

impl RequestLayout {
    /// Record the string positions of `service`, which borrows `buffer`
    pub(crate) fn capture(buffer: &[u8], service: &ServiceObject<'_>) -> Result<Self, AduError> {
        let range = |span: JsonSpan<'_>| range_in(buffer, span);
        let mut file_urls = Vec::new();
        for entry in &service.file_urls {
            file_urls
                .push((range(entry.id)?, range(entry.url)?))
                .map_err(|_| AduError::ParseFailed)?;
        }
        Ok(Self {
            action: service.workflow.action,
            workflow_id: range(service.workflow.id)?,
            retry_timestamp: range(service.workflow.retry_timestamp)?,
            manifest: range(service.update_manifest)?,
            signature: range(service.update_manifest_signature)?,
            file_urls,
        })
    }

    /// Unescape the manifest in place and build the request views
    ///
    /// `buffer` must be the buffer the layout was captured from.
    pub(crate) fn bind(self, buffer: &mut [u8]) -> Result<UpdateRequest<'_>, AduError> {
        let manifest_len = match buffer.get_mut(self.manifest.clone()) {
            Some(escaped) if !escaped.is_empty() => unescape_in_place(escaped).map_err(|e| {
                warn!("Update manifest string has invalid escapes: {}", e);
                AduError::ParseFailed
            })?,
            Some(_) => 0,
            None => return Err(AduError::InvalidArgument),
        };

        let buffer: &[u8] = buffer;
        let span = |range: &Range<usize>| {
            buffer
                .get(range.clone())
                .map(JsonSpan::new)
                .ok_or(AduError::InvalidArgument)
        };
        let mut file_urls = Vec::new();
        for (id, url) in &self.file_urls {
            file_urls
                .push(FileUrl {
                    id: span(id)?,
                    url: span(url)?,
                })
                .map_err(|_| AduError::ParseFailed)?;
        }
        let manifest = self.manifest.start..self.manifest.start + manifest_len;
        Ok(UpdateRequest {
            workflow: Workflow {
                action: self.action,
                id: span(&self.workflow_id)?,
                retry_timestamp: span(&self.retry_timestamp)?,
            },
            update_manifest: span(&manifest)?.as_bytes(),
            update_manifest_signature: span(&self.signature)?,
            file_urls,
        })
    }
}

/// Offset range of `span` inside `buffer`
fn range_in(buffer: &[u8], span: JsonSpan<'_>) -> Result<Range<usize>, AduError> {
    if span.is_empty() {
        return Ok(0..0);
    }
    let start = (span.as_bytes().as_ptr() as usize)
        .checked_sub(buffer.as_ptr() as usize)
        .ok_or(AduError::InvalidArgument)?;
    let end = start + span.len();
    if end > buffer.len() {
        return Err(AduError::InvalidArgument);
    }
    Ok(start..end)
}

/// Parse an ADU update request, unescaping its manifest in place
///
/// # Arguments
///
/// * `buffer` - The `service` object of the ADU component. Borrowed for the
///   lifetime of the returned request.
///
/// # Returns
///
/// The decoded request, or `ParseFailed` for malformed JSON, trailing
/// content, wrong value types, or a `fileUrls` object larger than
/// `MAX_FILE_URLS`.
pub fn parse_request(buffer: &mut [u8]) -> Result<UpdateRequest<'_>, AduError> {
    if buffer.is_empty() {
        return Err(AduError::InvalidArgument);
    }

    let layout = {
        let service: ServiceObject<'_> = json::from_slice(buffer).map_err(|e| {
            warn!("Update request is malformed");
            e
        })?;
        RequestLayout::capture(buffer, &service)?
    };
    let request = layout.bind(buffer)?;

    debug!(
        "Parsed update request: action={}, manifest={} bytes, signature={} bytes, {} file URLs",
        request.workflow.action.code(),
        request.update_manifest.len(),
        request.update_manifest_signature.len(),
        request.file_urls.len()
    );
    Ok(request)
}

/// Parse an unescaped update manifest
///
/// # Returns
///
/// The manifest tree borrowing `manifest`, `InvalidArgument` for empty
/// input, or `ParseFailed` for malformed JSON and any capacity overflow
/// (steps, step files, files, hashes, compatibility entries).
pub fn parse_manifest(manifest: &[u8]) -> Result<UpdateManifest<'_>, AduError> {
    if manifest.is_empty() {
        return Err(AduError::InvalidArgument);
    }

    let parsed: UpdateManifest<'_> = json::from_slice(manifest).map_err(|e| {
        warn!("Update manifest rejected");
        e
    })?;

    debug!(
        "Parsed update manifest: {} steps, {} files",
        parsed.instructions.steps.len(),
        parsed.files.len()
    );
    Ok(parsed)
}
