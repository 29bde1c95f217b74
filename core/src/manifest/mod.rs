//! Update request and update manifest data model
//!
//! Everything here borrows the caller's input buffer: string fields are
//! `JsonSpan` views and bounded arrays are `heapless::Vec`s sized by the
//! capacities in `crate::config`. The parsed tree cannot outlive the buffer
//! it was parsed from.
//!
//! The types deserialize with serde using the ADU wire names. Members that
//! are missing take their defaults; keyed objects (`files`, `hashes`,
//! `fileUrls`) are read member by member with `json::de::members`.
//!
//! - **`parser`**: `parse_request` and `parse_manifest`
//! - **`twin`**: locates the ADU service request inside a twin document

pub mod parser;
pub mod twin;

pub use parser::{parse_manifest, parse_request};
pub use twin::{locate_service_request, ServiceRequest};

use heapless::Vec;
use serde::{Deserialize, Serialize, Serializer};

use crate::config::{
    MAX_COMPATIBILITY, MAX_FILES, MAX_FILE_HASHES, MAX_FILE_URLS, MAX_STEPS, MAX_STEP_FILES,
};
use crate::json::de::{members, nullable, Member};
use crate::json::JsonSpan;

/// Action requested by the cloud workflow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(from = "i32")]
pub enum WorkflowAction {
    /// Download and install the update described by the manifest
    ApplyDeployment,
    /// Abandon the deployment in progress
    Cancel,
    /// Missing or unrecognized action code
    #[default]
    Undefined,
}

impl WorkflowAction {
    /// Map a wire action code
    pub fn from_code(code: i32) -> Self {
        match code {
            3 => Self::ApplyDeployment,
            255 => Self::Cancel,
            _ => Self::Undefined,
        }
    }

    /// Wire action code
    pub fn code(self) -> i32 {
        match self {
            Self::ApplyDeployment => 3,
            Self::Cancel => 255,
            Self::Undefined => 0,
        }
    }
}

impl From<i32> for WorkflowAction {
    fn from(code: i32) -> Self {
        Self::from_code(code)
    }
}

impl Serialize for WorkflowAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

/// Cloud-assigned workflow correlating a request with its lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(default, rename_all = "camelCase")]
pub struct Workflow<'a> {
    pub action: WorkflowAction,
    #[serde(borrow)]
    pub id: JsonSpan<'a>,
    /// Present when the cloud re-issues a workflow as a retry
    #[serde(borrow, deserialize_with = "nullable")]
    pub retry_timestamp: JsonSpan<'a>,
}

/// Download location of one update file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FileUrl<'a> {
    pub id: JsonSpan<'a>,
    pub url: JsonSpan<'a>,
}

impl<'de: 'a, 'a> Member<'de> for FileUrl<'a> {
    type Value = JsonSpan<'a>;

    fn from_member(id: JsonSpan<'de>, url: JsonSpan<'a>) -> Self {
        Self { id, url }
    }
}

/// Decoded ADU service request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UpdateRequest<'a> {
    pub workflow: Workflow<'a>,
    /// Manifest JSON, unescaped in place; empty when no update is pending
    pub update_manifest: &'a [u8],
    /// Detached JWS over the manifest; empty when absent
    pub update_manifest_signature: JsonSpan<'a>,
    pub file_urls: Vec<FileUrl<'a>, MAX_FILE_URLS>,
}

impl<'a> UpdateRequest<'a> {
    /// Whether the request carries a manifest
    pub fn has_manifest(&self) -> bool {
        !self.update_manifest.is_empty()
    }

    /// Download URL for a manifest file id
    pub fn file_url(&self, id: JsonSpan<'_>) -> Option<JsonSpan<'a>> {
        self.file_urls
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.url)
    }
}

/// Identity of an update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(default)]
pub struct UpdateId<'a> {
    #[serde(borrow)]
    pub provider: JsonSpan<'a>,
    #[serde(borrow)]
    pub name: JsonSpan<'a>,
    #[serde(borrow)]
    pub version: JsonSpan<'a>,
}

/// Device class an update applies to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(default, rename_all = "camelCase")]
pub struct Compatibility<'a> {
    #[serde(borrow)]
    pub device_manufacturer: JsonSpan<'a>,
    #[serde(borrow)]
    pub device_model: JsonSpan<'a>,
}

/// Handler-specific step settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(default, rename_all = "camelCase")]
pub struct HandlerProperties<'a> {
    /// Value the handler compares against the installed version
    #[serde(borrow)]
    pub installed_criteria: JsonSpan<'a>,
}

/// One installation step
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(default, rename_all = "camelCase")]
pub struct Step<'a> {
    #[serde(borrow)]
    pub handler: JsonSpan<'a>,
    #[serde(borrow)]
    pub handler_properties: HandlerProperties<'a>,
    /// File ids, resolved with `UpdateManifest::file`
    #[serde(borrow)]
    pub files: Vec<JsonSpan<'a>, MAX_STEP_FILES>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(default)]
pub struct Instructions<'a> {
    #[serde(borrow)]
    pub steps: Vec<Step<'a>, MAX_STEPS>,
}

/// Expected digest of an update file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FileHash<'a> {
    /// Hash algorithm, e.g. `sha256`
    pub algorithm_id: JsonSpan<'a>,
    /// Standard base64 digest
    pub hash_value: JsonSpan<'a>,
}

impl<'de: 'a, 'a> Member<'de> for FileHash<'a> {
    type Value = JsonSpan<'a>;

    fn from_member(algorithm_id: JsonSpan<'de>, hash_value: JsonSpan<'a>) -> Self {
        Self {
            algorithm_id,
            hash_value,
        }
    }
}

/// An update payload file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UpdateFile<'a> {
    pub id: JsonSpan<'a>,
    pub file_name: JsonSpan<'a>,
    /// Passed through unchecked; may be negative
    pub size_in_bytes: i64,
    pub hashes: Vec<FileHash<'a>, MAX_FILE_HASHES>,
}

/// Body of a `files` member, keyed by file id
#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct FileBody<'a> {
    #[serde(borrow)]
    file_name: JsonSpan<'a>,
    size_in_bytes: i64,
    #[serde(borrow, deserialize_with = "members")]
    hashes: Vec<FileHash<'a>, MAX_FILE_HASHES>,
}

impl<'de: 'a, 'a> Member<'de> for UpdateFile<'a> {
    type Value = FileBody<'a>;

    fn from_member(id: JsonSpan<'de>, body: FileBody<'a>) -> Self {
        Self {
            id,
            file_name: body.file_name,
            size_in_bytes: body.size_in_bytes,
            hashes: body.hashes,
        }
    }
}

impl<'a> UpdateFile<'a> {
    /// Look up the digest for a hash algorithm
    pub fn hash(&self, algorithm: &str) -> Option<JsonSpan<'a>> {
        self.hashes
            .iter()
            .find(|hash| hash.algorithm_id.matches(algorithm))
            .map(|hash| hash.hash_value)
    }
}

/// Parsed update manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateManifest<'a> {
    #[serde(borrow)]
    pub manifest_version: JsonSpan<'a>,
    #[serde(borrow)]
    pub update_id: UpdateId<'a>,
    #[serde(borrow)]
    pub compatibility: Vec<Compatibility<'a>, MAX_COMPATIBILITY>,
    #[serde(borrow)]
    pub instructions: Instructions<'a>,
    #[serde(borrow, deserialize_with = "members")]
    pub files: Vec<UpdateFile<'a>, MAX_FILES>,
    #[serde(borrow, alias = "createdDateTime")]
    pub create_date_time: JsonSpan<'a>,
}

impl<'a> UpdateManifest<'a> {
    /// Resolve a step's file reference
    pub fn file(&self, id: JsonSpan<'_>) -> Option<&UpdateFile<'a>> {
        self.files.iter().find(|file| file.id == id)
    }

    /// Whether any compatibility entry names this manufacturer and model
    ///
    /// A manifest without compatibility entries matches every device.
    pub fn is_compatible(&self, manufacturer: &str, model: &str) -> bool {
        self.compatibility.is_empty()
            || self.compatibility.iter().any(|entry| {
                entry.device_manufacturer.matches(manufacturer) && entry.device_model.matches(model)
            })
    }
}
