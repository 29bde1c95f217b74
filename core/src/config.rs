#![deny(unsafe_code)]
//! Engine capacities and agent configuration
//!
//! Capacities are compile-time constants: every bounded collection in the
//! parsed request and manifest is a `heapless::Vec` sized by one of these.
//! Exceeding a capacity is a hard parse error, never a silent truncation.

/// Maximum number of `fileUrls` entries in an update request
pub const MAX_FILE_URLS: usize = 10;

/// Maximum number of instruction steps in an update manifest
pub const MAX_STEPS: usize = 10;

/// Maximum number of file references per step
pub const MAX_STEP_FILES: usize = 4;

/// Maximum number of files in an update manifest
pub const MAX_FILES: usize = 10;

/// Maximum number of hashes per file
pub const MAX_FILE_HASHES: usize = 2;

/// Maximum number of compatibility entries in an update manifest
pub const MAX_COMPATIBILITY: usize = 2;

/// Maximum number of custom device properties reported by the agent
pub const MAX_CUSTOM_PROPERTIES: usize = 5;

/// Maximum number of step results in an install result
pub const MAX_STEP_RESULTS: usize = MAX_STEPS;

/// Maximum length of a workflow id tracked by the state machine
pub const MAX_WORKFLOW_ID_LEN: usize = 64;

/// Maximum length of a workflow retry timestamp tracked by the state machine
pub const MAX_RETRY_TIMESTAMP_LEN: usize = 40;

/// Device Update PnP interface id
pub const DEFAULT_INTERFACE_ID: &str = "dtmi:azure:iot:deviceUpdate;1";

/// Agent version reported as `aduVer`
pub const DEFAULT_AGENT_VERSION: &str = "DU;agent/1.0.0";

/// Device properties the cloud uses to match update compatibility
pub const DEFAULT_COMPAT_PROPERTY_NAMES: &str = "manufacturer,model";

/// Reported-property document configuration
///
/// Documents are always wrapped in the `azureDeviceUpdateAgent` component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReporterConfig {
    /// Emit the `"__t":"c"` component marker inside the component object
    pub component_marker: bool,
    /// Value of `deviceProperties.interfaceId`
    pub interface_id: &'static str,
    /// Value of `deviceProperties.aduVer`
    pub agent_version: &'static str,
    /// Value of `compatPropertyNames`
    pub compat_property_names: &'static str,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            component_marker: false,
            interface_id: DEFAULT_INTERFACE_ID,
            agent_version: DEFAULT_AGENT_VERSION,
            compat_property_names: DEFAULT_COMPAT_PROPERTY_NAMES,
        }
    }
}

/// Update agent configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AgentConfig {
    /// Reported-property layout
    pub reporter: ReporterConfig,
    /// Reject manifests whose `compatibility` list does not name this
    /// device's manufacturer and model
    pub enforce_compatibility: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            reporter: ReporterConfig::default(),
            enforce_compatibility: true,
        }
    }
}
