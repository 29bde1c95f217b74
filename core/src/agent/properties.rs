//! Device properties and install results reported by the agent
//!
//! The engine persists none of this; callers pass the current values on
//! every report.

use core::fmt::Write as _;

use heapless::String;
use serde::ser::{Error as _, SerializeMap};
use serde::{Serialize, Serializer};

/// Identity of the update currently installed on the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InstalledUpdateId<'a> {
    pub provider: &'a str,
    pub name: &'a str,
    pub version: &'a str,
}

/// Properties describing the device in `agent.deviceProperties`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceProperties<'a> {
    pub manufacturer: &'a str,
    pub model: &'a str,
    /// Reported as the escaped JSON string `installedUpdateId`
    pub update_id: InstalledUpdateId<'a>,
    /// Extra `(name, value)` pairs, at most `MAX_CUSTOM_PROPERTIES`
    pub custom_properties: &'a [(&'a str, &'a str)],
    /// Delivery Optimization agent version, reported as `doVer`
    pub delivery_optimization_agent_version: Option<&'a str>,
}

/// Outcome of one installation step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(rename_all = "camelCase")]
pub struct StepResult<'a> {
    pub result_code: i32,
    pub extended_result_code: i32,
    pub result_details: &'a str,
}

/// Outcome of a deployment, reported as `lastInstallResult`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(rename_all = "camelCase")]
pub struct InstallResult<'a> {
    pub result_code: i32,
    pub extended_result_code: i32,
    pub result_details: &'a str,
    /// Per-step results in step order, at most `MAX_STEP_RESULTS`
    #[serde(serialize_with = "step_results")]
    pub step_results: &'a [StepResult<'a>],
}

/// Step results are keyed `step_0`, `step_1`, ... on the wire
fn step_results<S: Serializer>(steps: &[StepResult<'_>], serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(steps.len()))?;
    for (index, step) in steps.iter().enumerate() {
        let mut name = String::<16>::new();
        write!(name, "step_{}", index).map_err(S::Error::custom)?;
        map.serialize_entry(name.as_str(), step)?;
    }
    map.end()
}
