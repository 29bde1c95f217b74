//! Reported-property documents for the ADU component
//!
//! Two documents are produced, both wrapped in the `azureDeviceUpdateAgent`
//! component:
//!
//! ```text
//! // Response to a service request
//! {"azureDeviceUpdateAgent":{"service":{"ac":200,"av":7,"value":{}}}}
//!
//! // Agent state
//! {"azureDeviceUpdateAgent":{"agent":{
//!     "deviceProperties":{"manufacturer":"..","model":"..",..,"interfaceId":"..","aduVer":".."},
//!     "compatPropertyNames":"manufacturer,model",
//!     "lastInstallResult":{"resultCode":700,"extendedResultCode":0,"resultDetails":"",
//!                          "stepResults":{"step_0":{...}}},
//!     "state":0,
//!     "workflow":{"action":3,"id":".."},
//!     "installedUpdateId":"{\"provider\":\"..\",\"name\":\"..\",\"version\":\"..\"}"}}}
//! ```
//!
//! Writing is deterministic: the same inputs always produce the same bytes.

use adu_hal::TwinReporter;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::config::{ReporterConfig, MAX_CUSTOM_PROPERTIES, MAX_STEP_RESULTS};
use crate::error::AduError;
use crate::json;

use super::{ActiveWorkflow, AgentState, DeviceProperties, InstallResult, RequestDecision};

#[derive(Serialize)]
struct Reported<C> {
    #[serde(rename = "azureDeviceUpdateAgent")]
    component: C,
}

#[derive(Serialize)]
struct ServiceComponent {
    #[serde(rename = "__t", skip_serializing_if = "Option::is_none")]
    marker: Option<&'static str>,
    service: ServiceResponse,
}

#[derive(Serialize)]
struct ServiceResponse {
    ac: i64,
    av: i32,
    value: Empty,
}

#[derive(Serialize)]
struct Empty {}

#[derive(Serialize)]
struct AgentComponent<'r, 'a> {
    #[serde(rename = "__t", skip_serializing_if = "Option::is_none")]
    marker: Option<&'static str>,
    agent: AgentReport<'r, 'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AgentReport<'r, 'a> {
    device_properties: DevicePropertiesReport<'r, 'a>,
    compat_property_names: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_install_result: Option<&'r InstallResult<'a>>,
    state: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    workflow: Option<&'r ActiveWorkflow<'a>>,
    installed_update_id: &'r str,
}

/// `deviceProperties`, with caller-defined members after `model`
struct DevicePropertiesReport<'r, 'a> {
    device: &'r DeviceProperties<'a>,
    config: &'r ReporterConfig,
}

impl Serialize for DevicePropertiesReport<'_, '_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("manufacturer", self.device.manufacturer)?;
        map.serialize_entry("model", self.device.model)?;
        for (name, value) in self.device.custom_properties {
            map.serialize_entry(name, value)?;
        }
        map.serialize_entry("interfaceId", self.config.interface_id)?;
        map.serialize_entry("aduVer", self.config.agent_version)?;
        if let Some(version) = self.device.delivery_optimization_agent_version {
            map.serialize_entry("doVer", version)?;
        }
        map.end()
    }
}

/// Serializes agent documents and publishes them through a `TwinReporter`
#[derive(Debug)]
pub struct PropertyReporter<C> {
    client: C,
    config: ReporterConfig,
}

impl<C> PropertyReporter<C> {
    pub fn new(client: C, config: ReporterConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ReporterConfig {
        &self.config
    }

    /// Underlying twin client
    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    fn marker(&self) -> Option<&'static str> {
        self.config.component_marker.then_some("c")
    }

    /// Serialize the acknowledgement of a service request
    ///
    /// # Returns
    ///
    /// Number of bytes written to `out`.
    pub fn write_response(
        &self,
        decision: RequestDecision,
        version: i32,
        out: &mut [u8],
    ) -> Result<usize, AduError> {
        let document = Reported {
            component: ServiceComponent {
                marker: self.marker(),
                service: ServiceResponse {
                    ac: decision.status_code(),
                    av: version,
                    value: Empty {},
                },
            },
        };
        json::to_slice(&document, out)
    }

    /// Serialize the agent state document
    ///
    /// `workflow` is echoed only while responding to an active request;
    /// `install_result` only after a deployment finished.
    ///
    /// # Returns
    ///
    /// Number of bytes written to `out`, `InvalidArgument` when the device
    /// identity is empty or a list exceeds its capacity, and
    /// `InsufficientBuffer` when `out` is too small.
    pub fn write_agent_state(
        &self,
        device: &DeviceProperties<'_>,
        workflow: Option<&ActiveWorkflow<'_>>,
        state: AgentState,
        install_result: Option<&InstallResult<'_>>,
        out: &mut [u8],
    ) -> Result<usize, AduError> {
        if device.manufacturer.is_empty()
            || device.model.is_empty()
            || device.custom_properties.len() > MAX_CUSTOM_PROPERTIES
        {
            return Err(AduError::InvalidArgument);
        }
        if install_result.is_some_and(|result| result.step_results.len() > MAX_STEP_RESULTS) {
            return Err(AduError::InvalidArgument);
        }

        // installedUpdateId is a JSON document carried as a string value. It
        // is serialized first and parked at the end of `out`.
        let inner_len = json::to_slice(&device.update_id, out)?;
        let split = out.len() - inner_len;
        out.copy_within(..inner_len, split);
        let (head, tail) = out.split_at_mut(split);
        let installed_update_id =
            core::str::from_utf8(tail).map_err(|_| AduError::InvalidArgument)?;

        let document = Reported {
            component: AgentComponent {
                marker: self.marker(),
                agent: AgentReport {
                    device_properties: DevicePropertiesReport {
                        device,
                        config: &self.config,
                    },
                    compat_property_names: self.config.compat_property_names,
                    last_install_result: install_result,
                    state: state.code(),
                    workflow,
                    installed_update_id,
                },
            },
        };
        json::to_slice(&document, head)
    }
}

impl<C: TwinReporter> PropertyReporter<C> {
    /// Write the service acknowledgement into `out` and publish it
    ///
    /// # Returns
    ///
    /// The request id of the publish.
    pub fn send_response(
        &mut self,
        decision: RequestDecision,
        version: i32,
        out: &mut [u8],
    ) -> Result<u32, AduError> {
        let len = self.write_response(decision, version, out)?;
        info!(
            "Responding to request version {} with {}",
            version,
            decision.status_code()
        );
        self.publish(&out[..len])
    }

    /// Write the agent state document into `out` and publish it
    ///
    /// # Returns
    ///
    /// The request id of the publish.
    pub fn send_agent_state(
        &mut self,
        device: &DeviceProperties<'_>,
        workflow: Option<&ActiveWorkflow<'_>>,
        state: AgentState,
        install_result: Option<&InstallResult<'_>>,
        out: &mut [u8],
    ) -> Result<u32, AduError> {
        let len = self.write_agent_state(device, workflow, state, install_result, out)?;
        info!("Reporting agent state {}", state.code());
        self.publish(&out[..len])
    }

    fn publish(&mut self, payload: &[u8]) -> Result<u32, AduError> {
        match self.client.send_reported_properties(payload) {
            Ok(request_id) => {
                debug!("Published {} bytes as request {}", payload.len(), request_id);
                Ok(request_id)
            }
            Err(_) => {
                error!("Reported properties publish failed");
                Err(AduError::PublishFailed)
            }
        }
    }
}
