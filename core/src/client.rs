//! ADU client orchestration
//!
//! `AduClient` ties the pieces together for one device:
//!
//! 1. Locate the ADU `service` request and property version in a twin payload
//! 2. Parse the request and classify it against the tracked workflow
//! 3. Authenticate and parse the manifest
//! 4. Ask the caller's `UpdatePolicy` for a decision
//! 5. Acknowledge the request and report the new agent state
//!
//! Downloading and installing files is left to the caller, who reports the
//! outcome with `report_install_result`.
//!
//! Once the property version is known, every failure is answered with a
//! Reject acknowledgement before the error is returned. Payloads that fail
//! before that point get no response; the service retries on its own
//! timeout.
//!
//! An accepted workflow is tracked before it is acknowledged. If the
//! acknowledgement or the agent state cannot be published, the agent is
//! restored to where it was, so a redelivered request is processed again
//! instead of being taken for a duplicate.

use adu_hal::{TrustStore, TwinReporter};

use crate::agent::{
    AgentState, AgentStateMachine, DeviceProperties, InstallResult, PropertyReporter,
    RequestDecision, RequestKind, UpdatePolicy,
};
use crate::auth::verify_manifest;
use crate::config::AgentConfig;
use crate::error::AduError;
use crate::manifest::{locate_service_request, parse_manifest, UpdateManifest, UpdateRequest};

/// Result of handling one writable-properties payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<'a> {
    /// The payload carried no ADU service request
    NoRequest,
    /// A request without a manifest was acknowledged
    NoUpdate { version: i32 },
    /// The request repeats the tracked workflow and was re-acknowledged
    Duplicate { version: i32 },
    /// The deployment was cancelled and the agent is idle
    Cancelled { version: i32 },
    /// The policy, compatibility check or a busy agent rejected the update
    Rejected { version: i32 },
    /// The update was accepted; the caller downloads and installs it
    Accepted {
        version: i32,
        request: UpdateRequest<'a>,
        manifest: UpdateManifest<'a>,
    },
}

/// Device Update agent for one device
pub struct AduClient<R, T> {
    reporter: PropertyReporter<R>,
    trust: T,
    machine: AgentStateMachine,
    config: AgentConfig,
}

impl<R: TwinReporter, T: TrustStore> AduClient<R, T> {
    pub fn new(twin: R, trust: T, config: AgentConfig) -> Self {
        Self {
            reporter: PropertyReporter::new(twin, config.reporter),
            trust,
            machine: AgentStateMachine::new(),
            config,
        }
    }

    pub fn state(&self) -> AgentState {
        self.machine.state()
    }

    pub fn machine(&self) -> &AgentStateMachine {
        &self.machine
    }

    pub fn reporter(&self) -> &PropertyReporter<R> {
        &self.reporter
    }

    pub fn reporter_mut(&mut self) -> &mut PropertyReporter<R> {
        &mut self.reporter
    }

    /// Broadcast the initial `Idle` agent state after connecting
    ///
    /// # Returns
    ///
    /// The request id of the publish.
    pub fn report_startup(
        &mut self,
        device: &DeviceProperties<'_>,
        out: &mut [u8],
    ) -> Result<u32, AduError> {
        info!("Reporting agent startup");
        self.reporter
            .send_agent_state(device, None, self.machine.state(), None, out)
    }

    /// Process a desired-properties patch or full twin document
    ///
    /// # Arguments
    ///
    /// * `payload` - Twin payload; the manifest inside it is unescaped in
    ///   place and the returned `Outcome` borrows it
    /// * `out` - Buffer for outgoing reported-property documents
    /// * `scratch` - Working memory for manifest authentication
    /// * `device` - Current device properties
    /// * `policy` - Accept/reject decision for authenticated updates
    pub fn handle_writable_properties<'a, P: UpdatePolicy + ?Sized>(
        &mut self,
        payload: &'a mut [u8],
        out: &mut [u8],
        scratch: &mut [u8],
        device: &DeviceProperties<'_>,
        policy: &mut P,
    ) -> Result<Outcome<'a>, AduError> {
        let Some(located) = locate_service_request(payload)? else {
            return Ok(Outcome::NoRequest);
        };
        let version = located.version;

        let request = match located.bind(payload) {
            Ok(request) => request,
            Err(e) => return self.reject(version, out, e),
        };

        match self.machine.classify(&request) {
            RequestKind::Cancel => {
                self.reporter
                    .send_response(RequestDecision::Accept, version, out)?;
                self.machine.cancel();
                self.reporter
                    .send_agent_state(device, None, AgentState::Idle, None, out)?;
                return Ok(Outcome::Cancelled { version });
            }
            RequestKind::NoUpdate => {
                self.reporter
                    .send_response(RequestDecision::Accept, version, out)?;
                return Ok(Outcome::NoUpdate { version });
            }
            RequestKind::Duplicate => {
                debug!("Request repeats the tracked workflow");
                self.reporter
                    .send_response(RequestDecision::Accept, version, out)?;
                return Ok(Outcome::Duplicate { version });
            }
            RequestKind::New | RequestKind::Retry => {}
        }

        if let Err(e) = verify_manifest(
            request.update_manifest,
            request.update_manifest_signature,
            &self.trust,
            scratch,
        ) {
            return self.reject(version, out, e);
        }
        let manifest = match parse_manifest(request.update_manifest) {
            Ok(manifest) => manifest,
            Err(e) => return self.reject(version, out, e),
        };

        let decision = self.decide(&request, &manifest, device, policy);
        let previous = self.machine.clone();
        self.machine.record_decision(decision);
        let state = match self.machine.begin_deployment(&request.workflow) {
            Ok(state) => state,
            Err(e) => {
                self.machine = previous;
                return self.reject(version, out, e);
            }
        };
        if let Err(e) = self.acknowledge(decision, version, state, device, out) {
            warn!("Acknowledgement failed, restoring agent state");
            self.machine = previous;
            return Err(e);
        }
        if decision == RequestDecision::Reject {
            return Ok(Outcome::Rejected { version });
        }
        Ok(Outcome::Accepted {
            version,
            request,
            manifest,
        })
    }

    /// Report the outcome of the deployment in progress and return to `Idle`
    ///
    /// The workflow is echoed alongside `lastInstallResult` so the service
    /// can correlate the result. Failed installs are reported the same way
    /// with a non-success result code.
    pub fn report_install_result(
        &mut self,
        device: &DeviceProperties<'_>,
        result: &InstallResult<'_>,
        out: &mut [u8],
    ) -> Result<u32, AduError> {
        if self.machine.state() != AgentState::DeploymentInProgress {
            warn!("Install result reported with no deployment in progress");
            return Err(AduError::InvalidState);
        }

        let workflow = self.machine.workflow();
        let request_id = self.reporter.send_agent_state(
            device,
            workflow.as_ref(),
            AgentState::Idle,
            Some(result),
            out,
        )?;
        self.machine.finish_deployment()?;
        info!("Install result {} reported", result.result_code);
        Ok(request_id)
    }

    fn decide<P: UpdatePolicy + ?Sized>(
        &self,
        request: &UpdateRequest<'_>,
        manifest: &UpdateManifest<'_>,
        device: &DeviceProperties<'_>,
        policy: &mut P,
    ) -> RequestDecision {
        if self.config.enforce_compatibility
            && !manifest.is_compatible(device.manufacturer, device.model)
        {
            warn!("Update is not compatible with this device");
            return RequestDecision::Reject;
        }
        if self.machine.state() == AgentState::DeploymentInProgress
            && self.machine.classify(request) == RequestKind::New
        {
            warn!("Another deployment is already in progress");
            return RequestDecision::Reject;
        }
        policy.decide(request, manifest)
    }

    /// Publish the decision and, for an accepted update, the new agent state
    fn acknowledge(
        &mut self,
        decision: RequestDecision,
        version: i32,
        state: AgentState,
        device: &DeviceProperties<'_>,
        out: &mut [u8],
    ) -> Result<(), AduError> {
        self.reporter.send_response(decision, version, out)?;
        if decision == RequestDecision::Accept {
            let workflow = self.machine.workflow();
            self.reporter
                .send_agent_state(device, workflow.as_ref(), state, None, out)?;
        }
        Ok(())
    }

    /// Answer the request with Reject, then surface `error`
    fn reject<'a>(
        &mut self,
        version: i32,
        out: &mut [u8],
        error: AduError,
    ) -> Result<Outcome<'a>, AduError> {
        warn!("Rejecting request version {}: {}", version, error);
        self.reporter
            .send_response(RequestDecision::Reject, version, out)?;
        Err(error)
    }
}
