//! Device update agent state
//!
//! The agent is either `Idle` or running a deployment. A request moves it
//! forward only after the caller's `UpdatePolicy` decision has been
//! recorded; reporting an install result (successful or not) moves it back.
//!
//! ```text
//!   Idle --(Accept)--> DeploymentInProgress --(install result)--> Idle
//!   Idle --(Reject)--> Idle
//!   DeploymentInProgress --(cancel)--> Idle
//! ```
//!
//! There is no separate failed state: a failed install is `Idle` plus a
//! non-success `lastInstallResult`.
//!
//! - **`properties`**: device properties and install results supplied by
//!   the caller on every report
//! - **`reporter`**: serializes the response and agent state documents and
//!   hands them to the `TwinReporter`

pub mod properties;
pub mod reporter;

pub use properties::{DeviceProperties, InstallResult, InstalledUpdateId, StepResult};
pub use reporter::PropertyReporter;

use heapless::String;
use serde::Serialize;

use crate::config::{MAX_RETRY_TIMESTAMP_LEN, MAX_WORKFLOW_ID_LEN};
use crate::error::AduError;
use crate::manifest::{UpdateManifest, UpdateRequest, Workflow, WorkflowAction};

/// Agent lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AgentState {
    #[default]
    Idle,
    DeploymentInProgress,
}

impl AgentState {
    /// Wire encoding of `agent.state`
    pub fn code(self) -> i64 {
        match self {
            Self::Idle => 0,
            Self::DeploymentInProgress => 1,
        }
    }
}

/// Verdict on an incoming update request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestDecision {
    Accept,
    Reject,
}

impl RequestDecision {
    /// Acknowledgement code reported as `service.ac`
    pub fn status_code(self) -> i64 {
        match self {
            Self::Accept => 200,
            Self::Reject => 400,
        }
    }
}

/// How an incoming request relates to the agent's workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestKind {
    /// No manifest and nothing to cancel
    NoUpdate,
    /// A workflow the agent has not seen
    New,
    /// Same workflow id and retry timestamp as the last one seen
    Duplicate,
    /// Same workflow id re-issued with a new retry timestamp
    Retry,
    /// The cloud asked to abandon the deployment
    Cancel,
}

/// Caller-supplied accept/reject policy
pub trait UpdatePolicy {
    fn decide(
        &mut self,
        request: &UpdateRequest<'_>,
        manifest: &UpdateManifest<'_>,
    ) -> RequestDecision;
}

/// Policy accepting every authenticated, compatible update
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl UpdatePolicy for AcceptAll {
    fn decide(&mut self, _: &UpdateRequest<'_>, _: &UpdateManifest<'_>) -> RequestDecision {
        RequestDecision::Accept
    }
}

/// Policy backed by a closure, see `from_fn`
#[derive(Debug, Clone, Copy)]
pub struct FnPolicy<F>(F);

/// Build an `UpdatePolicy` from a closure
///
/// ```
/// use adu_core::agent::{from_fn, RequestDecision, UpdatePolicy};
///
/// let mut policy = from_fn(|_request, manifest| {
///     if manifest.update_id.provider.matches("Contoso") {
///         RequestDecision::Accept
///     } else {
///         RequestDecision::Reject
///     }
/// });
/// # let _ = &mut policy as &mut dyn UpdatePolicy;
/// ```
pub fn from_fn<F>(f: F) -> FnPolicy<F>
where
    F: FnMut(&UpdateRequest<'_>, &UpdateManifest<'_>) -> RequestDecision,
{
    FnPolicy(f)
}

impl<F> UpdatePolicy for FnPolicy<F>
where
    F: FnMut(&UpdateRequest<'_>, &UpdateManifest<'_>) -> RequestDecision,
{
    fn decide(
        &mut self,
        request: &UpdateRequest<'_>,
        manifest: &UpdateManifest<'_>,
    ) -> RequestDecision {
        (self.0)(request, manifest)
    }
}

/// The workflow the agent last accepted, echoed in `agent.workflow`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(rename_all = "camelCase")]
pub struct ActiveWorkflow<'a> {
    pub action: WorkflowAction,
    pub id: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub retry_timestamp: &'a str,
}

/// Agent lifecycle tracking
///
/// Holds unescaped copies of the last workflow's id and retry timestamp so
/// requests can be classified after the input buffer they came from is gone.
#[derive(Debug, Clone, Default)]
pub struct AgentStateMachine {
    state: AgentState,
    action: WorkflowAction,
    workflow_id: String<MAX_WORKFLOW_ID_LEN>,
    retry_timestamp: String<MAX_RETRY_TIMESTAMP_LEN>,
    decision: Option<RequestDecision>,
}

impl AgentStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// The last workflow the agent accepted, if any
    pub fn workflow(&self) -> Option<ActiveWorkflow<'_>> {
        if self.workflow_id.is_empty() {
            return None;
        }
        Some(ActiveWorkflow {
            action: self.action,
            id: &self.workflow_id,
            retry_timestamp: &self.retry_timestamp,
        })
    }

    /// Relate an incoming request to the workflow being tracked
    pub fn classify(&self, request: &UpdateRequest<'_>) -> RequestKind {
        let workflow = &request.workflow;
        if workflow.action == WorkflowAction::Cancel {
            return RequestKind::Cancel;
        }
        if !request.has_manifest() {
            return RequestKind::NoUpdate;
        }
        if workflow.id.is_empty() || !workflow.id.matches(&self.workflow_id) {
            return RequestKind::New;
        }
        if workflow.retry_timestamp.matches(&self.retry_timestamp) {
            RequestKind::Duplicate
        } else {
            RequestKind::Retry
        }
    }

    /// Record the policy decision for the pending request
    pub fn record_decision(&mut self, decision: RequestDecision) {
        trace!("Recorded decision {:?}", decision);
        self.decision = Some(decision);
    }

    /// Apply the recorded decision to `workflow`
    ///
    /// `Accept` starts the deployment from `Idle`, or restarts it when
    /// `workflow` re-issues the one in progress. `Reject` leaves the state
    /// unchanged. Either way the decision is consumed.
    ///
    /// # Returns
    ///
    /// The resulting state, `InvalidState` when no decision was recorded or
    /// a different deployment is already running, or `InvalidArgument` when
    /// the workflow id or retry timestamp is too long to track. The state is
    /// unchanged on error.
    pub fn begin_deployment(&mut self, workflow: &Workflow<'_>) -> Result<AgentState, AduError> {
        let decision = self.decision.take().ok_or_else(|| {
            warn!("State transition attempted without a decision");
            AduError::InvalidState
        })?;
        if decision == RequestDecision::Reject {
            debug!("Request rejected, agent stays {:?}", self.state);
            return Ok(self.state);
        }

        if self.state == AgentState::DeploymentInProgress
            && !workflow.id.matches(&self.workflow_id)
        {
            warn!("Deployment already in progress for another workflow");
            return Err(AduError::InvalidState);
        }

        let id = workflow.id.unescape_to_string().map_err(|e| {
            warn!("Workflow id cannot be tracked: {}", e);
            AduError::InvalidArgument
        })?;
        let retry_timestamp = workflow.retry_timestamp.unescape_to_string().map_err(|e| {
            warn!("Retry timestamp cannot be tracked: {}", e);
            AduError::InvalidArgument
        })?;
        self.workflow_id = id;
        self.retry_timestamp = retry_timestamp;
        self.action = workflow.action;
        self.state = AgentState::DeploymentInProgress;
        info!("Deployment started");
        Ok(self.state)
    }

    /// Return to `Idle` after the install result has been reported
    pub fn finish_deployment(&mut self) -> Result<(), AduError> {
        if self.state != AgentState::DeploymentInProgress {
            warn!("No deployment in progress to finish");
            return Err(AduError::InvalidState);
        }
        self.state = AgentState::Idle;
        info!("Deployment finished");
        Ok(())
    }

    /// Abandon any deployment in progress
    pub fn cancel(&mut self) {
        if self.state == AgentState::DeploymentInProgress {
            info!("Deployment cancelled");
        }
        self.state = AgentState::Idle;
        self.decision = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::JsonSpan;

    fn request<'a>(action: WorkflowAction, id: &'a str, retry: &'a str) -> UpdateRequest<'a> {
        UpdateRequest {
            workflow: Workflow {
                action,
                id: JsonSpan::new(id.as_bytes()),
                retry_timestamp: JsonSpan::new(retry.as_bytes()),
            },
            update_manifest: b"{}",
            ..UpdateRequest::default()
        }
    }

    fn accept(machine: &mut AgentStateMachine, request: &UpdateRequest<'_>) -> AgentState {
        machine.record_decision(RequestDecision::Accept);
        machine.begin_deployment(&request.workflow).unwrap()
    }

    #[test]
    fn test_wire_codes() {
        assert_eq!(AgentState::Idle.code(), 0);
        assert_eq!(AgentState::DeploymentInProgress.code(), 1);
        assert_eq!(RequestDecision::Accept.status_code(), 200);
        assert_eq!(RequestDecision::Reject.status_code(), 400);
    }

    #[test]
    fn test_accept_then_finish() {
        let mut machine = AgentStateMachine::new();
        let req = request(WorkflowAction::ApplyDeployment, "w1", "");
        assert_eq!(machine.classify(&req), RequestKind::New);

        assert_eq!(accept(&mut machine, &req), AgentState::DeploymentInProgress);
        let workflow = machine.workflow().unwrap();
        assert_eq!(workflow.id, "w1");
        assert_eq!(workflow.action, WorkflowAction::ApplyDeployment);

        machine.finish_deployment().unwrap();
        assert_eq!(machine.state(), AgentState::Idle);
        assert_eq!(machine.finish_deployment(), Err(AduError::InvalidState));
    }

    #[test]
    fn test_reject_stays_idle() {
        let mut machine = AgentStateMachine::new();
        let req = request(WorkflowAction::ApplyDeployment, "w1", "");
        machine.record_decision(RequestDecision::Reject);
        assert_eq!(machine.begin_deployment(&req.workflow), Ok(AgentState::Idle));
        assert!(machine.workflow().is_none());
        // The decision was consumed
        assert_eq!(
            machine.begin_deployment(&req.workflow),
            Err(AduError::InvalidState)
        );
    }

    #[test]
    fn test_transition_requires_decision() {
        let mut machine = AgentStateMachine::new();
        let req = request(WorkflowAction::ApplyDeployment, "w1", "");
        assert_eq!(
            machine.begin_deployment(&req.workflow),
            Err(AduError::InvalidState)
        );
        assert_eq!(machine.state(), AgentState::Idle);
    }

    #[test]
    fn test_classify_duplicate_and_retry() {
        let mut machine = AgentStateMachine::new();
        let first = request(WorkflowAction::ApplyDeployment, "w1", "");
        accept(&mut machine, &first);

        assert_eq!(machine.classify(&first), RequestKind::Duplicate);
        let retry = request(WorkflowAction::ApplyDeployment, "w1", "2022-01-26T11:33:29Z");
        assert_eq!(machine.classify(&retry), RequestKind::Retry);
        let other = request(WorkflowAction::ApplyDeployment, "w2", "");
        assert_eq!(machine.classify(&other), RequestKind::New);

        // Re-delivery after completion is still a duplicate
        machine.finish_deployment().unwrap();
        assert_eq!(machine.classify(&first), RequestKind::Duplicate);
    }

    #[test]
    fn test_retry_restarts_in_progress_workflow() {
        let mut machine = AgentStateMachine::new();
        accept(&mut machine, &request(WorkflowAction::ApplyDeployment, "w1", ""));
        let retry = request(WorkflowAction::ApplyDeployment, "w1", "t1");
        assert_eq!(accept(&mut machine, &retry), AgentState::DeploymentInProgress);
        assert_eq!(machine.workflow().unwrap().retry_timestamp, "t1");
    }

    #[test]
    fn test_new_workflow_while_busy_is_invalid() {
        let mut machine = AgentStateMachine::new();
        accept(&mut machine, &request(WorkflowAction::ApplyDeployment, "w1", ""));
        machine.record_decision(RequestDecision::Accept);
        let other = request(WorkflowAction::ApplyDeployment, "w2", "");
        assert_eq!(
            machine.begin_deployment(&other.workflow),
            Err(AduError::InvalidState)
        );
        assert_eq!(machine.workflow().unwrap().id, "w1");
    }

    #[test]
    fn test_classify_cancel_and_no_update() {
        let machine = AgentStateMachine::new();
        let cancel = request(WorkflowAction::Cancel, "w1", "");
        assert_eq!(machine.classify(&cancel), RequestKind::Cancel);

        let empty = UpdateRequest::default();
        assert_eq!(machine.classify(&empty), RequestKind::NoUpdate);
    }

    #[test]
    fn test_cancel() {
        let mut machine = AgentStateMachine::new();
        accept(&mut machine, &request(WorkflowAction::ApplyDeployment, "w1", ""));
        machine.cancel();
        assert_eq!(machine.state(), AgentState::Idle);
        // Cancelling while idle is harmless
        machine.cancel();
        assert_eq!(machine.state(), AgentState::Idle);
    }

    #[test]
    fn test_oversized_workflow_id() {
        let mut machine = AgentStateMachine::new();
        let id = "x".repeat(MAX_WORKFLOW_ID_LEN + 1);
        let req = request(WorkflowAction::ApplyDeployment, &id, "");
        machine.record_decision(RequestDecision::Accept);
        assert_eq!(
            machine.begin_deployment(&req.workflow),
            Err(AduError::InvalidArgument)
        );
        assert_eq!(machine.state(), AgentState::Idle);
    }

    #[test]
    fn test_escaped_workflow_id_is_tracked_unescaped() {
        let mut machine = AgentStateMachine::new();
        let req = request(WorkflowAction::ApplyDeployment, r"w\/1", "");
        accept(&mut machine, &req);
        assert_eq!(machine.workflow().unwrap().id, "w/1");
        assert_eq!(machine.classify(&req), RequestKind::Duplicate);
        let plain = request(WorkflowAction::ApplyDeployment, "w/1", "");
        assert_eq!(machine.classify(&plain), RequestKind::Duplicate);
    }

    #[test]
    fn test_oversized_retry_timestamp() {
        let mut machine = AgentStateMachine::new();
        let retry = "9".repeat(MAX_RETRY_TIMESTAMP_LEN + 1);
        let req = request(WorkflowAction::ApplyDeployment, "w1", &retry);
        machine.record_decision(RequestDecision::Accept);
        assert_eq!(
            machine.begin_deployment(&req.workflow),
            Err(AduError::InvalidArgument)
        );
        assert!(machine.workflow().is_none());
    }

    #[test]
    fn test_closure_policy() {
        let mut policy = from_fn(|request, _| {
            if request.workflow.id.matches("w1") {
                RequestDecision::Accept
            } else {
                RequestDecision::Reject
            }
        });
        let manifest = UpdateManifest::default();
        let req = request(WorkflowAction::ApplyDeployment, "w1", "");
        assert_eq!(policy.decide(&req, &manifest), RequestDecision::Accept);
        let req = request(WorkflowAction::ApplyDeployment, "w2", "");
        assert_eq!(policy.decide(&req, &manifest), RequestDecision::Reject);
        assert_eq!(AcceptAll.decide(&req, &manifest), RequestDecision::Accept);
    }
}
