//! Platform-agnostic Device Update (ADU) workflow engine
//!
//! This crate contains the update logic shared by every board: it parses
//! the cloud's update requests, authenticates update manifests, tracks the
//! agent state and builds the reported-property documents. It has NO
//! hardware dependencies and never allocates; all input, output and scratch
//! memory is supplied by the caller.
//!
//! ## Module Structure
//!
//! - **`json`**: `serde-json-core` glue and borrowed string views
//! - **`manifest`**: update request and manifest model and parsers
//! - **`auth`**: manifest signature verification against trusted root keys
//! - **`agent`**: agent state machine and property reporter
//! - **`client`**: `AduClient`, which drives one request end to end
//! - **`image`**: streaming verification of downloaded update files
//! - **`config`**: capacities and agent configuration
//! - **`error`**: `AduError`
//!
//! ## Logging
//!
//! Enable the `defmt` feature on target builds or the `log` feature on
//! hosted builds. With neither, logging compiles away.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]
#![deny(warnings)]

#[macro_use]
mod fmt;

pub mod agent;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod image;
pub mod json;
pub mod manifest;

pub use agent::{
    ActiveWorkflow, AgentState, AgentStateMachine, DeviceProperties, InstallResult, InstalledUpdateId,
    PropertyReporter, RequestDecision, StepResult, UpdatePolicy,
};
pub use auth::verify_manifest;
pub use client::{AduClient, Outcome};
pub use config::{AgentConfig, ReporterConfig};
pub use error::AduError;
pub use manifest::{parse_manifest, parse_request, UpdateManifest, UpdateRequest};
