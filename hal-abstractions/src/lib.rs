//! Hardware and platform abstraction traits for the ADU workflow engine
//!
//! This crate defines the capabilities the engine consumes but does not
//! implement. Board support packages provide them:
//! - **`twin`**: IoT Hub client "send reported properties" operation
//! - **`trust`**: root key storage for manifest signature validation

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]
#![deny(warnings)]

pub mod trust;
pub mod twin;

pub use trust::{RootKey, TrustStore};
pub use twin::TwinReporter;
