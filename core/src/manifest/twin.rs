//! Locating the ADU service request inside a device twin document
//!
//! Writable-property updates reach the device in two shapes:
//!
//! ```text
//! // Desired-properties patch
//! {"azureDeviceUpdateAgent":{"__t":"c","service":{...}},"$version":7}
//!
//! // Full twin document (GET response)
//! {"desired":{"azureDeviceUpdateAgent":{...},"$version":7},"reported":{...}}
//! ```
//!
//! `locate_service_request` reads the property version and the
//! `azureDeviceUpdateAgent` component's `service` object. A service object
//! that does not decode still yields a `ServiceRequest` when the version is
//! known, so the request can be answered with a rejection.

use serde::de::IgnoredAny;
use serde::Deserialize;

use crate::error::AduError;
use crate::json;

use super::parser::{RequestLayout, ServiceObject};
use super::UpdateRequest;

/// The ADU request found in a twin document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    /// Desired-properties version, echoed as `av` in the response
    pub version: i32,
    layout: Result<RequestLayout, AduError>,
}

impl ServiceRequest {
    /// Decode the request, unescaping its manifest in place
    ///
    /// # Arguments
    ///
    /// * `payload` - The twin document this request was located in
    ///
    /// # Returns
    ///
    /// The request views, or `ParseFailed` when the `service` object was
    /// malformed.
    pub fn bind(self, payload: &mut [u8]) -> Result<UpdateRequest<'_>, AduError> {
        self.layout?.bind(payload)
    }
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct Twin<'a> {
    #[serde(rename = "$version")]
    version: Option<i32>,
    #[serde(rename = "azureDeviceUpdateAgent", borrow)]
    component: Option<Component<'a>>,
    #[serde(borrow)]
    desired: Option<DesiredProperties<'a>>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct DesiredProperties<'a> {
    #[serde(rename = "$version")]
    version: Option<i32>,
    #[serde(rename = "azureDeviceUpdateAgent", borrow)]
    component: Option<Component<'a>>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct Component<'a> {
    #[serde(borrow)]
    service: Option<ServiceObject<'a>>,
}

/// The same document with the service object left undecoded
#[derive(Default, Deserialize)]
#[serde(default)]
struct TwinOutline {
    #[serde(rename = "$version")]
    version: Option<i32>,
    #[serde(rename = "azureDeviceUpdateAgent")]
    component: Option<ComponentOutline>,
    desired: Option<DesiredOutline>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct DesiredOutline {
    #[serde(rename = "$version")]
    version: Option<i32>,
    #[serde(rename = "azureDeviceUpdateAgent")]
    component: Option<ComponentOutline>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct ComponentOutline {
    service: Option<IgnoredAny>,
}

/// Find the ADU `service` object and the property version in a twin payload
///
/// # Arguments
///
/// * `payload` - Desired-properties patch or full twin document
///
/// # Returns
///
/// `Ok(None)` when the document carries no ADU service request,
/// `ParseFailed` for malformed JSON or a request without `$version`.
pub fn locate_service_request(payload: &[u8]) -> Result<Option<ServiceRequest>, AduError> {
    if payload.is_empty() {
        return Err(AduError::InvalidArgument);
    }

    let (version, layout) = match json::from_slice::<Twin<'_>>(payload) {
        Ok(twin) => {
            let (version, component) = match twin.desired {
                Some(desired) => (desired.version, desired.component),
                None => (twin.version, twin.component),
            };
            match component.and_then(|component| component.service) {
                Some(service) => (version, RequestLayout::capture(payload, &service)),
                None => return Ok(no_request()),
            }
        }
        Err(e) => {
            let outline: TwinOutline = json::from_slice(payload).map_err(|e| {
                warn!("Twin document is malformed");
                e
            })?;
            let (version, component) = match outline.desired {
                Some(desired) => (desired.version, desired.component),
                None => (outline.version, outline.component),
            };
            match component.and_then(|component| component.service) {
                Some(_) => {
                    warn!("ADU service request is malformed");
                    (version, Err(e))
                }
                None => return Ok(no_request()),
            }
        }
    };

    match version {
        Some(version) => {
            debug!("ADU service request found (version {})", version);
            Ok(Some(ServiceRequest { version, layout }))
        }
        None => {
            warn!("ADU service request without $version");
            Err(AduError::ParseFailed)
        }
    }
}

fn no_request() -> Option<ServiceRequest> {
    trace!("Twin document carries no ADU service request");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::WorkflowAction;

    #[test]
    fn test_desired_patch() {
        let mut payload = br#"{"azureDeviceUpdateAgent":{"__t":"c","service":{"workflow":{"action":3,"id":"w"}}},"$version":12}"#.to_vec();
        let located = locate_service_request(&payload).unwrap().unwrap();
        assert_eq!(located.version, 12);
        let request = located.bind(&mut payload).unwrap();
        assert_eq!(request.workflow.action, WorkflowAction::ApplyDeployment);
        assert!(request.workflow.id.matches("w"));
    }

    #[test]
    fn test_full_twin_uses_desired() {
        let mut payload = br#"{"desired":{"azureDeviceUpdateAgent":{"service":{"workflow":{"id":"a"}}},"$version":4},"reported":{"azureDeviceUpdateAgent":{"service":{"b":2}},"$version":9}}"#.to_vec();
        let located = locate_service_request(&payload).unwrap().unwrap();
        assert_eq!(located.version, 4);
        assert!(located.bind(&mut payload).unwrap().workflow.id.matches("a"));
    }

    #[test]
    fn test_other_component_only() {
        let payload = br#"{"thermostat":{"targetTemperature":21},"$version":3}"#;
        assert_eq!(locate_service_request(payload), Ok(None));
    }

    #[test]
    fn test_missing_version() {
        let payload = br#"{"azureDeviceUpdateAgent":{"service":{}}}"#;
        assert_eq!(locate_service_request(payload), Err(AduError::ParseFailed));
    }

    #[test]
    fn test_malformed_service_keeps_version() {
        let mut payload =
            br#"{"azureDeviceUpdateAgent":{"service":{"workflow":{"action":"x"}}},"$version":6}"#
                .to_vec();
        let located = locate_service_request(&payload).unwrap().unwrap();
        assert_eq!(located.version, 6);
        assert_eq!(located.bind(&mut payload), Err(AduError::ParseFailed));
    }

    #[test]
    fn test_malformed_twin() {
        let payload = br#"{"azureDeviceUpdateAgent":{"service":{"#;
        assert_eq!(locate_service_request(payload), Err(AduError::ParseFailed));
    }
}
