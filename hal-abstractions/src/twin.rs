//! Device twin reporting capability

/// IoT Hub client capable of publishing twin reported properties
///
/// Implementors own the transport (MQTT over TLS on real boards). The call
/// is blocking from the engine's point of view: it returns once the publish
/// has been handed to the transport, yielding the request id that later
/// correlates the hub's acknowledgement.
///
/// # Example Implementation
/// ```ignore
/// struct HubClient { next_request_id: u32 }
///
/// impl TwinReporter for HubClient {
///     type Error = NetworkError;
///     fn send_reported_properties(&mut self, payload: &[u8]) -> Result<u32, Self::Error> {
///         // Publish to $iothub/twin/PATCH/properties/reported/?$rid={id}
///     }
/// }
/// ```
pub trait TwinReporter {
    /// Transport error type
    type Error: core::fmt::Debug;

    /// Publish `payload` as a reported-properties patch
    ///
    /// # Returns
    ///
    /// The request id assigned to the publish.
    fn send_reported_properties(&mut self, payload: &[u8]) -> Result<u32, Self::Error>;
}

impl<T: TwinReporter + ?Sized> TwinReporter for &mut T {
    type Error = T::Error;

    fn send_reported_properties(&mut self, payload: &[u8]) -> Result<u32, Self::Error> {
        (**self).send_reported_properties(payload)
    }
}
