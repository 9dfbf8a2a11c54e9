pub(crate) mod replay;

pub use replay::{NullControlClient, ReplayCaptureClient};

use serde::{Deserialize, Serialize};

use crate::{errors::DrivebenchError, telemetry::TelemetrySnapshot};

/// Protocol version this client speaks. The server reports its own version
/// during the handshake and the two must match exactly.
pub const CLIENT_PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A camera the simulator renders for the agent.
///
/// `connection_id` is the registration handle the server assigns; it is set
/// exactly once, when the camera is registered against a session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CameraSpec {
    pub name: String,
    pub field_of_view: f64,
    pub capture_width: u32,
    pub capture_height: u32,
    pub relative_position: [f64; 3],
    pub relative_rotation: [f64; 3],
    pub connection_id: Option<i32>,
}

impl CameraSpec {
    /// The built-in front camera, used when the caller requests none.
    pub fn front_cam() -> Self {
        Self {
            name: "front_cam".to_string(),
            field_of_view: 60.0,
            capture_width: 227,
            capture_height: 227,
            relative_position: [150.0, 1.0, 200.0],
            relative_rotation: [0.0, 0.0, 0.0],
            connection_id: None,
        }
    }
}

/// Largest capture resolution the server is willing to serve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureResolution {
    pub width: u32,
    pub height: u32,
}

/// The session record a well-formed handshake returns.
#[derive(Clone, Debug)]
pub struct SessionProps {
    pub client_id: i32,
    /// Absent while the server is still bringing capture up; the connection
    /// manager treats a missing value as a transient failure
    pub max_capture_resolution: Option<CaptureResolution>,
    pub server_protocol_version: String,
}

/// Raw handshake reply, before the connection manager has validated it.
#[derive(Clone, Debug)]
pub enum HandshakeReply {
    /// Old client libraries return a bare status code instead of a session
    /// record; this shape is unrecoverable
    StatusCode(i64),
    Session(SessionProps),
}

/// Outbound command surface of the simulator control endpoint.
///
/// # Lifecycle
///
/// 1. `create_session` opens a session and returns the raw handshake reply
/// 2. `register_camera` is called once per requested camera, in order
/// 3. `shared_memory` names the capture channel the session publishes to
/// 4. per-step calls (`set_control`, control hand-off) reference the
///    `client_id` until `close_session` invalidates it
pub trait ControlClient {
    fn create_session(&mut self, host: &str, port: u16)
        -> Result<HandshakeReply, DrivebenchError>;

    /// Register a camera against the session, returning the server's
    /// registration handle.
    fn register_camera(
        &mut self,
        client_id: i32,
        camera: &CameraSpec,
    ) -> Result<i32, DrivebenchError>;

    /// Name and size of the shared memory the session captures into.
    fn shared_memory(&mut self, client_id: i32) -> Result<(String, u64), DrivebenchError>;

    fn set_control(
        &mut self,
        client_id: i32,
        steering: f64,
        throttle: f64,
        brake: f64,
        handbrake: f64,
    ) -> Result<(), DrivebenchError>;

    /// Ask the simulator to hand vehicle control to the agent. Returns
    /// whether the agent now has control.
    fn request_agent_control(&mut self, client_id: i32) -> Result<bool, DrivebenchError>;

    /// Return vehicle control to the simulator's own driver.
    fn release_agent_control(&mut self, client_id: i32) -> Result<bool, DrivebenchError>;

    /// Respawn the agent at the route start.
    fn reset_agent(&mut self, client_id: i32) -> Result<(), DrivebenchError>;

    fn close_session(&mut self, client_id: i32) -> Result<(), DrivebenchError>;
}

/// Inbound pull surface of the shared capture channel.
pub trait CaptureClient {
    /// Bind the local capture channel to the server's shared memory.
    /// Returns false while the memory is not ready yet; the connection
    /// manager retries with backoff.
    fn reset(&mut self, shared_mem_name: &str, shared_mem_size: u64) -> bool;

    /// Pull the next telemetry snapshot. `Ok(None)` means the simulator had
    /// no frame ready; errors are transient read failures the episode loop
    /// degrades to a missing observation.
    fn step(&mut self) -> Result<Option<TelemetrySnapshot>, DrivebenchError>;

    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_front_cam_defaults() {
        let cam = CameraSpec::front_cam();
        assert_eq!(cam.name, "front_cam");
        assert_eq!(cam.capture_width, 227);
        assert_eq!(cam.capture_height, 227);
        assert!(cam.connection_id.is_none());
    }
}
