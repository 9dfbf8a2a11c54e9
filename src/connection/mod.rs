pub(crate) mod backoff;

pub use backoff::{BackoffPolicy, DoublingBackoff, SplayedLinearBackoff};

use std::{thread, time::Duration};

use log::{debug, error, info, warn};

use crate::{
    errors::DrivebenchError,
    sim::{
        CameraSpec, CaptureClient, CaptureResolution, ControlClient, HandshakeReply, SessionProps,
        CLIENT_PROTOCOL_VERSION,
    },
};

const MAX_HANDSHAKE_ATTEMPTS: u32 = 10;
const MAX_CAPTURE_BIND_ATTEMPTS: u32 = 10;
const CAPTURE_BIND_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Who owns the simulator process. Decides the remediation guidance on
/// fatal connection errors, not the error kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimLifecycle {
    /// The simulator was launched by this process with a start command
    Managed,
    /// The simulator is an externally managed instance
    External,
}

impl SimLifecycle {
    fn guidance(&self) -> &'static str {
        match self {
            SimLifecycle::Managed => {
                "You may need to close the Unreal Editor and/or turn off saving CPU in background in the Editor preferences (search for CPU)."
            }
            SimLifecycle::External => {
                "Check that the simulator is running and that its control endpoint is reachable, then restart the simulator if the problem persists."
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Handshaking,
    Validated,
    CamerasRegistered,
    CaptureBootstrapped,
    Ready,
    ConnectFailed,
}

/// An established simulator session.
///
/// Usable iff `client_id > 0`; every field is invalidated when the session
/// closes or the viewpoint changes.
#[derive(Clone, Debug)]
pub struct ConnectionSession {
    pub client_id: i32,
    pub max_capture_resolution: Option<CaptureResolution>,
    pub server_protocol_version: String,
    pub shared_mem_name: String,
    pub shared_mem_size: u64,
    pub cameras: Vec<CameraSpec>,
}

impl ConnectionSession {
    pub fn is_usable(&self) -> bool {
        self.client_id > 0
    }
}

/// Establishes a session with the simulator's control endpoint and
/// bootstraps the shared capture channel.
///
/// Handshake failures retry with splayed linear backoff; capture binds
/// retry with doubling backoff. Protocol-version skew and malformed
/// handshake replies are fatal immediately - retrying cannot fix either.
pub struct ConnectionManager {
    host: String,
    port: u16,
    lifecycle: SimLifecycle,
    client_version: String,
    state: ConnectionState,
    handshake_backoff: Box<dyn BackoffPolicy>,
    capture_backoff: Box<dyn BackoffPolicy>,
}

impl ConnectionManager {
    pub fn new(host: &str, port: u16, lifecycle: SimLifecycle) -> Self {
        Self::with_policies(
            host,
            port,
            lifecycle,
            Box::new(SplayedLinearBackoff::new()),
            Box::new(DoublingBackoff::new(CAPTURE_BIND_INITIAL_BACKOFF)),
        )
    }

    pub fn with_policies(
        host: &str,
        port: u16,
        lifecycle: SimLifecycle,
        handshake_backoff: Box<dyn BackoffPolicy>,
        capture_backoff: Box<dyn BackoffPolicy>,
    ) -> Self {
        Self {
            host: host.to_string(),
            port,
            lifecycle,
            client_version: CLIENT_PROTOCOL_VERSION.to_string(),
            state: ConnectionState::Disconnected,
            handshake_backoff,
            capture_backoff,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Run the full connection sequence: handshake, version check, camera
    /// registration, capture bootstrap. Returns a usable session.
    pub fn connect<C: ControlClient, P: CaptureClient>(
        &mut self,
        control: &mut C,
        capture: &mut P,
        cameras: Option<Vec<CameraSpec>>,
    ) -> Result<ConnectionSession, DrivebenchError> {
        self.state = ConnectionState::Handshaking;
        debug!("Connecting to the simulator at {}:{}", self.host, self.port);

        let (props, attempts) = self.handshake(control)?;

        if props.server_protocol_version != self.client_version {
            self.state = ConnectionState::ConnectFailed;
            return Err(DrivebenchError::ProtocolVersionMismatch {
                server: props.server_protocol_version,
                client: self.client_version.clone(),
            });
        }
        self.state = ConnectionState::Validated;
        debug!("Session validated after {} attempt(s)", attempts);

        if props.client_id <= 0 {
            self.state = ConnectionState::ConnectFailed;
            return Err(DrivebenchError::ConnectFailed {
                attempts,
                last_error: format!("server returned unusable client id {}", props.client_id),
                guidance: self.lifecycle.guidance().to_string(),
            });
        }

        // cameras register in request order; each handle lands back on its
        // CameraSpec so capture frames can be matched to a viewpoint
        let mut cameras = cameras.unwrap_or_else(|| vec![CameraSpec::front_cam()]);
        for camera in cameras.iter_mut() {
            let handle = control
                .register_camera(props.client_id, camera)
                .map_err(|e| {
                    self.state = ConnectionState::ConnectFailed;
                    DrivebenchError::CameraRegistrationError {
                        name: camera.name.clone(),
                        reason: e.to_string(),
                    }
                })?;
            camera.connection_id = Some(handle);
        }
        self.state = ConnectionState::CamerasRegistered;

        let (shared_mem_name, shared_mem_size) = control.shared_memory(props.client_id)?;
        self.bind_capture(capture, &shared_mem_name, shared_mem_size)?;
        self.state = ConnectionState::CaptureBootstrapped;

        let session = ConnectionSession {
            client_id: props.client_id,
            max_capture_resolution: props.max_capture_resolution,
            server_protocol_version: props.server_protocol_version,
            shared_mem_name,
            shared_mem_size,
            cameras,
        };
        self.state = ConnectionState::Ready;
        info!(
            "Connected to the simulator (client id {}, protocol {})",
            session.client_id, session.server_protocol_version
        );
        Ok(session)
    }

    /// Tear the session down and invalidate it.
    pub fn close<C: ControlClient, P: CaptureClient>(
        &mut self,
        control: &mut C,
        capture: &mut P,
        session: &mut ConnectionSession,
    ) {
        if session.is_usable() {
            if let Err(e) = control.release_agent_control(session.client_id) {
                warn!("Could not release agent control on close: {}", e);
            }
            if let Err(e) = control.close_session(session.client_id) {
                warn!("Could not close the simulator session: {}", e);
            }
        }
        capture.close();
        session.client_id = 0;
        self.state = ConnectionState::Disconnected;
    }

    /// Changing cameras requires a fresh session: close the current one and
    /// run the whole connection sequence again with the new viewpoints.
    pub fn change_viewpoint<C: ControlClient, P: CaptureClient>(
        &mut self,
        control: &mut C,
        capture: &mut P,
        session: &mut ConnectionSession,
        cameras: Vec<CameraSpec>,
    ) -> Result<ConnectionSession, DrivebenchError> {
        self.close(control, capture, session);
        self.connect(control, capture, Some(cameras))
    }

    fn handshake<C: ControlClient>(
        &mut self,
        control: &mut C,
    ) -> Result<(SessionProps, u32), DrivebenchError> {
        let mut last_error = String::new();
        for attempt in 1..=MAX_HANDSHAKE_ATTEMPTS {
            match Self::attempt_handshake(control, &self.host, self.port) {
                Ok(props) => return Ok((props, attempt)),
                Err(e) if e.is_transient() => {
                    last_error = e.to_string();
                    if attempt == MAX_HANDSHAKE_ATTEMPTS {
                        break;
                    }
                    let delay = self.handshake_backoff.delay(attempt);
                    warn!(
                        "Connection to the simulator failed, retry ({}/{}) in {:.0?}",
                        attempt, MAX_HANDSHAKE_ATTEMPTS, delay
                    );
                    thread::sleep(delay);
                }
                Err(e) => {
                    self.state = ConnectionState::ConnectFailed;
                    return Err(e);
                }
            }
        }
        self.state = ConnectionState::ConnectFailed;
        error!(
            "Could not connect to the simulator after {} attempts",
            MAX_HANDSHAKE_ATTEMPTS
        );
        Err(DrivebenchError::ConnectFailed {
            attempts: MAX_HANDSHAKE_ATTEMPTS,
            last_error,
            guidance: self.lifecycle.guidance().to_string(),
        })
    }

    fn attempt_handshake<C: ControlClient>(
        control: &mut C,
        host: &str,
        port: u16,
    ) -> Result<SessionProps, DrivebenchError> {
        match control.create_session(host, port)? {
            HandshakeReply::StatusCode(code) => Err(DrivebenchError::MalformedServerResponse {
                description: format!("bare status code {code} instead of a session record"),
            }),
            HandshakeReply::Session(props) => {
                if props.max_capture_resolution.is_none() {
                    // capabilities not advertised yet; try again
                    return Err(DrivebenchError::TransientConnectionFailure {
                        description: "session record is missing max_capture_resolution"
                            .to_string(),
                    });
                }
                Ok(props)
            }
        }
    }

    fn bind_capture<P: CaptureClient>(
        &mut self,
        capture: &mut P,
        shared_mem_name: &str,
        shared_mem_size: u64,
    ) -> Result<(), DrivebenchError> {
        debug!(
            "Binding capture channel at {} ({} bytes)",
            shared_mem_name, shared_mem_size
        );
        for attempt in 1..=MAX_CAPTURE_BIND_ATTEMPTS {
            if capture.reset(shared_mem_name, shared_mem_size) {
                debug!("Capture channel bound");
                return Ok(());
            }
            if attempt < MAX_CAPTURE_BIND_ATTEMPTS {
                let delay = self.capture_backoff.delay(attempt);
                debug!("Capture memory not ready, sleeping {:?}", delay);
                thread::sleep(delay);
            }
        }
        self.state = ConnectionState::ConnectFailed;
        error!(
            "Could not bind capture memory at {} after {} attempts",
            shared_mem_name, MAX_CAPTURE_BIND_ATTEMPTS
        );
        Err(DrivebenchError::CaptureBindFailed {
            shared_mem_name: shared_mem_name.to_string(),
            attempts: MAX_CAPTURE_BIND_ATTEMPTS,
            guidance: self.lifecycle.guidance().to_string(),
        })
    }
}
