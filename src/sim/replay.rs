use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use log::error;

use crate::{errors::DrivebenchError, telemetry::TelemetrySnapshot};

use super::{
    CameraSpec, CaptureClient, CaptureResolution, ControlClient, HandshakeReply, SessionProps,
    CLIENT_PROTOCOL_VERSION,
};

/// A capture client that replays pre-recorded telemetry snapshots.
///
/// This enables unit testing of the episode loop without a running
/// simulator, and offline re-scoring of previously recorded sessions.
pub struct ReplayCaptureClient {
    cur_tick: usize,
    snapshots: Vec<TelemetrySnapshot>,
}

impl ReplayCaptureClient {
    pub fn from_snapshots(snapshots: Vec<TelemetrySnapshot>) -> Self {
        Self {
            cur_tick: 0,
            snapshots,
        }
    }

    /// Load snapshots from a JSON Lines file, one snapshot per line,
    /// typically recorded during a live session.
    pub fn from_file(path: &Path) -> Result<Self, DrivebenchError> {
        let file = File::open(path).map_err(|e| DrivebenchError::ReplayFileError { source: e })?;
        let reader = BufReader::new(file);

        let mut snapshots = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| DrivebenchError::ReplayFileError { source: e })?;
            if line.is_empty() {
                continue;
            }
            let snapshot: TelemetrySnapshot = serde_json::from_str(&line).map_err(|e| {
                error!("Could not parse recorded snapshot line: {}", e);
                DrivebenchError::ReplayParseError { source: e }
            })?;
            snapshots.push(snapshot);
        }

        Ok(Self::from_snapshots(snapshots))
    }

    /// Whether every recorded snapshot has been replayed.
    pub fn is_exhausted(&self) -> bool {
        self.cur_tick >= self.snapshots.len()
    }
}

impl CaptureClient for ReplayCaptureClient {
    fn reset(&mut self, _shared_mem_name: &str, _shared_mem_size: u64) -> bool {
        true
    }

    fn step(&mut self) -> Result<Option<TelemetrySnapshot>, DrivebenchError> {
        if self.cur_tick >= self.snapshots.len() {
            return Err(DrivebenchError::CaptureReadError {
                description: "end of recorded session".to_string(),
            });
        }
        let snapshot = self.snapshots[self.cur_tick].clone();
        self.cur_tick += 1;
        Ok(Some(snapshot))
    }

    fn close(&mut self) {}
}

/// A control client that accepts every command. Pairs with
/// [`ReplayCaptureClient`] for offline runs where there is no simulator to
/// steer.
pub struct NullControlClient {
    has_control: bool,
}

impl NullControlClient {
    pub fn new() -> Self {
        Self { has_control: false }
    }
}

impl Default for NullControlClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlClient for NullControlClient {
    fn create_session(
        &mut self,
        _host: &str,
        _port: u16,
    ) -> Result<HandshakeReply, DrivebenchError> {
        Ok(HandshakeReply::Session(SessionProps {
            client_id: 1,
            max_capture_resolution: Some(CaptureResolution {
                width: 1920,
                height: 1080,
            }),
            server_protocol_version: CLIENT_PROTOCOL_VERSION.to_string(),
        }))
    }

    fn register_camera(
        &mut self,
        _client_id: i32,
        _camera: &CameraSpec,
    ) -> Result<i32, DrivebenchError> {
        Ok(1)
    }

    fn shared_memory(&mut self, _client_id: i32) -> Result<(String, u64), DrivebenchError> {
        Ok(("replay_session".to_string(), 0))
    }

    fn set_control(
        &mut self,
        _client_id: i32,
        _steering: f64,
        _throttle: f64,
        _brake: f64,
        _handbrake: f64,
    ) -> Result<(), DrivebenchError> {
        Ok(())
    }

    fn request_agent_control(&mut self, _client_id: i32) -> Result<bool, DrivebenchError> {
        self.has_control = true;
        Ok(true)
    }

    fn release_agent_control(&mut self, _client_id: i32) -> Result<bool, DrivebenchError> {
        self.has_control = false;
        Ok(true)
    }

    fn reset_agent(&mut self, _client_id: i32) -> Result<(), DrivebenchError> {
        Ok(())
    }

    fn close_session(&mut self, _client_id: i32) -> Result<(), DrivebenchError> {
        Ok(())
    }
}
