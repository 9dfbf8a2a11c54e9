// Error types for drivebench

use snafu::Snafu;
use std::io;

#[derive(Debug, Snafu)]
pub enum DrivebenchError {
    // Invalid upstream telemetry values. These are programmer or data errors
    // and are never retried.
    #[snafu(display("Lane deviation must be positive, got {value}"))]
    NegativeLaneDeviation { value: f64 },
    #[snafu(display("G-force magnitude must be positive, got {value}"))]
    NegativeGforce { value: f64 },

    // Errors for the simulator control boundary
    #[snafu(display("Transient connection failure: {description}"))]
    TransientConnectionFailure { description: String },
    #[snafu(display(
        "Could not connect to the simulator after {attempts} attempts (last error: {last_error}). {guidance}"
    ))]
    ConnectFailed {
        attempts: u32,
        last_error: String,
        guidance: String,
    },
    #[snafu(display(
        "Server and client protocol versions do not match - server is {server} and client is {client}"
    ))]
    ProtocolVersionMismatch { server: String, client: String },
    #[snafu(display(
        "Malformed handshake response from the simulator: {description}. This usually means an incompatible client library - try reinstalling it"
    ))]
    MalformedServerResponse { description: String },
    #[snafu(display("Could not register camera {name} with the simulator: {reason}"))]
    CameraRegistrationError { name: String, reason: String },
    #[snafu(display("Control command rejected by the simulator: {description}"))]
    ControlCommandError { description: String },

    // Errors for the shared capture channel
    #[snafu(display(
        "Could not bind the capture channel at {shared_mem_name} after {attempts} attempts. {guidance}"
    ))]
    CaptureBindFailed {
        shared_mem_name: String,
        attempts: u32,
        guidance: String,
    },
    #[snafu(display("Error reading a capture frame: {description}"))]
    CaptureReadError { description: String },

    // Errors for the benchmark recorder
    #[snafu(display("Error writing benchmark results file"))]
    BenchmarkWriteError { source: io::Error },
    #[snafu(display("Error reading benchmark results file"))]
    BenchmarkReadError { source: io::Error },
    #[snafu(display("Benchmark results file is malformed: {reason}"))]
    BenchmarkParseError { reason: String },
    #[snafu(display("Could not create benchmark directory"))]
    BenchmarkDirError { source: io::Error },

    // Errors for recorded-session replay
    #[snafu(display("Unable to open recorded session file"))]
    ReplayFileError { source: io::Error },
    #[snafu(display("Error parsing recorded session file"))]
    ReplayParseError { source: serde_json::Error },

    // Config management errors
    #[snafu(display("Could not find application data directory to save config file"))]
    NoConfigDir,
    #[snafu(display("Error writing config file"))]
    ConfigIOError { source: io::Error },
    #[snafu(display("Error serializing config file"))]
    ConfigSerializeError { source: serde_json::Error },
}

impl DrivebenchError {
    /// Whether the connection manager may retry after this error. Version
    /// skew and malformed responses can never be fixed by retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DrivebenchError::TransientConnectionFailure { .. }
                | DrivebenchError::CaptureReadError { .. }
        )
    }
}
