// Library interface for drivebench
// This allows integration tests to access internal modules

pub mod benchmark;
pub mod config;
pub mod connection;
pub mod dashboard;
pub mod episode;
pub mod errors;
pub mod reward;
pub mod sim;
pub mod telemetry;

// Re-export commonly used types
pub use benchmark::{BenchmarkRecorder, BenchmarkSummary};
pub use connection::{ConnectionManager, ConnectionState, SimLifecycle};
pub use episode::{Action, EpisodeController, StepOutcome};
pub use errors::DrivebenchError;
pub use reward::score::EpisodeScore;
pub use sim::{CameraSpec, CaptureClient, ControlClient};
pub use telemetry::TelemetrySnapshot;
