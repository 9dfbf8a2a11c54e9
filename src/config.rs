use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::DrivebenchError;

const CONFIG_FILE_NAME: &str = "config.json";

pub const DEFAULT_SIM_HOST: &str = "127.0.0.1";
pub const DEFAULT_SIM_PORT: u16 = 9876;
const DEFAULT_DASHBOARD_QUEUE_CAPACITY: usize = 100;

#[derive(Serialize, Deserialize, Debug)]
pub struct AppConfig {
    pub sim_host: String,
    pub sim_port: u16,
    /// Overrides the default benchmark results directory
    pub benchmark_dir: Option<PathBuf>,
    pub dashboard_queue_capacity: usize,
    pub end_on_lap: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sim_host: DEFAULT_SIM_HOST.to_string(),
            sim_port: DEFAULT_SIM_PORT,
            benchmark_dir: None,
            dashboard_queue_capacity: DEFAULT_DASHBOARD_QUEUE_CAPACITY,
            end_on_lap: false,
        }
    }
}

impl AppConfig {
    pub fn from_local_file() -> Option<Self> {
        let config_path = dirs::config_dir()?.join("drivebench").join(CONFIG_FILE_NAME);

        if config_path.exists() {
            let file = std::fs::File::open(config_path).expect("Could not open config file");
            Some(serde_json::from_reader(file).expect("Could not parse config file"))
        } else {
            None
        }
    }

    pub fn save(&self) -> Result<(), DrivebenchError> {
        let config_path = dirs::config_dir()
            .ok_or(DrivebenchError::NoConfigDir)?
            .join("drivebench")
            .join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            std::fs::create_dir_all(config_path.parent().unwrap())
                .map_err(|e| DrivebenchError::ConfigIOError { source: e })?;
        }

        let file = std::fs::File::create(config_path)
            .map_err(|e| DrivebenchError::ConfigIOError { source: e })?;
        serde_json::to_writer(file, self)
            .map_err(|e| DrivebenchError::ConfigSerializeError { source: e })
    }

    /// Benchmark results directory: the configured override, or a
    /// `benchmark` directory under the user data dir.
    pub fn resolved_benchmark_dir(&self) -> Result<PathBuf, DrivebenchError> {
        if let Some(dir) = &self.benchmark_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir().ok_or(DrivebenchError::NoConfigDir)?;
        Ok(data_dir.join("drivebench").join("benchmark"))
    }
}
