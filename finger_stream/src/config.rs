use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub inference_service: InferenceServiceConfig,
    pub camera: CameraConfig,
    pub prediction_polling: PredictionPollingConfig,
    #[serde(default)]
    pub drawing: DrawingConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InferenceServiceConfig {
    pub host: String,
    pub port: u16,
}

impl InferenceServiceConfig {
    pub fn get_address(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct CameraConfig {
    #[serde(default)]
    pub device_index: i32,
    #[serde(default = "default_flip_horizontal")]
    pub flip_horizontal: bool,
    #[serde(default = "default_stream_fps")]
    pub stream_fps: u64,
}

fn default_flip_horizontal() -> bool {
    true
}

fn default_stream_fps() -> u64 {
    30
}

impl CameraConfig {
    pub fn get_stream_delay_ms(&self) -> u64 {
        fps_to_delay_ms(self.stream_fps)
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct PredictionPollingConfig {
    #[serde(default = "default_prediction_fps")]
    pub prediction_fps: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u64,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u64,
}

fn default_prediction_fps() -> u64 {
    10
}

fn default_max_retries() -> u64 {
    3
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_backoff_factor() -> u32 {
    2
}

fn default_max_consecutive_failures() -> u64 {
    10
}

impl PredictionPollingConfig {
    pub fn get_prediction_delay_ms(&self) -> u64 {
        fps_to_delay_ms(self.prediction_fps)
    }
}

fn fps_to_delay_ms(fps: u64) -> u64 {
    (1000.0 / fps as f64).round() as u64
}

/// Colors are BGR, as OpenCV draws them.
#[derive(Clone, Deserialize, Debug)]
pub struct DrawingConfig {
    #[serde(default = "default_landmark_color")]
    pub landmark_color: [u8; 3],
    #[serde(default = "default_thickness")]
    pub landmark_thickness: i32,
    #[serde(default = "default_circle_radius")]
    pub landmark_radius: i32,
    #[serde(default = "default_connection_color")]
    pub connection_color: [u8; 3],
    #[serde(default = "default_thickness")]
    pub connection_thickness: i32,
}

fn default_landmark_color() -> [u8; 3] {
    [196, 148, 130]
}

fn default_connection_color() -> [u8; 3] {
    [214, 177, 172]
}

fn default_thickness() -> i32 {
    3
}

fn default_circle_radius() -> i32 {
    3
}

impl Default for DrawingConfig {
    fn default() -> Self {
        Self {
            landmark_color: default_landmark_color(),
            landmark_thickness: default_thickness(),
            landmark_radius: default_circle_radius(),
            connection_color: default_connection_color(),
            connection_thickness: default_thickness(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.camera.stream_fps == 0 {
            return Err("camera.stream_fps must be greater than zero".into());
        }
        if self.prediction_polling.prediction_fps == 0 {
            return Err("prediction_polling.prediction_fps must be greater than zero".into());
        }
        for (name, value) in [
            ("drawing.landmark_radius", self.drawing.landmark_radius),
            ("drawing.landmark_thickness", self.drawing.landmark_thickness),
            ("drawing.connection_thickness", self.drawing.connection_thickness),
        ] {
            if value <= 0 {
                return Err(format!("{} must be greater than zero, got {}", name, value));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            other => Err(format!(
                "{} is not a supported minimum log level. Use `debug`, `info` or `warn`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .parse()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(format!("{}.yaml", environment.as_str())),
        ))
        .add_source(
            config::Environment::with_prefix("FS")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;
    config.validate().map_err(config::ConfigError::Message)?;

    Ok(config)
}
