use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub palms: PalmConfig,
    pub landmarks: LandmarkConfig,
    pub classifier: ClassifierConfig,
    pub labels: LabelsConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
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

pub trait Validatable {
    fn get_path(&self) -> PathBuf;

    fn validate(&self) -> Result<(), String> {
        if !self.get_path().exists() {
            return Err(format!("File not found: {:?}", self.get_path()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub model_dir: PathBuf,
    pub onnx_file: String,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Validatable for ModelConfig {
    fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }
}

/// Palm-detection model settings. The anchor layout is the one of the
/// MediaPipe palm detector (strides 8, 16, 16, 16, two anchors each).
#[derive(Debug, Deserialize, Clone)]
pub struct PalmConfig {
    pub model: ModelConfig,
    #[serde(default = "default_palm_input_size")]
    pub input_size: u32,
    #[serde(default = "default_confidence")]
    pub min_detection_confidence: f32,
    #[serde(default = "default_min_suppression_threshold")]
    pub min_suppression_threshold: f32,
    #[serde(default = "default_max_num_hands")]
    pub max_num_hands: usize,
    #[serde(default = "default_roi_scale")]
    pub roi_scale: f32,
    #[serde(default = "default_roi_shift_y")]
    pub roi_shift_y: f32,
    #[serde(default = "default_regressors_output")]
    pub regressors_output: String,
    #[serde(default = "default_palm_scores_output")]
    pub scores_output: String,
}

fn default_palm_input_size() -> u32 {
    192
}

fn default_confidence() -> f32 {
    0.5
}

fn default_min_suppression_threshold() -> f32 {
    0.3
}

fn default_max_num_hands() -> usize {
    2
}

fn default_roi_scale() -> f32 {
    2.6
}

fn default_roi_shift_y() -> f32 {
    -0.5
}

fn default_regressors_output() -> String {
    "Identity".into()
}

fn default_palm_scores_output() -> String {
    "Identity_1".into()
}

/// Hand-landmark model settings. Output names default to the ones a
/// tf2onnx export of the MediaPipe landmark model carries.
#[derive(Debug, Deserialize, Clone)]
pub struct LandmarkConfig {
    pub model: ModelConfig,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default = "default_confidence")]
    pub min_tracking_confidence: f32,
    #[serde(default = "default_landmarks_output")]
    pub landmarks_output: String,
    #[serde(default = "default_presence_output")]
    pub presence_output: String,
    #[serde(default = "default_handedness_output")]
    pub handedness_output: String,
}

fn default_input_size() -> u32 {
    224
}

fn default_landmarks_output() -> String {
    "Identity".into()
}

fn default_presence_output() -> String {
    "Identity_1".into()
}

fn default_handedness_output() -> String {
    "Identity_2".into()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    pub model: ModelConfig,
    #[serde(default = "default_scores_output")]
    pub scores_output: String,
}

fn default_scores_output() -> String {
    "output".into()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LabelsConfig {
    pub labels_dir: PathBuf,
    pub labels_file: String,
}

impl Validatable for LabelsConfig {
    fn get_path(&self) -> PathBuf {
        self.labels_dir.join(&self.labels_file)
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        self.palms.model.validate()?;
        self.landmarks.model.validate()?;
        self.classifier.model.validate()?;
        self.labels.validate()?;
        if self.palms.input_size == 0 || self.landmarks.input_size == 0 {
            return Err("model input sizes must be greater than zero".into());
        }
        if self.palms.max_num_hands == 0 {
            return Err("palms.max_num_hands must be at least 1".into());
        }
        for (name, value) in [
            ("palms.min_detection_confidence", self.palms.min_detection_confidence),
            ("palms.min_suppression_threshold", self.palms.min_suppression_threshold),
            ("landmarks.min_tracking_confidence", self.landmarks.min_tracking_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if self.palms.roi_scale <= 0.0 {
            return Err("palms.roi_scale must be greater than zero".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
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

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
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

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
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
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(format!("{}.yaml", environment.as_str())),
        ))
        .add_source(
            config::Environment::with_prefix("FI")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config = config.try_deserialize::<Config>()?;
    if let Err(e) = config.validate() {
        tracing::error!("Configuration validation failed: {}", e);
        return Err(config::ConfigError::Message(e));
    }

    Ok(config)
}
