use crate::config::{LabelsConfig, Validatable};
use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelsError {
    #[error("Failed to read labels: {0}")]
    Io(#[from] io::Error),
    #[error("Labels file {0} does not contain any label")]
    Empty(String),
}

pub trait State: Send + Sync + 'static {
    fn new(labels_cfg: &LabelsConfig) -> Result<Self, LabelsError>
    where
        Self: Sized;
    fn get_labels(&self) -> &[String];

    fn label_for(&self, class_id: usize) -> String {
        self.get_labels()
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("unknown {}", class_id))
    }
}

#[derive(Debug)]
pub struct ServiceState {
    class_labels: Vec<String>,
}

impl State for ServiceState {
    fn new(labels_cfg: &LabelsConfig) -> Result<ServiceState, LabelsError> {
        let class_labels = load_labels(&labels_cfg.get_path())?;
        tracing::info!("Loaded {} finger-spelling labels", class_labels.len());
        Ok(ServiceState { class_labels })
    }

    fn get_labels(&self) -> &[String] {
        &self.class_labels
    }
}

/// One label per line, in classifier output order. Blank lines are skipped.
pub fn load_labels(filepath: &Path) -> Result<Vec<String>, LabelsError> {
    let file = File::open(filepath)?;
    let reader = io::BufReader::new(file);

    let mut labels = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let label = line.trim();
        if !label.is_empty() {
            labels.push(label.to_string());
        }
    }

    if labels.is_empty() {
        return Err(LabelsError::Empty(filepath.display().to_string()));
    }

    Ok(labels)
}
