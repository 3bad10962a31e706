use std::io;
use std::path::PathBuf;

use neural_render_contracts::models::{ModelNotFound, ParameterError};
use thiserror::Error;

/// Every way a single process operation can end without an output file.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error(
        "Replicate API key not set; set REPLICATE_API_TOKEN or `api_key` in the settings file"
    )]
    Auth,
    #[error(transparent)]
    ModelNotFound(#[from] ModelNotFound),
    #[error("capture failed: {0}")]
    Capture(String),
    #[error("model '{model}' parameter '{parameter}' has no bound value")]
    MissingBinding { model: String, parameter: String },
    #[error(transparent)]
    InvalidBinding(#[from] ParameterError),
    #[error("remote inference failed: {0:#}")]
    Remote(anyhow::Error),
    #[error("model '{model}' returned no usable output")]
    NoOutput { model: String },
    #[error("failed to download the processed image{}: {detail}", status_label(.status))]
    Download { status: Option<u16>, detail: String },
    #[error("failed writing {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl OperationError {
    /// Stable short name used in events and exit reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::ModelNotFound(_) => "model_not_found",
            Self::Capture(_) => "capture",
            Self::MissingBinding { .. } => "missing_binding",
            Self::InvalidBinding(_) => "invalid_binding",
            Self::Remote(_) => "remote",
            Self::NoOutput { .. } => "no_output",
            Self::Download { .. } => "download",
            Self::Persist { .. } => "persist",
        }
    }
}

fn status_label(status: &Option<u16>) -> String {
    status
        .map(|code| format!(" (status {code})"))
        .unwrap_or_default()
}

/// Temp-file removal failed; reported, never fatal.
#[derive(Debug, Error)]
#[error("failed to delete temporary file {}: {source}", .path.display())]
pub struct CleanupWarning {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

#[cfg(test)]
mod tests {
    use neural_render_contracts::models::ModelNotFound;

    use super::OperationError;

    #[test]
    fn messages_are_human_readable() {
        let err = OperationError::Download {
            status: Some(404),
            detail: "not found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to download the processed image (status 404): not found"
        );
        assert_eq!(err.kind(), "download");

        let err = OperationError::from(ModelNotFound("Nope".to_string()));
        assert_eq!(err.to_string(), "model 'Nope' not found in registry");

        let err = OperationError::Remote(
            anyhow::anyhow!("connection reset").context("Replicate request failed"),
        );
        assert_eq!(
            err.to_string(),
            "remote inference failed: Replicate request failed: connection reset"
        );
    }
}
