use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("WebDriver session could not be started at {url}: {reason}")]
    Session { url: String, reason: String },

    #[error("Driver binary {0:?} could not be launched")]
    DriverLaunch(PathBuf, #[source] std::io::Error),

    #[error("Task source {path:?} is unavailable: {reason}")]
    TaskSource { path: PathBuf, reason: String },

    #[error("Spreadsheet {path:?} is unreadable: {reason}")]
    CorruptWorkbook { path: PathBuf, reason: String },

    #[error("Spreadsheet {path:?} has no column {column:?}")]
    MissingColumn { path: PathBuf, column: String },

    #[error("Image could not be re-encoded: {0}")]
    ImageDecode(#[from] image::ImageError),
}

impl HarvestError {
    /// Environment failures abort the run; everything else skips one unit.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarvestError::Session { .. } | HarvestError::DriverLaunch(..) | HarvestError::TaskSource { .. }
        )
    }
}

/// Whether an error chain carries a fatal [`HarvestError`].
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|e| e.downcast_ref::<HarvestError>())
        .any(HarvestError::is_fatal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn fatal_classification_survives_context() {
        let err: anyhow::Result<()> = Err(HarvestError::TaskSource {
            path: "一级类目.xlsx".into(),
            reason: "missing".into(),
        })
        .context("loading tasks");
        assert!(is_fatal(&err.unwrap_err()));

        let corrupt = anyhow::Error::new(HarvestError::CorruptWorkbook {
            path: "a.xlsx".into(),
            reason: "not a zip".into(),
        });
        assert!(!is_fatal(&corrupt));
        assert!(!is_fatal(&anyhow::anyhow!("click failed")));
    }
}
