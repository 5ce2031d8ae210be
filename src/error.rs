//! Export-level errors: the user-facing failure kinds every layer folds into.

use thiserror::Error;

use crate::api::ApiError;
use crate::epub::EpubError;
use crate::generator::{AtomError, ConvertError, GeneratorError};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Page \"{title}\" was not found on {domain}.")]
    NotFound { title: String, domain: String },

    #[error(transparent)]
    InvalidFormat(#[from] GeneratorError),

    #[error("Unknown font \"{name}\". Available fonts: {available}")]
    UnknownFont { name: String, available: String },

    #[error("Upstream failure: {0}")]
    Upstream(#[source] ApiError),

    #[error("Could not build the book: {0}")]
    Construction(#[from] EpubError),

    #[error("Could not write the feed: {0}")]
    Feed(#[from] AtomError),

    #[error("Conversion failed: {0}")]
    Conversion(#[from] ConvertError),
}

impl From<ApiError> for ExportError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::NotFound { title, domain } => ExportError::NotFound { title, domain },
            other => ExportError::Upstream(other),
        }
    }
}

impl ExportError {
    /// Message safe to show to users; infrastructure detail stays in the log.
    pub fn user_message(&self) -> String {
        match self {
            ExportError::NotFound { .. }
            | ExportError::InvalidFormat(_)
            | ExportError::UnknownFont { .. } => self.to_string(),
            ExportError::Upstream(ApiError::HttpStatus { status, .. }) => format!(
                "The wiki answered with HTTP {status}. Please try again later."
            ),
            ExportError::Upstream(_) => {
                "The wiki could not be reached or sent an unexpected response. Please try again later."
                    .to_string()
            }
            ExportError::Construction(_) | ExportError::Feed(_) => {
                "The book could not be written. Check that the output location is writable.".to_string()
            }
            ExportError::Conversion(ConvertError::Spawn { command, .. }) => {
                format!("The converter \"{command}\" could not be started. Is it installed?")
            }
            ExportError::Conversion(_) => "Conversion to the requested format failed.".to_string(),
        }
    }

    /// True for errors caused by the request itself rather than the environment.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ExportError::NotFound { .. } | ExportError::InvalidFormat(_) | ExportError::UnknownFont { .. }
        )
    }
}
