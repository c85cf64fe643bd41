use thiserror::Error;

/// Errors raised outside the recompute engine (which never fails).
#[derive(Error, Debug)]
pub enum TakeoffError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("XLSX write error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    /// The model answered with something that is not a takeoff list.
    /// `raw` keeps the untouched reply so it can be shown to the user.
    #[error("Model reply could not be parsed: {reason}")]
    MalformedReply { reason: String, raw: String },

    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),
}

impl TakeoffError {
    pub(crate) fn malformed(reason: impl Into<String>, raw: &str) -> Self {
        TakeoffError::MalformedReply {
            reason: reason.into(),
            raw: raw.to_string(),
        }
    }
}
