use presence_vision::AnalyzerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("no registered staff; register staff before scanning")]
    NoRegisteredStaff,

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("analyzer: {0}")]
    Analyzer(#[from] AnalyzerError),

    #[error("invalid photo: {0}")]
    InvalidPhoto(String),

    #[error("invalid staff details: {0}")]
    InvalidStaff(String),

    #[error("encoding store {path}: {reason}")]
    EncodingStore { path: String, reason: String },

    #[error("unsupported export format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid backup name: {0}")]
    InvalidBackupName(String),

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("xlsx: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
}

pub type Result<T> = std::result::Result<T, Error>;
