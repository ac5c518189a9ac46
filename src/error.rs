use thiserror::Error;

use crate::calibration::MandatoryField;

#[derive(Error, Debug)]
pub enum CalibError {
    #[error("No metadata backend produced data: {}", attempts.join("; "))]
    NoMetadata { attempts: Vec<String> },

    #[error("Missing mandatory optical fields: {}", format_fields(.0))]
    MissingFields(Vec<MandatoryField>),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_fields(fields: &[MandatoryField]) -> String {
    fields
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, CalibError>;
