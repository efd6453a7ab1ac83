use thiserror::Error;

use crate::observation::ObservationKey;
use crate::validate::ValidationReport;

/// Every failure is terminal for an ingestion run. Messages carry the label,
/// unit, key or cell a maintainer needs to find the offending input.
#[derive(Error, Debug)]
pub enum HarmonizeError {
    #[error("unsupported unit '{unit}' ({context})")]
    UnsupportedUnit { unit: String, context: String },

    #[error("unmapped label '{label}' at {location}")]
    UnmappedLabel { label: String, location: String },

    #[error("duplicate key {key}: supplied by {first} and again by {second}")]
    DuplicateKeyConflict {
        key: ObservationKey,
        first: String,
        second: String,
    },

    #[error("validation failed with {} violation(s)", .0.violations.len())]
    ValidationFailure(ValidationReport),

    #[error("variable '{0}' is not in the registry")]
    UnknownVariable(String),

    #[error("sheet '{sheet}' not found; available: {available:?}")]
    MissingSheet {
        sheet: String,
        available: Vec<String>,
    },

    #[error("anchor {anchor} not found in sheet '{sheet}'")]
    MissingAnchor { sheet: String, anchor: String },

    #[error("cell {location} holds '{text}', expected a number")]
    InvalidCell { location: String, text: String },

    #[error("registry: {0}")]
    Registry(String),

    #[error("workbook error: {0}")]
    Workbook(#[from] calamine::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HarmonizeError>;
