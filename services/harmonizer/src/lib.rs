//! Harmonizer - reconciles the ABARES dairy commodity tables and the ABS
//! historical cattle tables into one long-format dataset.
//!
//! Flow: workbooks -> parsers (raw records) -> merger (unit conversion,
//! confidence, provenance) -> validator (publication gate).

pub mod abares;
pub mod abs;
pub mod error;
pub mod merge;
pub mod observation;
pub mod pipeline;
pub mod registry;
pub mod table;
pub mod units;
pub mod validate;
pub mod workbook;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use error::{HarmonizeError, Result};
pub use merge::{ConfidencePolicy, EstimatedSpan, Merger};
pub use observation::{
    Confidence, Dataset, Observation, ObservationKey, Provenance, RawRecord, SourceDescriptor,
    UnitConversionRecord, YearType,
};
pub use pipeline::{harmonize, Outcome, Pipeline};
pub use registry::{Category, Registry, StateCode, VariableDefinition};
pub use units::Unit;
pub use validate::{validate, ValidationConfig, ValidationReport, Violation};
pub use workbook::{InMemoryWorkbook, SheetSource, Workbook};
