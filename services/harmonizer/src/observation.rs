//! The long-format data model: raw source cells, normalized observations and
//! their audit records.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::registry::{Category, StateCode};
use crate::units::Unit;

// =============================================================================
// Periods
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum YearType {
    /// July to June, labelled by the start year.
    #[serde(rename = "FY")]
    FinancialYear,
    #[serde(rename = "CY")]
    CalendarYear,
}

impl YearType {
    pub fn as_str(&self) -> &'static str {
        match self {
            YearType::FinancialYear => "FY",
            YearType::CalendarYear => "CY",
        }
    }

    pub fn period_label(&self, year: i32) -> String {
        match self {
            YearType::FinancialYear => fy_label(year),
            YearType::CalendarYear => year.to_string(),
        }
    }
}

/// `1965` -> `"1965-66"`.
pub fn fy_label(year: i32) -> String {
    format!("{}-{:02}", year, (year + 1).rem_euclid(100))
}

/// Start year of a financial-year label such as `1973-74` or `1973–74`.
/// A bare four-digit year is accepted as its own start year.
pub fn parse_fy(label: &str) -> Option<i32> {
    let s = label.trim();
    let head = s.get(..4)?;
    if !head.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = head.parse().ok()?;

    let rest = s[4..].trim_start();
    if rest.is_empty() {
        return Some(year);
    }
    let rest = rest
        .strip_prefix('-')
        .or_else(|| rest.strip_prefix('\u{2013}'))
        .or_else(|| rest.strip_prefix('\u{2014}'))?
        .trim_start();
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    if (2..=4).contains(&digits) {
        Some(year)
    } else {
        None
    }
}

// =============================================================================
// Observations
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
    /// Computed by the pipeline rather than read from a source.
    Interpolated,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
            Confidence::Interpolated => "interpolated",
        }
    }
}

/// Identity of an observation; unique across the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObservationKey {
    pub variable_id: String,
    pub state_code: StateCode,
    pub year: i32,
    pub year_type: YearType,
}

impl fmt::Display for ObservationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.variable_id,
            self.state_code,
            self.year,
            self.year_type.as_str()
        )
    }
}

/// One row of the tidy table. Field order is the column order of the
/// tabular sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub year: i32,
    pub year_type: YearType,
    pub state_code: StateCode,
    pub category: Category,
    pub variable_id: String,
    pub value: f64,
    pub unit: Unit,
    pub confidence: Confidence,
    pub original_value: f64,
    pub original_unit: String,
    pub notes: String,
}

impl Observation {
    pub fn key(&self) -> ObservationKey {
        ObservationKey {
            variable_id: self.variable_id.clone(),
            state_code: self.state_code,
            year: self.year,
            year_type: self.year_type,
        }
    }

    /// Publication order: year, state, category, variable, then year type.
    pub fn sort_key(&self) -> (i32, &'static str, &'static str, &str, &'static str) {
        (
            self.year,
            self.state_code.as_str(),
            self.category.as_str(),
            self.variable_id.as_str(),
            self.year_type.as_str(),
        )
    }
}

// =============================================================================
// Provenance
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    PrimarySurvey,
    AdministrativeRegister,
    Derived,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::PrimarySurvey => "primary-survey",
            SourceType::AdministrativeRegister => "administrative-register",
            SourceType::Derived => "derived",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionMethod {
    Manual,
    AutomatedParse,
    Calculated,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Manual => "manual",
            ExtractionMethod::AutomatedParse => "automated-parse",
            ExtractionMethod::Calculated => "calculated",
        }
    }
}

/// The publication a workbook was downloaded from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub name: String,
    pub source_type: SourceType,
    pub url: String,
    /// `sha256:<hex>` of the workbook bytes, when known.
    pub content_hash: Option<String>,
}

impl SourceDescriptor {
    pub fn abares() -> Self {
        Self {
            name: "ABARES Agricultural Commodity Statistics".to_string(),
            source_type: SourceType::AdministrativeRegister,
            url: "https://data.gov.au/data/dataset/agricultural-commodity-statistics-2017"
                .to_string(),
            content_hash: None,
        }
    }

    pub fn abs_historic() -> Self {
        Self {
            name: "ABS Historical Selected Agricultural Commodities 1860-2022".to_string(),
            source_type: SourceType::PrimarySurvey,
            url: "https://www.abs.gov.au/statistics/industry/agriculture/agricultural-commodities-australia/latest-release".to_string(),
            content_hash: None,
        }
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provenance {
    pub key: ObservationKey,
    pub source_name: String,
    pub source_type: SourceType,
    pub source_url: String,
    pub source_page: String,
    pub extraction_method: ExtractionMethod,
    pub extraction_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Audit entry for a rescaled value: `value == original_value * conversion_factor`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitConversionRecord {
    pub key: ObservationKey,
    pub from_unit: String,
    pub to_unit: Unit,
    pub conversion_factor: f64,
    pub notes: String,
}

/// Merged output: observations in publication order, one provenance record
/// per observation and one conversion record per rescaled observation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Dataset {
    pub observations: Vec<Observation>,
    pub provenance: Vec<Provenance>,
    pub conversions: Vec<UnitConversionRecord>,
}

// =============================================================================
// Raw source cells
// =============================================================================

/// Marker a source attaches to a published figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFlag {
    Preliminary,
    Estimate,
}

/// One non-blank numeric cell as published, before unit conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceCell {
    pub variable_id: String,
    pub state_code: StateCode,
    pub year: i32,
    pub value: f64,
    pub unit: String,
    pub flag: Option<SourceFlag>,
    pub source: Arc<SourceDescriptor>,
    /// Sheet the table was read from, e.g. `Table 6.4`.
    pub table: String,
    /// `xlsx:sheet='Table 6.4':cell=C12`.
    pub location: String,
}

/// Parser output, tagged by the source layout it came from. The tag fixes the
/// native year basis; everything downstream works on [`SourceCell`].
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    /// Financial-year commodity tables.
    Abares(SourceCell),
    /// Calendar-year historical tables.
    Abs(SourceCell),
}

impl RawRecord {
    pub fn cell(&self) -> &SourceCell {
        match self {
            RawRecord::Abares(cell) | RawRecord::Abs(cell) => cell,
        }
    }

    pub fn year_type(&self) -> YearType {
        match self {
            RawRecord::Abares(_) => YearType::FinancialYear,
            RawRecord::Abs(_) => YearType::CalendarYear,
        }
    }

    pub fn key(&self) -> ObservationKey {
        let cell = self.cell();
        ObservationKey {
            variable_id: cell.variable_id.clone(),
            state_code: cell.state_code,
            year: cell.year,
            year_type: self.year_type(),
        }
    }
}
