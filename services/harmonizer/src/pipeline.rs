//! Parse, merge and validate in one pass.

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::abares::AbaresParser;
use crate::abs::AbsParser;
use crate::error::Result;
use crate::merge::{ConfidencePolicy, Merger};
use crate::observation::{Dataset, SourceDescriptor};
use crate::registry::Registry;
use crate::validate::{validate, ValidationConfig, ValidationReport};
use crate::workbook::SheetSource;

/// A merged dataset and its validation report. Only a clean report makes
/// the dataset publishable.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub dataset: Dataset,
    pub report: ValidationReport,
}

impl Outcome {
    pub fn into_publishable(self) -> Result<Dataset> {
        self.report.into_result()?;
        Ok(self.dataset)
    }
}

pub struct Pipeline<'a> {
    registry: &'a Registry,
    policy: ConfidencePolicy,
    validation: ValidationConfig,
    extraction_date: Option<NaiveDate>,
    abares_source: SourceDescriptor,
    abs_source: SourceDescriptor,
}

impl<'a> Pipeline<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            policy: ConfidencePolicy::default(),
            validation: ValidationConfig::default(),
            extraction_date: None,
            abares_source: SourceDescriptor::abares(),
            abs_source: SourceDescriptor::abs_historic(),
        }
    }

    pub fn with_policy(mut self, policy: ConfidencePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_validation(mut self, validation: ValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_extraction_date(mut self, date: NaiveDate) -> Self {
        self.extraction_date = Some(date);
        self
    }

    /// Source descriptors, typically carrying the workbooks' content hashes.
    pub fn with_sources(mut self, abares: SourceDescriptor, abs: SourceDescriptor) -> Self {
        self.abares_source = abares;
        self.abs_source = abs;
        self
    }

    /// Structural and merge errors abort; invariant violations are returned
    /// in the report.
    pub fn run<A: SheetSource, B: SheetSource>(&self, abares: &mut A, abs: &mut B) -> Result<Outcome> {
        let abares_records = AbaresParser::new(self.registry, self.abares_source.clone()).records(abares)?;
        let abs_records = AbsParser::new(self.registry, self.abs_source.clone()).records(abs)?;

        let mut merger = Merger::new(self.registry, &self.policy);
        if let Some(date) = self.extraction_date {
            merger = merger.with_extraction_date(date);
        }
        let dataset = merger.merge(abares_records.chain(abs_records))?;

        let report = validate(&dataset, self.registry, &self.validation);
        if report.is_clean() {
            info!(observations = report.observations_checked, "validation passed");
        } else {
            for (check, count) in report.counts() {
                warn!(check, count, "validation violations");
            }
        }

        Ok(Outcome { dataset, report })
    }
}

/// Runs the pipeline and returns the dataset only when it validates clean.
pub fn harmonize<A: SheetSource, B: SheetSource>(
    abares: &mut A,
    abs: &mut B,
    registry: &Registry,
    policy: ConfidencePolicy,
    validation: ValidationConfig,
) -> Result<Dataset> {
    Pipeline::new(registry)
        .with_policy(policy)
        .with_validation(validation)
        .run(abares, abs)?
        .into_publishable()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarmonizeError;
    use crate::fixtures;
    use crate::observation::{Confidence, YearType};
    use crate::registry::StateCode;
    use crate::units::Unit;
    use crate::workbook::InMemoryWorkbook;
    use calamine::Data;

    fn run_fixtures() -> Outcome {
        let registry = Registry::builtin().unwrap();
        Pipeline::new(&registry)
            .run(&mut fixtures::abares_workbook(), &mut fixtures::abs_workbook())
            .unwrap()
    }

    #[test]
    fn test_fixture_workbooks_validate_clean() {
        let outcome = run_fixtures();
        assert!(outcome.report.is_clean(), "{:?}", outcome.report.violations);
        assert_eq!(outcome.dataset.observations.len(), outcome.dataset.provenance.len());
    }

    #[test]
    fn test_headline_values() {
        let dataset = run_fixtures().into_publishable().unwrap();
        let get = |variable: &str, state: StateCode, year: i32, year_type: YearType| {
            dataset
                .observations
                .iter()
                .find(|o| {
                    o.variable_id == variable && o.state_code == state && o.year == year && o.year_type == year_type
                })
                .cloned()
                .unwrap()
        };

        let milk = get("prod_milk_total", StateCode::Aus, 2017, YearType::FinancialYear);
        assert_eq!(milk.value, 9289.0);

        let vic = get("prod_milk_total", StateCode::Vic, 2017, YearType::FinancialYear);
        assert_eq!(vic.confidence, Confidence::Medium);

        let cows = get("herd_dairy_cows", StateCode::Nsw, 2017, YearType::FinancialYear);
        assert_eq!(cows.value, 270_000.0);
        assert_eq!(cows.unit, Unit::Head);
        assert_eq!(cows.original_unit, "'000");

        let cattle = get("herd_total_cattle", StateCode::Aus, 1860, YearType::CalendarYear);
        assert_eq!(cattle.original_unit, "no.");
        assert_eq!(cattle.confidence, Confidence::High);
    }

    #[test]
    fn test_total_cattle_years_are_contiguous() {
        let dataset = run_fixtures().dataset;
        let years: Vec<i32> = dataset
            .observations
            .iter()
            .filter(|o| o.variable_id == "herd_total_cattle" && o.state_code == StateCode::Aus)
            .map(|o| o.year)
            .collect();
        assert_eq!(years, (1860..=2022).collect::<Vec<_>>());
    }

    #[test]
    fn test_runs_are_identical() {
        assert_eq!(run_fixtures().dataset, run_fixtures().dataset);
    }

    #[test]
    fn test_structural_error_aborts() {
        let registry = Registry::builtin().unwrap();
        let mut abs = InMemoryWorkbook::new().with_sheet("Table 8", vec![vec![Data::String("x".into())]]);
        let err = harmonize(
            &mut fixtures::abares_workbook(),
            &mut abs,
            &registry,
            ConfidencePolicy::default(),
            ValidationConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, HarmonizeError::MissingAnchor { .. }));
    }

    #[test]
    fn test_violations_block_publication() {
        let registry = Registry::builtin().unwrap();
        let strict = ValidationConfig {
            reconciliation_tolerance: -1.0,
            ..ValidationConfig::default()
        };
        let err = harmonize(
            &mut fixtures::abares_workbook(),
            &mut fixtures::abs_workbook(),
            &registry,
            ConfidencePolicy::default(),
            strict,
        )
        .unwrap_err();
        match err {
            HarmonizeError::ValidationFailure(report) => {
                assert!(report.violations.iter().all(|v| v.check() == "reconciliation"));
                assert!(!report.violations.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
