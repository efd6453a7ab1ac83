//! Publication gate.
//!
//! [`validate`] runs every check over the whole dataset and returns all
//! violations at once; the caller decides whether a non-empty report stops
//! publication.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{HarmonizeError, Result};
use crate::observation::{Dataset, ObservationKey, YearType};
use crate::registry::{Granularity, Registry, StateCode};
use crate::units::Unit;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Allowed |sum(states) - AUS| relative to AUS.
    pub reconciliation_tolerance: f64,
    /// Allowed |value - original_value * factor| relative to the expected value.
    pub conversion_tolerance: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            reconciliation_tolerance: 0.001,
            conversion_tolerance: 1e-6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Violation {
    MissingValue {
        key: ObservationKey,
    },
    NegativeValue {
        key: ObservationKey,
        value: f64,
    },
    DuplicateKey {
        key: ObservationKey,
        count: usize,
    },
    /// Years absent from the interior of a series.
    Gap {
        variable_id: String,
        state_code: StateCode,
        year_type: YearType,
        missing: Vec<i32>,
    },
    /// The series does not span exactly its declared coverage.
    CoverageMismatch {
        variable_id: String,
        state_code: StateCode,
        year_type: YearType,
        expected: (i32, i32),
        found: (i32, i32),
    },
    Reconciliation {
        variable_id: String,
        year: i32,
        year_type: YearType,
        state_sum: f64,
        national: f64,
        delta: f64,
    },
    UnknownVariable {
        key: ObservationKey,
    },
    UnitMismatch {
        key: ObservationKey,
        unit: Unit,
        expected: Unit,
    },
    /// A state row for a variable published nationally only.
    GranularityMismatch {
        key: ObservationKey,
    },
    ConversionMismatch {
        key: ObservationKey,
        value: f64,
        expected: f64,
    },
}

impl Violation {
    pub fn check(&self) -> &'static str {
        match self {
            Violation::MissingValue { .. } => "missing_value",
            Violation::NegativeValue { .. } => "negative_value",
            Violation::DuplicateKey { .. } => "duplicate_key",
            Violation::Gap { .. } => "gap",
            Violation::CoverageMismatch { .. } => "coverage_mismatch",
            Violation::Reconciliation { .. } => "reconciliation",
            Violation::UnknownVariable { .. } => "unknown_variable",
            Violation::UnitMismatch { .. } => "unit_mismatch",
            Violation::GranularityMismatch { .. } => "granularity_mismatch",
            Violation::ConversionMismatch { .. } => "conversion_mismatch",
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::MissingValue { key } => write!(f, "{key}: value is missing"),
            Violation::NegativeValue { key, value } => write!(f, "{key}: negative value {value}"),
            Violation::DuplicateKey { key, count } => write!(f, "{key}: appears {count} times"),
            Violation::Gap {
                variable_id,
                state_code,
                year_type,
                missing,
            } => write!(
                f,
                "({variable_id}, {state_code}, {}): missing years {missing:?}",
                year_type.as_str()
            ),
            Violation::CoverageMismatch {
                variable_id,
                state_code,
                year_type,
                expected,
                found,
            } => write!(
                f,
                "({variable_id}, {state_code}, {}): covers {}..={}, declared {}..={}",
                year_type.as_str(),
                found.0,
                found.1,
                expected.0,
                expected.1
            ),
            Violation::Reconciliation {
                variable_id,
                year,
                year_type,
                state_sum,
                national,
                delta,
            } => write!(
                f,
                "({variable_id}, {year}, {}): states sum to {state_sum}, AUS is {national} (delta {delta})",
                year_type.as_str()
            ),
            Violation::UnknownVariable { key } => write!(f, "{key}: variable not in registry"),
            Violation::UnitMismatch { key, unit, expected } => {
                write!(f, "{key}: unit {unit}, registry says {expected}")
            }
            Violation::GranularityMismatch { key } => {
                write!(f, "{key}: state value for a national-only variable")
            }
            Violation::ConversionMismatch { key, value, expected } => {
                write!(f, "{key}: value {value} but original x factor is {expected}")
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub observations_checked: usize,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// Violation counts per check name.
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for violation in &self.violations {
            *counts.entry(violation.check()).or_insert(0) += 1;
        }
        counts
    }

    pub fn into_result(self) -> Result<()> {
        if self.is_clean() {
            Ok(())
        } else {
            Err(HarmonizeError::ValidationFailure(self))
        }
    }
}

pub fn validate(dataset: &Dataset, registry: &Registry, config: &ValidationConfig) -> ValidationReport {
    let mut violations = Vec::new();
    check_values(dataset, &mut violations);
    check_uniqueness(dataset, &mut violations);
    check_references(dataset, registry, &mut violations);
    check_conversions(dataset, config, &mut violations);
    check_continuity(dataset, registry, &mut violations);
    check_reconciliation(dataset, registry, config, &mut violations);

    ValidationReport {
        observations_checked: dataset.observations.len(),
        violations,
    }
}

fn check_values(dataset: &Dataset, out: &mut Vec<Violation>) {
    for obs in &dataset.observations {
        if !obs.value.is_finite() {
            out.push(Violation::MissingValue { key: obs.key() });
        } else if obs.value < 0.0 {
            out.push(Violation::NegativeValue {
                key: obs.key(),
                value: obs.value,
            });
        }
    }
}

fn check_uniqueness(dataset: &Dataset, out: &mut Vec<Violation>) {
    let mut counts: BTreeMap<ObservationKey, usize> = BTreeMap::new();
    for obs in &dataset.observations {
        *counts.entry(obs.key()).or_insert(0) += 1;
    }
    out.extend(
        counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(key, count)| Violation::DuplicateKey { key, count }),
    );
}

fn check_references(dataset: &Dataset, registry: &Registry, out: &mut Vec<Violation>) {
    for obs in &dataset.observations {
        let Ok(definition) = registry.variable(&obs.variable_id) else {
            out.push(Violation::UnknownVariable { key: obs.key() });
            continue;
        };
        if obs.unit != definition.unit {
            out.push(Violation::UnitMismatch {
                key: obs.key(),
                unit: obs.unit,
                expected: definition.unit,
            });
        }
        if definition.granularity == Granularity::National && !obs.state_code.is_aggregate() {
            out.push(Violation::GranularityMismatch { key: obs.key() });
        }
    }
}

fn check_conversions(dataset: &Dataset, config: &ValidationConfig, out: &mut Vec<Violation>) {
    let factors: HashMap<&ObservationKey, f64> = dataset
        .conversions
        .iter()
        .map(|c| (&c.key, c.conversion_factor))
        .collect();

    for obs in &dataset.observations {
        if !obs.value.is_finite() {
            continue;
        }
        let key = obs.key();
        let factor = factors.get(&key).copied().unwrap_or(1.0);
        let expected = obs.original_value * factor;
        if (obs.value - expected).abs() > config.conversion_tolerance * expected.abs() {
            out.push(Violation::ConversionMismatch {
                key,
                value: obs.value,
                expected,
            });
        }
    }
}

fn check_continuity(dataset: &Dataset, registry: &Registry, out: &mut Vec<Violation>) {
    let mut series: BTreeMap<(&str, StateCode, YearType), BTreeSet<i32>> = BTreeMap::new();
    for obs in &dataset.observations {
        series
            .entry((obs.variable_id.as_str(), obs.state_code, obs.year_type))
            .or_default()
            .insert(obs.year);
    }

    for ((variable_id, state_code, year_type), years) in series {
        let (Some(&first), Some(&last)) = (years.first(), years.last()) else {
            continue;
        };
        let missing: Vec<i32> = (first..=last).filter(|y| !years.contains(y)).collect();
        if !missing.is_empty() {
            out.push(Violation::Gap {
                variable_id: variable_id.to_string(),
                state_code,
                year_type,
                missing,
            });
        }

        let declared = registry
            .variable(variable_id)
            .ok()
            .and_then(|def| def.coverage_for(state_code));
        if let Some(expected) = declared {
            if expected != (first, last) {
                out.push(Violation::CoverageMismatch {
                    variable_id: variable_id.to_string(),
                    state_code,
                    year_type,
                    expected,
                    found: (first, last),
                });
            }
        }
    }
}

#[derive(Default)]
struct YearTotals {
    state_sum: f64,
    states: usize,
    national: Option<f64>,
}

fn check_reconciliation(dataset: &Dataset, registry: &Registry, config: &ValidationConfig, out: &mut Vec<Violation>) {
    let mut totals: BTreeMap<(&str, i32, YearType), YearTotals> = BTreeMap::new();
    for obs in &dataset.observations {
        let state_level = registry
            .variable(&obs.variable_id)
            .is_ok_and(|def| def.granularity == Granularity::StateAndNational);
        if !state_level || !obs.value.is_finite() {
            continue;
        }
        let entry = totals
            .entry((obs.variable_id.as_str(), obs.year, obs.year_type))
            .or_default();
        if obs.state_code.is_aggregate() {
            entry.national = Some(obs.value);
        } else {
            entry.state_sum += obs.value;
            entry.states += 1;
        }
    }

    for ((variable_id, year, year_type), t) in totals {
        let Some(national) = t.national else {
            continue;
        };
        if t.states == 0 {
            continue;
        }
        let delta = t.state_sum - national;
        if delta.abs() > config.reconciliation_tolerance * national.abs() {
            out.push(Violation::Reconciliation {
                variable_id: variable_id.to_string(),
                year,
                year_type,
                state_sum: t.state_sum,
                national,
                delta,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{abares_cell, abs_cell, milk_2017};
    use crate::merge::{ConfidencePolicy, Merger};
    use crate::observation::RawRecord;

    fn dataset(records: Vec<RawRecord>) -> Dataset {
        let registry = Registry::builtin().unwrap();
        let policy = ConfidencePolicy::default();
        Merger::new(&registry, &policy)
            .merge(records.into_iter().map(Ok))
            .unwrap()
    }

    fn check(dataset: &Dataset) -> ValidationReport {
        validate(dataset, &Registry::builtin().unwrap(), &ValidationConfig::default())
    }

    // -------------------------------------------------------------------------
    // CLEAN DATA
    // -------------------------------------------------------------------------

    #[test]
    fn test_milk_2017_reconciles() {
        let report = check(&dataset(milk_2017()));
        assert!(report.is_clean(), "{:?}", report.violations);
        assert_eq!(report.observations_checked, 7);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_within_tolerance_passes() {
        let mut records = milk_2017();
        // AUS 9289 -> 9297: delta 8 ML, under 0.1%
        if let RawRecord::Abares(cell) = &mut records[6] {
            cell.value = 9297.0;
        }
        assert!(check(&dataset(records)).is_clean());
    }

    // -------------------------------------------------------------------------
    // VIOLATIONS
    // -------------------------------------------------------------------------

    #[test]
    fn test_reconciliation_reports_year_and_delta() {
        let mut records = milk_2017();
        if let RawRecord::Abares(cell) = &mut records[6] {
            cell.value = 9400.0;
        }
        let report = check(&dataset(records));
        assert_eq!(report.violations.len(), 1);
        match &report.violations[0] {
            Violation::Reconciliation {
                variable_id,
                year,
                state_sum,
                national,
                delta,
                ..
            } => {
                assert_eq!(variable_id, "prod_milk_total");
                assert_eq!(*year, 2017);
                assert_eq!(*state_sum, 9289.0);
                assert_eq!(*national, 9400.0);
                assert_eq!(*delta, -111.0);
            }
            other => panic!("unexpected violation: {other}"),
        }
    }

    #[test]
    fn test_negative_and_missing_values() {
        let mut data = dataset(vec![
            abares_cell("prod_butter", StateCode::Aus, 2015, 100.0, "kt"),
            abares_cell("prod_butter", StateCode::Aus, 2016, 100.0, "kt"),
        ]);
        data.observations[0].value = f64::NAN;
        data.observations[1].value = -1.0;
        data.observations[1].original_value = -0.001;

        let report = check(&data);
        assert_eq!(report.counts().get("missing_value"), Some(&1));
        assert_eq!(report.counts().get("negative_value"), Some(&1));
    }

    #[test]
    fn test_duplicates_are_counted() {
        let mut data = dataset(vec![abares_cell("prod_cheese", StateCode::Aus, 2016, 350.0, "kt")]);
        data.observations.push(data.observations[0].clone());
        let report = check(&data);
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, Violation::DuplicateKey { count: 2, .. })));
    }

    #[test]
    fn test_interior_gap() {
        let report = check(&dataset(vec![
            abares_cell("prod_cheese", StateCode::Aus, 2010, 350.0, "kt"),
            abares_cell("prod_cheese", StateCode::Aus, 2011, 351.0, "kt"),
            abares_cell("prod_cheese", StateCode::Aus, 2014, 352.0, "kt"),
        ]));
        match report.violations.as_slice() {
            [Violation::Gap { missing, .. }] => assert_eq!(missing, &vec![2012, 2013]),
            other => panic!("unexpected violations: {other:?}"),
        }
    }

    #[test]
    fn test_declared_coverage() {
        let records: Vec<RawRecord> = (1861..=2022)
            .map(|year| abs_cell("herd_total_cattle", StateCode::Aus, year, 1000.0, "head"))
            .collect();
        let report = check(&dataset(records));
        match report.violations.as_slice() {
            [Violation::CoverageMismatch { expected, found, .. }] => {
                assert_eq!(*expected, (1860, 2022));
                assert_eq!(*found, (1861, 2022));
            }
            other => panic!("unexpected violations: {other:?}"),
        }
    }

    #[test]
    fn test_truncated_dairy_cattle_series() {
        let records: Vec<RawRecord> = (1964..=2010)
            .map(|year| abs_cell("herd_dairy_cattle", StateCode::Aus, year, 2_500_000.0, "head"))
            .collect();
        let report = check(&dataset(records));
        match report.violations.as_slice() {
            [Violation::CoverageMismatch { variable_id, expected, found, .. }] => {
                assert_eq!(variable_id, "herd_dairy_cattle");
                assert_eq!(*expected, (1964, 2022));
                assert_eq!(*found, (1964, 2010));
            }
            other => panic!("unexpected violations: {other:?}"),
        }
    }

    #[test]
    fn test_full_dairy_cattle_series_is_clean() {
        let records: Vec<RawRecord> = (1964..=2022)
            .map(|year| abs_cell("herd_dairy_cattle", StateCode::Aus, year, 2_500_000.0, "head"))
            .collect();
        assert!(check(&dataset(records)).is_clean());
    }

    #[test]
    fn test_reference_checks() {
        let mut data = dataset(vec![abares_cell("prod_butter", StateCode::Aus, 2016, 100.0, "kt")]);
        let mut state_row = data.observations[0].clone();
        state_row.state_code = StateCode::Vic;
        let mut unknown = data.observations[0].clone();
        unknown.variable_id = "prod_yoghurt".to_string();
        data.observations[0].unit = Unit::Kilograms;
        data.observations.push(state_row);
        data.observations.push(unknown);

        let counts = check(&data).counts();
        assert_eq!(counts.get("unit_mismatch"), Some(&1));
        assert_eq!(counts.get("granularity_mismatch"), Some(&1));
        assert_eq!(counts.get("unknown_variable"), Some(&1));
    }

    #[test]
    fn test_conversion_round_trip() {
        let mut data = dataset(vec![abares_cell("herd_dairy_cows", StateCode::Aus, 2016, 1500.0, "'000")]);
        assert!(check(&data).is_clean());
        data.observations[0].value = 1_500_100.0;
        let report = check(&data);
        assert!(matches!(
            report.violations.as_slice(),
            [Violation::ConversionMismatch { expected, .. }] if *expected == 1_500_000.0
        ));
    }

    #[test]
    fn test_all_checks_run() {
        let mut records = milk_2017();
        if let RawRecord::Abares(cell) = &mut records[6] {
            cell.value = 1.0;
        }
        let mut data = dataset(records);
        data.observations[0].value = -5.0;
        data.observations[0].original_value = -5.0;
        let report = check(&data);
        let counts = report.counts();
        assert!(counts.contains_key("negative_value"));
        assert!(counts.contains_key("reconciliation"));

        match report.into_result().unwrap_err() {
            HarmonizeError::ValidationFailure(report) => assert_eq!(report.violations.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_report_serializes_with_check_tag() {
        let report = ValidationReport {
            observations_checked: 1,
            violations: vec![Violation::Gap {
                variable_id: "prod_cheese".to_string(),
                state_code: StateCode::Aus,
                year_type: YearType::FinancialYear,
                missing: vec![2012],
            }],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["violations"][0]["check"], "gap");
        assert_eq!(json["violations"][0]["state_code"], "AUS");
        assert_eq!(json["violations"][0]["year_type"], "FY");
    }
}
