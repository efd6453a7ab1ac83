//! Normalizes raw parser output into the long-format dataset.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{HarmonizeError, Result};
use crate::observation::{
    Confidence, Dataset, ExtractionMethod, Observation, ObservationKey, Provenance, RawRecord,
    SourceCell, SourceFlag, UnitConversionRecord,
};
use crate::registry::{Registry, StateCode};
use crate::units;

/// A span of years a source collected by estimate rather than census.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatedSpan {
    pub variable_id: String,
    /// `None` applies to every state.
    #[serde(default)]
    pub state_code: Option<StateCode>,
    pub first_year: i32,
    pub last_year: i32,
    pub confidence: Confidence,
}

impl EstimatedSpan {
    fn covers(&self, cell: &SourceCell) -> bool {
        self.variable_id == cell.variable_id
            && self.state_code.map_or(true, |s| s == cell.state_code)
            && (self.first_year..=self.last_year).contains(&cell.year)
    }
}

/// How a transcribed value's confidence is decided. A flag on the cell wins,
/// then a declared estimated span; everything else is `high`. The pipeline
/// never produces `interpolated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidencePolicy {
    pub preliminary: Confidence,
    pub estimate: Confidence,
    #[serde(default)]
    pub estimated_spans: Vec<EstimatedSpan>,
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self {
            preliminary: Confidence::Medium,
            estimate: Confidence::Low,
            estimated_spans: Vec::new(),
        }
    }
}

impl ConfidencePolicy {
    pub fn assign(&self, cell: &SourceCell) -> Confidence {
        match cell.flag {
            Some(SourceFlag::Preliminary) => self.preliminary,
            Some(SourceFlag::Estimate) => self.estimate,
            None => self
                .estimated_spans
                .iter()
                .find(|span| span.covers(cell))
                .map_or(Confidence::High, |span| span.confidence),
        }
    }
}

pub struct Merger<'a> {
    registry: &'a Registry,
    policy: &'a ConfidencePolicy,
    extraction_date: Option<NaiveDate>,
}

struct Merged {
    observation: Observation,
    provenance: Provenance,
    conversion: Option<UnitConversionRecord>,
}

impl<'a> Merger<'a> {
    pub fn new(registry: &'a Registry, policy: &'a ConfidencePolicy) -> Self {
        Self {
            registry,
            policy,
            extraction_date: None,
        }
    }

    pub fn with_extraction_date(mut self, date: NaiveDate) -> Self {
        self.extraction_date = Some(date);
        self
    }

    /// Converts every record to its variable's canonical unit and returns the
    /// dataset in publication order. Two records for the same key are a
    /// mapping error, whichever sources they came from.
    pub fn merge<I>(&self, records: I) -> Result<Dataset>
    where
        I: IntoIterator<Item = Result<RawRecord>>,
    {
        let mut seen: HashMap<ObservationKey, String> = HashMap::new();
        let mut merged = Vec::new();

        for record in records {
            let record = record?;
            let key = record.key();
            let origin = describe(record.cell());
            if let Some(first) = seen.get(&key) {
                return Err(HarmonizeError::DuplicateKeyConflict {
                    key,
                    first: first.clone(),
                    second: origin,
                });
            }
            merged.push(self.normalize(&record, key.clone())?);
            seen.insert(key, origin);
        }

        merged.sort_by(|a, b| a.observation.sort_key().cmp(&b.observation.sort_key()));

        let mut dataset = Dataset::default();
        for row in merged {
            dataset.observations.push(row.observation);
            dataset.provenance.push(row.provenance);
            dataset.conversions.extend(row.conversion);
        }

        info!(
            observations = dataset.observations.len(),
            conversions = dataset.conversions.len(),
            "merged records"
        );
        Ok(dataset)
    }

    fn normalize(&self, record: &RawRecord, key: ObservationKey) -> Result<Merged> {
        let cell = record.cell();
        let definition = self.registry.variable(&cell.variable_id)?;
        let conversion = units::convert(cell.value, &cell.unit, definition.unit).map_err(|e| match e {
            HarmonizeError::UnsupportedUnit { unit, context } => HarmonizeError::UnsupportedUnit {
                unit,
                context: format!("{context}; {} at {}", cell.variable_id, cell.location),
            },
            other => other,
        })?;

        let year_type = record.year_type();
        let mut notes = format!("{} {}", cell.table, year_type.period_label(cell.year));
        match cell.flag {
            Some(SourceFlag::Preliminary) => notes.push_str("; preliminary"),
            Some(SourceFlag::Estimate) => notes.push_str("; estimate"),
            None => {}
        }

        let observation = Observation {
            year: cell.year,
            year_type,
            state_code: cell.state_code,
            category: definition.category,
            variable_id: cell.variable_id.clone(),
            value: conversion.value,
            unit: definition.unit,
            confidence: self.policy.assign(cell),
            original_value: cell.value,
            original_unit: cell.unit.clone(),
            notes,
        };

        let provenance = Provenance {
            key: key.clone(),
            source_name: cell.source.name.clone(),
            source_type: cell.source.source_type,
            source_url: cell.source.url.clone(),
            source_page: cell.location.clone(),
            extraction_method: ExtractionMethod::AutomatedParse,
            extraction_date: self.extraction_date,
            notes: cell.source.content_hash.clone(),
        };

        let conversion = conversion.is_rescaled().then(|| UnitConversionRecord {
            key,
            from_unit: cell.unit.clone(),
            to_unit: definition.unit,
            conversion_factor: conversion.factor,
            notes: format!("{} -> {}", cell.unit, definition.unit),
        });

        Ok(Merged {
            observation,
            provenance,
            conversion,
        })
    }
}

fn describe(cell: &SourceCell) -> String {
    format!("{} {}", cell.source.name, cell.location)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{abares_cell, abs_cell};
    use crate::observation::YearType;
    use crate::units::Unit;

    fn merge(records: Vec<RawRecord>) -> Result<Dataset> {
        let registry = Registry::builtin().unwrap();
        let policy = ConfidencePolicy::default();
        Merger::new(&registry, &policy).merge(records.into_iter().map(Ok))
    }

    // -------------------------------------------------------------------------
    // CONVERSION
    // -------------------------------------------------------------------------

    #[test]
    fn test_thousand_head_becomes_head() {
        let dataset = merge(vec![abares_cell("herd_dairy_cows", StateCode::Aus, 1973, 1000.0, "'000")]).unwrap();
        let obs = &dataset.observations[0];
        assert_eq!(obs.value, 1_000_000.0);
        assert_eq!(obs.unit, Unit::Head);
        assert_eq!(obs.original_value, 1000.0);
        assert_eq!(obs.original_unit, "'000");

        assert_eq!(dataset.conversions.len(), 1);
        assert_eq!(dataset.conversions[0].conversion_factor, 1000.0);
        assert_eq!(dataset.conversions[0].key, obs.key());
    }

    #[test]
    fn test_canonical_unit_has_no_conversion_record() {
        let dataset = merge(vec![abares_cell("prod_milk_total", StateCode::Vic, 2017, 5944.0, "ML")]).unwrap();
        let obs = &dataset.observations[0];
        assert_eq!(obs.value, obs.original_value);
        assert!(dataset.conversions.is_empty());
        assert_eq!(dataset.provenance.len(), 1);
    }

    #[test]
    fn test_dollars_per_tonne_to_cents_per_kg() {
        let dataset = merge(vec![abares_cell("price_export_butter", StateCode::Aus, 2016, 4501.0, "$/t")]).unwrap();
        assert_eq!(dataset.observations[0].value, 450.1);
        assert!((dataset.conversions[0].conversion_factor - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_unsupported_unit_stops_merge() {
        let err = merge(vec![abares_cell("prod_butter", StateCode::Aus, 2016, 1.0, "bushels")]).unwrap_err();
        match err {
            HarmonizeError::UnsupportedUnit { unit, context } => {
                assert_eq!(unit, "bushels");
                assert!(context.contains("prod_butter"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unit_of_wrong_dimension_is_unsupported() {
        let err = merge(vec![abares_cell("prod_butter", StateCode::Aus, 2016, 1.0, "ML")]).unwrap_err();
        assert!(matches!(err, HarmonizeError::UnsupportedUnit { .. }));
    }

    #[test]
    fn test_unknown_variable_is_rejected() {
        let err = merge(vec![abares_cell("prod_ice_cream", StateCode::Aus, 2016, 1.0, "kt")]).unwrap_err();
        assert!(matches!(err, HarmonizeError::UnknownVariable(id) if id == "prod_ice_cream"));
    }

    // -------------------------------------------------------------------------
    // COLLISIONS
    // -------------------------------------------------------------------------

    #[test]
    fn test_duplicate_key_conflict() {
        let first = abares_cell("prod_milk_total", StateCode::Vic, 2017, 5944.0, "ML");
        let second = abares_cell("prod_milk_total", StateCode::Vic, 2017, 5950.0, "ML");
        match merge(vec![first, second]).unwrap_err() {
            HarmonizeError::DuplicateKeyConflict { key, .. } => {
                assert_eq!(key.variable_id, "prod_milk_total");
                assert_eq!(key.state_code, StateCode::Vic);
                assert_eq!(key.year, 2017);
                assert_eq!(key.year_type, YearType::FinancialYear);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_same_year_different_basis_is_not_a_conflict() {
        let dataset = merge(vec![
            abares_cell("herd_dairy_cows", StateCode::Aus, 2000, 2171.0, "'000"),
            abs_cell("herd_dairy_cows", StateCode::Aus, 2000, 2_171_000.0, "head"),
        ])
        .unwrap();
        assert_eq!(dataset.observations.len(), 2);
        assert_eq!(dataset.observations[0].year_type, YearType::CalendarYear);
    }

    // -------------------------------------------------------------------------
    // CONFIDENCE, NOTES AND ORDER
    // -------------------------------------------------------------------------

    #[test]
    fn test_confidence_policy() {
        let mut preliminary = abares_cell("prod_milk_total", StateCode::Aus, 2017, 9289.0, "ML");
        let mut estimate = abares_cell("prod_milk_total", StateCode::Aus, 2016, 9000.0, "ML");
        let plain = abares_cell("prod_milk_total", StateCode::Aus, 2015, 9500.0, "ML");
        if let RawRecord::Abares(cell) = &mut preliminary {
            cell.flag = Some(SourceFlag::Preliminary);
        }
        if let RawRecord::Abares(cell) = &mut estimate {
            cell.flag = Some(SourceFlag::Estimate);
        }

        let dataset = merge(vec![preliminary, estimate, plain]).unwrap();
        let confidence: Vec<Confidence> = dataset.observations.iter().map(|o| o.confidence).collect();
        assert_eq!(confidence, vec![Confidence::High, Confidence::Low, Confidence::Medium]);
        assert_eq!(dataset.observations[2].notes, "Table 6.5 2017-18; preliminary");
    }

    #[test]
    fn test_estimated_span_confidence() {
        let policy = ConfidencePolicy {
            estimated_spans: vec![EstimatedSpan {
                variable_id: "herd_total_cattle".to_string(),
                state_code: None,
                first_year: 1860,
                last_year: 1900,
                confidence: Confidence::Low,
            }],
            ..ConfidencePolicy::default()
        };
        assert_eq!(
            policy.assign(abs_cell("herd_total_cattle", StateCode::Nsw, 1870, 1.0, "head").cell()),
            Confidence::Low
        );
        assert_eq!(
            policy.assign(abs_cell("herd_total_cattle", StateCode::Nsw, 1901, 1.0, "head").cell()),
            Confidence::High
        );
    }

    #[test]
    fn test_output_order_is_year_then_state() {
        let dataset = merge(vec![
            abares_cell("prod_milk_total", StateCode::Vic, 2017, 5944.0, "ML"),
            abares_cell("prod_milk_total", StateCode::Aus, 2017, 9289.0, "ML"),
            abares_cell("prod_milk_total", StateCode::Nsw, 1999, 1200.0, "ML"),
            abares_cell("herd_dairy_cows", StateCode::Aus, 2017, 1500.0, "'000"),
        ])
        .unwrap();
        let order: Vec<(i32, &str, &str)> = dataset
            .observations
            .iter()
            .map(|o| (o.year, o.state_code.as_str(), o.variable_id.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (1999, "NSW", "prod_milk_total"),
                (2017, "AUS", "herd_dairy_cows"),
                (2017, "AUS", "prod_milk_total"),
                (2017, "VIC", "prod_milk_total"),
            ]
        );
        let keys: Vec<ObservationKey> = dataset.provenance.iter().map(|p| p.key.clone()).collect();
        let expected: Vec<ObservationKey> = dataset.observations.iter().map(Observation::key).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_provenance_fields() {
        let registry = Registry::builtin().unwrap();
        let policy = ConfidencePolicy::default();
        let date = NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
        let dataset = Merger::new(&registry, &policy)
            .with_extraction_date(date)
            .merge(vec![Ok(abares_cell("prod_cheese", StateCode::Aus, 2016, 350.0, "kt"))])
            .unwrap();

        let provenance = &dataset.provenance[0];
        assert_eq!(provenance.extraction_method, ExtractionMethod::AutomatedParse);
        assert_eq!(provenance.extraction_date, Some(date));
        assert!(provenance.source_page.starts_with("xlsx:sheet="));
        assert_eq!(provenance.source_name, "ABARES Agricultural Commodity Statistics");
    }
}
