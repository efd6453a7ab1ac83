//! A wide table located inside a sheet: which lines hold periods, which hold
//! series, and how to walk their intersection.

use std::sync::Arc;

use crate::error::Result;
use crate::observation::{RawRecord, SourceCell, SourceDescriptor};
use crate::registry::StateCode;
use crate::units::Unit;
use crate::workbook::Sheet;

/// Direction the periods run in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// One row per period, one column per series.
    PeriodsDown,
    /// One column per period, one row per series.
    PeriodsAcross,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    /// Row (periods down) or column (periods across) of the period.
    pub index: usize,
    pub year: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    /// Column (periods down) or row (periods across) of the series.
    pub index: usize,
    pub variable_id: String,
    pub state_code: StateCode,
    /// Unit as published.
    pub unit: String,
}

/// Source layout a table was read from; decides the record tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Abares,
    Abs,
}

pub struct LocatedTable {
    sheet: Sheet,
    orientation: Orientation,
    periods: Vec<Period>,
    series: Vec<Series>,
    layout: Layout,
    source: Arc<SourceDescriptor>,
}

impl LocatedTable {
    pub fn new(
        sheet: Sheet,
        orientation: Orientation,
        periods: Vec<Period>,
        series: Vec<Series>,
        layout: Layout,
        source: Arc<SourceDescriptor>,
    ) -> Self {
        Self {
            sheet,
            orientation,
            periods,
            series,
            layout,
            source,
        }
    }

    pub fn sheet_name(&self) -> &str {
        self.sheet.name()
    }

    pub fn periods(&self) -> &[Period] {
        &self.periods
    }

    pub fn series(&self) -> &[Series] {
        &self.series
    }

    /// Every non-blank cell, series by series in period order. Cells are read
    /// as the iterator advances.
    pub fn into_records(self) -> impl Iterator<Item = Result<RawRecord>> {
        let LocatedTable {
            sheet,
            orientation,
            periods,
            series,
            layout,
            source,
        } = self;
        let per_series = periods.len();

        (0..series.len() * per_series).filter_map(move |i| {
            let line = &series[i / per_series];
            let period = periods[i % per_series];
            let (row, col) = cell_position(orientation, line.index, period.index);

            let native = line.unit.parse::<Unit>().ok();
            let value = match sheet.number(row, col, native) {
                Ok(Some(value)) => value,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            };

            let cell = SourceCell {
                variable_id: line.variable_id.clone(),
                state_code: line.state_code,
                year: period.year,
                value: value.value,
                unit: line.unit.clone(),
                flag: value.flag,
                source: Arc::clone(&source),
                table: sheet.name().to_string(),
                location: sheet.location(row, col),
            };
            Some(Ok(match layout {
                Layout::Abares => RawRecord::Abares(cell),
                Layout::Abs => RawRecord::Abs(cell),
            }))
        })
    }
}

fn cell_position(orientation: Orientation, series: usize, period: usize) -> (usize, usize) {
    match orientation {
        Orientation::PeriodsDown => (period, series),
        Orientation::PeriodsAcross => (series, period),
    }
}

/// Whether a candidate series line holds anything in its period cells.
/// Lines without values are headings, footnotes or spacer rows.
pub fn line_has_values(sheet: &Sheet, orientation: Orientation, index: usize, periods: &[Period]) -> bool {
    periods.iter().any(|period| {
        let (row, col) = cell_position(orientation, index, period.index);
        !matches!(sheet.number(row, col, None), Ok(None))
    })
}
