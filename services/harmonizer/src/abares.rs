//! Parser for the ABARES Agricultural Commodity Statistics dairy workbook.
//!
//! Tables are found by their header labels rather than fixed coordinates:
//! every edition appends a financial year, and the 2017 and 2018 editions
//! differ in sheet naming and leading blank rows. Every non-empty series
//! label must be declared below, either mapped onto a registry variable or
//! explicitly ignored.

use std::sync::Arc;

use tracing::debug;

use crate::error::{HarmonizeError, Result};
use crate::observation::{RawRecord, SourceDescriptor};
use crate::registry::{Registry, StateCode};
use crate::table::{line_has_values, Layout, LocatedTable, Orientation, Period, Series};
use crate::workbook::{Sheet, SheetSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Variable {
        variable_id: &'static str,
        unit: &'static str,
    },
    /// Published in the table, but taken from another table or not harmonized.
    Ignore,
}

/// A declared series label. `labels` are compared against normalized cell
/// text (see `normalize_label`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesSpec {
    pub labels: &'static [&'static str],
    /// Section heading (normalized substring) the row must sit under.
    pub section: Option<&'static str>,
    pub target: Target,
}

impl SeriesSpec {
    pub const fn variable(labels: &'static [&'static str], variable_id: &'static str, unit: &'static str) -> Self {
        Self {
            labels,
            section: None,
            target: Target::Variable { variable_id, unit },
        }
    }

    pub const fn ignore(labels: &'static [&'static str]) -> Self {
        Self {
            labels,
            section: None,
            target: Target::Ignore,
        }
    }

    pub const fn in_section(mut self, section: &'static str) -> Self {
        self.section = Some(section);
        self
    }

    fn matches(&self, label: &str, section: Option<&str>) -> bool {
        let in_section = match self.section {
            None => true,
            Some(wanted) => section.is_some_and(|s| s.contains(wanted)),
        };
        in_section && self.labels.contains(&label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableLayout {
    /// Years down, one column per state; a single variable.
    ByState {
        variable_id: &'static str,
        unit: &'static str,
    },
    /// Years down, one column per national series.
    SeriesDown(&'static [SeriesSpec]),
    /// Years across, one row per national series, optionally grouped under
    /// section headings.
    SeriesAcross(&'static [SeriesSpec]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub sheet: &'static str,
    pub layout: TableLayout,
}

// =============================================================================
// Table catalogue
// =============================================================================

const TABLE_6_1: &[SeriesSpec] = &[
    SeriesSpec::ignore(&["dairy cow numbers", "dairy cows"]),
    SeriesSpec::variable(&["yield per cow", "milk yield per cow"], "herd_yield_per_cow", "L"),
    SeriesSpec::ignore(&["milk production", "whole milk production"]),
    SeriesSpec::variable(&["butter production", "butter"], "prod_butter", "kt"),
    SeriesSpec::variable(&["cheese production", "cheese"], "prod_cheese", "kt"),
    SeriesSpec::ignore(&["export price butter", "butter export unit value"]),
    SeriesSpec::ignore(&["export price cheese", "cheese export unit value"]),
    SeriesSpec::ignore(&["gross value of production"]),
];

const TABLE_6_6: &[SeriesSpec] = &[
    SeriesSpec::ignore(&["butter", "butter and butteroil"]),
    SeriesSpec::ignore(&["cheese"]),
    SeriesSpec::ignore(&["skim milk powder", "smp"]),
    SeriesSpec::variable(&["whole milk powder", "wmp"], "prod_milk_powder", "kt"),
    SeriesSpec::ignore(&["buttermilk powder"]),
    SeriesSpec::ignore(&["casein"]),
];

const TABLE_6_7: &[SeriesSpec] = &[
    SeriesSpec::ignore(&["butter"]).in_section("total"),
    SeriesSpec::ignore(&["cheese"]).in_section("total"),
    SeriesSpec::variable(&["market milk", "drinking milk"], "cons_milk_total", "ML").in_section("total"),
    SeriesSpec::variable(&["butter"], "cons_butter_percap", "kg").in_section("per person"),
    SeriesSpec::variable(&["cheese"], "cons_cheese_percap", "kg").in_section("per person"),
    SeriesSpec::variable(&["market milk", "drinking milk"], "cons_milk_percap", "L").in_section("per person"),
];

const TABLE_6_8: &[SeriesSpec] = &[
    SeriesSpec::variable(&["manufacturing milk price", "manufacturing milk"], "price_farmgate_manufacturing", "c/L"),
    SeriesSpec::variable(&["market milk price", "market milk"], "price_farmgate_market", "c/L"),
    SeriesSpec::variable(&["weighted average price", "weighted average"], "price_farmgate_avg", "c/L"),
    SeriesSpec::ignore(&["manufacturing milk value", "market milk value", "total value", "gross value"]),
];

const TABLE_6_9: &[SeriesSpec] = &[
    SeriesSpec::variable(&["butter"], "price_export_butter", "$/t"),
    SeriesSpec::variable(&["cheese"], "price_export_cheese", "$/t"),
    SeriesSpec::ignore(&["skim milk powder", "smp"]),
    SeriesSpec::ignore(&["whole milk powder", "wmp"]),
    SeriesSpec::ignore(&["casein"]),
];

/// The dairy tables read from the workbook, in emission order.
pub const TABLES: &[TableSpec] = &[
    TableSpec { sheet: "Table 6.1", layout: TableLayout::SeriesDown(TABLE_6_1) },
    TableSpec {
        sheet: "Table 6.4",
        layout: TableLayout::ByState { variable_id: "herd_dairy_cows", unit: "'000" },
    },
    TableSpec {
        sheet: "Table 6.5",
        layout: TableLayout::ByState { variable_id: "prod_milk_total", unit: "ML" },
    },
    TableSpec { sheet: "Table 6.6", layout: TableLayout::SeriesAcross(TABLE_6_6) },
    TableSpec { sheet: "Table 6.7", layout: TableLayout::SeriesAcross(TABLE_6_7) },
    TableSpec { sheet: "Table 6.8", layout: TableLayout::SeriesDown(TABLE_6_8) },
    TableSpec { sheet: "Table 6.9", layout: TableLayout::SeriesDown(TABLE_6_9) },
];

// =============================================================================
// Parser
// =============================================================================

pub struct AbaresParser<'r> {
    registry: &'r Registry,
    source: Arc<SourceDescriptor>,
    tables: &'static [TableSpec],
}

impl<'r> AbaresParser<'r> {
    pub fn new(registry: &'r Registry, source: SourceDescriptor) -> Self {
        Self {
            registry,
            source: Arc::new(source),
            tables: TABLES,
        }
    }

    pub fn with_tables(mut self, tables: &'static [TableSpec]) -> Self {
        self.tables = tables;
        self
    }

    /// Locates every catalogued table. Structural problems (missing sheet or
    /// anchor, unmapped label) surface here, before any cell is emitted.
    pub fn locate<S: SheetSource>(&self, book: &mut S) -> Result<Vec<LocatedTable>> {
        self.tables
            .iter()
            .map(|spec| {
                let sheet = book.sheet(spec.sheet)?;
                let table = match spec.layout {
                    TableLayout::ByState { variable_id, unit } => {
                        self.locate_by_state(sheet, variable_id, unit)?
                    }
                    TableLayout::SeriesDown(specs) => self.locate_series_down(sheet, specs)?,
                    TableLayout::SeriesAcross(specs) => self.locate_series_across(sheet, specs)?,
                };
                debug!(
                    sheet = table.sheet_name(),
                    periods = table.periods().len(),
                    series = table.series().len(),
                    "located ABARES table"
                );
                Ok(table)
            })
            .collect()
    }

    /// Raw financial-year records from every catalogued table.
    pub fn records<S: SheetSource>(&self, book: &mut S) -> Result<impl Iterator<Item = Result<RawRecord>>> {
        let tables = self.locate(book)?;
        Ok(tables.into_iter().flat_map(LocatedTable::into_records))
    }

    fn table(&self, sheet: Sheet, orientation: Orientation, periods: Vec<Period>, series: Vec<Series>) -> LocatedTable {
        LocatedTable::new(sheet, orientation, periods, series, Layout::Abares, Arc::clone(&self.source))
    }

    fn locate_by_state(&self, sheet: Sheet, variable_id: &str, unit: &str) -> Result<LocatedTable> {
        let header = (0..sheet.height())
            .find(|&row| {
                (0..sheet.width())
                    .filter(|&col| {
                        sheet
                            .text(row, col)
                            .is_some_and(|t| self.registry.state_for_label(&t).is_some())
                    })
                    .count()
                    >= 2
            })
            .ok_or_else(|| missing_anchor(&sheet, "state column headers"))?;
        let (year_col, periods) = fy_periods_down(&sheet, header)?;

        let mut series = Vec::new();
        for col in (year_col + 1)..sheet.width() {
            let Some(label) = sheet.text(header, col) else {
                continue;
            };
            if !line_has_values(&sheet, Orientation::PeriodsDown, col, &periods) {
                continue;
            }
            let state_code = self.registry.resolve_state(&label, &sheet.location(header, col))?;
            series.push(Series {
                index: col,
                variable_id: variable_id.to_string(),
                state_code,
                unit: unit.to_string(),
            });
        }

        Ok(self.table(sheet, Orientation::PeriodsDown, periods, series))
    }

    fn locate_series_down(&self, sheet: Sheet, specs: &[SeriesSpec]) -> Result<LocatedTable> {
        let header = (0..sheet.height())
            .find(|&row| {
                (0..sheet.width()).any(|col| {
                    sheet
                        .label(row, col)
                        .is_some_and(|label| specs.iter().any(|s| s.matches(&label, None)))
                })
            })
            .ok_or_else(|| missing_anchor(&sheet, "series header row"))?;
        let (year_col, periods) = fy_periods_down(&sheet, header)?;

        let mut series = Vec::new();
        for col in (year_col + 1)..sheet.width() {
            let Some(label) = sheet.label(header, col) else {
                continue;
            };
            if !line_has_values(&sheet, Orientation::PeriodsDown, col, &periods) {
                continue;
            }
            if let Some(line) = declared(&sheet, specs, &label, None, header, col)? {
                series.push(Series { index: col, ..line });
            }
        }

        Ok(self.table(sheet, Orientation::PeriodsDown, periods, series))
    }

    fn locate_series_across(&self, sheet: Sheet, specs: &[SeriesSpec]) -> Result<LocatedTable> {
        let header = (0..sheet.height())
            .find(|&row| (0..sheet.width()).filter(|&col| sheet.fy_year(row, col).is_some()).count() >= 2)
            .ok_or_else(|| missing_anchor(&sheet, "financial-year header row"))?;

        let periods: Vec<Period> = (0..sheet.width())
            .filter_map(|col| sheet.fy_year(header, col).map(|year| Period { index: col, year }))
            .collect();
        let first_period = periods.first().map_or(0, |p| p.index);

        let mut series = Vec::new();
        let mut section: Option<String> = None;
        for row in (header + 1)..sheet.height() {
            let label = (0..first_period).find_map(|col| sheet.label(row, col).map(|label| (col, label)));
            let has_values = line_has_values(&sheet, Orientation::PeriodsAcross, row, &periods);

            match (label, has_values) {
                (Some((_, heading)), false) => section = Some(heading),
                (None, false) => {}
                (None, true) => {
                    return Err(HarmonizeError::UnmappedLabel {
                        label: String::new(),
                        location: sheet.location(row, 0),
                    })
                }
                (Some((col, label)), true) => {
                    if let Some(line) = declared(&sheet, specs, &label, section.as_deref(), row, col)? {
                        series.push(Series { index: row, ..line });
                    }
                }
            }
        }

        Ok(self.table(sheet, Orientation::PeriodsAcross, periods, series))
    }
}

/// Looks a label up in the declared series. `None` for ignored series.
fn declared(
    sheet: &Sheet,
    specs: &[SeriesSpec],
    label: &str,
    section: Option<&str>,
    row: usize,
    col: usize,
) -> Result<Option<Series>> {
    let spec = specs
        .iter()
        .find(|s| s.matches(label, section))
        .ok_or_else(|| HarmonizeError::UnmappedLabel {
            label: sheet.text(row, col).unwrap_or_default(),
            location: sheet.location(row, col),
        })?;

    Ok(match spec.target {
        Target::Ignore => None,
        Target::Variable { variable_id, unit } => Some(Series {
            index: 0,
            variable_id: variable_id.to_string(),
            state_code: StateCode::Aus,
            unit: unit.to_string(),
        }),
    })
}

/// Year column and period rows of a years-down table: the leftmost column
/// holding a financial-year label below the header.
fn fy_periods_down(sheet: &Sheet, header: usize) -> Result<(usize, Vec<Period>)> {
    let year_col = ((header + 1)..sheet.height())
        .find_map(|row| (0..sheet.width()).find(|&col| sheet.fy_year(row, col).is_some()))
        .ok_or_else(|| missing_anchor(sheet, "financial-year column"))?;

    let periods = ((header + 1)..sheet.height())
        .filter_map(|row| sheet.fy_year(row, year_col).map(|year| Period { index: row, year }))
        .collect();
    Ok((year_col, periods))
}

fn missing_anchor(sheet: &Sheet, anchor: &str) -> HarmonizeError {
    HarmonizeError::MissingAnchor {
        sheet: sheet.name().to_string(),
        anchor: anchor.to_string(),
    }
}
