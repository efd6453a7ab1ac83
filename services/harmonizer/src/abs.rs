//! Parser for the ABS "Historical Selected Agricultural Commodities, by
//! Australia, state and territories, 1860 to 2022" workbook.
//!
//! Each table is regions down and calendar years across, headed by a row
//! containing `Region label`.

use std::sync::Arc;

use tracing::debug;

use crate::error::{HarmonizeError, Result};
use crate::observation::{RawRecord, SourceDescriptor};
use crate::registry::{normalize_label, Registry};
use crate::table::{line_has_values, Layout, LocatedTable, Orientation, Period, Series};
use crate::workbook::{Sheet, SheetSource};

const REGION_ANCHOR: &str = "region label";
const UNIT_COLUMN: &str = "unit of measure";
/// Unit assumed when a table has no unit column or the cell is blank.
const DEFAULT_UNIT: &str = "head";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoricTable {
    pub sheet: &'static str,
    pub variable_id: &'static str,
}

pub const TABLES: &[HistoricTable] = &[
    HistoricTable { sheet: "Table 8", variable_id: "herd_dairy_cattle" },
    HistoricTable { sheet: "Table 6", variable_id: "herd_total_cattle" },
];

pub struct AbsParser<'r> {
    registry: &'r Registry,
    source: Arc<SourceDescriptor>,
    tables: &'static [HistoricTable],
}

impl<'r> AbsParser<'r> {
    pub fn new(registry: &'r Registry, source: SourceDescriptor) -> Self {
        Self {
            registry,
            source: Arc::new(source),
            tables: TABLES,
        }
    }

    pub fn with_tables(mut self, tables: &'static [HistoricTable]) -> Self {
        self.tables = tables;
        self
    }

    pub fn locate<S: SheetSource>(&self, book: &mut S) -> Result<Vec<LocatedTable>> {
        self.tables
            .iter()
            .map(|spec| {
                let table = self.locate_table(book.sheet(spec.sheet)?, spec.variable_id)?;
                debug!(
                    sheet = table.sheet_name(),
                    periods = table.periods().len(),
                    regions = table.series().len(),
                    "located ABS table"
                );
                Ok(table)
            })
            .collect()
    }

    /// Raw calendar-year records from every table.
    pub fn records<S: SheetSource>(&self, book: &mut S) -> Result<impl Iterator<Item = Result<RawRecord>>> {
        let tables = self.locate(book)?;
        Ok(tables.into_iter().flat_map(LocatedTable::into_records))
    }

    fn locate_table(&self, sheet: Sheet, variable_id: &str) -> Result<LocatedTable> {
        let (header, region_col) = (0..sheet.height())
            .find_map(|row| {
                (0..sheet.width())
                    .find(|&col| sheet.label(row, col).as_deref() == Some(REGION_ANCHOR))
                    .map(|col| (row, col))
            })
            .ok_or_else(|| HarmonizeError::MissingAnchor {
                sheet: sheet.name().to_string(),
                anchor: format!("'{REGION_ANCHOR}'"),
            })?;
        let unit_col =
            (0..sheet.width()).find(|&col| sheet.label(header, col).as_deref() == Some(UNIT_COLUMN));

        let periods: Vec<Period> = (0..sheet.width())
            .filter(|&col| col != region_col && Some(col) != unit_col)
            .filter_map(|col| sheet.calendar_year(header, col).map(|year| Period { index: col, year }))
            .collect();

        let mut series = Vec::new();
        for row in (header + 1)..sheet.height() {
            let has_values = line_has_values(&sheet, Orientation::PeriodsAcross, row, &periods);
            let region = sheet.text(row, region_col).filter(|t| !normalize_label(t).is_empty());
            let region = match (region, has_values) {
                (_, false) => continue,
                (Some(region), true) => region,
                (None, true) => {
                    return Err(HarmonizeError::UnmappedLabel {
                        label: String::new(),
                        location: sheet.location(row, region_col),
                    })
                }
            };

            let state_code = self.registry.resolve_state(&region, &sheet.location(row, region_col))?;
            let unit = unit_col
                .and_then(|col| sheet.text(row, col))
                .unwrap_or_else(|| DEFAULT_UNIT.to_string());
            series.push(Series {
                index: row,
                variable_id: variable_id.to_string(),
                state_code,
                unit,
            });
        }

        Ok(LocatedTable::new(
            sheet,
            Orientation::PeriodsAcross,
            periods,
            series,
            Layout::Abs,
            Arc::clone(&self.source),
        ))
    }
}
