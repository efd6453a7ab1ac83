//! Synthetic workbooks laid out like the ABARES and ABS publications, and
//! raw-record builders for merge and validation tests.
//!
//! State series reconcile exactly to their national totals and every series
//! is contiguous, so the full fixture pipeline validates clean.

use std::sync::Arc;

use calamine::Data;

use crate::observation::{fy_label, RawRecord, SourceCell, SourceDescriptor};
use crate::registry::StateCode;
use crate::workbook::{column_name, InMemoryWorkbook};

pub const ABARES_FIRST_YEAR: i32 = 1973;
pub const ABARES_ACROSS_FIRST_YEAR: i32 = 1990;
pub const ABARES_LAST_YEAR: i32 = 2017;
pub const ABS_DAIRY_FIRST_YEAR: i32 = 1964;
pub const ABS_FIRST_YEAR: i32 = 1860;
pub const ABS_LAST_YEAR: i32 = 2022;

const STATES: [StateCode; 6] = [
    StateCode::Nsw,
    StateCode::Vic,
    StateCode::Qld,
    StateCode::Sa,
    StateCode::Wa,
    StateCode::Tas,
];

/// Whole milk production (ML) in 2017-18, NSW..TAS. Sums to 9,289.
pub const MILK_2017: [f64; 6] = [1117.0, 5944.0, 397.0, 506.0, 378.0, 947.0];

fn s(text: &str) -> Data {
    Data::String(text.to_string())
}

fn f(value: f64) -> Data {
    Data::Float(value)
}

/// `1973–74`, with the en dash the workbooks use.
fn fy(year: i32) -> Data {
    s(&fy_label(year).replace('-', "\u{2013}"))
}

// =============================================================================
// Raw records
// =============================================================================

fn cell(
    source: SourceDescriptor,
    table: &str,
    variable_id: &str,
    state_code: StateCode,
    year: i32,
    value: f64,
    unit: &str,
) -> SourceCell {
    let col = StateCode::ALL.iter().position(|s| *s == state_code).unwrap_or(0) as u32 + 1;
    SourceCell {
        variable_id: variable_id.to_string(),
        state_code,
        year,
        value,
        unit: unit.to_string(),
        flag: None,
        source: Arc::new(source),
        table: table.to_string(),
        location: format!("xlsx:sheet='{table}':cell={}{}", column_name(col), year - 1800),
    }
}

/// A financial-year record as read from `Table 6.5`.
pub fn abares_cell(
    variable_id: &str,
    state_code: StateCode,
    year: i32,
    value: f64,
    unit: &str,
) -> RawRecord {
    let source = SourceDescriptor::abares();
    RawRecord::Abares(cell(source, "Table 6.5", variable_id, state_code, year, value, unit))
}

/// A calendar-year record as read from `Table 6`.
pub fn abs_cell(
    variable_id: &str,
    state_code: StateCode,
    year: i32,
    value: f64,
    unit: &str,
) -> RawRecord {
    let source = SourceDescriptor::abs_historic();
    RawRecord::Abs(cell(source, "Table 6", variable_id, state_code, year, value, unit))
}

/// 2017-18 milk production for the six states, then the national total.
pub fn milk_2017() -> Vec<RawRecord> {
    let mut records: Vec<RawRecord> = STATES
        .iter()
        .zip(MILK_2017)
        .map(|(state, value)| abares_cell("prod_milk_total", *state, 2017, value, "ML"))
        .collect();
    let total = MILK_2017.iter().sum();
    records.push(abares_cell("prod_milk_total", StateCode::Aus, 2017, total, "ML"));
    records
}

// =============================================================================
// ABARES workbook
// =============================================================================

/// Years-down table, one column per state plus `Aust.`; the 2017-18 Victorian
/// figure is preliminary.
fn state_sheet(
    title: &str,
    latest: [f64; 6],
    step: [f64; 6],
    preliminary_vic: bool,
) -> Vec<Vec<Data>> {
    let mut header = vec![Data::Empty, s("Year")];
    header.extend(["NSW", "Vic.", "Qld", "SA", "WA", "Tas.", "Aust."].map(s));
    let mut rows = vec![vec![s(title)], vec![], header];
    for year in ABARES_FIRST_YEAR..=ABARES_LAST_YEAR {
        let back = f64::from(ABARES_LAST_YEAR - year);
        let values: Vec<f64> = latest.iter().zip(step).map(|(v, d)| v - back * d).collect();
        let mut row = vec![Data::Empty, fy(year)];
        for (i, value) in values.iter().enumerate() {
            if preliminary_vic && i == 1 && year == ABARES_LAST_YEAR {
                row.push(s(&format!("{value}p")));
            } else {
                row.push(f(*value));
            }
        }
        row.push(f(values.iter().sum()));
        rows.push(row);
    }
    rows.push(vec![s("Source: ABARES; state dairy authorities")]);
    rows
}

fn series_down_sheet(
    title: &str,
    headers: &[&str],
    value: impl Fn(usize, i32) -> f64,
) -> Vec<Vec<Data>> {
    let mut header = vec![Data::Empty, s("Year")];
    header.extend(headers.iter().map(|h| s(h)));
    let mut rows = vec![vec![s(title)], vec![], header];
    for year in ABARES_FIRST_YEAR..=ABARES_LAST_YEAR {
        let mut row = vec![Data::Empty, fy(year)];
        row.extend((0..headers.len()).map(|i| f(value(i, year))));
        rows.push(row);
    }
    rows
}

/// Years-across table. `None` entries are section headings.
fn series_across_sheet(
    title: &str,
    lines: &[(Option<(&str, &str)>, &str)],
    value: impl Fn(usize, i32) -> f64,
) -> Vec<Vec<Data>> {
    let mut header = vec![Data::Empty, Data::Empty];
    header.extend((ABARES_ACROSS_FIRST_YEAR..=ABARES_LAST_YEAR).map(fy));
    let mut rows = vec![vec![s(title)], vec![], header];
    for (i, (line, heading)) in lines.iter().enumerate() {
        match line {
            None => rows.push(vec![s(heading)]),
            Some((label, unit)) => {
                let mut row = vec![s(label), s(unit)];
                let years = ABARES_ACROSS_FIRST_YEAR..=ABARES_LAST_YEAR;
                row.extend(years.map(|year| f(value(i, year))));
                rows.push(row);
            }
        }
    }
    rows.push(vec![s("Source: ABARES; Dairy Australia")]);
    rows
}

fn trend(base: f64, slope: f64, year: i32) -> f64 {
    base + slope * f64::from(year - ABARES_FIRST_YEAR)
}

/// Tables 6.1 and 6.4 to 6.9 of the dairy chapter, plus a contents sheet.
pub fn abares_workbook() -> InMemoryWorkbook {
    let table_6_1 = series_down_sheet(
        "Table 6.1 Summary of Australian statistics for dairy products",
        &[
            "Dairy cows ('000)",
            "Yield per cow (L)",
            "Milk production (ML)",
            "Butter production (kt)",
            "Cheese production (kt)",
            "Export price butter ($/t)",
            "Export price cheese ($/t)",
        ],
        |i, year| match i {
            0 => trend(2000.0, -10.0, year),
            1 => trend(2800.0, 60.0, year),
            2 => trend(6000.0, 70.0, year),
            3 => trend(180.0, -2.5, year),
            4 => trend(90.0, 6.0, year),
            5 => trend(1000.0, 80.0, year),
            _ => trend(1200.0, 90.0, year),
        },
    );

    let table_6_4 = state_sheet(
        "Table 6.4 Dairy cow numbers, by state ('000)",
        [270.0, 960.0, 120.0, 110.0, 60.0, 150.0],
        [2.0, 5.0, 2.0, 1.0, 1.0, 1.0],
        false,
    );
    let table_6_5 = state_sheet(
        "Table 6.5 Whole milk production, by state (ML)",
        MILK_2017,
        [5.0, 20.0, 3.0, 2.0, 1.0, 4.0],
        true,
    );

    let table_6_6 = series_across_sheet(
        "Table 6.6 Australian manufacture of dairy products",
        &[
            (Some(("Butter", "kt")), ""),
            (Some(("Cheese", "kt")), ""),
            (Some(("Skim milk powder", "kt")), ""),
            (Some(("Whole milk powder", "kt")), ""),
            (Some(("Buttermilk powder", "kt")), ""),
            (Some(("Casein", "kt")), ""),
        ],
        |i, year| trend(20.0 + 30.0 * i as f64, 1.5, year),
    );

    let table_6_7 = series_across_sheet(
        "Table 6.7 Australian consumption of dairy products",
        &[
            (None, "Total consumption"),
            (Some(("Butter", "kt")), ""),
            (Some(("Cheese", "kt")), ""),
            (Some(("Market milk", "ML")), ""),
            (None, "Consumption per person"),
            (Some(("Butter", "kg")), ""),
            (Some(("Cheese", "kg")), ""),
            (Some(("Market milk", "L")), ""),
        ],
        |i, year| match i {
            1 => trend(60.0, 0.5, year),
            2 => trend(150.0, 3.0, year),
            3 => trend(1700.0, 20.0, year),
            5 => trend(3.5, 0.01, year),
            6 => trend(9.0, 0.2, year),
            _ => trend(100.0, 0.5, year),
        },
    );

    let table_6_8 = series_down_sheet(
        "Table 6.8 Australian milk prices and gross value of production",
        &[
            "Manufacturing milk price (c/L)",
            "Market milk price (c/L)",
            "Weighted average price (c/L)",
            "Gross value ($m)",
        ],
        |i, year| match i {
            0 => trend(8.0, 0.7, year),
            1 => trend(14.0, 0.9, year),
            2 => trend(10.0, 0.75, year),
            _ => trend(600.0, 80.0, year),
        },
    );

    let table_6_9 = series_down_sheet(
        "Table 6.9 Average export unit values",
        &[
            "Butter ($/t)",
            "Cheese ($/t)",
            "Skim milk powder ($/t)",
            "Whole milk powder ($/t)",
            "Casein ($/t)",
        ],
        |i, year| trend(1000.0 + 200.0 * i as f64, 85.0, year),
    );

    InMemoryWorkbook::new()
        .with_sheet("Contents", vec![vec![s("Agricultural commodity statistics: dairy")]])
        .with_sheet("Table6.1", table_6_1)
        .with_sheet("Table 6.4", table_6_4)
        .with_sheet("Table 6.5", table_6_5)
        .with_sheet("Table6.6", table_6_6)
        .with_sheet("Table 6.7", table_6_7)
        .with_sheet("Table 6.8", table_6_8)
        .with_sheet("Table 6.9", table_6_9)
}

// =============================================================================
// ABS workbook
// =============================================================================

const REGIONS: [&str; 6] = [
    "New South Wales",
    "Victoria",
    "Queensland",
    "South Australia",
    "Western Australia",
    "Tasmania",
];

/// Regions down, years across. State values are whole numbers so the
/// `Australia` row is an exact sum. The Northern Territory is not published.
fn regions_sheet(title: &str, first_year: i32, base: [f64; 6], growth: f64) -> Vec<Vec<Data>> {
    let years = first_year..=ABS_LAST_YEAR;
    let mut header = vec![s("Region label"), s("Unit of measure")];
    header.extend(years.clone().map(|y| f(f64::from(y))));

    let mut rows = vec![
        vec![s(
            "Historical Selected Agricultural Commodities, by Australia, state and territories, \
             1860 to 2022",
        )],
        vec![s(title)],
        vec![],
        header,
    ];

    let mut totals = vec![0.0; years.clone().count()];
    for (i, (region, b)) in REGIONS.iter().zip(base).enumerate() {
        let mut row = vec![s(region), s("no.")];
        for (j, year) in years.clone().enumerate() {
            let value = b + f64::from(year - first_year) * growth * (i as f64 + 1.0);
            totals[j] += value;
            row.push(f(value));
        }
        rows.push(row);
    }

    let mut nt = vec![s("Northern Territory"), s("no.")];
    nt.extend(years.clone().map(|_| s("np")));
    rows.push(nt);

    let mut australia = vec![s("Australia"), s("no.")];
    australia.extend(totals.into_iter().map(f));
    rows.push(australia);

    rows.push(vec![s("\u{a9} Commonwealth of Australia 2024")]);
    rows
}

/// Table 8 (dairy cattle, 1964 on) and Table 6 (all cattle, 1860 on).
pub fn abs_workbook() -> InMemoryWorkbook {
    InMemoryWorkbook::new()
        .with_sheet("Contents", vec![vec![s("Historical Selected Agricultural Commodities")]])
        .with_sheet(
            "Table 6",
            regions_sheet(
                "Table 6 Cattle (total)",
                ABS_FIRST_YEAR,
                [1_000_000.0, 700_000.0, 400_000.0, 200_000.0, 50_000.0, 80_000.0],
                1_000.0,
            ),
        )
        .with_sheet(
            "Table 8",
            regions_sheet(
                "Table 8 Dairy cattle",
                ABS_DAIRY_FIRST_YEAR,
                [600_000.0, 1_200_000.0, 400_000.0, 150_000.0, 100_000.0, 120_000.0],
                500.0,
            ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::SheetSource;

    fn numbers(book: &mut InMemoryWorkbook) -> Vec<(String, f64)> {
        let mut found = Vec::new();
        for name in book.sheet_names() {
            let range = book.load(&name).unwrap();
            for cell in range.rows().flatten() {
                let value = match cell {
                    Data::Float(v) => Some(*v),
                    Data::Int(v) => Some(*v as f64),
                    Data::String(text) => text.trim_end_matches(['p', 'e', 's']).parse().ok(),
                    _ => None,
                };
                if let Some(value) = value {
                    found.push((name.clone(), value));
                }
            }
        }
        found
    }

    // -------------------------------------------------------------------------
    // GENERATED VALUES
    // -------------------------------------------------------------------------

    #[test]
    fn test_abares_cells_are_non_negative() {
        let cells = numbers(&mut abares_workbook());
        assert!(!cells.is_empty());
        for (sheet, value) in cells {
            assert!(value >= 0.0, "{sheet}: {value}");
        }
    }

    #[test]
    fn test_abs_cells_are_non_negative() {
        let cells = numbers(&mut abs_workbook());
        assert!(!cells.is_empty());
        for (sheet, value) in cells {
            assert!(value >= 0.0, "{sheet}: {value}");
        }
    }

    #[test]
    fn test_milk_2017_total() {
        assert_eq!(MILK_2017.iter().sum::<f64>(), 9_289.0);
    }
}
