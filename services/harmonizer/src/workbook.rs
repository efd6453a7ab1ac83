//! Workbook access.
//!
//! Parsers read sheets through [`SheetSource`], so the same table-locating
//! code runs against a real `.xlsx`/`.xls` file (via calamine) or an in-memory
//! grid built by a test.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Range, Reader, Sheets};

use crate::error::{HarmonizeError, Result};
use crate::observation::{parse_fy, SourceFlag};
use crate::registry::normalize_label;
use crate::units::{parse_lsd_pence, Unit};

/// Cell texts that mean "nothing published for this period".
const BLANK_MARKERS: &[&str] = &[
    "na", "n.a.", "n.a", "n/a", "..", "...", "-", "\u{2013}", "\u{2014}", "np", "nec",
];

static EMPTY: Data = Data::Empty;

pub trait SheetSource {
    fn sheet_names(&self) -> Vec<String>;

    fn load(&mut self, name: &str) -> Result<Range<Data>>;

    /// Loads a sheet by name, tolerating the spacing difference between
    /// editions (`Table6.1` in one, `Table 6.1` in the next).
    fn sheet(&mut self, wanted: &str) -> Result<Sheet> {
        let key = sheet_key(wanted);
        let available = self.sheet_names();
        let name = available
            .iter()
            .find(|name| sheet_key(name) == key)
            .cloned()
            .ok_or_else(|| HarmonizeError::MissingSheet {
                sheet: wanted.to_string(),
                available: available.clone(),
            })?;
        let range = self.load(&name)?;
        Ok(Sheet::new(name, range))
    }
}

fn sheet_key(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// A spreadsheet on disk; calamine detects xls, xlsx, xlsb and ods.
pub struct Workbook {
    path: PathBuf,
    sheets: Sheets<BufReader<File>>,
}

impl Workbook {
    pub fn open(path: &Path) -> Result<Self> {
        let sheets = open_workbook_auto(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            sheets,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SheetSource for Workbook {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.sheet_names()
    }

    fn load(&mut self, name: &str) -> Result<Range<Data>> {
        Ok(self.sheets.worksheet_range(name)?)
    }
}

/// Sheets held in memory, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkbook {
    sheets: Vec<(String, Range<Data>)>,
}

impl InMemoryWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sheet(mut self, name: &str, rows: Vec<Vec<Data>>) -> Self {
        self.sheets.push((name.to_string(), grid(rows)));
        self
    }
}

impl SheetSource for InMemoryWorkbook {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.clone()).collect()
    }

    fn load(&mut self, name: &str) -> Result<Range<Data>> {
        self.sheets
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, range)| range.clone())
            .ok_or_else(|| HarmonizeError::MissingSheet {
                sheet: name.to_string(),
                available: self.sheet_names(),
            })
    }
}

fn grid(rows: Vec<Vec<Data>>) -> Range<Data> {
    let height = rows.len();
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    if height == 0 || width == 0 {
        return Range::empty();
    }
    let mut range = Range::new((0, 0), ((height - 1) as u32, (width - 1) as u32));
    for (r, row) in rows.into_iter().enumerate() {
        for (c, cell) in row.into_iter().enumerate() {
            if cell != Data::Empty {
                range.set_value((r as u32, c as u32), cell);
            }
        }
    }
    range
}

/// A numeric cell as published.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellValue {
    pub value: f64,
    pub flag: Option<SourceFlag>,
}

/// One loaded worksheet. Row and column indices are relative to the used
/// range; [`Sheet::location`] reports absolute A1 references.
#[derive(Debug, Clone)]
pub struct Sheet {
    name: String,
    range: Range<Data>,
    origin: (u32, u32),
}

impl Sheet {
    pub fn new(name: String, range: Range<Data>) -> Self {
        let origin = range.start().unwrap_or((0, 0));
        Self {
            name,
            range,
            origin,
        }
    }

    pub fn from_rows(name: &str, rows: Vec<Vec<Data>>) -> Self {
        Self::new(name.to_string(), grid(rows))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn height(&self) -> usize {
        self.range.height()
    }

    pub fn width(&self) -> usize {
        self.range.width()
    }

    pub fn cell(&self, row: usize, col: usize) -> &Data {
        self.range.get((row, col)).unwrap_or(&EMPTY)
    }

    /// Trimmed text of a non-empty cell; numbers are rendered as written.
    pub fn text(&self, row: usize, col: usize) -> Option<String> {
        let text = match self.cell(row, col) {
            Data::Empty => return None,
            Data::String(s) => s.trim().to_string(),
            other => other.to_string(),
        };
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Normalized label text of a cell, see [`normalize_label`].
    pub fn label(&self, row: usize, col: usize) -> Option<String> {
        self.text(row, col)
            .map(|t| normalize_label(&t))
            .filter(|t| !t.is_empty())
    }

    /// `xlsx:sheet='Table 6.4':cell=C12`
    pub fn location(&self, row: usize, col: usize) -> String {
        format!(
            "xlsx:sheet='{}':cell={}{}",
            self.name,
            column_name(self.origin.1 + col as u32),
            self.origin.0 as usize + row + 1
        )
    }

    /// Start year of a financial-year period label.
    pub fn fy_year(&self, row: usize, col: usize) -> Option<i32> {
        match self.cell(row, col) {
            Data::String(s) => parse_fy(s),
            _ => None,
        }
    }

    /// A calendar-year header, written as a number or as digits.
    pub fn calendar_year(&self, row: usize, col: usize) -> Option<i32> {
        let year = match self.cell(row, col) {
            Data::Float(f) if f.fract() == 0.0 => *f as i64,
            Data::Int(i) => *i,
            Data::String(s) => s.trim().parse::<i64>().ok()?,
            _ => return None,
        };
        if (1800..=2100).contains(&year) {
            Some(year as i32)
        } else {
            None
        }
    }

    /// Reads a numeric observation. Blank cells and the "not available"
    /// markers are `None`, never zero. A trailing `p` marks a preliminary
    /// figure and `e`/`s` an estimate. Cells of pre-decimal price series may
    /// be written in £sd and are returned in pence.
    pub fn number(&self, row: usize, col: usize, unit: Option<Unit>) -> Result<Option<CellValue>> {
        let invalid = |text: String| HarmonizeError::InvalidCell {
            location: self.location(row, col),
            text,
        };
        match self.cell(row, col) {
            Data::Empty => Ok(None),
            Data::Float(f) if f.is_finite() => Ok(Some(CellValue {
                value: *f,
                flag: None,
            })),
            Data::Int(i) => Ok(Some(CellValue {
                value: *i as f64,
                flag: None,
            })),
            Data::String(s) => {
                parse_number_text(s, unit.is_some_and(|u| u.is_pre_decimal()))
                    .ok_or_else(|| invalid(s.clone()))
            }
            other => Err(invalid(other.to_string())),
        }
    }
}

fn parse_number_text(text: &str, pre_decimal: bool) -> Option<Option<CellValue>> {
    let trimmed = text.trim();
    if trimmed.is_empty() || BLANK_MARKERS.contains(&trimmed.to_lowercase().as_str()) {
        return Some(None);
    }

    if pre_decimal {
        if let Some(pence) = parse_lsd_pence(trimmed) {
            return Some(Some(CellValue {
                value: pence,
                flag: None,
            }));
        }
    }

    let mut cleaned: String = trimmed
        .chars()
        .filter(|c| !matches!(c, ',' | ' ' | '\u{a0}'))
        .collect();

    let mut flag = None;
    let mut chars = cleaned.chars().rev();
    if let (Some(last), Some(before)) = (chars.next(), chars.next()) {
        if before.is_ascii_digit() || before == '.' {
            flag = match last.to_ascii_lowercase() {
                'p' => Some(SourceFlag::Preliminary),
                'e' | 's' => Some(SourceFlag::Estimate),
                _ => None,
            };
        }
    }
    if flag.is_some() {
        cleaned.pop();
    }

    let value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(Some(CellValue { value, flag }))
}

/// Zero-based column index to spreadsheet letters (0 -> A, 27 -> AB).
pub fn column_name(col: u32) -> String {
    let mut n = col + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}
