//! Unit conversion table.
//!
//! Every unit the sources publish is a member of [`Unit`]. A unit belongs to a
//! single quantity [`Dimension`] and carries its scale relative to that
//! dimension's base (head, kg, litres, c/t, c/L). Converting between two units
//! of the same dimension computes `value * scale(from) / scale(to)`; anything
//! else is `UnsupportedUnit`. Unknown symbols never pass through unconverted.
//!
//! `ML`, `GL` and `kt` are case-significant: `mL` is millilitres, which the
//! sources never publish, so it is rejected rather than read as megalitres.
//!
//! Pre-decimal currency (decimalisation 14 Feb 1966): £1 = $2, 1s = 10c,
//! 1d = 10/12 c. Imperial measures are the UK (long) ton, hundredweight,
//! pound avoirdupois and imperial gallon.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{HarmonizeError, Result};

pub const POUNDS_TO_DOLLARS: f64 = 2.0;
pub const SHILLINGS_TO_CENTS: f64 = 10.0;
pub const PENCE_TO_CENTS: f64 = 10.0 / 12.0;

pub const GALLONS_IMP_TO_LITRES: f64 = 4.54609;
pub const LBS_TO_KG: f64 = 0.453592;
pub const TONS_IMP_TO_TONNES: f64 = 1.01605;
pub const CWT_TO_KG: f64 = 50.8023;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Count,
    Mass,
    Volume,
    PricePerMass,
    PricePerVolume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Unit {
    Head,
    ThousandHead,
    Kilograms,
    Tonnes,
    Kilotonnes,
    Pounds,
    ImperialTons,
    Hundredweight,
    Litres,
    Megalitres,
    Gigalitres,
    ImperialGallons,
    MillionGallons,
    CentsPerKg,
    DollarsPerKg,
    DollarsPerTonne,
    PencePerPound,
    CentsPerLitre,
    PencePerGallon,
}

impl Unit {
    pub const ALL: [Unit; 19] = [
        Unit::Head,
        Unit::ThousandHead,
        Unit::Kilograms,
        Unit::Tonnes,
        Unit::Kilotonnes,
        Unit::Pounds,
        Unit::ImperialTons,
        Unit::Hundredweight,
        Unit::Litres,
        Unit::Megalitres,
        Unit::Gigalitres,
        Unit::ImperialGallons,
        Unit::MillionGallons,
        Unit::CentsPerKg,
        Unit::DollarsPerKg,
        Unit::DollarsPerTonne,
        Unit::PencePerPound,
        Unit::CentsPerLitre,
        Unit::PencePerGallon,
    ];

    /// Symbol written to the standardized `unit` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Head => "head",
            Unit::ThousandHead => "'000 head",
            Unit::Kilograms => "kg",
            Unit::Tonnes => "tonnes",
            Unit::Kilotonnes => "kt",
            Unit::Pounds => "lb",
            Unit::ImperialTons => "tons",
            Unit::Hundredweight => "cwt",
            Unit::Litres => "litres",
            Unit::Megalitres => "megalitres",
            Unit::Gigalitres => "GL",
            Unit::ImperialGallons => "gallons",
            Unit::MillionGallons => "million gallons",
            Unit::CentsPerKg => "cents_per_kg",
            Unit::DollarsPerKg => "$/kg",
            Unit::DollarsPerTonne => "$/t",
            Unit::PencePerPound => "d/lb",
            Unit::CentsPerLitre => "cents_per_litre",
            Unit::PencePerGallon => "d/gal",
        }
    }

    pub fn dimension(&self) -> Dimension {
        match self {
            Unit::Head | Unit::ThousandHead => Dimension::Count,
            Unit::Kilograms
            | Unit::Tonnes
            | Unit::Kilotonnes
            | Unit::Pounds
            | Unit::ImperialTons
            | Unit::Hundredweight => Dimension::Mass,
            Unit::Litres
            | Unit::Megalitres
            | Unit::Gigalitres
            | Unit::ImperialGallons
            | Unit::MillionGallons => Dimension::Volume,
            Unit::CentsPerKg | Unit::DollarsPerKg | Unit::DollarsPerTonne | Unit::PencePerPound => {
                Dimension::PricePerMass
            }
            Unit::CentsPerLitre | Unit::PencePerGallon => Dimension::PricePerVolume,
        }
    }

    /// Size of one unit in the dimension's base (head, kg, litres, c/t, c/L).
    /// Scales are whole numbers wherever the relation is decimal, so `$/t` to
    /// `c/kg` is `v * 100 / 1000` rather than a multiply by an inexact 0.1.
    fn scale(&self) -> f64 {
        match self {
            Unit::Head => 1.0,
            Unit::ThousandHead => 1_000.0,
            Unit::Kilograms => 1.0,
            Unit::Tonnes => 1_000.0,
            Unit::Kilotonnes => 1_000_000.0,
            Unit::Pounds => LBS_TO_KG,
            Unit::ImperialTons => TONS_IMP_TO_TONNES * 1_000.0,
            Unit::Hundredweight => CWT_TO_KG,
            Unit::Litres => 1.0,
            Unit::Megalitres => 1_000_000.0,
            Unit::Gigalitres => 1_000_000_000.0,
            Unit::ImperialGallons => GALLONS_IMP_TO_LITRES,
            Unit::MillionGallons => GALLONS_IMP_TO_LITRES * 1_000_000.0,
            Unit::CentsPerKg => 1_000.0,
            Unit::DollarsPerKg => 100_000.0,
            Unit::DollarsPerTonne => 100.0,
            Unit::PencePerPound => PENCE_TO_CENTS / LBS_TO_KG * 1_000.0,
            Unit::CentsPerLitre => 1.0,
            Unit::PencePerGallon => PENCE_TO_CENTS / GALLONS_IMP_TO_LITRES,
        }
    }

    /// Prices published in pounds, shillings and pence.
    pub fn is_pre_decimal(&self) -> bool {
        matches!(self, Unit::PencePerPound | Unit::PencePerGallon)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Symbols whose meaning depends on case.
const CASE_SENSITIVE: [(&str, Unit); 3] = [
    ("ML", Unit::Megalitres),
    ("GL", Unit::Gigalitres),
    ("kt", Unit::Kilotonnes),
];

impl FromStr for Unit {
    type Err = HarmonizeError;

    fn from_str(symbol: &str) -> Result<Self> {
        let collapsed = symbol
            .trim()
            .replace(['\u{2019}', '\u{2018}'], "'")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        if let Some((_, unit)) = CASE_SENSITIVE.iter().find(|(s, _)| *s == collapsed) {
            return Ok(*unit);
        }

        let normalized = collapsed.to_lowercase();
        if CASE_SENSITIVE.iter().any(|(s, _)| s.to_lowercase() == normalized) {
            return Err(HarmonizeError::UnsupportedUnit {
                unit: symbol.to_string(),
                context: "ambiguous case; expected ML, GL or kt".to_string(),
            });
        }

        let unit = match normalized.as_str() {
            "head" | "no." | "no" | "number" => Unit::Head,
            "'000" | "'000 head" | "000 head" | "thousand head" => Unit::ThousandHead,
            "kg" | "kilograms" => Unit::Kilograms,
            "t" | "tonne" | "tonnes" => Unit::Tonnes,
            "'000 t" | "kilotonnes" => Unit::Kilotonnes,
            "lb" | "lbs" | "pounds" => Unit::Pounds,
            "ton" | "tons" | "imperial tons" => Unit::ImperialTons,
            "cwt" => Unit::Hundredweight,
            "l" | "litre" | "litres" => Unit::Litres,
            "megalitres" => Unit::Megalitres,
            "gigalitres" => Unit::Gigalitres,
            "gal" | "gallons" | "imperial gallons" => Unit::ImperialGallons,
            "million gallons" | "m gal" => Unit::MillionGallons,
            "c/kg" | "cents_per_kg" => Unit::CentsPerKg,
            "$/kg" | "dollars_per_kg" => Unit::DollarsPerKg,
            "$/t" | "dollars_per_tonne" => Unit::DollarsPerTonne,
            "d/lb" | "pence_per_lb" => Unit::PencePerPound,
            "c/l" | "cents_per_litre" => Unit::CentsPerLitre,
            "d/gal" | "pence_per_gallon" => Unit::PencePerGallon,
            _ => {
                return Err(HarmonizeError::UnsupportedUnit {
                    unit: symbol.to_string(),
                    context: "not in the conversion table".to_string(),
                })
            }
        };
        Ok(unit)
    }
}

impl TryFrom<String> for Unit {
    type Error = HarmonizeError;

    fn try_from(symbol: String) -> Result<Self> {
        symbol.parse()
    }
}

impl From<Unit> for String {
    fn from(unit: Unit) -> Self {
        unit.as_str().to_string()
    }
}

/// Outcome of rescaling one value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conversion {
    pub value: f64,
    pub factor: f64,
    pub from: Unit,
    pub to: Unit,
}

impl Conversion {
    pub fn is_rescaled(&self) -> bool {
        self.from != self.to && self.factor != 1.0
    }
}

/// Factor turning a quantity in `from` into `to`.
pub fn factor(from: Unit, to: Unit) -> Result<f64> {
    if from == to {
        return Ok(1.0);
    }
    if from.dimension() != to.dimension() {
        return Err(HarmonizeError::UnsupportedUnit {
            unit: from.as_str().to_string(),
            context: format!("no conversion to {}", to),
        });
    }
    Ok(from.scale() / to.scale())
}

pub fn convert_units(value: f64, from: Unit, to: Unit) -> Result<Conversion> {
    let factor = factor(from, to)?;
    let value = if from == to {
        value
    } else {
        value * from.scale() / to.scale()
    };
    Ok(Conversion {
        value,
        factor,
        from,
        to,
    })
}

/// Rescales `value`, published in `from_symbol`, to the canonical unit `to`.
pub fn convert(value: f64, from_symbol: &str, to: Unit) -> Result<Conversion> {
    let from: Unit = from_symbol.parse()?;
    convert_units(value, from, to)
}

// =============================================================================
// Pre-decimal currency
// =============================================================================

pub fn lsd_to_pence(pounds: f64, shillings: f64, pence: f64) -> f64 {
    pounds * 240.0 + shillings * 12.0 + pence
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

fn number_or_zero(part: &str) -> Option<f64> {
    let part = part.trim();
    if part.is_empty() {
        Some(0.0)
    } else {
        part.parse().ok()
    }
}

/// Reads a £sd amount and returns it in pence.
///
/// Accepted notations: `£1/2/6`, `3s 6d`, `3s6d`, `42d`, `15/6` (shillings/pence).
pub fn parse_lsd_pence(text: &str) -> Option<f64> {
    let s = text.trim();
    if s.is_empty() || s.starts_with('$') {
        return None;
    }

    if let Some(rest) = s.strip_prefix('£') {
        let mut parts = rest.split('/');
        let pounds = number_or_zero(parts.next().unwrap_or(""))?;
        let shillings = number_or_zero(parts.next().unwrap_or(""))?;
        let pence = number_or_zero(parts.next().unwrap_or(""))?;
        return Some(lsd_to_pence(pounds, shillings, pence));
    }

    if let Some((shillings, rest)) = s.split_once('s') {
        let shillings: f64 = shillings.trim().parse().ok()?;
        let pence = number_or_zero(rest.trim().trim_end_matches('d'))?;
        return Some(lsd_to_pence(0.0, shillings, pence));
    }

    if let Some(pence) = s.strip_suffix('d') {
        return pence.trim().parse().ok();
    }

    if let Some((shillings, pence)) = s.split_once('/') {
        let shillings: f64 = shillings.trim().parse().ok()?;
        let pence = number_or_zero(pence)?;
        return Some(lsd_to_pence(0.0, shillings, pence));
    }

    None
}

/// Reads a historical price string into decimal dollars.
pub fn parse_price_dollars(text: &str) -> Option<f64> {
    let s = text.trim();
    if let Some(decimal) = s.strip_prefix('$') {
        return decimal.replace(',', "").trim().parse().ok();
    }
    if let Some(pence) = parse_lsd_pence(s) {
        return Some(round4(pence * PENCE_TO_CENTS / 100.0));
    }
    s.replace(',', "").parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * b.abs().max(1.0)
    }

    // -------------------------------------------------------------------------
    // CONVERSION TABLE
    // -------------------------------------------------------------------------

    #[test]
    fn test_thousand_head_to_head() {
        let c = convert(1_000.0, "'000 head", Unit::Head).unwrap();
        assert_eq!(c.value, 1_000_000.0);
        assert_eq!(c.factor, 1_000.0);
        assert!(c.is_rescaled());
    }

    #[test]
    fn test_bare_thousands_symbol() {
        let c = convert(1_633.0, "'000", Unit::Head).unwrap();
        assert_eq!(c.value, 1_633_000.0);
    }

    #[test]
    fn test_kilotonnes_to_tonnes() {
        let c = convert(119.3, "kt", Unit::Tonnes).unwrap();
        assert!(close(c.value, 119_300.0));
        assert_eq!(c.factor, 1_000.0);
    }

    #[test]
    fn test_dollars_per_tonne_to_cents_per_kg() {
        let c = convert(4_850.0, "$/t", Unit::CentsPerKg).unwrap();
        assert!(close(c.factor, 0.1));
        assert_eq!(c.value, 485.0);
        assert_eq!(convert(1_001.0, "$/t", Unit::CentsPerKg).unwrap().value, 100.1);
        assert_eq!(convert(1_003.0, "$/t", Unit::CentsPerKg).unwrap().value, 100.3);
    }

    #[test]
    fn test_dollars_per_tonne_matches_division_by_ten() {
        for dollars in 1_000..6_000 {
            let v = f64::from(dollars);
            let c = convert_units(v, Unit::DollarsPerTonne, Unit::CentsPerKg).unwrap();
            assert_eq!(c.value, v / 10.0, "{dollars} $/t");
        }
    }

    #[test]
    fn test_case_significant_symbols() {
        assert_eq!("ML".parse::<Unit>().unwrap(), Unit::Megalitres);
        assert_eq!("GL".parse::<Unit>().unwrap(), Unit::Gigalitres);
        assert_eq!("kt".parse::<Unit>().unwrap(), Unit::Kilotonnes);
        assert_eq!("L".parse::<Unit>().unwrap(), Unit::Litres);
        assert_eq!("c/L".parse::<Unit>().unwrap(), Unit::CentsPerLitre);
    }

    #[test]
    fn test_millilitres_are_not_megalitres() {
        for symbol in ["mL", "ml", "Ml", "gl", "KT"] {
            let err = convert(250.0, symbol, Unit::Litres).unwrap_err();
            match err {
                HarmonizeError::UnsupportedUnit { unit, .. } => assert_eq!(unit, symbol),
                other => panic!("unexpected error for {symbol}: {other}"),
            }
        }
    }

    #[test]
    fn test_identity_conversion_is_not_rescaled() {
        let c = convert(9_289.0, "ML", Unit::Megalitres).unwrap();
        assert_eq!(c.factor, 1.0);
        assert_eq!(c.value, 9_289.0);
        assert!(!c.is_rescaled());
    }

    #[test]
    fn test_imperial_units() {
        let c = convert(1.0, "gallons", Unit::Litres).unwrap();
        assert!(close(c.value, GALLONS_IMP_TO_LITRES));
        let c = convert(1.0, "tons", Unit::Tonnes).unwrap();
        assert!(close(c.value, TONS_IMP_TO_TONNES));
        let c = convert(12.0, "d/gal", Unit::CentsPerLitre).unwrap();
        assert!(close(c.value, 10.0 / GALLONS_IMP_TO_LITRES));
    }

    #[test]
    fn test_unknown_symbol_is_unsupported() {
        let err = convert(1.0, "bushels", Unit::Tonnes).unwrap_err();
        match err {
            HarmonizeError::UnsupportedUnit { unit, .. } => assert_eq!(unit, "bushels"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cross_dimension_is_unsupported() {
        let err = convert(1.0, "kt", Unit::Megalitres).unwrap_err();
        assert!(err.to_string().contains("no conversion to megalitres"));
    }

    #[test]
    fn test_symbol_aliases_round_trip() {
        for unit in Unit::ALL {
            let parsed: Unit = unit.as_str().parse().unwrap();
            assert_eq!(parsed, unit);
        }
        assert_eq!("\u{2019}000".parse::<Unit>().unwrap(), Unit::ThousandHead);
        assert_eq!(" No. ".parse::<Unit>().unwrap(), Unit::Head);
    }

    // -------------------------------------------------------------------------
    // PRE-DECIMAL CURRENCY
    // -------------------------------------------------------------------------

    #[test]
    fn test_one_pound_is_two_dollars() {
        let dollars = lsd_to_pence(1.0, 0.0, 0.0) * PENCE_TO_CENTS / 100.0;
        assert!(close(dollars, POUNDS_TO_DOLLARS));
        assert!(close(lsd_to_pence(0.0, 1.0, 0.0) * PENCE_TO_CENTS, SHILLINGS_TO_CENTS));
    }

    #[test]
    fn test_parse_price_strings() {
        assert_eq!(parse_price_dollars("£1/2/6"), Some(2.25));
        assert_eq!(parse_price_dollars("3s 6d"), Some(0.35));
        assert_eq!(parse_price_dollars("3s6d"), Some(0.35));
        assert_eq!(parse_price_dollars("42d"), Some(0.35));
        assert_eq!(parse_price_dollars("15/6"), Some(1.55));
        assert_eq!(parse_price_dollars("$1.50"), Some(1.5));
        assert_eq!(parse_price_dollars("1,234.5"), Some(1234.5));
        assert_eq!(parse_price_dollars("n.a."), None);
    }

    #[test]
    fn test_parse_lsd_pence_rejects_decimal_amounts() {
        assert_eq!(parse_lsd_pence("$2.00"), None);
        assert_eq!(parse_lsd_pence("12.5"), None);
        assert_eq!(parse_lsd_pence("2s"), Some(24.0));
    }
}
