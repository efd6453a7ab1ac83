//! Variable and geography reference data.
//!
//! The registry is loaded once at start-up and passed by reference into the
//! parsers, the merger and the validator. Every variable an observation names
//! must be defined here, with the canonical unit its values are stored in.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{HarmonizeError, Result};
use crate::units::Unit;

pub const BUILTIN_VERSION: &str = "acs2018+abs1860-2022";

// =============================================================================
// Geography
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StateCode {
    #[serde(rename = "NSW")]
    Nsw,
    #[serde(rename = "VIC")]
    Vic,
    #[serde(rename = "QLD")]
    Qld,
    #[serde(rename = "SA")]
    Sa,
    #[serde(rename = "WA")]
    Wa,
    #[serde(rename = "TAS")]
    Tas,
    #[serde(rename = "NT")]
    Nt,
    #[serde(rename = "ACT")]
    Act,
    #[serde(rename = "AUS")]
    Aus,
}

impl StateCode {
    pub const ALL: [StateCode; 9] = [
        StateCode::Nsw,
        StateCode::Vic,
        StateCode::Qld,
        StateCode::Sa,
        StateCode::Wa,
        StateCode::Tas,
        StateCode::Nt,
        StateCode::Act,
        StateCode::Aus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StateCode::Nsw => "NSW",
            StateCode::Vic => "VIC",
            StateCode::Qld => "QLD",
            StateCode::Sa => "SA",
            StateCode::Wa => "WA",
            StateCode::Tas => "TAS",
            StateCode::Nt => "NT",
            StateCode::Act => "ACT",
            StateCode::Aus => "AUS",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StateCode::Nsw => "New South Wales",
            StateCode::Vic => "Victoria",
            StateCode::Qld => "Queensland",
            StateCode::Sa => "South Australia",
            StateCode::Wa => "Western Australia",
            StateCode::Tas => "Tasmania",
            StateCode::Nt => "Northern Territory",
            StateCode::Act => "Australian Capital Territory",
            StateCode::Aus => "Australia (National)",
        }
    }

    /// The national total, which state values must sum to.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, StateCode::Aus)
    }

    fn aliases(&self) -> &'static [&'static str] {
        match self {
            StateCode::Nsw => &["n.s.w."],
            StateCode::Vic => &["vic."],
            StateCode::Qld => &["qld."],
            StateCode::Sa => &["s.a.", "s. aust."],
            StateCode::Wa => &["w.a.", "w. aust."],
            StateCode::Tas => &["tas."],
            StateCode::Nt => &["n.t."],
            StateCode::Act => &["a.c.t."],
            StateCode::Aus => &["aust", "aust.", "australia", "australian total"],
        }
    }
}

impl fmt::Display for StateCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateCode {
    type Err = HarmonizeError;

    fn from_str(code: &str) -> Result<Self> {
        StateCode::ALL
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(code.trim()))
            .ok_or_else(|| HarmonizeError::UnmappedLabel {
                label: code.to_string(),
                location: "state code".to_string(),
            })
    }
}

/// Lowercased, whitespace-collapsed label with parenthesised qualifiers
/// (units, footnote letters) removed.
pub fn normalize_label(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '\u{2013}' | '\u{2014}' if depth == 0 => out.push('-'),
            _ if depth == 0 => out.extend(c.to_lowercase()),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

// =============================================================================
// Variables
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Herd,
    Production,
    Price,
    Consumption,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Herd => "herd",
            Category::Production => "production",
            Category::Price => "price",
            Category::Consumption => "consumption",
        }
    }
}

/// Geographic levels a variable is published at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    National,
    StateAndNational,
}

/// Years a series is expected to cover, for one state or (without a state)
/// for every state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageSpan {
    #[serde(default)]
    pub state_code: Option<StateCode>,
    pub first_year: i32,
    pub last_year: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDefinition {
    pub variable_id: String,
    pub category: Category,
    pub name: String,
    pub unit: Unit,
    #[serde(default)]
    pub description: String,
    pub granularity: Granularity,
    #[serde(default)]
    pub coverage: Vec<CoverageSpan>,
}

impl VariableDefinition {
    pub fn new(
        variable_id: &str,
        category: Category,
        name: &str,
        unit: Unit,
        description: &str,
        granularity: Granularity,
    ) -> Self {
        Self {
            variable_id: variable_id.to_string(),
            category,
            name: name.to_string(),
            unit,
            description: description.to_string(),
            granularity,
            coverage: Vec::new(),
        }
    }

    pub fn covering(
        mut self,
        state_code: Option<StateCode>,
        first_year: i32,
        last_year: i32,
    ) -> Self {
        self.coverage.push(CoverageSpan {
            state_code,
            first_year,
            last_year,
        });
        self
    }

    /// Declared span for `state`: a state-specific span wins over a general one.
    pub fn coverage_for(&self, state: StateCode) -> Option<(i32, i32)> {
        self.coverage
            .iter()
            .find(|span| span.state_code == Some(state))
            .or_else(|| self.coverage.iter().find(|span| span.state_code.is_none()))
            .map(|span| (span.first_year, span.last_year))
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    version: String,
    variables: Vec<VariableDefinition>,
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug, Clone)]
pub struct Registry {
    version: String,
    variables: BTreeMap<String, VariableDefinition>,
    state_labels: HashMap<String, StateCode>,
}

impl Registry {
    pub fn from_definitions(
        version: impl Into<String>,
        definitions: Vec<VariableDefinition>,
    ) -> Result<Self> {
        let mut variables = BTreeMap::new();
        for def in definitions {
            for span in &def.coverage {
                if span.first_year > span.last_year {
                    return Err(HarmonizeError::Registry(format!(
                        "variable '{}' declares coverage {}..{}",
                        def.variable_id, span.first_year, span.last_year
                    )));
                }
            }
            if let Some(previous) = variables.insert(def.variable_id.clone(), def) {
                return Err(HarmonizeError::Registry(format!(
                    "variable '{}' defined twice",
                    previous.variable_id
                )));
            }
        }

        let mut state_labels = HashMap::new();
        for state in StateCode::ALL {
            state_labels.insert(normalize_label(state.as_str()), state);
            state_labels.insert(normalize_label(state.name()), state);
            for alias in state.aliases() {
                state_labels.insert(normalize_label(alias), state);
            }
        }

        Ok(Self {
            version: version.into(),
            variables,
            state_labels,
        })
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let file: RegistryFile = serde_json::from_str(text)?;
        Self::from_definitions(file.version, file.variables)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// The variables the ABARES and ABS tables are mapped onto.
    pub fn builtin() -> Result<Self> {
        use Category::*;
        use Granularity::*;

        let definitions = vec![
            // Production
            VariableDefinition::new(
                "prod_milk_total",
                Production,
                "Total milk production",
                Unit::Megalitres,
                "Total whole milk production",
                StateAndNational,
            ),
            VariableDefinition::new(
                "prod_butter",
                Production,
                "Butter production",
                Unit::Tonnes,
                "Factory butter production",
                National,
            ),
            VariableDefinition::new(
                "prod_cheese",
                Production,
                "Cheese production",
                Unit::Tonnes,
                "Factory cheese production",
                National,
            ),
            VariableDefinition::new(
                "prod_milk_powder",
                Production,
                "Milk powder production",
                Unit::Tonnes,
                "Whole milk powder production",
                National,
            ),
            // Prices
            VariableDefinition::new(
                "price_farmgate_market",
                Price,
                "Farmgate price - market milk",
                Unit::CentsPerLitre,
                "Price paid to farmers for market/liquid milk",
                National,
            ),
            VariableDefinition::new(
                "price_farmgate_manufacturing",
                Price,
                "Farmgate price - manufacturing milk",
                Unit::CentsPerLitre,
                "Price paid to farmers for manufacturing milk",
                National,
            ),
            VariableDefinition::new(
                "price_farmgate_avg",
                Price,
                "Average farmgate price",
                Unit::CentsPerLitre,
                "Weighted average farmgate milk price",
                National,
            ),
            VariableDefinition::new(
                "price_export_butter",
                Price,
                "Export butter price",
                Unit::CentsPerKg,
                "Average export price for butter",
                National,
            ),
            VariableDefinition::new(
                "price_export_cheese",
                Price,
                "Export cheese price",
                Unit::CentsPerKg,
                "Average export price for cheese",
                National,
            ),
            // Herd
            VariableDefinition::new(
                "herd_dairy_cows",
                Herd,
                "Dairy cow numbers",
                Unit::Head,
                "Cows in milk and dry",
                StateAndNational,
            ),
            VariableDefinition::new(
                "herd_dairy_cattle",
                Herd,
                "Dairy cattle numbers",
                Unit::Head,
                "Total dairy cattle",
                StateAndNational,
            )
            .covering(Some(StateCode::Aus), 1964, 2022),
            VariableDefinition::new(
                "herd_total_cattle",
                Herd,
                "Total cattle numbers",
                Unit::Head,
                "Total cattle (meat + dairy)",
                StateAndNational,
            )
            .covering(Some(StateCode::Aus), 1860, 2022),
            VariableDefinition::new(
                "herd_yield_per_cow",
                Herd,
                "Yield per cow",
                Unit::Litres,
                "Average annual milk yield per cow",
                National,
            ),
            // Consumption
            VariableDefinition::new(
                "cons_butter_percap",
                Consumption,
                "Per capita butter consumption",
                Unit::Kilograms,
                "Annual per capita butter consumption",
                National,
            ),
            VariableDefinition::new(
                "cons_cheese_percap",
                Consumption,
                "Per capita cheese consumption",
                Unit::Kilograms,
                "Annual per capita cheese consumption",
                National,
            ),
            VariableDefinition::new(
                "cons_milk_percap",
                Consumption,
                "Per capita milk consumption",
                Unit::Litres,
                "Annual per capita fluid milk consumption",
                National,
            ),
            VariableDefinition::new(
                "cons_milk_total",
                Consumption,
                "Total domestic milk consumption",
                Unit::Megalitres,
                "Total domestic fluid/market milk sales",
                National,
            ),
        ];

        Self::from_definitions(BUILTIN_VERSION, definitions)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn variable(&self, variable_id: &str) -> Result<&VariableDefinition> {
        self.variables
            .get(variable_id)
            .ok_or_else(|| HarmonizeError::UnknownVariable(variable_id.to_string()))
    }

    /// Definitions ordered by variable id.
    pub fn variables(&self) -> impl Iterator<Item = &VariableDefinition> {
        self.variables.values()
    }

    pub fn states(&self) -> &'static [StateCode] {
        &StateCode::ALL
    }

    pub fn state_for_label(&self, label: &str) -> Option<StateCode> {
        self.state_labels.get(&normalize_label(label)).copied()
    }

    /// Maps a published region label, failing with `UnmappedLabel` when the
    /// label names no known geographic unit.
    pub fn resolve_state(&self, label: &str, location: &str) -> Result<StateCode> {
        self.state_for_label(label)
            .ok_or_else(|| HarmonizeError::UnmappedLabel {
                label: label.trim().to_string(),
                location: location.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_contents() {
        let registry = Registry::builtin().unwrap();
        assert_eq!(registry.variables().count(), 17);
        assert_eq!(registry.states().len(), 9);
        assert_eq!(registry.version(), BUILTIN_VERSION);

        let milk = registry.variable("prod_milk_total").unwrap();
        assert_eq!(milk.unit, Unit::Megalitres);
        assert_eq!(milk.granularity, Granularity::StateAndNational);
    }

    #[test]
    fn test_unknown_variable() {
        let err = Registry::builtin().unwrap().variable("prod_ice_cream").unwrap_err();
        assert!(matches!(err, HarmonizeError::UnknownVariable(id) if id == "prod_ice_cream"));
    }

    #[test]
    fn test_only_aus_is_aggregate() {
        let aggregates: Vec<_> = StateCode::ALL.iter().filter(|s| s.is_aggregate()).collect();
        assert_eq!(aggregates, vec![&StateCode::Aus]);
    }

    #[test]
    fn test_state_label_aliases() {
        let registry = Registry::builtin().unwrap();
        assert_eq!(registry.state_for_label("NSW"), Some(StateCode::Nsw));
        assert_eq!(registry.state_for_label("Vic."), Some(StateCode::Vic));
        assert_eq!(registry.state_for_label("  Queensland "), Some(StateCode::Qld));
        assert_eq!(registry.state_for_label("Tas. (a)"), Some(StateCode::Tas));
        assert_eq!(registry.state_for_label("Aust."), Some(StateCode::Aus));
        assert_eq!(registry.state_for_label("Australia"), Some(StateCode::Aus));
        assert_eq!(
            registry.state_for_label("Australian Capital Territory"),
            Some(StateCode::Act)
        );
    }

    #[test]
    fn test_unknown_state_label_is_unmapped() {
        let err = Registry::builtin().unwrap()
            .resolve_state("JBT", "xlsx:sheet='Table 8':cell=A14")
            .unwrap_err();
        match err {
            HarmonizeError::UnmappedLabel { label, location } => {
                assert_eq!(label, "JBT");
                assert!(location.contains("A14"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_state_code_parse() {
        assert_eq!("aus".parse::<StateCode>().unwrap(), StateCode::Aus);
        assert!("XX".parse::<StateCode>().is_err());
    }

    #[test]
    fn test_coverage_lookup() {
        let registry = Registry::builtin().unwrap();
        let cattle = registry.variable("herd_total_cattle").unwrap();
        assert_eq!(cattle.coverage_for(StateCode::Aus), Some((1860, 2022)));
        assert_eq!(cattle.coverage_for(StateCode::Nt), None);
        let dairy = registry.variable("herd_dairy_cattle").unwrap();
        assert_eq!(dairy.coverage_for(StateCode::Aus), Some((1964, 2022)));
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("Milk production (ML)"), "milk production");
        assert_eq!(normalize_label("  Butter\n(kt) (a) "), "butter");
        assert_eq!(normalize_label("Region  Label"), "region label");
    }

    // -------------------------------------------------------------------------
    // REGISTRY FILE
    // -------------------------------------------------------------------------

    #[test]
    fn test_registry_from_json() {
        let json = r#"{
            "version": "test-1",
            "variables": [
                {"variable_id": "prod_milk_total", "category": "production", "name": "Milk",
                 "unit": "megalitres", "granularity": "state_and_national",
                 "coverage": [{"first_year": 1973, "last_year": 2017}]},
                {"variable_id": "herd_dairy_cows", "category": "herd", "name": "Cows",
                 "unit": "head", "granularity": "state_and_national"}
            ]
        }"#;
        let registry = Registry::from_json(json).unwrap();
        assert_eq!(registry.version(), "test-1");
        let milk = registry.variable("prod_milk_total").unwrap();
        assert_eq!(milk.coverage_for(StateCode::Wa), Some((1973, 2017)));
        assert_eq!(milk.description, "");
    }

    #[test]
    fn test_registry_rejects_unknown_unit() {
        let json = r#"{"version": "x", "variables": [
            {"variable_id": "v", "category": "herd", "name": "V", "unit": "bushels",
             "granularity": "national"}]}"#;
        assert!(Registry::from_json(json).is_err());
    }

    #[test]
    fn test_registry_rejects_duplicate_ids() {
        let def =
            VariableDefinition::new("v", Category::Herd, "V", Unit::Head, "", Granularity::National);
        let err = Registry::from_definitions("x", vec![def.clone(), def]).unwrap_err();
        assert!(err.to_string().contains("defined twice"));
    }
}
