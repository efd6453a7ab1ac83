use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

const DEFAULT_ABARES: &str = "data/raw/abares/acs2018_dairy.xlsx";
/// Earlier edition, used when the default 2018 workbook has not been fetched.
const FALLBACK_ABARES: &str = "acs2017_dairy.xlsx";
const DEFAULT_ABS: &str = "data/raw/abs/historic_ag_commodities_1860_2022.xlsx";
const DEFAULT_OUTPUT_CSV: &str = "data/final/aus_dairy_stats.csv";
const DEFAULT_DB_PATH: &str = "data/dairy_stats.db";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub abares_workbook: PathBuf,
    pub abs_workbook: PathBuf,
    pub output_csv: PathBuf,
    pub db_path: PathBuf,
    /// JSON registry replacing the built-in one.
    pub registry_path: Option<PathBuf>,
    pub reconcile_tolerance: f64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let abares_workbook = match lookup("ABARES_WORKBOOK") {
            Some(path) => PathBuf::from(path),
            None => default_abares(Path::new(DEFAULT_ABARES)),
        };

        let reconcile_tolerance = match lookup("RECONCILE_TOLERANCE") {
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .with_context(|| format!("RECONCILE_TOLERANCE is not a number: {raw}"))?,
            None => 0.001,
        };
        if reconcile_tolerance.is_nan() || reconcile_tolerance < 0.0 {
            bail!("RECONCILE_TOLERANCE must be >= 0, got {reconcile_tolerance}");
        }

        Ok(Self {
            abares_workbook,
            abs_workbook: PathBuf::from(lookup("ABS_WORKBOOK").unwrap_or_else(|| DEFAULT_ABS.to_string())),
            output_csv: PathBuf::from(
                lookup("OUTPUT_CSV").unwrap_or_else(|| DEFAULT_OUTPUT_CSV.to_string()),
            ),
            db_path: PathBuf::from(lookup("DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string())),
            registry_path: lookup("REGISTRY_PATH").map(PathBuf::from),
            reconcile_tolerance,
        })
    }
}

fn default_abares(preferred: &Path) -> PathBuf {
    if preferred.exists() {
        return preferred.to_path_buf();
    }
    let fallback = preferred.with_file_name(FALLBACK_ABARES);
    if fallback.exists() {
        fallback
    } else {
        preferred.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.abs_workbook, PathBuf::from(DEFAULT_ABS));
        assert_eq!(config.output_csv, PathBuf::from(DEFAULT_OUTPUT_CSV));
        assert_eq!(config.db_path, PathBuf::from(DEFAULT_DB_PATH));
        assert_eq!(config.registry_path, None);
        assert_eq!(config.reconcile_tolerance, 0.001);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("ABARES_WORKBOOK", "/tmp/acs.xlsx"),
            ("DB_PATH", "/tmp/out.db"),
            ("REGISTRY_PATH", "registry.json"),
            ("RECONCILE_TOLERANCE", "0.005"),
        ])
        .unwrap();
        assert_eq!(config.abares_workbook, PathBuf::from("/tmp/acs.xlsx"));
        assert_eq!(config.db_path, PathBuf::from("/tmp/out.db"));
        assert_eq!(config.registry_path, Some(PathBuf::from("registry.json")));
        assert_eq!(config.reconcile_tolerance, 0.005);
    }

    #[test]
    fn test_bad_tolerance_is_rejected() {
        assert!(config(&[("RECONCILE_TOLERANCE", "tight")]).is_err());
        assert!(config(&[("RECONCILE_TOLERANCE", "-0.1")]).is_err());
    }

    #[test]
    fn test_abares_falls_back_to_2017_edition() {
        let dir = tempfile::tempdir().unwrap();
        let preferred = dir.path().join("acs2018_dairy.xlsx");
        let fallback = dir.path().join(FALLBACK_ABARES);

        assert_eq!(default_abares(&preferred), preferred);
        std::fs::write(&fallback, b"").unwrap();
        assert_eq!(default_abares(&preferred), fallback);
        std::fs::write(&preferred, b"").unwrap();
        assert_eq!(default_abares(&preferred), preferred);
    }
}
