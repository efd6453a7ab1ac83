//! Tabular (CSV) and relational (SQLite) sinks.
//!
//! Both artifacts are written next to their published paths under a
//! `.staging` name and only renamed into place once both are complete, so a
//! failed run leaves the previous dataset untouched.

use anyhow::{Context, Result};
use harmonizer::registry::Granularity;
use harmonizer::{Dataset, Observation, ObservationKey, Registry};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Relational schema. `provenance` and `unit_conversions` rows belong to
/// their observation and are deleted with it.
const SCHEMA: &[&str] = &[
    "CREATE TABLE states (
        state_code TEXT PRIMARY KEY,
        state_name TEXT NOT NULL,
        is_aggregate INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE variable_definitions (
        variable_id TEXT PRIMARY KEY,
        category TEXT NOT NULL,
        variable_name TEXT NOT NULL,
        unit TEXT NOT NULL,
        description TEXT,
        granularity TEXT NOT NULL
    )",
    "CREATE TABLE observations (
        id INTEGER PRIMARY KEY,
        variable_id TEXT NOT NULL REFERENCES variable_definitions(variable_id),
        state_code TEXT NOT NULL REFERENCES states(state_code),
        year INTEGER NOT NULL,
        year_type TEXT NOT NULL,
        value REAL NOT NULL,
        original_value REAL NOT NULL,
        original_unit TEXT NOT NULL,
        confidence TEXT NOT NULL,
        notes TEXT,
        UNIQUE (variable_id, state_code, year, year_type)
    )",
    "CREATE TABLE provenance (
        id INTEGER PRIMARY KEY,
        observation_id INTEGER NOT NULL REFERENCES observations(id) ON DELETE CASCADE,
        source_name TEXT NOT NULL,
        source_type TEXT NOT NULL,
        source_url TEXT,
        source_page TEXT,
        extraction_method TEXT NOT NULL,
        extraction_date TEXT,
        notes TEXT
    )",
    "CREATE TABLE unit_conversions (
        id INTEGER PRIMARY KEY,
        observation_id INTEGER NOT NULL REFERENCES observations(id) ON DELETE CASCADE,
        from_unit TEXT NOT NULL,
        to_unit TEXT NOT NULL,
        conversion_factor REAL NOT NULL,
        notes TEXT
    )",
    "CREATE VIEW observations_full AS
     SELECT o.year, o.year_type, s.state_name, o.state_code, v.category,
            v.variable_id, v.variable_name, o.value, v.unit, o.confidence,
            o.original_value, o.original_unit, o.notes
     FROM observations o
     JOIN variable_definitions v ON o.variable_id = v.variable_id
     JOIN states s ON o.state_code = s.state_code",
];

// =============================================================================
// CSV
// =============================================================================

/// One row per observation, columns in `Observation` field order.
pub fn render_csv(observations: &[Observation]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for obs in observations {
        writer
            .serialize(obs)
            .with_context(|| format!("Failed to serialize observation {}", obs.key()))?;
    }
    writer.into_inner().context("Failed to flush CSV buffer")
}

/// Whether `published` already holds exactly `rendered`.
pub async fn csv_matches(published: &Path, rendered: &[u8]) -> Result<bool> {
    let existing = fs::read(published)
        .await
        .with_context(|| format!("Failed to read published CSV {}", published.display()))?;
    Ok(existing == rendered)
}

// =============================================================================
// SQLite
// =============================================================================

pub async fn open(path: &Path, create: bool) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Delete);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", path.display()))
}

/// Creates the schema in an empty database and loads the dataset in one
/// transaction.
pub async fn load_database(
    pool: &SqlitePool,
    dataset: &Dataset,
    registry: &Registry,
) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("Failed to create schema")?;
    }

    let mut tx = pool.begin().await?;

    for state in registry.states() {
        sqlx::query("INSERT INTO states (state_code, state_name, is_aggregate) VALUES (?, ?, ?)")
            .bind(state.as_str())
            .bind(state.name())
            .bind(state.is_aggregate())
            .execute(&mut *tx)
            .await?;
    }

    for def in registry.variables() {
        let granularity = match def.granularity {
            Granularity::National => "national",
            Granularity::StateAndNational => "state_and_national",
        };
        sqlx::query(
            "INSERT INTO variable_definitions (variable_id, category, variable_name, unit, description, granularity)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&def.variable_id)
        .bind(def.category.as_str())
        .bind(&def.name)
        .bind(def.unit.as_str())
        .bind(&def.description)
        .bind(granularity)
        .execute(&mut *tx)
        .await?;
    }

    let mut ids: HashMap<ObservationKey, i64> = HashMap::with_capacity(dataset.observations.len());
    for obs in &dataset.observations {
        let id = sqlx::query(
            "INSERT INTO observations
                (variable_id, state_code, year, year_type, value, original_value, original_unit, confidence, notes)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&obs.variable_id)
        .bind(obs.state_code.as_str())
        .bind(obs.year)
        .bind(obs.year_type.as_str())
        .bind(obs.value)
        .bind(obs.original_value)
        .bind(&obs.original_unit)
        .bind(obs.confidence.as_str())
        .bind(&obs.notes)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to insert observation {}", obs.key()))?
        .last_insert_rowid();
        ids.insert(obs.key(), id);
    }

    for record in &dataset.provenance {
        let observation_id = ids
            .get(&record.key)
            .with_context(|| format!("Provenance for unknown observation {}", record.key))?;
        sqlx::query(
            "INSERT INTO provenance
                (observation_id, source_name, source_type, source_url, source_page, extraction_method, extraction_date, notes)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(observation_id)
        .bind(&record.source_name)
        .bind(record.source_type.as_str())
        .bind(&record.source_url)
        .bind(&record.source_page)
        .bind(record.extraction_method.as_str())
        .bind(record.extraction_date)
        .bind(&record.notes)
        .execute(&mut *tx)
        .await?;
    }

    for record in &dataset.conversions {
        let observation_id = ids
            .get(&record.key)
            .with_context(|| format!("Unit conversion for unknown observation {}", record.key))?;
        sqlx::query(
            "INSERT INTO unit_conversions (observation_id, from_unit, to_unit, conversion_factor, notes)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(observation_id)
        .bind(&record.from_unit)
        .bind(record.to_unit.as_str())
        .bind(record.conversion_factor)
        .bind(&record.notes)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    debug!(
        observations = dataset.observations.len(),
        provenance = dataset.provenance.len(),
        conversions = dataset.conversions.len(),
        "loaded database"
    );
    Ok(())
}

// =============================================================================
// Staged publish
// =============================================================================

fn staging_path(target: &Path) -> Result<PathBuf> {
    let name = target
        .file_name()
        .with_context(|| format!("Output path has no file name: {}", target.display()))?;
    let mut staged = name.to_os_string();
    staged.push(".staging");
    Ok(target.with_file_name(staged))
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

/// The previous database is kept under this name until the CSV is published.
fn backup_path(target: &Path) -> Result<PathBuf> {
    let name = target
        .file_name()
        .with_context(|| format!("Output path has no file name: {}", target.display()))?;
    let mut backup = name.to_os_string();
    backup.push(".previous");
    Ok(target.with_file_name(backup))
}

/// Returns whether `from` existed.
async fn rename_if_exists(from: &Path, to: &Path) -> Result<bool> {
    match fs::rename(from, to).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to move {} aside", from.display())),
    }
}

/// Both artifacts written and closed, not yet visible at their published paths.
#[derive(Debug)]
pub struct Staged {
    csv: PathBuf,
    csv_target: PathBuf,
    db: PathBuf,
    db_target: PathBuf,
}

impl Staged {
    /// Renames both staged files over the published ones. If the CSV cannot
    /// be published the previous database is put back, so the two published
    /// files always come from the same run.
    pub async fn commit(self) -> Result<()> {
        let backup = backup_path(&self.db_target)?;
        if let Err(e) = remove_if_exists(&backup).await {
            self.discard().await;
            return Err(e);
        }
        let had_previous = match rename_if_exists(&self.db_target, &backup).await {
            Ok(existed) => existed,
            Err(e) => {
                self.discard().await;
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&self.db, &self.db_target).await {
            self.restore_db(had_previous, &backup).await;
            self.discard().await;
            let target = self.db_target.display();
            return Err(e).with_context(|| format!("Failed to publish {target}"));
        }
        if let Err(e) = fs::rename(&self.csv, &self.csv_target).await {
            self.restore_db(had_previous, &backup).await;
            self.discard().await;
            let target = self.csv_target.display();
            return Err(e).with_context(|| format!("Failed to publish {target}"));
        }

        remove_if_exists(&backup).await?;
        info!(
            csv = %self.csv_target.display(),
            db = %self.db_target.display(),
            "published dataset"
        );
        Ok(())
    }

    async fn restore_db(&self, had_previous: bool, backup: &Path) {
        let restored = if had_previous {
            fs::rename(backup, &self.db_target)
                .await
                .with_context(|| format!("Failed to restore {}", self.db_target.display()))
        } else {
            remove_if_exists(&self.db_target).await
        };
        if let Err(e) = restored {
            warn!(error = %e, db = %self.db_target.display(), "previous database not restored");
        }
    }

    /// Removes whatever staged files exist. Failures are logged; the caller
    /// is already reporting the error that caused the discard.
    async fn discard(&self) {
        for path in [&self.csv, &self.db] {
            if let Err(e) = remove_if_exists(path).await {
                warn!(error = %e, path = %path.display(), "staged file left behind");
            }
        }
    }
}

async fn write_staged(
    staged: &Staged,
    dataset: &Dataset,
    registry: &Registry,
    csv: &[u8],
) -> Result<()> {
    fs::write(&staged.csv, csv)
        .await
        .with_context(|| format!("Failed to write {}", staged.csv.display()))?;

    remove_if_exists(&staged.db).await?;
    let pool = open(&staged.db, true).await?;
    let loaded = load_database(&pool, dataset, registry).await;
    pool.close().await;
    loaded
}

/// Writes the CSV and builds the database under staging names. On any error
/// the staged files are removed and the published ones are not touched.
pub async fn stage(
    dataset: &Dataset,
    registry: &Registry,
    csv: &[u8],
    csv_target: &Path,
    db_target: &Path,
) -> Result<Staged> {
    let staged = Staged {
        csv: staging_path(csv_target)?,
        csv_target: csv_target.to_path_buf(),
        db: staging_path(db_target)?,
        db_target: db_target.to_path_buf(),
    };
    ensure_parent(csv_target).await?;
    ensure_parent(db_target).await?;

    if let Err(e) = write_staged(&staged, dataset, registry, csv).await {
        staged.discard().await;
        return Err(e);
    }
    Ok(staged)
}

// =============================================================================
// Summary
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CategorySummary {
    pub category: String,
    pub observations: i64,
    pub first_year: i64,
    pub last_year: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub total: i64,
    pub by_category: Vec<CategorySummary>,
    pub by_state: Vec<(String, i64)>,
    pub by_confidence: Vec<(String, i64)>,
}

pub async fn summary(pool: &SqlitePool) -> Result<Summary> {
    let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM observations")
        .fetch_one(pool)
        .await?;

    let by_category = sqlx::query_as::<_, (String, i64, i64, i64)>(
        "SELECT v.category, COUNT(*), MIN(o.year), MAX(o.year)
         FROM observations o
         JOIN variable_definitions v ON o.variable_id = v.variable_id
         GROUP BY v.category ORDER BY v.category",
    )
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|(category, observations, first_year, last_year)| CategorySummary {
        category,
        observations,
        first_year,
        last_year,
    })
    .collect();

    let by_state: Vec<(String, i64)> = sqlx::query_as(
        "SELECT state_code, COUNT(*) FROM observations GROUP BY state_code ORDER BY state_code",
    )
    .fetch_all(pool)
    .await?;

    let by_confidence: Vec<(String, i64)> = sqlx::query_as(
        "SELECT confidence, COUNT(*) FROM observations GROUP BY confidence ORDER BY confidence",
    )
    .fetch_all(pool)
    .await?;

    Ok(Summary {
        total,
        by_category,
        by_state,
        by_confidence,
    })
}
