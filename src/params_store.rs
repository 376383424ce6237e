use anyhow::{Context, Result};
use chrono::Utc;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::optimization::HistoryEntry;

/// Optimized parameters for one strategy, persisted as flat JSON so the
/// files stay hand-editable. The metadata block records where the values
/// came from; it is stripped before the params reach a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedParams {
    #[serde(flatten)]
    pub params: HashMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ParamsMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamsMetadata {
    pub best_score: f64,
    pub algorithm: String,
    pub iterations: usize,
    pub optimized_at: String,
}

fn params_path(dir: &Path, strategy_id: &str) -> PathBuf {
    dir.join(format!("{}.json", strategy_id))
}

fn history_path(dir: &Path, strategy_id: &str) -> PathBuf {
    dir.join(format!("{}_history.json", strategy_id))
}

/// Loads saved params for a strategy. Missing or malformed files are
/// treated as "nothing saved" so a stale file never blocks a run.
pub fn load(dir: &Path, strategy_id: &str) -> Option<SavedParams> {
    let path = params_path(dir, strategy_id);
    let raw = fs::read_to_string(&path).ok()?;
    match serde_json::from_str::<SavedParams>(&raw) {
        Ok(saved) => Some(saved),
        Err(e) => {
            warn!("Ignoring malformed params file {}: {}", path.display(), e);
            None
        }
    }
}

pub fn save(
    dir: &Path,
    strategy_id: &str,
    params: &HashMap<String, f64>,
    metadata: ParamsMetadata,
) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create params directory {}", dir.display()))?;
    let saved = SavedParams {
        params: params.clone(),
        metadata: Some(metadata),
    };
    let path = params_path(dir, strategy_id);
    let json = serde_json::to_string_pretty(&saved)?;
    fs::write(&path, json)
        .with_context(|| format!("Failed to write params to {}", path.display()))?;
    Ok(())
}

pub fn save_history(dir: &Path, strategy_id: &str, history: &[HistoryEntry]) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create params directory {}", dir.display()))?;
    let path = history_path(dir, strategy_id);
    let json = serde_json::to_string_pretty(history)?;
    fs::write(&path, json)
        .with_context(|| format!("Failed to write history to {}", path.display()))?;
    Ok(())
}

pub fn metadata_now(algorithm: &str, best_score: f64, iterations: usize) -> ParamsMetadata {
    ParamsMetadata {
        best_score,
        algorithm: algorithm.to_string(),
        iterations,
        optimized_at: Utc::now().to_rfc3339(),
    }
}

/// Defaults, then saved values, then explicit overrides. Keys unknown to
/// the strategy are dropped so old files survive parameter renames.
pub fn merge_params(
    defaults: &HashMap<String, f64>,
    saved: Option<&SavedParams>,
    overrides: &HashMap<String, f64>,
) -> HashMap<String, f64> {
    let mut merged = defaults.clone();
    if let Some(saved) = saved {
        for (key, value) in &saved.params {
            if merged.contains_key(key) {
                merged.insert(key.clone(), *value);
            } else {
                warn!("Ignoring unknown saved param '{}'", key);
            }
        }
    }
    for (key, value) in overrides {
        if merged.contains_key(key) {
            merged.insert(key.clone(), *value);
        } else {
            warn!("Ignoring unknown override param '{}'", key);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn defaults() -> HashMap<String, f64> {
        HashMap::from([
            ("entry_below".to_string(), 0.15),
            ("risk_percent".to_string(), 0.1),
        ])
    }

    #[test]
    fn save_then_load_round_trips_params_and_metadata() {
        let dir = TempDir::new().unwrap();
        let params = defaults();
        save(
            dir.path(),
            "threshold",
            &params,
            metadata_now("grid", 1.25, 9),
        )
        .unwrap();

        let loaded = load(dir.path(), "threshold").unwrap();
        assert_eq!(loaded.params["entry_below"], 0.15);
        assert_eq!(loaded.params["risk_percent"], 0.1);
        let meta = loaded.metadata.unwrap();
        assert_eq!(meta.algorithm, "grid");
        assert_eq!(meta.best_score, 1.25);
        assert_eq!(meta.iterations, 9);
    }

    #[test]
    fn missing_and_malformed_files_load_as_none() {
        let dir = TempDir::new().unwrap();
        assert!(load(dir.path(), "threshold").is_none());

        fs::write(dir.path().join("threshold.json"), "not json").unwrap();
        assert!(load(dir.path(), "threshold").is_none());
    }

    #[test]
    fn merge_filters_unknown_keys_and_applies_overrides_last() {
        let saved = SavedParams {
            params: HashMap::from([
                ("entry_below".to_string(), 0.2),
                ("retired_param".to_string(), 42.0),
            ]),
            metadata: None,
        };
        let overrides = HashMap::from([
            ("risk_percent".to_string(), 0.25),
            ("bogus".to_string(), 1.0),
        ]);

        let merged = merge_params(&defaults(), Some(&saved), &overrides);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["entry_below"], 0.2);
        assert_eq!(merged["risk_percent"], 0.25);
    }

    #[test]
    fn history_serializes_to_json() {
        let dir = TempDir::new().unwrap();
        let history = vec![HistoryEntry {
            iteration: 0,
            params: defaults(),
            score: 0.5,
        }];
        save_history(dir.path(), "threshold", &history).unwrap();

        let raw = fs::read_to_string(dir.path().join("threshold_history.json")).unwrap();
        let parsed: Vec<HistoryEntry> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].score, 0.5);
    }
}
