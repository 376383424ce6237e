use crate::models::{Market, PricePoint, StoredData};
use anyhow::{anyhow, Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

const STORED_DATA_VERSION: u32 = 2;
const MARKETS_PER_CHUNK: usize = 500;
const TOKENS_PER_CHUNK: usize = 200;

/// Index file for a chunked dataset directory. The collector writes
/// markets and price history in bounded pieces so a partial download
/// fails loudly instead of decoding to a truncated dataset.
#[derive(Debug, Serialize, Deserialize)]
struct DataManifest {
    version: u32,
    metadata: String,
    markets: Vec<String>,
    price_history: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct MetadataChunk {
    metadata: crate::models::CollectionMetadata,
}

#[derive(Serialize, Deserialize)]
struct MarketChunk {
    markets: Vec<Market>,
}

#[derive(Serialize, Deserialize)]
struct PriceHistoryChunk {
    price_history: Vec<(String, Vec<PricePoint>)>,
}

pub fn load(dir: &Path) -> Result<StoredData> {
    let manifest_path = dir.join("manifest.json");
    let manifest_file = File::open(&manifest_path).with_context(|| {
        format!(
            "Failed to open dataset manifest at {}",
            manifest_path.display()
        )
    })?;
    let manifest: DataManifest = serde_json::from_reader(BufReader::new(manifest_file))
        .context("Dataset manifest decode failed")?;

    if manifest.version != STORED_DATA_VERSION {
        return Err(anyhow!(
            "Dataset version mismatch (found {}, expected {})",
            manifest.version,
            STORED_DATA_VERSION
        ));
    }

    let metadata_chunk: MetadataChunk = read_chunk(dir, &manifest.metadata)?;

    let mut markets = Vec::new();
    for name in &manifest.markets {
        let chunk: MarketChunk = read_chunk(dir, name)?;
        markets.extend(chunk.markets);
    }

    let mut price_history = HashMap::new();
    for name in &manifest.price_history {
        let chunk: PriceHistoryChunk = read_chunk(dir, name)?;
        for (token_id, points) in chunk.price_history {
            price_history.insert(token_id, points);
        }
    }

    let data = StoredData {
        markets,
        price_history,
        metadata: metadata_chunk.metadata,
    };

    info!(
        "Loaded dataset from {}: {} markets, {} price points (collected {})",
        dir.display(),
        data.markets.len(),
        data.total_price_points(),
        data.metadata.collected_at
    );

    Ok(data)
}

pub fn save(data: &StoredData, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create dataset directory {}", dir.display()))?;

    write_chunk(
        dir,
        "metadata.bin",
        &MetadataChunk {
            metadata: data.metadata.clone(),
        },
    )?;

    let mut market_chunks = Vec::new();
    for (i, window) in data.markets.chunks(MARKETS_PER_CHUNK).enumerate() {
        let name = format!("markets-{:03}.bin", i);
        write_chunk(
            dir,
            &name,
            &MarketChunk {
                markets: window.to_vec(),
            },
        )?;
        market_chunks.push(name);
    }

    let mut entries: Vec<(String, Vec<PricePoint>)> = data
        .price_history
        .iter()
        .map(|(token_id, points)| (token_id.clone(), points.clone()))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut price_chunks = Vec::new();
    for (i, window) in entries.chunks(TOKENS_PER_CHUNK).enumerate() {
        let name = format!("prices-{:03}.bin", i);
        write_chunk(
            dir,
            &name,
            &PriceHistoryChunk {
                price_history: window.to_vec(),
            },
        )?;
        price_chunks.push(name);
    }

    let manifest = DataManifest {
        version: STORED_DATA_VERSION,
        metadata: "metadata.bin".to_string(),
        markets: market_chunks,
        price_history: price_chunks,
    };
    let manifest_path = dir.join("manifest.json");
    let manifest_file = File::create(&manifest_path).with_context(|| {
        format!(
            "Unable to create dataset manifest at {}",
            manifest_path.display()
        )
    })?;
    let mut writer = BufWriter::new(manifest_file);
    serde_json::to_writer_pretty(&mut writer, &manifest)
        .context("Failed to serialize dataset manifest")?;
    writer
        .flush()
        .context("Failed to flush dataset manifest to disk")?;

    info!(
        "Saved dataset to {}: {} markets, {} price points",
        dir.display(),
        data.markets.len(),
        data.total_price_points()
    );

    Ok(())
}

fn read_chunk<T: for<'de> Deserialize<'de>>(dir: &Path, name: &str) -> Result<T> {
    let path = dir.join(name);
    let file = File::open(&path)
        .with_context(|| format!("Failed to open dataset chunk {}", path.display()))?;
    bincode::deserialize_from(BufReader::new(file))
        .with_context(|| format!("Dataset chunk {} decode failed", name))
}

fn write_chunk<T: Serialize>(dir: &Path, name: &str, chunk: &T) -> Result<()> {
    let path = dir.join(name);
    let file = File::create(&path)
        .with_context(|| format!("Unable to create dataset chunk {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    bincode::serialize_into(&mut writer, chunk)
        .with_context(|| format!("Failed to serialize dataset chunk {}", name))?;
    writer
        .flush()
        .with_context(|| format!("Failed to flush dataset chunk {}", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CollectionMetadata, MarketToken};
    use chrono::Utc;

    fn sample_data() -> StoredData {
        let markets = vec![Market {
            condition_id: "cond-1".to_string(),
            question: "Will it resolve YES?".to_string(),
            description: String::new(),
            tokens: vec![
                MarketToken {
                    token_id: "tok-yes".to_string(),
                    outcome: "Yes".to_string(),
                    price: 0.6,
                    winner: false,
                },
                MarketToken {
                    token_id: "tok-no".to_string(),
                    outcome: "No".to_string(),
                    price: 0.4,
                    winner: false,
                },
            ],
            active: true,
            closed: false,
            end_date_iso: None,
            minimum_order_size: 5.0,
            tick_size: 0.01,
            neg_risk: false,
        }];

        let mut price_history = HashMap::new();
        price_history.insert(
            "tok-yes".to_string(),
            vec![
                PricePoint { t: 100, p: 0.55 },
                PricePoint { t: 200, p: 0.6 },
            ],
        );
        price_history.insert(
            "tok-no".to_string(),
            vec![PricePoint { t: 100, p: 0.45 }],
        );

        StoredData {
            markets,
            price_history,
            metadata: CollectionMetadata {
                collected_at: Utc::now(),
                version: "2.0.0".to_string(),
                total_markets: 1,
                total_price_points: 3,
            },
        }
    }

    #[test]
    fn roundtrips_through_chunked_directory() {
        let dir = tempfile::tempdir().unwrap();
        let data = sample_data();
        save(&data, dir.path()).unwrap();

        let loaded = load(dir.path()).unwrap();
        assert_eq!(loaded.markets.len(), 1);
        assert_eq!(loaded.markets[0].condition_id, "cond-1");
        assert_eq!(loaded.price_history["tok-yes"].len(), 2);
        assert_eq!(loaded.price_history["tok-no"][0].p, 0.45);
        assert_eq!(loaded.total_price_points(), 3);
    }

    #[test]
    fn rejects_version_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        save(&sample_data(), dir.path()).unwrap();

        let manifest_path = dir.path().join("manifest.json");
        let raw = fs::read_to_string(&manifest_path).unwrap();
        let mut manifest: serde_json::Value = serde_json::from_str(&raw).unwrap();
        manifest["version"] = serde_json::json!(1);
        fs::write(&manifest_path, manifest.to_string()).unwrap();

        assert!(load(dir.path()).is_err());
    }

    #[test]
    fn filter_timestamps_drops_empty_series() {
        let data = sample_data();
        let filtered = data.filter_timestamps(|t| t >= 150);
        assert_eq!(filtered.price_history.len(), 1);
        assert_eq!(filtered.price_history["tok-yes"].len(), 1);
        assert_eq!(filtered.metadata.total_price_points, 1);
    }
}
