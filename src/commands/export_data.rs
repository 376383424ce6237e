use crate::models::{CollectionMetadata, Market, MarketToken, PricePoint, StoredData};
use crate::stored_data;
use anyhow::Result;
use chrono::Utc;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::path::Path;

const SAMPLE_MARKETS: usize = 8;
const POINTS_PER_TOKEN: usize = 500;
const SAMPLE_INTERVAL_SECS: i64 = 3600;

/// Writes a synthetic dataset in the collector's chunked format, sized
/// for offline optimization runs when no collected snapshot is at hand.
pub fn run(output: &Path, seed: u64) -> Result<()> {
    info!("Generating sample dataset at {}", output.display());

    let mut rng = StdRng::seed_from_u64(seed);
    let start = Utc::now().timestamp() - POINTS_PER_TOKEN as i64 * SAMPLE_INTERVAL_SECS;

    let mut markets = Vec::new();
    let mut price_history = HashMap::new();
    for i in 0..SAMPLE_MARKETS {
        let condition_id = format!("sample-market-{:02}", i);
        let yes_id = format!("{}-yes", condition_id);
        let no_id = format!("{}-no", condition_id);

        let start_price = 0.2 + 0.6 * rng.gen::<f64>();
        let yes_series = random_walk(&mut rng, start, start_price);
        let no_series: Vec<PricePoint> = yes_series
            .iter()
            .map(|point| PricePoint {
                t: point.t,
                p: (1.0 - point.p).clamp(0.01, 0.99),
            })
            .collect();
        let last_yes = yes_series.last().map(|p| p.p).unwrap_or(0.5);

        markets.push(Market {
            condition_id: condition_id.clone(),
            question: format!("Sample market {}?", i),
            description: String::new(),
            tokens: vec![
                MarketToken {
                    token_id: yes_id.clone(),
                    outcome: "Yes".to_string(),
                    price: last_yes,
                    winner: false,
                },
                MarketToken {
                    token_id: no_id.clone(),
                    outcome: "No".to_string(),
                    price: 1.0 - last_yes,
                    winner: false,
                },
            ],
            active: true,
            closed: false,
            end_date_iso: None,
            minimum_order_size: 5.0,
            tick_size: 0.01,
            neg_risk: false,
        });
        price_history.insert(yes_id, yes_series);
        price_history.insert(no_id, no_series);
    }

    let total_price_points = price_history.values().map(Vec::len).sum();
    let data = StoredData {
        metadata: CollectionMetadata {
            collected_at: Utc::now(),
            version: "sample".to_string(),
            total_markets: markets.len(),
            total_price_points,
        },
        markets,
        price_history,
    };

    stored_data::save(&data, output)?;
    Ok(())
}

/// Bounded random walk in (0, 1) with a mild pull back to the start
/// price, which gives mean-reversion strategies something to trade.
fn random_walk(rng: &mut StdRng, start_ts: i64, start_price: f64) -> Vec<PricePoint> {
    let mut points = Vec::with_capacity(POINTS_PER_TOKEN);
    let mut price = start_price;
    for i in 0..POINTS_PER_TOKEN {
        let shock = (rng.gen::<f64>() - 0.5) * 0.04;
        let pull = (start_price - price) * 0.02;
        price = (price + shock + pull).clamp(0.01, 0.99);
        points.push(PricePoint {
            t: start_ts + i as i64 * SAMPLE_INTERVAL_SECS,
            p: price,
        });
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_dataset_round_trips_and_stays_in_bounds() {
        let dir = tempfile::tempdir().unwrap();
        run(dir.path(), 7).unwrap();

        let data = stored_data::load(dir.path()).unwrap();
        assert_eq!(data.markets.len(), SAMPLE_MARKETS);
        assert_eq!(data.price_history.len(), SAMPLE_MARKETS * 2);
        for points in data.price_history.values() {
            assert_eq!(points.len(), POINTS_PER_TOKEN);
            assert!(points.iter().all(|p| p.p > 0.0 && p.p < 1.0));
            assert!(points.windows(2).all(|w| w[0].t < w[1].t));
        }

        // Each market draws its own start price before its walk.
        let first_prices: Vec<f64> = data
            .price_history
            .iter()
            .filter(|(token_id, _)| token_id.ends_with("-yes"))
            .map(|(_, points)| points[0].p)
            .collect();
        assert!(first_prices
            .iter()
            .any(|&p| (p - first_prices[0]).abs() > 1e-9));
    }

    #[test]
    fn same_seed_produces_the_same_dataset() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        run(a.path(), 42).unwrap();
        run(b.path(), 42).unwrap();

        let left = stored_data::load(a.path()).unwrap();
        let right = stored_data::load(b.path()).unwrap();
        for (token_id, points) in &left.price_history {
            let other = &right.price_history[token_id];
            assert_eq!(points.len(), other.len());
            for (p, q) in points.iter().zip(other.iter()) {
                assert_eq!(p.t, q.t);
                assert_eq!(p.p, q.p);
            }
        }
    }
}
