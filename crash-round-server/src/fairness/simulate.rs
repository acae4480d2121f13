//! Offline distribution check: run the generator many times and summarise.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;

use crate::core::money::Multiplier;
use crate::error::{GameError, GameResult};
use crate::fairness::generator::{CrashCurve, CrashPointGenerator};

/// Bucket edges in whole multiples; the last bucket is open-ended.
const BUCKETS: [(u64, Option<u64>, &str); 8] = [
    (1, Some(2), "1-2x"),
    (2, Some(3), "2-3x"),
    (3, Some(5), "3-5x"),
    (5, Some(10), "5-10x"),
    (10, Some(20), "10-20x"),
    (20, Some(50), "20-50x"),
    (50, Some(100), "50-100x"),
    (100, None, "100x+"),
];

/// Share of rounds crashing inside one range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionBucket {
    pub label: &'static str,
    pub count: u64,
    /// Percentage of all rounds, two decimals.
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationStatistics {
    pub average: f64,
    pub median: Multiplier,
    pub min: Multiplier,
    pub max: Multiplier,
    pub variance: f64,
    pub standard_deviation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub num_rounds: usize,
    pub distribution: Vec<DistributionBucket>,
    /// Sorted ascending.
    pub crash_points: Vec<Multiplier>,
    pub statistics: SimulationStatistics,
}

/// Play `num_rounds` rounds with fresh server seeds.
///
/// Without a client seed a random one is drawn once and shared by all rounds.
pub fn simulate_rounds(num_rounds: usize, client_seed: Option<&str>, curve: &CrashCurve) -> GameResult<SimulationReport> {
    if num_rounds == 0 {
        return Err(GameError::Validation("Number of rounds must be a positive integer".into()));
    }

    let client_seed = match client_seed {
        Some(seed) if !seed.trim().is_empty() => seed.to_string(),
        _ => {
            let mut bytes = [0u8; 32];
            OsRng.fill_bytes(&mut bytes);
            hex::encode(bytes)
        }
    };

    let mut generator = CrashPointGenerator::new(*curve);
    let mut crash_points = Vec::with_capacity(num_rounds);
    for _ in 0..num_rounds {
        generator.generate_server_seed();
        generator.generate_game_hash(&client_seed)?;
        crash_points.push(generator.calculate_crash_point()?.final_crash_point);
    }
    crash_points.sort_unstable();

    Ok(SimulationReport {
        num_rounds,
        distribution: distribution(&crash_points),
        statistics: statistics(&crash_points),
        crash_points,
    })
}

fn distribution(sorted: &[Multiplier]) -> Vec<DistributionBucket> {
    let total = sorted.len().max(1) as f64;
    BUCKETS
        .iter()
        .map(|&(min, max, label)| {
            let lo = Multiplier::from_whole(min);
            let count = sorted
                .iter()
                .filter(|&&m| m >= lo && max.map_or(true, |hi| m < Multiplier::from_whole(hi)))
                .count() as u64;
            DistributionBucket {
                label,
                count,
                percent: round2(count as f64 * 100.0 / total),
            }
        })
        .collect()
}

fn statistics(sorted: &[Multiplier]) -> SimulationStatistics {
    let n = sorted.len().max(1) as f64;
    let values: Vec<f64> = sorted.iter().map(|m| m.to_decimal()).collect();
    let average = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - average).powi(2)).sum::<f64>() / n;

    SimulationStatistics {
        average: round2(average),
        median: sorted.get(sorted.len() / 2).copied().unwrap_or_default(),
        min: sorted.first().copied().unwrap_or_default(),
        max: sorted.last().copied().unwrap_or_default(),
        variance: round2(variance),
        standard_deviation: round2(variance.sqrt()),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero_rounds() {
        assert!(matches!(
            simulate_rounds(0, None, &CrashCurve::default()),
            Err(GameError::Validation(_))
        ));
    }

    #[test]
    fn test_report_shape() {
        let report = simulate_rounds(500, Some("family"), &CrashCurve::default()).unwrap();
        assert_eq!(report.num_rounds, 500);
        assert_eq!(report.crash_points.len(), 500);
        assert!(report.crash_points.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(report.distribution.iter().map(|b| b.count).sum::<u64>(), 500);
        assert!(report.statistics.min >= Multiplier::ONE);
        assert!(report.statistics.min <= report.statistics.median);
        assert!(report.statistics.median <= report.statistics.max);
    }

    #[test]
    fn test_distribution_buckets() {
        let points = [
            Multiplier::from_hundredths(100),
            Multiplier::from_hundredths(199),
            Multiplier::from_hundredths(200),
            Multiplier::from_whole(150),
        ];
        let buckets = distribution(&points);
        assert_eq!(buckets[0].count, 2);
        assert_eq!(buckets[0].percent, 50.0);
        assert_eq!(buckets[1].count, 1);
        assert_eq!(buckets[7].count, 1);
    }

    #[test]
    fn test_statistics() {
        let points = [Multiplier::from_whole(1), Multiplier::from_whole(2), Multiplier::from_whole(3)];
        let stats = statistics(&points);
        assert_eq!(stats.average, 2.0);
        assert_eq!(stats.median, Multiplier::from_whole(2));
        assert_eq!(stats.variance, 0.67);
    }
}
