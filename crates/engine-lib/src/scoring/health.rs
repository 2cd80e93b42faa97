//! Composite health scoring

use super::*;
use crate::models::{finite, EntitySeries, MetricSnapshot};

/// Weighted composite health scorer
#[derive(Debug, Clone)]
pub struct HealthScorer {
    config: ScoringConfig,
}

impl HealthScorer {
    pub fn new(config: ScoringConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score a snapshot. Metrics missing from the snapshot are left out and
    /// the remaining weights renormalised.
    pub fn score(&self, snapshot: &MetricSnapshot) -> EngineResult<HealthScore> {
        let mut weighted = 0.0;
        let mut weight_sum = 0.0;
        let mut risk_factors = Vec::new();
        let mut component_scores = BTreeMap::new();

        for (metric, threshold) in &self.config.metrics {
            let Some(value) = snapshot.get(*metric) else {
                continue;
            };
            let s = threshold.score(value);
            weighted += threshold.weight * s;
            weight_sum += threshold.weight;
            component_scores.insert(*metric, s);
            if s < 0.5 {
                risk_factors.push(*metric);
            }
        }

        if weight_sum <= 0.0 {
            return Err(EngineError::data_unavailable(format!(
                "no scorable metrics for {}",
                snapshot.entity_id
            )));
        }

        let score = finite(weighted / weight_sum * 100.0).clamp(0.0, 100.0);
        Ok(HealthScore {
            entity_id: snapshot.entity_id.clone(),
            timestamp: snapshot.timestamp,
            score,
            risk_level: RiskLevel::from_score(score),
            risk_factors,
            component_scores,
        })
    }

    /// Score every timestamp of the entity, carrying the last observed value
    /// of each metric forward
    pub fn score_timeline(&self, entity: &EntitySeries) -> Vec<HealthPoint> {
        let mut cursors: Vec<(MetricName, usize, Option<f64>)> = self
            .config
            .metrics
            .keys()
            .filter(|m| entity.get(**m).is_some())
            .map(|m| (*m, 0, None))
            .collect();

        let mut timeline = Vec::new();
        for ts in entity.timestamps() {
            let mut snapshot = MetricSnapshot::new(entity.entity_id.clone(), ts);
            for (metric, idx, last) in cursors.iter_mut() {
                let Some(series) = entity.get(*metric) else {
                    continue;
                };
                let samples = series.samples();
                while *idx < samples.len() && samples[*idx].timestamp <= ts {
                    if let Some(v) = samples[*idx].value {
                        *last = Some(v);
                    }
                    *idx += 1;
                }
                if let Some(v) = last {
                    snapshot = snapshot.with_value(*metric, *v);
                }
            }
            if let Ok(score) = self.score(&snapshot) {
                timeline.push(HealthPoint {
                    timestamp: ts,
                    score: score.score,
                    risk_factors: score.risk_factors,
                });
            }
        }
        timeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricSeries;
    use chrono::{Duration, TimeZone};

    fn scorer() -> HealthScorer {
        HealthScorer::new(ScoringConfig::default()).unwrap()
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 8, 12, 0, 0).unwrap()
    }

    fn snapshot(consent: f64, fetch: f64, response: f64, errors: f64, status: f64) -> MetricSnapshot {
        MetricSnapshot::new("hdfc", ts())
            .with_value(MetricName::ConsentSuccessRate, consent)
            .with_value(MetricName::DataFetchSuccessRate, fetch)
            .with_value(MetricName::ResponseTime, response)
            .with_value(MetricName::ErrorRate, errors)
            .with_value(MetricName::Status, status)
    }

    #[test]
    fn test_all_metrics_at_warning_scores_100() {
        let score = scorer().score(&snapshot(85.0, 90.0, 3.0, 5.0, 0.8)).unwrap();
        assert_eq!(score.score, 100.0);
        assert_eq!(score.risk_level, RiskLevel::Low);
        assert!(score.risk_factors.is_empty());
    }

    #[test]
    fn test_all_metrics_at_critical_scores_0() {
        let score = scorer().score(&snapshot(70.0, 75.0, 5.0, 10.0, 0.5)).unwrap();
        assert_eq!(score.score, 0.0);
        assert_eq!(score.risk_level, RiskLevel::Critical);
        assert_eq!(score.risk_factors.len(), 5);
    }

    #[test]
    fn test_score_bounded_for_extreme_values() {
        let best = scorer().score(&snapshot(100.0, 100.0, 0.0, 0.0, 1.0)).unwrap();
        let worst = scorer().score(&snapshot(0.0, 0.0, 60.0, 100.0, 0.0)).unwrap();
        assert_eq!(best.score, 100.0);
        assert_eq!(worst.score, 0.0);
    }

    #[test]
    fn test_partial_snapshot_renormalises() {
        let snap = MetricSnapshot::new("hdfc", ts())
            .with_value(MetricName::ConsentSuccessRate, 77.5)
            .with_value(MetricName::Status, 1.0);
        let score = scorer().score(&snap).unwrap();
        // (0.25 * 0.5 + 0.15 * 1.0) / 0.40
        assert!((score.score - 68.75).abs() < 1e-9);
        assert_eq!(score.risk_factors, Vec::<MetricName>::new());
    }

    #[test]
    fn test_empty_snapshot_is_unavailable() {
        let snap = MetricSnapshot::new("hdfc", ts());
        assert!(matches!(
            scorer().score(&snap),
            Err(EngineError::DataUnavailable(_))
        ));
    }

    #[test]
    fn test_timeline_carries_values_forward() {
        let start = ts();
        let entity = EntitySeries::new("hdfc")
            .with_series(MetricSeries::from_values(
                "hdfc",
                MetricName::ConsentSuccessRate,
                start,
                Duration::hours(1),
                &[95.0, f64::NAN, 20.0],
            ))
            .with_series(MetricSeries::from_values(
                "hdfc",
                MetricName::Status,
                start,
                Duration::hours(2),
                &[1.0, 1.0],
            ));
        let timeline = scorer().score_timeline(&entity);
        assert_eq!(timeline.len(), 3);
        assert_eq!(timeline[0].score, 100.0);
        // Consent missing at t+1h, previous value carried forward
        assert_eq!(timeline[1].score, 100.0);
        assert!(timeline[2].score < 50.0);
        assert_eq!(timeline[2].risk_factors, vec![MetricName::ConsentSuccessRate]);
    }
}
