//! Per-entity feature calculation

use super::stats::{
    coefficient_of_variation, kurtosis, linear_regression_slope, mean, pearson, quantile,
    skewness, sorted, std_dev, trailing_mean,
};
use super::*;
use crate::models::{finite, is_weekend, EntitySeries, MetricSeries};
use chrono::Timelike;
use std::collections::BTreeMap;
use tracing::debug;

/// Extracts a [`FeatureSet`] from one entity's series
#[derive(Debug, Clone)]
pub struct FeatureCalculator {
    config: FeatureConfig,
}

impl FeatureCalculator {
    pub fn new(config: FeatureConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn calculate(&self, entity: &EntitySeries) -> FeatureSet {
        let mut features = FeatureSet::empty(entity.entity_id.clone());

        for series in entity.series() {
            let metric = series.metric;
            features
                .data_quality
                .insert(metric, Self::data_quality(series));

            let values = series.values();
            if let Some(s) = Self::statistical(&values) {
                features.statistical.insert(metric, s);
            }
            if let Some(t) = Self::trend(&values) {
                features.trend.insert(metric, t);
            }
            if let Some(p) = Self::pattern(series) {
                features.pattern.insert(metric, p);
            }
            if let Some(a) = self.anomalies(&values) {
                features.anomaly.insert(metric, a);
            }
        }

        features.performance = self.performance(entity);
        features.stability = Self::stability(entity);

        debug!(
            entity_id = %entity.entity_id,
            metrics = features.data_quality.len(),
            anomalous_metrics = features.anomaly.values().filter(|a| a.total_anomalies > 0).count(),
            "Features calculated"
        );

        features
    }

    pub fn data_quality(series: &MetricSeries) -> DataQuality {
        let total = series.len();
        let missing = series.missing_count();
        let samples = series.samples();
        let (span_hours, avg_interval_minutes) = match (samples.first(), samples.last()) {
            (Some(first), Some(last)) if total > 1 => {
                let span_secs = (last.timestamp - first.timestamp).num_seconds() as f64;
                (span_secs / 3600.0, span_secs / (total - 1) as f64 / 60.0)
            }
            _ => (0.0, 0.0),
        };

        DataQuality {
            total_points: total,
            missing_values: missing,
            missing_percentage: if total == 0 {
                0.0
            } else {
                missing as f64 / total as f64 * 100.0
            },
            data_span_hours: span_hours,
            avg_interval_minutes,
        }
    }

    pub fn statistical(values: &[f64]) -> Option<StatisticalFeatures> {
        if values.is_empty() {
            return None;
        }
        let sorted_values = sorted(values);
        Some(StatisticalFeatures {
            mean: mean(values),
            median: quantile(&sorted_values, 0.5),
            std: std_dev(values),
            min: sorted_values[0],
            max: sorted_values[sorted_values.len() - 1],
            p25: quantile(&sorted_values, 0.25),
            p75: quantile(&sorted_values, 0.75),
            p95: quantile(&sorted_values, 0.95),
            skewness: finite(skewness(values)),
            kurtosis: finite(kurtosis(values)),
            coefficient_of_variation: finite(coefficient_of_variation(values)),
        })
    }

    pub fn trend(values: &[f64]) -> Option<TrendFeatures> {
        let n = values.len();
        if n < 2 {
            return None;
        }
        let slope = finite(linear_regression_slope(values));

        let split = n / 2;
        let historical = mean(&values[..split]);
        let recent = mean(&values[split..]);
        let change = if historical != 0.0 {
            (recent - historical) / historical * 100.0
        } else {
            0.0
        };

        let short = trailing_mean(values, 6.min(split));
        let long = trailing_mean(values, 12.min(split));
        let crossover = matches!((short, long), (Some(s), Some(l)) if s > l);

        Some(TrendFeatures {
            slope,
            direction: TrendDirection::from_slope(slope),
            recent_vs_historical_change_pct: finite(change),
            trend_strength: slope.abs(),
            moving_avg_crossover: crossover,
        })
    }

    pub fn pattern(series: &MetricSeries) -> Option<PatternFeatures> {
        let mut by_hour: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
        let mut weekend = Vec::new();
        let mut weekday = Vec::new();
        for (ts, v) in series.observations() {
            by_hour.entry(ts.hour()).or_default().push(v);
            if is_weekend(&ts) {
                weekend.push(v);
            } else {
                weekday.push(v);
            }
        }
        if by_hour.is_empty() {
            return None;
        }

        let hourly_means: Vec<(u32, f64)> = by_hour.iter().map(|(h, v)| (*h, mean(v))).collect();
        let mut peak = hourly_means[0];
        let mut low = hourly_means[0];
        for &(hour, m) in &hourly_means[1..] {
            if m > peak.1 {
                peak = (hour, m);
            }
            if m < low.1 {
                low = (hour, m);
            }
        }

        let means: Vec<f64> = hourly_means.iter().map(|(_, m)| *m).collect();
        let means_mean = mean(&means);
        let means_std = std_dev(&means);
        let variation = if means_mean != 0.0 {
            means_std / means_mean
        } else {
            0.0
        };

        let weekday_mean = mean(&weekday);
        let ratio = if !weekend.is_empty() && !weekday.is_empty() && weekday_mean != 0.0 {
            mean(&weekend) / weekday_mean
        } else {
            1.0
        };

        let mut most_stable: Option<(u32, f64)> = None;
        for (hour, v) in by_hour.iter().filter(|(_, v)| v.len() > 1) {
            let s = std_dev(v);
            if most_stable.map_or(true, |(_, best)| s < best) {
                most_stable = Some((*hour, s));
            }
        }

        Some(PatternFeatures {
            peak_hour: peak.0,
            low_hour: low.0,
            hourly_variation_coefficient: finite(variation),
            weekend_vs_weekday_ratio: finite(ratio),
            has_clear_daily_pattern: means.len() > 1 && means_std > means_mean * 0.1,
            most_stable_hour: most_stable.map_or(0, |(h, _)| h),
        })
    }

    /// Anomaly features at the configured z threshold
    pub fn anomalies(&self, values: &[f64]) -> Option<AnomalyFeatures> {
        self.anomalies_at(values, self.config.z_threshold)
    }

    /// Anomaly features at an explicit z threshold
    pub fn anomalies_at(&self, values: &[f64], z_threshold: f64) -> Option<AnomalyFeatures> {
        let n = values.len();
        if n < self.config.min_anomaly_samples {
            return None;
        }
        let m = mean(values);
        let s = std_dev(values);
        let z_scores: Vec<f64> = if s > 0.0 {
            values.iter().map(|v| (v - m).abs() / s).collect()
        } else {
            vec![0.0; n]
        };
        let flags: Vec<bool> = z_scores.iter().map(|z| *z > z_threshold).collect();
        let total = flags.iter().filter(|f| **f).count();

        let sorted_values = sorted(values);
        let q1 = quantile(&sorted_values, 0.25);
        let q3 = quantile(&sorted_values, 0.75);
        let iqr = q3 - q1;
        let lower = q1 - self.config.iqr_multiplier * iqr;
        let upper = q3 + self.config.iqr_multiplier * iqr;
        let iqr_anomalies = values.iter().filter(|v| **v < lower || **v > upper).count();

        let recent_start = ((n as f64) * self.config.recent_window_start) as usize;
        let recent = flags[recent_start.min(n)..].iter().filter(|f| **f).count();

        let rate = total as f64 / n as f64;
        Some(AnomalyFeatures {
            total_anomalies: total,
            anomaly_rate: rate,
            iqr_anomalies,
            recent_anomalies: recent,
            max_z_score: z_scores.iter().cloned().fold(0.0, f64::max),
            severity: AnomalySeverity::from_rate(rate),
        })
    }

    fn performance(&self, entity: &EntitySeries) -> PerformanceFeatures {
        let consent = entity.get(MetricName::ConsentSuccessRate);
        let response = entity.get(MetricName::ResponseTime);

        let correlation = match (consent, response) {
            (Some(c), Some(r)) => {
                let response_by_ts: BTreeMap<_, f64> = r.observations().collect();
                let (xs, ys): (Vec<f64>, Vec<f64>) = c
                    .observations()
                    .filter_map(|(ts, cv)| response_by_ts.get(&ts).map(|rv| (cv, *rv)))
                    .unzip();
                if xs.len() > 2 {
                    Some(pearson(&xs, &ys).map(finite).unwrap_or(0.0))
                } else {
                    None
                }
            }
            _ => None,
        };

        let consent_stability = consent.map(|s| s.values()).filter(|v| !v.is_empty()).map(|v| {
            SuccessRateProfile {
                time_below_warning: fraction(&v, |x| x < self.config.success_warning_pct),
                time_below_critical: fraction(&v, |x| x < self.config.success_critical_pct),
                average: mean(&v),
                worst: v.iter().cloned().fold(f64::INFINITY, f64::min),
                volatility: std_dev(&v),
            }
        });

        let response_time_analysis = response
            .map(|s| s.values())
            .filter(|v| !v.is_empty())
            .map(|v| ResponseTimeProfile {
                time_above_slow: fraction(&v, |x| x > self.config.response_slow_secs),
                time_above_critical: fraction(&v, |x| x > self.config.response_critical_secs),
                average: mean(&v),
                worst: v.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                volatility: std_dev(&v),
            });

        PerformanceFeatures {
            consent_response_correlation: correlation,
            consent_stability,
            response_time_analysis,
        }
    }

    fn stability(entity: &EntitySeries) -> StabilityFeatures {
        let status = entity
            .get(MetricName::Status)
            .map(|s| s.values())
            .filter(|v| v.len() > 1)
            .map(|v| {
                let tiers: Vec<StatusTier> = v.iter().map(|x| StatusTier::classify(*x)).collect();
                let changes = tiers.windows(2).filter(|w| w[0] != w[1]).count();
                let n = tiers.len() as f64;
                let count = |tier: StatusTier| tiers.iter().filter(|t| **t == tier).count() as f64;
                let healthy = count(StatusTier::Healthy);
                let degraded = count(StatusTier::Degraded);
                let critical = count(StatusTier::Critical);
                StatusStability {
                    status_changes: changes,
                    healthy_time_pct: healthy * 100.0 / n,
                    degraded_time_pct: degraded * 100.0 / n,
                    critical_time_pct: critical * 100.0 / n,
                    stability_score: (healthy + degraded * 0.5) / n,
                    status_volatility: std_dev(&v),
                }
            });

        let cvs: Vec<f64> = [MetricName::ConsentSuccessRate, MetricName::DataFetchSuccessRate]
            .iter()
            .filter_map(|m| entity.get(*m))
            .map(|s| s.values())
            .filter(|v| !v.is_empty() && mean(v) != 0.0)
            .map(|v| coefficient_of_variation(&v))
            .collect();
        let overall = if cvs.is_empty() {
            None
        } else {
            let avg = mean(&cvs);
            Some(OverallStability {
                average_coefficient_of_variation: avg,
                grade: StabilityGrade::from_cv(avg),
            })
        };

        StabilityFeatures { status, overall }
    }
}

/// Coarse status tier of a status sample, nearest of 1.0 / 0.5 / 0.0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusTier {
    Healthy,
    Degraded,
    Critical,
}

impl StatusTier {
    fn classify(value: f64) -> Self {
        if value >= 0.75 {
            StatusTier::Healthy
        } else if value >= 0.25 {
            StatusTier::Degraded
        } else {
            StatusTier::Critical
        }
    }
}

fn fraction(values: &[f64], pred: impl Fn(f64) -> bool) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().filter(|v| pred(**v)).count() as f64 / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricSeries;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn start() -> DateTime<Utc> {
        // Monday
        Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap()
    }

    fn series(metric: MetricName, values: &[f64]) -> MetricSeries {
        MetricSeries::from_values("hdfc", metric, start(), Duration::hours(1), values)
    }

    fn calculator() -> FeatureCalculator {
        FeatureCalculator::new(FeatureConfig::default()).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = FeatureConfig {
            z_threshold: 0.0,
            ..FeatureConfig::default()
        };
        assert!(matches!(
            FeatureCalculator::new(config),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn test_data_quality_counts_missing() {
        let s = series(MetricName::Status, &[1.0, f64::NAN, 1.0, f64::NAN]);
        let q = FeatureCalculator::data_quality(&s);
        assert_eq!(q.total_points, 4);
        assert_eq!(q.missing_values, 2);
        assert_eq!(q.missing_percentage, 50.0);
        assert_eq!(q.data_span_hours, 3.0);
        assert_eq!(q.avg_interval_minutes, 60.0);
    }

    #[test]
    fn test_statistical_excludes_missing() {
        let s = series(MetricName::ConsentSuccessRate, &[90.0, f64::NAN, 80.0]);
        let stats = FeatureCalculator::statistical(&s.values()).unwrap();
        assert_eq!(stats.mean, 85.0);
        assert_eq!(stats.min, 80.0);
        assert_eq!(stats.max, 90.0);
        assert!(FeatureCalculator::statistical(&[]).is_none());
    }

    #[test]
    fn test_trend_slope_sign_matches_monotonic_direction() {
        let rising = FeatureCalculator::trend(&[1.0, 2.0, 4.0, 7.0, 11.0]).unwrap();
        assert!(rising.slope > 0.0);
        assert_eq!(rising.direction, TrendDirection::Increasing);

        let falling = FeatureCalculator::trend(&[99.0, 95.0, 94.0, 60.0]).unwrap();
        assert!(falling.slope < 0.0);
        assert_eq!(falling.direction, TrendDirection::Decreasing);
        assert!(falling.recent_vs_historical_change_pct < 0.0);

        let flat = FeatureCalculator::trend(&[5.0, 5.0, 5.0]).unwrap();
        assert_eq!(flat.direction, TrendDirection::Stable);

        assert!(FeatureCalculator::trend(&[1.0]).is_none());
    }

    #[test]
    fn test_trend_zero_historical_mean() {
        let t = FeatureCalculator::trend(&[0.0, 0.0, 5.0, 5.0]).unwrap();
        assert_eq!(t.recent_vs_historical_change_pct, 0.0);
    }

    #[test]
    fn test_moving_average_crossover() {
        let values: Vec<f64> = (0..24).map(|i| i as f64).collect();
        assert!(FeatureCalculator::trend(&values).unwrap().moving_avg_crossover);
        let values: Vec<f64> = (0..24).map(|i| -(i as f64)).collect();
        assert!(!FeatureCalculator::trend(&values).unwrap().moving_avg_crossover);
    }

    #[test]
    fn test_pattern_peak_and_low_hours() {
        // Two days of hourly data, value peaks at 14:00 and dips at 03:00
        let values: Vec<f64> = (0..48)
            .map(|i| match i % 24 {
                14 => 99.0,
                3 => 40.0,
                _ => 90.0,
            })
            .collect();
        let p = FeatureCalculator::pattern(&series(MetricName::ConsentSuccessRate, &values)).unwrap();
        assert_eq!(p.peak_hour, 14);
        assert_eq!(p.low_hour, 3);
        assert!(p.has_clear_daily_pattern);
        assert_eq!(p.weekend_vs_weekday_ratio, 1.0);
    }

    #[test]
    fn test_anomaly_rate_bounded_and_monotone_in_threshold() {
        let calc = calculator();
        let mut values: Vec<f64> = (0..50).map(|i| 95.0 + (i % 5) as f64 * 0.5).collect();
        values[47] = 20.0;
        values[10] = 60.0;

        let mut previous = 0.0;
        for z in [4.0, 3.0, 2.5, 2.0, 1.0, 0.5] {
            let a = calc.anomalies_at(&values, z).unwrap();
            assert!((0.0..=1.0).contains(&a.anomaly_rate));
            assert!(a.anomaly_rate >= previous, "rate dropped at z={}", z);
            previous = a.anomaly_rate;
        }

        let a = calc.anomalies(&values).unwrap();
        assert_eq!(a.recent_anomalies, 1);
        assert!(a.iqr_anomalies >= 2);
        assert!(a.max_z_score > 2.5);
    }

    #[test]
    fn test_anomalies_need_enough_samples() {
        assert!(calculator().anomalies(&[1.0, 2.0, 3.0, 4.0, 5.0]).is_none());
        let constant = calculator().anomalies(&[3.0; 10]).unwrap();
        assert_eq!(constant.total_anomalies, 0);
        assert_eq!(constant.max_z_score, 0.0);
        assert_eq!(constant.severity, AnomalySeverity::Low);
    }

    #[test]
    fn test_performance_profiles() {
        let entity = EntitySeries::new("hdfc")
            .with_series(series(MetricName::ConsentSuccessRate, &[95.0, 75.0, 45.0, 90.0]))
            .with_series(series(MetricName::ResponseTime, &[1.0, 6.0, 12.0, 2.0]));
        let f = calculator().calculate(&entity);

        let consent = f.performance.consent_stability.unwrap();
        assert_eq!(consent.time_below_warning, 0.5);
        assert_eq!(consent.time_below_critical, 0.25);
        assert_eq!(consent.worst, 45.0);

        let response = f.performance.response_time_analysis.unwrap();
        assert_eq!(response.time_above_slow, 0.5);
        assert_eq!(response.time_above_critical, 0.25);
        assert_eq!(response.worst, 12.0);

        let corr = f.performance.consent_response_correlation.unwrap();
        assert!(corr < -0.9);
    }

    #[test]
    fn test_status_stability() {
        let entity = EntitySeries::new("hdfc")
            .with_series(series(MetricName::Status, &[1.0, 1.0, 0.5, 0.0, 1.0]));
        let f = calculator().calculate(&entity);
        let s = f.stability.status.unwrap();
        assert_eq!(s.status_changes, 3);
        assert_eq!(s.healthy_time_pct, 60.0);
        assert_eq!(s.degraded_time_pct, 20.0);
        assert_eq!(s.critical_time_pct, 20.0);
        assert!((s.stability_score - 0.7).abs() < 1e-9);
        assert!(f.stability.overall.is_none());
    }

    #[test]
    fn test_overall_stability_grade() {
        let entity = EntitySeries::new("hdfc")
            .with_series(series(MetricName::ConsentSuccessRate, &[95.0, 96.0, 94.0, 95.0]))
            .with_series(series(MetricName::DataFetchSuccessRate, &[90.0, 91.0, 89.0, 90.0]));
        let overall = calculator().calculate(&entity).stability.overall.unwrap();
        assert_eq!(overall.grade, StabilityGrade::Excellent);
    }

    #[test]
    fn test_absent_metric_absent_section() {
        let entity = EntitySeries::new("hdfc").with_series(series(MetricName::Status, &[1.0, 1.0]));
        let f = calculator().calculate(&entity);
        assert!(f.statistical.contains_key(&MetricName::Status));
        assert!(!f.statistical.contains_key(&MetricName::ConsentSuccessRate));
        assert!(f.performance.consent_stability.is_none());
        assert!(f.anomaly.is_empty());
    }
}
