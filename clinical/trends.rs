//! Short-horizon linear trends for a patient's vital-sign channels.

use crate::features::frame::{LongitudinalFrame, PatientPartition};
use crate::features::indicators::{ADHERENCE, GLUCOSE, SYSTOLIC, WEIGHT};
use crate::stats;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rows considered, counted back from the latest.
pub const TREND_WINDOW: usize = 30;
/// Points needed before a trend is reported, and the span of `current_avg`.
pub const MIN_TREND_POINTS: usize = 7;

const GLUCOSE_BAND: f64 = 1.0;
const WEIGHT_BAND: f64 = 0.1;
const SYSTOLIC_BAND: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

impl TrendDirection {
    /// Classifies a slope against a symmetric dead band.
    pub fn from_slope(slope: f64, band: f64) -> Self {
        if slope > band {
            Self::Increasing
        } else if slope < -band {
            Self::Decreasing
        } else {
            Self::Stable
        }
    }
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Increasing => write!(f, "increasing"),
            Self::Decreasing => write!(f, "decreasing"),
            Self::Stable => write!(f, "stable"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelTrend {
    pub direction: TrendDirection,
    /// Absolute slope per row.
    pub magnitude: f64,
    pub current_avg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdherenceSummary {
    pub current_avg: f64,
    /// One minus the sample standard deviation of the last points; not clamped.
    pub consistency: f64,
}

/// Channels with too little data are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trends {
    #[serde(rename = "glucose_trend", default, skip_serializing_if = "Option::is_none")]
    pub glucose: Option<ChannelTrend>,
    #[serde(rename = "weight_trend", default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<ChannelTrend>,
    #[serde(rename = "bp_trend", default, skip_serializing_if = "Option::is_none")]
    pub blood_pressure: Option<ChannelTrend>,
    #[serde(rename = "adherence_trend", default, skip_serializing_if = "Option::is_none")]
    pub adherence: Option<AdherenceSummary>,
}

fn last_points(points: &[f64]) -> &[f64] {
    &points[points.len().saturating_sub(MIN_TREND_POINTS)..]
}

/// Trend of one channel over already-windowed values. Missing points are dropped
/// and the slope is taken against the compacted index.
pub fn channel_trend(values: &[Option<f64>], band: f64) -> Option<ChannelTrend> {
    let points = stats::present(values);
    if points.len() < MIN_TREND_POINTS {
        return None;
    }
    let slope = stats::index_slope(&points)?;
    Some(ChannelTrend {
        direction: TrendDirection::from_slope(slope, band),
        magnitude: slope.abs(),
        current_avg: stats::mean(last_points(&points))?,
    })
}

pub fn adherence_summary(values: &[Option<f64>]) -> Option<AdherenceSummary> {
    let points = stats::present(values);
    if points.len() < MIN_TREND_POINTS {
        return None;
    }
    let recent = last_points(&points);
    Some(AdherenceSummary {
        current_avg: stats::mean(recent)?,
        consistency: 1.0 - stats::sample_std(recent)?,
    })
}

fn windowed<'f>(
    frame: &'f LongitudinalFrame,
    name: &str,
    partition: &PatientPartition,
) -> Option<&'f [Option<f64>]> {
    frame.values(name).map(|v| &v[partition.tail(TREND_WINDOW)])
}

pub struct TrendAnalyzer;

impl TrendAnalyzer {
    pub fn analyze(frame: &LongitudinalFrame, partition: &PatientPartition) -> Trends {
        Trends {
            glucose: windowed(frame, GLUCOSE, partition).and_then(|v| channel_trend(v, GLUCOSE_BAND)),
            weight: windowed(frame, WEIGHT, partition).and_then(|v| channel_trend(v, WEIGHT_BAND)),
            blood_pressure: windowed(frame, SYSTOLIC, partition)
                .and_then(|v| channel_trend(v, SYSTOLIC_BAND)),
            adherence: windowed(frame, ADHERENCE, partition).and_then(adherence_summary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn glucose_rising_five_per_day_is_increasing() {
        let values: Vec<Option<f64>> = (0..10).map(|i| Some(120.0 + 5.0 * i as f64)).collect();
        let trend = channel_trend(&values, GLUCOSE_BAND).unwrap();
        assert_eq!(trend.direction, TrendDirection::Increasing);
        assert_abs_diff_eq!(trend.magnitude, 5.0, epsilon = 1e-9);
        // Mean of the last seven: 135..=165.
        assert_abs_diff_eq!(trend.current_avg, 150.0, epsilon = 1e-9);
    }

    #[test]
    fn short_series_are_omitted_and_gaps_are_compacted() {
        let short: Vec<Option<f64>> = (0..6).map(|i| Some(i as f64)).collect();
        assert!(channel_trend(&short, WEIGHT_BAND).is_none());

        let mut gappy: Vec<Option<f64>> = (0..8).map(|i| Some(80.0 - 0.5 * i as f64)).collect();
        gappy.insert(3, None);
        let trend = channel_trend(&gappy, WEIGHT_BAND).unwrap();
        assert_eq!(trend.direction, TrendDirection::Decreasing);
        assert_abs_diff_eq!(trend.magnitude, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn slopes_inside_the_band_are_stable() {
        let values: Vec<Option<f64>> = (0..10).map(|i| Some(130.0 + 0.4 * i as f64)).collect();
        let trend = channel_trend(&values, SYSTOLIC_BAND).unwrap();
        assert_eq!(trend.direction, TrendDirection::Stable);
    }

    #[test]
    fn adherence_consistency_uses_the_last_week() {
        let mut values = vec![Some(0.2); 5];
        values.extend([Some(0.9); 7]);
        let summary = adherence_summary(&values).unwrap();
        assert_abs_diff_eq!(summary.current_avg, 0.9, epsilon = 1e-12);
        assert_abs_diff_eq!(summary.consistency, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn serialized_trends_use_channel_keys() {
        let trends = Trends {
            glucose: Some(ChannelTrend {
                direction: TrendDirection::Increasing,
                magnitude: 5.0,
                current_avg: 150.0,
            }),
            ..Default::default()
        };
        let json = serde_json::to_value(&trends).unwrap();
        assert_eq!(json["glucose_trend"]["direction"], "increasing");
        assert!(json.get("weight_trend").is_none());
    }
}
