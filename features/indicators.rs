//! Threshold-based clinical flags and calendar features.
//!
//! Flags are 0/1 columns. A missing input never raises a flag, so every flag
//! row is defined even where the underlying channel is not.

use crate::features::frame::{Column, ColumnKind, LongitudinalFrame};
use chrono::Datelike;

pub const GLUCOSE: &str = "glucose_mg_dl";
pub const SYSTOLIC: &str = "systolic_bp";
pub const DIASTOLIC: &str = "diastolic_bp";
pub const WEIGHT: &str = "weight_kg";
pub const ADHERENCE: &str = "adherence_avg";

/// Periods used for the per-patient weight percent change.
const WEIGHT_CHANGE_PERIODS: usize = 7;
const RAPID_GAIN_FRACTION: f64 = 0.02;

fn flag(condition: bool) -> Option<f64> {
    Some(if condition { 1.0 } else { 0.0 })
}

fn unary_flag(values: &[Option<f64>], test: impl Fn(f64) -> bool) -> Vec<Option<f64>> {
    values
        .iter()
        .map(|v| flag(v.is_some_and(&test)))
        .collect()
}

/// Adds glucose, blood pressure, weight and adherence flags for the channels present.
pub fn add_clinical_flags(frame: &mut LongitudinalFrame) -> Vec<String> {
    let mut added = Vec::new();
    let mut push = |frame: &mut LongitudinalFrame, name: &str, kind: ColumnKind, values| {
        frame.push_column(Column::new(name, kind, values));
        added.push(name.to_string());
    };

    if let Some(glucose) = frame.values(GLUCOSE).map(<[_]>::to_vec) {
        push(
            frame,
            "glucose_tir",
            ColumnKind::Indicator,
            unary_flag(&glucose, |g| (70.0..=180.0).contains(&g)),
        );
        push(
            frame,
            "glucose_very_high",
            ColumnKind::Indicator,
            unary_flag(&glucose, |g| g > 250.0),
        );
        push(
            frame,
            "glucose_very_low",
            ColumnKind::Indicator,
            unary_flag(&glucose, |g| g < 70.0),
        );
    }

    if let (Some(sys), Some(dia)) = (
        frame.values(SYSTOLIC).map(<[_]>::to_vec),
        frame.values(DIASTOLIC).map(<[_]>::to_vec),
    ) {
        let controlled = sys
            .iter()
            .zip(&dia)
            .map(|(s, d)| flag(s.is_some_and(|s| s < 140.0) && d.is_some_and(|d| d < 90.0)))
            .collect();
        let crisis = sys
            .iter()
            .zip(&dia)
            .map(|(s, d)| flag(s.is_some_and(|s| s > 180.0) || d.is_some_and(|d| d > 120.0)))
            .collect();
        push(frame, "bp_controlled", ColumnKind::Indicator, controlled);
        push(frame, "hypertensive_crisis", ColumnKind::Indicator, crisis);
    }

    if let Some(weight) = frame.values(WEIGHT).map(<[_]>::to_vec) {
        let change = frame.derive_per_patient(&weight, percent_change);
        let rapid = unary_flag(&change, |c| c > RAPID_GAIN_FRACTION);
        push(frame, "weight_change_7d", ColumnKind::Indicator, change);
        push(frame, "rapid_weight_gain", ColumnKind::Indicator, rapid);
    }

    if let Some(adherence) = frame.values(ADHERENCE).map(<[_]>::to_vec) {
        push(
            frame,
            "adherence_excellent",
            ColumnKind::Indicator,
            unary_flag(&adherence, |a| a >= 0.9),
        );
        push(
            frame,
            "adherence_poor",
            ColumnKind::Indicator,
            unary_flag(&adherence, |a| a < 0.7),
        );
    }

    added
}

/// `(x[i] - x[i - 7]) / x[i - 7]` inside one patient.
pub fn percent_change(values: &[Option<f64>]) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            let base = values[i.checked_sub(WEIGHT_CHANGE_PERIODS)?]?;
            let current = values[i]?;
            if base == 0.0 {
                return None;
            }
            Some((current - base) / base)
        })
        .collect()
}

/// Adds day-of-week (Monday = 0), month, weekend flag and days since the
/// patient's first observation (the zero-based rank of the date).
pub fn add_calendar_features(frame: &mut LongitudinalFrame) -> Vec<String> {
    let dates = frame.dates();
    let day_of_week: Vec<Option<f64>> = dates
        .iter()
        .map(|d| Some(d.weekday().num_days_from_monday() as f64))
        .collect();
    let month: Vec<Option<f64>> = dates.iter().map(|d| Some(d.month() as f64)).collect();
    let weekend: Vec<Option<f64>> = day_of_week
        .iter()
        .map(|d| flag(d.is_some_and(|d| d >= 5.0)))
        .collect();
    let mut since_start = vec![None; frame.len()];
    for part in frame.partitions() {
        for (rank, r) in part.rows.clone().enumerate() {
            since_start[r] = Some(rank as f64);
        }
    }

    let columns = [
        ("day_of_week", day_of_week),
        ("month", month),
        ("is_weekend", weekend),
        ("days_since_start", since_start),
    ];
    let mut added = Vec::new();
    for (name, values) in columns {
        frame.push_column(Column::new(name, ColumnKind::Calendar, values));
        added.push(name.to_string());
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DemographicTable, ObservationRow, ObservationTable};
    use chrono::NaiveDate;

    fn frame_of(rows: Vec<ObservationRow>) -> LongitudinalFrame {
        LongitudinalFrame::from_tables(&ObservationTable::from_rows(rows), &DemographicTable::default())
            .unwrap()
    }

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    #[test]
    fn glucose_flags_use_inclusive_range_bounds() {
        let readings = [69.0, 70.0, 180.0, 181.0, 251.0];
        let rows = readings
            .iter()
            .enumerate()
            .map(|(i, &g)| ObservationRow::new("A", date(1, i as u32 + 1)).with_value(GLUCOSE, g))
            .collect();
        let mut frame = frame_of(rows);
        add_clinical_flags(&mut frame);

        let tir: Vec<_> = frame.values("glucose_tir").unwrap().iter().map(|v| v.unwrap()).collect();
        let high: Vec<_> = frame.values("glucose_very_high").unwrap().iter().map(|v| v.unwrap()).collect();
        let low: Vec<_> = frame.values("glucose_very_low").unwrap().iter().map(|v| v.unwrap()).collect();
        assert_eq!(tir, vec![0.0, 1.0, 1.0, 0.0, 0.0]);
        assert_eq!(high, vec![0.0, 0.0, 0.0, 0.0, 1.0]);
        assert_eq!(low, vec![1.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn blood_pressure_flags() {
        let pairs = [(139.0, 89.0), (140.0, 80.0), (181.0, 80.0), (120.0, 121.0)];
        let rows = pairs
            .iter()
            .enumerate()
            .map(|(i, &(s, d))| {
                ObservationRow::new("A", date(1, i as u32 + 1))
                    .with_value(SYSTOLIC, s)
                    .with_value(DIASTOLIC, d)
            })
            .collect();
        let mut frame = frame_of(rows);
        add_clinical_flags(&mut frame);
        assert_eq!(
            frame.values("bp_controlled").unwrap(),
            &[Some(1.0), Some(0.0), Some(0.0), Some(0.0)]
        );
        assert_eq!(
            frame.values("hypertensive_crisis").unwrap(),
            &[Some(0.0), Some(0.0), Some(1.0), Some(1.0)]
        );
    }

    #[test]
    fn weight_change_looks_back_seven_rows_within_patient() {
        let mut weights = vec![Some(100.0); 7];
        weights.push(Some(103.0));
        let change = percent_change(&weights);
        assert!(change[..7].iter().all(Option::is_none));
        assert!((change[7].unwrap() - 0.03).abs() < 1e-12);
    }

    #[test]
    fn calendar_features_rank_dates_per_patient() {
        // 2024-01-06 is a Saturday.
        let mut frame = frame_of(vec![
            ObservationRow::new("A", date(1, 6)).with_value(GLUCOSE, 100.0),
            ObservationRow::new("A", date(1, 8)).with_value(GLUCOSE, 100.0),
            ObservationRow::new("B", date(2, 1)).with_value(GLUCOSE, 100.0),
        ]);
        add_calendar_features(&mut frame);
        assert_eq!(frame.values("day_of_week").unwrap(), &[Some(5.0), Some(0.0), Some(3.0)]);
        assert_eq!(frame.values("is_weekend").unwrap(), &[Some(1.0), Some(0.0), Some(0.0)]);
        assert_eq!(frame.values("month").unwrap(), &[Some(1.0), Some(1.0), Some(2.0)]);
        assert_eq!(frame.values("days_since_start").unwrap(), &[Some(0.0), Some(1.0), Some(0.0)]);
    }
}
