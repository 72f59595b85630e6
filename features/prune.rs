//! Redundancy pruning by pairwise correlation.

use crate::features::frame::{ColumnKind, LongitudinalFrame};
use crate::stats;
use rayon::prelude::*;

pub const CORRELATION_THRESHOLD: f64 = 0.95;

/// Names of the columns a later column is redundant with, in frame order.
///
/// Column `j` is dropped when any earlier column `i` has `|r(i, j)| > threshold`,
/// whether or not `i` is itself dropped. Undefined correlations never drop.
pub fn redundant_columns(frame: &LongitudinalFrame, threshold: f64) -> Vec<String> {
    let candidates: Vec<(&str, &[Option<f64>])> = frame
        .columns()
        .iter()
        .filter(|c| c.kind != ColumnKind::Outcome)
        .map(|c| (c.name.as_str(), c.values.as_slice()))
        .collect();

    let flagged: Vec<bool> = (0..candidates.len())
        .into_par_iter()
        .map(|j| {
            (0..j).any(|i| {
                stats::pearson(candidates[i].1, candidates[j].1)
                    .is_some_and(|r| r.abs() > threshold)
            })
        })
        .collect();

    candidates
        .iter()
        .zip(flagged)
        .filter(|(_, drop)| *drop)
        .map(|((name, _), _)| name.to_string())
        .collect()
}

/// Drops every redundant column and returns their names.
pub fn prune_redundant(frame: &mut LongitudinalFrame, threshold: f64) -> Vec<String> {
    let dropped = redundant_columns(frame, threshold);
    if !dropped.is_empty() {
        log::debug!("Pruning {} redundant columns: {:?}", dropped.len(), dropped);
        frame.drop_columns(&dropped);
    }
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DemographicTable, OUTCOME_COLUMN, ObservationRow, ObservationTable};
    use chrono::NaiveDate;

    #[test]
    fn later_column_of_a_correlated_chain_is_dropped_every_time() {
        let day = |d| NaiveDate::from_ymd_opt(2024, 6, d).unwrap();
        let rows = (1..=6)
            .map(|d| {
                let x = d as f64;
                ObservationRow::new("A", day(d))
                    .with_value("a", x)
                    .with_value("b", 2.0 * x + 1.0)
                    .with_value("c", -x)
                    .with_value("flat", 3.0)
                    .with_value("noise", [1.0, -1.0, 2.0, 0.5, -2.0, 1.5][d as usize - 1])
                    .with_value(OUTCOME_COLUMN, x)
            })
            .collect();
        let mut frame =
            LongitudinalFrame::from_tables(&ObservationTable::from_rows(rows), &DemographicTable::default())
                .unwrap();

        let dropped = prune_redundant(&mut frame, CORRELATION_THRESHOLD);
        assert_eq!(dropped, vec!["b".to_string(), "c".to_string()]);
        assert!(frame.has_column("a"));
        assert!(frame.has_column("flat"));
        assert!(frame.has_column("noise"));
        assert!(frame.has_column(OUTCOME_COLUMN));
    }

    #[test]
    fn a_column_whose_only_partner_was_dropped_is_still_dropped() {
        let day = |d| NaiveDate::from_ymd_opt(2024, 6, d).unwrap();
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let c = [2.0, 1.0, 4.0, 3.0, 7.0, 5.0, 6.0, 9.0];
        let rows = (0..8)
            .map(|i| {
                ObservationRow::new("A", day(i as u32 + 1))
                    .with_value("a", a[i])
                    .with_value("b", a[i] + c[i])
                    .with_value("c", c[i])
            })
            .collect();
        let frame =
            LongitudinalFrame::from_tables(&ObservationTable::from_rows(rows), &DemographicTable::default())
                .unwrap();
        let r = |x: &str, y: &str| {
            stats::pearson(frame.values(x).unwrap(), frame.values(y).unwrap())
                .unwrap()
                .abs()
        };
        assert!(r("a", "b") > CORRELATION_THRESHOLD);
        assert!(r("b", "c") > CORRELATION_THRESHOLD);
        assert!(r("a", "c") < CORRELATION_THRESHOLD);

        let dropped = redundant_columns(&frame, CORRELATION_THRESHOLD);
        assert_eq!(dropped, vec!["b".to_string(), "c".to_string()]);
    }
}
