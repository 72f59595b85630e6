//! Missing-value filling for the longitudinal frame.
//!
//! Strategies run in a fixed order: lab channels are carried forward then
//! backward inside each patient, vital channels take the patient's own median,
//! and lifestyle channels take the population median of what remains. A
//! patient with no readings at all for a lab or vital channel is left as is.

use crate::config::ColumnRoles;
use crate::features::frame::LongitudinalFrame;
use crate::stats;
use serde::Serialize;

/// Cells filled by each strategy, for the preprocessing log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImputationSummary {
    pub carried: usize,
    pub patient_median: usize,
    pub population_median: usize,
}

pub struct TemporalImputer<'a> {
    roles: &'a ColumnRoles,
}

impl<'a> TemporalImputer<'a> {
    pub fn new(roles: &'a ColumnRoles) -> Self {
        Self { roles }
    }

    pub fn impute(&self, frame: &mut LongitudinalFrame) -> ImputationSummary {
        let mut summary = ImputationSummary::default();

        for name in &self.roles.labs {
            summary.carried += fill_column(frame, name, carry_forward_backward);
        }
        for name in &self.roles.vitals {
            summary.patient_median += fill_column(frame, name, fill_with_own_median);
        }
        for name in &self.roles.lifestyle {
            summary.population_median += fill_with_population_median(frame, name);
        }

        log::info!(
            "Imputation filled {} lab cells by carry, {} vital cells by patient median, {} lifestyle cells by population median",
            summary.carried,
            summary.patient_median,
            summary.population_median
        );
        summary
    }
}

/// Applies a per-patient fill to one column; returns how many cells were filled.
fn fill_column(
    frame: &mut LongitudinalFrame,
    name: &str,
    fill: fn(&[Option<f64>]) -> Vec<Option<f64>>,
) -> usize {
    let Some(source) = frame.values(name) else {
        return 0;
    };
    let before = source.iter().filter(|v| v.is_none()).count();
    let filled = frame.derive_per_patient(source, fill);
    let after = filled.iter().filter(|v| v.is_none()).count();
    if let Some(values) = frame.values_mut(name) {
        *values = filled;
    }
    before - after
}

/// Forward fill, then backward fill, within one patient's slice.
pub fn carry_forward_backward(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = values.to_vec();
    let mut last = None;
    for v in out.iter_mut() {
        match v {
            Some(x) => last = Some(*x),
            None => *v = last,
        }
    }
    let mut next = None;
    for v in out.iter_mut().rev() {
        match v {
            Some(x) => next = Some(*x),
            None => *v = next,
        }
    }
    out
}

pub fn fill_with_own_median(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let median = stats::median(&stats::present(values));
    values.iter().map(|v| v.or(median)).collect()
}

/// Fills one column with its median over all patients. Returns cells filled.
pub fn fill_with_population_median(frame: &mut LongitudinalFrame, name: &str) -> usize {
    let Some(values) = frame.values_mut(name) else {
        return 0;
    };
    let Some(median) = stats::median(&stats::present(values)) else {
        return 0;
    };
    let mut filled = 0;
    for v in values.iter_mut().filter(|v| v.is_none()) {
        *v = Some(median);
        filled += 1;
    }
    filled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DemographicTable, ObservationRow, ObservationTable};
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn row(patient: &str, d: u32, column: &str, value: Option<f64>) -> ObservationRow {
        let r = ObservationRow::new(patient, day(d));
        match value {
            Some(v) => r.with_value(column, v),
            None => r.with_missing(column),
        }
    }

    fn frame_of(rows: Vec<ObservationRow>) -> LongitudinalFrame {
        LongitudinalFrame::from_tables(&ObservationTable::from_rows(rows), &DemographicTable::default())
            .unwrap()
    }

    #[test]
    fn labs_carry_within_patient_only() {
        let mut frame = frame_of(vec![
            row("A", 1, "hba1c", None),
            row("A", 2, "hba1c", Some(7.0)),
            row("A", 3, "hba1c", None),
            row("A", 4, "hba1c", Some(8.0)),
            row("B", 1, "hba1c", None),
            row("B", 2, "hba1c", None),
        ]);
        let roles = ColumnRoles::default();
        let summary = TemporalImputer::new(&roles).impute(&mut frame);

        assert_eq!(
            frame.values("hba1c").unwrap(),
            &[Some(7.0), Some(7.0), Some(7.0), Some(8.0), None, None]
        );
        assert_eq!(summary.carried, 2);
    }

    #[test]
    fn vitals_use_the_patients_own_median() {
        let mut frame = frame_of(vec![
            row("A", 1, "heart_rate", Some(60.0)),
            row("A", 2, "heart_rate", None),
            row("A", 3, "heart_rate", Some(80.0)),
            row("B", 1, "heart_rate", Some(100.0)),
            row("B", 2, "heart_rate", None),
        ]);
        let roles = ColumnRoles::default();
        TemporalImputer::new(&roles).impute(&mut frame);
        assert_eq!(
            frame.values("heart_rate").unwrap(),
            &[Some(60.0), Some(70.0), Some(80.0), Some(100.0), Some(100.0)]
        );
    }

    #[test]
    fn lifestyle_uses_the_population_median() {
        let mut frame = frame_of(vec![
            row("A", 1, "steps", Some(1000.0)),
            row("A", 2, "steps", None),
            row("B", 1, "steps", Some(3000.0)),
            row("B", 2, "steps", Some(9000.0)),
        ]);
        let roles = ColumnRoles::default();
        let summary = TemporalImputer::new(&roles).impute(&mut frame);
        assert_eq!(frame.values("steps").unwrap()[1], Some(3000.0));
        assert_eq!(summary.population_median, 1);
    }

    #[test]
    fn no_gaps_remain_between_first_and_last_lab_reading() {
        let pattern = [None, Some(5.0), None, None, Some(6.0), None, Some(4.0), None];
        let mut rows = Vec::new();
        for (patient, offset) in [("A", 0usize), ("B", 3), ("C", 5)] {
            for d in 0..pattern.len() {
                rows.push(row(patient, d as u32 + 1, "creatinine", pattern[(d + offset) % pattern.len()]));
            }
        }
        let mut frame = frame_of(rows);
        let original = frame.values("creatinine").unwrap().to_vec();
        let roles = ColumnRoles::default();
        TemporalImputer::new(&roles).impute(&mut frame);
        let filled = frame.values("creatinine").unwrap();

        for part in frame.partitions() {
            let slice = &original[part.rows.clone()];
            let first = slice.iter().position(|v| v.is_some()).unwrap();
            let last = slice.iter().rposition(|v| v.is_some()).unwrap();
            for r in first..=last {
                assert!(filled[part.rows.start + r].is_some());
            }
        }
    }

    #[test]
    fn absent_role_columns_are_skipped() {
        let mut frame = frame_of(vec![row("A", 1, "glucose_mg_dl", Some(100.0))]);
        let roles = ColumnRoles::default();
        let summary = TemporalImputer::new(&roles).impute(&mut frame);
        assert_eq!(summary, ImputationSummary::default());
    }
}
