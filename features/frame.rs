//! # Longitudinal Frame
//!
//! A small column store holding every observation row, sorted by
//! `(patient_id, date)`. Each patient's timeline is a contiguous row range
//! (`PatientPartition`), so per-patient work slices columns instead of
//! regrouping rows. Derived columns are appended by the feature stages and
//! tagged with a `ColumnKind` so later stages can select them by role.
//!
//! The frame is assembled with `polars`: observations are left-joined to
//! demographics on `patient_id` (a null observation cell falls back to the
//! patient's demographic value), sorted by patient and date, and grouped by
//! patient to find the partitions.

use crate::types::{
    DATE_COLUMN, DemographicRow, DemographicTable, OUTCOME_COLUMN, ObservationTable,
    PATIENT_ID_COLUMN,
};
use ahash::{AHashMap, AHashSet};
use chrono::{Datelike, NaiveDate};
use polars::prelude::{
    Column as FrameColumn, DataFrame, DataType, Expr, IntoLazy, NamedFrom, PolarsError, Series,
    SortMultipleOptions, col, len, when,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use thiserror::Error;

const DEMOGRAPHIC_SUFFIX: &str = "__demographic";
const ROW_INDEX: &str = "__row";
const GROUP_ROWS: &str = "__rows";

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("The observation table has no rows.")]
    Empty,
    #[error("Patient '{patient_id}' has more than one observation dated {date}.")]
    DuplicateDate { patient_id: String, date: NaiveDate },
    #[error("Column '{0}' is both numeric and categorical.")]
    ConflictingColumnType(String),
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
}

/// Provenance of a numeric column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Raw,
    Indicator,
    Calendar,
    Rolling,
    Composite,
    Encoded,
    Outcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
    pub values: Vec<Option<f64>>,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            kind,
            values,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoricalColumn {
    pub name: String,
    pub values: Vec<Option<String>>,
}

/// The rows belonging to one patient, ascending by date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientPartition {
    pub patient_id: String,
    pub rows: Range<usize>,
}

impl PatientPartition {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The trailing `n` rows (or all of them when the timeline is shorter).
    pub fn tail(&self, n: usize) -> Range<usize> {
        let start = self.rows.end.saturating_sub(n).max(self.rows.start);
        start..self.rows.end
    }
}

#[derive(Debug, Clone)]
pub struct LongitudinalFrame {
    patient_ids: Vec<String>,
    dates: Vec<NaiveDate>,
    columns: Vec<Column>,
    categoricals: Vec<CategoricalColumn>,
    index: AHashMap<String, usize>,
    partitions: Vec<PatientPartition>,
}

/// Names carried by each side of the join, split by type.
struct ColumnSets<'a> {
    numeric: AHashSet<&'a str>,
    categorical: AHashSet<&'a str>,
}

impl<'a> ColumnSets<'a> {
    fn observed(observations: &'a ObservationTable) -> Self {
        Self {
            numeric: observations.rows.iter().flat_map(|r| r.numeric.keys()).map(String::as_str).collect(),
            categorical: observations
                .rows
                .iter()
                .flat_map(|r| r.categorical.keys())
                .map(String::as_str)
                .collect(),
        }
    }

    fn demographic(rows: &[&'a DemographicRow]) -> Self {
        Self {
            numeric: rows.iter().copied().flat_map(|r| r.numeric.keys()).map(String::as_str).collect(),
            categorical: rows
                .iter()
                .copied()
                .flat_map(|r| r.categorical.keys())
                .map(String::as_str)
                .collect(),
        }
    }
}

fn present<'n>(names: &'n [String], set: &AHashSet<&str>) -> Vec<&'n str> {
    names.iter().map(String::as_str).filter(|n| set.contains(n)).collect()
}

fn to_frame(series: Vec<Series>) -> Result<DataFrame, PolarsError> {
    DataFrame::new(series.into_iter().map(FrameColumn::from).collect())
}

fn demographic_name(name: &str) -> String {
    format!("{name}{DEMOGRAPHIC_SUFFIX}")
}

/// The joined value of `name`, preferring the observation cell.
fn merged(name: &str, observed: bool, demographic: bool) -> Expr {
    let fallback = col(demographic_name(name));
    let merged = match (observed, demographic) {
        (true, true) => when(col(name).is_null()).then(fallback).otherwise(col(name)),
        (true, false) => col(name),
        (false, _) => fallback,
    };
    merged.alias(name)
}

fn observation_series(
    observations: &ObservationTable,
    numeric: &[&str],
    categorical: &[&str],
) -> Vec<Series> {
    let rows = &observations.rows;
    let mut series = vec![
        Series::new(
            PATIENT_ID_COLUMN.into(),
            rows.iter().map(|r| r.patient_id.clone()).collect::<Vec<String>>(),
        ),
        Series::new(
            DATE_COLUMN.into(),
            rows.iter().map(|r| r.date.num_days_from_ce()).collect::<Vec<i32>>(),
        ),
        Series::new(ROW_INDEX.into(), (0..rows.len() as u32).collect::<Vec<u32>>()),
    ];
    for &name in numeric {
        let values: Vec<Option<f64>> = rows.iter().map(|r| r.numeric.get(name).copied().flatten()).collect();
        series.push(Series::new(name.into(), values));
    }
    for &name in categorical {
        let values: Vec<Option<String>> = rows.iter().map(|r| r.categorical.get(name).cloned().flatten()).collect();
        series.push(Series::new(name.into(), values));
    }
    series
}

fn demographic_series(rows: &[&DemographicRow], numeric: &[&str], categorical: &[&str]) -> Vec<Series> {
    let mut series = vec![Series::new(
        PATIENT_ID_COLUMN.into(),
        rows.iter().map(|r| r.patient_id.clone()).collect::<Vec<String>>(),
    )];
    for &name in numeric {
        let values: Vec<Option<f64>> = rows.iter().map(|r| r.numeric.get(name).copied().flatten()).collect();
        series.push(Series::new(demographic_name(name).into(), values));
    }
    for &name in categorical {
        let values: Vec<Option<String>> = rows.iter().map(|r| r.categorical.get(name).cloned().flatten()).collect();
        series.push(Series::new(demographic_name(name).into(), values));
    }
    series
}

/// Contiguous row ranges per patient, in sorted row order.
fn partitions_of(sorted: &DataFrame) -> Result<Vec<PatientPartition>, PolarsError> {
    let groups = sorted
        .clone()
        .lazy()
        .group_by_stable([col(PATIENT_ID_COLUMN)])
        .agg([len().alias(GROUP_ROWS)])
        .collect()?;
    let counts = groups.column(GROUP_ROWS)?.cast(&DataType::UInt64)?;
    let mut start = 0;
    Ok(groups
        .column(PATIENT_ID_COLUMN)?
        .str()?
        .into_no_null_iter()
        .zip(counts.u64()?.into_no_null_iter())
        .map(|(patient_id, n)| {
            let end = start + n as usize;
            let part = PatientPartition {
                patient_id: patient_id.to_string(),
                rows: start..end,
            };
            start = end;
            part
        })
        .collect())
}

impl LongitudinalFrame {
    /// Builds the frame from the observation table, left-joining demographic
    /// attributes onto every observation row.
    pub fn from_tables(
        observations: &ObservationTable,
        demographics: &DemographicTable,
    ) -> Result<Self, FrameError> {
        if observations.rows.is_empty() {
            return Err(FrameError::Empty);
        }

        let mut seen_patients = AHashSet::new();
        let patient_rows: Vec<&DemographicRow> = demographics
            .rows
            .iter()
            .filter(|r| seen_patients.insert(r.patient_id.as_str()))
            .collect();
        let observed = ColumnSets::observed(observations);
        let demographic = ColumnSets::demographic(&patient_rows);

        let numeric_names = ordered_names(
            &observations.columns,
            observations
                .rows
                .iter()
                .flat_map(|r| r.numeric.keys())
                .chain(patient_rows.iter().copied().flat_map(|r| r.numeric.keys())),
        );
        let categorical_names = ordered_names(
            &observations.columns,
            observations
                .rows
                .iter()
                .flat_map(|r| r.categorical.keys())
                .chain(patient_rows.iter().copied().flat_map(|r| r.categorical.keys())),
        );
        if let Some(name) = numeric_names
            .iter()
            .find(|n| categorical_names.contains(*n))
        {
            return Err(FrameError::ConflictingColumnType(name.clone()));
        }

        let left = to_frame(observation_series(
            observations,
            &present(&numeric_names, &observed.numeric),
            &present(&categorical_names, &observed.categorical),
        ))?;
        let right = to_frame(demographic_series(
            &patient_rows,
            &present(&numeric_names, &demographic.numeric),
            &present(&categorical_names, &demographic.categorical),
        ))?;

        let mut selection = vec![col(PATIENT_ID_COLUMN), col(DATE_COLUMN), col(ROW_INDEX)];
        for name in &numeric_names {
            selection.push(merged(
                name,
                observed.numeric.contains(name.as_str()),
                demographic.numeric.contains(name.as_str()),
            ));
        }
        for name in &categorical_names {
            selection.push(merged(
                name,
                observed.categorical.contains(name.as_str()),
                demographic.categorical.contains(name.as_str()),
            ));
        }
        let sorted = left
            .lazy()
            .left_join(right.lazy(), col(PATIENT_ID_COLUMN), col(PATIENT_ID_COLUMN))
            .select(selection)
            .sort(
                [PATIENT_ID_COLUMN, DATE_COLUMN],
                SortMultipleOptions::default().with_maintain_order(true),
            )
            .collect()?;

        let order: Vec<usize> = sorted
            .column(ROW_INDEX)?
            .u32()?
            .into_no_null_iter()
            .map(|i| i as usize)
            .collect();
        let patient_ids: Vec<String> = order.iter().map(|&i| observations.rows[i].patient_id.clone()).collect();
        let dates: Vec<NaiveDate> = order.iter().map(|&i| observations.rows[i].date).collect();

        let mut columns = Vec::with_capacity(numeric_names.len());
        for name in &numeric_names {
            let kind = if name == OUTCOME_COLUMN {
                ColumnKind::Outcome
            } else {
                ColumnKind::Raw
            };
            let values: Vec<Option<f64>> = sorted.column(name)?.f64()?.into_iter().collect();
            columns.push(Column::new(name.clone(), kind, values));
        }
        let mut categoricals = Vec::with_capacity(categorical_names.len());
        for name in &categorical_names {
            let values: Vec<Option<String>> = sorted
                .column(name)?
                .str()?
                .into_iter()
                .map(|v| v.map(str::to_string))
                .collect();
            categoricals.push(CategoricalColumn {
                name: name.clone(),
                values,
            });
        }

        let partitions = partitions_of(&sorted)?;
        for part in &partitions {
            for r in part.rows.start + 1..part.rows.end {
                if dates[r] == dates[r - 1] {
                    return Err(FrameError::DuplicateDate {
                        patient_id: part.patient_id.clone(),
                        date: dates[r],
                    });
                }
            }
        }

        let index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();

        Ok(Self {
            patient_ids,
            dates,
            columns,
            categoricals,
            index,
            partitions,
        })
    }

    pub fn len(&self) -> usize {
        self.patient_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patient_ids.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn patient_ids(&self) -> &[String] {
        &self.patient_ids
    }

    pub fn partitions(&self) -> &[PatientPartition] {
        &self.partitions
    }

    pub fn partition(&self, patient_id: &str) -> Option<&PatientPartition> {
        self.partitions
            .binary_search_by(|p| p.patient_id.as_str().cmp(patient_id))
            .ok()
            .map(|i| &self.partitions[i])
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.index.get(name).map(|&i| &self.columns[i])
    }

    pub fn values(&self, name: &str) -> Option<&[Option<f64>]> {
        self.column(name).map(|c| c.values.as_slice())
    }

    pub fn values_mut(&mut self, name: &str) -> Option<&mut Vec<Option<f64>>> {
        self.index.get(name).map(|&i| &mut self.columns[i].values)
    }

    pub fn categorical(&self, name: &str) -> Option<&CategoricalColumn> {
        self.categoricals.iter().find(|c| c.name == name)
    }

    pub fn categoricals(&self) -> &[CategoricalColumn] {
        &self.categoricals
    }

    /// Appends a derived column, replacing any existing column of the same name in place.
    pub fn push_column(&mut self, column: Column) {
        debug_assert_eq!(column.values.len(), self.len());
        match self.index.get(&column.name) {
            Some(&i) => self.columns[i] = column,
            None => {
                self.index.insert(column.name.clone(), self.columns.len());
                self.columns.push(column);
            }
        }
    }

    /// Removes the named columns and rebuilds the lookup index.
    pub fn drop_columns(&mut self, names: &[String]) {
        self.columns.retain(|c| !names.contains(&c.name));
        self.index = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
    }

    /// Runs `derive` on every patient's slice of `source` in parallel and
    /// stitches the per-patient outputs back into one full-length column.
    pub fn derive_per_patient<F>(&self, source: &[Option<f64>], derive: F) -> Vec<Option<f64>>
    where
        F: Fn(&[Option<f64>]) -> Vec<Option<f64>> + Sync,
    {
        let pieces: Vec<Vec<Option<f64>>> = self
            .partitions
            .par_iter()
            .map(|p| {
                let out = derive(&source[p.rows.clone()]);
                debug_assert_eq!(out.len(), p.len());
                out
            })
            .collect();
        pieces.concat()
    }
}

/// Distinct value-column names ordered by header position, then first appearance.
fn ordered_names<'a>(header: &[String], names: impl Iterator<Item = &'a String>) -> Vec<String> {
    let rank = |name: &str| header.iter().position(|c| c == name).unwrap_or(usize::MAX);
    let mut seen: Vec<&String> = names.collect();
    seen.sort_by_key(|name| rank(name.as_str()));
    let mut ordered = Vec::new();
    for name in seen {
        push_unique(&mut ordered, name);
    }
    ordered.retain(|n| n != PATIENT_ID_COLUMN && n != DATE_COLUMN);
    ordered
}

fn push_unique(names: &mut Vec<String>, name: &str) {
    if !names.iter().any(|n| n == name) {
        names.push(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DemographicRow, ObservationRow};
    use std::collections::BTreeMap;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn rows_are_sorted_and_partitioned_by_patient() {
        let table = ObservationTable::from_rows(vec![
            ObservationRow::new("B", day(2)).with_value("glucose_mg_dl", 2.0),
            ObservationRow::new("A", day(3)).with_value("glucose_mg_dl", 30.0),
            ObservationRow::new("B", day(1)).with_value("glucose_mg_dl", 1.0),
            ObservationRow::new("A", day(1)).with_value("glucose_mg_dl", 10.0),
        ]);
        let frame = LongitudinalFrame::from_tables(&table, &DemographicTable::default()).unwrap();

        assert_eq!(frame.patient_ids(), &["A", "A", "B", "B"]);
        assert_eq!(
            frame.values("glucose_mg_dl").unwrap(),
            &[Some(10.0), Some(30.0), Some(1.0), Some(2.0)]
        );
        let b = frame.partition("B").unwrap();
        assert_eq!(b.rows, 2..4);
        assert!(frame.partition("C").is_none());
    }

    #[test]
    fn duplicate_dates_within_a_patient_are_rejected() {
        let table = ObservationTable::from_rows(vec![
            ObservationRow::new("A", day(1)).with_value("glucose_mg_dl", 1.0),
            ObservationRow::new("A", day(1)).with_value("glucose_mg_dl", 2.0),
        ]);
        let err = LongitudinalFrame::from_tables(&table, &DemographicTable::default()).unwrap_err();
        assert!(matches!(err, FrameError::DuplicateDate { .. }));
    }

    #[test]
    fn demographics_fill_columns_the_observation_lacks() {
        let table = ObservationTable::from_rows(vec![
            ObservationRow::new("A", day(1)).with_value("glucose_mg_dl", 1.0),
            ObservationRow::new("A", day(2))
                .with_value("glucose_mg_dl", 2.0)
                .with_value("age", 50.0),
        ]);
        let mut numeric = BTreeMap::new();
        numeric.insert("age".to_string(), Some(71.0));
        let mut categorical = BTreeMap::new();
        categorical.insert("gender".to_string(), Some("F".to_string()));
        let demographics = DemographicTable::from_rows(vec![DemographicRow {
            patient_id: "A".to_string(),
            numeric,
            categorical,
        }]);

        let frame = LongitudinalFrame::from_tables(&table, &demographics).unwrap();
        assert_eq!(frame.values("age").unwrap(), &[Some(71.0), Some(50.0)]);
        assert_eq!(
            frame.categorical("gender").unwrap().values,
            vec![Some("F".to_string()), Some("F".to_string())]
        );
    }

    #[test]
    fn missing_observation_cells_fall_back_to_demographics() {
        let table = ObservationTable::from_rows(vec![
            ObservationRow::new("A", day(1)).with_missing("bmi"),
            ObservationRow::new("A", day(2)).with_value("bmi", 27.5),
            ObservationRow::new("B", day(1)).with_missing("bmi"),
        ]);
        let mut numeric = BTreeMap::new();
        numeric.insert("bmi".to_string(), Some(31.0));
        let demographics = DemographicTable::from_rows(vec![DemographicRow {
            patient_id: "A".to_string(),
            numeric,
            categorical: BTreeMap::new(),
        }]);

        let frame = LongitudinalFrame::from_tables(&table, &demographics).unwrap();
        assert_eq!(frame.values("bmi").unwrap(), &[Some(31.0), Some(27.5), None]);
        assert_eq!(frame.partitions().len(), 2);
        assert_eq!(frame.partition("B").unwrap().rows, 2..3);
    }

    #[test]
    fn per_patient_derivation_never_crosses_partitions() {
        let table = ObservationTable::from_rows(vec![
            ObservationRow::new("A", day(1)).with_value("steps", 1.0),
            ObservationRow::new("A", day(2)).with_value("steps", 2.0),
            ObservationRow::new("B", day(1)).with_value("steps", 5.0),
        ]);
        let frame = LongitudinalFrame::from_tables(&table, &DemographicTable::default()).unwrap();
        let source = frame.values("steps").unwrap().to_vec();
        let firsts = frame.derive_per_patient(&source, |slice| vec![slice[0]; slice.len()]);
        assert_eq!(firsts, vec![Some(1.0), Some(1.0), Some(5.0)]);
    }
}
