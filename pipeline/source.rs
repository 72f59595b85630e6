//! # CSV Data Source
//!
//! Reads the three input tables (observations, events, demographics) from
//! comma-separated files with a header row through the `polars` CSV reader,
//! and turns the resulting `DataFrame`s into the typed tables the pipeline
//! consumes.
//!
//! - Column typing: `patient_id` and the date columns are fixed. Every other
//!   column keeps the dtype `polars` infers over the whole file: numeric and
//!   boolean columns are cast to `f64` (`true`/`false` become 1/0), string
//!   columns are categorical.
//! - Missing cells: empty, `NA`, `NaN`, `nan`, `null` and `None` are read as nulls.
//! - Schema checks (required columns) belong to `RiskPipeline::load`; this module
//!   only reports files it cannot parse.

use crate::types::{
    DATE_COLUMN, DemographicRow, DemographicTable, EventRow, EventTable, ObservationRow,
    ObservationTable, PATIENT_ID_COLUMN,
};
use chrono::NaiveDate;
use polars::io::mmap::MmapBytesReader;
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

const MISSING_MARKERS: [&str; 5] = ["NA", "NaN", "nan", "null", "None"];
pub const EVENT_DATE_COLUMN: &str = "event_date";
pub const EVENT_TYPE_COLUMN: &str = "event_type";

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to open '{path}': {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("Row {row}: '{value}' in column '{column}' is not a date (expected YYYY-MM-DD).")]
    InvalidDate {
        row: usize,
        column: String,
        value: String,
    },
    #[error("Row {row}: the '{column}' cell is empty.")]
    MissingIdentifier { row: usize, column: String },
}

/// Paths of the three input files.
#[derive(Debug, Clone)]
pub struct CsvSource {
    pub observations: PathBuf,
    pub events: PathBuf,
    pub demographics: PathBuf,
}

impl CsvSource {
    pub fn new(
        observations: impl Into<PathBuf>,
        events: impl Into<PathBuf>,
        demographics: impl Into<PathBuf>,
    ) -> Self {
        Self {
            observations: observations.into(),
            events: events.into(),
            demographics: demographics.into(),
        }
    }

    pub fn load(&self) -> Result<(ObservationTable, EventTable, DemographicTable), SourceError> {
        let observations = read_observations(&read_csv(open(&self.observations)?)?)?;
        let events = read_events(&read_csv(open(&self.events)?)?)?;
        let demographics = read_demographics(&read_csv(open(&self.demographics)?)?)?;
        log::info!(
            "Read {} observation rows, {} event rows and {} demographic rows",
            observations.rows.len(),
            events.rows.len(),
            demographics.rows.len()
        );
        Ok((observations, events, demographics))
    }
}

fn open(path: &Path) -> Result<File, SourceError> {
    File::open(path).map_err(|source| SourceError::Open {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads a headed CSV, inferring dtypes over every row.
pub fn read_csv<R: MmapBytesReader>(reader: R) -> Result<DataFrame, SourceError> {
    let null_values = NullValues::AllColumns(MISSING_MARKERS.iter().map(|m| (*m).into()).collect());
    let df = CsvReader::new(reader)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(None)
                .with_parse_options(CsvParseOptions::default().with_null_values(Some(null_values))),
        )
        .finish()?;
    Ok(df)
}

/// Accepts plain dates and timestamps that start with one.
fn parse_date(cell: &str) -> Option<NaiveDate> {
    let cell = cell.trim();
    NaiveDate::parse_from_str(cell, "%Y-%m-%d")
        .ok()
        .or_else(|| cell.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

fn header(df: &DataFrame) -> Vec<String> {
    df.get_column_names().iter().map(|c| c.to_string()).collect()
}

fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| c.as_str() == name)
}

fn string_cells(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, SourceError> {
    let column = df.column(name)?.cast(&DataType::String)?;
    Ok(column
        .str()?
        .into_iter()
        .map(|cell| cell.map(str::trim).filter(|c| !c.is_empty()).map(str::to_string))
        .collect())
}

fn numeric_cells(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>, SourceError> {
    let column = df.column(name)?.cast(&DataType::Float64)?;
    Ok(column.f64()?.into_iter().collect())
}

fn identifiers(df: &DataFrame) -> Result<Vec<String>, SourceError> {
    string_cells(df, PATIENT_ID_COLUMN)?
        .into_iter()
        .enumerate()
        .map(|(i, cell)| {
            cell.ok_or_else(|| SourceError::MissingIdentifier {
                row: i + 1,
                column: PATIENT_ID_COLUMN.to_string(),
            })
        })
        .collect()
}

/// Per-column cells of every column other than `skip`, split by dtype.
struct ValueColumns {
    numeric: Vec<(String, Vec<Option<f64>>)>,
    categorical: Vec<(String, Vec<Option<String>>)>,
}

impl ValueColumns {
    fn extract(df: &DataFrame, skip: &[&str]) -> Result<Self, SourceError> {
        let mut numeric = Vec::new();
        let mut categorical = Vec::new();
        for column in df.get_columns() {
            let name = column.name().to_string();
            if skip.contains(&name.as_str()) {
                continue;
            }
            if matches!(column.dtype(), DataType::String) {
                categorical.push((name.clone(), string_cells(df, &name)?));
            } else {
                numeric.push((name.clone(), numeric_cells(df, &name)?));
            }
        }
        Ok(Self { numeric, categorical })
    }

    fn fill_row(
        &self,
        i: usize,
        numeric: &mut BTreeMap<String, Option<f64>>,
        categorical: &mut BTreeMap<String, Option<String>>,
    ) {
        for (name, cells) in &self.numeric {
            numeric.insert(name.clone(), cells[i]);
        }
        for (name, cells) in &self.categorical {
            categorical.insert(name.clone(), cells[i].clone());
        }
    }
}

/// Reads the observation table. A missing `patient_id` or `date` column yields
/// an empty-row table whose header lacks it, so `load` can report the schema error.
pub fn read_observations(df: &DataFrame) -> Result<ObservationTable, SourceError> {
    if !has_column(df, PATIENT_ID_COLUMN) || !has_column(df, DATE_COLUMN) {
        return Ok(ObservationTable {
            columns: header(df),
            rows: Vec::new(),
        });
    }
    let ids = identifiers(df)?;
    let dates = string_cells(df, DATE_COLUMN)?;
    let values = ValueColumns::extract(df, &[PATIENT_ID_COLUMN, DATE_COLUMN])?;
    let mut rows = Vec::with_capacity(df.height());
    for (i, (patient_id, cell)) in ids.into_iter().zip(dates).enumerate() {
        let date = cell.as_deref().and_then(parse_date).ok_or_else(|| SourceError::InvalidDate {
            row: i + 1,
            column: DATE_COLUMN.to_string(),
            value: cell.clone().unwrap_or_default(),
        })?;
        let mut row = ObservationRow::new(patient_id, date);
        values.fill_row(i, &mut row.numeric, &mut row.categorical);
        rows.push(row);
    }
    Ok(ObservationTable {
        columns: header(df),
        rows,
    })
}

/// Reads the event table. Unparseable event dates are kept as missing.
pub fn read_events(df: &DataFrame) -> Result<EventTable, SourceError> {
    if !has_column(df, PATIENT_ID_COLUMN) {
        return Ok(EventTable {
            columns: header(df),
            rows: Vec::new(),
        });
    }
    let ids = identifiers(df)?;
    let optional = |name: &str| -> Result<Vec<Option<String>>, SourceError> {
        if has_column(df, name) {
            string_cells(df, name)
        } else {
            Ok(vec![None; df.height()])
        }
    };
    let dates = optional(EVENT_DATE_COLUMN)?;
    let types = optional(EVENT_TYPE_COLUMN)?;
    let rows = ids
        .into_iter()
        .zip(dates)
        .zip(types)
        .map(|((patient_id, date), event_type)| EventRow {
            patient_id,
            event_date: date.as_deref().and_then(parse_date),
            event_type,
        })
        .collect();
    Ok(EventTable {
        columns: header(df),
        rows,
    })
}

pub fn read_demographics(df: &DataFrame) -> Result<DemographicTable, SourceError> {
    if !has_column(df, PATIENT_ID_COLUMN) {
        return Ok(DemographicTable {
            columns: header(df),
            rows: Vec::new(),
        });
    }
    let values = ValueColumns::extract(df, &[PATIENT_ID_COLUMN])?;
    let rows = identifiers(df)?
        .into_iter()
        .enumerate()
        .map(|(i, patient_id)| {
            let mut row = DemographicRow {
                patient_id,
                numeric: BTreeMap::new(),
                categorical: BTreeMap::new(),
            };
            values.fill_row(i, &mut row.numeric, &mut row.categorical);
            row
        })
        .collect();
    Ok(DemographicTable {
        columns: header(df),
        rows,
    })
}
