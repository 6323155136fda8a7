//! # Cohort Loading and Materialization
//!
//! This module is the entry point for user-provided data. It reads a tabular
//! file (tab-separated by default, comma-separated for `.csv`), validates the
//! user-named columns against a [`CohortSchema`], and produces the typed
//! views the pipeline needs: display ids, visit counts, and a dense covariate
//! matrix. Failures are assumed to be user-input errors, so every [`DataError`]
//! names the offending column.
//!
//! Categorical covariates must arrive numerically coded; a column that cannot
//! be read as numbers is rejected rather than re-encoded here.

use crate::assign::{Subject, SubjectIndex};
use crate::balance::Selection;
use ahash::AHashSet;
use ndarray::{Array1, Array2};
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// A data loading or validation failure.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars library: {0}")]
    Polars(#[from] PolarsError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("The required column '{0}' was not found in the input file.")]
    ColumnNotFound(String),
    #[error(
        "Column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error("Missing or null values were found in the column '{0}'.")]
    MissingValues(String),
    #[error("Non-finite values were found in the column '{0}'.")]
    NonFiniteValues(String),
    #[error("Column '{column_name}' contains the negative visit count {value}.")]
    NegativeVisits { column_name: String, value: i64 },
    #[error("Duplicate subject id '{0}'; subject ids must be unique.")]
    DuplicateSubjectId(String),
    #[error("The assignment vector has {found} entries but the cohort has {expected} rows.")]
    AssignmentLengthMismatch { expected: usize, found: usize },
}

/// Names of the columns the loader reads from the input table.
#[derive(Debug, Clone)]
pub struct CohortSchema {
    pub subject_id: String,
    pub visits: String,
    pub covariates: Vec<String>,
}

/// A validated cohort: the original table plus typed views of its columns.
///
/// Row order is preserved everywhere. `subjects[i]`, `subject_ids[i]`, and
/// row `i` of `covariates` all describe the same input row, and
/// `subjects[i].index` is `SubjectIndex(i)`.
#[derive(Debug, Clone)]
pub struct Cohort {
    pub frame: DataFrame,
    pub subject_ids: Vec<String>,
    pub subjects: Vec<Subject>,
    pub covariates: Array2<f64>,
    pub covariate_names: Vec<String>,
}

impl Cohort {
    pub fn n_subjects(&self) -> usize {
        self.subjects.len()
    }

    pub fn total_visits(&self) -> u64 {
        self.subjects.iter().map(|s| s.visits).sum()
    }
}

/// Reads a cohort table from disk and validates it against the schema.
pub fn load_cohort(path: &str, schema: &CohortSchema) -> Result<Cohort, DataError> {
    let frame = read_tabular(path)?;
    cohort_from_frame(frame, schema)
}

/// Validates an in-memory table against the schema and builds the typed
/// views. Exposed so callers with data already in a `DataFrame` can skip the
/// file round trip.
pub fn cohort_from_frame(frame: DataFrame, schema: &CohortSchema) -> Result<Cohort, DataError> {
    let subject_ids = extract_subject_ids(&frame, &schema.subject_id)?;
    let visits = extract_visit_counts(&frame, &schema.visits)?;

    let mut covariates = Array2::<f64>::zeros((frame.height(), schema.covariates.len()));
    for (j, name) in schema.covariates.iter().enumerate() {
        let column = extract_f64_column(&frame, name)?;
        covariates.column_mut(j).assign(&column);
    }

    let subjects = visits
        .into_iter()
        .enumerate()
        .map(|(index, visits)| Subject {
            index: SubjectIndex(index),
            visits,
        })
        .collect();

    Ok(Cohort {
        frame,
        subject_ids,
        subjects,
        covariates,
        covariate_names: schema.covariates.clone(),
    })
}

/// Returns a copy of the cohort table with the winning batch labels attached
/// as a nullable `Batch_Assignment` column (bounded batches `1..=n`, overflow
/// `n + 1`).
pub fn attach_assignments(cohort: &Cohort, selection: &Selection) -> Result<DataFrame, DataError> {
    if selection.assignments.len() != cohort.n_subjects() {
        return Err(DataError::AssignmentLengthMismatch {
            expected: cohort.n_subjects(),
            found: selection.assignments.len(),
        });
    }

    let labels = Series::new("Batch_Assignment".into(), selection.assignments.clone());
    let mut frame = cohort.frame.clone();
    frame.with_column(labels)?;
    Ok(frame)
}

fn read_tabular(path: &str) -> Result<DataFrame, DataError> {
    let path = Path::new(path);
    let separator = match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("csv") => b',',
        _ => b'\t',
    };
    let file = File::open(path)?;
    CsvReadOptions::default()
        .with_has_header(true)
        .map_parse_options(|options| options.with_separator(separator))
        .into_reader_with_file_handle(file)
        .finish()
        .map_err(DataError::from)
}

/// Renders the id column to strings and rejects nulls and duplicates.
fn extract_subject_ids(df: &DataFrame, name: &str) -> Result<Vec<String>, DataError> {
    let column = df
        .column(name)
        .map_err(|_| DataError::ColumnNotFound(name.to_string()))?;
    if column.null_count() > 0 {
        return Err(DataError::MissingValues(name.to_string()));
    }

    let mut ids = Vec::with_capacity(df.height());
    let mut seen = AHashSet::with_capacity(df.height());
    for i in 0..df.height() {
        let value = column.get(i)?;
        let text = match value {
            AnyValue::String(s) => s.to_string(),
            AnyValue::StringOwned(s) => s.to_string(),
            other => other.to_string(),
        };
        if !seen.insert(text.clone()) {
            return Err(DataError::DuplicateSubjectId(text));
        }
        ids.push(text);
    }
    Ok(ids)
}

fn extract_visit_counts(df: &DataFrame, name: &str) -> Result<Vec<u64>, DataError> {
    let series = df
        .column(name)
        .map_err(|_| DataError::ColumnNotFound(name.to_string()))?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValues(name.to_string()));
    }
    let dtype = series.dtype().clone();
    let casted = series
        .cast(&DataType::Int64)
        .map_err(|_| DataError::ColumnWrongType {
            column_name: name.to_string(),
            expected_type: "integer",
            found_type: dtype.to_string(),
        })?;
    let values = casted.i64().expect("casted to i64");
    // Nulls introduced by the cast mean the values were not numbers.
    if values.null_count() > 0 {
        return Err(DataError::ColumnWrongType {
            column_name: name.to_string(),
            expected_type: "integer",
            found_type: dtype.to_string(),
        });
    }

    let mut visits = Vec::with_capacity(values.len());
    for value in values.into_no_null_iter() {
        if value < 0 {
            return Err(DataError::NegativeVisits {
                column_name: name.to_string(),
                value,
            });
        }
        visits.push(value as u64);
    }
    Ok(visits)
}

fn extract_f64_column(df: &DataFrame, name: &str) -> Result<Array1<f64>, DataError> {
    let series = df
        .column(name)
        .map_err(|_| DataError::ColumnNotFound(name.to_string()))?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValues(name.to_string()));
    }
    let dtype = series.dtype().clone();
    let series = if dtype != DataType::Float64 {
        series
            .cast(&DataType::Float64)
            .map_err(|_| DataError::ColumnWrongType {
                column_name: name.to_string(),
                expected_type: "float",
                found_type: dtype.to_string(),
            })?
    } else {
        series.clone()
    };
    let values = series.f64().expect("casted to f64");
    if values.null_count() > 0 {
        return Err(DataError::ColumnWrongType {
            column_name: name.to_string(),
            expected_type: "float",
            found_type: dtype.to_string(),
        });
    }

    let column = Array1::from_iter(values.into_no_null_iter());
    if column.iter().any(|v| !v.is_finite()) {
        return Err(DataError::NonFiniteValues(name.to_string()));
    }
    Ok(column)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::Selection;
    use approx::assert_abs_diff_eq;
    use polars::prelude::{CsvWriter, DataFrame, SerWriter, Series};
    use tempfile::{Builder, NamedTempFile};

    fn sample_dataframe() -> DataFrame {
        DataFrame::new(vec![
            Series::new("subject_id".into(), vec!["S01", "S02", "S03", "S04"]).into(),
            Series::new("n_visits".into(), vec![3i32, 5, 2, 4]).into(),
            Series::new("age".into(), vec![61.0, 48.5, 72.3, 55.0]).into(),
            Series::new("sex".into(), vec![0i32, 1, 1, 0]).into(),
        ])
        .expect("construct sample dataframe")
    }

    fn schema() -> CohortSchema {
        CohortSchema {
            subject_id: "subject_id".to_string(),
            visits: "n_visits".to_string(),
            covariates: vec!["age".to_string(), "sex".to_string()],
        }
    }

    fn write_with_separator(df: &DataFrame, suffix: &str, separator: u8) -> NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().expect("tempfile");
        let mut clone = df.clone();
        CsvWriter::new(file.as_file_mut())
            .with_separator(separator)
            .finish(&mut clone)
            .expect("write table");
        file
    }

    #[test]
    fn loads_a_tsv_cohort() {
        let file = write_with_separator(&sample_dataframe(), ".tsv", b'\t');
        let cohort = load_cohort(file.path().to_str().unwrap(), &schema()).expect("load");

        assert_eq!(cohort.n_subjects(), 4);
        assert_eq!(cohort.total_visits(), 14);
        assert_eq!(cohort.subject_ids[0], "S01");
        assert_eq!(cohort.subjects[2].index, SubjectIndex(2));
        assert_eq!(cohort.subjects[2].visits, 2);
        assert_eq!(cohort.covariates.dim(), (4, 2));
        assert_abs_diff_eq!(cohort.covariates[[1, 0]], 48.5, epsilon = 1e-12);
        assert_abs_diff_eq!(cohort.covariates[[1, 1]], 1.0, epsilon = 1e-12);
        assert_eq!(cohort.covariate_names, vec!["age", "sex"]);
    }

    #[test]
    fn csv_extension_switches_to_comma() {
        let file = write_with_separator(&sample_dataframe(), ".csv", b',');
        let cohort = load_cohort(file.path().to_str().unwrap(), &schema()).expect("load");
        assert_eq!(cohort.n_subjects(), 4);
        assert_eq!(cohort.total_visits(), 14);
    }

    #[test]
    fn missing_columns_are_reported_by_name() {
        let mut wrong = schema();
        wrong.covariates.push("bmi".to_string());
        let err = cohort_from_frame(sample_dataframe(), &wrong).expect_err("no bmi column");
        match err {
            DataError::ColumnNotFound(name) => assert_eq!(name, "bmi"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_numeric_covariates_are_rejected() {
        let mut df = sample_dataframe();
        df.with_column(Series::new(
            "site".into(),
            vec!["north", "south", "north", "east"],
        ))
        .unwrap();
        let mut with_site = schema();
        with_site.covariates = vec!["site".to_string()];

        let err = cohort_from_frame(df, &with_site).expect_err("site is not numeric");
        match err {
            DataError::ColumnWrongType { column_name, .. } => assert_eq!(column_name, "site"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn null_visits_are_rejected() {
        let mut df = sample_dataframe();
        df.with_column(Series::new(
            "n_visits".into(),
            vec![Some(3i32), None, Some(2), Some(4)],
        ))
        .unwrap();
        let err = cohort_from_frame(df, &schema()).expect_err("null visit count");
        match err {
            DataError::MissingValues(name) => assert_eq!(name, "n_visits"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn negative_visits_are_rejected() {
        let mut df = sample_dataframe();
        df.with_column(Series::new("n_visits".into(), vec![3i32, -2, 2, 4]))
            .unwrap();
        let err = cohort_from_frame(df, &schema()).expect_err("negative visit count");
        match err {
            DataError::NegativeVisits { column_name, value } => {
                assert_eq!(column_name, "n_visits");
                assert_eq!(value, -2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn duplicate_subject_ids_are_rejected() {
        let mut df = sample_dataframe();
        df.with_column(Series::new(
            "subject_id".into(),
            vec!["S01", "S02", "S01", "S04"],
        ))
        .unwrap();
        let err = cohort_from_frame(df, &schema()).expect_err("duplicate id");
        match err {
            DataError::DuplicateSubjectId(id) => assert_eq!(id, "S01"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn null_subject_ids_are_rejected() {
        let mut df = sample_dataframe();
        df.with_column(Series::new(
            "subject_id".into(),
            vec![Some("S01"), None, Some("S03"), Some("S04")],
        ))
        .unwrap();
        let err = cohort_from_frame(df, &schema()).expect_err("null id");
        match err {
            DataError::MissingValues(name) => assert_eq!(name, "subject_id"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_finite_covariates_are_rejected() {
        let mut df = sample_dataframe();
        df.with_column(Series::new("age".into(), vec![61.0, f64::NAN, 72.3, 55.0]))
            .unwrap();
        let err = cohort_from_frame(df, &schema()).expect_err("NaN covariate");
        match err {
            DataError::NonFiniteValues(name) => assert_eq!(name, "age"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn attach_assignments_appends_the_label_column() {
        let cohort = cohort_from_frame(sample_dataframe(), &schema()).expect("load");
        let selection = Selection {
            best_iteration: 1,
            best_score: 0.0,
            scores: vec![],
            assignments: vec![Some(1), Some(2), Some(3), None],
        };

        let labeled = attach_assignments(&cohort, &selection).expect("attach");
        assert_eq!(labeled.height(), 4);
        let column = labeled.column("Batch_Assignment").expect("label column");
        let values = column.u32().expect("u32 labels");
        assert_eq!(values.get(0), Some(1));
        assert_eq!(values.get(2), Some(3));
        assert_eq!(values.get(3), None);
    }

    #[test]
    fn attach_assignments_rejects_wrong_lengths() {
        let cohort = cohort_from_frame(sample_dataframe(), &schema()).expect("load");
        let selection = Selection {
            best_iteration: 1,
            best_score: 0.0,
            scores: vec![],
            assignments: vec![Some(1)],
        };

        let err = attach_assignments(&cohort, &selection).expect_err("length mismatch");
        match err {
            DataError::AssignmentLengthMismatch { expected, found } => {
                assert_eq!(expected, 4);
                assert_eq!(found, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
