//! Score tables and the run summary written at the end of a pipeline run.

use crate::balance::IterationScore;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// A report could not be written or read back.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Error from the underlying Polars library: {0}")]
    Polars(#[from] PolarsError),
    #[error("Failed to read or write report file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML report file: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize report to TOML format: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Per-candidate balance table with columns `Iteration` (1-indexed) and
/// `avg_balance`.
pub fn score_frame(scores: &[IterationScore]) -> Result<DataFrame, ReportError> {
    let iterations: Vec<u32> = scores.iter().map(|s| s.iteration as u32).collect();
    let balances: Vec<f64> = scores.iter().map(|s| s.mean_imbalance).collect();
    let frame = DataFrame::new(vec![
        Series::new("Iteration".into(), iterations).into(),
        Series::new("avg_balance".into(), balances).into(),
    ])?;
    Ok(frame)
}

/// Writes a table as tab-separated values.
pub fn write_frame_tsv(frame: &mut DataFrame, path: &Path) -> Result<(), ReportError> {
    let file = File::create(path)?;
    CsvWriter::new(BufWriter::new(file))
        .with_separator(b'\t')
        .finish(frame)?;
    Ok(())
}

/// Summary of a completed run, saved alongside the labeled table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionReport {
    pub seed: u64,
    pub n_iterations: usize,
    pub batch_size: u64,
    pub n_batches: usize,
    pub subjects: usize,
    pub total_visits: u64,
    pub best_iteration: usize,
    pub best_score: f64,
    /// Subjects the winning candidate could not place within capacity.
    pub overflow_subjects: usize,
}

impl SelectionReport {
    /// Saves the report in a human-readable TOML format.
    pub fn save(&self, path: &Path) -> Result<(), ReportError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    /// Loads a report from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ReportError> {
        let toml_string = fs::read_to_string(path)?;
        let report = toml::from_str(&toml_string)?;
        Ok(report)
    }
}
