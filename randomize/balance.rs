//! # Balance Evaluation and Candidate Selection
//!
//! Scores every candidate partition and keeps the most balanced one. Each
//! batch of a candidate is treated as the positive class of a binary model
//! over the covariates: the batch's imbalance is the absolute gap between the
//! mean predicted membership probability inside and outside the batch, and a
//! candidate's score is the mean over its batches. The candidate with the
//! lowest score wins; ties go to the lowest iteration index.
//!
//! Candidates are independent, so scoring runs on the rayon pool. Collection
//! is index-ordered, which keeps the score table and the selected winner
//! identical to a sequential evaluation.

use crate::assign::{Batch, CandidateSet, Partition};
use crate::classifier::{BinaryClassifier, ClassifierError};
use crate::progress::EvaluationObserver;
use itertools::Itertools;
use ndarray::{Array1, ArrayView2};
use rayon::prelude::*;
use thiserror::Error;

/// Evaluation of a candidate set failed.
#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("there are no candidate partitions to evaluate")]
    NoCandidates,
    #[error(
        "candidate {iteration}: batch {batch} holds {members} of {population} subjects, so its membership labels are single-class and balance is undefined"
    )]
    DegenerateLabel {
        iteration: usize,
        batch: usize,
        members: usize,
        population: usize,
    },
    #[error("candidate {iteration}: batch {batch} produced a non-finite imbalance")]
    NonFiniteImbalance { iteration: usize, batch: usize },
    #[error("classifier failure: {0}")]
    Classifier(#[from] ClassifierError),
}

/// Balance score of one candidate, 1-indexed as reported downstream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationScore {
    pub iteration: usize,
    pub mean_imbalance: f64,
}

/// The winning candidate and the full score table.
///
/// `assignments` holds the winner's batch label for every cohort row:
/// bounded batches are `1..=n` in scan order and the overflow batch is
/// `n + 1`. `None` marks a row no batch claimed, which cannot happen for
/// generated candidates.
#[derive(Debug, Clone)]
pub struct Selection {
    pub best_iteration: usize,
    pub best_score: f64,
    pub scores: Vec<IterationScore>,
    pub assignments: Vec<Option<u32>>,
}

/// Scores every candidate and selects the minimum-imbalance partition.
///
/// Covariate rows must be ordered by [`crate::assign::SubjectIndex`], i.e.
/// row `i` describes the subject with index `i`. A fresh classifier is drawn
/// from `make_classifier` for every batch of every candidate. Scoring runs in
/// parallel; `observer.on_partition_scored` fires from worker threads in an
/// unspecified order.
pub fn evaluate_and_select<C, F>(
    covariates: ArrayView2<'_, f64>,
    candidates: &CandidateSet,
    make_classifier: F,
    observer: &dyn EvaluationObserver,
) -> Result<Selection, EvaluationError>
where
    C: BinaryClassifier,
    F: Fn() -> C + Sync,
{
    if candidates.is_empty() {
        return Err(EvaluationError::NoCandidates);
    }

    observer.on_start(candidates.len());
    let scores = candidates
        .partitions()
        .par_iter()
        .enumerate()
        .map(|(index, partition)| {
            let iteration = index + 1;
            let mean_imbalance =
                score_partition(covariates, partition, iteration, &make_classifier)?;
            observer.on_partition_scored(iteration, mean_imbalance);
            Ok(IterationScore {
                iteration,
                mean_imbalance,
            })
        })
        .collect::<Result<Vec<_>, EvaluationError>>()?;
    observer.on_finish();

    // First minimum wins, per the tie-break contract.
    let best_index = scores
        .iter()
        .position_min_by(|a, b| a.mean_imbalance.total_cmp(&b.mean_imbalance))
        .expect("candidate set is non-empty");
    let winner = &candidates.partitions()[best_index];

    log::info!(
        "Selected candidate {} of {} with mean imbalance {:.6}",
        best_index + 1,
        scores.len(),
        scores[best_index].mean_imbalance
    );

    Ok(Selection {
        best_iteration: best_index + 1,
        best_score: scores[best_index].mean_imbalance,
        scores,
        assignments: label_rows(winner, covariates.nrows()),
    })
}

/// Mean per-batch imbalance of one candidate.
fn score_partition<C, F>(
    covariates: ArrayView2<'_, f64>,
    partition: &Partition,
    iteration: usize,
    make_classifier: &F,
) -> Result<f64, EvaluationError>
where
    C: BinaryClassifier,
    F: Fn() -> C,
{
    let population = covariates.nrows();
    let mut imbalance_sum = 0.0;
    let mut batch_count = 0usize;

    for (offset, batch) in partition.batches().enumerate() {
        let batch_number = offset + 1;
        if batch.is_empty() || batch.len() == population {
            return Err(EvaluationError::DegenerateLabel {
                iteration,
                batch: batch_number,
                members: batch.len(),
                population,
            });
        }

        let labels = membership_labels(batch, population);
        let mut model = make_classifier();
        model.fit(covariates, labels.view())?;
        let probabilities = model.predict_proba(covariates)?;

        let imbalance = mean_probability_gap(&probabilities, &labels);
        if !imbalance.is_finite() {
            return Err(EvaluationError::NonFiniteImbalance {
                iteration,
                batch: batch_number,
            });
        }
        imbalance_sum += imbalance;
        batch_count += 1;
    }

    Ok(imbalance_sum / batch_count as f64)
}

/// 0/1 membership labels over the whole population for one batch.
fn membership_labels(batch: &Batch, population: usize) -> Array1<f64> {
    let mut labels = Array1::<f64>::zeros(population);
    for index in batch.members() {
        labels[index.0] = 1.0;
    }
    labels
}

/// Absolute gap between the mean predicted probability of the in-batch and
/// out-of-batch subjects.
fn mean_probability_gap(probabilities: &Array1<f64>, labels: &Array1<f64>) -> f64 {
    let mut in_sum = 0.0;
    let mut in_count = 0usize;
    let mut out_sum = 0.0;
    let mut out_count = 0usize;
    for (&p, &label) in probabilities.iter().zip(labels.iter()) {
        if label == 1.0 {
            in_sum += p;
            in_count += 1;
        } else {
            out_sum += p;
            out_count += 1;
        }
    }
    (in_sum / in_count as f64 - out_sum / out_count as f64).abs()
}

/// Batch labels for every cohort row: bounded batches `1..=n` in order,
/// overflow `n + 1`.
fn label_rows(partition: &Partition, population: usize) -> Vec<Option<u32>> {
    let mut labels = vec![None; population];
    for (offset, batch) in partition.batches().enumerate() {
        let label = offset as u32 + 1;
        for index in batch.members() {
            labels[index.0] = Some(label);
        }
    }
    labels
}
