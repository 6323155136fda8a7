//! # Randomized Batch Assignment
//!
//! This module generates candidate assignments of subjects to a fixed number
//! of capacity-bounded batches. Each candidate is produced by shuffling the
//! subjects and packing them greedily: batches are scanned in a fixed index
//! order and a subject joins the first batch with room for its visits.
//! Subjects that fit nowhere are routed to a single unbounded overflow batch.
//!
//! The scan order is part of the observable contract. First fit keeps early
//! batches dense and makes a candidate a pure function of the shuffled order,
//! so a caller-supplied seed reproduces the entire candidate set.

use ahash::AHashMap;
use rand::Rng;
use rand::seq::SliceRandom;
use thiserror::Error;

/// Rejected run parameters. Raised before any randomness is consumed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("the number of iterations must be positive")]
    ZeroIterations,
    #[error("the batch capacity must be positive")]
    ZeroBatchSize,
    #[error("the number of batches must be positive")]
    ZeroBatches,
}

/// Run parameters for candidate generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignmentConfig {
    /// Number of independent candidate partitions to generate.
    pub n_iterations: usize,
    /// Capacity of each bounded batch, in visit units.
    pub batch_size: u64,
    /// Number of bounded batches per candidate.
    pub n_batches: usize,
}

impl AssignmentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_iterations == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.n_batches == 0 {
            return Err(ConfigError::ZeroBatches);
        }
        Ok(())
    }
}

/// Dense row index of a subject in the cohort table. Covariate rows, display
/// ids, and batch memberships all refer to subjects through this index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubjectIndex(pub usize);

/// A subject to be placed: its cohort row and its visit weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subject {
    pub index: SubjectIndex,
    pub visits: u64,
}

/// One batch of a candidate partition: member subjects and their visit total.
///
/// The container itself is a plain membership map; the capacity ceiling is
/// enforced by [`generate`], which never revises a placement.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    members: AHashMap<SubjectIndex, u64>,
    total_visits: u64,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, subject: Subject) {
        self.total_visits += subject.visits;
        self.members.insert(subject.index, subject.visits);
    }

    pub fn contains(&self, index: SubjectIndex) -> bool {
        self.members.contains_key(&index)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn total_visits(&self) -> u64 {
        self.total_visits
    }

    pub fn members(&self) -> impl Iterator<Item = SubjectIndex> + '_ {
        self.members.keys().copied()
    }
}

/// One candidate assignment: `n_batches` bounded batches in fixed order,
/// optionally followed by an overflow batch holding subjects that fit
/// nowhere. Every input subject appears in exactly one batch.
#[derive(Debug, Clone)]
pub struct Partition {
    bounded: Vec<Batch>,
    overflow: Option<Batch>,
}

impl Partition {
    pub fn new(bounded: Vec<Batch>, overflow: Option<Batch>) -> Self {
        assert!(
            !bounded.is_empty(),
            "a partition needs at least one bounded batch"
        );
        Self { bounded, overflow }
    }

    pub fn bounded(&self) -> &[Batch] {
        &self.bounded
    }

    pub fn overflow(&self) -> Option<&Batch> {
        self.overflow.as_ref()
    }

    /// Batches in label order: bounded batches first, then overflow if any.
    pub fn batches(&self) -> impl Iterator<Item = &Batch> {
        self.bounded.iter().chain(self.overflow.iter())
    }

    /// Number of subjects the candidate could not place within capacity.
    pub fn overflow_len(&self) -> usize {
        self.overflow.as_ref().map_or(0, Batch::len)
    }
}

/// The ordered candidate partitions produced by one run of [`generate`].
/// Candidates are reported 1-indexed everywhere downstream.
#[derive(Debug, Clone)]
pub struct CandidateSet {
    partitions: Vec<Partition>,
}

impl CandidateSet {
    pub fn from_partitions(partitions: Vec<Partition>) -> Self {
        Self { partitions }
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Number of candidates that needed an overflow batch.
    pub fn overflowed_iterations(&self) -> usize {
        self.partitions
            .iter()
            .filter(|p| p.overflow.is_some())
            .count()
    }
}

/// Generates `config.n_iterations` independent candidate partitions.
///
/// The caller owns the random stream. Each iteration consumes exactly one
/// shuffle of the subject slice, so a stream seeded the same way reproduces
/// the exact candidate set. A subject whose weight alone exceeds the batch
/// capacity lands in overflow in every candidate; this is surfaced as a
/// warning, never an error.
pub fn generate<R: Rng + ?Sized>(
    subjects: &[Subject],
    config: &AssignmentConfig,
    rng: &mut R,
) -> Result<CandidateSet, ConfigError> {
    config.validate()?;

    let total_visits: u64 = subjects.iter().map(|s| s.visits).sum();
    log::info!(
        "Generating {} candidate partitions: {} subjects, {} total visits, {} batches of capacity {}",
        config.n_iterations,
        subjects.len(),
        total_visits,
        config.n_batches,
        config.batch_size
    );

    let mut order: Vec<Subject> = subjects.to_vec();
    let mut partitions = Vec::with_capacity(config.n_iterations);
    for _ in 0..config.n_iterations {
        order.shuffle(rng);
        partitions.push(place_all(&order, config));
    }

    let candidates = CandidateSet { partitions };
    let overflowed = candidates.overflowed_iterations();
    if overflowed > 0 {
        log::warn!(
            "{} of {} candidates could not place every subject within capacity; leftovers went to an overflow batch",
            overflowed,
            config.n_iterations
        );
    }
    Ok(candidates)
}

/// Packs subjects in the given order by first fit over the bounded batches.
fn place_all(order: &[Subject], config: &AssignmentConfig) -> Partition {
    let mut bounded = vec![Batch::new(); config.n_batches];
    let mut overflow = Batch::new();

    for &subject in order {
        let slot = bounded
            .iter_mut()
            .find(|batch| batch.total_visits() + subject.visits <= config.batch_size);
        match slot {
            Some(batch) => batch.insert(subject),
            None => overflow.insert(subject),
        }
    }

    Partition {
        bounded,
        overflow: (!overflow.is_empty()).then_some(overflow),
    }
}
