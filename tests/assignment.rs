use batchrand::assign::{self, AssignmentConfig, CandidateSet, Partition, Subject, SubjectIndex};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn subjects_from_visits(visits: &[u64]) -> Vec<Subject> {
    visits
        .iter()
        .enumerate()
        .map(|(index, &visits)| Subject {
            index: SubjectIndex(index),
            visits,
        })
        .collect()
}

fn config(n_iterations: usize, batch_size: u64, n_batches: usize) -> AssignmentConfig {
    AssignmentConfig {
        n_iterations,
        batch_size,
        n_batches,
    }
}

fn generate_with_seed(subjects: &[Subject], config: &AssignmentConfig, seed: u64) -> CandidateSet {
    let mut rng = StdRng::seed_from_u64(seed);
    assign::generate(subjects, config, &mut rng).expect("generate")
}

/// Membership of every batch (bounded first, then overflow), sorted within
/// each batch so partitions can be compared structurally.
fn memberships(partition: &Partition) -> Vec<Vec<usize>> {
    partition
        .batches()
        .map(|batch| {
            let mut members: Vec<usize> = batch.members().map(|index| index.0).collect();
            members.sort_unstable();
            members
        })
        .collect()
}

fn mixed_cohort() -> Vec<Subject> {
    subjects_from_visits(&[
        3, 1, 4, 2, 5, 1, 1, 2, 3, 4, 2, 1, 6, 2, 3, 1, 2, 4, 1, 5, 2, 3, 1, 2, 4,
    ])
}

#[test]
fn every_candidate_conserves_the_subject_multiset() {
    let subjects = mixed_cohort();
    let candidates = generate_with_seed(&subjects, &config(50, 12, 4), 1989);

    let expected: Vec<usize> = (0..subjects.len()).collect();
    for partition in candidates.partitions() {
        let mut seen: Vec<usize> = partition
            .batches()
            .flat_map(|batch| batch.members().map(|index| index.0))
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, expected, "a subject was lost or duplicated");
    }
}

#[test]
fn bounded_batches_never_exceed_capacity() {
    let subjects = mixed_cohort();
    let batch_size = 12;
    let candidates = generate_with_seed(&subjects, &config(50, batch_size, 4), 2024);

    for partition in candidates.partitions() {
        for batch in partition.bounded() {
            assert!(batch.total_visits() <= batch_size);
            let recomputed: u64 = batch
                .members()
                .map(|index| subjects[index.0].visits)
                .sum();
            assert_eq!(recomputed, batch.total_visits());
        }
    }
}

#[test]
fn the_same_seed_reproduces_the_candidate_set() {
    let subjects = mixed_cohort();
    let first = generate_with_seed(&subjects, &config(20, 12, 4), 7);
    let second = generate_with_seed(&subjects, &config(20, 12, 4), 7);

    assert_eq!(first.len(), second.len());
    for (a, b) in first.partitions().iter().zip(second.partitions()) {
        assert_eq!(memberships(a), memberships(b));
    }
}

#[test]
fn different_seeds_diverge() {
    let subjects = mixed_cohort();
    let first = generate_with_seed(&subjects, &config(5, 12, 4), 7);
    let second = generate_with_seed(&subjects, &config(5, 12, 4), 8);

    let diverged = first
        .partitions()
        .iter()
        .zip(second.partitions())
        .any(|(a, b)| memberships(a) != memberships(b));
    assert!(diverged, "independent seeds produced identical candidates");
}

#[test]
fn candidate_count_matches_the_iteration_count() {
    let subjects = subjects_from_visits(&[1, 2, 3]);
    let candidates = generate_with_seed(&subjects, &config(17, 10, 2), 3);
    assert_eq!(candidates.len(), 17);
}

#[test]
fn overfull_cohorts_route_leftovers_to_overflow() {
    // 43 total visits cannot fit two batches of 20; every candidate needs an
    // overflow batch and conservation still holds.
    let subjects = subjects_from_visits(&[10, 10, 10, 10, 1, 1, 1]);
    let candidates = generate_with_seed(&subjects, &config(10, 20, 2), 1989);

    assert_eq!(candidates.overflowed_iterations(), 10);
    for partition in candidates.partitions() {
        let bounded_total: u64 = partition
            .bounded()
            .iter()
            .map(|batch| batch.total_visits())
            .sum();
        let overflow = partition.overflow().expect("43 visits exceed capacity");
        for batch in partition.bounded() {
            assert!(batch.total_visits() <= 20);
        }
        assert_eq!(bounded_total + overflow.total_visits(), 43);
    }
}

#[test]
fn cohorts_that_fit_never_overflow() {
    let subjects = subjects_from_visits(&[5, 5, 5, 5]);
    let candidates = generate_with_seed(&subjects, &config(20, 10, 2), 5);

    assert_eq!(candidates.overflowed_iterations(), 0);
    for partition in candidates.partitions() {
        assert!(partition.overflow().is_none());
        assert_eq!(partition.overflow_len(), 0);
    }
}

#[test]
fn oversized_subjects_always_land_in_overflow() {
    let subjects = subjects_from_visits(&[50, 3, 3]);
    let candidates = generate_with_seed(&subjects, &config(10, 10, 2), 42);

    assert_eq!(candidates.overflowed_iterations(), 10);
    for partition in candidates.partitions() {
        let overflow = partition.overflow().expect("oversized subject");
        assert!(overflow.contains(SubjectIndex(0)));
        assert!(!overflow.contains(SubjectIndex(1)));
        assert!(!overflow.contains(SubjectIndex(2)));
        assert_eq!(partition.overflow_len(), 1);
    }
}

#[test]
fn empty_cohorts_produce_empty_partitions() {
    let candidates = generate_with_seed(&[], &config(3, 10, 2), 1);

    assert_eq!(candidates.len(), 3);
    assert_eq!(candidates.overflowed_iterations(), 0);
    for partition in candidates.partitions() {
        assert_eq!(partition.bounded().len(), 2);
        assert!(partition.bounded().iter().all(|batch| batch.is_empty()));
        assert!(partition.overflow().is_none());
    }
}
