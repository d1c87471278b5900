//! Deterministic stratified partitions.
//!
//! Folds are stratified by the event indicator so every fold preserves the
//! cohort's event/censoring ratio to within one subject per class. The same
//! (labels, seed) input always produces the same partition, which is what
//! lets every model family and hyperparameter assignment of a sweep share
//! one partition per (outcome, feature set) pair.

use ndarray::Array1;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use thiserror::Error;

pub const DEFAULT_FOLDS: usize = 5;

/// Seed shared by fold construction, the holdout split, and forest
/// bootstraps, so repeat runs are bit-identical.
pub const STUDY_SEED: u64 = 42;

#[derive(Error, Debug)]
pub enum FoldError {
    #[error("need at least 2 folds, requested {0}")]
    TooFewFolds(usize),
    #[error("stratified {k}-fold needs every class to have at least {k} members; class {class} has {found}")]
    ClassSmallerThanFolds { k: usize, class: u8, found: usize },
    #[error("cannot split {n} subjects into a non-empty train and test side")]
    DegenerateSplit { n: usize },
}

/// A disjoint, exhaustive division of row positions into k folds.
#[derive(Debug, Clone)]
pub struct FoldPlan {
    folds: Vec<Vec<usize>>,
}

impl FoldPlan {
    pub fn n_folds(&self) -> usize {
        self.folds.len()
    }

    pub fn test_rows(&self, fold: usize) -> &[usize] {
        &self.folds[fold]
    }

    /// Train/test row positions for one fold, both sorted ascending.
    pub fn split(&self, fold: usize) -> (Vec<usize>, Vec<usize>) {
        let test = self.folds[fold].clone();
        let mut train: Vec<usize> = self
            .folds
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != fold)
            .flat_map(|(_, rows)| rows.iter().copied())
            .collect();
        train.sort_unstable();
        (train, test)
    }
}

/// Stratified k-fold partition over row positions `0..event.len()`.
pub fn stratified_k_folds(
    event: &Array1<u8>,
    k: usize,
    seed: u64,
) -> Result<FoldPlan, FoldError> {
    if k < 2 {
        return Err(FoldError::TooFewFolds(k));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut folds: Vec<Vec<usize>> = vec![Vec::new(); k];

    for class in [0u8, 1u8] {
        let mut members: Vec<usize> = (0..event.len()).filter(|&i| event[i] == class).collect();
        if members.is_empty() {
            continue;
        }
        if members.len() < k {
            return Err(FoldError::ClassSmallerThanFolds {
                k,
                class,
                found: members.len(),
            });
        }
        members.shuffle(&mut rng);

        // Spread the class across folds so counts differ by at most one.
        let base = members.len() / k;
        let extra = members.len() % k;
        let mut cursor = 0;
        for (fold, bucket) in folds.iter_mut().enumerate() {
            let take = base + usize::from(fold < extra);
            bucket.extend_from_slice(&members[cursor..cursor + take]);
            cursor += take;
        }
    }

    for bucket in &mut folds {
        bucket.sort_unstable();
    }
    Ok(FoldPlan { folds })
}

/// Single stratified train/test split; `test_fraction` of each class lands
/// on the test side (rounded, but never emptying either side of a class).
pub fn stratified_split(
    event: &Array1<u8>,
    test_fraction: f64,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>), FoldError> {
    let n = event.len();
    if n < 2 {
        return Err(FoldError::DegenerateSplit { n });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();

    for class in [0u8, 1u8] {
        let mut members: Vec<usize> = (0..n).filter(|&i| event[i] == class).collect();
        if members.is_empty() {
            continue;
        }
        members.shuffle(&mut rng);

        let n_test = if members.len() == 1 {
            0
        } else {
            let requested = (members.len() as f64 * test_fraction).round() as usize;
            requested.clamp(1, members.len() - 1)
        };
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }

    if train.is_empty() || test.is_empty() {
        return Err(FoldError::DegenerateSplit { n });
    }
    train.sort_unstable();
    test.sort_unstable();
    Ok((train, test))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(n_censored: usize, n_events: usize) -> Array1<u8> {
        let mut values = vec![0u8; n_censored];
        values.extend(std::iter::repeat(1u8).take(n_events));
        Array1::from_vec(values)
    }

    #[test]
    fn folds_are_disjoint_and_exhaustive() {
        let event = labels(80, 20);
        let plan = stratified_k_folds(&event, 5, STUDY_SEED).expect("plan should build");
        assert_eq!(plan.n_folds(), 5);

        let mut seen = vec![false; 100];
        for fold in 0..plan.n_folds() {
            for &row in plan.test_rows(fold) {
                assert!(!seen[row], "row {row} appears in two folds");
                seen[row] = true;
            }
        }
        assert!(seen.iter().all(|&s| s), "every row must land in a fold");
    }

    #[test]
    fn folds_preserve_event_ratio_within_one_subject() {
        let event = labels(77, 23);
        let plan = stratified_k_folds(&event, 5, STUDY_SEED).expect("plan should build");
        for fold in 0..plan.n_folds() {
            let events = plan
                .test_rows(fold)
                .iter()
                .filter(|&&row| event[row] == 1)
                .count();
            // 23 events over 5 folds: between 4 and 5 per fold.
            assert!((4..=5).contains(&events), "fold {fold} has {events} events");
        }
    }

    #[test]
    fn same_seed_reproduces_the_partition() {
        let event = labels(60, 40);
        let a = stratified_k_folds(&event, 5, STUDY_SEED).expect("plan should build");
        let b = stratified_k_folds(&event, 5, STUDY_SEED).expect("plan should build");
        for fold in 0..a.n_folds() {
            assert_eq!(a.test_rows(fold), b.test_rows(fold));
        }

        let c = stratified_k_folds(&event, 5, 7).expect("plan should build");
        let identical = (0..a.n_folds()).all(|fold| a.test_rows(fold) == c.test_rows(fold));
        assert!(!identical, "a different seed should shuffle differently");
    }

    #[test]
    fn split_complements_test_rows() {
        let event = labels(40, 10);
        let plan = stratified_k_folds(&event, 5, STUDY_SEED).expect("plan should build");
        let (train, test) = plan.split(2);
        assert_eq!(train.len() + test.len(), 50);
        assert!(train.iter().all(|row| !test.contains(row)));
        assert!(train.windows(2).all(|w| w[0] < w[1]), "train must be sorted");
    }

    #[test]
    fn small_classes_are_rejected() {
        let event = labels(30, 3);
        let err = stratified_k_folds(&event, 5, STUDY_SEED).expect_err("3 events < 5 folds");
        assert!(matches!(
            err,
            FoldError::ClassSmallerThanFolds { class: 1, found: 3, .. }
        ));
    }

    #[test]
    fn holdout_split_is_stratified_and_deterministic() {
        let event = labels(80, 20);
        let (train, test) = stratified_split(&event, 0.2, STUDY_SEED).expect("split should build");
        assert_eq!(train.len(), 80);
        assert_eq!(test.len(), 20);
        let test_events = test.iter().filter(|&&row| event[row] == 1).count();
        assert_eq!(test_events, 4);

        let (train2, test2) = stratified_split(&event, 0.2, STUDY_SEED).expect("split should build");
        assert_eq!(train, train2);
        assert_eq!(test, test2);
    }

    #[test]
    fn holdout_split_never_empties_a_class_side() {
        let event = labels(6, 2);
        let (train, test) = stratified_split(&event, 0.2, STUDY_SEED).expect("split should build");
        let train_events = train.iter().filter(|&&row| event[row] == 1).count();
        let test_events = test.iter().filter(|&&row| event[row] == 1).count();
        assert_eq!(train_events + test_events, 2);
        assert!(train_events >= 1);
        assert!(test_events >= 1);
    }
}
