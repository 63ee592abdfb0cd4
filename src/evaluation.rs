use std::collections::HashSet;

use ndarray::{Array2, ArrayView1};
use tracing::{debug, warn};

use crate::autoencoder::LatentAutoEncoder;
use crate::datasets::{repeat_row, InteractionSource, TrainingSample, UserId};
use crate::error::{LfdaeError, Result};
use crate::Flt;

/// Cutoffs every evaluation reports.
pub const EVALUATION_CUTOFFS: [usize; 2] = [5, 10];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingMetrics {
    pub precision: Flt,
    pub recall: Flt,
}

impl RankingMetrics {
    pub const ZERO: RankingMetrics = RankingMetrics {
        precision: 0.0,
        recall: 0.0,
    };
}

/// Indices of the `k` highest scores, best first. Equal scores are ordered by
/// lower index and non-finite scores rank below every finite one, so exactly
/// `min(k, len)` indices come back.
pub fn top_k_indices(scores: ArrayView1<Flt>, k: usize) -> Vec<usize> {
    let key = |i: usize| {
        let s = scores[i];
        if s.is_finite() {
            s
        } else {
            Flt::NEG_INFINITY
        }
    };
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| key(b).total_cmp(&key(a)).then(a.cmp(&b)));
    order.truncate(k);
    order
}

/// `true` when `target` is among [`top_k_indices`]. A non-finite target score
/// is never a hit.
pub fn in_top_k(scores: ArrayView1<Flt>, target: usize, k: usize) -> bool {
    scores[target].is_finite() && top_k_indices(scores, k).contains(&target)
}

/// precision@k and recall@k of a batch whose row `r` is scored against
/// `actuals[r]`. Rows are expected to be copies of one user's input and the
/// actuals distinct, so at most `k` rows hit: precision is hits / k and recall
/// is hits / rows.
pub fn ranking_metrics(outputs: &Array2<Flt>, actuals: &[usize], k: usize) -> Result<RankingMetrics> {
    if outputs.nrows() != actuals.len() {
        return Err(LfdaeError::ShapeMismatch {
            what: "actual indices",
            expected: vec![outputs.nrows()],
            actual: vec![actuals.len()],
        });
    }
    if k == 0 {
        return Err(LfdaeError::Config("k must be positive".to_string()));
    }
    if let Some(&index) = actuals.iter().find(|&&a| a >= outputs.ncols()) {
        return Err(LfdaeError::IndexOutOfRange {
            what: "actual event",
            index,
            size: outputs.ncols(),
        });
    }
    if actuals.is_empty() {
        return Ok(RankingMetrics::ZERO);
    }

    let hits = outputs
        .outer_iter()
        .zip(actuals)
        .filter(|(row, &actual)| in_top_k(row.view(), actual, k))
        .count() as Flt;
    Ok(RankingMetrics {
        precision: hits / k as Flt,
        recall: hits / actuals.len() as Flt,
    })
}

/// Running sums over the evaluated users.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricTotals {
    pub precision_at_5: Flt,
    pub precision_at_10: Flt,
    pub recall_at_5: Flt,
    pub recall_at_10: Flt,
    pub users: usize,
}

/// Per-user means of the four metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricAverages {
    pub precision_at_5: Flt,
    pub precision_at_10: Flt,
    pub recall_at_5: Flt,
    pub recall_at_10: Flt,
}

impl MetricTotals {
    fn add(&mut self, at_5: RankingMetrics, at_10: RankingMetrics) {
        self.precision_at_5 += at_5.precision;
        self.precision_at_10 += at_10.precision;
        self.recall_at_5 += at_5.recall;
        self.recall_at_10 += at_10.recall;
        self.users += 1;
    }

    /// All zero when nobody was evaluated.
    pub fn averages(&self) -> MetricAverages {
        if self.users == 0 {
            return MetricAverages::default();
        }
        let n = self.users as Flt;
        MetricAverages {
            precision_at_5: self.precision_at_5 / n,
            precision_at_10: self.precision_at_10 / n,
            recall_at_5: self.recall_at_5 / n,
            recall_at_10: self.recall_at_10 / n,
        }
    }
}

/// Read-only pass over the test users.
#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator;

impl Evaluator {
    pub fn new() -> Evaluator {
        Evaluator
    }

    /// Scores every test user that also appears in `train_users`; everyone else
    /// is skipped and left out of the count. A counted user with nothing held
    /// out contributes zeros.
    pub fn run_evaluation<S: InteractionSource>(
        &self,
        model: &LatentAutoEncoder,
        source: &mut S,
        test_users: &[UserId],
        train_users: &HashSet<UserId>,
    ) -> Result<MetricTotals> {
        let mut totals = MetricTotals::default();
        for &user in test_users {
            if !train_users.contains(&user) {
                debug!(user, "test user absent from training data, skipping");
                continue;
            }
            let actuals = source
                .get_user_test_event_indices(user)
                .map_err(|e| e.for_user(user))?;
            let sample = source
                .get_user_train_sample(user, 0, 0.0)
                .map_err(|e| e.for_user(user))?;
            let (at_5, at_10) = self
                .evaluate_user(model, &sample, &actuals)
                .map_err(|e| e.for_user(user))?;
            totals.add(at_5, at_10);
        }
        if totals.users == 0 {
            warn!("no eligible test users, metrics default to zero");
        }
        Ok(totals)
    }

    /// Metrics at 5 and 10 for one user: the uncorrupted input is replicated
    /// once per distinct held-out event. A user with no input row or no
    /// held-out event scores zero on both.
    pub fn evaluate_user(
        &self,
        model: &LatentAutoEncoder,
        sample: &TrainingSample,
        actuals: &[usize],
    ) -> Result<(RankingMetrics, RankingMetrics)> {
        let mut seen = HashSet::new();
        let actuals: Vec<usize> = actuals.iter().copied().filter(|a| seen.insert(*a)).collect();
        if actuals.is_empty() || sample.x.nrows() == 0 {
            debug!(held_out = actuals.len(), "nothing to rank, scoring zero");
            return Ok((RankingMetrics::ZERO, RankingMetrics::ZERO));
        }

        let x = repeat_row(&sample.x, 0, actuals.len())?;
        let outputs = model.predict(&x, &sample.group_id, &sample.venue_id)?;
        let [k5, k10] = EVALUATION_CUTOFFS;
        Ok((
            model.ranking_metrics(&outputs, &actuals, k5)?,
            model.ranking_metrics(&outputs, &actuals, k10)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::datasets::binary_rows;
    use crate::random::RandomState;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1, Axis};
    use proptest::prelude::*;

    fn scores() -> Array1<Flt> {
        array![0.9 as Flt, 0.1, 0.8, 0.7, 0.6, 0.5, 0.4, 0.3, 0.2, 0.05, 0.0, 0.95]
    }

    #[test]
    fn test_in_top_k() {
        let s = scores();
        assert!(in_top_k(s.view(), 11, 1));
        assert!(in_top_k(s.view(), 4, 5));
        assert!(!in_top_k(s.view(), 5, 5));
        assert!(!in_top_k(array![Flt::NAN, 0.1].view(), 0, 2));
        // equal scores go to the lower index
        assert!(in_top_k(array![0.5 as Flt, 0.5, 0.5].view(), 0, 1));
        assert!(!in_top_k(array![0.5 as Flt, 0.5, 0.5].view(), 2, 1));
    }

    #[test]
    fn test_top_k_indices_order() {
        assert_eq!(top_k_indices(scores().view(), 3), vec![11, 0, 2]);
        assert_eq!(top_k_indices(array![0.2 as Flt, 0.7, 0.2, 0.7].view(), 3), vec![1, 3, 0]);
        assert_eq!(top_k_indices(array![Flt::NAN, 0.1, Flt::INFINITY].view(), 2), vec![1, 0]);
        assert_eq!(top_k_indices(array![0.3 as Flt, 0.1].view(), 5), vec![0, 1]);
    }

    #[test]
    fn test_tied_scores_never_exceed_k_hits() {
        let outputs = Array2::<Flt>::from_elem((7, 20), 0.5);
        let actuals: Vec<usize> = (0..7).collect();
        let at_5 = ranking_metrics(&outputs, &actuals, 5).unwrap();
        assert_abs_diff_eq!(at_5.precision, 1.0);
        assert_abs_diff_eq!(at_5.recall, 5.0 / 7.0);
        let at_10 = ranking_metrics(&outputs, &actuals, 10).unwrap();
        assert_abs_diff_eq!(at_10.precision, 0.7);
        assert_abs_diff_eq!(at_10.recall, 1.0);

        let late: Vec<usize> = (13..20).collect();
        let at_5 = ranking_metrics(&outputs, &late, 5).unwrap();
        assert_eq!(at_5, RankingMetrics::ZERO);
    }

    #[test]
    fn test_flat_model_scores_stay_in_bounds() {
        let config = ModelConfig::with_dimensions(20, 4, 20, None, None);
        let mut model = LatentAutoEncoder::with_random_state(&config, &mut RandomState::new(Some(3))).unwrap();
        // every hidden unit dead: all outputs sit at sigmoid(0)
        model.bias_mut().fill(-10.0);
        let sample = TrainingSample {
            x: binary_rows(20, &[18, 19], 2).unwrap(),
            y: Array1::ones(2),
            item: vec![18, 19],
            group_id: vec![],
            venue_id: vec![],
        };
        let (at_5, at_10) = Evaluator::new()
            .evaluate_user(&model, &sample, &[0, 1, 2, 3, 4, 5, 6])
            .unwrap();
        assert_abs_diff_eq!(at_5.precision, 1.0);
        assert_abs_diff_eq!(at_10.precision, 0.7);
        assert!(at_5.recall <= 1.0 && at_10.recall <= 1.0);
    }

    /// One sample for every user, with held-out events given per user.
    struct HeldOutSource {
        held_out: Vec<(UserId, Vec<usize>)>,
    }

    impl InteractionSource for HeldOutSource {
        fn n_events(&self) -> usize {
            6
        }
        fn n_groups(&self) -> usize {
            1
        }
        fn n_venues(&self) -> usize {
            1
        }
        fn list_users(&self) -> Vec<UserId> {
            self.held_out.iter().map(|(u, _)| *u).collect()
        }
        fn list_test_users(&self) -> Vec<UserId> {
            self.list_users()
        }
        fn list_train_users(&self) -> HashSet<UserId> {
            self.list_users().into_iter().collect()
        }
        fn get_user_train_sample(&mut self, _: UserId, _: usize, _: Flt) -> Result<TrainingSample> {
            Ok(TrainingSample {
                x: binary_rows(6, &[5], 1)?,
                y: Array1::ones(1),
                item: vec![5],
                group_id: vec![],
                venue_id: vec![],
            })
        }
        fn get_user_test_event_indices(&self, user: UserId) -> Result<Vec<usize>> {
            self.held_out
                .iter()
                .find(|(u, _)| *u == user)
                .map(|(_, events)| events.clone())
                .ok_or(LfdaeError::UnknownUser(user))
        }
    }

    #[test]
    fn test_user_without_held_out_events_counts_as_zero() {
        let config = ModelConfig::with_dimensions(6, 3, 6, None, None);
        let model = LatentAutoEncoder::with_random_state(&config, &mut RandomState::new(Some(4))).unwrap();
        let mut source = HeldOutSource {
            held_out: vec![(1, vec![0, 1, 2, 3, 4]), (2, vec![])],
        };
        let test_users = source.list_test_users();
        let train_users = source.list_train_users();

        let totals = Evaluator::new()
            .run_evaluation(&model, &mut source, &test_users, &train_users)
            .unwrap();
        assert_eq!(totals.users, 2);
        // user 1 has every candidate but event 5 held out, so at least four land in the top 5
        assert!(totals.precision_at_5 >= 0.8);
        let averages = totals.averages();
        assert_abs_diff_eq!(averages.precision_at_5, totals.precision_at_5 / 2.0);
        assert_abs_diff_eq!(averages.recall_at_10, 0.5);
    }

    #[test]
    fn test_single_hit_over_five_rows() {
        let outputs = scores().insert_axis(Axis(0));
        let outputs = ndarray::concatenate(Axis(0), &[outputs.view(); 5]).unwrap();

        let hit = ranking_metrics(&outputs, &[3, 10, 10, 10, 10], 5).unwrap();
        assert_abs_diff_eq!(hit.precision, 0.2);
        let miss = ranking_metrics(&outputs, &[1, 10, 10, 10, 10], 5).unwrap();
        assert_eq!(miss.precision, 0.0);
        assert_eq!(miss.recall, 0.0);
    }

    #[test]
    fn test_recall_is_fraction_of_actuals() {
        let outputs = ndarray::concatenate(Axis(0), &[scores().insert_axis(Axis(0)).view(); 4]).unwrap();
        let at_10 = ranking_metrics(&outputs, &[0, 2, 9, 10], 10).unwrap();
        assert_abs_diff_eq!(at_10.recall, 0.5);
        assert_abs_diff_eq!(at_10.precision, 0.2);
    }

    #[test]
    fn test_metric_argument_checks() {
        let outputs = Array2::<Flt>::zeros((2, 3));
        assert!(ranking_metrics(&outputs, &[0], 5).is_err());
        assert!(ranking_metrics(&outputs, &[0, 3], 5).is_err());
        assert!(ranking_metrics(&outputs, &[0, 1], 0).is_err());
    }

    #[test]
    fn test_zero_users_average_to_zero() {
        let averages = MetricTotals::default().averages();
        assert_eq!(averages, MetricAverages::default());
        assert_eq!(averages.precision_at_5, 0.0);
        assert!(!averages.recall_at_10.is_nan());
    }

    #[test]
    fn test_averages_divide_by_users() {
        let mut totals = MetricTotals::default();
        let m = |p, r| RankingMetrics { precision: p, recall: r };
        totals.add(m(0.2, 1.0), m(0.1, 1.0));
        totals.add(m(0.0, 0.0), m(0.1, 0.5));
        let avg = totals.averages();
        assert_abs_diff_eq!(avg.precision_at_5, 0.1);
        assert_abs_diff_eq!(avg.recall_at_10, 0.75);
    }

    #[test]
    fn test_user_evaluation_is_idempotent() {
        let config = ModelConfig::with_dimensions(12, 4, 12, Some(2), None);
        let model = LatentAutoEncoder::with_random_state(&config, &mut RandomState::new(Some(9))).unwrap();
        let before = model.weights().clone();
        let sample = TrainingSample {
            x: binary_rows(12, &[1, 3, 5], 3).unwrap(),
            y: Array1::ones(3),
            item: vec![1, 3, 5],
            group_id: vec![1],
            venue_id: vec![],
        };
        let evaluator = Evaluator::new();
        let first = evaluator.evaluate_user(&model, &sample, &[0, 2]).unwrap();
        let second = evaluator.evaluate_user(&model, &sample, &[0, 2, 2]).unwrap();

        assert_eq!(first, second);
        assert!(first.0.precision.is_finite() && first.0.recall.is_finite());
        assert_eq!(model.weights(), &before);
        assert_eq!(model.steps_taken(), 0);
    }

    #[test]
    fn test_nothing_held_out_scores_zero() {
        let config = ModelConfig::with_dimensions(4, 2, 4, None, None);
        let model = LatentAutoEncoder::new(&config).unwrap();
        let sample = TrainingSample {
            x: binary_rows(4, &[0], 1).unwrap(),
            y: Array1::ones(1),
            item: vec![0],
            group_id: vec![],
            venue_id: vec![],
        };
        let scored = Evaluator::new().evaluate_user(&model, &sample, &[]).unwrap();
        assert_eq!(scored, (RankingMetrics::ZERO, RankingMetrics::ZERO));
    }

    proptest! {
        #[test]
        fn prop_metrics_stay_in_bounds(
            values in proptest::collection::vec(-1.0f32..1.0, 20),
            picks in proptest::collection::btree_set(0usize..20, 1..8),
        ) {
            let row = Array1::from_vec(values).insert_axis(Axis(0));
            let actuals: Vec<usize> = picks.into_iter().collect();
            let views = vec![row.view(); actuals.len()];
            let outputs = ndarray::concatenate(Axis(0), &views).unwrap();
            for k in EVALUATION_CUTOFFS {
                let m = ranking_metrics(&outputs, &actuals, k).unwrap();
                prop_assert!((0.0..=1.0).contains(&m.precision));
                prop_assert!((0.0..=1.0).contains(&m.recall));
            }
        }
    }
}
