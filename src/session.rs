use tqdm::Iter;
use tracing::info;

use crate::autoencoder::LatentAutoEncoder;
use crate::config::{ModelConfig, RuntimeConfig, TrainConfig};
use crate::datasets::InteractionSource;
use crate::error::Result;
use crate::evaluation::{Evaluator, MetricAverages};
use crate::optimizer::DEFAULT_LEARNING_RATE;
use crate::random::RandomState;
use crate::trainer::Trainer;
use crate::Flt;

/// What one train-then-evaluate round produced.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    /// 0-based, as logged.
    pub epoch: usize,
    pub loss: Flt,
    pub evaluated_users: usize,
    pub metrics: MetricAverages,
}

/// Model config sized to `source`'s catalog, with factors switched per `train`.
pub fn model_config_for<S: InteractionSource>(
    source: &S,
    n_hidden: usize,
    train: &TrainConfig,
    hidden_activation: &str,
    output_activation: &str,
) -> ModelConfig {
    ModelConfig::new(
        source.n_events(),
        n_hidden,
        source.n_events(),
        train.group_space(source.n_groups()),
        train.venue_space(source.n_venues()),
        hidden_activation,
        output_activation,
        DEFAULT_LEARNING_RATE,
    )
}

fn epoch_line(epoch: usize, epochs: usize, loss: Flt) -> String {
    format!("Epoch {}/{:<10} Loss: {:.6}", epoch, epochs, loss)
}

/// Precision and recall on one line each, @5 beside @10.
fn metric_lines(metrics: &MetricAverages) -> [String; 2] {
    [
        format!(
            "Precision@5: {:>10.6}       Precision@10: {:>10.6}",
            metrics.precision_at_5, metrics.precision_at_10
        ),
        format!(
            "Recall@5:    {:>10.6}       Recall@10:    {:>10.6}",
            metrics.recall_at_5, metrics.recall_at_10
        ),
    ]
}

/// A model together with the components that train and score it.
pub struct Session {
    model: LatentAutoEncoder,
    trainer: Trainer,
    evaluator: Evaluator,
    epochs: usize,
    verbose: bool,
}

impl Session {
    pub fn new(model_config: &ModelConfig, train: TrainConfig, runtime: &RuntimeConfig) -> Result<Session> {
        Session::with_random_state(model_config, train, runtime.verbose, runtime.random_state())
    }

    /// Builds the model and trainer from `random_state`, which should be a fork
    /// not shared with any other consumer of the run's root state.
    pub fn with_random_state(
        model_config: &ModelConfig,
        train: TrainConfig,
        verbose: bool,
        mut random_state: RandomState,
    ) -> Result<Session> {
        let model = LatentAutoEncoder::with_random_state(model_config, &mut random_state)?;
        let epochs = train.epochs;
        let trainer = Trainer::new(train, random_state.fork())?;
        Ok(Session {
            model,
            trainer,
            evaluator: Evaluator::new(),
            epochs,
            verbose,
        })
    }

    pub fn model(&self) -> &LatentAutoEncoder {
        &self.model
    }

    /// Alternates a training epoch and an evaluation for every configured epoch.
    pub fn fit<S: InteractionSource>(&mut self, source: &mut S) -> Result<Vec<EpochReport>> {
        let users = source.list_users();
        let test_users = source.list_test_users();
        let train_users = source.list_train_users();
        let epochs = self.epochs;

        let mut reports = Vec::with_capacity(epochs);
        for epoch in Self::process(epochs, self.verbose) {
            let loss = self.trainer.run_epoch(&mut self.model, source, &users)?;
            info!("{}", epoch_line(epoch, epochs, loss));

            let totals = self
                .evaluator
                .run_evaluation(&self.model, source, &test_users, &train_users)?;
            let metrics = totals.averages();
            for line in metric_lines(&metrics) {
                info!("{}", line);
            }

            reports.push(EpochReport {
                epoch,
                loss,
                evaluated_users: totals.users,
                metrics,
            });
        }
        Ok(reports)
    }

    fn process(n: usize, verbose: bool) -> Box<dyn Iterator<Item = usize>> {
        if verbose {
            Box::new((0..n).tqdm())
        } else {
            Box::new(0..n)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::{EventData, EventRecord};

    fn data() -> EventData {
        let mut records = Vec::new();
        for user in 0..6u32 {
            for event in 0..5u32 {
                let event = (user + event * 2) % 12;
                records.push(EventRecord {
                    user,
                    event,
                    group: event % 3,
                    venue: event % 2,
                });
            }
        }
        EventData::from_records(&records, 0.2, RandomState::new(Some(8))).unwrap()
    }

    #[test]
    fn test_model_config_follows_source_and_flags() {
        let data = data();
        let train = TrainConfig {
            use_venue: false,
            ..TrainConfig::default()
        };
        let config = model_config_for(&data, 8, &train, "relu", "sigmoid");
        assert_eq!(config.n_inputs, data.n_events());
        assert_eq!(config.n_outputs, data.n_events());
        assert_eq!(config.n_groups, Some(3));
        assert_eq!(config.n_venues, None);
        assert_eq!(config.learning_rate, DEFAULT_LEARNING_RATE);
    }

    #[test]
    fn test_fit_reports_every_epoch() {
        let mut data = data();
        let train = TrainConfig {
            epochs: 3,
            ..TrainConfig::default()
        };
        let config = model_config_for(&data, 8, &train, "relu", "sigmoid");
        let runtime = RuntimeConfig {
            seed: Some(11),
            verbose: false,
        };
        let mut session = Session::new(&config, train, &runtime).unwrap();
        let reports = session.fit(&mut data).unwrap();

        assert_eq!(reports.len(), 3);
        assert_eq!(reports.iter().map(|r| r.epoch).collect::<Vec<_>>(), vec![0, 1, 2]);
        for report in &reports {
            assert!(report.loss.is_finite() && report.loss >= 0.0);
            assert_eq!(report.evaluated_users, 6);
            assert!((0.0..=1.0).contains(&report.metrics.precision_at_5));
            assert!(report.metrics.recall_at_10 >= 0.0);
        }
        assert_eq!(session.model().steps_taken(), 18);
    }

    #[test]
    fn test_sibling_forks_initialize_differently() {
        let data = data();
        let train = TrainConfig::default();
        let config = model_config_for(&data, 8, &train, "relu", "sigmoid");

        let mut root = RandomState::new(Some(11));
        let first = Session::with_random_state(&config, train.clone(), false, root.fork()).unwrap();
        let second = Session::with_random_state(&config, train.clone(), false, root.fork()).unwrap();
        assert_ne!(first.model().weights(), second.model().weights());

        let mut again = RandomState::new(Some(11));
        let replay = Session::with_random_state(&config, train, false, again.fork()).unwrap();
        assert_eq!(first.model().weights(), replay.model().weights());
    }

    #[test]
    fn test_log_lines_layout() {
        assert_eq!(epoch_line(0, 5, 1.5), "Epoch 0/5          Loss: 1.500000");
        let metrics = MetricAverages {
            precision_at_5: 0.2,
            precision_at_10: 0.15,
            recall_at_5: 0.5,
            recall_at_10: 0.75,
        };
        let [precision, recall] = metric_lines(&metrics);
        assert_eq!(precision, "Precision@5:   0.200000       Precision@10:   0.150000");
        assert_eq!(recall, "Recall@5:      0.500000       Recall@10:      0.750000");
    }

    #[test]
    fn test_bad_activation_fails_before_training() {
        let data = data();
        let train = TrainConfig::default();
        let config = model_config_for(&data, 8, &train, "swish", "sigmoid");
        assert!(Session::new(&config, train, &RuntimeConfig::default()).is_err());
    }
}
