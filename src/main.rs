use anyhow::{Context, Result};
use clap::builder::PossibleValuesParser;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lfdae::{model_config_for, Activation, EventData, Flt, RuntimeConfig, Session, TrainConfig};

/// Trains a latent-factor denoising autoencoder on an event log and reports
/// ranking metrics after every epoch.
#[derive(Debug, Parser)]
#[command(name = "lfdae", version)]
struct Args {
    /// CSV with a `user,event,group,venue` header.
    #[arg(short, long)]
    data: String,

    #[arg(short, long, default_value_t = 5)]
    epochs: usize,

    /// Hidden layer width.
    #[arg(short, long, default_value_t = 50)]
    size: usize,

    /// Negatives sampled per positive event.
    #[arg(short = 'n', long, default_value_t = 4)]
    neg_count: usize,

    /// Fraction of the input dropped before each step.
    #[arg(short, long, default_value_t = 0.1)]
    corrupt: Flt,

    /// Disable the group latent factor.
    #[arg(long)]
    nogroup: bool,

    /// Disable the venue latent factor.
    #[arg(long)]
    novenue: bool,

    #[arg(long, default_value = "relu", value_parser = PossibleValuesParser::new(Activation::NAMES))]
    hidden_fn: String,

    #[arg(long, default_value = "sigmoid", value_parser = PossibleValuesParser::new(Activation::NAMES))]
    output_fn: String,

    /// Fraction of each user's events held out for evaluation.
    #[arg(long, default_value_t = 0.2)]
    test_fraction: f64,

    #[arg(long)]
    seed: Option<u64>,

    /// Show a progress bar over epochs.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("lfdae=info".parse()?))
        .init();

    let args = Args::parse();
    let runtime = RuntimeConfig {
        seed: args.seed,
        verbose: args.verbose,
    };
    let train = TrainConfig {
        epochs: args.epochs,
        negative_count: args.neg_count,
        corruption_ratio: args.corrupt,
        use_group: !args.nogroup,
        use_venue: !args.novenue,
    };

    let path = shellexpand::tilde(&args.data).into_owned();
    let mut root = runtime.random_state();
    let mut data = EventData::from_csv(&path, args.test_fraction, root.fork())
        .with_context(|| format!("loading {}", path))?;

    let model_config = model_config_for(&data, args.size, &train, &args.hidden_fn, &args.output_fn);
    let mut session = Session::with_random_state(&model_config, train, runtime.verbose, root.fork())?;
    let reports = session.fit(&mut data)?;

    if let Some(last) = reports.last() {
        info!(
            epochs = last.epoch + 1,
            users = last.evaluated_users,
            "training finished"
        );
    }
    Ok(())
}
