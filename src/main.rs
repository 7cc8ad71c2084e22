//! taknet command-line interface.
//!
//! ```text
//! taknet init --out net.cbor [--config cfg.json] [--seed N]
//! taknet eval --data out0.json --data out1.json [--checkpoint net.cbor] [--config cfg.json]
//! taknet train --data out0.json --out runs/ [--epochs N] [--checkpoint runs/epoch3.cbor]
//! ```
//!
//! Results are printed to stdout as JSON; logs go to stderr and follow
//! `RUST_LOG`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use taknet::config::Config;
use taknet::dataset::{DataLoader, Dataset};
use taknet::evaluate::evaluate;
use taknet::nn::checkpoint;
use taknet::nn::{adamw, Scorer, TakNet, Trainer};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a freshly initialised network checkpoint
    Init {
        /// Checkpoint output path
        #[arg(short, long)]
        out: PathBuf,

        /// JSON config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Initialisation seed, 0 for entropy
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Report mean losses of a network over dataset files
    Eval {
        /// Dataset file, repeatable
        #[arg(short, long, required = true)]
        data: Vec<PathBuf>,

        /// Checkpoint to evaluate; a fresh network is used when absent
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// JSON config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Value loss weight
        #[arg(long)]
        loss_weight: Option<f32>,

        /// Encoding threads
        #[arg(short, long)]
        workers: Option<usize>,

        /// Shuffle and initialisation seed, 0 for entropy
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Fit a network to dataset files, writing a checkpoint per epoch
    Train(TrainArgs),
}

#[derive(clap::Args, Debug)]
struct TrainArgs {
    /// Dataset file, repeatable
    #[arg(short, long, required = true)]
    data: Vec<PathBuf>,

    /// Directory receiving epoch<N>.cbor checkpoints
    #[arg(short, long)]
    out: PathBuf,

    /// Checkpoint to resume from; a fresh network is used when absent
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    epochs: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Value loss weight
    #[arg(long)]
    loss_weight: Option<f32>,

    /// Encoding threads
    #[arg(short, long)]
    workers: Option<usize>,

    /// Shuffle and initialisation seed, 0 for entropy
    #[arg(long)]
    seed: Option<u64>,
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn init(out: &Path, config: Option<&Path>, seed: Option<u64>) -> Result<()> {
    let mut config = load_config(config)?;
    if let Some(seed) = seed {
        config.net.seed = seed;
    }
    config.validate()?;

    let net = TakNet::new(config.net).context("building network")?;
    checkpoint::save(&net, out)
        .with_context(|| format!("writing checkpoint {}", out.display()))?;
    println!(
        "{}",
        serde_json::json!({
            "checkpoint": out.display().to_string(),
            "params": net.num_params(),
        })
    );
    Ok(())
}

fn eval(
    data: &[PathBuf],
    checkpoint_path: Option<&Path>,
    config: Option<&Path>,
    batch_size: Option<usize>,
    loss_weight: Option<f32>,
    workers: Option<usize>,
    seed: Option<u64>,
) -> Result<()> {
    let mut config = load_config(config)?;
    if let Some(batch_size) = batch_size {
        config.loader.batch_size = batch_size;
    }
    if let Some(loss_weight) = loss_weight {
        config.loss_weight = loss_weight;
    }
    if let Some(workers) = workers {
        config.loader.workers = workers;
    }
    if let Some(seed) = seed {
        config.loader.seed = seed;
        config.net.seed = seed;
    }
    config.validate()?;

    let net = match checkpoint_path {
        Some(path) => checkpoint::load(path)
            .with_context(|| format!("loading checkpoint {}", path.display()))?,
        None => TakNet::new(config.net.clone()).context("building network")?,
    };
    let dataset = Dataset::from_paths(data)?;
    if dataset.is_empty() {
        bail!("no records in {} dataset file(s)", data.len());
    }

    let loader = DataLoader::new(&dataset, net.action_space(), &config.loader)?;
    info!(
        records = dataset.len(),
        batches = loader.num_batches(),
        "evaluating"
    );
    let mut rng = config.loader.rng();
    let summary = evaluate(&net, &loader, config.loss_weight, &mut rng)?;
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn train(args: &TrainArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(epochs) = args.epochs {
        config.train.epochs = epochs;
    }
    if let Some(learning_rate) = args.learning_rate {
        config.train.learning_rate = learning_rate;
    }
    if let Some(batch_size) = args.batch_size {
        config.loader.batch_size = batch_size;
    }
    if let Some(loss_weight) = args.loss_weight {
        config.loss_weight = loss_weight;
    }
    if let Some(workers) = args.workers {
        config.loader.workers = workers;
    }
    if let Some(seed) = args.seed {
        config.loader.seed = seed;
        config.net.seed = seed;
    }
    config.validate()?;

    let optimizer = adamw(&config.train);
    let mut trainer = match &args.checkpoint {
        Some(path) => Trainer::resume(path, optimizer, &config)
            .with_context(|| format!("resuming from {}", path.display()))?,
        None => Trainer::new(
            TakNet::new(config.net.clone()).context("building network")?,
            optimizer,
            &config,
        ),
    };
    let dataset = Dataset::from_paths(&args.data)?;
    if dataset.is_empty() {
        bail!("no records in {} dataset file(s)", args.data.len());
    }
    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("creating {}", args.out.display()))?;

    let loader = DataLoader::new(&dataset, trainer.network().action_space(), &config.loader)?;
    info!(
        records = dataset.len(),
        batches = loader.num_batches(),
        epochs = config.train.epochs,
        steps = trainer.steps(),
        "training"
    );
    let mut rng = config.loader.rng();
    for epoch in 0..config.train.epochs {
        let summary = trainer.train_epoch(&loader, &mut rng)?;
        let path = args.out.join(format!("epoch{epoch}.cbor"));
        trainer
            .save(&path)
            .with_context(|| format!("writing checkpoint {}", path.display()))?;
        println!(
            "{}",
            serde_json::json!({
                "epoch": epoch,
                "steps": trainer.steps(),
                "checkpoint": path.display().to_string(),
                "summary": summary,
            })
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Init { out, config, seed } => init(&out, config.as_deref(), seed),
        Command::Eval {
            data,
            checkpoint,
            config,
            batch_size,
            loss_weight,
            workers,
            seed,
        } => eval(
            &data,
            checkpoint.as_deref(),
            config.as_deref(),
            batch_size,
            loss_weight,
            workers,
            seed,
        ),
        Command::Train(args) => train(&args),
    }
}
