//! `stodepth`: прогон классификатора со стохастической глубиной на
//! синтетических данных.
//!
//! ```bash
//! stodepth --blocks-per-stage 3 --epochs 2 --samples 64
//! stodepth --config run.json --death-mode uniform --log-level debug
//! ```

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::time::Instant;
use stochastic_depth::config::StochasticDepthConfig;
use stochastic_depth::data::{RandomHorizontalFlip, Standardize, SyntheticDataset};
use stochastic_depth::error::ConfigError;
use stochastic_depth::gating::DeathMode;
use stochastic_depth::metrics::RunningMean;
use stochastic_depth::models::StochasticResNet;
use stochastic_depth::training::Session;
use tracing::{error, info};

/// Аргументы командной строки
#[derive(Parser, Debug)]
#[command(name = "stodepth", version, about = "Stochastic-depth residual classifier", long_about = None)]
struct Args {
    /// JSON-файл конфигурации; без него берутся значения по умолчанию
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Число блоков на стадию (N)
    #[arg(long)]
    blocks_per_stage: Option<usize>,

    /// Режим отключения блоков (`uniform` или `linear-decay`)
    #[arg(long)]
    death_mode: Option<DeathMode>,

    /// Максимальная вероятность отключения
    #[arg(long)]
    death_rate: Option<f32>,

    #[arg(long)]
    epochs: Option<usize>,

    /// Число синтетических обучающих образцов; для валидации берётся четверть
    #[arg(long, default_value_t = 256)]
    samples: usize,

    #[arg(long)]
    seed: Option<u64>,

    /// Уровень логирования (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let args = Args::parse();

    let log_level_filter = args
        .log_level
        .parse::<tracing_subscriber::filter::LevelFilter>()
        .unwrap_or(tracing_subscriber::filter::LevelFilter::INFO);
    tracing_subscriber::fmt()
        .with_max_level(log_level_filter)
        .with_target(false)
        .init();

    if let Err(e) = run(args) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn load_config(args: &Args) -> Result<StochasticDepthConfig, ConfigError> {
    let mut config = match args.config.as_deref() {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            StochasticDepthConfig::from_json(path)?
        }
        None => StochasticDepthConfig::default(),
    };

    if let Some(n) = args.blocks_per_stage {
        config.blocks_per_stage = n;
    }
    if let Some(mode) = args.death_mode {
        config.death_mode = mode;
    }
    if let Some(rate) = args.death_rate {
        config.death_rate = rate;
    }
    if let Some(epochs) = args.epochs {
        config.num_epochs = epochs;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    config.validate()?;
    Ok(config)
}

fn run(args: Args) -> stochastic_depth::Result<()> {
    let config = load_config(&args)?;
    info!(
        blocks = config.total_blocks(),
        death_mode = %config.death_mode,
        death_rate = config.death_rate,
        batch_size = config.batch_size,
        epochs = config.num_epochs,
        "configuration"
    );

    let model = StochasticResNet::build(&config)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let params = model.init_parameters(&mut rng);

    let gen = |n: usize, rng: &mut StdRng| {
        SyntheticDataset::generate(n, config.image_channels, config.image_size, config.num_classes, rng)
    };
    let train = gen(args.samples, &mut rng);
    let val = gen((args.samples / 4).max(config.batch_size), &mut rng);

    let Some(norm) = Standardize::fit(train.images()) else {
        info!("No training samples; nothing to do");
        return Ok(());
    };
    let train = train.map_images(|x| norm.apply(&x));
    let val = val.map_images(|x| norm.apply(&x));
    let flip = RandomHorizontalFlip::default();

    let mut session = Session::new(model, params);
    for epoch in 1..=config.num_epochs {
        let started = Instant::now();
        let mut loss = RunningMean::new();
        let mut closed = RunningMean::new();
        for (mut images, labels) in train.batches(config.batch_size, &mut rng) {
            flip.apply(&mut images, &mut rng);
            let report = session.train_step(&images, &labels)?;
            loss.update(report.loss as f64);
            closed.update(report.closed as f64);
        }
        session.end_epoch();

        let mut val_loss = RunningMean::new();
        let mut val_acc = RunningMean::new();
        for (images, labels) in val.batches(config.batch_size, &mut rng) {
            let report = session.evaluate(&images, &labels)?;
            val_loss.update(report.loss as f64);
            val_acc.update(report.accuracy);
        }

        info!(
            epoch,
            loss = format!("{:.4}", loss.compute()),
            mean_closed = format!("{:.2}", closed.compute()),
            val_loss = format!("{:.4}", val_loss.compute()),
            val_acc = format!("{:.4}", val_acc.compute()),
            elapsed = ?started.elapsed(),
            "epoch finished"
        );
    }
    Ok(())
}
