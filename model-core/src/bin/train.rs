//! SmartGuard offline training pipeline
//!
//! Synthesizes the normal-traffic corpus, fits the autoencoder, exports
//! the computation graph, and converts it into the compact artifact the
//! API server loads at startup.

use std::path::PathBuf;

use chrono::Utc;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;

use smartguard_model::{
    convert, export_saved, train, Autoencoder, ArtifactMeta, ConvertOptions, ModelError,
    TrafficSynthesizer, TrainConfig, HIDDEN_SIZE, SEQUENCE_LEN,
};

#[derive(Parser, Debug)]
#[command(name = "smartguard-train")]
#[command(about = "Train and export the traffic anomaly model", long_about = None)]
#[command(version)]
struct Args {
    /// Output path for the compact model artifact
    #[arg(long, default_value = "smartguard_model.sgm")]
    output: PathBuf,

    /// Directory for the intermediate graph export
    #[arg(long, default_value = "smartguard_saved")]
    export_dir: PathBuf,

    /// Number of synthetic training sequences
    #[arg(long, default_value_t = 1000)]
    samples: usize,

    /// Training epochs
    #[arg(long, default_value_t = 50)]
    epochs: usize,

    /// Mini-batch size
    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    /// Adam learning rate
    #[arg(long, default_value_t = 1e-3)]
    learning_rate: f32,

    /// Held-out fraction of the corpus used for loss monitoring
    #[arg(long, default_value_t = 0.1)]
    validation_split: f32,

    /// RNG seed; omit for a fresh corpus every run
    #[arg(long)]
    seed: Option<u64>,

    /// Quantize artifact weights to int16
    #[arg(long)]
    quantize: bool,
}

fn main() -> Result<(), ModelError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut synth = match args.seed {
        Some(seed) => TrafficSynthesizer::with_seed(seed),
        None => TrafficSynthesizer::new(),
    };

    log::info!("synthesizing {} normal sequences", args.samples);
    let corpus = synth.generate(args.samples);

    let config = TrainConfig {
        epochs: args.epochs,
        batch_size: args.batch_size,
        learning_rate: args.learning_rate,
        validation_split: args.validation_split,
    };
    let mut model = Autoencoder::new(HIDDEN_SIZE, &mut rng);
    let report = train(&mut model, &corpus, &config, &mut rng)?;
    log::info!(
        "training done: train_loss={:.6} val_loss={:.6} threshold={:.6}",
        report.final_train_loss(),
        report.final_val_loss(),
        report.threshold
    );

    let meta = ArtifactMeta {
        sequence_len: SEQUENCE_LEN,
        hidden_size: HIDDEN_SIZE,
        threshold: report.threshold,
        normalization: report.normalization,
        trained_at: Utc::now(),
    };
    export_saved(&model, &meta, &args.export_dir)?;

    let artifact = convert(&args.export_dir, ConvertOptions { quantize: args.quantize })?;
    artifact.write(&args.output)?;
    log::info!(
        "compact artifact written to {} ({})",
        args.output.display(),
        if args.quantize { "int16" } else { "f32" }
    );

    Ok(())
}
