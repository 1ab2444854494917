use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use greenguardian::{
    AppConfig, ChatAssistant, ClearOutcome, Confirmation, DashboardStats, HistoryView, InferenceService,
    ModelManager, OnnxBackbone, PixelScaling, PredictionLog, RuntimeConfig, Trainer, TrainingConfig,
};
use log::info;

#[derive(Parser)]
#[command(author, version, about = "Waste-sorting image classifier", long_about = None)]
struct Args {
    /// Data directory (models, history, saved images)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a classification head and publish it as the current model
    Train {
        /// Directory with one subdirectory of images per category
        #[arg(long)]
        dataset: PathBuf,
        /// Frozen ONNX feature extractor
        #[arg(long)]
        backbone: PathBuf,
        /// Pixel range the backbone expects: `signed` ([-1, 1]) or `unit` ([0, 1])
        #[arg(long, default_value = "signed")]
        scaling: PixelScaling,
        #[arg(long)]
        epochs: Option<usize>,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        learning_rate: Option<f32>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Classify one image and record the result
    Classify { image: PathBuf },
    /// Show the dashboard figures
    Stats,
    /// Browse past predictions, newest first
    History {
        #[arg(long)]
        category: Option<String>,
        /// YYYY-MM-DD
        #[arg(long)]
        date: Option<String>,
    },
    /// Write the whole history as CSV
    Export { output: PathBuf },
    /// Permanently delete the history
    ClearHistory {
        /// Confirm the deletion without prompting
        #[arg(long)]
        yes: bool,
    },
    /// Ask EcoBot a question
    Ask {
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },
    /// List published model versions
    Models,
    /// Make the previous model version current again
    Rollback,
    /// Download a backbone into the local cache
    FetchBackbone {
        #[arg(long)]
        url: String,
        #[arg(long)]
        sha256: String,
        #[arg(long, default_value = "backbone")]
        name: String,
        /// Force a fresh download of the backbone file
        #[arg(long)]
        fresh: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    greenguardian::init_logger();
    let args = Args::parse();

    let config = match &args.home {
        Some(home) => AppConfig::with_home(home),
        None => AppConfig::from_env(),
    };
    info!("Using data directory {:?}", config.home);

    match args.command {
        Command::Train {
            dataset,
            backbone,
            scaling,
            epochs,
            batch_size,
            learning_rate,
            seed,
        } => {
            let defaults = TrainingConfig::default();
            let training = TrainingConfig {
                epochs: epochs.unwrap_or(defaults.epochs),
                batch_size: batch_size.unwrap_or(defaults.batch_size),
                learning_rate: learning_rate.unwrap_or(defaults.learning_rate),
                seed: seed.unwrap_or(defaults.seed),
                ..defaults
            };
            train(&config, &dataset, &backbone, scaling, training)
        }
        Command::Classify { image } => classify(&config, &image),
        Command::Stats => stats(&config),
        Command::History { category, date } => history(&config, category.as_deref(), date.as_deref()),
        Command::Export { output } => {
            let bytes = PredictionLog::new(config.history_file()).export_csv()?;
            std::fs::write(&output, bytes).with_context(|| format!("writing {:?}", output))?;
            println!("History exported to {}", output.display());
            Ok(())
        }
        Command::ClearHistory { yes } => clear_history(&config, yes),
        Command::Ask { question } => {
            let assistant = ChatAssistant::new(config.assistant.clone());
            let answer = assistant.ask(&question.join(" ")).await?;
            println!("{}", answer);
            Ok(())
        }
        Command::Models => models(&config),
        Command::Rollback => {
            let manager = ModelManager::new(config.models_dir())?;
            let id = manager.rollback()?;
            println!("Current model is now {}", id);
            Ok(())
        }
        Command::FetchBackbone { url, sha256, name, fresh } => {
            let manager = ModelManager::new(config.models_dir())?;
            let path = manager.fetch_backbone(&name, &url, &sha256, fresh).await?;
            println!("Backbone available at {}", path.display());
            Ok(())
        }
    }
}

fn train(
    config: &AppConfig,
    dataset: &Path,
    backbone_path: &Path,
    scaling: PixelScaling,
    training: TrainingConfig,
) -> Result<()> {
    let start_time = Instant::now();
    let backbone = OnnxBackbone::load(backbone_path, scaling, &RuntimeConfig::default())
        .with_context(|| format!("loading backbone {:?}", backbone_path))?;

    let artifact = Trainer::new(training, &backbone)?.train(dataset)?;
    if let Some(summary) = &artifact.training {
        if let Some(confusion) = &summary.confusion {
            println!("Confusion matrix:\n{}", confusion);
        }
        if let Some(report) = &summary.report {
            println!("Classification report:\n{}", report);
        }
    }

    let manager = ModelManager::new(config.models_dir())?;
    let version = manager.publish(&artifact, Some(backbone_path))?;
    println!("Model version {} published ({:.2?})", version.id, start_time.elapsed());
    Ok(())
}

fn classify(config: &AppConfig, image: &Path) -> Result<()> {
    let service = InferenceService::open(config, RuntimeConfig::default())
        .context("no usable model; run `greenguardian train` first")?;
    let bytes = std::fs::read(image).with_context(|| format!("reading {:?}", image))?;
    let outcome = service.submit(&bytes)?;

    println!("Prediction: {}", outcome.prediction.label);
    println!("Confidence: {:.2}%", outcome.prediction.confidence);
    let mut scores = outcome.prediction.probabilities.clone();
    scores.sort_by(|a, b| b.1.total_cmp(&a.1));
    for (label, score) in scores {
        println!("    {}: {:.1}%", label, score);
    }
    println!("Tip: {}", outcome.tip);
    Ok(())
}

fn stats(config: &AppConfig) -> Result<()> {
    let records = PredictionLog::new(config.history_file()).read_all()?;
    let Some(stats) = DashboardStats::from_records(&records) else {
        println!("No data yet. Classify a few images first.");
        return Ok(());
    };

    println!("Total sorts:        {}", stats.total);
    println!("Eco points:         {}", stats.eco_points);
    println!("CO2 saved (kg):     {}", stats.co2_saved_kg);
    println!("Trees saved:        {}", stats.trees_saved);
    println!("Progress:           {:.0}%", stats.progress * 100.0);
    println!("Level:              {} - {}", stats.level, stats.level.description());
    println!("Most sorted:        {}", stats.most_common);
    println!("Average confidence: {:.1}%", stats.average_confidence);
    if let Some(day) = stats.most_active_day {
        println!("Most active day:    {}", day);
    }
    if let Some(day) = stats.last_sorted_day {
        println!("Last sort:          {}", day);
    }
    println!("\nCategories:");
    for (label, share) in stats.category_shares() {
        println!("    {:<12} {:5.1}%", label, share);
    }
    println!("\nDaily trend:");
    for (day, count) in &stats.daily_trend {
        println!("    {}  {}", day, count);
    }
    Ok(())
}

fn history(config: &AppConfig, category: Option<&str>, date: Option<&str>) -> Result<()> {
    let view = HistoryView::new(PredictionLog::new(config.history_file()).read_all()?);
    if view.is_empty() {
        println!("History is empty.");
        return Ok(());
    }

    let matches = view.filter(category, date);
    if matches.is_empty() {
        println!("No record matches the filters.");
        println!("Categories: {}", view.categories().join(", "));
        println!("Days:       {}", view.days().join(", "));
        return Ok(());
    }
    println!("{} record(s)", matches.len());
    for record in matches {
        println!(
            "{}  {:<10} {:6.2}%  {}",
            record.timestamp, record.prediction, record.confidence, record.image_path
        );
    }
    Ok(())
}

fn clear_history(config: &AppConfig, yes: bool) -> Result<()> {
    let confirmation = if yes {
        Confirmation::Confirmed
    } else {
        print!("This permanently deletes the whole history. Type 'yes' to confirm: ");
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        Confirmation::from(answer.trim().eq_ignore_ascii_case("yes"))
    };

    match PredictionLog::new(config.history_file()).clear(confirmation)? {
        ClearOutcome::Deleted { rows } => println!("Deleted {} record(s).", rows),
        ClearOutcome::Kept { rows } => println!("Not confirmed; {} record(s) kept.", rows),
        ClearOutcome::NothingToDelete => println!("There is no history to delete."),
    }
    Ok(())
}

fn models(config: &AppConfig) -> Result<()> {
    let manager = ModelManager::new(config.models_dir())?;
    let versions = manager.list_versions()?;
    if versions.is_empty() {
        println!("No model published yet. Run `greenguardian train` first.");
        return Ok(());
    }
    let current = manager.current_version()?;
    for version in versions {
        let marker = if current.as_deref() == Some(version.id.as_str()) { "*" } else { " " };
        let ok = manager.verify_version(&version.id).unwrap_or(false);
        println!("{} {} {}", marker, version.id, if ok { "" } else { "(failed verification)" });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_models_without_published_version() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::with_home(dir.path());
        assert!(models(&config).is_ok());
        assert!(stats(&config).is_ok());
        assert!(history(&config, None, None).is_ok());
    }
}
