// Batch entry point: value and rank prospects, normalize investment.

use std::path::Path;

use anyhow::Context;
use draftvision_app::{config, pipeline};
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    let base_dir = std::env::current_dir().context("failed to read working directory")?;
    init_tracing(&base_dir)?;
    info!("draftvision batch starting in {}", base_dir.display());

    let config = config::load_config_in(&base_dir).context("failed to load configuration")?;
    info!(
        "Config loaded: {} position groups, proxy {:?}, ridge lambda {}",
        config.registry.len(),
        config.engine.model.proxy,
        config.engine.model.ridge_lambda
    );

    let summary = match pipeline::run_batch(&config, &base_dir) {
        Ok(summary) => summary,
        Err(e) => {
            error!("Batch run failed: {:#}", e);
            return Err(e);
        }
    };

    println!(
        "{}: ranked {} prospects ({} excluded), {} investment signals, trained {}",
        summary.run_label,
        summary.ranked,
        summary.excluded,
        summary.investment_signals,
        summary.trained_groups.join(", ")
    );
    if !summary.skipped_groups.is_empty() {
        println!("skipped groups: {}", summary.skipped_groups.join(", "));
    }

    info!("draftvision finished");
    Ok(())
}

/// Append this run's log to `logs/draftvision.log` under `base_dir`. The
/// engine logs from rayon workers, so thread ids are kept on every line.
fn init_tracing(base_dir: &Path) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = base_dir.join("logs");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("cannot create log directory {}", log_dir.display()))?;
    let log_path = log_dir.join("draftvision.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("cannot open {}", log_path.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("draftvision_core=info,draftvision_app=info,warn"));
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(log_file)
        .with_ansi(false)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("tracing subscriber already installed")?;
    Ok(())
}
