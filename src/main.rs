mod cli;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};

use cli::{Cli, Command};
use voxnav::config::ProjectConfig;
use voxnav::grid;
use voxnav::history::Bounds;
use voxnav::log::{ExecutionLog, LogEvent};
use voxnav::monitor::{EventStreamMonitor, FileLineSource, KeywordFilter, MonitorConfig, StopStatus};
use voxnav::screen::{ScreenChangeDetector, ScreenConfig, ScreenDescription};
use voxnav::syslog;

fn render_config_json(config: &ProjectConfig, config_path: Option<&Path>) -> Result<String> {
    let mut payload = serde_json::to_value(config).context("failed to encode config")?;
    let source = match config_path {
        Some(p) => p.display().to_string(),
        None => "(defaults, no .voxnav/config.toml found)".to_string(),
    };
    if let Some(map) = payload.as_object_mut() {
        map.insert("source_path".to_string(), serde_json::Value::String(source));
    }
    serde_json::to_string_pretty(&payload).context("failed to render config")
}

fn stop_label(status: StopStatus) -> &'static str {
    match status {
        StopStatus::Stopped => "stopped",
        StopStatus::StillRunning => "still_running",
        StopStatus::NotRunning => "not_running",
    }
}

fn watch(
    config: &ProjectConfig,
    file: &Path,
    keywords: Vec<String>,
    from_start: bool,
    duration: Option<u64>,
    log: Option<&Path>,
) -> Result<()> {
    let journal = log.map(ExecutionLog::new).transpose()?;
    let filter = if keywords.is_empty() {
        syslog::default_filter()
    } else {
        KeywordFilter::new(keywords)
    };

    let mut source = FileLineSource::new("file", file);
    if from_start {
        source = source.from_start();
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = stop.clone();
    ctrlc::set_handler(move || {
        stop_clone.store(true, Ordering::Relaxed);
    })
    .ok();

    let mut monitor = EventStreamMonitor::start(Arc::new(source), filter, &MonitorConfig::from(&config.monitor));
    info!(file = %file.display(), "watching");
    let deadline = duration.map(|secs| Instant::now() + Duration::from_secs(secs));

    while !stop.load(Ordering::Relaxed) && deadline.is_none_or(|d| Instant::now() < d) {
        match monitor.read(Duration::from_millis(200)) {
            Some(event) => println!(
                "\x1b[36m[{}]\x1b[0m {}",
                event.timestamp.format("%H:%M:%S%.3f"),
                event.raw
            ),
            None if !monitor.is_running() => {
                warn!("log producer gave up");
                break;
            }
            None => {}
        }
    }

    let status = monitor.stop();
    if status == StopStatus::StillRunning {
        warn!(file = %file.display(), "log producer did not stop in time; leaking it");
    }
    if let Some(journal) = &journal {
        journal.log(LogEvent::MonitorStopped {
            source: monitor.tag().to_string(),
            status: stop_label(status).to_string(),
        })?;
    }
    Ok(())
}

fn diff(config: &ProjectConfig, before_json: &Path, before_png: &Path, after_json: &Path, after_png: &Path) -> Result<()> {
    let read = |path: &Path| -> Result<ScreenDescription> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        ScreenDescription::from_json(&raw).with_context(|| format!("failed to parse {}", path.display()))
    };
    let before = read(before_json)?;
    let after = read(after_json)?;

    let detector = ScreenChangeDetector::new(ScreenConfig::from(&config.screen));
    let verdict = detector.compare(&before, before_png, &after, after_png);
    let payload = serde_json::json!({
        "changed": verdict.changed(),
        "similarity": verdict.similarity,
        "text_changed": verdict.text_changed,
        "image_changed": verdict.image_changed,
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn print_grid(image: &Path, target: Bounds) -> Result<()> {
    let (width, height) =
        image::image_dimensions(image).with_context(|| format!("failed to read {}", image.display()))?;
    let Some(selection) = grid::select(width, height, &target) else {
        bail!("region {target:?} does not fit a {width}x{height} screen");
    };
    for command in selection.commands() {
        println!("{command}");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let is_config_command = matches!(&cli.command, Command::Config);

    let filter = match cli.verbose {
        0 if is_config_command => "voxnav=warn",
        0 => "voxnav=info",
        1 => "voxnav=debug",
        _ => "voxnav=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cwd = std::env::current_dir().context("failed to get current directory (was it deleted?)")?;
    let (config, config_path) = ProjectConfig::load(&cwd)?;

    if !is_config_command || cli.verbose > 0 {
        match config_path {
            Some(ref p) => info!("loaded config from {}", p.display()),
            None => info!("no .voxnav/config.toml found, using defaults"),
        }
    }

    match cli.command {
        Command::Watch {
            file,
            keywords,
            from_start,
            duration,
            log,
        } => watch(&config, &file, keywords, from_start, duration, log.as_deref())?,
        Command::Diff {
            before_json,
            before_png,
            after_json,
            after_png,
        } => diff(&config, &before_json, &before_png, &after_json, &after_png)?,
        Command::Grid {
            image,
            x,
            y,
            width,
            height,
        } => print_grid(&image, Bounds::new(x, y, width, height))?,
        Command::Config => {
            println!("{}", render_config_json(&config, config_path.as_deref())?);
        }
    }

    Ok(())
}
