//! lcflow binary: logging/report setup, signal handling, dispatch, and
//! stable exit codes.

mod cli;
mod commands;
mod error_fmt;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::WrapErr;
use lcflow_config::{Config, Logging};
use lcflow_core::CalError;
use lcflow_traits::CancelToken;

use cli::{Cli, Commands, FILE_GUARD, JSON_MODE};

fn main() {
    if let Err(err) = try_main() {
        if JSON_MODE.get().copied().unwrap_or(false) {
            println!("{}", error_fmt::format_error_json(&err));
        } else {
            eprintln!("{}", error_fmt::humanize(&err));
        }
        std::process::exit(error_fmt::exit_code_for_error(&err));
    }
}

fn try_main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    let cfg = load_config(&cli.config)?;
    init_tracing(&cli, &cfg.logging)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let cancel = CancelToken::new();
    {
        let shutdown = Arc::clone(&shutdown);
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::Relaxed);
            cancel.cancel();
        })
        .wrap_err("install Ctrl-C handler")?;
    }

    let baselines = cli
        .baselines
        .as_deref()
        .map(lcflow_config::load_baselines_csv)
        .transpose()?;

    match cli.cmd {
        Commands::Calibrate { save } => {
            let (cal, _secondary) = commands::bring_up(cfg, baselines.as_ref(), &cancel)?;
            let b = cal.baselines();
            if let Some(path) = save {
                lcflow_config::save_baselines_csv(&path, &b)?;
                tracing::info!(path = %path.display(), "baselines saved");
            }
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "event": "calibrated",
                        "base": b.base,
                        "noise": b.noise,
                    })
                );
            } else {
                println!(
                    "calibration complete; base = {:?}, noise = {:?}",
                    b.base, b.noise
                );
            }
        }
        Commands::Run { cycles } => {
            let (mut cal, mut secondary) = commands::bring_up(cfg, baselines.as_ref(), &cancel)?;
            let report =
                commands::run_steady(&mut cal, &mut secondary, cycles, &shutdown, &cancel)?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "event": "run_complete",
                        "cycles": report.cycles,
                        "rotations": report.rotations,
                        "recals": report.recals,
                        "rotor_recals": report.rotor_recals,
                    })
                );
            } else {
                println!(
                    "run complete: {} rotations, {} cadence and {} rotor-event re-calibrations over {} cycles",
                    report.rotations, report.recals, report.rotor_recals, report.cycles
                );
            }
        }
        Commands::SelfCheck => {
            commands::self_check(&cancel)?;
            if cli.json {
                println!("{}", serde_json::json!({ "event": "self_check", "status": "ok" }));
            } else {
                println!("self-check ok");
            }
        }
    }
    Ok(())
}

fn load_config(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = lcflow_config::load_toml(&text).map_err(|e| CalError::Config(e.to_string()))?;
    cfg.validate()
        .map_err(|e| CalError::Config(e.to_string()))?;
    Ok(cfg)
}

/// Console subscriber from --log-level, plus an optional JSON-lines file
/// appender from the [logging] config section.
fn init_tracing(cli: &Cli, logging: &Logging) -> eyre::Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let level = logging.level.as_deref().unwrap_or(&cli.log_level);
    let filter = EnvFilter::try_new(level)
        .map_err(|e| CalError::Config(format!("invalid log level {level:?}: {e}")))?;
    let registry = tracing_subscriber::registry().with(filter);

    if let Some(file) = &logging.file {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| CalError::Config(format!("logging.file has no file name: {file}")))?;
        let appender = match logging.rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            None | Some("never") => tracing_appender::rolling::never(dir, name),
            Some(other) => {
                return Err(CalError::Config(format!(
                    "logging.rotation must be never|daily|hourly, got {other}"
                ))
                .into());
            }
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        let file_layer = fmt::layer().json().with_writer(writer);
        if cli.json {
            registry.with(file_layer).with(fmt::layer().json()).init();
        } else {
            registry.with(file_layer).with(fmt::layer()).init();
        }
    } else if cli.json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
    Ok(())
}
