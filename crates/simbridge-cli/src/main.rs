//! `simbridge` – runs the bridge against the in-process simulated fleet.
//!
//! 1. Loads `~/.simbridge/config.toml` (or the file named by the first
//!    argument), writing the defaults on first run.
//! 2. Connects, prepares every vehicle, and publishes the scene lists.
//! 3. Runs the state loop, the sensor pollers, and the WebSocket server
//!    until Ctrl-C.

mod config;

use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use simbridge_hal::SimClient;
use simbridge_middleware::EventBus;
use simbridge_runtime::{SimBridge, init_tracing};

fn main() {
    // Tracing first: the OTLP exporter must exist before the runtime starts.
    let _telemetry = init_tracing("simbridge");

    print_banner();

    let cfg = match load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            std::process::exit(2);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the bridge …".yellow().bold());
        if shutdown_tx.send(true).is_err() {
            std::process::exit(130);
        }
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; the bridge must be killed to stop");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start the async runtime");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cfg, shutdown_rx)) {
        println!("{}: {}", "Bridge error".red(), e);
        std::process::exit(1);
    }
    println!("{}", "  ✓ Bridge stopped.".green());
}

fn load_config() -> Result<config::Config, String> {
    if let Some(arg) = std::env::args().nth(1) {
        let path = PathBuf::from(arg);
        return config::load_from(&path)?
            .ok_or_else(|| format!("no config file at {}", path.display()));
    }

    let path = config::config_path();
    match config::load_from(&path)? {
        Some(cfg) => {
            println!("  Config loaded from {}", path.display().to_string().bold());
            Ok(cfg)
        }
        None => {
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            match config::save_to(&cfg, &path) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    path.display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            Ok(cfg)
        }
    }
}

async fn run(cfg: config::Config, shutdown: watch::Receiver<bool>) -> Result<(), String> {
    let bridge_config = cfg.bridge_config();
    let home = cfg.origin.unwrap_or_default();
    let client = Arc::new(SimClient::from_settings(cfg.sim_mode, &cfg.vehicles, home));

    let bridge = SimBridge::connect(
        client,
        cfg.sim_mode,
        &cfg.vehicles,
        bridge_config.clone(),
        EventBus::default(),
    )
    .await
    .map_err(|e| e.to_string())?;

    println!(
        "  {} {} vehicle(s), mode {:?}",
        "Connected:".green().bold(),
        bridge.registry().len(),
        cfg.sim_mode
    );
    println!(
        "  WebSocket bridge on {}",
        format!("ws://{}", bridge_config.ws_addr).bold().cyan()
    );
    println!();

    for handle in bridge.spawn(shutdown) {
        if let Err(e) = handle.await {
            error!(error = %e, "bridge task panicked");
        }
    }
    info!("all bridge tasks finished");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   _____ _           ____       _     __         "#.bold().cyan());
    println!("{}", r#"  / ___/(_)___ ___  / __ )_____(_)___/ /___ ____ "#.bold().cyan());
    println!("{}", r#"  \__ \/ / __ `__ \/ __  / ___/ / __  / __ `/ _ \"#.bold().cyan());
    println!("{}", r#" ___/ / / / / / / / /_/ / /  / / /_/ / /_/ /  __/"#.bold().cyan());
    println!("{}", r#"/____/_/_/ /_/ /_/_____/_/  /_/\__,_/\__, /\___/ "#.bold().cyan());
    println!("{}", r#"                                    /____/       "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "SimBridge".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Vehicle simulator ⇄ middleware bus bridge");
    println!();
}
