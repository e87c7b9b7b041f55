//! OBS Connector
//!
//! Console front end: wires the coordinator to the keyring, the config file,
//! the relay and OBS, and reads commands from stdin.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};

use obs_connector::app::{create_app_channel, App, AppCommand, Services};
use obs_connector::config::{Config, FileSettingsStore};
use obs_connector::credential::KeyringStore;
use obs_connector::logging::{get_log_dir, init_logging};
use obs_connector::obs::ObwsDialer;
use obs_connector::relay::SocketIoDialer;
use obs_connector::ui::{read_commands, ConsoleShell, CONSOLE_USAGE};

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let _log_guard = init_logging()?;
    info!("OBS Connector V{} starting...", env!("CARGO_PKG_VERSION"));

    let open_settings = args.iter().any(|a| a == "--setup" || a == "-s");

    let runtime = tokio::runtime::Runtime::new()?;

    let config = Config::load()?;
    info!("Configuration loaded from {:?}", config.config_path());
    let config_path = config
        .config_path()
        .context("Configuration has no file path")?
        .to_path_buf();

    let services = Services {
        secrets: Arc::new(KeyringStore),
        settings: Arc::new(FileSettingsStore::new(config_path)),
        relay: Arc::new(SocketIoDialer),
        tool: Arc::new(ObwsDialer),
    };

    let (cmd_tx, cmd_rx) = create_app_channel();
    let app = App::new(config.clone(), services, ConsoleShell::stdout(), cmd_rx);

    let ctrl_c_tx = cmd_tx.clone();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, shutting down...");
        if ctrl_c_tx.try_send(AppCommand::Shutdown).is_err() {
            std::process::exit(130);
        }
    })?;

    if open_settings {
        cmd_tx.try_send(AppCommand::ShowToolForm)?;
    }

    println!("{}", CONSOLE_USAGE);
    let current = config.obs.clone();
    std::thread::spawn(move || read_commands(std::io::stdin().lock(), cmd_tx, current));

    if let Err(e) = runtime.block_on(app.run()) {
        error!("Coordinator error: {:#}", e);
    }

    info!("Shutdown complete");
    Ok(())
}

fn print_help() {
    println!("OBS Connector - relays OBS events to BotOfTheSpecter");
    println!();
    println!("USAGE:");
    println!("    obs-connector [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help    Print this help message");
    println!("    -s, --setup   Show the OBS connection settings on start");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG                 Set log level (e.g., debug, info, warn)");
    println!("    OBS_CONNECTOR_LOG_PATH   Override the log directory");
    println!();
    match get_log_dir() {
        Ok(dir) => println!("Logs are written to {}", dir.display()),
        Err(e) => println!("Log directory unavailable: {:#}", e),
    }
    println!();
    println!("For more information, visit: https://botofthespecter.com");
}
