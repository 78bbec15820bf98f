use chrono::Local;
use clap::{Args, Parser, Subcommand};
use serial_link::config::{default_config_path, Config, ConfigLoader};
use serial_link::{
    logging, EventSubscription, ManagerOptions, PortRegistry, SampleTrigger, SerialEvent,
    SerialHandle, SerialManager, SystemBackend,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{debug, warn};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    name = "serial-link",
    version,
    about = "Discover serial ports and hold a monitored connection to one of them.",
    long_about = "Lists serial ports, or connects to one and prints every status, error and data event while forwarding stdin lines to the port."
)]
struct Cli {
    /// Configuration file to use instead of the standard locations.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the serial ports present right now.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Connect to a port and print its events.
    Monitor(MonitorArgs),
    /// Inspect or create the configuration file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args, Debug)]
struct MonitorArgs {
    /// Port to open; defaults to `serial.default_port`.
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate; defaults to `serial.default_baud`.
    #[arg(short, long)]
    baud: Option<u32>,

    /// Sample on a fixed period instead of on arrival.
    #[arg(long, value_name = "MS", conflicts_with = "frequency_hz")]
    interval_ms: Option<u64>,

    /// Sample at a fixed rate instead of on arrival.
    #[arg(long, value_name = "HZ")]
    frequency_hz: Option<u32>,

    /// Send a break pulse after every write.
    #[arg(long)]
    auto_break: bool,

    /// Print received bytes as hex.
    #[arg(long)]
    hex: bool,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration.
    Show,
    /// Write a default configuration file.
    Init {
        /// Destination; defaults to the platform config directory.
        path: Option<PathBuf>,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();

    let loader = match &cli.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    logging::init(&loader.config().logging);
    if let Some(path) = &loader.config_path {
        debug!(path = %path.display(), "using configuration file");
    }

    match cli.command {
        Command::List { json } => list_ports(json),
        Command::Monitor(args) => monitor(loader.into_config(), args).await,
        Command::Config { action } => config_command(&loader, action),
    }
}

fn list_ports(json: bool) -> CliResult<()> {
    let ports = PortRegistry::new(Arc::new(SystemBackend)).list_ports();

    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }
    if ports.is_empty() {
        println!("No serial ports found.");
        return Ok(());
    }
    for port in &ports {
        println!("{:<24} {}", port.system_location, port.description());
    }
    Ok(())
}

async fn monitor(config: Config, args: MonitorArgs) -> CliResult<()> {
    let port = args
        .port
        .or_else(|| config.serial.default_port.clone())
        .ok_or("no port given and serial.default_port is not set")?;
    let baud = args.baud.unwrap_or(config.serial.default_baud);

    let mut options = ManagerOptions::from_config(&config)?;
    if let Some(ms) = args.interval_ms {
        options.trigger = SampleTrigger::from_millis(ms).ok_or("--interval-ms must be positive")?;
    }
    if let Some(hz) = args.frequency_hz {
        options.trigger =
            SampleTrigger::from_frequency_hz(hz).ok_or("--frequency-hz must be 1 to 1000")?;
    }
    if args.auto_break {
        options.auto_break = true;
    }

    let link = SerialManager::spawn(options, Arc::new(SystemBackend));
    let printer = tokio::spawn(print_events(link.subscribe(), args.hex));

    if let Err(e) = link.connect(&port, baud).await {
        printer.abort();
        return Err(e.into());
    }
    eprintln!(
        "{} at {} baud. Type to send, Ctrl-D or Ctrl-C to quit.",
        link.status_text().await?,
        baud
    );

    tokio::select! {
        result = forward_stdin(&link) => result?,
        _ = shutdown_signal() => {}
    }

    link.disconnect().await?;
    printer.abort();
    Ok(())
}

async fn print_events(mut events: EventSubscription, hex: bool) {
    while let Some(event) = events.recv().await {
        let stamp = Local::now().format("%H:%M:%S%.3f");
        match event {
            SerialEvent::StatusChanged { connected } => {
                let state = if connected { "connected" } else { "disconnected" };
                println!("[{}] status: {}", stamp, state);
            }
            SerialEvent::ErrorOccurred { kind, message } => {
                println!("[{}] error ({:?}): {}", stamp, kind, message);
            }
            SerialEvent::PacketReady { bytes } if hex => {
                let text: Vec<String> = bytes.iter().map(|b| format!("{:02x}", b)).collect();
                println!("[{}] rx {}", stamp, text.join(" "));
            }
            SerialEvent::PacketReady { bytes } => {
                println!("[{}] rx {}", stamp, String::from_utf8_lossy(&bytes).trim_end());
            }
            SerialEvent::PacketEmpty => debug!("empty sample"),
        }
    }
}

async fn forward_stdin(link: &SerialHandle) -> CliResult<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut data = line.into_bytes();
        data.push(b'\n');
        if link.write(data).await < 0 {
            warn!("write dropped: not connected");
        }
    }
    Ok(())
}

fn config_command(loader: &ConfigLoader, action: ConfigAction) -> CliResult<()> {
    match action {
        ConfigAction::Show => {
            match &loader.config_path {
                Some(path) => println!("# loaded from {}", path.display()),
                None => println!("# built-in defaults"),
            }
            print!("{}", toml::to_string_pretty(loader.config())?);
        }
        ConfigAction::Init { path, force } => {
            let path = path
                .or_else(default_config_path)
                .ok_or("no platform config directory; pass a path")?;
            if path.exists() && !force {
                return Err(format!("{} already exists (use --force)", path.display()).into());
            }
            let defaults = ConfigLoader {
                config_path: None,
                config: Config::default(),
            };
            defaults.save_to(&path)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}

// --- Graceful Shutdown Handler ---
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    eprintln!("\nSignal received, disconnecting...");
}
