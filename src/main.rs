use std::{error::Error, process, sync::Arc, time::Duration};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, LevelFilter};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use url::Url;

use sonotube::{
    backend::MeTube,
    config::Config,
    remote::{Command, Receiver},
    signal::{self, Signal},
    sonos::Sonos,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, PartialEq, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Sonos speaker address
    ///
    /// Host name or IP address of the speaker, with an optional port.
    #[arg(short, long, value_hint = ValueHint::Hostname, env = "SONOS_DEVICE_IP")]
    device: Option<String>,

    /// Receiver's name
    ///
    /// Set the receiver's name as it appears to senders.
    ///
    /// [default: system hostname]
    #[arg(short, long, env = "DEVICE_NAME")]
    name: Option<String>,

    /// MeTube API base URL
    #[arg(long, value_hint = ValueHint::Url, env = "MEETUBE_API_BASE_URL", default_value = Config::DEFAULT_BACKEND_URL)]
    backend_url: Url,

    /// Base URL of downloaded audio files
    ///
    /// [default: <BACKEND_URL>/audio_download]
    #[arg(long, value_hint = ValueHint::Url, env = "MEETUBE_AUDIO_URL")]
    audio_url: Option<Url>,

    /// Seconds between look-ahead downloads
    #[arg(long, value_name = "SECONDS", env = "PLAYLIST_DOWNLOAD_INTERVAL", default_value_t = Config::DEFAULT_PREFETCH_INTERVAL.as_secs())]
    download_interval: u64,

    /// Number of upcoming tracks to download ahead
    #[arg(long, value_name = "TRACKS", env = "PLAYLIST_MAX_AHEAD_DOWNLOAD", default_value_t = Config::DEFAULT_MAX_LOOK_AHEAD)]
    max_ahead: usize,

    /// Seconds between backend polls while waiting for a download
    #[arg(long, value_name = "SECONDS", env = "DOWNLOAD_POLL_INTERVAL", default_value_t = Config::DEFAULT_DOWNLOAD_POLL_INTERVAL.as_secs_f64())]
    poll_interval: f64,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Feeds commands read from standard input, one per line, to the receiver.
/// Blank lines and lines starting with `#` are skipped.
async fn read_commands(commands: mpsc::Sender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }

                match line.parse::<Command>() {
                    Ok(command) => {
                        if commands.send(command).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => error!("{e}"),
                }
            }
            Ok(None) => {
                debug!("end of command input");
                break;
            }
            Err(e) => {
                error!("error reading commands: {e}");
                break;
            }
        }
    }
}

/// Builds the configuration from the command line arguments.
fn configure(args: Args) -> Result<Config, Box<dyn Error>> {
    let device = args
        .device
        .filter(|device| !device.trim().is_empty())
        .ok_or("speaker address not set, pass --device or set SONOS_DEVICE_IP")?;

    let mut config = Config::new(&device)?;
    config.device_name = args
        .name
        .or_else(sysinfo::System::host_name)
        .unwrap_or_else(|| config.app_name.clone());
    config.set_backend(args.backend_url, args.audio_url)?;
    config.prefetch_interval = Duration::from_secs(args.download_interval.max(1));
    config.max_look_ahead = args.max_ahead;
    config.download_poll_interval = Duration::try_from_secs_f64(args.poll_interval)?;

    Ok(config)
}

/// Main application loop.
///
/// Runs the receiver until a termination signal. SIGHUP triggers an
/// immediate look-ahead and queue alignment pass.
///
/// # Errors
///
/// Returns an error when the configuration is invalid or the signal
/// handlers cannot be installed.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = configure(args)?;
    info!("playing on {} as {}", config.device_address, config.device_name);
    debug!("downloading from {}", config.backend_url);

    let device = Arc::new(Sonos::new(&config)?);
    let backend = Arc::new(MeTube::new(&config)?);
    let mut receiver = Receiver::new(&config, device, backend);

    let mut signals = signal::Handler::new()?;

    // Keep a sender here so that the receiver keeps running after standard
    // input closes.
    let (command_tx, command_rx) = mpsc::channel(16);
    tokio::spawn(read_commands(command_tx.clone()));

    let signal = {
        let running = receiver.run(command_rx);
        tokio::pin!(running);

        loop {
            tokio::select! {
                // Prioritize shutdown signals.
                biased;

                signal = signals.recv() => match signal {
                    Signal::Resync => {
                        info!("received {signal}, refreshing device queue");
                        if let Err(e) = command_tx.try_send(Command::Refresh) {
                            error!("cannot refresh device queue: {e}");
                        }
                    }
                    signal => break Some(signal),
                },

                () = &mut running => break None,
            }
        }
    };

    if let Some(signal) = signal {
        info!("received {signal}, shutting down gracefully");
    }
    receiver.shutdown().await;

    Ok(())
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and starts the main application loop.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
