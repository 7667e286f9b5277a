use std::{error::Error, io, process, time::Duration};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, warn, LevelFilter};

use jukebox::{
    config::Config,
    jukebox::Engine,
    signal,
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
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    ///
    /// Keep this file private: it holds the application secret and may hold
    /// account passwords and a refresh token.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("jukebox.toml"), env = "JUKEBOX_CONFIG")]
    config_file: String,

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
fn init_logger(args: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if args.quiet || args.verbose > 0 {
        let level = match args.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module("jukebox", level);
    }

    logger.init();
}

/// Loads the configuration, pointing at the example on a missing file.
fn load_config(path: &str) -> jukebox::error::Result<Config> {
    let config = Config::from_file(path);

    if let Err(ref e) = config {
        if e.downcast::<io::Error>()
            .is_some_and(|e| e.kind() == io::ErrorKind::NotFound)
        {
            info!("copy jukebox.toml.example to {path} and fill in your application");
        }
    }

    config
}

/// Main application loop.
///
/// Starts the engine and gets it ready, retrying with jitter until the
/// browser session and both tokens are usable. Runs until Ctrl-C or SIGTERM;
/// SIGHUP replaces the browser session.
///
/// # Errors
///
/// Returns an error when the configuration cannot be loaded or the engine
/// cannot be built.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = load_config(&args.config_file)?;
    debug!("{config:?}");

    let mut signals = signal::Handler::new()?;
    let engine = Engine::start(&config)?;
    let jukebox = engine.jukebox();

    // Retry after sleeping some duration to not hammer the services when
    // they are down. The first attempt happens immediately.
    let restart_timer = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(restart_timer);
    let mut ready = false;

    loop {
        tokio::select! {
            // Prioritize signals.
            biased;

            signal = signals.recv() => {
                if signal.is_shutdown() {
                    info!("{signal} received, shutting down gracefully");
                    break;
                }

                info!("{signal} received, replacing browser session");
                if let Err(e) = jukebox.reinitialize().await {
                    error!("{e}");
                    ready = false;
                }
            }

            result = jukebox.ensure_ready(), if !ready && restart_timer.is_elapsed() => {
                match result {
                    Ok(()) => {
                        ready = true;
                        info!("ready");
                    }
                    Err(e) => {
                        warn!("not ready: {e}");

                        // Sleep with jitter to spread out retries.
                        let duration = Duration::from_millis(fastrand::u64(5_000..6_000));
                        info!("retrying in {:.1}s", duration.as_secs_f32());
                        restart_timer.as_mut().reset(tokio::time::Instant::now() + duration);
                    }
                }
            }

            () = &mut restart_timer, if !restart_timer.is_elapsed() => {}
        }
    }

    engine.shutdown().await;
    Ok(())
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and starts the main application loop.
#[tokio::main]
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
