use std::{error::Error, fs, path::PathBuf, process};

use clap::{command, Parser, Subcommand, ValueHint};
use log::{debug, error, info, warn, LevelFilter};

use plexer::{
    config::Config,
    http::Client,
    normalize::Listing,
    parser::{self, Parser as ResponseParser},
    protocol::{device::DeviceRecord, navigation::MediaEntry},
    target::build_request_target,
    token::AuthToken,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Print records as JSON instead of a table.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, global = true, default_value_t = false, conflicts_with = "verbose")]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, Subcommand)]
enum Command {
    /// Lists the entries of a navigation path on a server.
    Browse {
        /// Server hostname or IP address
        #[arg(short, long, env = "PLEX_ADDRESS", value_hint = ValueHint::Hostname)]
        address: String,

        /// Server port
        ///
        /// [default: 32400]
        #[arg(short, long, env = "PLEX_PORT")]
        port: Option<String>,

        /// Navigation path to list
        #[arg(long, default_value_t = String::from("/library/sections"))]
        path: String,

        /// Secrets file with the authentication token
        ///
        /// Keep this file private: the token grants access to your server.
        /// Without it, requests are made unauthenticated.
        #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath)]
        secrets_file: Option<String>,
    },

    /// Lists the devices of a saved device-info response.
    Devices {
        /// Response body, as markup or binary property list
        #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
        file: PathBuf,
    },
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
            // Quiet and verbose conflict, so this arm means: quiet mode.
            0 => LevelFilter::Warn,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Loads the token from a secrets file, if one was given.
fn load_token(secrets_file: Option<&str>) -> plexer::Result<Option<AuthToken>> {
    let Some(secrets_file) = secrets_file else {
        info!("no secrets file given, making unauthenticated requests");
        return Ok(None);
    };

    let token = AuthToken::from_file(secrets_file);
    if let Err(ref e) = token {
        if e.kind == plexer::ErrorKind::NotFound {
            info!("read the documentation on how to set your token in {secrets_file}");
        }
    }

    token.map(Some)
}

fn report<T>(listing: &Listing<T>) {
    if listing.dropped > 0 {
        warn!("{} records dropped for missing or invalid fields", listing.dropped);
    }
    if listing.duplicates > 0 {
        warn!("{} duplicate records removed", listing.duplicates);
    }
    if listing.downgraded > 0 {
        warn!("{} records downgraded to unsupported", listing.downgraded);
    }
}

fn print_entries(listing: &Listing<MediaEntry>) {
    for entry in listing {
        let detail = match entry {
            MediaEntry::Container(container) => {
                container.browse_path.clone().unwrap_or_default()
            }
            MediaEntry::Playable(item) => item
                .duration
                .map(|duration| format!("{}s", duration.as_secs()))
                .unwrap_or_default(),
            MediaEntry::Unsupported(_) => String::from("unsupported"),
        };

        println!(
            "{:<10} {:<12} {:<40} {detail}",
            entry.kind(),
            entry.identifier(),
            entry.title().unwrap_or("-"),
        );
    }
}

fn print_devices(listing: &Listing<DeviceRecord>) {
    for device in listing {
        let capabilities: Vec<_> = device
            .protocol_capabilities
            .iter()
            .map(String::as_str)
            .collect();
        println!(
            "{:<24} {:<22} {:<16} {}",
            device.name,
            format!("{}:{}", device.host, device.port),
            device.product.as_deref().unwrap_or("-"),
            capabilities.join(","),
        );
    }
}

/// Main application logic.
///
/// # Errors
///
/// Returns an error when the request target is invalid, the server cannot be
/// reached, or the response cannot be decoded.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    match args.command {
        Command::Browse {
            address,
            port,
            path,
            secrets_file,
        } => {
            let token = load_token(secrets_file.as_deref())?;
            let token = token.as_deref().unwrap_or_default();
            let target = build_request_target(
                &address,
                port.as_deref().unwrap_or_default(),
                &path,
                token,
            )?;

            let config = Config::new();
            let parser = ResponseParser::new(Client::new(&config)?);
            let listing = parser.browse(&target).await?;

            report(&listing);
            if args.json {
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                print_entries(&listing);
            }
        }

        Command::Devices { file } => {
            let bytes = fs::read(&file)?;
            debug!("read {} bytes from {}", bytes.len(), file.display());

            let listing = parser::parse_device_info(&bytes)?;

            report(&listing);
            if args.json {
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                print_devices(&listing);
            }
        }
    }

    Ok(())
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and runs the requested command.
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

    let result = tokio::select! {
        biased;

        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            Ok(())
        }

        result = run(args) => result,
    };

    if let Err(e) = result {
        error!("{e}");
        process::exit(1);
    }
}
