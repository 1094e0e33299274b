use std::{error::Error, path::Path, process, sync::Arc};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, warn, LevelFilter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    sync::mpsc,
};

use playsync::{
    bridge::Bridge,
    command::{Command, Reply},
    config::Config,
    connect::ConnectClient,
    credential::Credential,
    engine::{Engine, Handle},
    error::ErrorKind,
    http,
    remote::WebApi,
    signal::Handler,
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
    /// Secrets file
    ///
    /// Holds the access token. Keep it private: the token grants control
    /// over your account's playback. When absent, send an `initialize`
    /// request on standard input instead.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("secrets.toml"))]
    secrets_file: String,

    /// Configuration file
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    config_file: Option<String>,

    /// Name of the device to control
    ///
    /// [default: from configuration file, or the application name]
    #[arg(short = 'n', long)]
    device_name: Option<String>,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// A line on standard input.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum Inbound {
    Initialize {
        credential: String,
    },
    Command {
        id: u64,
        name: String,
        #[serde(default)]
        args: Option<Value>,
    },
    Dispose,
}

/// A reply line on standard output. Messages from the engine are written
/// as they are.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum Outbound {
    Reply {
        id: u64,
        #[serde(flatten)]
        reply: Reply,
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
/// Logs go to standard error; standard output carries the host protocol.
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            // Quiet and verbose are mutually exclusive.
            0 => LevelFilter::Warn,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module("playsync", level);
    }

    logger.target(env_logger::Target::Stderr).init();
}

/// Loads the credential from the secrets file.
fn load_credential(secrets_file: &str) -> playsync::error::Result<Credential> {
    let credential = Credential::from_file(secrets_file);

    if let Err(ref e) = credential {
        if e.kind == ErrorKind::NotFound {
            info!("no credential in {secrets_file}, expecting one on standard input");
        }
    }

    credential
}

/// Writes lines in the order they were queued. Stops at the first write
/// error.
async fn write_lines<W>(mut out: W, mut lines: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(mut line) = lines.recv().await {
        line.push('\n');
        let written = match out.write_all(line.as_bytes()).await {
            Ok(()) => out.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            error!("failed to write to standard output: {e}");
            break;
        }
    }
}

fn queue<T: Serialize>(out: &mpsc::UnboundedSender<String>, value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => {
            if out.send(line).is_err() {
                debug!("standard output closed");
            }
        }
        Err(e) => error!("failed to serialize output: {e}"),
    }
}

/// Reads host requests from standard input until it is closed, which
/// disposes the engine.
async fn read_requests(handle: Handle, out: mpsc::UnboundedSender<String>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("failed to read standard input: {e}");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Inbound>(&line) {
            Ok(Inbound::Initialize { credential }) => match credential.parse() {
                Ok(credential) => {
                    if let Err(e) = handle.initialize(credential) {
                        warn!("{e}");
                    }
                }
                Err(e) => error!("ignoring credential: {e}"),
            },

            Ok(Inbound::Command { id, name, args }) => {
                let reply = match Command::parse(&name, args) {
                    Ok(command) => {
                        // Commands may take a while; keep reading meanwhile.
                        let handle = handle.clone();
                        let out = out.clone();
                        tokio::spawn(async move {
                            let reply = handle.command(command).await;
                            queue(&out, &Outbound::Reply { id, reply });
                        });
                        continue;
                    }
                    Err(e) => Reply::failure(&e),
                };
                queue(&out, &Outbound::Reply { id, reply });
            }

            Ok(Inbound::Dispose) => {
                handle.dispose();
                return;
            }

            Err(e) => error!("ignoring malformed request: {e}"),
        }
    }

    debug!("standard input closed");
    handle.dispose();
}

/// Runs the engine until it is disposed.
///
/// # Errors
///
/// This function returns an error when the configuration cannot be loaded or
/// the HTTP client cannot be built.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut config = match &args.config_file {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(device_name) = args.device_name {
        config.device_name = device_name;
    }
    debug!("{config:#?}");

    let http = Arc::new(http::Client::new(&config)?);
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let client = ConnectClient::new(&config, Arc::clone(&http), events_tx);
    let remote = WebApi::new(http, config.api_url.clone());

    let (bridge, mut messages) = Bridge::channel();
    let (engine, handle) = Engine::new(&config, client, remote, events_rx, bridge);

    if Path::new(&args.secrets_file).exists() {
        handle.initialize(load_credential(&args.secrets_file)?)?;
    } else {
        info!("no secrets file, expecting a credential on standard input");
    }

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_lines(tokio::io::stdout(), out_rx));

    let forward_tx = out_tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(message) = messages.recv().await {
            queue(&forward_tx, &message);
        }
    });

    let reader = tokio::spawn(read_requests(handle.clone(), out_tx));

    let mut signals = Handler::new()?;
    let engine = engine.run();
    tokio::pin!(engine);

    loop {
        tokio::select! {
            biased;

            signal = signals.recv() => {
                if signal.is_shutdown() {
                    info!("{signal}: shutting down gracefully");
                    handle.dispose();
                } else {
                    info!("{signal}: reloading credential from {}", args.secrets_file);
                    match load_credential(&args.secrets_file) {
                        Ok(credential) => handle.initialize(credential)?,
                        Err(e) => error!("{e}"),
                    }
                }
            }

            () = &mut engine => break,
        }
    }

    // Flush everything the engine sent before it stopped.
    forwarder.await?;
    reader.abort();
    let _ = reader.await;
    writer.await?;

    Ok(())
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and runs the engine.
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

    // A pending read of standard input cannot be cancelled and would keep
    // the runtime from shutting down.
    process::exit(0);
}
