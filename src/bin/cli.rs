//! BaseX CLI Client
//!
//! Command-line interface for running commands, queries and event watches
//! against a BaseX server.

use std::path::PathBuf;
use std::process::ExitCode;

use basex_client::{Config, EventKind, Result, Session};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// BaseX CLI
#[derive(Parser, Debug)]
#[command(name = "basex-cli")]
#[command(about = "Command-line client for the BaseX server protocol")]
#[command(version)]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value = "1984")]
    port: u16,

    /// User name
    #[arg(short, long, default_value = "admin")]
    user: String,

    /// Password
    #[arg(short = 'P', long, default_value = "admin")]
    password: String,

    /// Log every byte sent and received
    #[arg(long)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a database command
    Execute {
        /// The command text, e.g. "list"
        command: String,
    },

    /// Run a query and print its items
    Query {
        /// Query text
        text: String,

        /// External variable binding (name=value), repeatable
        #[arg(short, long = "bind")]
        bindings: Vec<String>,

        /// Print query info after the results
        #[arg(long)]
        info: bool,
    },

    /// Create a database from a file
    Create {
        name: String,
        file: PathBuf,
    },

    /// Add a document to the opened database
    Add {
        path: String,
        file: PathBuf,
    },

    /// Replace a document
    Replace {
        path: String,
        file: PathBuf,
    },

    /// Store raw data
    Store {
        path: String,
        file: PathBuf,
    },

    /// Print notifications of one or more events
    Watch {
        /// Event names
        #[arg(required = true)]
        events: Vec<String>,

        /// Exit after this many notifications
        #[arg(short, long)]
        count: Option<usize>,
    },
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,basex_client=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let config = Config::builder()
        .host(&args.host)
        .port(args.port)
        .credentials(&args.user, &args.password)
        .trace_wire(args.trace)
        .build()?;

    tracing::debug!("basex-cli v{} connecting to {}", basex_client::VERSION, config.addr());

    let mut session = Session::connect(config)?;
    session.on(EventKind::Error, |event| {
        tracing::error!("Session error: {:?}", event);
    });

    match args.command {
        Commands::Execute { command } => {
            let execution = session.execute(&command)?;
            print!("{}", execution.result);
            if !execution.info.is_empty() {
                eprintln!("{}", execution.info.trim_end());
            }
        }

        Commands::Query {
            text,
            bindings,
            info,
        } => {
            let mut query = session.query(&text)?;
            for binding in &bindings {
                let (name, value) = binding.split_once('=').ok_or_else(|| {
                    basex_client::ClientError::Config(format!(
                        "binding '{}' is not name=value",
                        binding
                    ))
                })?;
                query.bind(&mut session, name, value, None)?;
            }
            for item in query.results(&mut session)? {
                println!("{}", item?.value);
            }
            if info {
                eprintln!("{}", query.info(&mut session)?.trim_end());
            }
            query.close(&mut session)?;
        }

        Commands::Create { name, file } => {
            let input = std::fs::read(&file)?;
            eprintln!("{}", session.create(&name, input)?.trim_end());
        }

        Commands::Add { path, file } => {
            let input = std::fs::read(&file)?;
            eprintln!("{}", session.add(&path, input)?.trim_end());
        }

        Commands::Replace { path, file } => {
            let input = std::fs::read(&file)?;
            eprintln!("{}", session.replace(&path, input)?.trim_end());
        }

        Commands::Store { path, file } => {
            let input = std::fs::read(&file)?;
            eprintln!("{}", session.store(&path, input)?.trim_end());
        }

        Commands::Watch { events, count } => {
            let (tx, rx) = crossbeam::channel::unbounded();
            for event in &events {
                let tx = tx.clone();
                let name = event.clone();
                session.watch(event, move |data| {
                    let _ = tx.send(format!("{}: {}", name, data));
                })?;
            }
            eprintln!("Watching {} event(s)", events.len());

            let mut seen = 0usize;
            while count.map_or(true, |limit| seen < limit) {
                if !session.pump(None) {
                    break;
                }
                while let Ok(line) = rx.try_recv() {
                    println!("{}", line);
                    seen += 1;
                }
            }
        }
    }

    session.close()
}
