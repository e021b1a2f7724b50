//! this binary starts the prime server
//! to see the list of options, type: `distprime-server --help`
//!
//! The server is also its own worker: started with the hidden `--worker` flag it reads work
//! items from STDIN and writes results to STDOUT, which is how the worker pool runs it.

use std::io;
use std::net::TcpListener;
use std::process::exit;
use std::time::Duration;

use clap::{crate_version, App, Arg, ArgMatches};
use distprime::{
    run_worker, NaiveThreadPool, PrimeError, PrimeServer, ProcessPool, Result, ServerConfig,
    SharedQueueThreadPool, ThreadPool, WorkerCommand, DEFAULT_HOST, HOST_ENV, PORT_ENV,
};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

fn main() {
    let default_port = distprime::DEFAULT_PORT.to_string();

    // parse command line args
    let matches = App::new("distprime-server")
        .version(crate_version!())
        .author("strohs <strohs1@gmail.com>")
        .about("a multi-threaded prime computation server")
        .arg(Arg::with_name("host")
            .long("host")
            .value_name("HOST")
            .env(HOST_ENV)
            .help("sets the host name or IP address the server listens on")
            .default_value(DEFAULT_HOST))
        .arg(Arg::with_name("port")
            .long("port")
            .value_name("PORT")
            .env(PORT_ENV)
            .help("sets the port the server listens on")
            .default_value(&default_port))
        .arg(Arg::with_name("workers")
            .long("workers")
            .value_name("N")
            .help("number of worker processes, defaults to the number of CPU cores"))
        .arg(Arg::with_name("max-connections")
            .long("max-connections")
            .value_name("N")
            .help("serve at most N connections at once, further connections wait"))
        .arg(Arg::with_name("max-span")
            .long("max-span")
            .value_name("N")
            .help("reject range and count requests covering more than N integers"))
        .arg(Arg::with_name("idle-timeout")
            .long("idle-timeout")
            .value_name("SECONDS")
            .help("close connections that send nothing for this many seconds"))
        .arg(Arg::with_name("log-level")
            .long("log-level")
            .value_name("LEVEL")
            .help("one of trace, debug, info, warn or error")
            .default_value("info"))
        .arg(Arg::with_name("worker")
            .long(&distprime::WORKER_FLAG[2..])
            .hidden(true)
            .help("run as a worker process of the pool"))
        .get_matches();

    // set up a tracing subscriber to log to STDERR
    let level = match parse_level(matches.value_of("log-level")) {
        Ok(level) => level,
        Err(err) => {
            eprintln!("{}", err);
            exit(1);
        }
    };
    subscriber_config(level);

    if matches.is_present("worker") {
        // STDOUT carries results, logging stays on STDERR
        let stdin = io::stdin();
        let stdout = io::stdout();
        if let Err(e) = run_worker(stdin.lock(), stdout.lock()) {
            error!("worker {} failed: {}", std::process::id(), e);
            exit(1);
        }
        return;
    }

    // validate command line options
    let config = match build_config(&matches) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            exit(1);
        }
    };

    // start the server
    if let Err(e) = run(config) {
        error!("{}", e);
        eprintln!("{}", e);
        exit(1);
    }
}

/// validates the options and turns them into a [`ServerConfig`]
///
/// # Errors
/// returns [`PrimeError::Parsing`] if one of the parameters is invalid
fn build_config(matches: &ArgMatches) -> Result<ServerConfig> {
    let defaults = ServerConfig::default();
    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST).to_owned();
    let port = parse_opt(matches, "port")?.unwrap_or(defaults.port);
    let workers = parse_opt(matches, "workers")?.unwrap_or(defaults.workers);
    if workers == 0 {
        return Err(PrimeError::Parsing("--workers must be at least 1".to_owned()));
    }
    let max_connections: Option<u32> = parse_opt(matches, "max-connections")?;
    if max_connections == Some(0) {
        return Err(PrimeError::Parsing(
            "--max-connections must be at least 1".to_owned(),
        ));
    }
    let max_span: Option<u64> = parse_opt(matches, "max-span")?;
    if max_span == Some(0) {
        return Err(PrimeError::Parsing("--max-span must be at least 1".to_owned()));
    }
    let idle_timeout = parse_opt(matches, "idle-timeout")?
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);

    Ok(ServerConfig {
        host,
        port,
        workers,
        max_connections,
        max_span,
        idle_timeout,
    })
}

/// parses the value of option `name`, if it was given
fn parse_opt<T: std::str::FromStr>(matches: &ArgMatches, name: &str) -> Result<Option<T>> {
    matches
        .value_of(name)
        .map(|value| {
            value.parse().map_err(|_| {
                PrimeError::Parsing(format!("could not parse --{} value: {}", name, value))
            })
        })
        .transpose()
}

fn parse_level(level: Option<&str>) -> Result<Level> {
    let level = level.unwrap_or("info");
    level
        .parse()
        .map_err(|_| PrimeError::Parsing(format!("unknown log level: {}", level)))
}

fn run(config: ServerConfig) -> Result<()> {
    info!("distprime-server {}", env!("CARGO_PKG_VERSION"));

    // a bind failure is the only fatal error, so check it before starting any worker
    let listener = TcpListener::bind(config.addr())?;
    info!("Worker processes: {}", config.workers);
    let compute = ProcessPool::new(config.workers, WorkerCommand::current_exe()?)?;

    match config.max_connections {
        Some(max) => {
            info!("Serving at most {} connections at once", max);
            let sessions = SharedQueueThreadPool::new(max)?;
            run_with_pool(config, compute, sessions, listener)
        }
        None => run_with_pool(config, compute, NaiveThreadPool::new(0)?, listener),
    }
}

fn run_with_pool<P: ThreadPool>(
    config: ServerConfig,
    compute: ProcessPool,
    sessions: P,
    listener: TcpListener,
) -> Result<()> {
    let server = PrimeServer::new(config, compute, sessions);
    server.serve(listener)
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config(level: Level) {
    let subscriber = FmtSubscriber::builder()
        // all spans/events at `level` or more severe will be written
        .with_max_level(level)
        // log to stderr instead of stdout
        .with_writer(std::io::stderr)
        // completes the builder.
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting tracing default subscriber failed: {}", e);
    }
}
