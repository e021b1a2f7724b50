//! The distprime-client executable supports the following command line arguments:
//!
//! `distprime-client prime <N> [--host HOST] [--port PORT]`
//!
//!     Ask the server whether N is prime.
//!
//! `distprime-client range <START> <END> [--host HOST] [--port PORT]`
//!
//!     List the primes in [START, END].
//!
//! `distprime-client count <START> <END> [--host HOST] [--port PORT]`
//!
//!     Count the primes in [START, END].
//!
//! `distprime-client stats [--host HOST] [--port PORT]`
//!
//!     Print the server metrics.
//!
//! `distprime-client [--host HOST] [--port PORT]`
//!
//!     Without a command, start an interactive session. Responses are printed by a
//!     listener thread as they arrive, while commands are typed at the prompt.
//!
//! The server defaults to 127.0.0.1:9090, overridable with `DISTPRIME_HOST` and
//! `DISTPRIME_PORT`. A server error is printed and returns a non-zero exit code.

use std::io::{self, BufRead, Write};
use std::process::exit;
use std::thread;

use clap::{crate_version, App, AppSettings, Arg, ArgMatches, SubCommand};
use distprime::{
    Body, PrimeClient, PrimeError, Request, Response, ResponseReader, Result, DEFAULT_HOST,
    HOST_ENV, PORT_ENV,
};
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

const PROMPT: &str = "distprime> ";

fn main() {
    if let Err(e) = run() {
        eprintln!("{}", e);
        exit(1);
    }
}

fn run() -> Result<()> {
    let default_port = distprime::DEFAULT_PORT.to_string();

    let matches = App::new("distprime-client")
        .version(crate_version!())
        .author("strohs <strohs1@gmail.com>")
        .about("client for the distprime prime computation server")
        .setting(AppSettings::AllowNegativeNumbers)
        .subcommands(vec![
            SubCommand::with_name("prime")
                .about("Check whether a number is prime")
                .setting(AppSettings::AllowNegativeNumbers)
                .arg(Arg::with_name("N").required(true).index(1)),
            SubCommand::with_name("range")
                .about("List the primes in an interval")
                .setting(AppSettings::AllowNegativeNumbers)
                .arg(Arg::with_name("START").required(true).index(1))
                .arg(Arg::with_name("END").required(true).index(2)),
            SubCommand::with_name("count")
                .about("Count the primes in an interval")
                .setting(AppSettings::AllowNegativeNumbers)
                .arg(Arg::with_name("START").required(true).index(1))
                .arg(Arg::with_name("END").required(true).index(2)),
            SubCommand::with_name("stats").about("Show the server metrics"),
        ])
        .arg(Arg::with_name("host")
            .long("host")
            .value_name("HOST")
            .env(HOST_ENV)
            .help("sets the host of the server to connect to")
            .default_value(DEFAULT_HOST))
        .arg(Arg::with_name("port")
            .long("port")
            .value_name("PORT")
            .env(PORT_ENV)
            .help("sets the port of the server to connect to")
            .default_value(&default_port))
        .arg(Arg::with_name("verbose")
            .short("v")
            .long("verbose")
            .help("log debug output to STDERR"))
        .get_matches();

    if matches.is_present("verbose") {
        subscriber_config(Level::DEBUG);
    }

    let addr = server_addr(&matches)?;
    match one_shot_request(&matches)? {
        Some(req) => run_once(&addr, req),
        None => run_interactive(&addr),
    }
}

/// validates `--host` and `--port` and returns the `host:port` to connect to
fn server_addr(matches: &ArgMatches) -> Result<String> {
    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port = matches.value_of("port").unwrap_or_default();
    let port: u16 = port
        .parse()
        .map_err(|_| PrimeError::Parsing(format!("could not parse {} into a port", port)))?;
    Ok(format!("{}:{}", host, port))
}

/// parses the subcommand, if any, into a [`Request`]
fn one_shot_request(matches: &ArgMatches) -> Result<Option<Request>> {
    let (name, args) = match matches.subcommand() {
        (name, Some(args)) => (name, args),
        _ => return Ok(None),
    };
    let mut line = name.to_owned();
    for arg in &["N", "START", "END"] {
        if let Some(value) = args.value_of(arg) {
            line.push(' ');
            line.push_str(value);
        }
    }
    Ok(Some(Request::parse(&line)?))
}

/// sends a single request and prints its result
fn run_once(addr: &str, req: Request) -> Result<()> {
    let mut client = PrimeClient::connect(addr)?;
    let resp = client.call(&req)?;
    let body = resp.into_result()?;
    println!("{}", render_body(&body));
    client.exit()
}

/// reads commands from STDIN and sends them, while a listener thread prints the responses
fn run_interactive(addr: &str) -> Result<()> {
    let client = match PrimeClient::connect(addr) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("could not connect to {}: {}", addr, e);
            return Err(e);
        }
    };
    let (mut writer, reader) = client.split();
    let listener = thread::Builder::new()
        .name("listener".into())
        .spawn(move || listen(reader))?;

    println!("Connected to {}. Available commands:", addr);
    println!("  prime <n>      check whether n is prime");
    println!("  range <a> <b>  list the primes in [a, b]");
    println!("  count <a> <b>  count the primes in [a, b]");
    println!("  stats          server metrics");
    println!("  exit           close the client");
    prompt();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            prompt();
            continue;
        }
        if trimmed.eq_ignore_ascii_case("quit") {
            break;
        }
        match Request::parse(trimmed) {
            Ok(Request::Exit) => break,
            Ok(req) => {
                debug!("sending {}", req);
                if let Err(e) = writer.send(&req) {
                    eprintln!("[error] {}", e);
                    break;
                }
            }
            Err(e) => {
                println!("[error] {}", e);
                prompt();
            }
        }
    }

    // the server acknowledges exit and closes, which ends the listener
    println!("Closing client...");
    if writer.send(&Request::Exit).is_ok() {
        let _ = listener.join();
    }
    Ok(())
}

/// prints every response until the server closes the connection
fn listen(reader: ResponseReader) {
    for resp in reader {
        match resp {
            Ok(resp) => {
                println!("\n{}", render(&resp));
                prompt();
            }
            Err(e) => {
                println!("\n[malformed response]: {}", e);
                break;
            }
        }
    }
    println!("\n[server closed the connection]");
}

fn prompt() {
    print!("{}", PROMPT);
    let _ = io::stdout().flush();
}

/// `[ok] count: {"count": 4}`
fn render(resp: &Response) -> String {
    let status = if resp.is_ok() { "ok" } else { "error" };
    format!("[{}] {}: {}", status, resp.command, render_body(&resp.body))
}

fn render_body(body: &Body) -> String {
    serde_json::to_string_pretty(body).unwrap_or_else(|_| format!("{:?}", body))
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config(level: Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        // log to stderr instead of stdout
        .with_writer(std::io::stderr)
        // completes the builder.
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting tracing default subscriber failed: {}", e);
    }
}
