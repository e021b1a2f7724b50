use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PrimeError, ProtocolError};
use crate::metrics::MetricsSnapshot;

/// The command token at the start of every request line.
///
/// Tokens are matched case-insensitively and always rendered in lowercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// primality test of a single integer
    Prime,
    /// list the primes of an interval
    Range,
    /// count the primes of an interval
    Count,
    /// read the server metrics
    Stats,
    /// close the session
    Exit,
}

impl Command {
    /// every command, in the order they are listed in the metrics
    pub const ALL: [Command; 5] = [
        Command::Prime,
        Command::Range,
        Command::Count,
        Command::Stats,
        Command::Exit,
    ];

    /// the lowercase wire name of this command
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Prime => "prime",
            Command::Range => "range",
            Command::Count => "count",
            Command::Stats => "stats",
            Command::Exit => "exit",
        }
    }

    /// number of integer arguments the command takes
    pub fn arity(&self) -> usize {
        match self {
            Command::Prime => 1,
            Command::Range | Command::Count => 2,
            Command::Stats | Command::Exit => 0,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let token = token.to_lowercase();
        Command::ALL
            .iter()
            .find(|cmd| cmd.as_str() == token)
            .copied()
            .ok_or(ProtocolError::UnknownCommand(token))
    }
}

/// These are the requests a client can make of the prime server.
///
/// On the wire a request is a single line: `<COMMAND> [arg1] [arg2]`, e.g. `range 10 50`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// is `n` prime?
    Prime {
        /// the number to test
        n: i64,
    },
    /// all primes in `[start, end]`
    Range {
        /// inclusive lower bound
        start: i64,
        /// inclusive upper bound
        end: i64,
    },
    /// how many primes are in `[start, end]`
    Count {
        /// inclusive lower bound
        start: i64,
        /// inclusive upper bound
        end: i64,
    },
    /// a snapshot of the server metrics
    Stats,
    /// acknowledge, then close the connection
    Exit,
}

impl Request {
    /// parses one request line (without its newline terminator).
    ///
    /// # Errors
    /// returns a [`ProtocolError`] if the command token is unknown, the number of arguments
    /// does not match the command, an argument is not a 64 bit integer, or `start > end`
    pub fn parse(line: &str) -> Result<Request, ProtocolError> {
        let mut tokens = line.split_whitespace();
        let command: Command = tokens.next().unwrap_or_default().parse()?;
        let args: Vec<&str> = tokens.collect();

        if args.len() != command.arity() {
            return Err(ProtocolError::WrongArity {
                command,
                expected: command.arity(),
                found: args.len(),
            });
        }

        let ints = args
            .iter()
            .map(|arg| arg.parse::<i64>())
            .collect::<Result<Vec<i64>, _>>()
            .map_err(|_| ProtocolError::InvalidArgument(command))?;

        let req = match (command, ints.as_slice()) {
            (Command::Prime, &[n]) => Request::Prime { n },
            (Command::Range, &[start, end]) | (Command::Count, &[start, end]) if start > end => {
                return Err(ProtocolError::InvalidRange(command))
            }
            (Command::Range, &[start, end]) => Request::Range { start, end },
            (Command::Count, &[start, end]) => Request::Count { start, end },
            (Command::Stats, &[]) => Request::Stats,
            (Command::Exit, &[]) => Request::Exit,
            (_, ints) => {
                return Err(ProtocolError::WrongArity {
                    command,
                    expected: command.arity(),
                    found: ints.len(),
                })
            }
        };
        Ok(req)
    }

    /// the command of this request
    pub fn command(&self) -> Command {
        match self {
            Request::Prime { .. } => Command::Prime,
            Request::Range { .. } => Command::Range,
            Request::Count { .. } => Command::Count,
            Request::Stats => Command::Stats,
            Request::Exit => Command::Exit,
        }
    }

    /// rejects `range` and `count` requests whose interval holds more than `max_span` integers
    pub fn check_span(&self, max_span: u64) -> Result<(), ProtocolError> {
        match *self {
            Request::Range { start, end } | Request::Count { start, end } => {
                let span = i128::from(end) - i128::from(start) + 1;
                if span > i128::from(max_span) {
                    Err(ProtocolError::RangeTooLarge {
                        command: self.command(),
                        max: max_span,
                    })
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Prime { n } => write!(f, "prime {}", n),
            Request::Range { start, end } => write!(f, "range {} {}", start, end),
            Request::Count { start, end } => write!(f, "count {} {}", start, end),
            Request::Stats => f.write_str("stats"),
            Request::Exit => f.write_str("exit"),
        }
    }
}

/// whether a request was serviced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// the request succeeded
    Ok,
    /// the request failed, see the `message` field
    Error,
}

/// The command specific part of a [`Response`]. Its fields are flattened into the response
/// object, so `Body::Count { count: 4 }` becomes `"count":4`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Body {
    /// result of a `prime` request
    Prime {
        /// true if the number is prime
        is_prime: bool,
    },
    /// result of a `range` request
    Range {
        /// the primes in ascending order
        primes: Vec<i64>,
    },
    /// result of a `count` request
    Count {
        /// number of primes in the interval
        count: u64,
    },
    /// result of a `stats` request
    Stats(MetricsSnapshot),
    /// an error description, or the `exit` acknowledgement
    Message {
        /// human readable text
        message: String,
    },
}

/// The response sent for every request: one JSON object on one line.
///
/// ```json
/// {"status":"ok","command":"range","primes":[11,13,17,19]}
/// {"status":"error","command":"range","message":"invalid range"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// `ok` or `error`
    pub status: Status,
    /// the command this response answers
    pub command: String,
    /// the command specific payload
    #[serde(flatten)]
    pub body: Body,
}

impl Response {
    /// a successful response for `command`
    pub fn ok(command: Command, body: Body) -> Self {
        Response {
            status: Status::Ok,
            command: command.to_string(),
            body,
        }
    }

    /// an error response carrying `message`
    pub fn error(command: impl Into<String>, message: impl Into<String>) -> Self {
        Response {
            status: Status::Error,
            command: command.into(),
            body: Body::Message {
                message: message.into(),
            },
        }
    }

    /// returns true if the request was serviced
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// converts the response into its payload, or a [`PrimeError::Server`] if the server
    /// reported an error
    pub fn into_result(self) -> crate::Result<Body> {
        match (self.status, self.body) {
            (Status::Ok, body) => Ok(body),
            (Status::Error, Body::Message { message }) => Err(PrimeError::Server(message)),
            (Status::Error, body) => Err(PrimeError::Server(format!("{:?}", body))),
        }
    }
}

impl From<&ProtocolError> for Response {
    fn from(err: &ProtocolError) -> Self {
        Response::error(err.command(), err.to_string())
    }
}
