#![deny(missing_docs)]
//! A multithreaded prime computation server, that answers primality and prime counting
//! requests sent over TCP.
//!
//! This crate provides the [`PrimeServer`] implementation itself, as well as a
//! [`distprime-client`] and [`distprime-server`] executable that can be used to interact with it.
//! Requests and responses are exchanged using synchronous networking over a small line based
//! protocol.
//!
//! ## Supported Operations
//! The server supports five "commands":
//!
//! - `prime <n>` tests whether `n` is prime
//! - `range <a> <b>` lists the primes in `[a, b]`
//! - `count <a> <b>` counts the primes in `[a, b]`
//! - `stats` returns a snapshot of the server metrics
//! - `exit` acknowledges, then closes the connection
//!
//! See the [`Request`] and [`Response`] types for more information on the structure of these
//! operations.
//!
//! ## Sessions and workers
//! Every accepted connection gets its own session, run on a [`ThreadPool`]. A session reads
//! one request at a time and answers it before reading the next, so responses always come
//! back in request order.
//!
//! Computing primes is CPU bound, so sessions do not do it themselves. They submit a
//! [`WorkItem`] to a [`ComputePool`] and wait for the [`WorkResult`]. The server uses a
//! [`ProcessPool`]: a fixed number of worker processes (by default one per CPU core) fed from
//! a FIFO queue. A crashing worker only fails the request it was running.
//!
//! ## Metrics
//! All sessions share one [`Metrics`] store. Its counters sit behind a single lock, so a
//! `stats` snapshot is always internally consistent.
//!
//! ## Protocol
//! Each request is one line of text: `<COMMAND> [arg1] [arg2]`, with a case-insensitive
//! command and 64 bit integer arguments. Each response is one line holding a JSON object:
//!
//! ```text
//! > prime 17
//! < {"status":"ok","command":"prime","is_prime":true}
//! > range 20 10
//! < {"status":"error","command":"range","message":"invalid range"}
//! ```
//!
//! Malformed requests get an `error` response and the session stays open.
//!
//! [`distprime-server`]: ./distprime-server.rs
//! [`distprime-client`]: ./distprime-client.rs

pub use client::{PrimeClient, RequestWriter, ResponseReader};
pub use command::{Body, Command, Request, Response, Status};
pub use config::{ServerConfig, DEFAULT_HOST, DEFAULT_PORT, HOST_ENV, MAX_LINE_LEN, PORT_ENV};
pub use error::{PrimeError, ProtocolError, Result};
pub use metrics::{Metrics, MetricsSnapshot, RequestSummary};
pub use server::PrimeServer;
pub use session::{Flow, RequestHandler, EXIT_MESSAGE};
pub use thread_pool::{NaiveThreadPool, SharedQueueThreadPool, ThreadPool};
pub use worker::{
    run_worker, ComputePool, InlinePool, ProcessPool, WorkItem, WorkResult, WorkerCommand,
    WORKER_FLAG,
};

mod client;
mod command;
pub mod config;
mod error;
pub mod kernel;
mod metrics;
mod server;
mod session;
pub mod thread_pool;
pub mod worker;
