use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};

use crate::command::{Body, Request, Response};
use crate::metrics::MetricsSnapshot;
use crate::{PrimeError, Result};

/// `PrimeClient` contains the functionality for communication with a [`PrimeServer`].
///
/// Requests are answered strictly in the order they were sent, so [`call`](Self::call)
/// simply writes a request and reads the next response.
///
/// [`PrimeServer`]: ./struct.PrimeServer.html
pub struct PrimeClient {
    reader: ResponseReader,
    writer: RequestWriter,
}

/// The sending half of a connection, writes one request line per call.
pub struct RequestWriter {
    writer: BufWriter<TcpStream>,
}

/// The receiving half of a connection, reads one JSON response per line.
pub struct ResponseReader {
    reader: BufReader<TcpStream>,
}

impl PrimeClient {
    /// creates a client and establishes a socket connection to the server at the given `addr`
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let tcp_reader = TcpStream::connect(addr)?;
        let tcp_writer = tcp_reader.try_clone()?;

        Ok(PrimeClient {
            reader: ResponseReader {
                reader: BufReader::new(tcp_reader),
            },
            writer: RequestWriter {
                writer: BufWriter::new(tcp_writer),
            },
        })
    }

    /// sends `req` and waits for its response. Error responses are returned as `Ok`, use
    /// [`Response::into_result`] or one of the typed methods to turn them into errors.
    ///
    /// # Errors
    /// returns an error if the connection fails or is closed before the response arrives
    pub fn call(&mut self, req: &Request) -> Result<Response> {
        self.writer.send(req)?;
        self.reader.recv()?.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed the connection",
            )
            .into()
        })
    }

    /// asks the server whether `n` is prime
    pub fn prime(&mut self, n: i64) -> Result<bool> {
        match self.call(&Request::Prime { n })?.into_result()? {
            Body::Prime { is_prime } => Ok(is_prime),
            other => Err(unexpected(other)),
        }
    }

    /// all primes in `[start, end]`
    /// # Errors
    /// `Err<PrimeError::Server>` if `start > end` or the interval is too large
    pub fn range(&mut self, start: i64, end: i64) -> Result<Vec<i64>> {
        match self.call(&Request::Range { start, end })?.into_result()? {
            Body::Range { primes } => Ok(primes),
            other => Err(unexpected(other)),
        }
    }

    /// the number of primes in `[start, end]`
    /// # Errors
    /// `Err<PrimeError::Server>` if `start > end` or the interval is too large
    pub fn count(&mut self, start: i64, end: i64) -> Result<u64> {
        match self.call(&Request::Count { start, end })?.into_result()? {
            Body::Count { count } => Ok(count),
            other => Err(unexpected(other)),
        }
    }

    /// the server metrics
    pub fn stats(&mut self) -> Result<MetricsSnapshot> {
        match self.call(&Request::Stats)?.into_result()? {
            Body::Stats(snapshot) => Ok(snapshot),
            other => Err(unexpected(other)),
        }
    }

    /// ends the session. The server acknowledges and closes the connection.
    pub fn exit(mut self) -> Result<()> {
        self.call(&Request::Exit)?.into_result().map(|_| ())
    }

    /// splits the client so requests and responses can be handled on different threads
    pub fn split(self) -> (RequestWriter, ResponseReader) {
        (self.writer, self.reader)
    }
}

impl RequestWriter {
    /// writes `req` as one line and flushes it
    pub fn send(&mut self, req: &Request) -> Result<()> {
        writeln!(self.writer, "{}", req)?;
        self.writer.flush()?;
        Ok(())
    }
}

impl ResponseReader {
    /// waits for the next response.
    /// Returns `Ok(None)` once the server has closed the connection
    pub fn recv(&mut self) -> Result<Option<Response>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(line.trim_end())?))
    }
}

impl Iterator for ResponseReader {
    type Item = Result<Response>;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv().transpose()
    }
}

fn unexpected(body: Body) -> PrimeError {
    PrimeError::Server(format!("unexpected response: {:?}", body))
}
