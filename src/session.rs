use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::command::{Body, Command, Request, Response};
use crate::config::{SessionLimits, MAX_LINE_LEN};
use crate::error::ProtocolError;
use crate::metrics::{Metrics, RequestSummary};
use crate::worker::{ComputePool, WorkItem, WorkResult};
use crate::Result;

/// the `message` of the acknowledgement sent for `exit`
pub const EXIT_MESSAGE: &str = "bye";

/// what the session does after writing a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// read the next request
    Continue,
    /// close the connection
    Close,
}

/// Turns request lines into responses: validation, worker pool dispatch and metrics updates.
/// It knows nothing about sockets.
#[derive(Clone)]
pub struct RequestHandler<C: ComputePool> {
    compute: C,
    metrics: Arc<Metrics>,
    max_span: Option<u64>,
}

impl<C: ComputePool> RequestHandler<C> {
    /// a handler dispatching to `compute` and recording into `metrics`.
    /// If `max_span` is set, `range` and `count` requests spanning more integers are rejected.
    pub fn new(compute: C, metrics: Arc<Metrics>, max_span: Option<u64>) -> Self {
        RequestHandler {
            compute,
            metrics,
            max_span,
        }
    }

    /// parses and services one request line.
    /// Malformed lines are answered with an error response and only counted as invalid.
    pub fn handle_line(&self, line: &str) -> (Response, Flow) {
        match Request::parse(line) {
            Ok(req) => self.handle(req),
            Err(err) => (self.reject(&err), Flow::Continue),
        }
    }

    /// the error response for a line that is not a request
    pub fn reject(&self, err: &ProtocolError) -> Response {
        debug!("invalid request: {}", err);
        self.metrics.record_invalid(err);
        Response::from(err)
    }

    /// services a parsed request
    pub fn handle(&self, req: Request) -> (Response, Flow) {
        let item = match req {
            Request::Stats => return (self.stats(), Flow::Continue),
            Request::Exit => {
                self.metrics
                    .record(Command::Exit, &RequestSummary::default());
                let ack = Response::ok(
                    Command::Exit,
                    Body::Message {
                        message: EXIT_MESSAGE.to_owned(),
                    },
                );
                return (ack, Flow::Close);
            }
            Request::Prime { n } => WorkItem::Prime { n },
            Request::Range { start, end } => WorkItem::Range { start, end },
            Request::Count { start, end } => WorkItem::Count { start, end },
        };

        let command = req.command();
        if let Some(max_span) = self.max_span {
            if let Err(err) = req.check_span(max_span) {
                self.metrics
                    .record(command, &RequestSummary::failed(err.to_string()));
                return (Response::from(&err), Flow::Continue);
            }
        }
        (self.dispatch(command, item), Flow::Continue)
    }

    fn stats(&self) -> Response {
        // recorded first so the snapshot includes this request
        self.metrics
            .record(Command::Stats, &RequestSummary::default());
        Response::ok(Command::Stats, Body::Stats(self.metrics.snapshot()))
    }

    fn dispatch(&self, command: Command, item: WorkItem) -> Response {
        let started = Instant::now();
        let result = item.check_answer(self.compute.submit(item));
        let elapsed = started.elapsed();

        let (response, summary) = match result {
            WorkResult::Prime(is_prime) => (
                Response::ok(command, Body::Prime { is_prime }),
                RequestSummary::computed(u64::from(is_prime), elapsed),
            ),
            WorkResult::Range(primes) => {
                let found = primes.len() as u64;
                (
                    Response::ok(command, Body::Range { primes }),
                    RequestSummary::computed(found, elapsed),
                )
            }
            WorkResult::Count(count) => (
                Response::ok(command, Body::Count { count }),
                RequestSummary::computed(count, elapsed),
            ),
            WorkResult::Failed(reason) => {
                warn!("{:?} failed: {}", item, reason);
                (
                    Response::error(command.as_str(), "computation failed"),
                    RequestSummary::failed(format!("computation failed: {}", reason)),
                )
            }
        };
        self.metrics.record(command, &summary);
        response
    }
}

/// Marks a connection as open in the metrics for as long as it lives. The connection is
/// counted as closed when the guard drops, even if the session thread unwinds.
pub(crate) struct ConnectionGuard {
    metrics: Arc<Metrics>,
}

impl ConnectionGuard {
    pub(crate) fn open(metrics: Arc<Metrics>) -> Self {
        metrics.connection_opened();
        ConnectionGuard { metrics }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.metrics.connection_closed();
    }
}

/// Runs the session for one connection: reads request lines from the `tcp` stream until the
/// client disconnects or sends `exit`, and writes one JSON response line for each of them,
/// in order.
///
/// Blank lines are skipped. Lines that are not valid UTF-8 get an `invalid encoding` error.
/// A line longer than [`MAX_LINE_LEN`] gets a `line too long` error and ends the session.
///
/// # Errors
/// returns an error if the socket fails. An idle timeout is not an error.
pub(crate) fn serve<C: ComputePool>(
    handler: RequestHandler<C>,
    limits: SessionLimits,
    tcp: TcpStream,
) -> Result<()> {
    let peer_addr = tcp.peer_addr()?;
    tcp.set_read_timeout(limits.idle_timeout)?;
    let mut reader = BufReader::new(&tcp);
    let mut writer = BufWriter::new(&tcp);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match (&mut reader)
            .take(MAX_LINE_LEN as u64)
            .read_until(b'\n', &mut buf)
        {
            Ok(0) => {
                debug!("{} closed the connection", peer_addr);
                break;
            }
            Ok(_) => {}
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                info!("closing idle connection from {}", peer_addr);
                break;
            }
            Err(e) => return Err(e.into()),
        }

        if buf.len() == MAX_LINE_LEN && !buf.ends_with(b"\n") {
            warn!("{} sent a line over {} bytes", peer_addr, MAX_LINE_LEN);
            let resp = handler.reject(&ProtocolError::LineTooLong { max: MAX_LINE_LEN });
            write_response(&mut writer, &resp)?;
            break;
        }

        let (resp, flow) = match std::str::from_utf8(&buf) {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => {
                debug!("Receive request from {}: {}", peer_addr, line.trim_end());
                handler.handle_line(line)
            }
            Err(_) => (
                handler.reject(&ProtocolError::InvalidEncoding),
                Flow::Continue,
            ),
        };

        write_response(&mut writer, &resp)?;
        debug!("Response sent to {}: {:?}", peer_addr, resp);

        if flow == Flow::Close {
            debug!("{} sent exit", peer_addr);
            break;
        }
    }
    Ok(())
}

fn write_response<W: Write>(writer: &mut W, resp: &Response) -> Result<()> {
    serde_json::to_writer(&mut *writer, resp)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::worker::InlinePool;

    fn handler() -> RequestHandler<InlinePool> {
        RequestHandler::new(InlinePool, Arc::new(Metrics::new()), Some(1_000))
    }

    fn json<C: ComputePool>(line: &str, h: &RequestHandler<C>) -> String {
        serde_json::to_string(&h.handle_line(line).0).unwrap()
    }

    /// a pool whose workers always fail
    #[derive(Clone)]
    struct BrokenPool;

    impl ComputePool for BrokenPool {
        fn submit(&self, _item: WorkItem) -> WorkResult {
            WorkResult::Failed("worker process failed".to_owned())
        }
    }

    /// answers every item with an empty result, without computing anything
    #[derive(Clone)]
    struct EmptyPool;

    impl ComputePool for EmptyPool {
        fn submit(&self, item: WorkItem) -> WorkResult {
            match item {
                WorkItem::Prime { .. } => WorkResult::Prime(false),
                WorkItem::Range { .. } => WorkResult::Range(Vec::new()),
                WorkItem::Count { .. } => WorkResult::Count(0),
            }
        }
    }

    /// answers every item with a count
    #[derive(Clone)]
    struct ConfusedPool;

    impl ComputePool for ConfusedPool {
        fn submit(&self, _item: WorkItem) -> WorkResult {
            WorkResult::Count(3)
        }
    }

    #[test]
    fn scenarios() {
        let h = handler();
        assert_eq!(
            json("prime 17", &h),
            r#"{"status":"ok","command":"prime","is_prime":true}"#
        );
        assert_eq!(
            json("range 10 20", &h),
            r#"{"status":"ok","command":"range","primes":[11,13,17,19]}"#
        );
        assert_eq!(
            json("count 10 20", &h),
            r#"{"status":"ok","command":"count","count":4}"#
        );
        assert_eq!(
            json("range 20 10", &h),
            r#"{"status":"error","command":"range","message":"invalid range"}"#
        );
        assert_eq!(
            json("prime abc", &h),
            r#"{"status":"error","command":"prime","message":"invalid argument"}"#
        );
        assert_eq!(
            json("hello", &h),
            r#"{"status":"error","command":"hello","message":"unknown command"}"#
        );
    }

    #[test]
    fn span_limit_is_a_domain_error() {
        let h = handler();
        let (resp, flow) = h.handle_line("count 1 1001");
        assert_eq!(flow, Flow::Continue);
        assert_eq!(
            resp,
            Response::error("count", "range too large: at most 1000 values")
        );
        let snap = h.metrics.snapshot();
        assert_eq!(snap.failed_requests, 1);
        assert_eq!(snap.requests_by_command["count"], 1);
    }

    #[test]
    fn spans_are_unlimited_by_default() {
        let max_span = ServerConfig::default().max_span;
        let h = RequestHandler::new(EmptyPool, Arc::new(Metrics::new()), max_span);
        assert_eq!(
            json("count 1 10000001", &h),
            r#"{"status":"ok","command":"count","count":0}"#
        );
        assert_eq!(
            json("range -9223372036854775808 9223372036854775807", &h),
            r#"{"status":"ok","command":"range","primes":[]}"#
        );
        assert_eq!(h.metrics.snapshot().failed_requests, 0);
    }

    #[test]
    fn answers_of_the_wrong_kind_become_error_responses() {
        let metrics = Arc::new(Metrics::new());
        let h = RequestHandler::new(ConfusedPool, Arc::clone(&metrics), None);
        assert_eq!(
            json("prime 7", &h),
            r#"{"status":"error","command":"prime","message":"computation failed"}"#
        );
        assert_eq!(
            json("count 1 5", &h),
            r#"{"status":"ok","command":"count","count":3}"#
        );
        assert_eq!(metrics.snapshot().failed_requests, 1);
    }

    #[test]
    fn exit_acknowledges_and_closes() {
        let (resp, flow) = handler().handle_line("exit");
        assert_eq!(flow, Flow::Close);
        assert_eq!(
            serde_json::to_string(&resp).unwrap(),
            r#"{"status":"ok","command":"exit","message":"bye"}"#
        );
    }

    #[test]
    fn stats_counts_requests() {
        let h = handler();
        h.handle_line("prime 7");
        h.handle_line("prime 8");
        h.handle_line("range 1 10");
        h.handle_line("count 1 10");
        h.handle_line("prime x");

        let (resp, _) = h.handle_line("stats");
        let snap = match resp.body {
            Body::Stats(snap) => snap,
            other => panic!("unexpected body {:?}", other),
        };
        assert_eq!(snap.total_requests, 5);
        assert_eq!(snap.requests_by_command["prime"], 2);
        assert_eq!(snap.requests_by_command["stats"], 1);
        assert_eq!(
            snap.requests_by_command.values().sum::<u64>(),
            snap.total_requests
        );
        // 7, then 2 3 5 7 twice
        assert_eq!(snap.primes_found_total, 9);
        assert_eq!(snap.invalid_requests, 1);
        assert_eq!(snap.failed_requests, 0);
    }

    #[test]
    fn worker_failures_become_error_responses() {
        let metrics = Arc::new(Metrics::new());
        let h = RequestHandler::new(BrokenPool, Arc::clone(&metrics), None);
        let (resp, flow) = h.handle_line("count 1 10");
        assert_eq!(flow, Flow::Continue);
        assert_eq!(resp, Response::error("count", "computation failed"));

        let snap = metrics.snapshot();
        assert_eq!(snap.failed_requests, 1);
        assert_eq!(
            snap.last_error.as_deref(),
            Some("computation failed: worker process failed")
        );
    }

    #[test]
    fn guard_closes_the_connection_on_drop() {
        let metrics = Arc::new(Metrics::new());
        let guard = ConnectionGuard::open(Arc::clone(&metrics));
        assert_eq!(metrics.snapshot().active_connections, 1);
        drop(guard);
        let snap = metrics.snapshot();
        assert_eq!(snap.active_connections, 0);
        assert_eq!(snap.completed_connections, 1);
    }
}
