#![allow(dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use distprime::{
    ComputePool, Metrics, NaiveThreadPool, PrimeServer, ProcessPool, ServerConfig, ThreadPool,
    WorkerCommand, WORKER_FLAG,
};

/// the server executable in worker mode
pub fn worker_command() -> WorkerCommand {
    WorkerCommand::new(env!("CARGO_BIN_EXE_distprime-server")).arg(WORKER_FLAG)
}

pub fn config(workers: u32) -> ServerConfig {
    ServerConfig {
        workers,
        ..ServerConfig::default()
    }
}

/// starts a server with a process pool on an ephemeral port
pub fn start_server(config: ServerConfig) -> (SocketAddr, Arc<Metrics>) {
    let pool = ProcessPool::new(config.workers, worker_command()).unwrap();
    start_with(config, pool, NaiveThreadPool::new(0).unwrap())
}

pub fn start_with<C: ComputePool, P: ThreadPool + Send + 'static>(
    config: ServerConfig,
    compute: C,
    sessions: P,
) -> (SocketAddr, Arc<Metrics>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = PrimeServer::new(config, compute, sessions);
    let metrics = server.metrics();
    thread::spawn(move || server.serve(listener));
    (addr, metrics)
}

/// a port nothing is listening on, at least for now
pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// connects to `addr`, retrying while the server starts up
pub fn connect_retry(addr: &str) -> TcpStream {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match TcpStream::connect(addr) {
            Ok(stream) => return stream,
            Err(e) if Instant::now() > deadline => panic!("could not connect to {}: {}", addr, e),
            Err(_) => thread::sleep(Duration::from_millis(50)),
        }
    }
}

/// polls `cond` until it holds or a few seconds have passed
pub fn eventually<F: FnMut() -> bool>(mut cond: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

/// a connection that speaks raw lines, for checking the exact wire format
pub struct Conn {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Conn {
    pub fn open(addr: SocketAddr) -> Self {
        Conn::from_stream(TcpStream::connect(addr).unwrap())
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        let writer = stream.try_clone().unwrap();
        Conn {
            reader: BufReader::new(stream),
            writer,
        }
    }

    pub fn send(&mut self, line: &str) {
        self.send_bytes(format!("{}\n", line).as_bytes());
    }

    pub fn send_bytes(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).unwrap();
        self.writer.flush().unwrap();
    }

    /// the next response line without its newline, `None` once the server has closed
    pub fn recv(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end().to_owned()),
        }
    }

    pub fn request(&mut self, line: &str) -> String {
        self.send(line);
        self.recv().expect("connection closed before the response")
    }

    pub fn set_read_timeout(&self, timeout: Duration) {
        self.reader.get_ref().set_read_timeout(Some(timeout)).unwrap();
    }
}
