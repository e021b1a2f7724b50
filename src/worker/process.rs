use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel;
use crossbeam::channel::{Receiver, Sender};
use tracing::{debug, error, info, instrument, warn};

use super::{ComputePool, WorkItem, WorkResult};
use crate::{PrimeError, Result};

/// the command line flag that turns the server executable into a worker process
pub const WORKER_FLAG: &str = "--worker";

/// The program (and its arguments) that is started for every worker process.
/// The process must speak the protocol implemented by [`run_worker`](super::run_worker).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl WorkerCommand {
    /// a worker started by running `program` without arguments
    pub fn new(program: impl Into<PathBuf>) -> Self {
        WorkerCommand {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// appends an argument to the worker's command line
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// the currently running executable, started with [`WORKER_FLAG`]
    pub fn current_exe() -> Result<Self> {
        Ok(WorkerCommand::new(std::env::current_exe()?).arg(WORKER_FLAG))
    }

    fn spawn(&self) -> Result<WorkerProcess> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        match (stdin, stdout) {
            (Some(stdin), Some(stdout)) => {
                debug!("spawned worker process {}", child.id());
                Ok(WorkerProcess {
                    child,
                    stdin: BufWriter::new(stdin),
                    stdout: BufReader::new(stdout),
                })
            }
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                Err(io::Error::new(io::ErrorKind::Other, "worker pipes were not captured").into())
            }
        }
    }
}

/// a running worker process and the pipes connected to it
struct WorkerProcess {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

impl WorkerProcess {
    /// sends one item and waits for its result
    fn call(&mut self, item: &WorkItem) -> Result<WorkResult> {
        serde_json::to_writer(&mut self.stdin, item)?;
        self.stdin.write_all(b"\n")?;
        self.stdin.flush()?;

        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "worker process closed its output",
            )
            .into());
        }
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// one worker process, and the knowledge of how to replace it
struct WorkerSlot {
    id: u32,
    command: WorkerCommand,
    process: Option<WorkerProcess>,
}

impl WorkerSlot {
    fn run(&mut self, item: &WorkItem) -> WorkResult {
        let mut process = match self.process.take() {
            Some(process) => process,
            None => match self.command.spawn() {
                Ok(process) => {
                    info!("restarted worker {}", self.id);
                    process
                }
                Err(e) => {
                    error!("could not restart worker {}: {}", self.id, e);
                    return WorkResult::Failed(format!("worker unavailable: {}", e));
                }
            },
        };

        match process.call(item) {
            Ok(result) => {
                self.process = Some(process);
                result
            }
            Err(e) => {
                // the process is killed on drop and replaced before the next job
                warn!("worker {} failed on {:?}: {}", self.id, item, e);
                WorkResult::Failed(format!("worker process failed: {}", e))
            }
        }
    }
}

/// a unit of work waiting in the queue, with the channel its result goes back on
struct Job {
    item: WorkItem,
    reply: Sender<WorkResult>,
}

/// A fixed size pool of worker processes.
///
/// Each worker process is driven by its own thread. The driver threads share a single FIFO
/// job queue (a crossbeam MPMC channel), so a submission waits in line while every worker
/// is busy. Each job carries a private reply channel, the result is only ever delivered to
/// the session that submitted it.
///
/// A worker process that exits, crashes or answers with garbage fails the job it was
/// running with [`WorkResult::Failed`]. It is replaced when the next job arrives. A
/// well-formed answer of the wrong kind also fails the job.
///
/// Clones share the same workers. When the last clone is dropped the queue is closed, the
/// jobs already queued are finished and the worker processes are stopped.
///
/// # Example
/// ```rust,no_run
/// use distprime::{ComputePool, ProcessPool, WorkerCommand, WorkItem, WorkResult};
/// # fn main() -> distprime::Result<()> {
/// let pool = ProcessPool::new(4, WorkerCommand::current_exe()?)?;
/// assert_eq!(pool.submit(WorkItem::Prime { n: 17 }), WorkResult::Prime(true));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ProcessPool {
    inner: Arc<Inner>,
}

struct Inner {
    tx: Option<Sender<Job>>,
    drivers: Vec<JoinHandle<()>>,
}

impl ProcessPool {
    /// starts `workers` worker processes using `command`.
    ///
    /// # Errors
    /// returns an error if `workers` is zero, or if a worker process or its driver thread
    /// could not be started
    pub fn new(workers: u32, command: WorkerCommand) -> Result<Self> {
        if workers == 0 {
            return Err(PrimeError::Pool(
                "a worker pool needs at least one worker".to_owned(),
            ));
        }

        let (tx, rx) = channel::unbounded::<Job>();
        let mut drivers = Vec::with_capacity(workers as usize);
        for id in 0..workers {
            let process = command.spawn().map_err(|e| {
                PrimeError::Pool(format!("could not start worker {}: {}", id, e))
            })?;
            let slot = WorkerSlot {
                id,
                command: command.clone(),
                process: Some(process),
            };
            let jobs = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("worker-{}", id))
                .spawn(move || drive(slot, jobs))?;
            drivers.push(handle);
        }
        info!("started {} worker processes", workers);

        Ok(ProcessPool {
            inner: Arc::new(Inner {
                tx: Some(tx),
                drivers,
            }),
        })
    }
}

impl ComputePool for ProcessPool {
    fn submit(&self, item: WorkItem) -> WorkResult {
        let (reply, result) = channel::bounded(1);
        let queued = match &self.inner.tx {
            Some(tx) => tx.send(Job { item, reply }).is_ok(),
            None => false,
        };
        if !queued {
            return WorkResult::Failed("worker pool is shut down".to_owned());
        }
        match result.recv() {
            Ok(answer) => item.check_answer(answer),
            Err(_) => WorkResult::Failed("worker dropped the job".to_owned()),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // closing the queue ends every driver loop
        self.tx.take();
        for handle in self.drivers.drain(..) {
            if handle.join().is_err() {
                error!("a worker driver thread panicked");
            }
        }
    }
}

/// takes jobs off the shared queue and runs them on this driver's worker process
#[instrument(skip(slot, jobs), fields(worker = slot.id))]
fn drive(mut slot: WorkerSlot, jobs: Receiver<Job>) {
    for job in jobs.iter() {
        let result = slot.run(&job.item);
        // the submitting session may have disconnected, its result is discarded
        let _ = job.reply.send(result);
    }
    debug!("job queue closed, stopping worker {}", slot.id);
}
