//! The worker pool that runs the CPU bound prime computations.
//!
//! Sessions hand a [`WorkItem`] to a [`ComputePool`] and block until the matching
//! [`WorkResult`] comes back. Two pools are provided:
//!
//! - [`ProcessPool`], the one used by the server: a fixed number of child processes, each
//! running [`run_worker`] and exchanging JSON lines over its stdin and stdout
//! - [`InlinePool`], which computes on the calling thread
use std::any::Any;
use std::io::{BufRead, Write};
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{kernel, Result};

/// One unit of CPU bound work. Arguments have already been validated by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum WorkItem {
    /// test a single number
    Prime {
        /// the number to test
        n: i64,
    },
    /// list the primes of `[start, end]`
    Range {
        /// inclusive lower bound
        start: i64,
        /// inclusive upper bound
        end: i64,
    },
    /// count the primes of `[start, end]`
    Count {
        /// inclusive lower bound
        start: i64,
        /// inclusive upper bound
        end: i64,
    },
}

/// The value computed for a [`WorkItem`], or an error tag if the computation failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkResult {
    /// answer to [`WorkItem::Prime`]
    Prime(bool),
    /// answer to [`WorkItem::Range`]
    Range(Vec<i64>),
    /// answer to [`WorkItem::Count`]
    Count(u64),
    /// the worker could not produce a result
    Failed(String),
}

impl WorkItem {
    /// runs the computation on the current thread. A panic inside the kernel is caught and
    /// returned as [`WorkResult::Failed`]
    pub fn evaluate(&self) -> WorkResult {
        let item = *self;
        panic::catch_unwind(AssertUnwindSafe(move || match item {
            WorkItem::Prime { n } => WorkResult::Prime(kernel::is_prime(n)),
            WorkItem::Range { start, end } => {
                WorkResult::Range(kernel::primes_in_range(start, end))
            }
            WorkItem::Count { start, end } => WorkResult::Count(kernel::count_primes(start, end)),
        }))
        .unwrap_or_else(|payload| WorkResult::Failed(panic_message(payload.as_ref())))
    }

    /// passes `result` through if it answers this item, and turns an answer of the wrong
    /// kind into [`WorkResult::Failed`]
    pub fn check_answer(&self, result: WorkResult) -> WorkResult {
        match (self, result) {
            (WorkItem::Prime { .. }, result @ WorkResult::Prime(_))
            | (WorkItem::Range { .. }, result @ WorkResult::Range(_))
            | (WorkItem::Count { .. }, result @ WorkResult::Count(_))
            | (_, result @ WorkResult::Failed(_)) => result,
            (item, other) => {
                WorkResult::Failed(format!("worker answered {:?} with {:?}", item, other))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "computation panicked".to_owned()
    }
}

/// A pool that sessions submit work to. Clones share the same underlying workers.
pub trait ComputePool: Clone + Send + 'static {
    /// runs `item` on one of the pool's workers, blocking the caller until the result is
    /// ready. If every worker is busy the item waits its turn. Worker failures come back as
    /// [`WorkResult::Failed`], they are never propagated as panics.
    fn submit(&self, item: WorkItem) -> WorkResult;
}

/// Computes every item directly on the submitting thread, without any isolation.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlinePool;

impl ComputePool for InlinePool {
    fn submit(&self, item: WorkItem) -> WorkResult {
        item.evaluate()
    }
}

/// The main loop of a worker process.
///
/// Reads one JSON encoded [`WorkItem`] per line from `input` and writes one JSON encoded
/// [`WorkResult`] line to `output` for each of them. Returns when `input` reaches EOF.
///
/// # Errors
/// returns an error if reading from `input` or writing to `output` fails
pub fn run_worker<R: BufRead, W: Write>(input: R, mut output: W) -> Result<()> {
    debug!("worker {} started", std::process::id());
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let result = match serde_json::from_str::<WorkItem>(&line) {
            Ok(item) => item.evaluate(),
            Err(e) => {
                warn!("malformed work item {:?}: {}", line, e);
                WorkResult::Failed(format!("malformed work item: {}", e))
            }
        };
        serde_json::to_writer(&mut output, &result)?;
        output.write_all(b"\n")?;
        output.flush()?;
    }
    debug!("worker {} input closed", std::process::id());
    Ok(())
}

mod process;

pub use self::process::{ProcessPool, WorkerCommand, WORKER_FLAG};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluate_calls_the_kernel() {
        assert_eq!(WorkItem::Prime { n: 17 }.evaluate(), WorkResult::Prime(true));
        assert_eq!(
            WorkItem::Range { start: 10, end: 20 }.evaluate(),
            WorkResult::Range(vec![11, 13, 17, 19])
        );
        assert_eq!(
            WorkItem::Count { start: 10, end: 20 }.evaluate(),
            WorkResult::Count(4)
        );
    }

    #[test]
    fn wire_format() {
        let item = WorkItem::Range { start: 1, end: 5 };
        assert_eq!(
            serde_json::to_string(&item).unwrap(),
            r#"{"op":"range","start":1,"end":5}"#
        );
        assert_eq!(
            serde_json::to_string(&WorkResult::Count(3)).unwrap(),
            r#"{"count":3}"#
        );
    }

    #[test]
    fn worker_loop_answers_every_line_in_order() {
        let input = concat!(
            r#"{"op":"prime","n":7}"#,
            "\n",
            "\n",
            "not json\n",
            r#"{"op":"count","start":1,"end":10}"#,
            "\n",
        );
        let mut output = Vec::new();
        run_worker(input.as_bytes(), &mut output).unwrap();

        let results: Vec<WorkResult> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0], WorkResult::Prime(true));
        assert!(matches!(&results[1], WorkResult::Failed(msg) if msg.starts_with("malformed")));
        assert_eq!(results[2], WorkResult::Count(4));
    }

    #[test]
    fn answers_of_the_wrong_kind_are_failures() {
        let prime = WorkItem::Prime { n: 3 };
        assert_eq!(
            prime.check_answer(WorkResult::Prime(true)),
            WorkResult::Prime(true)
        );
        assert!(matches!(
            prime.check_answer(WorkResult::Count(3)),
            WorkResult::Failed(msg) if msg.contains("Count(3)")
        ));
        let range = WorkItem::Range { start: 1, end: 3 };
        assert!(matches!(
            range.check_answer(WorkResult::Prime(false)),
            WorkResult::Failed(_)
        ));
        assert_eq!(
            range.check_answer(WorkResult::Failed("boom".to_owned())),
            WorkResult::Failed("boom".to_owned())
        );
    }

    #[test]
    fn panics_are_reported_as_failures() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(payload.as_ref()), "computation panicked");
    }
}
