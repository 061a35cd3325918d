//! Work Dispatcher
//! ===============
//!
//! Runs a list of independent tasks on up to C worker threads. Worker
//! failures (errors or panics) are captured per task and composed into a
//! single error after join; queued tasks are abandoned once a failure or a
//! cancellation is observed, while in-flight tasks drain normally.

use anyhow::Result;
use crossbeam_channel::unbounded;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::CoreError;

/// Cooperative synchronizer handed to tasks that need to guard shared
/// state. Cloning shares the underlying lock.
pub type Synchronizer = Arc<Mutex<()>>;

pub fn new_synchronizer() -> Synchronizer {
    Arc::new(Mutex::new(()))
}

/// Advisory cancellation flag, checked by tasks at natural boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Task dispatcher with a fixed core budget.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    nb_cores: usize,
}

impl Dispatcher {
    pub fn new(nb_cores: usize) -> Self {
        Self {
            nb_cores: nb_cores.max(1),
        }
    }

    pub fn nb_cores(&self) -> usize {
        self.nb_cores
    }

    /// Run all tasks, returning their results in task order.
    ///
    /// The worker count is `min(C, tasks.len())`. If any task fails, the
    /// remaining queued tasks are skipped and a composite error is raised
    /// after all workers have joined. Cancellation skips queued tasks and
    /// raises `Cancelled`.
    pub fn run<T, F>(&self, tasks: Vec<F>, cancel: &CancellationToken) -> Result<Vec<T>>
    where
        T: Send,
        F: FnOnce() -> Result<T> + Send,
    {
        let nb_tasks = tasks.len();
        if nb_tasks == 0 {
            return Ok(Vec::new());
        }

        let (task_tx, task_rx) = unbounded();
        for entry in tasks.into_iter().enumerate() {
            task_tx.send(entry).expect("queue send on fresh channel");
        }
        drop(task_tx);

        let (result_tx, result_rx) = unbounded();
        let abort = AtomicBool::new(false);

        let workers = self.nb_cores.min(nb_tasks);
        std::thread::scope(|scope| {
            for _ in 0..workers {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                let abort = &abort;
                scope.spawn(move || {
                    while let Ok((index, task)) = task_rx.recv() {
                        if abort.load(Ordering::SeqCst) || cancel.is_cancelled() {
                            break;
                        }
                        let outcome = match catch_unwind(AssertUnwindSafe(task)) {
                            Ok(Ok(value)) => Ok(value),
                            Ok(Err(err)) => Err(format!("task {index}: {err:#}")),
                            Err(payload) => Err(format!(
                                "task {index}: panicked: {}",
                                panic_message(&payload)
                            )),
                        };
                        if outcome.is_err() {
                            abort.store(true, Ordering::SeqCst);
                        }
                        if result_tx.send((index, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        let mut slots: Vec<Option<T>> = (0..nb_tasks).map(|_| None).collect();
        let mut failures = Vec::new();
        let mut completed = 0usize;
        for (index, outcome) in result_rx.iter() {
            completed += 1;
            match outcome {
                Ok(value) => slots[index] = Some(value),
                Err(message) => failures.push(message),
            }
        }

        if !failures.is_empty() {
            failures.sort();
            return Err(CoreError::Composite(failures).into());
        }
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled("task dispatch".into()).into());
        }
        if completed != nb_tasks {
            return Err(CoreError::Composite(vec![format!(
                "{} of {nb_tasks} tasks did not run",
                nb_tasks - completed
            )])
            .into());
        }

        Ok(slots.into_iter().map(|slot| slot.expect("filled slot")).collect())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
