//! Staged command pipeline
//!
//! Accepting a command is decoupled from executing it: callers enqueue and
//! a pool of worker tasks drains the queue in arrival order, running each
//! command on the blocking pool. The pipeline can be paused (no task
//! starts, in-flight tasks are waited for) and resumed; shutdown is final.
//!
//! ```text
//! execute() ──► queue ──► worker ──► executor (store | router)
//!                           │
//!                           └──► completion (oneshot) ──► caller
//! ```

use crate::command::{Command, Response, Target};
use crate::error::{EnsembleError, Result};
use crate::metrics::{record_queue_depth, CommandTimer};
use crate::router::Router;
use crate::store::Store;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where the outcome of a command is delivered
pub type Completion = oneshot::Sender<Result<Response>>;

const SHUT_DOWN: &str = "pipeline shut down";

/// Lifecycle of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    Paused,
    /// Terminal
    Shutdown,
}

/// Executes a dequeued command
pub trait CommandExecutor: Send + Sync + 'static {
    fn execute(&self, command: &Command) -> Result<Response>;
}

/// Runs each command against the target it names
pub struct Dispatcher {
    store: Arc<dyn Store>,
    router: Arc<Router>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, router: Arc<Router>) -> Self {
        Self { store, router }
    }
}

impl CommandExecutor for Dispatcher {
    fn execute(&self, command: &Command) -> Result<Response> {
        match command.target() {
            Target::Store => command.execute_on_store(self.store.as_ref()),
            Target::Router => command.execute_on_router(&self.router),
        }
    }
}

struct Task {
    command: Command,
    completion: Completion,
}

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    /// One permit per queued task
    queued: Semaphore,
    /// Workers hold a read guard while executing; pause takes the write side
    gate: RwLock<()>,
    state: watch::Sender<PipelineState>,
    in_flight: AtomicUsize,
    executor: Arc<dyn CommandExecutor>,
}

/// The command pipeline of one node
pub struct Processor {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Processor {
    /// Start `worker_threads` workers. Must be called within a tokio runtime.
    pub fn start(worker_threads: usize, executor: Arc<dyn CommandExecutor>) -> Self {
        let (state, _) = watch::channel(PipelineState::Running);
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            queued: Semaphore::new(0),
            gate: RwLock::new(()),
            state,
            in_flight: AtomicUsize::new(0),
            executor,
        });

        let worker_threads = worker_threads.max(1);
        let workers = (0..worker_threads)
            .map(|id| tokio::spawn(run_worker(id, Arc::clone(&shared))))
            .collect();

        info!(workers = worker_threads, "Command pipeline started");

        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Enqueue a command; the outcome is delivered through `completion`.
    ///
    /// Commands are accepted while paused. After shutdown the completion
    /// receives a processing error right away.
    pub fn execute(&self, command: Command, completion: Completion) {
        let depth = {
            let mut queue = self.shared.queue.lock();
            if self.state() == PipelineState::Shutdown {
                drop(queue);
                let _ = completion.send(Err(EnsembleError::Processing(SHUT_DOWN.into())));
                return;
            }
            queue.push_back(Task {
                command,
                completion,
            });
            queue.len()
        };
        self.shared.queued.add_permits(1);
        record_queue_depth(depth);
    }

    /// Enqueue a command and wait for its outcome
    pub async fn process(&self, command: Command) -> Result<Response> {
        let (tx, rx) = oneshot::channel();
        self.execute(command, tx);
        rx.await
            .unwrap_or_else(|_| Err(EnsembleError::Processing(SHUT_DOWN.into())))
    }

    /// Stop starting new tasks and wait for the running ones to finish
    pub async fn pause(&self) {
        let paused = self.shared.state.send_if_modified(|state| {
            if *state == PipelineState::Running {
                *state = PipelineState::Paused;
                true
            } else {
                false
            }
        });
        // Every worker past the state check holds a read guard
        let _drained = self.shared.gate.write().await;
        if paused {
            info!(queued = self.queued(), "Command pipeline paused");
        }
    }

    /// Let workers drain the queue again
    pub fn resume(&self) {
        let resumed = self.shared.state.send_if_modified(|state| {
            if *state == PipelineState::Paused {
                *state = PipelineState::Running;
                true
            } else {
                false
            }
        });
        if resumed {
            info!(queued = self.queued(), "Command pipeline resumed");
        }
    }

    /// Stop the pipeline for good, abandoning queued commands
    pub async fn shutdown(&self) {
        self.shared.state.send_replace(PipelineState::Shutdown);
        self.shared.queued.close();

        let abandoned: Vec<Task> = self.shared.queue.lock().drain(..).collect();
        let count = abandoned.len();
        for task in abandoned {
            let _ = task
                .completion
                .send(Err(EnsembleError::Processing(SHUT_DOWN.into())));
        }
        record_queue_depth(0);

        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            let _ = worker.await;
        }
        info!(abandoned = count, "Command pipeline shut down");
    }

    pub fn state(&self) -> PipelineState {
        *self.shared.state.borrow()
    }

    /// Commands accepted but not started
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Commands currently executing
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        self.shared.state.send_replace(PipelineState::Shutdown);
        self.shared.queued.close();
        for worker in self.workers.lock().drain(..) {
            worker.abort();
        }
    }
}

async fn run_worker(id: usize, shared: Arc<Shared>) {
    let mut state = shared.state.subscribe();

    loop {
        // Claim a queued task
        match shared.queued.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => break,
        }

        // Wait until the pipeline runs, then enter the gate
        let gate = loop {
            let current = *state.borrow_and_update();
            match current {
                PipelineState::Shutdown => {
                    debug!(worker = id, "Worker stopped");
                    return;
                }
                PipelineState::Paused => {
                    if state.changed().await.is_err() {
                        return;
                    }
                }
                PipelineState::Running => {
                    let guard = shared.gate.read().await;
                    if *shared.state.borrow() == PipelineState::Running {
                        break guard;
                    }
                }
            }
        };

        let (task, depth) = {
            let mut queue = shared.queue.lock();
            (queue.pop_front(), queue.len())
        };
        let Some(task) = task else {
            continue;
        };
        record_queue_depth(depth);

        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        let outcome = run_task(&shared.executor, task.command).await;
        shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        drop(gate);

        // The caller may have given up waiting
        let _ = task.completion.send(outcome);
    }

    debug!(worker = id, "Worker stopped");
}

async fn run_task(executor: &Arc<dyn CommandExecutor>, command: Command) -> Result<Response> {
    let name = command.name();
    let timer = CommandTimer::new(name);
    let executor = Arc::clone(executor);

    let outcome = match tokio::task::spawn_blocking(move || executor.execute(&command)).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(command = name, error = %e, "Command panicked");
            Err(EnsembleError::Processing(format!("{} command panicked", name)))
        }
    };

    match &outcome {
        Ok(_) => timer.success(),
        Err(e) => {
            debug!(command = name, error = %e, "Command failed");
            timer.error();
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::Value;

    struct StoreOnly(MemoryStore);

    impl CommandExecutor for StoreOnly {
        fn execute(&self, command: &Command) -> Result<Response> {
            if let Command::GetKeys { bucket } = command {
                if bucket == "panic" {
                    panic!("boom");
                }
            }
            command.execute_on_store(&self.0)
        }
    }

    fn processor(workers: usize) -> Processor {
        Processor::start(workers, Arc::new(StoreOnly(MemoryStore::new())))
    }

    #[tokio::test]
    async fn test_process_returns_response() {
        let processor = processor(2);
        let put = Command::PutValue {
            bucket: "b".into(),
            key: "k".into(),
            value: Value::from("v"),
        };
        assert_eq!(processor.process(put).await.unwrap(), Response::Done);

        let get = Command::GetValue {
            bucket: "b".into(),
            key: "k".into(),
        };
        assert_eq!(
            processor.process(get).await.unwrap(),
            Response::Value(Some(Value::from("v")))
        );
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_workers() {
        let processor = processor(1);

        let err = processor
            .process(Command::GetKeys {
                bucket: "panic".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EnsembleError::Processing(_)));

        let err = processor
            .process(Command::GetKeys {
                bucket: "missing".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EnsembleError::Processing(_)));

        assert_eq!(
            processor.process(Command::GetBuckets).await.unwrap(),
            Response::Buckets(vec![])
        );
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let processor = processor(1);
        assert_eq!(processor.state(), PipelineState::Running);

        processor.pause().await;
        assert_eq!(processor.state(), PipelineState::Paused);
        processor.pause().await;
        assert_eq!(processor.state(), PipelineState::Paused);

        processor.resume();
        assert_eq!(processor.state(), PipelineState::Running);

        processor.shutdown().await;
        assert_eq!(processor.state(), PipelineState::Shutdown);

        processor.resume();
        assert_eq!(processor.state(), PipelineState::Shutdown);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_and_abandons() {
        let processor = processor(1);
        processor.pause().await;

        let (tx, rx) = oneshot::channel();
        processor.execute(Command::GetBuckets, tx);
        assert_eq!(processor.queued(), 1);

        processor.shutdown().await;
        assert!(matches!(rx.await.unwrap(), Err(EnsembleError::Processing(_))));

        let err = processor.process(Command::GetBuckets).await.unwrap_err();
        assert_eq!(err, EnsembleError::Processing("pipeline shut down".into()));
    }
}
