//! Fixed-size worker pool fed through a rendezvous handoff.
//!
//! `HandoffSender::send` returns only after some worker has taken the item,
//! so the producer can never run more than one item ahead of the pool. A
//! worker whose task fails exits for the rest of the run and is not
//! replaced; when the last worker is gone the sender sees `HandoffClosed`
//! instead of blocking forever.
use std::convert::Infallible;
use std::future::{self, Future};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{HandoffClosed, IngestError, Interrupt};

type Envelope<T> = (T, oneshot::Sender<()>);

/// Create a connected handoff pair.
pub fn handoff<T>() -> (HandoffSender<T>, HandoffReceiver<T>) {
    let (tx, rx) = mpsc::channel(1);
    (
        HandoffSender { tx },
        HandoffReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

pub struct HandoffSender<T> {
    tx: mpsc::Sender<Envelope<T>>,
}

impl<T> HandoffSender<T> {
    /// Blocks until a worker accepts `item`. Fails once every receiver is
    /// gone; the item is dropped in that case.
    pub async fn send(&self, item: T) -> Result<(), HandoffClosed> {
        match self.send_until(item, future::pending::<Infallible>()).await {
            Ok(sent) => sent,
            Err(never) => match never {},
        }
    }

    /// Like `send`, but gives up when `stop` resolves first. An item a worker
    /// already accepted counts as delivered even if `stop` is ready too; an
    /// abandoned item is skipped by whichever worker later pulls it.
    pub async fn send_until<S: Future>(
        &self,
        item: T,
        stop: S,
    ) -> Result<Result<(), HandoffClosed>, S::Output> {
        tokio::pin!(stop);
        let (ack_tx, mut ack_rx) = oneshot::channel();
        tokio::select! {
            biased;
            res = self.tx.send((item, ack_tx)) => {
                if res.is_err() {
                    return Ok(Err(HandoffClosed));
                }
            }
            out = &mut stop => return Err(out),
        }
        tokio::select! {
            biased;
            ack = &mut ack_rx => Ok(ack.map_err(|_| HandoffClosed)),
            out = &mut stop => {
                // After close, a worker either already acked or never will.
                ack_rx.close();
                match ack_rx.try_recv() {
                    Ok(()) => Ok(Ok(())),
                    Err(_) => Err(out),
                }
            }
        }
    }
}

pub struct HandoffReceiver<T> {
    rx: Arc<Mutex<mpsc::Receiver<Envelope<T>>>>,
}

impl<T> Clone for HandoffReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
        }
    }
}

impl<T> HandoffReceiver<T> {
    /// Next item, or `None` once the sender is dropped and nothing is pending.
    pub async fn recv(&self) -> Option<T> {
        loop {
            let (item, ack) = {
                let mut rx = self.rx.lock().await;
                rx.recv().await?
            };
            // A sender that gave up (interrupted) no longer counts the item as delivered.
            if ack.send(()).is_ok() {
                return Some(item);
            }
        }
    }
}

/// Per-item processing run by every pool worker.
#[async_trait]
pub trait TaskWorker<T>: Send + Sync + 'static {
    async fn process(&self, worker_id: usize, task: T) -> Result<(), IngestError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerExit {
    /// Handoff closed and nothing left to take.
    Drained,
    /// A task failed; the worker stopped accepting work.
    Failed { error: String },
    /// The run was cancelled or hit its deadline mid-task.
    Interrupted { reason: Interrupt },
    Panicked { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerOutcome {
    pub worker_id: usize,
    /// Tasks completed successfully.
    pub processed: u64,
    pub exit: WorkerExit,
}

pub struct WorkerPool {
    handles: Vec<(usize, JoinHandle<WorkerOutcome>)>,
}

impl WorkerPool {
    /// Spawn `size` workers sharing `rx`. The pool owns the receiving side:
    /// once every worker has returned, the handoff is closed.
    pub fn spawn<T, W>(size: usize, rx: HandoffReceiver<T>, worker: Arc<W>) -> Self
    where
        T: Send + 'static,
        W: TaskWorker<T>,
    {
        let handles = (0..size.max(1))
            .map(|id| {
                let rx = rx.clone();
                let worker = Arc::clone(&worker);
                (id, tokio::spawn(run_worker(id, rx, worker)))
            })
            .collect();
        Self { handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Join barrier: wait for every worker to exit.
    pub async fn join(self) -> Vec<WorkerOutcome> {
        let (ids, handles): (Vec<usize>, Vec<_>) = self.handles.into_iter().unzip();
        let results = join_all(handles).await;
        ids.into_iter()
            .zip(results)
            .map(|(worker_id, res)| match res {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    error!(worker = worker_id, error = %join_err, "worker task aborted");
                    WorkerOutcome {
                        worker_id,
                        processed: 0,
                        exit: WorkerExit::Panicked {
                            error: join_err.to_string(),
                        },
                    }
                }
            })
            .collect()
    }
}

async fn run_worker<T, W>(worker_id: usize, rx: HandoffReceiver<T>, worker: Arc<W>) -> WorkerOutcome
where
    T: Send + 'static,
    W: TaskWorker<T>,
{
    let mut processed = 0u64;
    while let Some(task) = rx.recv().await {
        if let Err(err) = worker.process(worker_id, task).await {
            let exit = match err.interrupt() {
                Some(reason) => {
                    warn!(worker = worker_id, %reason, error = %err, "worker interrupted");
                    WorkerExit::Interrupted { reason }
                }
                None => {
                    error!(
                        worker = worker_id,
                        processed,
                        error = %err,
                        "failed to run worker; it accepts no further work"
                    );
                    WorkerExit::Failed {
                        error: err.to_string(),
                    }
                }
            };
            return WorkerOutcome {
                worker_id,
                processed,
                exit,
            };
        }
        processed += 1;
    }
    info!(worker = worker_id, processed, "worker drained");
    WorkerOutcome {
        worker_id,
        processed,
        exit: WorkerExit::Drained,
    }
}
