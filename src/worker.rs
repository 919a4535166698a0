//! Session worker: the single thread that owns one session's store.
//!
//! Every operation on a session travels through the worker's inbox and is
//! executed in receipt order, which makes that order the session's
//! linearization order. Callers block on a private reply channel.
//!
//! ```text
//! caller ──Message──▶ inbox (FIFO) ──▶ worker thread ──▶ SessionStore
//!    ▲                                       │
//!    └──────────── reply channel ◀───────────┘
//! ```

use crate::config::BufferConfig;
use crate::error::{BufferError, Result};
use crate::store::SessionStore;
use crate::types::{ChannelLayout, Record, SessionHandle, SessionInfo};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Worker lifecycle: Starting → Ready → Stopping → Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Opening the store.
    Starting = 0,
    /// Accepting requests.
    Ready = 1,
    /// Finishing queued work and closing the store.
    Stopping = 2,
    /// Terminal.
    Stopped = 3,
}

impl From<u8> for WorkerState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Starting,
            1 => Self::Ready,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// An operation addressed to a session.
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    Append(Record),
    Count,
    GetData {
        start: Option<usize>,
        end: Option<usize>,
    },
    Info,
}

/// A worker's answer to a [`Request`].
#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    /// Position the record was stored at.
    Appended { position: u64 },
    Count(usize),
    Data(Vec<Record>),
    Info(SessionInfo),
}

/// Inbox message.
enum Message {
    Request {
        request: Request,
        reply: Sender<Result<Response>>,
    },
    Stop {
        reply: Sender<Result<()>>,
    },
}

/// State visible from outside the worker thread.
struct Shared {
    state: AtomicU8,
    /// Why the worker stopped on its own, if it did.
    fault: Mutex<Option<String>>,
}

impl Shared {
    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// Read-only view of a worker's lifecycle.
#[derive(Clone)]
pub struct WorkerMonitor {
    shared: Arc<Shared>,
}

impl WorkerMonitor {
    pub fn state(&self) -> WorkerState {
        WorkerState::from(self.shared.state.load(Ordering::SeqCst))
    }

    /// The fatal error that stopped the worker, if any.
    pub fn fault(&self) -> Option<String> {
        self.shared.fault.lock().clone()
    }
}

/// Cloneable address of a worker's inbox.
#[derive(Clone)]
pub struct SessionAddress {
    handle: SessionHandle,
    sender: Sender<Message>,
}

impl SessionAddress {
    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    /// Send a request and wait for its response.
    ///
    /// With a timeout, expiry returns `Timeout`. The limit covers the
    /// enqueue and the wait for the reply together. A request that already
    /// reached the inbox still executes; only the wait is abandoned.
    pub fn call(&self, request: Request, timeout: Option<Duration>) -> Result<Response> {
        let (reply, response) = bounded(1);
        let message = Message::Request { request, reply };
        let deadline = timeout.map(Deadline::after);
        self.deliver(message, deadline)?;
        self.await_reply(&response, deadline)?
    }

    fn deliver(&self, message: Message, deadline: Option<Deadline>) -> Result<()> {
        match deadline {
            Some(deadline) => self
                .sender
                .send_deadline(message, deadline.at)
                .map_err(|e| match e {
                    SendTimeoutError::Timeout(_) => BufferError::Timeout(deadline.limit),
                    SendTimeoutError::Disconnected(_) => BufferError::SessionClosed(self.handle),
                }),
            None => self
                .sender
                .send(message)
                .map_err(|_| BufferError::SessionClosed(self.handle)),
        }
    }

    fn await_reply<T>(&self, receiver: &Receiver<T>, deadline: Option<Deadline>) -> Result<T> {
        match deadline {
            Some(deadline) => receiver.recv_deadline(deadline.at).map_err(|e| match e {
                RecvTimeoutError::Timeout => BufferError::Timeout(deadline.limit),
                RecvTimeoutError::Disconnected => BufferError::SessionClosed(self.handle),
            }),
            None => receiver
                .recv()
                .map_err(|_| BufferError::SessionClosed(self.handle)),
        }
    }
}

/// One caller's time budget, shared by every wait of a single call.
#[derive(Clone, Copy)]
struct Deadline {
    at: Instant,
    limit: Duration,
}

impl Deadline {
    fn after(limit: Duration) -> Self {
        Self {
            at: Instant::now() + limit,
            limit,
        }
    }
}

/// Owner-side handle to a running session worker.
///
/// Dropping it stops the worker and waits for the store to close.
pub struct SessionWorker {
    address: SessionAddress,
    monitor: WorkerMonitor,
    thread: Option<JoinHandle<()>>,
}

impl SessionWorker {
    /// Spawn a worker and block until its store is open.
    ///
    /// Fails with the store's error (usually `StorageUnavailable`) if the
    /// backing resource cannot be opened.
    pub fn spawn(
        handle: SessionHandle,
        layout: ChannelLayout,
        storage_identifier: &str,
        config: &BufferConfig,
    ) -> Result<Self> {
        let (sender, inbox) = bounded(config.inbox_capacity.max(1));
        let (ready_tx, ready_rx) = bounded(1);
        let shared = Arc::new(Shared {
            state: AtomicU8::new(WorkerState::Starting as u8),
            fault: Mutex::new(None),
        });

        let thread = {
            let shared = Arc::clone(&shared);
            let config = config.clone();
            let identifier = storage_identifier.to_string();
            thread::Builder::new()
                .name(format!("buffer-session-{handle}"))
                .spawn(move || {
                    let store = match SessionStore::create(&config, &identifier, layout) {
                        Ok(store) => store,
                        Err(e) => {
                            shared.set_state(WorkerState::Stopped);
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    shared.set_state(WorkerState::Ready);
                    let _ = ready_tx.send(Ok(()));
                    run_loop(handle, store, inbox, &shared);
                })?
        };

        let startup = ready_rx.recv().unwrap_or_else(|_| {
            Err(BufferError::storage(
                storage_identifier,
                "worker exited during startup",
            ))
        });
        if let Err(e) = startup {
            let _ = thread.join();
            return Err(e);
        }

        info!(session = %handle, storage = storage_identifier, "session worker ready");

        Ok(Self {
            address: SessionAddress { handle, sender },
            monitor: WorkerMonitor { shared },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> SessionHandle {
        self.address.handle
    }

    pub fn address(&self) -> SessionAddress {
        self.address.clone()
    }

    pub fn monitor(&self) -> WorkerMonitor {
        self.monitor.clone()
    }

    pub fn state(&self) -> WorkerState {
        self.monitor.state()
    }

    /// Stop the worker after everything already queued has run.
    ///
    /// Requests enqueued behind the stop fail with `SessionClosed`. A
    /// worker that already stopped on a fault is simply reaped.
    pub fn stop(mut self, timeout: Option<Duration>) -> Result<()> {
        let result = self.shutdown(timeout);
        if !matches!(result, Err(BufferError::Timeout(_))) {
            self.join();
        }
        // On timeout the thread is detached; it still closes its store.
        self.thread = None;
        result
    }

    fn shutdown(&self, timeout: Option<Duration>) -> Result<()> {
        let (reply, done) = bounded(1);
        let deadline = timeout.map(Deadline::after);
        match self.address.deliver(Message::Stop { reply }, deadline) {
            Ok(()) => match self.address.await_reply(&done, deadline) {
                Ok(closed) => closed,
                // Worker ended before answering: it faulted while the stop was queued
                Err(BufferError::SessionClosed(_)) => Ok(()),
                Err(e) => Err(e),
            },
            Err(BufferError::SessionClosed(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(session = %self.address.handle, "session worker panicked");
            }
        }
    }
}

impl Drop for SessionWorker {
    fn drop(&mut self) {
        if self.thread.is_some() {
            if let Err(e) = self.shutdown(None) {
                warn!(session = %self.address.handle, error = %e, "failed to close session store");
            }
            self.join();
        }
    }
}

fn run_loop(
    handle: SessionHandle,
    mut store: SessionStore,
    inbox: Receiver<Message>,
    shared: &Shared,
) {
    let mut stop_reply = None;

    for message in inbox.iter() {
        match message {
            Message::Request { request, reply } => {
                let result = execute(handle, &mut store, request);
                let fault = match &result {
                    Err(e) if e.is_fatal() => Some(e.to_string()),
                    _ => None,
                };
                // The caller may have timed out and left
                let _ = reply.send(result);

                if let Some(cause) = fault {
                    warn!(session = %handle, error = %cause, "store fault, stopping session");
                    *shared.fault.lock() = Some(cause);
                    break;
                }
            }
            Message::Stop { reply } => {
                stop_reply = Some(reply);
                break;
            }
        }
    }

    shared.set_state(WorkerState::Stopping);

    let count = store.count();
    let closed = store.close();
    if let Err(e) = &closed {
        warn!(session = %handle, error = %e, "failed to close session store");
    }
    shared.set_state(WorkerState::Stopped);
    info!(session = %handle, count, "session worker stopped");

    // Whatever is still queued arrived after the stop
    for message in inbox.try_iter() {
        match message {
            Message::Request { reply, .. } => {
                let _ = reply.send(Err(BufferError::SessionClosed(handle)));
            }
            Message::Stop { reply } => {
                let _ = reply.send(Ok(()));
            }
        }
    }
    drop(inbox);

    if let Some(reply) = stop_reply {
        let _ = reply.send(closed);
    }
}

fn execute(handle: SessionHandle, store: &mut SessionStore, request: Request) -> Result<Response> {
    debug!(session = %handle, ?request, "executing request");
    match request {
        Request::Append(record) => store
            .append(&record)
            .map(|position| Response::Appended { position }),
        Request::Count => Ok(Response::Count(store.count())),
        Request::GetData { start, end } => store.read(start, end).map(Response::Data),
        Request::Info => Ok(Response::Info(SessionInfo {
            handle,
            channel_names: store.layout().names().to_vec(),
            storage_path: store.path().to_path_buf(),
            count: store.count(),
        })),
    }
}
