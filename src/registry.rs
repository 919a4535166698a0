//! Process-wide directory of live sessions.

use crate::config::BufferConfig;
use crate::error::{BufferError, Result};
use crate::types::{ChannelLayout, SessionHandle};
use crate::worker::{Request, Response, SessionWorker, WorkerState};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// A live session's registry entry.
struct Entry {
    worker: SessionWorker,
    storage_identifier: String,
}

/// Maps session handles to their workers.
///
/// The registry only holds addresses: no session data is reachable
/// through it, and no session operation runs under its locks. Lookups
/// clone the worker's address under a read lock and release it before
/// waiting on the worker.
pub struct SessionRegistry {
    config: BufferConfig,

    /// Live sessions by handle.
    sessions: RwLock<HashMap<SessionHandle, Entry>>,

    /// Storage identifiers claimed by live or starting sessions.
    claimed: Mutex<HashSet<String>>,

    /// Counter for generating handles.
    next_handle: AtomicU64,
}

impl SessionRegistry {
    pub fn new(config: BufferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            claimed: Mutex::new(HashSet::new()),
            next_handle: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Start a session and block until its worker is ready.
    ///
    /// Fails with `InvalidChannelSet` for an empty or repeated channel
    /// list, and with `StorageUnavailable` when the identifier is taken by
    /// a live session or its store cannot be opened.
    pub fn start<S: AsRef<str>>(
        &self,
        channel_names: &[S],
        storage_identifier: &str,
    ) -> Result<SessionHandle> {
        let layout = ChannelLayout::new(channel_names)?;
        self.config.storage_path(storage_identifier)?;

        if !self.claimed.lock().insert(storage_identifier.to_string()) {
            return Err(BufferError::storage(
                storage_identifier,
                "in use by a live session",
            ));
        }

        let handle = SessionHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let channels = layout.channel_count();
        let worker = match SessionWorker::spawn(handle, layout, storage_identifier, &self.config) {
            Ok(worker) => worker,
            Err(e) => {
                self.claimed.lock().remove(storage_identifier);
                return Err(e);
            }
        };

        self.sessions.write().insert(
            handle,
            Entry {
                worker,
                storage_identifier: storage_identifier.to_string(),
            },
        );

        info!(session = %handle, storage = storage_identifier, channels, "session started");
        Ok(handle)
    }

    /// Stop a session, waiting for its store to close.
    ///
    /// The handle is invalid afterwards; stopping it again fails with
    /// `UnknownSession`.
    ///
    /// On `Timeout` the session is still removed and its identifier
    /// released, but the detached worker may hold the store's file lock
    /// until it finishes closing. Restarting on the same identifier can
    /// briefly fail with `StorageUnavailable` until then.
    pub fn stop(&self, handle: SessionHandle) -> Result<()> {
        let entry = self
            .sessions
            .write()
            .remove(&handle)
            .ok_or(BufferError::UnknownSession(handle))?;

        let monitor = entry.worker.monitor();
        let result = entry.worker.stop(self.config.request_timeout());
        self.claimed.lock().remove(&entry.storage_identifier);

        if let Some(cause) = monitor.fault() {
            warn!(session = %handle, cause = %cause, "stopped session had faulted");
        }
        if let Err(BufferError::Timeout(limit)) = &result {
            warn!(
                session = %handle,
                storage = %entry.storage_identifier,
                ?limit,
                "stop timed out, worker detached while closing its store"
            );
        }
        info!(session = %handle, storage = %entry.storage_identifier, "session stopped");
        result
    }

    /// Forward a request to a session's worker and wait for the response.
    pub fn dispatch(&self, handle: SessionHandle, request: Request) -> Result<Response> {
        let address = self
            .sessions
            .read()
            .get(&handle)
            .map(|entry| entry.worker.address())
            .ok_or(BufferError::UnknownSession(handle))?;

        address.call(request, self.config.request_timeout())
    }

    /// Lifecycle state of a registered session's worker.
    pub fn state(&self, handle: SessionHandle) -> Result<WorkerState> {
        self.sessions
            .read()
            .get(&handle)
            .map(|entry| entry.worker.state())
            .ok_or(BufferError::UnknownSession(handle))
    }

    /// Handles of all registered sessions, oldest first.
    pub fn sessions(&self) -> Vec<SessionHandle> {
        let mut handles: Vec<_> = self.sessions.read().keys().copied().collect();
        handles.sort();
        handles
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Stop every registered session.
    pub fn shutdown(&self) {
        for handle in self.sessions() {
            if let Err(e) = self.stop(handle) {
                warn!(session = %handle, error = %e, "error stopping session during shutdown");
            }
        }
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Record;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn test_registry(dir: &TempDir) -> SessionRegistry {
        SessionRegistry::new(BufferConfig::with_data_dir(dir.path())).unwrap()
    }

    #[test]
    fn test_start_and_stop() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir);

        let handle = registry.start(&["ch0", "ch1"], "buffer_1.db").unwrap();
        assert_eq!(registry.sessions(), vec![handle]);
        assert_eq!(registry.state(handle).unwrap(), WorkerState::Ready);

        registry.stop(handle).unwrap();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.stop(handle),
            Err(BufferError::UnknownSession(_))
        ));
    }

    #[test]
    fn test_handles_are_unique() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir);

        let a = registry.start(&["x"], "a.db").unwrap();
        let b = registry.start(&["x"], "b.db").unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_invalid_channel_set() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir);

        let empty: [&str; 0] = [];
        assert!(matches!(
            registry.start(&empty, "a.db"),
            Err(BufferError::InvalidChannelSet(_))
        ));
        assert!(matches!(
            registry.start(&["x", "x"], "a.db"),
            Err(BufferError::InvalidChannelSet(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_identifier_collision_with_live_session() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir);

        let first = registry.start(&["x"], "shared.db").unwrap();
        assert!(matches!(
            registry.start(&["x"], "shared.db"),
            Err(BufferError::StorageUnavailable { .. })
        ));

        // Reuse after stop is allowed
        registry.stop(first).unwrap();
        registry.start(&["x"], "shared.db").unwrap();
    }

    #[test]
    fn test_timed_out_stop_still_releases_session() {
        let dir = TempDir::new().unwrap();
        let config = BufferConfig {
            request_timeout_ms: Some(0),
            ..BufferConfig::with_data_dir(dir.path())
        };
        let registry = SessionRegistry::new(config).unwrap();
        let handle = registry.start(&["x"], "slow.db").unwrap();

        // A zero budget usually expires before the worker answers
        let result = registry.stop(handle);
        assert!(matches!(result, Ok(()) | Err(BufferError::Timeout(_))));
        assert!(registry.is_empty());
        assert!(matches!(
            registry.stop(handle),
            Err(BufferError::UnknownSession(_))
        ));

        // The identifier is reusable once the detached worker unlocks it
        let mut restarted = None;
        for _ in 0..200 {
            match registry.start(&["x"], "slow.db") {
                Ok(handle) => {
                    restarted = Some(handle);
                    break;
                }
                Err(BufferError::StorageUnavailable { .. }) => {
                    thread::sleep(std::time::Duration::from_millis(10));
                }
                Err(e) => panic!("Unexpected error: {e}"),
            }
        }
        assert!(restarted.is_some());
    }

    #[test]
    fn test_failed_start_releases_identifier() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir);

        // A directory cannot be opened as a store file
        std::fs::create_dir(dir.path().join("taken")).unwrap();
        assert!(matches!(
            registry.start(&["x"], "taken"),
            Err(BufferError::StorageUnavailable { .. })
        ));
        std::fs::remove_dir(dir.path().join("taken")).unwrap();

        registry.start(&["x"], "taken").unwrap();
    }

    #[test]
    fn test_dispatch_unknown_session() {
        let dir = TempDir::new().unwrap();
        let registry = test_registry(&dir);

        let result = registry.dispatch(SessionHandle(99), Request::Count);
        assert!(matches!(result, Err(BufferError::UnknownSession(SessionHandle(99)))));
    }

    #[test]
    fn test_concurrent_start_stop() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(test_registry(&dir));

        let threads: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for round in 0..5 {
                        let id = format!("t{t}_r{round}.db");
                        let handle = registry.start(&["a", "b"], &id).unwrap();
                        registry
                            .dispatch(handle, Request::Append(Record::new(vec![1.0, 2.0], 0.0)))
                            .unwrap();
                        assert_eq!(
                            registry.dispatch(handle, Request::Count).unwrap(),
                            Response::Count(1)
                        );
                        registry.stop(handle).unwrap();
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_drop_stops_sessions() {
        let dir = TempDir::new().unwrap();
        {
            let registry = test_registry(&dir);
            let handle = registry.start(&["a"], "left_open.db").unwrap();
            registry
                .dispatch(handle, Request::Append(Record::new(vec![3.0], 1.0)))
                .unwrap();
        }

        // Lock released, so a new session can claim the identifier
        let registry = test_registry(&dir);
        registry.start(&["a"], "left_open.db").unwrap();
    }
}
