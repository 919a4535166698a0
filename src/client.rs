//! Caller-facing operations.

use crate::config::BufferConfig;
use crate::error::{BufferError, Result};
use crate::registry::SessionRegistry;
use crate::types::{Record, SessionHandle, SessionInfo};
use crate::worker::{Request, Response};
use std::sync::Arc;

/// The buffer server's client façade.
///
/// Each call is a direct, order-preserving delegation to the addressed
/// session's worker; nothing is buffered here. `append` and `get_data`
/// block until the worker has executed them.
///
/// Cheap to clone; clones share one registry.
#[derive(Clone)]
pub struct BufferClient {
    registry: Arc<SessionRegistry>,
}

impl BufferClient {
    pub fn new(config: BufferConfig) -> Result<Self> {
        Ok(Self::from_registry(Arc::new(SessionRegistry::new(config)?)))
    }

    pub fn from_registry(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Start a session recording `channel_names` into `storage_identifier`.
    pub fn start<S: AsRef<str>>(
        &self,
        channel_names: &[S],
        storage_identifier: &str,
    ) -> Result<SessionHandle> {
        self.registry.start(channel_names, storage_identifier)
    }

    /// Append a record. Returns once it is stored and visible to reads.
    pub fn append(&self, handle: SessionHandle, record: Record) -> Result<()> {
        match self.registry.dispatch(handle, Request::Append(record))? {
            Response::Appended { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub fn count(&self, handle: SessionHandle) -> Result<usize> {
        match self.registry.dispatch(handle, Request::Count)? {
            Response::Count(count) => Ok(count),
            other => Err(unexpected(other)),
        }
    }

    /// Records at positions `[start, end)`; `None` bounds mean the whole
    /// session. See [`SessionStore::read`](crate::SessionStore::read).
    pub fn get_data(
        &self,
        handle: SessionHandle,
        start: Option<usize>,
        end: Option<usize>,
    ) -> Result<Vec<Record>> {
        match self.registry.dispatch(handle, Request::GetData { start, end })? {
            Response::Data(records) => Ok(records),
            other => Err(unexpected(other)),
        }
    }

    pub fn info(&self, handle: SessionHandle) -> Result<SessionInfo> {
        match self.registry.dispatch(handle, Request::Info)? {
            Response::Info(info) => Ok(info),
            other => Err(unexpected(other)),
        }
    }

    pub fn stop(&self, handle: SessionHandle) -> Result<()> {
        self.registry.stop(handle)
    }
}

fn unexpected(response: Response) -> BufferError {
    BufferError::UnexpectedResponse(format!("{response:?}"))
}
