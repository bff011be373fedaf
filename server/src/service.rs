//! The engine shared by all requests.
//!
//! Sync passes run one at a time: every pass takes the engine lock on a
//! blocking thread, runs to completion with a fresh [`SyncContext`] and
//! releases it. Store and link adapters block on the runtime from there.

use std::sync::{Arc, Mutex};

use tandem_engine::{
    ChangeEvent, ChunkReport, ChunkRequest, DispatchReport, LinkStore, Orchestrator, RecordStore,
    SyncContext,
};

use crate::error::{AppError, Result};

/// Handle to the orchestrator; cheap to clone.
pub struct SyncService<C: RecordStore, T: RecordStore, L: LinkStore> {
    engine: Arc<Mutex<Orchestrator<C, T, L>>>,
}

impl<C: RecordStore, T: RecordStore, L: LinkStore> Clone for SyncService<C, T, L> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<C, T, L> SyncService<C, T, L>
where
    C: RecordStore + Send + 'static,
    T: RecordStore + Send + 'static,
    L: LinkStore + Send + 'static,
{
    pub fn new(engine: Orchestrator<C, T, L>) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
        }
    }

    /// Run `f` against the engine on a blocking thread.
    async fn with_engine<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Orchestrator<C, T, L>) -> R + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || {
            let mut guard = engine
                .lock()
                .map_err(|_| AppError::Internal("engine lock poisoned".into()))?;
            Ok(f(&mut guard))
        })
        .await
        .map_err(|e| AppError::Internal(format!("sync task failed: {e}")))?
    }

    /// Process one inbound change event and everything it triggers.
    pub async fn dispatch(&self, event: ChangeEvent) -> Result<DispatchReport> {
        self.with_engine(move |engine| {
            let mut ctx = SyncContext::new();
            engine.dispatch(&mut ctx, event)
        })
        .await
    }

    /// Run one batch step.
    pub async fn sync_chunk(&self, request: ChunkRequest) -> Result<ChunkReport> {
        self.with_engine(move |engine| {
            let mut ctx = SyncContext::new();
            engine.sync_chunk(&mut ctx, &request)
        })
        .await?
        .map_err(AppError::from)
    }
}
