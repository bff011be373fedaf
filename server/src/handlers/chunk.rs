//! Batch (backfill) steps.

use tandem_engine::{ChunkReport, ChunkRequest, LinkStore, RecordStore};

use crate::error::{AppError, Result};
use crate::service::SyncService;

/// Run one chunk of a backfill.
///
/// Callers walk a mapped type by feeding `nextOffset` back until it is null.
pub async fn handle_chunk<C, T, L>(
    service: &SyncService<C, T, L>,
    request: ChunkRequest,
) -> Result<ChunkReport>
where
    C: RecordStore + Send + 'static,
    T: RecordStore + Send + 'static,
    L: LinkStore + Send + 'static,
{
    if request.mapped_type.is_empty() {
        return Err(AppError::BadRequest("mappedType is required".into()));
    }
    service.sync_chunk(request).await
}
