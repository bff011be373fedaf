//! Entity links kept in PostgreSQL.
//!
//! The engine calls its stores synchronously, so every query here is driven
//! to completion on the runtime handle. Callers run the engine inside
//! `spawn_blocking`, where blocking on the handle is allowed.

use sqlx::{PgPool, Row};
use tandem_engine::{error::Result, EntityLink, Error, LinkStore, RecordId, Side};
use tokio::runtime::Handle;

/// [`LinkStore`] over the `entity_links` table.
#[derive(Debug, Clone)]
pub struct PgLinkStore {
    pool: PgPool,
    runtime: Handle,
}

fn column(side: Side) -> &'static str {
    match side {
        Side::Crm => "crm_id",
        Side::Content => "content_id",
    }
}

fn db_error(operation: &str, mapped_type: &str, e: sqlx::Error) -> Error {
    Error::remote(format!("link {}", operation), mapped_type, e)
}

/// Record ids are unsigned, the table stores BIGINT.
fn db_id(operation: &str, mapped_type: &str, id: RecordId) -> Result<i64> {
    i64::try_from(id).map_err(|_| {
        Error::remote(
            format!("link {}", operation),
            mapped_type,
            format!("id {} does not fit a BIGINT column", id),
        )
    })
}

fn record_id(raw: i64) -> std::result::Result<RecordId, sqlx::Error> {
    RecordId::try_from(raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn to_link(row: &sqlx::postgres::PgRow) -> std::result::Result<EntityLink, sqlx::Error> {
    Ok(EntityLink::new(
        row.try_get::<String, _>("mapped_type")?,
        record_id(row.try_get("crm_id")?)?,
        record_id(row.try_get("content_id")?)?,
    ))
}

/// Side whose uniqueness constraint a rejected insert violated.
fn conflict_side(e: &sqlx::Error) -> Option<Side> {
    let sqlx::Error::Database(db) = e else {
        return None;
    };
    if !db.is_unique_violation() {
        return None;
    }
    Some(match db.constraint() {
        Some(name) if name.contains("content_id") => Side::Content,
        _ => Side::Crm,
    })
}

impl PgLinkStore {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self { pool, runtime }
    }

    async fn find_async(
        &self,
        mapped_type: &str,
        side: Side,
        id: i64,
    ) -> std::result::Result<Option<EntityLink>, sqlx::Error> {
        let sql = format!(
            "SELECT mapped_type, crm_id, content_id FROM entity_links \
             WHERE mapped_type = $1 AND {} = $2",
            column(side)
        );
        let row = sqlx::query(&sql)
            .bind(mapped_type)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(to_link).transpose()
    }

    fn conflict(&self, link: &EntityLink, side: Side) -> Result<Error> {
        let other = side.opposite();
        let existing = self
            .find(&link.mapped_type, side, link.id_on(side))?
            .map(|found| found.id_on(other))
            .unwrap_or_default();
        Ok(Error::LinkConflict {
            mapped_type: link.mapped_type.clone(),
            side,
            id: link.id_on(side),
            existing,
            requested: link.id_on(other),
        })
    }
}

impl LinkStore for PgLinkStore {
    fn find(&self, mapped_type: &str, side: Side, id: RecordId) -> Result<Option<EntityLink>> {
        let id = db_id("find", mapped_type, id)?;
        self.runtime
            .block_on(self.find_async(mapped_type, side, id))
            .map_err(|e| db_error("find", mapped_type, e))
    }

    fn insert(&mut self, link: EntityLink) -> Result<()> {
        let crm_id = db_id("insert", &link.mapped_type, link.crm_id)?;
        let content_id = db_id("insert", &link.mapped_type, link.content_id)?;

        // Report conflicts the same way the in-memory store does
        for side in [Side::Crm, Side::Content] {
            if self.find(&link.mapped_type, side, link.id_on(side))?.is_some() {
                return Err(self.conflict(&link, side)?);
            }
        }

        let inserted = self.runtime.block_on(
            sqlx::query(
                "INSERT INTO entity_links (mapped_type, crm_id, content_id) VALUES ($1, $2, $3)",
            )
            .bind(&link.mapped_type)
            .bind(crm_id)
            .bind(content_id)
            .execute(&self.pool),
        );
        if let Err(e) = inserted {
            // a concurrent writer got there between the check and the insert
            return Err(match conflict_side(&e) {
                Some(side) => self.conflict(&link, side)?,
                None => db_error("insert", &link.mapped_type, e),
            });
        }

        tracing::debug!(
            mapped_type = %link.mapped_type,
            crm_id = link.crm_id,
            content_id = link.content_id,
            "Stored entity link"
        );
        Ok(())
    }

    fn remove(&mut self, mapped_type: &str, side: Side, id: RecordId) -> Result<Option<EntityLink>> {
        let id = db_id("remove", mapped_type, id)?;
        let sql = format!(
            "DELETE FROM entity_links WHERE mapped_type = $1 AND {} = $2 \
             RETURNING mapped_type, crm_id, content_id",
            column(side)
        );
        let row = self
            .runtime
            .block_on(
                sqlx::query(&sql)
                    .bind(mapped_type)
                    .bind(id)
                    .fetch_optional(&self.pool),
            )
            .map_err(|e| db_error("remove", mapped_type, e))?;
        row.as_ref()
            .map(to_link)
            .transpose()
            .map_err(|e| db_error("remove", mapped_type, e))
    }

    fn links(&self, mapped_type: &str) -> Result<Vec<EntityLink>> {
        let rows = self
            .runtime
            .block_on(
                sqlx::query(
                    "SELECT mapped_type, crm_id, content_id FROM entity_links \
                     WHERE mapped_type = $1 ORDER BY crm_id",
                )
                .bind(mapped_type)
                .fetch_all(&self.pool),
            )
            .map_err(|e| db_error("list", mapped_type, e))?;
        rows.iter()
            .map(to_link)
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| db_error("list", mapped_type, e))
    }
}
