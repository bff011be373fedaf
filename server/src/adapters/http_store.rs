//! Record store reached over a JSON REST API.
//!
//! Both stores expose the same small contract under their base URL:
//!
//! | Call | Request |
//! |---|---|
//! | get | `GET /records/{type}/{id}` (404 = missing) |
//! | create | `POST /records/{type}` with the fields |
//! | update | `PUT /records/{type}/{id}` with the fields and id |
//! | children | `GET /records/{type}?{parent_field}={parent_id}` |
//! | delete | `DELETE /records/{type}/{id}` (404 = already gone) |
//! | chunk | `POST /records/{type}/query` with `{filter, offset, limit}` |
//! | type of | `GET /types/{id}` returning `{"entityType": ..}` |
//!
//! Writes queue the change event the store's own hook would raise, so the
//! orchestrator can suppress the echo within the same request. The webhook
//! the store sends later only carries values the other side already holds;
//! the orchestrator compares against the target record and ends that pass
//! unchanged.

use reqwest::{Client, Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tandem_engine::{
    error::Result, Chunk, ChangeEvent, ChangeKind, CreateOp, Error, Fields, Record, RecordId,
    RecordStore, Side, UpdateOp,
};
use tokio::runtime::Handle;

#[derive(Debug, Serialize)]
struct ChunkQuery<'a> {
    filter: &'a Fields,
    offset: usize,
    limit: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypeResponse {
    entity_type: String,
}

/// [`RecordStore`] adapter over HTTP.
#[derive(Debug)]
pub struct HttpStore {
    side: Side,
    base: Url,
    client: Client,
    runtime: Handle,
    outbox: Vec<ChangeEvent>,
}

impl HttpStore {
    pub fn new(side: Side, base_url: &str, client: Client, runtime: Handle) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| Error::InvalidConfig(format!("invalid {} base URL: {}", side, e)))?;
        if base.cannot_be_a_base() {
            return Err(Error::InvalidConfig(format!(
                "{} base URL cannot hold paths: {}",
                side, base_url
            )));
        }
        Ok(Self {
            side,
            base,
            client,
            runtime,
            outbox: Vec::new(),
        })
    }

    /// Base URL joined with escaped path segments.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Send a request, returning `None` on 404.
    fn send<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        operation: &str,
        entity_type: &str,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<Option<T>> {
        tracing::debug!(side = %self.side, %method, %url, "Store request");

        self.runtime.block_on(async {
            let mut request = self.client.request(method, url);
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request
                .send()
                .await
                .map_err(|e| Error::remote(operation, entity_type, e))?;

            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !response.status().is_success() {
                let status = response.status();
                let message = response.text().await.unwrap_or_default();
                return Err(Error::remote(
                    operation,
                    entity_type,
                    format!("{}: {}", status, message),
                ));
            }
            response
                .json::<T>()
                .await
                .map(Some)
                .map_err(|e| Error::remote(operation, entity_type, format!("bad response: {e}")))
        })
    }

    fn not_found(&self, entity_type: &str, id: RecordId) -> Error {
        Error::RecordNotFound {
            side: self.side,
            entity_type: entity_type.to_string(),
            id,
        }
    }
}

impl RecordStore for HttpStore {
    fn side(&self) -> Side {
        self.side
    }

    fn get_by_id(&self, entity_type: &str, id: RecordId) -> Result<Option<Record>> {
        let url = self.url(&["records", entity_type, &id.to_string()]);
        self.send::<(), Record>("get", entity_type, Method::GET, url, None)
    }

    fn create(&mut self, op: &CreateOp) -> Result<Record> {
        let url = self.url(&["records", &op.entity_type]);
        let record: Record = self
            .send("create", &op.entity_type, Method::POST, url, Some(op.fields()))?
            .ok_or_else(|| Error::remote("create", &op.entity_type, "type not found"))?;

        self.outbox.push(
            ChangeEvent::new(self.side, ChangeKind::Created, op.entity_type.clone(), record.id)
                .with_fields(record.fields.clone()),
        );
        Ok(record)
    }

    fn update(&mut self, op: &UpdateOp) -> Result<Record> {
        let url = self.url(&["records", &op.entity_type, &op.id.to_string()]);
        let record: Record = self
            .send(
                "update",
                &op.entity_type,
                Method::PUT,
                url,
                Some(&op.fields_with_id()),
            )?
            .ok_or_else(|| self.not_found(&op.entity_type, op.id))?;

        self.outbox.push(
            ChangeEvent::new(self.side, ChangeKind::Updated, op.entity_type.clone(), op.id)
                .with_fields(op.fields.clone()),
        );
        Ok(record)
    }

    fn query_children(
        &self,
        entity_type: &str,
        parent_field: &str,
        parent_id: RecordId,
    ) -> Result<Vec<Record>> {
        let mut url = self.url(&["records", entity_type]);
        url.query_pairs_mut()
            .append_pair(parent_field, &parent_id.to_string());
        Ok(self
            .send::<(), Vec<Record>>("children", entity_type, Method::GET, url, None)?
            .unwrap_or_default())
    }

    fn delete(&mut self, entity_type: &str, id: RecordId) -> Result<bool> {
        let url = self.url(&["records", entity_type, &id.to_string()]);
        let deleted = self
            .send::<(), serde_json::Value>("delete", entity_type, Method::DELETE, url, None)?
            .is_some();
        if deleted {
            self.outbox
                .push(ChangeEvent::new(self.side, ChangeKind::Deleted, entity_type, id));
        }
        Ok(deleted)
    }

    fn query_chunk(
        &self,
        entity_type: &str,
        filter: &Fields,
        offset: usize,
        limit: usize,
    ) -> Result<Chunk> {
        let url = self.url(&["records", entity_type, "query"]);
        let query = ChunkQuery {
            filter,
            offset,
            limit,
        };
        Ok(self
            .send("chunk", entity_type, Method::POST, url, Some(&query))?
            .unwrap_or_default())
    }

    fn type_of(&self, id: RecordId) -> Result<Option<String>> {
        let url = self.url(&["types", &id.to_string()]);
        Ok(self
            .send::<(), TypeResponse>("type", "record", Method::GET, url, None)?
            .map(|t| t.entity_type))
    }

    fn take_events(&mut self) -> Vec<ChangeEvent> {
        std::mem::take(&mut self.outbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(base: &str) -> Result<HttpStore> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        HttpStore::new(Side::Crm, base, Client::new(), runtime.handle().clone())
    }

    #[test]
    fn paths_are_escaped_under_the_base() {
        let store = store("https://crm.example/api/v3/").unwrap();
        assert_eq!(
            store.url(&["records", "Individual", "42"]).as_str(),
            "https://crm.example/api/v3/records/Individual/42"
        );
        assert_eq!(
            store.url(&["records", "Phone call"]).as_str(),
            "https://crm.example/api/v3/records/Phone%20call"
        );
    }

    #[test]
    fn invalid_base_urls_are_configuration_errors() {
        let err = store("not a url").unwrap_err();
        assert_eq!(err.kind(), tandem_engine::ErrorKind::Configuration);
        assert!(store("mailto:crm@example.com").is_err());
    }

    #[test]
    fn chunk_query_body() {
        let mut filter = Fields::new();
        filter.insert("is_deleted".into(), serde_json::json!(0));
        let body = serde_json::to_value(ChunkQuery {
            filter: &filter,
            offset: 20,
            limit: 10,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"filter": {"is_deleted": 0}, "offset": 20, "limit": 10})
        );
    }
}
