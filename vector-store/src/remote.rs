use std::collections::HashMap;
use std::time::Duration;

use common::error::AppError;
use common::storage::types::chunk::Chunk;
use common::utils::config::AppConfig;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::filter;
use crate::{VectorEntry, VectorRecord};

const API_VERSION: &str = "2023-11-01";
const VECTOR_PROFILE: &str = "vector-profile";
const VECTOR_ALGORITHM: &str = "hnsw-cosine";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra chunk attributes that have no dedicated index field. They ride along
/// in the `metadata_json` string and are unpacked again on retrieval.
#[derive(Debug, Default, Serialize, Deserialize)]
struct MetadataSidecar {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    page: Option<u32>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    extra: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RemoteIndexDefinition {
    fields: Vec<RemoteFieldDefinition>,
}

#[derive(Debug, Deserialize)]
struct RemoteFieldDefinition {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    #[serde(default)]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct IndexBatchResponse {
    value: Vec<IndexActionResult>,
}

#[derive(Debug, Deserialize)]
struct IndexActionResult {
    key: Option<String>,
    status: bool,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    value: Vec<SearchDoc>,
}

#[derive(Debug, Deserialize)]
struct SearchDoc {
    #[serde(rename = "@search.score")]
    score: Option<f32>,
    id: String,
    document_id: String,
    content: String,
    chunk_index: i64,
    source: String,
    #[serde(default)]
    metadata_json: Option<String>,
    #[serde(rename = "contentVector", default)]
    content_vector: Option<Vec<f32>>,
}

/// Managed search-service backend speaking the Azure AI Search REST API.
///
/// The index is created on first use and recreated when an existing index has
/// a different field layout or vector dimension than this build expects.
pub struct RemoteIndex {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    index_name: String,
    ensured: OnceCell<usize>,
}

impl RemoteIndex {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let endpoint = config
            .search_endpoint
            .clone()
            .filter(|value| !value.is_empty());
        let api_key = config
            .search_api_key
            .clone()
            .filter(|value| !value.is_empty());
        let (endpoint, api_key) = match (endpoint, api_key) {
            (Some(endpoint), Some(api_key)) => (endpoint, api_key),
            _ => {
                return Err(AppError::BackendUnavailable(
                    "remote vector backend requires search_endpoint and search_api_key".to_string(),
                ))
            }
        };

        let http = reqwest::ClientBuilder::new()
            .timeout(HTTP_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            index_name: config.search_index_name.clone(),
            ensured: OnceCell::new(),
        })
    }

    fn index_url(&self) -> String {
        format!(
            "{}/indexes/{}?api-version={API_VERSION}",
            self.endpoint, self.index_name
        )
    }

    fn docs_url(&self, operation: &str) -> String {
        format!(
            "{}/indexes/{}/docs/{operation}?api-version={API_VERSION}",
            self.endpoint, self.index_name
        )
    }

    /// Creates the index if missing, or drops and recreates it when the
    /// existing schema does not match. Runs at most once per process.
    pub async fn ensure_index(&self, dimension: usize) -> Result<(), AppError> {
        self.ensured
            .get_or_try_init(|| async {
                match self.fetch_index().await? {
                    None => {
                        self.create_index(dimension).await?;
                        info!(index = %self.index_name, dimension, "created search index");
                    }
                    Some(existing) => {
                        if schema_matches(&existing, dimension) {
                            debug!(index = %self.index_name, "search index schema verified");
                        } else {
                            warn!(
                                index = %self.index_name,
                                "search index schema differs from expected layout, recreating"
                            );
                            self.delete_index().await?;
                            self.create_index(dimension).await?;
                        }
                    }
                }
                Ok::<usize, AppError>(dimension)
            })
            .await?;
        Ok(())
    }

    async fn fetch_index(&self) -> Result<Option<RemoteIndexDefinition>, AppError> {
        let response = self
            .http
            .get(self.index_url())
            .header("api-key", &self.api_key)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check(response, "fetching index definition").await?;
        Ok(Some(response.json().await?))
    }

    async fn create_index(&self, dimension: usize) -> Result<(), AppError> {
        let response = self
            .http
            .put(self.index_url())
            .header("api-key", &self.api_key)
            .json(&index_definition(&self.index_name, dimension))
            .send()
            .await?;
        check(response, "creating index").await?;
        Ok(())
    }

    async fn delete_index(&self) -> Result<(), AppError> {
        let response = self
            .http
            .delete(self.index_url())
            .header("api-key", &self.api_key)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(response, "deleting index").await?;
        Ok(())
    }

    pub async fn add(&self, records: &[VectorRecord], dimension: usize) -> Result<(), AppError> {
        if records.is_empty() {
            return Ok(());
        }
        self.ensure_index(dimension).await?;

        let mut actions = Vec::with_capacity(records.len());
        for record in records {
            actions.push(upload_action(record)?);
        }
        self.submit_actions(actions).await
    }

    pub async fn delete(&self, ids: &[String]) -> Result<(), AppError> {
        if ids.is_empty() {
            return Ok(());
        }
        let actions = ids
            .iter()
            .map(|id| json!({ "@search.action": "delete", "id": id }))
            .collect();
        self.submit_actions(actions).await
    }

    async fn submit_actions(&self, actions: Vec<serde_json::Value>) -> Result<(), AppError> {
        let response = self
            .http
            .post(self.docs_url("index"))
            .header("api-key", &self.api_key)
            .json(&json!({ "value": actions }))
            .send()
            .await?;
        let response = check(response, "submitting document batch").await?;

        // A 207 means the batch was accepted but individual actions may have
        // failed, so every action result has to be inspected.
        let batch: IndexBatchResponse = response.json().await?;
        let failures: Vec<&IndexActionResult> =
            batch.value.iter().filter(|result| !result.status).collect();
        if let Some(first) = failures.first() {
            return Err(AppError::BackendOperation(format!(
                "{} of {} index actions failed, first: key={} message={}",
                failures.len(),
                batch.value.len(),
                first.key.as_deref().unwrap_or("<unknown>"),
                first.error_message.as_deref().unwrap_or("<none>"),
            )));
        }
        Ok(())
    }

    pub async fn search(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: Option<&HashMap<String, String>>,
    ) -> Result<Vec<VectorEntry>, AppError> {
        let mut body = json!({
            "top": k,
            "select": "id, document_id, content, chunk_index, source, metadata_json, contentVector",
            "vectorQueries": [{
                "kind": "vector",
                "vector": query_vector,
                "fields": "contentVector",
                "k": k,
            }],
        });
        if let Some(map) = filter {
            if let Some(expression) = filter::to_odata_expression(map)? {
                body["filter"] = json!(expression);
            }
        }

        let response = self
            .http
            .post(self.docs_url("search"))
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(AppError::NotInitialized(format!(
                "search index '{}' does not exist yet",
                self.index_name
            )));
        }
        let response = check(response, "running vector search").await?;
        let parsed: SearchResponse = response.json().await?;
        Ok(parsed.value.into_iter().map(entry_from_doc).collect())
    }

    pub async fn is_ready(&self) -> bool {
        matches!(self.fetch_index().await, Ok(Some(_)))
    }
}

async fn check(response: reqwest::Response, context: &str) -> Result<reqwest::Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AppError::BackendOperation(format!(
        "{context} failed with status {status}: {body}"
    )))
}

/// Expected index layout as (field name, EDM type) pairs.
fn expected_fields() -> Vec<(&'static str, &'static str)> {
    vec![
        ("id", "Edm.String"),
        ("document_id", "Edm.String"),
        ("content", "Edm.String"),
        ("chunk_index", "Edm.Int32"),
        ("contentVector", "Collection(Edm.Single)"),
        ("source", "Edm.String"),
        ("metadata_json", "Edm.String"),
    ]
}

fn index_definition(name: &str, dimension: usize) -> serde_json::Value {
    json!({
        "name": name,
        "fields": [
            { "name": "id", "type": "Edm.String", "key": true, "filterable": true },
            { "name": "document_id", "type": "Edm.String", "filterable": true },
            { "name": "content", "type": "Edm.String", "searchable": true },
            { "name": "chunk_index", "type": "Edm.Int32", "filterable": true, "sortable": true },
            {
                "name": "contentVector",
                "type": "Collection(Edm.Single)",
                "searchable": true,
                "dimensions": dimension,
                "vectorSearchProfile": VECTOR_PROFILE,
            },
            { "name": "source", "type": "Edm.String", "filterable": true },
            {
                "name": "metadata_json",
                "type": "Edm.String",
                "searchable": false,
                "filterable": false,
                "sortable": false,
                "facetable": false,
            },
        ],
        "vectorSearch": {
            "algorithms": [{
                "name": VECTOR_ALGORITHM,
                "kind": "hnsw",
                "hnswParameters": { "metric": "cosine" },
            }],
            "profiles": [{
                "name": VECTOR_PROFILE,
                "algorithm": VECTOR_ALGORITHM,
            }],
        },
    })
}

fn schema_matches(existing: &RemoteIndexDefinition, dimension: usize) -> bool {
    let mut actual: Vec<(&str, &str)> = existing
        .fields
        .iter()
        .map(|field| (field.name.as_str(), field.field_type.as_str()))
        .collect();
    actual.sort_unstable();
    let mut expected = expected_fields();
    expected.sort_unstable();
    if actual != expected {
        return false;
    }

    existing
        .fields
        .iter()
        .find(|field| field.name == "contentVector")
        .and_then(|field| field.dimensions)
        == Some(dimension)
}

fn upload_action(record: &VectorRecord) -> Result<serde_json::Value, AppError> {
    let sidecar = MetadataSidecar {
        page: record.chunk.page,
        extra: record.chunk.metadata.clone(),
    };
    Ok(json!({
        "@search.action": "mergeOrUpload",
        "id": record.id,
        "document_id": record.chunk.document_id,
        "content": record.chunk.content,
        "chunk_index": record.chunk.chunk_index,
        "contentVector": record.vector,
        "source": record.chunk.source,
        "metadata_json": serde_json::to_string(&sidecar)?,
    }))
}

fn entry_from_doc(doc: SearchDoc) -> VectorEntry {
    let sidecar = doc
        .metadata_json
        .as_deref()
        .and_then(|raw| serde_json::from_str::<MetadataSidecar>(raw).ok())
        .unwrap_or_default();
    let chunk = Chunk {
        chunk_id: doc.id,
        document_id: doc.document_id,
        content: doc.content,
        chunk_index: usize::try_from(doc.chunk_index).unwrap_or_default(),
        page: sidecar.page,
        source: doc.source,
        metadata: sidecar.extra,
    };
    VectorEntry {
        chunk,
        vector: doc.content_vector.unwrap_or_default(),
        score: doc.score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> VectorRecord {
        let mut chunk = Chunk::new("doc-1", 2, "chunk body".to_string(), "guide.pdf".to_string());
        chunk.page = Some(7);
        chunk
            .metadata
            .insert("department".to_string(), "legal".to_string());
        VectorRecord {
            id: chunk.chunk_id.clone(),
            chunk,
            vector: vec![0.1, 0.2, 0.3],
        }
    }

    #[test]
    fn missing_credentials_fail_construction() {
        let config = AppConfig {
            search_endpoint: Some("https://unit.search.windows.net".to_string()),
            search_api_key: None,
            ..AppConfig::default()
        };
        assert!(matches!(
            RemoteIndex::new(&config),
            Err(AppError::BackendUnavailable(_))
        ));

        let config = AppConfig {
            search_endpoint: Some(String::new()),
            search_api_key: Some("key".to_string()),
            ..AppConfig::default()
        };
        assert!(matches!(
            RemoteIndex::new(&config),
            Err(AppError::BackendUnavailable(_))
        ));
    }

    #[test]
    fn index_definition_covers_every_expected_field() {
        let definition = index_definition("rag-index", 1536);
        let fields = definition["fields"].as_array().unwrap();
        assert_eq!(fields.len(), expected_fields().len());

        let vector_field = fields
            .iter()
            .find(|f| f["name"] == "contentVector")
            .unwrap();
        assert_eq!(vector_field["dimensions"], 1536);
        assert_eq!(vector_field["vectorSearchProfile"], VECTOR_PROFILE);
        assert_eq!(
            definition["vectorSearch"]["algorithms"][0]["hnswParameters"]["metric"],
            "cosine"
        );
    }

    #[test]
    fn schema_match_detects_drift() {
        let matching = RemoteIndexDefinition {
            fields: expected_fields()
                .into_iter()
                .map(|(name, field_type)| RemoteFieldDefinition {
                    name: name.to_string(),
                    field_type: field_type.to_string(),
                    dimensions: (name == "contentVector").then_some(1536),
                })
                .collect(),
        };
        assert!(schema_matches(&matching, 1536));
        assert!(!schema_matches(&matching, 384));

        let missing_field = RemoteIndexDefinition {
            fields: matching
                .fields
                .iter()
                .filter(|f| f.name != "source")
                .map(|f| RemoteFieldDefinition {
                    name: f.name.clone(),
                    field_type: f.field_type.clone(),
                    dimensions: f.dimensions,
                })
                .collect(),
        };
        assert!(!schema_matches(&missing_field, 1536));
    }

    #[test]
    fn upload_action_packs_page_and_metadata_into_sidecar() {
        let record = sample_record();
        let action = upload_action(&record).unwrap();

        assert_eq!(action["@search.action"], "mergeOrUpload");
        assert_eq!(action["id"], record.id.as_str());
        assert_eq!(action["chunk_index"], 2);
        let sidecar: MetadataSidecar =
            serde_json::from_str(action["metadata_json"].as_str().unwrap()).unwrap();
        assert_eq!(sidecar.page, Some(7));
        assert_eq!(sidecar.extra.get("department").map(String::as_str), Some("legal"));
    }

    #[test]
    fn search_doc_round_trips_through_entry() {
        let record = sample_record();
        let action = upload_action(&record).unwrap();
        let doc = SearchDoc {
            score: Some(0.87),
            id: action["id"].as_str().unwrap().to_string(),
            document_id: "doc-1".to_string(),
            content: "chunk body".to_string(),
            chunk_index: 2,
            source: "guide.pdf".to_string(),
            metadata_json: Some(action["metadata_json"].as_str().unwrap().to_string()),
            content_vector: Some(vec![0.1, 0.2, 0.3]),
        };

        let entry = entry_from_doc(doc);
        assert_eq!(entry.chunk, record.chunk);
        assert_eq!(entry.vector, vec![0.1, 0.2, 0.3]);
        assert_eq!(entry.score, Some(0.87));
    }

    #[test]
    fn score_field_tolerates_absence() {
        let raw = json!({
            "id": "c1",
            "document_id": "d1",
            "content": "text",
            "chunk_index": 0,
            "source": "a.txt",
        });
        let doc: SearchDoc = serde_json::from_value(raw).unwrap();
        assert!(doc.score.is_none());
        let entry = entry_from_doc(doc);
        assert!(entry.score.is_none());
        assert!(entry.vector.is_empty());
    }
}
