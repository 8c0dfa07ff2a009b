//! Milvus-backed [`VectorIndex`] over the RESTful v2 API.

use crate::config::MilvusConfig;
use crate::retry::{retry, RetryPolicy};
use crate::wire::{
    create_collection_body, query_names_body, search_body, CollectionDescription,
    CollectionRequest, Envelope, HasCollection, InsertRequest, InsertResult, InsertRow, NameRow,
    SearchHit, QUERY_LIMIT,
};
use async_trait::async_trait;
use facematch_core::{Descriptor, FaceRecord, IndexError, MatchResult, VectorIndex};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Long-lived handle to one Milvus collection, shared by every request.
pub struct MilvusIndex {
    client: Client,
    base_url: String,
    config: MilvusConfig,
}

impl MilvusIndex {
    /// Build the HTTP client. Does not touch the network.
    pub fn new(config: MilvusConfig) -> Result<Self, IndexError> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| IndexError::Unsupported(format!("invalid token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| IndexError::Request(format!("http client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url(),
            config,
        })
    }

    /// Reach the service, retrying per `policy`, then make sure the
    /// collection exists and is loaded. Any error here is fatal at startup.
    pub async fn connect(config: MilvusConfig, policy: RetryPolicy) -> Result<Self, IndexError> {
        let index = Self::new(config)?;
        tracing::info!(url = %index.base_url, attempts = policy.attempts, "connecting to Milvus");

        retry(policy, "milvus connect", |_| index.ping()).await?;
        tracing::info!(url = %index.base_url, "connected to Milvus");

        index.ensure_schema().await?;
        Ok(index)
    }

    pub fn config(&self) -> &MilvusConfig {
        &self.config
    }

    /// Cheap round trip proving the service answers.
    pub async fn ping(&self) -> Result<(), IndexError> {
        let _: Option<serde_json::Value> = self
            .call("/v2/vectordb/collections/list", &serde_json::json!({}))
            .await?;
        Ok(())
    }

    /// Create the collection and its vector index if absent, verify the
    /// descriptor dimension if present, then load it. Safe to call repeatedly.
    pub async fn ensure_schema(&self) -> Result<(), IndexError> {
        let name = self.config.collection.as_str();
        let request = CollectionRequest { collection_name: name };

        let has: Option<HasCollection> = self.call("/v2/vectordb/collections/has", &request).await?;
        let exists = has.map(|h| h.has).unwrap_or(false);

        if exists {
            let description: Option<CollectionDescription> = self
                .call("/v2/vectordb/collections/describe", &request)
                .await?;
            let dim = description.and_then(|d| d.vector_dim());
            match dim {
                Some(dim) if dim == self.config.dim => {
                    tracing::info!(collection = name, dim, "loading existing collection");
                }
                Some(dim) => {
                    return Err(IndexError::SchemaMismatch(format!(
                        "collection {name} stores {dim}-dim descriptors, configured for {}",
                        self.config.dim
                    )));
                }
                None => {
                    return Err(IndexError::SchemaMismatch(format!(
                        "collection {name} has no descriptor field"
                    )));
                }
            }
        } else {
            tracing::info!(
                collection = name,
                dim = self.config.dim,
                index_type = %self.config.index_type,
                metric = %self.config.metric,
                nlist = self.config.nlist,
                "creating collection"
            );
            let _: Option<serde_json::Value> = self
                .call("/v2/vectordb/collections/create", &create_collection_body(&self.config))
                .await?;
        }

        let _: Option<serde_json::Value> = self.call("/v2/vectordb/collections/load", &request).await?;
        tracing::info!(collection = name, "collection loaded");
        Ok(())
    }

    /// POST `body` and unwrap the response envelope.
    async fn call<B, R>(&self, path: &str, body: &B) -> Result<Option<R>, IndexError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| IndexError::Request(format!("{path}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IndexError::Request(format!("{path}: HTTP {status}")));
        }

        let envelope: Envelope<R> = response
            .json()
            .await
            .map_err(|e| IndexError::Request(format!("{path}: malformed response: {e}")))?;

        if envelope.code != 0 {
            return Err(IndexError::Request(format!(
                "{path}: code {}: {}",
                envelope.code,
                envelope.message.unwrap_or_default()
            )));
        }
        Ok(envelope.data)
    }
}

#[async_trait]
impl VectorIndex for MilvusIndex {
    async fn insert(&self, record: &FaceRecord) -> Result<(), IndexError> {
        if record.descriptor.dim() != self.config.dim {
            return Err(IndexError::DimensionMismatch {
                got: record.descriptor.dim(),
                want: self.config.dim,
            });
        }

        let request = InsertRequest {
            collection_name: &self.config.collection,
            data: vec![InsertRow {
                name: &record.name,
                embedding: record.descriptor.values(),
            }],
        };
        let result: Option<InsertResult> = self
            .call("/v2/vectordb/entities/insert", &request)
            .await
            .map_err(|e| IndexError::Insert(e.to_string()))?;

        let inserted = result.map(|r| r.insert_count).unwrap_or(0);
        if inserted != 1 {
            return Err(IndexError::Insert(format!("expected 1 row inserted, got {inserted}")));
        }
        tracing::debug!(name = %record.name, "record inserted");
        Ok(())
    }

    async fn flush(&self) -> Result<(), IndexError> {
        let request = CollectionRequest {
            collection_name: &self.config.collection,
        };
        let _: Option<serde_json::Value> = self
            .call("/v2/vectordb/collections/flush", &request)
            .await
            .map_err(|e| IndexError::Flush(e.to_string()))?;
        Ok(())
    }

    async fn search(&self, query: &Descriptor, k: usize) -> Result<Vec<MatchResult>, IndexError> {
        if query.dim() != self.config.dim {
            return Err(IndexError::DimensionMismatch {
                got: query.dim(),
                want: self.config.dim,
            });
        }
        if k == 0 {
            return Ok(vec![]);
        }

        let request = search_body(&self.config, query.values(), k);
        let hits: Option<Vec<SearchHit>> = self
            .call("/v2/vectordb/entities/search", &request)
            .await
            .map_err(|e| IndexError::Search(e.to_string()))?;

        let mut results: Vec<MatchResult> = hits
            .unwrap_or_default()
            .into_iter()
            .map(|hit| MatchResult {
                distance: hit.distance,
                record: FaceRecord {
                    name: hit.name,
                    descriptor: Descriptor::new(hit.embedding),
                },
            })
            .collect();

        // The service already orders by distance; keep it stable in case it does not.
        results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(results)
    }

    async fn list(&self) -> Result<Vec<String>, IndexError> {
        let request = query_names_body(&self.config);
        let rows: Option<Vec<NameRow>> = self
            .call("/v2/vectordb/entities/query", &request)
            .await
            .map_err(|e| IndexError::Search(e.to_string()))?;

        let names: Vec<String> = rows.unwrap_or_default().into_iter().map(|row| row.name).collect();
        if names.len() >= QUERY_LIMIT {
            tracing::warn!(limit = QUERY_LIMIT, "face listing truncated");
        }
        Ok(names)
    }
}
