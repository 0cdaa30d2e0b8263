//! The rule store contract and its HTTP implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use lattice_types::{LatticeError, Result, RuleDocument};

// ---------------------------------------------------------------------------
// QueryFilters
// ---------------------------------------------------------------------------

/// Metadata filters narrowing a similarity query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryFilters {
    /// Restrict to rules applicable to this platform.
    pub platform: Option<String>,
    /// Restrict to rules applicable to this workflow.
    pub workflow: Option<String>,
    /// Restrict to rules tagged for this checkpoint phase.
    pub checkpoint: Option<String>,
    /// Restrict to rules marked critical or selective-eligible.
    pub selective_only: bool,
}

impl QueryFilters {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn for_platform(platform: impl Into<String>) -> Self {
        Self {
            platform: Some(platform.into()),
            ..Self::default()
        }
    }

    pub fn with_checkpoint(mut self, checkpoint: impl Into<String>) -> Self {
        self.checkpoint = Some(checkpoint.into());
        self
    }

    pub fn selective(mut self) -> Self {
        self.selective_only = true;
        self
    }

    /// Serialize into the store's `where` clause.
    fn to_where(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut clause = serde_json::Map::new();
        if let Some(ref platform) = self.platform {
            clause.insert("platforms".into(), serde_json::json!({ "$contains": platform }));
        }
        if let Some(ref workflow) = self.workflow {
            clause.insert("workflows".into(), serde_json::json!({ "$contains": workflow }));
        }
        if let Some(ref checkpoint) = self.checkpoint {
            clause.insert("checkpoint".into(), serde_json::json!(checkpoint));
        }
        if self.selective_only {
            clause.insert("selective_eligible".into(), serde_json::json!("true"));
        }
        clause
    }
}

// ---------------------------------------------------------------------------
// RuleStore trait
// ---------------------------------------------------------------------------

/// The external vector-similarity store contract.
///
/// `query` returns documents sorted by ascending distance. An empty result is
/// valid and not an error; network and timeout failures surface as
/// [`LatticeError::StoreUnavailable`] / [`LatticeError::RequestTimeout`].
/// Production callers go through a [`crate::CircuitBreaker`], never directly.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn query(
        &self,
        collection: &str,
        text: &str,
        filters: &QueryFilters,
        limit: usize,
    ) -> Result<Vec<RuleDocument>>;

    async fn heartbeat(&self) -> Result<()>;

    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// HttpRuleStore
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct QueryBody<'a> {
    query_text: &'a str,
    limit: usize,
    #[serde(rename = "where", skip_serializing_if = "serde_json::Map::is_empty")]
    where_clause: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StoreDocument {
    id: String,
    text: String,
    distance: f64,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    documents: Vec<StoreDocument>,
}

/// HTTP client for the vector-similarity store.
///
/// Every request carries a bounded timeout; exceeding it is reported as
/// [`LatticeError::RequestTimeout`] so the circuit breaker counts it as a
/// failure rather than silently retrying.
pub struct HttpRuleStore {
    base_url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl HttpRuleStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LatticeError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            http,
        })
    }

    fn map_request_error(&self, err: reqwest::Error) -> LatticeError {
        if err.is_timeout() {
            LatticeError::RequestTimeout {
                dependency: self.name().to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            LatticeError::StoreUnavailable {
                store: self.name().to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl RuleStore for HttpRuleStore {
    async fn query(
        &self,
        collection: &str,
        text: &str,
        filters: &QueryFilters,
        limit: usize,
    ) -> Result<Vec<RuleDocument>> {
        let url = format!("{}/api/v1/collections/{collection}/query", self.base_url);
        let body = QueryBody {
            query_text: text,
            limit,
            where_clause: filters.to_where(),
        };

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        if !response.status().is_success() {
            return Err(LatticeError::StoreUnavailable {
                store: self.name().to_string(),
                message: format!("collection '{collection}' query returned HTTP {}", response.status()),
            });
        }

        let parsed: QueryResponse = response.json().await.map_err(|e| self.map_request_error(e))?;

        let mut documents: Vec<RuleDocument> = parsed
            .documents
            .into_iter()
            .map(|doc| RuleDocument {
                id: doc.id,
                text: doc.text,
                collection: collection.to_string(),
                distance: doc.distance,
                metadata: doc.metadata,
            })
            .collect();
        documents.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(documents)
    }

    async fn heartbeat(&self) -> Result<()> {
        let url = format!("{}/api/v1/heartbeat", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(LatticeError::StoreUnavailable {
                store: self.name().to_string(),
                message: format!("heartbeat returned HTTP {}", response.status()),
            })
        }
    }

    fn name(&self) -> &str {
        "rule_store"
    }
}
