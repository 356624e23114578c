//! Retrieval Gateway
//!
//! The semantic-retrieval subsystem is an external service. The core only
//! needs ranked passages for a query, and it must never wait on the service
//! for longer than a fixed ceiling: a timeout or error simply yields no
//! passages.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// The reference collections the simulation draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// The persona's case history and interview transcripts.
    PatientProfile,
    /// Clinical reference material on the presenting condition.
    MedicalKnowledge,
    /// Examiner marking guides used by the grader.
    GradingCriteria,
}

/// One ranked reference passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub source: String,
    pub text: String,
    #[serde(default)]
    pub score: f32,
}

/// Contract for the external retrieval service.
#[async_trait]
pub trait RetrievalGateway: Send + Sync {
    async fn search(&self, collection: Collection, query: &str, top_k: usize) -> Result<Vec<Passage>>;
}

/// A gateway that never returns anything. Used when no retrieval service is
/// configured; generation then relies on conversation history alone.
pub struct NoRetrieval;

#[async_trait]
impl RetrievalGateway for NoRetrieval {
    async fn search(&self, _collection: Collection, _query: &str, _top_k: usize) -> Result<Vec<Passage>> {
        Ok(Vec::new())
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    collection: Collection,
    query: &'a str,
    top_k: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    passages: Vec<Passage>,
}

/// Talks to a retrieval service over HTTP: `POST {base_url}/search`.
pub struct HttpRetrievalGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRetrievalGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl RetrievalGateway for HttpRetrievalGateway {
    async fn search(&self, collection: Collection, query: &str, top_k: usize) -> Result<Vec<Passage>> {
        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .json(&SearchRequest {
                collection,
                query,
                top_k,
            })
            .send()
            .await
            .context("Retrieval request failed")?
            .error_for_status()
            .context("Retrieval service returned an error status")?;
        let body: SearchResponse = response
            .json()
            .await
            .context("Malformed retrieval response")?;
        Ok(body.passages)
    }
}

/// Runs a search bounded by `limit`, degrading to an empty result.
pub async fn retrieve_bounded(
    gateway: &dyn RetrievalGateway,
    collection: Collection,
    query: &str,
    top_k: usize,
    limit: Duration,
) -> Vec<Passage> {
    match tokio::time::timeout(limit, gateway.search(collection, query, top_k)).await {
        Ok(Ok(passages)) => passages,
        Ok(Err(e)) => {
            warn!(?collection, error = ?e, "Retrieval failed; continuing without passages");
            Vec::new()
        }
        Err(_) => {
            warn!(?collection, timeout_ms = limit.as_millis() as u64, "Retrieval timed out; continuing without passages");
            Vec::new()
        }
    }
}

/// Renders passages as a bulleted block for a prompt.
pub fn render_passages(passages: &[Passage]) -> String {
    if passages.is_empty() {
        return "None available.".to_string();
    }
    passages
        .iter()
        .map(|p| format!("- [{}] {}", p.source, p.text.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The reference material handed to the persona generator for one turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceBundle {
    pub patient_context: Vec<Passage>,
    pub medical_context: Vec<Passage>,
}

impl ReferenceBundle {
    /// Looks up both persona collections concurrently, each bounded by `limit`.
    pub async fn gather(gateway: &dyn RetrievalGateway, query: &str, top_k: usize, limit: Duration) -> Self {
        let (patient_context, medical_context) = tokio::join!(
            retrieve_bounded(gateway, Collection::PatientProfile, query, top_k, limit),
            retrieve_bounded(gateway, Collection::MedicalKnowledge, query, top_k, limit),
        );
        Self {
            patient_context,
            medical_context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowGateway;

    #[async_trait]
    impl RetrievalGateway for SlowGateway {
        async fn search(&self, _c: Collection, _q: &str, _k: usize) -> Result<Vec<Passage>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec![passage("late")])
        }
    }

    struct FailingGateway;

    #[async_trait]
    impl RetrievalGateway for FailingGateway {
        async fn search(&self, _c: Collection, _q: &str, _k: usize) -> Result<Vec<Passage>> {
            anyhow::bail!("index unavailable")
        }
    }

    struct EchoGateway;

    #[async_trait]
    impl RetrievalGateway for EchoGateway {
        async fn search(&self, collection: Collection, query: &str, top_k: usize) -> Result<Vec<Passage>> {
            Ok((0..top_k)
                .map(|i| Passage {
                    source: format!("{collection:?}"),
                    text: format!("{query} #{i}"),
                    score: 1.0,
                })
                .collect())
        }
    }

    fn passage(text: &str) -> Passage {
        Passage {
            source: "osce".into(),
            text: text.into(),
            score: 0.9,
        }
    }

    #[tokio::test]
    async fn test_timeout_degrades_to_empty() {
        let passages = retrieve_bounded(
            &SlowGateway,
            Collection::PatientProfile,
            "sleep",
            3,
            Duration::from_millis(200),
        )
        .await;
        assert!(passages.is_empty());
    }

    #[tokio::test]
    async fn test_error_degrades_to_empty() {
        let bundle = ReferenceBundle::gather(&FailingGateway, "sleep", 3, Duration::from_secs(1)).await;
        assert_eq!(bundle, ReferenceBundle::default());
    }

    #[tokio::test]
    async fn test_gather_fills_both_collections() {
        let bundle = ReferenceBundle::gather(&EchoGateway, "washing", 2, Duration::from_secs(1)).await;
        assert_eq!(bundle.patient_context.len(), 2);
        assert_eq!(bundle.medical_context[0].source, "MedicalKnowledge");
    }

    #[test]
    fn test_render_passages() {
        assert_eq!(render_passages(&[]), "None available.");
        assert_eq!(
            render_passages(&[passage("  Ask about onset. ")]),
            "- [osce] Ask about onset."
        );
    }

    #[test]
    fn test_search_response_deserialization_defaults_score() {
        let body: SearchResponse =
            serde_json::from_str(r#"{"passages": [{"source": "toolkit", "text": "PHQ-9"}]}"#).unwrap();
        assert_eq!(body.passages[0].score, 0.0);
    }
}
