//! Retrieval service client and context assembly.
//!
//! The [`Retriever`] trait hides the vector-similarity backend; the
//! concrete adapter posts `{query, top_k}` to an HTTP endpoint and reads
//! back scored passages with metadata. Turning passages into a prompt
//! context block is pure and lives here so the per-kind metadata prefixes
//! stay next to the passage shape they read.

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::state::RetrieverKind;

/// Separator between passages in an assembled context block.
pub const CONTEXT_SEPARATOR: &str = "\n\n---------------------------------\n\n";

/// One retrieved passage with backend metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Abstraction over vector-similarity backends.
pub trait Retriever {
    /// Return the `top_k` most relevant passages for the query.
    fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>>;
}

/// HTTP retrieval client with bounded retry.
pub struct HttpRetriever {
    client: reqwest::blocking::Client,
    endpoint: String,
    max_retries: u32,
    retry_delay: Duration,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    top_k: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    passages: Vec<Passage>,
}

impl HttpRetriever {
    pub fn new(endpoint: impl Into<String>, max_retries: u32) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            max_retries,
            retry_delay: Duration::from_secs(1),
        })
    }

    fn request_once(&self, query: &str, top_k: usize) -> Result<Vec<Passage>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&SearchRequest { query, top_k })
            .send()
            .context("send retrieval request")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(anyhow!("retrieval endpoint returned {status}: {text}"));
        }
        let parsed: SearchResponse = response.json().context("parse retrieval response")?;
        Ok(parsed.passages)
    }
}

impl Retriever for HttpRetriever {
    #[instrument(skip_all, fields(top_k))]
    fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>> {
        let attempts = self.max_retries.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match self.request_once(query, top_k) {
                Ok(passages) => {
                    debug!(attempt, count = passages.len(), "passages retrieved");
                    return Ok(passages);
                }
                Err(err) => {
                    warn!(attempt, %err, "retrieval request failed");
                    last_err = Some(err);
                    if attempt < attempts {
                        thread::sleep(self.retry_delay);
                    }
                }
            }
        }
        Err(last_err.expect("at least one attempt ran"))
            .context("retrieval endpoint unreachable after retries")
    }
}

/// Join passages into one context block, prefixing each with the metadata
/// lines the retriever kind carries.
pub fn build_context(kind: RetrieverKind, passages: &[Passage]) -> String {
    let blocks: Vec<String> = passages
        .iter()
        .map(|passage| {
            let mut lines = metadata_prefix(kind, &passage.metadata);
            lines.push(passage.content.clone());
            lines.join("\n")
        })
        .collect();
    blocks.join(CONTEXT_SEPARATOR)
}

fn metadata_prefix(kind: RetrieverKind, metadata: &BTreeMap<String, String>) -> Vec<String> {
    let field = |key: &str| metadata.get(key).map(String::as_str).unwrap_or("None");
    match kind {
        RetrieverKind::Code => vec![
            format!("This code belongs to the module: {}", field("source")),
            format!(
                "The top-level function or class of this code: {}",
                field("first_function_or_class")
            ),
        ],
        RetrieverKind::Doc => vec![format!("Source of this document: {}", field("title"))],
        RetrieverKind::LlmDoc | RetrieverKind::LlmDocFull => vec![format!(
            "Source of this document: {}",
            field("code_source_file")
        )],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(content: &str, pairs: &[(&str, &str)]) -> Passage {
        Passage {
            content: content.to_string(),
            metadata: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn code_context_carries_module_and_symbol() {
        let passages = vec![passage(
            "def band_gap(): ...",
            &[
                ("source", "pymatgen/analysis/defects.py"),
                ("first_function_or_class", "band_gap"),
            ],
        )];
        let context = build_context(RetrieverKind::Code, &passages);
        assert!(context.starts_with("This code belongs to the module: pymatgen/analysis/defects.py\n"));
        assert!(context.contains("The top-level function or class of this code: band_gap\n"));
        assert!(context.ends_with("def band_gap(): ..."));
    }

    #[test]
    fn doc_context_uses_title() {
        let passages = vec![
            passage("first", &[("title", "Defect thermodynamics")]),
            passage("second", &[("title", "Charge corrections")]),
        ];
        let context = build_context(RetrieverKind::Doc, &passages);
        assert!(context.contains("Source of this document: Defect thermodynamics"));
        assert!(context.contains(CONTEXT_SEPARATOR));
        assert!(context.contains("Source of this document: Charge corrections"));
    }

    #[test]
    fn missing_metadata_falls_back_to_none() {
        let passages = vec![passage("text", &[])];
        let context = build_context(RetrieverKind::LlmDoc, &passages);
        assert!(context.starts_with("Source of this document: None\n"));
    }

    #[test]
    fn final_failed_attempt_returns_without_delay() {
        let retriever =
            HttpRetriever::new("http://127.0.0.1:9/search", 1).expect("build client");
        let started = std::time::Instant::now();
        let err = retriever.search("q", 5).expect_err("endpoint is unreachable");
        assert!(started.elapsed() < retriever.retry_delay);
        assert!(format!("{err:#}").contains("unreachable after retries"));
    }

    #[test]
    fn search_response_shape_parses() {
        let raw = r#"{"passages": [{"content": "body", "metadata": {"title": "t"}}]}"#;
        let parsed: SearchResponse = serde_json::from_str(raw).expect("parse");
        assert_eq!(parsed.passages[0].content, "body");
        assert_eq!(parsed.passages[0].metadata["title"], "t");
    }
}
