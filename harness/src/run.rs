//! Batch driver: process a directory of questions strictly sequentially
//! and persist one result record per question once the whole batch has
//! finished.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::envelope::extract_answer;
use crate::core::state::RetrieverKind;
use crate::io::config::HarnessConfig;
use crate::io::generate::Generator;
use crate::io::questions::discover_questions;
use crate::io::results::{ResultRecord, write_results};
use crate::io::retrieve::Retriever;
use crate::io::sandbox::Sandbox;
use crate::pipeline::{TaskOutcome, run_task};

/// Summary of one batch invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub questions: usize,
    pub succeeded: usize,
    pub exhausted: usize,
}

/// Run every question under `questions_dir` and write the JSONL result
/// file to `out_path`.
///
/// Task-level failures are recorded per question and the batch continues;
/// an infrastructure error (unreachable service, missing sandbox runtime)
/// aborts the whole batch.
#[instrument(skip_all, fields(kind = ?kind))]
pub fn run_batch<G: Generator, R: Retriever, S: Sandbox>(
    questions_dir: &Path,
    out_path: &Path,
    kind: RetrieverKind,
    config: &HarnessConfig,
    generator: &G,
    retriever: &R,
    sandbox: &S,
) -> Result<BatchSummary> {
    let questions = discover_questions(questions_dir)
        .with_context(|| format!("discover questions under {}", questions_dir.display()))?;
    info!(count = questions.len(), "batch started");

    let mut outcomes: Vec<(String, TaskOutcome)> = Vec::with_capacity(questions.len());
    for (index, question) in questions.iter().enumerate() {
        info!(
            index = index + 1,
            total = questions.len(),
            path = %question.path.display(),
            "processing question"
        );
        let outcome = run_task(&question.text, kind, config, generator, retriever, sandbox)
            .with_context(|| format!("question {}", question.path.display()))?;
        info!(succeeded = outcome.succeeded(), "question finished");
        outcomes.push((question.id(), outcome));
    }

    let records: Vec<ResultRecord> = outcomes
        .iter()
        .map(|(id, outcome)| to_record(id, outcome))
        .collect();
    write_results(out_path, &records)
        .with_context(|| format!("write results {}", out_path.display()))?;

    let succeeded = outcomes.iter().filter(|(_, o)| o.succeeded()).count();
    let summary = BatchSummary {
        questions: outcomes.len(),
        succeeded,
        exhausted: outcomes.len() - succeeded,
    };
    info!(?summary, "batch finished");
    Ok(summary)
}

/// Extract the function and name from the final answer; exhausted runs
/// whose last answer never matched the envelope record empty strings.
fn to_record(id: &str, outcome: &TaskOutcome) -> ResultRecord {
    let (function, function_name) = match extract_answer(&outcome.state.answer) {
        Some(parts) => (parts.code, parts.entry_point),
        None => (String::new(), String::new()),
    };
    ResultRecord {
        question_file_path: id.to_string(),
        function,
        function_name,
    }
}
