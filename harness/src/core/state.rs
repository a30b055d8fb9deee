//! Task state carried through one question's generate-execute-critique
//! lifecycle.
//!
//! These types are the stable contract between the iteration controller
//! and the service adapters. They hold no I/O handles and every task-level
//! failure mode is data here, not an error type: the controller folds
//! malformed answers, runtime failures, and unparsable output back into
//! the state to drive the critique branch.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Which retrieval corpus the run draws context from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RetrieverKind {
    /// Raw source-code chunks.
    Code,
    /// Hand-written documentation chunks.
    Doc,
    /// LLM-generated per-function documentation.
    LlmDoc,
    /// LLM-generated documentation over the full module tree.
    LlmDocFull,
}

/// Role tag on a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of the accumulated conversation memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Tagged outcome of one sandboxed run, after format pre-validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionResult {
    /// The sandbox ran the code to completion (possibly with a non-zero
    /// exit recorded in stderr).
    Success { stdout: String, stderr: String },
    /// The generation did not match the required answer envelope; the
    /// sandbox was never called.
    MalformedAnswer { reason: String },
    /// The sandbox mechanism itself reported a failure.
    RuntimeFailure { message: String },
}

impl ExecutionResult {
    /// Hard failures skip the critique model call; their payload is the
    /// critique.
    pub fn hard_failure_text(&self) -> Option<&str> {
        match self {
            ExecutionResult::MalformedAnswer { reason } => Some(reason),
            ExecutionResult::RuntimeFailure { message } => Some(message),
            ExecutionResult::Success { .. } => None,
        }
    }
}

/// Critique carried into the next iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Critique {
    /// Tag extraction succeeded: actionable feedback plus a replacement
    /// retrieval query.
    Structured { feedback: String, next_query: String },
    /// Raw critique text from the model, tag extraction notwithstanding.
    Text(String),
    /// Hard-failure payload reused verbatim; no model call was made.
    Failure(String),
}

impl Critique {
    /// Query the next retrieval should run with, if the critique suggests
    /// one. Unstructured model critiques are themselves used as the
    /// query; hard-failure payloads are boilerplate and never redirect
    /// retrieval.
    pub fn retrieval_query(&self) -> Option<&str> {
        match self {
            Critique::Structured { next_query, .. } => Some(next_query),
            Critique::Text(text) => Some(text),
            Critique::Failure(_) => None,
        }
    }
}

/// Mutable record threading one question through the iteration loop.
///
/// `memory` is append-only: each iteration derives a new vector from the
/// previous one rather than mutating shared state, so transitions stay
/// auditable in tests.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskState {
    pub question: String,
    pub retriever_kind: RetrieverKind,
    /// Retrieved passages joined with the context separator. Always set
    /// before the first generation runs.
    pub context: String,
    /// Latest raw generation, after format checking.
    pub answer: String,
    pub memory: Vec<ChatMessage>,
    /// Absent on the first iteration.
    pub execution: Option<ExecutionResult>,
    pub critique: Option<Critique>,
}

impl TaskState {
    pub fn new(question: impl Into<String>, retriever_kind: RetrieverKind) -> Self {
        Self {
            question: question.into(),
            retriever_kind,
            context: String::new(),
            answer: String::new(),
            memory: Vec::new(),
            execution: None,
            critique: None,
        }
    }
}
