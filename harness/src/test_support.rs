//! Test-only scripted doubles for the three service boundaries.
//!
//! Scripted services consume a reply queue in call order; when only one
//! entry remains it repeats forever, which keeps exhaustion tests short.
//! An empty queue makes every call fail, standing in for an unreachable
//! service.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{Result, anyhow};

use crate::core::state::ChatMessage;
use crate::io::generate::Generator;
use crate::io::retrieve::{Passage, Retriever};
use crate::io::sandbox::{ExecOutcome, Sandbox};

/// Build a well-formed answer envelope around code and entry-point name.
pub fn answer(code: &str, name: &str) -> String {
    format!("<answer>\n<code>\n```python\n{code}\n```\n</code>\n<name>{name}</name>\n</answer>")
}

/// Generator returning scripted replies and recording every request.
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every conversation passed to `complete`, in call order.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl Generator for ScriptedGenerator {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(messages.to_vec());
        let mut replies = self.replies.lock().expect("replies lock");
        match replies.len() {
            0 => Err(anyhow!("scripted generator has no reply")),
            1 => Ok(replies.front().expect("one reply").clone()),
            _ => Ok(replies.pop_front().expect("non-empty queue")),
        }
    }
}

/// Retriever returning a fixed passage set and recording queries.
pub struct ScriptedRetriever {
    passages: Vec<Passage>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedRetriever {
    pub fn new(passages: Vec<Passage>) -> Self {
        Self {
            passages,
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Single passage with empty metadata.
    pub fn with_passage(content: &str) -> Self {
        Self::new(vec![Passage {
            content: content.to_string(),
            metadata: Default::default(),
        }])
    }

    /// Every query passed to `search`, in call order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().expect("queries lock").clone()
    }
}

impl Retriever for ScriptedRetriever {
    fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>> {
        self.queries
            .lock()
            .expect("queries lock")
            .push(query.to_string());
        Ok(self.passages.iter().take(top_k).cloned().collect())
    }
}

/// Sandbox returning scripted outcomes and counting invocations.
pub struct ScriptedSandbox {
    outcomes: Mutex<VecDeque<ExecOutcome>>,
    calls: Mutex<u32>,
}

impl ScriptedSandbox {
    pub fn new(outcomes: Vec<ExecOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        *self.calls.lock().expect("calls lock")
    }
}

impl Sandbox for ScriptedSandbox {
    fn execute(&self, _code: &str, _entry_point: &str) -> Result<ExecOutcome> {
        *self.calls.lock().expect("calls lock") += 1;
        let mut outcomes = self.outcomes.lock().expect("outcomes lock");
        match outcomes.len() {
            0 => Err(anyhow!("scripted sandbox has no outcome")),
            1 => Ok(outcomes.front().expect("one outcome").clone()),
            _ => Ok(outcomes.pop_front().expect("non-empty queue")),
        }
    }
}
