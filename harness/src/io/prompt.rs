//! Prompt rendering for the generation service.
//!
//! Templates are embedded at compile time and rendered through one
//! minijinja environment. There are three initial-prompt variants keyed by
//! retriever kind, a follow-up turn for retries, and the two corrective
//! format-checker prompts.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::state::RetrieverKind;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const USER_CODE_TEMPLATE: &str = include_str!("prompts/user_code.md");
const USER_DOC_TEMPLATE: &str = include_str!("prompts/user_doc.md");
const USER_LLM_DOC_TEMPLATE: &str = include_str!("prompts/user_llm_doc.md");
const FOLLOWUP_TEMPLATE: &str = include_str!("prompts/followup.md");
const FORMAT_CHECKER_TEMPLATE: &str = include_str!("prompts/format_checker.md");
const CRITIC_TEMPLATE: &str = include_str!("prompts/critic.md");
const CRITIC_FORMAT_CHECKER_TEMPLATE: &str = include_str!("prompts/critic_format_checker.md");

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        let templates = [
            ("system", SYSTEM_TEMPLATE),
            ("user_code", USER_CODE_TEMPLATE),
            ("user_doc", USER_DOC_TEMPLATE),
            ("user_llm_doc", USER_LLM_DOC_TEMPLATE),
            ("followup", FOLLOWUP_TEMPLATE),
            ("format_checker", FORMAT_CHECKER_TEMPLATE),
            ("critic", CRITIC_TEMPLATE),
            ("critic_format_checker", CRITIC_FORMAT_CHECKER_TEMPLATE),
        ];
        for (name, source) in templates {
            env.add_template(name, source)
                .expect("embedded template should be valid");
        }
        Self { env }
    }

    /// System prompt establishing the answer envelope contract.
    pub fn system(&self) -> Result<String> {
        let template = self.env.get_template("system")?;
        Ok(template.render(context! {})?)
    }

    /// Initial user prompt; the template variant is keyed by retriever
    /// kind.
    pub fn initial_user(
        &self,
        kind: RetrieverKind,
        question: &str,
        retrieved_context: &str,
    ) -> Result<String> {
        let name = match kind {
            RetrieverKind::Code => "user_code",
            RetrieverKind::Doc => "user_doc",
            RetrieverKind::LlmDoc | RetrieverKind::LlmDocFull => "user_llm_doc",
        };
        let template = self.env.get_template(name)?;
        let rendered = template
            .render(context! { question, context => retrieved_context })
            .with_context(|| format!("render {name} template"))?;
        Ok(rendered)
    }

    /// Follow-up user turn appended to the conversation memory on retries.
    pub fn followup(
        &self,
        runtime_output: &str,
        feedback: Option<&str>,
        retrieved_context: Option<&str>,
    ) -> Result<String> {
        let template = self.env.get_template("followup")?;
        let rendered = template.render(context! {
            runtime_output,
            feedback => feedback.map(str::trim).filter(|s| !s.is_empty()),
            context => retrieved_context.map(str::trim).filter(|s| !s.is_empty()),
        })?;
        Ok(rendered)
    }

    /// Corrective prompt normalizing an answer into the envelope format.
    pub fn format_checker(&self, answer: &str) -> Result<String> {
        let template = self.env.get_template("format_checker")?;
        Ok(template.render(context! { answer })?)
    }

    /// Critique prompt over the question, answer, and serialized
    /// execution result.
    pub fn critic(&self, question: &str, answer: &str, runtime_output: &str) -> Result<String> {
        let template = self.env.get_template("critic")?;
        Ok(template.render(context! { question, answer, runtime_output })?)
    }

    /// Corrective prompt normalizing a critique into its tag pair.
    pub fn critic_format_checker(&self, content: &str) -> Result<String> {
        let template = self.env.get_template("critic_format_checker")?;
        Ok(template.render(context! { content })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_user_varies_by_retriever_kind() {
        let engine = PromptEngine::new();
        let code = engine
            .initial_user(RetrieverKind::Code, "q", "ctx")
            .expect("render");
        let doc = engine
            .initial_user(RetrieverKind::Doc, "q", "ctx")
            .expect("render");
        let llm_doc = engine
            .initial_user(RetrieverKind::LlmDocFull, "q", "ctx")
            .expect("render");
        assert!(code.contains("code segments"));
        assert!(doc.contains("documentation passages"));
        assert!(llm_doc.contains("generated documentation"));
        for rendered in [&code, &doc, &llm_doc] {
            assert!(rendered.contains("q"));
            assert!(rendered.contains("ctx"));
        }
    }

    #[test]
    fn followup_omits_empty_sections() {
        let engine = PromptEngine::new();
        let with_all = engine
            .followup("{'stdout': ''}", Some("fix the units"), Some("new ctx"))
            .expect("render");
        assert!(with_all.contains("Suggestions from critic agent:"));
        assert!(with_all.contains("New retrieved content from critic agent:"));

        let bare = engine.followup("boom", None, None).expect("render");
        assert!(bare.contains("Runtime output of the code:\nboom"));
        assert!(!bare.contains("Suggestions from critic agent:"));
        assert!(!bare.contains("New retrieved content from critic agent:"));
    }

    #[test]
    fn system_prompt_spells_out_envelope() {
        let engine = PromptEngine::new();
        let system = engine.system().expect("render");
        assert!(system.contains("<answer>"));
        assert!(system.contains("```python"));
        assert!(system.contains("<name>"));
    }

    #[test]
    fn critic_prompt_demands_tag_pair() {
        let engine = PromptEngine::new();
        let critic = engine.critic("q", "a", "out").expect("render");
        assert!(critic.contains("<feedback>"));
        assert!(critic.contains("<next_rag_retrieval>"));
    }
}
