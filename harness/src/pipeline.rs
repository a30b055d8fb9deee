//! Iteration controller: drives one question through the
//! retrieve-generate-validate-execute-critique cycle.
//!
//! Task-level failures (malformed answers, runtime errors, unparsable
//! output, null fields) never escape this loop as errors; they are folded
//! into the [`TaskState`] and drive the critique branch. Only service
//! adapter failures propagate as `Err` and abort the question.

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::envelope::{ANSWER_FORMAT_HELP, extract_answer, extract_critique};
use crate::core::parser::parse_output;
use crate::core::state::{ChatMessage, Critique, ExecutionResult, RetrieverKind, TaskState};
use crate::core::value::Value;
use crate::io::config::HarnessConfig;
use crate::io::generate::Generator;
use crate::io::prompt::PromptEngine;
use crate::io::retrieve::{Retriever, build_context};
use crate::io::sandbox::{ExecOutcome, Sandbox};

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStop {
    /// Execution output parsed to a mapping with every value non-null.
    Succeeded { iterations: u32, parsed: Value },
    /// The iteration budget ran out. Normal terminal state, not an error.
    Exhausted { iterations: u32 },
}

/// Final state of one question's run.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub state: TaskState,
    pub stop: TaskStop,
}

impl TaskOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.stop, TaskStop::Succeeded { .. })
    }
}

/// Run one question for at most `config.max_iterations` iterations.
#[instrument(skip_all, fields(kind = ?kind, max_iterations = config.max_iterations))]
pub fn run_task<G: Generator, R: Retriever, S: Sandbox>(
    question: &str,
    kind: RetrieverKind,
    config: &HarnessConfig,
    generator: &G,
    retriever: &R,
    sandbox: &S,
) -> Result<TaskOutcome> {
    let engine = PromptEngine::new();
    let mut state = TaskState::new(question, kind);

    for iteration in 1..=config.max_iterations {
        info!(iteration, "iteration started");

        let freshly_retrieved = retrieve(&mut state, iteration, config, retriever)?;
        generate(&mut state, freshly_retrieved, &engine, generator)?;
        let execution = execute(&state, sandbox)?;
        state.execution = Some(execution);

        if let Some(parsed) = accepted_result(&state) {
            info!(iteration, "demanded answer reached");
            return Ok(TaskOutcome {
                state,
                stop: TaskStop::Succeeded {
                    iterations: iteration,
                    parsed,
                },
            });
        }

        if iteration < config.max_iterations {
            let critique = critique(&state, &engine, generator)?;
            debug!(?critique, "critique recorded");
            state.critique = Some(critique);
        }
    }

    warn!(iterations = config.max_iterations, "iteration budget exhausted");
    Ok(TaskOutcome {
        state,
        stop: TaskStop::Exhausted {
            iterations: config.max_iterations,
        },
    })
}

/// Re-run retrieval when there is a query to run with: the critique's
/// suggestion, or the original question on the first iteration. After a
/// hard failure, and with no critique on a later iteration, the stored
/// context carries forward unchanged. Returns whether the context was
/// refreshed this iteration.
fn retrieve<R: Retriever>(
    state: &mut TaskState,
    iteration: u32,
    config: &HarnessConfig,
    retriever: &R,
) -> Result<bool> {
    let query = match &state.critique {
        Some(critique) => match critique.retrieval_query() {
            Some(query) => query.to_string(),
            None => return Ok(false),
        },
        None if iteration == 1 => state.question.clone(),
        None => return Ok(false),
    };
    let passages = retriever
        .search(&query, config.top_k)
        .context("retrieval service")?;
    debug!(count = passages.len(), "context refreshed");
    state.context = build_context(state.retriever_kind, &passages);
    Ok(true)
}

/// Request a completion: a fresh two-message prompt on the first attempt,
/// or a follow-up turn appended to the accumulated memory on retries.
/// The reply is format-checked and becomes the working answer.
fn generate<G: Generator>(
    state: &mut TaskState,
    freshly_retrieved: bool,
    engine: &PromptEngine,
    generator: &G,
) -> Result<()> {
    let first_attempt = state.execution.is_none() && state.critique.is_none();
    let request = if first_attempt {
        vec![
            ChatMessage::system(engine.system()?),
            ChatMessage::user(engine.initial_user(
                state.retriever_kind,
                &state.question,
                &state.context,
            )?),
        ]
    } else {
        let execution = state
            .execution
            .as_ref()
            .expect("retry iterations always follow an execution");
        // A hard execution failure overrides any critique text: the
        // follow-up then carries the failure payload alone.
        let (runtime_output, feedback) = match execution.hard_failure_text() {
            Some(failure) => (failure.to_string(), None),
            None => {
                let serialized = serde_json::to_string_pretty(execution)
                    .context("serialize execution result")?;
                let feedback = state.critique.as_ref().map(|critique| match critique {
                    Critique::Structured { feedback, .. } => feedback.clone(),
                    Critique::Text(text) | Critique::Failure(text) => text.clone(),
                });
                (serialized, feedback)
            }
        };
        let followup = engine.followup(
            &runtime_output,
            feedback.as_deref(),
            freshly_retrieved.then_some(state.context.as_str()),
        )?;
        // New vector derived from the previous memory, never mutated in
        // place, so each iteration's transition stays auditable.
        let mut request = state.memory.clone();
        request.push(ChatMessage::user(followup));
        request
    };

    let reply = generator
        .complete(&request)
        .context("generation service")?;

    let mut memory = request;
    memory.push(ChatMessage::assistant(reply.clone()));
    state.memory = memory;

    // Corrective format pass: its output replaces the working answer but
    // never fails the iteration.
    let checked = generator
        .complete(&[ChatMessage::user(engine.format_checker(&reply)?)])
        .context("generation service (format check)")?;
    state.answer = checked;
    Ok(())
}

/// Extract the envelope and run the code, classifying the outcome.
fn execute<S: Sandbox>(state: &TaskState, sandbox: &S) -> Result<ExecutionResult> {
    let Some(parts) = extract_answer(&state.answer) else {
        info!("answer did not match envelope, skipping execution");
        return Ok(ExecutionResult::MalformedAnswer {
            reason: ANSWER_FORMAT_HELP.to_string(),
        });
    };
    match sandbox
        .execute(&parts.code, &parts.entry_point)
        .context("execution sandbox")?
    {
        ExecOutcome::Output { stdout, stderr } => Ok(ExecutionResult::Success { stdout, stderr }),
        ExecOutcome::Failed(message) => Ok(ExecutionResult::RuntimeFailure { message }),
    }
}

/// The accepted parse of the latest execution, when there is one: stdout
/// parsed to a mapping with every value non-null. Anything else (hard
/// failure, empty output, parse failure, non-dict, null fields) needs
/// critique.
fn accepted_result(state: &TaskState) -> Option<Value> {
    let Some(ExecutionResult::Success { stdout, .. }) = &state.execution else {
        return None;
    };
    if stdout.trim().is_empty() {
        return None;
    }
    match parse_output(stdout) {
        Ok(parsed) => {
            let complete = parsed
                .as_dict()
                .is_some_and(|entries| entries.iter().all(|(_, value)| !value.is_none()));
            if complete {
                Some(parsed)
            } else {
                debug!("parsed output is not a fully populated mapping");
                None
            }
        }
        Err(err) => {
            debug!(%err, "execution output did not parse");
            None
        }
    }
}

/// Build the critique for the next iteration. Hard failures reuse their
/// payload verbatim without a model call; otherwise the critic reply is
/// format-checked and tag-extracted, degrading to raw text when the tags
/// are missing.
fn critique<G: Generator>(
    state: &TaskState,
    engine: &PromptEngine,
    generator: &G,
) -> Result<Critique> {
    let execution = state
        .execution
        .as_ref()
        .expect("critique always follows an execution");
    if let Some(failure) = execution.hard_failure_text() {
        return Ok(Critique::Failure(failure.to_string()));
    }

    let runtime_output =
        serde_json::to_string_pretty(execution).context("serialize execution result")?;
    let prompt = engine.critic(&state.question, &state.answer, &runtime_output)?;
    let reply = generator
        .complete(&[ChatMessage::user(prompt)])
        .context("generation service (critique)")?;
    let checked = generator
        .complete(&[ChatMessage::user(engine.critic_format_checker(&reply)?)])
        .context("generation service (critique format check)")?;
    match extract_critique(&checked) {
        Some((feedback, next_query)) => Ok(Critique::Structured {
            feedback,
            next_query,
        }),
        None => Ok(Critique::Text(checked)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedGenerator, ScriptedRetriever, ScriptedSandbox, answer};

    fn config() -> HarnessConfig {
        HarnessConfig::default()
    }

    fn output(stdout: &str) -> ExecOutcome {
        ExecOutcome::Output {
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    /// Well-formed answer, stdout parses to a complete mapping: the loop
    /// stops on iteration 1.
    #[test]
    fn success_on_first_iteration() {
        let good = answer("def f():\n    return {'a': 1}", "f");
        let generator = ScriptedGenerator::new(vec![good]);
        let retriever = ScriptedRetriever::with_passage("retrieved body");
        let sandbox = ScriptedSandbox::new(vec![output("{'a': 1}")]);

        let outcome = run_task(
            "what is a?",
            RetrieverKind::Code,
            &config(),
            &generator,
            &retriever,
            &sandbox,
        )
        .expect("run");

        match &outcome.stop {
            TaskStop::Succeeded { iterations, parsed } => {
                assert_eq!(*iterations, 1);
                assert_eq!(
                    *parsed,
                    Value::Dict(vec![(Value::Str("a".to_string()), Value::Int(1))])
                );
            }
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(retriever.queries(), vec!["what is a?".to_string()]);
        // Memory holds system + initial user + assistant reply.
        assert_eq!(outcome.state.memory.len(), 3);
    }

    /// Malformed answer on iteration 1, well-formed on iteration 2: the
    /// loop succeeds on iteration 2 and the follow-up prompt carries the
    /// iteration-1 failure content.
    #[test]
    fn retry_after_malformed_answer() {
        let good = answer("def f():\n    return {'a': 1}", "f");
        let generator = ScriptedGenerator::new(vec![
            "no tags here".to_string(),  // iteration 1 generation
            "still no tags".to_string(), // iteration 1 format check
            good.clone(),                // iteration 2 generation
            good,                        // iteration 2 format check
        ]);
        let retriever = ScriptedRetriever::with_passage("retrieved body");
        let sandbox = ScriptedSandbox::new(vec![output("{'a': 1}")]);

        let outcome = run_task(
            "q",
            RetrieverKind::Code,
            &config(),
            &generator,
            &retriever,
            &sandbox,
        )
        .expect("run");

        match &outcome.stop {
            TaskStop::Succeeded { iterations, .. } => assert_eq!(*iterations, 2),
            other => panic!("expected success on iteration 2, got {other:?}"),
        }

        // The iteration-2 generation request is the accumulated memory
        // plus a follow-up turn containing the format-failure payload.
        let calls = generator.calls();
        let retry_request = &calls[2];
        assert_eq!(retry_request.len(), 4); // system, user, assistant, follow-up
        let followup = &retry_request[3].content;
        assert!(followup.contains("The response format is incorrect."));

        // Hard failures never redirect retrieval: the only query is the
        // original question, and the stored context carries forward.
        assert_eq!(retriever.queries(), vec!["q".to_string()]);
        assert!(outcome.state.context.ends_with("retrieved body"));
    }

    /// Always-malformed answers: exactly the budget's worth of
    /// iterations, then a normal `Exhausted` return.
    #[test]
    fn budget_exhaustion_is_not_an_error() {
        let generator = ScriptedGenerator::new(vec!["never well-formed".to_string()]);
        let retriever = ScriptedRetriever::with_passage("retrieved body");
        let sandbox = ScriptedSandbox::new(vec![output("")]);

        let outcome = run_task(
            "q",
            RetrieverKind::Doc,
            &config(),
            &generator,
            &retriever,
            &sandbox,
        )
        .expect("exhaustion must not raise");

        assert_eq!(outcome.stop, TaskStop::Exhausted { iterations: 5 });
        assert!(!outcome.succeeded());
        // Malformed answers never reach the sandbox, and their canned
        // failure text is never used as a retrieval query.
        assert_eq!(sandbox.call_count(), 0);
        assert_eq!(retriever.queries().len(), 1);
    }

    /// Output parsing to a mapping with a null value is incomplete and
    /// keeps the loop going.
    #[test]
    fn null_field_needs_critique() {
        let good = answer("def f():\n    return {'a': None}", "f");
        let generator = ScriptedGenerator::new(vec![good]);
        let retriever = ScriptedRetriever::with_passage("retrieved body");
        let sandbox = ScriptedSandbox::new(vec![output("{'a': None}")]);

        let outcome = run_task(
            "q",
            RetrieverKind::LlmDoc,
            &config(),
            &generator,
            &retriever,
            &sandbox,
        )
        .expect("run");

        assert_eq!(outcome.stop, TaskStop::Exhausted { iterations: 5 });
        // Execution succeeded, so critiques came from the model path.
        assert!(matches!(
            outcome.state.execution,
            Some(ExecutionResult::Success { .. })
        ));
    }

    /// Non-dict output (a bare list) is not an accepted result.
    #[test]
    fn non_mapping_output_needs_critique() {
        let good = answer("def f():\n    return [1, 2]", "f");
        let generator = ScriptedGenerator::new(vec![good]);
        let retriever = ScriptedRetriever::with_passage("retrieved body");
        let sandbox = ScriptedSandbox::new(vec![output("[1, 2]")]);

        let outcome = run_task(
            "q",
            RetrieverKind::Code,
            &config(),
            &generator,
            &retriever,
            &sandbox,
        )
        .expect("run");
        assert_eq!(outcome.stop, TaskStop::Exhausted { iterations: 5 });
    }

    /// Sandbox mechanism failures are recoverable: classified as runtime
    /// failures and fed back, not raised.
    #[test]
    fn sandbox_failure_is_folded_into_state() {
        let good = answer("def f():\n    return {'a': 1}", "f");
        let generator = ScriptedGenerator::new(vec![good]);
        let retriever = ScriptedRetriever::with_passage("retrieved body");
        let sandbox = ScriptedSandbox::new(vec![ExecOutcome::Failed(
            "Docker error during execution: no such image".to_string(),
        )]);

        let outcome = run_task(
            "q",
            RetrieverKind::Code,
            &config(),
            &generator,
            &retriever,
            &sandbox,
        )
        .expect("run");

        assert_eq!(outcome.stop, TaskStop::Exhausted { iterations: 5 });
        assert!(matches!(
            outcome.state.execution,
            Some(ExecutionResult::RuntimeFailure { .. })
        ));
        // The failure payload was reused verbatim as the critique, and
        // being a hard failure it never reached the retriever.
        assert!(matches!(
            outcome.state.critique,
            Some(Critique::Failure(ref text)) if text.contains("no such image")
        ));
        assert_eq!(retriever.queries(), vec!["q".to_string()]);
    }

    /// A structured critique redirects the next retrieval to its
    /// suggested query.
    #[test]
    fn structured_critique_redirects_retrieval() {
        let incomplete = answer("def f():\n    return {'a': None}", "f");
        let complete = answer("def f():\n    return {'a': 1}", "f");
        let critique_reply = "<feedback>a is never computed</feedback>\
             <next_rag_retrieval>how to compute a</next_rag_retrieval>"
            .to_string();
        let generator = ScriptedGenerator::new(vec![
            incomplete.clone(),     // iteration 1 generation
            incomplete,             // iteration 1 format check
            critique_reply.clone(), // critic
            critique_reply,         // critic format check
            complete.clone(),       // iteration 2 generation
            complete,               // iteration 2 format check
        ]);
        let retriever = ScriptedRetriever::with_passage("retrieved body");
        let sandbox =
            ScriptedSandbox::new(vec![output("{'a': None}"), output("{'a': 1}")]);

        let outcome = run_task(
            "q",
            RetrieverKind::Code,
            &config(),
            &generator,
            &retriever,
            &sandbox,
        )
        .expect("run");

        assert!(outcome.succeeded());
        assert_eq!(
            retriever.queries(),
            vec!["q".to_string(), "how to compute a".to_string()]
        );
        // The iteration-2 follow-up carried the critic's feedback.
        let calls = generator.calls();
        let followup = &calls[4].last().expect("follow-up turn").content;
        assert!(followup.contains("a is never computed"));
        assert!(followup.contains("Runtime output of the code:"));
    }

    /// A generator transport failure is an infrastructure error and
    /// aborts the question.
    #[test]
    fn generator_failure_propagates() {
        let generator = ScriptedGenerator::new(Vec::new()); // always errors
        let retriever = ScriptedRetriever::with_passage("retrieved body");
        let sandbox = ScriptedSandbox::new(vec![output("{'a': 1}")]);

        let err = run_task(
            "q",
            RetrieverKind::Code,
            &config(),
            &generator,
            &retriever,
            &sandbox,
        )
        .expect_err("infrastructure failure must propagate");
        assert!(format!("{err:#}").contains("generation service"));
    }
}
