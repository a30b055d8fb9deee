//! Tag-grammar extraction for generated answers and critiques.
//!
//! The generation service is instructed to wrap its code in a strict
//! envelope and its critiques in a feedback/next-retrieval pair. Both are
//! extracted with anchored regexes over the raw completion text; absence
//! of a required tag is a classification result, not an error.

use std::sync::LazyLock;

use regex::Regex;

/// Required answer envelope, spelled out verbatim in failure feedback so
/// the model can correct itself on the next iteration.
pub const ANSWER_FORMAT_HELP: &str = "The response format is incorrect.\n\
The response format should be as follows:\n\
<answer>\n<code>\n```python\n# The generated function code\ndef example_function():\n    pass\n```\n</code>\n\
<name>name_of_generated_function</name>\n</answer>";

static CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<code>\s*```python\s*(.*?)```\s*</code>").expect("code pattern is valid")
});

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<name>(.*?)</name>").expect("name pattern is valid"));

static FEEDBACK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<feedback>(.*?)</feedback>").expect("feedback pattern is valid")
});

static NEXT_RETRIEVAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<next_rag_retrieval>(.*?)</next_rag_retrieval>")
        .expect("next retrieval pattern is valid")
});

/// Code and entry-point name extracted from a well-formed answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerParts {
    pub code: String,
    pub entry_point: String,
}

/// Extract the fenced code block and function name from an answer
/// envelope. `None` when either tag is missing or empty.
pub fn extract_answer(response: &str) -> Option<AnswerParts> {
    let code = CODE_RE.captures(response)?.get(1)?.as_str().trim().to_string();
    let entry_point = NAME_RE.captures(response)?.get(1)?.as_str().trim().to_string();
    if code.is_empty() || entry_point.is_empty() {
        return None;
    }
    Some(AnswerParts { code, entry_point })
}

/// Extract a structured `{feedback, next_query}` pair from a critique.
/// `None` when either tag is missing, which downgrades the critique to
/// unstructured text at the call site.
pub fn extract_critique(response: &str) -> Option<(String, String)> {
    let feedback = FEEDBACK_RE.captures(response)?.get(1)?.as_str().trim().to_string();
    let next_query = NEXT_RETRIEVAL_RE
        .captures(response)?
        .get(1)?
        .as_str()
        .trim()
        .to_string();
    Some((feedback, next_query))
}

#[cfg(test)]
mod tests {
    use super::*;

    const WELL_FORMED: &str = "<answer>\n<code>\n```python\ndef get_gap():\n    return {'gap': 1.2}\n```\n</code>\n<name>get_gap</name>\n</answer>";

    #[test]
    fn extracts_code_and_name() {
        let parts = extract_answer(WELL_FORMED).expect("well-formed answer");
        assert_eq!(parts.entry_point, "get_gap");
        assert!(parts.code.starts_with("def get_gap():"));
        assert!(parts.code.ends_with("return {'gap': 1.2}"));
    }

    #[test]
    fn missing_name_tag_is_malformed() {
        let response = "<answer><code>\n```python\ndef f():\n    pass\n```\n</code></answer>";
        assert_eq!(extract_answer(response), None);
    }

    #[test]
    fn missing_code_fence_is_malformed() {
        let response = "<answer><code>def f(): pass</code><name>f</name></answer>";
        assert_eq!(extract_answer(response), None);
    }

    #[test]
    fn extracts_structured_critique() {
        let response = "<feedback>The function ignores spin polarization.</feedback>\n\
                        <next_rag_retrieval>spin polarized defect formation energy</next_rag_retrieval>";
        let (feedback, next_query) = extract_critique(response).expect("structured critique");
        assert_eq!(feedback, "The function ignores spin polarization.");
        assert_eq!(next_query, "spin polarized defect formation energy");
    }

    #[test]
    fn missing_critique_tag_degrades() {
        assert_eq!(extract_critique("just some prose feedback"), None);
        assert_eq!(
            extract_critique("<feedback>only feedback, no retrieval</feedback>"),
            None
        );
    }
}
