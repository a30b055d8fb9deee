//! Parser for printed execution results.
//!
//! Generated functions print a Python-literal-like mapping that may embed
//! two non-literal constructor forms: numeric-array calls
//! (`array(...)` / `np.array(...)`, optionally with a `dtype=` annotation)
//! and element constructors (`Element('Mg')` or bare `Element Mg`). A
//! literal-only evaluator cannot read those directly, so parsing runs in
//! two substitution passes: each constructor occurrence is evaluated
//! eagerly, stashed in a per-call placeholder table, and replaced by a
//! quoted placeholder token; the placeholder-free text is then evaluated
//! as pure literal syntax and the tree is walked to restore every
//! placeholder to its recorded value.
//!
//! Arrays are extracted before elements: an array argument list could
//! otherwise be mis-tokenized as an element reference. Array calls nest
//! (`np.array([[1, 2], [3, 4]])`), so the matching close parenthesis is
//! found by explicit depth counting rather than a regex.

use std::collections::HashMap;
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::debug;

use crate::core::value::{Value, evaluate_literal};

/// Leftmost occurrence of either array form. The namespaced form starts
/// three characters before its embedded bare form, so leftmost matching
/// picks it first and the bare pattern never splits an `np.array(` call.
static ARRAY_CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"np\.array\(|array\(").expect("array pattern is valid"));

/// `dtype=` keyword argument, including an extended-precision tag such as
/// `float128`. Normalized away: the values are always read as f64.
static DTYPE_KWARG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*,\s*dtype\s*=\s*[A-Za-z0-9_.]+").expect("dtype pattern is valid")
});

/// `Element('X')` / `Element("X")` constructor form.
static ELEMENT_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"Element\(\s*['"](\w+)['"]\s*\)"#).expect("element call pattern is valid")
});

/// Bare `Element X` juxtaposition form, as repr output sometimes prints it.
static ELEMENT_BARE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Element\s+(\w+)").expect("element bare pattern is valid"));

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^__(?:ARRAY|ELEMENT)_\d+__$").expect("placeholder pattern is valid")
});

/// Parse one line of printed output into a [`Value`] tree.
///
/// Pure function: placeholder state lives in a table created per call, so
/// concurrent parses never collide. On success no placeholder token
/// remains anywhere in the tree; on failure no partial tree is returned.
pub fn parse_output(input: &str) -> Result<Value> {
    let mut table = PlaceholderTable::default();
    let substituted = extract_arrays(input, &mut table);
    let substituted = extract_elements(&substituted, &mut table);
    debug!(original = input, substituted = %substituted, "evaluating substituted output");
    let tree = evaluate_literal(&substituted).with_context(|| {
        format!("literal evaluation failed for {input:?} (substituted: {substituted:?})")
    })?;
    restore(tree, &table)
}

/// True when a string is one of the parser's internal placeholder tokens.
/// Exposed for leakage assertions in tests.
pub fn is_placeholder(text: &str) -> bool {
    PLACEHOLDER_RE.is_match(text)
}

#[derive(Debug, Default)]
struct PlaceholderTable {
    counter: usize,
    elements: HashMap<String, String>,
    arrays: HashMap<String, Value>,
}

impl PlaceholderTable {
    fn mint(&mut self, prefix: &str) -> String {
        let token = format!("__{prefix}_{}__", self.counter);
        self.counter += 1;
        token
    }
}

/// First pass: replace every array constructor call with a quoted
/// placeholder, recording the evaluated array under it.
///
/// Best effort per occurrence: an unmatched parenthesis or an argument the
/// literal evaluator rejects skips that occurrence and the scan continues
/// one character past it. The leftover text then fails literal evaluation
/// later, which is the hard-failure path.
fn extract_arrays(input: &str, table: &mut PlaceholderTable) -> String {
    let mut result = input.to_string();
    let mut search_from = 0;
    while search_from < result.len() {
        let Some(found) = ARRAY_CALL_RE.find(&result[search_from..]) else {
            break;
        };
        let start = search_from + found.start();
        let open_paren = search_from + found.end() - 1;
        let Some(close_paren) = matching_parenthesis(&result, open_paren) else {
            debug!(offset = start, "unmatched parenthesis in array call, skipping");
            search_from = start + 1;
            continue;
        };

        let argument = &result[open_paren + 1..close_paren];
        let normalized = DTYPE_KWARG_RE.replace_all(argument, "");
        match evaluate_literal(&normalized).map(coerce_to_floats) {
            Ok(array) => {
                let token = table.mint("ARRAY");
                let replacement = format!("'{token}'");
                table.arrays.insert(token, array);
                result.replace_range(start..=close_paren, &replacement);
                search_from = start + replacement.len();
            }
            Err(err) => {
                debug!(offset = start, %err, "unevaluable array argument, skipping");
                search_from = start + 1;
            }
        }
    }
    result
}

/// Second pass: replace element constructors with quoted placeholders,
/// keeping a running offset since the replacement length differs from the
/// matched length.
fn extract_elements(input: &str, table: &mut PlaceholderTable) -> String {
    let mut result = input.to_string();
    for pattern in [&*ELEMENT_CALL_RE, &*ELEMENT_BARE_RE] {
        let matches: Vec<(usize, usize, String)> = pattern
            .captures_iter(&result)
            .map(|caps| {
                let whole = caps.get(0).expect("capture 0 always present");
                let symbol = caps.get(1).expect("symbol group present").as_str();
                (whole.start(), whole.end(), symbol.to_string())
            })
            .collect();

        let mut offset = 0i64;
        for (start, end, symbol) in matches {
            let start = (start as i64 + offset) as usize;
            let end = (end as i64 + offset) as usize;
            let token = table.mint("ELEMENT");
            let replacement = format!("'{token}'");
            table.elements.insert(token, symbol);
            result.replace_range(start..end, &replacement);
            offset += replacement.len() as i64 - (end - start) as i64;
        }
    }
    result
}

/// Scan forward from the opening parenthesis at `open` to its matching
/// close, counting nesting depth. Returns `None` when the input ends with
/// the parenthesis still open.
fn matching_parenthesis(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 1usize;
    let mut pos = open + 1;
    while pos < bytes.len() {
        match bytes[pos] {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(pos);
                }
            }
            _ => {}
        }
        pos += 1;
    }
    None
}

/// Normalize an evaluated array argument into nested float lists.
fn coerce_to_floats(value: Value) -> Value {
    match value {
        Value::Int(n) => Value::Float(n as f64),
        Value::List(items) => Value::List(items.into_iter().map(coerce_to_floats).collect()),
        other => other,
    }
}

/// Final pass: swap every placeholder string for its recorded value,
/// descending through dict keys, dict values, and list elements. A
/// placeholder-shaped string with no table entry fails the whole parse.
fn restore(value: Value, table: &PlaceholderTable) -> Result<Value> {
    match value {
        Value::Str(s) => {
            if let Some(symbol) = table.elements.get(&s) {
                return Ok(Value::Element(symbol.clone()));
            }
            if let Some(array) = table.arrays.get(&s) {
                return Ok(array.clone());
            }
            if is_placeholder(&s) {
                bail!("unresolved placeholder {s:?} in parsed tree");
            }
            Ok(Value::Str(s))
        }
        Value::List(items) => {
            let restored: Result<Vec<Value>> =
                items.into_iter().map(|item| restore(item, table)).collect();
            Ok(Value::List(restored?))
        }
        Value::Dict(entries) => {
            let mut restored = Vec::with_capacity(entries.len());
            for (key, val) in entries {
                restored.push((restore(key, table)?, restore(val, table)?));
            }
            Ok(Value::Dict(restored))
        }
        other => Ok(other),
    }
}
