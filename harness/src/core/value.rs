//! Structured value tree recovered from sandboxed program output.
//!
//! [`Value`] models the Python-literal shapes a generated function may print:
//! scalars, ordered sequences, insertion-ordered mappings, plus the one
//! domain-specific scalar kind that must survive round-trip parsing: the
//! element tag (e.g. a chemical symbol). Numeric arrays are normalized into
//! nested float lists before they reach this tree.
//!
//! [`evaluate_literal`] is the safe replacement for a general-purpose
//! expression evaluator: it accepts literal syntax only (numbers, strings,
//! booleans, `None`, lists, tuples, dicts) and rejects identifiers and call
//! syntax outright, so parsing untrusted output can never execute anything.

use std::fmt;

use anyhow::{Result, bail};

/// A parsed value tree.
///
/// Dicts preserve insertion order; keys may be any value (element tags
/// legitimately appear as mapping keys).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    /// Domain-element tag. Distinct from `Str` so it is never silently
    /// coerced to plain text.
    Element(String),
}

impl Value {
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Dict entries, or `None` when the value is not a mapping.
    pub fn as_dict(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    /// Python-literal style rendering. For constructor-free trees this
    /// round-trips through the output parser.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Str(s) => write!(f, "'{}'", escape_single_quoted(s)),
            Value::Element(symbol) => write!(f, "Element('{symbol}')"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

fn escape_single_quoted(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Evaluate a string of pure literal syntax into a [`Value`].
///
/// Accepts what `ast.literal_eval` accepts minus bytes/sets/complex:
/// dicts, lists, tuples (read as lists), quoted strings, ints, floats with
/// scientific notation, `True`/`False`/`None`. Anything else fails.
pub fn evaluate_literal(input: &str) -> Result<Value> {
    let mut cursor = Cursor::new(input);
    cursor.skip_whitespace();
    let value = cursor.parse_value()?;
    cursor.skip_whitespace();
    if !cursor.at_end() {
        bail!(
            "trailing characters at offset {} in literal input",
            cursor.pos
        );
    }
    Ok(value)
}

struct Cursor<'a> {
    chars: Vec<char>,
    pos: usize,
    input: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            input,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        match self.bump() {
            Some(ch) if ch == expected => Ok(()),
            Some(ch) => bail!(
                "expected '{expected}' at offset {}, found '{ch}' in {:?}",
                self.pos - 1,
                self.input
            ),
            None => bail!("expected '{expected}', found end of input in {:?}", self.input),
        }
    }

    fn parse_value(&mut self) -> Result<Value> {
        self.skip_whitespace();
        match self.peek() {
            Some('{') => self.parse_dict(),
            Some('[') => self.parse_sequence(']'),
            Some('(') => self.parse_sequence(')'),
            Some('\'') | Some('"') => self.parse_string().map(Value::Str),
            Some(ch) if ch.is_ascii_digit() || ch == '-' || ch == '+' || ch == '.' => {
                self.parse_number()
            }
            Some(ch) if ch.is_alphabetic() => self.parse_keyword(),
            Some(ch) => bail!("unexpected character '{ch}' at offset {}", self.pos),
            None => bail!("unexpected end of input"),
        }
    }

    fn parse_dict(&mut self) -> Result<Value> {
        self.expect('{')?;
        let mut entries = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some('}') {
                self.pos += 1;
                return Ok(Value::Dict(entries));
            }
            let key = self.parse_value()?;
            self.skip_whitespace();
            self.expect(':')?;
            let value = self.parse_value()?;
            entries.push((key, value));
            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.pos += 1;
                }
                Some('}') => {}
                other => bail!("expected ',' or '}}' in dict, found {other:?}"),
            }
        }
    }

    /// Lists and tuples both parse to `Value::List`; the distinction does
    /// not survive printing anyway.
    fn parse_sequence(&mut self, close: char) -> Result<Value> {
        self.pos += 1; // opening bracket already peeked
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(Value::List(items));
            }
            items.push(self.parse_value()?);
            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.pos += 1;
                }
                Some(ch) if ch == close => {}
                other => bail!("expected ',' or '{close}' in sequence, found {other:?}"),
            }
        }
    }

    fn parse_string(&mut self) -> Result<String> {
        let quote = self.bump().expect("caller peeked a quote");
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('\\') => out.push('\\'),
                    Some('\'') => out.push('\''),
                    Some('"') => out.push('"'),
                    Some(ch) => {
                        // Unknown escape: keep verbatim, matching Python's
                        // lenient behavior for e.g. '\d'.
                        out.push('\\');
                        out.push(ch);
                    }
                    None => bail!("unterminated escape in string literal"),
                },
                Some(ch) if ch == quote => return Ok(out),
                Some(ch) => out.push(ch),
                None => bail!("unterminated string literal"),
            }
        }
    }

    fn parse_number(&mut self) -> Result<Value> {
        let start = self.pos;
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.pos += 1;
        }
        let mut is_float = false;
        while let Some(ch) = self.peek() {
            match ch {
                '0'..='9' | '_' => self.pos += 1,
                '.' => {
                    is_float = true;
                    self.pos += 1;
                }
                'e' | 'E' => {
                    is_float = true;
                    self.pos += 1;
                    if matches!(self.peek(), Some('-') | Some('+')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|&&ch| ch != '_')
            .collect();
        if text.is_empty() || text == "-" || text == "+" {
            bail!("malformed number at offset {start}");
        }
        if is_float {
            let parsed: f64 = text
                .parse()
                .map_err(|_| anyhow::anyhow!("malformed float {text:?} at offset {start}"))?;
            Ok(Value::Float(parsed))
        } else {
            match text.parse::<i64>() {
                Ok(parsed) => Ok(Value::Int(parsed)),
                // Integers beyond i64 degrade to float rather than failing.
                Err(_) => {
                    let parsed: f64 = text.parse().map_err(|_| {
                        anyhow::anyhow!("malformed number {text:?} at offset {start}")
                    })?;
                    Ok(Value::Float(parsed))
                }
            }
        }
    }

    fn parse_keyword(&mut self) -> Result<Value> {
        let start = self.pos;
        while self.peek().is_some_and(|ch| ch.is_alphanumeric() || ch == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        match word.as_str() {
            "True" => Ok(Value::Bool(true)),
            "False" => Ok(Value::Bool(false)),
            "None" => Ok(Value::None),
            // Printed by numpy for non-finite entries; accepted for
            // robustness since they appear in real stdout.
            "inf" => Ok(Value::Float(f64::INFINITY)),
            "nan" => Ok(Value::Float(f64::NAN)),
            other => bail!("identifier {other:?} is not literal syntax"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scalars() {
        assert_eq!(evaluate_literal("42").unwrap(), Value::Int(42));
        assert_eq!(evaluate_literal("-7").unwrap(), Value::Int(-7));
        assert_eq!(evaluate_literal("3.5").unwrap(), Value::Float(3.5));
        assert_eq!(
            evaluate_literal("6.97397183e-31").unwrap(),
            Value::Float(6.97397183e-31)
        );
        assert_eq!(evaluate_literal("True").unwrap(), Value::Bool(true));
        assert_eq!(evaluate_literal("False").unwrap(), Value::Bool(false));
        assert_eq!(evaluate_literal("None").unwrap(), Value::None);
        assert_eq!(
            evaluate_literal("'hello'").unwrap(),
            Value::Str("hello".to_string())
        );
        assert_eq!(
            evaluate_literal("\"hi\"").unwrap(),
            Value::Str("hi".to_string())
        );
    }

    #[test]
    fn parses_nested_containers() {
        let parsed = evaluate_literal("{'a': [1, 2.0, {'b': None}], 'c': (True, 'x')}").unwrap();
        let expected = Value::Dict(vec![
            (
                Value::Str("a".to_string()),
                Value::List(vec![
                    Value::Int(1),
                    Value::Float(2.0),
                    Value::Dict(vec![(Value::Str("b".to_string()), Value::None)]),
                ]),
            ),
            (
                Value::Str("c".to_string()),
                Value::List(vec![Value::Bool(true), Value::Str("x".to_string())]),
            ),
        ]);
        assert_eq!(parsed, expected);
    }

    #[test]
    fn handles_string_escapes() {
        assert_eq!(
            evaluate_literal(r"'it\'s\n'").unwrap(),
            Value::Str("it's\n".to_string())
        );
    }

    #[test]
    fn allows_trailing_commas() {
        assert_eq!(
            evaluate_literal("[1, 2,]").unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );
        assert_eq!(
            evaluate_literal("{'a': 1,}").unwrap(),
            Value::Dict(vec![(Value::Str("a".to_string()), Value::Int(1))])
        );
    }

    #[test]
    fn rejects_identifiers_and_calls() {
        assert!(evaluate_literal("os.system('rm -rf /')").is_err());
        assert!(evaluate_literal("__import__('os')").is_err());
        assert!(evaluate_literal("foo").is_err());
    }

    #[test]
    fn rejects_malformed_syntax() {
        assert!(evaluate_literal("{'x': )(}").is_err());
        assert!(evaluate_literal("[1, 2").is_err());
        assert!(evaluate_literal("'unterminated").is_err());
        assert!(evaluate_literal("1 2").is_err());
    }

    #[test]
    fn display_round_trips_plain_trees() {
        let value = Value::Dict(vec![
            (Value::Str("a".to_string()), Value::Int(1)),
            (
                Value::Str("b".to_string()),
                Value::List(vec![Value::Float(1.5), Value::None, Value::Bool(true)]),
            ),
        ]);
        assert_eq!(evaluate_literal(&value.to_string()).unwrap(), value);
    }
}
