//! Shared value model and the framing-dispatching reader.

use thiserror::Error;
use tracing::warn;

use crate::output::Framing;
use crate::sexp::SexpParser;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Bool(bool),
    String(String),
    /// A bare identifier (S-expression verbs and `nil`/`t`).
    Name(String),
    Array(Vec<Value>),
    Null,
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Truthiness: JSON booleans map directly; in S-expressions every value
    /// but the name `nil` is true.
    pub fn truthy(&self, framing: Framing) -> bool {
        match (framing, self) {
            (_, Value::Bool(b)) => *b,
            (Framing::Json, _) => false,
            (Framing::Sexp, Value::Name(n)) => n != "nil",
            (Framing::Sexp, _) => true,
        }
    }
}

fn json_to_value(v: serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => {
            Value::Array(items.into_iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(_) => {
            warn!(target: "editor", "objects have no protocol meaning, dropping");
            Value::Null
        }
    }
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("sexp syntax: {0}")]
    Sexp(#[from] crate::sexp::SexpError),
    #[error("json syntax: {0}")]
    Json(#[from] serde_json::Error),
}

/// Incremental reader turning raw stdin bytes into protocol values.
pub struct CommandReader {
    framing: Framing,
    sexp: SexpParser,
    line: Vec<u8>,
}

impl CommandReader {
    pub fn new(framing: Framing) -> CommandReader {
        CommandReader {
            framing,
            sexp: SexpParser::new(),
            line: Vec::new(),
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Feed bytes, collecting every complete toplevel value. On a syntax
    /// error the parser state resets so later input resynchronizes.
    pub fn feed(&mut self, mut input: &[u8]) -> Result<Vec<Value>, ReadError> {
        let mut out = Vec::new();
        match self.framing {
            Framing::Sexp => {
                while !input.is_empty() {
                    match self.sexp.feed(input) {
                        Ok((consumed, value)) => {
                            input = &input[consumed..];
                            if let Some(v) = value {
                                out.push(v);
                            }
                        }
                        Err(err) => {
                            self.sexp = SexpParser::new();
                            return Err(err.into());
                        }
                    }
                }
            }
            Framing::Json => {
                // One JSON array per line.
                for &byte in input {
                    if byte != b'\n' {
                        self.line.push(byte);
                        continue;
                    }
                    let line = std::mem::take(&mut self.line);
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    match serde_json::from_slice::<serde_json::Value>(&line) {
                        Ok(v) => out.push(json_to_value(v)),
                        Err(err) => return Err(err.into()),
                    }
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_lines_produce_values() {
        let mut reader = CommandReader::new(Framing::Json);
        let values = reader
            .feed(b"[\"open\", \"main.tex\", \"x\"]\n[\"rescan\"]\n")
            .unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(
            values[1],
            Value::Array(vec![Value::String("rescan".to_owned())])
        );
    }

    #[test]
    fn json_line_survives_split_feeds() {
        let mut reader = CommandReader::new(Framing::Json);
        assert!(reader.feed(b"[\"next-").unwrap().is_empty());
        let values = reader.feed(b"page\"]\n").unwrap();
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn json_error_reported() {
        let mut reader = CommandReader::new(Framing::Json);
        assert!(reader.feed(b"[nope]\n").is_err());
        // Later lines still parse.
        assert_eq!(reader.feed(b"[1]\n").unwrap().len(), 1);
    }

    #[test]
    fn truthiness_follows_framing() {
        assert!(Value::Name("yes".into()).truthy(Framing::Sexp));
        assert!(!Value::Name("nil".into()).truthy(Framing::Sexp));
        assert!(Value::Number(1.0).truthy(Framing::Sexp));
        assert!(!Value::Number(1.0).truthy(Framing::Json));
        assert!(Value::Bool(true).truthy(Framing::Json));
    }
}
