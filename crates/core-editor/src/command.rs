//! Command decoding from protocol values.

use thiserror::Error;
use tracing::warn;

use crate::output::Framing;
use crate::value::Value;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid command (not an array)")]
    NotArray,
    #[error("invalid command (empty array)")]
    Empty,
    #[error("invalid command (no verb)")]
    NoVerb,
    #[error("{0}: invalid arity")]
    Arity(String),
    #[error("{0}: invalid arguments")]
    Arguments(String),
    #[error("unknown verb: {0}")]
    UnknownVerb(String),
}

/// Where a `change` edit applies inside the file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChangeSpan {
    /// Byte offset + byte count to remove.
    Bytes { offset: usize, remove: usize },
    /// Whole lines: first line index + line count to remove.
    Lines { line: usize, count: usize },
    /// LSP-style range; character columns are UTF-16 code units.
    Range {
        start_line: usize,
        start_char: usize,
        end_line: usize,
        end_char: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditorCommand {
    Open {
        path: String,
        data: Vec<u8>,
    },
    Close {
        path: String,
    },
    Change {
        path: String,
        span: ChangeSpan,
        data: Vec<u8>,
    },
    Theme {
        bg: [f64; 3],
        fg: [f64; 3],
    },
    PreviousPage,
    NextPage,
    MoveWindow {
        x: f64,
        y: f64,
        w: f64,
        h: f64,
    },
    MapWindow {
        x: f64,
        y: f64,
        w: f64,
        h: f64,
    },
    UnmapWindow,
    StayOnTop(bool),
    Rescan,
    SynctexForward {
        path: String,
        line: i32,
    },
    Crop,
    Invert,
}

fn string_arg(items: &[Value], index: usize, verb: &str) -> Result<String, CommandError> {
    items[index]
        .as_string()
        .map(str::to_owned)
        .ok_or_else(|| CommandError::Arguments(verb.to_owned()))
}

fn number_arg(items: &[Value], index: usize, verb: &str) -> Result<f64, CommandError> {
    items[index]
        .as_number()
        .ok_or_else(|| CommandError::Arguments(verb.to_owned()))
}

fn index_arg(items: &[Value], index: usize, verb: &str) -> Result<usize, CommandError> {
    let n = number_arg(items, index, verb)?;
    if n < 0.0 || n.fract() != 0.0 {
        return Err(CommandError::Arguments(verb.to_owned()));
    }
    Ok(n as usize)
}

fn color_arg(items: &[Value], index: usize, verb: &str) -> Result<[f64; 3], CommandError> {
    match &items[index] {
        Value::Array(c) if c.len() == 3 => {
            let mut out = [0.0; 3];
            for (slot, v) in out.iter_mut().zip(c) {
                *slot = v
                    .as_number()
                    .ok_or_else(|| CommandError::Arguments(verb.to_owned()))?;
            }
            Ok(out)
        }
        _ => Err(CommandError::Arguments(verb.to_owned())),
    }
}

fn check_arity(items: &[Value], expect: usize, verb: &str) -> Result<(), CommandError> {
    if items.len() != expect {
        Err(CommandError::Arity(verb.to_owned()))
    } else {
        Ok(())
    }
}

/// Decode one protocol value into a command.
pub fn parse(framing: Framing, value: &Value) -> Result<EditorCommand, CommandError> {
    let items = match value {
        Value::Array(items) => items.as_slice(),
        _ => return Err(CommandError::NotArray),
    };
    if items.is_empty() {
        return Err(CommandError::Empty);
    }
    let verb = match &items[0] {
        Value::Name(n) => n.as_str(),
        Value::String(s) if framing == Framing::Json => s.as_str(),
        _ => return Err(CommandError::NoVerb),
    };

    let cmd = match verb {
        "open" => {
            check_arity(items, 3, verb)?;
            EditorCommand::Open {
                path: string_arg(items, 1, verb)?,
                data: string_arg(items, 2, verb)?.into_bytes(),
            }
        }
        "close" => {
            check_arity(items, 2, verb)?;
            EditorCommand::Close {
                path: string_arg(items, 1, verb)?,
            }
        }
        "change" => {
            check_arity(items, 5, verb)?;
            EditorCommand::Change {
                path: string_arg(items, 1, verb)?,
                span: ChangeSpan::Bytes {
                    offset: index_arg(items, 2, verb)?,
                    remove: index_arg(items, 3, verb)?,
                },
                data: string_arg(items, 4, verb)?.into_bytes(),
            }
        }
        "change-lines" => {
            check_arity(items, 5, verb)?;
            EditorCommand::Change {
                path: string_arg(items, 1, verb)?,
                span: ChangeSpan::Lines {
                    line: index_arg(items, 2, verb)?,
                    count: index_arg(items, 3, verb)?,
                },
                data: string_arg(items, 4, verb)?.into_bytes(),
            }
        }
        "change-range" => {
            check_arity(items, 7, verb)?;
            EditorCommand::Change {
                path: string_arg(items, 1, verb)?,
                span: ChangeSpan::Range {
                    start_line: index_arg(items, 2, verb)?,
                    start_char: index_arg(items, 3, verb)?,
                    end_line: index_arg(items, 4, verb)?,
                    end_char: index_arg(items, 5, verb)?,
                },
                data: string_arg(items, 6, verb)?.into_bytes(),
            }
        }
        "theme" => {
            check_arity(items, 3, verb)?;
            EditorCommand::Theme {
                bg: color_arg(items, 1, verb)?,
                fg: color_arg(items, 2, verb)?,
            }
        }
        "previous-page" => {
            check_arity(items, 1, verb)?;
            EditorCommand::PreviousPage
        }
        "next-page" => {
            check_arity(items, 1, verb)?;
            EditorCommand::NextPage
        }
        "move-window" => {
            check_arity(items, 5, verb)?;
            EditorCommand::MoveWindow {
                x: number_arg(items, 1, verb)?,
                y: number_arg(items, 2, verb)?,
                w: number_arg(items, 3, verb)?,
                h: number_arg(items, 4, verb)?,
            }
        }
        "map-window" => {
            check_arity(items, 5, verb)?;
            EditorCommand::MapWindow {
                x: number_arg(items, 1, verb)?,
                y: number_arg(items, 2, verb)?,
                w: number_arg(items, 3, verb)?,
                h: number_arg(items, 4, verb)?,
            }
        }
        "unmap-window" => {
            check_arity(items, 1, verb)?;
            EditorCommand::UnmapWindow
        }
        "stay-on-top" => {
            check_arity(items, 2, verb)?;
            EditorCommand::StayOnTop(items[1].truthy(framing))
        }
        "rescan" => {
            check_arity(items, 1, verb)?;
            EditorCommand::Rescan
        }
        "synctex-forward" => {
            check_arity(items, 3, verb)?;
            EditorCommand::SynctexForward {
                path: string_arg(items, 1, verb)?,
                line: number_arg(items, 2, verb)? as i32,
            }
        }
        "crop" => {
            check_arity(items, 1, verb)?;
            EditorCommand::Crop
        }
        "invert" => {
            check_arity(items, 1, verb)?;
            EditorCommand::Invert
        }
        other => {
            warn!(target: "editor", verb = other, "unknown verb");
            return Err(CommandError::UnknownVerb(other.to_owned()));
        }
    };
    Ok(cmd)
}

/// Byte offset of the start of 0-based `line`, or `None` past the end.
pub fn line_offset(buf: &[u8], line: usize) -> Option<usize> {
    let mut offset = 0;
    for _ in 0..line {
        let nl = buf[offset..].iter().position(|&c| c == b'\n')?;
        offset += nl + 1;
    }
    Some(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sexp(items: Vec<Value>) -> Value {
        Value::Array(items)
    }

    #[test]
    fn parses_open() {
        let v = sexp(vec![
            Value::Name("open".into()),
            Value::String("main.tex".into()),
            Value::String("body".into()),
        ]);
        assert_eq!(
            parse(Framing::Sexp, &v).unwrap(),
            EditorCommand::Open {
                path: "main.tex".into(),
                data: b"body".to_vec()
            }
        );
    }

    #[test]
    fn json_verbs_are_strings() {
        let v = sexp(vec![Value::String("rescan".into())]);
        assert!(matches!(
            parse(Framing::Json, &v),
            Ok(EditorCommand::Rescan)
        ));
        // In the S-expression framing a string verb is not a name.
        assert!(parse(Framing::Sexp, &v).is_err());
    }

    #[test]
    fn change_range_carries_utf16_columns() {
        let v = sexp(vec![
            Value::Name("change-range".into()),
            Value::String("main.tex".into()),
            Value::Number(3.0),
            Value::Number(1.0),
            Value::Number(3.0),
            Value::Number(5.0),
            Value::String("new".into()),
        ]);
        match parse(Framing::Sexp, &v).unwrap() {
            EditorCommand::Change { span, .. } => assert_eq!(
                span,
                ChangeSpan::Range {
                    start_line: 3,
                    start_char: 1,
                    end_line: 3,
                    end_char: 5
                }
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn arity_is_checked() {
        let v = sexp(vec![Value::Name("close".into())]);
        assert!(matches!(
            parse(Framing::Sexp, &v),
            Err(CommandError::Arity(_))
        ));
    }

    #[test]
    fn negative_offsets_rejected() {
        let v = sexp(vec![
            Value::Name("change".into()),
            Value::String("f".into()),
            Value::Number(-1.0),
            Value::Number(0.0),
            Value::String("".into()),
        ]);
        assert!(matches!(
            parse(Framing::Sexp, &v),
            Err(CommandError::Arguments(_))
        ));
    }

    #[test]
    fn line_offsets() {
        let buf = b"one\ntwo\nthree\n";
        assert_eq!(line_offset(buf, 0), Some(0));
        assert_eq!(line_offset(buf, 1), Some(4));
        assert_eq!(line_offset(buf, 2), Some(8));
        assert_eq!(line_offset(buf, 3), Some(14));
        assert_eq!(line_offset(buf, 4), None);
    }
}
