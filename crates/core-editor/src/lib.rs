//! Editor protocol: incoming commands and outgoing messages.
//!
//! Two framings carry the same semantics — S-expressions and JSON arrays —
//! selected at startup. Commands deserialize through a shared value model
//! into [`EditorCommand`]; responses serialize through [`EditorOut`].
//! Column positions in `change-range` commands are LSP-style UTF-16 code
//! units and translate through [`utf16`].

pub mod command;
pub mod output;
pub mod sexp;
pub mod utf16;
pub mod value;

pub use command::{ChangeSpan, CommandError, EditorCommand};
pub use output::{EditorOut, Framing, OutBuf};
pub use value::{CommandReader, Value};
