//! Outgoing protocol messages.
//!
//! `append` reports new bytes of a worker output stream, `truncate` a
//! shrink after rollback; the `-lines` variants report whole lines for
//! line-oriented editors. `synctex` answers backward searches and `flush`
//! marks a quiet point after a typesetting burst.

use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    #[default]
    Sexp,
    Json,
}

/// Worker output streams an editor can display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutBuf {
    Out,
    Log,
}

impl OutBuf {
    fn name(self) -> &'static str {
        match self {
            OutBuf::Out => "out",
            OutBuf::Log => "log",
        }
    }
}

fn write_sexp_string(out: &mut impl Write, bytes: &[u8]) -> std::io::Result<()> {
    for &c in bytes {
        match c {
            b'\t' => out.write_all(b"\\t")?,
            b'\r' => out.write_all(b"\\r")?,
            b'\n' => out.write_all(b"\\n")?,
            b'"' => out.write_all(b"\\\"")?,
            b'\\' => out.write_all(b"\\\\")?,
            other => out.write_all(&[other])?,
        }
    }
    Ok(())
}

fn write_json_string(out: &mut impl Write, bytes: &[u8]) -> std::io::Result<()> {
    for &c in bytes {
        match c {
            b'\x08' => out.write_all(b"\\b")?,
            b'\x0c' => out.write_all(b"\\f")?,
            b'\n' => out.write_all(b"\\n")?,
            b'\r' => out.write_all(b"\\r")?,
            b'\t' => out.write_all(b"\\t")?,
            c if c < 32 => write!(out, "\\u{c:04X}")?,
            b'"' => out.write_all(b"\\\"")?,
            b'\\' => out.write_all(b"\\\\")?,
            b'/' => out.write_all(b"\\/")?,
            other => out.write_all(&[other])?,
        }
    }
    Ok(())
}

/// Serializer for the responses, over any sink (stdout in production).
pub struct EditorOut<W: Write> {
    sink: W,
    framing: Framing,
    line_output: bool,
}

impl<W: Write> EditorOut<W> {
    pub fn new(sink: W, framing: Framing, line_output: bool) -> EditorOut<W> {
        EditorOut {
            sink,
            framing,
            line_output,
        }
    }

    pub fn sink_mut(&mut self) -> &mut W {
        &mut self.sink
    }

    fn data_string(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self.framing {
            Framing::Sexp => write_sexp_string(&mut self.sink, bytes),
            Framing::Json => write_json_string(&mut self.sink, bytes),
        }
    }

    /// Report bytes of `buf` from `pos` to its end. In line mode, only
    /// newly completed lines are sent (one string per line).
    pub fn append(&mut self, name: OutBuf, buf: &[u8], mut pos: usize) -> std::io::Result<()> {
        if self.line_output {
            let mut next = pos;
            while next < buf.len() && buf[next] != b'\n' {
                next += 1;
            }
            if next == buf.len() {
                return Ok(()); // no complete line yet
            }
            while pos > 0 && buf[pos - 1] != b'\n' {
                pos -= 1;
            }

            match self.framing {
                Framing::Sexp => write!(self.sink, "(append-lines {}", name.name())?,
                Framing::Json => write!(self.sink, "[\"append-lines\", \"{}\"", name.name())?,
            }
            while next < buf.len() {
                match self.framing {
                    Framing::Sexp => write!(self.sink, " \"")?,
                    Framing::Json => write!(self.sink, ", \"")?,
                }
                self.data_string(&buf[pos..next])?;
                write!(self.sink, "\"")?;
                pos = next;
                loop {
                    next += 1;
                    if next >= buf.len() || buf[next] == b'\n' {
                        break;
                    }
                }
            }
            match self.framing {
                Framing::Sexp => writeln!(self.sink, ")")?,
            Framing::Json => writeln!(self.sink, "]")?,
            }
        } else {
            match self.framing {
                Framing::Sexp => {
                    write!(self.sink, "(append {} {} \"", name.name(), pos)?;
                    self.data_string(&buf[pos..])?;
                    writeln!(self.sink, "\")")?;
                }
                Framing::Json => {
                    write!(self.sink, "[\"append\", \"{}\", {}, \"", name.name(), pos)?;
                    self.data_string(&buf[pos..])?;
                    writeln!(self.sink, "\"]")?;
                }
            }
        }
        Ok(())
    }

    /// Report the stream's new (smaller) extent after a rollback: bytes, or
    /// complete lines in line mode.
    pub fn truncate(&mut self, name: OutBuf, buf: Option<&[u8]>) -> std::io::Result<()> {
        let count = match (self.line_output, buf) {
            (_, None) => 0,
            (false, Some(buf)) => buf.len(),
            (true, Some(buf)) => buf.iter().filter(|&&c| c == b'\n').count(),
        };
        let suffix = if self.line_output { "-lines" } else { "" };
        match self.framing {
            Framing::Sexp => writeln!(self.sink, "(truncate{suffix} {} {count})", name.name()),
            Framing::Json => writeln!(
                self.sink,
                "[\"truncate{suffix}\", \"{}\", {count}]",
                name.name()
            ),
        }
    }

    pub fn flush_message(&mut self) -> std::io::Result<()> {
        match self.framing {
            Framing::Sexp => writeln!(self.sink, "(flush)"),
            Framing::Json => writeln!(self.sink, "[\"flush\"]"),
        }
    }

    pub fn reset_sync(&mut self) -> std::io::Result<()> {
        match self.framing {
            Framing::Sexp => writeln!(self.sink, "(reset-sync)"),
            Framing::Json => writeln!(self.sink, "[\"reset-sync\"]"),
        }
    }

    /// Answer a backward search. Relative paths are prefixed with the
    /// document directory.
    pub fn synctex(
        &mut self,
        dirname: &str,
        path: &str,
        line: i32,
        column: i32,
    ) -> std::io::Result<()> {
        match self.framing {
            Framing::Sexp => write!(self.sink, "(synctex \"")?,
            Framing::Json => write!(self.sink, "[\"synctex\", \"")?,
        }
        if !path.starts_with('/') {
            self.data_string(dirname.as_bytes())?;
            self.data_string(b"/")?;
        }
        self.data_string(path.as_bytes())?;
        match self.framing {
            Framing::Sexp => writeln!(self.sink, "\" {line} {column})"),
            Framing::Json => writeln!(self.sink, "\", {line}, {column}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(f: impl FnOnce(&mut EditorOut<Vec<u8>>)) -> String {
        let mut out = EditorOut::new(Vec::new(), Framing::Sexp, false);
        f(&mut out);
        String::from_utf8(out.sink).unwrap()
    }

    fn capture_with(
        framing: Framing,
        line_output: bool,
        f: impl FnOnce(&mut EditorOut<Vec<u8>>),
    ) -> String {
        let mut out = EditorOut::new(Vec::new(), framing, line_output);
        f(&mut out);
        String::from_utf8(out.sink).unwrap()
    }

    #[test]
    fn append_escapes_data() {
        let s = capture(|out| out.append(OutBuf::Log, b"a\"b\nc", 0).unwrap());
        assert_eq!(s, "(append log 0 \"a\\\"b\\nc\")\n");
    }

    #[test]
    fn append_reports_offset() {
        let s = capture(|out| out.append(OutBuf::Out, b"0123456789", 6).unwrap());
        assert_eq!(s, "(append out 6 \"6789\")\n");
    }

    #[test]
    fn append_lines_waits_for_newline() {
        let s = capture_with(Framing::Sexp, true, |out| {
            out.append(OutBuf::Out, b"partial", 0).unwrap()
        });
        assert_eq!(s, "");
        // The second and later lines carry their leading newline, matching
        // what editors already consume.
        let s = capture_with(Framing::Sexp, true, |out| {
            out.append(OutBuf::Out, b"one\ntwo\nrest", 0).unwrap()
        });
        assert_eq!(s, "(append-lines out \"one\" \"\\ntwo\")\n");
    }

    #[test]
    fn truncate_counts_lines_in_line_mode() {
        let s = capture_with(Framing::Json, true, |out| {
            out.truncate(OutBuf::Log, Some(b"a\nb\nc")).unwrap()
        });
        assert_eq!(s, "[\"truncate-lines\", \"log\", 2]\n");
        let s = capture_with(Framing::Json, false, |out| {
            out.truncate(OutBuf::Log, Some(b"a\nb\nc")).unwrap()
        });
        assert_eq!(s, "[\"truncate\", \"log\", 5]\n");
    }

    #[test]
    fn synctex_prefixes_relative_paths() {
        let s = capture(|out| out.synctex("/doc/dir", "main.tex", 12, -1).unwrap());
        assert_eq!(s, "(synctex \"/doc/dir/main.tex\" 12 -1)\n");
        let s = capture(|out| out.synctex("/doc/dir", "/abs.tex", 3, 0).unwrap());
        assert_eq!(s, "(synctex \"/abs.tex\" 3 0)\n");
    }

    #[test]
    fn json_framing() {
        let s = capture_with(Framing::Json, false, |out| {
            out.append(OutBuf::Out, b"x/y", 0).unwrap();
            out.flush_message().unwrap();
            out.reset_sync().unwrap();
        });
        assert_eq!(
            s,
            "[\"append\", \"out\", 0, \"x\\/y\"]\n[\"flush\"]\n[\"reset-sync\"]\n"
        );
    }
}
