//! Control-channel command framing: line reading and verb/argument parsing
//!
//! The reader side is used by the server to decode incoming lines; the
//! builder functions are used by the client to encode outgoing ones. Both
//! sides share the same wire shape: a verb token, an optional single
//! space, and the remainder of the line as the argument, CRLF-terminated
//! (bare LF is tolerated on read for robustness).

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::{FtpError, Result};

/// A parsed control-channel command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Uppercased command verb, e.g. `"USER"`
    pub verb: String,
    /// Remainder of the line after the first space, trailing CR stripped.
    /// Empty if the line carried no argument.
    pub argument: String,
}

impl Command {
    /// Parse one already-dechunked line (no trailing CR/LF) into a command.
    ///
    /// Splits on the first ASCII space; the verb is uppercased, the
    /// argument is left as-is. A line with no space has an empty argument.
    pub fn parse(line: &str) -> Command {
        match line.split_once(' ') {
            Some((verb, argument)) => Command {
                verb: verb.to_ascii_uppercase(),
                argument: argument.to_string(),
            },
            None => Command {
                verb: line.to_ascii_uppercase(),
                argument: String::new(),
            },
        }
    }
}

/// Outcome of reading one line from the control channel
pub enum ReadLine {
    /// A complete, non-empty line (CR/LF already stripped)
    Line(String),
    /// An empty line was read and should be ignored
    Empty,
    /// The line exceeded `max_line_bytes`; the oversized input up to the
    /// next CRLF has already been discarded
    Oversized,
    /// EOF was reached with no bytes read
    Eof,
}

/// Read one CRLF- (or bare-LF-) terminated line from the control channel,
/// enforcing `max_line_bytes`.
///
/// Lines longer than `max_line_bytes` are discarded up to the next
/// terminator and reported as [`ReadLine::Oversized`]; the caller is
/// expected to reply 500 and keep the session alive.
pub async fn read_command_line<R>(reader: &mut R, max_line_bytes: usize) -> std::io::Result<ReadLine>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = reader.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(ReadLine::Eof);
    }

    if buf.len() > max_line_bytes {
        // Discard the remainder of this oversized line up to the next
        // terminator so the next read starts on a clean boundary.
        if !buf.ends_with(b"\n") {
            loop {
                let mut discard = Vec::new();
                let n = reader.read_until(b'\n', &mut discard).await?;
                if n == 0 || discard.ends_with(b"\n") {
                    break;
                }
            }
        }
        return Ok(ReadLine::Oversized);
    }

    let text = String::from_utf8_lossy(&buf);
    let text = text.trim_end_matches('\n').trim_end_matches('\r');

    if text.is_empty() {
        Ok(ReadLine::Empty)
    } else {
        Ok(ReadLine::Line(text.to_string()))
    }
}

/// Build a `VERB\r\n` command line with no argument
pub fn build(verb: &str) -> String {
    format!("{verb}\r\n")
}

/// Build a `VERB argument\r\n` command line
pub fn build_with_arg(verb: &str, argument: &str) -> String {
    format!("{verb} {argument}\r\n")
}

/// Extract the first `"..."` quoted group from a reply's text, with `""`
/// decoding to a literal embedded quote (the `PWD`/`MKD` quoting form).
pub fn parse_quoted_path(text: &str) -> Result<String> {
    let bytes = text.as_bytes();
    let start = bytes
        .iter()
        .position(|&b| b == b'"')
        .ok_or_else(|| FtpError::Protocol(format!("no quoted path in reply: {text:?}")))?;

    let mut out = String::new();
    let chars: Vec<char> = text[start + 1..].chars().collect();
    let mut i = 0;
    let mut closed = false;
    while i < chars.len() {
        if chars[i] == '"' {
            if i + 1 < chars.len() && chars[i + 1] == '"' {
                out.push('"');
                i += 2;
                continue;
            }
            closed = true;
            break;
        }
        out.push(chars[i]);
        i += 1;
    }

    if !closed {
        return Err(FtpError::Protocol(format!(
            "unterminated quoted path in reply: {text:?}"
        )));
    }
    Ok(out)
}

/// Quote a path for a 257/257-style reply, doubling embedded `"`
pub fn quote_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 2);
    out.push('"');
    for c in path.chars() {
        if c == '"' {
            out.push('"');
            out.push('"');
        } else {
            out.push(c);
        }
    }
    out.push('"');
    out
}
