//! FTP reply types and wire encoding

use crate::error::{FtpError, Result};

/// A server reply: a three-digit status code plus human-readable text
///
/// `text` never contains embedded CRLF for a single-line reply; a
/// multi-line reply is represented by `lines` in addition to `text`
/// holding the first line (see [`Reply::encode_multiline`] /
/// [`parse_multiline`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Three-digit reply code
    pub code: u16,
    /// Reply text (first/only line)
    pub text: String,
}

impl Reply {
    /// Build a new reply
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    /// Reply indicates success (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Reply indicates an intermediate/continuation status (1xx or 3xx)
    pub fn is_preliminary_or_continuation(&self) -> bool {
        (100..200).contains(&self.code) || (300..400).contains(&self.code)
    }

    /// Reply indicates failure (4xx or 5xx)
    pub fn is_error(&self) -> bool {
        self.code >= 400
    }

    /// Encode as the single-line wire form: `"{code} {text}\r\n"`
    pub fn encode(&self) -> String {
        format!("{} {}\r\n", self.code, self.text)
    }

    /// Encode a multi-line reply: hyphen-continuation form.
    ///
    /// `lines` is the full ordered set of body lines; the first is
    /// prefixed `"{code}-"`, the rest prefixed with a single space, and
    /// the final line repeats as the `"{code} "`-prefixed terminator.
    pub fn encode_multiline(code: u16, lines: &[impl AsRef<str>]) -> String {
        if lines.is_empty() {
            return format!("{code} \r\n");
        }
        let mut out = String::new();
        let first = lines[0].as_ref();
        out.push_str(&format!("{code}-{first}\r\n"));
        if lines.len() > 1 {
            for line in lines.iter().skip(1).take(lines.len() - 2) {
                out.push_str(&format!(" {}\r\n", line.as_ref()));
            }
            let last = lines[lines.len() - 1].as_ref();
            out.push_str(&format!("{code} {last}\r\n"));
        }
        out
    }
}

/// Parse a single reply line (without trailing CRLF) into `(code, text)`.
///
/// Fails with [`FtpError::Protocol`] unless the first three bytes are
/// ASCII digits.
pub fn parse_reply_line(line: &str) -> Result<(u16, String)> {
    let bytes = line.as_bytes();
    if bytes.len() < 3
        || !bytes[0].is_ascii_digit()
        || !bytes[1].is_ascii_digit()
        || !bytes[2].is_ascii_digit()
    {
        return Err(FtpError::Protocol(format!(
            "malformed reply code: {:?}",
            line.chars().take(100).collect::<String>()
        )));
    }

    let code = line[0..3]
        .parse::<u16>()
        .map_err(|_| FtpError::Protocol(format!("malformed reply code: {line:?}")))?;

    let text = if line.len() > 4 { &line[4..] } else { "" };

    Ok((code, text.to_string()))
}

/// Encode the 227 PASV reply body for the given advertised address and port
pub fn encode_pasv(addr: std::net::Ipv4Addr, port: u16) -> String {
    let o = addr.octets();
    let p1 = (port >> 8) as u8;
    let p2 = (port & 0xff) as u8;
    format!(
        "Entering Passive Mode ({},{},{},{},{},{}).",
        o[0], o[1], o[2], o[3], p1, p2
    )
}

/// Parse the last parenthesized `(h1,h2,h3,h4,p1,p2)` tuple out of a PASV
/// reply's text. Servers vary in the surrounding prose, so this scans for
/// the final `(...)` group rather than assuming a fixed prefix.
pub fn parse_pasv(text: &str) -> Result<(std::net::Ipv4Addr, u16)> {
    let open = text.rfind('(').ok_or_else(|| {
        FtpError::Protocol(format!("no PASV address tuple in reply: {text:?}"))
    })?;
    let close = text[open..]
        .find(')')
        .map(|i| i + open)
        .ok_or_else(|| FtpError::Protocol(format!("unterminated PASV tuple in reply: {text:?}")))?;

    let inner = &text[open + 1..close];
    let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
    if parts.len() != 6 {
        return Err(FtpError::Protocol(format!(
            "PASV tuple has {} fields, expected 6: {text:?}",
            parts.len()
        )));
    }

    let mut nums = [0u16; 6];
    for (i, p) in parts.iter().enumerate() {
        nums[i] = p
            .parse::<u16>()
            .map_err(|_| FtpError::Protocol(format!("non-numeric PASV field in: {text:?}")))?;
        if i < 4 && nums[i] > 255 {
            return Err(FtpError::Protocol(format!(
                "PASV host octet out of range in: {text:?}"
            )));
        }
    }

    let addr = std::net::Ipv4Addr::new(nums[0] as u8, nums[1] as u8, nums[2] as u8, nums[3] as u8);
    let port = nums[4] * 256 + nums[5];
    Ok((addr, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_single_line() {
        let r = Reply::new(230, "User logged in, proceed");
        assert_eq!(r.encode(), "230 User logged in, proceed\r\n");
    }

    #[test]
    fn test_encode_multiline() {
        let lines = vec!["Welcome", "to the server", "enjoy your stay"];
        let out = Reply::encode_multiline(220, &lines);
        assert_eq!(
            out,
            "220-Welcome\r\n to the server\r\n220 enjoy your stay\r\n"
        );
    }

    #[test]
    fn test_encode_multiline_single_entry() {
        let lines = vec!["hello"];
        let out = Reply::encode_multiline(220, &lines);
        assert_eq!(out, "220-hello\r\n");
    }

    #[test]
    fn test_parse_reply_line() {
        let (code, text) = parse_reply_line("230 User logged in, proceed").unwrap();
        assert_eq!(code, 230);
        assert_eq!(text, "User logged in, proceed");
    }

    #[test]
    fn test_parse_reply_line_no_text() {
        let (code, text) = parse_reply_line("200").unwrap();
        assert_eq!(code, 200);
        assert_eq!(text, "");
    }

    #[test]
    fn test_parse_reply_line_malformed() {
        assert!(parse_reply_line("abc hello").is_err());
        assert!(parse_reply_line("2a0 hello").is_err());
        assert!(parse_reply_line("2").is_err());
    }

    #[test]
    fn test_is_success_boundaries() {
        assert!(!Reply::new(199, "").is_success());
        assert!(Reply::new(200, "").is_success());
        assert!(Reply::new(299, "").is_success());
        assert!(!Reply::new(300, "").is_success());
    }

    #[test]
    fn test_encode_pasv() {
        let addr = std::net::Ipv4Addr::new(192, 168, 1, 2);
        let body = encode_pasv(addr, 49170);
        assert_eq!(body, "Entering Passive Mode (192,168,1,2,192,18).");
    }

    #[test]
    fn test_parse_pasv_roundtrip() {
        let addr = std::net::Ipv4Addr::new(10, 0, 0, 5);
        let body = encode_pasv(addr, 54321);
        let full = format!("227 {body}");
        let (parsed_addr, parsed_port) = parse_pasv(&full).unwrap();
        assert_eq!(parsed_addr, addr);
        assert_eq!(parsed_port, 54321);
    }

    #[test]
    fn test_parse_pasv_prose_variance() {
        // Some servers wrap the tuple in extra prose; the parser must take
        // the *last* parenthesized group.
        let text = "Entering Passive Mode (h1,h2,h3,h4,p1,p2) is (127,0,0,1,200,2).";
        let (addr, port) = parse_pasv(text).unwrap();
        assert_eq!(addr, std::net::Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(port, 200 * 256 + 2);
    }

    #[test]
    fn test_parse_pasv_missing_tuple() {
        assert!(parse_pasv("no tuple here").is_err());
    }

    #[test]
    fn test_parse_pasv_wrong_field_count() {
        assert!(parse_pasv("(1,2,3,4,5)").is_err());
    }
}
