//! HTTP header collection
//!
//! This module provides a case-insensitive header map that parses one field
//! line at a time and folds repeated field names into a single
//! comma-separated value.

use super::{find_crlf, Error, Result};
use std::fmt;

/// Bytes permitted in a field name (RFC 9110 `tchar`)
static TOKEN_CHARS: [bool; 256] = token_table();

const fn token_table() -> [bool; 256] {
    let mut table = [false; 256];
    let mut b = 0;
    while b < 256 {
        let c = b as u8;
        table[b] = c.is_ascii_alphanumeric()
            || matches!(
                c,
                b'!' | b'#'
                    | b'$'
                    | b'%'
                    | b'&'
                    | b'\''
                    | b'*'
                    | b'+'
                    | b'-'
                    | b'.'
                    | b'^'
                    | b'_'
                    | b'|'
                    | b'~'
            );
        b += 1;
    }
    table
}

/// Check whether a byte may appear in a field name
pub fn is_token_char(b: u8) -> bool {
    TOKEN_CHARS[b as usize]
}

/// Strip leading and trailing ASCII whitespace
fn trim_bytes(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if !first.is_ascii_whitespace() {
            break;
        }
        bytes = rest;
    }
    while let [rest @ .., last] = bytes {
        if !last.is_ascii_whitespace() {
            break;
        }
        bytes = rest;
    }
    bytes
}

/// Decode field bytes as UTF-8, reading them as ISO-8859-1 (`obs-text`)
/// when they are not valid UTF-8
pub(crate) fn field_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

/// HTTP headers collection
///
/// Each field name appears at most once. Lookups ignore ASCII case, and
/// inserting a name that is already present appends the new value to the
/// existing one, separated by `", "`. Entries iterate in first-insertion
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    headers: Vec<(String, String)>,
}

impl Headers {
    /// Create a new empty headers collection
    pub fn new() -> Self {
        Headers {
            headers: Vec::new(),
        }
    }

    /// Insert a header, folding into an existing value of the same name
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();

        match self.position(&name) {
            Some(idx) => {
                let existing = &mut self.headers[idx].1;
                existing.push_str(", ");
                existing.push_str(&value);
            }
            None => self.headers.push((name, value)),
        }
    }

    /// Set a header, replacing any existing value of the same name
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();

        match self.position(&name) {
            Some(idx) => self.headers[idx].1 = value,
            None => self.headers.push((name, value)),
        }
    }

    /// Get the value for a header (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|idx| self.headers[idx].1.as_str())
    }

    /// Check if a header exists
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Remove a header, returning its value
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|idx| self.headers.remove(idx).1)
    }

    /// Get the number of distinct field names
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Check if there are no headers
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Iterate over all headers
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Parse a single field line from the front of `data`
    ///
    /// Returns the number of bytes consumed and whether the blank line ending
    /// the header section was reached. `(0, false)` means no complete line is
    /// buffered yet. Parsed names are stored lower-cased.
    ///
    /// The name is everything before the first colon, taken literally, so
    /// `"Host : x"` is rejected because of the space in the name.
    pub fn parse_one_field(&mut self, data: &[u8]) -> Result<(usize, bool)> {
        let Some(crlf_pos) = find_crlf(data) else {
            return Ok((0, false));
        };

        if crlf_pos == 0 {
            return Ok((2, true));
        }

        let line = trim_bytes(&data[..crlf_pos]);
        if line.is_empty() {
            return Err(Error::MalformedHeaderField("empty field line".to_string()));
        }

        let colon = line.iter().position(|&b| b == b':').ok_or_else(|| {
            Error::MalformedHeaderField(format!("no colon in {:?}", field_text(line)))
        })?;
        let (name, value) = (&line[..colon], &line[colon + 1..]);

        if name.is_empty() {
            return Err(Error::MalformedHeaderField("empty field name".to_string()));
        }
        // Token bytes are ASCII, so the name is valid UTF-8 once this passes.
        if !name.iter().copied().all(is_token_char) {
            return Err(Error::MalformedHeaderField(format!(
                "invalid field name {:?}",
                field_text(name)
            )));
        }
        let name = field_text(name);

        let value = trim_bytes(value);
        if value.is_empty() {
            return Err(Error::MalformedHeaderField(format!(
                "empty value for {:?}",
                name
            )));
        }
        let value = field_text(value);

        self.insert(name.to_ascii_lowercase(), value);
        Ok((crlf_pos + 2, false))
    }

    /// Append `Name: Value\r\n` lines followed by the blank line
    pub(crate) fn write_section(&self, out: &mut Vec<u8>) {
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(super::CRLF.as_bytes());
        }
        out.extend_from_slice(super::CRLF.as_bytes());
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.headers {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_field() {
        let mut headers = Headers::new();
        let (n, done) = headers
            .parse_one_field(b"Host: localhost:42069\r\n\r\n")
            .unwrap();
        assert_eq!(headers.get("host"), Some("localhost:42069"));
        assert_eq!(n, 23);
        assert!(!done);
    }

    #[test]
    fn test_parse_surrounding_whitespace() {
        let mut headers = Headers::new();
        let (n, done) = headers
            .parse_one_field(b"        Host: localhost:42069           \r\n\r\n")
            .unwrap();
        assert_eq!(headers.get("host"), Some("localhost:42069"));
        assert_eq!(n, 42);
        assert!(!done);
    }

    #[test]
    fn test_parse_consumes_one_line_at_a_time() {
        let mut headers = Headers::new();
        let data = b"   Host: localhost:42069  \r\n     Content: application/json    \r\n";
        let (n, done) = headers.parse_one_field(data).unwrap();
        assert_eq!(n, 28);
        assert!(!done);
        assert_eq!(headers.len(), 1);

        let (n, done) = headers.parse_one_field(&data[28..]).unwrap();
        assert_eq!(n, data.len() - 28);
        assert!(!done);
        assert_eq!(headers.get("content"), Some("application/json"));
    }

    #[test]
    fn test_parse_section_end() {
        let mut headers = Headers::new();
        let (n, done) = headers.parse_one_field(b"\r\n").unwrap();
        assert_eq!(n, 2);
        assert!(done);
        assert!(headers.is_empty());
    }

    #[test]
    fn test_parse_needs_more_data() {
        let mut headers = Headers::new();
        let (n, done) = headers.parse_one_field(b"Host: local").unwrap();
        assert_eq!(n, 0);
        assert!(!done);
        assert!(headers.is_empty());
    }

    #[test]
    fn test_parse_lowercases_name() {
        let mut headers = Headers::new();
        headers.parse_one_field(b"HoSt: v\r\n\r\n").unwrap();
        assert_eq!(headers.iter().next(), Some(("host", "v")));
    }

    #[test]
    fn test_parse_folds_repeated_names() {
        let mut headers = Headers::new();
        let data = b"X: a\r\nX: b\r\n\r\n";
        let (n, _) = headers.parse_one_field(data).unwrap();
        headers.parse_one_field(&data[n..]).unwrap();
        assert_eq!(headers.get("x"), Some("a, b"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_parse_folds_into_existing_value() {
        let mut headers = Headers::new();
        headers.insert("host", "localhost:42069");
        headers.parse_one_field(b"Host: localhost:42070\r\n").unwrap();
        assert_eq!(headers.get("host"), Some("localhost:42069, localhost:42070"));
    }

    #[test]
    fn test_parse_rejects_space_before_colon() {
        let mut headers = Headers::new();
        let result = headers.parse_one_field(b"       Host : localhost:42069       \r\n\r\n");
        assert!(matches!(result, Err(Error::MalformedHeaderField(_))));
        assert!(headers.is_empty());
    }

    #[test]
    fn test_parse_rejects_invalid_name_chars() {
        let mut headers = Headers::new();
        let result = headers.parse_one_field("H\u{a9}st: localhost:42069\r\n\r\n".as_bytes());
        assert!(matches!(result, Err(Error::MalformedHeaderField(_))));

        let result = headers.parse_one_field(b"Ho(st: x\r\n");
        assert!(matches!(result, Err(Error::MalformedHeaderField(_))));
        assert!(headers.is_empty());
    }

    #[test]
    fn test_parse_accepts_token_punctuation() {
        let mut headers = Headers::new();
        headers
            .parse_one_field(b"X-!#$%&'*+-.^_|~: ok\r\n")
            .unwrap();
        assert_eq!(headers.get("x-!#$%&'*+-.^_|~"), Some("ok"));
    }

    #[test]
    fn test_parse_rejects_missing_colon_and_empty_parts() {
        let mut headers = Headers::new();
        assert!(headers.parse_one_field(b"Invalid\r\n").is_err());
        assert!(headers.parse_one_field(b": value\r\n").is_err());
        assert!(headers.parse_one_field(b"Name:    \r\n").is_err());
        assert!(headers.parse_one_field(b"     \r\n").is_err());
        assert!(headers.is_empty());
    }

    #[test]
    fn test_parse_accepts_non_ascii_values() {
        let mut headers = Headers::new();
        headers.parse_one_field(b"X-Name: caf\xE9\r\n").unwrap();
        assert_eq!(headers.get("x-name"), Some("caf\u{e9}"));

        headers.parse_one_field("X-City: M\u{fc}nchen\r\n".as_bytes()).unwrap();
        assert_eq!(headers.get("x-city"), Some("M\u{fc}nchen"));

        let result = headers.parse_one_field(b"X-N\xE4me: v\r\n");
        assert!(matches!(result, Err(Error::MalformedHeaderField(_))));
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_trim_bytes() {
        assert_eq!(trim_bytes(b"  \tvalue \t"), b"value");
        assert_eq!(trim_bytes(b"   "), b"");
        assert_eq!(trim_bytes(b""), b"");
    }

    #[test]
    fn test_value_keeps_inner_colons() {
        let mut headers = Headers::new();
        headers.parse_one_field(b"Referer: http://x:1/a\r\n").unwrap();
        assert_eq!(headers.get("referer"), Some("http://x:1/a"));
    }

    #[test]
    fn test_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/html");

        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
        assert_eq!(headers.get("CoNtEnT-TyPe"), Some("text/html"));
    }

    #[test]
    fn test_set_replaces() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/plain");
        headers.set("content-type", "text/html");

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("Content-Type"), Some("text/html"));
        assert_eq!(headers.iter().next(), Some(("Content-Type", "text/html")));
    }

    #[test]
    fn test_remove() {
        let mut headers = Headers::new();
        headers.insert("X-Remove", "value1");
        headers.insert("X-Keep", "value2");

        assert_eq!(headers.remove("x-remove"), Some("value1".to_string()));
        assert_eq!(headers.remove("X-Remove"), None);
        assert_eq!(headers.get("X-Keep"), Some("value2"));
        assert!(!headers.contains("X-Remove"));
    }

    #[test]
    fn test_write_section() {
        let headers: Headers = [("Content-Length", "5"), ("Connection", "close")]
            .into_iter()
            .collect();
        let mut out = Vec::new();
        headers.write_section(&mut out);
        assert_eq!(out, b"Content-Length: 5\r\nConnection: close\r\n\r\n");
    }

    #[test]
    fn test_token_table() {
        assert!(is_token_char(b'a'));
        assert!(is_token_char(b'Z'));
        assert!(is_token_char(b'7'));
        assert!(is_token_char(b'~'));
        assert!(!is_token_char(b' '));
        assert!(!is_token_char(b':'));
        assert!(!is_token_char(b'"'));
        assert!(!is_token_char(0xc2));
    }
}
