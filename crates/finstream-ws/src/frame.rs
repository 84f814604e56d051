//! STOMP 1.2 frame codec.
//!
//! Frame layout: `COMMAND\n` + `name:value\n` headers + `\n` + body + `\0`.
//! Header names and values are escaped (`\\`, `\n`, `\r`, `\c`) except in
//! `CONNECT` and `CONNECTED` frames. A bare EOL between frames is a
//! heart-beat.

use crate::error::{WsError, WsResult};

/// STOMP commands used by the client and server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StompCommand {
    Connect,
    Connected,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl StompCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    fn parse(s: &str) -> WsResult<Self> {
        Ok(match s {
            "CONNECT" | "STOMP" => Self::Connect,
            "CONNECTED" => Self::Connected,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => return Err(WsError::Frame(format!("unknown command: {other}"))),
        })
    }

    fn escapes_headers(&self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

/// One STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: StompCommand,
    /// Headers in wire order. On repeated names the first one wins.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StompFrame {
    pub fn new(command: StompCommand) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of header `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Encode to wire text, including the trailing NUL.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Decode every frame in `text`. Heart-beat EOLs yield no frames.
    pub fn decode_all(text: &str) -> WsResult<Vec<StompFrame>> {
        let mut frames = Vec::new();
        let mut rest = text;
        loop {
            rest = rest.trim_start_matches(['\r', '\n']);
            if rest.is_empty() {
                return Ok(frames);
            }
            let (frame, remaining) = decode_one(rest)?;
            frames.push(frame);
            rest = remaining;
        }
    }
}

fn decode_one(text: &str) -> WsResult<(StompFrame, &str)> {
    let (head, after_head) = split_head(text)?;
    let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

    let command = StompCommand::parse(lines.next().unwrap_or_default())?;
    let escape = command.escapes_headers();

    let mut headers = Vec::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| WsError::Frame(format!("malformed header line: {line}")))?;
        if escape {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(n, _)| n == "content-length")
        .map(|(_, v)| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| WsError::Frame(format!("bad content-length: {v}")))
        })
        .transpose()?;

    let (body, remaining) = match content_length {
        Some(len) => {
            let body = after_head
                .get(..len)
                .ok_or_else(|| WsError::Frame("body shorter than content-length".to_string()))?;
            let remaining = after_head[len..]
                .strip_prefix('\0')
                .ok_or_else(|| WsError::Frame("missing NUL after body".to_string()))?;
            (body, remaining)
        }
        None => {
            let end = after_head
                .find('\0')
                .ok_or_else(|| WsError::Frame("missing NUL terminator".to_string()))?;
            (&after_head[..end], &after_head[end + 1..])
        }
    };

    Ok((
        StompFrame {
            command,
            headers,
            body: body.to_string(),
        },
        remaining,
    ))
}

/// Split at the blank line ending the header block.
fn split_head(text: &str) -> WsResult<(&str, &str)> {
    if let Some(i) = text.find("\n\n") {
        return Ok((&text[..i], &text[i + 2..]));
    }
    if let Some(i) = text.find("\r\n\r\n") {
        return Ok((&text[..i], &text[i + 4..]));
    }
    Err(WsError::Frame("missing header terminator".to_string()))
}

fn escape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(s: &str) -> WsResult<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(WsError::Frame(format!(
                    "invalid header escape: \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_subscribe() {
        let frame = StompFrame::new(StompCommand::Subscribe)
            .header("id", "sub-0")
            .header("destination", "/topic/stocks/prices");
        assert_eq!(
            frame.encode(),
            "SUBSCRIBE\nid:sub-0\ndestination:/topic/stocks/prices\n\n\0"
        );
    }

    #[test]
    fn test_connect_headers_are_not_escaped() {
        let frame = StompFrame::new(StompCommand::Connect)
            .header("accept-version", "1.2")
            .header("host", "localhost:8082");
        assert!(frame.encode().contains("host:localhost:8082\n"));
    }

    #[test]
    fn test_decode_message_frame() {
        let text = "MESSAGE\ndestination:/topic/stocks/prices\nsubscription:sub-0\nmessage-id:7\n\n{\"symbol\":\"AAPL\"}\0";
        let frames = StompFrame::decode_all(text).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, StompCommand::Message);
        assert_eq!(frames[0].get("destination"), Some("/topic/stocks/prices"));
        assert_eq!(frames[0].body, "{\"symbol\":\"AAPL\"}");
    }

    #[test]
    fn test_decode_heartbeats_and_multiple_frames() {
        assert!(StompFrame::decode_all("\n").unwrap().is_empty());
        assert!(StompFrame::decode_all("\r\n\n").unwrap().is_empty());

        let text = "\nCONNECTED\nversion:1.2\nheart-beat:0,0\n\n\0\nRECEIPT\nreceipt-id:1\n\n\0";
        let frames = StompFrame::decode_all(text).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].command, StompCommand::Connected);
        assert_eq!(frames[0].get("heart-beat"), Some("0,0"));
        assert_eq!(frames[1].get("receipt-id"), Some("1"));
    }

    #[test]
    fn test_header_escaping_both_ways() {
        let frame = StompFrame::new(StompCommand::Error)
            .header("message", "line1\nkey:value\\end")
            .body("details");
        let wire = frame.encode();
        assert!(wire.contains("message:line1\\nkey\\cvalue\\\\end\n"));

        let decoded = StompFrame::decode_all(&wire).unwrap();
        assert_eq!(decoded[0].get("message"), Some("line1\nkey:value\\end"));
        assert_eq!(decoded[0].body, "details");
    }

    #[test]
    fn test_content_length_allows_nul_in_body() {
        let text = "MESSAGE\ndestination:/q\ncontent-length:3\n\na\0b\0";
        let frames = StompFrame::decode_all(text).unwrap();
        assert_eq!(frames[0].body, "a\0b");
    }

    #[test]
    fn test_decode_errors() {
        assert!(StompFrame::decode_all("BOGUS\n\n\0").is_err());
        assert!(StompFrame::decode_all("MESSAGE\ndestination:/q\n\nbody").is_err());
        assert!(StompFrame::decode_all("MESSAGE\nno-colon\n\n\0").is_err());
        assert!(StompFrame::decode_all("ERROR\nmessage:bad\\x\n\n\0").is_err());
    }
}
