//! STOMP 1.2 frame codec.
//!
//! ```text
//! COMMAND\n
//! name:value\n
//! \n
//! body^@
//! ```
//!
//! A single WebSocket message may carry several frames and bare EOLs
//! (heart-beats) between them.

use std::fmt;
use thiserror::Error;

/// Errors produced while decoding a STOMP frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("malformed header line: {0}")]
    MalformedHeader(String),
    #[error("invalid escape sequence in header: {0}")]
    InvalidEscape(String),
    #[error("frame is not terminated")]
    MissingTerminator,
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),
    #[error("frame exceeds {limit} bytes (buffered {size})")]
    FrameTooLarge { size: usize, limit: usize },
}

/// STOMP frame commands (client and server)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        let cmd = match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            _ => return None,
        };
        Some(cmd)
    }

    /// CONNECT and CONNECTED headers are never escaped (STOMP 1.2 §Value Encoding)
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single STOMP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    /// Headers in wire order; repeated names are kept but only the first counts
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of the named header
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Serialize to wire text, NUL terminator included.
    ///
    /// A `content-length` header is added for non-empty bodies.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                push_escaped(&mut out, name);
                out.push(':');
                push_escaped(&mut out, value);
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str("content-length:");
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Decode the first frame in `input`.
    ///
    /// Returns the frame and the number of bytes consumed, or `None` when the
    /// input holds nothing but heart-beat EOLs.
    pub fn decode(input: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
        let mut pos = skip_eols(input, 0);
        if pos >= input.len() {
            return Ok(None);
        }

        let (line, next) = read_line(input, pos)?;
        let command =
            Command::parse(line).ok_or_else(|| FrameError::UnknownCommand(line.to_string()))?;
        pos = next;

        let escape = command.escapes_headers();
        let mut headers = Vec::new();
        loop {
            let (line, next) = read_line(input, pos)?;
            pos = next;
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
            if escape {
                headers.push((unescape(name)?, unescape(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let content_length = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .map(|(_, v)| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| FrameError::InvalidContentLength(v.clone()))
            })
            .transpose()?;

        let body_end = match content_length {
            Some(len) => {
                let end = pos
                    .checked_add(len)
                    .ok_or_else(|| FrameError::InvalidContentLength(len.to_string()))?;
                if input.get(end) != Some(&0) {
                    return Err(FrameError::MissingTerminator);
                }
                end
            }
            None => input[pos..]
                .iter()
                .position(|b| *b == 0)
                .map(|offset| pos + offset)
                .ok_or(FrameError::MissingTerminator)?,
        };

        let body = std::str::from_utf8(&input[pos..body_end])
            .map_err(|_| FrameError::InvalidUtf8)?
            .to_string();

        Ok(Some((
            Frame {
                command,
                headers,
                body,
            },
            body_end + 1,
        )))
    }

    /// Decode every frame in `input`, skipping heart-beats.
    pub fn decode_all(input: &[u8]) -> Result<Vec<Frame>, FrameError> {
        let mut frames = Vec::new();
        let mut offset = 0;
        while let Some((frame, consumed)) = Frame::decode(&input[offset..])? {
            frames.push(frame);
            offset += consumed;
        }
        Ok(frames)
    }
}

fn skip_eols(input: &[u8], mut pos: usize) -> usize {
    while pos < input.len() && (input[pos] == b'\n' || input[pos] == b'\r') {
        pos += 1;
    }
    pos
}

fn read_line(input: &[u8], pos: usize) -> Result<(&str, usize), FrameError> {
    let newline = input[pos..]
        .iter()
        .position(|b| *b == b'\n')
        .map(|offset| pos + offset)
        .ok_or(FrameError::MissingTerminator)?;
    let mut line = &input[pos..newline];
    if let Some(stripped) = line.strip_suffix(b"\r") {
        line = stripped;
    }
    let line = std::str::from_utf8(line).map_err(|_| FrameError::InvalidUtf8)?;
    Ok((line, newline + 1))
}

fn push_escaped(out: &mut String, raw: &str) {
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn unescape(raw: &str) -> Result<String, FrameError> {
    if !raw.contains('\\') {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
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
            _ => return Err(FrameError::InvalidEscape(raw.to_string())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_send_adds_content_length() {
        let frame = Frame::new(Command::Send)
            .header("destination", "/app/chat.sendMessage")
            .header("content-type", "application/json")
            .with_body("{\"a\":1}");

        assert_eq!(
            frame.encode(),
            "SEND\ndestination:/app/chat.sendMessage\ncontent-type:application/json\ncontent-length:7\n\n{\"a\":1}\0"
        );
    }

    #[test]
    fn test_encode_without_body() {
        let frame = Frame::new(Command::Subscribe)
            .header("id", "sub-0")
            .header("destination", "/topic/room.7");

        assert_eq!(frame.encode(), "SUBSCRIBE\nid:sub-0\ndestination:/topic/room.7\n\n\0");
    }

    #[test]
    fn test_connect_headers_are_not_escaped() {
        let frame = Frame::new(Command::Connect).header("host", "broker:61613");
        assert_eq!(frame.encode(), "CONNECT\nhost:broker:61613\n\n\0");

        let frame = Frame::new(Command::Send).header("note", "a:b");
        assert_eq!(frame.encode(), "SEND\nnote:a\\cb\n\n\0");
    }

    #[test]
    fn test_decode_message() {
        let raw = b"MESSAGE\nsubscription:sub-1\ndestination:/topic/room.7\nmessage-id:42\n\nhello\0";
        let (frame, consumed) = Frame::decode(raw).unwrap().unwrap();

        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.get("subscription"), Some("sub-1"));
        assert_eq!(frame.get("destination"), Some("/topic/room.7"));
        assert_eq!(frame.body, "hello");
        assert_eq!(consumed, raw.len());
    }

    #[test]
    fn test_decode_skips_heartbeats_and_crlf() {
        let raw = b"\n\r\nCONNECTED\r\nversion:1.2\r\nheart-beat:0,0\r\n\r\n\0";
        let (frame, _) = Frame::decode(raw).unwrap().unwrap();

        assert_eq!(frame.command, Command::Connected);
        assert_eq!(frame.get("version"), Some("1.2"));
        assert_eq!(frame.get("heart-beat"), Some("0,0"));
    }

    #[test]
    fn test_decode_heartbeat_only() {
        assert_eq!(Frame::decode(b"\n").unwrap(), None);
        assert_eq!(Frame::decode(b"").unwrap(), None);
    }

    #[test]
    fn test_decode_content_length_allows_nul_in_body() {
        let raw = b"MESSAGE\ncontent-length:3\n\na\0b\0";
        let (frame, _) = Frame::decode(raw).unwrap().unwrap();
        assert_eq!(frame.body, "a\0b");
    }

    #[test]
    fn test_decode_first_header_wins() {
        let raw = b"MESSAGE\nfoo:first\nfoo:second\n\n\0";
        let (frame, _) = Frame::decode(raw).unwrap().unwrap();
        assert_eq!(frame.get("foo"), Some("first"));
        assert_eq!(frame.headers.len(), 2);
    }

    #[test]
    fn test_decode_unescapes_headers() {
        let raw = b"MESSAGE\nnote:a\\cb\\nc\\\\d\n\n\0";
        let (frame, _) = Frame::decode(raw).unwrap().unwrap();
        assert_eq!(frame.get("note"), Some("a:b\nc\\d"));
    }

    #[test]
    fn test_decode_all_multiple_frames() {
        let raw = b"RECEIPT\nreceipt-id:1\n\n\0\nMESSAGE\nsubscription:sub-0\n\nhi\0\n";
        let frames = Frame::decode_all(raw).unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].command, Command::Receipt);
        assert_eq!(frames[1].body, "hi");
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            Frame::decode(b"BOGUS\n\n\0"),
            Err(FrameError::UnknownCommand("BOGUS".to_string()))
        );
        assert_eq!(
            Frame::decode(b"MESSAGE\nnocolon\n\n\0"),
            Err(FrameError::MalformedHeader("nocolon".to_string()))
        );
        assert_eq!(
            Frame::decode(b"MESSAGE\nbad:\\t\n\n\0"),
            Err(FrameError::InvalidEscape("\\t".to_string()))
        );
        assert_eq!(
            Frame::decode(b"MESSAGE\n\nbody without nul"),
            Err(FrameError::MissingTerminator)
        );
        assert_eq!(
            Frame::decode(b"MESSAGE\ncontent-length:ten\n\n\0"),
            Err(FrameError::InvalidContentLength("ten".to_string()))
        );
        assert_eq!(
            Frame::decode(b"MESSAGE\ncontent-length:10\n\nshort\0"),
            Err(FrameError::MissingTerminator)
        );
    }

    #[test]
    fn test_encoded_frame_decodes_back() {
        let frame = Frame::new(Command::Send)
            .header("destination", "/app/chat.markAsRead")
            .header("x-note", "line\nbreak")
            .with_body("[1,2,3]");

        let encoded = frame.encode();
        let (decoded, _) = Frame::decode(encoded.as_bytes()).unwrap().unwrap();

        assert_eq!(decoded.get("x-note"), Some("line\nbreak"));
        assert_eq!(decoded.get("content-length"), Some("7"));
        assert_eq!(decoded.body, "[1,2,3]");
    }
}
