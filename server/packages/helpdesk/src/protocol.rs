//! Line protocol spoken between the help desk and its clients.
//!
//! Every message is one newline-terminated UTF-8 line. Two exact,
//! case-sensitive lines are reserved as server→client control tokens; any
//! other line is a chat body.

use helpdesk_error::HelpdeskError;

pub const WAIT_TOKEN: &str = "/WAIT";
pub const START_TOKEN: &str = "/START";

/// Longest accepted line, terminator excluded.
pub const MAX_FRAME_BYTES: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Queued behind other clients; input must stay blocked.
    Wait,
    /// Promoted to the active session; input may resume.
    Start,
    Chat(String),
}

impl Frame {
    pub fn parse(line: &str) -> Self {
        match line {
            WAIT_TOKEN => Self::Wait,
            START_TOKEN => Self::Start,
            other => Self::Chat(other.to_string()),
        }
    }

    /// Chat text that the receiving side would not read back as itself.
    pub fn chat(text: &str) -> Result<Self, HelpdeskError> {
        let line = single_line(text);
        if is_reserved(&line) {
            return Err(HelpdeskError::ReservedToken { token: line });
        }
        ensure_fits(&line)?;
        Ok(Self::Chat(line))
    }

    /// Chat text going client → server, where control tokens carry no meaning.
    pub fn relay(text: &str) -> Result<Self, HelpdeskError> {
        let line = single_line(text);
        ensure_fits(&line)?;
        Ok(Self::Chat(line))
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Wait => WAIT_TOKEN,
            Self::Start => START_TOKEN,
            Self::Chat(text) => text,
        }
    }

    pub fn into_line(self) -> String {
        match self {
            Self::Wait => WAIT_TOKEN.to_string(),
            Self::Start => START_TOKEN.to_string(),
            Self::Chat(text) => single_line(&text),
        }
    }
}

pub fn is_reserved(line: &str) -> bool {
    line == WAIT_TOKEN || line == START_TOKEN
}

/// Lines over [`MAX_FRAME_BYTES`] would be dropped by the peer's decoder.
pub fn ensure_fits(line: &str) -> Result<(), HelpdeskError> {
    if line.len() > MAX_FRAME_BYTES {
        return Err(HelpdeskError::MessageTooLong {
            length: line.len(),
            limit: MAX_FRAME_BYTES,
        });
    }
    Ok(())
}

fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_tokens_match_exactly() {
        assert_eq!(Frame::parse("/WAIT"), Frame::Wait);
        assert_eq!(Frame::parse("/START"), Frame::Start);
        assert_eq!(Frame::parse("/wait"), Frame::Chat("/wait".to_string()));
        assert_eq!(Frame::parse(" /START"), Frame::Chat(" /START".to_string()));
        assert_eq!(Frame::parse("Hola"), Frame::Chat("Hola".to_string()));
    }

    #[test]
    fn chat_text_is_flattened_to_one_line() {
        let frame = Frame::chat("line one\nline two\r\n").expect("chat frame");
        assert_eq!(frame.into_line(), "line one line two  ");
    }

    #[test]
    fn chat_refuses_reserved_tokens() {
        let err = Frame::chat("/START").expect_err("reserved");
        assert!(matches!(err, HelpdeskError::ReservedToken { token } if token == "/START"));
        assert!(Frame::chat("/START please").is_ok());
        assert_eq!(
            Frame::relay("/START").expect("relay").into_line(),
            "/START"
        );
    }

    #[test]
    fn chat_longer_than_a_frame_is_refused() {
        let fits = "x".repeat(MAX_FRAME_BYTES);
        assert!(Frame::chat(&fits).is_ok());
        assert!(Frame::relay(&fits).is_ok());

        let long = "x".repeat(MAX_FRAME_BYTES + 1);
        for result in [Frame::chat(&long), Frame::relay(&long)] {
            let err = result.expect_err("too long");
            assert!(matches!(
                err,
                HelpdeskError::MessageTooLong { length, limit }
                    if length == MAX_FRAME_BYTES + 1 && limit == MAX_FRAME_BYTES
            ));
            assert!(!err.is_fatal());
        }
    }
}
