//! Line framing rules.
//!
//! Wire format: one UTF-8 line per frame, terminated by `\n`. A trailing
//! `\r` is tolerated on input.
//!
//! ```text
//! peer  -> relay   base64(SPKI DER of peer key)
//! relay -> peer    base64(SPKI DER of relay key)
//! either way       base64(ciphertext), one message per line
//! ```
//!
//! Frames are positional: the first line in each direction is a key, every
//! later line is a message. There are no type tags and no error frames.

use crate::error::FrameError;

/// Default upper bound on a single line, in bytes.
///
/// Comfortably above a 4096-bit key blob or ciphertext (~740 bytes base64).
pub const MAX_LINE_LENGTH: usize = 8192;

/// Local command that tears the client down instead of being sent.
pub const EXIT_COMMAND: &str = "exit";

/// Check that `text` can be carried in a single line.
pub fn validate_plaintext(text: &str) -> Result<&str, FrameError> {
    if text.contains(['\n', '\r']) {
        return Err(FrameError::ContainsNewline);
    }
    Ok(text)
}

/// What the user typed, from the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outgoing<'a> {
    /// Text to encrypt and send.
    Message(&'a str),
    /// Local request to disconnect.
    Exit,
}

impl<'a> Outgoing<'a> {
    /// Classify user input. `exit` matches case-insensitively, ignoring
    /// surrounding whitespace.
    pub fn parse(input: &'a str) -> Self {
        if input.trim().eq_ignore_ascii_case(EXIT_COMMAND) {
            Outgoing::Exit
        } else {
            Outgoing::Message(input)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newlines_rejected() {
        assert_eq!(validate_plaintext("a\nb"), Err(FrameError::ContainsNewline));
        assert_eq!(validate_plaintext("a\r"), Err(FrameError::ContainsNewline));
        assert_eq!(validate_plaintext("plain text"), Ok("plain text"));
    }

    #[test]
    fn test_exit_command() {
        assert_eq!(Outgoing::parse("exit"), Outgoing::Exit);
        assert_eq!(Outgoing::parse("  EXIT "), Outgoing::Exit);
        assert_eq!(Outgoing::parse("exit now"), Outgoing::Message("exit now"));
        assert_eq!(Outgoing::parse(""), Outgoing::Message(""));
    }
}
