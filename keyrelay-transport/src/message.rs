//! Zeroizing message wrapper.
//!
//! Plaintext is short-lived by construction. Callers must opt in to copying.

use std::fmt;

use zeroize::Zeroizing;

/// A received message that zeroizes on drop.
///
/// Does not implement `Clone`. Use [`into_string`](Self::into_string) or copy
/// explicitly to keep the text around.
pub struct Message(Zeroizing<String>);

impl Message {
    pub(crate) fn new(text: Zeroizing<String>) -> Self {
        Self(text)
    }

    /// Message text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Message as raw UTF-8 bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the message is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy the text out. The internal buffer is zeroized as `self` drops.
    pub fn into_string(self) -> String {
        self.0.as_str().to_owned()
    }
}

// Length only: plaintext must not end up in logs.
impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(text: &str) -> Message {
        Message::new(Zeroizing::new(text.to_string()))
    }

    #[test]
    fn test_accessors() {
        let m = msg("secret message");
        assert_eq!(m.as_str(), "secret message");
        assert_eq!(m.as_bytes(), b"secret message");
        assert_eq!(m.len(), 14);
        assert!(!m.is_empty());
        assert!(msg("").is_empty());
    }

    #[test]
    fn test_into_string() {
        assert_eq!(msg("hello world").into_string(), "hello world");
    }

    #[test]
    fn test_debug_hides_text() {
        let rendered = format!("{:?}", msg("do not log me"));
        assert!(!rendered.contains("do not log me"));
        assert!(rendered.contains("13"));
    }
}
