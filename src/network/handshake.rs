//! Connection Handshake
//!
//! The very first bytes on a connection are the player's token:
//! `i32` little-endian byte length followed by the UTF-8 bytes. The server
//! does not acknowledge it. Tagged messages only start afterwards.

use std::fmt;
use std::io::Read;

use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{ClientError, ProtocolError};
use crate::network::channel::FramedChannel;

/// Buffer reserved up front when reading a token; longer tokens grow it.
const INITIAL_TOKEN_CAPACITY: usize = 256;

/// Authentication token sent once per connection.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    /// Wrap a token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short non-reversible identifier safe to put in logs.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"codegame-token:");
        hasher.update(self.0.as_bytes());
        let hash = hasher.finalize();
        hex::encode(&hash[..8])
    }

    /// Handshake bytes: length prefix then UTF-8 payload.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let bytes = self.0.as_bytes();
        let len =
            i32::try_from(bytes.len()).map_err(|_| ProtocolError::TokenTooLong(bytes.len()))?;
        let mut frame = Vec::with_capacity(4 + bytes.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(bytes);
        Ok(frame)
    }

    /// Read a handshake written by [`Token::encode`].
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self, ClientError> {
        let mut len = [0u8; 4];
        reader.read_exact(&mut len)?;
        let len = i32::from_le_bytes(len);
        let len = usize::try_from(len).map_err(|_| ProtocolError::NegativeLength(len))?;
        // The prefix is peer-controlled: grow with the bytes that actually arrive.
        let mut bytes = Vec::with_capacity(len.min(INITIAL_TOKEN_CAPACITY));
        reader.take(len as u64).read_to_end(&mut bytes)?;
        if bytes.len() != len {
            return Err(ProtocolError::Truncated.into());
        }
        String::from_utf8(bytes)
            .map(Self)
            .map_err(|_| ProtocolError::InvalidToken.into())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.fingerprint())
    }
}

impl From<&str> for Token {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for Token {
    fn from(token: String) -> Self {
        Self(token)
    }
}

/// Send the token as the first bytes of the connection.
///
/// Any failure leaves the connection unusable.
pub fn perform(channel: &mut FramedChannel, token: &Token) -> Result<(), ClientError> {
    let frame = token.encode()?;
    channel.send_raw(&frame)?;
    info!(token = %token.fingerprint(), "Handshake sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::ProtocolRevision;
    use proptest::prelude::*;
    use std::io::{BufReader, Cursor};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_handshake_bytes() {
        let token = Token::new("0000000000000000");
        let bytes = token.encode().unwrap();
        assert_eq!(&bytes[..4], &[16, 0, 0, 0]);
        assert_eq!(&bytes[4..], b"0000000000000000");
    }

    #[test]
    fn test_empty_token() {
        let bytes = Token::new("").encode().unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 0]);
        let parsed = Token::read_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(parsed.as_str(), "");
    }

    #[test]
    fn test_length_counts_bytes_not_chars() {
        let bytes = Token::new("жетон").encode().unwrap();
        assert_eq!(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), 10);
    }

    #[test]
    fn test_perform_writes_first_bytes() {
        let sink = SharedSink::default();
        let mut channel = FramedChannel::new(
            BufReader::new(Cursor::new(Vec::<u8>::new())),
            sink.clone(),
            ProtocolRevision::Tagged,
        );

        perform(&mut channel, &Token::new("abc")).unwrap();

        let written = sink.0.lock().unwrap().clone();
        assert_eq!(written, vec![3, 0, 0, 0, b'a', b'b', b'c']);
    }

    #[test]
    fn test_negative_length_rejected() {
        let result = Token::read_from(&mut Cursor::new(vec![0xff, 0xff, 0xff, 0xff]));
        assert!(matches!(
            result,
            Err(ClientError::Protocol(ProtocolError::NegativeLength(-1)))
        ));
    }

    #[test]
    fn test_huge_length_prefix_with_short_body() {
        let mut input = i32::MAX.to_le_bytes().to_vec();
        input.extend_from_slice(b"abc");
        let result = Token::read_from(&mut Cursor::new(input));
        assert!(matches!(
            result,
            Err(ClientError::Protocol(ProtocolError::Truncated))
        ));
    }

    #[test]
    fn test_long_token_read_in_full() {
        let raw = "t".repeat(INITIAL_TOKEN_CAPACITY * 4 + 3);
        let bytes = Token::new(raw.as_str()).encode().unwrap();
        let parsed = Token::read_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(parsed.as_str(), raw);
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let result = Token::read_from(&mut Cursor::new(vec![1, 0, 0, 0, 0xff]));
        assert!(matches!(
            result,
            Err(ClientError::Protocol(ProtocolError::InvalidToken))
        ));
    }

    #[test]
    fn test_fingerprint_hides_token() {
        let token = Token::new("super-secret-token");
        let fingerprint = token.fingerprint();
        assert_eq!(fingerprint.len(), 16);
        assert!(!fingerprint.contains("secret"));
        assert_eq!(fingerprint, Token::new("super-secret-token").fingerprint());
        assert_ne!(fingerprint, Token::new("other").fingerprint());
        assert!(!format!("{:?}", token).contains("secret"));
    }

    proptest! {
        #[test]
        fn prop_handshake_is_length_then_utf8(raw in ".*") {
            let bytes = Token::new(raw.clone()).encode().unwrap();
            let mut expected = (raw.len() as i32).to_le_bytes().to_vec();
            expected.extend_from_slice(raw.as_bytes());
            prop_assert_eq!(&bytes, &expected);

            let parsed = Token::read_from(&mut Cursor::new(bytes)).unwrap();
            prop_assert_eq!(parsed.as_str(), raw.as_str());
        }
    }
}
