//! Protocol frames and their textual encoding.
//!
//! Every frame is a single line of text:
//!
//! | Frame | Encoding |
//! |---|---|
//! | open | `o` |
//! | heartbeat | `h` |
//! | messages | `a` followed by a JSON array of JSON-encoded messages |
//! | close | `c[<code>,"<reason>"]` |
//!
//! Messages are JSON-encoded once, when they are enqueued, and the array
//! frame is assembled by joining those encodings. A receiver can split the
//! array without re-parsing each message's inner structure, and a broadcast
//! encodes a message once no matter how many sessions receive it.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::close::CloseReason;
use crate::errors::FrameError;

/// One application message in its JSON-encoded wire form.
///
/// Cloning is cheap (the encoding is shared), which is what lets a single
/// encoding fan out to many sessions.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedMessage(Arc<str>);

impl EncodedMessage {
    /// Encode a text message as a JSON string.
    pub fn text(message: &str) -> Self {
        Self(Value::String(message.to_owned()).to_string().into())
    }

    /// Serialize `value` to JSON text and carry that text as a string
    /// message, so the client receives the serialized form unchanged.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, FrameError> {
        Ok(Self::text(&serde_json::to_string(value)?))
    }

    /// The encoded JSON text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the encoding is empty (never true for values built here).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode back into message text: JSON strings are unwrapped, any other
    /// JSON value is returned as its JSON text.
    pub fn decode(&self) -> Result<String, FrameError> {
        Ok(value_to_message(serde_json::from_str(&self.0)?))
    }
}

impl fmt::Debug for EncodedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EncodedMessage").field(&&*self.0).finish()
    }
}

/// A single protocol frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Session opened; sent exactly once before any other frame.
    Open,
    /// Keeps idle intermediaries from timing the connection out.
    Heartbeat,
    /// One or more application messages, in enqueue order.
    Messages(Vec<EncodedMessage>),
    /// Terminal frame; nothing follows it on the same transport.
    Close(CloseReason),
}

impl Frame {
    /// Encode to the exact wire text.
    pub fn encode(&self) -> String {
        match self {
            Self::Open => "o".to_owned(),
            Self::Heartbeat => "h".to_owned(),
            Self::Messages(messages) => {
                let body_len: usize = messages.iter().map(|m| m.len() + 1).sum();
                let mut out = String::with_capacity(body_len + 3);
                out.push_str("a[");
                for (i, message) in messages.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(message.as_str());
                }
                out.push(']');
                out
            }
            Self::Close(reason) => {
                let message = Value::String(reason.message.to_string());
                format!("c[{},{message}]", reason.code)
            }
        }
    }

    /// Parse wire text back into a frame.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(FrameError::Empty)?;
        let body = chars.as_str();
        match kind {
            'o' | 'h' if !body.is_empty() => Err(FrameError::TrailingData(kind)),
            'o' => Ok(Self::Open),
            'h' => Ok(Self::Heartbeat),
            'a' => {
                let values: Vec<Value> = serde_json::from_str(body)?;
                Ok(Self::Messages(
                    values
                        .into_iter()
                        .map(|v| EncodedMessage(v.to_string().into()))
                        .collect(),
                ))
            }
            'c' => {
                let (code, message): (u16, String) = serde_json::from_str(body)?;
                Ok(Self::Close(CloseReason::new(code, message)))
            }
            other => Err(FrameError::UnknownKind(other)),
        }
    }

    /// Build a messages frame from plain text messages.
    pub fn messages<I, S>(messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::Messages(
            messages
                .into_iter()
                .map(|m| EncodedMessage::text(m.as_ref()))
                .collect(),
        )
    }

    /// Whether no further frame may follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Close(_))
    }
}

/// Decode an inbound payload posted by a client.
///
/// Polling transports post a JSON array of messages; the full-duplex
/// transport also accepts a bare JSON value as a single message.
pub fn decode_payload(payload: &str) -> Result<Vec<String>, FrameError> {
    match serde_json::from_str::<Value>(payload)? {
        Value::Array(values) => Ok(values.into_iter().map(value_to_message).collect()),
        single => Ok(vec![value_to_message(single)]),
    }
}

fn value_to_message(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    #[test]
    fn open_and_heartbeat_encoding() {
        assert_eq!(Frame::Open.encode(), "o");
        assert_eq!(Frame::Heartbeat.encode(), "h");
    }

    #[test]
    fn messages_encoding_matches_wire_format() {
        let frame = Frame::messages(["x", "y"]);
        assert_eq!(frame.encode(), r#"a["x","y"]"#);
    }

    #[test]
    fn messages_escape_quotes_and_control_chars() {
        let frame = Frame::messages(["say \"hi\"\n"]);
        assert_eq!(frame.encode(), r#"a["say \"hi\"\n"]"#);
    }

    #[test]
    fn empty_messages_frame() {
        assert_eq!(Frame::Messages(vec![]).encode(), "a[]");
    }

    #[test]
    fn json_values_travel_as_string_messages() {
        let msg = EncodedMessage::json(&serde_json::json!({"n": 1})).unwrap();
        assert_eq!(Frame::Messages(vec![msg.clone()]).encode(), r#"a["{\"n\":1}"]"#);
        assert_eq!(msg.decode().unwrap(), r#"{"n":1}"#);
    }

    #[test]
    fn close_encoding() {
        assert_eq!(
            Frame::Close(CloseReason::GO_AWAY).encode(),
            r#"c[3000,"Go away!"]"#
        );
        assert_eq!(
            Frame::Close(CloseReason::ANOTHER_CONNECTION).encode(),
            r#"c[2010,"Another connection still open"]"#
        );
    }

    #[test]
    fn decode_each_kind() {
        assert_eq!(Frame::decode("o").unwrap(), Frame::Open);
        assert_eq!(Frame::decode("h").unwrap(), Frame::Heartbeat);
        assert_eq!(
            Frame::decode(r#"c[1002,"Connection interrupted"]"#).unwrap(),
            Frame::Close(CloseReason::CONNECTION_INTERRUPTED)
        );
        let frame = Frame::decode(r#"a["a","b"]"#).unwrap();
        assert_eq!(frame, Frame::messages(["a", "b"]));
    }

    #[test]
    fn decode_errors() {
        assert_matches!(Frame::decode(""), Err(FrameError::Empty));
        assert_matches!(Frame::decode("z"), Err(FrameError::UnknownKind('z')));
        assert_matches!(Frame::decode("ox"), Err(FrameError::TrailingData('o')));
        assert_matches!(Frame::decode("a[\"x\""), Err(FrameError::Json(_)));
        assert_matches!(Frame::decode("c[\"x\"]"), Err(FrameError::Json(_)));
    }

    #[test]
    fn close_is_terminal() {
        assert!(Frame::Close(CloseReason::GO_AWAY).is_terminal());
        assert!(!Frame::Heartbeat.is_terminal());
    }

    #[test]
    fn payload_array_of_strings() {
        assert_eq!(decode_payload(r#"["a","b"]"#).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn payload_single_string() {
        assert_eq!(decode_payload(r#""solo""#).unwrap(), vec!["solo"]);
    }

    #[test]
    fn payload_non_string_elements_keep_json_text() {
        assert_eq!(
            decode_payload(r#"[1,{"k":true}]"#).unwrap(),
            vec!["1", r#"{"k":true}"#]
        );
    }

    #[test]
    fn payload_broken_json() {
        assert_matches!(decode_payload("[\"a\""), Err(FrameError::Json(_)));
        assert_matches!(decode_payload(""), Err(FrameError::Json(_)));
    }

    #[test]
    fn encoded_message_decode() {
        assert_eq!(EncodedMessage::text("hé").decode().unwrap(), "hé");
    }

    proptest! {
        #[test]
        fn messages_frame_round_trip(messages in proptest::collection::vec(".*", 0..16)) {
            let encoded = Frame::messages(&messages).encode();
            let Frame::Messages(decoded) = Frame::decode(&encoded).unwrap() else {
                panic!("expected messages frame");
            };
            let texts: Vec<String> = decoded.iter().map(|m| m.decode().unwrap()).collect();
            prop_assert_eq!(texts, messages);
        }
    }
}
