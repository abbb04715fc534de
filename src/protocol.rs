//! AMI wire framing: frame splitting and record decoding

use crate::{
    command::AmiAction,
    constants::{FRAME_TERMINATOR, KEY_VALUE_SEPARATOR, LINE_TERMINATOR, MAX_BUFFER_SIZE},
    error::{AmiError, AmiResult},
    event::AmiEvent,
    headers::AmiHeader,
};
use std::collections::HashMap;

/// AMI message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Asynchronous notification (frame has an `Event` key)
    Event,
    /// Reply to an action (any frame without an `Event` key)
    Response,
}

/// Decoded AMI frame
#[derive(Debug, Clone, PartialEq)]
pub struct AmiMessage {
    /// Event or response
    pub kind: MessageKind,
    /// Value of the `Event` key for events, of the `Response` key otherwise
    pub name: String,
    /// Key/value pairs, last occurrence of a duplicate key wins
    pub fields: HashMap<String, String>,
    /// Frame text as received, without the terminator
    pub raw: String,
}

impl AmiMessage {
    /// Convert an event record into an [`AmiEvent`].
    pub fn into_event(self) -> Option<AmiEvent> {
        match self.kind {
            MessageKind::Event => Some(AmiEvent::new(self.name, self.fields)),
            MessageKind::Response => None,
        }
    }
}

/// Encode an action name and ordered parameters into a request frame.
pub fn encode<K, V>(action: &str, params: &[(K, V)]) -> AmiResult<Vec<u8>>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let action = params
        .iter()
        .fold(AmiAction::new(action), |a, (k, v)| a.param(k, v.as_ref()));
    Ok(action
        .to_wire_format()?
        .into_bytes())
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
}

/// Append `new_bytes` to `buffer` and split off every complete frame.
///
/// Returns the frames in arrival order plus the unterminated remainder.
/// Splitting is purely positional, so feeding a stream in any number of
/// chunks yields the same frames as feeding it whole. Empty frames (stray
/// blank lines) are dropped.
pub fn feed(buffer: &[u8], new_bytes: &[u8]) -> (Vec<String>, Vec<u8>) {
    let mut data = Vec::with_capacity(buffer.len() + new_bytes.len());
    data.extend_from_slice(buffer);
    data.extend_from_slice(new_bytes);

    let terminator = FRAME_TERMINATOR.as_bytes();
    let mut frames = Vec::new();
    let mut start = 0;
    while let Some(pos) = find_subslice(&data[start..], terminator) {
        let frame = &data[start..start + pos];
        start += pos + terminator.len();
        let text = String::from_utf8_lossy(frame);
        let text = text.trim_start_matches(LINE_TERMINATOR);
        if !text.is_empty() {
            frames.push(text.to_string());
        }
    }
    data.drain(..start);
    (frames, data)
}

/// Decode a frame into a record.
///
/// Each line is split at the first `": "`. Lines without that separator are
/// skipped, so decoding never fails; a damaged frame degrades to fewer
/// fields.
pub fn parse(frame: &str) -> AmiMessage {
    let mut fields = HashMap::new();
    for line in frame.split(LINE_TERMINATOR) {
        if let Some((key, value)) = line.split_once(KEY_VALUE_SEPARATOR) {
            fields.insert(key.to_string(), value.to_string());
        }
    }

    let (kind, name) = match fields.get(AmiHeader::Event.as_str()) {
        Some(name) => (MessageKind::Event, name.clone()),
        None => (
            MessageKind::Response,
            fields
                .get(AmiHeader::Response.as_str())
                .cloned()
                .unwrap_or_default(),
        ),
    };

    AmiMessage {
        kind,
        name,
        fields,
        raw: frame.to_string(),
    }
}

/// Stateful frame decoder for one connection generation.
///
/// Holds the bytes that have not yet formed a complete frame.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Create new decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add bytes and return every record completed by them.
    ///
    /// Fails only if the buffer grows past [`MAX_BUFFER_SIZE`] without a
    /// terminator, which the reader treats as a broken connection.
    pub fn decode(&mut self, data: &[u8]) -> AmiResult<Vec<AmiMessage>> {
        let (frames, remainder) = feed(&self.buffer, data);
        self.buffer = remainder;
        if self.buffer.len() > MAX_BUFFER_SIZE {
            return Err(AmiError::protocol_error(format!(
                "Buffer exceeded {} bytes without a frame terminator",
                MAX_BUFFER_SIZE
            )));
        }
        Ok(frames
            .iter()
            .map(|f| parse(f))
            .collect())
    }

    /// Remove and return the first line if a complete one is buffered.
    ///
    /// Used for the greeting banner, the only unframed line in AMI.
    pub fn take_line(&mut self) -> Option<String> {
        let pos = find_subslice(&self.buffer, LINE_TERMINATOR.as_bytes())?;
        let line = String::from_utf8_lossy(&self.buffer[..pos]).into_owned();
        self.buffer
            .drain(..pos + LINE_TERMINATOR.len());
        Some(line)
    }

    /// Add bytes without decoding.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer
            .extend_from_slice(data);
    }

    /// Number of buffered, not yet framed, bytes.
    pub fn buffered(&self) -> usize {
        self.buffer
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_action() {
        let wire = encode("Originate", &[("Channel", "PJSIP/100"), ("Exten", "200")]).unwrap();
        assert_eq!(
            wire,
            b"Action: Originate\r\nChannel: PJSIP/100\r\nExten: 200\r\n\r\n".to_vec()
        );

        let no_params: &[(&str, &str)] = &[];
        assert_eq!(encode("Ping", no_params).unwrap(), b"Action: Ping\r\n\r\n".to_vec());
    }

    #[test]
    fn test_parse_last_write_wins() {
        let (frames, rest) = feed(b"", b"A: 1\r\nA: 2\r\n\r\n");
        assert!(rest.is_empty());
        assert_eq!(frames.len(), 1);
        let record = parse(&frames[0]);
        assert_eq!(record.fields.len(), 1);
        assert_eq!(
            record
                .fields
                .get("A")
                .map(|s| s.as_str()),
            Some("2")
        );
    }

    #[test]
    fn test_parse_skips_malformed_lines() {
        let record = parse("Event: Foo\r\ngarbage without separator\r\nX:1\r\nY: 2");
        assert_eq!(record.kind, MessageKind::Event);
        assert_eq!(record.name, "Foo");
        assert_eq!(record.fields.len(), 2);
        assert!(!record
            .fields
            .contains_key("X"));
        assert_eq!(
            record
                .fields
                .get("Y")
                .map(|s| s.as_str()),
            Some("2")
        );
    }

    #[test]
    fn test_parse_value_split_at_first_separator() {
        let record = parse("Response: Success\r\nMessage: a: b: c");
        assert_eq!(
            record
                .fields
                .get("Message")
                .map(|s| s.as_str()),
            Some("a: b: c")
        );
    }

    #[test]
    fn test_frame_without_event_key_is_response() {
        let record = parse("Response: Success\r\nPing: Pong");
        assert_eq!(record.kind, MessageKind::Response);
        assert_eq!(record.name, "Success");

        let record = parse("Foo: Bar");
        assert_eq!(record.kind, MessageKind::Response);
        assert_eq!(record.name, "");
        assert!(record
            .into_event()
            .is_none());
    }

    #[test]
    fn test_event_record_into_event() {
        let event = parse("Event: Foo\r\nX: 1")
            .into_event()
            .unwrap();
        assert_eq!(event.name(), "Foo");
        assert_eq!(event.field("X"), "1");
        assert_eq!(event.field("Event"), "Foo");
    }

    #[test]
    fn test_feed_keeps_remainder() {
        let (frames, rest) = feed(b"", b"Event: A\r\n\r\nEvent: B\r\nX: ");
        assert_eq!(frames, vec!["Event: A".to_string()]);
        assert_eq!(rest, b"Event: B\r\nX: ".to_vec());

        let (frames, rest) = feed(&rest, b"1\r\n\r\n");
        assert_eq!(frames, vec!["Event: B\r\nX: 1".to_string()]);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_feed_terminator_split_across_chunks() {
        let (frames, rest) = feed(b"", b"Response: Success\r\n\r");
        assert!(frames.is_empty());
        let (frames, rest) = feed(&rest, b"\n");
        assert_eq!(frames, vec!["Response: Success".to_string()]);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_feed_byte_at_a_time_matches_whole() {
        let stream = b"Event: A\r\nX: 1\r\n\r\nResponse: Success\r\n\r\nEvent: B\r\n\r\npartial";
        let (whole, whole_rest) = feed(b"", stream);

        let mut buffer = Vec::new();
        let mut pieces = Vec::new();
        for byte in stream.iter() {
            let (frames, rest) = feed(&buffer, std::slice::from_ref(byte));
            pieces.extend(frames);
            buffer = rest;
        }
        assert_eq!(pieces, whole);
        assert_eq!(buffer, whole_rest);
        assert_eq!(whole.len(), 3);
    }

    #[test]
    fn test_feed_skips_empty_frames() {
        let (frames, _) = feed(b"", b"\r\n\r\nEvent: A\r\n\r\n");
        assert_eq!(frames, vec!["Event: A".to_string()]);
    }

    #[test]
    fn test_invalid_utf8_degrades() {
        let (frames, _) = feed(b"", b"Event: Caf\xe9\r\nX: 1\r\n\r\n");
        let record = parse(&frames[0]);
        assert_eq!(record.kind, MessageKind::Event);
        assert_eq!(
            record
                .fields
                .get("X")
                .map(|s| s.as_str()),
            Some("1")
        );
    }

    #[test]
    fn test_decoder_banner_then_frames() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"Asterisk Call Manager/7.0.3\r\nResponse: Success\r\n");
        assert_eq!(decoder.take_line(), Some("Asterisk Call Manager/7.0.3".to_string()));

        let records = decoder
            .decode(b"Message: Authentication accepted\r\n\r\nEvent: FullyBooted\r\n")
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, MessageKind::Response);
        assert_eq!(
            records[0].raw,
            "Response: Success\r\nMessage: Authentication accepted"
        );
        assert_eq!(decoder.buffered(), "Event: FullyBooted\r\n".len());
    }

    #[test]
    fn test_take_line_needs_terminator() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"Asterisk Call Manager");
        assert_eq!(decoder.take_line(), None);
        decoder.push(b"/5.0\r\n");
        assert_eq!(decoder.take_line(), Some("Asterisk Call Manager/5.0".to_string()));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_rejects_runaway_buffer() {
        let mut decoder = FrameDecoder::new();
        let chunk = vec![b'x'; 4 * 1024 * 1024];
        let mut failed = false;
        for _ in 0..(MAX_BUFFER_SIZE / chunk.len() + 2) {
            if decoder
                .decode(&chunk)
                .is_err()
            {
                failed = true;
                break;
            }
        }
        assert!(failed, "unterminated data beyond the limit must be rejected");
    }
}
