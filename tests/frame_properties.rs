//! Property tests for frame splitting and decoding.

use asterisk_ami_tokio::protocol::{feed, parse, FrameDecoder};
use proptest::prelude::*;

fn header_line() -> impl Strategy<Value = String> {
    ("[A-Za-z][A-Za-z0-9-]{0,15}", "[ -~]{0,30}").prop_map(|(k, v)| format!("{}: {}", k, v))
}

fn frame() -> impl Strategy<Value = String> {
    prop::collection::vec(header_line(), 1..8).prop_map(|lines| lines.join("\r\n"))
}

fn stream() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(frame(), 0..10)
}

fn wire(frames: &[String]) -> Vec<u8> {
    frames
        .iter()
        .flat_map(|f| format!("{}\r\n\r\n", f).into_bytes())
        .collect()
}

proptest! {
    #[test]
    fn chunking_does_not_change_frames(frames in stream(), cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..12)) {
        let data = wire(&frames);
        let (whole, rest) = feed(&[], &data);
        prop_assert!(rest.is_empty());

        let mut positions: Vec<usize> = cuts.iter().map(|i| i.index(data.len() + 1)).collect();
        positions.sort_unstable();
        positions.dedup();

        let mut buffer = Vec::new();
        let mut collected = Vec::new();
        let mut start = 0;
        for end in positions.into_iter().chain(std::iter::once(data.len())) {
            let (frames, remainder) = feed(&buffer, &data[start..end]);
            collected.extend(frames);
            buffer = remainder;
            start = end;
        }

        prop_assert!(buffer.is_empty());
        prop_assert_eq!(&collected, &whole);
        prop_assert_eq!(collected, frames);
    }

    #[test]
    fn parse_never_fails(text in "[ -~\r\n]{0,200}") {
        let message = parse(&text);
        prop_assert_eq!(message.raw, text);
    }

    #[test]
    fn decoder_matches_single_feed(frames in stream(), chunk in 1usize..64) {
        let data = wire(&frames);
        let mut decoder = FrameDecoder::new();
        let mut names = Vec::new();
        for piece in data.chunks(chunk) {
            for message in decoder.decode(piece).unwrap() {
                names.push(message.raw);
            }
        }
        prop_assert_eq!(decoder.buffered(), 0);
        prop_assert_eq!(names, frames);
    }
}
