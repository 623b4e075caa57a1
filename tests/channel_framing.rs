mod common;

use std::io;
use std::time::Duration;

use common::{image_reply, Event, ScriptedTransport};
use tally_link::{encode_length_prefixed, ProtocolError, ReliableByteChannel};

const TIMEOUT: Duration = Duration::from_millis(80);
const MAX_PAYLOAD: usize = 1024 * 1024;

fn channel(events: Vec<Event>) -> ReliableByteChannel<ScriptedTransport> {
    ReliableByteChannel::new(ScriptedTransport::new(events), MAX_PAYLOAD)
}

#[test]
fn payload_survives_arbitrary_fragmentation() {
    let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
    let framed = encode_length_prefixed(&payload).unwrap();
    let (header, body) = framed.split_at(4);

    let mut events = vec![
        Event::Data(header[..2].to_vec()),
        Event::Data(header[2..].to_vec()),
    ];
    for fragment in [&body[..1], &body[1..10], &body[10..400], &body[400..999], &body[999..]] {
        events.push(Event::Data(fragment.to_vec()));
    }
    let mut ch = channel(events);

    let received = ch.read_length_prefixed_payload(TIMEOUT).unwrap();
    assert_eq!(received, payload);
    assert_eq!(ch.traffic().0, 1004);
}

#[test]
fn idle_reads_between_fragments_are_tolerated() {
    let framed = encode_length_prefixed(b"jpeg-bytes").unwrap();
    let mut ch = channel(vec![
        Event::Data(framed[..3].to_vec()),
        Event::Fail(io::ErrorKind::WouldBlock),
        Event::Data(framed[3..8].to_vec()),
        Event::Fail(io::ErrorKind::Interrupted),
        Event::Data(framed[8..].to_vec()),
    ]);

    let received = ch
        .read_length_prefixed_payload(Duration::from_secs(2))
        .unwrap();
    assert_eq!(received, b"jpeg-bytes");
}

#[test]
fn zero_length_payload_is_empty() {
    let mut ch = channel(vec![image_reply(b"")]);
    assert!(ch.read_length_prefixed_payload(TIMEOUT).unwrap().is_empty());
}

#[test]
fn no_header_is_timeout() {
    let mut ch = channel(vec![Event::Stall]);
    let err = ch.read_length_prefixed_payload(TIMEOUT).unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::Timeout {
            wanted: 4,
            received: 0
        }
    ));
}

#[test]
fn stalled_body_is_incomplete_and_does_not_leak() {
    let first = encode_length_prefixed(b"0123456789").unwrap();
    let mut ch = channel(vec![
        Event::Data(first[..4].to_vec()),
        Event::Stall,
        // The rest of the first image shows up after the deadline.
        Event::Data(first[4..].to_vec()),
        Event::Stall,
        image_reply(b"second"),
    ]);

    let err = ch.read_length_prefixed_payload(TIMEOUT).unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::IncompleteTransfer {
            declared: 10,
            received: 0
        }
    ));

    let next = ch.read_length_prefixed_payload(TIMEOUT).unwrap();
    assert_eq!(next, b"second");
}

#[test]
fn partial_header_is_discarded_with_late_bytes() {
    let first = encode_length_prefixed(b"0123456789").unwrap();
    let mut ch = channel(vec![
        Event::Data(first[..2].to_vec()),
        Event::Stall,
        // Rest of the header and the whole body arrive after the deadline.
        Event::Data(first[2..].to_vec()),
        Event::Stall,
        image_reply(b"second"),
    ]);

    let err = ch.read_length_prefixed_payload(TIMEOUT).unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::Timeout {
            wanted: 4,
            received: 2
        }
    ));
    assert_eq!(ch.read_length_prefixed_payload(TIMEOUT).unwrap(), b"second");
}

#[test]
fn read_error_mid_body_drains_remainder() {
    let first = encode_length_prefixed(b"abcdef").unwrap();
    let mut ch = channel(vec![
        Event::Data(first[..6].to_vec()),
        Event::Fail(io::ErrorKind::ConnectionReset),
        Event::Data(first[6..].to_vec()),
        Event::Stall,
        image_reply(b"next"),
    ]);

    let err = ch.read_length_prefixed_payload(TIMEOUT).unwrap_err();
    assert!(matches!(err, ProtocolError::ChannelRead { .. }));
    assert_eq!(ch.read_length_prefixed_payload(TIMEOUT).unwrap(), b"next");
}

#[test]
fn partial_body_reports_bytes_received() {
    let first = encode_length_prefixed(b"abcdefgh").unwrap();
    let mut ch = channel(vec![
        Event::Data(first[..7].to_vec()),
        Event::Stall,
        Event::Data(first[7..].to_vec()),
        Event::Stall,
        image_reply(b"ok"),
    ]);

    match ch.read_length_prefixed_payload(TIMEOUT) {
        Err(ProtocolError::IncompleteTransfer { declared, received }) => {
            assert_eq!(declared, 8);
            assert_eq!(received, 3);
        }
        other => panic!("expected IncompleteTransfer, got {:?}", other),
    }
    assert_eq!(ch.read_length_prefixed_payload(TIMEOUT).unwrap(), b"ok");
}

#[test]
fn end_of_stream_mid_body_is_incomplete() {
    let framed = encode_length_prefixed(b"truncated").unwrap();
    let mut ch = channel(vec![Event::Data(framed[..6].to_vec()), Event::Data(vec![])]);

    let err = ch.read_length_prefixed_payload(TIMEOUT).unwrap_err();
    assert_eq!(err.code(), "INCOMPLETE_TRANSFER");
}

#[test]
fn oversized_declaration_is_rejected_before_reading_body() {
    let mut ch = ReliableByteChannel::new(
        ScriptedTransport::new(vec![
            Event::Data(1_000u32.to_le_bytes().to_vec()),
            Event::Data(vec![0u8; 64]),
            Event::Stall,
            image_reply(b"small"),
        ]),
        100,
    );

    let err = ch.read_length_prefixed_payload(TIMEOUT).unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::OversizedPayload {
            declared: 1000,
            limit: 100
        }
    ));
    assert_eq!(ch.read_length_prefixed_payload(TIMEOUT).unwrap(), b"small");
}

#[test]
fn hard_read_error_is_channel_read() {
    let mut ch = channel(vec![Event::Fail(io::ErrorKind::BrokenPipe)]);
    let err = ch.read_length_prefixed_payload(TIMEOUT).unwrap_err();
    assert!(matches!(err, ProtocolError::ChannelRead { .. }));
}

#[test]
fn capture_request_is_exact_command() {
    let mut ch = channel(vec![]);
    ch.request_capture().unwrap();
    assert_eq!(ch.transport_mut().written, b"CAPTURE\n");
}

#[test]
fn short_writes_are_completed() {
    let mut transport = ScriptedTransport::new(vec![]);
    transport.write_chunk = Some(3);
    let mut ch = ReliableByteChannel::new(transport, MAX_PAYLOAD);

    ch.send_bytes(b"<person:1,car:1>").unwrap();
    assert_eq!(ch.transport_mut().written, b"<person:1,car:1>");
    assert_eq!(ch.traffic().1, 16);
}

#[test]
fn zero_byte_write_is_an_error() {
    let mut transport = ScriptedTransport::new(vec![]);
    transport.write_chunk = Some(0);
    let mut ch = ReliableByteChannel::new(transport, MAX_PAYLOAD);

    match ch.send_bytes(b"<a:1>") {
        Err(ProtocolError::ChannelWrite {
            written, total, ..
        }) => {
            assert_eq!(written, 0);
            assert_eq!(total, 5);
        }
        other => panic!("expected ChannelWrite, got {:?}", other),
    }
}

#[test]
fn write_failure_is_channel_write() {
    let mut transport = ScriptedTransport::new(vec![]);
    transport.write_error = Some(io::ErrorKind::BrokenPipe);
    let mut ch = ReliableByteChannel::new(transport, MAX_PAYLOAD);

    let err = ch.request_capture().unwrap_err();
    assert_eq!(err.code(), "CHANNEL_WRITE");
}

#[test]
fn text_frame_skips_noise_before_delimiter() {
    let mut ch = channel(vec![
        Event::Data(b"boot ok\r\n".to_vec()),
        Event::Data(b"<person:".to_vec()),
        Event::Data(b"2>".to_vec()),
    ]);
    assert_eq!(ch.read_text_frame(TIMEOUT).unwrap(), "person:2");
}

#[test]
fn text_frame_restarts_on_new_opening_delimiter() {
    let mut ch = channel(vec![Event::Data(b"<garb<cup:1>".to_vec())]);
    assert_eq!(ch.read_text_frame(TIMEOUT).unwrap(), "cup:1");
}

#[test]
fn unterminated_text_frame_times_out() {
    let mut ch = channel(vec![Event::Data(b"<cup:1".to_vec())]);
    assert!(matches!(
        ch.read_text_frame(TIMEOUT),
        Err(ProtocolError::Timeout { .. })
    ));
}
