//! Wire formats shared by the controller and the peripheral.
//!
//! Two framings travel over the link:
//! - binary payloads (images), prefixed by a 4-byte little-endian length
//! - text frames, delimited as `<body>`
//!
//! Result bodies come in two shapes:
//! - simple: `label:count,label:count`
//! - comparator: `Missing: a,b|label:count,...` or `No missing objects|label:count,...`

use crate::aggregate::CountSnapshot;
use crate::baseline::ComparisonResult;
use crate::error::ProtocolError;

pub const LENGTH_PREFIX_LEN: usize = 4;
pub const FRAME_START: u8 = b'<';
pub const FRAME_END: u8 = b'>';
/// Command that asks the peripheral for one image.
pub const CAPTURE_COMMAND: &[u8] = b"CAPTURE\n";

const MISSING_PREFIX: &str = "Missing: ";
const NONE_MISSING: &str = "No missing objects";
const SECTION_SEPARATOR: char = '|';

/// Prefix `payload` with its length. Payloads that do not fit a `u32` length
/// are rejected.
pub fn encode_length_prefixed(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let header = length_header(payload.len())?;
    let mut out = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    out.extend_from_slice(&header);
    out.extend_from_slice(payload);
    Ok(out)
}

fn length_header(len: usize) -> Result<[u8; LENGTH_PREFIX_LEN], ProtocolError> {
    let len = u32::try_from(len).map_err(|_| ProtocolError::OversizedPayload {
        declared: len,
        limit: u32::MAX as usize,
    })?;
    Ok(len.to_le_bytes())
}

/// Decode the payload length from the first four bytes of `header`.
pub fn decode_length_prefix(header: &[u8]) -> Result<u32, ProtocolError> {
    let bytes: [u8; LENGTH_PREFIX_LEN] = header
        .get(..LENGTH_PREFIX_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or(ProtocolError::MalformedHeader { got: header.len() })?;
    Ok(u32::from_le_bytes(bytes))
}

pub fn encode_text_frame(body: &str) -> Result<Vec<u8>, ProtocolError> {
    if body.bytes().any(|b| b == FRAME_START || b == FRAME_END) {
        return Err(ProtocolError::InvalidFrameBody {
            body: body.to_string(),
        });
    }
    let mut out = Vec::with_capacity(body.len() + 2);
    out.push(FRAME_START);
    out.extend_from_slice(body.as_bytes());
    out.push(FRAME_END);
    Ok(out)
}

pub fn decode_text_frame(frame: &[u8]) -> Result<String, ProtocolError> {
    let inner = frame
        .strip_prefix(&[FRAME_START])
        .ok_or(ProtocolError::MalformedFrame {
            reason: "missing leading '<'",
        })?
        .strip_suffix(&[FRAME_END])
        .ok_or(ProtocolError::MalformedFrame {
            reason: "missing trailing '>'",
        })?;
    if inner.iter().any(|&b| b == FRAME_START || b == FRAME_END) {
        return Err(ProtocolError::MalformedFrame {
            reason: "nested frame delimiter",
        });
    }
    String::from_utf8(inner.to_vec()).map_err(|_| ProtocolError::MalformedFrame {
        reason: "body is not valid UTF-8",
    })
}

/// `label:count,...` in snapshot order. Empty snapshot gives an empty body.
pub fn encode_counts_body(snapshot: &CountSnapshot) -> String {
    snapshot
        .iter()
        .map(|(label, count)| format!("{}:{}", label, count))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn encode_comparison_body(result: &ComparisonResult) -> String {
    let counts = encode_counts_body(&result.current);
    if result.missing.is_empty() {
        format!("{}{}{}", NONE_MISSING, SECTION_SEPARATOR, counts)
    } else {
        format!(
            "{}{}{}{}",
            MISSING_PREFIX,
            result.missing.join(","),
            SECTION_SEPARATOR,
            counts
        )
    }
}

/// A result body as read back on the peripheral side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultBody {
    /// `None` for simple bodies; the missing labels for comparator bodies.
    pub missing: Option<Vec<String>>,
    pub counts: CountSnapshot,
}

/// Parse either body shape back into labels and counts.
pub fn parse_result_body(body: &str) -> Result<ResultBody, ProtocolError> {
    let (missing, counts) = match body.split_once(SECTION_SEPARATOR) {
        None => (None, body),
        Some((head, counts)) => {
            let missing = if head == NONE_MISSING {
                Vec::new()
            } else {
                let labels = head
                    .strip_prefix(MISSING_PREFIX)
                    .ok_or(ProtocolError::MalformedFrame {
                        reason: "unknown comparator section",
                    })?;
                labels.split(',').map(str::to_string).collect()
            };
            (Some(missing), counts)
        }
    };
    Ok(ResultBody {
        missing,
        counts: parse_counts(counts)?,
    })
}

fn parse_counts(raw: &str) -> Result<CountSnapshot, ProtocolError> {
    if raw.is_empty() {
        return Ok(CountSnapshot::new());
    }
    let mut pairs = Vec::new();
    for entry in raw.split(',') {
        let (label, count) = entry.rsplit_once(':').ok_or(ProtocolError::MalformedFrame {
            reason: "count entry without ':'",
        })?;
        let count: u32 = count.parse().map_err(|_| ProtocolError::MalformedFrame {
            reason: "count is not an integer",
        })?;
        pairs.push((label, count));
    }
    Ok(CountSnapshot::from_counts(pairs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_header_matches_payload_len() {
        for payload in [&b""[..], b"x", &[0u8; 70_000][..]] {
            let framed = encode_length_prefixed(payload).unwrap();
            assert_eq!(framed.len(), 4 + payload.len());
            assert_eq!(
                decode_length_prefix(&framed[..4]).unwrap() as usize,
                payload.len()
            );
        }
    }

    #[test]
    fn length_header_is_little_endian() {
        assert_eq!(decode_length_prefix(&[0x10, 0x27, 0, 0]).unwrap(), 10_000);
        assert_eq!(&encode_length_prefixed(&[7; 258]).unwrap()[..4], &[2, 1, 0, 0]);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn length_beyond_u32_is_rejected() {
        assert_eq!(length_header(u32::MAX as usize).unwrap(), [0xff; 4]);
        let err = length_header(u32::MAX as usize + 1).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::OversizedPayload { declared, .. } if declared == 1 << 32
        ));
    }

    #[test]
    fn short_header_is_malformed() {
        let err = decode_length_prefix(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedHeader { got: 3 }));
    }

    #[test]
    fn text_frame_round_trips() {
        for body in ["", "person:1,car:1", "No missing objects|cup:2"] {
            let frame = encode_text_frame(body).unwrap();
            assert_eq!(decode_text_frame(&frame).unwrap(), body);
        }
    }

    #[test]
    fn text_frame_rejects_delimiters_in_body() {
        assert!(matches!(
            encode_text_frame("a<b"),
            Err(ProtocolError::InvalidFrameBody { .. })
        ));
        assert!(encode_text_frame("a>b").is_err());
    }

    #[test]
    fn decode_requires_both_delimiters() {
        assert!(matches!(
            decode_text_frame(b"person:1>"),
            Err(ProtocolError::MalformedFrame { .. })
        ));
        assert!(decode_text_frame(b"<person:1").is_err());
        assert!(decode_text_frame(b"<a<b>").is_err());
        assert!(decode_text_frame(b"").is_err());
    }

    #[test]
    fn comparator_bodies() {
        let current = CountSnapshot::from_counts([("a", 1), ("c", 5)]);
        let missing = ComparisonResult {
            missing: vec!["a".to_string(), "b".to_string()],
            current: current.clone(),
            baseline_established: false,
        };
        assert_eq!(encode_comparison_body(&missing), "Missing: a,b|a:1,c:5");

        let none = ComparisonResult {
            missing: vec![],
            current,
            baseline_established: false,
        };
        assert_eq!(encode_comparison_body(&none), "No missing objects|a:1,c:5");
    }

    #[test]
    fn parses_both_body_shapes() {
        let simple = parse_result_body("person:2,traffic light:1").unwrap();
        assert_eq!(simple.missing, None);
        assert_eq!(simple.counts.get("traffic light"), Some(1));

        let cmp = parse_result_body("Missing: chair|person:1").unwrap();
        assert_eq!(cmp.missing, Some(vec!["chair".to_string()]));
        assert_eq!(cmp.counts.get("person"), Some(1));

        let empty = parse_result_body("No missing objects|").unwrap();
        assert_eq!(empty.missing, Some(vec![]));
        assert!(empty.counts.is_empty());

        assert!(parse_result_body("person=2").is_err());
    }
}
