// Streaming Videohub block parser.

use crate::helpers::*;
use crate::model::*;
use bytes::BytesMut;
use nom::{
    branch::alt,
    bytes::streaming::{tag, tag_no_case, take_until},
    character::streaming::{multispace0, space1},
    error::{Error, ErrorKind, ParseError},
    sequence::{preceded, terminated, tuple},
    Err, IResult,
};

const COLON: &[u8] = b":";

/// Parse one "Key: Value" line to a (key, value) tuple.
fn parse_kv_line(i: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
    let (i, (k, _, _, v, _)) = tuple((
        take_until(COLON),
        tag(COLON),
        space1,
        take_until_newline,
        any_newline,
    ))(i)?;
    Ok((i, (k.trim_ascii(), v.trim_ascii_end())))
}

/// Parse the body of a Preamble block after its header.
fn parse_preamble_body(i: &[u8]) -> IResult<&[u8], VideohubMessage> {
    let (i, (_, _, ver, _)) = tuple((
        tag_no_case(b"Version"),
        tag(COLON),
        take_until_newline,
        any_newline,
    ))(i)?;
    let version = String::from_utf8_lossy(ver.trim_ascii()).to_string();
    Ok((i, VideohubMessage::Preamble(Preamble { version })))
}

/// Parse the body of a DeviceInfo block after its header.
fn parse_device_body(mut i: &[u8]) -> IResult<&[u8], VideohubMessage> {
    let mut di = DeviceInfo::default();
    while let Ok((i2, (k, v))) = parse_kv_line(i) {
        let lk = k.to_ascii_lowercase();
        match &lk[..] {
            b"device present" => {
                di.present = Some(match v {
                    b"true" => Present::Yes,
                    b"false" => Present::No,
                    b"needs_update" => Present::NeedsUpdate,
                    _ => return Err(Err::Error(Error::from_error_kind(i, ErrorKind::Tag))),
                })
            }
            b"model name" => di.model_name = Some(String::from_utf8_lossy(v).to_string()),
            b"friendly name" => di.friendly_name = Some(String::from_utf8_lossy(v).to_string()),
            b"unique id" => di.unique_id = Some(String::from_utf8_lossy(v).to_string()),
            b"video inputs" => di.video_inputs = Some(parse_u32(v)?.1),
            b"video outputs" => di.video_outputs = Some(parse_u32(v)?.1),
            _ => {
                let unknown = di.unknown_fields.get_or_insert_with(Vec::new);
                unknown.push(UnknownKVPair {
                    key: String::from_utf8_lossy(k).to_string(),
                    value: String::from_utf8_lossy(v).to_string(),
                });
            }
        }
        i = i2;
    }
    Ok((i, VideohubMessage::DeviceInfo(di)))
}

/// Parse generic "ID Name Here" label lines.
fn parse_label_body<'a>(
    mut i: &'a [u8],
    ctor: fn(Vec<Label>) -> VideohubMessage,
) -> IResult<&'a [u8], VideohubMessage> {
    let mut out = Vec::new();
    while let Ok((i2, (id, _, nm, _))) =
        tuple((parse_u32, space1, take_until_newline, any_newline))(i)
    {
        out.push(Label {
            id,
            name: String::from_utf8_lossy(nm.trim_ascii()).to_string(),
        });
        i = i2;
    }
    Ok((i, ctor(out)))
}

/// Parse "output input" route lines.
fn parse_route_body(mut i: &[u8]) -> IResult<&[u8], VideohubMessage> {
    let mut out = Vec::new();
    while let Ok((i2, (t, _, f, _))) = tuple((parse_u32, space1, parse_u32, any_newline))(i) {
        out.push(Route {
            from_input: f,
            to_output: t,
        });
        i = i2;
    }
    Ok((i, VideohubMessage::VideoOutputRouting(out)))
}

/// Parse "ID [O/L/U/F]" lock lines.
fn parse_lock_body(mut i: &[u8]) -> IResult<&[u8], VideohubMessage> {
    let mut out = Vec::new();
    while let Ok((i2, (id, _, s, _))) =
        tuple((parse_u32, space1, take_until_newline, any_newline))(i)
    {
        let state = match s.trim_ascii_end() {
            b"O" | b"o" => LockState::Owned,
            b"L" | b"l" => LockState::Locked,
            b"U" | b"u" => LockState::Unlocked,
            b"F" | b"f" => LockState::Force,
            _ => return Err(Err::Error(Error::from_error_kind(i, ErrorKind::Tag))),
        };
        out.push(Lock { id, state });
        i = i2;
    }
    Ok((i, VideohubMessage::VideoOutputLocks(out)))
}

impl VideohubMessage {
    /// Parse one block including its trailing blank line.
    pub fn parse_single_block(i: &[u8]) -> IResult<&[u8], VideohubMessage> {
        let (i, header) = preceded(multispace0, terminated(take_until_newline, any_newline))(i)?;
        let (i, body) = alt((any_newline, take_until_empty_line))(i)?;
        let trimmed_header = header.trim_ascii_end();
        let screaming_header = trimmed_header.to_ascii_uppercase();
        let (_, msg) = match &screaming_header[..] {
            b"PROTOCOL PREAMBLE:" => parse_preamble_body(body)?,
            b"VIDEOHUB DEVICE:" => parse_device_body(body)?,

            b"INPUT LABELS:" => parse_label_body(body, VideohubMessage::InputLabels)?,
            b"OUTPUT LABELS:" => parse_label_body(body, VideohubMessage::OutputLabels)?,

            b"VIDEO OUTPUT ROUTING:" => parse_route_body(body)?,
            b"VIDEO OUTPUT LOCKS:" => parse_lock_body(body)?,

            b"ACK" => (i, VideohubMessage::ACK),
            b"NAK" => (i, VideohubMessage::NAK),
            b"PING:" => (i, VideohubMessage::Ping),
            b"END PRELUDE:" => (i, VideohubMessage::EndPrelude),

            _ => (
                b"".as_slice(),
                VideohubMessage::Unknown(BytesMut::from(trimmed_header), BytesMut::from(body)),
            ),
        };
        Ok((i, msg))
    }

    /// Parse an entire Videohub conversation of multiple messages.
    pub fn parse_all_blocks(input: &[u8]) -> IResult<&[u8], Vec<VideohubMessage>> {
        let mut i = input;
        let mut messages = Vec::new();
        loop {
            let (ni, message) = Self::parse_single_block(i)?;
            messages.push(message);
            if ni.is_empty() {
                return Ok((ni, messages));
            }
            i = ni;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_only_preamble() {
        let buf = b"PROTOCOL PREAMBLE:\r\nVersion: 2.8\r\n\r\n";
        let (rem, msg) = VideohubMessage::parse_single_block(buf).expect("should parse preamble");
        assert!(rem.is_empty(), "remaining = {:?}", rem);
        match msg {
            VideohubMessage::Preamble(p) => assert_eq!(p.version, "2.8"),
            _ => panic!("expected Preamble, got {:?}", msg),
        }
    }

    #[test]
    fn parse_single_line() {
        let buf = b"PING:\n\n";
        let (rem, msg) = VideohubMessage::parse_single_block(buf).expect("should parse ping");
        assert!(rem.is_empty(), "remaining = {:?}", rem);
        assert_eq!(msg, VideohubMessage::Ping);
    }

    #[test]
    fn parse_ack_and_nak() {
        let (rem, msg) = VideohubMessage::parse_single_block(b"ACK\n\n").unwrap();
        assert!(rem.is_empty());
        assert_eq!(msg, VideohubMessage::ACK);

        let (rem, msg) = VideohubMessage::parse_single_block(b"NAK\n\n").unwrap();
        assert!(rem.is_empty());
        assert_eq!(msg, VideohubMessage::NAK);
    }

    #[test]
    fn parse_only_deviceinfo() {
        let buf = b"VIDEOHUB DEVICE:\r\n\
                    Device present: true\r\n\
                    Model name: foobar\r\n\
                    Video inputs: 3\r\n\r\n";
        let (rem, msg) = VideohubMessage::parse_single_block(buf).expect("should parse device");
        assert!(rem.is_empty(), "remaining = {:?}", rem);
        let lower = buf.to_ascii_lowercase();
        let (rem2, msg2) = VideohubMessage::parse_single_block(&lower[..])
            .expect("should parse lower-case device");
        assert!(rem2.is_empty(), "remaining = {:?}", rem2);
        assert_eq!(msg, msg2, "parsing should not depend on case");

        match msg {
            VideohubMessage::DeviceInfo(d) => {
                assert!(matches!(d.present, Some(Present::Yes)));
                assert_eq!(d.model_name.as_deref(), Some("foobar"));
                assert_eq!(d.video_inputs, Some(3));
            }
            _ => panic!("expected DeviceInfo, got {:?}", msg),
        }
    }

    #[test]
    fn parse_only_input_labels() {
        let buf = b"INPUT LABELS:\r\n0 a\r\n1  b \r\n\r\n";
        let (rem, msg) =
            VideohubMessage::parse_single_block(buf).expect("should parse input labels");
        assert!(rem.is_empty(), "remaining = {:?}", rem);

        match msg {
            VideohubMessage::InputLabels(v) => {
                assert_eq!(v.len(), 2);
                assert_eq!(v[0].id, 0);
                assert_eq!(&v[0].name, "a");
                assert_eq!(v[1].id, 1);
                assert_eq!(&v[1].name, "b");
            }
            _ => panic!("expected InputLabels, got {:?}", msg),
        }
    }

    #[test]
    fn parse_routing() {
        let buf = b"VIDEO OUTPUT ROUTING:\n2 3\n7 0\n\n";
        let (rem, msg) = VideohubMessage::parse_single_block(buf).expect("should parse routing");
        assert!(rem.is_empty(), "remaining = {:?}", rem);
        match msg {
            VideohubMessage::VideoOutputRouting(v) => {
                assert_eq!(v.len(), 2);
                assert_eq!(v[0].to_output, 2);
                assert_eq!(v[0].from_input, 3);
                assert_eq!(v[1].to_output, 7);
                assert_eq!(v[1].from_input, 0);
            }
            _ => panic!("expected VideoOutputRouting, got {:?}", msg),
        }
    }

    #[test]
    fn parse_locks() {
        let buf = b"VIDEO OUTPUT LOCKS:\n0 U\n1 O\n2 L\n3 F\n\n";
        let (rem, msg) = VideohubMessage::parse_single_block(buf).expect("should parse locks");
        assert!(rem.is_empty(), "remaining = {:?}", rem);
        match msg {
            VideohubMessage::VideoOutputLocks(v) => {
                assert_eq!(v.len(), 4);
                assert_eq!(v[0].state, LockState::Unlocked);
                assert_eq!(v[1].state, LockState::Owned);
                assert_eq!(v[2].state, LockState::Locked);
                assert_eq!(v[3].state, LockState::Force);
            }
            _ => panic!("expected VideoOutputLocks, got {:?}", msg),
        }
    }

    #[test]
    fn parse_partial() {
        let mut buf: Vec<u8> = Vec::from(b"INPUT ");
        let r = VideohubMessage::parse_single_block(&buf);
        assert!(r.is_err());

        buf.extend_from_slice(b"LABELS:\n0 A");
        let r = VideohubMessage::parse_single_block(&buf);
        assert!(r.is_err());

        buf.extend_from_slice(b"\n\nOUTPUT LABELS:\n");
        let (rem, partial) = VideohubMessage::parse_single_block(&buf).unwrap();
        assert_eq!(
            partial,
            VideohubMessage::InputLabels(vec![Label {
                id: 0,
                name: String::from("A"),
            }])
        );
        assert_eq!(rem, b"OUTPUT LABELS:\n");
    }

    #[test]
    fn parse_multiple_sections() {
        let buf = b"PROTOCOL PREAMBLE:\nVersion: 2.8\n\nINPUT LABELS:\n0 A\n\nEND PRELUDE:\n\n";
        let (rem, v) = VideohubMessage::parse_all_blocks(buf).expect("should parse sections");
        assert!(rem.is_empty(), "remaining = {:?}", rem);
        assert_eq!(v.len(), 3);
        assert!(matches!(v[0], VideohubMessage::Preamble(_)));
        assert!(matches!(v[1], VideohubMessage::InputLabels(_)));
        assert_eq!(v[2], VideohubMessage::EndPrelude);
    }

    #[test]
    fn parse_unknown_block() {
        let buf = b"SERIAL PORT ROUTING:\n0 1\n\n";
        let (_, msg) = VideohubMessage::parse_single_block(buf).unwrap();
        match msg {
            VideohubMessage::Unknown(header, _) => {
                assert_eq!(&header[..], b"SERIAL PORT ROUTING:");
            }
            _ => panic!("expected Unknown, got {:?}", msg),
        }
    }
}
