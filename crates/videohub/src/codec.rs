use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::VideohubMessage;

/// A `tokio_util` Codec for parsing and serializing Videohub protocol messages.
#[derive(Debug, Clone, Default)]
pub struct VideohubCodec;

impl Decoder for VideohubCodec {
    type Item = VideohubMessage;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let input = &src[..];

        match VideohubMessage::parse_single_block(input) {
            Ok((remaining, msg)) => {
                let parsed_len = input.len() - remaining.len();
                src.advance(parsed_len);
                Ok(Some(msg))
            }
            // Not enough data, wait for more.
            Err(nom::Err::Incomplete(_)) => Ok(None),
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "invalid Videohub message",
            )),
        }
    }
}

impl Encoder<VideohubMessage> for VideohubCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: VideohubMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write_serialized(dst.writer())
    }
}
