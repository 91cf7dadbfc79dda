use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::frame::{self, RawFrame};
use super::Swp08Message;

/// A `tokio_util` Codec for SW-P-08 framed messages.
#[derive(Debug, Clone, Default)]
pub struct Swp08Codec;

impl Decoder for Swp08Codec {
    type Item = Swp08Message;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match frame::read_frame(src) {
            Ok(None) => Ok(None),
            Ok(Some(RawFrame::Ack)) => Ok(Some(Swp08Message::Ack)),
            Ok(Some(RawFrame::Nak)) => Ok(Some(Swp08Message::Nak)),
            Ok(Some(RawFrame::Data(payload))) => Swp08Message::from_payload(&payload)
                .map(Some)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            Err(e) => Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        }
    }
}

impl Encoder<Swp08Message> for Swp08Codec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Swp08Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item.to_payload() {
            Some(payload) => frame::write_frame(&payload, dst),
            None => match item {
                Swp08Message::Ack => frame::write_ack(dst),
                Swp08Message::Nak => frame::write_nak(dst),
                _ => unreachable!("only Ack/Nak have no payload form"),
            },
        }
        Ok(())
    }
}
