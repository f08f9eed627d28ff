//! RFC 5425-style octet-counted framing: a decimal length, a single space,
//! then exactly that many bytes of payload.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

#[derive(Debug, Default)]
pub struct OctetCountingDecoder {
    max_len_digits: usize,
}

impl OctetCountingDecoder {
    pub fn new() -> Self {
        Self {
            max_len_digits: 10,
        }
    }
}

impl Decoder for OctetCountingDecoder {
    type Item = Vec<u8>;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(space_at) = src.iter().position(|b| *b == b' ') else {
            if src.len() > self.max_len_digits {
                return Err(invalid_frame("length prefix too long"));
            }
            return Ok(None);
        };

        let len_str = std::str::from_utf8(&src[..space_at]).map_err(|_| {
            invalid_frame("length prefix is not valid utf-8")
        })?;
        let len: usize = len_str
            .parse()
            .map_err(|_| invalid_frame("length prefix is not a decimal integer"))?;

        let frame_len = space_at + 1 + len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(frame_len);
        let payload = frame.split_off(space_at + 1);
        Ok(Some(payload.to_vec()))
    }
}

fn invalid_frame(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_owned())
}
