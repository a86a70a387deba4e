//! Tag/length/value primitives shared by the message envelopes.

use crate::Error;
use crate::types::Curve25519PublicKey;

pub(crate) fn encode_varint(buffer: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buffer.push(byte);
            return;
        }
        buffer.push(byte | 0x80);
    }
}

pub(crate) fn encode_bytes(buffer: &mut Vec<u8>, tag: u8, value: &[u8]) {
    buffer.push(tag);
    encode_varint(buffer, value.len() as u32);
    buffer.extend_from_slice(value);
}

pub(crate) struct Decoder<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.position >= self.bytes.len()
    }

    pub(crate) fn byte(&mut self) -> Result<u8, Error> {
        let byte = *self
            .bytes
            .get(self.position)
            .ok_or(Error::BadMessageFormat)?;
        self.position += 1;
        Ok(byte)
    }

    pub(crate) fn varint(&mut self) -> Result<u32, Error> {
        let mut value: u32 = 0;
        let mut shift = 0u32;

        loop {
            let byte = self.byte()?;
            if shift >= 32 {
                return Err(Error::BadMessageFormat);
            }
            // The fifth byte holds at most the top four bits of a u32.
            if shift == 28 && byte & 0x70 != 0 {
                return Err(Error::BadMessageFormat);
            }
            value |= u32::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    pub(crate) fn bytes_field(&mut self) -> Result<&'a [u8], Error> {
        let length = self.varint()? as usize;
        let end = self
            .position
            .checked_add(length)
            .ok_or(Error::BadMessageFormat)?;
        if end > self.bytes.len() {
            return Err(Error::BadMessageFormat);
        }

        let value = &self.bytes[self.position..end];
        self.position = end;
        Ok(value)
    }

    pub(crate) fn key_field(&mut self) -> Result<Curve25519PublicKey, Error> {
        let bytes: [u8; 32] = self
            .bytes_field()?
            .try_into()
            .map_err(|_| Error::BadMessageFormat)?;
        Ok(Curve25519PublicKey::from(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_round_trip() {
        for value in [0u32, 1, 127, 128, 300, 0x0FFF_FFFF, u32::MAX] {
            let mut buffer = Vec::new();
            encode_varint(&mut buffer, value);

            let mut decoder = Decoder::new(&buffer);
            assert_eq!(decoder.varint().unwrap(), value);
            assert!(decoder.is_empty());
        }
    }

    #[test]
    fn test_truncated_field_is_rejected() {
        let mut buffer = Vec::new();
        encode_bytes(&mut buffer, 0x0A, &[1, 2, 3, 4]);
        buffer.pop();

        let mut decoder = Decoder::new(&buffer);
        assert_eq!(decoder.byte().unwrap(), 0x0A);
        assert_eq!(decoder.bytes_field(), Err(Error::BadMessageFormat));
    }

    #[test]
    fn test_oversized_varint_is_rejected() {
        let mut decoder = Decoder::new(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]);
        assert_eq!(decoder.varint(), Err(Error::BadMessageFormat));
    }

    #[test]
    fn test_varint_overflow_bits_are_rejected() {
        // The fifth byte carries bits 28..32; 0x1F would put a set bit past
        // the end of the value instead of round-tripping.
        let mut decoder = Decoder::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0x1F]);
        assert_eq!(decoder.varint(), Err(Error::BadMessageFormat));

        // The largest encodable value still parses.
        let mut decoder = Decoder::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
        assert_eq!(decoder.varint().unwrap(), u32::MAX);
    }
}
