use byteorder::{ByteOrder, LittleEndian};

use super::DecodeError;

/// Cursor over a module's bytes. Every read reports the absolute offset it
/// failed at so errors can point into the original binary.
pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader {
            bytes,
            pos: 0,
            base: 0,
        }
    }

    /// A reader over a sub-slice whose offsets are reported relative to the
    /// start of the enclosing binary.
    pub fn with_base(bytes: &'a [u8], base: usize) -> Reader<'a> {
        Reader { bytes, pos: 0, base }
    }
}

impl<'a> Reader<'a> {
    // Basic operations --------------------------------------------------------

    /// Absolute offset of the next byte.
    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn has_at_least(&self, count: usize) -> bool {
        self.remaining() >= count
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn peek_byte(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    pub fn read_byte(&mut self) -> Result<u8, DecodeError> {
        match self.bytes.get(self.pos) {
            Some(byte) => {
                self.pos += 1;
                Ok(*byte)
            }
            None => Err(DecodeError::UnexpectedEof {
                offset: self.offset(),
            }),
        }
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if !self.has_at_least(len) {
            return Err(DecodeError::UnexpectedEof {
                offset: self.offset(),
            });
        }
        let bytes = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    // Read and interpret types ------------------------------------------------

    // le
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(LittleEndian::read_u32(self.read_bytes(4)?))
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        Ok(LittleEndian::read_f32(self.read_bytes(4)?))
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        Ok(LittleEndian::read_f64(self.read_bytes(8)?))
    }

    pub fn read_vu32(&mut self) -> Result<u32, DecodeError> {
        self.read_vu(32).map(|v| v as u32)
    }

    pub fn read_vu64(&mut self) -> Result<u64, DecodeError> {
        self.read_vu(64)
    }

    pub fn read_vs32(&mut self) -> Result<i32, DecodeError> {
        self.read_vs(32).map(|v| v as i32)
    }

    /// Block types encode a type index as a 33-bit signed integer.
    pub fn read_vs33(&mut self) -> Result<i64, DecodeError> {
        self.read_vs(33)
    }

    pub fn read_vs64(&mut self) -> Result<i64, DecodeError> {
        self.read_vs(64)
    }

    /// A length-prefixed UTF-8 name.
    pub fn read_name(&mut self) -> Result<String, DecodeError> {
        let len = self.read_vu32()? as usize;
        let offset = self.offset();
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8 { offset })
    }

    /// A length-prefixed byte vector.
    pub fn read_u8vec(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_vu32()? as usize;
        Ok(self.read_bytes(len)?.to_vec())
    }

    fn read_vu(&mut self, bits: u32) -> Result<u64, DecodeError> {
        let offset = self.offset();
        let max_bytes = (bits + 6) / 7;
        let mut result: u64 = 0;
        let mut shift: u32 = 0;

        for i in 0..max_bytes {
            let byte = self.read_byte()?;
            let payload = (byte & 0x7f) as u64;
            if i == max_bytes - 1 {
                if byte & 0x80 != 0 {
                    return Err(DecodeError::IntegerRepresentationTooLong { offset });
                }
                let remaining = bits - shift;
                if remaining < 7 && payload >> remaining != 0 {
                    return Err(DecodeError::IntegerTooLarge { offset });
                }
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }

        Err(DecodeError::IntegerRepresentationTooLong { offset })
    }

    fn read_vs(&mut self, bits: u32) -> Result<i64, DecodeError> {
        let offset = self.offset();
        let max_bytes = (bits + 6) / 7;
        let mut result: i64 = 0;
        let mut shift: u32 = 0;

        for i in 0..max_bytes {
            let byte = self.read_byte()?;
            let payload = byte & 0x7f;
            if i == max_bytes - 1 {
                if byte & 0x80 != 0 {
                    return Err(DecodeError::IntegerRepresentationTooLong { offset });
                }
                let remaining = bits - shift;
                if remaining < 7 {
                    // unused high bits must replicate the sign bit
                    let mask = 0x7f & !((1u8 << (remaining - 1)) - 1);
                    let upper = payload & mask;
                    if upper != 0 && upper != mask {
                        return Err(DecodeError::IntegerTooLarge { offset });
                    }
                }
            }
            result |= (payload as i64) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && (payload & 0x40) != 0 {
                    result |= -1i64 << shift;
                }
                return Ok(result);
            }
        }

        Err(DecodeError::IntegerRepresentationTooLong { offset })
    }
}
