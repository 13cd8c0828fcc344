use super::error::BencodeError;
use super::value::{Dict, Value};
use bytes::Bytes;

pub(super) const MAX_DEPTH: usize = 64;

/// Decodes a single bencode value that must span all of `data`.
///
/// Every decoded dictionary keeps the exact byte span it was read from
/// (see [`Dict::raw_bytes`]).
pub fn decode(data: &[u8]) -> Result<Value, BencodeError> {
    let (value, consumed) = decode_prefix(data)?;

    if consumed != data.len() {
        return Err(BencodeError::TrailingData);
    }

    Ok(value)
}

/// Decodes one bencode value from the front of `data`, returning it along
/// with the number of bytes consumed.
pub fn decode_prefix(data: &[u8]) -> Result<(Value, usize), BencodeError> {
    let buf = Bytes::copy_from_slice(data);
    let mut decoder = Decoder { buf: &buf, pos: 0 };
    let value = decoder.value(0)?;
    Ok((value, decoder.pos))
}

struct Decoder<'a> {
    buf: &'a Bytes,
    pos: usize,
}

impl Decoder<'_> {
    fn peek(&self) -> Result<u8, BencodeError> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or(BencodeError::UnexpectedEof)
    }

    fn value(&mut self, depth: usize) -> Result<Value, BencodeError> {
        if depth > MAX_DEPTH {
            return Err(BencodeError::NestingTooDeep);
        }

        match self.peek()? {
            b'i' => self.integer(),
            b'l' => self.list(depth),
            b'd' => self.dict(depth),
            b'0'..=b'9' => self.bytes().map(Value::Bytes),
            c => Err(BencodeError::UnexpectedChar(c as char, self.pos)),
        }
    }

    fn integer(&mut self) -> Result<Value, BencodeError> {
        self.pos += 1;

        let start = self.pos;
        while self.peek()? != b'e' {
            self.pos += 1;
        }

        let digits = &self.buf[start..self.pos];
        let int_str = std::str::from_utf8(digits)
            .map_err(|_| BencodeError::InvalidInteger("invalid utf8".into()))?;

        let unsigned = int_str.strip_prefix('-').unwrap_or(int_str);
        if unsigned.is_empty() || !unsigned.bytes().all(|b| b.is_ascii_digit()) {
            return Err(BencodeError::InvalidInteger(int_str.into()));
        }

        if int_str == "-0" || (unsigned.starts_with('0') && unsigned.len() > 1) {
            return Err(BencodeError::InvalidInteger("leading zeros".into()));
        }

        let value: i64 = int_str
            .parse()
            .map_err(|_| BencodeError::InvalidInteger(int_str.into()))?;

        self.pos += 1;
        Ok(Value::Integer(value))
    }

    fn bytes(&mut self) -> Result<Bytes, BencodeError> {
        let start = self.pos;
        while self.peek()?.is_ascii_digit() {
            self.pos += 1;
        }

        if self.peek()? != b':' {
            return Err(BencodeError::InvalidStringLength);
        }

        let len_digits = &self.buf[start..self.pos];
        if len_digits.len() > 1 && len_digits[0] == b'0' {
            return Err(BencodeError::InvalidStringLength);
        }

        let len = len_digits
            .iter()
            .try_fold(0usize, |acc, &d| {
                acc.checked_mul(10)?.checked_add((d - b'0') as usize)
            })
            .ok_or(BencodeError::InvalidStringLength)?;

        self.pos += 1;

        let end = self
            .pos
            .checked_add(len)
            .ok_or(BencodeError::InvalidStringLength)?;
        if end > self.buf.len() {
            return Err(BencodeError::UnexpectedEof);
        }

        let bytes = self.buf.slice(self.pos..end);
        self.pos = end;
        Ok(bytes)
    }

    fn list(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.pos += 1;
        let mut list = Vec::new();

        while self.peek()? != b'e' {
            list.push(self.value(depth + 1)?);
        }

        self.pos += 1;
        Ok(Value::List(list))
    }

    fn dict(&mut self, depth: usize) -> Result<Value, BencodeError> {
        let start = self.pos;
        self.pos += 1;
        let mut dict = Dict::new();

        while self.peek()? != b'e' {
            if !self.peek()?.is_ascii_digit() {
                return Err(BencodeError::NonStringKey(self.pos));
            }
            let key = self.bytes()?;
            let value = self.value(depth + 1)?;
            dict.insert(key, value);
        }

        self.pos += 1;
        let raw = self.buf.slice(start..self.pos);
        Ok(Value::Dict(dict.with_raw(raw)))
    }
}
