//! Tagged binary value codec
//!
//! Every protocol message is encoded with this self-describing format.
//! Each value starts with a one-byte tag identifying its kind, followed by
//! kind-specific framing:
//!
//! - absent (`u`) / null (`n`): tag only
//! - boolean (`b`): tag, then `'0'` or `'1'`
//! - integer (`i`) / big integer (`I`): tag, ASCII decimal, `'e'` sentinel
//! - bytes (`B`) / text (`s`): tag, ASCII decimal length, `':'`, raw payload
//! - list (`a`): tag, ASCII decimal count, `':'`, that many encoded values
//! - map (`d`): tag, ASCII decimal pair count, `':'`, encoded key/value pairs
//!
//! Text payloads are carried as UTF-8. Map entries keep their encode-time
//! order on the wire; decoding rebuilds a plain key -> value lookup and the
//! order carries no meaning.

use bytes::{BufMut, BytesMut};
use thiserror::Error;

const TAG_ABSENT: u8 = b'u';
const TAG_NULL: u8 = b'n';
const TAG_BOOL: u8 = b'b';
const TAG_BYTES: u8 = b'B';
const TAG_INT: u8 = b'i';
const TAG_BIG: u8 = b'I';
const TAG_TEXT: u8 = b's';
const TAG_MAP: u8 = b'd';
const TAG_LIST: u8 = b'a';
const TAG_END: u8 = b'e';
const SEP: u8 = b':';

/// Deepest list/map nesting accepted on decode. Recursion past this is a
/// decode error, so a hostile datagram cannot exhaust the stack.
const MAX_DEPTH: usize = 64;

/// Decode errors
///
/// A decode error is fatal for the buffer being decoded, never for the
/// connection or engine processing it.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unknown tag byte 0x{0:02x} at offset {1}")]
    UnknownTag(u8, usize),

    #[error("unexpected end of buffer")]
    Truncated,

    #[error("invalid length prefix")]
    BadLength,

    #[error("invalid number literal: {0:?}")]
    BadNumber(String),

    #[error("text payload is not valid UTF-8")]
    BadText,

    #[error("mapping key is not a string")]
    BadKey,

    #[error("nesting deeper than {MAX_DEPTH} levels")]
    TooDeep,
}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// A decoded or to-be-encoded value.
///
/// This is the full universe of shapes the wire format can carry. `Absent`
/// mirrors a field that exists but has no value; it is distinct from `Null`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Absent,
    Null,
    Bool(bool),
    Int(i64),
    Big(i128),
    Bytes(Vec<u8>),
    Text(String),
    List(Vec<Value>),
    /// String-keyed entries in insertion order.
    Map(Vec<(String, Value)>),
}

impl Value {
    /// Empty map, the starting point for building envelopes and payloads.
    pub fn empty_map() -> Value {
        Value::Map(Vec::new())
    }

    /// Look up a key in a map value. Returns `None` for non-map values.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Insert or replace a key in a map value. Non-map values are left
    /// untouched.
    pub fn set(&mut self, key: &str, value: Value) {
        if let Value::Map(entries) = self {
            match entries.iter_mut().find(|(k, _)| k == key) {
                Some(slot) => slot.1 = value,
                None => entries.push((key.to_string(), value)),
            }
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Big(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_i64().and_then(|v| u64::try_from(v).ok())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::Int(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

/// Encode a value to a fresh byte vector.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(128);
    encode_into(value, &mut buf);
    buf.to_vec()
}

/// Encode a value into an existing buffer.
pub fn encode_into(value: &Value, buf: &mut BytesMut) {
    match value {
        Value::Absent => buf.put_u8(TAG_ABSENT),
        Value::Null => buf.put_u8(TAG_NULL),
        Value::Bool(v) => {
            buf.put_u8(TAG_BOOL);
            buf.put_u8(if *v { b'1' } else { b'0' });
        }
        Value::Int(v) => {
            buf.put_u8(TAG_INT);
            buf.put_slice(v.to_string().as_bytes());
            buf.put_u8(TAG_END);
        }
        Value::Big(v) => {
            buf.put_u8(TAG_BIG);
            buf.put_slice(v.to_string().as_bytes());
            buf.put_u8(TAG_END);
        }
        Value::Bytes(b) => {
            buf.put_u8(TAG_BYTES);
            buf.put_slice(b.len().to_string().as_bytes());
            buf.put_u8(SEP);
            buf.put_slice(b);
        }
        Value::Text(s) => {
            buf.put_u8(TAG_TEXT);
            buf.put_slice(s.len().to_string().as_bytes());
            buf.put_u8(SEP);
            buf.put_slice(s.as_bytes());
        }
        Value::List(items) => {
            buf.put_u8(TAG_LIST);
            buf.put_slice(items.len().to_string().as_bytes());
            buf.put_u8(SEP);
            for item in items {
                encode_into(item, buf);
            }
        }
        Value::Map(entries) => {
            buf.put_u8(TAG_MAP);
            buf.put_slice(entries.len().to_string().as_bytes());
            buf.put_u8(SEP);
            for (key, item) in entries {
                encode_into(&Value::Text(key.clone()), buf);
                encode_into(item, buf);
            }
        }
    }
}

/// Decode a single value from the front of a buffer.
///
/// Trailing bytes after the first complete value are ignored, matching the
/// cursor-based framing of the wire format.
pub fn decode(buf: &[u8]) -> DecodeResult<Value> {
    let mut cursor = Cursor { buf, pos: 0 };
    decode_value(&mut cursor, 0)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn next(&mut self) -> DecodeResult<u8> {
        let b = *self.buf.get(self.pos).ok_or(DecodeError::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> DecodeResult<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::BadLength)?;
        if end > self.buf.len() {
            return Err(DecodeError::Truncated);
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Read up to (and consume) the delimiter byte; returns the bytes before it.
    fn read_until(&mut self, delim: u8) -> DecodeResult<&'a [u8]> {
        let start = self.pos;
        while let Some(&b) = self.buf.get(self.pos) {
            self.pos += 1;
            if b == delim {
                return Ok(&self.buf[start..self.pos - 1]);
            }
        }
        Err(DecodeError::Truncated)
    }

    fn read_length(&mut self) -> DecodeResult<usize> {
        let digits = self.read_until(SEP)?;
        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or(DecodeError::BadLength)
    }
}

fn decode_value(cursor: &mut Cursor, depth: usize) -> DecodeResult<Value> {
    if depth > MAX_DEPTH {
        return Err(DecodeError::TooDeep);
    }
    let tag_offset = cursor.pos;
    let tag = cursor.next()?;
    match tag {
        TAG_ABSENT => Ok(Value::Absent),
        TAG_NULL => Ok(Value::Null),
        TAG_BOOL => Ok(Value::Bool(cursor.next()? == b'1')),
        TAG_INT => {
            let digits = cursor.read_until(TAG_END)?;
            let text = std::str::from_utf8(digits).map_err(|_| DecodeError::BadText)?;
            // Lenient on input: a fractional literal decodes to its integer part.
            if let Ok(v) = text.parse::<i64>() {
                Ok(Value::Int(v))
            } else if let Ok(v) = text.parse::<f64>() {
                Ok(Value::Int(v as i64))
            } else {
                Err(DecodeError::BadNumber(text.to_string()))
            }
        }
        TAG_BIG => {
            let digits = cursor.read_until(TAG_END)?;
            let text = std::str::from_utf8(digits).map_err(|_| DecodeError::BadText)?;
            text.parse::<i128>()
                .map(Value::Big)
                .map_err(|_| DecodeError::BadNumber(text.to_string()))
        }
        TAG_BYTES => {
            let len = cursor.read_length()?;
            Ok(Value::Bytes(cursor.take(len)?.to_vec()))
        }
        TAG_TEXT => {
            let len = cursor.read_length()?;
            let raw = cursor.take(len)?;
            String::from_utf8(raw.to_vec())
                .map(Value::Text)
                .map_err(|_| DecodeError::BadText)
        }
        TAG_LIST => {
            let count = cursor.read_length()?;
            let mut items = Vec::with_capacity(count.min(64));
            for _ in 0..count {
                items.push(decode_value(cursor, depth + 1)?);
            }
            Ok(Value::List(items))
        }
        TAG_MAP => {
            let count = cursor.read_length()?;
            let mut entries = Vec::with_capacity(count.min(64));
            for _ in 0..count {
                let key = match decode_value(cursor, depth + 1)? {
                    Value::Text(k) => k,
                    _ => return Err(DecodeError::BadKey),
                };
                entries.push((key, decode_value(cursor, depth + 1)?));
            }
            Ok(Value::Map(entries))
        }
        other => Err(DecodeError::UnknownTag(other, tag_offset)),
    }
}
