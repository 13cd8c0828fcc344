use super::decode::MAX_DEPTH;
use super::error::BencodeError;
use super::value::Value;
use bytes::{BufMut, BytesMut};

/// Encodes a bencode value to a byte vector.
///
/// - Integers: `i<number>e`
/// - Byte strings: `<length>:<data>`
/// - Lists: `l<items>e`
/// - Dictionaries: `d<key><value>...e`, keys in the order the [`Dict`](super::Dict)
///   stores them. Callers that need the canonical sorted form must insert keys
///   in sorted order.
///
/// Nesting is bounded exactly as in `decode`: values the
/// decoder would reject are refused with [`BencodeError::NestingTooDeep`].
///
/// # Examples
///
/// ```
/// use piecemeal::bencode::{encode, Dict, Value};
/// use bytes::Bytes;
///
/// let list = Value::List(vec![Value::Integer(1), Value::string("two")]);
/// assert_eq!(encode(&list).unwrap(), b"li1e3:twoe");
///
/// let mut dict = Dict::new();
/// dict.insert(Bytes::from_static(b"a"), Value::Integer(1));
/// dict.insert(Bytes::from_static(b"b"), Value::Integer(2));
/// assert_eq!(encode(&Value::Dict(dict)).unwrap(), b"d1:ai1e1:bi2ee");
/// ```
pub fn encode(value: &Value) -> Result<Vec<u8>, BencodeError> {
    let mut buf = BytesMut::new();
    write_value(value, &mut buf, 0)?;
    Ok(buf.to_vec())
}

fn write_value(value: &Value, buf: &mut BytesMut, depth: usize) -> Result<(), BencodeError> {
    if depth > MAX_DEPTH {
        return Err(BencodeError::NestingTooDeep);
    }

    match value {
        Value::Integer(i) => {
            buf.put_u8(b'i');
            buf.put_slice(i.to_string().as_bytes());
            buf.put_u8(b'e');
        }
        Value::Bytes(b) => write_bytes(b, buf),
        Value::List(items) => {
            buf.put_u8(b'l');
            for item in items {
                write_value(item, buf, depth + 1)?;
            }
            buf.put_u8(b'e');
        }
        Value::Dict(dict) => {
            buf.put_u8(b'd');
            for (key, val) in dict.iter() {
                write_bytes(key, buf);
                write_value(val, buf, depth + 1)?;
            }
            buf.put_u8(b'e');
        }
    }
    Ok(())
}

fn write_bytes(bytes: &[u8], buf: &mut BytesMut) {
    buf.put_slice(bytes.len().to_string().as_bytes());
    buf.put_u8(b':');
    buf.put_slice(bytes);
}
