//! Bencode encoding and decoding ([BEP-3]).
//!
//! Bencode is the serialization format used throughout BitTorrent for storing
//! and transmitting structured data, including `.torrent` files and tracker
//! responses.
//!
//! | Type | Format | Example |
//! |------|--------|---------|
//! | Integer | `i<number>e` | `i42e` → 42 |
//! | Byte String | `<length>:<data>` | `4:spam` → "spam" |
//! | List | `l<items>e` | `l4:spami42ee` → ["spam", 42] |
//! | Dictionary | `d<key><value>...e` | `d3:foo3:bare` → {"foo": "bar"} |
//!
//! Dictionaries keep their keys in encounter order, and every dictionary the
//! decoder produces carries the exact byte span it came from. The info hash
//! of a torrent is computed over that span, never over a re-encoding.
//!
//! # Examples
//!
//! ```
//! use piecemeal::bencode::{decode, encode};
//!
//! let value = decode(b"d3:foo3:bar3:bazi7ee").unwrap();
//! assert_eq!(value.get(b"foo").and_then(|v| v.as_str()), Some("bar"));
//! assert_eq!(value.get(b"baz").and_then(|v| v.as_integer()), Some(7));
//!
//! let dict = value.as_dict().unwrap();
//! assert_eq!(dict.raw_bytes().unwrap().as_ref(), b"d3:foo3:bar3:bazi7ee");
//! assert_eq!(encode(&value).unwrap(), b"d3:foo3:bar3:bazi7ee");
//! ```
//!
//! # Error Handling
//!
//! Malformed input is reported as one of:
//!
//! - [`BencodeError::UnexpectedEof`] - input ended inside a value
//! - [`BencodeError::InvalidInteger`] - leading zeros, `-0`, empty or non-digit integer
//! - [`BencodeError::InvalidStringLength`] - missing `:` delimiter or bad length prefix
//! - [`BencodeError::UnexpectedChar`] - unexpected byte where a value should start
//! - [`BencodeError::NonStringKey`] - dictionary key that is not a byte string
//! - [`BencodeError::NestingTooDeep`] - recursion limit exceeded (max 64 levels)
//! - [`BencodeError::TrailingData`] - extra data after the value
//!
//! [BEP-3]: http://bittorrent.org/beps/bep_0003.html

mod decode;
mod encode;
mod error;
mod value;

pub use decode::{decode, decode_prefix};
pub use encode::encode;
pub use error::BencodeError;
pub use value::{Dict, Value, ValueKind};
