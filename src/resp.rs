//! RESP (REdis Serialization Protocol) value type and wire codec.
//!
//! This module is pure: it never touches a socket. `decode` consumes bytes
//! from a buffer and either returns a fully-formed [`Value`] plus the number
//! of bytes it took, or tells the caller it needs more bytes. `encode` is the
//! inverse.

use thiserror::Error;

pub const CRLF: &[u8] = b"\r\n";

/// A decoded RESP value. Owned rather than borrowed from the input buffer:
/// the dispatcher retains an unconsumed tail of its read buffer across
/// `.await` points between socket reads, and a value borrowing from that
/// buffer would pin the whole buffer across those awaits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Vec<u8>),
    Null,
    Array(Vec<Value>),
}

impl Value {
    pub fn simple_string(s: impl Into<String>) -> Self {
        Value::SimpleString(s.into())
    }

    pub fn bulk_string(bytes: impl Into<Vec<u8>>) -> Self {
        Value::BulkString(bytes.into())
    }

    pub fn array(values: Vec<Value>) -> Self {
        Value::Array(values)
    }

    /// The command array convention used throughout this crate: every
    /// client-visible command is encoded as an array of bulk strings.
    pub fn command_array<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Vec<u8>>,
    {
        Value::Array(
            parts
                .into_iter()
                .map(|p| Value::BulkString(p.into()))
                .collect(),
        )
    }

    pub fn as_bulk_string(&self) -> Option<&[u8]> {
        match self {
            Value::BulkString(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_simple_string(&self) -> Option<&str> {
        match self {
            Value::SimpleString(s) => Some(s),
            _ => None,
        }
    }

    /// Encoded length in bytes, without actually encoding. Used to advance
    /// `master_repl_offset` without re-serializing the frame.
    pub fn encoded_len(&self) -> usize {
        match self {
            Value::SimpleString(s) => 1 + s.len() + CRLF.len(),
            Value::Error(e) => 1 + e.len() + CRLF.len(),
            Value::Integer(i) => 1 + decimal_digits(*i) + CRLF.len(),
            Value::BulkString(b) => 1 + decimal_digits(b.len() as i64) + CRLF.len() + b.len() + CRLF.len(),
            Value::Null => 4, // "$-1\r\n"
            Value::Array(items) => {
                1 + decimal_digits(items.len() as i64)
                    + CRLF.len()
                    + items.iter().map(Value::encoded_len).sum::<usize>()
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Value::SimpleString(s) => {
                buf.push(b'+');
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Value::Error(e) => {
                buf.push(b'-');
                buf.extend_from_slice(e.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Value::Integer(i) => {
                buf.push(b':');
                buf.extend_from_slice(i.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Value::BulkString(b) => {
                buf.push(b'$');
                buf.extend_from_slice(b.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(b);
                buf.extend_from_slice(CRLF);
            }
            Value::Null => buf.extend_from_slice(b"$-1\r\n"),
            Value::Array(items) => {
                buf.push(b'*');
                buf.extend_from_slice(items.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for item in items {
                    item.encode_into(buf);
                }
            }
        }
    }
}

fn decimal_digits(n: i64) -> usize {
    let sign = if n < 0 { 1 } else { 0 };
    let digits = n.unsigned_abs().to_string().len();
    sign + digits
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer does not yet contain a full frame. Not an error in the
    /// usual sense: the caller should read more bytes and retry.
    #[error("incomplete frame")]
    Incomplete,

    #[error("malformed RESP frame: {0}")]
    Malformed(String),
}

/// Decode exactly one frame starting at `input[0]`. Returns the value and
/// the number of bytes consumed from the front of `input`.
///
/// Never panics on truncated input: every slice/index that could run past
/// the end of a short buffer is checked first and reported as
/// [`DecodeError::Incomplete`].
pub fn decode(input: &[u8]) -> Result<(Value, usize), DecodeError> {
    let Some(&tag) = input.first() else {
        return Err(DecodeError::Incomplete);
    };

    match tag {
        b'+' => {
            let (line, len) = read_line(input)?;
            let s = std::str::from_utf8(line)
                .map_err(|_| DecodeError::Malformed("simple string is not UTF-8".into()))?;
            Ok((Value::SimpleString(s.to_string()), len))
        }
        b'-' => {
            let (line, len) = read_line(input)?;
            let s = std::str::from_utf8(line)
                .map_err(|_| DecodeError::Malformed("error string is not UTF-8".into()))?;
            Ok((Value::Error(s.to_string()), len))
        }
        b':' => {
            let (line, len) = read_line(input)?;
            let s = std::str::from_utf8(line)
                .map_err(|_| DecodeError::Malformed("integer is not UTF-8".into()))?;
            let i: i64 = s
                .parse()
                .map_err(|_| DecodeError::Malformed(format!("not an integer: {s:?}")))?;
            Ok((Value::Integer(i), len))
        }
        b'$' => decode_bulk_string(input),
        b'*' => decode_array(input),
        other => Err(DecodeError::Malformed(format!(
            "unrecognized type byte {:?}",
            other as char
        ))),
    }
}

/// Find `\r\n` starting at offset 1 (skipping the type byte) and return the
/// bytes between the type byte and the CRLF, plus the total length consumed
/// including the CRLF.
fn read_line(input: &[u8]) -> Result<(&[u8], usize), DecodeError> {
    let body = input.get(1..).ok_or(DecodeError::Incomplete)?;
    let pos = find_crlf(body).ok_or(DecodeError::Incomplete)?;
    Ok((&body[..pos], 1 + pos + CRLF.len()))
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

fn decode_bulk_string(input: &[u8]) -> Result<(Value, usize), DecodeError> {
    let (len_line, header_len) = read_line(input)?;
    let len_str = std::str::from_utf8(len_line)
        .map_err(|_| DecodeError::Malformed("bulk string length is not UTF-8".into()))?;
    let len: i64 = len_str
        .parse()
        .map_err(|_| DecodeError::Malformed(format!("bad bulk string length: {len_str:?}")))?;

    if len == -1 {
        return Ok((Value::Null, header_len));
    }
    if len < -1 {
        return Err(DecodeError::Malformed(format!(
            "negative bulk string length: {len}"
        )));
    }
    let len = len as usize;

    let body_start = header_len;
    let body_end = body_start + len;
    let trailer_end = body_end + CRLF.len();
    if input.len() < trailer_end {
        return Err(DecodeError::Incomplete);
    }
    if &input[body_end..trailer_end] != CRLF {
        return Err(DecodeError::Malformed(
            "bulk string payload not terminated by CRLF".into(),
        ));
    }

    Ok((Value::BulkString(input[body_start..body_end].to_vec()), trailer_end))
}

fn decode_array(input: &[u8]) -> Result<(Value, usize), DecodeError> {
    let (len_line, header_len) = read_line(input)?;
    let len_str = std::str::from_utf8(len_line)
        .map_err(|_| DecodeError::Malformed("array length is not UTF-8".into()))?;
    let len: i64 = len_str
        .parse()
        .map_err(|_| DecodeError::Malformed(format!("bad array length: {len_str:?}")))?;

    if len < 0 {
        // Null array; not produced by this crate but accepted on decode.
        return Ok((Value::Array(Vec::new()), header_len));
    }

    let mut items = Vec::with_capacity(len as usize);
    let mut offset = header_len;
    for _ in 0..len {
        let (value, consumed) = decode(&input[offset..])?;
        items.push(value);
        offset += consumed;
    }
    Ok((Value::Array(items), offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cases() -> Vec<Value> {
        vec![
            Value::SimpleString("PONG".into()),
            Value::SimpleString("FULLRESYNC abc123 0".into()),
            Value::Integer(0),
            Value::Integer(-42),
            Value::BulkString(b"mango".to_vec()),
            Value::BulkString(Vec::new()),
            Value::Null,
            Value::Array(vec![
                Value::bulk_string(&b"SET"[..]),
                Value::bulk_string(&b"foo"[..]),
                Value::bulk_string(&b"bar"[..]),
            ]),
            Value::Array(Vec::new()),
        ]
    }

    #[test]
    fn round_trip_law() {
        for value in cases() {
            let encoded = value.encode();
            let (decoded, consumed) = decode(&encoded).expect("decode encoded value");
            assert_eq!(decoded, value);
            assert_eq!(consumed, encoded.len());
            assert_eq!(consumed, value.encoded_len());
        }
    }

    #[test]
    fn incomplete_never_panics_on_truncated_input() {
        let full = Value::command_array(["SET", "foo", "bar"]).encode();
        for cut in 0..full.len() {
            match decode(&full[..cut]) {
                Err(DecodeError::Incomplete) => {}
                other => panic!("expected Incomplete at cut {cut}, got {other:?}"),
            }
        }
        // The exact length always succeeds.
        let (_, consumed) = decode(&full).unwrap();
        assert_eq!(consumed, full.len());
    }

    #[test]
    fn incremental_parsing_of_pipelined_frames() {
        let f1 = Value::command_array(["SET", "foo", "123"]).encode();
        let f2 = Value::command_array(["SET", "bar", "456"]).encode();
        let mut combined = f1.clone();
        combined.extend_from_slice(&f2);

        // Any prefix shorter than f1 yields no complete frame.
        for cut in 0..f1.len() {
            assert_eq!(decode(&combined[..cut]), Err(DecodeError::Incomplete));
        }

        let (v1, c1) = decode(&combined).unwrap();
        assert_eq!(c1, f1.len());
        let (v2, c2) = decode(&combined[c1..]).unwrap();
        assert_eq!(c1 + c2, combined.len());
        assert_eq!(v1, Value::command_array(["SET", "foo", "123"]));
        assert_eq!(v2, Value::command_array(["SET", "bar", "456"]));
    }

    #[test]
    fn null_bulk_string_decodes_and_encodes() {
        assert_eq!(Value::Null.encode(), b"$-1\r\n");
        let (value, consumed) = decode(b"$-1\r\n").unwrap();
        assert_eq!(value, Value::Null);
        assert_eq!(consumed, 5);
    }

    #[test]
    fn unknown_type_byte_is_malformed() {
        assert!(matches!(decode(b"!oops\r\n"), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn bulk_string_length_mismatch_is_malformed() {
        // Declares 3 bytes but the CRLF lands in the wrong place.
        assert!(matches!(
            decode(b"$3\r\nabXX\r\n"),
            Err(DecodeError::Malformed(_))
        ));
    }
}
