//! Ordering-preserving binary encoding for [`Element`] and tuples of it.
//!
//! Each element is a one-byte type tag followed by a type-specific payload.
//! Integers and floats use a fixed 8-byte sign-flipped big-endian payload
//! (the same trick the KV layer below uses for its own keys) rather than a
//! variable-length scheme: it is simpler and already gives a correct total
//! order across the full `i64`/`f64` range, which is the only property the
//! codec promises.

use crate::element::{Element, OrderedFloat, VersionStamp};
use crate::error::{DecodeError, Result};

mod tag {
    pub const NULL: u8 = 0x00;
    pub const BYTES: u8 = 0x01;
    pub const UTF8: u8 = 0x02;
    pub const NESTED_START: u8 = 0x03;
    pub const NESTED_END: u8 = 0x04;
    pub const INT: u8 = 0x14;
    pub const FLOAT: u8 = 0x15;
    pub const UUID: u8 = 0x16;
    pub const VERSIONSTAMP: u8 = 0x17;
    pub const BOOL: u8 = 0x18;
}

/// Encodes a sequence of elements (a tuple) into its ordering-preserving
/// byte representation. Total and deterministic for any input.
pub fn encode(elements: &[Element]) -> Vec<u8> {
    let mut out = Vec::new();
    for e in elements {
        encode_one(e, &mut out);
    }
    out
}

fn encode_one(element: &Element, out: &mut Vec<u8>) {
    match element {
        Element::Null => out.push(tag::NULL),
        Element::Bool(v) => {
            out.push(tag::BOOL);
            out.push(if *v { 1 } else { 0 });
        }
        Element::Int(v) => {
            out.push(tag::INT);
            out.extend(encode_i64(*v));
        }
        Element::Float(OrderedFloat(v)) => {
            out.push(tag::FLOAT);
            out.extend(encode_f64(*v));
        }
        Element::Bytes(v) => {
            out.push(tag::BYTES);
            encode_escaped(v, out);
        }
        Element::Utf8(v) => {
            out.push(tag::UTF8);
            encode_escaped(v.as_bytes(), out);
        }
        Element::Uuid(v) => {
            out.push(tag::UUID);
            out.extend(v.iter());
        }
        Element::VersionStamp(VersionStamp(v)) => {
            out.push(tag::VERSIONSTAMP);
            out.extend(v.iter());
        }
        Element::Tuple(children) => {
            out.push(tag::NESTED_START);
            for c in children {
                encode_one(c, out);
            }
            out.push(tag::NESTED_END);
        }
    }
}

/// Big-endian two's complement with the sign bit flipped, so negative values
/// sort before positive ones and within each sign the natural byte order is
/// already numeric order.
fn encode_i64(v: i64) -> [u8; 8] {
    let mut bytes = v.to_be_bytes();
    bytes[0] ^= 1 << 7;
    bytes
}

fn decode_i64(bytes: [u8; 8]) -> i64 {
    let mut bytes = bytes;
    bytes[0] ^= 1 << 7;
    i64::from_be_bytes(bytes)
}

/// Big-endian IEEE-754 with the sign bit flipped for positive numbers and
/// all bits flipped for negative ones, so the whole range sorts correctly
/// and `-0.0` sorts just before `0.0`.
fn encode_f64(v: f64) -> [u8; 8] {
    let mut bytes = v.to_be_bytes();
    if v.is_sign_negative() {
        bytes.iter_mut().for_each(|b| *b = !*b);
    } else {
        bytes[0] ^= 1 << 7;
    }
    bytes
}

fn decode_f64(bytes: [u8; 8]) -> f64 {
    let mut bytes = bytes;
    if bytes[0] & (1 << 7) == 0 {
        bytes.iter_mut().for_each(|b| *b = !*b);
    } else {
        bytes[0] ^= 1 << 7;
    }
    f64::from_be_bytes(bytes)
}

/// `0x00` is escaped as `0x00 0xff`; the string is terminated by `0x00 0x00`.
fn encode_escaped(bytes: &[u8], out: &mut Vec<u8>) {
    for &b in bytes {
        if b == 0x00 {
            out.push(0x00);
            out.push(0xff);
        } else {
            out.push(b);
        }
    }
    out.push(0x00);
    out.push(0x00);
}

fn decode_escaped(input: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        match input.get(*pos) {
            None => return Err(DecodeError::UnterminatedString),
            Some(0x00) => match input.get(*pos + 1) {
                Some(0x00) => {
                    *pos += 2;
                    return Ok(out);
                }
                Some(0xff) => {
                    out.push(0x00);
                    *pos += 2;
                }
                _ => return Err(DecodeError::UnterminatedString),
            },
            Some(&b) => {
                out.push(b);
                *pos += 1;
            }
        }
    }
}

/// Decodes a complete byte string produced by [`encode`] back into its
/// tuple of elements. Fails if the bytes are not exactly one encoded tuple.
pub fn decode(bytes: &[u8]) -> Result<Vec<Element>> {
    let mut pos = 0;
    let elements = decode_seq(bytes, &mut pos, None)?;
    if pos != bytes.len() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(elements)
}

/// Decodes elements until `stop_tag` is consumed (nested tuples) or the
/// input is exhausted (top level).
fn decode_seq(input: &[u8], pos: &mut usize, stop_tag: Option<u8>) -> Result<Vec<Element>> {
    let mut out = Vec::new();
    loop {
        match input.get(*pos).copied() {
            None => {
                if stop_tag.is_some() {
                    return Err(DecodeError::UnterminatedTuple);
                }
                return Ok(out);
            }
            Some(t) if Some(t) == stop_tag => {
                *pos += 1;
                return Ok(out);
            }
            Some(t) => {
                out.push(decode_one(t, input, pos)?);
            }
        }
    }
}

fn decode_one(t: u8, input: &[u8], pos: &mut usize) -> Result<Element> {
    *pos += 1;
    match t {
        tag::NULL => Ok(Element::Null),
        tag::BOOL => {
            let b = *input.get(*pos).ok_or(DecodeError::UnexpectedEof)?;
            *pos += 1;
            Ok(Element::Bool(b != 0))
        }
        tag::INT => {
            let bytes = take_fixed::<8>(input, pos)?;
            Ok(Element::Int(decode_i64(bytes)))
        }
        tag::FLOAT => {
            let bytes = take_fixed::<8>(input, pos)?;
            Ok(Element::Float(OrderedFloat(decode_f64(bytes))))
        }
        tag::UUID => {
            let bytes = take_fixed::<16>(input, pos)?;
            Ok(Element::Uuid(bytes))
        }
        tag::VERSIONSTAMP => {
            let bytes = take_fixed::<12>(input, pos)?;
            Ok(Element::VersionStamp(VersionStamp(bytes)))
        }
        tag::BYTES => {
            let bytes = decode_escaped(input, pos)?;
            Ok(Element::Bytes(bytes))
        }
        tag::UTF8 => {
            let bytes = decode_escaped(input, pos)?;
            let s = String::from_utf8(bytes).map_err(|e| DecodeError::InvalidUtf8(e.to_string()))?;
            Ok(Element::Utf8(s))
        }
        tag::NESTED_START => {
            let children = decode_seq(input, pos, Some(tag::NESTED_END))?;
            Ok(Element::Tuple(children))
        }
        other => Err(DecodeError::UnknownTag(other)),
    }
}

fn take_fixed<const N: usize>(input: &[u8], pos: &mut usize) -> Result<[u8; N]> {
    let slice = input.get(*pos..*pos + N).ok_or(DecodeError::UnexpectedEof)?;
    *pos += N;
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    Ok(out)
}

/// Concatenates the encodings of `a` then `b`. Equivalent to, but cheaper
/// than, `encode(a.iter().chain(b.iter()).cloned().collect())`.
pub fn encode_concat(a: &[Element], b: &[Element]) -> Vec<u8> {
    let mut out = encode(a);
    out.extend(encode(b));
    out
}
