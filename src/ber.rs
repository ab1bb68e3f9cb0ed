//! Basic Encoding Rules (X.690) packet tree.
//!
//! LDAP frames every message as one BER TLV. This module owns the only code in
//! the crate that touches raw bytes: the protocol engine builds and walks
//! [`Packet`] trees and hands them back here for serialization.
//!
//! ```text
//! identifier  = class (2 bits) | constructed (1 bit) | tag number (5 bits, or 0x1f + base-128)
//! length      = short form (< 128) | 0x80 + n followed by n length octets
//! contents    = primitive value bytes | concatenated child TLVs
//! ```
//!
//! Only definite lengths are accepted, which is all RFC 4511 section 5.1 allows.

use std::fmt::Write as _;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound on a single inbound packet.
pub const MAX_PACKET_LENGTH: usize = 16 * 1024 * 1024;

const MAX_DEPTH: usize = 64;

pub const TAG_BOOLEAN: u32 = 0x01;
pub const TAG_INTEGER: u32 = 0x02;
pub const TAG_OCTET_STRING: u32 = 0x04;
pub const TAG_NULL: u32 = 0x05;
pub const TAG_ENUMERATED: u32 = 0x0a;
pub const TAG_SEQUENCE: u32 = 0x10;
pub const TAG_SET: u32 = 0x11;

#[derive(Error, Debug)]
pub enum BerError {
    #[error("indefinite length encoding is not supported")]
    IndefiniteLength,

    #[error("length field of {0} octets is too wide")]
    LengthTooWide(usize),

    #[error("packet length {0} exceeds the {MAX_PACKET_LENGTH} byte limit")]
    TooLarge(usize),

    #[error("stream closed in the middle of a packet")]
    UnexpectedEof,

    #[error("malformed packet: {0}")]
    Malformed(String),

    #[error("unexpected value: {0}")]
    InvalidValue(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BerError {
    /// True when the whole frame was consumed, so the stream still sits on a
    /// packet boundary and the next read can proceed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, BerError::Malformed(_) | BerError::InvalidValue(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    Universal,
    Application,
    Context,
    Private,
}

impl Class {
    fn bits(self) -> u8 {
        match self {
            Class::Universal => 0x00,
            Class::Application => 0x40,
            Class::Context => 0x80,
            Class::Private => 0xc0,
        }
    }

    fn from_identifier(byte: u8) -> Self {
        match byte & 0xc0 {
            0x00 => Class::Universal,
            0x40 => Class::Application,
            0x80 => Class::Context,
            _ => Class::Private,
        }
    }
}

/// One node of a decoded or to-be-encoded BER tree.
///
/// Primitive nodes carry their contents in `value`; constructed nodes carry
/// `children` and leave `value` empty.
#[derive(Debug, Clone)]
pub struct Packet {
    pub class: Class,
    pub constructed: bool,
    pub tag: u32,
    pub value: Vec<u8>,
    pub children: Vec<Packet>,
    pub description: &'static str,
}

impl Packet {
    pub fn constructed(class: Class, tag: u32, description: &'static str) -> Self {
        Self {
            class,
            constructed: true,
            tag,
            value: Vec::new(),
            children: Vec::new(),
            description,
        }
    }

    pub fn primitive(class: Class, tag: u32, value: Vec<u8>, description: &'static str) -> Self {
        Self {
            class,
            constructed: false,
            tag,
            value,
            children: Vec::new(),
            description,
        }
    }

    pub fn sequence(description: &'static str) -> Self {
        Self::constructed(Class::Universal, TAG_SEQUENCE, description)
    }

    pub fn set(description: &'static str) -> Self {
        Self::constructed(Class::Universal, TAG_SET, description)
    }

    pub fn integer(value: i64, description: &'static str) -> Self {
        Self::primitive(
            Class::Universal,
            TAG_INTEGER,
            encode_integer(value),
            description,
        )
    }

    pub fn enumerated(value: i64, description: &'static str) -> Self {
        Self::primitive(
            Class::Universal,
            TAG_ENUMERATED,
            encode_integer(value),
            description,
        )
    }

    pub fn boolean(value: bool, description: &'static str) -> Self {
        let byte = if value { 0xff } else { 0x00 };
        Self::primitive(Class::Universal, TAG_BOOLEAN, vec![byte], description)
    }

    pub fn octet_string(value: impl Into<Vec<u8>>, description: &'static str) -> Self {
        Self::primitive(
            Class::Universal,
            TAG_OCTET_STRING,
            value.into(),
            description,
        )
    }

    /// Builder-style append.
    pub fn with_child(mut self, child: Packet) -> Self {
        self.children.push(child);
        self
    }

    pub fn push(&mut self, child: Packet) {
        self.children.push(child);
    }

    pub fn child(&self, index: usize) -> Option<&Packet> {
        self.children.get(index)
    }

    pub fn is(&self, class: Class, constructed: bool, tag: u32) -> bool {
        self.class == class && self.constructed == constructed && self.tag == tag
    }

    /// Interpret a primitive INTEGER or ENUMERATED as a signed value.
    pub fn as_i64(&self) -> Result<i64, BerError> {
        if self.constructed {
            return Err(BerError::InvalidValue(
                "expected primitive integer, found constructed value".to_string(),
            ));
        }
        decode_integer(&self.value)
    }

    pub fn as_bool(&self) -> Result<bool, BerError> {
        match self.value.as_slice() {
            [byte] if !self.constructed => Ok(*byte != 0),
            _ => Err(BerError::InvalidValue(format!(
                "boolean must be a single octet, found {} octets",
                self.value.len()
            ))),
        }
    }

    pub fn as_str(&self) -> Result<&str, BerError> {
        if self.constructed {
            return Err(BerError::InvalidValue(
                "expected primitive string, found constructed value".to_string(),
            ));
        }
        std::str::from_utf8(&self.value)
            .map_err(|e| BerError::InvalidValue(format!("string is not UTF-8: {}", e)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.value
    }

    /// Serialize the tree to its wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len_hint());
        self.write_into(&mut out);
        out
    }

    fn encoded_len_hint(&self) -> usize {
        if self.constructed {
            6 + self
                .children
                .iter()
                .map(Packet::encoded_len_hint)
                .sum::<usize>()
        } else {
            6 + self.value.len()
        }
    }

    fn write_into(&self, out: &mut Vec<u8>) {
        let constructed_bit = if self.constructed { 0x20 } else { 0x00 };
        let leading = self.class.bits() | constructed_bit;
        if self.tag < 0x1f {
            out.push(leading | self.tag as u8);
        } else {
            out.push(leading | 0x1f);
            encode_base128(self.tag, out);
        }

        if self.constructed {
            let mut contents = Vec::new();
            for child in &self.children {
                child.write_into(&mut contents);
            }
            encode_length(contents.len(), out);
            out.extend_from_slice(&contents);
        } else {
            encode_length(self.value.len(), out);
            out.extend_from_slice(&self.value);
        }
    }

    /// Decode exactly one packet occupying the whole buffer.
    pub fn decode(bytes: &[u8]) -> Result<Packet, BerError> {
        let (packet, consumed) = parse_tlv(bytes, 0).map_err(BerError::Malformed)?;
        if consumed != bytes.len() {
            return Err(BerError::Malformed(format!(
                "{} trailing bytes after packet",
                bytes.len() - consumed
            )));
        }
        Ok(packet)
    }

    /// Indented, human-readable rendering of the tree for trace logging.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_into(&mut out, 0);
        out
    }

    fn dump_into(&self, out: &mut String, depth: usize) {
        let kind = if self.constructed { "cons" } else { "prim" };
        let _ = write!(
            out,
            "{:indent$}{:?}({}) {} tag={}",
            "",
            self.class,
            kind,
            self.description,
            self.tag,
            indent = depth * 2
        );
        if self.constructed {
            out.push('\n');
            for child in &self.children {
                child.dump_into(out, depth + 1);
            }
        } else {
            match std::str::from_utf8(&self.value) {
                Ok(text) if text.chars().all(|c| !c.is_control()) => {
                    let _ = writeln!(out, " {:?}", text);
                }
                _ => {
                    let _ = write!(out, " 0x");
                    for byte in &self.value {
                        let _ = write!(out, "{:02x}", byte);
                    }
                    out.push('\n');
                }
            }
        }
    }
}

/// Read one complete BER frame from the stream.
///
/// Returns `Ok(None)` when the stream is closed cleanly on a packet boundary.
pub async fn read_packet<R>(reader: &mut R) -> Result<Option<Packet>, BerError>
where
    R: AsyncRead + Unpin,
{
    let first = match reader.read_u8().await {
        Ok(byte) => byte,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(BerError::Io(e)),
    };

    let mut frame = vec![first];
    if first & 0x1f == 0x1f {
        loop {
            let byte = read_required(reader).await?;
            frame.push(byte);
            if byte & 0x80 == 0 {
                break;
            }
            if frame.len() > 6 {
                return Err(BerError::LengthTooWide(frame.len() - 1));
            }
        }
    }

    let length_byte = read_required(reader).await?;
    frame.push(length_byte);
    let length = if length_byte & 0x80 == 0 {
        length_byte as usize
    } else {
        let octets = (length_byte & 0x7f) as usize;
        if octets == 0 {
            return Err(BerError::IndefiniteLength);
        }
        if octets > 4 {
            return Err(BerError::LengthTooWide(octets));
        }
        let mut length = 0usize;
        for _ in 0..octets {
            let byte = read_required(reader).await?;
            frame.push(byte);
            length = (length << 8) | byte as usize;
        }
        length
    };

    if length > MAX_PACKET_LENGTH {
        return Err(BerError::TooLarge(length));
    }

    read_contents(reader, &mut frame, length).await?;
    Packet::decode(&frame).map(Some)
}

/// Append `length` content octets to `frame`. The buffer grows with the
/// bytes actually received, never with the declared length alone.
async fn read_contents<R>(
    reader: &mut R,
    frame: &mut Vec<u8>,
    length: usize,
) -> Result<(), BerError>
where
    R: AsyncRead + Unpin,
{
    let received = (&mut *reader)
        .take(length as u64)
        .read_to_end(frame)
        .await
        .map_err(BerError::Io)?;
    if received < length {
        return Err(BerError::UnexpectedEof);
    }
    Ok(())
}

async fn read_required<R>(reader: &mut R) -> Result<u8, BerError>
where
    R: AsyncRead + Unpin,
{
    reader.read_u8().await.map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => BerError::UnexpectedEof,
        _ => BerError::Io(e),
    })
}

fn parse_tlv(input: &[u8], depth: usize) -> Result<(Packet, usize), String> {
    if depth > MAX_DEPTH {
        return Err(format!("nesting deeper than {} levels", MAX_DEPTH));
    }

    let identifier = *input.first().ok_or("empty input")?;
    let class = Class::from_identifier(identifier);
    let constructed = identifier & 0x20 != 0;
    let mut pos = 1;

    let tag = if identifier & 0x1f == 0x1f {
        let mut tag: u32 = 0;
        loop {
            let byte = *input.get(pos).ok_or("truncated tag")?;
            pos += 1;
            if tag > (u32::MAX >> 7) {
                return Err("tag number overflow".to_string());
            }
            tag = (tag << 7) | u32::from(byte & 0x7f);
            if byte & 0x80 == 0 {
                break;
            }
        }
        tag
    } else {
        u32::from(identifier & 0x1f)
    };

    let length_byte = *input.get(pos).ok_or("truncated length")?;
    pos += 1;
    let length = if length_byte & 0x80 == 0 {
        length_byte as usize
    } else {
        let octets = (length_byte & 0x7f) as usize;
        if octets == 0 {
            return Err("indefinite length is not supported".to_string());
        }
        if octets > 4 {
            return Err(format!("length field of {} octets is too wide", octets));
        }
        let bytes = input
            .get(pos..pos + octets)
            .ok_or("truncated long-form length")?;
        pos += octets;
        bytes
            .iter()
            .fold(0usize, |acc, byte| (acc << 8) | *byte as usize)
    };

    let end = pos
        .checked_add(length)
        .filter(|end| *end <= input.len())
        .ok_or_else(|| {
            format!(
                "contents of {} bytes exceed the {} available",
                length,
                input.len() - pos
            )
        })?;
    let contents = &input[pos..end];

    let packet = if constructed {
        let mut children = Vec::new();
        let mut offset = 0;
        while offset < contents.len() {
            let (child, used) = parse_tlv(&contents[offset..], depth + 1)?;
            children.push(child);
            offset += used;
        }
        Packet {
            class,
            constructed,
            tag,
            value: Vec::new(),
            children,
            description: "",
        }
    } else {
        Packet {
            class,
            constructed,
            tag,
            value: contents.to_vec(),
            children: Vec::new(),
            description: "",
        }
    };

    Ok((packet, end))
}

/// Encode a definite length in the shortest form.
pub fn encode_length(length: usize, out: &mut Vec<u8>) {
    if length < 0x80 {
        out.push(length as u8);
        return;
    }
    let bytes = (length as u64).to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let significant = &bytes[skip..];
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
}

fn encode_base128(mut value: u32, out: &mut Vec<u8>) {
    let mut groups = vec![(value & 0x7f) as u8];
    value >>= 7;
    while value > 0 {
        groups.push(0x80 | (value & 0x7f) as u8);
        value >>= 7;
    }
    groups.reverse();
    out.extend_from_slice(&groups);
}

fn encode_integer(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant_zero = bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0;
        let redundant_ones = bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0;
        if redundant_zero || redundant_ones {
            start += 1;
        } else {
            break;
        }
    }
    bytes[start..].to_vec()
}

fn decode_integer(bytes: &[u8]) -> Result<i64, BerError> {
    if bytes.is_empty() || bytes.len() > 8 {
        return Err(BerError::InvalidValue(format!(
            "integer must be 1 to 8 octets, found {}",
            bytes.len()
        )));
    }
    let mut value: i64 = if bytes[0] & 0x80 != 0 { -1 } else { 0 };
    for byte in bytes {
        value = (value << 8) | i64::from(*byte);
    }
    Ok(value)
}
