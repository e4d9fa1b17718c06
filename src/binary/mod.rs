//! Binary diagnostic payloads: envelope parsing and decoder dispatch.
//!
//! Every decodable binary dump starts with a fixed envelope declaring what it
//! is and how to read it:
//!
//! ```text
//! offset  size  field
//! 0       4     header_version   magic 0xDEADBEEF
//! 4       4     binary_type      decoder selector
//! 8       4     image_size       payload length in bytes
//! 12      1     endianness       0 = little, nonzero = big
//! 13      1     architecture     0 = MIPS, 1 = ARM
//! 14      2     reserved
//! ```
//!
//! The envelope itself is always little-endian; the `endianness` flag governs
//! multi-byte fields of the payload that follows, and `architecture` may
//! further select a record layout (the perf log has two).
//!
//! Decoders live in a [`DecoderRegistry`] built once at startup and passed by
//! reference; nothing mutates it after the first payload is processed. An
//! unknown type tag is a non-fatal miss: the payload is copied through
//! unchanged with a diagnostic.

pub mod eventlog;
pub mod perflog;
pub mod zonetable;

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::TimeZone;
use thiserror::Error;
use tracing::warn;

/// Envelope magic.
pub const ENVELOPE_MAGIC: u32 = 0xDEAD_BEEF;
/// On-wire envelope length: magic word plus 12 descriptor bytes.
pub const ENVELOPE_LEN: usize = 16;

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid envelope magic 0x{0:08x}")]
    InvalidMagic(u32),
    #[error("Envelope truncated: {0} bytes")]
    ShortEnvelope(usize),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Envelope ─────────────────────────────────────────────────────────────────

/// Payload byte order, from the envelope's `endianness` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

impl From<u8> for Endianness {
    fn from(v: u8) -> Self {
        if v == 0 { Endianness::Little } else { Endianness::Big }
    }
}

/// Producer CPU architecture; selects record layout where they differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    Mips,
    Arm,
}

impl From<u8> for Architecture {
    fn from(v: u8) -> Self {
        if v == 0 { Architecture::Mips } else { Architecture::Arm }
    }
}

/// Registered payload type tags. Numeric values are stable across a build;
/// they are what the producer writes into `binary_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BinaryType {
    FlashEventLog = 1,
    DiskEventLog = 2,
    CachedEventLog = 3,
    PerfLog = 4,
    ZoneTable = 5,
}

/// Parsed binary envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub header_version: u32,
    pub binary_type: u32,
    pub image_size: u32,
    pub endianness: Endianness,
    pub architecture: Architecture,
    pub reserved: u16,
}

impl Envelope {
    /// Envelope for a freshly wrapped dump: little-endian MIPS, which is what
    /// the historical converter produced.
    pub fn new(binary_type: BinaryType, image_size: u32) -> Self {
        Self {
            header_version: ENVELOPE_MAGIC,
            binary_type: binary_type as u32,
            image_size,
            endianness: Endianness::Little,
            architecture: Architecture::Mips,
            reserved: 0,
        }
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self, DecodeError> {
        let header_version = reader.read_u32::<LittleEndian>()?;
        if header_version != ENVELOPE_MAGIC {
            return Err(DecodeError::InvalidMagic(header_version));
        }
        let binary_type = reader.read_u32::<LittleEndian>()?;
        let image_size = reader.read_u32::<LittleEndian>()?;
        let endianness = Endianness::from(reader.read_u8()?);
        let architecture = Architecture::from(reader.read_u8()?);
        let reserved = reader.read_u16::<LittleEndian>()?;
        Ok(Self {
            header_version,
            binary_type,
            image_size,
            endianness,
            architecture,
            reserved,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.header_version)?;
        writer.write_u32::<LittleEndian>(self.binary_type)?;
        writer.write_u32::<LittleEndian>(self.image_size)?;
        writer.write_u8(match self.endianness {
            Endianness::Little => 0,
            Endianness::Big => 1,
        })?;
        writer.write_u8(match self.architecture {
            Architecture::Mips => 0,
            Architecture::Arm => 1,
        })?;
        writer.write_u16::<LittleEndian>(self.reserved)?;
        Ok(())
    }
}

// ── Decoder capability ───────────────────────────────────────────────────────

/// How a decoder's record stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// Input ended cleanly on a record boundary.
    Complete { records: usize },
    /// Input ended mid-record; everything decoded up to that point stands.
    Truncated { records: usize },
}

impl DecodeOutcome {
    pub fn records(&self) -> usize {
        match *self {
            DecodeOutcome::Complete { records } | DecodeOutcome::Truncated { records } => records,
        }
    }
}

/// A typed decoder for one (or more) envelope type tags.
pub trait BinaryDecoder: Send + Sync {
    fn decode(
        &self,
        envelope: &Envelope,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
    ) -> Result<DecodeOutcome, DecodeError>;
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Type-tag → decoder table. Built once at startup, read-only afterwards.
#[derive(Default)]
pub struct DecoderRegistry {
    decoders: HashMap<u32, Box<dyn BinaryDecoder>>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in decoder installed.
    pub fn with_builtin_decoders() -> Self {
        let mut registry = Self::new();
        eventlog::register(&mut registry);
        perflog::register(&mut registry);
        zonetable::register(&mut registry);
        registry
    }

    pub fn register(&mut self, tag: BinaryType, decoder: Box<dyn BinaryDecoder>) {
        self.decoders.insert(tag as u32, decoder);
    }

    pub fn get(&self, tag: u32) -> Option<&dyn BinaryDecoder> {
        self.decoders.get(&tag).map(|d| d.as_ref())
    }
}

// ── Stream entry point ───────────────────────────────────────────────────────

/// What [`decode_stream`] did with the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeVerdict {
    /// Envelope recognized and a registered decoder ran.
    Decoded(DecodeOutcome),
    /// No envelope magic; bytes were copied through unchanged.
    NotBinary,
    /// Envelope valid but no decoder for the tag; bytes copied through.
    UnknownType(u32),
}

/// Decode one envelope-framed payload to text.
///
/// Reads the whole payload, parses the envelope and dispatches to the
/// registered decoder. A missing magic or unregistered tag degrades to a
/// byte-exact copy with a diagnostic; only genuine I/O failures propagate.
pub fn decode_stream<R: Read, W: Write>(
    registry: &DecoderRegistry,
    reader: &mut R,
    writer: &mut W,
) -> Result<DecodeVerdict, DecodeError> {
    let mut bs = Vec::new();
    reader.read_to_end(&mut bs)?;

    if bs.len() < ENVELOPE_LEN {
        warn!(len = bs.len(), "payload shorter than an envelope, copying through");
        writer.write_all(&bs)?;
        return Ok(DecodeVerdict::NotBinary);
    }

    let envelope = match Envelope::read(&bs[..ENVELOPE_LEN]) {
        Ok(envelope) => envelope,
        Err(DecodeError::InvalidMagic(seen)) => {
            warn!("no envelope magic (0x{seen:08x}), copying through");
            writer.write_all(&bs)?;
            return Ok(DecodeVerdict::NotBinary);
        }
        Err(other) => return Err(other),
    };

    let Some(decoder) = registry.get(envelope.binary_type) else {
        warn!(tag = envelope.binary_type, "no decoder registered, copying through");
        writer.write_all(&bs)?;
        return Ok(DecodeVerdict::UnknownType(envelope.binary_type));
    };

    let mut payload = &bs[ENVELOPE_LEN..];
    let outcome = decoder.decode(&envelope, &mut payload, writer)?;
    if let DecodeOutcome::Truncated { records } = outcome {
        warn!(records, "payload ended mid-record");
    }
    Ok(DecodeVerdict::Decoded(outcome))
}

// ── Shared decoding helpers ──────────────────────────────────────────────────

/// Fill `buf` exactly, distinguishing a clean end of input (`Ok(false)`, zero
/// bytes read) from a mid-frame truncation (`UnexpectedEof`).
pub(crate) fn read_frame<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("frame truncated at {filled} of {} bytes", buf.len()),
            ));
        }
        filled += n;
    }
    Ok(true)
}

/// Text of a fixed-width NUL-terminated field.
pub(crate) fn nul_terminated(bytes: &[u8]) -> Cow<'_, str> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end])
}

/// `Sun Sep 13 12:26:40 UTC 2020`, the classic `date(1)` shape the
/// historical tool printed.
pub(crate) fn unix_date_utc(ts: i64) -> String {
    let t = chrono::Utc.timestamp_opt(ts, 0).single().unwrap_or_default();
    t.format("%a %b %e %H:%M:%S UTC %Y").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trip() {
        let envelope = Envelope {
            header_version: ENVELOPE_MAGIC,
            binary_type: BinaryType::PerfLog as u32,
            image_size: 4096,
            endianness: Endianness::Big,
            architecture: Architecture::Arm,
            reserved: 0,
        };
        let mut bytes = Vec::new();
        envelope.write(&mut bytes).unwrap();
        assert_eq!(bytes.len(), ENVELOPE_LEN);
        assert_eq!(Envelope::read(&bytes[..]).unwrap(), envelope);
    }

    #[test]
    fn envelope_wire_layout() {
        // The envelope is little-endian framed regardless of host or payload
        // byte order.
        let mut bytes = Vec::new();
        Envelope::new(BinaryType::ZoneTable, 0x0102_0304).write(&mut bytes).unwrap();
        assert_eq!(&bytes[0..4], &[0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(&bytes[4..8], &[5, 0, 0, 0]);
        assert_eq!(&bytes[8..12], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn envelope_rejects_bad_magic() {
        let bytes = [0u8; ENVELOPE_LEN];
        assert!(matches!(
            Envelope::read(&bytes[..]),
            Err(DecodeError::InvalidMagic(0))
        ));
    }

    #[test]
    fn unknown_tag_copies_through() {
        let registry = DecoderRegistry::with_builtin_decoders();
        let mut input = Vec::new();
        Envelope {
            binary_type: 0x7777,
            ..Envelope::new(BinaryType::PerfLog, 4)
        }
        .write(&mut input)
        .unwrap();
        input.extend_from_slice(b"data");

        let mut out = Vec::new();
        let verdict = decode_stream(&registry, &mut &input[..], &mut out).unwrap();
        assert_eq!(verdict, DecodeVerdict::UnknownType(0x7777));
        assert_eq!(out, input);
    }

    #[test]
    fn non_binary_copies_through() {
        let registry = DecoderRegistry::with_builtin_decoders();
        let input = b"plain old text, no envelope here".to_vec();
        let mut out = Vec::new();
        let verdict = decode_stream(&registry, &mut &input[..], &mut out).unwrap();
        assert_eq!(verdict, DecodeVerdict::NotBinary);
        assert_eq!(out, input);
    }

    #[test]
    fn builtin_registry_is_total_over_known_tags() {
        let registry = DecoderRegistry::with_builtin_decoders();
        for tag in [
            BinaryType::FlashEventLog,
            BinaryType::DiskEventLog,
            BinaryType::CachedEventLog,
            BinaryType::PerfLog,
            BinaryType::ZoneTable,
        ] {
            assert!(registry.get(tag as u32).is_some(), "{tag:?} not registered");
        }
    }

    #[test]
    fn read_frame_clean_vs_truncated() {
        let mut buf = [0u8; 4];
        let mut empty: &[u8] = &[];
        assert!(!read_frame(&mut empty, &mut buf).unwrap());

        let mut short: &[u8] = &[1, 2];
        let err = read_frame(&mut short, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let mut exact: &[u8] = &[1, 2, 3, 4];
        assert!(read_frame(&mut exact, &mut buf).unwrap());
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn nul_terminated_variants() {
        assert_eq!(nul_terminated(b"abc\0def"), "abc");
        assert_eq!(nul_terminated(b"abc"), "abc");
        assert_eq!(nul_terminated(b"\0abc"), "");
    }
}
