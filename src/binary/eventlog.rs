//! Event-log decoder: flash, disk and cached variants.
//!
//! Disk and cached logs carry a per-file header (software version, pack
//! version, unsafe-boot counter) that becomes a banner; the flash variant is
//! a bare record stream. Records are fixed 128-byte frames and decode to one
//! timestamped line each.

use std::io::{Read, Write};

use byteorder::ByteOrder;

use super::{
    nul_terminated, read_frame, unix_date_utc, BinaryDecoder, BinaryType, DecodeError,
    DecodeOutcome, DecoderRegistry, Endianness, Envelope,
};

/// Maximum event text length.
const MAX_EVENT_TEXT: usize = 120;
/// Software-version field width in the file header.
const SOFTWARE_VER_LEN: usize = 60;
/// Low bits of `pack_ver` holding the stream version.
const PACK_STREAM_BITS: u32 = 16;
const PACK_VER_MASK: u32 = (1 << PACK_STREAM_BITS) - 1;

/// File header: 2 u32 + version string + u32.
const FILE_HEADER_LEN: usize = 4 + 4 + SOFTWARE_VER_LEN + 4;
/// Record frame: timestamp + message id + text.
const RECORD_LEN: usize = 4 + 4 + MAX_EVENT_TEXT;

/// One decoded record frame. `message_id` packs 8 bits severity, 8 bits
/// category and 16 bits template id; the text is what gets printed.
struct EventRecord {
    timestamp: u32,
    #[allow(dead_code)]
    message_id: u32,
    text: [u8; MAX_EVENT_TEXT],
}

impl EventRecord {
    fn parse<B: ByteOrder>(frame: &[u8; RECORD_LEN]) -> Self {
        let mut text = [0u8; MAX_EVENT_TEXT];
        text.copy_from_slice(&frame[8..]);
        Self {
            timestamp: B::read_u32(&frame[0..4]),
            message_id: B::read_u32(&frame[4..8]),
            text,
        }
    }
}

/// Decoder for all three event-log variants.
pub struct EventLogDecoder {
    /// Disk and cached logs have the per-file header; flash does not.
    file_header: bool,
}

pub(crate) fn register(registry: &mut DecoderRegistry) {
    registry.register(
        BinaryType::FlashEventLog,
        Box::new(EventLogDecoder { file_header: false }),
    );
    registry.register(
        BinaryType::DiskEventLog,
        Box::new(EventLogDecoder { file_header: true }),
    );
    registry.register(
        BinaryType::CachedEventLog,
        Box::new(EventLogDecoder { file_header: true }),
    );
}

impl EventLogDecoder {
    fn banner<B: ByteOrder>(
        &self,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
    ) -> Result<bool, DecodeError> {
        let mut frame = [0u8; FILE_HEADER_LEN];
        if !read_frame(reader, &mut frame)? {
            return Ok(false);
        }
        let _num_entries = B::read_u32(&frame[0..4]);
        let unsafe_boot_count = B::read_u32(&frame[4..8]);
        let software_version = nul_terminated(&frame[8..8 + SOFTWARE_VER_LEN]);
        let pack_ver = B::read_u32(&frame[8 + SOFTWARE_VER_LEN..]);

        writeln!(
            writer,
            "EventLog CREATED with s/w version : {} with disk pack version : {} / {}",
            software_version,
            pack_ver >> PACK_STREAM_BITS,
            pack_ver & PACK_VER_MASK,
        )?;
        writeln!(writer, "Unsafe bootcount : {unsafe_boot_count}")?;
        writeln!(writer)?;
        Ok(true)
    }

    fn records<B: ByteOrder>(
        &self,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
    ) -> Result<DecodeOutcome, DecodeError> {
        let mut records = 0usize;
        loop {
            let mut frame = [0u8; RECORD_LEN];
            match read_frame(reader, &mut frame) {
                Ok(true) => {}
                Ok(false) => return Ok(DecodeOutcome::Complete { records }),
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(DecodeOutcome::Truncated { records });
                }
                Err(e) => return Err(e.into()),
            }

            let record = EventRecord::parse::<B>(&frame);
            let text = nul_terminated(&record.text);
            // Records with no text are padding; drop them.
            if !text.is_empty() {
                writeln!(
                    writer,
                    "{}:{}",
                    unix_date_utc(i64::from(record.timestamp)),
                    text
                )?;
            }
            records += 1;
        }
    }

    fn run<B: ByteOrder>(
        &self,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
    ) -> Result<DecodeOutcome, DecodeError> {
        if self.file_header {
            match self.banner::<B>(reader, writer) {
                Ok(true) => {}
                // Missing or partial file header: nothing decodable follows.
                Ok(false) => return Ok(DecodeOutcome::Truncated { records: 0 }),
                Err(DecodeError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(DecodeOutcome::Truncated { records: 0 });
                }
                Err(e) => return Err(e),
            }
        }
        self.records::<B>(reader, writer)
    }
}

impl BinaryDecoder for EventLogDecoder {
    fn decode(
        &self,
        envelope: &Envelope,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
    ) -> Result<DecodeOutcome, DecodeError> {
        match envelope.endianness {
            Endianness::Little => self.run::<byteorder::LittleEndian>(reader, writer),
            Endianness::Big => self.run::<byteorder::BigEndian>(reader, writer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::{decode_stream, DecodeVerdict, ENVELOPE_LEN};
    use byteorder::{BigEndian, ByteOrder, LittleEndian};

    fn record<B: ByteOrder>(ts: u32, id: u32, text: &str) -> Vec<u8> {
        let mut frame = vec![0u8; RECORD_LEN];
        B::write_u32(&mut frame[0..4], ts);
        B::write_u32(&mut frame[4..8], id);
        frame[8..8 + text.len()].copy_from_slice(text.as_bytes());
        frame
    }

    fn file_header<B: ByteOrder>(boots: u32, version: &str, pack_ver: u32) -> Vec<u8> {
        let mut frame = vec![0u8; FILE_HEADER_LEN];
        B::write_u32(&mut frame[0..4], 2);
        B::write_u32(&mut frame[4..8], boots);
        frame[8..8 + version.len()].copy_from_slice(version.as_bytes());
        B::write_u32(&mut frame[8 + SOFTWARE_VER_LEN..], pack_ver);
        frame
    }

    fn decode(tag: BinaryType, endianness: Endianness, payload: &[u8]) -> String {
        let registry = DecoderRegistry::with_builtin_decoders();
        let mut input = Vec::new();
        Envelope {
            endianness,
            ..Envelope::new(tag, payload.len() as u32)
        }
        .write(&mut input)
        .unwrap();
        input.extend_from_slice(payload);

        let mut out = Vec::new();
        let verdict = decode_stream(&registry, &mut &input[..], &mut out).unwrap();
        assert!(matches!(verdict, DecodeVerdict::Decoded(_)));
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn disk_log_banner_and_records() {
        let mut payload = file_header::<LittleEndian>(2, "7.1.0", (3 << 16) | 5);
        payload.extend(record::<LittleEndian>(1_600_000_000, 0x0102_0003, "boot ok"));
        payload.extend(record::<LittleEndian>(1_600_000_060, 0x0102_0004, "disk 0 online"));

        let text = decode(BinaryType::DiskEventLog, Endianness::Little, &payload);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "EventLog CREATED with s/w version : 7.1.0 with disk pack version : 3 / 5"
        );
        assert_eq!(lines[1], "Unsafe bootcount : 2");
        assert_eq!(lines[2], "");
        assert_eq!(lines[3], "Sun Sep 13 12:26:40 UTC 2020:boot ok");
        assert_eq!(lines[4], "Sun Sep 13 12:27:40 UTC 2020:disk 0 online");
    }

    #[test]
    fn flash_log_has_no_banner() {
        let payload = record::<LittleEndian>(1_600_000_000, 1, "flash event");
        let text = decode(BinaryType::FlashEventLog, Endianness::Little, &payload);
        assert_eq!(text, "Sun Sep 13 12:26:40 UTC 2020:flash event\n");
    }

    #[test]
    fn empty_text_records_are_suppressed() {
        let mut payload = record::<LittleEndian>(1_600_000_000, 1, "kept");
        payload.extend(record::<LittleEndian>(1_600_000_001, 2, ""));
        payload.extend(record::<LittleEndian>(1_600_000_002, 3, "also kept"));

        let text = decode(BinaryType::FlashEventLog, Endianness::Little, &payload);
        assert_eq!(text.lines().count(), 2);
        assert!(!text.contains("12:26:41"));
    }

    #[test]
    fn big_endian_records() {
        let mut payload = file_header::<BigEndian>(7, "8.0.1", (4 << 16) | 1);
        payload.extend(record::<BigEndian>(1_600_000_000, 1, "be event"));

        let text = decode(BinaryType::CachedEventLog, Endianness::Big, &payload);
        assert!(text.contains("s/w version : 8.0.1 with disk pack version : 4 / 1"));
        assert!(text.contains("Unsafe bootcount : 7"));
        assert!(text.contains("Sun Sep 13 12:26:40 UTC 2020:be event"));
    }

    #[test]
    fn truncated_record_is_soft() {
        let mut payload = record::<LittleEndian>(1_600_000_000, 1, "whole");
        payload.extend_from_slice(&[0u8; 10]); // partial second record

        let registry = DecoderRegistry::with_builtin_decoders();
        let mut input = Vec::new();
        Envelope::new(BinaryType::FlashEventLog, payload.len() as u32)
            .write(&mut input)
            .unwrap();
        input.extend_from_slice(&payload);
        assert_eq!(input.len(), ENVELOPE_LEN + RECORD_LEN + 10);

        let mut out = Vec::new();
        let verdict = decode_stream(&registry, &mut &input[..], &mut out).unwrap();
        assert_eq!(
            verdict,
            DecodeVerdict::Decoded(DecodeOutcome::Truncated { records: 1 })
        );
        assert!(String::from_utf8(out).unwrap().contains("whole"));
    }
}
