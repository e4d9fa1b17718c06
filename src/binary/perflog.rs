//! Performance-log decoder.
//!
//! A perf log is one file header (statistic-independent slot times plus ring
//! state) followed by a stream of per-statistic records, each carrying a
//! 900-slot ring of u64 samples. The slot-time record has two wire layouts:
//! the producer's MIPS build uses a 64-bit tick counter, the ARM build a
//! 32-bit one with the time words swapped. The header read picks the layout
//! by architecture and projects into the canonical shape; nothing downstream
//! of the header read looks at the architecture again.

use std::io::{Read, Write};

use byteorder::ByteOrder;

use super::{
    nul_terminated, read_frame, unix_date_utc, Architecture, BinaryDecoder, BinaryType,
    DecodeError, DecodeOutcome, DecoderRegistry, Endianness, Envelope,
};

/// Slots in every sample ring.
const NUM_LOG_ENTRIES: usize = 900;
/// Name and description field width.
const NAME_LEN: usize = 128;
/// Samples printed per output line.
const ENTRIES_PER_LINE: usize = 5;

/// Canonical slot-time shape (the MIPS layout). Only the wall-clock seconds
/// drive the output; ticks and nanoseconds are carried for completeness.
#[derive(Debug, Clone, Copy, Default)]
#[allow(dead_code)]
struct EntryTime {
    fast_ticks: u64,
    time_ts: u32,
    time_tns: u32,
}

/// ARM wire shape: narrower tick counter, time words in the other order.
#[derive(Debug, Clone, Copy)]
struct EntryTimeArm {
    fast_ticks: u32,
    time_tns: u32,
    time_ts: u32,
}

impl From<EntryTimeArm> for EntryTime {
    fn from(arm: EntryTimeArm) -> Self {
        EntryTime {
            fast_ticks: u64::from(arm.fast_ticks),
            time_ts: arm.time_ts,
            time_tns: arm.time_tns,
        }
    }
}

const ENTRY_TIME_MIPS_LEN: usize = 8 + 4 + 4;
const ENTRY_TIME_ARM_LEN: usize = 4 + 4 + 4;

/// Fixed header prefix: name, pause reason, entry count, ring index.
const HEADER_PREFIX_LEN: usize = NAME_LEN + 8 + 4 + 4;
const HEADER_MIPS_LEN: usize = HEADER_PREFIX_LEN + NUM_LOG_ENTRIES * ENTRY_TIME_MIPS_LEN;
const HEADER_ARM_LEN: usize = HEADER_PREFIX_LEN + NUM_LOG_ENTRIES * ENTRY_TIME_ARM_LEN;

/// Per-statistic record frame.
const RECORD_LEN: usize = NAME_LEN + NAME_LEN + 4 + 4 + NUM_LOG_ENTRIES * 8;

struct PerfLogHeader {
    name: [u8; NAME_LEN],
    pause_reason: u64,
    record_entries: i32,
    next_log_index: i32,
    entry_times: Vec<EntryTime>,
}

impl PerfLogHeader {
    fn parse<B: ByteOrder>(frame: &[u8], architecture: Architecture) -> Self {
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&frame[..NAME_LEN]);
        let pause_reason = B::read_u64(&frame[NAME_LEN..NAME_LEN + 8]);
        let record_entries = B::read_i32(&frame[NAME_LEN + 8..NAME_LEN + 12]);
        let next_log_index = B::read_i32(&frame[NAME_LEN + 12..NAME_LEN + 16]);

        let mut entry_times = Vec::with_capacity(NUM_LOG_ENTRIES);
        let times = &frame[HEADER_PREFIX_LEN..];
        match architecture {
            Architecture::Mips => {
                for chunk in times.chunks_exact(ENTRY_TIME_MIPS_LEN) {
                    entry_times.push(EntryTime {
                        fast_ticks: B::read_u64(&chunk[0..8]),
                        time_ts: B::read_u32(&chunk[8..12]),
                        time_tns: B::read_u32(&chunk[12..16]),
                    });
                }
            }
            Architecture::Arm => {
                for chunk in times.chunks_exact(ENTRY_TIME_ARM_LEN) {
                    entry_times.push(
                        EntryTimeArm {
                            fast_ticks: B::read_u32(&chunk[0..4]),
                            time_tns: B::read_u32(&chunk[4..8]),
                            time_ts: B::read_u32(&chunk[8..12]),
                        }
                        .into(),
                    );
                }
            }
        }

        Self { name, pause_reason, record_entries, next_log_index, entry_times }
    }
}

struct PerfRecord {
    name: [u8; NAME_LEN],
    desc: [u8; NAME_LEN],
    log_entry_size: u32,
    log_bytes: u32,
    log: Vec<u64>,
}

impl PerfRecord {
    fn parse<B: ByteOrder>(frame: &[u8; RECORD_LEN]) -> Self {
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&frame[..NAME_LEN]);
        let mut desc = [0u8; NAME_LEN];
        desc.copy_from_slice(&frame[NAME_LEN..2 * NAME_LEN]);
        let log_entry_size = B::read_u32(&frame[2 * NAME_LEN..2 * NAME_LEN + 4]);
        let log_bytes = B::read_u32(&frame[2 * NAME_LEN + 4..2 * NAME_LEN + 8]);
        let log = frame[2 * NAME_LEN + 8..]
            .chunks_exact(8)
            .map(B::read_u64)
            .collect();
        Self { name, desc, log_entry_size, log_bytes, log }
    }
}

pub struct PerfLogDecoder;

pub(crate) fn register(registry: &mut DecoderRegistry) {
    registry.register(BinaryType::PerfLog, Box::new(PerfLogDecoder));
}

impl PerfLogDecoder {
    /// Emit one statistic's ring, oldest slot first, five samples per line.
    ///
    /// The slot times live in the file header and are shared by every
    /// statistic (the producer uploads all rings in one pass). A line whose
    /// five slots never got a wall-clock stamp is elided wholesale; a line
    /// whose first slots are unstamped borrows the first stamped slot's time
    /// minus one second per leading unstamped slot.
    fn dump_record(
        &self,
        header: &PerfLogHeader,
        record: &PerfRecord,
        writer: &mut dyn Write,
    ) -> Result<(), DecodeError> {
        writeln!(
            writer,
            "Statistic '{}' : {} log",
            nul_terminated(&record.name),
            nul_terminated(&record.desc),
        )?;
        writeln!(
            writer,
            "Entry size {} LogBytes {}",
            record.log_entry_size, record.log_bytes
        )?;

        let oldest = header.next_log_index.rem_euclid(NUM_LOG_ENTRIES as i32) as usize;
        let mut index = oldest;
        let mut logged = 0usize;

        loop {
            let mut skip = false;
            if logged % ENTRIES_PER_LINE == 0 {
                let mut stamp: Option<i64> = None;
                if header.entry_times[index].time_ts == 0 {
                    let mut zeros = 0usize;
                    for i in 0..ENTRIES_PER_LINE {
                        let slot = (index + i) % NUM_LOG_ENTRIES;
                        let ts = header.entry_times[slot].time_ts;
                        if ts == 0 {
                            zeros += 1;
                        } else if stamp.is_none() {
                            stamp = Some(i64::from(ts) - zeros as i64);
                        }
                    }
                    if zeros == ENTRIES_PER_LINE {
                        skip = true;
                    }
                } else {
                    stamp = Some(i64::from(header.entry_times[index].time_ts));
                }

                if !skip {
                    write!(writer, "\n{}:\t", unix_date_utc(stamp.unwrap_or(0)))?;
                }
            }

            if !skip {
                write!(writer, "{:12} ", record.log[index])?;
                index = (index + 1) % NUM_LOG_ENTRIES;
                logged += 1;
            } else {
                index = (index + ENTRIES_PER_LINE) % NUM_LOG_ENTRIES;
            }
            if index == oldest {
                break;
            }
        }
        writeln!(writer)?;
        Ok(())
    }

    fn run<B: ByteOrder>(
        &self,
        architecture: Architecture,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
    ) -> Result<DecodeOutcome, DecodeError> {
        let header_len = match architecture {
            Architecture::Mips => HEADER_MIPS_LEN,
            Architecture::Arm => HEADER_ARM_LEN,
        };
        let mut frame = vec![0u8; header_len];
        match read_frame(reader, &mut frame) {
            Ok(true) => {}
            Ok(false) => return Ok(DecodeOutcome::Complete { records: 0 }),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(DecodeOutcome::Truncated { records: 0 });
            }
            Err(e) => return Err(e.into()),
        }
        let header = PerfLogHeader::parse::<B>(&frame, architecture);

        writeln!(
            writer,
            "PerfLog: {} PauseReason {} Entries per record {}",
            nul_terminated(&header.name),
            header.pause_reason,
            header.record_entries,
        )?;

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
            let record = PerfRecord::parse::<B>(&frame);
            self.dump_record(&header, &record, writer)?;
            records += 1;
        }
    }
}

impl BinaryDecoder for PerfLogDecoder {
    fn decode(
        &self,
        envelope: &Envelope,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
    ) -> Result<DecodeOutcome, DecodeError> {
        match envelope.endianness {
            Endianness::Little => {
                self.run::<byteorder::LittleEndian>(envelope.architecture, reader, writer)
            }
            Endianness::Big => {
                self.run::<byteorder::BigEndian>(envelope.architecture, reader, writer)
            }
        }
    }
}
