//! Zone-table decoder.
//!
//! The table is a stream of fixed 456-byte entries describing storage zones:
//! redundancy class, per-region disk map, state flags and write statistics.
//! Only entries whose in-use bit is set are printed.
//!
//! The flags word is a bitset indexed from bit 0. On big-endian producers
//! the wire word places bit 0 at the MSB, so after the byte swap the word is
//! additionally bit-reversed across all 32 bits; byteswapping alone would
//! scramble the flag indices.

use std::io::{Read, Write};

use byteorder::ByteOrder;

use super::{
    read_frame, BinaryDecoder, BinaryType, DecodeError, DecodeOutcome, DecoderRegistry,
    Endianness, Envelope,
};

/// Region slots allocated per zone at the default (non-redundant) layout.
const REGIONS_PER_ZONE_DEFAULT: u32 = 24;
/// Widest layout: three-way mirrored.
const MAX_REGIONS_PER_ZONE: usize = (REGIONS_PER_ZONE_DEFAULT * 3) as usize;

/// Region pairs printed per output line.
const PAIRS_PER_LINE: u32 = 12;

/// Entry frame: ids, disk map, region map, flags and counters.
const ENTRY_LEN: usize = 4 + 4 + MAX_REGIONS_PER_ZONE * 2 + MAX_REGIONS_PER_ZONE * 4 + 4 + 4 + 4 + 4;

// ── Redundancy classes ───────────────────────────────────────────────────────

/// Zone redundancy class. Wire values are the enum discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Redundancy {
    None = 0,
    SelfMirrored,
    Mirrored,
    VStripe3,
    VStripe4,
    VStripe5,
    VStripe7,
    HStripe3,
    HStripe4,
    HStripe5,
    HStripe7,
    HStripe9,
    Mirrored3,
    DRStripe4,
    DRStripe5,
    DRStripe6,
    DRStripe8,
    DRStripe10,
    MStripe4,
    MStripe6,
    MStripe8,
    MStripe12,
    M3Stripe6,
    M3Stripe9,
    M3Stripe12,
    PQStripe4,
    PQStripe5,
    PQStripe6,
    PQStripe8,
    PQStripe10,
}

impl Redundancy {
    pub fn from_wire(v: u32) -> Option<Self> {
        use Redundancy::*;
        Some(match v {
            0 => None,
            1 => SelfMirrored,
            2 => Mirrored,
            3 => VStripe3,
            4 => VStripe4,
            5 => VStripe5,
            6 => VStripe7,
            7 => HStripe3,
            8 => HStripe4,
            9 => HStripe5,
            10 => HStripe7,
            11 => HStripe9,
            12 => Mirrored3,
            13 => DRStripe4,
            14 => DRStripe5,
            15 => DRStripe6,
            16 => DRStripe8,
            17 => DRStripe10,
            18 => MStripe4,
            19 => MStripe6,
            20 => MStripe8,
            21 => MStripe12,
            22 => M3Stripe6,
            23 => M3Stripe9,
            24 => M3Stripe12,
            25 => PQStripe4,
            26 => PQStripe5,
            27 => PQStripe6,
            28 => PQStripe8,
            29 => PQStripe10,
            _ => return Option::None,
        })
    }

    /// Display name. The dual-redundancy stripes print without the R, which
    /// is what the on-device diagnostics have always shown.
    pub fn name(self) -> &'static str {
        use Redundancy::*;
        match self {
            None => "None",
            SelfMirrored => "SelfMirrored",
            Mirrored => "Mirrored",
            VStripe3 => "VStripe3",
            VStripe4 => "VStripe4",
            VStripe5 => "VStripe5",
            VStripe7 => "VStripe7",
            HStripe3 => "HStripe3",
            HStripe4 => "HStripe4",
            HStripe5 => "HStripe5",
            HStripe7 => "HStripe7",
            HStripe9 => "HStripe9",
            Mirrored3 => "Mirrored3",
            DRStripe4 => "DStripe4",
            DRStripe5 => "DStripe5",
            DRStripe6 => "DStripe6",
            DRStripe8 => "DStripe8",
            DRStripe10 => "DStripe10",
            MStripe4 => "MStripe4",
            MStripe6 => "MStripe6",
            MStripe8 => "MStripe8",
            MStripe12 => "MStripe12",
            M3Stripe6 => "M3Stripe6",
            M3Stripe9 => "M3Stripe9",
            M3Stripe12 => "M3Stripe12",
            PQStripe4 => "PQStripe4",
            PQStripe5 => "PQStripe5",
            PQStripe6 => "PQStripe6",
            PQStripe8 => "PQStripe8",
            PQStripe10 => "PQStripe10",
        }
    }

    /// Stripe width (data + redundancy members).
    fn width(self) -> u32 {
        use Redundancy::*;
        match self {
            None => 1,
            SelfMirrored | Mirrored | MStripe4 | MStripe6 | MStripe8 | MStripe12 => 2,
            VStripe3 | VStripe4 | VStripe5 | VStripe7 => 0,
            HStripe3 => 3,
            HStripe4 => 4,
            HStripe5 => 5,
            HStripe7 => 7,
            HStripe9 => 9,
            Mirrored3 | M3Stripe6 | M3Stripe9 | M3Stripe12 => 3,
            DRStripe4 | PQStripe4 => 4,
            DRStripe5 | PQStripe5 => 5,
            DRStripe6 | PQStripe6 => 6,
            DRStripe8 | PQStripe8 => 8,
            DRStripe10 | PQStripe10 => 10,
        }
    }

    /// Region slots a zone of this class occupies.
    pub fn region_count(self) -> u32 {
        use Redundancy::*;
        match self {
            SelfMirrored | Mirrored | MStripe4 | MStripe6 | MStripe8 | MStripe12 => {
                2 * REGIONS_PER_ZONE_DEFAULT
            }
            Mirrored3 | M3Stripe6 | M3Stripe9 | M3Stripe12 => 3 * REGIONS_PER_ZONE_DEFAULT,
            HStripe3 | HStripe4 | HStripe5 | HStripe7 | HStripe9 => {
                REGIONS_PER_ZONE_DEFAULT / (self.width() - 1) * self.width()
            }
            DRStripe4 | DRStripe5 | DRStripe6 | DRStripe8 | DRStripe10 | PQStripe4
            | PQStripe5 | PQStripe6 | PQStripe8 | PQStripe10 => {
                REGIONS_PER_ZONE_DEFAULT / (self.width() - 2) * self.width()
            }
            _ => REGIONS_PER_ZONE_DEFAULT,
        }
    }
}

// ── Flags ────────────────────────────────────────────────────────────────────

/// Zone state bitset. Bit indices are fixed; `sense` says whether the name is
/// shown when the bit is set (`true`) or clear (`false`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneFlags(pub u32);

const FLAG_IN_USE: u32 = 2;

/// `(name, sense)` per bit index, in display order. The last bit is unused
/// and never displayed.
const FLAG_TABLE: [(&str, bool); 8] = [
    ("MirrorOnly", true),
    ("Metadata", true),
    ("NotInUse", false),
    ("PreInitialized", true),
    ("InitializationIncomplete", false),
    ("Initializing", true),
    ("Transactional", true),
    ("RelayoutNeeded", true),
];

impl ZoneFlags {
    pub fn in_use(self) -> bool {
        self.0 & (1 << FLAG_IN_USE) != 0
    }

    /// Reverse the bit order across the whole word. Big-endian producers
    /// index the bitset from the MSB, so the byte swap alone is insufficient.
    pub fn bit_flip(self) -> Self {
        ZoneFlags(self.0.reverse_bits())
    }

    /// Names of the display-worthy bits, per [`FLAG_TABLE`].
    fn names(self) -> impl Iterator<Item = &'static str> {
        FLAG_TABLE
            .iter()
            .enumerate()
            .filter(move |(bit, (_, sense))| (self.0 & (1 << bit) != 0) == *sense)
            .map(|(_, (name, _))| *name)
    }
}

// ── Entry ────────────────────────────────────────────────────────────────────

struct ZoneTableEntry {
    zone_num: u32,
    redundancy: u32,
    logical_disks: [u16; MAX_REGIONS_PER_ZONE],
    regions: [u32; MAX_REGIONS_PER_ZONE],
    flags: ZoneFlags,
    write_timestamp: u32,
    io_count: u32,
    block_size: u32,
}

impl ZoneTableEntry {
    fn parse<B: ByteOrder>(frame: &[u8; ENTRY_LEN]) -> Self {
        let zone_num = B::read_u32(&frame[0..4]);
        let redundancy = B::read_u32(&frame[4..8]);

        let mut logical_disks = [0u16; MAX_REGIONS_PER_ZONE];
        let disks_base = 8;
        for (i, disk) in logical_disks.iter_mut().enumerate() {
            *disk = B::read_u16(&frame[disks_base + i * 2..disks_base + i * 2 + 2]);
        }

        let mut regions = [0u32; MAX_REGIONS_PER_ZONE];
        let regions_base = disks_base + MAX_REGIONS_PER_ZONE * 2;
        for (i, region) in regions.iter_mut().enumerate() {
            *region = B::read_u32(&frame[regions_base + i * 4..regions_base + i * 4 + 4]);
        }

        let tail = regions_base + MAX_REGIONS_PER_ZONE * 4;
        Self {
            zone_num,
            redundancy,
            logical_disks,
            regions,
            flags: ZoneFlags(B::read_u32(&frame[tail..tail + 4])),
            write_timestamp: B::read_u32(&frame[tail + 4..tail + 8]),
            io_count: B::read_u32(&frame[tail + 8..tail + 12]),
            block_size: B::read_u32(&frame[tail + 12..tail + 16]),
        }
    }

    fn has_regions(&self) -> bool {
        self.logical_disks[0] != 0
            || self.regions[0] != 0
            || self.logical_disks[1] != 0
            || self.regions[1] != 0
    }
}

// ── Decoder ──────────────────────────────────────────────────────────────────

pub struct ZoneTableDecoder;

pub(crate) fn register(registry: &mut DecoderRegistry) {
    registry.register(BinaryType::ZoneTable, Box::new(ZoneTableDecoder));
}

impl ZoneTableDecoder {
    fn dump_entry(&self, entry: &ZoneTableEntry, writer: &mut dyn Write) -> Result<(), DecodeError> {
        if !entry.flags.in_use() {
            return Ok(());
        }

        let redundancy = Redundancy::from_wire(entry.redundancy);
        let name = redundancy.map_or("Unknown", Redundancy::name);
        let region_count = redundancy.map_or(REGIONS_PER_ZONE_DEFAULT, Redundancy::region_count);

        write!(
            writer,
            "TableEntry: Zone= {} Redundancy:{} flags=0x{:x}",
            entry.zone_num, name, entry.flags.0
        )?;
        for flag_name in entry.flags.names() {
            write!(writer, " {flag_name}")?;
        }

        write!(
            writer,
            "\n  LastWrittenTimestamp = {} Small IOCount = {} block size = {}",
            entry.write_timestamp, entry.io_count, entry.block_size
        )?;

        if entry.has_regions() {
            for region in 0..region_count {
                if region % PAIRS_PER_LINE == 0 {
                    write!(writer, "\n     ")?;
                }
                let i = region as usize;
                write!(writer, "{}:{} ", entry.logical_disks[i], entry.regions[i])?;
            }
        } else {
            write!(writer, "\n     Has no Regions allocated")?;
        }
        write!(writer, "\n\n")?;
        Ok(())
    }

    fn run<B: ByteOrder>(
        &self,
        endianness: Endianness,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
    ) -> Result<DecodeOutcome, DecodeError> {
        let mut records = 0usize;
        loop {
            let mut frame = [0u8; ENTRY_LEN];
            match read_frame(reader, &mut frame) {
                Ok(true) => {}
                Ok(false) => return Ok(DecodeOutcome::Complete { records }),
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(DecodeOutcome::Truncated { records });
                }
                Err(e) => return Err(e.into()),
            }

            let mut entry = ZoneTableEntry::parse::<B>(&frame);
            if endianness == Endianness::Big {
                entry.flags = entry.flags.bit_flip();
            }
            self.dump_entry(&entry, writer)?;
            records += 1;
        }
    }
}

impl BinaryDecoder for ZoneTableDecoder {
    fn decode(
        &self,
        envelope: &Envelope,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
    ) -> Result<DecodeOutcome, DecodeError> {
        match envelope.endianness {
            Endianness::Little => {
                self.run::<byteorder::LittleEndian>(envelope.endianness, reader, writer)
            }
            Endianness::Big => self.run::<byteorder::BigEndian>(envelope.endianness, reader, writer),
        }
    }
}
