//! Recovery of v2-obfuscated text payloads.
//!
//! A v2 payload is announced by an ASCII magic line; everything after the
//! newline is cipher text. Each byte was rotated and XORed against a pair of
//! keystream octets, so the inverse is `rotate_left(cipher, rot) ^ xor`.
//! Plaintext is 7-bit: any decrypted byte with the high bit set means the
//! stream lost sync (historically: producer-side buffer corruption), and the
//! decryptor tries to walk the keystream forward until a window of output
//! looks clean again.
//!
//! Decryption is total. Unrecoverable positions are overwritten with the
//! substitute marker `0x18` and counted; the caller gets a [`DecryptReport`]
//! instead of an error.

use std::io::{self, Read, Write};

use tracing::{debug, info, warn};

use crate::keystream::{rotate_left_8, Keystream};

// ── Scheme markers ───────────────────────────────────────────────────────────

/// Prefix written in front of output when a banner is requested.
pub const DECRYPTED_MARKER: &str = "Diags decrypted using DecryptDiags";
/// Marker for files the producer never obfuscated.
pub const UNENCRYPTED_MARKER: &str = "DataRobotics Unencrypted Data File Format";
/// Legacy scheme marker. Recognized but not recoverable by this tool.
pub const V1_MARKER: &str = "DataRobotics Encrypted Data File Format: v1";
/// The one scheme this engine recovers.
pub const V2_MARKER: &str = "DataRobotics Encrypted Data File Format: v2";

/// Substitute marker (ASCII CAN) written over unrecoverable positions.
pub const ERROR_INDICATOR: u8 = 0x18;

// ── Resync knobs ─────────────────────────────────────────────────────────────
//
// Bug-compatibility constants, not performance tuning. Real corruptions have
// been observed to need 32726 skips to resync (close to the producer's 32 KiB
// upload buffer), so the step limit is ten of those.

/// Maximum keystream skips attempted for one corrupted position.
pub const MAX_RESYNC_STEPS: usize = 32_726 * 10;
/// Distinct failed recoveries tolerated before resync is disabled.
pub const MAX_RESYNC_FAILURES: usize = 20;
/// Bytes test-decrypted per candidate seed; one bad byte rejects the window.
pub const RESYNC_PROBE_LEN: usize = 32;

// ── Header probe ─────────────────────────────────────────────────────────────

/// Obfuscation scheme detected at the start of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherScheme {
    /// No marker, or a marker this tool treats as plain text.
    Plaintext,
    /// Output of a previous run of this tool.
    Decrypted,
    /// Explicitly unencrypted producer output.
    Unencrypted,
    /// Legacy scheme; recognized symbolically, passed through unchanged.
    V1,
    /// The recoverable scheme.
    V2,
}

impl CipherScheme {
    /// True only for payloads this engine will transform.
    pub fn needs_decrypt(self) -> bool {
        matches!(self, CipherScheme::V2)
    }
}

/// Probe result: where the cipher text starts and what scheme was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    pub offset: usize,
    pub scheme: CipherScheme,
}

/// Examine the head of a payload for a scheme marker.
///
/// Only the v2 marker yields a non-zero payload offset (the marker plus its
/// trailing newline). Every other scheme, including the legacy ones, is
/// reported with offset 0 and handled as plain text by callers.
pub fn probe_header(bs: &[u8]) -> Probe {
    let has = |marker: &str| bs.len() >= marker.len() && bs[..marker.len()] == *marker.as_bytes();

    if has(V2_MARKER) {
        // +1 for the newline terminating the marker line.
        return Probe { offset: V2_MARKER.len() + 1, scheme: CipherScheme::V2 };
    }
    if has(V1_MARKER) {
        return Probe { offset: 0, scheme: CipherScheme::V1 };
    }
    if has(UNENCRYPTED_MARKER) {
        return Probe { offset: 0, scheme: CipherScheme::Unencrypted };
    }
    if has(DECRYPTED_MARKER) {
        return Probe { offset: 0, scheme: CipherScheme::Decrypted };
    }
    Probe { offset: 0, scheme: CipherScheme::Plaintext }
}

// ── Decryptor ────────────────────────────────────────────────────────────────

/// Outcome of one in-place decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptReport {
    /// First transformed byte index.
    pub offset: usize,
    /// One past the last transformed byte index.
    pub end: usize,
    /// Positions overwritten with [`ERROR_INDICATOR`], including the first
    /// byte of every successful resync.
    pub substitutions: usize,
    /// Resync walks that exhausted [`MAX_RESYNC_STEPS`].
    pub failures: usize,
}

/// Decrypt `buf[offset..]` in place.
///
/// Every output byte is either 7-bit clean or [`ERROR_INDICATOR`]. A high-bit
/// result triggers the resync walk: starting from the committed keystream
/// state, skip whole bytes one at a time and test-decrypt a probe window
/// until the window comes out clean, then adopt the skipped-forward state.
/// After [`MAX_RESYNC_FAILURES`] exhausted walks, recovery is switched off
/// and remaining high-bit output degrades to silent substitution.
pub fn decrypt_v2(buf: &mut [u8], offset: usize) -> DecryptReport {
    let end = buf.len();
    let mut ks = Keystream::new();
    let mut substitutions = 0usize;
    let mut failures = 0usize;
    let mut recovery = true;

    let mut cursor = offset;
    while cursor < end {
        let (xor_val, rot_val) = ks.next_pair();
        let plain = rotate_left_8(buf[cursor], rot_val) ^ xor_val;

        if plain & 0x80 == 0 {
            buf[cursor] = plain;
            cursor += 1;
            continue;
        }
        if !recovery {
            buf[cursor] = ERROR_INDICATOR;
            substitutions += 1;
            cursor += 1;
            continue;
        }

        // Resync walk. `old` is the committed state to fall back to; `test`
        // is advanced one whole byte (two draws) per step.
        let old = ks.state();
        let mut test = old;
        let mut skipped = 0usize;
        let mut synced = false;

        while recovery && !synced && cursor < end {
            let mut stepper = Keystream::from_state(test);
            stepper.skip_byte();
            test = stepper.state();
            skipped += 1;

            let mut probe = Keystream::from_state(test);
            let mut first = ERROR_INDICATOR;
            let mut clean = true;
            for k in 0..RESYNC_PROBE_LEN {
                if cursor + k >= end {
                    break;
                }
                let (px, pr) = probe.next_pair();
                let d = rotate_left_8(buf[cursor + k], pr) ^ px;
                if k == 0 {
                    first = d;
                }
                if d & 0x80 != 0 {
                    clean = false;
                    break;
                }
            }

            if clean {
                debug!(skipped, offset = cursor, "resynced keystream");
                // The window is clean but the first byte may itself be the
                // corrupted one.
                buf[cursor] = if first & 0x80 != 0 { ERROR_INDICATOR } else { first };
                let mut committed = Keystream::from_state(test);
                committed.skip_byte();
                ks = committed;
                substitutions += 1;
                synced = true;
            } else if skipped > MAX_RESYNC_STEPS {
                warn!(
                    offset = cursor,
                    steps = MAX_RESYNC_STEPS,
                    "failed to resync, keeping prior keystream state"
                );
                failures += 1;
                ks = Keystream::from_state(old);
                if failures == MAX_RESYNC_FAILURES {
                    warn!(failures, "disabling corruption recovery");
                    recovery = false;
                }
                break;
            }
        }

        if !synced {
            buf[cursor] = ERROR_INDICATOR;
            substitutions += 1;
        }
        cursor += 1;
    }

    DecryptReport { offset, end, substitutions, failures }
}

// ── Stream entry point ───────────────────────────────────────────────────────

/// What [`decrypt_stream`] did with the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptOutcome {
    /// Payload was v2; carries the decryption report.
    Decrypted(DecryptReport),
    /// Payload was not v2 and was copied through unchanged.
    PassedThrough(CipherScheme),
}

/// Read a whole payload, recover it if it is v2, and write the result.
///
/// Non-v2 payloads (plain text, legacy markers, previously decrypted output)
/// are written unchanged and without a banner. For v2 payloads the magic
/// line is dropped; when `banner` is set the output is prefixed with
/// [`DECRYPTED_MARKER`] and this build's version.
pub fn decrypt_stream<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    banner: bool,
) -> io::Result<DecryptOutcome> {
    let mut bs = Vec::new();
    reader.read_to_end(&mut bs)?;

    let probe = probe_header(&bs);
    if !probe.scheme.needs_decrypt() {
        writer.write_all(&bs)?;
        return Ok(DecryptOutcome::PassedThrough(probe.scheme));
    }

    let report = decrypt_v2(&mut bs, probe.offset);
    info!(
        offset = report.offset,
        end = report.end,
        substitutions = report.substitutions,
        "decrypted payload"
    );

    if banner {
        writeln!(writer, "{} {}", DECRYPTED_MARKER, env!("CARGO_PKG_VERSION"))?;
    }
    writer.write_all(&bs[report.offset..report.end])?;
    Ok(DecryptOutcome::Decrypted(report))
}
