//! Archive pipeline: support bundle in, recovered bundle out.
//!
//! # Flow
//! Each input member is classified by name and streamed through the matching
//! handlers: `Decrypt` runs the v2 engine and keeps the member name,
//! `Decode` renders a binary payload as text under `<stem>.txt`, `Copy` is a
//! byte-exact pass-through. A member can carry `Decode | Copy`, producing two
//! output entries with the decoded one first. Output order follows input
//! order.
//!
//! # Failure containment
//! Transformation problems never abort the archive: the member is written
//! unmodified and the incident is logged and counted in the
//! [`PipelineSummary`]. Only failing to open the input or create the output
//! archive is fatal.
//!
//! # Metadata
//! Every output entry preserves the input entry's compression method and
//! modification time; nothing is re-compressed differently from how the
//! producer shipped it.

pub mod classify;

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::binary::{decode_stream, DecodeVerdict, DecoderRegistry};
use crate::decrypt::{decrypt_stream, DecryptOutcome};
pub use classify::{append_to_stem, classify, decoded_name, Actions};

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Cannot open input archive: {0}")]
    OpenInput(#[source] io::Error),
    #[error("Cannot create output archive: {0}")]
    CreateOutput(#[source] io::Error),
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Decode error: {0}")]
    Decode(#[from] crate::binary::DecodeError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Options and summary ──────────────────────────────────────────────────────

/// Knobs for one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct RecoverOptions {
    /// Prefix each decrypted member with the tool banner. Off by default so
    /// decrypted output is byte-identical to the original plaintext.
    pub banner: bool,
}

/// What one pipeline run did, member by member in aggregate.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineSummary {
    pub entries_read: usize,
    pub entries_written: usize,
    pub decrypted: usize,
    pub decoded: usize,
    pub copied: usize,
    /// Bytes replaced with the substitute marker across all decrypted members.
    pub substitutions: usize,
    /// Decode actions that fell back to a byte copy (no envelope, or an
    /// unregistered type tag).
    pub decode_misses: usize,
    /// Members written unmodified after a handler failure.
    pub member_failures: usize,
}

// ── Archive pipeline ─────────────────────────────────────────────────────────

/// Recover `input` into a fresh archive at `output`.
pub fn recover_archive(
    input: &Path,
    output: &Path,
    registry: &DecoderRegistry,
    options: &RecoverOptions,
) -> Result<PipelineSummary, PipelineError> {
    let in_file = File::open(input).map_err(PipelineError::OpenInput)?;
    let mut archive = ZipArchive::new(in_file)?;
    let out_file = File::create(output).map_err(PipelineError::CreateOutput)?;
    let mut writer = ZipWriter::new(out_file);

    let mut summary = PipelineSummary::default();

    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(index, error = %e, "unreadable member, skipping");
                summary.member_failures += 1;
                continue;
            }
        };
        summary.entries_read += 1;

        let name = entry.name().to_owned();
        let entry_options: FileOptions = FileOptions::default()
            .compression_method(entry.compression())
            .last_modified_time(entry.last_modified());

        if entry.is_dir() {
            writer.add_directory(name, entry_options)?;
            summary.entries_written += 1;
            continue;
        }

        // The member's bytes live exactly as long as this iteration.
        let mut data = Vec::with_capacity(entry.size() as usize);
        if let Err(e) = entry.read_to_end(&mut data) {
            warn!(name = %name, error = %e, "member read failed, skipping");
            summary.member_failures += 1;
            continue;
        }
        drop(entry);

        let actions = classify(&name);

        if actions.contains(Actions::DECRYPT) {
            info!("decrypting: {name}");
            let mut recovered = Vec::with_capacity(data.len());
            match decrypt_stream(&mut &data[..], &mut recovered, options.banner) {
                Ok(DecryptOutcome::Decrypted(report)) => {
                    summary.decrypted += 1;
                    summary.substitutions += report.substitutions;
                }
                Ok(DecryptOutcome::PassedThrough(scheme)) => {
                    info!(name = %name, ?scheme, "not v2, passing through");
                }
                Err(e) => {
                    warn!(name = %name, error = %e, "decrypt failed, writing unmodified");
                    summary.member_failures += 1;
                    recovered.clear();
                    recovered.extend_from_slice(&data);
                }
            }
            writer.start_file(name.clone(), entry_options)?;
            writer.write_all(&recovered)?;
            summary.entries_written += 1;
        }

        if actions.contains(Actions::DECODE) {
            let out_name = decoded_name(&name);
            info!("decoding: {name}");
            let mut rendered = Vec::new();
            match decode_stream(registry, &mut &data[..], &mut rendered) {
                Ok(DecodeVerdict::Decoded(_)) => summary.decoded += 1,
                Ok(DecodeVerdict::NotBinary) | Ok(DecodeVerdict::UnknownType(_)) => {
                    summary.decode_misses += 1;
                }
                Err(e) => {
                    warn!(name = %name, error = %e, "decode failed, writing unmodified");
                    summary.member_failures += 1;
                    rendered.clear();
                    rendered.extend_from_slice(&data);
                }
            }
            writer.start_file(out_name, entry_options)?;
            writer.write_all(&rendered)?;
            summary.entries_written += 1;
        }

        if actions.contains(Actions::COPY) {
            info!("copying: {name}");
            writer.start_file(name.clone(), entry_options)?;
            writer.write_all(&data)?;
            summary.copied += 1;
            summary.entries_written += 1;
        }
    }

    writer.finish()?;
    info!(
        read = summary.entries_read,
        written = summary.entries_written,
        substitutions = summary.substitutions,
        "complete"
    );
    Ok(summary)
}

// ── Standalone file entry points ─────────────────────────────────────────────

/// Decrypt one standalone file (the `-f` path). Non-v2 input is copied.
pub fn recover_file(input: &Path, output: &Path, banner: bool) -> Result<DecryptOutcome, PipelineError> {
    let mut reader = File::open(input).map_err(PipelineError::OpenInput)?;
    let mut writer = File::create(output).map_err(PipelineError::CreateOutput)?;
    info!("decrypting: {}", input.display());
    let outcome = decrypt_stream(&mut reader, &mut writer, banner)?;
    writer.flush()?;
    Ok(outcome)
}

/// Decode one standalone envelope-framed dump (the `-d` path).
pub fn decode_data_file(
    input: &Path,
    output: &Path,
    registry: &DecoderRegistry,
) -> Result<DecodeVerdict, PipelineError> {
    let mut reader = File::open(input).map_err(PipelineError::OpenInput)?;
    let mut writer = File::create(output).map_err(PipelineError::CreateOutput)?;
    info!("decoding: {}", input.display());
    let verdict = decode_stream(registry, &mut reader, &mut writer)?;
    writer.flush()?;
    Ok(verdict)
}
