use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;

use drdiags::anchor;
use drdiags::binary::DecoderRegistry;
use drdiags::pipeline::{self, append_to_stem, RecoverOptions};

#[derive(Parser)]
#[command(name = "drdiags")]
#[command(version, about = "Recover readable content from device support bundles", long_about = None)]
struct Cli {
    /// An encrypted diag file. This is an individual file, not a zip file
    #[arg(short = 'f', long = "filename")]
    filename: Option<PathBuf>,

    /// An encrypted zip bundle
    #[arg(short = 'z', long = "zip-filename")]
    zip_filename: Option<PathBuf>,

    /// An envelope-framed binary data file
    #[arg(short = 'd', long = "data-filename")]
    data_filename: Option<PathBuf>,

    /// Prefix decrypted output with the tool banner
    #[arg(long)]
    banner: bool,

    /// Also write a section anchor index next to decrypted file output
    #[arg(long)]
    index: bool,

    /// Input routed by extension: .zip as a bundle, .dat as a data file,
    /// anything else as an encrypted file
    input: Option<PathBuf>,
}

fn derived_name(path: &Path, suffix: &str) -> PathBuf {
    PathBuf::from(append_to_stem(&path.to_string_lossy(), suffix))
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut cli = Cli::parse();
    if cli.filename.is_none() && cli.zip_filename.is_none() && cli.data_filename.is_none() {
        if let Some(input) = cli.input.take() {
            match input.extension().and_then(|e| e.to_str()) {
                Some("zip") => cli.zip_filename = Some(input),
                Some("dat") => cli.data_filename = Some(input),
                _ => cli.filename = Some(input),
            }
        }
    }

    let registry = DecoderRegistry::with_builtin_decoders();

    if let Some(zip_filename) = &cli.zip_filename {
        let output = derived_name(zip_filename, "_d");
        println!("Decrypting {} to {}", zip_filename.display(), output.display());
        let options = RecoverOptions { banner: cli.banner };
        let summary = pipeline::recover_archive(zip_filename, &output, &registry, &options)?;
        println!(
            "Recovered {} members into {} entries ({} decrypted, {} decoded, {} substitutions)",
            summary.entries_read,
            summary.entries_written,
            summary.decrypted,
            summary.decoded,
            summary.substitutions,
        );
    } else if let Some(data_filename) = &cli.data_filename {
        let output = derived_name(data_filename, "_txt");
        println!("Decoding {} to {}", data_filename.display(), output.display());
        pipeline::decode_data_file(data_filename, &output, &registry)?;
    } else if let Some(filename) = &cli.filename {
        let output = derived_name(filename, "_d");
        println!("Decrypting {} to {}", filename.display(), output.display());
        pipeline::recover_file(filename, &output, cli.banner)?;

        if cli.index {
            let text = String::from_utf8_lossy(&fs::read(&output)?).into_owned();
            let member = filename
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let index = anchor::index_text(&member, &text);
            let index_path = PathBuf::from(format!("{}.index.json", output.display()));
            fs::write(&index_path, index.to_bytes()?)?;
            println!("Indexed {} anchors to {}", index.anchors.len(), index_path.display());
        }
    } else {
        eprintln!("Nothing to do: pass -f FILE, -z ZIP or -d DATAFILE");
    }

    Ok(())
}
