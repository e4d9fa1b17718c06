pub mod anchor;
pub mod binary;
pub mod decrypt;
pub mod keystream;
pub mod pipeline;

pub use binary::{BinaryType, DecodeOutcome, DecoderRegistry, Envelope};
pub use decrypt::{decrypt_v2, probe_header, CipherScheme, DecryptReport};
pub use keystream::Keystream;
pub use pipeline::{recover_archive, Actions, PipelineSummary, RecoverOptions};
