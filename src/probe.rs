//! Magic-byte sniffing.

use crate::constants::{J2K_CODESTREAM_MAGIC, JP2_MAGIC, JP2_RFC3745_MAGIC, SNIFF_LENGTH};
use crate::error::Result;
use crate::stream::Source;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// A JP2 family box container.
    Jp2,
    /// A bare J2K codestream.
    Codestream,
}

/// Classify the first bytes of a stream. Fewer than 12 bytes is never a match.
pub fn probe(bytes: &[u8]) -> Option<Format> {
    if bytes.len() < SNIFF_LENGTH {
        return None;
    }
    if bytes[..12] == JP2_RFC3745_MAGIC || bytes[..4] == JP2_MAGIC {
        Some(Format::Jp2)
    } else if bytes[..4] == J2K_CODESTREAM_MAGIC {
        Some(Format::Codestream)
    } else {
        None
    }
}

pub fn probe_source(source: &Source) -> Result<Option<Format>> {
    Ok(probe(&source.sniff(SNIFF_LENGTH)?))
}

/// Any recognised format is claimed; raw codestreams are refused later, at
/// header time, with a clearer message than "unknown format".
pub fn is_a_source(source: &Source) -> bool {
    matches!(probe_source(source), Ok(Some(_)))
}

pub fn is_a_buffer(bytes: &[u8]) -> bool {
    probe(bytes).is_some()
}

pub fn is_a_file(path: impl AsRef<Path>) -> bool {
    match Source::new_from_file(path) {
        Ok(source) => is_a_source(&source),
        Err(_) => false,
    }
}
