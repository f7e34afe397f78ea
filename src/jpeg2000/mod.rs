//! JPEG 2000 file structure: JP2 boxes, codestream main headers and
//! codestream creation parameters.
//!
//! - `jp2`: box reader (header discovery) and box writer (save header).
//! - `parser` / `writer`: main-header marker segments (SOC, SIZ, CAP, COD).
//! - `params`: creation parameters and the `Name=value` option parser.
//! - `reader` / `marker_code`: byte-level helpers shared by the above.
//!
//! Entropy coding, wavelets and rate allocation belong to the codec behind
//! [`crate::codec::Codec`] and are not here.

pub mod jp2;
pub mod marker_code;
pub mod params;
pub mod parser;
pub mod reader;
pub mod writer;
