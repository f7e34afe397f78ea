//! Streaming bridge between a tile-pulling image pipeline and a tiled,
//! multi-resolution JPEG 2000 codec.
//!
//! Loading resolves a JP2 container once ([`Jp2Loader`]) and then fulfils
//! arbitrary pixel rectangles on demand, each with its own worker pool.
//! Saving ([`Jp2Saver`], [`save_to_file`]) writes the JP2 header and pushes
//! raster strips into the codec's stripe compressor.
//!
//! The codec itself sits behind the traits in [`codec`].

pub mod codec;
pub mod constants;
pub mod decode;
pub mod descriptor;
pub mod encode;
pub mod error;
pub mod jpeg2000;
pub mod message;
pub mod pixels;
pub mod pool;
pub mod probe;
pub mod stream;

pub use codec::{Codec, Codestream, RegionDecompressor, Resilience, StripeCompressor};
pub use decode::{FailOn, Jp2Loader, LoadOptions};
pub use descriptor::{ChannelMapping, ImageDescriptor, Interpretation, TileCacheHint};
pub use encode::{Jp2Saver, SaveOptions, SubsampleMode, save_to_buffer, save_to_file, save_to_target};
pub use error::{BridgeError, ErrorCategory, Result};
pub use pixels::{BandFormat, PixelBuffer, Rect, Samples, SamplesMut};
pub use pool::{concurrency, set_concurrency};
pub use probe::{is_a_buffer, is_a_file, is_a_source};
pub use stream::{Source, Target};
