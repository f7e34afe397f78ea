//! The seam between the bridge and a JPEG 2000 codec.
//!
//! The bridge owns containers, pages, channel mapping, threading and rate
//! budgets. A codec owns entropy coding, wavelets and rate allocation and
//! is driven through these traits:
//!
//! - decode: [`Codec::open_codestream`] once per load, then for every tile
//!   request a [`RegionDecompressor`] run through `start`, `process`
//!   (repeated) and `finish` on one thread.
//! - encode: [`Codec::create_compressor`] once per save, then
//!   [`StripeCompressor::start`], one `push_stripe` per host strip and
//!   `finish`.
//!
//! Codecs report faults by writing to [`crate::message::messages`] and
//! returning the error that `flush(true)` produces.

use crate::descriptor::ChannelMapping;
use crate::error::Result;
use crate::jpeg2000::params::CodingParams;
use crate::jpeg2000::parser::CodestreamHeader;
use crate::pixels::{BufferLayout, Rect, Samples, SamplesMut};
use crate::pool::WorkerPool;
use crate::stream::{CodestreamSource, StreamTarget};

/// How hard the decoder checks the codestream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resilience {
    /// Conceal errors and keep decoding.
    Resilient,
    /// Stop at any non-conformance.
    Fussy,
    /// Skip some checks for speed.
    Fast,
}

/// Restrictions applied to an open codestream before any region request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputRestrictions {
    pub first_component: usize,
    /// 0 for all components.
    pub max_components: usize,
    pub discard_levels: u32,
    /// 0 for all layers.
    pub max_layers: u16,
    /// `None` for the whole image.
    pub region: Option<Rect>,
}

impl InputRestrictions {
    /// Everything, reduced by `discard_levels` resolution levels.
    pub fn discard(discard_levels: u32) -> Self {
        Self {
            first_component: 0,
            max_components: 0,
            discard_levels,
            max_layers: 0,
            region: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Bands come out as the channel mapping describes them.
    OutputComponents,
    /// Bands are raw codestream components.
    CodestreamComponents,
}

/// Arguments for [`RegionDecompressor::start`].
#[derive(Debug, Clone)]
pub struct RegionParams<'a> {
    pub mapping: &'a ChannelMapping,
    pub single_component: Option<usize>,
    pub discard_levels: u32,
    /// `u16::MAX` decodes every available layer.
    pub max_layers: u16,
    pub region: Rect,
    pub expand_numerator: (u32, u32),
    pub expand_denominator: (u32, u32),
    pub precise: bool,
    pub access_mode: AccessMode,
    pub fastest: bool,
}

/// One strip of rows for [`StripeCompressor::push_stripe`].
///
/// Samples are band interleaved and tightly packed; there are no custom
/// offsets or gaps.
#[derive(Debug, Clone, Copy)]
pub struct Stripe<'a> {
    pub samples: Samples<'a>,
    /// Rows per band, all equal.
    pub heights: &'a [usize],
    pub precisions: &'a [u8],
    /// Present only for formats wider than a byte.
    pub signed: Option<&'a [bool]>,
}

pub trait Codec: Send + Sync {
    type Codestream: Codestream;
    type Compressor: StripeCompressor;

    fn open_codestream(&self, source: CodestreamSource) -> Result<Self::Codestream>;

    /// A compressor that writes the codestream after whatever `target`
    /// already holds.
    fn create_compressor(
        &self,
        params: &CodingParams,
        target: StreamTarget,
    ) -> Result<Self::Compressor>;
}

/// An open codestream. Random access to its tiles is only defined once it is
/// persistent.
pub trait Codestream: Send {
    type Region<'a>: RegionDecompressor
    where
        Self: 'a;

    fn set_persistent(&mut self);
    fn is_persistent(&self) -> bool;
    fn set_resilience(&mut self, resilience: Resilience);
    fn apply_input_restrictions(&mut self, restrictions: InputRestrictions) -> Result<()>;
    fn siz(&self) -> &CodestreamHeader;
    fn region_decompressor(&mut self) -> Self::Region<'_>;
}

/// Pull decoder for one rectangle. `start`, every `process` and `finish`
/// must run on the same thread.
pub trait RegionDecompressor {
    /// `Ok(false)` means the region cannot be decoded.
    fn start(&mut self, params: &RegionParams<'_>, pool: &WorkerPool) -> Result<bool>;

    /// Decode some rows into `out`, which starts at the first row still
    /// missing. Returns the part of the region left to decode.
    fn process(
        &mut self,
        out: SamplesMut<'_>,
        layout: &BufferLayout,
        max_pixels: u64,
        pool: &WorkerPool,
    ) -> Result<Rect>;

    /// `Ok(false)` means decoding did not complete.
    fn finish(&mut self) -> Result<bool>;
}

/// Push encoder that retiles incoming strips itself.
pub trait StripeCompressor: Send {
    /// `layer_sizes` are byte budgets per quality layer, empty for one
    /// quality-driven layer.
    fn start(&mut self, layer_sizes: &[u64], pool: &WorkerPool) -> Result<()>;

    /// Returns `false` once the compressor has every row it needs.
    fn push_stripe(&mut self, stripe: &Stripe<'_>, pool: &WorkerPool) -> Result<bool>;

    /// Flush the codestream and hand back the target.
    fn finish(self, pool: &WorkerPool) -> Result<StreamTarget>
    where
        Self: Sized;
}
