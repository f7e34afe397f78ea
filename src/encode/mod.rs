//! Save side: write the JP2 header, then push host strips into the codec's
//! stripe compressor, then finish and end the target.

pub mod header;
pub mod stripe;

use crate::codec::{Codec, StripeCompressor};
use crate::constants::{DEFAULT_Q, DEFAULT_TILE_SIZE};
use crate::descriptor::ImageDescriptor;
use crate::error::{BridgeError, Result};
use crate::jpeg2000::jp2;
use crate::message::guard;
use crate::pixels::{PixelBuffer, Samples};
use crate::pool::{self, WorkerPool};
use crate::stream::{StreamTarget, Target};
use std::path::Path;
use stripe::StripeEngine;
use tracing::debug;

/// Chroma sub-sampling for three-band colour images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubsampleMode {
    #[default]
    Off,
    On,
    /// Only for lossy sRGB at `q` below 90.
    Auto,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaveOptions {
    pub tile_width: u32,
    pub tile_height: u32,
    pub lossless: bool,
    /// Quality factor, 1 to 100, for a single quality-driven layer.
    pub q: u8,
    /// Bits per pixel for each quality layer. Overrides `q`.
    pub rates: Vec<f64>,
    /// Extra codec attributes, e.g. `"Corder=RPCL Clevels=6"`.
    pub options: Option<String>,
    pub high_throughput: bool,
    pub subsample_mode: SubsampleMode,
    pub icc_profile: Option<Vec<u8>>,
    /// Compressor workers; `None` uses [`pool::concurrency`].
    pub concurrency: Option<usize>,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            tile_width: DEFAULT_TILE_SIZE,
            tile_height: DEFAULT_TILE_SIZE,
            lossless: false,
            q: DEFAULT_Q,
            rates: Vec::new(),
            options: None,
            high_throughput: false,
            subsample_mode: SubsampleMode::Off,
            icc_profile: None,
            concurrency: None,
        }
    }
}

/// An open save session. Strips go in with [`push_strip`](Self::push_strip)
/// strictly top to bottom; [`finish`](Self::finish) completes the file.
pub struct Jp2Saver<P> {
    engine: StripeEngine<P>,
    target: Target,
    strip_height: u32,
}

impl<P: StripeCompressor> Jp2Saver<P> {
    /// Write the container header to `target` and start the compressor.
    pub fn new<C>(
        codec: &C,
        descriptor: &ImageDescriptor,
        target: &Target,
        options: &SaveOptions,
    ) -> Result<Self>
    where
        C: Codec<Compressor = P>,
    {
        let plan = header::plan(descriptor, options, target.filename())?;
        Self::start(codec, plan, target, options)
    }

    fn start<C>(
        codec: &C,
        plan: header::EncodePlan,
        target: &Target,
        options: &SaveOptions,
    ) -> Result<Self>
    where
        C: Codec<Compressor = P>,
    {
        let pool = WorkerPool::attach(options.concurrency.unwrap_or_else(pool::concurrency))?;

        target.write(&jp2::write_header(&plan.layout))?;
        let compressor = guard("create compressor", || {
            codec.create_compressor(&plan.params, StreamTarget::new(target))
        })?;
        let engine = StripeEngine::start(compressor, &plan.layer_sizes, pool, plan.geometry)?;

        Ok(Self {
            engine,
            target: target.clone(),
            strip_height: options.tile_height,
        })
    }

    /// Push rows starting at `top`; `samples` holds whole rows.
    pub fn push_strip(&mut self, top: u32, samples: Samples<'_>) -> Result<()> {
        self.engine.push(top, samples)
    }

    pub fn rows_written(&self) -> u32 {
        self.engine.rows_written()
    }

    /// Finish the codestream, close the adapter and end the target.
    pub fn finish(self) -> Result<()> {
        let mut stream = self.engine.finish()?;
        stream.close()?;
        self.target.end()?;
        debug!(bytes = self.target.bytes_written(), "save finished");
        Ok(())
    }
}

/// Save a whole image held in memory.
pub fn save_to_target<C: Codec>(
    codec: &C,
    descriptor: &ImageDescriptor,
    pixels: &PixelBuffer,
    target: &Target,
    options: &SaveOptions,
) -> Result<()> {
    let plan = header::plan(descriptor, options, target.filename())?;
    if pixels.format() != descriptor.format || pixels.len() != descriptor.sample_count() {
        return Err(BridgeError::invalid_argument(format!(
            "pixel buffer is {} samples of {}, image needs {} of {}",
            pixels.len(),
            pixels.format().name(),
            descriptor.sample_count(),
            descriptor.format.name()
        )));
    }
    let mut saver = Jp2Saver::start(codec, plan, target, options)?;

    let row = descriptor.width as usize * descriptor.bands;
    let samples = pixels.as_samples();
    let mut top = 0u32;
    while top < descriptor.height {
        let rows = saver.strip_height.min(descriptor.height - top);
        let start = top as usize * row;
        let end = start + rows as usize * row;
        saver.push_strip(top, samples.slice(start, end))?;
        top += rows;
    }
    saver.finish()
}

/// Save to `path`. A `.jph` name turns on high-throughput coding.
pub fn save_to_file<C: Codec>(
    codec: &C,
    descriptor: &ImageDescriptor,
    pixels: &PixelBuffer,
    path: impl AsRef<Path>,
    options: &SaveOptions,
) -> Result<()> {
    let target = Target::new_to_file(path)?;
    save_to_target(codec, descriptor, pixels, &target, options)
}

/// Save to a new in-memory JP2 file.
pub fn save_to_buffer<C: Codec>(
    codec: &C,
    descriptor: &ImageDescriptor,
    pixels: &PixelBuffer,
    options: &SaveOptions,
) -> Result<Vec<u8>> {
    let target = Target::new_to_memory();
    save_to_target(codec, descriptor, pixels, &target, options)?;
    target
        .steal_blob()
        .ok_or_else(|| BridgeError::encode_failed("memory target produced no data"))
}
