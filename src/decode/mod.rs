//! Load side: resolve a JP2 container once, then fulfil pixel rectangles on
//! demand from any thread.
//!
//! ```text
//!   Source ──► header::resolve ──► Jp2Loader { descriptor, mapping, codestream }
//!                                        │
//!        fill_region(rect) ──► region::decode_region (fresh pool per call)
//! ```

pub mod header;
pub mod region;

use crate::codec::{Codec, Codestream, Resilience};
use crate::descriptor::{ChannelMapping, ImageDescriptor, MetadataValue, TileCacheHint};
use crate::error::{BridgeError, ErrorCategory, Result};
use crate::jpeg2000::jp2::Jp2Header;
use crate::pixels::{PixelBuffer, Rect, SamplesMut};
use crate::pool;
use crate::probe::{self, Format};
use crate::stream::Source;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// The host's failure level, mapped onto codec resilience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailOn {
    /// Never fail; conceal damage.
    None,
    Truncated,
    #[default]
    Error,
    /// Fail on anything suspicious.
    Warning,
}

impl FailOn {
    pub fn resilience(self) -> Resilience {
        match self {
            Self::None => Resilience::Resilient,
            Self::Warning => Resilience::Fussy,
            Self::Truncated | Self::Error => Resilience::Fast,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadOptions {
    /// Pyramid level, 0 for full resolution.
    pub page: u32,
    pub fail_on: FailOn,
    /// Workers per tile request; `None` uses [`pool::concurrency`].
    pub concurrency: Option<usize>,
}

impl LoadOptions {
    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn fail_on(mut self, fail_on: FailOn) -> Self {
        self.fail_on = fail_on;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }
}

/// A resolved JP2 load session.
///
/// Everything except the codestream is immutable once built. Region
/// requests serialise on the codestream; each one attaches and releases its
/// own worker pool.
pub struct Jp2Loader<S> {
    descriptor: ImageDescriptor,
    mapping: ChannelMapping,
    header: Jp2Header,
    cache_hint: TileCacheHint,
    concurrency: usize,
    session: Mutex<S>,
    failed: AtomicBool,
}

impl<S: Codestream> Jp2Loader<S> {
    pub fn from_file<C>(codec: &C, path: impl AsRef<Path>, options: LoadOptions) -> Result<Self>
    where
        C: Codec<Codestream = S>,
    {
        Self::from_source(codec, &Source::new_from_file(path)?, options)
    }

    pub fn from_buffer<C>(codec: &C, bytes: impl Into<Arc<[u8]>>, options: LoadOptions) -> Result<Self>
    where
        C: Codec<Codestream = S>,
    {
        Self::from_source(codec, &Source::new_from_memory(bytes), options)
    }

    pub fn from_source<C>(codec: &C, source: &Source, options: LoadOptions) -> Result<Self>
    where
        C: Codec<Codestream = S>,
    {
        match probe::probe_source(source)? {
            None => return Err(BridgeError::NotRecognized),
            Some(Format::Codestream) => return Err(BridgeError::UnsupportedRawCodestream),
            Some(Format::Jp2) => {}
        }

        let resolved = header::resolve(codec, source, &options)?;
        let siz = resolved.codestream.siz();
        let (tile_width, tile_height) = siz.reduced_tile_size(options.page);
        let cache_hint = TileCacheHint::for_grid(
            tile_width.min(resolved.descriptor.width),
            tile_height.min(resolved.descriptor.height),
            siz.tiles_across(),
        );
        let concurrency = options.concurrency.unwrap_or_else(pool::concurrency);
        debug!(?cache_hint, concurrency, "loader ready");

        Ok(Self {
            descriptor: resolved.descriptor,
            mapping: resolved.mapping,
            header: resolved.jp2,
            cache_hint,
            concurrency,
            session: Mutex::new(resolved.codestream),
            failed: AtomicBool::new(false),
        })
    }

    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    pub fn mapping(&self) -> &ChannelMapping {
        &self.mapping
    }

    /// The container header as read.
    pub fn header(&self) -> &Jp2Header {
        &self.header
    }

    pub fn cache_hint(&self) -> TileCacheHint {
        self.cache_hint
    }

    pub fn metadata(&self) -> Vec<(&'static str, MetadataValue)> {
        self.descriptor.metadata()
    }

    /// True once a codec failure has ended the session.
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Decode `region` into `out`, band interleaved with rows packed.
    pub fn fill_region(&self, region: Rect, out: SamplesMut<'_>) -> Result<()> {
        if self.is_failed() {
            return Err(BridgeError::SessionFailed);
        }
        region::check_request(&self.descriptor, &region, &out)?;

        let mut codestream = self.session.lock();
        if self.is_failed() {
            return Err(BridgeError::SessionFailed);
        }
        let result = region::decode_region(
            &mut *codestream,
            &self.mapping,
            &self.descriptor,
            region,
            out,
            self.concurrency,
        );
        if let Err(err) = &result {
            if matches!(
                err.category(),
                ErrorCategory::CodecRuntime | ErrorCategory::Io | ErrorCategory::ResourceExhausted
            ) {
                warn!(error = %err, "load session failed");
                self.failed.store(true, Ordering::Release);
            }
        }
        result
    }

    /// Decode `region` into a new buffer.
    pub fn read_region(&self, region: Rect) -> Result<PixelBuffer> {
        let mut buffer =
            PixelBuffer::zeroed(self.descriptor.format, region.area() as usize * self.descriptor.bands)?;
        self.fill_region(region, buffer.as_samples_mut())?;
        Ok(buffer)
    }

    /// Decode the whole page, one cache-hint tile at a time.
    pub fn read_image(&self) -> Result<PixelBuffer> {
        let width = self.descriptor.width;
        let height = self.descriptor.height;
        let bands = self.descriptor.bands;
        let mut image = PixelBuffer::zeroed(self.descriptor.format, self.descriptor.sample_count())?;
        let step_x = self.cache_hint.tile_width.max(1);
        let step_y = self.cache_hint.tile_height.max(1);

        for top in (0..height).step_by(step_y as usize) {
            for left in (0..width).step_by(step_x as usize) {
                let tile = Rect::new(left, top, step_x.min(width - left), step_y.min(height - top));
                let pixels = self.read_region(tile)?;
                image.paste(width, bands, tile, &pixels)?;
            }
        }
        Ok(image)
    }
}

impl<S> std::fmt::Debug for Jp2Loader<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jp2Loader")
            .field("descriptor", &self.descriptor)
            .field("cache_hint", &self.cache_hint)
            .field("failed", &self.failed.load(Ordering::Relaxed))
            .finish()
    }
}
