//! One tile request: a fresh worker pool, then start, process until the
//! region is complete, finish.

use crate::codec::{AccessMode, Codestream, RegionDecompressor, RegionParams};
use crate::descriptor::{ChannelMapping, ImageDescriptor};
use crate::error::{BridgeError, Result};
use crate::message::guard;
use crate::pixels::{BufferLayout, Rect, SamplesMut};
use crate::pool::WorkerPool;
use tracing::{debug, trace};

/// Check that `region` lies inside the page and `out` can hold it.
pub fn check_request(descriptor: &ImageDescriptor, region: &Rect, out: &SamplesMut<'_>) -> Result<()> {
    let page = Rect::new(0, 0, descriptor.width, descriptor.height);
    if region.is_empty() || !page.contains(region) {
        return Err(BridgeError::invalid_argument(format!(
            "region {region:?} is outside the {}x{} page",
            descriptor.width, descriptor.height
        )));
    }
    if out.format() != descriptor.format {
        return Err(BridgeError::invalid_argument(format!(
            "output buffer is {}, image is {}",
            out.format().name(),
            descriptor.format.name()
        )));
    }
    let needed = region.area() as usize * descriptor.bands;
    if out.len() < needed {
        return Err(BridgeError::invalid_argument(format!(
            "output buffer holds {} samples, region needs {needed}",
            out.len()
        )));
    }
    Ok(())
}

/// Decode `region` of the open page into `out`, band interleaved and
/// packed. `out` must already have passed [`check_request`].
pub fn decode_region<S: Codestream>(
    codestream: &mut S,
    mapping: &ChannelMapping,
    descriptor: &ImageDescriptor,
    region: Rect,
    mut out: SamplesMut<'_>,
    concurrency: usize,
) -> Result<()> {
    let pool = WorkerPool::attach(concurrency)?;
    trace!(pool = pool.id(), threads = pool.threads(), ?region, "region request");

    // The page reduction is already applied to the codestream, so the
    // rectangle passes through at 1:1.
    let params = RegionParams {
        mapping,
        single_component: None,
        discard_levels: descriptor.page,
        max_layers: u16::MAX,
        region,
        expand_numerator: (1, 1),
        expand_denominator: (1, 1),
        precise: false,
        access_mode: AccessMode::OutputComponents,
        fastest: true,
    };
    let layout = BufferLayout::interleaved(descriptor.bands);
    let stride = layout.row_stride(region.width);

    let mut decompressor = codestream.region_decompressor();
    if !guard("region start", || decompressor.start(&params, &pool))? {
        return Err(BridgeError::decode_failed(format!(
            "decompressor refused region {region:?}"
        )));
    }

    let mut remaining = region;
    let mut calls = 0u32;
    while remaining.height > 0 {
        let offset = (remaining.top - region.top) as usize * stride;
        let tail = out.tail(offset);
        let next = guard("region process", || {
            decompressor.process(tail, &layout, u64::MAX, &pool)
        });
        let next = match next {
            Ok(next) => next,
            Err(err) => {
                // The decompressor must still be finished before it goes away.
                let _ = guard("region finish", || decompressor.finish());
                return Err(err);
            }
        };
        calls += 1;
        if next.height > 0 && (next.top <= remaining.top || next.bottom() != region.bottom()) {
            let _ = guard("region finish", || decompressor.finish());
            return Err(BridgeError::decode_failed(format!(
                "decompressor made no progress at row {}",
                remaining.top
            )));
        }
        remaining = next;
    }

    if !guard("region finish", || decompressor.finish())? {
        return Err(BridgeError::decode_failed(format!(
            "decompressor could not finish region {region:?}"
        )));
    }
    debug!(?region, calls, pool = pool.id(), "region decoded");
    Ok(())
}
