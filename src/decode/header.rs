//! Turns a JP2 container into an [`ImageDescriptor`], a [`ChannelMapping`]
//! and an open, persistent codestream.

use super::LoadOptions;
use crate::codec::{Codec, Codestream, InputRestrictions};
use crate::constants::{
    DEFAULT_RESOLUTION, MAX_BITS_PER_SAMPLE, MAX_PAGE, MM_PER_METRE, PAGE_COUNT_BIAS,
};
use crate::descriptor::{
    ChannelKey, ChannelMapping, ImageDescriptor, Interpretation, MappedChannel,
};
use crate::error::{BridgeError, Result};
use crate::jpeg2000::jp2::{
    self, ChannelKind, ColourMethod, ColourSpecification, EnumCs, IccClass, Jp2Header,
    Resolution,
};
use crate::jpeg2000::parser::CodestreamHeader;
use crate::message::guard;
use crate::pixels::BandFormat;
use crate::stream::{CodestreamSource, Source, StreamSource};
use std::sync::Arc;
use tracing::debug;

/// Synthetic pyramid depth: `max(1, floor(log2(min(w, h))) - 6)`.
pub fn page_count(width: u32, height: u32) -> u32 {
    let short = width.min(height).max(1);
    let log2 = 31 - short.leading_zeros();
    log2.saturating_sub(PAGE_COUNT_BIAS).max(1)
}

/// Size of `page`, each axis divided by `2^page` and rounded up.
pub fn page_size(width: u32, height: u32, page: u32) -> (u32, u32) {
    let scale = 1u64 << page.min(63);
    (
        u64::from(width).div_ceil(scale) as u32,
        u64::from(height).div_ceil(scale) as u32,
    )
}

/// Host resolution in pixels per millimetre, `(xres, yres)`.
///
/// Capture resolution wins over display resolution; with neither, both
/// axes are 1 pixel per millimetre.
pub fn resolution(resolution: &Resolution) -> (f64, f64) {
    let chosen = resolution
        .capture
        .filter(|r| r.vertical() > 0.0)
        .or_else(|| resolution.display.filter(|r| r.vertical() > 0.0));
    match chosen {
        Some(r) => {
            let yres = r.vertical() / MM_PER_METRE;
            (yres * r.aspect_ratio(), yres)
        }
        None => (DEFAULT_RESOLUTION, DEFAULT_RESOLUTION),
    }
}

/// Interpretation and expected colour count for a colour specification.
/// `None` means any number of colours is acceptable.
pub fn interpretation(colour: Option<&ColourSpecification>) -> (Interpretation, Option<usize>) {
    match colour.map(|c| &c.method) {
        Some(ColourMethod::Enumerated(EnumCs::Cmyk)) => (Interpretation::Cmyk, Some(4)),
        Some(ColourMethod::Enumerated(EnumCs::CieLab)) => (Interpretation::Lab, Some(3)),
        Some(ColourMethod::Enumerated(EnumCs::Srgb)) => (Interpretation::Srgb, Some(3)),
        Some(ColourMethod::Enumerated(EnumCs::Greyscale)) => (Interpretation::BW, Some(1)),
        Some(ColourMethod::Icc(profile)) => match profile.class() {
            IccClass::Rgb => (Interpretation::Srgb, Some(3)),
            IccClass::Gray => (Interpretation::BW, Some(1)),
            _ => (Interpretation::Multiband, None),
        },
        // YCbCr, CMY, bilevel, vendor and the rest are passed through.
        _ => (Interpretation::Multiband, None),
    }
}

fn colours_in_space(colour: Option<&ColourSpecification>, channels: usize) -> usize {
    let colours = match colour.map(|c| &c.method) {
        Some(ColourMethod::Enumerated(space)) => space.num_colours(),
        Some(ColourMethod::Icc(profile)) => profile.num_colours().unwrap_or(channels),
        _ => channels,
    };
    colours.min(channels)
}

/// Build the output channel list, colour channels first.
pub fn channel_mapping(jp2: &Jp2Header) -> Result<ChannelMapping> {
    let components = usize::from(jp2.image_header.components);

    let mut raw: Vec<(u16, Option<u8>)> = match &jp2.component_mapping {
        Some(cmap) => cmap
            .iter()
            .map(|m| (m.component, (m.mapping_type == 1).then_some(m.palette_column)))
            .collect(),
        None => {
            if jp2.palette.is_some() {
                return Err(BridgeError::container("palette without component mapping"));
            }
            (0..components as u16).map(|c| (c, None)).collect()
        }
    };
    if let Some(&(component, _)) = raw.iter().find(|(c, _)| usize::from(*c) >= components) {
        return Err(BridgeError::container(format!(
            "channel maps to component {component}, image has {components}"
        )));
    }
    if let Some(palette) = &jp2.palette {
        if raw
            .iter()
            .any(|(_, lut)| lut.is_some_and(|l| usize::from(l) >= palette.columns.len()))
        {
            return Err(BridgeError::container("channel maps to a missing palette column"));
        }
    } else {
        for (_, lut) in raw.iter_mut() {
            *lut = None;
        }
    }

    let keys: Vec<ChannelKey> = match &jp2.channel_definitions {
        Some(definitions) => (0..raw.len())
            .map(|channel| {
                match definitions.iter().find(|d| usize::from(d.channel) == channel) {
                    Some(d) if d.kind == ChannelKind::Colour
                        && d.association > 0
                        && d.association < u16::MAX =>
                    {
                        ChannelKey::Colour(d.association - 1)
                    }
                    Some(d) => ChannelKey::NonColour(d.kind),
                    None => ChannelKey::NonColour(ChannelKind::Unspecified(u16::MAX)),
                }
            })
            .collect(),
        None => {
            let colours = colours_in_space(jp2.colour(), raw.len());
            (0..raw.len())
                .map(|channel| {
                    if channel < colours {
                        ChannelKey::Colour(channel as u16)
                    } else {
                        ChannelKey::NonColour(ChannelKind::Unspecified(u16::MAX))
                    }
                })
                .collect()
        }
    };

    let mut channels: Vec<MappedChannel> = raw
        .into_iter()
        .zip(keys)
        .map(|((component, lut), key)| MappedChannel {
            component,
            lut,
            stream_id: 0,
            key,
        })
        .collect();
    // Colours in colour order, then everything else in channel order.
    channels.sort_by_key(|c| match c.key {
        ChannelKey::Colour(index) => (0, index),
        ChannelKey::NonColour(_) => (1, 0),
    });

    Ok(ChannelMapping {
        channels,
        palette: jp2.palette.clone().map(Arc::new),
    })
}

/// Widest per-band depth after palette lookup.
pub fn bits_per_sample(mapping: &ChannelMapping, siz: &CodestreamHeader) -> Result<u32> {
    let mut bits = 0u32;
    for channel in &mapping.channels {
        let depth = match (channel.lut, &mapping.palette) {
            (Some(column), Some(palette)) => palette.columns[usize::from(column)].precision,
            _ => siz
                .components
                .get(usize::from(channel.component))
                .map(|c| c.precision)
                .ok_or_else(|| {
                    BridgeError::container(format!(
                        "codestream has no component {}",
                        channel.component
                    ))
                })?,
        };
        bits = bits.max(u32::from(depth));
    }
    if bits == 0 || bits > MAX_BITS_PER_SAMPLE {
        return Err(BridgeError::UnsupportedBitDepth { bits });
    }
    Ok(bits)
}

/// Build the descriptor from what the container and codestream say.
pub fn describe(
    jp2: &Jp2Header,
    mapping: &ChannelMapping,
    siz: &CodestreamHeader,
    page: u32,
) -> Result<ImageDescriptor> {
    let n_pages = page_count(jp2.image_header.width, jp2.image_header.height);
    if page >= n_pages {
        return Err(BridgeError::InvalidPage { page, n_pages });
    }

    let (interpretation, expected) = interpretation(jp2.colour());
    let found = mapping.num_colours();
    if let Some(expected) = expected {
        if found > expected {
            return Err(BridgeError::ColourBandMismatch { found, expected });
        }
    }

    let bits = bits_per_sample(mapping, siz)?;
    let format = BandFormat::for_bits(bits)?;
    let (width, height) = siz.reduced_size(page);
    let (xres, yres) = resolution(&jp2.resolution);
    let icc_profile = jp2
        .colour()
        .and_then(ColourSpecification::icc_profile)
        .filter(|p| !p.is_empty())
        .map(Arc::from);

    Ok(ImageDescriptor {
        width,
        height,
        bands: mapping.num_channels(),
        bits_per_sample: bits,
        format,
        interpretation,
        xres,
        yres,
        icc_profile,
        n_pages,
        page,
        filename: None,
    })
}

/// A resolved load session before any region is decoded.
pub struct Resolved<S> {
    pub descriptor: ImageDescriptor,
    pub mapping: ChannelMapping,
    pub jp2: Jp2Header,
    pub codestream: S,
}

fn as_container_error(err: BridgeError) -> BridgeError {
    match err {
        BridgeError::InvalidData { reason } => BridgeError::ContainerOpen { reason },
        other => other,
    }
}

/// Open the container behind `source` and prepare its codestream for
/// region decoding at `options.page`.
pub fn resolve<C: Codec>(
    codec: &C,
    source: &Source,
    options: &LoadOptions,
) -> Result<Resolved<C::Codestream>> {
    if options.page > MAX_PAGE {
        return Err(BridgeError::invalid_argument(format!(
            "page must be 0 to {MAX_PAGE}"
        )));
    }

    let mut stream = StreamSource::new(source);
    let jp2 = jp2::read_header(&mut stream).map_err(as_container_error)?;
    debug!(
        width = jp2.image_header.width,
        height = jp2.image_header.height,
        components = jp2.image_header.components,
        colour = ?jp2.colour().map(|c| &c.method),
        "container header"
    );

    let n_pages = page_count(jp2.image_header.width, jp2.image_header.height);
    if options.page >= n_pages {
        return Err(BridgeError::InvalidPage {
            page: options.page,
            n_pages,
        });
    }
    let mapping = channel_mapping(&jp2)?;
    debug!(
        colours = mapping.num_colours(),
        non_colours = mapping.num_non_colours(),
        "channel mapping"
    );

    let window = CodestreamSource::new(stream, jp2.codestream.offset, jp2.codestream.length);
    let mut codestream = guard("open codestream", || codec.open_codestream(window))?;
    codestream.set_persistent();
    guard("apply input restrictions", || {
        codestream.apply_input_restrictions(InputRestrictions::discard(options.page))
    })?;
    codestream.set_resilience(options.fail_on.resilience());

    let mut descriptor = describe(&jp2, &mapping, codestream.siz(), options.page)?;
    descriptor.filename = source.filename().map(|p| p.to_path_buf());
    debug!(
        width = descriptor.width,
        height = descriptor.height,
        bands = descriptor.bands,
        bits = descriptor.bits_per_sample,
        n_pages = descriptor.n_pages,
        "resolved header"
    );

    Ok(Resolved {
        descriptor,
        mapping,
        jp2,
        codestream,
    })
}
