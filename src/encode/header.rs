//! From an image description and save options to codestream parameters and
//! a JP2 header layout.

use super::stripe::{self, StripeGeometry};
use super::{SaveOptions, SubsampleMode};
use crate::constants::{HT_SUFFIX, MM_PER_METRE, SUBSAMPLE_Q_THRESHOLD};
use crate::descriptor::{ImageDescriptor, Interpretation};
use crate::error::{BridgeError, Result};
use crate::jpeg2000::jp2::{
    ChannelDefinition, ChannelKind, ColourSpecification, EnumCs, IccProfile, Jp2Layout,
    ResolutionBox,
};
use crate::jpeg2000::params::{BlockModes, CodingParams};
use crate::jpeg2000::parser::ComponentInfo;
use std::path::Path;
use tracing::debug;

// Largest tile side the save options accept.
const MAX_TILE_SIDE: u32 = 32768;

/// Everything a save session needs before the first strip.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodePlan {
    pub params: CodingParams,
    pub layout: Jp2Layout,
    pub geometry: StripeGeometry,
    pub layer_sizes: Vec<u64>,
}

/// True for names with the high-throughput suffix.
pub fn is_high_throughput_name(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| HT_SUFFIX[1..].eq_ignore_ascii_case(e))
}

/// Whether chroma sub-sampling applies to this image.
pub fn subsample_enabled(descriptor: &ImageDescriptor, options: &SaveOptions) -> bool {
    match options.subsample_mode {
        SubsampleMode::Off => false,
        SubsampleMode::On => true,
        SubsampleMode::Auto => {
            descriptor.bands == 3
                && descriptor.interpretation == Interpretation::Srgb
                && !options.lossless
                && options.q < SUBSAMPLE_Q_THRESHOLD
        }
    }
}

/// Colour specification: explicit profile, embedded profile, then sRGB for
/// three or more bands and greyscale below that.
pub fn colour_for(descriptor: &ImageDescriptor, options: &SaveOptions) -> ColourSpecification {
    if let Some(profile) = options.icc_profile.as_ref().filter(|p| !p.is_empty()) {
        return ColourSpecification::icc(profile.clone());
    }
    if let Some(profile) = descriptor.icc_profile.as_ref().filter(|p| !p.is_empty()) {
        return ColourSpecification::icc(profile.to_vec());
    }
    if descriptor.bands >= 3 {
        ColourSpecification::enumerated(EnumCs::Srgb)
    } else {
        ColourSpecification::enumerated(EnumCs::Greyscale)
    }
}

/// Channel definitions when there are bands beyond the colours: a single
/// extra band is opacity, several are unspecified.
pub fn channel_definitions(bands: usize, colours: usize) -> Vec<ChannelDefinition> {
    let extras = bands.saturating_sub(colours);
    if extras == 0 {
        return Vec::new();
    }
    (0..bands)
        .map(|channel| {
            let (kind, association) = if channel < colours {
                (ChannelKind::Colour, channel as u16 + 1)
            } else if extras == 1 {
                (ChannelKind::Opacity, 0)
            } else {
                (ChannelKind::Unspecified(u16::MAX), u16::MAX)
            };
            ChannelDefinition {
                channel: channel as u16,
                kind,
                association,
            }
        })
        .collect()
}

fn colours_of(colour: &ColourSpecification, bands: usize) -> usize {
    match colour.icc_profile() {
        Some(bytes) => IccProfile::new(bytes.to_vec())
            .num_colours()
            .unwrap_or(bands.min(3)),
        None if bands >= 3 => 3,
        None => 1,
    }
}

/// Build the parameters and header for saving `descriptor`. `filename`
/// selects high-throughput coding by suffix.
pub fn plan(
    descriptor: &ImageDescriptor,
    options: &SaveOptions,
    filename: Option<&Path>,
) -> Result<EncodePlan> {
    let format = descriptor.format;
    if !format.is_integer() {
        return Err(BridgeError::NotIntegerFormat {
            format: format.name(),
        });
    }
    if format.is_signed() {
        return Err(BridgeError::UnsupportedFormat {
            format: format.name(),
        });
    }
    if descriptor.bands == 0 || descriptor.width == 0 || descriptor.height == 0 {
        return Err(BridgeError::invalid_argument("image has no pixels"));
    }
    if !(1..=100).contains(&options.q) {
        return Err(BridgeError::invalid_argument("Q must be 1 to 100"));
    }
    for side in [options.tile_width, options.tile_height] {
        if !(1..=MAX_TILE_SIDE).contains(&side) {
            return Err(BridgeError::invalid_argument(format!(
                "tile side {side} outside 1 to {MAX_TILE_SIDE}"
            )));
        }
    }

    let precision = (format.bytes() * 8) as u8;
    let bands = descriptor.bands;
    let pixels = u64::from(descriptor.width) * u64::from(descriptor.height);
    let layer_sizes = stripe::layer_sizes(pixels, &options.rates)?;

    let mut params = CodingParams::new(
        descriptor.width,
        descriptor.height,
        vec![ComponentInfo::unsigned(precision); bands],
    );
    params.tile_width = options.tile_width;
    params.tile_height = options.tile_height;
    if options.lossless {
        params.reversible = true;
    } else if layer_sizes.is_empty() {
        params.qfactor = Some(options.q);
    }
    if !layer_sizes.is_empty() {
        params.layers = layer_sizes.len() as u16;
    }

    let high_throughput =
        options.high_throughput || filename.is_some_and(is_high_throughput_name);
    if subsample_enabled(descriptor, options) {
        params.parse_options("Cycc=yes Ssampling:C1={2,2} Ssampling:C2={2,2}")?;
    }
    if let Some(extra) = &options.options {
        params.parse_options(extra)?;
    }
    // After the option string, since `Cmodes` replaces the whole mode set.
    if high_throughput {
        params.modes |= BlockModes::HT;
    }
    if !layer_sizes.is_empty() && usize::from(params.layers) != layer_sizes.len() {
        return Err(BridgeError::invalid_option(
            format!("Clayers={}", params.layers),
            "layer count differs from the number of rates",
        ));
    }
    params.finalize()?;

    let colour = colour_for(descriptor, options);
    let colours = colours_of(&colour, bands);
    if colours > bands {
        return Err(BridgeError::ColourBandMismatch {
            found: bands,
            expected: colours,
        });
    }
    let resolution = (descriptor.xres > 0.0 && descriptor.yres > 0.0).then(|| {
        ResolutionBox::from_pixels_per_metre(
            descriptor.xres * MM_PER_METRE,
            descriptor.yres * MM_PER_METRE,
        )
    });

    let layout = Jp2Layout {
        width: descriptor.width,
        height: descriptor.height,
        components: bands as u16,
        precision,
        signed: false,
        colour,
        resolution,
        channel_definitions: channel_definitions(bands, colours),
        high_throughput: params.high_throughput(),
    };
    let geometry = StripeGeometry {
        width: descriptor.width,
        height: descriptor.height,
        bands,
        format,
        precisions: vec![precision; bands],
        signed: (format.bytes() > 1).then(|| vec![false; bands]),
    };
    debug!(
        width = descriptor.width,
        height = descriptor.height,
        bands,
        precision,
        layers = params.layers,
        reversible = params.reversible,
        qfactor = ?params.qfactor,
        high_throughput = layout.high_throughput,
        ycc = params.ycc,
        "save plan"
    );

    Ok(EncodePlan {
        params,
        layout,
        geometry,
        layer_sizes,
    })
}
