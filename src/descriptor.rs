//! What a load session knows about its image, fixed once resolved.

use crate::constants::{CACHE_TILE_ROWS, META_BITS_PER_SAMPLE, META_ICC_NAME, META_N_PAGES};
use crate::jpeg2000::jp2::{ChannelKind, Palette};
use crate::pixels::BandFormat;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interpretation {
    /// Greyscale.
    BW,
    Srgb,
    Cmyk,
    Lab,
    /// Bands with no specific colour meaning.
    Multiband,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageDescriptor {
    pub width: u32,
    pub height: u32,
    pub bands: usize,
    /// Widest band depth; every band is stored in `format`.
    pub bits_per_sample: u32,
    pub format: BandFormat,
    pub interpretation: Interpretation,
    /// Pixels per millimetre.
    pub xres: f64,
    pub yres: f64,
    pub icc_profile: Option<Arc<[u8]>>,
    pub n_pages: u32,
    pub page: u32,
    pub filename: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    Int(i64),
    Blob(Arc<[u8]>),
}

impl ImageDescriptor {
    /// A bare description of pixels to save: 1 pixel per mm, no profile.
    pub fn new(width: u32, height: u32, bands: usize, format: BandFormat) -> Self {
        let interpretation = match bands {
            1 | 2 => Interpretation::BW,
            3 | 4 => Interpretation::Srgb,
            _ => Interpretation::Multiband,
        };
        Self {
            width,
            height,
            bands,
            bits_per_sample: format.bytes() as u32 * 8,
            format,
            interpretation,
            xres: 1.0,
            yres: 1.0,
            icc_profile: None,
            n_pages: 1,
            page: 0,
            filename: None,
        }
    }

    pub fn with_interpretation(mut self, interpretation: Interpretation) -> Self {
        self.interpretation = interpretation;
        self
    }

    pub fn with_resolution(mut self, xres: f64, yres: f64) -> Self {
        self.xres = xres;
        self.yres = yres;
        self
    }

    pub fn with_icc_profile(mut self, profile: impl Into<Arc<[u8]>>) -> Self {
        self.icc_profile = Some(profile.into());
        self
    }

    /// Samples in one full image, all bands.
    pub fn sample_count(&self) -> usize {
        self.width as usize * self.height as usize * self.bands
    }

    pub fn metadata(&self) -> Vec<(&'static str, MetadataValue)> {
        let mut items = vec![
            (META_N_PAGES, MetadataValue::Int(i64::from(self.n_pages))),
            (
                META_BITS_PER_SAMPLE,
                MetadataValue::Int(i64::from(self.bits_per_sample)),
            ),
        ];
        if let Some(profile) = &self.icc_profile {
            items.push((META_ICC_NAME, MetadataValue::Blob(profile.clone())));
        }
        items
    }
}

/// How an output band is keyed in the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    /// Colour index, starting at 0.
    Colour(u16),
    NonColour(ChannelKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedChannel {
    pub component: u16,
    /// Palette column, when the component indexes a palette.
    pub lut: Option<u8>,
    pub stream_id: u32,
    pub key: ChannelKey,
}

/// Output band to codestream component association, colour bands first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelMapping {
    pub channels: Vec<MappedChannel>,
    pub palette: Option<Arc<Palette>>,
}

impl ChannelMapping {
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn num_colours(&self) -> usize {
        self.channels
            .iter()
            .filter(|c| matches!(c.key, ChannelKey::Colour(_)))
            .count()
    }

    pub fn num_non_colours(&self) -> usize {
        self.num_channels() - self.num_colours()
    }

    /// The value an output band takes for a raw component sample.
    pub fn map_sample(&self, channel: usize, raw: u32) -> u32 {
        let lut = self.channels.get(channel).and_then(|c| c.lut);
        match (lut, &self.palette) {
            (Some(column), Some(palette)) => palette
                .values
                .get(usize::from(column))
                .and_then(|values| {
                    let last = values.len().checked_sub(1)?;
                    values.get((raw as usize).min(last)).copied()
                })
                .unwrap_or(raw),
            _ => raw,
        }
    }
}

/// Sizing the host tile cache should use in front of a loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileCacheHint {
    pub tile_width: u32,
    pub tile_height: u32,
    pub max_tiles: u32,
}

impl TileCacheHint {
    /// Two full rows of codestream tiles plus half a row of margin.
    pub fn for_grid(tile_width: u32, tile_height: u32, tiles_across: u32) -> Self {
        Self {
            tile_width,
            tile_height,
            max_tiles: CACHE_TILE_ROWS * tiles_across.max(1),
        }
    }
}
