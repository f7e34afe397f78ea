//! Rate budgets and the push loop that feeds host strips to the compressor.

use crate::codec::{Stripe, StripeCompressor};
use crate::constants::{BYTES_PER_BIT, MAX_LAYERS};
use crate::error::{BridgeError, Result};
use crate::message::guard;
use crate::pixels::{BandFormat, Samples};
use crate::pool::WorkerPool;
use crate::stream::StreamTarget;
use tracing::{debug, trace};

/// Byte budget for each quality layer: `pixels * 0.125 * bits_per_pixel`.
///
/// An empty `rates` list gives an empty result, meaning one layer driven by
/// the quality factor.
pub fn layer_sizes(pixels: u64, rates: &[f64]) -> Result<Vec<u64>> {
    if rates.len() > MAX_LAYERS {
        return Err(BridgeError::TooManyLayers {
            count: rates.len(),
            max: MAX_LAYERS,
        });
    }
    rates
        .iter()
        .map(|&bpp| {
            if !bpp.is_finite() || bpp <= 0.0 {
                return Err(BridgeError::invalid_argument(format!(
                    "layer rate {bpp} is not a positive number of bits per pixel"
                )));
            }
            Ok((pixels as f64 * BYTES_PER_BIT * bpp) as u64)
        })
        .collect()
}

/// Geometry of the strips a [`StripeEngine`] accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripeGeometry {
    pub width: u32,
    pub height: u32,
    pub bands: usize,
    pub format: BandFormat,
    pub precisions: Vec<u8>,
    /// Only for formats wider than a byte.
    pub signed: Option<Vec<bool>>,
}

/// Drives a started [`StripeCompressor`] with strips arriving top to bottom.
pub struct StripeEngine<P> {
    compressor: P,
    pool: WorkerPool,
    geometry: StripeGeometry,
    heights: Vec<usize>,
    next_row: u32,
    saturated: bool,
}

impl<P: StripeCompressor> StripeEngine<P> {
    /// Start `compressor` with `layer_sizes` on `pool`, which is kept until
    /// [`finish`](Self::finish).
    pub fn start(
        mut compressor: P,
        layer_sizes: &[u64],
        pool: WorkerPool,
        geometry: StripeGeometry,
    ) -> Result<Self> {
        guard("compressor start", || compressor.start(layer_sizes, &pool))?;
        debug!(
            layers = layer_sizes.len(),
            pool = pool.id(),
            threads = pool.threads(),
            "stripe compressor started"
        );
        let heights = vec![0; geometry.bands];
        Ok(Self {
            compressor,
            pool,
            geometry,
            heights,
            next_row: 0,
            saturated: false,
        })
    }

    /// Rows pushed so far.
    pub fn rows_written(&self) -> u32 {
        self.next_row
    }

    pub fn is_complete(&self) -> bool {
        self.next_row == self.geometry.height
    }

    /// Push the strip whose first row is `top`.
    pub fn push(&mut self, top: u32, samples: Samples<'_>) -> Result<()> {
        let geometry = &self.geometry;
        if top != self.next_row {
            return Err(BridgeError::invalid_argument(format!(
                "strip starts at row {top}, expected row {}",
                self.next_row
            )));
        }
        if samples.format() != geometry.format {
            return Err(BridgeError::invalid_argument(format!(
                "strip is {}, image is {}",
                samples.format().name(),
                geometry.format.name()
            )));
        }
        let row = geometry.width as usize * geometry.bands;
        if samples.is_empty() || samples.len() % row != 0 {
            return Err(BridgeError::invalid_argument(format!(
                "strip of {} samples is not a whole number of {row}-sample rows",
                samples.len()
            )));
        }
        let rows = samples.len() / row;
        if top as usize + rows > geometry.height as usize {
            return Err(BridgeError::invalid_argument(format!(
                "strip runs past the last row ({} + {rows} > {})",
                top, geometry.height
            )));
        }
        if self.saturated {
            return Err(BridgeError::encode_failed(
                "compressor accepted no more rows",
            ));
        }

        self.heights.fill(rows);
        let stripe = Stripe {
            samples,
            heights: &self.heights,
            precisions: &geometry.precisions,
            signed: geometry.signed.as_deref(),
        };
        let compressor = &mut self.compressor;
        let pool = &self.pool;
        let wants_more = guard("compressor push", || compressor.push_stripe(&stripe, pool))?;
        self.next_row += rows as u32;
        trace!(top, rows, wants_more, "strip pushed");
        if !wants_more {
            self.saturated = true;
        }
        Ok(())
    }

    /// Finish the codestream once every row has been pushed and hand back
    /// the stream it was written to. The pool is released here.
    pub fn finish(self) -> Result<StreamTarget> {
        if !self.is_complete() {
            return Err(BridgeError::invalid_argument(format!(
                "image ends after row {} of {}",
                self.next_row, self.geometry.height
            )));
        }
        let Self {
            compressor, pool, ..
        } = self;
        let stream = guard("compressor finish", || compressor.finish(&pool))?;
        debug!(pool = pool.id(), bytes = stream.written(), "stripe compressor finished");
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budgets_scale_with_pixels() {
        let sizes = layer_sizes(1000 * 1000, &[0.5, 1.0, 4.0]).unwrap();
        assert_eq!(sizes, vec![62_500, 125_000, 500_000]);
        assert!(layer_sizes(100, &[]).unwrap().is_empty());
    }

    #[test]
    fn too_many_layers() {
        let rates = vec![1.0; MAX_LAYERS + 1];
        assert!(matches!(
            layer_sizes(100, &rates),
            Err(BridgeError::TooManyLayers { count: 17, max: 16 })
        ));
        assert_eq!(layer_sizes(8, &vec![1.0; MAX_LAYERS]).unwrap().len(), MAX_LAYERS);
    }

    #[test]
    fn rates_must_be_positive() {
        assert!(layer_sizes(100, &[1.0, 0.0]).is_err());
        assert!(layer_sizes(100, &[f64::NAN]).is_err());
    }
}
