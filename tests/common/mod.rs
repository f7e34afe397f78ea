//! A reference codec for integration tests.
//!
//! `RawCodec` writes a real main header (SOC, SIZ, CAP, COD) followed by a
//! single tile-part holding every sample big-endian at its full width, and
//! decodes such codestreams by decimation at the requested discard level.
//! It records what the bridge asked of it and enforces the start, process,
//! finish thread affinity of region decompressors.

#![allow(dead_code)]

use j2kbridge_rs::codec::{
    Codec, Codestream, InputRestrictions, RegionDecompressor, RegionParams, Resilience, Stripe,
    StripeCompressor,
};
use j2kbridge_rs::descriptor::{ChannelMapping, ImageDescriptor};
use j2kbridge_rs::error::{BridgeError, Result};
use j2kbridge_rs::jpeg2000::jp2::{self, ColourSpecification, EnumCs, Jp2Layout};
use j2kbridge_rs::jpeg2000::params::CodingParams;
use j2kbridge_rs::jpeg2000::parser::{CodestreamHeader, ComponentInfo, parse_main_header};
use j2kbridge_rs::jpeg2000::reader::ByteReader;
use j2kbridge_rs::jpeg2000::writer::J2kWriter;
use j2kbridge_rs::message::{messages, raise, warn_once};
use j2kbridge_rs::pixels::{BandFormat, BufferLayout, PixelBuffer, Rect, SamplesMut};
use j2kbridge_rs::pool::WorkerPool;
use j2kbridge_rs::stream::{CodestreamSource, StreamTarget};
use parking_lot::Mutex;
use std::io::Read;
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Fault injection switches.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Raise a codec error on this `process` call (1-based, counted per codec).
    pub error_on_process: Option<usize>,
    pub panic_on_start: bool,
    /// Fail `start` as if the worker threads could not be attached.
    pub attach_failure_on_start: bool,
    pub refuse_finish: bool,
    /// Raise a codec error on this `push_stripe` call (1-based).
    pub error_on_push: Option<usize>,
    /// Emit a warning on every `open_codestream`.
    pub warn_on_open: bool,
}

/// Everything the codec saw.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub opened: usize,
    pub resilience: Option<Resilience>,
    pub restrictions: Option<InputRestrictions>,
    pub region_starts: usize,
    pub process_calls: usize,
    pub region_pools: Vec<u64>,
    pub region_threads: Vec<ThreadId>,
    pub affinity_violations: usize,
    pub params: Option<CodingParams>,
    pub layer_sizes: Option<Vec<u64>>,
    pub stripe_heights: Vec<usize>,
    pub stripe_signed: Vec<bool>,
    pub stripe_precisions: Vec<u8>,
    pub compressor_pools: Vec<u64>,
    pub finished: usize,
}

#[derive(Debug, Default, Clone)]
pub struct RawCodec {
    pub faults: Faults,
    /// Rows produced per `process` call.
    pub rows_per_process: u32,
    pub stats: Arc<Mutex<Stats>>,
}

impl RawCodec {
    pub fn new() -> Self {
        Self {
            rows_per_process: 3,
            ..Self::default()
        }
    }

    pub fn with_faults(faults: Faults) -> Self {
        Self {
            faults,
            ..Self::new()
        }
    }

    pub fn stats(&self) -> Stats {
        self.stats.lock().clone()
    }
}

fn sample_width(precision: u8) -> usize {
    match precision {
        0..=8 => 1,
        9..=16 => 2,
        _ => 4,
    }
}

pub struct RawCodestream {
    siz: CodestreamHeader,
    /// Full resolution, component interleaved.
    samples: Vec<u32>,
    discard: u32,
    persistent: bool,
    // Held open for the life of the codestream.
    _source: CodestreamSource,
    codec: RawCodec,
}

fn open(codec: &RawCodec, mut source: CodestreamSource) -> Result<RawCodestream> {
    let mut bytes = Vec::new();
    source.read_to_end(&mut bytes)?;
    let (siz, sot) = parse_main_header(&bytes)?;

    let mut reader = ByteReader::new(&bytes[sot..]);
    if reader.read_u16()? != 0xFF90 {
        raise("raw codec: missing SOT")?;
    }
    let _lsot = reader.read_u16()?;
    let _tile = reader.read_u16()?;
    let psot = reader.read_u32()? as usize;
    reader.advance(2)?;
    if reader.read_u16()? != 0xFF93 {
        raise("raw codec: missing SOD")?;
    }
    let data = reader.read_bytes(psot - 14)?;

    let count = siz.width as usize * siz.height as usize * siz.components.len();
    let mut data = ByteReader::new(data);
    let mut samples = Vec::with_capacity(count);
    for i in 0..count {
        let component = &siz.components[i % siz.components.len()];
        samples.push(data.read_uint(sample_width(component.precision))?);
    }

    Ok(RawCodestream {
        siz,
        samples,
        discard: 0,
        persistent: false,
        _source: source,
        codec: codec.clone(),
    })
}

impl Codec for RawCodec {
    type Codestream = RawCodestream;
    type Compressor = RawCompressor;

    fn open_codestream(&self, source: CodestreamSource) -> Result<RawCodestream> {
        self.stats.lock().opened += 1;
        if self.faults.warn_on_open {
            warn_once("raw codec: opened for testing");
        }
        open(self, source)
    }

    fn create_compressor(&self, params: &CodingParams, target: StreamTarget) -> Result<RawCompressor> {
        self.stats.lock().params = Some(params.clone());
        Ok(RawCompressor {
            header: params.to_header(),
            target,
            samples: Vec::new(),
            rows: 0,
            pushes: 0,
            codec: self.clone(),
        })
    }
}

impl Codestream for RawCodestream {
    type Region<'a> = RawRegion<'a>;

    fn set_persistent(&mut self) {
        self.persistent = true;
    }

    fn is_persistent(&self) -> bool {
        self.persistent
    }

    fn set_resilience(&mut self, resilience: Resilience) {
        self.codec.stats.lock().resilience = Some(resilience);
    }

    fn apply_input_restrictions(&mut self, restrictions: InputRestrictions) -> Result<()> {
        self.codec.stats.lock().restrictions = Some(restrictions);
        if restrictions.discard_levels > u32::from(self.siz.levels) {
            let sinks = messages();
            sinks.error.put_text("raw codec: cannot discard ");
            sinks
                .error
                .put_text(&format!("{} of {} levels", restrictions.discard_levels, self.siz.levels));
            sinks.error.flush(true)?;
        }
        self.discard = restrictions.discard_levels;
        Ok(())
    }

    fn siz(&self) -> &CodestreamHeader {
        &self.siz
    }

    fn region_decompressor(&mut self) -> RawRegion<'_> {
        RawRegion {
            codestream: self,
            thread: None,
            region: Rect::default(),
            next_row: 0,
            mapping: ChannelMapping::default(),
        }
    }
}

pub struct RawRegion<'a> {
    codestream: &'a RawCodestream,
    thread: Option<ThreadId>,
    region: Rect,
    next_row: u32,
    mapping: ChannelMapping,
}

impl RawRegion<'_> {
    fn check_thread(&self) -> Result<()> {
        if self.thread != Some(thread::current().id()) {
            self.codestream.codec.stats.lock().affinity_violations += 1;
            raise("raw codec: region used from another thread")?;
        }
        Ok(())
    }
}

impl RegionDecompressor for RawRegion<'_> {
    fn start(&mut self, params: &RegionParams<'_>, pool: &WorkerPool) -> Result<bool> {
        let codec = &self.codestream.codec;
        if codec.faults.panic_on_start {
            panic!("raw codec: start fault");
        }
        if codec.faults.attach_failure_on_start {
            return Err(BridgeError::ThreadAttach {
                requested: pool.threads(),
                reason: "raw codec: no threads left".to_string(),
            });
        }
        {
            let mut stats = codec.stats.lock();
            stats.region_starts += 1;
            stats.region_pools.push(pool.id());
            stats.region_threads.push(thread::current().id());
        }
        if !self.codestream.persistent || params.discard_levels != self.codestream.discard {
            return Ok(false);
        }
        let (width, height) = self.codestream.siz.reduced_size(self.codestream.discard);
        if !Rect::new(0, 0, width, height).contains(&params.region) {
            return Ok(false);
        }
        self.thread = Some(thread::current().id());
        self.region = params.region;
        self.next_row = params.region.top;
        self.mapping = params.mapping.clone();
        Ok(true)
    }

    fn process(
        &mut self,
        mut out: SamplesMut<'_>,
        layout: &BufferLayout,
        _max_pixels: u64,
        _pool: &WorkerPool,
    ) -> Result<Rect> {
        self.check_thread()?;
        let codec = &self.codestream.codec;
        let call = {
            let mut stats = codec.stats.lock();
            stats.process_calls += 1;
            stats.process_calls
        };
        if codec.faults.error_on_process == Some(call) {
            raise("raw codec: injected decode fault")?;
        }

        let siz = &self.codestream.siz;
        let components = siz.components.len();
        let scale = 1u32 << self.codestream.discard;
        let rows = codec.rows_per_process.max(1).min(self.region.bottom() - self.next_row);
        let stride = layout.row_stride(self.region.width);
        for r in 0..rows {
            let y = ((self.next_row + r) * scale).min(siz.height - 1) as usize;
            for c in 0..self.region.width {
                let x = ((self.region.left + c) * scale).min(siz.width - 1) as usize;
                let pixel = (y * siz.width as usize + x) * components;
                for (band, channel) in self.mapping.channels.iter().enumerate() {
                    let raw = self.codestream.samples[pixel + usize::from(channel.component)];
                    let index = layout.origin
                        + r as usize * stride
                        + c as usize * layout.pixel_gap
                        + layout.band_offsets[band];
                    out.set(index, self.mapping.map_sample(band, raw));
                }
            }
        }
        self.next_row += rows;
        Ok(Rect::new(
            self.region.left,
            self.next_row,
            self.region.width,
            self.region.bottom() - self.next_row,
        ))
    }

    fn finish(&mut self) -> Result<bool> {
        self.check_thread()?;
        Ok(!self.codestream.codec.faults.refuse_finish && self.next_row == self.region.bottom())
    }
}

pub struct RawCompressor {
    header: CodestreamHeader,
    target: StreamTarget,
    samples: Vec<u32>,
    rows: u32,
    pushes: usize,
    codec: RawCodec,
}

impl StripeCompressor for RawCompressor {
    fn start(&mut self, layer_sizes: &[u64], pool: &WorkerPool) -> Result<()> {
        let mut stats = self.codec.stats.lock();
        stats.layer_sizes = Some(layer_sizes.to_vec());
        stats.compressor_pools.push(pool.id());
        Ok(())
    }

    fn push_stripe(&mut self, stripe: &Stripe<'_>, pool: &WorkerPool) -> Result<bool> {
        self.pushes += 1;
        if self.codec.faults.error_on_push == Some(self.pushes) {
            raise("raw codec: injected encode fault")?;
        }
        let rows = stripe.heights[0];
        {
            let mut stats = self.codec.stats.lock();
            stats.stripe_heights.push(rows);
            stats.compressor_pools.push(pool.id());
            stats.stripe_signed.push(stripe.signed.is_some());
            stats.stripe_precisions = stripe.precisions.to_vec();
        }
        let expected = rows * self.header.width as usize * self.header.components.len();
        if stripe.samples.len() != expected {
            raise("raw codec: stripe size mismatch")?;
        }
        self.samples
            .extend((0..stripe.samples.len()).filter_map(|i| stripe.samples.get(i)));
        self.rows += rows as u32;
        Ok(self.rows < self.header.height)
    }

    fn finish(mut self, _pool: &WorkerPool) -> Result<StreamTarget> {
        let mut data = Vec::new();
        let components = self.header.components.len();
        for (i, sample) in self.samples.iter().enumerate() {
            let width = sample_width(self.header.components[i % components].precision);
            data.extend_from_slice(&sample.to_be_bytes()[4 - width..]);
        }
        let mut writer = J2kWriter::new();
        writer.write_main_header(&self.header);
        writer.write_sot(0, data.len() as u32);
        writer.write_sod();
        writer.write_data(&data);
        writer.write_eoc();
        self.target.write_bytes(&writer.into_inner())?;
        self.codec.stats.lock().finished += 1;
        Ok(self.target)
    }
}

/// Deterministic test pattern, band interleaved, masked to `bits`.
pub fn pattern(width: u32, height: u32, bands: usize, bits: u32) -> Vec<u32> {
    let mask = if bits >= 32 { u32::MAX } else { (1u32 << bits) - 1 };
    let mut out = Vec::with_capacity(width as usize * height as usize * bands);
    for y in 0..height {
        for x in 0..width {
            for b in 0..bands as u32 {
                let v = x.wrapping_mul(31) ^ y.wrapping_mul(17) ^ b.wrapping_mul(0x9E37_79B9);
                out.push(v.wrapping_mul(2_654_435_761) & mask);
            }
        }
    }
    out
}

pub fn buffer(format: BandFormat, values: &[u32]) -> PixelBuffer {
    match format {
        BandFormat::UChar => PixelBuffer::U8(values.iter().map(|&v| v as u8).collect()),
        BandFormat::UShort => PixelBuffer::U16(values.iter().map(|&v| v as u16).collect()),
        _ => PixelBuffer::U32(values.to_vec()),
    }
}

/// A complete JP2 file built directly from a layout and samples, bypassing
/// the saver. `precision` and `levels` go into the codestream header.
pub fn build_jp2(
    layout: &Jp2Layout,
    components: Vec<ComponentInfo>,
    levels: u8,
    tile: (u32, u32),
    samples: &[u32],
) -> Vec<u8> {
    let header = CodestreamHeader {
        width: layout.width,
        height: layout.height,
        tile_width: tile.0,
        tile_height: tile.1,
        components,
        levels,
        ..CodestreamHeader::default()
    };
    let mut data = Vec::new();
    let count = header.components.len();
    for (i, sample) in samples.iter().enumerate() {
        let width = sample_width(header.components[i % count].precision);
        data.extend_from_slice(&sample.to_be_bytes()[4 - width..]);
    }
    let mut writer = J2kWriter::new();
    writer.write_main_header(&header);
    writer.write_sot(0, data.len() as u32);
    writer.write_sod();
    writer.write_data(&data);
    writer.write_eoc();

    let mut file = jp2::write_header(layout);
    file.extend_from_slice(&writer.into_inner());
    file
}

/// A plain layout: sRGB for three or more components, greyscale otherwise.
pub fn layout(width: u32, height: u32, components: u16, precision: u8) -> Jp2Layout {
    let colour = if components >= 3 {
        ColourSpecification::enumerated(EnumCs::Srgb)
    } else {
        ColourSpecification::enumerated(EnumCs::Greyscale)
    };
    Jp2Layout {
        width,
        height,
        components,
        precision,
        signed: false,
        colour,
        resolution: None,
        channel_definitions: Vec::new(),
        high_throughput: false,
    }
}

/// Values of `buffer` as `u32`.
pub fn values(buffer: &PixelBuffer) -> Vec<u32> {
    (0..buffer.len()).filter_map(|i| buffer.get(i)).collect()
}

pub fn descriptor(width: u32, height: u32, bands: usize, format: BandFormat) -> ImageDescriptor {
    ImageDescriptor::new(width, height, bands, format)
}
