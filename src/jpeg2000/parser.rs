//! JPEG 2000 codestream main-header parser.
//!
//! Reads SOC, SIZ, CAP and COD up to the first SOT. Everything else in the
//! main header is skipped by its segment length.

use super::marker_code::{MARKER_START_BYTE, MarkerCode};
use super::reader::ByteReader;
use crate::error::{BridgeError, Result};
use num_enum::TryFromPrimitive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive)]
#[repr(u8)]
pub enum ProgressionOrder {
    #[default]
    Lrcp = 0,
    Rlcp = 1,
    Rpcl = 2,
    Pcrl = 3,
    Cprl = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentInfo {
    pub precision: u8,
    pub signed: bool,
    pub dx: u8,
    pub dy: u8,
}

impl ComponentInfo {
    pub fn unsigned(precision: u8) -> Self {
        Self {
            precision,
            signed: false,
            dx: 1,
            dy: 1,
        }
    }
}

/// What the main header says about the image and its coding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodestreamHeader {
    /// Rsiz.
    pub capabilities: u16,
    pub width: u32,
    pub height: u32,
    pub x_origin: u32,
    pub y_origin: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tile_x_origin: u32,
    pub tile_y_origin: u32,
    pub components: Vec<ComponentInfo>,
    pub layers: u16,
    pub levels: u8,
    pub progression: ProgressionOrder,
    pub multi_component_transform: bool,
    /// log2 of the code-block width.
    pub code_block_width_exp: u8,
    /// log2 of the code-block height.
    pub code_block_height_exp: u8,
    pub reversible: bool,
    pub high_throughput: bool,
}

impl Default for CodestreamHeader {
    fn default() -> Self {
        Self {
            capabilities: 0,
            width: 0,
            height: 0,
            x_origin: 0,
            y_origin: 0,
            tile_width: 0,
            tile_height: 0,
            tile_x_origin: 0,
            tile_y_origin: 0,
            components: Vec::new(),
            layers: 1,
            levels: 5,
            progression: ProgressionOrder::Lrcp,
            multi_component_transform: false,
            code_block_width_exp: 6,
            code_block_height_exp: 6,
            reversible: false,
            high_throughput: false,
        }
    }
}

fn ceil_shift(value: u32, shift: u32) -> u32 {
    if shift >= 32 {
        return u32::from(value > 0);
    }
    let value = u64::from(value);
    (value.div_ceil(1u64 << shift)) as u32
}

impl CodestreamHeader {
    pub fn max_precision(&self) -> u8 {
        self.components
            .iter()
            .map(|c| c.precision)
            .max()
            .unwrap_or(0)
    }

    /// Image size after discarding `levels` resolution levels.
    pub fn reduced_size(&self, levels: u32) -> (u32, u32) {
        let x1 = self.x_origin + self.width;
        let y1 = self.y_origin + self.height;
        (
            ceil_shift(x1, levels) - ceil_shift(self.x_origin, levels),
            ceil_shift(y1, levels) - ceil_shift(self.y_origin, levels),
        )
    }

    /// Nominal tile size after discarding `levels` resolution levels.
    pub fn reduced_tile_size(&self, levels: u32) -> (u32, u32) {
        (
            ceil_shift(self.tile_width, levels).max(1),
            ceil_shift(self.tile_height, levels).max(1),
        )
    }

    pub fn tiles_across(&self) -> u32 {
        if self.tile_width == 0 {
            return 1;
        }
        (self.x_origin.saturating_add(self.width))
            .saturating_sub(self.tile_x_origin)
            .div_ceil(self.tile_width)
            .max(1)
    }

    pub fn tiles_down(&self) -> u32 {
        if self.tile_height == 0 {
            return 1;
        }
        (self.y_origin.saturating_add(self.height))
            .saturating_sub(self.tile_y_origin)
            .div_ceil(self.tile_height)
            .max(1)
    }
}

/// Parses marker segments from a byte slice into a [`CodestreamHeader`].
pub struct J2kParser<'a> {
    reader: ByteReader<'a>,
    header: CodestreamHeader,
    seen_siz: bool,
}

impl<'a> J2kParser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            reader: ByteReader::new(data),
            header: CodestreamHeader::default(),
            seen_siz: false,
        }
    }

    /// Parse up to the first SOT. Returns the header and the offset of the SOT marker.
    pub fn parse_main_header(mut self) -> Result<(CodestreamHeader, usize)> {
        let soc = self.reader.read_u16()?;
        if soc != 0xFF4F {
            return Err(BridgeError::invalid_data("codestream does not start with SOC"));
        }

        loop {
            let start = self.reader.position();
            if self.reader.read_u8()? != MARKER_START_BYTE {
                return Err(BridgeError::invalid_data(format!(
                    "expected a marker at offset {start}"
                )));
            }
            let code = self.reader.read_u8()?;
            match MarkerCode::try_from(code) {
                Ok(MarkerCode::StartOfTile) => {
                    if !self.seen_siz {
                        return Err(BridgeError::invalid_data("SOT before SIZ"));
                    }
                    return Ok((self.header, start));
                }
                Ok(MarkerCode::EndOfCodestream) => {
                    return Err(BridgeError::invalid_data("codestream has no tile-parts"));
                }
                Ok(MarkerCode::ImageAndTileSize) => self.parse_siz()?,
                Ok(MarkerCode::CodingStyleDefault) => self.parse_cod()?,
                Ok(MarkerCode::Capability) => self.parse_cap()?,
                _ => self.skip_segment()?,
            }
        }
    }

    fn segment(&mut self) -> Result<ByteReader<'a>> {
        let length = self.reader.read_u16()?;
        if length < 2 {
            return Err(BridgeError::invalid_data("marker segment length below 2"));
        }
        let body = self.reader.read_bytes(usize::from(length) - 2)?;
        Ok(ByteReader::new(body))
    }

    fn skip_segment(&mut self) -> Result<()> {
        self.segment().map(|_| ())
    }

    fn parse_siz(&mut self) -> Result<()> {
        let mut siz = self.segment()?;
        let header = &mut self.header;
        header.capabilities = siz.read_u16()?;
        let x1 = siz.read_u32()?;
        let y1 = siz.read_u32()?;
        header.x_origin = siz.read_u32()?;
        header.y_origin = siz.read_u32()?;
        if x1 <= header.x_origin || y1 <= header.y_origin {
            return Err(BridgeError::invalid_data("SIZ describes an empty image"));
        }
        header.width = x1 - header.x_origin;
        header.height = y1 - header.y_origin;
        header.tile_width = siz.read_u32()?;
        header.tile_height = siz.read_u32()?;
        header.tile_x_origin = siz.read_u32()?;
        header.tile_y_origin = siz.read_u32()?;
        if header.tile_width == 0 || header.tile_height == 0 {
            return Err(BridgeError::invalid_data("SIZ tile size is zero"));
        }
        // The first tile must start at or before the image and reach into it.
        let reaches = |tile_origin: u32, tile_size: u32, origin: u32| {
            tile_origin <= origin && u64::from(tile_origin) + u64::from(tile_size) > u64::from(origin)
        };
        if !reaches(header.tile_x_origin, header.tile_width, header.x_origin)
            || !reaches(header.tile_y_origin, header.tile_height, header.y_origin)
        {
            return Err(BridgeError::invalid_data("SIZ tile origin lies outside the image"));
        }

        let count = siz.read_u16()?;
        if count == 0 {
            return Err(BridgeError::invalid_data("SIZ has no components"));
        }
        header.components.clear();
        for _ in 0..count {
            let ssiz = siz.read_u8()?;
            let dx = siz.read_u8()?;
            let dy = siz.read_u8()?;
            if dx == 0 || dy == 0 {
                return Err(BridgeError::invalid_data("component sub-sampling is zero"));
            }
            header.components.push(ComponentInfo {
                precision: (ssiz & 0x7F) + 1,
                signed: ssiz & 0x80 != 0,
                dx,
                dy,
            });
        }
        self.seen_siz = true;
        Ok(())
    }

    fn parse_cod(&mut self) -> Result<()> {
        let mut cod = self.segment()?;
        let _scod = cod.read_u8()?;
        let progression = cod.read_u8()?;
        self.header.progression = ProgressionOrder::try_from(progression).map_err(|_| {
            BridgeError::invalid_data(format!("unknown progression order {progression}"))
        })?;
        self.header.layers = cod.read_u16()?;
        self.header.multi_component_transform = cod.read_u8()? != 0;
        self.header.levels = cod.read_u8()?;
        self.header.code_block_width_exp = cod.read_u8()? + 2;
        self.header.code_block_height_exp = cod.read_u8()? + 2;
        let style = cod.read_u8()?;
        if style & 0x40 != 0 {
            self.header.high_throughput = true;
        }
        self.header.reversible = cod.read_u8()? == 1;
        // Precinct sizes, if any, are not needed.
        Ok(())
    }

    fn parse_cap(&mut self) -> Result<()> {
        let mut cap = self.segment()?;
        let pcap = cap.read_u32()?;
        if pcap & 0x0002_0000 != 0 {
            self.header.high_throughput = true;
        }
        Ok(())
    }
}

pub fn parse_main_header(data: &[u8]) -> Result<(CodestreamHeader, usize)> {
    J2kParser::new(data).parse_main_header()
}
