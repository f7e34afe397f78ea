//! Big-endian writer and J2K main-header emission.

use super::marker_code::{MARKER_START_BYTE, MarkerCode};
use super::parser::{CodestreamHeader, ProgressionOrder};

#[derive(Debug, Default)]
pub struct ByteWriter {
    destination: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.destination.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destination.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.destination
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.destination
    }

    pub fn write_byte(&mut self, value: u8) {
        self.destination.push(value);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.destination.push(value as u8);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.destination.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.destination.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.destination.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.destination.extend_from_slice(bytes);
    }

    pub fn write_marker(&mut self, marker: MarkerCode) {
        self.write_byte(MARKER_START_BYTE);
        self.write_byte(marker as u8);
    }

    /// Overwrite a previously written u32, for lengths known only afterwards.
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        self.destination[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    }
}

/// Writes the marker segments of a J2K codestream.
pub struct J2kWriter {
    writer: ByteWriter,
}

impl Default for J2kWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl J2kWriter {
    pub fn new() -> Self {
        Self {
            writer: ByteWriter::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.writer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writer.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.writer.into_inner()
    }

    pub fn write_soc(&mut self) {
        self.writer.write_marker(MarkerCode::StartOfCodestream);
    }

    pub fn write_eoc(&mut self) {
        self.writer.write_marker(MarkerCode::EndOfCodestream);
    }

    pub fn write_siz(&mut self, header: &CodestreamHeader) {
        self.writer.write_marker(MarkerCode::ImageAndTileSize);
        // Lsiz counts itself: 38 fixed bytes plus 3 per component.
        let length = 38 + 3 * header.components.len() as u16;
        self.writer.write_u16(length);
        let rsiz = if header.high_throughput {
            header.capabilities | 0x4000
        } else {
            header.capabilities
        };
        self.writer.write_u16(rsiz);
        self.writer.write_u32(header.x_origin + header.width);
        self.writer.write_u32(header.y_origin + header.height);
        self.writer.write_u32(header.x_origin);
        self.writer.write_u32(header.y_origin);
        self.writer.write_u32(header.tile_width);
        self.writer.write_u32(header.tile_height);
        self.writer.write_u32(header.tile_x_origin);
        self.writer.write_u32(header.tile_y_origin);
        self.writer.write_u16(header.components.len() as u16);
        for component in &header.components {
            let sign = if component.signed { 0x80 } else { 0 };
            self.writer.write_byte(sign | (component.precision - 1));
            self.writer.write_byte(component.dx);
            self.writer.write_byte(component.dy);
        }
    }

    pub fn write_cap(&mut self, high_throughput: bool) {
        if !high_throughput {
            return;
        }
        self.writer.write_marker(MarkerCode::Capability);
        self.writer.write_u16(8);
        // Pcap bit 15 (counting from the MSB, Part 15 set).
        self.writer.write_u32(0x0002_0000);
        self.writer.write_u16(0);
    }

    pub fn write_cod(&mut self, header: &CodestreamHeader) {
        self.writer.write_marker(MarkerCode::CodingStyleDefault);
        self.writer.write_u16(12);
        self.writer.write_byte(0); // Scod: default precincts, no SOP/EPH
        self.writer.write_byte(header.progression as u8);
        self.writer.write_u16(header.layers);
        self.writer.write_byte(u8::from(header.multi_component_transform));
        self.writer.write_byte(header.levels);
        self.writer.write_byte(header.code_block_width_exp - 2);
        self.writer.write_byte(header.code_block_height_exp - 2);
        let style = if header.high_throughput { 0x40 } else { 0 };
        self.writer.write_byte(style);
        self.writer.write_byte(u8::from(header.reversible));
    }

    /// Start of a single tile-part of `data_length` bytes after SOD.
    pub fn write_sot(&mut self, tile_index: u16, data_length: u32) {
        self.writer.write_marker(MarkerCode::StartOfTile);
        self.writer.write_u16(10);
        self.writer.write_u16(tile_index);
        // Psot spans from the SOT marker to the end of the tile-part data.
        self.writer.write_u32(12 + 2 + data_length);
        self.writer.write_byte(0);
        self.writer.write_byte(1);
    }

    pub fn write_sod(&mut self) {
        self.writer.write_marker(MarkerCode::StartOfData);
    }

    pub fn write_data(&mut self, bytes: &[u8]) {
        self.writer.write_bytes(bytes);
    }

    /// SOC, SIZ, CAP (if any) and COD.
    pub fn write_main_header(&mut self, header: &CodestreamHeader) {
        self.write_soc();
        self.write_siz(header);
        self.write_cap(header.high_throughput);
        self.write_cod(header);
    }
}

impl ProgressionOrder {
    pub fn name(self) -> &'static str {
        match self {
            Self::Lrcp => "LRCP",
            Self::Rlcp => "RLCP",
            Self::Rpcl => "RPCL",
            Self::Pcrl => "PCRL",
            Self::Cprl => "CPRL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg2000::parser::{ComponentInfo, parse_main_header};

    #[test]
    fn main_header_parses_back() {
        let header = CodestreamHeader {
            width: 300,
            height: 200,
            tile_width: 128,
            tile_height: 64,
            components: vec![ComponentInfo::unsigned(12); 3],
            layers: 4,
            levels: 3,
            reversible: true,
            high_throughput: true,
            ..CodestreamHeader::default()
        };
        let mut writer = J2kWriter::new();
        writer.write_main_header(&header);
        writer.write_sot(0, 0);
        writer.write_sod();
        writer.write_eoc();
        let bytes = writer.into_inner();

        let (parsed, end) = parse_main_header(&bytes).unwrap();
        assert_eq!(parsed.width, 300);
        assert_eq!(parsed.height, 200);
        assert_eq!(parsed.tile_width, 128);
        assert_eq!(parsed.components.len(), 3);
        assert_eq!(parsed.components[1].precision, 12);
        assert_eq!(parsed.layers, 4);
        assert_eq!(parsed.levels, 3);
        assert!(parsed.reversible);
        assert!(parsed.high_throughput);
        assert_eq!(&bytes[end..end + 2], &[0xFF, 0x90]);
    }
}
