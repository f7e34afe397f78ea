use crate::error::BridgeError;
use num_enum::TryFromPrimitive;

pub const MARKER_START_BYTE: u8 = 0xFF;

/// Main-header and tile-part markers of a J2K codestream (ISO/IEC 15444-1 Annex A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum MarkerCode {
    /// SOC: Start of codestream.
    StartOfCodestream = 0x4F,
    /// CAP: Extended capabilities (15444-15 high-throughput).
    Capability = 0x50,
    /// SIZ: Image and tile size.
    ImageAndTileSize = 0x51,
    /// COD: Coding style default.
    CodingStyleDefault = 0x52,
    /// COC: Coding style component.
    CodingStyleComponent = 0x53,
    /// TLM: Tile-part lengths.
    TilePartLengths = 0x55,
    /// PLM: Packet lengths, main header.
    PacketLengthsMain = 0x57,
    /// PLT: Packet lengths, tile-part header.
    PacketLengthsTile = 0x58,
    /// CPF: Corresponding profile.
    CorrespondingProfile = 0x59,
    /// QCD: Quantization default.
    QuantizationDefault = 0x5C,
    /// QCC: Quantization component.
    QuantizationComponent = 0x5D,
    /// RGN: Region of interest.
    RegionOfInterest = 0x5E,
    /// POC: Progression order change.
    ProgressionOrderChange = 0x5F,
    /// PPM: Packed packet headers, main header.
    PackedPacketHeadersMain = 0x60,
    /// PPT: Packed packet headers, tile-part header.
    PackedPacketHeadersTile = 0x61,
    /// CRG: Component registration.
    ComponentRegistration = 0x63,
    /// COM: Comment.
    Comment = 0x64,
    /// SOT: Start of tile-part.
    StartOfTile = 0x90,
    /// SOP: Start of packet.
    StartOfPacket = 0x91,
    /// EPH: End of packet header.
    EndOfPacketHeader = 0x92,
    /// SOD: Start of data.
    StartOfData = 0x93,
    /// EOC: End of codestream.
    EndOfCodestream = 0xD9,
}

impl MarkerCode {
    /// Markers that stand alone, without a length-prefixed segment.
    pub fn is_delimiter(self) -> bool {
        matches!(
            self,
            Self::StartOfCodestream
                | Self::StartOfData
                | Self::EndOfCodestream
                | Self::EndOfPacketHeader
        )
    }
}

/// Map an unknown marker byte to the crate error.
pub fn marker_from_byte(byte: u8) -> Result<MarkerCode, BridgeError> {
    MarkerCode::try_from(byte)
        .map_err(|_| BridgeError::invalid_data(format!("unknown marker 0xFF{byte:02X}")))
}
