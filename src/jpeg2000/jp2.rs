//! JP2 box structure (ISO/IEC 15444-1 Annex I).
//!
//! The reader walks top-level boxes from a seekable stream, parses the
//! `jp2h` superbox in memory and stops at the first `jp2c`, recording where
//! the codestream lives without reading it. The writer emits everything up
//! to and including the `jp2c` box header.

use super::reader::ByteReader;
use super::writer::ByteWriter;
use crate::constants::{J2K_CODESTREAM_MAGIC, JP2_MAGIC, JP2_RFC3745_MAGIC};
use crate::error::{BridgeError, Result};
use num_enum::TryFromPrimitive;
use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use tracing::{debug, trace};

// Superbox contents are read into memory; anything larger is not a header.
const MAX_HEADER_BOX: u64 = 64 << 20;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxType(pub [u8; 4]);

impl BoxType {
    pub const SIGNATURE: Self = Self(*b"jP  ");
    pub const FILE_TYPE: Self = Self(*b"ftyp");
    pub const HEADER: Self = Self(*b"jp2h");
    pub const IMAGE_HEADER: Self = Self(*b"ihdr");
    pub const BITS_PER_COMPONENT: Self = Self(*b"bpcc");
    pub const COLOUR: Self = Self(*b"colr");
    pub const PALETTE: Self = Self(*b"pclr");
    pub const COMPONENT_MAPPING: Self = Self(*b"cmap");
    pub const CHANNEL_DEFINITION: Self = Self(*b"cdef");
    pub const RESOLUTION: Self = Self(*b"res ");
    pub const CAPTURE_RESOLUTION: Self = Self(*b"resc");
    pub const DISPLAY_RESOLUTION: Self = Self(*b"resd");
    pub const CODESTREAM: Self = Self(*b"jp2c");
}

impl fmt::Debug for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.0))
    }
}

/// Location of one box. `content_length` is `None` for a box that runs to
/// the end of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub box_type: BoxType,
    pub offset: u64,
    pub header_length: u64,
    pub content_length: Option<u64>,
}

impl BoxHeader {
    pub fn content_offset(&self) -> u64 {
        self.offset + self.header_length
    }
}

/// JP2 enumerated colour spaces (EnumCS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u32)]
pub enum EnumCs {
    Bilevel = 0,
    YCbCr1 = 1,
    YCbCr2 = 3,
    YCbCr3 = 4,
    PhotoYcc = 9,
    Cmy = 11,
    Cmyk = 12,
    Ycck = 13,
    CieLab = 14,
    Bilevel2 = 15,
    Srgb = 16,
    Greyscale = 17,
    Sycc = 18,
    CieJab = 19,
    EsRgb = 20,
    RommRgb = 21,
    YPbPr60 = 22,
    YPbPr50 = 23,
    EsYcc = 24,
}

impl EnumCs {
    pub fn num_colours(self) -> usize {
        match self {
            Self::Bilevel | Self::Bilevel2 | Self::Greyscale => 1,
            Self::Cmyk | Self::Ycck => 4,
            _ => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IccClass {
    Rgb,
    Gray,
    Cmyk,
    Other,
}

#[derive(Clone, PartialEq, Eq)]
pub struct IccProfile {
    pub bytes: Vec<u8>,
}

impl fmt::Debug for IccProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IccProfile")
            .field("len", &self.bytes.len())
            .field("class", &self.class())
            .finish()
    }
}

impl IccProfile {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Colour space signature at bytes 16..20 of the profile header.
    pub fn class(&self) -> IccClass {
        match self.bytes.get(16..20) {
            Some(b"RGB ") => IccClass::Rgb,
            Some(b"GRAY") => IccClass::Gray,
            Some(b"CMYK") => IccClass::Cmyk,
            _ => IccClass::Other,
        }
    }

    pub fn num_colours(&self) -> Option<usize> {
        match self.class() {
            IccClass::Rgb => Some(3),
            IccClass::Gray => Some(1),
            IccClass::Cmyk => Some(4),
            IccClass::Other => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColourMethod {
    Enumerated(EnumCs),
    /// An EnumCS value this crate does not know.
    UnknownEnumerated(u32),
    Icc(IccProfile),
    Vendor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColourSpecification {
    pub method: ColourMethod,
    pub precedence: i8,
    pub approximation: u8,
}

impl ColourSpecification {
    pub fn enumerated(space: EnumCs) -> Self {
        Self {
            method: ColourMethod::Enumerated(space),
            precedence: 0,
            approximation: 0,
        }
    }

    pub fn icc(bytes: Vec<u8>) -> Self {
        Self {
            method: ColourMethod::Icc(IccProfile::new(bytes)),
            precedence: 0,
            approximation: 0,
        }
    }

    pub fn icc_profile(&self) -> Option<&[u8]> {
        match &self.method {
            ColourMethod::Icc(profile) => Some(&profile.bytes),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageHeader {
    pub height: u32,
    pub width: u32,
    pub components: u16,
    /// Raw BPC byte; 255 means per-component depths are in `bpcc`.
    pub bits_per_component: u8,
    pub compression: u8,
    pub colourspace_unknown: bool,
    pub intellectual_property: bool,
}

/// One `resc`/`resd` box: grid resolution as N/D * 10^E grid points per metre.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolutionBox {
    pub vr_n: u16,
    pub vr_d: u16,
    pub hr_n: u16,
    pub hr_d: u16,
    pub vr_e: i8,
    pub hr_e: i8,
}

fn ratio(n: u16, d: u16, e: i8) -> f64 {
    if d == 0 {
        return 0.0;
    }
    f64::from(n) / f64::from(d) * 10f64.powi(i32::from(e))
}

impl ResolutionBox {
    pub fn vertical(&self) -> f64 {
        ratio(self.vr_n, self.vr_d, self.vr_e)
    }

    pub fn horizontal(&self) -> f64 {
        ratio(self.hr_n, self.hr_d, self.hr_e)
    }

    /// Horizontal over vertical, 1.0 when undefined.
    pub fn aspect_ratio(&self) -> f64 {
        let v = self.vertical();
        let h = self.horizontal();
        if v > 0.0 && h > 0.0 { h / v } else { 1.0 }
    }

    /// Encode pixels-per-metre values with as many significant digits as fit.
    pub fn from_pixels_per_metre(horizontal: f64, vertical: f64) -> Self {
        let (hr_n, hr_e) = encode_resolution(horizontal);
        let (vr_n, vr_e) = encode_resolution(vertical);
        Self {
            vr_n,
            vr_d: 1,
            hr_n,
            hr_d: 1,
            vr_e,
            hr_e,
        }
    }

    fn parse(content: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(content);
        Ok(Self {
            vr_n: reader.read_u16()?,
            vr_d: reader.read_u16()?,
            hr_n: reader.read_u16()?,
            hr_d: reader.read_u16()?,
            vr_e: reader.read_i8()?,
            hr_e: reader.read_i8()?,
        })
    }

    fn write(&self, writer: &mut ByteWriter) {
        writer.write_u16(self.vr_n);
        writer.write_u16(self.vr_d);
        writer.write_u16(self.hr_n);
        writer.write_u16(self.hr_d);
        writer.write_i8(self.vr_e);
        writer.write_i8(self.hr_e);
    }
}

fn encode_resolution(value: f64) -> (u16, i8) {
    if !value.is_finite() || value <= 0.0 {
        return (0, 0);
    }
    let mut mantissa = value;
    let mut exponent: i8 = 0;
    while mantissa >= 65535.5 && exponent < i8::MAX {
        mantissa /= 10.0;
        exponent += 1;
    }
    while mantissa < 6553.5 && exponent > i8::MIN {
        mantissa *= 10.0;
        exponent -= 1;
    }
    (mantissa.round().min(65535.0) as u16, exponent)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Resolution {
    pub capture: Option<ResolutionBox>,
    pub display: Option<ResolutionBox>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaletteColumn {
    pub precision: u8,
    pub signed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    pub columns: Vec<PaletteColumn>,
    /// `values[column][entry]`.
    pub values: Vec<Vec<u32>>,
}

impl Palette {
    pub fn num_entries(&self) -> usize {
        self.values.first().map_or(0, Vec::len)
    }

    fn parse(content: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(content);
        let entries = reader.read_u16()?;
        let count = reader.read_u8()?;
        if entries == 0 || entries > 1024 || count == 0 {
            return Err(BridgeError::container("malformed palette box"));
        }
        let mut columns = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let b = reader.read_u8()?;
            columns.push(PaletteColumn {
                precision: (b & 0x7F) + 1,
                signed: b & 0x80 != 0,
            });
        }
        let mut values = vec![Vec::with_capacity(usize::from(entries)); usize::from(count)];
        for _ in 0..entries {
            for (column, out) in columns.iter().zip(values.iter_mut()) {
                let width = usize::from(column.precision).div_ceil(8);
                out.push(reader.read_uint(width)?);
            }
        }
        Ok(Self { columns, values })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentMapping {
    pub component: u16,
    /// 0 direct use, 1 palette mapping.
    pub mapping_type: u8,
    pub palette_column: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Colour,
    Opacity,
    PremultipliedOpacity,
    Unspecified(u16),
}

impl ChannelKind {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::Colour,
            1 => Self::Opacity,
            2 => Self::PremultipliedOpacity,
            other => Self::Unspecified(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Self::Colour => 0,
            Self::Opacity => 1,
            Self::PremultipliedOpacity => 2,
            Self::Unspecified(other) => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelDefinition {
    pub channel: u16,
    pub kind: ChannelKind,
    /// 0 is the whole image, 1.. a colour, 65535 none.
    pub association: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodestreamBox {
    pub offset: u64,
    pub length: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileType {
    pub brand: [u8; 4],
    pub minor_version: u32,
    pub compatibility: Vec<[u8; 4]>,
}

/// Everything the first compositing layer of a JP2 file says about itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Jp2Header {
    pub legacy_signature: bool,
    pub file_type: Option<FileType>,
    pub image_header: ImageHeader,
    pub bits_per_component: Option<Vec<u8>>,
    pub colours: Vec<ColourSpecification>,
    pub resolution: Resolution,
    pub palette: Option<Palette>,
    pub component_mapping: Option<Vec<ComponentMapping>>,
    pub channel_definitions: Option<Vec<ChannelDefinition>>,
    pub codestream: CodestreamBox,
}

impl Jp2Header {
    /// The colour specification a JP2 reader uses: the first one.
    pub fn colour(&self) -> Option<&ColourSpecification> {
        self.colours.first()
    }

    /// Declared precision of codestream component `index`, if known.
    pub fn component_precision(&self, index: usize) -> Option<u8> {
        if self.image_header.bits_per_component != 255 {
            return Some((self.image_header.bits_per_component & 0x7F) + 1);
        }
        self.bits_per_component
            .as_ref()
            .and_then(|b| b.get(index))
            .map(|b| (b & 0x7F) + 1)
    }
}

/// Box-by-box reader over a seekable stream.
pub struct BoxReader<R> {
    inner: R,
    position: u64,
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

impl<R: Read + Seek> BoxReader<R> {
    pub fn new(inner: R, start: u64) -> Self {
        Self {
            inner,
            position: start,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// The next box header, or `None` at a clean end of stream.
    pub fn next_box(&mut self) -> Result<Option<BoxHeader>> {
        self.inner.seek(SeekFrom::Start(self.position))?;
        let mut head = [0u8; 8];
        match read_full(&mut self.inner, &mut head)? {
            0 => return Ok(None),
            8 => {}
            n => {
                return Err(BridgeError::container(format!(
                    "truncated box header at offset {} ({n} bytes)",
                    self.position
                )));
            }
        }
        let offset = self.position;
        let length = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
        let box_type = BoxType([head[4], head[5], head[6], head[7]]);
        let (header_length, content_length) = match length {
            0 => (8, None),
            1 => {
                let mut xl = [0u8; 8];
                if read_full(&mut self.inner, &mut xl)? != 8 {
                    return Err(BridgeError::container("truncated XL box length"));
                }
                let total = u64::from_be_bytes(xl);
                if total < 16 {
                    return Err(BridgeError::container("XL box shorter than its header"));
                }
                (16, Some(total - 16))
            }
            2..=7 => {
                return Err(BridgeError::container(format!(
                    "box {box_type:?} length {length} shorter than its header"
                )));
            }
            n => (8, Some(u64::from(n) - 8)),
        };
        let header = BoxHeader {
            box_type,
            offset,
            header_length,
            content_length,
        };
        trace!(?box_type, offset, ?content_length, "box");
        self.position = match content_length {
            Some(len) => header
                .content_offset()
                .checked_add(len)
                .ok_or_else(|| BridgeError::container("box length overflows"))?,
            None => u64::MAX,
        };
        Ok(Some(header))
    }

    pub fn read_content(&mut self, header: &BoxHeader) -> Result<Vec<u8>> {
        let length = header.content_length.ok_or_else(|| {
            BridgeError::container(format!("box {:?} has no length", header.box_type))
        })?;
        if length > MAX_HEADER_BOX {
            return Err(BridgeError::container(format!(
                "box {:?} is too large ({length} bytes)",
                header.box_type
            )));
        }
        self.inner.seek(SeekFrom::Start(header.content_offset()))?;
        let mut content = vec![0u8; length as usize];
        if read_full(&mut self.inner, &mut content)? != content.len() {
            return Err(BridgeError::container(format!(
                "truncated {:?} box",
                header.box_type
            )));
        }
        Ok(content)
    }
}

/// Iterate the sub-boxes of an in-memory superbox.
fn sub_boxes(content: &[u8]) -> Result<Vec<(BoxType, &[u8])>> {
    let mut reader = ByteReader::new(content);
    let mut boxes = Vec::new();
    while !reader.is_empty() {
        let length = reader.read_u32()? as u64;
        let mut box_type = [0u8; 4];
        box_type.copy_from_slice(reader.read_bytes(4)?);
        let body_length = match length {
            0 => reader.remaining() as u64,
            1 => reader
                .read_u64()?
                .checked_sub(16)
                .ok_or_else(|| BridgeError::container("XL sub-box shorter than its header"))?,
            2..=7 => return Err(BridgeError::container("sub-box shorter than its header")),
            n => n - 8,
        };
        let body = reader
            .read_bytes(usize::try_from(body_length).map_err(|_| {
                BridgeError::container("sub-box length overflows")
            })?)
            .map_err(|_| BridgeError::container("sub-box runs past its superbox"))?;
        boxes.push((BoxType(box_type), body));
    }
    Ok(boxes)
}

fn parse_ftyp(content: &[u8]) -> Result<FileType> {
    let mut reader = ByteReader::new(content);
    let mut brand = [0u8; 4];
    brand.copy_from_slice(reader.read_bytes(4)?);
    let minor_version = reader.read_u32()?;
    let mut compatibility = Vec::new();
    while reader.remaining() >= 4 {
        let mut entry = [0u8; 4];
        entry.copy_from_slice(reader.read_bytes(4)?);
        compatibility.push(entry);
    }
    Ok(FileType {
        brand,
        minor_version,
        compatibility,
    })
}

fn parse_ihdr(content: &[u8]) -> Result<ImageHeader> {
    let mut reader = ByteReader::new(content);
    let header = ImageHeader {
        height: reader.read_u32()?,
        width: reader.read_u32()?,
        components: reader.read_u16()?,
        bits_per_component: reader.read_u8()?,
        compression: reader.read_u8()?,
        colourspace_unknown: reader.read_u8()? != 0,
        intellectual_property: reader.read_u8()? != 0,
    };
    if header.width == 0 || header.height == 0 || header.components == 0 {
        return Err(BridgeError::container("image header describes an empty image"));
    }
    Ok(header)
}

fn parse_colr(content: &[u8]) -> Result<ColourSpecification> {
    let mut reader = ByteReader::new(content);
    let method = reader.read_u8()?;
    let precedence = reader.read_i8()?;
    let approximation = reader.read_u8()?;
    let method = match method {
        1 => {
            let value = reader.read_u32()?;
            match EnumCs::try_from(value) {
                Ok(space) => ColourMethod::Enumerated(space),
                Err(_) => ColourMethod::UnknownEnumerated(value),
            }
        }
        2 | 3 => ColourMethod::Icc(IccProfile::new(reader.remaining_data().to_vec())),
        _ => ColourMethod::Vendor,
    };
    Ok(ColourSpecification {
        method,
        precedence,
        approximation,
    })
}

fn parse_cmap(content: &[u8]) -> Result<Vec<ComponentMapping>> {
    let mut reader = ByteReader::new(content);
    let mut mappings = Vec::new();
    while reader.remaining() >= 4 {
        mappings.push(ComponentMapping {
            component: reader.read_u16()?,
            mapping_type: reader.read_u8()?,
            palette_column: reader.read_u8()?,
        });
    }
    Ok(mappings)
}

fn parse_cdef(content: &[u8]) -> Result<Vec<ChannelDefinition>> {
    let mut reader = ByteReader::new(content);
    let count = reader.read_u16()?;
    let mut definitions = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        definitions.push(ChannelDefinition {
            channel: reader.read_u16()?,
            kind: ChannelKind::from_u16(reader.read_u16()?),
            association: reader.read_u16()?,
        });
    }
    Ok(definitions)
}

fn parse_res(content: &[u8]) -> Result<Resolution> {
    let mut resolution = Resolution::default();
    for (box_type, body) in sub_boxes(content)? {
        match box_type {
            BoxType::CAPTURE_RESOLUTION => resolution.capture = Some(ResolutionBox::parse(body)?),
            BoxType::DISPLAY_RESOLUTION => resolution.display = Some(ResolutionBox::parse(body)?),
            _ => {}
        }
    }
    Ok(resolution)
}

struct HeaderBoxes {
    image_header: ImageHeader,
    bits_per_component: Option<Vec<u8>>,
    colours: Vec<ColourSpecification>,
    resolution: Resolution,
    palette: Option<Palette>,
    component_mapping: Option<Vec<ComponentMapping>>,
    channel_definitions: Option<Vec<ChannelDefinition>>,
}

fn parse_jp2h(content: &[u8]) -> Result<HeaderBoxes> {
    let mut image_header = None;
    let mut header = HeaderBoxes {
        image_header: ImageHeader::default(),
        bits_per_component: None,
        colours: Vec::new(),
        resolution: Resolution::default(),
        palette: None,
        component_mapping: None,
        channel_definitions: None,
    };
    for (box_type, body) in sub_boxes(content)? {
        match box_type {
            BoxType::IMAGE_HEADER => image_header = Some(parse_ihdr(body)?),
            BoxType::BITS_PER_COMPONENT => header.bits_per_component = Some(body.to_vec()),
            BoxType::COLOUR => header.colours.push(parse_colr(body)?),
            BoxType::PALETTE => header.palette = Some(Palette::parse(body)?),
            BoxType::COMPONENT_MAPPING => header.component_mapping = Some(parse_cmap(body)?),
            BoxType::CHANNEL_DEFINITION => header.channel_definitions = Some(parse_cdef(body)?),
            BoxType::RESOLUTION => header.resolution = parse_res(body)?,
            other => debug!(box_type = ?other, "ignoring header sub-box"),
        }
    }
    header.image_header =
        image_header.ok_or_else(|| BridgeError::container("header box has no image header"))?;
    Ok(header)
}

/// Read the JP2 header of `stream` up to the codestream box.
pub fn read_header<R: Read + Seek>(mut stream: R) -> Result<Jp2Header> {
    stream.seek(SeekFrom::Start(0))?;
    let mut magic = [0u8; 12];
    let got = read_full(&mut stream, &mut magic)?;
    let (start, legacy_signature) = if got == 12 && magic == JP2_RFC3745_MAGIC {
        (12, false)
    } else if got >= 4 && magic[..4] == JP2_MAGIC {
        (4, true)
    } else if got >= 4 && magic[..4] == J2K_CODESTREAM_MAGIC {
        return Err(BridgeError::UnsupportedRawCodestream);
    } else {
        return Err(BridgeError::container("missing JP2 signature"));
    };

    let mut boxes = BoxReader::new(stream, start);
    let mut file_type = None;
    let mut header_boxes = None;
    while let Some(header) = boxes.next_box()? {
        match header.box_type {
            BoxType::FILE_TYPE => file_type = Some(parse_ftyp(&boxes.read_content(&header)?)?),
            BoxType::HEADER => header_boxes = Some(parse_jp2h(&boxes.read_content(&header)?)?),
            BoxType::CODESTREAM => {
                let h = header_boxes
                    .ok_or_else(|| BridgeError::container("codestream box before header box"))?;
                return Ok(Jp2Header {
                    legacy_signature,
                    file_type,
                    image_header: h.image_header,
                    bits_per_component: h.bits_per_component,
                    colours: h.colours,
                    resolution: h.resolution,
                    palette: h.palette,
                    component_mapping: h.component_mapping,
                    channel_definitions: h.channel_definitions,
                    codestream: CodestreamBox {
                        offset: header.content_offset(),
                        length: header.content_length,
                    },
                });
            }
            other => {
                if header.content_length.is_none() {
                    break;
                }
                trace!(box_type = ?other, "skipping top-level box");
            }
        }
    }
    Err(BridgeError::container("no codestream box found"))
}

/// What the header writer needs to describe a new image.
#[derive(Debug, Clone, PartialEq)]
pub struct Jp2Layout {
    pub width: u32,
    pub height: u32,
    pub components: u16,
    pub precision: u8,
    pub signed: bool,
    pub colour: ColourSpecification,
    pub resolution: Option<ResolutionBox>,
    pub channel_definitions: Vec<ChannelDefinition>,
    pub high_throughput: bool,
}

fn write_box(writer: &mut ByteWriter, box_type: BoxType, content: &[u8]) {
    let total = content.len() as u64 + 8;
    if let Ok(length) = u32::try_from(total) {
        writer.write_u32(length);
        writer.write_bytes(&box_type.0);
    } else {
        writer.write_u32(1);
        writer.write_bytes(&box_type.0);
        writer.write_u64(total + 8);
    }
    writer.write_bytes(content);
}

/// Signature, file type and header boxes, then an open-ended `jp2c` box
/// header the codestream follows.
pub fn write_header(layout: &Jp2Layout) -> Vec<u8> {
    let mut out = ByteWriter::new();
    out.write_bytes(&JP2_RFC3745_MAGIC);

    let brand = if layout.high_throughput {
        *b"jph "
    } else {
        *b"jp2 "
    };
    let mut ftyp = ByteWriter::new();
    ftyp.write_bytes(&brand);
    ftyp.write_u32(0);
    ftyp.write_bytes(&brand);
    write_box(&mut out, BoxType::FILE_TYPE, ftyp.as_slice());

    let mut jp2h = ByteWriter::new();
    let mut ihdr = ByteWriter::new();
    ihdr.write_u32(layout.height);
    ihdr.write_u32(layout.width);
    ihdr.write_u16(layout.components);
    let sign = if layout.signed { 0x80 } else { 0 };
    ihdr.write_byte(sign | (layout.precision - 1));
    ihdr.write_byte(7); // C: JPEG 2000
    ihdr.write_byte(0);
    ihdr.write_byte(0);
    write_box(&mut jp2h, BoxType::IMAGE_HEADER, ihdr.as_slice());

    let mut colr = ByteWriter::new();
    match &layout.colour.method {
        ColourMethod::Enumerated(space) => {
            colr.write_byte(1);
            colr.write_i8(layout.colour.precedence);
            colr.write_byte(layout.colour.approximation);
            colr.write_u32(*space as u32);
        }
        ColourMethod::UnknownEnumerated(value) => {
            colr.write_byte(1);
            colr.write_i8(layout.colour.precedence);
            colr.write_byte(layout.colour.approximation);
            colr.write_u32(*value);
        }
        ColourMethod::Icc(profile) => {
            // Restricted ICC covers monochrome and three-component input profiles.
            let method = match profile.class() {
                IccClass::Rgb | IccClass::Gray => 2,
                _ => 3,
            };
            colr.write_byte(method);
            colr.write_i8(layout.colour.precedence);
            colr.write_byte(1);
            colr.write_bytes(&profile.bytes);
        }
        ColourMethod::Vendor => {
            colr.write_byte(4);
            colr.write_i8(layout.colour.precedence);
            colr.write_byte(layout.colour.approximation);
        }
    }
    write_box(&mut jp2h, BoxType::COLOUR, colr.as_slice());

    if !layout.channel_definitions.is_empty() {
        let mut cdef = ByteWriter::new();
        cdef.write_u16(layout.channel_definitions.len() as u16);
        for definition in &layout.channel_definitions {
            cdef.write_u16(definition.channel);
            cdef.write_u16(definition.kind.to_u16());
            cdef.write_u16(definition.association);
        }
        write_box(&mut jp2h, BoxType::CHANNEL_DEFINITION, cdef.as_slice());
    }

    if let Some(resolution) = &layout.resolution {
        let mut resc = ByteWriter::new();
        resolution.write(&mut resc);
        let mut res = ByteWriter::new();
        write_box(&mut res, BoxType::CAPTURE_RESOLUTION, resc.as_slice());
        write_box(&mut jp2h, BoxType::RESOLUTION, res.as_slice());
    }

    write_box(&mut out, BoxType::HEADER, jp2h.as_slice());

    // Length 0: the codestream runs to the end of the file.
    out.write_u32(0);
    out.write_bytes(&BoxType::CODESTREAM.0);
    out.into_inner()
}
