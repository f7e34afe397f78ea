//! Rectangles, band formats and the sample buffers handed across the codec seam.

use crate::error::{BridgeError, Result};
use std::borrow::Cow;

/// A pixel rectangle in page-reduced coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.top + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// True if `other` lies entirely inside `self`.
    pub fn contains(&self, other: &Rect) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn intersect(&self, other: &Rect) -> Rect {
        let left = self.left.max(other.left);
        let top = self.top.max(other.top);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return Rect::new(left, top, 0, 0);
        }
        Rect::new(left, top, right - left, bottom - top)
    }
}

/// Host band formats. Only the unsigned integer formats can be loaded; the
/// rest exist so a save request can be rejected with a precise message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BandFormat {
    UChar,
    Char,
    UShort,
    Short,
    UInt,
    Int,
    Float,
    Complex,
    Double,
    DpComplex,
}

impl BandFormat {
    pub fn bytes(self) -> usize {
        match self {
            Self::UChar | Self::Char => 1,
            Self::UShort | Self::Short => 2,
            Self::UInt | Self::Int | Self::Float => 4,
            Self::Complex | Self::Double => 8,
            Self::DpComplex => 16,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::UChar | Self::Char | Self::UShort | Self::Short | Self::UInt | Self::Int
        )
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Self::Char | Self::Short | Self::Int)
    }

    /// Smallest unsigned format holding `bits` bits per sample.
    pub fn for_bits(bits: u32) -> Result<Self> {
        match bits {
            1..=8 => Ok(Self::UChar),
            9..=16 => Ok(Self::UShort),
            17..=32 => Ok(Self::UInt),
            _ => Err(BridgeError::UnsupportedBitDepth { bits }),
        }
    }

    pub fn name(self) -> Cow<'static, str> {
        Cow::Borrowed(match self {
            Self::UChar => "uchar",
            Self::Char => "char",
            Self::UShort => "ushort",
            Self::Short => "short",
            Self::UInt => "uint",
            Self::Int => "int",
            Self::Float => "float",
            Self::Complex => "complex",
            Self::Double => "double",
            Self::DpComplex => "dpcomplex",
        })
    }
}

/// Owned, band-interleaved pixel data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelBuffer {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl PixelBuffer {
    /// A zeroed buffer of `len` samples in `format`.
    pub fn zeroed(format: BandFormat, len: usize) -> Result<Self> {
        match format {
            BandFormat::UChar => Ok(Self::U8(vec![0; len])),
            BandFormat::UShort => Ok(Self::U16(vec![0; len])),
            BandFormat::UInt => Ok(Self::U32(vec![0; len])),
            other => Err(BridgeError::UnsupportedFormat {
                format: other.name(),
            }),
        }
    }

    pub fn format(&self) -> BandFormat {
        match self {
            Self::U8(_) => BandFormat::UChar,
            Self::U16(_) => BandFormat::UShort,
            Self::U32(_) => BandFormat::UInt,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::U16(v) => v.len(),
            Self::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<u32> {
        match self {
            Self::U8(v) => v.get(index).map(|&s| u32::from(s)),
            Self::U16(v) => v.get(index).map(|&s| u32::from(s)),
            Self::U32(v) => v.get(index).copied(),
        }
    }

    /// Copy the packed samples of `tile` from `src` into this buffer, whose
    /// rows are `width` pixels wide.
    pub fn paste(&mut self, width: u32, bands: usize, tile: Rect, src: &PixelBuffer) -> Result<()> {
        fn rows<T: Copy>(dst: &mut [T], src: &[T], width: usize, bands: usize, tile: Rect) {
            let row = tile.width as usize * bands;
            for (y, chunk) in src.chunks_exact(row).take(tile.height as usize).enumerate() {
                let start = ((tile.top as usize + y) * width + tile.left as usize) * bands;
                dst[start..start + row].copy_from_slice(chunk);
            }
        }

        let needed = tile.area() as usize * bands;
        let end = (tile.bottom() as usize * width as usize) * bands;
        if tile.right() > width || src.len() < needed || self.len() < end {
            return Err(BridgeError::invalid_argument("tile does not fit the buffer"));
        }
        let width = width as usize;
        match (self, src) {
            (Self::U8(d), Self::U8(s)) => rows(d, s, width, bands, tile),
            (Self::U16(d), Self::U16(s)) => rows(d, s, width, bands, tile),
            (Self::U32(d), Self::U32(s)) => rows(d, s, width, bands, tile),
            _ => return Err(BridgeError::invalid_argument("tile format differs")),
        }
        Ok(())
    }

    pub fn as_samples(&self) -> Samples<'_> {
        match self {
            Self::U8(v) => Samples::U8(v),
            Self::U16(v) => Samples::U16(v),
            Self::U32(v) => Samples::U32(v),
        }
    }

    pub fn as_samples_mut(&mut self) -> SamplesMut<'_> {
        match self {
            Self::U8(v) => SamplesMut::U8(v),
            Self::U16(v) => SamplesMut::U16(v),
            Self::U32(v) => SamplesMut::U32(v),
        }
    }
}

/// Borrowed samples pushed into a stripe compressor.
#[derive(Debug, Clone, Copy)]
pub enum Samples<'a> {
    U8(&'a [u8]),
    U16(&'a [u16]),
    U32(&'a [u32]),
}

impl<'a> Samples<'a> {
    pub fn format(&self) -> BandFormat {
        match self {
            Self::U8(_) => BandFormat::UChar,
            Self::U16(_) => BandFormat::UShort,
            Self::U32(_) => BandFormat::UInt,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::U8(s) => s.len(),
            Self::U16(s) => s.len(),
            Self::U32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<u32> {
        match self {
            Self::U8(s) => s.get(index).map(|&v| u32::from(v)),
            Self::U16(s) => s.get(index).map(|&v| u32::from(v)),
            Self::U32(s) => s.get(index).copied(),
        }
    }

    /// Sub-slice `start..end` in samples.
    pub fn slice(&self, start: usize, end: usize) -> Samples<'a> {
        match *self {
            Self::U8(s) => Samples::U8(&s[start..end]),
            Self::U16(s) => Samples::U16(&s[start..end]),
            Self::U32(s) => Samples::U32(&s[start..end]),
        }
    }
}

/// Borrowed output buffer a region decompressor writes into.
#[derive(Debug)]
pub enum SamplesMut<'a> {
    U8(&'a mut [u8]),
    U16(&'a mut [u16]),
    U32(&'a mut [u32]),
}

impl SamplesMut<'_> {
    pub fn format(&self) -> BandFormat {
        match self {
            Self::U8(_) => BandFormat::UChar,
            Self::U16(_) => BandFormat::UShort,
            Self::U32(_) => BandFormat::UInt,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::U8(s) => s.len(),
            Self::U16(s) => s.len(),
            Self::U32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reborrow the buffer starting `offset` samples in.
    pub fn tail(&mut self, offset: usize) -> SamplesMut<'_> {
        match self {
            Self::U8(s) => SamplesMut::U8(&mut s[offset..]),
            Self::U16(s) => SamplesMut::U16(&mut s[offset..]),
            Self::U32(s) => SamplesMut::U32(&mut s[offset..]),
        }
    }

    /// Store `value`, truncated to the buffer's sample width.
    pub fn set(&mut self, index: usize, value: u32) {
        match self {
            Self::U8(s) => s[index] = value as u8,
            Self::U16(s) => s[index] = value as u16,
            Self::U32(s) => s[index] = value,
        }
    }
}

/// Output addressing the bridge hands to the region decompressor.
///
/// Offsets and gaps are in samples. A `row_gap` of zero means rows are
/// packed, `width * pixel_gap` apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferLayout {
    pub band_offsets: Vec<usize>,
    pub pixel_gap: usize,
    pub row_gap: usize,
    pub origin: usize,
}

impl BufferLayout {
    /// Band-interleaved layout with the bands in order.
    pub fn interleaved(bands: usize) -> Self {
        Self {
            band_offsets: (0..bands).collect(),
            pixel_gap: bands,
            row_gap: 0,
            origin: 0,
        }
    }

    pub fn row_stride(&self, width: u32) -> usize {
        if self.row_gap == 0 {
            width as usize * self.pixel_gap
        } else {
            self.row_gap
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_intersection() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 8, 10, 10);
        assert_eq!(a.intersect(&b), Rect::new(5, 8, 5, 2));
        assert!(a.intersect(&Rect::new(20, 20, 1, 1)).is_empty());
        assert!(a.contains(&Rect::new(2, 2, 8, 8)));
        assert!(!a.contains(&b));
    }

    #[test]
    fn format_for_bits() {
        assert_eq!(BandFormat::for_bits(1).unwrap(), BandFormat::UChar);
        assert_eq!(BandFormat::for_bits(12).unwrap(), BandFormat::UShort);
        assert_eq!(BandFormat::for_bits(32).unwrap(), BandFormat::UInt);
        assert!(matches!(
            BandFormat::for_bits(33),
            Err(BridgeError::UnsupportedBitDepth { bits: 33 })
        ));
    }

    #[test]
    fn tail_reborrows_from_offset() {
        let mut buffer = PixelBuffer::zeroed(BandFormat::UShort, 6).unwrap();
        {
            let mut samples = buffer.as_samples_mut();
            let mut tail = samples.tail(4);
            tail.set(1, 0x1_2345);
        }
        assert_eq!(buffer.get(5), Some(0x2345));
    }

    #[test]
    fn paste_places_tile_rows() {
        let mut image = PixelBuffer::zeroed(BandFormat::UChar, 4 * 3 * 2).unwrap();
        let tile = PixelBuffer::U8(vec![1, 2, 3, 4, 5, 6, 7, 8]);
        image.paste(4, 2, Rect::new(2, 1, 2, 2), &tile).unwrap();
        assert_eq!(image.get((4 + 2) * 2), Some(1));
        assert_eq!(image.get((2 * 4 + 3) * 2 + 1), Some(8));
        assert_eq!(image.get(0), Some(0));
        assert!(image.paste(4, 2, Rect::new(3, 0, 2, 1), &tile).is_err());
    }

    #[test]
    fn packed_row_stride() {
        let layout = BufferLayout::interleaved(3);
        assert_eq!(layout.row_stride(10), 30);
    }
}
