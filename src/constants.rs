// RFC 3745 signature box: length 12, type "jP  ", content 0D 0A 87 0A.
pub const JP2_RFC3745_MAGIC: [u8; 12] = [
    0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A,
];
// Bare signature content, accepted at offset 0 for legacy writers.
pub const JP2_MAGIC: [u8; 4] = [0x0D, 0x0A, 0x87, 0x0A];
// SOC followed by SIZ.
pub const J2K_CODESTREAM_MAGIC: [u8; 4] = [0xFF, 0x4F, 0xFF, 0x51];
pub const SNIFF_LENGTH: usize = 12;

pub const MAX_THREADS: usize = 16;
pub const MAX_LAYERS: usize = 16;
pub const MAX_PAGE: u32 = 100_000;
pub const MAX_BITS_PER_SAMPLE: u32 = 32;

// Coarsest page keeps roughly 2^6 pixels on the short axis.
pub const PAGE_COUNT_BIAS: u32 = 6;

pub const DEFAULT_TILE_SIZE: u32 = 512;
pub const DEFAULT_Q: u8 = 48;
// Q at or above this disables automatic chroma subsampling.
pub const SUBSAMPLE_Q_THRESHOLD: u8 = 90;
pub const DEFAULT_LEVELS: u8 = 5;

// Layer byte budget is pixels * 0.125 * bits-per-pixel.
pub const BYTES_PER_BIT: f64 = 0.125;

// Codec resolution is pixels per metre, host resolution is pixels per millimetre.
pub const MM_PER_METRE: f64 = 1000.0;
pub const DEFAULT_RESOLUTION: f64 = 1.0;

// Decode tile cache holds about two tile rows plus a margin.
pub const CACHE_TILE_ROWS: u32 = 3;

pub const META_ICC_NAME: &str = "icc-profile-data";
pub const META_N_PAGES: &str = "n-pages";
pub const META_BITS_PER_SAMPLE: &str = "bits-per-sample";

pub const CONCURRENCY_ENV: &str = "J2K_CONCURRENCY";

pub const J2K_SUFFIXES: [&str; 6] = [".j2k", ".jp2", ".jpt", ".j2c", ".jpc", ".jph"];
pub const HT_SUFFIX: &str = ".jph";
