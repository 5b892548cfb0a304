//! Big-endian FITS pixel codec.
//!
//! Translates between the on-disk pixel layout (one of the six BITPIX
//! encodings, rows of `stride` bytes) and a dense row-major `f64` matrix.
//! The codec trusts its caller: a byte buffer that is too short for the
//! requested rows/columns is a contract violation and panics through
//! slice bounds checks rather than wrapping or truncating.


use std::ops::Range;

use common::Buffer2;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

/// On-disk numeric encoding of one pixel, named after the FITS BITPIX values.
#[derive(
    Debug, Display, EnumIter, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum PixelKind {
    /// BITPIX = 8, unsigned byte
    UInt8,
    /// BITPIX = 16, two's-complement
    Int16,
    /// BITPIX = 32, two's-complement
    Int32,
    /// BITPIX = 64, two's-complement
    Int64,
    /// BITPIX = -32, IEEE-754 single
    Float32,
    /// BITPIX = -64, IEEE-754 double
    Float64,
}

impl PixelKind {
    pub fn from_bitpix(bitpix: i64) -> Option<Self> {
        match bitpix {
            8 => Some(PixelKind::UInt8),
            16 => Some(PixelKind::Int16),
            32 => Some(PixelKind::Int32),
            64 => Some(PixelKind::Int64),
            -32 => Some(PixelKind::Float32),
            -64 => Some(PixelKind::Float64),
            _ => None,
        }
    }

    pub fn to_bitpix(self) -> i64 {
        match self {
            PixelKind::UInt8 => 8,
            PixelKind::Int16 => 16,
            PixelKind::Int32 => 32,
            PixelKind::Int64 => 64,
            PixelKind::Float32 => -32,
            PixelKind::Float64 => -64,
        }
    }

    #[inline]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelKind::UInt8 => 1,
            PixelKind::Int16 => 2,
            PixelKind::Int32 | PixelKind::Float32 => 4,
            PixelKind::Int64 | PixelKind::Float64 => 8,
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, PixelKind::Float32 | PixelKind::Float64)
    }

    /// Inclusive value range an integer kind can store.
    fn integer_range(self) -> (f64, f64) {
        match self {
            PixelKind::UInt8 => (0.0, 255.0),
            PixelKind::Int16 => (i16::MIN as f64, i16::MAX as f64),
            PixelKind::Int32 => (i32::MIN as f64, i32::MAX as f64),
            // i64::MAX is not representable in f64; stay one ulp below 2^63.
            PixelKind::Int64 => (i64::MIN as f64, 9_223_372_036_854_774_784.0),
            PixelKind::Float32 | PixelKind::Float64 => (f64::MIN, f64::MAX),
        }
    }
}

const TWO_16: f64 = 65536.0;
const TWO_31: f64 = 2_147_483_648.0;

#[inline]
fn signed_half(hi: u8, lo: u8) -> f64 {
    (hi as i8 as f64) * 256.0 + lo as f64
}

#[inline]
fn unsigned_half(hi: u8, lo: u8) -> f64 {
    (hi as f64) * 256.0 + lo as f64
}

/// Widens f32 to f64 keeping NaN payloads intact, so a later narrowing
/// reproduces the original bit pattern.
#[inline]
fn widen_f32(bits: u32) -> f64 {
    let value = f32::from_bits(bits);
    if !value.is_nan() {
        return value as f64;
    }
    let sign = ((bits >> 31) as u64) << 63;
    let mantissa = ((bits & 0x007f_ffff) as u64) << 29;
    f64::from_bits(sign | 0x7ff0_0000_0000_0000 | mantissa)
}

#[inline]
fn narrow_f64(value: f64) -> u32 {
    if !value.is_nan() {
        return (value as f32).to_bits();
    }
    let bits = value.to_bits();
    let sign = ((bits >> 63) as u32) << 31;
    let mut mantissa = ((bits >> 29) & 0x007f_ffff) as u32;
    if mantissa == 0 {
        mantissa = 0x0040_0000;
    }
    sign | 0x7f80_0000 | mantissa
}

/// Decodes one pixel from the first `bytes_per_pixel` bytes of `bytes`.
#[inline]
pub fn decode_value(kind: PixelKind, bytes: &[u8]) -> f64 {
    match kind {
        PixelKind::UInt8 => bytes[0] as f64,
        PixelKind::Int16 => signed_half(bytes[0], bytes[1]),
        PixelKind::Int32 => {
            signed_half(bytes[0], bytes[1]) * TWO_16 + unsigned_half(bytes[2], bytes[3])
        }
        PixelKind::Int64 => {
            let mut acc = signed_half(bytes[0], bytes[1]);
            for half in bytes[2..8].chunks_exact(2) {
                acc = acc * TWO_16 + unsigned_half(half[0], half[1]);
            }
            acc
        }
        PixelKind::Float32 => {
            widen_f32(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        PixelKind::Float64 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[..8]);
            f64::from_be_bytes(raw)
        }
    }
}

/// Rounds half away from zero, saturates to the kind's range, maps NaN to 0.
#[inline]
fn to_integral(kind: PixelKind, value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    let (min, max) = kind.integer_range();
    value.round().clamp(min, max)
}

/// Splits an integral value into (signed high, unsigned low) around `base`.
#[inline]
fn split(value: f64, base: f64) -> (f64, f64) {
    let high = (value / base).floor();
    (high, value - high * base)
}

/// Encodes one pixel into the first `bytes_per_pixel` bytes of `out`.
#[inline]
pub fn encode_value(kind: PixelKind, value: f64, out: &mut [u8]) {
    match kind {
        PixelKind::UInt8 => out[0] = to_integral(kind, value) as u8,
        PixelKind::Int16 => {
            let (high, low) = split(to_integral(kind, value), 256.0);
            out[0] = high as i8 as u8;
            out[1] = low as u8;
        }
        PixelKind::Int32 => {
            let (high, low) = split(to_integral(kind, value), TWO_16);
            let (hh, hl) = split(high, 256.0);
            let (lh, ll) = split(low, 256.0);
            out[0] = hh as i8 as u8;
            out[1] = hl as u8;
            out[2] = lh as u8;
            out[3] = ll as u8;
        }
        PixelKind::Int64 => {
            // v = q * 2^31 + r keeps every intermediate inside 32-bit-safe
            // magnitudes; q's parity bit moves into the low word.
            let (q, r) = split(to_integral(kind, value), TWO_31);
            let (high, odd) = split(q, 2.0);
            let low = r + odd * TWO_31;
            out[..4].copy_from_slice(&(high as i32).to_be_bytes());
            out[4..8].copy_from_slice(&(low as u32).to_be_bytes());
        }
        PixelKind::Float32 => out[..4].copy_from_slice(&narrow_f64(value).to_be_bytes()),
        PixelKind::Float64 => out[..8].copy_from_slice(&value.to_be_bytes()),
    }
}

/// Decodes the `rows` x `cols` sub-rectangle of a byte plane with rows of
/// `stride` bytes into a freshly allocated matrix.
pub fn decode(
    kind: PixelKind,
    bytes: &[u8],
    stride: usize,
    rows: Range<usize>,
    cols: Range<usize>,
) -> Buffer2<f64> {
    let mut out = Buffer2::new_default(cols.len(), rows.len());
    decode_into(kind, bytes, stride, rows, cols, &mut out, (0, 0));
    out
}

/// Like [`decode`], but writes into `out` with the sub-rectangle's first
/// pixel landing at `origin = (x, y)`. Pixels of `out` outside the
/// decoded area are left untouched.
pub fn decode_into(
    kind: PixelKind,
    bytes: &[u8],
    stride: usize,
    rows: Range<usize>,
    cols: Range<usize>,
    out: &mut Buffer2<f64>,
    origin: (usize, usize),
) {
    let bpp = kind.bytes_per_pixel();
    let consumed = cols.len() * bpp;
    assert!(
        cols.end * bpp <= stride,
        "column range {:?} exceeds stride of {} bytes",
        cols,
        stride
    );
    let (ox, oy) = origin;

    let mut cursor = rows.start * stride + cols.start * bpp;
    for y in 0..rows.len() {
        let src = &bytes[cursor..cursor + consumed];
        let dst = &mut out.row_mut(oy + y)[ox..ox + cols.len()];
        for (value, pixel) in dst.iter_mut().zip(src.chunks_exact(bpp)) {
            *value = decode_value(kind, pixel);
        }
        cursor += consumed + (stride - consumed);
    }
}

/// Encodes the whole matrix into rows of `stride` bytes. Padding bytes past
/// the pixel data in each row are zero.
pub fn encode(kind: PixelKind, matrix: &Buffer2<f64>, stride: usize) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(kind, matrix, stride, &mut out);
    out
}

/// Like [`encode`], reusing `out`'s allocation.
pub fn encode_into(kind: PixelKind, matrix: &Buffer2<f64>, stride: usize, out: &mut Vec<u8>) {
    let bpp = kind.bytes_per_pixel();
    let row_bytes = matrix.width() * bpp;
    assert!(
        row_bytes <= stride,
        "row of {} bytes does not fit stride of {} bytes",
        row_bytes,
        stride
    );

    out.clear();
    out.resize(matrix.height() * stride, 0);
    for y in 0..matrix.height() {
        let dst = &mut out[y * stride..y * stride + row_bytes];
        for (&value, pixel) in matrix.row(y).iter().zip(dst.chunks_exact_mut(bpp)) {
            encode_value(kind, value, pixel);
        }
    }
}
