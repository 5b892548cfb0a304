//! FITS layout: enough to find an image plane inside a file.
//!
//! Files on disk are described through cfitsio (`fitsio`), which reports the
//! HDU's geometry and BITPIX. cfitsio does not expose where the data unit
//! starts, so the byte offset, and everything for in-memory storage, comes
//! from the structural walker below: 2880-byte header blocks of 80-byte
//! cards terminated by `END`, each data unit padded to whole blocks.
//! BSCALE/BZERO are left to the metadata layer, pixels are exposed raw.

use std::io;
use std::path::Path;

use fitsio::hdu::HduInfo;
use fitsio::images::{ImageDescription, ImageType};
use fitsio::FitsFile;
use thiserror::Error;

use crate::header::{HeaderCard, HeaderTable, CARD_LEN};
use crate::pixel_codec::PixelKind;
use crate::storage::PixelStorage;

pub const BLOCK_LEN: usize = 2880;

/// Header blocks scanned before giving up on finding `END`.
const MAX_HEADER_BLOCKS: usize = 1024;

/// Largest NAXIS the standard allows.
const MAX_AXES: u64 = 999;

#[derive(Debug, Error)]
pub enum FitsError {
    #[error("FITS I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("cfitsio error: {0}")]
    Cfitsio(#[from] fitsio::errors::Error),
    #[error("Header at offset {offset} has no END card")]
    Truncated { offset: u64 },
    #[error("Missing required keyword {0}")]
    MissingKeyword(&'static str),
    #[error("Keyword {keyword} has invalid value '{value}'")]
    InvalidKeyword { keyword: String, value: String },
    #[error("Unsupported BITPIX value {0}")]
    InvalidBitpix(i64),
    #[error("HDU {hdu} has {naxis} axes, expected a 2-D image")]
    UnsupportedAxes { hdu: usize, naxis: usize },
    #[error("HDU {0} is not an image")]
    NotAnImage(usize),
    #[error("Data unit at offset {offset} is too large to address")]
    SizeOverflow { offset: u64 },
    #[error("HDU {hdu}: cfitsio reports {expected}, header blocks describe {found}")]
    LayoutMismatch {
        hdu: usize,
        expected: String,
        found: String,
    },
    #[error("File has no HDU number {0}")]
    HduNotFound(usize),
}

pub type FitsResult<T> = Result<T, FitsError>;

/// Location and layout of one image plane.
#[derive(Debug, Clone)]
pub struct ImageHdu {
    pub index: usize,
    pub header: HeaderTable,
    pub kind: PixelKind,
    pub width: usize,
    pub height: usize,
    /// Byte offset of the first pixel.
    pub data_offset: u64,
}

impl ImageHdu {
    /// Bytes per encoded row.
    pub fn stride(&self) -> usize {
        self.width * self.kind.bytes_per_pixel()
    }
}

/// Geometry of an image HDU as cfitsio sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HduLayout {
    pub width: usize,
    pub height: usize,
    pub kind: PixelKind,
}

impl std::fmt::Display for HduLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.kind)
    }
}

/// `len` rounded up to whole blocks, `None` if that is not representable.
#[inline]
pub fn padded_len(len: u64) -> Option<u64> {
    len.div_ceil(BLOCK_LEN as u64).checked_mul(BLOCK_LEN as u64)
}

// ============================================================================
// cfitsio
// ============================================================================

/// Reads the geometry of HDU `index` (0 = primary) of a file on disk.
/// Degenerate trailing axes of length 1 are accepted.
pub fn describe_hdu(path: &Path, index: usize) -> FitsResult<HduLayout> {
    let mut fptr = FitsFile::open(path)?;
    let hdu = fptr.hdu(index)?;

    // cfitsio lists axes slowest first: [.., NAXIS2, NAXIS1].
    let shape = match &hdu.info {
        HduInfo::ImageInfo { shape, .. } => shape.clone(),
        HduInfo::TableInfo { .. } | HduInfo::AnyInfo => {
            return Err(FitsError::NotAnImage(index));
        }
    };
    let naxis = shape.len();
    if naxis < 2 || shape[..naxis - 2].iter().any(|&len| len != 1) {
        return Err(FitsError::UnsupportedAxes { hdu: index, naxis });
    }

    // The raw BITPIX card; cfitsio's image type folds in BZERO conventions.
    let bitpix: i64 = hdu.read_key(&mut fptr, "BITPIX")?;
    let kind = PixelKind::from_bitpix(bitpix).ok_or(FitsError::InvalidBitpix(bitpix))?;

    Ok(HduLayout {
        width: shape[naxis - 1],
        height: shape[naxis - 2],
        kind,
    })
}

fn image_type(kind: PixelKind) -> ImageType {
    match kind {
        PixelKind::UInt8 => ImageType::UnsignedByte,
        PixelKind::Int16 => ImageType::Short,
        PixelKind::Int32 => ImageType::Long,
        PixelKind::Int64 => ImageType::LongLong,
        PixelKind::Float32 => ImageType::Float,
        PixelKind::Float64 => ImageType::Double,
    }
}

/// Creates (or replaces) a single-HDU FITS file with zeroed pixels, e.g. for
/// algorithm output.
pub fn write_minimal_fits(
    path: &Path,
    width: usize,
    height: usize,
    kind: PixelKind,
) -> FitsResult<()> {
    let description = ImageDescription {
        data_type: image_type(kind),
        dimensions: &[height, width],
    };
    let mut fptr = FitsFile::create(path)
        .with_custom_primary(&description)
        .overwrite()
        .open()?;
    if width * height > 0 {
        let hdu = fptr.primary_hdu()?;
        hdu.write_image(&mut fptr, &vec![0.0f64; width * height])?;
    }
    tracing::info!(
        "Created {} ({}x{}, BITPIX {})",
        path.display(),
        width,
        height,
        kind.to_bitpix()
    );
    Ok(())
}

// ============================================================================
// Structural walker
// ============================================================================

/// Reads header cards from `offset` up to `END`. Returns the table and the
/// offset of the data unit that follows.
pub fn read_header(storage: &dyn PixelStorage, offset: u64) -> FitsResult<(HeaderTable, u64)> {
    let mut table = HeaderTable::new();
    let mut block = vec![0u8; BLOCK_LEN];
    let mut pos = offset;

    for _ in 0..MAX_HEADER_BLOCKS {
        match pos.checked_add(BLOCK_LEN as u64) {
            Some(end) if end <= storage.len() => {}
            _ => return Err(FitsError::Truncated { offset }),
        }
        storage.read_at(pos, &mut block)?;
        pos += BLOCK_LEN as u64;

        for raw in block.chunks_exact(CARD_LEN) {
            let card = HeaderCard::parse(raw);
            if card.keyword == "END" {
                return Ok((table, pos));
            }
            if !card.keyword.is_empty() {
                table.push(card);
            }
        }
    }
    Err(FitsError::Truncated { offset })
}

fn invalid_keyword(keyword: &str, value: &str) -> FitsError {
    FitsError::InvalidKeyword {
        keyword: keyword.to_string(),
        value: value.to_string(),
    }
}

fn required_i64(header: &HeaderTable, keyword: &'static str) -> FitsResult<i64> {
    let raw = header
        .get(keyword)
        .ok_or(FitsError::MissingKeyword(keyword))?;
    raw.parse().map_err(|_| invalid_keyword(keyword, raw))
}

/// Parses a keyword that counts something (axes, axis length, PCOUNT,
/// GCOUNT). Negative values are invalid.
fn parse_count(keyword: &str, raw: &str) -> FitsResult<u64> {
    raw.parse::<i64>()
        .ok()
        .and_then(|value| u64::try_from(value).ok())
        .ok_or_else(|| invalid_keyword(keyword, raw))
}

fn optional_count(header: &HeaderTable, keyword: &str, default: u64) -> FitsResult<u64> {
    match header.get(keyword) {
        Some(raw) => parse_count(keyword, raw),
        None => Ok(default),
    }
}

fn bitpix_kind(header: &HeaderTable) -> FitsResult<PixelKind> {
    let bitpix = required_i64(header, "BITPIX")?;
    PixelKind::from_bitpix(bitpix).ok_or(FitsError::InvalidBitpix(bitpix))
}

/// `NAXIS1..NAXISn`, fastest axis first.
fn axes(header: &HeaderTable) -> FitsResult<Vec<u64>> {
    let raw = header.get("NAXIS").ok_or(FitsError::MissingKeyword("NAXIS"))?;
    let naxis = parse_count("NAXIS", raw)?;
    if naxis > MAX_AXES {
        return Err(invalid_keyword("NAXIS", raw));
    }
    (1..=naxis)
        .map(|axis| {
            let keyword = format!("NAXIS{}", axis);
            let raw = header
                .get(&keyword)
                .ok_or(FitsError::MissingKeyword("NAXISn"))?;
            parse_count(&keyword, raw)
        })
        .collect()
}

/// Size in bytes of the data unit starting at `offset`, before padding.
fn data_len(header: &HeaderTable, kind: PixelKind, axes: &[u64], offset: u64) -> FitsResult<u64> {
    if axes.is_empty() {
        return Ok(0);
    }
    let pcount = optional_count(header, "PCOUNT", 0)?;
    let gcount = optional_count(header, "GCOUNT", 1)?;
    axes.iter()
        .try_fold(1u64, |acc, &len| acc.checked_mul(len))
        .and_then(|pixels| pixels.checked_add(pcount))
        .and_then(|values| values.checked_mul(gcount))
        .and_then(|values| values.checked_mul(kind.bytes_per_pixel() as u64))
        .ok_or(FitsError::SizeOverflow { offset })
}

/// Finds HDU number `index` (0 = primary) and checks it is a 2-D image.
/// Degenerate trailing axes of length 1 are accepted.
pub fn locate_image(storage: &dyn PixelStorage, index: usize) -> FitsResult<ImageHdu> {
    let mut offset = 0u64;
    for hdu in 0..=index {
        if offset >= storage.len() {
            return Err(FitsError::HduNotFound(index));
        }
        let (header, data_offset) = read_header(storage, offset)?;
        let kind = bitpix_kind(&header)?;
        let axes = axes(&header)?;

        if hdu < index {
            let len = data_len(&header, kind, &axes, data_offset)?;
            offset = padded_len(len)
                .and_then(|padded| data_offset.checked_add(padded))
                .ok_or(FitsError::SizeOverflow {
                    offset: data_offset,
                })?;
            continue;
        }

        if axes.len() < 2 || axes[2..].iter().any(|&len| len != 1) {
            return Err(FitsError::UnsupportedAxes {
                hdu,
                naxis: axes.len(),
            });
        }
        let overflow = FitsError::SizeOverflow {
            offset: data_offset,
        };
        let (Ok(width), Ok(height)) = (usize::try_from(axes[0]), usize::try_from(axes[1]))
        else {
            return Err(overflow);
        };
        let end = width
            .checked_mul(height)
            .and_then(|pixels| pixels.checked_mul(kind.bytes_per_pixel()))
            .and_then(|len| data_offset.checked_add(len as u64))
            .ok_or(overflow)?;
        if end > storage.len() {
            return Err(FitsError::Truncated {
                offset: data_offset,
            });
        }

        tracing::debug!(
            "HDU {}: {}x{} {} at byte {}",
            hdu, width, height, kind, data_offset
        );
        return Ok(ImageHdu {
            index: hdu,
            header,
            kind,
            width,
            height,
            data_offset,
        });
    }
    Err(FitsError::HduNotFound(index))
}

/// Serializes a header into whole blocks, appending `END`.
pub fn encode_header(header: &HeaderTable) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(BLOCK_LEN);
    for card in header.cards() {
        bytes.extend_from_slice(&card.format());
    }
    bytes.extend_from_slice(
        &HeaderCard {
            keyword: "END".to_string(),
            value: None,
            comment: None,
        }
        .format(),
    );
    bytes.resize(bytes.len().div_ceil(BLOCK_LEN) * BLOCK_LEN, b' ');
    bytes
}

/// Builds the mandatory primary header for a 2-D image.
pub fn primary_header(width: usize, height: usize, kind: PixelKind) -> HeaderTable {
    let mut header = HeaderTable::new();
    header.set("SIMPLE", "T");
    header.set("BITPIX", kind.to_bitpix().to_string());
    header.set("NAXIS", "2");
    header.set("NAXIS1", width.to_string());
    header.set("NAXIS2", height.to_string());
    header
}

/// In-memory single-HDU file with a zeroed data unit.
pub fn minimal_fits_bytes(width: usize, height: usize, kind: PixelKind) -> Vec<u8> {
    let mut bytes = encode_header(&primary_header(width, height, kind));
    let data = width * height * kind.bytes_per_pixel();
    bytes.resize(bytes.len() + data.div_ceil(BLOCK_LEN) * BLOCK_LEN, 0);
    bytes
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::test_utils::scratch_dir;

    pub(crate) fn extension_bytes(width: usize, height: usize, kind: PixelKind) -> Vec<u8> {
        let mut header = HeaderTable::new();
        header.set("XTENSION", "'IMAGE   '");
        header.set("BITPIX", kind.to_bitpix().to_string());
        header.set("NAXIS", "2");
        header.set("NAXIS1", width.to_string());
        header.set("NAXIS2", height.to_string());
        header.set("PCOUNT", "0");
        header.set("GCOUNT", "1");
        let mut bytes = encode_header(&header);
        let data = width * height * kind.bytes_per_pixel();
        bytes.resize(bytes.len() + data.div_ceil(BLOCK_LEN) * BLOCK_LEN, 0);
        bytes
    }

    /// Empty primary HDU followed by a 3x3 Float32 and a 700x5 Float64 image.
    pub(crate) fn multi_extension_bytes() -> Vec<u8> {
        let mut primary = HeaderTable::new();
        primary.set("SIMPLE", "T");
        primary.set("BITPIX", "8");
        primary.set("NAXIS", "0");
        primary.set("EXTEND", "T");
        let mut bytes = encode_header(&primary);
        bytes.extend(extension_bytes(3, 3, PixelKind::Float32));
        bytes.extend(extension_bytes(700, 5, PixelKind::Float64));
        bytes
    }

    fn with_header_edit(edit: impl FnOnce(&mut HeaderTable)) -> MemoryStorage {
        let mut header = primary_header(4, 4, PixelKind::Int16);
        edit(&mut header);
        let mut bytes = encode_header(&header);
        bytes.resize(2 * BLOCK_LEN, 0);
        MemoryStorage::new(bytes)
    }

    #[test]
    fn test_minimal_file_layout() {
        let bytes = minimal_fits_bytes(10, 4, PixelKind::Int16);
        assert_eq!(bytes.len(), 2 * BLOCK_LEN);
        assert!(bytes.starts_with(b"SIMPLE  =                    T"));

        let storage = MemoryStorage::new(bytes);
        let hdu = locate_image(&storage, 0).unwrap();
        assert_eq!(hdu.kind, PixelKind::Int16);
        assert_eq!((hdu.width, hdu.height), (10, 4));
        assert_eq!(hdu.data_offset, BLOCK_LEN as u64);
        assert_eq!(hdu.stride(), 20);
        assert_eq!(hdu.header.get_bool("SIMPLE"), Some(true));
    }

    #[test]
    fn test_locate_extension_after_empty_primary() {
        let storage = MemoryStorage::new(multi_extension_bytes());

        let err = locate_image(&storage, 0).unwrap_err();
        assert!(matches!(err, FitsError::UnsupportedAxes { hdu: 0, naxis: 0 }));

        let first = locate_image(&storage, 1).unwrap();
        assert_eq!(first.kind, PixelKind::Float32);
        assert_eq!(first.data_offset, 2 * BLOCK_LEN as u64);

        let second = locate_image(&storage, 2).unwrap();
        assert_eq!(second.kind, PixelKind::Float64);
        assert_eq!((second.width, second.height), (700, 5));
        assert_eq!(second.data_offset, 4 * BLOCK_LEN as u64);

        assert!(matches!(
            locate_image(&storage, 3),
            Err(FitsError::HduNotFound(3))
        ));
    }

    #[test]
    fn test_missing_end_is_truncated() {
        let mut bytes = vec![b' '; BLOCK_LEN];
        bytes[..30].copy_from_slice(b"SIMPLE  =                    T");
        let storage = MemoryStorage::new(bytes);
        assert!(matches!(
            locate_image(&storage, 0),
            Err(FitsError::Truncated { offset: 0 })
        ));
    }

    #[test]
    fn test_invalid_bitpix_rejected() {
        let storage = with_header_edit(|h| h.set("BITPIX", "24"));
        assert!(matches!(
            locate_image(&storage, 0),
            Err(FitsError::InvalidBitpix(24))
        ));
    }

    #[test]
    fn test_short_data_unit_is_truncated() {
        let mut bytes = minimal_fits_bytes(100, 100, PixelKind::Float64);
        bytes.truncate(2 * BLOCK_LEN);
        let storage = MemoryStorage::new(bytes);
        assert!(matches!(
            locate_image(&storage, 0),
            Err(FitsError::Truncated { .. })
        ));
    }

    #[test]
    fn test_negative_axis_counts_are_invalid_keywords() {
        let storage = with_header_edit(|h| h.set("NAXIS", "-1"));
        assert!(matches!(
            locate_image(&storage, 0),
            Err(FitsError::InvalidKeyword { keyword, .. }) if keyword == "NAXIS"
        ));

        let storage = with_header_edit(|h| h.set("NAXIS2", "-4"));
        assert!(matches!(
            locate_image(&storage, 0),
            Err(FitsError::InvalidKeyword { keyword, .. }) if keyword == "NAXIS2"
        ));

        let storage = with_header_edit(|h| h.set("NAXIS", "100000"));
        assert!(matches!(
            locate_image(&storage, 0),
            Err(FitsError::InvalidKeyword { .. })
        ));
    }

    #[test]
    fn test_huge_axes_overflow_without_panicking() {
        let storage = with_header_edit(|h| {
            h.set("BITPIX", "64");
            h.set("NAXIS1", "4294967296");
            h.set("NAXIS2", "4294967296");
        });
        assert!(matches!(
            locate_image(&storage, 0),
            Err(FitsError::SizeOverflow { .. })
        ));
    }

    #[test]
    fn test_skipping_oversized_hdu_overflows_without_panicking() {
        let storage = with_header_edit(|h| {
            h.set("BITPIX", "64");
            h.set("NAXIS1", "8589934592");
            h.set("NAXIS2", "8589934592");
        });
        assert!(matches!(
            locate_image(&storage, 1),
            Err(FitsError::SizeOverflow { .. })
        ));
    }

    #[test]
    fn test_negative_pcount_or_gcount_is_invalid() {
        for keyword in ["PCOUNT", "GCOUNT"] {
            let storage = with_header_edit(|h| h.set(keyword, "-1"));
            assert!(
                matches!(
                    locate_image(&storage, 1),
                    Err(FitsError::InvalidKeyword { keyword: k, .. }) if k == keyword
                ),
                "{keyword}"
            );
        }
    }

    #[test]
    fn test_padded_len_overflow() {
        assert_eq!(padded_len(0), Some(0));
        assert_eq!(padded_len(1), Some(BLOCK_LEN as u64));
        assert_eq!(padded_len(u64::MAX), None);
    }

    #[test]
    fn test_cfitsio_reads_written_file() {
        let path = scratch_dir("test_cfitsio_reads_written_file").join("out.fits");
        write_minimal_fits(&path, 12, 7, PixelKind::Int32).unwrap();

        let layout = describe_hdu(&path, 0).unwrap();
        assert_eq!(
            layout,
            HduLayout {
                width: 12,
                height: 7,
                kind: PixelKind::Int32,
            }
        );

        // The walker agrees with cfitsio on the same bytes.
        let storage = MemoryStorage::new(std::fs::read(&path).unwrap());
        let hdu = locate_image(&storage, 0).unwrap();
        assert_eq!((hdu.width, hdu.height, hdu.kind), (12, 7, PixelKind::Int32));
        assert!(storage.to_vec()[hdu.data_offset as usize..][..12 * 7 * 4]
            .iter()
            .all(|&b| b == 0));
    }

    #[test]
    fn test_cfitsio_reads_hand_built_extensions() {
        let path = scratch_dir("test_cfitsio_reads_hand_built_extensions").join("multi.fits");
        std::fs::write(&path, multi_extension_bytes()).unwrap();

        assert!(matches!(
            describe_hdu(&path, 0),
            Err(FitsError::UnsupportedAxes { hdu: 0, naxis: 0 })
        ));
        let layout = describe_hdu(&path, 2).unwrap();
        assert_eq!((layout.width, layout.height), (700, 5));
        assert_eq!(layout.kind, PixelKind::Float64);
    }
}
