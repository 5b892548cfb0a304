//! Umbra - region-locked pixel access for FITS image planes.
//!
//! Pixels stay encoded in their FITS storage; algorithms see them only
//! through locked rectangular views:
//! - [`RegionLock`] admits concurrent readers and exclusive writers per rectangle
//! - [`pixel_codec`] converts big-endian BITPIX bytes to and from `f64` planes
//! - [`Image`] ties a plane to its lock and hands out [`ImageData`] views
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use umbra::{HolderId, Image, Rect, StoreConfig};
//!
//! let image = Image::open(Path::new("frame_001.fits"), &StoreConfig::default())?;
//! let holder = HolderId::unique();
//!
//! let mut view = image.lock_read(holder, Rect::new(0, 0, 512, 64), false)?;
//! for band in 0..image.height() as i64 / 64 {
//!     if band > 0 {
//!         view.switch_lock_data(0, band * 64, false, true)?;
//!     }
//!     let sum: f64 = view.pixels().iter().sum();
//!     println!("band {band}: {sum}");
//! }
//! view.exit_lock()?;
//! ```

pub mod config;
pub mod error;
pub mod fits;
pub mod geometry;
pub mod header;
pub mod image;
pub mod ops;
pub mod pixel_codec;
pub mod region_lock;
pub mod storage;

#[cfg(test)]
mod test_utils;

// ============================================================================
// Locking
// ============================================================================

pub use geometry::Rect;
pub use region_lock::{
    HolderId, LockError, LockMode, LockSemantics, LockToken, RegionLock, RegionLockEntry,
};

// ============================================================================
// Pixels and storage
// ============================================================================

pub use header::{HeaderCard, HeaderTable};
pub use image::{Image, ImageData, WcsTransform};
pub use pixel_codec::PixelKind;
pub use storage::{FileStorage, MemoryStorage, PixelStorage};

// ============================================================================
// Configuration and errors
// ============================================================================

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use fits::FitsError;
