//! Image planes and region-locked pixel views.
//!
//! An [`Image`] pairs the bytes of one FITS plane with a [`RegionLock`].
//! Algorithms never touch the bytes directly: they call
//! [`Image::lock_data`] to get an [`ImageData`] view of a rectangle, work on
//! its `f64` buffer, and hand it back with [`ImageData::exit_lock`].
//! Tiled scans move one view across the image with
//! [`ImageData::switch_lock_data`], reusing its buffer.

mod data;

pub use data::ImageData;

use std::any::{Any, TypeId};
use std::path::Path;
use std::sync::Arc;

use common::Buffer2;
use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::fits::{self, FitsError, HduLayout, ImageHdu};
use crate::geometry::Rect;
use crate::header::HeaderTable;
use crate::pixel_codec::{self, PixelKind};
use crate::region_lock::{HolderId, LockMode, LockSemantics, RegionLock};
use crate::storage::{FileStorage, MemoryStorage, PixelStorage};

/// Pixel <-> sky mapping supplied by the astrometry layer.
pub trait WcsTransform: Send + Sync + std::fmt::Debug {
    fn pixel_to_world(&self, x: f64, y: f64) -> (f64, f64);
    fn world_to_pixel(&self, ra: f64, dec: f64) -> (f64, f64);
}

type PropertyMap = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

#[derive(Debug)]
pub struct Image {
    width: usize,
    height: usize,
    kind: PixelKind,
    image_number: usize,
    header: HeaderTable,
    wcs: Option<Arc<dyn WcsTransform>>,
    properties: Mutex<PropertyMap>,
    locks: RegionLock,
    storage: Box<dyn PixelStorage>,
    data_offset: u64,
}

impl Image {
    /// Opens HDU `config.image_number` of a FITS file.
    ///
    /// Geometry and BITPIX come from cfitsio; the header blocks are walked
    /// only to find where the data unit starts.
    pub fn open(path: &Path, config: &StoreConfig) -> StoreResult<Self> {
        let layout = fits::describe_hdu(path, config.image_number)?;
        let storage = FileStorage::open(path, config.writable)?;
        let hdu = fits::locate_image(&storage, config.image_number)?;
        let found = HduLayout {
            width: hdu.width,
            height: hdu.height,
            kind: hdu.kind,
        };
        if found != layout {
            return Err(FitsError::LayoutMismatch {
                hdu: config.image_number,
                expected: layout.to_string(),
                found: found.to_string(),
            }
            .into());
        }
        Ok(Self::from_hdu(Box::new(storage), hdu, config.lock_semantics))
    }

    /// Reads the FITS layout from already opened storage, e.g. in memory.
    pub fn from_storage(
        storage: Box<dyn PixelStorage>,
        config: &StoreConfig,
    ) -> StoreResult<Self> {
        let hdu = fits::locate_image(storage.as_ref(), config.image_number)?;
        Ok(Self::from_hdu(storage, hdu, config.lock_semantics))
    }

    fn from_hdu(storage: Box<dyn PixelStorage>, hdu: ImageHdu, semantics: LockSemantics) -> Self {
        Self {
            width: hdu.width,
            height: hdu.height,
            kind: hdu.kind,
            image_number: hdu.index,
            header: hdu.header,
            wcs: None,
            properties: Mutex::new(PropertyMap::new()),
            locks: RegionLock::new(semantics),
            storage,
            data_offset: hdu.data_offset,
        }
    }

    /// Wraps a headerless plane of `height` rows of `width` pixels starting
    /// at `data_offset`.
    pub fn from_raw(
        storage: Box<dyn PixelStorage>,
        width: usize,
        height: usize,
        kind: PixelKind,
        data_offset: u64,
        semantics: LockSemantics,
    ) -> StoreResult<Self> {
        let needed = width
            .checked_mul(height)
            .and_then(|pixels| pixels.checked_mul(kind.bytes_per_pixel()))
            .and_then(|len| data_offset.checked_add(len as u64));
        match needed {
            Some(needed) if needed <= storage.len() => {}
            _ => {
                return Err(StoreError::InvalidArgument(format!(
                    "{}x{} {} plane at offset {} does not fit storage of {} bytes",
                    width,
                    height,
                    kind,
                    data_offset,
                    storage.len()
                )));
            }
        }
        Ok(Self::from_hdu(
            storage,
            ImageHdu {
                index: 0,
                header: fits::primary_header(width, height, kind),
                kind,
                width,
                height,
                data_offset,
            },
            semantics,
        ))
    }

    /// Zeroed in-memory image, laid out as a single-HDU FITS file.
    pub fn in_memory(width: usize, height: usize, kind: PixelKind) -> Self {
        let bytes = fits::minimal_fits_bytes(width, height, kind);
        Self::from_hdu(
            Box::new(MemoryStorage::new(bytes)),
            ImageHdu {
                index: 0,
                header: fits::primary_header(width, height, kind),
                kind,
                width,
                height,
                data_offset: fits::BLOCK_LEN as u64,
            },
            LockSemantics::default(),
        )
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn kind(&self) -> PixelKind {
        self.kind
    }

    pub fn image_number(&self) -> usize {
        self.image_number
    }

    pub fn header(&self) -> &HeaderTable {
        &self.header
    }

    pub fn wcs(&self) -> Option<&Arc<dyn WcsTransform>> {
        self.wcs.as_ref()
    }

    pub fn set_wcs(&mut self, wcs: Arc<dyn WcsTransform>) {
        self.wcs = Some(wcs);
    }

    pub fn bounds(&self) -> Rect {
        Rect::plane(self.width, self.height)
    }

    pub fn locks(&self) -> &RegionLock {
        &self.locks
    }

    pub fn storage(&self) -> &dyn PixelStorage {
        self.storage.as_ref()
    }

    /// Bytes per encoded row.
    pub fn stride(&self) -> usize {
        self.width * self.kind.bytes_per_pixel()
    }

    // ====================================================================
    // Derived properties
    // ====================================================================

    /// Returns the cached property of type `P`, computing it with `init` on
    /// first use. `init` runs outside the cache lock; if two callers race,
    /// the first stored value wins.
    pub fn property<P, F>(&self, init: F) -> Arc<P>
    where
        P: Send + Sync + 'static,
        F: FnOnce(&Image) -> P,
    {
        if let Some(cached) = self.cached_property::<P>() {
            return cached;
        }
        self.store_property(init(self))
    }

    /// Like [`property`](Self::property) for fallible computations. Errors
    /// are not cached.
    pub fn try_property<P, F>(&self, init: F) -> anyhow::Result<Arc<P>>
    where
        P: Send + Sync + 'static,
        F: FnOnce(&Image) -> anyhow::Result<P>,
    {
        if let Some(cached) = self.cached_property::<P>() {
            return Ok(cached);
        }
        let computed = init(self)?;
        Ok(self.store_property(computed))
    }

    pub fn cached_property<P: Send + Sync + 'static>(&self) -> Option<Arc<P>> {
        self.properties
            .lock()
            .get(&TypeId::of::<P>())
            .cloned()
            .map(downcast)
    }

    fn store_property<P: Send + Sync + 'static>(&self, computed: P) -> Arc<P> {
        let computed: Arc<dyn Any + Send + Sync> = Arc::new(computed);
        let stored = self
            .properties
            .lock()
            .entry(TypeId::of::<P>())
            .or_insert(computed)
            .clone();
        downcast(stored)
    }

    /// Drops all cached properties, e.g. after the pixels were rewritten.
    pub fn clear_properties(&self) {
        self.properties.lock().clear();
    }

    // ====================================================================
    // Locked pixel access
    // ====================================================================

    /// Locks `rect` for `holder` and decodes it into a new view.
    ///
    /// `read_only` selects a shared read lock, otherwise an exclusive write
    /// lock. With `fill_zero`, parts of `rect` outside the image read as
    /// zero; this is only allowed for read-only views. Without it, `rect`
    /// must lie inside the image.
    pub fn lock_data(
        &self,
        holder: HolderId,
        rect: Rect,
        fill_zero: bool,
        read_only: bool,
    ) -> StoreResult<ImageData<'_>> {
        self.check_request(&rect, fill_zero, read_only)?;
        let token = self.locks.enter(rect, lock_mode(read_only), holder)?;
        ImageData::acquired(self, holder, rect, token, fill_zero, read_only)
    }

    /// Shared view; `fill_zero` pads overscan margins with zeros.
    pub fn lock_read(
        &self,
        holder: HolderId,
        rect: Rect,
        fill_zero: bool,
    ) -> StoreResult<ImageData<'_>> {
        self.lock_data(holder, rect, fill_zero, true)
    }

    /// Exclusive, writable view; flushed on release.
    pub fn lock_write(&self, holder: HolderId, rect: Rect) -> StoreResult<ImageData<'_>> {
        self.lock_data(holder, rect, false, false)
    }

    /// Validates a view request before any lock or I/O is taken.
    fn check_request(&self, rect: &Rect, fill_zero: bool, read_only: bool) -> StoreResult<()> {
        if fill_zero && !read_only {
            return Err(StoreError::InvalidArgument(
                "fill_zero requires a read-only view".to_string(),
            ));
        }
        if !read_only && !self.storage.is_writable() {
            return Err(StoreError::InvalidArgument(
                "image storage is read-only".to_string(),
            ));
        }
        if !fill_zero && !rect.is_empty() && !self.bounds().contains_rect(rect) {
            return Err(StoreError::InvalidArgument(format!(
                "{} lies outside the {}x{} image",
                rect, self.width, self.height
            )));
        }
        Ok(())
    }

    /// Decodes `region` (inside the image) into `out`, its first pixel
    /// landing at `origin`.
    fn read_region(
        &self,
        region: &Rect,
        out: &mut Buffer2<f64>,
        origin: (usize, usize),
        scratch: &mut Vec<u8>,
    ) -> StoreResult<()> {
        if region.is_empty() {
            return Ok(());
        }
        let bpp = self.kind.bytes_per_pixel();
        let stride = self.stride();
        // Span from the region's first pixel to its last; the codec skips
        // the columns outside the region on every row.
        let start = self.pixel_offset(region.left, region.top);
        let span = (region.height - 1) * stride + region.width * bpp;
        scratch.resize(span, 0);
        self.storage.read_at(start, scratch.as_mut_slice())?;
        pixel_codec::decode_into(
            self.kind,
            scratch.as_slice(),
            stride,
            0..region.height,
            0..region.width,
            out,
            origin,
        );
        Ok(())
    }

    /// Encodes `pixels` and writes them over `region` (inside the image).
    fn write_region(
        &self,
        region: &Rect,
        pixels: &Buffer2<f64>,
        scratch: &mut Vec<u8>,
    ) -> StoreResult<()> {
        if region.is_empty() {
            return Ok(());
        }
        let row_bytes = region.width * self.kind.bytes_per_pixel();
        pixel_codec::encode_into(self.kind, pixels, row_bytes, scratch);

        if row_bytes == self.stride() {
            // Full-width rows are contiguous on disk.
            return Ok(self
                .storage
                .write_at(self.pixel_offset(0, region.top), scratch)?);
        }
        for (y, row) in scratch.chunks_exact(row_bytes).enumerate() {
            let offset = self.pixel_offset(region.left, region.top + y as i64);
            self.storage.write_at(offset, row)?;
        }
        Ok(())
    }

    #[inline]
    fn pixel_offset(&self, x: i64, y: i64) -> u64 {
        debug_assert!(x >= 0 && y >= 0);
        let row = y as u64 * self.stride() as u64;
        self.data_offset + row + x as u64 * self.kind.bytes_per_pixel() as u64
    }
}

fn lock_mode(read_only: bool) -> LockMode {
    if read_only {
        LockMode::Read
    } else {
        LockMode::Write
    }
}

fn downcast<P: Send + Sync + 'static>(value: Arc<dyn Any + Send + Sync>) -> Arc<P> {
    value
        .downcast::<P>()
        .unwrap_or_else(|_| panic!("property cache holds a foreign type for its TypeId"))
}
