use common::Buffer2;

use super::{lock_mode, Image};
use crate::error::{StoreError, StoreResult};
use crate::geometry::Rect;
use crate::region_lock::{HolderId, LockToken};

/// A locked, decoded view of one rectangle of an [`Image`].
///
/// The buffer is indexed `(x, y)` relative to the view's top-left corner.
/// Writable views are flushed back to storage by [`exit_lock`](Self::exit_lock)
/// and [`switch_lock_data`](Self::switch_lock_data). Dropping a view
/// without `exit_lock` releases its lock but discards any writes.
#[derive(Debug)]
pub struct ImageData<'a> {
    image: &'a Image,
    rect: Rect,
    pixels: Buffer2<f64>,
    read_only: bool,
    holder: HolderId,
    /// `None` once the lock was handed back.
    token: Option<LockToken>,
    /// Encoded bytes, reused across loads and flushes.
    scratch: Vec<u8>,
}

impl<'a> ImageData<'a> {
    /// Builds a view for a lock that was just granted and fills it.
    pub(super) fn acquired(
        image: &'a Image,
        holder: HolderId,
        rect: Rect,
        token: LockToken,
        fill_zero: bool,
        read_only: bool,
    ) -> StoreResult<Self> {
        let mut data = Self {
            image,
            rect,
            pixels: Buffer2::new_default(rect.width, rect.height),
            read_only,
            holder,
            token: Some(token),
            scratch: Vec::new(),
        };
        if let Err(err) = data.load(fill_zero) {
            data.abandon();
            return Err(err);
        }
        Ok(data)
    }

    pub fn image(&self) -> &'a Image {
        self.image
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn holder(&self) -> HolderId {
        self.holder
    }

    pub fn token(&self) -> Option<LockToken> {
        self.token
    }

    pub fn pixels(&self) -> &Buffer2<f64> {
        &self.pixels
    }

    /// Mutable buffer of a writable view.
    ///
    /// # Panics
    ///
    /// Panics on a read-only view: data under a shared lock must not change.
    pub fn pixels_mut(&mut self) -> &mut Buffer2<f64> {
        assert!(
            !self.read_only,
            "pixels_mut on a read-only view of {}",
            self.rect
        );
        &mut self.pixels
    }

    /// Pixel at image coordinates `(x, y)`, which must lie inside the view.
    #[inline]
    pub fn pixel_at(&self, x: i64, y: i64) -> f64 {
        let local_x = usize::try_from(x - self.rect.left).expect("x left of the view");
        let local_y = usize::try_from(y - self.rect.top).expect("y above the view");
        self.pixels[(local_x, local_y)]
    }

    /// Flushes (if writable), releases the lock, then locks and loads the
    /// same-sized rectangle with its top-left corner at `(new_x, new_y)`.
    ///
    /// The buffer allocation is kept. Argument checks run before the current
    /// view is flushed or released, so a rejected request leaves it intact.
    pub fn switch_lock_data(
        &mut self,
        new_x: i64,
        new_y: i64,
        fill_zero: bool,
        read_only: bool,
    ) -> StoreResult<()> {
        let token = self.live_token()?;
        let new_rect = self.rect.translated_to(new_x, new_y);
        self.image.check_request(&new_rect, fill_zero, read_only)?;

        if !self.read_only {
            self.flush()?;
        }
        self.token = None;
        self.image.locks.exit(token, self.holder)?;

        let token = self
            .image
            .locks
            .enter(new_rect, lock_mode(read_only), self.holder)?;
        self.token = Some(token);
        self.rect = new_rect;
        self.read_only = read_only;

        if let Err(err) = self.load(fill_zero) {
            self.abandon();
            return Err(err);
        }
        Ok(())
    }

    /// Flushes a writable view and releases its lock.
    ///
    /// The lock is released even when the flush fails; the flush error is
    /// returned in that case.
    pub fn exit_lock(mut self) -> StoreResult<()> {
        let token = self.live_token()?;
        let flushed = if self.read_only { Ok(()) } else { self.flush() };
        self.token = None;
        self.image.locks.exit(token, self.holder)?;
        flushed
    }

    fn live_token(&self) -> StoreResult<LockToken> {
        self.token.ok_or_else(|| {
            StoreError::InvalidArgument(format!("view of {} was already released", self.rect))
        })
    }

    /// Decodes the view's rectangle into the existing buffer.
    fn load(&mut self, fill_zero: bool) -> StoreResult<()> {
        let bounds = self.image.bounds();
        if fill_zero && !bounds.contains_rect(&self.rect) {
            self.pixels.fill(0.0);
        }
        let Some(visible) = bounds.intersection(&self.rect) else {
            return Ok(());
        };
        let origin = (
            (visible.left - self.rect.left) as usize,
            (visible.top - self.rect.top) as usize,
        );
        self.image
            .read_region(&visible, &mut self.pixels, origin, &mut self.scratch)
    }

    fn flush(&mut self) -> StoreResult<()> {
        self.image
            .write_region(&self.rect, &self.pixels, &mut self.scratch)
    }

    /// Releases the lock without flushing, for error paths.
    fn abandon(&mut self) {
        if let Some(token) = self.token.take() {
            if let Err(err) = self.image.locks.exit(token, self.holder) {
                tracing::error!("Failed to release lock on {}: {}", self.rect, err);
            }
        }
    }
}

impl Drop for ImageData<'_> {
    fn drop(&mut self) {
        if self.token.is_none() {
            return;
        }
        if !self.read_only {
            tracing::warn!(
                "Writable view of {} dropped without exit_lock; changes discarded",
                self.rect
            );
        }
        self.abandon();
    }
}
