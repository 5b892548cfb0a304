//! Tiled pixel operations built on locked views.

use std::ptr;

use rayon::prelude::*;

use crate::error::{StoreError, StoreResult};
use crate::geometry::Rect;
use crate::image::{Image, ImageData};
use crate::region_lock::HolderId;

/// Bands per rayon thread; extra bands even out uneven workers.
const BANDS_PER_THREAD: usize = 2;

/// Band height that splits `height` rows into roughly `threads * 2` bands.
#[inline]
pub fn rows_per_band(height: usize) -> usize {
    let bands = rayon::current_num_threads() * BANDS_PER_THREAD;
    (height / bands).max(1)
}

/// Convolves `source` with a row-major 3x3 `kernel` into `target`.
///
/// The plane is cut into horizontal bands of `band_rows` rows. Each rayon
/// worker takes every n-th band under its own holder, reading the band plus
/// a one-pixel margin (zero outside the image) and writing the band to
/// `target`. Views are moved between bands with `switch_lock_data`.
pub fn convolve_3x3(
    source: &Image,
    target: &Image,
    kernel: &[f64; 9],
    band_rows: usize,
) -> StoreResult<()> {
    if ptr::eq(source, target) {
        return Err(StoreError::InvalidArgument(
            "convolution source and target must be different images".to_string(),
        ));
    }
    if (source.width(), source.height()) != (target.width(), target.height()) {
        return Err(StoreError::InvalidArgument(format!(
            "source is {}x{}, target is {}x{}",
            source.width(),
            source.height(),
            target.width(),
            target.height()
        )));
    }
    if band_rows == 0 {
        return Err(StoreError::InvalidArgument(
            "band_rows must be positive".to_string(),
        ));
    }
    let height = source.height();
    if height == 0 || source.width() == 0 {
        return Ok(());
    }

    let band_count = height.div_ceil(band_rows);
    let workers = band_count.min(rayon::current_num_threads());
    tracing::debug!(
        "convolve_3x3: {}x{} in {} bands of {} rows on {} workers",
        source.width(),
        height,
        band_count,
        band_rows,
        workers
    );

    (0..workers).into_par_iter().try_for_each(|worker| {
        let tops = (worker..band_count)
            .step_by(workers)
            .map(|band| band * band_rows);
        convolve_bands(source, target, kernel, band_rows, tops)
    })
}

fn convolve_bands(
    source: &Image,
    target: &Image,
    kernel: &[f64; 9],
    band_rows: usize,
    mut tops: impl Iterator<Item = usize>,
) -> StoreResult<()> {
    let Some(first) = tops.next() else {
        return Ok(());
    };
    let holder = HolderId::unique();
    let width = source.width();
    let band = |top: usize| {
        Rect::new(
            top as i64,
            0,
            width,
            band_rows.min(source.height() - top),
        )
    };

    let mut output = target.lock_write(holder, band(first))?;
    let mut input = source.lock_read(holder, band(first).expanded(1), true)?;
    convolve_band(&input, &mut output, kernel);

    for top in tops {
        let rect = band(top);
        if rect.height == output.rect().height {
            output.switch_lock_data(0, rect.top, false, false)?;
            input.switch_lock_data(-1, rect.top - 1, true, true)?;
        } else {
            // Short last band: views keep their size across a switch.
            output.exit_lock()?;
            input.exit_lock()?;
            output = target.lock_write(holder, rect)?;
            input = source.lock_read(holder, rect.expanded(1), true)?;
        }
        convolve_band(&input, &mut output, kernel);
    }

    input.exit_lock()?;
    output.exit_lock()
}

/// `input` covers `output` plus a one-pixel margin, so local `(x, y)` in
/// `output` is `(x + 1, y + 1)` in `input`.
fn convolve_band(input: &ImageData<'_>, output: &mut ImageData<'_>, kernel: &[f64; 9]) {
    let src = input.pixels();
    let dst = output.pixels_mut();
    for y in 0..dst.height() {
        for x in 0..dst.width() {
            let mut sum = 0.0;
            for ky in 0..3 {
                for kx in 0..3 {
                    sum += kernel[ky * 3 + kx] * src[(x + kx, y + ky)];
                }
            }
            dst[(x, y)] = sum;
        }
    }
}
