//! Imagette extraction around GCP positions

use crate::core::tiling::TileRect;
use crate::io::raster::RasterSource;
use crate::types::{CoregError, CoregResult, PixelPos};
use ndarray::Array2;
use num_traits::Float;

/// Window of samples (rows along axis 0) handed to the correlator
pub type Imagette = Array2<f64>;

/// Bilinear interpolation between four neighbours.
///
/// `v00` is at (x0, y0), `v10` at (x0 + 1, y0), `v01` at (x0, y0 + 1) and
/// `v11` at (x0 + 1, y0 + 1); `wx` and `wy` are the fractional offsets.
pub fn interpolate_2d<T: Float>(wx: T, wy: T, v00: T, v10: T, v01: T, v11: T) -> T {
    let one = T::one();
    (one - wx) * (one - wy) * v00 + wx * (one - wy) * v10 + (one - wx) * wy * v01 + wx * wy * v11
}

/// Upper-left corner of a `width x height` window centred on integer pixel `center`.
///
/// A window that cannot be addressed with `i64` pixel indices is reported as
/// out of bounds of `band`.
fn window_origin(
    band: &dyn RasterSource,
    center_x: i64,
    center_y: i64,
    width: usize,
    height: usize,
) -> CoregResult<(i64, i64)> {
    let corner = |center: i64, size: usize| {
        i64::try_from(size / 2)
            .ok()
            .and_then(|half| center.checked_sub(half))
            .and_then(|origin| origin.checked_add(1))
    };

    match (corner(center_x, width), corner(center_y, height)) {
        (Some(xul), Some(yul)) => Ok((xul, yul)),
        _ => {
            let (raster_width, raster_height) = band.extent();
            Err(CoregError::OutOfBounds {
                x: center_x,
                y: center_y,
                width,
                height,
                raster_width,
                raster_height,
            })
        }
    }
}

fn check_dimensions(width: usize, height: usize) -> CoregResult<()> {
    if width == 0 || height == 0 {
        return Err(CoregError::InvalidInput(format!(
            "Imagette dimensions must be positive, got {}x{}",
            width, height
        )));
    }
    Ok(())
}

/// Read a `width x height` imagette at integer offsets around `(center_x, center_y)`.
///
/// Columns `center_x - width/2 + 1 ..= center_x + width/2` are read, rows
/// likewise. No interpolation takes place.
pub fn extract_aligned(
    band: &dyn RasterSource,
    center_x: i64,
    center_y: i64,
    width: usize,
    height: usize,
) -> CoregResult<Imagette> {
    check_dimensions(width, height)?;

    let (xul, yul) = window_origin(band, center_x, center_y, width, height)?;
    let rect = TileRect::new(xul, yul, width as i64, height as i64);
    band.read_window(&rect)
}

/// Read a `width x height` imagette around a fractional center using
/// bilinear interpolation.
///
/// A `(width + 1) x (height + 1)` window is staged so the far edge can be
/// interpolated; if it leaves the raster the call fails with `OutOfBounds`.
pub fn extract_resampled(
    band: &dyn RasterSource,
    center: &PixelPos,
    width: usize,
    height: usize,
) -> CoregResult<Imagette> {
    check_dimensions(width, height)?;
    if !center.x.is_finite() || !center.y.is_finite() {
        return Err(CoregError::InvalidInput(format!(
            "Imagette center is not finite: ({}, {})",
            center.x, center.y
        )));
    }

    let base_x = center.x.floor();
    let base_y = center.y.floor();
    let wx = center.x - base_x;
    let wy = center.y - base_y;

    // casts saturate; the staged window is then rejected by the bounds check
    let (xul, yul) = window_origin(band, base_x as i64, base_y as i64, width, height)?;
    let rect = TileRect::new(xul, yul, width as i64 + 1, height as i64 + 1);
    let staged = band.read_window(&rect)?;

    // every target cell shares the same fractional offset
    let imagette = Array2::from_shape_fn((height, width), |(j, i)| {
        interpolate_2d(
            wx,
            wy,
            staged[[j, i]],
            staged[[j, i + 1]],
            staged[[j + 1, i]],
            staged[[j + 1, i + 1]],
        )
    });

    Ok(imagette)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::raster::BandRaster;
    use approx::assert_abs_diff_eq;

    fn plane() -> BandRaster {
        BandRaster::from_fn("Amplitude", "amplitude", 32, 32, |x, y| 2.0 * x + 5.0 * y + 1.0)
    }

    #[test]
    fn test_interpolate_at_integer_is_exact() {
        let v = interpolate_2d(0.0, 0.0, 1.2345678, 9.0, -3.0, 100.0);
        assert_eq!(v, 1.2345678);

        let v = interpolate_2d(0.0f32, 0.0f32, 7.25f32, 1.0, 2.0, 3.0);
        assert_eq!(v, 7.25f32);
    }

    #[test]
    fn test_interpolate_weights() {
        assert_abs_diff_eq!(interpolate_2d(0.5, 0.0, 0.0, 10.0, 20.0, 30.0), 5.0);
        assert_abs_diff_eq!(interpolate_2d(0.0, 0.5, 0.0, 10.0, 20.0, 30.0), 10.0);
        assert_abs_diff_eq!(interpolate_2d(0.5, 0.5, 0.0, 10.0, 20.0, 30.0), 15.0);
    }

    #[test]
    fn test_extract_aligned_window() {
        let band = plane();
        let imagette = extract_aligned(&band, 10, 12, 8, 4).unwrap();

        assert_eq!(imagette.dim(), (4, 8));
        // upper-left sample is (10 - 4 + 1, 12 - 2 + 1) = (7, 11)
        assert_eq!(imagette[[0, 0]], 2.0 * 7.0 + 5.0 * 11.0 + 1.0);
        // lower-right sample is (10 + 4, 12 + 2)
        assert_eq!(imagette[[3, 7]], 2.0 * 14.0 + 5.0 * 14.0 + 1.0);
    }

    #[test]
    fn test_extract_resampled_matches_aligned_at_integer_center() {
        let band = plane();
        let aligned = extract_aligned(&band, 15, 16, 8, 8).unwrap();
        let resampled = extract_resampled(&band, &PixelPos::new(15.0, 16.0), 8, 8).unwrap();
        assert_eq!(aligned, resampled);
    }

    #[test]
    fn test_extract_resampled_fractional_center() {
        let band = plane();
        let imagette = extract_resampled(&band, &PixelPos::new(15.25, 16.5), 8, 8).unwrap();

        // a plane is reproduced exactly by bilinear interpolation
        for ((j, i), v) in imagette.indexed_iter() {
            let x = 15.25 - 4.0 + i as f64 + 1.0;
            let y = 16.5 - 4.0 + j as f64 + 1.0;
            assert_abs_diff_eq!(*v, 2.0 * x + 5.0 * y + 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_extract_out_of_bounds() {
        let band = plane();
        assert!(matches!(
            extract_aligned(&band, 2, 16, 8, 8),
            Err(CoregError::OutOfBounds { .. })
        ));
        // aligned fits, but the interpolation margin does not
        assert!(extract_aligned(&band, 27, 16, 8, 8).is_ok());
        assert!(matches!(
            extract_resampled(&band, &PixelPos::new(27.0, 16.0), 8, 8),
            Err(CoregError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_extreme_centers_are_out_of_bounds() {
        let band = plane();
        for center in [
            PixelPos::new(1e19, 10.0),
            PixelPos::new(-1e19, 10.0),
            PixelPos::new(10.0, 1e19),
            PixelPos::new(10.0, -1e19),
            PixelPos::new(f64::MAX, f64::MIN),
        ] {
            assert!(
                matches!(
                    extract_resampled(&band, &center, 16, 16),
                    Err(CoregError::OutOfBounds { .. })
                ),
                "center {:?}",
                center
            );
        }

        for (x, y) in [(i64::MAX, 10), (i64::MIN, 10), (10, i64::MAX), (10, i64::MIN)] {
            assert!(matches!(
                extract_aligned(&band, x, y, 16, 16),
                Err(CoregError::OutOfBounds { .. })
            ));
        }
    }
}
