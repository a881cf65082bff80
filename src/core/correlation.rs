//! Frequency-domain cross-correlation of imagettes
//!
//! The correlation surface is the magnitude of
//! `IFFT(upsample(FFT(master) * conj(FFT(slave))))`. Upsampling pads the
//! centred cross spectrum with zeros, which interpolates the surface by the
//! row/column factors without adding new frequency content. The peak of the
//! surface gives the sub-pixel offset of the slave imagette.

use crate::core::imagette::Imagette;
use crate::types::{CoregError, CoregResult, ShiftVector};
use ndarray::{s, Array2, Axis};
use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

type Complex64 = Complex<f64>;

/// Relative dynamic range below which a surface carries no usable peak
const FLAT_SURFACE_THRESHOLD: f64 = 1e-9;

/// Location and strength of the correlation maximum
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationPeak {
    pub row: usize,
    pub col: usize,
    pub value: f64,
    /// Mean of the whole correlation surface
    pub mean: f64,
}

impl CorrelationPeak {
    /// Peak to mean ratio, a rough quality measure
    pub fn quality(&self) -> f64 {
        if self.mean > 0.0 {
            self.value / self.mean
        } else {
            0.0
        }
    }
}

/// Cross-correlator for fixed-size imagettes.
///
/// FFT plans are built once and shared, so one correlator can serve many
/// worker threads.
pub struct CrossCorrelator {
    width: usize,
    height: usize,
    row_factor: usize,
    col_factor: usize,
    forward_rows: Arc<dyn Fft<f64>>,
    forward_cols: Arc<dyn Fft<f64>>,
    inverse_rows: Arc<dyn Fft<f64>>,
    inverse_cols: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for CrossCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossCorrelator")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("row_factor", &self.row_factor)
            .field("col_factor", &self.col_factor)
            .finish()
    }
}

fn check_power_of_two(name: &str, value: usize, min: usize) -> CoregResult<()> {
    if value < min || !value.is_power_of_two() {
        return Err(CoregError::Configuration(format!(
            "{} must be a power of two not below {}, got {}",
            name, min, value
        )));
    }
    Ok(())
}

impl CrossCorrelator {
    /// Create a correlator for `width x height` imagettes.
    ///
    /// `row_factor` upsamples the vertical axis, `col_factor` the horizontal
    /// one. All four values must be powers of two.
    pub fn new(width: usize, height: usize, row_factor: usize, col_factor: usize) -> CoregResult<Self> {
        check_power_of_two("Imagette width", width, 2)?;
        check_power_of_two("Imagette height", height, 2)?;
        check_power_of_two("Row upsampling factor", row_factor, 1)?;
        check_power_of_two("Column upsampling factor", col_factor, 1)?;

        let mut planner = FftPlanner::new();
        let forward_rows = planner.plan_fft_forward(width);
        let forward_cols = planner.plan_fft_forward(height);
        let inverse_rows = planner.plan_fft_inverse(width * col_factor);
        let inverse_cols = planner.plan_fft_inverse(height * row_factor);

        Ok(Self {
            width,
            height,
            row_factor,
            col_factor,
            forward_rows,
            forward_cols,
            inverse_rows,
            inverse_cols,
        })
    }

    /// Imagette size as `(width, height)`
    pub fn window(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Size of the upsampled surface as `(rows, cols)`
    pub fn surface_dim(&self) -> (usize, usize) {
        (self.height * self.row_factor, self.width * self.col_factor)
    }

    /// Finest shift step the correlator can resolve
    pub fn achievable_accuracy(&self) -> f64 {
        1.0 / self.row_factor.max(self.col_factor) as f64
    }

    fn check_imagette(&self, name: &str, imagette: &Imagette) -> CoregResult<()> {
        if imagette.dim() != (self.height, self.width) {
            return Err(CoregError::InvalidInput(format!(
                "{} imagette is {}x{}, correlator expects {}x{}",
                name,
                imagette.ncols(),
                imagette.nrows(),
                self.width,
                self.height
            )));
        }
        Ok(())
    }

    /// Forward 2D transform of a real imagette
    fn spectrum(&self, imagette: &Imagette) -> Array2<Complex64> {
        let mut data = imagette.mapv(|v| Complex64::new(v, 0.0));
        fft_lanes(&mut data, Axis(1), self.forward_rows.as_ref());
        fft_lanes(&mut data, Axis(0), self.forward_cols.as_ref());
        data
    }

    /// Zero-pad a cross spectrum to the upsampled size.
    ///
    /// The spectrum is centred with a periodic shift, padded symmetrically and
    /// shifted back so the DC term returns to the origin.
    fn upsample(&self, spectrum: &Array2<Complex64>) -> Array2<Complex64> {
        let (rows, cols) = spectrum.dim();
        let (up_rows, up_cols) = self.surface_dim();

        let centred = periodic_shift(spectrum, rows / 2, cols / 2);

        let top = (up_rows - rows) / 2;
        let left = (up_cols - cols) / 2;
        let mut padded = Array2::<Complex64>::zeros((up_rows, up_cols));
        padded
            .slice_mut(s![top..top + rows, left..left + cols])
            .assign(&centred);

        periodic_shift(&padded, up_rows / 2, up_cols / 2)
    }

    /// Compute the upsampled correlation surface of two imagettes
    pub fn correlation_surface(&self, master: &Imagette, slave: &Imagette) -> CoregResult<Array2<f64>> {
        self.check_imagette("Master", master)?;
        self.check_imagette("Slave", slave)?;

        let master_spectrum = self.spectrum(master);
        let slave_spectrum = self.spectrum(slave);

        let cross_spectrum = ndarray::Zip::from(&master_spectrum)
            .and(&slave_spectrum)
            .map_collect(|m, s| *m * s.conj());

        let mut correlated = self.upsample(&cross_spectrum);
        fft_lanes(&mut correlated, Axis(1), self.inverse_rows.as_ref());
        fft_lanes(&mut correlated, Axis(0), self.inverse_cols.as_ref());

        let scale = 1.0 / correlated.len() as f64;
        Ok(correlated.mapv(|z| z.norm() * scale))
    }

    /// Locate the correlation peak, rejecting degenerate surfaces
    pub fn correlate(&self, master: &Imagette, slave: &Imagette) -> CoregResult<CorrelationPeak> {
        let surface = self.correlation_surface(master, slave)?;
        let peak = locate_peak(&surface)?;

        log::trace!("Correlation peak {:.4e} at ({}, {}), mean {:.4e}",
                    peak.value, peak.row, peak.col, peak.mean);
        Ok(peak)
    }

    /// Estimate the offset of the slave imagette relative to the master one.
    ///
    /// Adding the returned shift to the slave position moves it onto the
    /// master feature.
    pub fn estimate_shift(&self, master: &Imagette, slave: &Imagette) -> CoregResult<ShiftVector> {
        let peak = self.correlate(master, slave)?;
        let (rows, cols) = self.surface_dim();

        Ok(ShiftVector::new(
            wrapped_shift(peak.row, rows, self.row_factor),
            wrapped_shift(peak.col, cols, self.col_factor),
        ))
    }
}

/// Run `fft` over every lane of `data` along `axis`
fn fft_lanes(data: &mut Array2<Complex64>, axis: Axis, fft: &dyn Fft<f64>) {
    let mut buffer = vec![Complex64::new(0.0, 0.0); data.len_of(axis)];
    let mut scratch = vec![Complex64::new(0.0, 0.0); fft.get_inplace_scratch_len()];

    for mut lane in data.lanes_mut(axis) {
        buffer.iter_mut().zip(lane.iter()).for_each(|(b, v)| *b = *v);
        fft.process_with_scratch(&mut buffer, &mut scratch);
        lane.iter_mut().zip(buffer.iter()).for_each(|(v, b)| *v = *b);
    }
}

/// Circularly move the contents of `array` down by `shift_rows` and right by `shift_cols`
pub fn periodic_shift<T: Clone>(array: &Array2<T>, shift_rows: usize, shift_cols: usize) -> Array2<T> {
    let (rows, cols) = array.dim();
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let src_r = (r + rows - shift_rows % rows) % rows;
        let src_c = (c + cols - shift_cols % cols) % cols;
        array[[src_r, src_c]].clone()
    })
}

/// Find the maximum of a correlation surface, first occurrence in row-major order.
///
/// Fails with `DegenerateCorrelation` for zero-mean, flat or non-finite surfaces.
pub fn locate_peak(surface: &Array2<f64>) -> CoregResult<CorrelationPeak> {
    if surface.is_empty() {
        return Err(CoregError::DegenerateCorrelation("empty correlation surface".to_string()));
    }

    let mut peak = CorrelationPeak {
        row: 0,
        col: 0,
        value: surface[[0, 0]],
        mean: 0.0,
    };
    let mut min = f64::INFINITY;
    let mut sum = 0.0;

    for ((r, c), &v) in surface.indexed_iter() {
        if !v.is_finite() {
            return Err(CoregError::DegenerateCorrelation(format!(
                "non-finite correlation value at ({}, {})",
                r, c
            )));
        }
        if v > peak.value {
            peak.row = r;
            peak.col = c;
            peak.value = v;
        }
        min = min.min(v);
        sum += v;
    }
    peak.mean = sum / surface.len() as f64;

    if peak.mean == 0.0 {
        return Err(CoregError::DegenerateCorrelation("zero-mean correlation surface".to_string()));
    }
    if peak.value - min <= FLAT_SURFACE_THRESHOLD * peak.value.abs() {
        return Err(CoregError::DegenerateCorrelation("flat correlation surface".to_string()));
    }

    Ok(peak)
}

/// Convert a peak index on a periodic axis of `size` cells to a signed shift
fn wrapped_shift(peak: usize, size: usize, factor: usize) -> f64 {
    if peak <= size / 2 {
        -(peak as f64) / factor as f64
    } else {
        (size - peak) as f64 / factor as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Smooth field of Gaussian blobs at pseudo-random positions
    fn blob_field(extent: f64, count: usize) -> impl Fn(f64, f64) -> f64 {
        let mut seed: u64 = 0x853c_49e6_748f_ea9b;
        let mut next = move || {
            seed = seed
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (seed >> 11) as f64 / (1u64 << 53) as f64
        };
        let blobs: Vec<(f64, f64, f64, f64)> = (0..count)
            .map(|_| (next() * extent, next() * extent, 0.5 + next(), 1.5 + 2.0 * next()))
            .collect();

        move |x, y| {
            blobs.iter().fold(0.0, |acc, &(bx, by, amp, sigma)| {
                let d2 = (x - bx).powi(2) + (y - by).powi(2);
                acc + amp * (-d2 / (2.0 * sigma * sigma)).exp()
            })
        }
    }

    fn window(f: &impl Fn(f64, f64) -> f64, x0: f64, y0: f64, size: usize) -> Imagette {
        Array2::from_shape_fn((size, size), |(r, c)| f(x0 + c as f64, y0 + r as f64))
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        assert!(matches!(CrossCorrelator::new(48, 64, 2, 2), Err(CoregError::Configuration(_))));
        assert!(matches!(CrossCorrelator::new(64, 64, 3, 2), Err(CoregError::Configuration(_))));
        assert!(matches!(CrossCorrelator::new(64, 1, 2, 2), Err(CoregError::Configuration(_))));
        assert!(CrossCorrelator::new(32, 64, 4, 1).is_ok());
    }

    #[test]
    fn test_rejects_wrong_imagette_size() {
        let correlator = CrossCorrelator::new(16, 16, 2, 2).unwrap();
        let a = Array2::<f64>::zeros((16, 16));
        let b = Array2::<f64>::zeros((16, 8));
        assert!(matches!(correlator.estimate_shift(&a, &b), Err(CoregError::InvalidInput(_))));
    }

    #[test]
    fn test_periodic_shift_wraps() {
        let a = Array2::from_shape_vec((2, 3), vec![1, 2, 3, 4, 5, 6]).unwrap();
        let shifted = periodic_shift(&a, 1, 1);
        assert_eq!(shifted, Array2::from_shape_vec((2, 3), vec![6, 4, 5, 3, 1, 2]).unwrap());
        assert_eq!(periodic_shift(&shifted, 1, 2), a);
    }

    #[test]
    fn test_surface_dimensions_follow_factors() {
        let correlator = CrossCorrelator::new(16, 8, 4, 2).unwrap();
        let field = blob_field(64.0, 40);
        let a = Array2::from_shape_fn((8, 16), |(r, c)| field(c as f64 + 10.0, r as f64 + 10.0));

        let surface = correlator.correlation_surface(&a, &a).unwrap();
        assert_eq!(surface.dim(), (32, 32));
        assert_eq!(correlator.achievable_accuracy(), 0.25);
    }

    #[test]
    fn test_identical_imagettes_zero_shift() {
        let correlator = CrossCorrelator::new(32, 32, 4, 4).unwrap();
        let field = blob_field(64.0, 60);
        let master = window(&field, 12.0, 9.0, 32);

        let peak = correlator.correlate(&master, &master).unwrap();
        assert_eq!((peak.row, peak.col), (0, 0));
        assert!(peak.quality() > 1.0);

        let shift = correlator.estimate_shift(&master, &master).unwrap();
        assert_abs_diff_eq!(shift.row_shift, 0.0);
        assert_abs_diff_eq!(shift.col_shift, 0.0);
    }

    #[test]
    fn test_circular_integer_shift_recovered() {
        let correlator = CrossCorrelator::new(32, 32, 2, 4).unwrap();
        let field = blob_field(64.0, 60);
        let master = window(&field, 16.0, 16.0, 32);

        for (dr, dc) in [(3i64, -5i64), (-7, 2), (0, 9), (12, -12)] {
            // slave samples the master content `d` cells further along
            let slave = Array2::from_shape_fn((32, 32), |(r, c)| {
                let sr = (r as i64 + dr).rem_euclid(32) as usize;
                let sc = (c as i64 + dc).rem_euclid(32) as usize;
                master[[sr, sc]]
            });

            let shift = correlator.estimate_shift(&master, &slave).unwrap();
            assert_abs_diff_eq!(shift.row_shift, -dr as f64, epsilon = 1e-12);
            assert_abs_diff_eq!(shift.col_shift, -dc as f64, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_non_square_circular_shift_recovered() {
        // 32 columns by 16 rows, upsampled 2x along rows and 4x along columns
        let correlator = CrossCorrelator::new(32, 16, 2, 4).unwrap();
        let field = blob_field(64.0, 60);
        let master = Array2::from_shape_fn((16, 32), |(r, c)| field(16.0 + c as f64, 20.0 + r as f64));

        for (dr, dc) in [(3i64, -5i64), (-6, 11), (7, 2)] {
            let slave = Array2::from_shape_fn((16, 32), |(r, c)| {
                let sr = (r as i64 + dr).rem_euclid(16) as usize;
                let sc = (c as i64 + dc).rem_euclid(32) as usize;
                master[[sr, sc]]
            });

            let shift = correlator.estimate_shift(&master, &slave).unwrap();
            assert_abs_diff_eq!(shift.row_shift, -dr as f64, epsilon = 1e-12);
            assert_abs_diff_eq!(shift.col_shift, -dc as f64, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_windowed_integer_shift_recovered() {
        let correlator = CrossCorrelator::new(32, 32, 2, 2).unwrap();
        let field = blob_field(96.0, 150);
        let master = window(&field, 32.0, 32.0, 32);
        let slave = window(&field, 32.0 - 5.0, 32.0 + 3.0, 32);

        let shift = correlator.estimate_shift(&master, &slave).unwrap();
        assert_abs_diff_eq!(shift.row_shift, -3.0, epsilon = 0.5);
        assert_abs_diff_eq!(shift.col_shift, 5.0, epsilon = 0.5);
    }

    #[test]
    fn test_constant_imagettes_are_degenerate() {
        let correlator = CrossCorrelator::new(16, 16, 2, 2).unwrap();
        let flat = Array2::from_elem((16, 16), 7.5);

        let result = correlator.estimate_shift(&flat, &flat);
        assert!(matches!(result, Err(CoregError::DegenerateCorrelation(_))));
    }

    #[test]
    fn test_zero_imagettes_are_degenerate() {
        let correlator = CrossCorrelator::new(16, 16, 2, 2).unwrap();
        let field = blob_field(32.0, 20);
        let textured = window(&field, 0.0, 0.0, 16);
        let zeros = Array2::<f64>::zeros((16, 16));

        let result = correlator.estimate_shift(&textured, &zeros);
        assert!(matches!(result, Err(CoregError::DegenerateCorrelation(_))));
    }

    #[test]
    fn test_locate_peak_first_occurrence() {
        let surface = Array2::from_shape_vec((2, 3), vec![1.0, 3.0, 0.5, 3.0, 2.0, 3.0]).unwrap();
        let peak = locate_peak(&surface).unwrap();
        assert_eq!((peak.row, peak.col), (0, 1));
        assert_abs_diff_eq!(peak.mean, 12.5 / 6.0);
    }

    #[test]
    fn test_locate_peak_rejects_non_finite() {
        let surface = Array2::from_shape_vec((2, 2), vec![1.0, f64::NAN, 0.5, 2.0]).unwrap();
        assert!(matches!(locate_peak(&surface), Err(CoregError::DegenerateCorrelation(_))));
    }

    #[test]
    fn test_wrapped_shift() {
        assert_eq!(wrapped_shift(0, 64, 2), 0.0);
        assert_eq!(wrapped_shift(5, 64, 2), -2.5);
        assert_eq!(wrapped_shift(32, 64, 2), -16.0);
        assert_eq!(wrapped_shift(33, 64, 2), 15.5);
        assert_eq!(wrapped_shift(63, 64, 4), 0.25);
    }
}
