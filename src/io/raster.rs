use crate::core::tiling::TileRect;
use crate::types::{CoregError, CoregResult, SarImage, SarRealImage};
use ndarray::{s, Array2};

/// Read-only access to the samples of one raster band.
///
/// Implementations must be safe to share between worker threads; the
/// registration loop only ever reads from them.
pub trait RasterSource: Send + Sync {
    /// Raster size as `(width, height)`
    fn extent(&self) -> (usize, usize);

    /// Bounds-checked point sample
    fn sample(&self, x: i64, y: i64) -> CoregResult<f64>;

    /// Rectangle covering the whole raster
    fn bounds(&self) -> TileRect {
        let (width, height) = self.extent();
        TileRect::new(0, 0, width as i64, height as i64)
    }

    /// Copy a rectangular window into memory, rows along axis 0.
    ///
    /// Fails with `OutOfBounds` if any part of the window lies outside the
    /// raster.
    fn read_window(&self, rect: &TileRect) -> CoregResult<Array2<f64>> {
        check_window(self.extent(), rect)?;

        let mut window = Array2::<f64>::zeros((rect.height as usize, rect.width as usize));
        for (x, y) in rect.positions() {
            window[[(y - rect.y) as usize, (x - rect.x) as usize]] = self.sample(x, y)?;
        }
        Ok(window)
    }
}

/// Verify that `rect` is non-empty and fits inside a raster of `extent`
pub fn check_window(extent: (usize, usize), rect: &TileRect) -> CoregResult<()> {
    let (width, height) = extent;
    let raster = TileRect::new(0, 0, width as i64, height as i64);

    if rect.is_empty() || !raster.contains_rect(rect) {
        return Err(CoregError::OutOfBounds {
            x: rect.x,
            y: rect.y,
            width: rect.width.max(0) as usize,
            height: rect.height.max(0) as usize,
            raster_width: width,
            raster_height: height,
        });
    }
    Ok(())
}

/// In-memory raster band
#[derive(Debug, Clone)]
pub struct BandRaster {
    pub name: String,
    pub unit: String,
    data: SarRealImage,
}

impl BandRaster {
    /// Wrap real-valued samples (rows along axis 0)
    pub fn new(name: &str, unit: &str, data: SarRealImage) -> Self {
        Self {
            name: name.to_string(),
            unit: unit.to_string(),
            data,
        }
    }

    /// Build an amplitude band from complex SLC samples
    pub fn from_complex(name: &str, unit: &str, data: &SarImage) -> Self {
        log::debug!("Converting {}x{} complex band '{}' to amplitude",
                    data.nrows(), data.ncols(), name);
        Self::new(name, unit, data.mapv(|z| z.norm()))
    }

    /// Build a band by evaluating `f(x, y)` at every pixel
    pub fn from_fn<F>(name: &str, unit: &str, width: usize, height: usize, f: F) -> Self
    where
        F: Fn(f64, f64) -> f64,
    {
        let data = Array2::from_shape_fn((height, width), |(row, col)| {
            f(col as f64, row as f64) as f32
        });
        Self::new(name, unit, data)
    }

    pub fn data(&self) -> &SarRealImage {
        &self.data
    }
}

impl RasterSource for BandRaster {
    fn extent(&self) -> (usize, usize) {
        (self.data.ncols(), self.data.nrows())
    }

    fn sample(&self, x: i64, y: i64) -> CoregResult<f64> {
        let (width, height) = self.extent();
        if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
            return Err(CoregError::OutOfBounds {
                x,
                y,
                width: 1,
                height: 1,
                raster_width: width,
                raster_height: height,
            });
        }
        Ok(self.data[[y as usize, x as usize]] as f64)
    }

    fn read_window(&self, rect: &TileRect) -> CoregResult<Array2<f64>> {
        check_window(self.extent(), rect)?;

        let (x0, y0) = (rect.x as usize, rect.y as usize);
        let (x1, y1) = (x0 + rect.width as usize, y0 + rect.height as usize);
        Ok(self.data.slice(s![y0..y1, x0..x1]).mapv(|v| v as f64))
    }
}
