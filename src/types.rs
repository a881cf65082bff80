use num_complex::Complex;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Complex-valued SAR data type (I + jQ)
pub type SarComplex = Complex<f32>;

/// Real-valued intensity or amplitude data
pub type SarReal = f32;

/// 2D complex SAR data array (azimuth x range)
pub type SarImage = Array2<SarComplex>;

/// 2D real SAR data array (azimuth x range)
pub type SarRealImage = Array2<SarReal>;

/// Fractional pixel position (x = column, y = row)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PixelPos {
    pub x: f64,
    pub y: f64,
}

impl PixelPos {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Geodetic position in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPos {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPos {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

/// Master keypoint supplied with the reference product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterGcp {
    pub name: String,
    pub label: String,
    pub description: String,
    pub geo_pos: GeoPos,
    pub pixel_pos: PixelPos,
}

impl MasterGcp {
    /// Create a keypoint whose label matches its name
    pub fn new(name: &str, geo_pos: GeoPos, pixel_pos: PixelPos) -> Self {
        Self {
            name: name.to_string(),
            label: name.to_string(),
            description: String::new(),
            geo_pos,
            pixel_pos,
        }
    }
}

/// Refined control point emitted for the slave product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPoint {
    /// Index of the originating master GCP
    pub index: usize,
    pub name: String,
    pub label: String,
    pub description: String,
    pub geo_pos: GeoPos,
    pub master_pixel_pos: PixelPos,
    pub slave_pixel_pos: PixelPos,
    /// Number of correlation iterations spent refining the slave position
    pub iterations: usize,
    pub valid: bool,
}

/// Sub-pixel offset produced by one correlation pass
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ShiftVector {
    pub row_shift: f64,
    pub col_shift: f64,
}

impl ShiftVector {
    pub fn new(row_shift: f64, col_shift: f64) -> Self {
        Self { row_shift, col_shift }
    }

    /// True when both components are strictly below `tolerance`
    pub fn within(&self, tolerance: f64) -> bool {
        self.row_shift.abs() < tolerance && self.col_shift.abs() < tolerance
    }
}

/// Why a master GCP was dropped from the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GcpFailureReason {
    OutOfBounds,
    DegenerateCorrelation,
    NoConvergence,
}

impl std::fmt::Display for GcpFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GcpFailureReason::OutOfBounds => write!(f, "OUT_OF_BOUNDS"),
            GcpFailureReason::DegenerateCorrelation => write!(f, "DEGENERATE_CORRELATION"),
            GcpFailureReason::NoConvergence => write!(f, "NO_CONVERGENCE"),
        }
    }
}

/// Diagnostic record for a dropped GCP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcpDiagnostic {
    pub index: usize,
    pub name: String,
    pub reason: GcpFailureReason,
    pub detail: String,
}

/// Error types for co-registration
#[derive(Debug, thiserror::Error)]
pub enum CoregError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Window [{x}, {y}] {width}x{height} is outside the {raster_width}x{raster_height} raster")]
    OutOfBounds {
        x: i64,
        y: i64,
        width: usize,
        height: usize,
        raster_width: usize,
        raster_height: usize,
    },

    #[error("Degenerate correlation surface: {0}")]
    DegenerateCorrelation(String),

    #[error("No convergence after {iterations} iterations")]
    NonConvergence { iterations: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

impl CoregError {
    /// Map a per-GCP error onto its diagnostic reason.
    ///
    /// Returns `None` for errors that abort the whole batch.
    pub fn failure_reason(&self) -> Option<GcpFailureReason> {
        match self {
            CoregError::OutOfBounds { .. } => Some(GcpFailureReason::OutOfBounds),
            CoregError::DegenerateCorrelation(_) => Some(GcpFailureReason::DegenerateCorrelation),
            CoregError::NonConvergence { .. } => Some(GcpFailureReason::NoConvergence),
            _ => None,
        }
    }
}

/// Result type for co-registration operations
pub type CoregResult<T> = Result<T, CoregError>;
