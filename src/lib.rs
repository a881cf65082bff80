//! sarcoreg: sub-pixel ground control point selection for SAR co-registration
//!
//! Given a master and a slave raster, their geocodings and a list of master
//! GCPs, this library finds the matching slave GCP positions. Each slave
//! position is estimated through geocoding and then refined by iterated,
//! upsampled FFT cross-correlation of small imagettes around the point.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    ControlPoint, CoregError, CoregResult, GcpDiagnostic, GcpFailureReason, GeoPos,
    GeoTransform, MasterGcp, PixelPos, ShiftVector,
};

pub use crate::io::{AffineGeoCoding, BandRaster, CoregProduct, GeoCoding, RasterSource};
pub use crate::core::{CoregScene, GcpSelectionParams, GcpSelector, RegistrationReport, TileRect};
