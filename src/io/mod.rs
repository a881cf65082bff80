//! In-memory access to product bands, geocoding and GCP groups

pub mod raster;
pub mod geocoding;
pub mod product;

pub use raster::{BandRaster, RasterSource};
pub use geocoding::{AffineGeoCoding, GeoCoding};
pub use product::{select_bands, CoregProduct};
