//! Core co-registration modules

pub mod tiling;
pub mod imagette;
pub mod correlation;
pub mod gcp_selection;

// Re-export main types
pub use tiling::{tile_grid, TilePositions, TileRect, DEFAULT_TILE_HEIGHT};
pub use imagette::{extract_aligned, extract_resampled, interpolate_2d, Imagette};
pub use correlation::{CorrelationPeak, CrossCorrelator};
pub use gcp_selection::{
    CoregScene, GcpOutcome, GcpSelectionParams, GcpSelector, GcpState, Refinement,
    RegistrationReport, TileRegistration,
};
