//! Automatic selection of slave ground control points
//!
//! For every master GCP the slave position is first estimated through the
//! geocodings of both products, then refined by repeatedly cross-correlating
//! a master imagette with a slave imagette resampled at the current estimate.
//! A point is emitted only once the correlation shift drops below the
//! configured tolerance; everything else is dropped with a diagnostic.

use crate::core::correlation::CrossCorrelator;
use crate::core::imagette::{extract_aligned, extract_resampled};
use crate::core::tiling::{tile_grid, TileRect, DEFAULT_TILE_HEIGHT};
use crate::io::geocoding::GeoCoding;
use crate::io::product::{select_bands, CoregProduct};
use crate::io::raster::RasterSource;
use crate::types::{
    ControlPoint, CoregError, CoregResult, GcpDiagnostic, GcpFailureReason, MasterGcp, PixelPos,
    ShiftVector,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// GCP selection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcpSelectionParams {
    /// Imagette width in pixels (power of two)
    pub window_width: usize,
    /// Imagette height in pixels (power of two)
    pub window_height: usize,
    /// Correlation upsampling in row direction (power of two)
    pub row_interp_factor: usize,
    /// Correlation upsampling in column direction (power of two)
    pub column_interp_factor: usize,
    /// Maximum number of correlation iterations per GCP
    pub max_iteration: usize,
    /// Shift below which a slave GCP is accepted, in pixels
    pub gcp_tolerance: f64,
}

impl Default for GcpSelectionParams {
    fn default() -> Self {
        Self {
            window_width: 64,
            window_height: 64,
            row_interp_factor: 2,
            column_interp_factor: 2,
            max_iteration: 2,
            gcp_tolerance: 0.5,
        }
    }
}

impl GcpSelectionParams {
    pub const MIN_WINDOW: usize = 4;
    pub const MAX_INTERP_FACTOR: usize = 16;
    pub const MAX_ITERATION: usize = 10;

    /// Finest shift step reachable with the chosen upsampling factors
    pub fn achievable_accuracy(&self) -> f64 {
        1.0 / self.row_interp_factor.max(self.column_interp_factor).max(1) as f64
    }

    /// Check every parameter, reporting the first offending one
    pub fn validate(&self) -> CoregResult<()> {
        for (name, value) in [
            ("window_width", self.window_width),
            ("window_height", self.window_height),
        ] {
            if value < Self::MIN_WINDOW || !value.is_power_of_two() {
                return Err(CoregError::Configuration(format!(
                    "{} must be a power of two of at least {}, got {}",
                    name,
                    Self::MIN_WINDOW,
                    value
                )));
            }
        }

        for (name, value) in [
            ("row_interp_factor", self.row_interp_factor),
            ("column_interp_factor", self.column_interp_factor),
        ] {
            if value == 0 || value > Self::MAX_INTERP_FACTOR || !value.is_power_of_two() {
                return Err(CoregError::Configuration(format!(
                    "{} must be a power of two between 1 and {}, got {}",
                    name,
                    Self::MAX_INTERP_FACTOR,
                    value
                )));
            }
        }

        if self.max_iteration == 0 || self.max_iteration > Self::MAX_ITERATION {
            return Err(CoregError::Configuration(format!(
                "max_iteration must be between 1 and {}, got {}",
                Self::MAX_ITERATION,
                self.max_iteration
            )));
        }

        if !self.gcp_tolerance.is_finite() || self.gcp_tolerance <= 0.0 {
            return Err(CoregError::Configuration(format!(
                "gcp_tolerance must be positive, got {}",
                self.gcp_tolerance
            )));
        }

        let achievable = self.achievable_accuracy();
        if self.gcp_tolerance < achievable {
            return Err(CoregError::Configuration(format!(
                "The achievable accuracy with current interpolation factors is {}, GCP tolerance {} is below it",
                achievable, self.gcp_tolerance
            )));
        }

        Ok(())
    }
}

/// Lifecycle of one GCP during registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcpState {
    Init,
    Estimating,
    Refining,
    Converged,
    Failed,
}

impl std::fmt::Display for GcpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GcpState::Init => write!(f, "INIT"),
            GcpState::Estimating => write!(f, "ESTIMATING"),
            GcpState::Refining => write!(f, "REFINING"),
            GcpState::Converged => write!(f, "CONVERGED"),
            GcpState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Read-only inputs shared by every GCP of a registration run
#[derive(Clone, Copy)]
pub struct CoregScene<'a> {
    pub master: &'a dyn RasterSource,
    pub slave: &'a dyn RasterSource,
    pub slave_geocoding: &'a dyn GeoCoding,
    pub gcps: &'a [MasterGcp],
}

/// Converged slave position of one GCP
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Refinement {
    pub position: PixelPos,
    pub iterations: usize,
    pub last_shift: ShiftVector,
}

/// Result of processing one GCP
#[derive(Debug, Clone)]
pub enum GcpOutcome {
    Converged(ControlPoint),
    Failed(GcpDiagnostic),
    Cancelled,
}

/// Control points and diagnostics for one tile
#[derive(Debug, Clone)]
pub struct TileRegistration {
    pub tile: TileRect,
    pub control_points: Vec<ControlPoint>,
    pub diagnostics: Vec<GcpDiagnostic>,
    pub cancelled: bool,
}

/// Result of registering a whole scene
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationReport {
    pub control_points: Vec<ControlPoint>,
    pub diagnostics: Vec<GcpDiagnostic>,
    pub total_gcps: usize,
    pub tiles: usize,
    pub cancelled: bool,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
}

impl RegistrationReport {
    pub fn valid_count(&self) -> usize {
        self.control_points.len()
    }

    /// Number of dropped GCPs per failure reason
    pub fn failure_counts(&self) -> HashMap<GcpFailureReason, usize> {
        let mut counts = HashMap::new();
        for diagnostic in &self.diagnostics {
            *counts.entry(diagnostic.reason).or_insert(0) += 1;
        }
        counts
    }
}

fn transition(index: usize, from: GcpState, to: GcpState) {
    log::debug!("GCP({}) {} -> {}", index, from, to);
}

fn is_cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel.map_or(false, |flag| flag.load(Ordering::Relaxed))
}

/// GCP selection processor
#[derive(Debug)]
pub struct GcpSelector {
    params: GcpSelectionParams,
    correlator: CrossCorrelator,
}

impl GcpSelector {
    /// Validate the parameters and prepare the correlator
    pub fn new(params: GcpSelectionParams) -> CoregResult<Self> {
        params.validate()?;

        let correlator = CrossCorrelator::new(
            params.window_width,
            params.window_height,
            params.row_interp_factor,
            params.column_interp_factor,
        )?;

        log::debug!("GCP selection parameters: {:?}", params);
        Ok(Self { params, correlator })
    }

    /// Create a selector with default parameters
    pub fn standard() -> CoregResult<Self> {
        Self::new(GcpSelectionParams::default())
    }

    pub fn params(&self) -> &GcpSelectionParams {
        &self.params
    }

    /// Refine a slave position by iterated cross-correlation.
    ///
    /// The master imagette is read once at the integer master position; the
    /// slave imagette is resampled at the current estimate every iteration.
    pub fn refine_slave_position(
        &self,
        master: &dyn RasterSource,
        slave: &dyn RasterSource,
        master_pos: &PixelPos,
        initial: PixelPos,
    ) -> CoregResult<Refinement> {
        let (width, height) = (self.params.window_width, self.params.window_height);
        let tolerance = self.params.gcp_tolerance;

        let master_imagette = extract_aligned(
            master,
            master_pos.x.floor() as i64,
            master_pos.y.floor() as i64,
            width,
            height,
        )?;

        let mut position = initial;
        for iteration in 1..=self.params.max_iteration {
            let slave_imagette = extract_resampled(slave, &position, width, height)?;
            let shift = self.correlator.estimate_shift(&master_imagette, &slave_imagette)?;

            position.x += shift.col_shift;
            position.y += shift.row_shift;

            log::trace!("Iteration {}: shift ({:.3}, {:.3}) -> slave ({:.3}, {:.3})",
                        iteration, shift.row_shift, shift.col_shift, position.x, position.y);

            if shift.within(tolerance) {
                return Ok(Refinement {
                    position,
                    iterations: iteration,
                    last_shift: shift,
                });
            }
        }

        Err(CoregError::NonConvergence {
            iterations: self.params.max_iteration,
        })
    }

    /// Estimate and refine the slave position of one master GCP.
    ///
    /// Failures tied to this GCP come back as [`GcpOutcome::Failed`]. Any
    /// other error, such as a raster read failure, is returned and aborts
    /// the batch.
    pub fn process_gcp(
        &self,
        scene: &CoregScene<'_>,
        index: usize,
        gcp: &MasterGcp,
    ) -> CoregResult<GcpOutcome> {
        transition(index, GcpState::Init, GcpState::Estimating);

        let failed = |reason: GcpFailureReason, detail: String| {
            transition(index, GcpState::Estimating, GcpState::Failed);
            log::warn!("GCP({}) '{}' dropped ({}): {}", index, gcp.name, reason, detail);
            GcpOutcome::Failed(GcpDiagnostic {
                index,
                name: gcp.name.clone(),
                reason,
                detail,
            })
        };

        if !scene.master.bounds().contains(&gcp.pixel_pos) {
            return Ok(failed(
                GcpFailureReason::OutOfBounds,
                format!(
                    "master position ({:.2}, {:.2}) is outside master image",
                    gcp.pixel_pos.x, gcp.pixel_pos.y
                ),
            ));
        }

        let initial = match scene.slave_geocoding.geo_to_pixel(&gcp.geo_pos) {
            Ok(pos) => pos,
            Err(e) => {
                return Ok(failed(
                    GcpFailureReason::OutOfBounds,
                    format!("slave geocoding failed: {}", e),
                ))
            }
        };

        let (slave_width, slave_height) = scene.slave.extent();
        if !(initial.x >= 0.0
            && initial.x < slave_width as f64
            && initial.y >= 0.0
            && initial.y < slave_height as f64)
        {
            return Ok(failed(
                GcpFailureReason::OutOfBounds,
                format!("initial position ({:.2}, {:.2}) is outside slave image", initial.x, initial.y),
            ));
        }

        transition(index, GcpState::Estimating, GcpState::Refining);

        match self.refine_slave_position(scene.master, scene.slave, &gcp.pixel_pos, initial) {
            Ok(refinement) => {
                transition(index, GcpState::Refining, GcpState::Converged);
                log::debug!("GCP({}) slave position ({:.3}, {:.3}) after {} iterations",
                            index, refinement.position.x, refinement.position.y, refinement.iterations);

                Ok(GcpOutcome::Converged(ControlPoint {
                    index,
                    name: gcp.name.clone(),
                    label: gcp.label.clone(),
                    description: gcp.description.clone(),
                    geo_pos: gcp.geo_pos,
                    master_pixel_pos: gcp.pixel_pos,
                    slave_pixel_pos: refinement.position,
                    iterations: refinement.iterations,
                    valid: true,
                }))
            }
            Err(e) => {
                transition(index, GcpState::Refining, GcpState::Failed);
                let reason = match e.failure_reason() {
                    Some(reason) => reason,
                    None => {
                        log::error!("GCP({}) '{}' aborted registration: {}", index, gcp.name, e);
                        return Err(e);
                    }
                };

                log::warn!("GCP({}) '{}' dropped ({}): {}", index, gcp.name, reason, e);
                Ok(GcpOutcome::Failed(GcpDiagnostic {
                    index,
                    name: gcp.name.clone(),
                    reason,
                    detail: e.to_string(),
                }))
            }
        }
    }

    /// Register the master GCPs that fall inside `tile`.
    ///
    /// GCPs outside the tile are left for the tile that contains them. The
    /// result depends only on the inputs, so a tile may be registered again.
    pub fn register_tile(
        &self,
        scene: &CoregScene<'_>,
        tile: &TileRect,
        cancel: Option<&AtomicBool>,
    ) -> CoregResult<TileRegistration> {
        let candidates: Vec<(usize, &MasterGcp)> = scene
            .gcps
            .iter()
            .enumerate()
            .filter(|(_, gcp)| tile.contains(&gcp.pixel_pos))
            .collect();

        log::debug!("Tile {:?}: {} of {} GCPs inside", tile, candidates.len(), scene.gcps.len());

        let process = |&(index, gcp): &(usize, &MasterGcp)| {
            if is_cancelled(cancel) {
                Ok(GcpOutcome::Cancelled)
            } else {
                self.process_gcp(scene, index, gcp)
            }
        };

        #[cfg(feature = "parallel")]
        let outcomes: Vec<GcpOutcome> = {
            use rayon::prelude::*;
            candidates.par_iter().map(process).collect::<CoregResult<_>>()?
        };

        #[cfg(not(feature = "parallel"))]
        let outcomes: Vec<GcpOutcome> = candidates.iter().map(process).collect::<CoregResult<_>>()?;

        let mut registration = TileRegistration {
            tile: *tile,
            control_points: Vec::new(),
            diagnostics: Vec::new(),
            cancelled: false,
        };

        for outcome in outcomes {
            match outcome {
                GcpOutcome::Converged(point) => registration.control_points.push(point),
                GcpOutcome::Failed(diagnostic) => registration.diagnostics.push(diagnostic),
                GcpOutcome::Cancelled => registration.cancelled = true,
            }
        }

        Ok(registration)
    }

    /// Register every master GCP, tiling the master raster into full-width
    /// strips of `DEFAULT_TILE_HEIGHT` rows
    pub fn register_scene(
        &self,
        scene: &CoregScene<'_>,
        cancel: Option<&AtomicBool>,
    ) -> CoregResult<RegistrationReport> {
        let (width, _) = scene.master.extent();
        self.register_scene_tiled(scene, width.max(1), DEFAULT_TILE_HEIGHT, cancel)
    }

    /// Register every master GCP using tiles of `tile_width x tile_height`
    pub fn register_scene_tiled(
        &self,
        scene: &CoregScene<'_>,
        tile_width: usize,
        tile_height: usize,
        cancel: Option<&AtomicBool>,
    ) -> CoregResult<RegistrationReport> {
        if scene.gcps.is_empty() {
            return Err(CoregError::InvalidInput("No master GCPs have been found".to_string()));
        }
        if tile_width == 0 || tile_height == 0 {
            return Err(CoregError::InvalidInput(format!(
                "Tile size must be positive, got {}x{}",
                tile_width, tile_height
            )));
        }

        let started = Utc::now();
        let (width, height) = scene.master.extent();
        let tiles = tile_grid(width, height, tile_width, tile_height);

        log::info!("Selecting slave GCPs for {} master GCPs over {} tiles ({}x{} master image)",
                   scene.gcps.len(), tiles.len(), width, height);

        #[cfg(feature = "parallel")]
        let registrations: Vec<TileRegistration> = {
            use rayon::prelude::*;
            tiles
                .par_iter()
                .map(|tile| self.register_tile(scene, tile, cancel))
                .collect::<CoregResult<_>>()?
        };

        #[cfg(not(feature = "parallel"))]
        let registrations: Vec<TileRegistration> = tiles
            .iter()
            .map(|tile| self.register_tile(scene, tile, cancel))
            .collect::<CoregResult<_>>()?;

        let mut control_points = Vec::new();
        let mut diagnostics = Vec::new();
        let mut cancelled = false;
        for registration in registrations {
            control_points.extend(registration.control_points);
            diagnostics.extend(registration.diagnostics);
            cancelled |= registration.cancelled;
        }

        // GCPs outside the master image belong to no tile
        let master_bounds = scene.master.bounds();
        for (index, gcp) in scene.gcps.iter().enumerate() {
            if !master_bounds.contains(&gcp.pixel_pos) {
                log::warn!("GCP({}) '{}' dropped ({}): outside master image",
                           index, gcp.name, GcpFailureReason::OutOfBounds);
                diagnostics.push(GcpDiagnostic {
                    index,
                    name: gcp.name.clone(),
                    reason: GcpFailureReason::OutOfBounds,
                    detail: format!(
                        "master position ({:.2}, {:.2}) is outside master image",
                        gcp.pixel_pos.x, gcp.pixel_pos.y
                    ),
                });
            }
        }

        control_points.sort_by_key(|p| p.index);
        diagnostics.sort_by_key(|d| d.index);

        let report = RegistrationReport {
            control_points,
            diagnostics,
            total_gcps: scene.gcps.len(),
            tiles: tiles.len(),
            cancelled,
            started,
            finished: Utc::now(),
        };

        log::info!("GCP selection complete: {} of {} GCPs valid, {} dropped{}",
                   report.valid_count(), report.total_gcps, report.diagnostics.len(),
                   if cancelled { " (cancelled)" } else { "" });

        Ok(report)
    }

    /// Register the GCP group of `master` against `slave`.
    ///
    /// `band_names` selects the bands to correlate, see [`select_bands`].
    pub fn register_product(
        &self,
        master: &CoregProduct,
        slave: &CoregProduct,
        band_names: &[String],
        cancel: Option<&AtomicBool>,
    ) -> CoregResult<RegistrationReport> {
        let (master_band, slave_band) = select_bands(master, slave, band_names)?;

        log::info!("Co-registering '{}' ({}) against master '{}' ({})",
                   slave.name, slave_band.name, master.name, master_band.name);

        let scene = CoregScene {
            master: master_band,
            slave: slave_band,
            slave_geocoding: slave.geocoding.as_ref(),
            gcps: &master.gcps,
        };
        self.register_scene(&scene, cancel)
    }
}
