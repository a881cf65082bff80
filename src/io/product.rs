use crate::io::geocoding::GeoCoding;
use crate::io::raster::{BandRaster, RasterSource};
use crate::types::{CoregError, CoregResult, MasterGcp};
use std::sync::Arc;

/// A product taking part in co-registration: its bands, geocoding and GCP group
#[derive(Clone)]
pub struct CoregProduct {
    pub name: String,
    pub bands: Vec<BandRaster>,
    pub geocoding: Arc<dyn GeoCoding>,
    pub gcps: Vec<MasterGcp>,
}

impl std::fmt::Debug for CoregProduct {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoregProduct")
            .field("name", &self.name)
            .field("bands", &self.bands.iter().map(|b| &b.name).collect::<Vec<_>>())
            .field("gcps", &self.gcps.len())
            .finish()
    }
}

impl CoregProduct {
    pub fn new(name: &str, bands: Vec<BandRaster>, geocoding: Arc<dyn GeoCoding>) -> Self {
        Self {
            name: name.to_string(),
            bands,
            geocoding,
            gcps: Vec::new(),
        }
    }

    pub fn with_gcps(mut self, gcps: Vec<MasterGcp>) -> Self {
        self.gcps = gcps;
        self
    }

    pub fn band(&self, name: &str) -> Option<&BandRaster> {
        self.bands.iter().find(|b| b.name == name)
    }

    /// Scene size of the first band as `(width, height)`
    pub fn scene_extent(&self) -> Option<(usize, usize)> {
        self.bands.first().map(|b| b.extent())
    }
}

/// Pick the master and slave bands to correlate.
///
/// Names take the form `band::product`. With no names the first band of each
/// product is used. A named slave band that does not exist falls back to the
/// first slave band sharing the master band's unit.
pub fn select_bands<'a>(
    master: &'a CoregProduct,
    slave: &'a CoregProduct,
    band_names: &[String],
) -> CoregResult<(&'a BandRaster, &'a BandRaster)> {
    if band_names.is_empty() {
        let master_band = master.bands.first().ok_or_else(|| {
            CoregError::InvalidInput(format!("Product '{}' has no bands", master.name))
        })?;
        let slave_band = slave.bands.first().ok_or_else(|| {
            CoregError::InvalidInput(format!("Product '{}' has no bands", slave.name))
        })?;
        return Ok((master_band, slave_band));
    }

    let mut master_band: Option<&BandRaster> = None;
    let mut slave_band: Option<&BandRaster> = None;
    let mut master_count = 0;
    let mut slave_count = 0;

    for name in band_names {
        let Some((band_name, product_name)) = name.split_once("::") else {
            log::warn!("Ignoring band name without product suffix: {}", name);
            continue;
        };

        if product_name == master.name {
            master_band = master.band(band_name);
            master_count += 1;
        } else {
            slave_band = slave.band(band_name).or_else(|| {
                master_band.and_then(|m| slave.bands.iter().find(|b| b.unit == m.unit))
            });
            slave_count += 1;
        }
    }

    if master_count != 1 || slave_count != 1 {
        return Err(CoregError::InvalidInput(
            "Please select one master band and one slave band".to_string(),
        ));
    }

    match (master_band, slave_band) {
        (Some(m), Some(s)) => {
            log::debug!("Selected master band '{}' and slave band '{}'", m.name, s.name);
            Ok((m, s))
        }
        _ => Err(CoregError::InvalidInput(format!(
            "Selected bands not found in products '{}' and '{}'",
            master.name, slave.name
        ))),
    }
}
