use crate::types::{CoregError, CoregResult, GeoPos, GeoTransform, PixelPos};

/// Bidirectional mapping between geodetic and pixel positions of one raster
pub trait GeoCoding: Send + Sync {
    fn pixel_to_geo(&self, pixel: &PixelPos) -> CoregResult<GeoPos>;

    fn geo_to_pixel(&self, geo: &GeoPos) -> CoregResult<PixelPos>;
}

/// Geocoding defined by an affine geotransform
///
/// `lon = top_left_x + x * pixel_width + y * rotation_x`
/// `lat = top_left_y + x * rotation_y + y * pixel_height`
#[derive(Debug, Clone)]
pub struct AffineGeoCoding {
    transform: GeoTransform,
    inverse: [f64; 4],
}

impl AffineGeoCoding {
    pub fn new(transform: GeoTransform) -> CoregResult<Self> {
        let det = transform.pixel_width * transform.pixel_height
            - transform.rotation_x * transform.rotation_y;

        if !det.is_finite() || det.abs() < 1e-15 {
            return Err(CoregError::InvalidInput(format!(
                "Geotransform is not invertible (determinant {})",
                det
            )));
        }

        let inverse = [
            transform.pixel_height / det,
            -transform.rotation_x / det,
            -transform.rotation_y / det,
            transform.pixel_width / det,
        ];

        Ok(Self { transform, inverse })
    }

    /// North-up geocoding with square pixels of `spacing` degrees
    pub fn north_up(top_left_lon: f64, top_left_lat: f64, spacing: f64) -> CoregResult<Self> {
        Self::new(GeoTransform {
            top_left_x: top_left_lon,
            pixel_width: spacing,
            rotation_x: 0.0,
            top_left_y: top_left_lat,
            rotation_y: 0.0,
            pixel_height: -spacing,
        })
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }
}

impl GeoCoding for AffineGeoCoding {
    fn pixel_to_geo(&self, pixel: &PixelPos) -> CoregResult<GeoPos> {
        let t = &self.transform;
        let lon = t.top_left_x + pixel.x * t.pixel_width + pixel.y * t.rotation_x;
        let lat = t.top_left_y + pixel.x * t.rotation_y + pixel.y * t.pixel_height;
        Ok(GeoPos::new(lat, lon))
    }

    fn geo_to_pixel(&self, geo: &GeoPos) -> CoregResult<PixelPos> {
        let dlon = geo.lon - self.transform.top_left_x;
        let dlat = geo.lat - self.transform.top_left_y;
        let [a, b, c, d] = self.inverse;
        Ok(PixelPos::new(a * dlon + b * dlat, c * dlon + d * dlat))
    }
}
