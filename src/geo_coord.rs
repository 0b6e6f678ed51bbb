//! Bounds-checked geographic coordinates and the local affine used for the master grid.

/// A bounds-checked geographic point. Optionally carries an antenna height above ground.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GeoPoint {
    lat: f64,
    lon: f64,
    height_m: Option<f64>,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Result<Self, String> {
        Self::with_height(lat, lon, None)
    }

    pub fn with_height(lat: f64, lon: f64, height_m: Option<f64>) -> Result<Self, String> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(format!("Latitude {} not in range -90.0..=90.0", lat));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(format!("Longitude {} not in range -180.0..=180.0", lon));
        }
        if let Some(h) = height_m {
            if !h.is_finite() || h < 0.0 {
                return Err(format!("Height {} must be finite and >= 0", h));
            }
        }
        Ok(Self { lat, lon, height_m })
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }

    pub fn height_m(&self) -> Option<f64> {
        self.height_m
    }
}

/// Constant meters-per-degree of latitude (WGS-84 mean radius approximation).
pub const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

/// A checked geographic bounding box (min/max lat/lon, min strictly less than max).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GeoBBox {
    min_lat: f64,
    min_lon: f64,
    max_lat: f64,
    max_lon: f64,
}

impl GeoBBox {
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Result<Self, String> {
        if !(min_lat < max_lat && min_lon < max_lon) {
            return Err("Invalid bounding box: min must be strictly less than max".to_string());
        }
        GeoPoint::new(min_lat, min_lon)?;
        GeoPoint::new(max_lat, max_lon)?;
        Ok(Self { min_lat, min_lon, max_lat, max_lon })
    }

    /// Smallest bounding box containing every point, expanded by `buffer_m` meters on
    /// each side using the mean-latitude cosine for longitude scaling.
    pub fn enclosing(points: &[GeoPoint], buffer_m: f64) -> Result<Self, String> {
        if points.is_empty() {
            return Err("Cannot compute a bounding box over an empty point list".to_string());
        }
        let mean_lat = points.iter().map(GeoPoint::lat).sum::<f64>() / points.len() as f64;
        let lat_deg_per_m = 1.0 / METERS_PER_DEGREE_LAT;
        let lon_deg_per_m =
            1.0 / (METERS_PER_DEGREE_LAT * mean_lat.to_radians().cos().abs().max(1e-6));

        let buffer_lat = buffer_m * lat_deg_per_m;
        let buffer_lon = buffer_m * lon_deg_per_m;

        let min_lat = points.iter().map(GeoPoint::lat).fold(f64::INFINITY, f64::min) - buffer_lat;
        let max_lat =
            points.iter().map(GeoPoint::lat).fold(f64::NEG_INFINITY, f64::max) + buffer_lat;
        let min_lon = points.iter().map(GeoPoint::lon).fold(f64::INFINITY, f64::min) - buffer_lon;
        let max_lon =
            points.iter().map(GeoPoint::lon).fold(f64::NEG_INFINITY, f64::max) + buffer_lon;

        Self::new(
            min_lat.clamp(-90.0, 90.0),
            min_lon.clamp(-180.0, 180.0),
            max_lat.clamp(-90.0, 90.0),
            max_lon.clamp(-180.0, 180.0),
        )
    }

    pub fn min_lat(&self) -> f64 {
        self.min_lat
    }
    pub fn min_lon(&self) -> f64 {
        self.min_lon
    }
    pub fn max_lat(&self) -> f64 {
        self.max_lat
    }
    pub fn max_lon(&self) -> f64 {
        self.max_lon
    }

    pub fn mean_lat(&self) -> f64 {
        (self.min_lat + self.max_lat) / 2.0
    }

    /// Width of the box in meters at its mean latitude.
    pub fn width_m(&self) -> f64 {
        (self.max_lon - self.min_lon)
            * METERS_PER_DEGREE_LAT
            * self.mean_lat().to_radians().cos().abs()
    }

    /// Height of the box in meters.
    pub fn height_m(&self) -> f64 {
        (self.max_lat - self.min_lat) * METERS_PER_DEGREE_LAT
    }

    pub fn contains(&self, p: GeoPoint) -> bool {
        p.lat() >= self.min_lat
            && p.lat() <= self.max_lat
            && p.lon() >= self.min_lon
            && p.lon() <= self.max_lon
    }
}

/// Affine mapping from (lat, lon) to (row, col) pixel indices of a raster over a
/// `GeoBBox`, north-up (row 0 is `max_lat`).
#[derive(Copy, Clone, Debug)]
pub struct GridAffine {
    bbox: GeoBBox,
    rows: usize,
    cols: usize,
}

impl GridAffine {
    pub fn new(bbox: GeoBBox, rows: usize, cols: usize) -> Self {
        Self { bbox, rows, cols }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn bbox(&self) -> GeoBBox {
        self.bbox
    }

    /// Maps a geographic point to (row, col); returns `None` if it falls outside the grid.
    pub fn project(&self, lat: f64, lon: f64) -> Option<(usize, usize)> {
        if self.rows == 0 || self.cols == 0 {
            return None;
        }
        let lat_span = self.bbox.max_lat - self.bbox.min_lat;
        let lon_span = self.bbox.max_lon - self.bbox.min_lon;
        if lat_span <= 0.0 || lon_span <= 0.0 {
            return None;
        }
        let rel_y = (self.bbox.max_lat - lat) / lat_span;
        let rel_x = (lon - self.bbox.min_lon) / lon_span;

        let row = (rel_y * (self.rows - 1) as f64).round();
        let col = (rel_x * (self.cols - 1) as f64).round();

        if !(0.0..self.rows as f64).contains(&row) || !(0.0..self.cols as f64).contains(&col) {
            return None;
        }
        Some((row as usize, col as usize))
    }

    /// Latitude of the center of row `r`.
    pub fn row_lat(&self, r: usize) -> f64 {
        if self.rows <= 1 {
            return self.bbox.mean_lat();
        }
        self.bbox.max_lat
            - (r as f64 / (self.rows - 1) as f64) * (self.bbox.max_lat - self.bbox.min_lat)
    }

    /// Longitude of the center of column `c`.
    pub fn col_lon(&self, c: usize) -> f64 {
        if self.cols <= 1 {
            return (self.bbox.min_lon + self.bbox.max_lon) / 2.0;
        }
        self.bbox.min_lon
            + (c as f64 / (self.cols - 1) as f64) * (self.bbox.max_lon - self.bbox.min_lon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_input() {
        assert!(GeoPoint::new(0., 0.).is_ok());

        // latitude extremes
        assert!(GeoPoint::new(-90.0, 0.).is_ok());
        assert!(GeoPoint::new(90.0, 0.).is_ok());

        // longitude extremes
        assert!(GeoPoint::new(0., -180.0).is_ok());
        assert!(GeoPoint::new(0., 180.0).is_ok());
    }

    #[test]
    fn test_out_of_bounds() {
        // latitude out-of-bounds
        assert!(GeoPoint::new(-91., 0.).is_err());
        assert!(GeoPoint::new(91., 0.).is_err());

        // longitude out-of-bounds
        assert!(GeoPoint::new(0., -181.).is_err());
        assert!(GeoPoint::new(0., 181.).is_err());

        assert!(GeoPoint::new(f64::NAN, 0.).is_err());
    }

    #[test]
    fn bbox_requires_strict_order() {
        assert!(GeoBBox::new(0., 0., 1., 1.).is_ok());
        assert!(GeoBBox::new(1., 0., 0., 1.).is_err());
    }

    #[test]
    fn grid_affine_round_trips_corners() {
        let bbox = GeoBBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let affine = GridAffine::new(bbox, 101, 101);
        assert_eq!(affine.project(1.0, 0.0), Some((0, 0)));
        assert_eq!(affine.project(0.0, 1.0), Some((100, 100)));
        assert_eq!(affine.project(2.0, 0.0), None);
    }

    #[test]
    fn enclosing_bbox_contains_all_points() {
        let pts = vec![
            GeoPoint::new(10.0, 10.0).unwrap(),
            GeoPoint::new(10.5, 10.5).unwrap(),
        ];
        let bbox = GeoBBox::enclosing(&pts, 1000.0).unwrap();
        for p in &pts {
            assert!(bbox.contains(*p));
        }
    }
}
