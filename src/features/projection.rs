/// Planar projection of geographic coordinates onto a locally-accurate
/// metric grid, so nearest-neighbor math can use plain Euclidean distance.
///
/// An equirectangular projection anchored at a reference latitude is
/// accurate to well under 1% over Singapore's ~50 km extent, which is all
/// the amenity features need.

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Island centroid, the anchor for the local plane.
pub const SINGAPORE_REF_LAT: f64 = 1.3521;
pub const SINGAPORE_REF_LON: f64 = 103.8198;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanarPoint {
    /// Metres east of the reference meridian.
    pub x: f64,
    /// Metres north of the reference parallel.
    pub y: f64,
}

impl PlanarPoint {
    pub fn distance_m(&self, other: &PlanarPoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LocalProjection {
    ref_lat_rad: f64,
    ref_lon_rad: f64,
    cos_ref_lat: f64,
}

impl LocalProjection {
    pub fn new(ref_lat: f64, ref_lon: f64) -> Self {
        let ref_lat_rad = ref_lat.to_radians();
        Self {
            ref_lat_rad,
            ref_lon_rad: ref_lon.to_radians(),
            cos_ref_lat: ref_lat_rad.cos(),
        }
    }

    pub fn singapore() -> Self {
        Self::new(SINGAPORE_REF_LAT, SINGAPORE_REF_LON)
    }

    pub fn project(&self, latitude: f64, longitude: f64) -> PlanarPoint {
        let lat_rad = latitude.to_radians();
        let lon_rad = longitude.to_radians();
        PlanarPoint {
            x: EARTH_RADIUS_M * (lon_rad - self.ref_lon_rad) * self.cos_ref_lat,
            y: EARTH_RADIUS_M * (lat_rad - self.ref_lat_rad),
        }
    }
}
