use serde::{Deserialize, Serialize};

use crate::error::Error;

/// GeoJSON geometry of the area of interest. Used both as the search
/// intersection clause and as the clip tool's AOI.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum Geometry {
    Polygon { coordinates: Vec<Vec<[f64; 2]>> },
}

impl Geometry {
    /// Axis-aligned rectangle spanned by two (latitude, longitude) corners.
    pub fn from_corners(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Self {
        Self::Polygon {
            coordinates: vec![vec![
                [lon1, lat1],
                [lon2, lat1],
                [lon2, lat2],
                [lon1, lat2],
                [lon1, lat1],
            ]],
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        let Self::Polygon { coordinates } = self;
        let exterior = coordinates
            .first()
            .ok_or_else(|| Error::InvalidConfig("AOI polygon has no rings".to_string()))?;

        for ring in coordinates {
            if ring.len() < 4 {
                return Err(Error::InvalidConfig(format!(
                    "AOI ring needs at least 4 positions, got {}",
                    ring.len()
                )));
            }
            if ring.first() != ring.last() {
                return Err(Error::InvalidConfig("AOI ring is not closed".to_string()));
            }
            let out_of_range = ring.iter().any(|[lon, lat]| {
                !(-180.0..=180.0).contains(lon) || !(-90.0..=90.0).contains(lat)
            });
            if out_of_range {
                return Err(Error::InvalidConfig(
                    "AOI coordinate outside lon/lat range".to_string(),
                ));
            }
        }

        // Two distinct corners on a line do not enclose anything
        let first = exterior[0];
        if exterior.iter().all(|p| p[0] == first[0]) || exterior.iter().all(|p| p[1] == first[1]) {
            return Err(Error::InvalidConfig("AOI polygon has no area".to_string()));
        }
        Ok(())
    }
}
