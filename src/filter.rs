//! Search predicates in the Data API filter format.
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::geometry::Geometry;
use crate::window::DateWindow;

const ACQUIRED: &str = "acquired";
const GEOMETRY: &str = "geometry";
const CLOUD_COVER: &str = "cloud_cover";

/// A composable search predicate.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum FilterClause {
    #[serde(rename = "DateRangeFilter")]
    DateRange {
        field_name: String,
        config: DateRange,
    },
    #[serde(rename = "GeometryFilter")]
    GeometryIntersect { field_name: String, config: Geometry },
    #[serde(rename = "RangeFilter")]
    NumericRange { field_name: String, config: Bound },
    #[serde(rename = "StringInFilter")]
    StringIn {
        field_name: String,
        config: Vec<String>,
    },
    #[serde(rename = "AndFilter")]
    And { config: Vec<FilterClause> },
}

/// Half-open acquisition interval `[gte, lt)`.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct DateRange {
    pub gte: DateTime<Utc>,
    pub lt: DateTime<Utc>,
}

/// Comparison operator plus threshold of a numeric range clause.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Bound {
    Lt(f64),
    Lte(f64),
    Gt(f64),
    Gte(f64),
}

impl FilterClause {
    pub fn lte(field_name: &str, threshold: f64) -> Self {
        Self::NumericRange {
            field_name: field_name.to_string(),
            config: Bound::Lte(threshold),
        }
    }

    pub fn string_in(field_name: &str, values: &[String]) -> Self {
        Self::StringIn {
            field_name: field_name.to_string(),
            config: values.to_vec(),
        }
    }

    /// Acquisitions from the first instant of `window.start()` up to, but
    /// excluding, the day after `window.end()`.
    pub fn acquired_within(window: &DateWindow) -> Self {
        let gte = window.start().and_time(NaiveTime::MIN).and_utc();
        let lt = window
            .end()
            .succ_opt()
            .map_or(DateTime::<Utc>::MAX_UTC, |d| d.and_time(NaiveTime::MIN).and_utc());
        Self::DateRange {
            field_name: ACQUIRED.to_string(),
            config: DateRange { gte, lt },
        }
    }

    pub fn intersects(aoi: &Geometry) -> Self {
        Self::GeometryIntersect {
            field_name: GEOMETRY.to_string(),
            config: aoi.clone(),
        }
    }

    /// Children of an AND clause, or `None` for any other clause.
    pub fn children(&self) -> Option<&[FilterClause]> {
        match self {
            Self::And { config } => Some(config),
            _ => None,
        }
    }
}

/// User-selectable clauses applied on top of the mandatory ones. Empty
/// lists and `None` mean "not selected".
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct OptionalFilters {
    /// Degrees.
    pub view_angle_max: Option<f64>,
    /// Ground sample distance in meters.
    pub gsd_max: Option<f64>,
    pub item_type: Vec<String>,
    pub quality_category: Vec<String>,
    pub sensor: Vec<String>,
    pub publishing_stage: Vec<String>,
    pub instrument_id: Vec<String>,
    /// Percentages on a 0-100 scale.
    pub shadow_percent_max: Option<f64>,
    pub haze_percent_max: Option<f64>,
    pub snow_ice_percent_max: Option<f64>,
}

impl OptionalFilters {
    /// Builds the AND of every selected clause, or `None` if nothing is
    /// selected.
    pub fn to_clause(&self) -> Result<Option<FilterClause>, Error> {
        let mut clauses = vec![];

        if let Some(angle) = self.view_angle_max {
            if !angle.is_finite() || angle < 0.0 {
                return Err(Error::InvalidFilterValue {
                    field: "view_angle",
                    value: angle,
                });
            }
            clauses.push(FilterClause::lte("view_angle", angle));
        }
        if let Some(gsd) = self.gsd_max {
            if !gsd.is_finite() || gsd <= 0.0 {
                return Err(Error::InvalidFilterValue {
                    field: "gsd",
                    value: gsd,
                });
            }
            clauses.push(FilterClause::lte("gsd", gsd));
        }

        let string_filters = [
            ("item_type", &self.item_type),
            ("quality_category", &self.quality_category),
            ("sensor", &self.sensor),
            ("publishing_stage", &self.publishing_stage),
            ("instrument_id", &self.instrument_id),
        ];
        for (field, values) in string_filters {
            if !values.is_empty() {
                clauses.push(FilterClause::string_in(field, values));
            }
        }

        let percent_filters = [
            ("shadow_percent", self.shadow_percent_max),
            ("haze_percent", self.haze_percent_max),
            ("snow_ice_percent", self.snow_ice_percent_max),
        ];
        for (field, percent) in percent_filters {
            if let Some(percent) = percent {
                clauses.push(FilterClause::lte(field, percent_to_fraction(field, percent)?));
            }
        }

        if clauses.is_empty() {
            return Ok(None);
        }
        Ok(Some(FilterClause::And { config: clauses }))
    }
}

/// Converts a 0-100 value to a 0-1 fraction. Out-of-range input is an error,
/// never clamped.
pub fn percent_to_fraction(field: &'static str, percent: f64) -> Result<f64, Error> {
    if !(0.0..=100.0).contains(&percent) {
        return Err(Error::InvalidFilterValue {
            field,
            value: percent,
        });
    }
    Ok(percent / 100.0)
}

/// The parts of the search predicate shared by every month.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchFilter {
    aoi: Geometry,
    cloud_cover_max: f64,
    optional: Option<FilterClause>,
}

impl SearchFilter {
    pub fn new(
        aoi: Geometry,
        cloud_cover_percent: f64,
        optional: &OptionalFilters,
    ) -> Result<Self, Error> {
        Ok(Self {
            aoi,
            cloud_cover_max: percent_to_fraction(CLOUD_COVER, cloud_cover_percent)?,
            optional: optional.to_clause()?,
        })
    }

    pub fn aoi(&self) -> &Geometry {
        &self.aoi
    }

    /// Date range, geometry intersection and cloud cover ceiling, followed
    /// by the optional composite when one was selected. Always an AND.
    pub fn for_window(&self, window: &DateWindow) -> FilterClause {
        let mut config = vec![
            FilterClause::acquired_within(window),
            FilterClause::intersects(&self.aoi),
            FilterClause::lte(CLOUD_COVER, self.cloud_cover_max),
        ];
        if let Some(optional) = &self.optional {
            config.push(optional.clone());
        }
        FilterClause::And { config }
    }
}
