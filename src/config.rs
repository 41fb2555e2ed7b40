use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;
use url::Url;

use crate::error::Error;
use crate::filter::{OptionalFilters, SearchFilter};
use crate::geometry::Geometry;
use crate::lifecycle::PollPolicy;
use crate::order::{Delivery, Notifications, OrderBuilder, OutputFormat, ProductBundle};
use crate::orchestrator::RunPlan;
use crate::window::month_windows;

pub const DEFAULT_BASE_URL: &str = "https://api.planet.com";

/// Upper bound for `poll.delay_secs`, one day.
pub const MAX_POLL_DELAY_SECS: u64 = 24 * 60 * 60;

const TEMPLATE: &str = r#"start_date = "2024-01-15"
end_date = "2024-03-10"

# Percent, 0-100
cloud_cover_max = 15.0

search_item_types = ["PSScene"]
item_type = "PSScene"

# visual | analytic | udm2 | analytic_udm2
bundle = "visual"

# COG | PL_NITF
format = "COG"

search_limit = 100
output_dir = "monthly_downloads"
concurrency = 1

# Area of interest, either two corners or a GeoJSON polygon:
#   [aoi]
#   type = "Polygon"
#   coordinates = [[[-122.5, 37.7], [-122.3, 37.7], [-122.3, 37.8], [-122.5, 37.8], [-122.5, 37.7]]]
[aoi]
lat1 = 37.7
lon1 = -122.5
lat2 = 37.8
lon2 = -122.3

# Omit for direct download. Alternatives: azure_blob_storage, google_cloud_storage
# [delivery.amazon_s3]
# aws_access_key_id = ""
# aws_secret_access_key = ""
# bucket = ""
# aws_region = "us-east-1"

# [notifications]
# email = true
# webhook_url = "https://example.com/hook"
# webhook_per_order = false

[filters]
# view_angle_max = 5.0
# gsd_max = 4.0
# quality_category = ["standard"]
# publishing_stage = ["finalized"]
# shadow_percent_max = 10.0
# haze_percent_max = 10.0
# snow_ice_percent_max = 10.0

[poll]
max_attempts = 500
delay_secs = 10
"#;

/// Area of interest as written in the config file.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum Aoi {
    Corners {
        lat1: f64,
        lon1: f64,
        lat2: f64,
        lon2: f64,
    },
    Geometry(Geometry),
}

impl Aoi {
    pub fn to_geometry(&self) -> Geometry {
        match self {
            Self::Corners {
                lat1,
                lon1,
                lat2,
                lon2,
            } => Geometry::from_corners(*lat1, *lon1, *lat2, *lon2),
            Self::Geometry(geometry) => geometry.clone(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct PollConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_secs: default_delay_secs(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: Url,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Percent, 0-100.
    #[serde(default = "default_cloud_cover_max")]
    pub cloud_cover_max: f64,
    #[serde(default = "default_item_types")]
    pub search_item_types: Vec<String>,
    /// Item type placed in every order.
    #[serde(default = "default_item_type")]
    pub item_type: String,
    #[serde(default)]
    pub bundle: ProductBundle,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    pub aoi: Aoi,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<Delivery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifications: Option<Notifications>,
    #[serde(default)]
    pub filters: OptionalFilters,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

fn default_cloud_cover_max() -> f64 {
    15.0
}

fn default_item_types() -> Vec<String> {
    vec![default_item_type()]
}

fn default_item_type() -> String {
    "PSScene".to_string()
}

fn default_search_limit() -> usize {
    100
}

fn default_max_attempts() -> u32 {
    500
}

fn default_delay_secs() -> u64 {
    10
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("monthly_downloads")
}

fn default_concurrency() -> usize {
    1
}

fn default_base_url() -> Url {
    Url::parse(DEFAULT_BASE_URL).expect("Default base url should always parse")
}

impl RunConfig {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Commented starter config.
    pub fn template() -> &'static str {
        TEMPLATE
    }

    /// Validates every option up front and produces the plan the
    /// orchestrator runs. Nothing is validated once months are underway.
    pub fn into_plan(self) -> Result<RunPlan, Error> {
        if self.start_date > self.end_date {
            return Err(Error::InvalidConfig(format!(
                "start_date {} is after end_date {}",
                self.start_date, self.end_date
            )));
        }

        let aoi = self.aoi.to_geometry();
        aoi.validate()?;

        if self.search_item_types.is_empty() || self.item_type.is_empty() {
            return Err(Error::InvalidConfig("item types must not be empty".to_string()));
        }
        if !self.filters.item_type.is_empty() && !self.filters.item_type.contains(&self.item_type) {
            warn!(
                order_item_type = %self.item_type,
                filter = ?self.filters.item_type,
                "Item type filter does not include the ordered item type"
            );
        }
        if self.search_limit == 0 {
            return Err(Error::InvalidConfig("search_limit must be at least 1".to_string()));
        }
        if self.poll.max_attempts == 0 {
            return Err(Error::InvalidConfig("poll.max_attempts must be at least 1".to_string()));
        }
        if self.poll.delay_secs > MAX_POLL_DELAY_SECS {
            return Err(Error::InvalidConfig(format!(
                "poll.delay_secs must be at most {MAX_POLL_DELAY_SECS}, got {}",
                self.poll.delay_secs
            )));
        }
        if self.concurrency == 0 {
            return Err(Error::InvalidConfig("concurrency must be at least 1".to_string()));
        }
        if let Some(hook) = self.notifications.as_ref().and_then(|n| n.webhook_url.as_ref()) {
            Url::parse(hook)
                .map_err(|e| Error::InvalidConfig(format!("webhook_url '{hook}': {e}")))?;
        }

        let filter = SearchFilter::new(aoi.clone(), self.cloud_cover_max, &self.filters)?;

        Ok(RunPlan {
            windows: month_windows(self.start_date, self.end_date),
            search_item_types: self.search_item_types,
            search_limit: self.search_limit,
            filter,
            orders: OrderBuilder {
                aoi,
                item_type: self.item_type,
                bundle: self.bundle,
                format: self.format,
                delivery: self.delivery,
                notifications: self.notifications,
            },
            poll: PollPolicy {
                max_attempts: self.poll.max_attempts,
                delay: Duration::from_secs(self.poll.delay_secs),
            },
            output_dir: self.output_dir,
            concurrency: self.concurrency,
        })
    }
}
