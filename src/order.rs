//! Order specifications in the Orders v2 request format.
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Error;
use crate::geometry::Geometry;
use crate::search::SceneIdSet;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProductBundle {
    #[default]
    Visual,
    Analytic,
    Udm2,
    AnalyticUdm2,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Cloud Optimized GeoTIFF
    #[default]
    #[serde(rename = "COG")]
    Cog,
    #[serde(rename = "PL_NITF")]
    PlNitf,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cog => write!(f, "COG"),
            Self::PlNitf => write!(f, "PL_NITF"),
        }
    }
}

/// Where the service should deliver finished orders. Absent means the
/// results are downloaded directly.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    AmazonS3 {
        aws_access_key_id: String,
        aws_secret_access_key: String,
        bucket: String,
        aws_region: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path_prefix: Option<String>,
    },
    AzureBlobStorage {
        account: String,
        container: String,
        sas_token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        storage_endpoint_suffix: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path_prefix: Option<String>,
    },
    GoogleCloudStorage {
        /// Base64 encoded service account credentials.
        credentials: String,
        bucket: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path_prefix: Option<String>,
    },
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct Notifications {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub email: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_per_order: Option<bool>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Product {
    pub item_ids: Vec<String>,
    pub item_type: String,
    pub product_bundle: ProductBundle,
}

/// Processing steps, applied in order.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    Clip { aoi: Geometry },
    FileFormat { format: OutputFormat },
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct OrderSpec {
    pub name: String,
    pub products: Vec<Product>,
    pub tools: Vec<Tool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<Delivery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifications: Option<Notifications>,
}

impl OrderSpec {
    pub fn scene_count(&self) -> usize {
        self.products.iter().map(|p| p.item_ids.len()).sum()
    }
}

/// The month-independent parts of every order in a run.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderBuilder {
    pub aoi: Geometry,
    pub item_type: String,
    pub bundle: ProductBundle,
    pub format: OutputFormat,
    pub delivery: Option<Delivery>,
    pub notifications: Option<Notifications>,
}

impl OrderBuilder {
    pub fn build(&self, name: String, scene_ids: SceneIdSet) -> Result<OrderSpec, Error> {
        if scene_ids.is_empty() {
            return Err(Error::NoScenes);
        }
        Ok(OrderSpec {
            name,
            products: vec![Product {
                item_ids: scene_ids.into_vec(),
                item_type: self.item_type.clone(),
                product_bundle: self.bundle,
            }],
            tools: vec![
                Tool::Clip {
                    aoi: self.aoi.clone(),
                },
                Tool::FileFormat {
                    format: self.format,
                },
            ],
            delivery: self.delivery.clone(),
            notifications: self.notifications.clone(),
        })
    }
}
