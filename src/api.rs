//! The remote catalog/order capabilities the core depends on.
use std::path::{Path, PathBuf};

use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::filter::FilterClause;
use crate::lifecycle::OrderState;
use crate::order::OrderSpec;

/// One search hit. Only the id is needed downstream.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct SceneRecord {
    pub id: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

pub trait OrdersApi {
    /// Lazily yields matching records, fetching further pages on demand.
    /// `limit` only sizes pages. The stream may run past it and the caller
    /// stops once it has enough unique ids.
    fn search<'a>(
        self: &'a Self,
        item_types: &'a [String],
        filter: &'a FilterClause,
        limit: usize,
    ) -> BoxStream<'a, anyhow::Result<SceneRecord>>;

    /// Submits an order and returns the id assigned by the service.
    async fn create_order(self: &Self, spec: &OrderSpec) -> anyhow::Result<String>;

    async fn poll_order(self: &Self, order_id: &str) -> anyhow::Result<OrderState>;

    /// Downloads every result of a finished order into `directory`.
    async fn download_order(
        self: &Self,
        order_id: &str,
        directory: &Path,
    ) -> anyhow::Result<Vec<PathBuf>>;
}
