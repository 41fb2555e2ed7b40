use std::collections::HashSet;

use futures_util::TryStreamExt;
use tracing::debug;

use crate::api::OrdersApi;
use crate::error::Error;
use crate::filter::FilterClause;

/// Scene ids in discovery order, without duplicates.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SceneIdSet {
    ids: Vec<String>,
    seen: HashSet<String>,
}

impl SceneIdSet {
    /// Returns false if the id was already present.
    pub fn insert(&mut self, id: String) -> bool {
        if !self.seen.insert(id.clone()) {
            return false;
        }
        self.ids.push(id);
        true
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.ids
    }

    pub fn into_vec(self) -> Vec<String> {
        self.ids
    }
}

impl FromIterator<String> for SceneIdSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut set = Self::default();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

/// Drains the search results for one month into a set of at most `limit`
/// ids. No results is a valid outcome, not an error.
pub async fn collect_scene_ids(
    client: &impl OrdersApi,
    item_types: &[String],
    predicate: &FilterClause,
    limit: usize,
) -> Result<SceneIdSet, Error> {
    let mut ids = SceneIdSet::default();
    if limit == 0 {
        return Ok(ids);
    }

    let mut records = client.search(item_types, predicate, limit);
    while let Some(record) = records.try_next().await.map_err(Error::SearchFailed)? {
        if !ids.insert(record.id) {
            debug!("Duplicate scene in search results");
        }
        if ids.len() >= limit {
            break;
        }
    }
    Ok(ids)
}
