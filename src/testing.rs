//! Scripted stand-ins for the remote service, shared by unit tests.
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures_util::stream::{self, BoxStream, StreamExt};

use crate::api::{OrdersApi, SceneRecord};
use crate::filter::FilterClause;
use crate::lifecycle::{OrderState, StateObserver, StateTransition};
use crate::order::OrderSpec;

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Search,
    /// Order name
    Create(String),
    /// Order id
    Poll(String),
    /// Order id
    Download(String),
}

/// Order ids are `id-<order name>`. Unscripted orders succeed on the first
/// poll; a poll script repeats its last state once exhausted.
#[derive(Default)]
pub struct MockApi {
    searches: Mutex<VecDeque<Vec<Result<String>>>>,
    polls: Mutex<HashMap<String, VecDeque<OrderState>>>,
    failing_creates: HashSet<String>,
    failing_polls: HashSet<String>,
    failing_downloads: HashSet<String>,
    create_delay: Option<Duration>,
    calls: Mutex<Vec<Call>>,
}

fn order_id(name: &str) -> String {
    format!("id-{name}")
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the results of the next search call.
    pub fn with_search(self, hits: Vec<Result<String>>) -> Self {
        self.searches.lock().unwrap().push_back(hits);
        self
    }

    pub fn with_poll_states(self, order_name: &str, states: Vec<OrderState>) -> Self {
        self.polls
            .lock()
            .unwrap()
            .insert(order_id(order_name), states.into());
        self
    }

    pub fn fail_create(mut self, order_name: &str) -> Self {
        self.failing_creates.insert(order_name.to_string());
        self
    }

    /// Every order submission takes `delay` before answering.
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    pub fn fail_polls(mut self, order_name: &str) -> Self {
        self.failing_polls.insert(order_id(order_name));
        self
    }

    pub fn fail_download(mut self, order_name: &str) -> Self {
        self.failing_downloads.insert(order_id(order_name));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl OrdersApi for MockApi {
    fn search<'a>(
        self: &'a Self,
        _item_types: &'a [String],
        _filter: &'a FilterClause,
        _limit: usize,
    ) -> BoxStream<'a, Result<SceneRecord>> {
        self.record(Call::Search);
        let hits = self.searches.lock().unwrap().pop_front().unwrap_or_default();
        let records = hits.into_iter().map(|hit| {
            hit.map(|id| SceneRecord {
                id,
                properties: Default::default(),
            })
        });
        stream::iter(records).boxed()
    }

    async fn create_order(self: &Self, spec: &OrderSpec) -> Result<String> {
        self.record(Call::Create(spec.name.clone()));
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_creates.contains(&spec.name) {
            return Err(anyhow!("order rejected"));
        }
        Ok(order_id(&spec.name))
    }

    async fn poll_order(self: &Self, order_id: &str) -> Result<OrderState> {
        self.record(Call::Poll(order_id.to_string()));
        if self.failing_polls.contains(order_id) {
            return Err(anyhow!("503 Service Unavailable"));
        }
        let mut polls = self.polls.lock().unwrap();
        let Some(script) = polls.get_mut(order_id) else {
            return Ok(OrderState::Success);
        };
        let state = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().copied()
        };
        Ok(state.unwrap_or(OrderState::Success))
    }

    async fn download_order(self: &Self, order_id: &str, directory: &Path) -> Result<Vec<PathBuf>> {
        self.record(Call::Download(order_id.to_string()));
        if self.failing_downloads.contains(order_id) {
            return Err(anyhow!("connection reset"));
        }
        let file = directory.join(format!("{order_id}.tif"));
        tokio::fs::write(&file, b"II*\0").await?;
        Ok(vec![file])
    }
}

/// Records every event and release it receives.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<StateTransition>>,
    released: Mutex<Vec<OrderState>>,
    failure: Option<String>,
}

impl RecordingObserver {
    pub fn failing(error: anyhow::Error) -> Self {
        Self {
            failure: Some(error.to_string()),
            ..Default::default()
        }
    }

    pub fn events(&self) -> Vec<StateTransition> {
        self.events.lock().unwrap().clone()
    }

    pub fn released(&self) -> Vec<OrderState> {
        self.released.lock().unwrap().clone()
    }
}

impl StateObserver for RecordingObserver {
    fn on_transition(&self, event: &StateTransition) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        match &self.failure {
            Some(msg) => Err(anyhow!("{msg}")),
            None => Ok(()),
        }
    }

    fn release(&self, _order_name: &str, _order_id: Option<&str>, last: OrderState) {
        self.released.lock().unwrap().push(last);
    }
}
