//! The month-by-month order loop.
use std::path::PathBuf;

use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::api::OrdersApi;
use crate::download::DownloadTrigger;
use crate::error::{Error, ErrorKind};
use crate::filter::SearchFilter;
use crate::lifecycle::{LifecycleDriver, OrderState, PollPolicy, StateObserver};
use crate::order::OrderBuilder;
use crate::search::collect_scene_ids;
use crate::summary::RunSummary;
use crate::window::DateWindow;

/// A validated run, see [`crate::config::RunConfig::into_plan`].
#[derive(Clone, Debug)]
pub struct RunPlan {
    pub windows: Vec<DateWindow>,
    pub search_item_types: Vec<String>,
    pub search_limit: usize,
    pub filter: SearchFilter,
    pub orders: OrderBuilder,
    pub poll: PollPolicy,
    pub output_dir: PathBuf,
    /// Months processed at the same time. 1 means strictly sequential.
    pub concurrency: usize,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Downloaded { directory: PathBuf },
    /// The search matched nothing for this month.
    Skipped,
    Failed { kind: ErrorKind, detail: String },
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct MonthOutcome {
    /// `YYYY_MM`
    pub month: String,
    pub window: DateWindow,
    #[serde(flatten)]
    pub outcome: Outcome,
}

pub struct MonthlyOrchestrator<'a, C, O: ?Sized> {
    client: &'a C,
    plan: RunPlan,
    observer: &'a O,
    downloads: DownloadTrigger,
}

impl<'a, C, O> MonthlyOrchestrator<'a, C, O>
where
    C: OrdersApi,
    O: StateObserver + ?Sized,
{
    pub fn new(client: &'a C, plan: RunPlan, observer: &'a O) -> Self {
        let downloads = DownloadTrigger::new(&plan.output_dir);
        Self {
            client,
            plan,
            observer,
            downloads,
        }
    }

    /// Processes every month and reports one outcome per month, in month
    /// order. Failures are recorded and never stop the remaining months.
    pub async fn run(&self, cancel: &CancellationToken) -> RunSummary {
        info!(
            months = self.plan.windows.len(),
            concurrency = self.plan.concurrency,
            "Starting monthly orders"
        );

        let outcomes = stream::iter(&self.plan.windows)
            .map(|window| {
                let span = info_span!("month", month = %window.label());
                self.process_month(window, cancel).instrument(span)
            })
            .buffered(self.plan.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        RunSummary::new(outcomes, cancel.is_cancelled())
    }

    async fn process_month(&self, window: &DateWindow, cancel: &CancellationToken) -> MonthOutcome {
        info!("Processing data from {window}");

        let outcome = match self.try_month(window, cancel).await {
            Ok(Some(directory)) => Outcome::Downloaded { directory },
            Ok(None) => Outcome::Skipped,
            Err(e) => {
                warn!("Month failed: {e}");
                Outcome::Failed {
                    kind: e.kind(),
                    detail: e.to_string(),
                }
            }
        };

        MonthOutcome {
            month: window.label(),
            window: *window,
            outcome,
        }
    }

    /// `Ok(None)` when the month has no matching scenes.
    async fn try_month(
        &self,
        window: &DateWindow,
        cancel: &CancellationToken,
    ) -> Result<Option<PathBuf>, Error> {
        let not_started = || Error::Cancelled {
            order_id: None,
            last_state: OrderState::Creating,
        };
        if cancel.is_cancelled() {
            return Err(not_started());
        }

        let predicate = self.plan.filter.for_window(window);
        let ids = tokio::select! {
            _ = cancel.cancelled() => return Err(not_started()),
            ids = collect_scene_ids(
                self.client,
                &self.plan.search_item_types,
                &predicate,
                self.plan.search_limit,
            ) => ids?,
        };

        if ids.is_empty() {
            info!("No items found with the specified criteria");
            return Ok(None);
        }
        info!(scenes = ids.len(), "Collected scenes");

        let spec = self.plan.orders.build(window.order_name(), ids)?;
        let handle = LifecycleDriver::new(self.client, self.plan.poll, self.observer)
            .run(&spec, cancel)
            .await?;

        let dir = self
            .downloads
            .download(self.client, &handle.order_id, &spec.name, cancel)
            .await?;
        Ok(Some(dir))
    }
}
