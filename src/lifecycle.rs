//! Submitting an order and polling it until it settles.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::OrdersApi;
use crate::error::Error;
use crate::order::OrderSpec;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Local: submission in flight.
    Creating,
    /// Local: accepted, not polled yet.
    Created,
    Queued,
    Running,
    Success,
    Failed,
    PartialFailure,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::PartialFailure)
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Creating => "creating",
            Self::Created => "created",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::PartialFailure => "partial_failure",
        };
        f.write_str(s)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct StateTransition {
    pub order_id: String,
    pub previous: OrderState,
    pub new: OrderState,
    pub timestamp: DateTime<Utc>,
}

/// Receives every state reported for an order.
///
/// `release` is called exactly once per driven order, on every exit path
/// including cancellation, with the last known state.
pub trait StateObserver {
    fn on_transition(&self, event: &StateTransition) -> anyhow::Result<()>;

    fn release(&self, _order_name: &str, _order_id: Option<&str>, _last: OrderState) {}
}

/// Logs transitions through `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl StateObserver for TracingObserver {
    fn on_transition(&self, event: &StateTransition) -> anyhow::Result<()> {
        if event.previous == event.new {
            debug!(order_id = %event.order_id, state = %event.new, "Order state unchanged");
        } else {
            info!(
                order_id = %event.order_id,
                from = %event.previous,
                to = %event.new,
                "Order state changed"
            );
        }
        Ok(())
    }

    fn release(&self, order_name: &str, order_id: Option<&str>, last: OrderState) {
        if !last.is_terminal() {
            warn!(
                order = order_name,
                order_id = order_id.unwrap_or("none"),
                state = %last,
                "Stopped tracking order before it finished"
            );
        }
    }
}

/// How long a cancelled run still waits for an in-flight order submission.
pub const SUBMIT_GRACE: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 500,
            delay: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderHandle {
    pub order_id: String,
    pub state: OrderState,
}

/// Reports state changes to the observer and releases it when dropped.
struct Reporter<'a, O: StateObserver + ?Sized> {
    observer: &'a O,
    order_name: &'a str,
    order_id: Option<String>,
    state: OrderState,
}

impl<'a, O: StateObserver + ?Sized> Reporter<'a, O> {
    fn new(observer: &'a O, order_name: &'a str) -> Self {
        Self {
            observer,
            order_name,
            order_id: None,
            state: OrderState::Creating,
        }
    }

    fn update(&mut self, order_id: &str, new: OrderState) {
        let event = StateTransition {
            order_id: order_id.to_string(),
            previous: self.state,
            new,
            timestamp: Utc::now(),
        };
        self.order_id = Some(event.order_id.clone());
        self.state = new;
        // Observer failures never stop the polling loop
        if let Err(e) = self.observer.on_transition(&event) {
            warn!(order_id, "State observer failed: {e:#}");
        }
    }

    fn cancelled(&self) -> Error {
        Error::Cancelled {
            order_id: self.order_id.clone(),
            last_state: self.state,
        }
    }
}

impl<O: StateObserver + ?Sized> Drop for Reporter<'_, O> {
    fn drop(&mut self) {
        self.observer
            .release(self.order_name, self.order_id.as_deref(), self.state);
    }
}

/// Drives one order from submission to a terminal state.
pub struct LifecycleDriver<'a, C, O: ?Sized> {
    client: &'a C,
    policy: PollPolicy,
    observer: &'a O,
}

impl<'a, C, O> LifecycleDriver<'a, C, O>
where
    C: OrdersApi,
    O: StateObserver + ?Sized,
{
    pub fn new(client: &'a C, policy: PollPolicy, observer: &'a O) -> Self {
        Self {
            client,
            policy,
            observer,
        }
    }

    /// Submits `spec` and polls until success. Failure states, an exhausted
    /// attempt budget and cancellation are all errors.
    pub async fn run(
        &self,
        spec: &OrderSpec,
        cancel: &CancellationToken,
    ) -> Result<OrderHandle, Error> {
        let mut reporter = Reporter::new(self.observer, &spec.name);

        let create = self.client.create_order(spec);
        tokio::pin!(create);
        let created = tokio::select! {
            created = &mut create => created,
            _ = cancel.cancelled() => {
                // An in-flight submission may already exist remotely, wait
                // briefly so its id can be reported
                match tokio::time::timeout(SUBMIT_GRACE, &mut create).await {
                    Ok(created) => created,
                    Err(_) => return Err(reporter.cancelled()),
                }
            }
        };
        let order_id = created.map_err(Error::OrderSubmissionFailed)?;
        info!(order = %spec.name, %order_id, scenes = spec.scene_count(), "Order created");
        reporter.update(&order_id, OrderState::Created);
        if cancel.is_cancelled() {
            return Err(reporter.cancelled());
        }

        for attempt in 1..=self.policy.max_attempts {
            let started = Instant::now();

            let polled = tokio::select! {
                _ = cancel.cancelled() => return Err(reporter.cancelled()),
                polled = self.client.poll_order(&order_id) => polled,
            };
            match polled {
                Ok(state) => {
                    reporter.update(&order_id, state);
                    match state {
                        OrderState::Success => {
                            return Ok(OrderHandle { order_id, state });
                        }
                        OrderState::Failed | OrderState::PartialFailure => {
                            return Err(Error::OrderFailed { order_id, state });
                        }
                        _ => {}
                    }
                }
                // A failed poll still consumes an attempt
                Err(e) => warn!(%order_id, attempt, "Polling order failed: {e:#}"),
            }

            if attempt < self.policy.max_attempts {
                let wait = match started.checked_add(self.policy.delay) {
                    Some(deadline) => tokio::time::sleep_until(deadline),
                    None => tokio::time::sleep(self.policy.delay),
                };
                tokio::select! {
                    _ = cancel.cancelled() => return Err(reporter.cancelled()),
                    _ = wait => {}
                }
            }
        }

        Err(Error::OrderPollTimeout {
            order_id,
            attempts: self.policy.max_attempts,
            last_state: reporter.state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::order::{OrderBuilder, OutputFormat, ProductBundle};
    use crate::testing::{Call, MockApi, RecordingObserver};
    use anyhow::anyhow;

    fn spec() -> OrderSpec {
        let builder = OrderBuilder {
            aoi: Geometry::from_corners(1.0, 2.0, 3.0, 4.0),
            item_type: "PSScene".to_string(),
            bundle: ProductBundle::Visual,
            format: OutputFormat::Cog,
            delivery: None,
            notifications: None,
        };
        let ids = ["a".to_string()].into_iter().collect();
        builder.build("order_2024_01".to_string(), ids).unwrap()
    }

    fn polls(api: &MockApi) -> usize {
        api.calls()
            .iter()
            .filter(|c| matches!(c, Call::Poll(_)))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_running() {
        let api = MockApi::new().with_poll_states(
            "order_2024_01",
            vec![OrderState::Queued, OrderState::Running, OrderState::Success],
        );
        let observer = RecordingObserver::default();
        let driver = LifecycleDriver::new(&api, PollPolicy::default(), &observer);

        let handle = driver.run(&spec(), &CancellationToken::new()).await.unwrap();
        assert_eq!(handle.state, OrderState::Success);
        assert_eq!(polls(&api), 3);

        let states: Vec<_> = observer.events().iter().map(|e| e.new).collect();
        assert_eq!(
            states,
            vec![
                OrderState::Created,
                OrderState::Queued,
                OrderState::Running,
                OrderState::Success
            ]
        );
        assert_eq!(observer.events()[0].previous, OrderState::Creating);
        assert_eq!(observer.released(), vec![OrderState::Success]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_first_terminal_state() {
        for terminal in [OrderState::Failed, OrderState::PartialFailure] {
            let api = MockApi::new().with_poll_states(
                "order_2024_01",
                vec![OrderState::Running, terminal, OrderState::Success],
            );
            let observer = RecordingObserver::default();
            let driver = LifecycleDriver::new(&api, PollPolicy::default(), &observer);

            let err = driver.run(&spec(), &CancellationToken::new()).await.unwrap_err();
            assert!(matches!(err, Error::OrderFailed { state, .. } if state == terminal));
            assert_eq!(polls(&api), 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_budget_exhausted() {
        let api = MockApi::new().with_poll_states("order_2024_01", vec![OrderState::Running]);
        let observer = RecordingObserver::default();
        let driver = LifecycleDriver::new(&api, PollPolicy::default(), &observer);

        let started = Instant::now();
        let err = driver.run(&spec(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::OrderPollTimeout {
                attempts: 500,
                last_state: OrderState::Running,
                ..
            }
        ));
        assert_eq!(polls(&api), 500);
        // No sleep after the final attempt
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10 * 499));
        assert!(elapsed < Duration::from_secs(10 * 500));
        assert_eq!(observer.released(), vec![OrderState::Running]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_failure_is_not_retried() {
        let api = MockApi::new().fail_create("order_2024_01");
        let observer = RecordingObserver::default();
        let driver = LifecycleDriver::new(&api, PollPolicy::default(), &observer);

        let err = driver.run(&spec(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::OrderSubmissionFailed(_)));
        assert_eq!(polls(&api), 0);
        assert_eq!(observer.released(), vec![OrderState::Creating]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_failure_does_not_stop_polling() {
        let api = MockApi::new().with_poll_states(
            "order_2024_01",
            vec![OrderState::Queued, OrderState::Success],
        );
        let observer = RecordingObserver::failing(anyhow!("terminal closed"));
        let driver = LifecycleDriver::new(&api, PollPolicy::default(), &observer);

        let handle = driver.run(&spec(), &CancellationToken::new()).await.unwrap();
        assert_eq!(handle.state, OrderState::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_polls_count_against_budget() {
        let api = MockApi::new().fail_polls("order_2024_01");
        let observer = RecordingObserver::default();
        let policy = PollPolicy {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        };
        let driver = LifecycleDriver::new(&api, policy, &observer);

        let err = driver.run(&spec(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::OrderPollTimeout {
                attempts: 3,
                last_state: OrderState::Created,
                ..
            }
        ));
        assert_eq!(polls(&api), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting_reports_last_state() {
        let api = MockApi::new().with_poll_states("order_2024_01", vec![OrderState::Queued]);
        let observer = RecordingObserver::default();
        let driver = LifecycleDriver::new(&api, PollPolicy::default(), &observer);
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(25)).await;
                cancel.cancel();
            }
        };
        let spec = spec();
        let (result, _) = tokio::join!(driver.run(&spec, &cancel), canceller);

        match result.unwrap_err() {
            Error::Cancelled {
                order_id,
                last_state,
            } => {
                assert!(order_id.is_some());
                assert_eq!(last_state, OrderState::Queued);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(polls(&api), 3);
        assert_eq!(observer.released(), vec![OrderState::Queued]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_submission_reports_order_id() {
        let api = MockApi::new().with_create_delay(Duration::from_secs(5));
        let observer = RecordingObserver::default();
        let driver = LifecycleDriver::new(&api, PollPolicy::default(), &observer);
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                cancel.cancel();
            }
        };
        let spec = spec();
        let (result, _) = tokio::join!(driver.run(&spec, &cancel), canceller);

        match result.unwrap_err() {
            Error::Cancelled {
                order_id,
                last_state,
            } => {
                assert_eq!(order_id.as_deref(), Some("id-order_2024_01"));
                assert_eq!(last_state, OrderState::Created);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(polls(&api), 0);
        assert_eq!(observer.released(), vec![OrderState::Created]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_submission_gives_up_after_grace() {
        let api = MockApi::new().with_create_delay(SUBMIT_GRACE * 4);
        let observer = RecordingObserver::default();
        let driver = LifecycleDriver::new(&api, PollPolicy::default(), &observer);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let started = Instant::now();
        let err = driver.run(&spec(), &cancel).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Cancelled {
                order_id: None,
                last_state: OrderState::Creating
            }
        ));
        assert!(started.elapsed() < SUBMIT_GRACE * 2);
        assert_eq!(observer.released(), vec![OrderState::Creating]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_delay_does_not_overflow_deadline() {
        let api = MockApi::new().with_poll_states(
            "order_2024_01",
            vec![OrderState::Queued, OrderState::Success],
        );
        let observer = RecordingObserver::default();
        let policy = PollPolicy {
            max_attempts: 2,
            delay: Duration::from_secs(i64::MAX as u64),
        };
        let driver = LifecycleDriver::new(&api, policy, &observer);
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                cancel.cancel();
            }
        };
        let spec = spec();
        let (result, _) = tokio::join!(driver.run(&spec, &cancel), canceller);

        assert!(matches!(
            result,
            Err(Error::Cancelled {
                last_state: OrderState::Queued,
                ..
            })
        ));
        assert_eq!(polls(&api), 1);
    }
}
