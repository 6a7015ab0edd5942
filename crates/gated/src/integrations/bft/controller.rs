//! Polling and retry controller for one cloud gate.
//!
//! Each configured gate gets one `GateController`, owned by a single device
//! task. The controller decides when a poll is due, retries transient
//! failures within a cycle, and derives availability from consecutive failed
//! cycles. A failed cycle counts once toward unavailability no matter how
//! many retry attempts it took.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::client::ClientError;
use super::client::CloudClient;
use super::resolver;
use crate::config::CoverConfig;
use crate::engine::GateCommand;
use crate::engine::GateState;

/// Consecutive failed cycles before the entity reports unavailable
pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Minimum time between automatic status polls
pub const MIN_TIME_BETWEEN_UPDATES: Duration = Duration::from_secs(5);

/// Where the controller is within a poll or command cycle.
///
/// Command cycles reuse the same machine: they follow the identical
/// transient/permanent split and retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Polling,
    Retrying(u32),
}

/// Per-gate state machine driving polls, retries, and availability.
pub struct GateController<C: CloudClient> {
    client: C,

    /// Configured device name, kept for identity re-resolution
    configured_device: String,

    /// Identifier used on the wire and as the entity's unique id: the vendor
    /// UUID once resolved, else the configured device name
    device_id: String,

    display_name: String,
    retry_count: u32,
    throttle: Duration,

    phase: Phase,
    state: GateState,
    failures: u32,

    /// When the last poll cycle started; None fires the first poll
    /// immediately
    last_attempt: Option<Instant>,
}

impl<C: CloudClient> GateController<C> {
    pub fn new(client: C, config: &CoverConfig) -> Self {
        Self {
            client,
            configured_device: config.device.clone(),
            device_id: config.device.clone(),
            display_name: config.display_name().to_string(),
            retry_count: config.retry_count,
            throttle: MIN_TIME_BETWEEN_UPDATES,
            phase: Phase::Idle,
            state: GateState::Unknown,
            failures: 0,
            last_attempt: config.skip_initial_update.then(Instant::now),
        }
    }

    /// Resolve the device's stable identity, preferring the vendor UUID.
    ///
    /// Lookup failure is not fatal: the configured device name keeps serving
    /// as the identifier, as it would for accounts without UUID support.
    pub async fn resolve_identity(&mut self) {
        match self.client.lookup_device(&self.configured_device).await {
            Ok(Some(uuid)) => {
                info!(
                    "Resolved device '{}' to UUID {}",
                    self.configured_device, uuid
                );
                self.device_id = uuid;
            }
            Ok(None) => {
                warn!(
                    "Device '{}' not found in vendor account, using configured name as id",
                    self.configured_device
                );
            }
            Err(e) => {
                warn!(
                    "Device lookup for '{}' failed: {}, using configured name as id",
                    self.configured_device, e
                );
            }
        }
    }

    /// Run a poll cycle unless one started within the throttle interval.
    pub async fn poll_if_due(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_attempt {
            if now.duration_since(last) < self.throttle {
                debug!("Poll for {} throttled", self.display_name);
                return;
            }
        }

        self.last_attempt = Some(now);
        self.poll_cycle().await;
    }

    /// One complete poll cycle: fetch, retry transient failures up to the
    /// budget, and settle on either a new state or one counted failure.
    async fn poll_cycle(&mut self) {
        self.phase = Phase::Polling;

        loop {
            match self.client.fetch_status(&self.device_id).await {
                Ok(payload) => {
                    let state = resolver::resolve(&payload);
                    if state == GateState::Unknown {
                        warn!(
                            "Could not interpret status payload for {}: {}",
                            self.display_name, payload
                        );
                    } else {
                        debug!("Updated state for {}: {}", self.display_name, state);
                    }
                    self.record_success();
                    self.state = state;
                    break;
                }
                Err(err) => {
                    if !self.next_attempt(&err, "poll") {
                        break;
                    }
                }
            }
        }

        self.phase = Phase::Idle;
    }

    /// Dispatch an open/close/stop command.
    ///
    /// Commands bypass the polling throttle and never change the reported
    /// gate state; only a later successful poll does.
    pub async fn execute(&mut self, command: GateCommand) {
        info!("Dispatching {} to {}", command, self.display_name);
        self.phase = Phase::Polling;

        loop {
            match self.client.send_command(&self.device_id, command).await {
                Ok(()) => {
                    debug!("Command {} for {} acknowledged", command, self.display_name);
                    self.record_success();
                    break;
                }
                Err(err) => {
                    if !self.next_attempt(&err, "command") {
                        break;
                    }
                }
            }
        }

        self.phase = Phase::Idle;
    }

    /// Advance the retry machine after a failed attempt. Returns true when
    /// another attempt should be made within this cycle.
    fn next_attempt(&mut self, err: &ClientError, what: &str) -> bool {
        if err.is_transient() {
            let attempt = match self.phase {
                Phase::Retrying(n) => n,
                _ => 0,
            };

            if attempt < self.retry_count {
                self.phase = Phase::Retrying(attempt + 1);
                warn!(
                    "Transient {} failure for {} (attempt {}/{}): {}",
                    what,
                    self.display_name,
                    attempt + 1,
                    self.retry_count,
                    err
                );
                return true;
            }

            warn!(
                "{} for {} failed after {} attempts: {}",
                what,
                self.display_name,
                attempt + 1,
                err
            );
        } else {
            // Auth and permanent errors short-circuit the remaining retries.
            error!("{} for {} failed: {}", what, self.display_name, err);
        }

        self.record_failure();
        false
    }

    fn record_success(&mut self) {
        if self.failures >= MAX_CONSECUTIVE_FAILURES {
            info!(
                "{} recovered after {} failed cycles",
                self.display_name, self.failures
            );
        }
        self.failures = 0;
    }

    fn record_failure(&mut self) {
        self.failures += 1;
        if self.failures == MAX_CONSECUTIVE_FAILURES {
            warn!(
                "{} marked unavailable after {} consecutive failed cycles",
                self.display_name, self.failures
            );
        }
    }

    /// Gate state from the last completed poll
    pub fn state(&self) -> GateState {
        self.state
    }

    /// False once `MAX_CONSECUTIVE_FAILURES` cycles have failed in a row
    pub fn is_available(&self) -> bool {
        self.failures < MAX_CONSECUTIVE_FAILURES
    }

    /// The entity's stable identifier
    pub fn unique_id(&self) -> &str {
        &self.device_id
    }

    /// Revoke the client session. Called once when the device task exits;
    /// failure is logged and otherwise ignored.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.client.invalidate_token().await {
            warn!("Failed to revoke session for {}: {}", self.display_name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::bft::client::diagnosis_payload;
    use crate::integrations::bft::client::MockCloudClient;

    fn cover_config() -> CoverConfig {
        CoverConfig {
            device: "Main Gate".to_string(),
            username: "user@example.com".to_string(),
            password: "hunter2".to_string(),
            name: None,
            timeout: 10,
            retry_count: 3,
            skip_initial_update: false,
        }
    }

    fn transient() -> ClientError {
        ClientError::Transient("HTTP 502".to_string())
    }

    #[tokio::test]
    async fn test_poll_updates_state() {
        let mut client = MockCloudClient::new();
        client.statuses.push_back(Ok(diagnosis_payload(0, 0, 0, 0)));

        let mut controller = GateController::new(client, &cover_config());
        controller.poll_if_due().await;

        assert_eq!(controller.state(), GateState::Closed);
        assert!(controller.is_available());
        assert_eq!(controller.failures, 0);
        // Session management belongs to the client, not the controller
        assert_eq!(controller.client.auth_calls, 0);
    }

    #[tokio::test]
    async fn test_retry_budget_then_success() {
        let mut client = MockCloudClient::new();
        for _ in 0..3 {
            client.statuses.push_back(Err(transient()));
        }
        client
            .statuses
            .push_back(Ok(diagnosis_payload(100, 100, 0, 0)));

        let mut controller = GateController::new(client, &cover_config());
        controller.poll_if_due().await;

        // retry_count transient failures then a success is a successful
        // cycle: state taken from the final payload, counter untouched
        assert_eq!(controller.client.fetch_calls, 4);
        assert_eq!(controller.state(), GateState::Open);
        assert_eq!(controller.failures, 0);
    }

    #[tokio::test]
    async fn test_exhausted_cycle_counts_once() {
        let mut client = MockCloudClient::new();
        for _ in 0..4 {
            client.statuses.push_back(Err(transient()));
        }

        let mut controller = GateController::new(client, &cover_config());
        controller.poll_cycle().await;

        // 1 initial attempt + 3 retries, but only one failed cycle
        assert_eq!(controller.client.fetch_calls, 4);
        assert_eq!(controller.failures, 1);
        assert!(controller.is_available());
    }

    #[tokio::test]
    async fn test_unavailable_after_five_failed_cycles() {
        let mut config = cover_config();
        config.retry_count = 0;

        let mut client = MockCloudClient::new();
        for _ in 0..5 {
            client.statuses.push_back(Err(transient()));
        }

        let mut controller = GateController::new(client, &config);
        for cycle in 1..=4 {
            controller.poll_cycle().await;
            assert!(controller.is_available(), "still available after {}", cycle);
        }

        controller.poll_cycle().await;
        assert!(!controller.is_available());

        // First success clears unavailability and resets the counter
        controller.poll_cycle().await;
        assert!(controller.is_available());
        assert_eq!(controller.failures, 0);
    }

    #[tokio::test]
    async fn test_permanent_error_short_circuits_retries() {
        let mut client = MockCloudClient::new();
        client
            .statuses
            .push_back(Err(ClientError::Permanent("HTTP 404".to_string())));

        let mut controller = GateController::new(client, &cover_config());
        controller.poll_cycle().await;

        assert_eq!(controller.client.fetch_calls, 1);
        assert_eq!(controller.failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_are_throttled() {
        let client = MockCloudClient::new();
        let mut controller = GateController::new(client, &cover_config());

        controller.poll_if_due().await;
        controller.poll_if_due().await;
        assert_eq!(controller.client.fetch_calls, 1);

        tokio::time::advance(MIN_TIME_BETWEEN_UPDATES).await;
        controller.poll_if_due().await;
        assert_eq!(controller.client.fetch_calls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_initial_update_defers_first_poll() {
        let mut config = cover_config();
        config.skip_initial_update = true;

        let client = MockCloudClient::new();
        let mut controller = GateController::new(client, &config);

        controller.poll_if_due().await;
        assert_eq!(controller.client.fetch_calls, 0);

        tokio::time::advance(MIN_TIME_BETWEEN_UPDATES).await;
        controller.poll_if_due().await;
        assert_eq!(controller.client.fetch_calls, 1);
    }

    #[tokio::test]
    async fn test_command_ack_does_not_change_state() {
        let mut client = MockCloudClient::new();
        client.statuses.push_back(Ok(diagnosis_payload(0, 0, 0, 0)));

        let mut controller = GateController::new(client, &cover_config());

        controller.execute(GateCommand::Open).await;
        assert_eq!(controller.client.commands_sent, vec![GateCommand::Open]);
        assert_eq!(controller.state(), GateState::Unknown);

        // The vendor acknowledged the open, but the next poll says closed:
        // the poll wins
        controller.poll_if_due().await;
        assert_eq!(controller.state(), GateState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_bypass_poll_throttle() {
        let client = MockCloudClient::new();
        let mut controller = GateController::new(client, &cover_config());

        controller.poll_if_due().await;
        controller.execute(GateCommand::Stop).await;
        controller.execute(GateCommand::Open).await;

        assert_eq!(controller.client.command_calls, 2);
    }

    #[tokio::test]
    async fn test_command_failure_counts_toward_unavailability() {
        let mut config = cover_config();
        config.retry_count = 1;

        let mut client = MockCloudClient::new();
        client.command_results.push_back(Err(transient()));
        client.command_results.push_back(Err(transient()));

        let mut controller = GateController::new(client, &config);
        controller.execute(GateCommand::Close).await;

        assert_eq!(controller.client.command_calls, 2);
        assert_eq!(controller.failures, 1);
        assert_eq!(controller.state(), GateState::Unknown);
    }

    #[tokio::test]
    async fn test_unique_id_prefers_vendor_uuid() {
        let mut client = MockCloudClient::new();
        client.device_uuid = Some("8d54a2f0-1c3b".to_string());

        let mut controller = GateController::new(client, &cover_config());
        assert_eq!(controller.unique_id(), "Main Gate");

        controller.resolve_identity().await;
        assert_eq!(controller.unique_id(), "8d54a2f0-1c3b");

        // Stable across repeated resolutions
        controller.resolve_identity().await;
        assert_eq!(controller.unique_id(), "8d54a2f0-1c3b");
        assert_eq!(controller.client.lookup_calls, 2);
    }

    #[tokio::test]
    async fn test_unique_id_falls_back_to_device_name() {
        let client = MockCloudClient::new();
        let mut controller = GateController::new(client, &cover_config());

        controller.resolve_identity().await;
        assert_eq!(controller.unique_id(), "Main Gate");
    }

    #[tokio::test]
    async fn test_shutdown_revokes_session() {
        let client = MockCloudClient::new();
        let mut controller = GateController::new(client, &cover_config());

        controller.shutdown().await;
        assert_eq!(controller.client.invalidate_calls, 1);
    }

    #[tokio::test]
    async fn test_uninterpretable_payload_is_a_successful_poll() {
        let mut client = MockCloudClient::new();
        client.statuses.push_back(Ok(serde_json::json!({})));

        let mut controller = GateController::new(client, &cover_config());
        controller.poll_if_due().await;

        assert_eq!(controller.state(), GateState::Unknown);
        assert_eq!(controller.failures, 0);
        assert!(controller.is_available());
    }
}
