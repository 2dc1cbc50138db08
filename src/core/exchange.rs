//! Exchange protocol: application messages over a pairing channel
//!
//! Each outbound exchange moves through:
//! - IDLE → SENT: message handed to the channel
//! - SENT → REPLIED: reply carried an assessment
//! - SENT → ACKNOWLEDGED: reply with `status: received`
//! - SENT → FAILED: unreachable, error reply, or unreadable reply
//!
//! Both roles run the same dispatcher. The companion additionally owns an
//! inference orchestrator and answers assessment requests, inline when the
//! sender waits for a reply and by a separate push otherwise.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::channel::{Inbound, PairingChannel, ReplyHandle};
use crate::core::orchestrator::InferenceOrchestrator;
use crate::types::{
    ExchangeError, ExchangeMessage, HealthDataPayload, HealthSnapshot,
    RiskAssessment, RiskAssessmentPayload, Reply, ReplyStatus,
};

/// Pull-based sensor feed
pub trait SnapshotSource: Send + Sync {
    /// Current snapshot, or `None` before anything has been acquired
    fn current_snapshot(&self) -> Option<HealthSnapshot>;
}

/// Where an outbound exchange ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    Sent,
    Replied,
    Acknowledged,
    Failed,
}

/// State of the most recently started outbound exchange
///
/// Exchanges may overlap; each one only publishes its state while no newer
/// exchange has started, so a slow earlier exchange never overwrites a later
/// one. The per-call result of `send_health_data` and
/// `request_risk_assessment` is authoritative for that call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatestExchange {
    /// Starts at 0 (no exchange yet) and increments per exchange
    pub id: u64,
    pub state: ExchangeState,
}

/// Successful end of an outbound exchange
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeOutcome {
    /// The peer answered with an assessment
    Replied(RiskAssessment),
    /// The peer acknowledged receipt
    Acknowledged,
}

/// Which side of the pair this endpoint is
#[derive(Clone)]
pub enum Role {
    Wearable,
    Companion(InferenceOrchestrator),
}

impl Role {
    fn name(&self) -> &'static str {
        match self {
            Role::Wearable => "wearable",
            Role::Companion(_) => "companion",
        }
    }
}

// =============================================================================
// VIEW STATE
// =============================================================================

/// Observable values for the view layer
#[derive(Debug)]
pub struct ViewState {
    snapshot: watch::Sender<Option<HealthSnapshot>>,
    assessment: watch::Sender<Option<RiskAssessment>>,
    reachable: watch::Sender<bool>,
    exchange: watch::Sender<LatestExchange>,
}

impl ViewState {
    fn new(reachable: bool) -> Self {
        Self {
            snapshot: watch::channel(None).0,
            assessment: watch::channel(None).0,
            reachable: watch::channel(reachable).0,
            exchange: watch::channel(LatestExchange {
                id: 0,
                state: ExchangeState::Idle,
            })
            .0,
        }
    }

    pub fn latest_snapshot(&self) -> Option<HealthSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn latest_assessment(&self) -> Option<RiskAssessment> {
        self.assessment.borrow().clone()
    }

    pub fn is_reachable(&self) -> bool {
        *self.reachable.borrow()
    }

    /// State of the most recently started exchange
    pub fn exchange_state(&self) -> ExchangeState {
        self.exchange.borrow().state
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<Option<HealthSnapshot>> {
        self.snapshot.subscribe()
    }

    pub fn subscribe_assessment(&self) -> watch::Receiver<Option<RiskAssessment>> {
        self.assessment.subscribe()
    }

    pub fn subscribe_reachability(&self) -> watch::Receiver<bool> {
        self.reachable.subscribe()
    }

    pub fn subscribe_exchange(&self) -> watch::Receiver<LatestExchange> {
        self.exchange.subscribe()
    }

    fn begin_exchange(&self) -> u64 {
        let mut id = 0;
        self.exchange.send_modify(|latest| {
            latest.id += 1;
            latest.state = ExchangeState::Sent;
            id = latest.id;
        });
        id
    }

    fn finish_exchange(&self, id: u64, state: ExchangeState) {
        self.exchange.send_if_modified(|latest| {
            if latest.id == id {
                latest.state = state;
                true
            } else {
                false
            }
        });
    }
}

// =============================================================================
// PROTOCOL
// =============================================================================

/// Message schema and request/reply driver for one endpoint
pub struct ExchangeProtocol {
    role: Role,
    channel: Arc<dyn PairingChannel>,
    view: ViewState,
}

impl ExchangeProtocol {
    pub fn new(role: Role, channel: Arc<dyn PairingChannel>) -> Self {
        let view = ViewState::new(channel.is_reachable());
        Self {
            role,
            channel,
            view,
        }
    }

    pub fn wearable(channel: Arc<dyn PairingChannel>) -> Self {
        Self::new(Role::Wearable, channel)
    }

    pub fn companion(channel: Arc<dyn PairingChannel>, orchestrator: InferenceOrchestrator) -> Self {
        Self::new(Role::Companion(orchestrator), channel)
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    /// Publish a locally acquired snapshot to the view layer
    pub fn record_snapshot(&self, snapshot: HealthSnapshot) {
        self.view.snapshot.send_replace(Some(snapshot));
    }

    // -------------------------------------------------------------------------
    // Outbound
    // -------------------------------------------------------------------------

    /// Send a snapshot and wait for the reply
    pub async fn send_health_data(
        &self,
        snapshot: &HealthSnapshot,
        request_assessment: bool,
    ) -> Result<ExchangeOutcome, ExchangeError> {
        let payload = HealthDataPayload::from_snapshot(snapshot, Some(request_assessment));
        self.exchange(ExchangeMessage::HealthData(payload)).await
    }

    /// Ask the peer to assess its latest snapshot
    pub async fn request_risk_assessment(&self) -> Result<ExchangeOutcome, ExchangeError> {
        self.exchange(ExchangeMessage::RiskAssessmentRequest).await
    }

    /// Push a snapshot without waiting for a reply
    pub fn push_health_data(
        &self,
        snapshot: &HealthSnapshot,
        request_assessment: bool,
    ) -> Result<(), ExchangeError> {
        let payload = HealthDataPayload::from_snapshot(snapshot, Some(request_assessment));
        self.push(ExchangeMessage::HealthData(payload))
    }

    /// Push an assessment without waiting for a reply
    pub fn push_assessment(&self, assessment: &RiskAssessment) -> Result<(), ExchangeError> {
        let payload = RiskAssessmentPayload::from_assessment(assessment);
        self.push(ExchangeMessage::RiskAssessmentResult(payload))
    }

    async fn exchange(&self, message: ExchangeMessage) -> Result<ExchangeOutcome, ExchangeError> {
        let kind = message.type_name();
        let id = self.view.begin_exchange();
        let encoded = match message.encode() {
            Ok(value) => value,
            Err(e) => {
                self.view.finish_exchange(id, ExchangeState::Failed);
                return Err(e.into());
            }
        };

        let result = self.channel.send_with_reply(encoded).await;
        self.refresh_reachability();

        let outcome = match result {
            Ok(reply) => self.interpret_reply(reply),
            Err(e) => Err(ExchangeError::Channel(e)),
        };

        match &outcome {
            Ok(ExchangeOutcome::Replied(_)) => {
                self.view.finish_exchange(id, ExchangeState::Replied);
                debug!(kind, "exchange replied with assessment");
            }
            Ok(ExchangeOutcome::Acknowledged) => {
                self.view.finish_exchange(id, ExchangeState::Acknowledged);
                debug!(kind, "exchange acknowledged");
            }
            Err(e) => {
                self.view.finish_exchange(id, ExchangeState::Failed);
                warn!(kind, error = %e, "exchange failed");
            }
        }
        outcome
    }

    fn interpret_reply(&self, reply: Value) -> Result<ExchangeOutcome, ExchangeError> {
        let reply: Reply =
            serde_json::from_value(reply).map_err(|e| ExchangeError::MalformedReply(e.to_string()))?;

        if reply.status == ReplyStatus::Error {
            return Err(ExchangeError::Rejected(
                reply.message.unwrap_or_else(|| "unspecified error".to_string()),
            ));
        }

        match reply.risk_assessment {
            Some(payload) => {
                let assessment = payload
                    .to_assessment()
                    .map_err(|e| ExchangeError::MalformedReply(e.to_string()))?;
                self.view.assessment.send_replace(Some(assessment.clone()));
                Ok(ExchangeOutcome::Replied(assessment))
            }
            None => Ok(ExchangeOutcome::Acknowledged),
        }
    }

    fn push(&self, message: ExchangeMessage) -> Result<(), ExchangeError> {
        let kind = message.type_name();
        let encoded = message.encode()?;
        let result = self.channel.send(encoded);
        self.refresh_reachability();
        match result {
            Ok(()) => {
                debug!(kind, "message pushed");
                Ok(())
            }
            Err(e) => {
                warn!(kind, error = %e, "push failed");
                Err(e.into())
            }
        }
    }

    fn refresh_reachability(&self) -> bool {
        let reachable = self.channel.is_reachable();
        self.view.reachable.send_if_modified(|current| {
            let changed = *current != reachable;
            *current = reachable;
            changed
        });
        reachable
    }

    // -------------------------------------------------------------------------
    // Periodic re-send
    // -------------------------------------------------------------------------

    /// One sync attempt: skipped (`None`) while unreachable or before the
    /// sensor feed has produced a snapshot
    pub async fn sync_once(
        &self,
        source: &dyn SnapshotSource,
        request_assessment: bool,
    ) -> Option<Result<ExchangeOutcome, ExchangeError>> {
        let snapshot = source.current_snapshot()?;
        self.record_snapshot(snapshot.clone());

        if !self.refresh_reachability() {
            debug!("peer unreachable; sync deferred to next tick");
            return None;
        }
        Some(self.send_health_data(&snapshot, request_assessment).await)
    }

    /// Re-send the current snapshot every `period` until the task is dropped
    pub async fn run_sync_loop(
        &self,
        source: Arc<dyn SnapshotSource>,
        period: Duration,
        request_assessment: bool,
    ) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Some(Err(e)) = self.sync_once(source.as_ref(), request_assessment).await {
                debug!(error = %e, "sync attempt failed; retrying next tick");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    /// Dispatch every message arriving on `inbox`
    pub fn serve(self: Arc<Self>, mut inbox: mpsc::UnboundedReceiver<Inbound>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(role = self.role.name(), "exchange dispatcher running");
            while let Some(inbound) = inbox.recv().await {
                let this = Arc::clone(&self);
                tokio::spawn(async move {
                    this.handle_inbound(inbound.message, inbound.reply).await;
                });
            }
            info!(role = self.role.name(), "exchange dispatcher stopped");
        })
    }

    /// Route one inbound message by its type
    ///
    /// Undecodable messages get an error reply when the sender is waiting,
    /// and are logged and dropped otherwise.
    pub async fn handle_inbound(&self, message: Value, reply: Option<ReplyHandle>) {
        let decoded = match ExchangeMessage::decode(&message) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, has_reply = reply.is_some(), "rejecting inbound message");
                match reply {
                    Some(reply) => respond(reply, Reply::error(e.to_string())),
                    None => debug!("fire-and-forget message discarded"),
                }
                return;
            }
        };

        match decoded {
            ExchangeMessage::HealthData(payload) => self.on_health_data(payload, reply).await,
            ExchangeMessage::RiskAssessmentRequest => self.on_assessment_request(reply).await,
            ExchangeMessage::RiskAssessmentResult(payload) => self.on_assessment_result(payload, reply),
        }
    }

    async fn on_health_data(&self, payload: HealthDataPayload, reply: Option<ReplyHandle>) {
        let snapshot = match payload.to_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.reject(reply, e.to_string());
                return;
            }
        };
        self.record_snapshot(snapshot.clone());

        if !payload.wants_assessment() {
            if let Some(reply) = reply {
                respond(reply, Reply::received());
            }
            return;
        }

        match &self.role {
            Role::Companion(orchestrator) => {
                let assessment = orchestrator.assess_driving_risk(&snapshot).await;
                self.deliver_assessment(assessment, reply);
            }
            Role::Wearable => {
                self.reject(reply, "Risk assessment not supported on this device".to_string());
            }
        }
    }

    async fn on_assessment_request(&self, reply: Option<ReplyHandle>) {
        let Role::Companion(orchestrator) = &self.role else {
            self.reject(reply, "Risk assessment not supported on this device".to_string());
            return;
        };

        let Some(snapshot) = self.view.latest_snapshot() else {
            self.reject(reply, "No health data available".to_string());
            return;
        };

        let assessment = orchestrator.assess_driving_risk(&snapshot).await;
        self.deliver_assessment(assessment, reply);
    }

    fn on_assessment_result(&self, payload: RiskAssessmentPayload, reply: Option<ReplyHandle>) {
        match payload.to_assessment() {
            Ok(assessment) => {
                info!(level = %assessment.level(), "risk assessment received");
                self.view.assessment.send_replace(Some(assessment));
                if let Some(reply) = reply {
                    respond(reply, Reply::received());
                }
            }
            Err(e) => self.reject(reply, e.to_string()),
        }
    }

    /// Reply inline when possible, otherwise push as a separate message
    fn deliver_assessment(&self, assessment: RiskAssessment, reply: Option<ReplyHandle>) {
        self.view.assessment.send_replace(Some(assessment.clone()));
        match reply {
            Some(reply) => respond(reply, Reply::with_assessment(&assessment)),
            None => {
                if let Err(e) = self.push_assessment(&assessment) {
                    warn!(error = %e, "could not push assessment to peer");
                }
            }
        }
    }

    fn reject(&self, reply: Option<ReplyHandle>, message: String) {
        warn!(%message, has_reply = reply.is_some(), "inbound message rejected");
        if let Some(reply) = reply {
            respond(reply, Reply::error(message));
        }
    }
}

fn respond(reply: ReplyHandle, body: Reply) {
    if !reply.send(body.to_value()) {
        debug!("peer stopped waiting before the reply was sent");
    }
}
