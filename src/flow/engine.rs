//! Flow engine driving all open supply sessions
//!
//! The engine owns the session registry and is the only component that
//! mutates session state. Every mutation goes through the state machine in
//! [`super::machine`]; the engine's job is to lock the right session, feed
//! it events (caller commands or observations diffed from provider polls),
//! and execute the effects each transition requests.

use super::machine::{self, Effect, OrchestrationState};
use super::session::{FlowSession, SessionSummary};
use crate::config::{ChainConfig, OrchestratorConfig, Settings};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::FlowEvent;
use crate::notify::UserNotifier;
use crate::position::{ChainRef, PositionForm, SourceField, TokenRef};
use crate::supply::SupplyDispatcher;
use crate::transfer::{diff_snapshots, TransferIntent, TransferProvider};

use chrono::Utc;
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Swap-then-supply flow engine
pub struct FlowEngine {
    /// Sessions by id, each behind its own lock. Values are `Arc`ed so a
    /// handle can be taken and the registry shard released before any await;
    /// a shard read guard held through a provider call would block writers.
    sessions: DashMap<Uuid, Arc<Mutex<FlowSession>>>,
    /// Transfer provider executing cross-chain swaps
    transfer: Arc<dyn TransferProvider>,
    /// Supply dispatcher guarding the planner
    dispatcher: SupplyDispatcher,
    /// Sink for user-visible failure notifications
    notifier: Arc<dyn UserNotifier>,
    /// Configuration
    config: OrchestratorConfig,
    /// Enabled chains by chain id
    chains: HashMap<u64, ChainConfig>,
    /// Resident sessions whose dialog has not closed
    open_sessions: AtomicUsize,
    /// Shutdown flag
    shutdown: Arc<RwLock<bool>>,
}

impl FlowEngine {
    /// Create a new flow engine
    pub fn new(
        settings: &Settings,
        transfer: Arc<dyn TransferProvider>,
        dispatcher: SupplyDispatcher,
        notifier: Arc<dyn UserNotifier>,
    ) -> Self {
        let chains = settings
            .enabled_chains()
            .into_iter()
            .map(|(_, chain)| (chain.chain_id, chain.clone()))
            .collect();

        Self {
            sessions: DashMap::new(),
            transfer,
            dispatcher,
            notifier,
            config: settings.orchestrator.clone(),
            chains,
            open_sessions: AtomicUsize::new(0),
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Main engine loop
    pub async fn run(&self) -> OrchestratorResult<()> {
        let mut poll_interval = interval(Duration::from_millis(self.config.poll_interval_ms));
        let mut cleanup_interval = interval(Duration::from_secs(self.config.cleanup_interval_secs));

        info!("Flow engine started");

        loop {
            if *self.shutdown.read().await {
                break;
            }

            tokio::select! {
                _ = poll_interval.tick() => {
                    self.poll_sessions().await;
                }

                _ = cleanup_interval.tick() => {
                    self.cleanup().await;
                }
            }
        }

        info!("Flow engine stopped");
        Ok(())
    }

    /// Stop the flow engine
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
        info!("Flow engine shutdown initiated");
    }

    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    /// Resident sessions, including closed ones not yet swept
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Resident sessions whose dialog is still open
    pub fn open_count(&self) -> usize {
        self.open_sessions.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.config.max_sessions
    }

    /// Open a session for one supply dialog
    pub async fn open_session(&self, form: PositionForm) -> OrchestratorResult<Uuid> {
        if self.sessions.len() >= self.config.max_sessions {
            return Err(OrchestratorError::SessionLimitReached {
                max: self.config.max_sessions,
            });
        }
        // Destination metadata may still be loading when the dialog opens;
        // only a chain we definitely cannot supply on is rejected here.
        if let Some(chain) = &form.destination().chain {
            self.require_chain(chain.chain_id)?;
        }

        let session = FlowSession::new(form);
        let id = session.id;
        if !session.form.destination_ready() {
            debug!("Session {} opened before destination metadata loaded", id);
        }
        self.sessions.insert(id, Arc::new(Mutex::new(session)));

        self.open_sessions.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_session_opened();
        crate::metrics::set_active_sessions(self.open_count());
        info!("Opened session {}", id);
        Ok(id)
    }

    /// Trigger the supply action for a session.
    ///
    /// From Idle this either supplies directly (source already is the
    /// destination reserve) or starts a cross-chain swap; from ReadyToSupply
    /// it fires the deposit built from swap outputs. Anywhere else the
    /// command is rejected.
    pub async fn confirm(&self, id: Uuid) -> OrchestratorResult<()> {
        let handle = self.session_handle(id)?;
        let mut session = handle.lock().await;

        if session.is_closed() {
            return Err(OrchestratorError::SessionClosed { id });
        }
        if let Some(missing) = session.form.missing_input() {
            return Err(OrchestratorError::InvalidSelection(format!(
                "{} required before confirm",
                missing
            )));
        }
        if let Some(chain) = &session.form.destination().chain {
            self.require_chain(chain.chain_id)?;
        }

        let direct = session.form.is_direct();
        self.apply(&mut session, FlowEvent::ConfirmRequested { direct })
            .await
    }

    /// Update the source selection for a session
    pub async fn update_source(
        &self,
        id: Uuid,
        token: Option<TokenRef>,
        chain: Option<ChainRef>,
        amount: Option<String>,
    ) -> OrchestratorResult<()> {
        let handle = self.session_handle(id)?;
        let mut session = handle.lock().await;

        if session.is_closed() {
            return Err(OrchestratorError::SessionClosed { id });
        }

        if let Some(token) = token {
            session.form.set_source_token(token);
        }
        if let Some(chain) = chain {
            session.form.set_source_chain(chain);
        }
        if let Some(amount) = amount {
            session.form.set_source_amount(amount);
        }
        session.touch();

        // Selecting the destination reserve again abandons any in-flight
        // swap flow.
        if session.form.is_direct() && session.state != OrchestrationState::Idle {
            if session.state.is_swap_active() {
                info!(
                    "Session {} source matches destination again, abandoning swap",
                    id
                );
            }
            return self.apply(&mut session, FlowEvent::SelectionMatched).await;
        }
        Ok(())
    }

    /// Close a session's dialog. Idempotent.
    pub async fn close_session(&self, id: Uuid) -> OrchestratorResult<()> {
        let handle = self.session_handle(id)?;
        let mut session = handle.lock().await;

        if session.is_closed() {
            return Ok(());
        }

        self.apply(&mut session, FlowEvent::SessionClosed).await?;
        session.closed_at = Some(Utc::now());

        self.open_sessions.fetch_sub(1, Ordering::Relaxed);
        crate::metrics::record_session_closed();
        crate::metrics::set_active_sessions(self.open_count());
        info!("Closed session {}", id);
        Ok(())
    }

    pub async fn session_summary(&self, id: Uuid) -> OrchestratorResult<SessionSummary> {
        let handle = self.session_handle(id)?;
        let session = handle.lock().await;
        Ok(session.summary())
    }

    pub async fn session_summaries(&self) -> Vec<SessionSummary> {
        let handles: Vec<Arc<Mutex<FlowSession>>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            summaries.push(handle.lock().await.summary());
        }
        summaries
    }

    /// Count open sessions per state, for the status API
    pub async fn state_counts(&self) -> HashMap<&'static str, usize> {
        let handles: Vec<Arc<Mutex<FlowSession>>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let mut counts = HashMap::new();
        for handle in handles {
            let session = handle.lock().await;
            if !session.is_closed() {
                *counts.entry(session.state.name()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Clone a session's handle out of the registry. The shard guard drops
    /// here, before the caller ever awaits the session lock.
    fn session_handle(&self, id: Uuid) -> OrchestratorResult<Arc<Mutex<FlowSession>>> {
        self.sessions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(OrchestratorError::SessionNotFound { id })
    }

    fn require_chain(&self, chain_id: u64) -> OrchestratorResult<()> {
        if self.chains.contains_key(&chain_id) {
            Ok(())
        } else {
            Err(OrchestratorError::ChainNotFound { chain_id })
        }
    }

    /// Apply one event to a session, executing effects as they come.
    ///
    /// Effects can yield follow-up events (a declined initiation turns into
    /// `TransferRejected`); those are processed in the same call so the
    /// session never unlocks mid-cascade.
    async fn apply(
        &self,
        session: &mut FlowSession,
        event: FlowEvent,
    ) -> OrchestratorResult<()> {
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            let transition = match machine::transition(&session.state, &event) {
                Ok(transition) => transition,
                Err(e) => {
                    if let OrchestratorError::InvalidTransition { state, event } = &e {
                        crate::metrics::record_command_rejected(state, event);
                    }
                    return Err(e);
                }
            };

            crate::metrics::record_flow_event(&event);
            self.note_observation(session, &event);

            if transition.next != session.state {
                debug!(
                    "Session {} transition: {} -> {} on {}",
                    session.id,
                    session.state.name(),
                    transition.next.name(),
                    event.name()
                );
                self.note_entry(session, &transition.next);
            }
            session.state = transition.next;
            session.touch();

            // A matched selection ends the whole flow, not just the machine
            // position: the dispatch guard and swap bookkeeping go with it,
            // so a later confirm starts a fresh flow. The form itself is
            // already what the user wants.
            if matches!(event, FlowEvent::SelectionMatched) {
                session.clear_flow();
            }

            for effect in transition.effects {
                if let Some(follow_up) = self.run_effect(session, effect).await? {
                    queue.push_back(follow_up);
                }
            }
        }

        Ok(())
    }

    /// Keep the latest provider status around for summaries and notifications
    fn note_observation(&self, session: &mut FlowSession, event: &FlowEvent) {
        match event {
            FlowEvent::StatusObserved { status } | FlowEvent::TrackingStopped { status } => {
                session.last_status = Some(*status);
            }
            _ => {}
        }
    }

    /// Record swap outcome metrics when the machine actually enters a
    /// terminal swap state. Stale observations absorbed in place must not
    /// count a swap twice.
    fn note_entry(&self, session: &FlowSession, next: &OrchestrationState) {
        let dest_chain = session
            .form
            .destination()
            .chain
            .as_ref()
            .map(|c| c.chain_id)
            .unwrap_or(0);
        match next {
            OrchestrationState::SwapCompleted => {
                if let Some(started_at) = session.swap_started_at {
                    let duration = (Utc::now() - started_at).num_milliseconds() as f64 / 1000.0;
                    crate::metrics::record_swap_duration(dest_chain, duration);
                }
                crate::metrics::record_swap_completed(dest_chain);
            }
            OrchestrationState::Failed { status } => {
                if let Some(started_at) = session.swap_started_at {
                    let duration = (Utc::now() - started_at).num_milliseconds() as f64 / 1000.0;
                    crate::metrics::record_swap_duration(dest_chain, duration);
                }
                crate::metrics::record_swap_failed(dest_chain, *status);
            }
            _ => {}
        }
    }

    /// Execute one transition effect
    async fn run_effect(
        &self,
        session: &mut FlowSession,
        effect: Effect,
    ) -> OrchestratorResult<Option<FlowEvent>> {
        match effect {
            Effect::InitiateTransfer => self.initiate_transfer(session).await,

            Effect::WriteSourceField(field) => {
                self.write_source_field(session, field)?;
                Ok(None)
            }

            Effect::NotifySwapFailure(status) => {
                if let Err(e) = self
                    .notifier
                    .swap_failed(session.id, status, &session.form)
                    .await
                {
                    warn!(
                        "Failure notification for session {} not delivered: {}",
                        session.id, e
                    );
                }
                Ok(None)
            }

            Effect::ResetSource => {
                session.form.mirror_destination();
                session.clear_flow();
                Ok(None)
            }

            Effect::DispatchSupply => {
                self.dispatcher.dispatch(session).await?;
                Ok(None)
            }
        }
    }

    /// Hand the transfer intent to the provider.
    ///
    /// A decline or an initiation error resets the flow without any
    /// user-visible failure; only an accepted transfer leaves bookkeeping
    /// behind.
    async fn initiate_transfer(
        &self,
        session: &mut FlowSession,
    ) -> OrchestratorResult<Option<FlowEvent>> {
        let intent = build_intent(&session.form)?;

        match self.transfer.handle_transfer(&intent).await {
            Ok(Some(ticket)) => {
                debug!("Transfer accepted for session {}: ticket {}", session.id, ticket);
                // Acceptance starts a fresh flow; bookkeeping from any
                // previous attempt, the dispatch guard included, is void now.
                session.clear_flow();
                session.ticket = Some(ticket);
                session.swap_started_at = Some(Utc::now());
                crate::metrics::record_swap_initiated(intent.to_chain_id);
                Ok(None)
            }
            Ok(None) => {
                info!("Transfer declined for session {}", session.id);
                Ok(Some(FlowEvent::TransferRejected))
            }
            Err(e) => {
                info!(
                    "Transfer initiation failed for session {}: {}",
                    session.id, e
                );
                Ok(Some(FlowEvent::TransferRejected))
            }
        }
    }

    /// Write one source field from the swap outputs
    fn write_source_field(
        &self,
        session: &mut FlowSession,
        field: SourceField,
    ) -> OrchestratorResult<()> {
        match field {
            SourceField::Amount => {
                let amount = session
                    .last_snapshot
                    .as_ref()
                    .map(|s| s.receive_amount.clone())
                    .filter(|a| !a.is_empty())
                    .ok_or_else(|| {
                        OrchestratorError::Internal(
                            "handoff reached amount write without a received amount".to_string(),
                        )
                    })?;
                session.form.set_source_amount(amount);
            }
            SourceField::Chain => {
                let chain = session.form.destination().chain.clone().ok_or_else(|| {
                    OrchestratorError::Internal(
                        "handoff reached chain write without destination chain".to_string(),
                    )
                })?;
                session.form.set_source_chain(chain);
            }
            SourceField::Token => {
                let token = session.form.destination().token.clone().ok_or_else(|| {
                    OrchestratorError::Internal(
                        "handoff reached token write without destination token".to_string(),
                    )
                })?;
                session.form.set_source_token(token);
            }
        }

        session.handoff_log.push(field);
        crate::metrics::record_handoff_step(field);
        debug!("Session {} handoff wrote {}", session.id, field.name());
        Ok(())
    }

    /// Drive all open sessions one tick
    async fn poll_sessions(&self) {
        let ids: Vec<Uuid> = self.sessions.iter().map(|entry| *entry.key()).collect();
        let drives = ids.into_iter().map(|id| self.drive_session(id));
        futures::future::join_all(drives).await;
    }

    async fn drive_session(&self, id: Uuid) {
        let Ok(handle) = self.session_handle(id) else {
            return;
        };
        let mut session = handle.lock().await;
        if session.is_closed() {
            return;
        }
        if let Err(e) = self.drive(&mut session).await {
            error!("Error driving session {}: {}", id, e);
        }
    }

    /// Advance one session by at most one flow step.
    ///
    /// Steps deliberately run one per tick: each handoff write lands before
    /// the next dependency is even checked, which keeps the fixed ordering
    /// observable and cheap to reason about.
    async fn drive(&self, session: &mut FlowSession) -> OrchestratorResult<()> {
        match session.state.clone() {
            OrchestrationState::Idle | OrchestrationState::ReadyToSupply => Ok(()),

            OrchestrationState::SwapInitiated | OrchestrationState::SwapTracking { .. } => {
                self.observe_transfer(session).await
            }

            OrchestrationState::SwapCompleted => {
                self.apply(session, FlowEvent::HandoffBegun).await
            }

            OrchestrationState::HandoffInProgress { step } => {
                // The received amount can land a poll or two after the
                // terminal status; keep refreshing while waiting for it.
                if step == SourceField::Amount && !handoff_input_ready(session, step) {
                    self.refresh_snapshot(session).await;
                }

                if handoff_input_ready(session, step) {
                    self.apply(session, FlowEvent::HandoffInputReady { step })
                        .await
                } else {
                    debug!("Session {} handoff waiting on {}", session.id, step.name());
                    Ok(())
                }
            }

            OrchestrationState::Failed { .. } => {
                self.apply(session, FlowEvent::FailureHandled).await
            }
        }
    }

    /// Poll the provider and apply whatever changed
    async fn observe_transfer(&self, session: &mut FlowSession) -> OrchestratorResult<()> {
        let Some(ticket) = session.ticket.clone() else {
            return Ok(());
        };

        let next = match self.transfer.snapshot(&ticket).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // The provider owns retries; a missed poll is not an outcome.
                if e.is_transient() {
                    warn!("Snapshot for session {} unavailable: {}", session.id, e);
                } else {
                    error!("Snapshot for session {} failed: {}", session.id, e);
                }
                return Ok(());
            }
        };

        let events = diff_snapshots(session.last_snapshot.as_ref(), &next);
        session.last_snapshot = Some(next);

        for event in events {
            self.apply(session, event).await?;
        }
        Ok(())
    }

    async fn refresh_snapshot(&self, session: &mut FlowSession) {
        let Some(ticket) = session.ticket.clone() else {
            return;
        };
        match self.transfer.snapshot(&ticket).await {
            Ok(snapshot) => session.last_snapshot = Some(snapshot),
            Err(e) => warn!("Snapshot refresh for session {} failed: {}", session.id, e),
        }
    }

    /// Sweep sessions past the retention window.
    ///
    /// Closed dialogs expire a TTL after closing. Sessions that were never
    /// closed expire a TTL after their last state activity: a client that
    /// vanished mid-dialog must not keep its session polled and resident
    /// forever, or pin registry capacity.
    async fn cleanup(&self) {
        let ttl = chrono::Duration::seconds(self.config.session_ttl_secs as i64);
        let now = Utc::now();
        let entries: Vec<(Uuid, Arc<Mutex<FlowSession>>)> = self
            .sessions
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut swept = 0usize;
        let mut abandoned = 0usize;

        for (id, handle) in entries {
            let (expired, closed) = {
                let session = handle.lock().await;
                let idle_since = session.closed_at.unwrap_or(session.updated_at);
                (now - idle_since > ttl, session.is_closed())
            };
            if expired {
                self.sessions.remove(&id);
                swept += 1;
                if !closed {
                    abandoned += 1;
                    self.open_sessions.fetch_sub(1, Ordering::Relaxed);
                }
            }
        }

        if swept > 0 {
            debug!("Swept {} expired sessions ({} abandoned)", swept, abandoned);
        }
        crate::metrics::set_active_sessions(self.open_count());
    }
}

/// Build the provider intent from the current form
fn build_intent(form: &PositionForm) -> OrchestratorResult<TransferIntent> {
    let source_token = form
        .source()
        .token
        .as_ref()
        .ok_or_else(|| OrchestratorError::InvalidSelection("source token missing".to_string()))?;
    let source_chain = form
        .source()
        .chain
        .as_ref()
        .ok_or_else(|| OrchestratorError::InvalidSelection("source chain missing".to_string()))?;
    let dest_token = form.destination().token.as_ref().ok_or_else(|| {
        OrchestratorError::InvalidSelection("destination token missing".to_string())
    })?;
    let dest_chain = form.destination().chain.as_ref().ok_or_else(|| {
        OrchestratorError::InvalidSelection("destination chain missing".to_string())
    })?;
    if form.source().amount.is_empty() {
        return Err(OrchestratorError::InvalidSelection(
            "source amount missing".to_string(),
        ));
    }

    Ok(TransferIntent {
        from_chain_id: source_chain.chain_id,
        from_token: source_token.address,
        to_chain_id: dest_chain.chain_id,
        to_token: dest_token.address,
        amount: form.source().amount.clone(),
    })
}

/// Check whether the dependency for one handoff step is present
fn handoff_input_ready(session: &FlowSession, step: SourceField) -> bool {
    match step {
        SourceField::Amount => session
            .last_snapshot
            .as_ref()
            .map(|s| !s.receive_amount.is_empty())
            .unwrap_or(false),
        SourceField::Chain => session.form.destination().chain.is_some(),
        SourceField::Token => session.form.destination().token.is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{LogNotifier, MockUserNotifier};
    use crate::position::AssetSelection;
    use crate::supply::{MockSupplyPlanner, SupplyCapabilities, SupplyReceipt};
    use crate::transfer::{SwapStatus, TransferSnapshot, TransferTicket};
    use ethers::types::H256;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio_test::assert_ok;

    // ------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------

    fn test_settings() -> Settings {
        toml::from_str(
            r#"
[orchestrator]
instance_id = "engine-test"
poll_interval_ms = 10
cleanup_interval_secs = 60
session_ttl_secs = 300
max_sessions = 16

[api]
host = "127.0.0.1"
port = 0

[metrics]
enabled = false
port = 0

[transfer]
api_urls = ["http://localhost:1"]
request_timeout_ms = 1000

[supply]
planner_url = "http://localhost:2"
request_timeout_ms = 1000
enable_health_factor_preview = false

[notifications]

[chains.ethereum]
chain_id = 1
name = "Ethereum"
pool_address = "0x87870Bca3F3fD6335C3F4ce8392D69350B4fA4E2"
enabled = true
"#,
        )
        .unwrap()
    }

    fn usdc_mainnet() -> TokenRef {
        TokenRef {
            address: "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"
                .parse()
                .unwrap(),
            symbol: "USDC".to_string(),
            decimals: 6,
        }
    }

    fn usdc_arbitrum() -> TokenRef {
        TokenRef {
            address: "0xaf88d065e77c8cC2239327C5EDb3A432268e5831"
                .parse()
                .unwrap(),
            symbol: "USDC".to_string(),
            decimals: 6,
        }
    }

    fn ethereum() -> ChainRef {
        ChainRef {
            chain_id: 1,
            name: "Ethereum".to_string(),
        }
    }

    fn arbitrum() -> ChainRef {
        ChainRef {
            chain_id: 42161,
            name: "Arbitrum".to_string(),
        }
    }

    fn direct_form() -> PositionForm {
        PositionForm::new(
            AssetSelection::new(usdc_mainnet(), ethereum(), "100"),
            AssetSelection::new(usdc_mainnet(), ethereum(), ""),
        )
    }

    fn cross_chain_form() -> PositionForm {
        PositionForm::new(
            AssetSelection::new(usdc_arbitrum(), arbitrum(), "250.0"),
            AssetSelection::new(usdc_mainnet(), ethereum(), ""),
        )
    }

    fn snap(
        swap_id: Option<&str>,
        status: Option<SwapStatus>,
        is_tracking: bool,
        is_processing: bool,
        receive_amount: &str,
    ) -> TransferSnapshot {
        TransferSnapshot {
            amount: "250.0".to_string(),
            receive_amount: receive_amount.to_string(),
            swap_id: swap_id.map(crate::transfer::SwapId::new),
            status,
            is_tracking,
            is_processing,
        }
    }

    // ------------------------------------------------------------------
    // Scripted transfer provider
    // ------------------------------------------------------------------

    enum Initiation {
        Accept,
        Decline,
        Fail,
    }

    struct ScriptedTransfer {
        initiation: Initiation,
        snapshots: StdMutex<VecDeque<TransferSnapshot>>,
    }

    impl ScriptedTransfer {
        fn new(initiation: Initiation, snapshots: Vec<TransferSnapshot>) -> Arc<Self> {
            Arc::new(Self {
                initiation,
                snapshots: StdMutex::new(snapshots.into()),
            })
        }

        fn push(&self, snapshot: TransferSnapshot) {
            self.snapshots.lock().unwrap().push_back(snapshot);
        }
    }

    #[async_trait::async_trait]
    impl TransferProvider for ScriptedTransfer {
        async fn handle_transfer(
            &self,
            _intent: &TransferIntent,
        ) -> OrchestratorResult<Option<TransferTicket>> {
            match self.initiation {
                Initiation::Accept => Ok(Some(TransferTicket::new("ticket-1"))),
                Initiation::Decline => Ok(None),
                Initiation::Fail => {
                    Err(OrchestratorError::Transfer("provider offline".to_string()))
                }
            }
        }

        async fn snapshot(
            &self,
            _ticket: &TransferTicket,
        ) -> OrchestratorResult<TransferSnapshot> {
            let mut queue = self.snapshots.lock().unwrap();
            // The last scripted snapshot repeats, like a real provider
            // answering the same state until something changes.
            if queue.len() > 1 {
                Ok(queue.pop_front().unwrap())
            } else {
                queue.front().cloned().ok_or_else(|| {
                    OrchestratorError::Transfer("no snapshot scripted".to_string())
                })
            }
        }
    }

    fn accepting_planner(times: usize) -> MockSupplyPlanner {
        let mut planner = MockSupplyPlanner::new();
        planner.expect_supply().times(times).returning(|_| {
            Ok(SupplyReceipt {
                tx_hash: H256::zero(),
                health_factor_after: None,
            })
        });
        planner
    }

    fn build_engine(
        transfer: Arc<ScriptedTransfer>,
        planner: MockSupplyPlanner,
        notifier: Arc<dyn UserNotifier>,
    ) -> FlowEngine {
        let settings = test_settings();
        let dispatcher = SupplyDispatcher::new(
            Arc::new(planner),
            SupplyCapabilities::default(),
            &settings,
        )
        .unwrap();
        FlowEngine::new(&settings, transfer, dispatcher, notifier)
    }

    async fn state_of(engine: &FlowEngine, id: Uuid) -> OrchestrationState {
        engine.session_summary(id).await.unwrap().state
    }

    // ------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_direct_supply_happy_path() {
        let transfer = ScriptedTransfer::new(Initiation::Accept, vec![]);
        let engine = build_engine(transfer, accepting_planner(1), Arc::new(LogNotifier));

        let id = engine.open_session(direct_form()).await.unwrap();
        assert_ok!(engine.confirm(id).await);

        let summary = engine.session_summary(id).await.unwrap();
        assert_eq!(summary.state, OrchestrationState::Idle);
        assert!(summary.supply_dispatched);
        assert_eq!(summary.supply_tx, Some(H256::zero()));
    }

    #[tokio::test]
    async fn test_cross_chain_flow_end_to_end() {
        let transfer = ScriptedTransfer::new(
            Initiation::Accept,
            vec![
                snap(None, None, false, true, ""),
                snap(Some("swap-1"), Some(SwapStatus::InProgress), true, true, ""),
                snap(
                    Some("swap-1"),
                    Some(SwapStatus::Completed),
                    false,
                    false,
                    "249.1",
                ),
            ],
        );
        let mut planner = MockSupplyPlanner::new();
        planner
            .expect_supply()
            .times(1)
            .withf(|request| {
                // "249.1" in 6-decimal base units, on the destination chain.
                request.chain_id == 1
                    && request.amount == ethers::types::U256::from(249_100_000u64)
            })
            .returning(|_| {
                Ok(SupplyReceipt {
                    tx_hash: H256::zero(),
                    health_factor_after: None,
                })
            });
        let engine = build_engine(transfer, planner, Arc::new(LogNotifier));

        let id = engine.open_session(cross_chain_form()).await.unwrap();
        assert_ok!(engine.confirm(id).await);
        assert_eq!(state_of(&engine, id).await, OrchestrationState::SwapInitiated);

        for _ in 0..10 {
            engine.poll_sessions().await;
        }

        let summary = engine.session_summary(id).await.unwrap();
        assert_eq!(summary.state, OrchestrationState::ReadyToSupply);
        assert_eq!(
            summary.handoff_log,
            vec![SourceField::Amount, SourceField::Chain, SourceField::Token]
        );
        assert_eq!(summary.form.source().amount, "249.1");
        assert_eq!(summary.form.source().token, Some(usdc_mainnet()));
        assert_eq!(summary.form.source().chain, Some(ethereum()));

        assert_ok!(engine.confirm(id).await);
        let summary = engine.session_summary(id).await.unwrap();
        assert!(summary.supply_dispatched);
    }

    #[tokio::test]
    async fn test_handoff_writes_one_field_per_tick() {
        let transfer = ScriptedTransfer::new(
            Initiation::Accept,
            vec![
                snap(Some("swap-1"), Some(SwapStatus::InProgress), true, true, ""),
                snap(
                    Some("swap-1"),
                    Some(SwapStatus::Completed),
                    false,
                    false,
                    "249.1",
                ),
            ],
        );
        let engine = build_engine(transfer, accepting_planner(0), Arc::new(LogNotifier));

        let id = engine.open_session(cross_chain_form()).await.unwrap();
        assert_ok!(engine.confirm(id).await);

        let mut seen = Vec::new();
        for _ in 0..8 {
            engine.poll_sessions().await;
            seen.push(state_of(&engine, id).await);
        }

        let expected = [
            OrchestrationState::SwapTracking {
                swap_id: crate::transfer::SwapId::new("swap-1"),
            },
            OrchestrationState::SwapCompleted,
            OrchestrationState::HandoffInProgress {
                step: SourceField::Amount,
            },
            OrchestrationState::HandoffInProgress {
                step: SourceField::Chain,
            },
            OrchestrationState::HandoffInProgress {
                step: SourceField::Token,
            },
            OrchestrationState::ReadyToSupply,
        ];
        assert_eq!(&seen[..6], &expected);
    }

    #[tokio::test]
    async fn test_handoff_stalls_until_amount_arrives() {
        let transfer = ScriptedTransfer::new(
            Initiation::Accept,
            vec![
                snap(Some("swap-1"), Some(SwapStatus::InProgress), true, true, ""),
                // Terminal status lands before the received amount is known.
                snap(Some("swap-1"), Some(SwapStatus::Completed), false, false, ""),
            ],
        );
        let engine = build_engine(transfer.clone(), accepting_planner(0), Arc::new(LogNotifier));

        let id = engine.open_session(cross_chain_form()).await.unwrap();
        assert_ok!(engine.confirm(id).await);

        for _ in 0..6 {
            engine.poll_sessions().await;
        }

        // Stalled on the amount step: no timeout, no error, nothing written.
        // The amount the user typed for the swap is still in place.
        let summary = engine.session_summary(id).await.unwrap();
        assert_eq!(
            summary.state,
            OrchestrationState::HandoffInProgress {
                step: SourceField::Amount
            }
        );
        assert!(summary.handoff_log.is_empty());
        assert_eq!(summary.form.source().amount, "250.0");

        // The quote arrives; the ladder finishes in order.
        transfer.push(snap(
            Some("swap-1"),
            Some(SwapStatus::Completed),
            false,
            false,
            "249.1",
        ));
        for _ in 0..4 {
            engine.poll_sessions().await;
        }

        let summary = engine.session_summary(id).await.unwrap();
        assert_eq!(summary.state, OrchestrationState::ReadyToSupply);
        assert_eq!(
            summary.handoff_log,
            vec![SourceField::Amount, SourceField::Chain, SourceField::Token]
        );
    }

    #[tokio::test]
    async fn test_handoff_order_holds_across_random_quote_timing() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(7);
        let order = [SourceField::Amount, SourceField::Chain, SourceField::Token];

        for _ in 0..16 {
            // The received amount lands some random number of ticks after
            // the terminal status.
            let quote_delay = rng.gen_range(0..4usize);
            let transfer = ScriptedTransfer::new(
                Initiation::Accept,
                vec![
                    snap(Some("swap-1"), Some(SwapStatus::InProgress), true, true, ""),
                    snap(Some("swap-1"), Some(SwapStatus::Completed), false, false, ""),
                ],
            );
            let engine =
                build_engine(transfer.clone(), accepting_planner(0), Arc::new(LogNotifier));

            let id = engine.open_session(cross_chain_form()).await.unwrap();
            assert_ok!(engine.confirm(id).await);

            for tick in 0..12 {
                if tick == quote_delay {
                    transfer.push(snap(
                        Some("swap-1"),
                        Some(SwapStatus::Completed),
                        false,
                        false,
                        "249.1",
                    ));
                }
                engine.poll_sessions().await;

                // At every point the log is a prefix of the fixed order:
                // never chain before amount, never token before chain.
                let log = engine.session_summary(id).await.unwrap().handoff_log;
                assert_eq!(log.as_slice(), &order[..log.len()]);
            }

            let summary = engine.session_summary(id).await.unwrap();
            assert_eq!(summary.state, OrchestrationState::ReadyToSupply);
            assert_eq!(summary.handoff_log, order.to_vec());
        }
    }

    #[tokio::test]
    async fn test_failed_swap_notifies_and_resets() {
        for status in [SwapStatus::Failed, SwapStatus::Refunded] {
            let transfer = ScriptedTransfer::new(
                Initiation::Accept,
                vec![
                    snap(Some("swap-1"), Some(SwapStatus::InProgress), true, true, ""),
                    snap(Some("swap-1"), Some(status), false, false, ""),
                ],
            );
            let mut notifier = MockUserNotifier::new();
            notifier
                .expect_swap_failed()
                .times(1)
                .withf(move |_, reported, _| *reported == status)
                .returning(|_, _, _| Ok(()));
            let engine = build_engine(transfer, accepting_planner(0), Arc::new(notifier));

            let id = engine.open_session(cross_chain_form()).await.unwrap();
            assert_ok!(engine.confirm(id).await);

            for _ in 0..4 {
                engine.poll_sessions().await;
            }

            let summary = engine.session_summary(id).await.unwrap();
            assert_eq!(summary.state, OrchestrationState::Idle);
            // Source mirrors the destination with no partial writes left.
            assert_eq!(summary.form.source().token, Some(usdc_mainnet()));
            assert_eq!(summary.form.source().chain, Some(ethereum()));
            assert!(summary.form.source().amount.is_empty());
            assert!(summary.handoff_log.is_empty());
            assert!(!summary.supply_dispatched);
        }
    }

    #[tokio::test]
    async fn test_declined_transfer_resets_silently() {
        let transfer = ScriptedTransfer::new(Initiation::Decline, vec![]);
        // No notification expectations: a decline is not a failure.
        let notifier = MockUserNotifier::new();
        let engine = build_engine(transfer, accepting_planner(0), Arc::new(notifier));

        let id = engine.open_session(cross_chain_form()).await.unwrap();
        assert_ok!(engine.confirm(id).await);

        assert_eq!(state_of(&engine, id).await, OrchestrationState::Idle);
    }

    #[tokio::test]
    async fn test_initiation_error_resets_silently() {
        let transfer = ScriptedTransfer::new(Initiation::Fail, vec![]);
        let notifier = MockUserNotifier::new();
        let engine = build_engine(transfer, accepting_planner(0), Arc::new(notifier));

        let id = engine.open_session(cross_chain_form()).await.unwrap();
        assert_ok!(engine.confirm(id).await);

        assert_eq!(state_of(&engine, id).await, OrchestrationState::Idle);
    }

    #[tokio::test]
    async fn test_processing_stop_without_id_resets_silently() {
        let transfer = ScriptedTransfer::new(
            Initiation::Accept,
            vec![
                snap(None, None, false, true, ""),
                snap(None, None, false, false, ""),
            ],
        );
        let notifier = MockUserNotifier::new();
        let engine = build_engine(transfer, accepting_planner(0), Arc::new(notifier));

        let id = engine.open_session(cross_chain_form()).await.unwrap();
        assert_ok!(engine.confirm(id).await);

        for _ in 0..3 {
            engine.poll_sessions().await;
        }

        assert_eq!(state_of(&engine, id).await, OrchestrationState::Idle);
    }

    #[tokio::test]
    async fn test_confirm_rejected_while_swap_active() {
        let transfer =
            ScriptedTransfer::new(Initiation::Accept, vec![snap(None, None, false, true, "")]);
        let engine = build_engine(transfer, accepting_planner(0), Arc::new(LogNotifier));

        let id = engine.open_session(cross_chain_form()).await.unwrap();
        assert_ok!(engine.confirm(id).await);

        let result = engine.confirm(id).await;
        assert!(matches!(
            result,
            Err(OrchestratorError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_double_confirm_direct_blocked() {
        let transfer = ScriptedTransfer::new(Initiation::Accept, vec![]);
        let engine = build_engine(transfer, accepting_planner(1), Arc::new(LogNotifier));

        let id = engine.open_session(direct_form()).await.unwrap();
        assert_ok!(engine.confirm(id).await);

        let result = engine.confirm(id).await;
        assert!(matches!(
            result,
            Err(OrchestratorError::SupplyAlreadyDispatched)
        ));
    }

    #[tokio::test]
    async fn test_supply_retry_after_planner_error() {
        let transfer = ScriptedTransfer::new(Initiation::Accept, vec![]);
        let mut planner = MockSupplyPlanner::new();
        let calls = AtomicUsize::new(0);
        planner.expect_supply().times(2).returning(move |_| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(OrchestratorError::Supply("planner returned 503".to_string()))
            } else {
                Ok(SupplyReceipt {
                    tx_hash: H256::zero(),
                    health_factor_after: None,
                })
            }
        });
        let engine = build_engine(transfer, planner, Arc::new(LogNotifier));

        let id = engine.open_session(direct_form()).await.unwrap();

        let first = engine.confirm(id).await;
        assert!(matches!(first, Err(OrchestratorError::Supply(_))));
        assert!(!engine.session_summary(id).await.unwrap().supply_dispatched);

        assert_ok!(engine.confirm(id).await);
        assert!(engine.session_summary(id).await.unwrap().supply_dispatched);
    }

    #[tokio::test]
    async fn test_second_deposit_after_selection_match() {
        let transfer = ScriptedTransfer::new(
            Initiation::Accept,
            vec![
                snap(Some("swap-1"), Some(SwapStatus::InProgress), true, true, ""),
                snap(
                    Some("swap-1"),
                    Some(SwapStatus::Completed),
                    false,
                    false,
                    "249.1",
                ),
            ],
        );
        let engine = build_engine(transfer, accepting_planner(2), Arc::new(LogNotifier));

        // First deposit runs the full swap-then-supply flow.
        let id = engine.open_session(cross_chain_form()).await.unwrap();
        assert_ok!(engine.confirm(id).await);
        for _ in 0..10 {
            engine.poll_sessions().await;
        }
        assert_ok!(engine.confirm(id).await);
        assert!(engine.session_summary(id).await.unwrap().supply_dispatched);

        // The user keeps the dialog open and types a new amount for the
        // same reserve. The matched selection resets the flow, so the next
        // confirm is a fresh direct deposit, not a duplicate.
        assert_ok!(
            engine
                .update_source(id, None, None, Some("10".to_string()))
                .await
        );
        let summary = engine.session_summary(id).await.unwrap();
        assert_eq!(summary.state, OrchestrationState::Idle);
        assert!(!summary.supply_dispatched);

        assert_ok!(engine.confirm(id).await);
        assert!(engine.session_summary(id).await.unwrap().supply_dispatched);
    }

    #[tokio::test]
    async fn test_new_swap_clears_previous_dispatch_guard() {
        let transfer = ScriptedTransfer::new(
            Initiation::Accept,
            vec![
                snap(Some("swap-2"), Some(SwapStatus::InProgress), true, true, ""),
                snap(
                    Some("swap-2"),
                    Some(SwapStatus::Completed),
                    false,
                    false,
                    "75.5",
                ),
            ],
        );
        let engine = build_engine(transfer, accepting_planner(2), Arc::new(LogNotifier));

        // First deposit is direct.
        let id = engine.open_session(direct_form()).await.unwrap();
        assert_ok!(engine.confirm(id).await);
        assert!(engine.session_summary(id).await.unwrap().supply_dispatched);

        // The user then funds a second deposit from another chain; the
        // accepted transfer starts a fresh flow.
        assert_ok!(
            engine
                .update_source(
                    id,
                    Some(usdc_arbitrum()),
                    Some(arbitrum()),
                    Some("80".to_string()),
                )
                .await
        );
        assert_ok!(engine.confirm(id).await);
        let summary = engine.session_summary(id).await.unwrap();
        assert_eq!(summary.state, OrchestrationState::SwapInitiated);
        assert!(!summary.supply_dispatched);

        for _ in 0..10 {
            engine.poll_sessions().await;
        }
        assert_eq!(state_of(&engine, id).await, OrchestrationState::ReadyToSupply);
        assert_ok!(engine.confirm(id).await);
        assert!(engine.session_summary(id).await.unwrap().supply_dispatched);
    }

    #[tokio::test]
    async fn test_selection_match_abandons_swap() {
        let transfer = ScriptedTransfer::new(
            Initiation::Accept,
            vec![snap(Some("swap-1"), Some(SwapStatus::InProgress), true, true, "")],
        );
        let engine = build_engine(transfer, accepting_planner(0), Arc::new(LogNotifier));

        let id = engine.open_session(cross_chain_form()).await.unwrap();
        assert_ok!(engine.confirm(id).await);
        engine.poll_sessions().await;
        assert!(matches!(
            state_of(&engine, id).await,
            OrchestrationState::SwapTracking { .. }
        ));

        // User flips the source selection back to the destination reserve.
        assert_ok!(
            engine
                .update_source(id, Some(usdc_mainnet()), Some(ethereum()), None)
                .await
        );
        assert_eq!(state_of(&engine, id).await, OrchestrationState::Idle);
    }

    #[tokio::test]
    async fn test_close_resets_and_blocks_commands() {
        let transfer = ScriptedTransfer::new(
            Initiation::Accept,
            vec![snap(Some("swap-1"), Some(SwapStatus::InProgress), true, true, "")],
        );
        let engine = build_engine(transfer, accepting_planner(0), Arc::new(LogNotifier));

        let id = engine.open_session(cross_chain_form()).await.unwrap();
        assert_ok!(engine.confirm(id).await);
        engine.poll_sessions().await;

        assert_ok!(engine.close_session(id).await);
        // Closing twice is fine.
        assert_ok!(engine.close_session(id).await);

        let summary = engine.session_summary(id).await.unwrap();
        assert!(summary.closed);
        assert_eq!(summary.state, OrchestrationState::Idle);
        assert_eq!(summary.form.source().token, Some(usdc_mainnet()));
        assert!(summary.form.source().amount.is_empty());

        let result = engine.confirm(id).await;
        assert!(matches!(result, Err(OrchestratorError::SessionClosed { .. })));
    }

    #[tokio::test]
    async fn test_cleanup_sweeps_expired_sessions() {
        let transfer = ScriptedTransfer::new(Initiation::Accept, vec![]);
        let mut settings = test_settings();
        settings.orchestrator.session_ttl_secs = 0;
        let dispatcher = SupplyDispatcher::new(
            Arc::new(accepting_planner(0)),
            SupplyCapabilities::default(),
            &settings,
        )
        .unwrap();
        let engine = FlowEngine::new(&settings, transfer, dispatcher, Arc::new(LogNotifier));

        let id = engine.open_session(direct_form()).await.unwrap();
        assert_ok!(engine.close_session(id).await);
        assert_eq!(engine.session_count(), 1);

        tokio::time::sleep(Duration::from_millis(5)).await;
        engine.cleanup().await;

        assert_eq!(engine.session_count(), 0);
        assert!(matches!(
            engine.session_summary(id).await,
            Err(OrchestratorError::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_cleanup_sweeps_abandoned_sessions() {
        let transfer = ScriptedTransfer::new(
            Initiation::Accept,
            vec![snap(
                Some("swap-1"),
                Some(SwapStatus::Completed),
                false,
                false,
                "",
            )],
        );
        let mut settings = test_settings();
        settings.orchestrator.session_ttl_secs = 0;
        let dispatcher = SupplyDispatcher::new(
            Arc::new(accepting_planner(0)),
            SupplyCapabilities::default(),
            &settings,
        )
        .unwrap();
        let engine = FlowEngine::new(&settings, transfer, dispatcher, Arc::new(LogNotifier));

        // Neither dialog is ever closed: one sits in Idle, one is parked
        // mid-handoff on a quote that never arrives. Both clients vanished.
        let idle = engine.open_session(direct_form()).await.unwrap();
        let stalled = engine.open_session(cross_chain_form()).await.unwrap();
        assert_ok!(engine.confirm(stalled).await);
        for _ in 0..4 {
            engine.poll_sessions().await;
        }

        tokio::time::sleep(Duration::from_millis(5)).await;
        engine.cleanup().await;

        assert_eq!(engine.session_count(), 0);
        assert_eq!(engine.open_count(), 0);
        assert!(matches!(
            engine.session_summary(idle).await,
            Err(OrchestratorError::SessionNotFound { .. })
        ));
        assert!(matches!(
            engine.session_summary(stalled).await,
            Err(OrchestratorError::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_open_count_tracks_unclosed_sessions() {
        let transfer = ScriptedTransfer::new(Initiation::Accept, vec![]);
        let engine = build_engine(transfer, accepting_planner(0), Arc::new(LogNotifier));

        assert_eq!(engine.open_count(), 0);
        let a = engine.open_session(direct_form()).await.unwrap();
        let _b = engine.open_session(direct_form()).await.unwrap();
        assert_eq!(engine.open_count(), 2);

        assert_ok!(engine.close_session(a).await);
        // Closing twice counts once.
        assert_ok!(engine.close_session(a).await);
        assert_eq!(engine.open_count(), 1);
        assert_eq!(engine.session_count(), 2);

        // Nothing has aged past the retention window yet, so the sweep
        // changes neither count.
        engine.cleanup().await;
        assert_eq!(engine.open_count(), 1);
        assert_eq!(engine.session_count(), 2);
    }

    #[tokio::test]
    async fn test_open_session_validates_chain_and_capacity() {
        let transfer = ScriptedTransfer::new(Initiation::Accept, vec![]);
        let mut settings = test_settings();
        settings.orchestrator.max_sessions = 1;
        let dispatcher = SupplyDispatcher::new(
            Arc::new(accepting_planner(0)),
            SupplyCapabilities::default(),
            &settings,
        )
        .unwrap();
        let engine = FlowEngine::new(&settings, transfer, dispatcher, Arc::new(LogNotifier));

        let unknown_chain = PositionForm::new(
            AssetSelection::default(),
            AssetSelection::new(
                usdc_mainnet(),
                ChainRef {
                    chain_id: 999,
                    name: "Unknown".to_string(),
                },
                "",
            ),
        );
        assert!(matches!(
            engine.open_session(unknown_chain).await,
            Err(OrchestratorError::ChainNotFound { chain_id: 999 })
        ));

        assert_ok!(engine.open_session(direct_form()).await);
        assert!(matches!(
            engine.open_session(direct_form()).await,
            Err(OrchestratorError::SessionLimitReached { max: 1 })
        ));
    }

    #[tokio::test]
    async fn test_confirm_requires_complete_selection() {
        let transfer = ScriptedTransfer::new(Initiation::Accept, vec![]);
        let engine = build_engine(transfer, accepting_planner(0), Arc::new(LogNotifier));

        let mut form = direct_form();
        form.set_source_amount(String::new());
        let id = engine.open_session(form).await.unwrap();

        let result = engine.confirm(id).await;
        assert!(matches!(result, Err(OrchestratorError::InvalidSelection(_))));
    }

    #[tokio::test]
    async fn test_state_counts_track_open_sessions() {
        let transfer =
            ScriptedTransfer::new(Initiation::Accept, vec![snap(None, None, false, true, "")]);
        let engine = build_engine(transfer, accepting_planner(0), Arc::new(LogNotifier));

        let idle = engine.open_session(direct_form()).await.unwrap();
        let swapping = engine.open_session(cross_chain_form()).await.unwrap();
        assert_ok!(engine.confirm(swapping).await);
        assert_ok!(engine.close_session(idle).await);

        let counts = engine.state_counts().await;
        assert_eq!(counts.get("swap_initiated"), Some(&1));
        // Closed sessions drop out of the counts entirely.
        assert_eq!(counts.get("idle"), None);

        assert_eq!(engine.session_summaries().await.len(), 2);
    }

    #[tokio::test]
    async fn test_commands_proceed_while_a_session_is_locked() {
        let transfer = ScriptedTransfer::new(Initiation::Accept, vec![]);
        let engine = build_engine(transfer, accepting_planner(1), Arc::new(LogNotifier));

        let busy = engine.open_session(direct_form()).await.unwrap();
        let handle = engine
            .sessions
            .get(&busy)
            .map(|entry| entry.value().clone())
            .unwrap();
        // Hold one session's lock for the whole test. Only that session
        // may stall; the registry itself must stay open for everyone else.
        let _guard = handle.lock().await;

        let outcome = tokio::time::timeout(Duration::from_secs(1), async {
            let other = engine.open_session(direct_form()).await?;
            engine.confirm(other).await?;
            engine.close_session(other).await?;
            engine.session_summary(other).await
        })
        .await
        .expect("registry wedged behind a held session lock");

        assert!(outcome.unwrap().closed);
    }
}
