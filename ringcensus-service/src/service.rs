//! `MembershipService` (Section 4.7): the single-threaded protocol loop
//! orchestrator. One `tokio` task owns every piece of mutable protocol
//! state (`Inner`); every other caller — the `RpcHandler` impl, probe
//! timers, fast-path timeout timers — only ever sends a [`Command`] into
//! its channel and, where a reply is needed, awaits a `oneshot`. This is
//! the same pattern Section 5 calls for ("transport I/O runs on separate
//! worker pools and hands work to the protocol loop via a thread-safe
//! queue"), implemented with a `tokio::sync::mpsc` channel instead of a
//! literal OS thread.

use crate::events::{Event, EventPayload, Subscribers};
use crate::failure_detector::LinkFailureDetector;
use crate::join::JoinOutcome;
use crate::watermark::WatermarkBuffer;
use async_trait::async_trait;
use ringcensus_consensus::{ConsensusEngine, ConsensusMessage};
use ringcensus_core::{
    derive_member_id, ClusterConfig, Configuration, ConfigurationId, EdgeStatus, Endpoint, LinkUpdate,
    MembershipView, NodeId, Proposal,
};
use ringcensus_net::{
    BatchedLinkUpdateMessage, BroadcastLayer, InterceptingHandler, JoinMessage, JoinResponse, ProbeResponse,
    ProbeStatus, RpcHandler, RpcMessage, ServerInterceptor, StatusCode, Transport,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

enum Command {
    Rpc { from: Endpoint, message: RpcMessage, respond: oneshot::Sender<Option<RpcMessage>> },
    FastPathTimeout { config_id: ConfigurationId },
    ClassicRetry { config_id: ConfigurationId, round: u64, value: Proposal },
    Subscribe { event: Event, callback: crate::events::Callback },
    Snapshot { respond: oneshot::Sender<MembershipView> },
    Shutdown { respond: oneshot::Sender<()> },
}

struct Inner {
    local: Endpoint,
    view: MembershipView,
    watermark: WatermarkBuffer,
    engine: ConsensusEngine,
    subscribers: Subscribers,
    /// Phase-2 join replies this node owes, parked here because the
    /// decision they are waiting on (Section 4.6) has not committed yet.
    /// `install_configuration` answers the ones its decision admits; a
    /// joiner whose winning round happens through a different observer is
    /// left parked and simply never gets an answer from this one — its
    /// `run_phase2` has already moved on by then (Section 4.6: a phase-2
    /// request timing out is a legitimate "try elsewhere" outcome).
    pending_join_replies: HashMap<Endpoint, oneshot::Sender<Option<RpcMessage>>>,
    /// Metadata a joiner attached to its phase-2 request, folded into the
    /// installed `Configuration` if and when this observer's decision
    /// admits that endpoint.
    pending_join_metadata: HashMap<Endpoint, BTreeMap<String, String>>,
    config: ClusterConfig,
}

/// A live membership node. Cheap to clone (it is just a handle to the
/// background protocol-loop task); the real state lives in `Inner`, which
/// only the loop task ever touches.
#[derive(Clone)]
pub struct MembershipService {
    local: Endpoint,
    commands: mpsc::UnboundedSender<Command>,
    transport: Arc<dyn Transport>,
    failure_detector: Arc<dyn LinkFailureDetector>,
    shutting_down: Arc<AtomicBool>,
}

impl MembershipService {
    /// Bootstraps a brand-new single-member configuration (Section 8,
    /// "seed-only start").
    pub async fn start_seed(
        local: Endpoint,
        local_metadata: BTreeMap<String, String>,
        config: ClusterConfig,
        transport: Arc<dyn Transport>,
        failure_detector: Arc<dyn LinkFailureDetector>,
        server_interceptors: Vec<ServerInterceptor>,
    ) -> Self {
        let node_id = NodeId::generate();
        let mut metadata = BTreeMap::new();
        if !local_metadata.is_empty() {
            metadata.insert(local.as_host_port(), local_metadata);
        }
        let configuration = Configuration::new(vec![(local.clone(), node_id)], metadata);
        Self::spawn(local, configuration, config, transport, failure_detector, server_interceptors).await
    }

    /// Installs the configuration handed back by a successful
    /// [`crate::join::join_cluster`] call.
    pub async fn start_joined(
        local: Endpoint,
        outcome: JoinOutcome,
        config: ClusterConfig,
        transport: Arc<dyn Transport>,
        failure_detector: Arc<dyn LinkFailureDetector>,
        server_interceptors: Vec<ServerInterceptor>,
    ) -> Self {
        let members = outcome.members.into_iter().zip(outcome.identifiers).collect();
        let configuration = Configuration::new(members, outcome.metadata);
        Self::spawn(local, configuration, config, transport, failure_detector, server_interceptors).await
    }

    async fn spawn(
        local: Endpoint,
        configuration: Configuration,
        config: ClusterConfig,
        transport: Arc<dyn Transport>,
        failure_detector: Arc<dyn LinkFailureDetector>,
        server_interceptors: Vec<ServerInterceptor>,
    ) -> Self {
        let view = MembershipView::new(config.ring_count, configuration.clone());
        let watermark = WatermarkBuffer::new(config.low_watermark, config.high_watermark, configuration.configuration_id);
        let engine = ConsensusEngine::new(configuration.configuration_id, local.clone(), config.paxos_base_timeout);
        failure_detector.on_membership_change(view.observed_by(&local));

        let inner = Inner {
            local: local.clone(),
            view,
            watermark,
            engine,
            subscribers: Subscribers::new(),
            pending_join_replies: HashMap::new(),
            pending_join_metadata: HashMap::new(),
            config,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let broadcast = BroadcastLayer::new(local.clone(), transport.clone());
        tokio::spawn(run_loop(inner, rx, tx.clone(), broadcast));

        let service = Self {
            local: local.clone(),
            commands: tx,
            transport: transport.clone(),
            failure_detector,
            shutting_down: Arc::new(AtomicBool::new(false)),
        };
        if server_interceptors.is_empty() {
            transport.register(local, Arc::new(service.clone())).await;
        } else {
            let handler = InterceptingHandler::new(Arc::new(service.clone()), server_interceptors);
            transport.register(local, Arc::new(handler)).await;
        }
        info!("membership service started");
        service
    }

    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }

    pub async fn view(&self) -> MembershipView {
        let (tx, rx) = oneshot::channel();
        let _ = self.commands.send(Command::Snapshot { respond: tx });
        rx.await.expect("protocol loop task is alive")
    }

    pub fn subscribe(&self, event: Event, callback: crate::events::Callback) {
        let _ = self.commands.send(Command::Subscribe { event, callback });
    }

    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { respond: tx }).is_ok() {
            let _ = rx.await;
        }
    }

    /// One tick of the failure-detector probe cycle, called by whatever
    /// drives `probe_interval` (the demo binary's background task, or a
    /// test harness). Probing itself does not need to run on the protocol
    /// loop (Section 9: detectors tolerate concurrent probe calls); only
    /// the resulting verdict flip is reported back in through a link update.
    pub async fn run_probe_cycle(&self) {
        let view = self.view().await;
        let observed = view.observed_by(&self.local);
        for target in &observed {
            self.failure_detector.check(target).await;
            if self.failure_detector.has_failed(target) {
                for ring_number in rings_observing(&view, &self.local, target) {
                    let update = LinkUpdate {
                        observer: self.local.clone(),
                        observed: target.clone(),
                        ring_number,
                        status: EdgeStatus::Down,
                        config_id: view.configuration().configuration_id,
                    };
                    let message = RpcMessage::LinkUpdateBatch(BatchedLinkUpdateMessage {
                        sender: self.local.clone(),
                        config_id: view.configuration().configuration_id,
                        updates: vec![update.clone()],
                    });
                    self.transport.broadcast(view.members(), message).await;
                    self.deliver_link_update(update).await;
                }
            }
        }
    }

    async fn deliver_link_update(&self, update: LinkUpdate) {
        let (tx, rx) = oneshot::channel();
        let message = RpcMessage::LinkUpdateBatch(BatchedLinkUpdateMessage {
            sender: update.observer.clone(),
            config_id: update.config_id,
            updates: vec![update],
        });
        let _ = self.commands.send(Command::Rpc { from: self.local.clone(), message, respond: tx });
        let _ = rx.await;
    }
}

/// Which ring numbers `observer` watches `observed` on, in the current view.
fn rings_observing(view: &MembershipView, observer: &Endpoint, observed: &Endpoint) -> Vec<u32> {
    view.observed_by(observer)
        .iter()
        .enumerate()
        .filter(|(_, e)| *e == observed)
        .map(|(ring, _)| ring as u32)
        .collect()
}

#[async_trait]
impl RpcHandler for MembershipService {
    async fn handle(&self, from: Endpoint, message: RpcMessage) -> Option<RpcMessage> {
        // Probes are answered by the failure detector directly, bypassing
        // the protocol loop entirely: a probe reply carries no protocol
        // state and detectors are built to tolerate concurrent calls
        // (Section 9), so there is nothing to gain from serializing it.
        if let RpcMessage::Probe(probe) = message {
            let response = self.failure_detector.handle_probe(probe).await;
            return Some(RpcMessage::ProbeResponse(response));
        }
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Rpc { from, message, respond: tx }).is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }
}

async fn run_loop(
    mut inner: Inner,
    mut commands: mpsc::UnboundedReceiver<Command>,
    self_tx: mpsc::UnboundedSender<Command>,
    broadcast: BroadcastLayer,
) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Rpc { from, message, respond } => {
                handle_rpc(&mut inner, &broadcast, &self_tx, from, message, respond).await;
            }
            Command::FastPathTimeout { config_id } => {
                on_fast_path_timeout(&mut inner, &broadcast, config_id).await;
            }
            Command::ClassicRetry { config_id, round, value } => {
                on_classic_retry(&mut inner, &broadcast, config_id, round, value).await;
            }
            Command::Subscribe { event, callback } => {
                inner.subscribers.subscribe(event, callback);
            }
            Command::Snapshot { respond } => {
                let _ = respond.send(inner.view.clone());
            }
            Command::Shutdown { respond } => {
                let _ = respond.send(());
                break;
            }
        }
    }
}

async fn handle_rpc(
    inner: &mut Inner,
    broadcast: &BroadcastLayer,
    self_tx: &mpsc::UnboundedSender<Command>,
    from: Endpoint,
    message: RpcMessage,
    respond: oneshot::Sender<Option<RpcMessage>>,
) {
    match message {
        RpcMessage::Join(join) if join.ring_numbers.is_none() => {
            let _ = respond.send(Some(handle_join_phase1(inner, join)));
        }
        RpcMessage::Join(join) => {
            handle_join_phase2(inner, broadcast, self_tx, join, respond).await;
        }
        RpcMessage::LinkUpdateBatch(batch) => {
            handle_link_updates(inner, broadcast, self_tx, batch).await;
            let _ = respond.send(None);
        }
        RpcMessage::Consensus(message) => {
            handle_consensus(inner, broadcast, self_tx, message).await;
            let _ = respond.send(None);
        }
        RpcMessage::Probe(_) => {
            // Probe answers don't touch any protocol state and are handled
            // directly off the `RpcHandler::handle` impl before a `Command`
            // is even enqueued; reaching this arm would mean a caller built
            // the `Command::Rpc` by hand rather than going through `handle`.
            let _ = respond.send(Some(RpcMessage::ProbeResponse(ProbeResponse { status: ProbeStatus::Ok })));
        }
        RpcMessage::JoinResponse(_) | RpcMessage::ProbeResponse(_) => {
            warn!(%from, "unexpected reply-shaped message delivered as a request, dropping");
            let _ = respond.send(None);
        }
    }
}

fn handle_join_phase1(inner: &mut Inner, join: JoinMessage) -> RpcMessage {
    let configuration = inner.view.configuration();
    let status_code = if configuration.member_ids.contains(&join.uuid) {
        StatusCode::UuidAlreadyInRing
    } else if configuration.contains(&join.sender) {
        StatusCode::HostnameAlreadyInRing
    } else {
        StatusCode::SafeToJoin
    };

    let hosts = if status_code == StatusCode::SafeToJoin {
        prospective_observer_list(inner, &join.sender, join.uuid)
    } else {
        Vec::new()
    };

    RpcMessage::JoinResponse(JoinResponse {
        sender: inner.local.clone(),
        status_code,
        config_id: configuration.configuration_id,
        hosts,
        identifiers: Vec::new(),
        cluster_metadata: configuration.metadata.clone(),
    })
}

/// Builds the view the joiner would see if it were already a member, purely
/// to compute which existing members would observe it on each ring.
fn prospective_observer_list(inner: &Inner, joiner: &Endpoint, joiner_id: NodeId) -> Vec<Endpoint> {
    let current = inner.view.configuration();
    let mut members: Vec<(Endpoint, NodeId)> =
        current.ordered_members.iter().cloned().zip(current.member_ids.iter().cloned()).collect();
    members.push((joiner.clone(), joiner_id));
    let prospective = Configuration::new(members, current.metadata.clone());
    let view = MembershipView::new(inner.config.ring_count, prospective);
    view.observers_of(joiner)
}

async fn handle_join_phase2(
    inner: &mut Inner,
    broadcast: &BroadcastLayer,
    self_tx: &mpsc::UnboundedSender<Command>,
    join: JoinMessage,
    respond: oneshot::Sender<Option<RpcMessage>>,
) {
    let asked_config_id = join.config_id.unwrap_or(ConfigurationId::NONE);
    let current_config_id = inner.view.configuration().configuration_id;

    // The joiner already has a newer view than the one it asked about
    // (a late retry, or it asked via `HOSTNAME_ALREADY_IN_RING`'s
    // `ConfigurationId::NONE`): answer immediately from the current view
    // instead of waiting on a decision that already happened.
    if current_config_id != asked_config_id && inner.view.configuration().contains(&join.sender) {
        let _ = respond.send(Some(join_response_from_current_view(inner)));
        return;
    }

    if let Some(metadata) = &join.metadata {
        if !metadata.is_empty() {
            inner.pending_join_metadata.insert(join.sender.clone(), metadata.clone());
        }
    }

    let ring_numbers = join.ring_numbers.unwrap_or_default();
    let updates: Vec<LinkUpdate> = ring_numbers
        .into_iter()
        .map(|ring_number| LinkUpdate {
            observer: inner.local.clone(),
            observed: join.sender.clone(),
            ring_number,
            status: EdgeStatus::Up,
            config_id: current_config_id,
        })
        .collect();

    let mut decision_config = None;
    for update in &updates {
        if let Some(proposal) = inner.watermark.report(update, &prospective_members(inner, &join.sender)) {
            decision_config = Some(proposal);
        }
    }
    if !updates.is_empty() {
        inner.subscribers.fire(
            Event::ViewChangeProposal,
            &EventPayload {
                config_id: current_config_id,
                proposal: decision_config.clone(),
                view: None,
                local: inner.local.clone(),
            },
        );
    }

    // Park the reply until a decision admits this joiner: `begin_consensus`
    // may decide synchronously on the fast path, in which case
    // `install_configuration` (called from within it) answers this sender
    // straight away; otherwise it stays parked until a later decision
    // reaches `install_configuration`.
    inner.pending_join_replies.insert(join.sender.clone(), respond);
    if let Some(proposal) = decision_config {
        begin_consensus(inner, broadcast, self_tx, proposal).await;
    }
}

fn join_response_from_current_view(inner: &Inner) -> RpcMessage {
    let configuration = inner.view.configuration();
    RpcMessage::JoinResponse(JoinResponse {
        sender: inner.local.clone(),
        status_code: StatusCode::SafeToJoin,
        config_id: configuration.configuration_id,
        hosts: configuration.ordered_members.clone(),
        identifiers: configuration.member_ids.clone(),
        cluster_metadata: configuration.metadata.clone(),
    })
}

fn prospective_members(inner: &Inner, joiner: &Endpoint) -> Vec<Endpoint> {
    let mut members = inner.view.members().to_vec();
    if !members.contains(joiner) {
        members.push(joiner.clone());
    }
    members
}

async fn handle_link_updates(
    inner: &mut Inner,
    broadcast: &BroadcastLayer,
    self_tx: &mpsc::UnboundedSender<Command>,
    batch: BatchedLinkUpdateMessage,
) {
    let members = inner.view.members().to_vec();
    let mut decision = None;
    for update in &batch.updates {
        if let Some(proposal) = inner.watermark.report(update, &members) {
            decision = Some(proposal);
        }
    }
    if let Some(proposal) = decision {
        inner.subscribers.fire(
            Event::ViewChangeProposal,
            &EventPayload {
                config_id: batch.config_id,
                proposal: Some(proposal.clone()),
                view: None,
                local: inner.local.clone(),
            },
        );
        begin_consensus(inner, broadcast, self_tx, proposal).await;
    }
}

async fn begin_consensus(
    inner: &mut Inner,
    broadcast: &BroadcastLayer,
    self_tx: &mpsc::UnboundedSender<Command>,
    proposal: Proposal,
) {
    let member_count = inner.view.size();
    let step = inner.engine.propose(proposal, member_count);
    for message in step.outbound {
        broadcast.broadcast_consensus(inner.view.members(), message).await;
    }
    if let Some(decision) = step.decision {
        install_configuration(inner, broadcast, decision).await;
        return;
    }

    let config_id = inner.engine.config_id();
    let window = inner.config.fast_path_window;
    let self_tx = self_tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(window).await;
        let _ = self_tx.send(Command::FastPathTimeout { config_id });
    });
}

async fn on_fast_path_timeout(inner: &mut Inner, broadcast: &BroadcastLayer, config_id: ConfigurationId) {
    if inner.engine.config_id() != config_id || inner.engine.has_decided() {
        return;
    }
    let Some(proposal) = inner.engine.fallback_seed_value() else {
        return;
    };
    let round = current_epoch_round();
    let step = inner.engine.start_fallback(round, proposal);
    if step.fast_path_failed {
        inner.subscribers.fire(
            Event::ViewChangeOneStepFailed,
            &EventPayload { config_id, proposal: None, view: None, local: inner.local.clone() },
        );
    }
    for message in step.outbound {
        broadcast.broadcast_consensus(inner.view.members(), message).await;
    }
}

async fn handle_consensus(
    inner: &mut Inner,
    broadcast: &BroadcastLayer,
    self_tx: &mpsc::UnboundedSender<Command>,
    message: ConsensusMessage,
) {
    let member_count = inner.view.size();
    let step = inner.engine.handle(message, member_count);
    for message in step.outbound {
        broadcast.broadcast_consensus(inner.view.members(), message).await;
    }
    if let Some(decision) = step.decision {
        install_configuration(inner, broadcast, decision).await;
        return;
    }
    if let Some(retry) = step.retry {
        let config_id = inner.engine.config_id();
        let self_tx = self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(retry.after).await;
            let round = current_epoch_round();
            let _ = self_tx.send(Command::ClassicRetry { config_id, round, value: retry.value });
        });
    }
}

/// Fires once a nacked classic-Paxos round's jittered backoff elapses:
/// restarts the round with a fresh round number, re-broadcasting Prepare.
/// Dropped if a decision was already reached or the configuration has since
/// moved on (the retry was scheduled against a `config_id` the engine no
/// longer owns).
async fn on_classic_retry(inner: &mut Inner, broadcast: &BroadcastLayer, config_id: ConfigurationId, round: u64, value: Proposal) {
    if inner.engine.config_id() != config_id || inner.engine.has_decided() {
        return;
    }
    let step = inner.engine.retry_fallback(round, value);
    for message in step.outbound {
        broadcast.broadcast_consensus(inner.view.members(), message).await;
    }
}

async fn install_configuration(inner: &mut Inner, _broadcast: &BroadcastLayer, decision: Proposal) {
    let current = inner.view.configuration().clone();
    let mut members: Vec<(Endpoint, NodeId)> =
        current.ordered_members.iter().cloned().zip(current.member_ids.iter().cloned()).collect();

    for endpoint in &decision.endpoints {
        if current.contains(endpoint) {
            members.retain(|(e, _)| e != endpoint);
        } else {
            // Every member independently derives the same id for a newly
            // admitted endpoint from the configuration being left behind, so
            // that all of them compute an identical `Configuration` (and
            // therefore `configurationId`) from the decided proposal alone —
            // see `derive_member_id`.
            let node_id = derive_member_id(endpoint, current.configuration_id);
            members.push((endpoint.clone(), node_id));
        }
    }

    let mut metadata = current.metadata.clone();
    for endpoint in &decision.endpoints {
        if let Some(entry) = inner.pending_join_metadata.remove(endpoint) {
            metadata.insert(endpoint.as_host_port(), entry);
        }
    }
    let new_configuration = Configuration::new(members, metadata);
    let new_view = MembershipView::new(inner.config.ring_count, new_configuration.clone());
    let was_member = current.contains(&inner.local);
    let still_member = new_configuration.contains(&inner.local);

    info!(config_id = %new_configuration.configuration_id, size = new_configuration.size(), "installing new configuration");

    inner.view = new_view.clone();
    inner.watermark = WatermarkBuffer::new(inner.config.low_watermark, inner.config.high_watermark, new_configuration.configuration_id);
    inner.engine =
        ConsensusEngine::new(new_configuration.configuration_id, inner.local.clone(), inner.config.paxos_base_timeout);

    for endpoint in &decision.endpoints {
        if !new_configuration.contains(endpoint) {
            continue;
        }
        if let Some(respond) = inner.pending_join_replies.remove(endpoint) {
            let response = RpcMessage::JoinResponse(JoinResponse {
                sender: inner.local.clone(),
                status_code: StatusCode::SafeToJoin,
                config_id: new_configuration.configuration_id,
                hosts: new_configuration.ordered_members.clone(),
                identifiers: new_configuration.member_ids.clone(),
                cluster_metadata: new_configuration.metadata.clone(),
            });
            let _ = respond.send(Some(response));
        }
    }

    inner.subscribers.fire(
        Event::ViewChange,
        &EventPayload {
            config_id: new_configuration.configuration_id,
            proposal: Some(decision),
            view: Some(new_view.clone()),
            local: inner.local.clone(),
        },
    );

    if was_member && !still_member {
        inner.subscribers.fire(
            Event::Kicked,
            &EventPayload {
                config_id: new_configuration.configuration_id,
                proposal: None,
                view: Some(new_view),
                local: inner.local.clone(),
            },
        );
    }
}

fn current_epoch_round() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
