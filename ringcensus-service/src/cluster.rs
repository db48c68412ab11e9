//! `Cluster` (Section 6): the public, embedding-application-facing surface.
//! Everything below this module is an implementation detail `Cluster`
//! assembles and owns: the protocol loop (`MembershipService`), the join
//! driver, and whichever `Transport`/`LinkFailureDetector` the caller plugged
//! in or left at their defaults.

use crate::events::{Callback, Event};
use crate::failure_detector::{default_factory, LinkFailureDetectorFactory};
use crate::join::join_cluster;
use crate::service::MembershipService;
use ringcensus_core::{ClusterConfig, Endpoint, NodeId, Result};
use ringcensus_net::{ClientInterceptor, InterceptingTransport, LocalTransport, ServerInterceptor, Transport};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Builder options recognized by `Cluster::start` / `Cluster::join`
/// (Section 6). Protocol tuning (ring count, watermarks, timeouts, retry
/// bound) lives on the separately-constructed `ClusterConfig`; this struct
/// holds only the options that are specific to one node's wiring.
#[derive(Clone, Default)]
pub struct ClusterOptions {
    pub metadata: BTreeMap<String, String>,
    pub link_failure_detector_factory: Option<LinkFailureDetectorFactory>,
    pub server_interceptors: Vec<ServerInterceptor>,
    pub client_interceptors: Vec<ClientInterceptor>,
    /// Transport to register this node's endpoint on. Defaults to a fresh
    /// `LocalTransport` (Section 10.5); production embedders and
    /// multi-node tests share one instance across the nodes they wire
    /// together.
    pub transport: Option<Arc<dyn Transport>>,
}

impl ClusterOptions {
    pub fn builder() -> ClusterOptionsBuilder {
        ClusterOptionsBuilder::default()
    }
}

#[derive(Clone, Default)]
pub struct ClusterOptionsBuilder {
    options: ClusterOptions,
}

impl ClusterOptionsBuilder {
    pub fn metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.options.metadata = metadata;
        self
    }

    pub fn link_failure_detector_factory(mut self, factory: LinkFailureDetectorFactory) -> Self {
        self.options.link_failure_detector_factory = Some(factory);
        self
    }

    pub fn server_interceptor(mut self, interceptor: ServerInterceptor) -> Self {
        self.options.server_interceptors.push(interceptor);
        self
    }

    pub fn client_interceptor(mut self, interceptor: ClientInterceptor) -> Self {
        self.options.client_interceptors.push(interceptor);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.options.transport = Some(transport);
        self
    }

    pub fn build(self) -> ClusterOptions {
        self.options
    }
}

/// A live membership node, and the handle an embedding application holds for
/// its lifetime.
pub struct Cluster {
    service: MembershipService,
    probe_task: JoinHandle<()>,
}

impl Cluster {
    /// Bootstraps a brand-new single-member configuration.
    pub async fn start(listen_address: Endpoint, config: ClusterConfig, options: ClusterOptions) -> Result<Self> {
        config.validate()?;
        let (transport, failure_detector) = wire(listen_address.clone(), &config, &options);
        let service = MembershipService::start_seed(
            listen_address,
            options.metadata.clone(),
            config.clone(),
            transport,
            failure_detector,
            options.server_interceptors.clone(),
        )
        .await;
        Ok(Self::running(service, config))
    }

    /// Joins an existing cluster through `seed_address`.
    pub async fn join(
        listen_address: Endpoint,
        seed_address: Endpoint,
        config: ClusterConfig,
        options: ClusterOptions,
    ) -> Result<Self> {
        config.validate()?;
        let (transport, failure_detector) = wire(listen_address.clone(), &config, &options);
        let outcome = join_cluster(
            listen_address.clone(),
            NodeId::generate(),
            seed_address,
            transport.clone(),
            options.metadata.clone(),
            &config,
        )
        .await?;
        let service = MembershipService::start_joined(
            listen_address,
            outcome,
            config.clone(),
            transport,
            failure_detector,
            options.server_interceptors.clone(),
        )
        .await;
        Ok(Self::running(service, config))
    }

    fn running(service: MembershipService, config: ClusterConfig) -> Self {
        let probe_service = service.clone();
        let probe_interval = config.probe_interval;
        let probe_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(probe_interval);
            loop {
                ticker.tick().await;
                probe_service.run_probe_cycle().await;
            }
        });
        info!(local = %service.local_endpoint(), "cluster node running");
        Self { service, probe_task }
    }

    pub async fn member_list(&self) -> Vec<Endpoint> {
        self.service.view().await.members().to_vec()
    }

    pub async fn membership_size(&self) -> usize {
        self.service.view().await.size()
    }

    pub async fn metadata(&self) -> BTreeMap<Endpoint, BTreeMap<String, String>> {
        let view = self.service.view().await;
        let configuration = view.configuration();
        configuration
            .ordered_members
            .iter()
            .map(|endpoint| {
                let entry = configuration.metadata.get(&endpoint.as_host_port()).cloned().unwrap_or_default();
                (endpoint.clone(), entry)
            })
            .collect()
    }

    pub fn subscribe(&self, event: Event, callback: Callback) {
        self.service.subscribe(event, callback);
    }

    pub async fn shutdown(self) {
        self.probe_task.abort();
        self.service.shutdown().await;
    }
}

fn wire(
    local: Endpoint,
    config: &ClusterConfig,
    options: &ClusterOptions,
) -> (Arc<dyn Transport>, Arc<dyn crate::failure_detector::LinkFailureDetector>) {
    let base_transport = options.transport.clone().unwrap_or_else(|| Arc::new(LocalTransport::new()));
    let transport: Arc<dyn Transport> = if options.client_interceptors.is_empty() {
        base_transport
    } else {
        Arc::new(InterceptingTransport::new(base_transport, options.client_interceptors.clone()))
    };

    let factory = options.link_failure_detector_factory.clone().unwrap_or_else(default_factory);
    let failure_detector = factory(local, transport.clone(), config.failure_threshold, config.probe_timeout);
    (transport, failure_detector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringcensus_net::LocalTransport;

    #[tokio::test]
    async fn seed_only_start_reports_single_member() {
        let transport: Arc<dyn Transport> = Arc::new(LocalTransport::new());
        let options = ClusterOptions::builder().transport(transport).build();
        let cluster = Cluster::start(Endpoint::new("127.0.0.1", 1000), ClusterConfig::default(), options)
            .await
            .unwrap();
        assert_eq!(cluster.member_list().await, vec![Endpoint::new("127.0.0.1", 1000)]);
        assert_eq!(cluster.membership_size().await, 1);
        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn single_join_converges_both_sides_on_two_members() {
        let transport: Arc<dyn Transport> = Arc::new(LocalTransport::new());
        let seed_addr = Endpoint::new("127.0.0.1", 1000);
        let joiner_addr = Endpoint::new("127.0.0.1", 1001);

        let seed = Cluster::start(
            seed_addr.clone(),
            ClusterConfig::default(),
            ClusterOptions::builder().transport(transport.clone()).build(),
        )
        .await
        .unwrap();

        let joiner = Cluster::join(
            joiner_addr.clone(),
            seed_addr.clone(),
            ClusterConfig::default(),
            ClusterOptions::builder().transport(transport).build(),
        )
        .await
        .unwrap();

        let mut expected = vec![seed_addr, joiner_addr];
        expected.sort();
        assert_eq!(joiner.member_list().await, expected);

        // Give the fast-path broadcast to the seed a moment to land.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(seed.member_list().await, expected);

        seed.shutdown().await;
        joiner.shutdown().await;
    }
}
