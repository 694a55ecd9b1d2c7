//! The attention kernel: dispatcher, podpool and pods wired together.
//!
//! ## Usage
//!
//! ```ignore
//! use attention_kernel::{mailbox, AttentionKernelBuilder, KernelConfig, RequesterMsg};
//!
//! let registry = Arc::new(build_registry()?);
//! let kernel = AttentionKernelBuilder::new(KernelConfig::default(), registry).spawn()?;
//!
//! // The requester is any mailbox; circle addresses arrive on it.
//! let (requester, mut inbox) = mailbox::<RequesterMsg>("console");
//! kernel.create_circle(requester)?;
//!
//! // Tear everything down and wait for every actor to stop.
//! kernel.shutdown().await?;
//! ```

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::actors::{Dispatcher, Pod, Podpool};
use crate::address::{PodId, PodRef, RequesterRef};
use crate::branch::BranchContext;
use crate::config::KernelConfig;
use crate::error::{KernelError, MailboxClosed};
use crate::mailbox::{mailbox, spawn_actor, ActorRef};
use crate::messages::{
    CreateCircleRequest, DispatcherMsg, PodMsg, PodStats, PodpoolMsg, PoolStats,
};
use crate::registry::ConceptRegistry;

/// Builder for a running kernel.
pub struct AttentionKernelBuilder {
    config: KernelConfig,
    registry: Arc<ConceptRegistry>,
}

impl AttentionKernelBuilder {
    pub fn new(config: KernelConfig, registry: Arc<ConceptRegistry>) -> Self {
        Self { config, registry }
    }

    /// Override the pool size from the configuration.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.config.pool.size = size;
        self
    }

    /// Spawn every actor on the current Tokio runtime.
    ///
    /// All mailboxes are created before any actor starts, so every actor is
    /// constructed with the addresses it needs.
    pub fn spawn(self) -> Result<AttentionKernel, KernelError> {
        let size = self.config.pool.size;
        if size == 0 {
            return Err(KernelError::Config("pool size must be at least 1".into()));
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(KernelError::Config(
                "the kernel must be spawned inside a Tokio runtime".into(),
            ));
        }

        let (dispatcher, dispatcher_box) = mailbox::<DispatcherMsg>("dispatcher");
        let (podpool, podpool_box) = mailbox::<PodpoolMsg>("podpool");

        let mut pods = Vec::with_capacity(size);
        let mut pod_boxes = Vec::with_capacity(size);
        for pid in 0..size {
            let (tx, rx) = mailbox::<PodMsg>(format!("pod_{pid}"));
            pods.push(PodRef::new(pid, tx));
            pod_boxes.push(rx);
        }

        let ctx = BranchContext {
            registry: self.registry,
            podpool: podpool.clone(),
        };

        let mut tasks = Vec::with_capacity(size + 2);
        for (pod, pod_box) in pods.iter().zip(pod_boxes) {
            let actor = Pod::new(pod.clone(), ctx.clone(), self.config.pod.clone());
            tasks.push(spawn_actor(actor, pod_box));
        }
        tasks.push(spawn_actor(
            Podpool::new(
                pods.clone(),
                dispatcher.clone(),
                podpool.clone(),
                self.config.pool.retry_interval(),
            ),
            podpool_box,
        ));
        tasks.push(spawn_actor(Dispatcher::new(podpool.clone()), dispatcher_box));

        info!(
            pods = size,
            idle_policy = ?self.config.pod.idle_policy,
            failure_policy = ?self.config.pod.failure_policy,
            "attention kernel started"
        );

        Ok(AttentionKernel {
            dispatcher,
            podpool,
            pods,
            tasks,
        })
    }
}

/// Handle to a running kernel.
pub struct AttentionKernel {
    dispatcher: ActorRef<DispatcherMsg>,
    podpool: ActorRef<PodpoolMsg>,
    pods: Vec<PodRef>,
    tasks: Vec<JoinHandle<()>>,
}

impl AttentionKernel {
    /// Ask for a new circle. Its address arrives on `requester` as
    /// [`RequesterMsg::CircleCreated`](crate::messages::RequesterMsg::CircleCreated).
    pub fn create_circle(&self, requester: RequesterRef) -> Result<(), KernelError> {
        self.dispatcher
            .send(DispatcherMsg::CreateCircle(CreateCircleRequest { requester }))?;
        Ok(())
    }

    /// Broadcast teardown through the dispatcher.
    pub fn terminate(&self) -> Result<(), KernelError> {
        self.dispatcher.send(DispatcherMsg::Teardown)?;
        Ok(())
    }

    pub fn pods(&self) -> &[PodRef] {
        &self.pods
    }

    pub fn dispatcher(&self) -> &ActorRef<DispatcherMsg> {
        &self.dispatcher
    }

    pub async fn pool_stats(&self) -> Result<PoolStats, KernelError> {
        let (tx, rx) = oneshot::channel();
        self.podpool.send(PodpoolMsg::Stats(tx))?;
        rx.await
            .map_err(|_| MailboxClosed(self.podpool.name().to_string()).into())
    }

    pub async fn pod_stats(&self, pid: PodId) -> Result<PodStats, KernelError> {
        let pod = self.pods.get(pid).ok_or(KernelError::UnknownPod(pid))?;
        let (tx, rx) = oneshot::channel();
        pod.send(PodMsg::Inspect(tx))?;
        rx.await
            .map_err(|_| MailboxClosed(pod.mailbox().name().to_string()).into())
    }

    /// Terminate and wait for every actor to stop.
    pub async fn shutdown(self) -> Result<(), KernelError> {
        self.terminate()?;
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "actor task ended abnormally");
            }
        }
        info!("attention kernel stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::branch::Branch;
    use crate::concept::{ConceptId, Effect, FixedEffect, MIN_DYNAMIC_CID};
    use crate::mailbox::{mailbox, Received};
    use crate::messages::RequesterMsg;

    fn registry() -> Arc<ConceptRegistry> {
        Arc::new(
            ConceptRegistry::builder()
                .breed(MIN_DYNAMIC_CID, "circle", MIN_DYNAMIC_CID + 1, vec![])
                .neuron(
                    MIN_DYNAMIC_CID + 1,
                    "seed",
                    FixedEffect(Effect::yield_after(vec![])),
                )
                .requester_premise(MIN_DYNAMIC_CID + 2, "user")
                .circle(MIN_DYNAMIC_CID, MIN_DYNAMIC_CID + 2)
                .build()
                .unwrap(),
        )
    }

    /// Circle whose seed neuron panics on every evaluation.
    fn panicking_registry() -> Arc<ConceptRegistry> {
        Arc::new(
            ConceptRegistry::builder()
                .breed(MIN_DYNAMIC_CID, "circle", MIN_DYNAMIC_CID + 1, vec![])
                .neuron(
                    MIN_DYNAMIC_CID + 1,
                    "seed",
                    |_: &mut Branch, stem: ConceptId| -> Effect {
                        panic!("neuron {stem} cannot decide")
                    },
                )
                .requester_premise(MIN_DYNAMIC_CID + 2, "user")
                .circle(MIN_DYNAMIC_CID, MIN_DYNAMIC_CID + 2)
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_zero_pods_rejected() {
        let err = AttentionKernelBuilder::new(KernelConfig::default(), registry())
            .pool_size(0)
            .spawn()
            .err()
            .unwrap();
        assert!(matches!(err, KernelError::Config(_)));
    }

    #[test]
    fn test_spawn_outside_runtime_rejected() {
        let err = AttentionKernelBuilder::new(KernelConfig::default(), registry())
            .spawn()
            .err()
            .unwrap();
        assert!(matches!(err, KernelError::Config(_)));
    }

    #[tokio::test]
    async fn test_stats_and_shutdown() {
        let kernel = AttentionKernelBuilder::new(KernelConfig::default(), registry())
            .pool_size(3)
            .spawn()
            .unwrap();

        let stats = kernel.pool_stats().await.unwrap();
        assert_eq!(stats.size, 3);
        assert_eq!(stats.free, vec![(0, 0), (0, 1), (0, 2)]);
        assert_eq!(kernel.pod_stats(2).await.unwrap().pid, 2);
        assert!(matches!(
            kernel.pod_stats(3).await,
            Err(KernelError::UnknownPod(3))
        ));

        kernel.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_neuron_does_not_stall_the_pool() {
        let kernel = AttentionKernelBuilder::new(KernelConfig::default(), panicking_registry())
            .pool_size(1)
            .spawn()
            .unwrap();
        let (requester, mut inbox) = mailbox::<RequesterMsg>("user");
        kernel.create_circle(requester.clone()).unwrap();
        kernel.create_circle(requester).unwrap();

        for _ in 0..2 {
            match tokio::time::timeout(Duration::from_secs(2), inbox.recv(None)).await {
                Ok(Received::Message(RequesterMsg::CircleCreated { .. })) => {}
                other => panic!("unexpected {:?}", other.map(|_| ())),
            }
        }

        let stats = kernel.pool_stats().await.unwrap();
        assert_eq!(stats.released, 2);
        assert_eq!(stats.borrowed, 0);
        assert_eq!(kernel.pod_stats(0).await.unwrap().load, 2);

        kernel.shutdown().await.unwrap();
    }
}
