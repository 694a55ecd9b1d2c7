//! Podpool: least-loaded allocation over a fixed set of pods.
//!
//! ```text
//!   Allocate ──► free set non-empty? ──yes──► pop (load, pid) ─► borrowed ─► pod
//!                        │
//!                        no ──► sleep retry_interval ─► Allocate (to self)
//!
//!   Release  ──► borrowed ─► free set (load from the pod's report) ─► forward outcome
//! ```
//!
//! A pod is either in the free set or borrowed, never both. Borrowing takes
//! the pod out of the free set until the pod reports back, so a second
//! request cannot pick it on a load figure that is about to change.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::address::{PodId, PodRef};
use crate::mailbox::{Actor, ActorRef, Handled};
use crate::messages::{
    BranchPayload, CreationRequest, DispatcherMsg, PodMsg, PodOutcome, PodReport, PodpoolMsg,
    PoolStats,
};

pub struct Podpool {
    pods: Vec<PodRef>,
    /// Allocation order: (load, pid)
    free: BTreeSet<(usize, PodId)>,
    borrowed: HashSet<PodId>,
    /// Last load reported by each pod
    loads: Vec<usize>,
    dispatcher: ActorRef<DispatcherMsg>,
    /// This pool's own mailbox, for re-submitting deferred requests
    own: ActorRef<PodpoolMsg>,
    retry_interval: Duration,
    /// Set once saturation has been logged; cleared when a pod frees up
    overflow_reported: bool,
    overflow_warnings: u64,
    forwarded: u64,
    released: u64,
    retries: u64,
}

impl std::fmt::Debug for Podpool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Podpool")
            .field("size", &self.pods.len())
            .field("free", &self.free.len())
            .field("borrowed", &self.borrowed.len())
            .finish()
    }
}

impl Podpool {
    /// Pods must be indexed by pid: `pods[i].pid() == i`.
    pub fn new(
        pods: Vec<PodRef>,
        dispatcher: ActorRef<DispatcherMsg>,
        own: ActorRef<PodpoolMsg>,
        retry_interval: Duration,
    ) -> Self {
        let free = pods.iter().map(|pod| (0, pod.pid())).collect();
        let loads = vec![0; pods.len()];
        Self {
            pods,
            free,
            borrowed: HashSet::new(),
            loads,
            dispatcher,
            own,
            retry_interval,
            overflow_reported: false,
            overflow_warnings: 0,
            forwarded: 0,
            released: 0,
            retries: 0,
        }
    }

    fn allocate(&mut self, mut request: CreationRequest) {
        loop {
            let Some((load, pid)) = self.free.pop_first() else {
                self.defer(request);
                return;
            };
            let Some(pod) = self.pods.get(pid) else {
                warn!(pid = pid, "free set names an unknown pod, dropped from it");
                continue;
            };

            match pod.mailbox().send_or_return(PodMsg::Create(request)) {
                Ok(()) => {
                    self.overflow_reported = false;
                    self.borrowed.insert(pid);
                    self.forwarded += 1;
                    trace!(pid = pid, load = load, "pod borrowed");
                    return;
                }
                // The pod is gone and never comes back to the free set; the
                // request goes to the next pod in line.
                Err(PodMsg::Create(returned)) => {
                    warn!(pid = pid, "pod mailbox closed, request handed to another pod");
                    request = returned;
                }
                Err(other) => {
                    warn!(pid = pid, msg = ?other, "closed pod returned a foreign message");
                    return;
                }
            }
        }
    }

    /// Every pod is borrowed: re-submit the request to ourselves later.
    fn defer(&mut self, request: CreationRequest) {
        self.retries += 1;
        if !self.overflow_reported {
            warn!(
                size = self.pods.len(),
                retry_interval = ?self.retry_interval,
                "all pods borrowed, deferring creation requests"
            );
            self.overflow_reported = true;
            self.overflow_warnings += 1;
        } else {
            trace!(retries = self.retries, "creation request deferred again");
        }

        let own = self.own.clone();
        let wait = self.retry_interval;
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            if own.send(PodpoolMsg::Allocate(request)).is_err() {
                debug!("podpool stopped, deferred creation request dropped");
            }
        });
    }

    fn release(&mut self, report: PodReport) {
        if !self.borrowed.remove(&report.pid) {
            warn!(pid = report.pid, "release for a pod that is not borrowed, ignored");
            return;
        }
        self.released += 1;
        if let Some(load) = self.loads.get_mut(report.pid) {
            *load = report.load;
        }
        self.free.insert((report.load, report.pid));
        self.overflow_reported = false;
        trace!(pid = report.pid, load = report.load, "pod released");

        match report.outcome {
            PodOutcome::Circle(created) => {
                if let Err(err) = self
                    .dispatcher
                    .send_priority(DispatcherMsg::CircleCreated(created))
                {
                    warn!(error = %err, "circle completion not delivered");
                }
            }
            PodOutcome::Child(created) => {
                let parent = created.parent.clone();
                if let Err(err) = parent.send(BranchPayload::ChildCreated {
                    child: created.child,
                }) {
                    debug!(parent = %parent, error = %err, "child completion not delivered");
                }
            }
            PodOutcome::Failed {
                requester: Some(requester),
                reason,
            } => {
                warn!(pid = report.pid, reason = %reason, "circle creation failed");
                if let Err(err) = self
                    .dispatcher
                    .send_priority(DispatcherMsg::CircleFailed { requester, reason })
                {
                    warn!(error = %err, "circle failure not delivered");
                }
            }
            PodOutcome::Failed {
                requester: None,
                reason,
            } => {
                warn!(pid = report.pid, reason = %reason, "child creation failed");
            }
        }
    }

    /// Re-key a free pod. A borrowed pod's load arrives with its release.
    fn load_changed(&mut self, pid: PodId, load: usize) {
        if self.borrowed.contains(&pid) {
            return;
        }
        let Some(known) = self.loads.get_mut(pid) else {
            warn!(pid = pid, "load update from unknown pod");
            return;
        };
        if self.free.remove(&(*known, pid)) {
            self.free.insert((load, pid));
        }
        *known = load;
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.pods.len(),
            free: self.free.iter().copied().collect(),
            borrowed: self.borrowed.len(),
            forwarded: self.forwarded,
            released: self.released,
            retries: self.retries,
            overflow_warnings: self.overflow_warnings,
        }
    }

    fn teardown(&self) {
        for pod in &self.pods {
            if let Err(err) = pod.send(PodMsg::Teardown) {
                debug!(pod = %pod, error = %err, "teardown not delivered");
            }
        }
        info!(
            pods = self.pods.len(),
            forwarded = self.forwarded,
            released = self.released,
            retries = self.retries,
            "podpool torn down"
        );
    }
}

impl Actor for Podpool {
    type Msg = PodpoolMsg;

    fn name(&self) -> &str {
        "podpool"
    }

    fn handle(&mut self, msg: PodpoolMsg) -> Handled {
        match msg {
            PodpoolMsg::Allocate(request) => self.allocate(request),
            PodpoolMsg::Release(report) => self.release(report),
            PodpoolMsg::LoadChanged { pid, load } => self.load_changed(pid, load),
            PodpoolMsg::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
            PodpoolMsg::Teardown => {
                self.teardown();
                return Handled::Stop;
            }
        }
        Handled::Consumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Brid;
    use crate::mailbox::{mailbox, spawn_actor, Mailbox, Received};
    use crate::messages::{
        ChildCreated, CircleCreated, CreateChildRequest, CreateCircleRequest, RequesterMsg,
    };
    use tokio::sync::oneshot;

    struct Rig {
        pool: ActorRef<PodpoolMsg>,
        pods: Vec<(PodRef, Mailbox<PodMsg>)>,
        dispatcher_rx: Mailbox<DispatcherMsg>,
        requester: ActorRef<RequesterMsg>,
        _requester_rx: Mailbox<RequesterMsg>,
    }

    fn start(size: usize, retry: Duration) -> Rig {
        let (pool, pool_rx) = mailbox("podpool");
        let (dispatcher, dispatcher_rx) = mailbox("dispatcher");
        let mut pods = Vec::new();
        for pid in 0..size {
            let (tx, rx) = mailbox(format!("pod_{pid}"));
            pods.push((PodRef::new(pid, tx), rx));
        }
        let refs = pods.iter().map(|(pod, _)| pod.clone()).collect();
        spawn_actor(Podpool::new(refs, dispatcher, pool.clone(), retry), pool_rx);

        let (requester, _requester_rx) = mailbox("user");
        Rig {
            pool,
            pods,
            dispatcher_rx,
            requester,
            _requester_rx,
        }
    }

    impl Rig {
        fn request_circle(&self) {
            let request = CreateCircleRequest {
                requester: self.requester.clone(),
            };
            self.pool.send(PodpoolMsg::Allocate(request.into())).unwrap();
        }

        fn release_circle(&self, pid: PodId, load: usize) {
            let pod = self
                .pods
                .iter()
                .map(|(pod, _)| pod)
                .find(|pod| pod.pid() == pid)
                .unwrap();
            let circle = Brid::new(pod.clone(), 1);
            self.pool
                .send_priority(PodpoolMsg::Release(PodReport {
                    pid,
                    load,
                    outcome: PodOutcome::Circle(CircleCreated {
                        requester: self.requester.clone(),
                        circle,
                    }),
                }))
                .unwrap();
        }

        async fn stats(&self) -> PoolStats {
            let (tx, rx) = oneshot::channel();
            self.pool.send(PodpoolMsg::Stats(tx)).unwrap();
            rx.await.unwrap()
        }
    }

    async fn expect_create(rx: &mut Mailbox<PodMsg>, within: Duration) -> CreationRequest {
        match tokio::time::timeout(within, rx.recv(None)).await {
            Ok(Received::Message(PodMsg::Create(request))) => request,
            Ok(other) => panic!("unexpected {:?}", other),
            Err(_) => panic!("no creation request within {:?}", within),
        }
    }

    #[tokio::test]
    async fn test_least_loaded_first_with_pid_tiebreak() {
        let mut rig = start(3, Duration::from_millis(1));
        rig.request_circle();
        expect_create(&mut rig.pods[0].1, Duration::from_secs(1)).await;

        rig.release_circle(0, 1);
        rig.request_circle();
        expect_create(&mut rig.pods[1].1, Duration::from_secs(1)).await;

        let stats = rig.stats().await;
        assert_eq!(stats.free, vec![(0, 2), (1, 0)]);
        assert_eq!(stats.borrowed, 1);
    }

    #[tokio::test]
    async fn test_borrowed_equals_forwarded_minus_released() {
        let mut rig = start(2, Duration::from_millis(1));
        rig.request_circle();
        rig.request_circle();
        expect_create(&mut rig.pods[0].1, Duration::from_secs(1)).await;
        expect_create(&mut rig.pods[1].1, Duration::from_secs(1)).await;

        let stats = rig.stats().await;
        assert_eq!(stats.borrowed as u64, stats.forwarded - stats.released);
        assert!(stats.borrowed <= stats.size);

        rig.release_circle(1, 1);
        let stats = rig.stats().await;
        assert_eq!(stats.borrowed, 1);
        assert_eq!(stats.borrowed as u64, stats.forwarded - stats.released);
    }

    #[tokio::test]
    async fn test_saturation_retries_until_release() {
        let mut rig = start(2, Duration::from_millis(5));
        for _ in 0..3 {
            rig.request_circle();
        }
        expect_create(&mut rig.pods[0].1, Duration::from_secs(1)).await;
        expect_create(&mut rig.pods[1].1, Duration::from_secs(1)).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        let stats = rig.stats().await;
        assert_eq!(stats.forwarded, 2);
        assert!(stats.retries >= 1);

        rig.release_circle(0, 1);
        match tokio::time::timeout(Duration::from_secs(1), rig.dispatcher_rx.recv(None)).await {
            Ok(Received::Message(DispatcherMsg::CircleCreated(created))) => {
                assert_eq!(created.circle.pod.pid(), 0)
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
        expect_create(&mut rig.pods[0].1, Duration::from_millis(100)).await;
        assert_eq!(rig.stats().await.forwarded, 3);
    }

    #[tokio::test]
    async fn test_saturation_warned_once_per_stretch() {
        let mut rig = start(1, Duration::from_millis(5));
        rig.request_circle();
        rig.request_circle();
        expect_create(&mut rig.pods[0].1, Duration::from_secs(1)).await;

        tokio::time::sleep(Duration::from_millis(40)).await;
        let stats = rig.stats().await;
        assert!(stats.retries >= 2, "retries: {}", stats.retries);
        assert_eq!(stats.overflow_warnings, 1);

        // The release clears the flag and the waiting request gets the pod.
        rig.release_circle(0, 1);
        expect_create(&mut rig.pods[0].1, Duration::from_secs(1)).await;

        // Saturated again: a new stretch, a new warning.
        rig.request_circle();
        let stats = rig.stats().await;
        assert_eq!(stats.overflow_warnings, 2);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(rig.stats().await.overflow_warnings, 2);
    }

    #[tokio::test]
    async fn test_closed_pod_hands_request_to_next() {
        let mut rig = start(2, Duration::from_millis(5));
        let (_, closed) = rig.pods.remove(0);
        drop(closed);

        rig.request_circle();
        // rig.pods[0] is now pod 1.
        expect_create(&mut rig.pods[0].1, Duration::from_secs(1)).await;

        let stats = rig.stats().await;
        assert_eq!(stats.forwarded, 1);
        assert_eq!(stats.borrowed, 1);
        assert!(stats.free.is_empty());

        // With the only live pod borrowed, the next request waits instead of
        // being lost.
        rig.request_circle();
        rig.release_circle(1, 1);
        expect_create(&mut rig.pods[0].1, Duration::from_secs(1)).await;
        assert_eq!(rig.stats().await.forwarded, 2);
    }

    #[tokio::test]
    async fn test_double_release_is_ignored() {
        let mut rig = start(1, Duration::from_millis(1));
        rig.request_circle();
        expect_create(&mut rig.pods[0].1, Duration::from_secs(1)).await;

        rig.release_circle(0, 1);
        rig.release_circle(0, 1);
        let stats = rig.stats().await;
        assert_eq!(stats.released, 1);
        assert_eq!(stats.free, vec![(1, 0)]);
    }

    #[tokio::test]
    async fn test_child_completion_goes_to_parent() {
        let mut rig = start(1, Duration::from_millis(1));
        let (parent_pod, mut parent_rx) = mailbox::<PodMsg>("pod_parent");
        let parent = Brid::new(PodRef::new(7, parent_pod), 99);
        rig.pool
            .send(PodpoolMsg::Allocate(
                CreateChildRequest {
                    breed: 1,
                    inputs: Vec::new(),
                    parent: parent.clone(),
                }
                .into(),
            ))
            .unwrap();
        expect_create(&mut rig.pods[0].1, Duration::from_secs(1)).await;

        let child = Brid::new(rig.pods[0].0.clone(), 5);
        rig.pool
            .send_priority(PodpoolMsg::Release(PodReport {
                pid: 0,
                load: 1,
                outcome: PodOutcome::Child(ChildCreated {
                    parent,
                    child: child.clone(),
                }),
            }))
            .unwrap();

        match tokio::time::timeout(Duration::from_secs(1), parent_rx.recv(None)).await {
            Ok(Received::Message(PodMsg::Branch(ibr))) => {
                assert_eq!(ibr.dest, 99);
                match ibr.payload {
                    BranchPayload::ChildCreated { child: got } => assert_eq!(got, child),
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_load_change_rekeys_free_pod() {
        let rig = start(2, Duration::from_millis(1));
        rig.pool
            .send(PodpoolMsg::LoadChanged { pid: 0, load: 4 })
            .unwrap();
        assert_eq!(rig.stats().await.free, vec![(0, 1), (4, 0)]);
    }

    #[tokio::test]
    async fn test_teardown_reaches_every_pod() {
        let mut rig = start(2, Duration::from_millis(1));
        rig.request_circle();
        expect_create(&mut rig.pods[0].1, Duration::from_secs(1)).await;

        rig.pool.send(PodpoolMsg::Teardown).unwrap();
        for (_, rx) in rig.pods.iter_mut() {
            match tokio::time::timeout(Duration::from_secs(1), rx.recv(None)).await {
                Ok(Received::Message(PodMsg::Teardown)) => {}
                other => panic!("unexpected {:?}", other.map(|_| ())),
            }
        }
    }
}
