//! Pod: worker actor hosting branches.
//!
//! A pod owns its branches outright. Nothing outside the pod ever holds a
//! reference into them; other actors reach a branch only by sending an
//! [`InterBranchMessage`] to the pod with the branch id.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, trace, warn};

use crate::address::{Brid, BranchId, PodId, PodRef};
use crate::branch::{Branch, BranchContext, BranchSeed, Delivered};
use crate::config::{FailurePolicy, IdlePolicy, PodConfig};
use crate::error::KernelError;
use crate::mailbox::{Actor, Handled};
use crate::messages::{
    BranchPayload, ChildCreated, CircleCreated, CreationRequest, InterBranchMessage, PodMsg,
    PodOutcome, PodReport, PodStats, PodpoolMsg,
};

const EVICTED: &str = "branch evicted during its first reasoning";

/// Run branch code, turning a panic in a neuron or functor into an error so
/// the failure policy applies and the pod keeps running.
fn guarded<T>(run: impl FnOnce() -> Result<T, KernelError>) -> Result<T, KernelError> {
    panic::catch_unwind(AssertUnwindSafe(run))
        .unwrap_or_else(|payload| Err(KernelError::Panicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

pub struct Pod {
    own: PodRef,
    name: String,
    ctx: BranchContext,
    branches: HashMap<BranchId, Branch>,
    rng: ChaCha8Rng,
    config: PodConfig,
}

impl std::fmt::Debug for Pod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pod")
            .field("pid", &self.own.pid())
            .field("branches", &self.branches.len())
            .field("idle_policy", &self.config.idle_policy)
            .field("failure_policy", &self.config.failure_policy)
            .finish()
    }
}

impl Pod {
    /// `own` must be the reference to this pod's mailbox; it becomes the pod
    /// part of every hosted branch's address.
    pub fn new(own: PodRef, ctx: BranchContext, config: PodConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed ^ own.pid() as u64),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            name: own.to_string(),
            own,
            ctx,
            branches: HashMap::new(),
            rng,
            config,
        }
    }

    pub fn pid(&self) -> PodId {
        self.own.pid()
    }

    /// Number of hosted branches.
    pub fn load(&self) -> usize {
        self.branches.len()
    }

    fn podpool(&self) -> &crate::mailbox::ActorRef<PodpoolMsg> {
        &self.ctx.podpool
    }

    /// Uniform sample over the whole id space, resampled on collision.
    fn generate_bid(&mut self) -> BranchId {
        loop {
            let bid: BranchId = self.rng.gen();
            if !self.branches.contains_key(&bid) {
                return bid;
            }
            trace!(pod = %self.name, bid = bid, "branch id collision, resampling");
        }
    }

    fn create(&mut self, request: CreationRequest) {
        let bid = self.generate_bid();
        let own = Brid::new(self.own.clone(), bid);

        let outcome = match request {
            CreationRequest::Circle(req) => {
                let breed = self.ctx.registry.circle_breed();
                let built = Branch::circle(breed, own.clone(), req.requester.clone(), self.ctx.clone());
                let kept = built.map(|branch| self.host(branch));
                match kept {
                    Ok(true) => PodOutcome::Circle(CircleCreated {
                        requester: req.requester,
                        circle: own,
                    }),
                    Ok(false) => PodOutcome::Failed {
                        requester: Some(req.requester),
                        reason: EVICTED.to_string(),
                    },
                    Err(err) => PodOutcome::Failed {
                        requester: Some(req.requester),
                        reason: err.to_string(),
                    },
                }
            }
            CreationRequest::Child(req) => {
                let parent = req.parent.clone();
                let built = Branch::new(
                    BranchSeed {
                        breed: req.breed,
                        own: own.clone(),
                        parent: Some(req.parent),
                        inputs: req.inputs,
                    },
                    self.ctx.clone(),
                );
                let kept = built.map(|branch| self.host(branch));
                match kept {
                    Ok(true) => PodOutcome::Child(ChildCreated { parent, child: own }),
                    Ok(false) => PodOutcome::Failed {
                        requester: None,
                        reason: EVICTED.to_string(),
                    },
                    Err(err) => PodOutcome::Failed {
                        requester: None,
                        reason: err.to_string(),
                    },
                }
            }
        };

        let report = PodReport {
            pid: self.pid(),
            load: self.load(),
            outcome,
        };
        debug!(pod = %self.name, load = report.load, outcome = ?report.outcome, "creation finished");
        if let Err(err) = self.podpool().send_priority(PodpoolMsg::Release(report)) {
            warn!(pod = %self.name, error = %err, "release not delivered");
        }
    }

    /// Register a new branch and run its first reasoning.
    ///
    /// Returns false when that first run got the branch evicted.
    fn host(&mut self, mut branch: Branch) -> bool {
        let bid = branch.own().bid;
        let first = guarded(|| branch.reasoning());
        self.branches.insert(bid, branch);
        match first {
            Ok(report) => {
                trace!(pod = %self.name, bid = bid, ?report, "branch hosted");
                true
            }
            Err(err) => !self.fail(bid, err),
        }
    }

    /// Apply the failure policy. Returns true when the branch was removed.
    fn fail(&mut self, bid: BranchId, err: KernelError) -> bool {
        match self.config.failure_policy {
            FailurePolicy::Isolate => {
                warn!(pod = %self.name, bid = bid, error = %err, "reasoning aborted, branch kept at failing stem");
                false
            }
            FailurePolicy::Evict => {
                warn!(pod = %self.name, bid = bid, error = %err, "reasoning aborted, branch evicted");
                self.remove(bid)
            }
        }
    }

    /// Tear a branch down and forward the teardown to its children.
    fn remove(&mut self, bid: BranchId) -> bool {
        let Some(mut branch) = self.branches.remove(&bid) else {
            return false;
        };
        let children = branch.teardown();
        self.cascade(bid, children);
        true
    }

    fn cascade(&self, bid: BranchId, children: Vec<Brid>) {
        for child in children {
            if let Err(err) = child.send(BranchPayload::Terminate) {
                debug!(pod = %self.name, bid = bid, child = %child, error = %err, "child teardown not delivered");
            }
        }
    }

    /// Priority lane, same as releases, so the pool sees load updates in the
    /// order this pod produced them.
    fn report_load(&self) {
        let msg = PodpoolMsg::LoadChanged {
            pid: self.pid(),
            load: self.load(),
        };
        if let Err(err) = self.podpool().send_priority(msg) {
            debug!(pod = %self.name, error = %err, "load update not delivered");
        }
    }

    fn route(&mut self, ibr: InterBranchMessage) -> Handled {
        let dest = ibr.dest;
        let Some(branch) = self.branches.get_mut(&dest) else {
            return self.undeliverable(dest, ibr.payload);
        };

        let payload = ibr.payload;
        match guarded(|| branch.deliver(payload)) {
            Ok(Delivered::Reasoned(report)) => {
                trace!(pod = %self.name, bid = dest, ?report, "branch resumed");
            }
            Ok(Delivered::Recorded) => {}
            Ok(Delivered::Terminated(children)) => {
                self.branches.remove(&dest);
                self.cascade(dest, children);
                debug!(pod = %self.name, bid = dest, load = self.load(), "branch terminated");
                self.report_load();
            }
            Err(err) => {
                if self.fail(dest, err) {
                    self.report_load();
                }
            }
        }
        Handled::Consumed
    }

    /// No branch `dest` here any more. A child created for it would never be
    /// terminated by anyone, so it is terminated now.
    fn undeliverable(&self, dest: BranchId, payload: BranchPayload) -> Handled {
        match payload {
            BranchPayload::ChildCreated { child } => {
                debug!(pod = %self.name, parent = dest, child = %child, "parent gone, terminating orphan child");
                if let Err(err) = child.send(BranchPayload::Terminate) {
                    debug!(pod = %self.name, child = %child, error = %err, "orphan teardown not delivered");
                }
                Handled::Consumed
            }
            other => {
                debug!(pod = %self.name, dest = dest, payload = ?other, "no such branch");
                Handled::NotConsumed
            }
        }
    }

    fn broadcast_idle(&mut self) {
        let bids: Vec<BranchId> = self.branches.keys().copied().collect();
        let mut removed = false;

        for bid in bids {
            let result = match self.branches.get_mut(&bid) {
                Some(branch) => guarded(|| branch.on_idle()),
                None => continue,
            };
            match result {
                Ok(Some(report)) => trace!(pod = %self.name, bid = bid, ?report, "timer reasoning"),
                Ok(None) => {}
                Err(err) => removed |= self.fail(bid, err),
            }
        }

        if removed {
            self.report_load();
        }
    }

    /// Synchronous drain: every hosted branch is torn down in place.
    fn drain(&mut self) {
        let count = self.branches.len();
        for (_, mut branch) in self.branches.drain() {
            branch.teardown();
        }
        info!(pod = %self.name, drained = count, "pod torn down");
    }

    fn stats(&self) -> PodStats {
        let mut branches: Vec<BranchId> = self.branches.keys().copied().collect();
        branches.sort_unstable();
        PodStats {
            pid: self.pid(),
            load: self.load(),
            branches,
        }
    }
}

impl Actor for Pod {
    type Msg = PodMsg;

    fn name(&self) -> &str {
        &self.name
    }

    fn idle_timeout(&self) -> Option<Duration> {
        self.config.idle_timeout()
    }

    fn handle(&mut self, msg: PodMsg) -> Handled {
        match msg {
            PodMsg::Create(request) => {
                self.create(request);
                Handled::Consumed
            }
            PodMsg::Branch(ibr) => self.route(ibr),
            PodMsg::Inspect(reply) => {
                let _ = reply.send(self.stats());
                Handled::Consumed
            }
            PodMsg::Teardown => {
                self.drain();
                Handled::Stop
            }
        }
    }

    fn idle(&mut self) -> Handled {
        if self.branches.is_empty() {
            return Handled::Consumed;
        }
        match self.config.idle_policy {
            IdlePolicy::Broadcast => self.broadcast_idle(),
            IdlePolicy::Silence => trace!(pod = %self.name, "idle tick consumed"),
        }
        Handled::Consumed
    }
}
