//! Branch: the resumable reasoning state machine hosted by a pod.
//!
//! A branch's only persistent control state is its saved stem, the neuron
//! reasoning resumes from. Everything else it knows lives in its private
//! concept cache, materialized lazily from the shared registry.
//!
//! ```text
//!            ┌──────────────────────────────────────────────┐
//!            ▼                                              │
//!   evaluate stem ─► run actions ─► request children ─► next stem?
//!                                                          │
//!                                                   yield: save stem, return
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::address::{Brid, RequesterRef};
use crate::concept::{Activation, ConceptId, ConceptKind, LiveConcept, NextStem, Spirit};
use crate::error::KernelError;
use crate::mailbox::ActorRef;
use crate::messages::{BranchPayload, CreateChildRequest, PodpoolMsg};
use crate::registry::ConceptRegistry;

/// Process-wide dependencies handed to every branch by its pod.
#[derive(Debug, Clone)]
pub struct BranchContext {
    pub registry: Arc<ConceptRegistry>,
    /// Where child creation requests go
    pub podpool: ActorRef<PodpoolMsg>,
}

/// Everything needed to construct a branch.
#[derive(Debug)]
pub struct BranchSeed {
    pub breed: ConceptId,
    pub own: Brid,
    pub parent: Option<Brid>,
    /// Deep copies from the parent, injected before anything is materialized
    pub inputs: Vec<LiveConcept>,
}

/// Counters from one `reasoning()` invocation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReasoningReport {
    /// Stems evaluated
    pub evaluated: usize,
    /// Stem changes before the yield
    pub transitions: usize,
    pub actions_run: usize,
    /// Child creation requests sent
    pub spawned: usize,
}

/// What a branch did with an inbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivered {
    /// The payload changed live state and reasoning ran.
    Reasoned(ReasoningReport),
    /// Bookkeeping only; reasoning was not re-entered.
    Recorded,
    /// The branch tore itself down. Carries the children to forward the
    /// teardown to.
    Terminated(Vec<Brid>),
}

pub struct Branch {
    breed: ConceptId,
    own: Brid,
    parent: Option<Brid>,
    live: HashMap<ConceptId, LiveConcept>,
    stem: ConceptId,
    children: Vec<Brid>,
    ctx: BranchContext,
}

impl fmt::Debug for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Branch")
            .field("breed", &self.breed)
            .field("own", &self.own)
            .field("parent", &self.parent)
            .field("stem", &self.stem)
            .field("live", &self.live.len())
            .field("children", &self.children.len())
            .finish()
    }
}

impl Branch {
    /// Build a branch from its breed.
    ///
    /// Inputs are injected first so they take precedence over fresh
    /// materialization. The breed instance is then activated and given the
    /// branch's own address, and the seed neuron becomes the stem.
    pub fn new(seed: BranchSeed, ctx: BranchContext) -> Result<Self, KernelError> {
        let def = Arc::clone(ctx.registry.definition(seed.breed)?);
        let stem = match &def.spirit {
            Spirit::Breed { seed, .. } => *seed,
            other => {
                return Err(KernelError::WrongKind {
                    cid: seed.breed,
                    expected: ConceptKind::Breed,
                    found: other.kind(),
                })
            }
        };

        let mut branch = Self {
            breed: seed.breed,
            own: seed.own,
            parent: seed.parent,
            live: HashMap::new(),
            stem,
            children: Vec::new(),
            ctx,
        };

        for input in seed.inputs {
            branch.inject(input);
        }

        let own = branch.own.clone();
        let breed = branch.get(seed.breed)?;
        breed.set_brid(own);
        breed.activate();

        branch.get_kind(stem, ConceptKind::Neuron)?;
        Ok(branch)
    }

    /// Build a root branch with the requester injected into the registry's
    /// requester premise.
    pub fn circle(
        breed: ConceptId,
        own: Brid,
        requester: RequesterRef,
        ctx: BranchContext,
    ) -> Result<Self, KernelError> {
        let premise = ctx.registry.requester_premise();
        let mut branch = Self::new(
            BranchSeed {
                breed,
                own,
                parent: None,
                inputs: Vec::new(),
            },
            ctx,
        )?;

        let live = branch.get_kind(premise, ConceptKind::RequesterPrem)?;
        live.set_requester(requester);
        live.activate();
        Ok(branch)
    }

    /// Live instance of `cid`, materialized on first access.
    ///
    /// A wrapper premise pulls its load in with it, unless the branch already
    /// holds one.
    pub fn get(&mut self, cid: ConceptId) -> Result<&mut LiveConcept, KernelError> {
        if !self.live.contains_key(&cid) {
            let instance = self.ctx.registry.materialize(cid)?;
            let wired = match instance.wired_dependency() {
                Some(dep) if !self.live.contains_key(&dep) => {
                    Some(self.ctx.registry.materialize(dep)?)
                }
                _ => None,
            };
            trace!(branch = %self.own, concept = %instance, "materialized");
            self.live.insert(cid, instance);
            if let Some(loaded) = wired {
                self.live.insert(loaded.cid(), loaded);
            }
        }
        self.live
            .get_mut(&cid)
            .ok_or(KernelError::UnknownConcept(cid))
    }

    /// Existing live instance, without materializing.
    pub fn peek(&self, cid: ConceptId) -> Option<&LiveConcept> {
        self.live.get(&cid)
    }

    /// Store an instance, replacing any held for the same id.
    pub fn inject(&mut self, instance: LiveConcept) -> Option<LiveConcept> {
        self.live.insert(instance.cid(), instance)
    }

    /// Deep copy of `cid` followed by a copy of its wired dependency, if any.
    pub fn snapshot(&mut self, cid: ConceptId) -> Result<Vec<LiveConcept>, KernelError> {
        let primary = self.get(cid)?;
        let dependency = primary.wired_dependency();
        let mut copies = vec![primary.deep_copy()];
        if let Some(dep) = dependency {
            copies.push(self.get(dep)?.deep_copy());
        }
        Ok(copies)
    }

    /// Run from the saved stem until a neuron yields.
    ///
    /// On error the stem stays at the neuron whose effect failed. Actions that
    /// ran before the failing one keep their effects.
    pub fn reasoning(&mut self) -> Result<ReasoningReport, KernelError> {
        let mut report = ReasoningReport::default();

        loop {
            let stem = self.stem;
            let activation = self.activation_of(stem)?;
            let effect = activation.select_effect(self, stem);
            report.evaluated += 1;
            trace!(branch = %self.own, stem = stem, ?effect, "stem evaluated");

            for &action in &effect.actions {
                self.run_action(action)?;
                report.actions_run += 1;
            }

            for &breed in &effect.branches {
                self.request_child(breed)?;
                report.spawned += 1;
            }

            match effect.stem {
                NextStem::Yield => {
                    debug!(branch = %self.own, stem = stem, ?report, "branch yielded");
                    return Ok(report);
                }
                NextStem::Next(next) => {
                    self.get_kind(next, ConceptKind::Neuron)?;
                    self.stem = next;
                    report.transitions += 1;
                }
            }
        }
    }

    /// Apply an inbound payload.
    pub fn deliver(&mut self, payload: BranchPayload) -> Result<Delivered, KernelError> {
        match payload {
            BranchPayload::Transport { instances, sender } => {
                debug!(
                    branch = %self.own,
                    sender = %sender,
                    count = instances.len(),
                    "instances received"
                );
                for instance in instances {
                    self.inject(instance);
                }
                self.reasoning().map(Delivered::Reasoned)
            }
            BranchPayload::Text { premise, text } => {
                let live = self.get_kind(premise, ConceptKind::StringPrem)?;
                live.set_text(text);
                live.activate();
                self.reasoning().map(Delivered::Reasoned)
            }
            BranchPayload::ChildCreated { child } => {
                self.add_child(child);
                Ok(Delivered::Recorded)
            }
            BranchPayload::Terminate => Ok(Delivered::Terminated(self.teardown())),
        }
    }

    /// Idle tick from the hosting pod.
    ///
    /// Only breeds that declare a timer premise react: the premise is
    /// activated and reasoning resumes.
    pub fn on_idle(&mut self) -> Result<Option<ReasoningReport>, KernelError> {
        let timer = match &self.ctx.registry.definition(self.breed)?.spirit {
            Spirit::Breed { timer, .. } => *timer,
            _ => None,
        };
        let Some(timer) = timer else {
            return Ok(None);
        };

        self.get(timer)?.activate();
        self.reasoning().map(Some)
    }

    /// Drop every live instance and hand back the children for cascading.
    pub fn teardown(&mut self) -> Vec<Brid> {
        debug!(
            branch = %self.own,
            live = self.live.len(),
            children = self.children.len(),
            "branch torn down"
        );
        self.live.clear();
        std::mem::take(&mut self.children)
    }

    pub fn breed(&self) -> ConceptId {
        self.breed
    }

    pub fn own(&self) -> &Brid {
        &self.own
    }

    pub fn parent(&self) -> Option<&Brid> {
        self.parent.as_ref()
    }

    /// Saved continuation.
    pub fn stem(&self) -> ConceptId {
        self.stem
    }

    pub fn children(&self) -> &[Brid] {
        &self.children
    }

    pub fn add_child(&mut self, child: Brid) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn context(&self) -> &BranchContext {
        &self.ctx
    }

    fn get_kind(
        &mut self,
        cid: ConceptId,
        expected: ConceptKind,
    ) -> Result<&mut LiveConcept, KernelError> {
        let live = self.get(cid)?;
        let found = live.kind();
        if found != expected {
            return Err(KernelError::WrongKind {
                cid,
                expected,
                found,
            });
        }
        Ok(live)
    }

    fn activation_of(&mut self, stem: ConceptId) -> Result<Arc<dyn Activation>, KernelError> {
        let def = Arc::clone(self.get(stem)?.definition());
        match &def.spirit {
            Spirit::Neuron { activation } => Ok(Arc::clone(activation)),
            other => Err(KernelError::WrongKind {
                cid: stem,
                expected: ConceptKind::Neuron,
                found: other.kind(),
            }),
        }
    }

    fn run_action(&mut self, action: ConceptId) -> Result<(), KernelError> {
        let def = Arc::clone(self.get(action)?.definition());
        let (functor, args) = match &def.spirit {
            Spirit::Action { functor, args } => (*functor, args),
            other => {
                return Err(KernelError::WrongKind {
                    cid: action,
                    expected: ConceptKind::Action,
                    found: other.kind(),
                })
            }
        };

        trace!(branch = %self.own, action = action, functor = functor, "running action");
        let behavior = self.ctx.registry.functor(functor)?;
        behavior
            .run(self, args)
            .map_err(|err| KernelError::Action {
                action,
                reason: format!("{err:#}"),
            })
    }

    /// Fire-and-forget: the child's address arrives later as
    /// [`BranchPayload::ChildCreated`].
    fn request_child(&mut self, breed: ConceptId) -> Result<(), KernelError> {
        let def = Arc::clone(self.ctx.registry.definition(breed)?);
        let ins = match &def.spirit {
            Spirit::Breed { ins, .. } => ins,
            other => {
                return Err(KernelError::WrongKind {
                    cid: breed,
                    expected: ConceptKind::Breed,
                    found: other.kind(),
                })
            }
        };

        let mut inputs = Vec::with_capacity(ins.len());
        for &cid in ins {
            inputs.extend(self.snapshot(cid)?);
        }

        let request = CreateChildRequest {
            breed,
            inputs,
            parent: self.own.clone(),
        };
        if let Err(err) = self.ctx.podpool.send(PodpoolMsg::Allocate(request.into())) {
            warn!(branch = %self.own, breed = breed, error = %err, "child request not delivered");
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::testing::harness;
    use super::*;
    use crate::concept::{Effect, FixedEffect, MIN_DYNAMIC_CID};
    use crate::mailbox::mailbox;
    use crate::messages::{CreationRequest, RequesterMsg};

    const BREED: ConceptId = MIN_DYNAMIC_CID;
    const SEED: ConceptId = MIN_DYNAMIC_CID + 1;
    const USER: ConceptId = MIN_DYNAMIC_CID + 2;
    const ACT: ConceptId = MIN_DYNAMIC_CID + 3;
    const FAIL: ConceptId = MIN_DYNAMIC_CID + 4;
    const TEXT: ConceptId = MIN_DYNAMIC_CID + 5;
    const WRAP: ConceptId = MIN_DYNAMIC_CID + 6;
    const CHILD: ConceptId = MIN_DYNAMIC_CID + 7;
    const CHILD_SEED: ConceptId = MIN_DYNAMIC_CID + 8;
    const N2: ConceptId = MIN_DYNAMIC_CID + 9;
    const N3: ConceptId = MIN_DYNAMIC_CID + 10;
    const TIMER: ConceptId = MIN_DYNAMIC_CID + 11;

    const COUNT: ConceptId = 1;
    const BOOM: ConceptId = 2;

    fn counting(counter: &Arc<AtomicUsize>) -> impl crate::concept::Functor + 'static {
        let counter = Arc::clone(counter);
        move |_: &mut Branch, _: &[ConceptId]| -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Circle breed with a configurable seed effect plus the supporting cast.
    fn registry(seed: Effect, counter: &Arc<AtomicUsize>) -> ConceptRegistry {
        ConceptRegistry::builder()
            .functor(COUNT, "count", counting(counter))
            .functor(BOOM, "boom", |_: &mut Branch, _: &[ConceptId]| -> anyhow::Result<()> {
                anyhow::bail!("boom")
            })
            .breed(BREED, "circle", SEED, vec![])
            .neuron(SEED, "seed", FixedEffect(seed))
            .neuron(N2, "n2", FixedEffect(Effect::then(vec![ACT], N3)))
            .neuron(N3, "n3", FixedEffect(Effect::yield_after(vec![])))
            .requester_premise(USER, "user")
            .action(ACT, "act", COUNT, vec![])
            .action(FAIL, "fail", BOOM, vec![])
            .string_premise(TEXT, "text", "original")
            .concept_premise(WRAP, "wrap", TEXT)
            .breed(CHILD, "child", CHILD_SEED, vec![WRAP])
            .neuron(CHILD_SEED, "child_seed", FixedEffect(Effect::yield_after(vec![])))
            .circle(BREED, USER)
            .build()
            .unwrap()
    }

    #[test]
    fn test_cache_returns_same_instance() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut h = harness(registry(Effect::yield_after(vec![]), &counter));
        let mut branch = h.branch(BREED);

        let first: *const LiveConcept = branch.get(TEXT).unwrap();
        let second: *const LiveConcept = branch.get(TEXT).unwrap();
        assert!(std::ptr::eq(first, second));

        branch.get(TEXT).unwrap().set_text("mutated");
        assert_eq!(branch.get(TEXT).unwrap().text(), Some("mutated"));
    }

    #[test]
    fn test_wrapper_wires_its_load() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut h = harness(registry(Effect::yield_after(vec![]), &counter));
        let mut branch = h.branch(BREED);

        assert!(branch.peek(TEXT).is_none());
        branch.get(WRAP).unwrap();
        assert_eq!(branch.peek(TEXT).and_then(|t| t.text()), Some("original"));

        // An existing load is kept, not re-materialized.
        branch.get(TEXT).unwrap().set_text("kept");
        let mut other = h.branch(BREED);
        other.get(TEXT).unwrap().set_text("kept too");
        other.get(WRAP).unwrap();
        assert_eq!(other.peek(TEXT).and_then(|t| t.text()), Some("kept too"));
    }

    #[test]
    fn test_new_branch_activates_breed_with_own_address() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut h = harness(registry(Effect::yield_after(vec![]), &counter));
        let branch = h.branch(BREED);

        let breed = branch.peek(BREED).unwrap();
        assert!(breed.is_active());
        assert_eq!(breed.brid(), Some(branch.own()));
        assert_eq!(branch.stem(), SEED);
        assert!(branch.parent().is_none());
    }

    #[test]
    fn test_wrong_breed_kind_rejected() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut h = harness(registry(Effect::yield_after(vec![]), &counter));
        let own = h.next_brid();
        let err = Branch::new(
            BranchSeed {
                breed: TEXT,
                own,
                parent: None,
                inputs: Vec::new(),
            },
            h.ctx.clone(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            KernelError::WrongKind {
                expected: ConceptKind::Breed,
                ..
            }
        ));
    }

    #[test]
    fn test_yield_runs_action_once_and_keeps_stem() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut h = harness(registry(Effect::yield_after(vec![ACT]), &counter));
        let mut branch = h.branch(BREED);

        let report = branch.reasoning().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(branch.stem(), SEED);
        assert_eq!(
            report,
            ReasoningReport {
                evaluated: 1,
                transitions: 0,
                actions_run: 1,
                spawned: 0,
            }
        );
    }

    #[test]
    fn test_reasoning_follows_path_to_yield() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut h = harness(registry(Effect::then(vec![], N2), &counter));
        let mut branch = h.branch(BREED);

        let report = branch.reasoning().unwrap();
        assert_eq!(report.transitions, 2);
        assert_eq!(report.evaluated, 3);
        assert_eq!(branch.stem(), N3);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // Resumes at the saved stem.
        let again = branch.reasoning().unwrap();
        assert_eq!(again.evaluated, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_action_aborts_and_keeps_stem() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut h = harness(registry(Effect::then(vec![FAIL, ACT], N2), &counter));
        let mut branch = h.branch(BREED);

        let err = branch.reasoning().unwrap_err();
        match err {
            KernelError::Action { action, reason } => {
                assert_eq!(action, FAIL);
                assert!(reason.contains("boom"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(branch.stem(), SEED);
    }

    #[test]
    fn test_spawn_sends_independent_clones() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seed = Effect::yield_after(vec![]).spawning(vec![CHILD]);
        let mut h = harness(registry(seed, &counter));
        let mut branch = h.branch(BREED);
        branch.get(TEXT).unwrap().set_text("from parent");

        let report = branch.reasoning().unwrap();
        assert_eq!(report.spawned, 1);

        let mut request = match h.podpool_rx.try_recv() {
            Some(PodpoolMsg::Allocate(CreationRequest::Child(req))) => req,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(request.breed, CHILD);
        assert_eq!(&request.parent, branch.own());
        let cids: Vec<ConceptId> = request.inputs.iter().map(|c| c.cid()).collect();
        assert_eq!(cids, vec![WRAP, TEXT]);

        request.inputs[1].set_text("changed by child");
        assert_eq!(branch.peek(TEXT).and_then(|t| t.text()), Some("from parent"));

        branch.get(TEXT).unwrap().set_text("changed by parent");
        assert_eq!(request.inputs[1].text(), Some("changed by child"));
    }

    #[test]
    fn test_child_starts_from_injected_inputs() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut h = harness(registry(Effect::yield_after(vec![]), &counter));
        let mut parent = h.branch(BREED);
        parent.get(TEXT).unwrap().set_text("inherited");
        let inputs = parent.snapshot(WRAP).unwrap();

        let own = h.next_brid();
        let mut child = Branch::new(
            BranchSeed {
                breed: CHILD,
                own,
                parent: Some(parent.own().clone()),
                inputs,
            },
            h.ctx.clone(),
        )
        .unwrap();

        assert_eq!(child.parent(), Some(parent.own()));
        assert_eq!(child.get(TEXT).unwrap().text(), Some("inherited"));
    }

    #[test]
    fn test_circle_injects_requester() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut h = harness(registry(Effect::yield_after(vec![]), &counter));
        let (requester, _requester_rx) = mailbox::<RequesterMsg>("user");
        let branch = h.circle(requester);

        let premise = branch.peek(USER).unwrap();
        assert!(premise.is_active());
        assert_eq!(premise.requester().map(|r| r.name()), Some("user"));
    }

    #[test]
    fn test_deliver_text_and_child_created() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut h = harness(registry(Effect::yield_after(vec![ACT]), &counter));
        let mut branch = h.branch(BREED);

        let delivered = branch
            .deliver(BranchPayload::Text {
                premise: TEXT,
                text: "hello".into(),
            })
            .unwrap();
        assert!(matches!(delivered, Delivered::Reasoned(_)));
        assert!(branch.peek(TEXT).unwrap().is_active());
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let child = h.next_brid();
        let delivered = branch
            .deliver(BranchPayload::ChildCreated {
                child: child.clone(),
            })
            .unwrap();
        assert_eq!(delivered, Delivered::Recorded);
        assert_eq!(branch.children(), &[child.clone()]);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let delivered = branch.deliver(BranchPayload::Terminate).unwrap();
        assert_eq!(delivered, Delivered::Terminated(vec![child]));
        assert_eq!(branch.live_count(), 0);
    }

    #[test]
    fn test_idle_only_reaches_breeds_with_timer() {
        let counter = Arc::new(AtomicUsize::new(0));
        let registry = ConceptRegistry::builder()
            .functor(COUNT, "count", counting(&counter))
            .define(
                BREED,
                "timed",
                Spirit::Breed {
                    seed: SEED,
                    ins: vec![],
                    outs: vec![],
                    timer: Some(TIMER),
                },
            )
            .breed(CHILD, "untimed", SEED, vec![])
            .neuron(SEED, "seed", |branch: &mut Branch, _stem: ConceptId| {
                let fired = branch.get(TIMER).map(|t| t.is_active()).unwrap_or(false);
                if fired {
                    Effect::yield_after(vec![ACT])
                } else {
                    Effect::yield_after(vec![])
                }
            })
            .premise(TIMER, "timer")
            .action(ACT, "act", COUNT, vec![])
            .requester_premise(USER, "user")
            .circle(BREED, USER)
            .build()
            .unwrap();
        let mut h = harness(registry);

        let mut untimed = h.branch(CHILD);
        assert_eq!(untimed.on_idle().unwrap(), None);

        let mut timed = h.branch(BREED);
        let report = timed.on_idle().unwrap().unwrap();
        assert_eq!(report.actions_run, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
