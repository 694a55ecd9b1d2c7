//! Concepts: immutable shared definitions and their per-branch live instances.
//!
//! A [`Definition`] (the "spirit" of a concept) is loaded once and shared by
//! every branch through the registry. A [`LiveConcept`] is the mutable,
//! branch-private counterpart materialized lazily on first access. Live
//! instances never leave their branch; only [`LiveConcept::deep_copy`]
//! snapshots travel to other branches.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::address::{Brid, RequesterRef};
use crate::branch::Branch;

/// Identifier of a concept definition.
pub type ConceptId = u32;

/// Identifier of a concept class (see [`ConceptKind::class_id`]).
pub type ClassId = u16;

/// Version of a stored concept record.
pub type Version = u16;

/// Lowest id of the dynamic concept range. Static functors live below it.
pub const MIN_DYNAMIC_CID: ConceptId = 1_000_000;

/// Highest id of the dynamic concept range.
pub const MAX_DYNAMIC_CID: ConceptId = i32::MAX as ConceptId;

/// Activation of a premise that is switched on.
pub const ACTIVE: f32 = 1.0;

/// Activation of a premise that is switched off. Live concepts start here.
pub const INACTIVE: f32 = -1.0;

/// Closed set of concept kinds. The discriminant doubles as the class id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum ConceptKind {
    Breed = 1,
    Neuron = 2,
    Action = 3,
    Premise = 4,
    StringPrem = 5,
    ConceptPrem = 6,
    BridPrem = 7,
    RequesterPrem = 8,
}

impl ConceptKind {
    pub fn class_id(self) -> ClassId {
        self as ClassId
    }

    pub fn from_class_id(clid: ClassId) -> Option<Self> {
        Some(match clid {
            1 => Self::Breed,
            2 => Self::Neuron,
            3 => Self::Action,
            4 => Self::Premise,
            5 => Self::StringPrem,
            6 => Self::ConceptPrem,
            7 => Self::BridPrem,
            8 => Self::RequesterPrem,
            _ => return None,
        })
    }
}

/// Where the reasoning loop goes after an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStem {
    /// Save the current stem and suspend.
    Yield,
    /// Continue with this neuron.
    Next(ConceptId),
}

/// Decision record produced by evaluating a neuron.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Effect {
    /// Actions to run, in order.
    pub actions: Vec<ConceptId>,
    /// Breeds to spawn as child branches.
    pub branches: Vec<ConceptId>,
    pub stem: NextStem,
}

impl Effect {
    /// Run `actions`, then yield.
    pub fn yield_after(actions: Vec<ConceptId>) -> Self {
        Self {
            actions,
            branches: Vec::new(),
            stem: NextStem::Yield,
        }
    }

    /// Run `actions`, then continue with `stem`.
    pub fn then(actions: Vec<ConceptId>, stem: ConceptId) -> Self {
        Self {
            actions,
            branches: Vec::new(),
            stem: NextStem::Next(stem),
        }
    }

    pub fn spawning(mut self, breeds: Vec<ConceptId>) -> Self {
        self.branches = breeds;
        self
    }
}

/// Activation computation of a neuron. Opaque to the kernel.
///
/// Called with the hosting branch so the callback can read premises through
/// the branch's concept cache.
pub trait Activation: Send + Sync {
    fn select_effect(&self, branch: &mut Branch, stem: ConceptId) -> Effect;
}

impl<F> Activation for F
where
    F: Fn(&mut Branch, ConceptId) -> Effect + Send + Sync,
{
    fn select_effect(&self, branch: &mut Branch, stem: ConceptId) -> Effect {
        self(branch, stem)
    }
}

/// Neuron that always produces the same effect.
#[derive(Debug, Clone)]
pub struct FixedEffect(pub Effect);

impl Activation for FixedEffect {
    fn select_effect(&self, _branch: &mut Branch, _stem: ConceptId) -> Effect {
        self.0.clone()
    }
}

/// Static behavior behind an action concept.
pub trait Functor: Send + Sync {
    fn run(&self, branch: &mut Branch, args: &[ConceptId]) -> anyhow::Result<()>;
}

impl<F> Functor for F
where
    F: Fn(&mut Branch, &[ConceptId]) -> anyhow::Result<()> + Send + Sync,
{
    fn run(&self, branch: &mut Branch, args: &[ConceptId]) -> anyhow::Result<()> {
        self(branch, args)
    }
}

/// Kind-specific stable data of a definition.
#[derive(Clone)]
pub enum Spirit {
    /// Blueprint of a branch.
    Breed {
        /// Initial stem.
        seed: ConceptId,
        /// Concepts cloned from the parent when this breed is spawned.
        ins: Vec<ConceptId>,
        outs: Vec<ConceptId>,
        /// Premise activated when the hosting pod reports an idle tick.
        timer: Option<ConceptId>,
    },
    Neuron {
        activation: Arc<dyn Activation>,
    },
    Action {
        functor: ConceptId,
        args: Vec<ConceptId>,
    },
    Premise,
    StringPrem {
        initial: String,
    },
    /// Wrapper around another concept, wired eagerly on materialization.
    ConceptPrem {
        load: ConceptId,
    },
    BridPrem,
    RequesterPrem,
}

impl Spirit {
    pub fn kind(&self) -> ConceptKind {
        match self {
            Spirit::Breed { .. } => ConceptKind::Breed,
            Spirit::Neuron { .. } => ConceptKind::Neuron,
            Spirit::Action { .. } => ConceptKind::Action,
            Spirit::Premise => ConceptKind::Premise,
            Spirit::StringPrem { .. } => ConceptKind::StringPrem,
            Spirit::ConceptPrem { .. } => ConceptKind::ConceptPrem,
            Spirit::BridPrem => ConceptKind::BridPrem,
            Spirit::RequesterPrem => ConceptKind::RequesterPrem,
        }
    }
}

impl fmt::Debug for Spirit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Spirit::Breed {
                seed,
                ins,
                outs,
                timer,
            } => f
                .debug_struct("Breed")
                .field("seed", seed)
                .field("ins", ins)
                .field("outs", outs)
                .field("timer", timer)
                .finish(),
            Spirit::Neuron { .. } => f.write_str("Neuron"),
            Spirit::Action { functor, args } => f
                .debug_struct("Action")
                .field("functor", functor)
                .field("args", args)
                .finish(),
            Spirit::Premise => f.write_str("Premise"),
            Spirit::StringPrem { initial } => {
                f.debug_struct("StringPrem").field("initial", initial).finish()
            }
            Spirit::ConceptPrem { load } => {
                f.debug_struct("ConceptPrem").field("load", load).finish()
            }
            Spirit::BridPrem => f.write_str("BridPrem"),
            Spirit::RequesterPrem => f.write_str("RequesterPrem"),
        }
    }
}

/// Immutable, process-wide concept definition.
#[derive(Debug, Clone)]
pub struct Definition {
    pub cid: ConceptId,
    pub ver: Version,
    pub name: String,
    pub spirit: Spirit,
}

impl Definition {
    pub fn kind(&self) -> ConceptKind {
        self.spirit.kind()
    }
}

/// Live state of a branch's breed.
#[derive(Debug, Clone)]
pub struct LiveBreed {
    pub activation: f32,
    /// Address of the branch this breed animates.
    pub brid: Option<Brid>,
}

/// Live state of a plain premise or neuron.
#[derive(Debug, Clone)]
pub struct LiveActivation {
    pub activation: f32,
}

#[derive(Debug, Clone)]
pub struct LiveString {
    pub activation: f32,
    pub text: String,
}

/// A premise wrapping another live concept of the same branch.
#[derive(Debug, Clone)]
pub struct LiveWrapper {
    pub activation: f32,
    pub load: ConceptId,
}

#[derive(Debug, Clone)]
pub struct LiveBrid {
    pub activation: f32,
    pub brid: Option<Brid>,
}

/// Capability premise exposing the external requester to a circle.
#[derive(Debug, Clone)]
pub struct LiveRequester {
    pub activation: f32,
    pub requester: Option<RequesterRef>,
}

/// Kind-specific mutable state of a live concept.
#[derive(Debug, Clone)]
pub enum LiveState {
    Breed(LiveBreed),
    Neuron(LiveActivation),
    Action,
    Premise(LiveActivation),
    StringPrem(LiveString),
    ConceptPrem(LiveWrapper),
    BridPrem(LiveBrid),
    RequesterPrem(LiveRequester),
}

/// Mutable, branch-private instance of a concept.
#[derive(Debug)]
pub struct LiveConcept {
    def: Arc<Definition>,
    pub state: LiveState,
}

impl LiveConcept {
    /// Materialize a fresh instance from its definition.
    pub fn from_definition(def: Arc<Definition>) -> Self {
        let state = match &def.spirit {
            Spirit::Breed { .. } => LiveState::Breed(LiveBreed {
                activation: INACTIVE,
                brid: None,
            }),
            Spirit::Neuron { .. } => LiveState::Neuron(LiveActivation {
                activation: INACTIVE,
            }),
            Spirit::Action { .. } => LiveState::Action,
            Spirit::Premise => LiveState::Premise(LiveActivation {
                activation: INACTIVE,
            }),
            Spirit::StringPrem { initial } => LiveState::StringPrem(LiveString {
                activation: INACTIVE,
                text: initial.clone(),
            }),
            Spirit::ConceptPrem { load } => LiveState::ConceptPrem(LiveWrapper {
                activation: INACTIVE,
                load: *load,
            }),
            Spirit::BridPrem => LiveState::BridPrem(LiveBrid {
                activation: INACTIVE,
                brid: None,
            }),
            Spirit::RequesterPrem => LiveState::RequesterPrem(LiveRequester {
                activation: INACTIVE,
                requester: None,
            }),
        };
        Self { def, state }
    }

    pub fn cid(&self) -> ConceptId {
        self.def.cid
    }

    pub fn definition(&self) -> &Arc<Definition> {
        &self.def
    }

    pub fn kind(&self) -> ConceptKind {
        self.def.kind()
    }

    /// Independent copy: mutable state is duplicated, the definition is shared.
    ///
    /// `LiveConcept` has no `Clone` impl; copies are made here only.
    pub fn deep_copy(&self) -> LiveConcept {
        LiveConcept {
            def: Arc::clone(&self.def),
            state: self.state.clone(),
        }
    }

    /// Concept that must be materialized alongside this one.
    ///
    /// Only wrappers have one: the concept they load.
    pub fn wired_dependency(&self) -> Option<ConceptId> {
        match &self.state {
            LiveState::ConceptPrem(w) => Some(w.load),
            _ => None,
        }
    }

    /// Current activation; actions carry none.
    pub fn activation(&self) -> Option<f32> {
        match &self.state {
            LiveState::Breed(b) => Some(b.activation),
            LiveState::Neuron(n) | LiveState::Premise(n) => Some(n.activation),
            LiveState::Action => None,
            LiveState::StringPrem(s) => Some(s.activation),
            LiveState::ConceptPrem(w) => Some(w.activation),
            LiveState::BridPrem(b) => Some(b.activation),
            LiveState::RequesterPrem(r) => Some(r.activation),
        }
    }

    pub fn set_activation(&mut self, value: f32) {
        match &mut self.state {
            LiveState::Breed(b) => b.activation = value,
            LiveState::Neuron(n) | LiveState::Premise(n) => n.activation = value,
            LiveState::Action => {}
            LiveState::StringPrem(s) => s.activation = value,
            LiveState::ConceptPrem(w) => w.activation = value,
            LiveState::BridPrem(b) => b.activation = value,
            LiveState::RequesterPrem(r) => r.activation = value,
        }
    }

    pub fn activate(&mut self) {
        self.set_activation(ACTIVE);
    }

    pub fn anactivate(&mut self) {
        self.set_activation(INACTIVE);
    }

    pub fn is_active(&self) -> bool {
        self.activation().is_some_and(|a| a > 0.0)
    }

    pub fn text(&self) -> Option<&str> {
        match &self.state {
            LiveState::StringPrem(s) => Some(&s.text),
            _ => None,
        }
    }

    pub fn set_text(&mut self, text: impl Into<String>) -> bool {
        match &mut self.state {
            LiveState::StringPrem(s) => {
                s.text = text.into();
                true
            }
            _ => false,
        }
    }

    /// Address held by a breed or brid premise.
    pub fn brid(&self) -> Option<&Brid> {
        match &self.state {
            LiveState::Breed(b) => b.brid.as_ref(),
            LiveState::BridPrem(b) => b.brid.as_ref(),
            _ => None,
        }
    }

    pub fn set_brid(&mut self, brid: Brid) -> bool {
        match &mut self.state {
            LiveState::Breed(b) => {
                b.brid = Some(brid);
                true
            }
            LiveState::BridPrem(b) => {
                b.brid = Some(brid);
                true
            }
            _ => false,
        }
    }

    pub fn requester(&self) -> Option<&RequesterRef> {
        match &self.state {
            LiveState::RequesterPrem(r) => r.requester.as_ref(),
            _ => None,
        }
    }

    pub fn set_requester(&mut self, requester: RequesterRef) -> bool {
        match &mut self.state {
            LiveState::RequesterPrem(r) => {
                r.requester = Some(requester);
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for LiveConcept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.def.name, self.def.cid)
    }
}
