//! Shared concept registry.
//!
//! Populated once through [`RegistryBuilder`] before any actor starts, then
//! shared read-only as `Arc<ConceptRegistry>`. No locking is needed because
//! nothing mutates it after [`RegistryBuilder::build`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::concept::{
    Activation, ClassId, ConceptId, ConceptKind, Definition, Functor, LiveConcept, Spirit,
    Version, MAX_DYNAMIC_CID, MIN_DYNAMIC_CID,
};
use crate::error::{KernelError, RegistryError, StoreError};
use crate::store::{ConceptRecord, ConceptStore};

struct RegisteredFunctor {
    name: String,
    functor: Arc<dyn Functor>,
}

/// Read-only table of concept definitions and static functors.
pub struct ConceptRegistry {
    definitions: HashMap<ConceptId, Arc<Definition>>,
    functors: HashMap<ConceptId, RegisteredFunctor>,
    circle_breed: ConceptId,
    requester_premise: ConceptId,
}

impl fmt::Debug for ConceptRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConceptRegistry")
            .field("definitions", &self.definitions.len())
            .field("functors", &self.functors.len())
            .field("circle_breed", &self.circle_breed)
            .field("requester_premise", &self.requester_premise)
            .finish()
    }
}

impl ConceptRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn definition(&self, cid: ConceptId) -> Result<&Arc<Definition>, KernelError> {
        self.definitions
            .get(&cid)
            .ok_or(KernelError::UnknownConcept(cid))
    }

    /// Fresh live instance of a definition.
    pub fn factory(&self, def: &Arc<Definition>) -> LiveConcept {
        LiveConcept::from_definition(Arc::clone(def))
    }

    pub fn materialize(&self, cid: ConceptId) -> Result<LiveConcept, KernelError> {
        Ok(self.factory(self.definition(cid)?))
    }

    pub fn class_of(&self, instance: &LiveConcept) -> ClassId {
        instance.kind().class_id()
    }

    pub fn functor(&self, id: ConceptId) -> Result<Arc<dyn Functor>, KernelError> {
        self.functors
            .get(&id)
            .map(|f| Arc::clone(&f.functor))
            .ok_or(KernelError::UnknownFunctor(id))
    }

    pub fn functor_name(&self, id: ConceptId) -> Option<&str> {
        self.functors.get(&id).map(|f| f.name.as_str())
    }

    pub fn name_of(&self, cid: ConceptId) -> Option<&str> {
        self.definitions.get(&cid).map(|d| d.name.as_str())
    }

    /// Breed every circle is created from.
    pub fn circle_breed(&self) -> ConceptId {
        self.circle_breed
    }

    /// Premise a circle's requester is injected into.
    pub fn requester_premise(&self) -> ConceptId {
        self.requester_premise
    }

    /// Every defined concept id, ascending.
    pub fn ids(&self) -> Vec<ConceptId> {
        let mut cids: Vec<ConceptId> = self.definitions.keys().copied().collect();
        cids.sort_unstable();
        cids
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Write the stable form of every definition to `store`, in id order.
    pub fn publish(&self, store: &dyn ConceptStore) -> Result<usize, StoreError> {
        let cids = self.ids();
        for cid in &cids {
            let def = &self.definitions[cid];
            let stable = serde_json::to_vec(&StableRecord::from(def.as_ref()))
                .map_err(|source| StoreError::Encode { cid: *cid, source })?;
            store.insert(ConceptRecord {
                cid: def.cid,
                ver: def.ver,
                class: def.kind().class_id(),
                stable: Some(stable),
                transient: None,
            })?;
        }

        info!(published = cids.len(), "registry published to concept store");
        Ok(cids.len())
    }
}

/// Serializable stable part of a definition. Neuron callbacks are code and
/// are not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StableRecord {
    pub name: String,
    pub spirit: StableSpirit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StableSpirit {
    Breed {
        seed: ConceptId,
        ins: Vec<ConceptId>,
        outs: Vec<ConceptId>,
        timer: Option<ConceptId>,
    },
    Neuron,
    Action {
        functor: ConceptId,
        args: Vec<ConceptId>,
    },
    Premise,
    StringPrem {
        initial: String,
    },
    ConceptPrem {
        load: ConceptId,
    },
    BridPrem,
    RequesterPrem,
}

impl From<&Definition> for StableRecord {
    fn from(def: &Definition) -> Self {
        let spirit = match &def.spirit {
            Spirit::Breed {
                seed,
                ins,
                outs,
                timer,
            } => StableSpirit::Breed {
                seed: *seed,
                ins: ins.clone(),
                outs: outs.clone(),
                timer: *timer,
            },
            Spirit::Neuron { .. } => StableSpirit::Neuron,
            Spirit::Action { functor, args } => StableSpirit::Action {
                functor: *functor,
                args: args.clone(),
            },
            Spirit::Premise => StableSpirit::Premise,
            Spirit::StringPrem { initial } => StableSpirit::StringPrem {
                initial: initial.clone(),
            },
            Spirit::ConceptPrem { load } => StableSpirit::ConceptPrem { load: *load },
            Spirit::BridPrem => StableSpirit::BridPrem,
            Spirit::RequesterPrem => StableSpirit::RequesterPrem,
        };
        Self {
            name: def.name.clone(),
            spirit,
        }
    }
}

/// Collects definitions and functors, then validates them as a whole.
#[derive(Default)]
pub struct RegistryBuilder {
    definitions: Vec<Definition>,
    functors: Vec<(ConceptId, RegisteredFunctor)>,
    circle: Option<(ConceptId, ConceptId)>,
}

impl RegistryBuilder {
    pub fn define(mut self, cid: ConceptId, name: &str, spirit: Spirit) -> Self {
        self.definitions.push(Definition {
            cid,
            ver: 0,
            name: name.to_string(),
            spirit,
        });
        self
    }

    pub fn define_version(mut self, cid: ConceptId, ver: Version, name: &str, spirit: Spirit) -> Self {
        self.definitions.push(Definition {
            cid,
            ver,
            name: name.to_string(),
            spirit,
        });
        self
    }

    pub fn breed(self, cid: ConceptId, name: &str, seed: ConceptId, ins: Vec<ConceptId>) -> Self {
        self.define(
            cid,
            name,
            Spirit::Breed {
                seed,
                ins,
                outs: Vec::new(),
                timer: None,
            },
        )
    }

    pub fn neuron(self, cid: ConceptId, name: &str, activation: impl Activation + 'static) -> Self {
        self.define(
            cid,
            name,
            Spirit::Neuron {
                activation: Arc::new(activation),
            },
        )
    }

    pub fn action(self, cid: ConceptId, name: &str, functor: ConceptId, args: Vec<ConceptId>) -> Self {
        self.define(cid, name, Spirit::Action { functor, args })
    }

    pub fn premise(self, cid: ConceptId, name: &str) -> Self {
        self.define(cid, name, Spirit::Premise)
    }

    pub fn string_premise(self, cid: ConceptId, name: &str, initial: &str) -> Self {
        self.define(
            cid,
            name,
            Spirit::StringPrem {
                initial: initial.to_string(),
            },
        )
    }

    pub fn concept_premise(self, cid: ConceptId, name: &str, load: ConceptId) -> Self {
        self.define(cid, name, Spirit::ConceptPrem { load })
    }

    pub fn brid_premise(self, cid: ConceptId, name: &str) -> Self {
        self.define(cid, name, Spirit::BridPrem)
    }

    pub fn requester_premise(self, cid: ConceptId, name: &str) -> Self {
        self.define(cid, name, Spirit::RequesterPrem)
    }

    /// Register a static functor. Its id must lie below the dynamic range.
    pub fn functor(mut self, id: ConceptId, name: &str, functor: impl Functor + 'static) -> Self {
        self.functors.push((
            id,
            RegisteredFunctor {
                name: name.to_string(),
                functor: Arc::new(functor),
            },
        ));
        self
    }

    /// Breed used for circles and the premise their requester is injected into.
    pub fn circle(mut self, breed: ConceptId, requester_premise: ConceptId) -> Self {
        self.circle = Some((breed, requester_premise));
        self
    }

    pub fn build(self) -> Result<ConceptRegistry, RegistryError> {
        let mut definitions: HashMap<ConceptId, Arc<Definition>> = HashMap::new();
        for def in self.definitions {
            if !(MIN_DYNAMIC_CID..=MAX_DYNAMIC_CID).contains(&def.cid) {
                return Err(RegistryError::OutOfDynamicRange(def.cid));
            }
            if definitions.contains_key(&def.cid) {
                return Err(RegistryError::Duplicate(def.cid));
            }
            definitions.insert(def.cid, Arc::new(def));
        }

        let mut functors: HashMap<ConceptId, RegisteredFunctor> = HashMap::new();
        for (id, functor) in self.functors {
            if id >= MIN_DYNAMIC_CID {
                return Err(RegistryError::FunctorInDynamicRange(id));
            }
            if functors.insert(id, functor).is_some() {
                return Err(RegistryError::Duplicate(id));
            }
        }

        for def in definitions.values() {
            validate(def, &definitions, &functors)?;
        }

        let (circle_breed, requester_premise) = self.circle.ok_or(RegistryError::MissingCircle)?;
        expect_kind(&definitions, 0, circle_breed, ConceptKind::Breed)?;
        expect_kind(&definitions, circle_breed, requester_premise, ConceptKind::RequesterPrem)?;

        debug!(
            definitions = definitions.len(),
            functors = functors.len(),
            "concept registry built"
        );

        Ok(ConceptRegistry {
            definitions,
            functors,
            circle_breed,
            requester_premise,
        })
    }
}

fn lookup<'a>(
    definitions: &'a HashMap<ConceptId, Arc<Definition>>,
    referrer: ConceptId,
    cid: ConceptId,
) -> Result<&'a Arc<Definition>, RegistryError> {
    definitions.get(&cid).ok_or(RegistryError::Dangling {
        referrer,
        missing: cid,
    })
}

fn expect_kind(
    definitions: &HashMap<ConceptId, Arc<Definition>>,
    referrer: ConceptId,
    cid: ConceptId,
    expected: ConceptKind,
) -> Result<(), RegistryError> {
    let found = lookup(definitions, referrer, cid)?.kind();
    if found != expected {
        return Err(RegistryError::WrongKind {
            cid,
            expected,
            found,
        });
    }
    Ok(())
}

fn validate(
    def: &Definition,
    definitions: &HashMap<ConceptId, Arc<Definition>>,
    functors: &HashMap<ConceptId, RegisteredFunctor>,
) -> Result<(), RegistryError> {
    match &def.spirit {
        Spirit::Breed {
            seed,
            ins,
            outs,
            timer,
        } => {
            expect_kind(definitions, def.cid, *seed, ConceptKind::Neuron)?;
            for cid in ins.iter().chain(outs) {
                lookup(definitions, def.cid, *cid)?;
            }
            if let Some(timer) = timer {
                expect_kind(definitions, def.cid, *timer, ConceptKind::Premise)?;
            }
        }
        Spirit::Action { functor, args } => {
            if !functors.contains_key(functor) {
                return Err(RegistryError::UnknownFunctor {
                    action: def.cid,
                    functor: *functor,
                });
            }
            for cid in args {
                lookup(definitions, def.cid, *cid)?;
            }
        }
        Spirit::ConceptPrem { load } => {
            if lookup(definitions, def.cid, *load)?.kind() == ConceptKind::ConceptPrem {
                return Err(RegistryError::NestedWrapper(def.cid));
            }
        }
        Spirit::Neuron { .. }
        | Spirit::Premise
        | Spirit::StringPrem { .. }
        | Spirit::BridPrem
        | Spirit::RequesterPrem => {}
    }
    Ok(())
}
