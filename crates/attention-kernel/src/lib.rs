//! Attention Kernel: resumable reasoning branches on a load-balanced pod pool
//!
//! A dispatcher accepts requests for root branches ("circles"), a podpool
//! hands each creation to the least-loaded free pod, and pods host branches
//! whose reasoning loop evaluates neurons, runs actions and spawns children.
//! All cross-actor traffic is by value: addresses and deep-copied concepts.

pub mod actors;
pub mod address;
pub mod branch;
pub mod concept;
pub mod config;
pub mod error;
pub mod functors;
pub mod kernel;
pub mod mailbox;
pub mod messages;
pub mod registry;
pub mod store;

pub use address::{Brid, BranchId, PodId, PodRef, RequesterRef};
pub use branch::{Branch, BranchContext, BranchSeed, Delivered, ReasoningReport};
pub use concept::{
    Activation, ConceptId, ConceptKind, Definition, Effect, FixedEffect, Functor, LiveConcept,
    NextStem, Spirit, MIN_DYNAMIC_CID,
};
pub use config::{FailurePolicy, IdlePolicy, KernelConfig, PodConfig, PoolConfig};
pub use error::{KernelError, MailboxClosed, RegistryError, StoreError};
pub use kernel::{AttentionKernel, AttentionKernelBuilder};
pub use mailbox::{mailbox, ActorRef, Mailbox, Received};
pub use messages::{BranchPayload, PodStats, PoolStats, RequesterMsg};
pub use registry::{ConceptRegistry, RegistryBuilder};
pub use store::{ConceptRecord, ConceptStore, InMemoryConceptStore};
