//! Error types for the attention kernel.

use thiserror::Error;

use crate::address::PodId;
use crate::concept::{ConceptId, ConceptKind, Version};

/// A message could not be enqueued because the receiving actor has stopped.
#[derive(Debug, Clone, Error)]
#[error("mailbox `{0}` is closed")]
pub struct MailboxClosed(pub String);

/// Errors raised while building the concept registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("concept {0} is defined twice")]
    Duplicate(ConceptId),

    #[error("concept {0} lies outside the dynamic concept range")]
    OutOfDynamicRange(ConceptId),

    #[error("functor {0} must lie below the dynamic concept range")]
    FunctorInDynamicRange(ConceptId),

    #[error("concept {referrer} refers to undefined concept {missing}")]
    Dangling {
        referrer: ConceptId,
        missing: ConceptId,
    },

    #[error("action {action} refers to unregistered functor {functor}")]
    UnknownFunctor { action: ConceptId, functor: ConceptId },

    #[error("concept {cid} must be a {expected:?}, found {found:?}")]
    WrongKind {
        cid: ConceptId,
        expected: ConceptKind,
        found: ConceptKind,
    },

    #[error("concept premise {0} wraps another wrapper; wiring is one level deep")]
    NestedWrapper(ConceptId),

    #[error("no circle breed configured")]
    MissingCircle,
}

/// Errors raised inside a branch or while hosting one.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("concept {0} is not defined in the registry")]
    UnknownConcept(ConceptId),

    #[error("functor {0} is not registered")]
    UnknownFunctor(ConceptId),

    #[error("concept {cid} is a {found:?}, expected {expected:?}")]
    WrongKind {
        cid: ConceptId,
        expected: ConceptKind,
        found: ConceptKind,
    },

    #[error("action {action} failed: {reason}")]
    Action { action: ConceptId, reason: String },

    #[error("branch code panicked: {0}")]
    Panicked(String),

    #[error("no pod with id {0}")]
    UnknownPod(PodId),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Mailbox(#[from] MailboxClosed),
}

/// Errors raised by a concept store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("concept store is unavailable")]
    Unavailable,

    #[error("record {cid}/{ver} already exists")]
    Duplicate { cid: ConceptId, ver: Version },

    #[error("record {cid}/{ver} not found")]
    NotFound { cid: ConceptId, ver: Version },

    #[error("encoding stable data of concept {cid}")]
    Encode {
        cid: ConceptId,
        #[source]
        source: serde_json::Error,
    },
}
