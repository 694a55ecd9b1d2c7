//! Addressing: value types naming a pod and a branch within it.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::MailboxClosed;
use crate::mailbox::ActorRef;
use crate::messages::{BranchPayload, InterBranchMessage, PodMsg, RequesterMsg};

/// Index of a pod in the pool.
pub type PodId = usize;

/// Branch identifier, unique among the live branches of one pod.
pub type BranchId = i32;

/// Mailbox of the external actor that asked for a circle.
pub type RequesterRef = ActorRef<RequesterMsg>;

/// Reference to a running pod.
#[derive(Clone)]
pub struct PodRef {
    pid: PodId,
    mailbox: ActorRef<PodMsg>,
}

impl PodRef {
    pub fn new(pid: PodId, mailbox: ActorRef<PodMsg>) -> Self {
        Self { pid, mailbox }
    }

    pub fn pid(&self) -> PodId {
        self.pid
    }

    pub fn mailbox(&self) -> &ActorRef<PodMsg> {
        &self.mailbox
    }

    pub fn send(&self, msg: PodMsg) -> Result<(), MailboxClosed> {
        self.mailbox.send(msg)
    }
}

impl PartialEq for PodRef {
    fn eq(&self, other: &Self) -> bool {
        self.pid == other.pid
    }
}

impl Eq for PodRef {}

impl Hash for PodRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pid.hash(state);
    }
}

impl fmt::Debug for PodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pod_{}", self.pid)
    }
}

impl fmt::Display for PodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pod_{}", self.pid)
    }
}

/// Full address of a branch: its pod plus its id inside that pod.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Brid {
    pub pod: PodRef,
    pub bid: BranchId,
}

impl Brid {
    pub fn new(pod: PodRef, bid: BranchId) -> Self {
        Self { pod, bid }
    }

    /// Deliver a payload to this branch through its pod.
    pub fn send(&self, payload: BranchPayload) -> Result<(), MailboxClosed> {
        self.pod.send(PodMsg::Branch(InterBranchMessage {
            dest: self.bid,
            payload,
        }))
    }
}

impl fmt::Display for Brid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.pod, self.bid)
    }
}
