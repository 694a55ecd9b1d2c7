//! Message catalog for the dispatcher, podpool, pods and requesters.
//!
//! Everything that crosses an actor boundary is a value: addresses, deep
//! copies of live concepts, and plain data. Nothing here points into another
//! actor's live state.

use tokio::sync::oneshot;

use crate::address::{Brid, BranchId, PodId, RequesterRef};
use crate::concept::{ConceptId, LiveConcept};

/// Ask for a new root branch (circle) on behalf of an external requester.
#[derive(Debug, Clone)]
pub struct CreateCircleRequest {
    /// Where the new circle's address is reported
    pub requester: RequesterRef,
}

/// A circle was created. Travels pod → podpool → dispatcher → requester.
#[derive(Debug, Clone)]
pub struct CircleCreated {
    pub requester: RequesterRef,
    /// Address of the new circle
    pub circle: Brid,
}

/// A branch asks for a child branch.
#[derive(Debug)]
pub struct CreateChildRequest {
    /// Breed of the child
    pub breed: ConceptId,
    /// Deep copies of the parent's live instances for the breed's inputs
    pub inputs: Vec<LiveConcept>,
    pub parent: Brid,
}

/// A child branch was created. Forwarded by the podpool to the parent.
#[derive(Debug, Clone)]
pub struct ChildCreated {
    pub parent: Brid,
    pub child: Brid,
}

/// Either kind of branch creation handled by the podpool.
#[derive(Debug)]
pub enum CreationRequest {
    Circle(CreateCircleRequest),
    Child(CreateChildRequest),
}

/// Message addressed to one branch hosted by the receiving pod.
#[derive(Debug)]
pub struct InterBranchMessage {
    /// Branch id within the pod
    pub dest: BranchId,
    pub payload: BranchPayload,
}

/// What a branch can receive from the outside.
#[derive(Debug)]
pub enum BranchPayload {
    /// Deep copies of concepts sent by another branch. They overwrite the
    /// receiver's instances with the same ids, then reasoning resumes.
    Transport {
        instances: Vec<LiveConcept>,
        sender: Brid,
    },
    /// Text for a string premise of the branch (e.g. a user line).
    Text { premise: ConceptId, text: String },
    /// A child requested by this branch now exists.
    ChildCreated { child: Brid },
    /// Tear this branch down and forward the teardown to its children.
    Terminate,
}

/// Result of a creation, reported by a pod so the podpool releases it.
#[derive(Debug)]
pub enum PodOutcome {
    Circle(CircleCreated),
    Child(ChildCreated),
    Failed {
        /// Present when the failed request was for a circle
        requester: Option<RequesterRef>,
        reason: String,
    },
}

/// Report from a pod that finished a creation request.
#[derive(Debug)]
pub struct PodReport {
    pub pid: PodId,
    /// Number of branches the pod hosts after the creation
    pub load: usize,
    pub outcome: PodOutcome,
}

/// Snapshot of the podpool's allocation state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub size: usize,
    /// Free pods in allocation order: (load, pid)
    pub free: Vec<(usize, PodId)>,
    pub borrowed: usize,
    /// Creation requests handed to pods
    pub forwarded: u64,
    /// Releases processed
    pub released: u64,
    /// Allocation attempts deferred because every pod was borrowed
    pub retries: u64,
    /// Saturation warnings logged; one per stretch of saturation
    pub overflow_warnings: u64,
}

/// Snapshot of a pod's hosted branches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodStats {
    pub pid: PodId,
    pub load: usize,
    pub branches: Vec<BranchId>,
}

// ============================================================================
// Actor mailboxes
// ============================================================================

#[derive(Debug)]
pub enum DispatcherMsg {
    CreateCircle(CreateCircleRequest),
    CircleCreated(CircleCreated),
    CircleFailed {
        requester: RequesterRef,
        reason: String,
    },
    Teardown,
}

#[derive(Debug)]
pub enum PodpoolMsg {
    Allocate(CreationRequest),
    Release(PodReport),
    /// A pod's load changed outside a creation (branch removed)
    LoadChanged { pid: PodId, load: usize },
    Stats(oneshot::Sender<PoolStats>),
    Teardown,
}

#[derive(Debug)]
pub enum PodMsg {
    Create(CreationRequest),
    Branch(InterBranchMessage),
    Inspect(oneshot::Sender<PodStats>),
    Teardown,
}

/// What an external requester receives from the kernel.
#[derive(Debug)]
pub enum RequesterMsg {
    CircleCreated { circle: Brid },
    CircleFailed { reason: String },
    /// A branch reporting its own address
    BranchAddress { brid: Brid },
    /// Free-form text sent by a branch
    Notice { from: Brid, text: String },
}

impl From<CreateCircleRequest> for CreationRequest {
    fn from(req: CreateCircleRequest) -> Self {
        CreationRequest::Circle(req)
    }
}

impl From<CreateChildRequest> for CreationRequest {
    fn from(req: CreateChildRequest) -> Self {
        CreationRequest::Child(req)
    }
}
