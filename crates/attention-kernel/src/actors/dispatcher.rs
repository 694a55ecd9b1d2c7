//! Dispatcher: entry point for circle requests and global teardown.

use tracing::{debug, info, warn};

use crate::mailbox::{Actor, ActorRef, Handled};
use crate::messages::{DispatcherMsg, PodpoolMsg, RequesterMsg};

/// Relays circle requests to the podpool and completions back to requesters.
///
/// Holds no retry logic: contention is the podpool's business.
pub struct Dispatcher {
    podpool: ActorRef<PodpoolMsg>,
    requested: u64,
    created: u64,
    failed: u64,
}

impl Dispatcher {
    pub fn new(podpool: ActorRef<PodpoolMsg>) -> Self {
        Self {
            podpool,
            requested: 0,
            created: 0,
            failed: 0,
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("requested", &self.requested)
            .field("created", &self.created)
            .field("failed", &self.failed)
            .finish()
    }
}

impl Actor for Dispatcher {
    type Msg = DispatcherMsg;

    fn name(&self) -> &str {
        "dispatcher"
    }

    fn handle(&mut self, msg: DispatcherMsg) -> Handled {
        match msg {
            DispatcherMsg::CreateCircle(request) => {
                self.requested += 1;
                debug!(requester = request.requester.name(), "circle requested");
                if let Err(err) = self.podpool.send(PodpoolMsg::Allocate(request.into())) {
                    warn!(error = %err, "circle request not delivered");
                }
            }
            DispatcherMsg::CircleCreated(created) => {
                self.created += 1;
                info!(
                    requester = created.requester.name(),
                    circle = %created.circle,
                    "circle created"
                );
                let reply = RequesterMsg::CircleCreated {
                    circle: created.circle,
                };
                if let Err(err) = created.requester.send_priority(reply) {
                    debug!(error = %err, "requester gone before its circle arrived");
                }
            }
            DispatcherMsg::CircleFailed { requester, reason } => {
                self.failed += 1;
                if let Err(err) = requester.send_priority(RequesterMsg::CircleFailed { reason }) {
                    debug!(error = %err, "requester gone before its failure arrived");
                }
            }
            DispatcherMsg::Teardown => {
                info!(
                    requested = self.requested,
                    created = self.created,
                    failed = self.failed,
                    "dispatcher relaying teardown"
                );
                if let Err(err) = self.podpool.send(PodpoolMsg::Teardown) {
                    warn!(error = %err, "teardown not delivered to podpool");
                }
                return Handled::Stop;
            }
        }
        Handled::Consumed
    }
}
