//! Run-to-completion mailboxes for the kernel's actors.
//!
//! Every actor owns one [`Mailbox`] with two lanes:
//!
//! ```text
//! send_priority ──► [priority lane] ──┐
//!                                     ├─ biased select ─► handle() / idle()
//! send          ──► [normal lane]  ───┘        ▲
//!                                              └─ timeout ─► Received::Idle
//! ```
//!
//! Whenever both lanes hold messages, the priority lane is drained first.
//! Within a lane, delivery is FIFO. A receive with a configured wait returns
//! [`Received::Idle`] when nothing arrives in time, so an actor can do
//! periodic bookkeeping without its own timer task.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::MailboxClosed;

/// Sending side of an actor's mailbox. Cheap to clone; a value type.
pub struct ActorRef<M> {
    name: Arc<str>,
    normal: mpsc::UnboundedSender<M>,
    priority: mpsc::UnboundedSender<M>,
}

impl<M> Clone for ActorRef<M> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            normal: self.normal.clone(),
            priority: self.priority.clone(),
        }
    }
}

impl<M> fmt::Debug for ActorRef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRef").field("name", &self.name).finish()
    }
}

impl<M> ActorRef<M> {
    /// Name of the actor behind this mailbox.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue on the normal lane.
    pub fn send(&self, msg: M) -> Result<(), MailboxClosed> {
        self.normal
            .send(msg)
            .map_err(|_| MailboxClosed(self.name.to_string()))
    }

    /// Enqueue on the priority lane, ahead of every pending normal message.
    pub fn send_priority(&self, msg: M) -> Result<(), MailboxClosed> {
        self.priority
            .send(msg)
            .map_err(|_| MailboxClosed(self.name.to_string()))
    }

    /// Enqueue on the normal lane; a closed mailbox hands the message back.
    pub fn send_or_return(&self, msg: M) -> Result<(), M> {
        self.normal
            .send(msg)
            .map_err(|mpsc::error::SendError(msg)| msg)
    }

    /// True once the receiving actor has dropped its mailbox.
    pub fn is_closed(&self) -> bool {
        self.normal.is_closed()
    }
}

/// Receiving side of an actor's mailbox.
pub struct Mailbox<M> {
    name: Arc<str>,
    normal: mpsc::UnboundedReceiver<M>,
    priority: mpsc::UnboundedReceiver<M>,
}

/// Outcome of a single [`Mailbox::recv`].
#[derive(Debug)]
pub enum Received<M> {
    Message(M),
    /// The wait elapsed with both lanes empty.
    Idle,
    /// Every sender is gone and both lanes are drained.
    Closed,
}

/// Create a connected mailbox pair.
pub fn mailbox<M>(name: impl Into<String>) -> (ActorRef<M>, Mailbox<M>) {
    let name: Arc<str> = Arc::from(name.into());
    let (normal_tx, normal_rx) = mpsc::unbounded_channel();
    let (priority_tx, priority_rx) = mpsc::unbounded_channel();
    (
        ActorRef {
            name: Arc::clone(&name),
            normal: normal_tx,
            priority: priority_tx,
        },
        Mailbox {
            name,
            normal: normal_rx,
            priority: priority_rx,
        },
    )
}

impl<M> Mailbox<M> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the next message, priority lane first.
    ///
    /// With `wait == None` this blocks until a message arrives or the mailbox
    /// closes.
    pub async fn recv(&mut self, wait: Option<Duration>) -> Received<M> {
        let next = async {
            tokio::select! {
                biased;
                Some(msg) = self.priority.recv() => Some(msg),
                msg = self.normal.recv() => msg,
            }
        };

        match wait {
            Some(wait) => match tokio::time::timeout(wait, next).await {
                Ok(Some(msg)) => Received::Message(msg),
                Ok(None) => Received::Closed,
                Err(_) => Received::Idle,
            },
            None => match next.await {
                Some(msg) => Received::Message(msg),
                None => Received::Closed,
            },
        }
    }

    /// Take a message without waiting, priority lane first.
    pub fn try_recv(&mut self) -> Option<M> {
        self.priority
            .try_recv()
            .ok()
            .or_else(|| self.normal.try_recv().ok())
    }
}

/// How an actor disposed of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Consumed,
    /// The actor did not recognize the message; the loop logs and drops it.
    /// The message itself is gone by then, so the actor logs any detail.
    NotConsumed,
    /// Terminal message: stop the processing loop after this one.
    Stop,
}

/// A single-threaded message processor.
pub trait Actor: Send + 'static {
    type Msg: fmt::Debug + Send + 'static;

    fn name(&self) -> &str;

    /// Bounded receive wait; `None` blocks until the next message.
    fn idle_timeout(&self) -> Option<Duration> {
        None
    }

    fn handle(&mut self, msg: Self::Msg) -> Handled;

    /// Called when the receive wait elapses with no message.
    fn idle(&mut self) -> Handled {
        Handled::Consumed
    }

    /// Called once after the loop exits.
    fn stopped(&mut self) {}
}

/// Drive an actor until it stops or its mailbox closes; returns the actor.
pub async fn run_actor<A: Actor>(mut actor: A, mut mailbox: Mailbox<A::Msg>) -> A {
    debug!(actor = actor.name(), "actor started");

    loop {
        let handled = match mailbox.recv(actor.idle_timeout()).await {
            Received::Message(msg) => {
                trace!(actor = actor.name(), ?msg, "message");
                let handled = actor.handle(msg);
                if handled == Handled::NotConsumed {
                    warn!(actor = actor.name(), "message not consumed, dropped");
                }
                handled
            }
            Received::Idle => actor.idle(),
            Received::Closed => {
                debug!(actor = actor.name(), "mailbox closed");
                break;
            }
        };

        if handled == Handled::Stop {
            break;
        }
    }

    actor.stopped();
    debug!(actor = actor.name(), "actor stopped");
    actor
}

/// Spawn an actor loop on the current Tokio runtime.
pub fn spawn_actor<A: Actor>(actor: A, mailbox: Mailbox<A::Msg>) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_actor(actor, mailbox).await;
    })
}
