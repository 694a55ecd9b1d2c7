//! Built-in static functors.
//!
//! Register them with [`RegistryBuilder::with_builtin_functors`]; action
//! concepts then refer to them by the ids below.

use anyhow::{bail, Context, Result};

use crate::branch::Branch;
use crate::concept::ConceptId;
use crate::messages::{BranchPayload, RequesterMsg};
use crate::registry::RegistryBuilder;

/// `[requester_premise]`: tell the requester this branch's address.
pub const SEND_BRANCH_ADDRESS: ConceptId = 10;

/// `[destination_brid_premise, container]`: hand a wrapper premise and its
/// load to another branch.
pub const TRANSPORT_CONCEPT: ConceptId = 11;

/// `[concept...]`: log the listed live concepts.
pub const LOG_CONCEPT: ConceptId = 12;

/// `[requester_premise, string_premise]`: send the text of a string premise
/// to the requester.
pub const NOTIFY_REQUESTER: ConceptId = 13;

fn arg(args: &[ConceptId], index: usize) -> Result<ConceptId> {
    match args.get(index) {
        Some(cid) => Ok(*cid),
        None => bail!("missing argument {} (got {})", index, args.len()),
    }
}

fn requester_of(branch: &mut Branch, premise: ConceptId) -> Result<crate::address::RequesterRef> {
    branch
        .get(premise)?
        .requester()
        .cloned()
        .with_context(|| format!("premise {premise} holds no requester"))
}

/// Sends [`RequesterMsg::BranchAddress`] with the current branch's address.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendBranchAddress;

impl crate::concept::Functor for SendBranchAddress {
    fn run(&self, branch: &mut Branch, args: &[ConceptId]) -> Result<()> {
        let requester = requester_of(branch, arg(args, 0)?)?;
        requester.send(RequesterMsg::BranchAddress {
            brid: branch.own().clone(),
        })?;
        Ok(())
    }
}

/// Moves a request container to another branch.
///
/// The local container and its load end up inactive: the request is
/// fulfilled on this side. The outgoing copy is active so the receiver
/// treats it as pending.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportConcept;

impl crate::concept::Functor for TransportConcept {
    fn run(&self, branch: &mut Branch, args: &[ConceptId]) -> Result<()> {
        let dest_premise = arg(args, 0)?;
        let container = arg(args, 1)?;

        let dest = branch
            .get(dest_premise)?
            .brid()
            .cloned()
            .with_context(|| format!("premise {dest_premise} holds no branch address"))?;

        let local = branch.get(container)?;
        local.anactivate();
        if let Some(load) = local.wired_dependency() {
            branch.get(load)?.anactivate();
        }

        let mut instances = branch.snapshot(container)?;
        if let Some(outgoing) = instances.first_mut() {
            outgoing.activate();
        }

        tracing::debug!(
            from = %branch.own(),
            to = %dest,
            container = container,
            "transporting concept"
        );
        dest.send(BranchPayload::Transport {
            instances,
            sender: branch.own().clone(),
        })?;
        Ok(())
    }
}

/// Logs every argument concept with its activation and text.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogConcept;

impl crate::concept::Functor for LogConcept {
    fn run(&self, branch: &mut Branch, args: &[ConceptId]) -> Result<()> {
        for &cid in args {
            let own = branch.own().clone();
            let live = branch.get(cid)?;
            tracing::info!(
                branch = %own,
                concept = %live,
                activation = ?live.activation(),
                text = live.text().unwrap_or_default(),
                "concept"
            );
        }
        Ok(())
    }
}

/// Sends the text of a string premise to the requester as a notice.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyRequester;

impl crate::concept::Functor for NotifyRequester {
    fn run(&self, branch: &mut Branch, args: &[ConceptId]) -> Result<()> {
        let requester = requester_of(branch, arg(args, 0)?)?;
        let premise = arg(args, 1)?;
        let text = branch
            .get(premise)?
            .text()
            .map(str::to_owned)
            .with_context(|| format!("concept {premise} is not a string premise"))?;
        requester.send(RequesterMsg::Notice {
            from: branch.own().clone(),
            text,
        })?;
        Ok(())
    }
}

impl RegistryBuilder {
    /// Register every built-in functor under its well-known id.
    pub fn with_builtin_functors(self) -> Self {
        self.functor(SEND_BRANCH_ADDRESS, "send_branch_address", SendBranchAddress)
            .functor(TRANSPORT_CONCEPT, "transport_concept", TransportConcept)
            .functor(LOG_CONCEPT, "log_concept", LogConcept)
            .functor(NOTIFY_REQUESTER, "notify_requester", NotifyRequester)
    }
}
