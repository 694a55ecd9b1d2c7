//! Sample topology.
//!
//! The circle reports its address to the console and spawns an echo child
//! seeded with a greeting, then waits. Each line of text delivered to the
//! circle is echoed back to the console. The echo child logs its greeting
//! whenever its pod reports an idle tick.

use attention_kernel::functors::{LOG_CONCEPT, NOTIFY_REQUESTER, SEND_BRANCH_ADDRESS};
use attention_kernel::{
    Branch, ConceptId, ConceptRegistry, Effect, RegistryError, Spirit, MIN_DYNAMIC_CID,
};

pub const CIRCLE: ConceptId = MIN_DYNAMIC_CID;
const CIRCLE_SEED: ConceptId = MIN_DYNAMIC_CID + 1;
pub const CONSOLE: ConceptId = MIN_DYNAMIC_CID + 2;
const STARTED: ConceptId = MIN_DYNAMIC_CID + 3;
/// String premise receiving console lines.
pub const LINE: ConceptId = MIN_DYNAMIC_CID + 4;
const SEND_ADDRESS: ConceptId = MIN_DYNAMIC_CID + 5;
const ECHO_LINE: ConceptId = MIN_DYNAMIC_CID + 6;

const ECHO: ConceptId = MIN_DYNAMIC_CID + 10;
const ECHO_SEED: ConceptId = MIN_DYNAMIC_CID + 11;
const GREETING: ConceptId = MIN_DYNAMIC_CID + 12;
const ECHO_TIMER: ConceptId = MIN_DYNAMIC_CID + 13;
const LOG_GREETING: ConceptId = MIN_DYNAMIC_CID + 14;

/// Read a premise's activation and switch it off.
fn take(branch: &mut Branch, premise: ConceptId) -> bool {
    match branch.get(premise) {
        Ok(live) => {
            let active = live.is_active();
            live.anactivate();
            active
        }
        Err(_) => false,
    }
}

fn circle_seed(branch: &mut Branch, _stem: ConceptId) -> Effect {
    let started = branch.get(STARTED).map(|p| p.is_active()).unwrap_or(true);
    if !started {
        if let Ok(premise) = branch.get(STARTED) {
            premise.activate();
        }
        return Effect::yield_after(vec![SEND_ADDRESS]).spawning(vec![ECHO]);
    }

    if take(branch, LINE) {
        Effect::yield_after(vec![ECHO_LINE])
    } else {
        Effect::yield_after(vec![])
    }
}

fn echo_seed(branch: &mut Branch, _stem: ConceptId) -> Effect {
    if take(branch, ECHO_TIMER) {
        Effect::yield_after(vec![LOG_GREETING])
    } else {
        Effect::yield_after(vec![])
    }
}

pub fn build(greeting: &str) -> Result<ConceptRegistry, RegistryError> {
    ConceptRegistry::builder()
        .with_builtin_functors()
        // circle
        .breed(CIRCLE, "circle", CIRCLE_SEED, vec![])
        .neuron(CIRCLE_SEED, "circle_seed", circle_seed)
        .requester_premise(CONSOLE, "console_prem")
        .premise(STARTED, "started_prem")
        .string_premise(LINE, "console_line_strprem", "")
        .action(SEND_ADDRESS, "send_address_act", SEND_BRANCH_ADDRESS, vec![CONSOLE])
        .action(ECHO_LINE, "echo_line_act", NOTIFY_REQUESTER, vec![CONSOLE, LINE])
        // echo child
        .define(
            ECHO,
            "echo",
            Spirit::Breed {
                seed: ECHO_SEED,
                ins: vec![GREETING],
                outs: vec![],
                timer: Some(ECHO_TIMER),
            },
        )
        .neuron(ECHO_SEED, "echo_seed", echo_seed)
        .string_premise(GREETING, "greeting_strprem", greeting)
        .premise(ECHO_TIMER, "echo_timer_prem")
        .action(LOG_GREETING, "log_greeting_act", LOG_CONCEPT, vec![GREETING])
        .circle(CIRCLE, CONSOLE)
        .build()
}
