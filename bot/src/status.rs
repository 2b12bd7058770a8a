// bot/src/status.rs
// Running summary folded from the event stream.

use ethers::types::{H256, U64};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::events::{Event, EventContext, EventKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindTally {
    pub ok: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStatus {
    pub tallies: BTreeMap<EventKind, KindTally>,
    pub last_block: Option<U64>,
    pub last_trx: Option<H256>,
    pub last_error: Option<String>,
    /// Opportunities reported by the latest discovery.
    pub pending_conversions: usize,
    pub conversions_executed: u64,
}

impl RunStatus {
    pub fn apply(&mut self, event: &Event) {
        let tally = self.tallies.entry(event.kind()).or_default();
        if event.is_error() {
            tally.failed += 1;
            self.last_error = event.error.as_ref().map(|e| format!("{}: {e}", event.kind()));
        } else {
            tally.ok += 1;
        }
        if let Some(block) = event.block_number {
            self.last_block = Some(self.last_block.map_or(block, |prev| prev.max(block)));
        }
        if let Some(trx) = event.trx {
            self.last_trx = Some(trx);
        }
        match &event.context {
            EventContext::PotentialConversions(ctx) => self.pending_conversions = ctx.results.len(),
            EventContext::Arbitrage(_) if event.trx.is_some() && !event.is_error() => {
                self.conversions_executed += 1;
            }
            _ => {}
        }
    }

    pub fn fold<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut status = Self::default();
        for event in events {
            status.apply(event);
        }
        status
    }

    pub fn tally(&self, kind: EventKind) -> KindTally {
        self.tallies.get(&kind).copied().unwrap_or_default()
    }
}
