//! FIFO ticket issuing and the per-session track → ticket bindings.

use std::collections::VecDeque;

use indexmap::{IndexMap, IndexSet};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    monitor_config::{BindingTrigger, ExhaustedQueuePolicy},
    tracking::{TicketValue, TrackId},
};

#[derive(Debug, Clone, Default)]
pub struct TicketQueue {
    tickets: VecDeque<TicketValue>,
}

impl TicketQueue {
    pub fn new(seed: &[TicketValue]) -> Self {
        TicketQueue {
            tickets: seed.iter().copied().collect(),
        }
    }

    pub fn reseed(&mut self, seed: &[TicketValue]) {
        self.tickets.clear();
        self.tickets.extend(seed.iter().copied());
    }

    pub fn pop(&mut self) -> Option<TicketValue> {
        self.tickets.pop_front()
    }

    pub fn remaining(&self) -> usize {
        self.tickets.len()
    }
}

/// Bindings in the order they were made
pub type TrackState = IndexMap<TrackId, TicketValue>;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TicketBinding {
    pub track_id: TrackId,
    pub ticket: TicketValue,
}

pub struct TicketingSystem {
    seed: Vec<TicketValue>,
    queue: TicketQueue,
    bindings: TrackState,
    /// Tracks that have been inside a check-in zone at least once
    checked_in: IndexSet<TrackId>,
    /// Tracks that qualified for a ticket after the queue ran dry
    unticketed: IndexSet<TrackId>,
    trigger: BindingTrigger,
    exhausted_policy: ExhaustedQueuePolicy,
    invalid_ticket: TicketValue,
    issued: usize,
}

impl TicketingSystem {
    pub fn new(
        seed: &[TicketValue],
        trigger: BindingTrigger,
        exhausted_policy: ExhaustedQueuePolicy,
        invalid_ticket: TicketValue,
    ) -> Self {
        TicketingSystem {
            seed: seed.to_vec(),
            queue: TicketQueue::new(seed),
            bindings: IndexMap::new(),
            checked_in: IndexSet::new(),
            unticketed: IndexSet::new(),
            trigger,
            exhausted_policy,
            invalid_ticket,
            issued: 0,
        }
    }

    /// Forget every binding and refill the queue from the configured seed
    pub fn reset(&mut self) {
        self.queue.reseed(&self.seed);
        self.bindings.clear();
        self.checked_in.clear();
        self.unticketed.clear();
        self.issued = 0;
        debug!("Ticket queue reseeded with {:?}", self.seed);
    }

    /// Feed one observation of a track. Returns the binding if this
    /// observation created one.
    pub fn observe(
        &mut self,
        track_id: TrackId,
        in_check_in: bool,
        in_slot: bool,
    ) -> Option<TicketBinding> {
        if in_check_in {
            self.checked_in.insert(track_id);
        }
        if self.bindings.contains_key(&track_id) || self.unticketed.contains(&track_id) {
            return None;
        }
        let qualifies = match self.trigger {
            BindingTrigger::CheckInEntry => in_check_in,
            BindingTrigger::SlotAfterCheckIn => in_slot && self.checked_in.contains(&track_id),
        };
        if !qualifies {
            return None;
        }

        let ticket = match self.queue.pop() {
            Some(ticket) => {
                self.issued += 1;
                ticket
            }
            None => match self.exhausted_policy {
                ExhaustedQueuePolicy::Unticketed => {
                    warn!("Ticket queue exhausted; track {} stays unticketed", track_id);
                    self.unticketed.insert(track_id);
                    return None;
                }
                ExhaustedQueuePolicy::Fallback(ticket) => {
                    warn!(
                        "Ticket queue exhausted; track {} gets fallback ticket {}",
                        track_id, ticket
                    );
                    ticket
                }
            },
        };

        self.bindings.insert(track_id, ticket);
        info!("Assigned ticket {} to track {}", ticket, track_id);
        Some(TicketBinding { track_id, ticket })
    }

    pub fn ticket_for(&self, track_id: TrackId) -> Option<TicketValue> {
        self.bindings.get(&track_id).copied()
    }

    /// A track holding the invalid ticket while inside a slot
    pub fn is_violation(&self, track_id: TrackId, in_slot: bool) -> bool {
        in_slot && self.ticket_for(track_id) == Some(self.invalid_ticket)
    }

    pub fn bindings(&self) -> &TrackState {
        &self.bindings
    }

    pub fn tickets_remaining(&self) -> usize {
        self.queue.remaining()
    }

    /// Tickets taken from the queue this session; fallbacks are not counted
    pub fn tickets_issued(&self) -> usize {
        self.issued
    }
}
