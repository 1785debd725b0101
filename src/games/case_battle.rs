//! Weighted ticket draws for case battles.
//!
//! Item weights (percentages summing to 100) partition the integer ticket
//! domain `[0, 100_000)` into contiguous ranges. Range widths come from
//! `ceil(weight / 100 * 100_000)`; because accumulated ceilings can overrun
//! the domain, every range end is clamped to the domain boundary and the
//! final item's range always extends to it. The domain is therefore covered
//! exactly once: no gaps, no overlaps.

use crate::errors::{EngineError, EngineResult};
use crate::money::Amount;
use crate::seed::derive_value;
use serde::{Deserialize, Serialize};

/// Size of the ticket domain. Tickets are integers in `[0, TICKET_DOMAIN)`.
pub const TICKET_DOMAIN: u64 = 100_000;

/// Tolerance for the weight-sum check. Weights are percentages.
const WEIGHT_SUM_EPSILON: f64 = 1e-6;

/// One item a ticket can land on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedItem {
    pub name: String,
    /// Drop chance as a percentage of 100.
    pub weight: f64,
    /// Item value credited to the drawing participant, minor units.
    pub value: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TicketRange {
    start: u64,
    /// Exclusive.
    end: u64,
}

/// A validated, immutable partition of the ticket domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketTable {
    items: Vec<WeightedItem>,
    ranges: Vec<TicketRange>,
}

/// The result of one draw against a [`TicketTable`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketDraw {
    pub ticket: u64,
    pub item_index: usize,
    pub value: Amount,
}

impl TicketTable {
    /// Validate weights and build the range partition. Malformed input
    /// (empty list, non-finite or non-positive weights, sum away from 100)
    /// is rejected here so it can never reach a live draw.
    pub fn new(items: Vec<WeightedItem>) -> EngineResult<Self> {
        if items.is_empty() {
            return Err(EngineError::MalformedOutcomeInput(
                "ticket table requires at least one item".to_string(),
            ));
        }

        for item in &items {
            if !item.weight.is_finite() || item.weight <= 0.0 {
                return Err(EngineError::MalformedOutcomeInput(format!(
                    "item '{}' has invalid weight {}",
                    item.name, item.weight
                )));
            }
        }

        let total: f64 = items.iter().map(|i| i.weight).sum();
        if (total - 100.0).abs() > WEIGHT_SUM_EPSILON {
            return Err(EngineError::MalformedOutcomeInput(format!(
                "item weights sum to {}, expected 100",
                total
            )));
        }

        let mut ranges = Vec::with_capacity(items.len());
        let mut start = 0u64;
        for (i, item) in items.iter().enumerate() {
            let width = (item.weight / 100.0 * TICKET_DOMAIN as f64).ceil() as u64;
            let end = if i == items.len() - 1 {
                TICKET_DOMAIN
            } else {
                (start + width).min(TICKET_DOMAIN)
            };
            ranges.push(TicketRange { start, end });
            start = end;
        }

        Ok(Self { items, ranges })
    }

    pub fn items(&self) -> &[WeightedItem] {
        &self.items
    }

    /// Map a ticket to the item whose range contains it.
    pub fn resolve(&self, ticket: u64) -> EngineResult<usize> {
        if ticket >= TICKET_DOMAIN {
            return Err(EngineError::MalformedOutcomeInput(format!(
                "ticket {} outside domain {}",
                ticket, TICKET_DOMAIN
            )));
        }
        // Ranges are contiguous and sorted; binary search on start.
        let idx = match self
            .ranges
            .binary_search_by(|r| r.start.cmp(&ticket))
        {
            Ok(exact) => exact,
            Err(insertion) => insertion - 1,
        };
        // Clamped empty ranges share a start with their successor; walk
        // forward to the range that actually contains the ticket.
        let mut idx = idx;
        while self.ranges[idx].end <= ticket {
            idx += 1;
        }
        Ok(idx)
    }

    /// Draw one ticket deterministically from the committed seed.
    pub fn draw(&self, hybrid_seed: &str, nonce: u64) -> EngineResult<TicketDraw> {
        let ticket = derive_value(hybrid_seed, nonce, TICKET_DOMAIN);
        let item_index = self.resolve(ticket)?;
        Ok(TicketDraw {
            ticket,
            item_index,
            value: self.items[item_index].value,
        })
    }
}
