use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{Item, ItemId, MediaType, Tier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPurpose {
    /// A newly classified item.
    New,
    /// A placed item moved to another tier.
    Retier,
    /// A placed item lifted by an ad-hoc outcome, searching for how much higher it belongs.
    Refine,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Searching {
        low: usize,
        high: usize,
        opponent: ItemId,
    },
    Converged {
        position: usize,
        rank: u32,
    },
}

/// Next thing a session needs, computed against current peer positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Compare { low: usize, high: usize, mid: usize },
    Place { position: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertionSession {
    pub id: String,
    pub item_id: ItemId,
    pub tier: Tier,
    pub media_type: MediaType,
    pub purpose: SessionPurpose,
    /// The item being placed, held here until convergence. `None` for
    /// refinement sessions, whose subject stays placed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<Item>,
    #[serde(default)]
    pub better: Vec<ItemId>,
    #[serde(default)]
    pub worse: Vec<ItemId>,
    #[serde(default)]
    pub comparisons: u32,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
}

impl InsertionSession {
    pub fn for_pending(id: String, item: Item, purpose: SessionPurpose) -> Self {
        Self {
            id,
            item_id: item.id.clone(),
            tier: item.tier,
            media_type: item.media_type,
            purpose,
            pending: Some(item),
            better: Vec::new(),
            worse: Vec::new(),
            comparisons: 0,
            state: SessionState::Searching {
                low: 0,
                high: 0,
                opponent: ItemId::new(),
            },
            created_at: Utc::now(),
        }
    }

    /// Refinement of a placed item, seeded with the peers already known to
    /// beat it and to lose to it.
    pub fn for_refinement(id: String, item: &Item, better: Vec<ItemId>, worse: Vec<ItemId>) -> Self {
        Self {
            id,
            item_id: item.id.clone(),
            tier: item.tier,
            media_type: item.media_type,
            purpose: SessionPurpose::Refine,
            pending: None,
            better,
            worse,
            comparisons: 0,
            state: SessionState::Searching {
                low: 0,
                high: 0,
                opponent: ItemId::new(),
            },
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Searching { .. })
    }

    pub fn opponent(&self) -> Option<&str> {
        match &self.state {
            SessionState::Searching { opponent, .. } => Some(opponent),
            SessionState::Converged { .. } => None,
        }
    }

    /// Insertion bounds against `peers` (best first, subject excluded).
    pub fn bounds(&self, peers: &[&Item]) -> (usize, usize) {
        let (low, high) = window(peers, &self.better, &self.worse);
        if low > high {
            warn!(
                session = %self.id,
                low,
                high,
                "insertion bounds crossed after reordering; clamping"
            );
            return (low, low);
        }
        (low, high)
    }

    pub fn next_step(&self, peers: &[&Item]) -> Step {
        let (low, high) = self.bounds(peers);
        if low == high {
            Step::Place { position: low }
        } else {
            Step::Compare {
                low,
                high,
                mid: (low + high) / 2,
            }
        }
    }

    /// Remember the result of comparing the subject against `opponent`.
    pub fn record(&mut self, opponent: &str, subject_won: bool) {
        self.better.retain(|id| id != opponent);
        self.worse.retain(|id| id != opponent);
        if subject_won {
            self.worse.push(opponent.to_string());
        } else {
            self.better.push(opponent.to_string());
        }
        self.comparisons += 1;
    }
}

/// Positions among `peers` that sit below every id in `better` and above
/// every id in `worse`, as `low..=high`. The bounds cross (`low > high`) when
/// no position satisfies both.
pub fn window(peers: &[&Item], better: &[ItemId], worse: &[ItemId]) -> (usize, usize) {
    let mut low = 0;
    let mut high = peers.len();
    for (i, peer) in peers.iter().enumerate() {
        if better.contains(&peer.id) {
            low = low.max(i + 1);
        }
        if worse.contains(&peer.id) {
            high = high.min(i);
        }
    }
    (low, high)
}
