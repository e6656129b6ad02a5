use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::insertion::InsertionSession;

pub type ItemId = String;

/// Qualitative bucket. Variant order is "better first": `Good < Medium < Bad`,
/// which is also the order of the rank bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Good,
    Medium,
    Bad,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Good, Tier::Medium, Tier::Bad];

    /// Score band as `(bottom, top)`.
    pub fn band(self) -> (f64, f64) {
        match self {
            Tier::Good => (7.0, 10.0),
            Tier::Medium => (4.0, 6.9),
            Tier::Bad => (1.0, 3.9),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Good => write!(f, "good"),
            Tier::Medium => write!(f, "medium"),
            Tier::Bad => write!(f, "bad"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "good" => Ok(Tier::Good),
            "medium" => Ok(Tier::Medium),
            "bad" => Ok(Tier::Bad),
            _ => Err(format!("unknown tier: {s} (valid: good, medium, bad)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Movie,
    Show,
}

impl MediaType {
    pub const ALL: [MediaType; 2] = [MediaType::Movie, MediaType::Show];
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Movie => write!(f, "movie"),
            MediaType::Show => write!(f, "show"),
        }
    }
}

impl std::str::FromStr for MediaType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "movie" => Ok(MediaType::Movie),
            "show" | "tv" => Ok(MediaType::Show),
            _ => Err(format!("unknown media type: {s} (valid: movie, show)")),
        }
    }
}

/// Catalog attributes copied onto an item. Never examined by ranking logic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub external_key: String,
    pub media_type: MediaType,
    pub tier: Tier,
    /// 1-based position in the whole collection; 0 while the item is still
    /// being placed by an insertion session.
    pub rank: u32,
    #[serde(default)]
    pub comparison_count: u32,
    #[serde(flatten)]
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One resolved comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub winner: ItemId,
    pub loser: ItemId,
    pub at: DateTime<Utc>,
}

impl Outcome {
    pub fn involves(&self, id: &str) -> bool {
        self.winner == id || self.loser == id
    }

    pub fn same_pair(&self, a: &str, b: &str) -> bool {
        (self.winner == a && self.loser == b) || (self.winner == b && self.loser == a)
    }
}

/// A user's collection: placed items, the outcome log, open insertion
/// sessions and every id ever retired.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Collection {
    pub items: BTreeMap<ItemId, Item>,
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
    #[serde(default)]
    pub sessions: BTreeMap<String, InsertionSession>,
    #[serde(default)]
    pub retired: BTreeSet<ItemId>,
}

impl Collection {
    /// True if the id belongs to a placed item, a pending item, a session, or
    /// was used before.
    pub fn id_taken(&self, id: &str) -> bool {
        self.items.contains_key(id)
            || self.retired.contains(id)
            || self.sessions.contains_key(id)
            || self.sessions.values().any(|s| s.item_id == id)
    }

    pub fn has_external_key(&self, key: &str) -> bool {
        self.items.values().any(|i| i.external_key == key)
            || self
                .sessions
                .values()
                .filter_map(|s| s.pending.as_ref())
                .any(|i| i.external_key == key)
    }

    /// Record an outcome, dropping any earlier outcome for the same pair so
    /// the log never holds both directions.
    pub fn log_outcome(&mut self, winner: &str, loser: &str) {
        self.outcomes.retain(|o| !o.same_pair(winner, loser));
        self.outcomes.push(Outcome {
            winner: winner.to_string(),
            loser: loser.to_string(),
            at: Utc::now(),
        });
    }

    pub fn purge_outcomes(&mut self, id: &str) {
        self.outcomes.retain(|o| !o.involves(id));
    }
}
