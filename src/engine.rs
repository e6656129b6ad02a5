use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{RankError, Result};
use crate::id::{self, ITEM_PREFIX, SESSION_PREFIX};
use crate::insertion::{self, InsertionSession, SessionPurpose, SessionState, Step};
use crate::model::{Collection, Item, ItemId, MediaType, Payload, Tier};
use crate::ranking;
use crate::scoring;
use crate::selection::{self, SelectionPolicy};

/// What an ad-hoc outcome did to the order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeEffect {
    /// The order already agreed; only counters and the log changed.
    Confirmed,
    /// The winner sat directly below the loser and the two traded places.
    Swapped,
    /// The winner was lifted over the loser, landing below everything logged
    /// as beating it. `refinement` names a session that can lift it further
    /// while the log leaves room above.
    Moved {
        rank: u32,
        refinement: Option<String>,
    },
    /// An item between the two had already beaten the winner, so the loser
    /// dropped below the winner instead.
    Dropped { rank: u32 },
}

/// One already-classified entry produced by an import.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportEntry {
    pub external_key: String,
    pub tier: Tier,
    #[serde(default = "default_media_type")]
    pub media_type: MediaType,
    #[serde(flatten)]
    pub payload: Payload,
}

fn default_media_type() -> MediaType {
    MediaType::Movie
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub added: Vec<ItemId>,
    /// External keys skipped as blank or duplicate.
    pub skipped: Vec<String>,
}

pub struct Engine {
    collection: Collection,
    policy: SelectionPolicy,
}

impl Engine {
    pub fn new(collection: Collection, policy: SelectionPolicy) -> Result<Self> {
        ranking::check_invariants(&collection)?;
        Ok(Self { collection, policy })
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn into_collection(self) -> Collection {
        self.collection
    }

    pub fn items_by_rank(&self) -> Vec<&Item> {
        ranking::global_order(&self.collection)
    }

    pub fn session(&self, id: &str) -> Result<&InsertionSession> {
        self.collection
            .sessions
            .get(id)
            .ok_or_else(|| RankError::NotFound(format!("session '{id}'")))
    }

    pub fn sessions(&self) -> impl Iterator<Item = &InsertionSession> {
        self.collection.sessions.values()
    }

    /// Sessions still waiting for answers.
    pub fn active_sessions(&self) -> impl Iterator<Item = &InsertionSession> {
        self.sessions().filter(|s| s.is_active())
    }

    /// A placed item, telling apart ids that are pending or retired
    /// (`InvalidOperation`) from ids never seen (`NotFound`).
    pub fn item(&self, id: &str) -> Result<&Item> {
        match self.collection.items.get(id) {
            Some(item) => Ok(item),
            None if self.collection.id_taken(id) => Err(RankError::InvalidOperation(format!(
                "item '{id}' is not currently placed"
            ))),
            None => Err(RankError::NotFound(format!("item '{id}'"))),
        }
    }

    fn new_id(&self, prefix: &str, seed: &str) -> String {
        id::generate_id(prefix, seed, |candidate| self.collection.id_taken(candidate))
    }

    fn peers_for(&self, session: &InsertionSession) -> Vec<&Item> {
        ranking::peer_order(&self.collection, session.tier, session.media_type)
            .into_iter()
            .filter(|i| i.id != session.item_id)
            .collect()
    }

    fn prune_converged(&mut self) {
        self.collection.sessions.retain(|_, s| s.is_active());
    }

    /// Start placing a newly classified item. If its group is empty the
    /// returned session has already converged.
    pub fn classify_new_item(
        &mut self,
        external_key: &str,
        tier: Tier,
        media_type: MediaType,
        payload: Payload,
    ) -> Result<InsertionSession> {
        let external_key = external_key.trim();
        if external_key.is_empty() {
            return Err(RankError::InvalidOperation(
                "external key must not be empty".to_string(),
            ));
        }
        if self.collection.has_external_key(external_key) {
            return Err(RankError::InvalidOperation(format!(
                "'{external_key}' is already in the collection"
            )));
        }
        let now = Utc::now();
        let item = Item {
            id: self.new_id(ITEM_PREFIX, external_key),
            external_key: external_key.to_string(),
            media_type,
            tier,
            rank: 0,
            comparison_count: 0,
            payload,
            created_at: now,
            updated_at: now,
        };
        info!(id = %item.id, %tier, %media_type, title = %item.payload.title, "classified new item");
        self.begin_insertion(item, SessionPurpose::New)
    }

    fn begin_insertion(&mut self, item: Item, purpose: SessionPurpose) -> Result<InsertionSession> {
        self.prune_converged();
        let session_id = self.new_id(SESSION_PREFIX, &item.id);
        let session = InsertionSession::for_pending(session_id, item, purpose);
        self.drive(session)
    }

    /// Re-derive a session's bounds against the current order; either ask for
    /// the next comparison or commit the placement. The session is stored
    /// either way.
    fn drive(&mut self, mut session: InsertionSession) -> Result<InsertionSession> {
        let step = {
            let peers = self.peers_for(&session);
            let step = session.next_step(&peers);
            if let Step::Compare { low, high, mid } = step {
                session.state = SessionState::Searching {
                    low,
                    high,
                    opponent: peers[mid].id.clone(),
                };
            }
            step
        };
        match step {
            Step::Compare { low, high, .. } => {
                debug!(session = %session.id, low, high, opponent = ?session.opponent(), "awaiting comparison");
            }
            Step::Place { position } => {
                let rank = self.commit_placement(&session, position)?;
                session.pending = None;
                session.state = SessionState::Converged { position, rank };
                info!(
                    session = %session.id,
                    item = %session.item_id,
                    rank,
                    comparisons = session.comparisons,
                    "insertion converged"
                );
            }
        }
        self.collection
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(session)
    }

    fn commit_placement(&mut self, session: &InsertionSession, position: usize) -> Result<u32> {
        let before: Option<ItemId> = self
            .peers_for(session)
            .get(position)
            .map(|i| i.id.clone());
        match &session.pending {
            Some(item) => {
                ranking::insert_placed(&mut self.collection, item.clone(), before.as_deref())
            }
            None => ranking::move_within(&mut self.collection, &session.item_id, before.as_deref()),
        }
    }

    fn bump_count(&mut self, id: &str) {
        if let Some(item) = self.collection.items.get_mut(id) {
            item.comparison_count += 1;
        }
    }

    /// Answer the pending comparison of a session. `winner_id` is either the
    /// item being placed or the opponent it was shown against.
    pub fn answer_comparison(&mut self, session_id: &str, winner_id: &str) -> Result<SessionState> {
        let mut session = self.session(session_id)?.clone();
        let opponent = match &session.state {
            SessionState::Converged { .. } => {
                return Err(RankError::InvalidOperation(format!(
                    "session '{session_id}' has already converged"
                )));
            }
            SessionState::Searching { opponent, .. } => opponent.clone(),
        };
        if winner_id != session.item_id && winner_id != opponent {
            return Err(RankError::InvalidOperation(format!(
                "'{winner_id}' is not part of the comparison '{}' vs '{opponent}'",
                session.item_id
            )));
        }
        if !self.peers_for(&session).iter().any(|i| i.id == opponent) {
            return Err(RankError::InvalidOperation(format!(
                "'{opponent}' has left the {} {} group; resume session '{session_id}' for a new pair",
                session.tier, session.media_type
            )));
        }
        if session.pending.is_none() && !self.collection.items.contains_key(&session.item_id) {
            return Err(RankError::InvalidOperation(format!(
                "item '{}' is no longer placed",
                session.item_id
            )));
        }

        let subject_won = winner_id == session.item_id;
        session.record(&opponent, subject_won);
        match session.pending.as_mut() {
            Some(item) => item.comparison_count += 1,
            None => self.bump_count(&session.item_id),
        }
        self.bump_count(&opponent);
        let (winner, loser) = if subject_won {
            (session.item_id.clone(), opponent)
        } else {
            (opponent, session.item_id.clone())
        };
        self.collection.log_outcome(&winner, &loser);
        debug!(session = session_id, %winner, %loser, "recorded insertion answer");

        Ok(self.drive(session)?.state)
    }

    /// Re-derive a suspended session against the current order, committing
    /// it if the remaining window has closed.
    pub fn resume_session(&mut self, session_id: &str) -> Result<SessionState> {
        let session = self.session(session_id)?.clone();
        if !session.is_active() {
            return Ok(session.state);
        }
        if session.pending.is_none() && !self.collection.items.contains_key(&session.item_id) {
            return Err(RankError::InvalidOperation(format!(
                "item '{}' is no longer placed",
                session.item_id
            )));
        }
        Ok(self.drive(session)?.state)
    }

    /// Drop a session without placing anything. Counters already bumped on
    /// placed peers stay.
    pub fn abandon_session(&mut self, session_id: &str) -> Result<InsertionSession> {
        let session = self
            .collection
            .sessions
            .remove(session_id)
            .ok_or_else(|| RankError::NotFound(format!("session '{session_id}'")))?;
        if let Some(item) = &session.pending {
            self.collection.purge_outcomes(&item.id);
            self.collection.retired.insert(item.id.clone());
        }
        info!(session = session_id, item = %session.item_id, purpose = ?session.purpose, "abandoned session");
        Ok(session)
    }

    pub fn request_comparison_pair(
        &self,
        tier: Option<Tier>,
        media_type: Option<MediaType>,
    ) -> Option<(ItemId, ItemId)> {
        match tier {
            Some(tier) => selection::pick_for_tier(&self.collection, tier, media_type, &self.policy),
            None => selection::pick_any(&self.collection, media_type, &self.policy),
        }
    }

    /// Apply an ad-hoc outcome between two placed items.
    pub fn record_comparison_outcome(&mut self, winner_id: &str, loser_id: &str) -> Result<OutcomeEffect> {
        if winner_id == loser_id {
            return Err(RankError::InvalidOperation(
                "an item cannot be compared with itself".to_string(),
            ));
        }
        let winner = self.item(winner_id)?.clone();
        let loser = self.item(loser_id)?.clone();

        if winner.tier != loser.tier {
            if winner.tier > loser.tier {
                return Err(RankError::InvalidOperation(format!(
                    "'{winner_id}' is {} and '{loser_id}' is {}; re-tier instead",
                    winner.tier, loser.tier
                )));
            }
            self.finish_outcome(winner_id, loser_id);
            return Ok(OutcomeEffect::Confirmed);
        }
        if winner.media_type != loser.media_type {
            return Err(RankError::InvalidOperation(format!(
                "'{winner_id}' is a {} and '{loser_id}' is a {}",
                winner.media_type, loser.media_type
            )));
        }

        let (wi, li) = {
            let peers = ranking::peer_order(&self.collection, winner.tier, winner.media_type);
            let wi = ranking::position_of(&peers, winner_id);
            let li = ranking::position_of(&peers, loser_id);
            match (wi, li) {
                (Some(wi), Some(li)) => (wi, li),
                _ => {
                    return Err(RankError::InvariantViolation(format!(
                        "'{winner_id}' or '{loser_id}' missing from its own group"
                    )));
                }
            }
        };

        let effect = if wi < li {
            OutcomeEffect::Confirmed
        } else if wi == li + 1 {
            if winner.rank == loser.rank + 1 {
                ranking::commit_swap(&mut self.collection, winner_id, loser_id)?;
            } else {
                ranking::move_within(&mut self.collection, winner_id, Some(loser_id))?;
            }
            OutcomeEffect::Swapped
        } else {
            self.prune_converged();
            self.collection
                .sessions
                .retain(|_, s| !(s.purpose == SessionPurpose::Refine && s.item_id == winner_id));
            self.reorder_for_outcome(&winner, loser_id)?
        };
        self.finish_outcome(winner_id, loser_id);
        info!(winner = winner_id, loser = loser_id, ?effect, "recorded outcome");
        Ok(effect)
    }

    /// Logged opponents of `id` as (beat it, lost to it), leaving out any
    /// outcome against `skip`.
    fn logged_relations(&self, id: &str, skip: &str) -> (Vec<ItemId>, Vec<ItemId>) {
        let mut better = Vec::new();
        let mut worse = Vec::new();
        for o in &self.collection.outcomes {
            if o.same_pair(id, skip) {
                continue;
            }
            if o.loser == id {
                better.push(o.winner.clone());
            } else if o.winner == id {
                worse.push(o.loser.clone());
            }
        }
        (better, worse)
    }

    fn group_without(&self, tier: Tier, media_type: MediaType, id: &str) -> Vec<&Item> {
        ranking::peer_order(&self.collection, tier, media_type)
            .into_iter()
            .filter(|i| i.id != id)
            .collect()
    }

    /// Re-rank one (tier, media type) group to follow `group`, best first.
    /// Slots held by the tier's other media type stay put.
    fn reorder_group(&mut self, tier: Tier, media_type: MediaType, group: &[ItemId]) -> Result<()> {
        let mut next = group.iter();
        let order = ranking::tier_order(&self.collection, tier)
            .into_iter()
            .map(|i| {
                if i.media_type != media_type {
                    return Ok(i.id.clone());
                }
                next.next().cloned().ok_or_else(|| {
                    RankError::InvariantViolation(format!(
                        "{tier} {media_type} group changed size during reorder"
                    ))
                })
            })
            .collect::<Result<Vec<ItemId>>>()?;
        ranking::renumber(&mut self.collection, tier, &order)
    }

    /// `winner` beat `loser_id` from at least two places below it. Lift the
    /// winner to directly above the highest item it is logged to beat, unless
    /// something it lost to sits in the way; then drop the loser below the
    /// winner, unless the loser's own log forbids that too.
    fn reorder_for_outcome(&mut self, winner: &Item, loser_id: &str) -> Result<OutcomeEffect> {
        let (tier, media_type) = (winner.tier, winner.media_type);

        let (better, mut worse) = self.logged_relations(&winner.id, loser_id);
        worse.push(loser_id.to_string());
        let lifted = {
            let others = self.group_without(tier, media_type, &winner.id);
            let (low, high) = insertion::window(&others, &better, &worse);
            let order: Vec<ItemId> = others.iter().map(|i| i.id.clone()).collect();
            (low <= high).then_some((low, high, order))
        };
        if let Some((low, high, mut order)) = lifted {
            order.insert(high, winner.id.clone());
            self.reorder_group(tier, media_type, &order)?;
            let moved = self.item(&winner.id)?.clone();
            let refinement = if low < high {
                let session_id = self.new_id(SESSION_PREFIX, &winner.id);
                let session = InsertionSession::for_refinement(session_id, &moved, better, worse);
                Some(self.drive(session)?.id)
            } else {
                None
            };
            return Ok(OutcomeEffect::Moved {
                rank: moved.rank,
                refinement,
            });
        }

        let (mut loser_better, loser_worse) = self.logged_relations(loser_id, &winner.id);
        loser_better.push(winner.id.clone());
        let dropped = {
            let others = self.group_without(tier, media_type, loser_id);
            let (low, high) = insertion::window(&others, &loser_better, &loser_worse);
            let order: Vec<ItemId> = others.iter().map(|i| i.id.clone()).collect();
            (low <= high).then_some((low, order))
        };
        if let Some((low, mut order)) = dropped {
            order.insert(low, loser_id.to_string());
            self.reorder_group(tier, media_type, &order)?;
            let rank = self.item(loser_id)?.rank;
            return Ok(OutcomeEffect::Dropped { rank });
        }

        warn!(
            winner = %winner.id,
            loser = loser_id,
            "outcome log is cyclic around this pair; lifting the winner over the loser"
        );
        let rank = ranking::move_within(&mut self.collection, &winner.id, Some(loser_id))?;
        Ok(OutcomeEffect::Moved {
            rank,
            refinement: None,
        })
    }

    fn finish_outcome(&mut self, winner_id: &str, loser_id: &str) {
        self.bump_count(winner_id);
        self.bump_count(loser_id);
        self.collection.log_outcome(winner_id, loser_id);
    }

    /// Take an item out of the order along with everything tied to its old
    /// position: outcomes and any refinement of it.
    fn detach(&mut self, id: &str) -> Result<Item> {
        self.item(id)?;
        let item = ranking::remove_and_renumber(&mut self.collection, id)?;
        self.collection.purge_outcomes(id);
        self.collection
            .sessions
            .retain(|_, s| !(s.purpose == SessionPurpose::Refine && s.item_id == id));
        Ok(item)
    }

    pub fn remove_item(&mut self, id: &str) -> Result<Item> {
        let item = self.detach(id)?;
        self.collection.retired.insert(item.id.clone());
        info!(id, tier = %item.tier, "removed item");
        Ok(item)
    }

    /// Move an item to another tier: it leaves its old band and goes through a
    /// full insertion into the new one, keeping its id and counter.
    pub fn retier_item(&mut self, id: &str, tier: Tier) -> Result<InsertionSession> {
        let current = self.item(id)?.tier;
        if current == tier {
            return Err(RankError::InvalidOperation(format!(
                "item '{id}' is already {tier}"
            )));
        }
        let mut item = self.detach(id)?;
        item.tier = tier;
        item.rank = 0;
        item.updated_at = Utc::now();
        info!(id, from = %current, to = %tier, "re-tiering item");
        self.begin_insertion(item, SessionPurpose::Retier)
    }

    pub fn score_of(&self, id: &str) -> Result<f64> {
        let item = self.item(id)?;
        let group = ranking::peer_order(&self.collection, item.tier, item.media_type);
        scoring::score_item(item, &group).ok_or_else(|| {
            RankError::InvariantViolation(format!("item '{id}' missing from its own group"))
        })
    }

    pub fn score_all(&self) -> BTreeMap<ItemId, f64> {
        scoring::batch_score(self.collection.items.values())
    }

    /// Append already-classified entries to the bottom of their tier bands,
    /// in order, with no comparisons. Blank and duplicate keys are skipped.
    /// The batch is staged on a copy and committed whole.
    pub fn import_batch(&mut self, entries: Vec<ImportEntry>) -> Result<ImportReport> {
        let mut staged = self.collection.clone();
        let mut report = ImportReport::default();
        let mut seen = HashSet::new();
        for entry in entries {
            let key = entry.external_key.trim().to_string();
            if key.is_empty() || !seen.insert(key.clone()) || staged.has_external_key(&key) {
                report.skipped.push(entry.external_key);
                continue;
            }
            let now = Utc::now();
            let item = Item {
                id: id::generate_id(ITEM_PREFIX, &key, |candidate| staged.id_taken(candidate)),
                external_key: key,
                media_type: entry.media_type,
                tier: entry.tier,
                rank: 0,
                comparison_count: 0,
                payload: entry.payload,
                created_at: now,
                updated_at: now,
            };
            let added = item.id.clone();
            ranking::insert_placed(&mut staged, item, None)?;
            report.added.push(added);
        }
        ranking::check_invariants(&staged)?;
        self.collection = staged;
        info!(
            added = report.added.len(),
            skipped = report.skipped.len(),
            "imported batch"
        );
        Ok(report)
    }
}
