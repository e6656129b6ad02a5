use std::collections::HashSet;

use tracing::debug;

use crate::error::{RankError, Result};
use crate::model::{Collection, Item, ItemId, MediaType, Tier};

/// Members of `tier`, best first.
pub fn tier_order(c: &Collection, tier: Tier) -> Vec<&Item> {
    let mut members: Vec<&Item> = c.items.values().filter(|i| i.tier == tier).collect();
    members.sort_by_key(|i| i.rank);
    members
}

/// Members of `tier` with the given media type, best first. This is the group
/// that insertion compares against and that scores are spread across.
pub fn peer_order(c: &Collection, tier: Tier, media_type: MediaType) -> Vec<&Item> {
    let mut members: Vec<&Item> = c
        .items
        .values()
        .filter(|i| i.tier == tier && i.media_type == media_type)
        .collect();
    members.sort_by_key(|i| i.rank);
    members
}

/// Every placed item, best first.
pub fn global_order(c: &Collection) -> Vec<&Item> {
    let mut items: Vec<&Item> = c.items.values().collect();
    items.sort_by_key(|i| i.rank);
    items
}

pub fn position_of(group: &[&Item], id: &str) -> Option<usize> {
    group.iter().position(|i| i.id == id)
}

/// Last rank of the band for `tier` (equal to the number of items in `tier`
/// and every better tier).
fn band_end(c: &Collection, tier: Tier) -> u32 {
    c.items.values().filter(|i| i.tier <= tier).count() as u32
}

fn lookup<'a>(c: &'a Collection, id: &str) -> Result<&'a Item> {
    c.items
        .get(id)
        .ok_or_else(|| RankError::NotFound(format!("item '{id}'")))
}

fn apply(c: &mut Collection, updates: Vec<(ItemId, u32)>) {
    for (id, rank) in updates {
        if let Some(item) = c.items.get_mut(&id) {
            item.rank = rank;
        }
    }
}

/// Reassign the ranks of `tier` so its members appear in `order`, inside the
/// band the tier already occupies.
pub fn renumber(c: &mut Collection, tier: Tier, order: &[ItemId]) -> Result<()> {
    let members = tier_order(c, tier);
    if order.len() != members.len() {
        return Err(RankError::InvariantViolation(format!(
            "renumber of {tier} got {} ids for {} members",
            order.len(),
            members.len()
        )));
    }
    let member_ids: HashSet<&str> = members.iter().map(|i| i.id.as_str()).collect();
    let mut seen = HashSet::new();
    for id in order {
        if !member_ids.contains(id.as_str()) {
            return Err(RankError::InvariantViolation(format!(
                "renumber of {tier} names '{id}', which is not in the tier"
            )));
        }
        if !seen.insert(id.as_str()) {
            return Err(RankError::InvariantViolation(format!(
                "renumber of {tier} names '{id}' twice"
            )));
        }
    }
    let start = members.first().map_or(0, |i| i.rank.saturating_sub(1));
    let updates = order
        .iter()
        .enumerate()
        .map(|(i, id)| (id.clone(), start + i as u32 + 1))
        .collect();
    apply(c, updates);
    debug!(%tier, members = order.len(), "renumbered tier");
    Ok(())
}

/// Exchange the ranks of two band-adjacent items of the same tier.
pub fn commit_swap(c: &mut Collection, a: &str, b: &str) -> Result<()> {
    let ia = lookup(c, a)?;
    let ib = lookup(c, b)?;
    if ia.tier != ib.tier {
        return Err(RankError::InvalidOperation(format!(
            "cannot swap '{a}' ({}) with '{b}' ({})",
            ia.tier, ib.tier
        )));
    }
    if ia.rank.abs_diff(ib.rank) != 1 {
        return Err(RankError::InvalidOperation(format!(
            "cannot swap non-adjacent ranks {} and {}",
            ia.rank, ib.rank
        )));
    }
    let updates = vec![(a.to_string(), ib.rank), (b.to_string(), ia.rank)];
    apply(c, updates);
    debug!(a, b, "swapped adjacent ranks");
    Ok(())
}

/// Move a placed item so it sits directly above `before`, or at the bottom of
/// its band when `before` is `None`. Only the items between the old and new
/// position shift. Returns the item's new rank.
pub fn move_within(c: &mut Collection, id: &str, before: Option<&str>) -> Result<u32> {
    let item = lookup(c, id)?;
    let (tier, from) = (item.tier, item.rank);
    let to = match before {
        Some(b) if b == id => {
            return Err(RankError::InvalidOperation(format!(
                "cannot place '{id}' above itself"
            )));
        }
        Some(b) => {
            let anchor = lookup(c, b)?;
            if anchor.tier != tier {
                return Err(RankError::InvalidOperation(format!(
                    "'{b}' is {}, '{id}' is {tier}",
                    anchor.tier
                )));
            }
            if anchor.rank > from {
                anchor.rank - 1
            } else {
                anchor.rank
            }
        }
        None => band_end(c, tier),
    };
    if to == from {
        return Ok(from);
    }

    let mut updates: Vec<(ItemId, u32)> = tier_order(c, tier)
        .into_iter()
        .filter_map(|i| {
            if to < from && i.rank >= to && i.rank < from {
                Some((i.id.clone(), i.rank + 1))
            } else if to > from && i.rank > from && i.rank <= to {
                Some((i.id.clone(), i.rank - 1))
            } else {
                None
            }
        })
        .collect();
    let shifted = updates.len();
    updates.push((id.to_string(), to));
    apply(c, updates);
    debug!(id, from, to, shifted, "moved item within tier");
    Ok(to)
}

/// Insert a new item directly above `before` (which must share its tier), or
/// at the bottom of its band. Every later rank shifts down by one. Returns
/// the rank assigned.
pub fn insert_placed(c: &mut Collection, mut item: Item, before: Option<&str>) -> Result<u32> {
    if c.items.contains_key(&item.id) {
        return Err(RankError::InvalidOperation(format!(
            "item '{}' is already placed",
            item.id
        )));
    }
    let rank = match before {
        Some(b) => {
            let anchor = lookup(c, b)?;
            if anchor.tier != item.tier {
                return Err(RankError::InvalidOperation(format!(
                    "'{b}' is {}, new item is {}",
                    anchor.tier, item.tier
                )));
            }
            anchor.rank
        }
        None => band_end(c, item.tier) + 1,
    };
    let updates: Vec<(ItemId, u32)> = c
        .items
        .values()
        .filter(|i| i.rank >= rank)
        .map(|i| (i.id.clone(), i.rank + 1))
        .collect();
    apply(c, updates);
    debug!(id = %item.id, tier = %item.tier, rank, "inserted item");
    item.rank = rank;
    c.items.insert(item.id.clone(), item);
    Ok(rank)
}

/// Delete an item and close the gap it leaves, shifting every later band.
pub fn remove_and_renumber(c: &mut Collection, id: &str) -> Result<Item> {
    let removed_rank = lookup(c, id)?.rank;
    let updates: Vec<(ItemId, u32)> = c
        .items
        .values()
        .filter(|i| i.rank > removed_rank)
        .map(|i| (i.id.clone(), i.rank - 1))
        .collect();
    let item = c
        .items
        .remove(id)
        .ok_or_else(|| RankError::NotFound(format!("item '{id}'")))?;
    apply(c, updates);
    debug!(id, rank = removed_rank, "removed item");
    Ok(item)
}

/// Ranks must be exactly `1..N` and bands must follow tier order.
pub fn check_invariants(c: &Collection) -> Result<()> {
    let order = global_order(c);
    for (i, item) in order.iter().enumerate() {
        let expected = i as u32 + 1;
        if item.rank != expected {
            return Err(RankError::InvariantViolation(format!(
                "expected rank {expected}, found '{}' at rank {}",
                item.id, item.rank
            )));
        }
    }
    for pair in order.windows(2) {
        if pair[0].tier > pair[1].tier {
            return Err(RankError::InvariantViolation(format!(
                "'{}' ({}) ranks above '{}' ({})",
                pair[0].id, pair[0].tier, pair[1].id, pair[1].tier
            )));
        }
    }
    Ok(())
}
