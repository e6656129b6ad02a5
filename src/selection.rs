use std::collections::HashSet;

use crate::model::{Collection, Item, ItemId, MediaType, Tier};
use crate::ranking;

pub const DEFAULT_WINDOW: usize = 3;
pub const DEFAULT_SETTLED_THRESHOLD: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionPolicy {
    /// Maximum distance, in group positions, between the two items of a pair.
    pub window: usize,
    /// A pair whose items both reached this many comparisons is settled.
    pub settled_threshold: u32,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            settled_threshold: DEFAULT_SETTLED_THRESHOLD,
        }
    }
}

struct Candidate<'a> {
    a: &'a Item,
    b: &'a Item,
    combined: u32,
    compared: bool,
    distance: usize,
}

fn pair_key<'a>(x: &'a str, y: &'a str) -> (&'a str, &'a str) {
    if x <= y { (x, y) } else { (y, x) }
}

fn compared_pairs(c: &Collection) -> HashSet<(&str, &str)> {
    c.outcomes
        .iter()
        .map(|o| pair_key(&o.winner, &o.loser))
        .collect()
}

fn collect_candidates<'a>(
    group: &[&'a Item],
    compared: &HashSet<(&str, &str)>,
    policy: &SelectionPolicy,
    out: &mut Vec<Candidate<'a>>,
) {
    let window = policy.window.max(1);
    for (i, &a) in group.iter().enumerate() {
        for (offset, &b) in group.iter().skip(i + 1).take(window).enumerate() {
            if a.comparison_count >= policy.settled_threshold
                && b.comparison_count >= policy.settled_threshold
            {
                continue;
            }
            out.push(Candidate {
                a,
                b,
                combined: a.comparison_count + b.comparison_count,
                compared: compared.contains(&pair_key(&a.id, &b.id)),
                distance: offset + 1,
            });
        }
    }
}

fn best(candidates: Vec<Candidate<'_>>) -> Option<(ItemId, ItemId)> {
    candidates
        .into_iter()
        .min_by_key(|c| (c.combined, c.compared, c.distance, c.a.rank))
        .map(|c| (c.a.id.clone(), c.b.id.clone()))
}

fn media_filter(media_type: Option<MediaType>) -> Vec<MediaType> {
    media_type.map_or_else(|| MediaType::ALL.to_vec(), |m| vec![m])
}

/// Pick a pair from `tier`, optionally restricted to one media type. The
/// better-ranked item comes first.
pub fn pick_for_tier(
    c: &Collection,
    tier: Tier,
    media_type: Option<MediaType>,
    policy: &SelectionPolicy,
) -> Option<(ItemId, ItemId)> {
    let compared = compared_pairs(c);
    let mut candidates = Vec::new();
    for media in media_filter(media_type) {
        let group = ranking::peer_order(c, tier, media);
        collect_candidates(&group, &compared, policy, &mut candidates);
    }
    best(candidates)
}

/// Pick a pair from any tier of the (optionally media-filtered) pool. Pairs
/// never span two tiers.
pub fn pick_any(
    c: &Collection,
    media_type: Option<MediaType>,
    policy: &SelectionPolicy,
) -> Option<(ItemId, ItemId)> {
    let compared = compared_pairs(c);
    let mut candidates = Vec::new();
    for tier in Tier::ALL {
        for media in media_filter(media_type) {
            let group = ranking::peer_order(c, tier, media);
            collect_candidates(&group, &compared, policy, &mut candidates);
        }
    }
    best(candidates)
}
