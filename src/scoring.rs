use std::collections::BTreeMap;

use crate::model::{Item, ItemId, MediaType, Tier};

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Score of the item at zero-based `index` (0 = best) in a group of `count`.
/// Interpolates linearly from the top of the tier's band down to its bottom.
pub fn score(tier: Tier, index: usize, count: usize) -> f64 {
    let (bottom, top) = tier.band();
    if count <= 1 {
        return top;
    }
    let index = index.min(count - 1);
    round1(top - (top - bottom) * index as f64 / (count - 1) as f64)
}

/// Score one item against its (tier, media type) group sorted best first.
/// `None` if the item is not in the group.
pub fn score_item(item: &Item, group: &[&Item]) -> Option<f64> {
    let index = group.iter().position(|i| i.id == item.id)?;
    Some(score(item.tier, index, group.len()))
}

/// Score every item in one pass: group by (tier, media type), sort each group
/// once, then walk it.
pub fn batch_score<'a>(items: impl IntoIterator<Item = &'a Item>) -> BTreeMap<ItemId, f64> {
    let mut groups: BTreeMap<(Tier, MediaType), Vec<&Item>> = BTreeMap::new();
    for item in items {
        groups
            .entry((item.tier, item.media_type))
            .or_default()
            .push(item);
    }

    let mut scores = BTreeMap::new();
    for ((tier, _), mut group) in groups {
        group.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.id.cmp(&b.id)));
        let count = group.len();
        for (index, item) in group.into_iter().enumerate() {
            scores.insert(item.id.clone(), score(tier, index, count));
        }
    }
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Payload;
    use chrono::Utc;

    fn item(id: &str, tier: Tier, media_type: MediaType, rank: u32) -> Item {
        let now = Utc::now();
        Item {
            id: id.to_string(),
            external_key: id.to_string(),
            media_type,
            tier,
            rank,
            comparison_count: 0,
            payload: Payload::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn single_item_scores_top_of_band() {
        assert_eq!(score(Tier::Good, 0, 1), 10.0);
        assert_eq!(score(Tier::Medium, 0, 1), 6.9);
        assert_eq!(score(Tier::Bad, 0, 1), 3.9);
    }

    #[test]
    fn endpoints_hit_band_edges() {
        for tier in Tier::ALL {
            let (bottom, top) = tier.band();
            assert_eq!(score(tier, 0, 5), top);
            assert_eq!(score(tier, 4, 5), bottom);
        }
    }

    #[test]
    fn interpolates_and_rounds_to_one_decimal() {
        assert_eq!(score(Tier::Good, 1, 3), 8.5);
        assert_eq!(score(Tier::Good, 1, 4), 9.0);
        // 6.9 - 2.9 / 3 = 5.9333..
        assert_eq!(score(Tier::Medium, 1, 4), 5.9);
        // 3.9 - 2.9 * 2 / 3 = 1.9666..
        assert_eq!(score(Tier::Bad, 2, 4), 2.0);
    }

    #[test]
    fn monotonic_within_group() {
        for tier in Tier::ALL {
            for count in 1..60 {
                let scores: Vec<f64> = (0..count).map(|i| score(tier, i, count)).collect();
                assert!(scores.windows(2).all(|w| w[0] >= w[1]), "{tier} {count}");
            }
        }
    }

    #[test]
    fn score_item_uses_group_position() {
        let a = item("a", Tier::Good, MediaType::Movie, 1);
        let b = item("b", Tier::Good, MediaType::Movie, 2);
        let stranger = item("z", Tier::Good, MediaType::Movie, 3);
        let group = vec![&a, &b];
        assert_eq!(score_item(&a, &group), Some(10.0));
        assert_eq!(score_item(&b, &group), Some(7.0));
        assert_eq!(score_item(&stranger, &group), None);
    }

    #[test]
    fn batch_scores_media_types_independently() {
        let items = vec![
            item("m1", Tier::Good, MediaType::Movie, 1),
            item("s1", Tier::Good, MediaType::Show, 2),
            item("m2", Tier::Good, MediaType::Movie, 3),
            item("x", Tier::Medium, MediaType::Movie, 4),
        ];
        let scores = batch_score(&items);
        assert_eq!(scores["m1"], 10.0);
        assert_eq!(scores["m2"], 7.0);
        assert_eq!(scores["s1"], 10.0);
        assert_eq!(scores["x"], 6.9);
    }

    #[test]
    fn batch_matches_per_item_and_is_deterministic() {
        let items: Vec<Item> = (0..25)
            .map(|i| {
                let tier = Tier::ALL[i % 3];
                item(&format!("i{i:02}"), tier, MediaType::Movie, i as u32 + 1)
            })
            .collect();
        let first = batch_score(&items);
        let second = batch_score(items.iter().rev());
        assert_eq!(first, second);

        for tier in Tier::ALL {
            let mut group: Vec<&Item> = items.iter().filter(|i| i.tier == tier).collect();
            group.sort_by_key(|i| i.rank);
            for it in &group {
                let single = score_item(it, &group).unwrap();
                assert_eq!(first[&it.id].to_bits(), single.to_bits());
            }
        }
    }
}
