use crate::directory::PlayerId;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cards handed out per booster purchase
pub const BOOSTER_SIZE: usize = 5;

/// A tank card. Strength is its remaining hit points, power the damage it deals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub model: String,
    pub owner: PlayerId,
    pub strength: i32,
    pub power: i32,
}

/// Catalogue entry: (model, strength, power, copies in the pack)
const CATALOGUE: &[(&str, i32, i32, usize)] = &[
    ("M22 (Light)", 50, 10, 3),
    ("FIAT6614 (Light)", 55, 12, 3),
    ("BMP (Light)", 60, 15, 3),
    ("Fox (Light)", 52, 11, 3),
    ("AMX13 (Light)", 58, 14, 3),
    ("Sherman (Medium)", 100, 28, 2),
    ("T-34 (Medium)", 110, 27, 2),
    ("Panther (Medium)", 120, 25, 2),
    ("M47 (Medium)", 115, 30, 2),
    ("Tiger II (Heavy)", 200, 53, 1),
    ("IS-6 (Heavy)", 220, 55, 1),
    ("M26 Pershing (Heavy)", 210, 52, 1),
    ("T-10M (Heavy)", 230, 58, 1),
    ("KV-2 (Heavy)", 250, 50, 1),
    ("Maus (Heavy)", 280, 57, 1),
    ("M26E5 (Heavy)", 240, 54, 1),
];

impl Card {
    pub fn new(model: impl Into<String>, owner: impl Into<String>, strength: i32, power: i32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            model: model.into(),
            owner: owner.into(),
            strength,
            power,
        }
    }
}

fn pack_size() -> usize {
    CATALOGUE.iter().map(|(_, _, _, copies)| copies).sum()
}

/// Draw one booster for `owner`. Light tanks come up more often than heavies,
/// matching how many copies of each the pack holds.
pub fn draw_booster(owner: &str) -> Vec<Card> {
    let mut rng = rand::thread_rng();
    let total = pack_size();

    (0..BOOSTER_SIZE)
        .map(|_| {
            let mut pick = rng.gen_range(0..total);
            let mut chosen = CATALOGUE[0];
            for entry in CATALOGUE {
                if pick < entry.3 {
                    chosen = *entry;
                    break;
                }
                pick -= entry.3;
            }
            let (model, strength, power, _) = chosen;
            Card::new(model, owner, strength, power)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_pack_holds_thirty_cards() {
        assert_eq!(pack_size(), 30);
    }

    #[test]
    fn test_booster_size_and_owner() {
        let cards = draw_booster("alice");
        assert_eq!(cards.len(), BOOSTER_SIZE);
        assert!(cards.iter().all(|c| c.owner == "alice"));
        assert!(cards.iter().all(|c| c.strength > 0 && c.power > 0));
    }

    #[test]
    fn test_booster_cards_come_from_catalogue() {
        for _ in 0..20 {
            for card in draw_booster("bob") {
                assert!(CATALOGUE
                    .iter()
                    .any(|(m, s, p, _)| *m == card.model && *s == card.strength && *p == card.power));
            }
        }
    }

    #[test]
    fn test_card_ids_are_unique() {
        let ids: HashSet<String> = (0..10).flat_map(|_| draw_booster("carol")).map(|c| c.id).collect();
        assert_eq!(ids.len(), 10 * BOOSTER_SIZE);
    }
}
