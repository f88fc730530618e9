//! Captain and map selection for a full queue

use crate::config::LobbyConfig;
use crate::types::{Map, PlayerRecord};
use crate::utils::rating_difference;
use rand::{Rng, RngCore};

/// Indices (into the queued players) of the two chosen captains.
/// `first` is the lower-rated captain and picks first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptainPair {
    pub first: usize,
    pub second: usize,
}

/// Picks two closely rated captains from the strongest experienced players
#[derive(Debug, Clone)]
pub struct CaptainSelector {
    experience_threshold: u32,
    shortlist_size: usize,
}

impl CaptainSelector {
    pub fn new(experience_threshold: u32, shortlist_size: usize) -> Self {
        Self {
            experience_threshold,
            shortlist_size: shortlist_size.max(2),
        }
    }

    pub fn from_config(config: &LobbyConfig) -> Self {
        Self::new(
            config.captain_experience_threshold,
            config.captain_shortlist_size,
        )
    }

    /// Candidates ordered by descending rating, strongest first.
    ///
    /// Players with at least `experience_threshold` games are preferred; if
    /// fewer than two qualify every queued player is eligible.
    pub fn shortlist(&self, players: &[PlayerRecord]) -> Vec<usize> {
        let mut pool: Vec<usize> = players
            .iter()
            .enumerate()
            .filter(|(_, p)| p.games_played() >= self.experience_threshold)
            .map(|(i, _)| i)
            .collect();
        if pool.len() < 2 {
            pool = (0..players.len()).collect();
        }

        // Stable sort keeps join order among equal ratings
        pool.sort_by(|a, b| {
            players[*b]
                .skill_rating
                .total_cmp(&players[*a].skill_rating)
        });
        pool.truncate(self.shortlist_size);
        pool
    }

    /// Choose captains at random from the shortlist. `None` with fewer than
    /// two players.
    pub fn select(&self, players: &[PlayerRecord], rng: &mut dyn RngCore) -> Option<CaptainPair> {
        let shortlist = self.shortlist(players);
        if shortlist.len() < 2 {
            return None;
        }
        let position = rng.gen_range(0..shortlist.len());
        Some(self.pair_from_shortlist(players, &shortlist, position))
    }

    /// Pair the shortlist entry at `position` with its closer-rated neighbour.
    pub fn pair_from_shortlist(
        &self,
        players: &[PlayerRecord],
        shortlist: &[usize],
        position: usize,
    ) -> CaptainPair {
        let captain = shortlist[position];
        let rating = players[captain].skill_rating;

        // A missing neighbour never wins the comparison
        let above = position.checked_sub(1).map(|p| shortlist[p]);
        let below = shortlist.get(position + 1).copied();
        let distance = |neighbour: Option<usize>| {
            neighbour
                .map(|n| rating_difference(rating, players[n].skill_rating))
                .unwrap_or(f64::MAX)
        };

        let partner = match (above, below) {
            (Some(a), Some(_)) if distance(above) < distance(below) => a,
            (_, Some(b)) => b,
            (Some(a), None) => a,
            (None, None) => captain,
        };

        if players[captain].skill_rating <= players[partner].skill_rating {
            CaptainPair {
                first: captain,
                second: partner,
            }
        } else {
            CaptainPair {
                first: partner,
                second: captain,
            }
        }
    }
}

/// Uniformly random map, `None` if there are no maps
pub fn pick_map<'a>(maps: &'a [Map], rng: &mut dyn RngCore) -> Option<&'a Map> {
    if maps.is_empty() {
        return None;
    }
    Some(&maps[rng.gen_range(0..maps.len())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RatingSnapshot;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn create_test_player(id: u64, rating: f64, games: u32) -> PlayerRecord {
        let mut player = PlayerRecord::new(id, format!("player{}", id), RatingSnapshot::default());
        player.skill_rating = rating;
        player.wins = games / 2;
        player.losses = games - games / 2;
        player
    }

    fn selector() -> CaptainSelector {
        CaptainSelector::new(15, 5)
    }

    #[test]
    fn test_shortlist_prefers_experienced_players() {
        let players = vec![
            create_test_player(1, 2400.0, 3),
            create_test_player(2, 1500.0, 20),
            create_test_player(3, 1700.0, 15),
            create_test_player(4, 1600.0, 40),
        ];

        let shortlist = selector().shortlist(&players);
        // the 2400 newcomer is skipped
        assert_eq!(shortlist, vec![2, 3, 1]);
    }

    #[test]
    fn test_shortlist_falls_back_to_everyone() {
        let players = vec![
            create_test_player(1, 1400.0, 30),
            create_test_player(2, 1800.0, 0),
            create_test_player(3, 1600.0, 2),
        ];

        let shortlist = selector().shortlist(&players);
        assert_eq!(shortlist, vec![1, 2, 0]);
    }

    #[test]
    fn test_shortlist_is_capped() {
        let players: Vec<_> = (0..10)
            .map(|i| create_test_player(i, 1000.0 + i as f64 * 50.0, 20))
            .collect();

        let shortlist = selector().shortlist(&players);
        assert_eq!(shortlist.len(), 5);
        assert_eq!(shortlist[0], 9);
        assert_eq!(shortlist[4], 5);
    }

    #[test]
    fn test_partner_is_closer_neighbour() {
        let players = vec![
            create_test_player(1, 2000.0, 20),
            create_test_player(2, 1900.0, 20),
            create_test_player(3, 1880.0, 20),
            create_test_player(4, 1500.0, 20),
        ];
        let s = selector();
        let shortlist = s.shortlist(&players);

        // 1900 sits 100 below 2000 and 20 above 1880
        let pair = s.pair_from_shortlist(&players, &shortlist, 1);
        assert_eq!(pair, CaptainPair { first: 2, second: 1 });

        // top of the list only has a neighbour below
        let pair = s.pair_from_shortlist(&players, &shortlist, 0);
        assert_eq!(pair, CaptainPair { first: 1, second: 0 });

        // bottom of the list only has a neighbour above
        let pair = s.pair_from_shortlist(&players, &shortlist, 3);
        assert_eq!(pair, CaptainPair { first: 3, second: 2 });
    }

    #[test]
    fn test_equal_distance_goes_below() {
        let players = vec![
            create_test_player(1, 1600.0, 20),
            create_test_player(2, 1500.0, 20),
            create_test_player(3, 1400.0, 20),
        ];
        let s = selector();
        let shortlist = s.shortlist(&players);

        let pair = s.pair_from_shortlist(&players, &shortlist, 1);
        assert_eq!(pair, CaptainPair { first: 2, second: 1 });
    }

    #[test]
    fn test_two_player_pool() {
        let players = vec![
            create_test_player(1, 1500.0, 0),
            create_test_player(2, 1450.0, 0),
        ];
        let mut rng = StdRng::seed_from_u64(3);

        let pair = selector().select(&players, &mut rng).unwrap();
        assert_eq!(pair, CaptainPair { first: 1, second: 0 });
    }

    #[test]
    fn test_select_needs_two_players() {
        let players = vec![create_test_player(1, 1500.0, 0)];
        let mut rng = StdRng::seed_from_u64(3);
        assert!(selector().select(&players, &mut rng).is_none());
    }

    #[test]
    fn test_pick_map() {
        let mut rng = StdRng::seed_from_u64(11);
        assert!(pick_map(&[], &mut rng).is_none());

        let maps = vec![
            Map {
                id: 1,
                name: "Inferno".to_string(),
            },
            Map {
                id: 2,
                name: "Nuke".to_string(),
            },
        ];
        let chosen = pick_map(&maps, &mut rng).unwrap();
        assert!(maps.contains(chosen));
    }

    proptest! {
        #[test]
        fn prop_captains_are_distinct_and_ordered(
            ratings in prop::collection::vec(800.0f64..2600.0, 2..12),
            games in prop::collection::vec(0u32..40, 12),
            seed in any::<u64>(),
        ) {
            let players: Vec<_> = ratings
                .iter()
                .enumerate()
                .map(|(i, r)| create_test_player(i as u64, *r, games[i]))
                .collect();
            let mut rng = StdRng::seed_from_u64(seed);

            let pair = selector().select(&players, &mut rng).unwrap();
            prop_assert_ne!(pair.first, pair.second);
            prop_assert!(players[pair.first].skill_rating <= players[pair.second].skill_rating);
        }
    }
}
