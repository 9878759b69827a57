//! Per-stage statistics and the stats collaborator.
//!
//! The session never owns play results; it asks the [`StatsManager`] to
//! reset, commit, and expose them. [`StatsBook`] is the in-process
//! implementation: it keeps the current stage plus the session's played
//! history, and turns committed results into marker-named high scores.

use log::debug;

use crate::game::catalog::{RankingCategory, SongId, TrailId};
use crate::game::profile::{Grade, HighScore, ProfileManager, ranking_to_fill_in_marker};
use crate::game::{MAX_PLAYERS, PlayerId};

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStageStats {
    /// Charts this player could have been judged on; the first entry is the
    /// representative chart for ranking purposes.
    pub possible_steps: Vec<crate::game::catalog::StepsId>,
    /// Trail played, course modes only.
    pub trail: Option<TrailId>,
    pub grade: Grade,
    pub score: u32,
    pub actual_dance_points: i32,
    pub percent_dp: f32,
    pub songs_played: u32,
    pub meter: u32,
    /// Set at stage begin when the player's preferred options are easier
    /// than a clean pass allows.
    pub disqualified: bool,
}

impl Default for PlayerStageStats {
    fn default() -> Self {
        Self {
            possible_steps: Vec::new(),
            trail: None,
            grade: Grade::NoData,
            score: 0,
            actual_dance_points: 0,
            percent_dp: 0.0,
            songs_played: 0,
            meter: 0,
            disqualified: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageStats {
    pub played_songs: Vec<SongId>,
    pub music_rate: f32,
    pub players: [PlayerStageStats; MAX_PLAYERS],
}

impl Default for StageStats {
    fn default() -> Self {
        Self {
            played_songs: Vec::new(),
            music_rate: 1.0,
            players: std::array::from_fn(|_| PlayerStageStats::default()),
        }
    }
}

impl StageStats {
    pub fn player(&self, pn: PlayerId) -> &PlayerStageStats {
        &self.players[pn.index()]
    }

    pub fn player_mut(&mut self, pn: PlayerId) -> &mut PlayerStageStats {
        &mut self.players[pn.index()]
    }
}

/// Stats collaborator: owns current and historical per-stage statistics.
pub trait StatsManager {
    fn current(&self) -> &StageStats;
    fn current_mut(&mut self) -> &mut StageStats;
    /// Throw away the current stage's numbers (stage begin/cancel).
    fn reset_current(&mut self);
    /// Full session reset: current and history.
    fn reset(&mut self);
    /// Release everything held for one player (called before their profile
    /// unloads).
    fn unjoin_player(&mut self, pn: PlayerId);
    /// Commit the current stage into profiles and append it to history.
    fn commit_stats_to_profiles(&mut self, profiles: &mut dyn ProfileManager);
    fn played_stage_stats(&self) -> &[StageStats];

    /// Average chart meter across this session's played stages.
    fn average_meter(&self, pn: PlayerId) -> u32 {
        let played = self.played_stage_stats();
        let (sum, n) = played
            .iter()
            .map(|s| s.player(pn).meter)
            .filter(|&m| m > 0)
            .fold((0u32, 0u32), |(sum, n), m| (sum + m, n + 1));
        if n == 0 { 0 } else { sum / n }
    }
}

#[derive(Debug, Default)]
pub struct StatsBook {
    current: StageStats,
    played: Vec<StageStats>,
}

impl StatsBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/host hook: seed history directly.
    pub fn push_played(&mut self, stats: StageStats) {
        self.played.push(stats);
    }
}

impl StatsManager for StatsBook {
    fn current(&self) -> &StageStats {
        &self.current
    }

    fn current_mut(&mut self) -> &mut StageStats {
        &mut self.current
    }

    fn reset_current(&mut self) {
        self.current = StageStats::default();
    }

    fn reset(&mut self) {
        self.current = StageStats::default();
        self.played.clear();
    }

    fn unjoin_player(&mut self, pn: PlayerId) {
        *self.current.player_mut(pn) = PlayerStageStats::default();
    }

    fn commit_stats_to_profiles(&mut self, profiles: &mut dyn ProfileManager) {
        for pn in PlayerId::ALL {
            let pss = self.current.player(pn).clone();
            if pss.score == 0 || pss.disqualified {
                continue;
            }

            let hs = HighScore::new(
                ranking_to_fill_in_marker(pn),
                pss.grade,
                pss.score,
                pss.percent_dp,
            );

            if let Some(trail) = &pss.trail {
                profiles
                    .machine_profile_mut()
                    .course_high_score_list(trail)
                    .add(hs.clone());
                if let Some(profile) = profiles.profile_mut(pn) {
                    profile.course_high_score_list(trail).add(hs.clone());
                }
            } else if let Some(steps) = pss.possible_steps.first() {
                debug!("Committing {} score {} on {:?}", pn, pss.score, steps);
                profiles
                    .machine_profile_mut()
                    .steps_high_score_list(steps)
                    .add(hs.clone());
                if let Some(profile) = profiles.profile_mut(pn) {
                    profile.steps_high_score_list(steps).add(hs.clone());
                }

                let rc = RankingCategory::from_average_meter(pss.meter);
                profiles
                    .machine_profile_mut()
                    .category_high_score_list(steps.steps_type, rc)
                    .add(hs.clone());
                if let Some(profile) = profiles.profile_mut(pn) {
                    profile.category_high_score_list(steps.steps_type, rc).add(hs);
                }
            }
        }

        self.played.push(self.current.clone());
    }

    fn played_stage_stats(&self) -> &[StageStats] {
        &self.played
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::catalog::{Difficulty, StepsId};
    use crate::game::style::StepsType;
    use crate::test_utils::fakes::MemProfiles;

    fn steps(song: &str) -> StepsId {
        StepsId {
            song: SongId::new(song),
            steps_type: StepsType::DanceSingle,
            difficulty: Difficulty::Hard,
        }
    }

    #[test]
    fn commit_writes_marker_scores_and_appends_history() {
        let mut book = StatsBook::new();
        let mut profiles = MemProfiles::default();

        let pss = book.current_mut().player_mut(PlayerId::P1);
        pss.possible_steps.push(steps("anubis"));
        pss.grade = Grade::Tier02;
        pss.score = 880_000;
        pss.percent_dp = 0.88;
        pss.meter = 9;

        book.commit_stats_to_profiles(&mut profiles);

        let list = profiles
            .machine_profile()
            .find_steps_high_scores(&steps("anubis"))
            .unwrap();
        assert_eq!(list.high_scores.len(), 1);
        assert_eq!(list.high_scores[0].name, ranking_to_fill_in_marker(PlayerId::P1));
        assert_eq!(book.played_stage_stats().len(), 1);
    }

    #[test]
    fn disqualified_players_commit_nothing() {
        let mut book = StatsBook::new();
        let mut profiles = MemProfiles::default();

        let pss = book.current_mut().player_mut(PlayerId::P1);
        pss.possible_steps.push(steps("anubis"));
        pss.score = 500_000;
        pss.disqualified = true;

        book.commit_stats_to_profiles(&mut profiles);
        assert!(
            profiles
                .machine_profile()
                .find_steps_high_scores(&steps("anubis"))
                .is_none()
        );
    }

    #[test]
    fn average_meter_ignores_empty_stages() {
        let mut book = StatsBook::new();
        for meter in [7u32, 0, 9] {
            let mut stats = StageStats::default();
            stats.player_mut(PlayerId::P1).meter = meter;
            book.push_played(stats);
        }
        assert_eq!(book.average_meter(PlayerId::P1), 8);
    }
}
