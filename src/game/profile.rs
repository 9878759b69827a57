//! Profiles, grades, and high-score tables.
//!
//! A profile is a serializable snapshot (serde/JSON on disk); the session
//! talks to profiles through the [`ProfileManager`] collaborator so card
//! mounting and disk layout stay outside the core.

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::game::catalog::{CourseId, Difficulty, RankingCategory, SongId, SortOrder, StepsId, TrailId};
use crate::game::style::StepsType;
use crate::game::{MAX_PLAYERS, PlayerId};

/// Letter-grade tiers, best first. "At or better than tier X" is `<= X`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Grade {
    Tier01,
    Tier02,
    Tier03,
    Tier04,
    Tier05,
    Tier06,
    Tier07,
    Failed,
    /// Category feats have no meaningful grade.
    NoData,
}

impl std::str::FromStr for Grade {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tier01" => Ok(Self::Tier01),
            "tier02" => Ok(Self::Tier02),
            "tier03" => Ok(Self::Tier03),
            "tier04" => Ok(Self::Tier04),
            "tier05" => Ok(Self::Tier05),
            "tier06" => Ok(Self::Tier06),
            "tier07" => Ok(Self::Tier07),
            "failed" => Ok(Self::Failed),
            _ => Err(()),
        }
    }
}

/// Placeholder written into a freshly earned high-score slot until the
/// player enters a name. Per-player so simultaneous feats don't collide.
pub fn ranking_to_fill_in_marker(pn: PlayerId) -> &'static str {
    match pn {
        PlayerId::P1 => "#P1#",
        PlayerId::P2 => "#P2#",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighScore {
    pub name: String,
    pub grade: Grade,
    pub score: u32,
    /// Dance-point percentage, 0.0..=1.0.
    pub percent_dp: f32,
    pub achieved: DateTime<Utc>,
}

impl HighScore {
    pub fn new(name: impl Into<String>, grade: Grade, score: u32, percent_dp: f32) -> Self {
        Self {
            name: name.into(),
            grade,
            score,
            percent_dp,
            achieved: Utc::now(),
        }
    }
}

/// One ranked list, kept sorted best-first by score.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HighScoreList {
    pub high_scores: Vec<HighScore>,
}

impl HighScoreList {
    /// Insert keeping best-first order; returns the slot index.
    pub fn add(&mut self, hs: HighScore) -> usize {
        let ix = self
            .high_scores
            .iter()
            .position(|existing| hs.score > existing.score)
            .unwrap_or(self.high_scores.len());
        self.high_scores.insert(ix, hs);
        ix
    }

    /// Keep only the best entry per distinct name. The list is best-first,
    /// so the first occurrence of each name survives.
    pub fn remove_all_but_one_of_each_name(&mut self) {
        let mut seen: Vec<String> = Vec::new();
        self.high_scores.retain(|hs| {
            if seen.iter().any(|n| n == &hs.name) {
                false
            } else {
                seen.push(hs.name.clone());
                true
            }
        });
    }

    pub fn clamp_size(&mut self, max_size: usize) {
        self.high_scores.truncate(max_size);
    }
}

/// Per-profile persisted state: lifetime counters, last-session settings,
/// and the three high-score table families.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Profile {
    pub display_name: String,
    pub total_plays: u32,
    pub total_play_seconds: u64,
    /// Saved preferred-modifier string, if the player ever saved one.
    pub default_modifiers: Option<String>,
    pub sort_order: Option<SortOrder>,
    pub last_difficulty: Option<Difficulty>,
    pub last_course_difficulty: Option<Difficulty>,
    pub last_steps_type: Option<StepsType>,
    pub last_song: Option<SongId>,
    pub last_course: Option<CourseId>,
    pub steps_high_scores: Vec<(StepsId, HighScoreList)>,
    pub course_high_scores: Vec<(TrailId, HighScoreList)>,
    pub category_high_scores: Vec<((StepsType, RankingCategory), HighScoreList)>,
}

impl Profile {
    pub fn steps_high_score_list(&mut self, id: &StepsId) -> &mut HighScoreList {
        if let Some(ix) = self.steps_high_scores.iter().position(|(k, _)| k == id) {
            return &mut self.steps_high_scores[ix].1;
        }
        self.steps_high_scores.push((id.clone(), HighScoreList::default()));
        &mut self.steps_high_scores.last_mut().unwrap().1
    }

    pub fn find_steps_high_scores(&self, id: &StepsId) -> Option<&HighScoreList> {
        self.steps_high_scores
            .iter()
            .find(|(k, _)| k == id)
            .map(|(_, l)| l)
    }

    pub fn course_high_score_list(&mut self, id: &TrailId) -> &mut HighScoreList {
        if let Some(ix) = self.course_high_scores.iter().position(|(k, _)| k == id) {
            return &mut self.course_high_scores[ix].1;
        }
        self.course_high_scores.push((id.clone(), HighScoreList::default()));
        &mut self.course_high_scores.last_mut().unwrap().1
    }

    pub fn find_course_high_scores(&self, id: &TrailId) -> Option<&HighScoreList> {
        self.course_high_scores
            .iter()
            .find(|(k, _)| k == id)
            .map(|(_, l)| l)
    }

    pub fn category_high_score_list(
        &mut self,
        st: StepsType,
        rc: RankingCategory,
    ) -> &mut HighScoreList {
        if let Some(ix) = self
            .category_high_scores
            .iter()
            .position(|(k, _)| *k == (st, rc))
        {
            return &mut self.category_high_scores[ix].1;
        }
        self.category_high_scores
            .push(((st, rc), HighScoreList::default()));
        &mut self.category_high_scores.last_mut().unwrap().1
    }

    pub fn find_category_high_scores(
        &self,
        st: StepsType,
        rc: RankingCategory,
    ) -> Option<&HighScoreList> {
        self.category_high_scores
            .iter()
            .find(|(k, _)| *k == (st, rc))
            .map(|(_, l)| l)
    }

    /// Collapse every list to its best entry per name, then clamp; used
    /// after ranking names are written.
    pub fn collapse_duplicate_names(&mut self) {
        for (_, list) in &mut self.steps_high_scores {
            list.remove_all_but_one_of_each_name();
        }
        for (_, list) in &mut self.course_high_scores {
            list.remove_all_but_one_of_each_name();
        }
    }

    pub fn clamp_high_score_sizes(&mut self, max_size: usize) {
        for (_, list) in &mut self.steps_high_scores {
            list.clamp_size(max_size);
        }
        for (_, list) in &mut self.course_high_scores {
            list.clamp_size(max_size);
        }
        for (_, list) in &mut self.category_high_scores {
            list.clamp_size(max_size);
        }
    }
}

pub fn save_profile_json(path: &Path, profile: &Profile) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(profile)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    fs::write(path, json)
}

pub fn load_profile_json(path: &Path) -> std::io::Result<Profile> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| std::io::Error::other(e.to_string()))
}

/// The profile collaborator consumed by the session. All calls are
/// synchronous; failures come back as `false`/`None`, never panics.
pub trait ProfileManager {
    fn is_persistent_profile(&self, pn: PlayerId) -> bool;
    fn profile(&self, pn: PlayerId) -> Option<&Profile>;
    fn profile_mut(&mut self, pn: PlayerId) -> Option<&mut Profile>;
    fn machine_profile(&self) -> &Profile;
    fn machine_profile_mut(&mut self) -> &mut Profile;

    /// Try to load any available profile for the player (card first, then
    /// local). Returns false if nothing was loadable.
    fn load_first_available_profile(&mut self, pn: PlayerId, load_edits: bool) -> bool;
    fn save_profile(&mut self, pn: PlayerId) -> bool;
    fn save_machine_profile(&mut self) -> bool;
    fn unload_profile(&mut self, pn: PlayerId);

    fn profile_was_loaded_from_memory_card(&self, pn: PlayerId) -> bool;
    /// Whether a default local profile id is configured for this side.
    fn has_default_local_profile(&self, pn: PlayerId) -> bool;
    fn player_name(&self, pn: PlayerId) -> Option<String> {
        self.profile(pn)
            .map(|p| p.display_name.clone())
            .filter(|n| !n.is_empty())
    }
}

/// JSON-file-backed profile manager for hosts without memory cards: one
/// machine profile plus up to one local profile per side.
#[derive(Debug)]
pub struct LocalProfileManager {
    root: PathBuf,
    machine: Profile,
    players: [Option<Profile>; MAX_PLAYERS],
    default_ids: [Option<String>; MAX_PLAYERS],
}

impl LocalProfileManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let machine_path = root.join("machine.json");
        let machine = match load_profile_json(&machine_path) {
            Ok(p) => p,
            Err(e) => {
                info!(
                    "No machine profile at '{}' ({}); starting fresh.",
                    machine_path.display(),
                    e
                );
                Profile::default()
            }
        };
        Self {
            root,
            machine,
            players: [None, None],
            default_ids: [None, None],
        }
    }

    pub fn set_default_local_profile(&mut self, pn: PlayerId, id: impl Into<String>) {
        self.default_ids[pn.index()] = Some(id.into());
    }

    fn player_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }
}

impl ProfileManager for LocalProfileManager {
    fn is_persistent_profile(&self, pn: PlayerId) -> bool {
        self.players[pn.index()].is_some()
    }

    fn profile(&self, pn: PlayerId) -> Option<&Profile> {
        self.players[pn.index()].as_ref()
    }

    fn profile_mut(&mut self, pn: PlayerId) -> Option<&mut Profile> {
        self.players[pn.index()].as_mut()
    }

    fn machine_profile(&self) -> &Profile {
        &self.machine
    }

    fn machine_profile_mut(&mut self) -> &mut Profile {
        &mut self.machine
    }

    fn load_first_available_profile(&mut self, pn: PlayerId, _load_edits: bool) -> bool {
        let Some(id) = self.default_ids[pn.index()].clone() else {
            return false;
        };
        match load_profile_json(&self.player_path(&id)) {
            Ok(profile) => {
                self.players[pn.index()] = Some(profile);
                true
            }
            Err(e) => {
                warn!("Failed to load profile '{id}' for {pn}: {e}");
                false
            }
        }
    }

    fn save_profile(&mut self, pn: PlayerId) -> bool {
        let Some(id) = self.default_ids[pn.index()].clone() else {
            return false;
        };
        let Some(profile) = &self.players[pn.index()] else {
            return false;
        };
        match save_profile_json(&self.player_path(&id), profile) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to save profile '{id}' for {pn}: {e}");
                false
            }
        }
    }

    fn save_machine_profile(&mut self) -> bool {
        let path = self.root.join("machine.json");
        match save_profile_json(&path, &self.machine) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to save machine profile: {e}");
                false
            }
        }
    }

    fn unload_profile(&mut self, pn: PlayerId) {
        self.players[pn.index()] = None;
    }

    fn profile_was_loaded_from_memory_card(&self, _pn: PlayerId) -> bool {
        false
    }

    fn has_default_local_profile(&self, pn: PlayerId) -> bool {
        self.default_ids[pn.index()].is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::style::StepsType;

    fn steps_id(song: &str) -> StepsId {
        StepsId {
            song: SongId::new(song),
            steps_type: StepsType::DanceSingle,
            difficulty: Difficulty::Hard,
        }
    }

    #[test]
    fn add_keeps_best_first_order() {
        let mut list = HighScoreList::default();
        list.add(HighScore::new("AAA", Grade::Tier03, 500, 0.5));
        let ix = list.add(HighScore::new("BBB", Grade::Tier01, 900, 0.9));
        assert_eq!(ix, 0);
        let ix = list.add(HighScore::new("CCC", Grade::Tier05, 700, 0.7));
        assert_eq!(ix, 1);
        let scores: Vec<u32> = list.high_scores.iter().map(|h| h.score).collect();
        assert_eq!(scores, vec![900, 700, 500]);
    }

    #[test]
    fn duplicate_names_collapse_to_best() {
        let mut list = HighScoreList::default();
        list.add(HighScore::new("AAA", Grade::Tier03, 500, 0.5));
        list.add(HighScore::new("AAA", Grade::Tier01, 900, 0.9));
        list.add(HighScore::new("BBB", Grade::Tier05, 700, 0.7));
        list.remove_all_but_one_of_each_name();
        assert_eq!(list.high_scores.len(), 2);
        assert_eq!(list.high_scores[0].score, 900);
        assert_eq!(list.high_scores[1].name, "BBB");
    }

    #[test]
    fn clamp_truncates_from_the_bottom() {
        let mut list = HighScoreList::default();
        for (i, score) in [900u32, 700, 500].into_iter().enumerate() {
            list.add(HighScore::new(format!("N{i}"), Grade::Tier03, score, 0.5));
        }
        list.clamp_size(2);
        assert_eq!(list.high_scores.len(), 2);
        assert_eq!(list.high_scores.last().unwrap().score, 700);
    }

    #[test]
    fn profile_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p1.json");

        let mut profile = Profile {
            display_name: "TEST".to_string(),
            total_plays: 7,
            ..Profile::default()
        };
        profile
            .steps_high_score_list(&steps_id("song-a"))
            .add(HighScore::new("AAA", Grade::Tier02, 880, 0.88));

        save_profile_json(&path, &profile).unwrap();
        let loaded = load_profile_json(&path).unwrap();
        assert_eq!(profile, loaded);
    }

    #[test]
    fn local_manager_loads_and_saves_default_profile() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = LocalProfileManager::new(dir.path());
        mgr.set_default_local_profile(PlayerId::P1, "alice");

        // Nothing on disk yet.
        assert!(!mgr.load_first_available_profile(PlayerId::P1, false));

        let seeded = Profile {
            display_name: "ALICE".to_string(),
            ..Profile::default()
        };
        save_profile_json(&dir.path().join("alice.json"), &seeded).unwrap();

        assert!(mgr.load_first_available_profile(PlayerId::P1, false));
        assert!(mgr.is_persistent_profile(PlayerId::P1));
        assert_eq!(mgr.player_name(PlayerId::P1).as_deref(), Some("ALICE"));

        mgr.profile_mut(PlayerId::P1).unwrap().total_plays = 3;
        assert!(mgr.save_profile(PlayerId::P1));
        let on_disk = load_profile_json(&dir.path().join("alice.json")).unwrap();
        assert_eq!(on_disk.total_plays, 3);

        mgr.unload_profile(PlayerId::P1);
        assert!(!mgr.is_persistent_profile(PlayerId::P1));
    }
}
