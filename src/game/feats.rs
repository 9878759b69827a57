//! Ranking feats: which high-score slots the last game earned, and how a
//! player's entered name gets written into them.
//!
//! A feat slot holds the per-player fill-in marker (see
//! [`ranking_to_fill_in_marker`]) until `store_ranking_name` replaces it.
//! Collection is read-only and repeatable; storing mutates the profiles.

use log::{trace, warn};
use std::path::PathBuf;

use crate::game::catalog::{CourseId, RankingCategory, SongId, StepsId, TrailId};
use crate::game::profile::{Grade, Profile, ranking_to_fill_in_marker};
use crate::game::session::Session;
use crate::game::stage::PlayMode;
use crate::game::style::StepsType;
use crate::game::PlayerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatKind {
    Song,
    Course,
    Category,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatBoard {
    Machine,
    Personal,
}

/// Which high-score list a feat lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatList {
    Steps(StepsId),
    Course(TrailId),
    Category(StepsType, RankingCategory),
}

/// Durable address of one earned high-score slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatSlot {
    pub board: FeatBoard,
    pub list: FeatList,
    pub index: usize,
}

/// One feat, ready for the name-entry and evaluation screens.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingFeat {
    pub kind: FeatKind,
    pub song: Option<SongId>,
    pub steps: Option<StepsId>,
    pub course: Option<CourseId>,
    pub label: String,
    pub grade: Grade,
    pub score: u32,
    pub percent_dp: f32,
    pub banner: Option<String>,
    pub slot: FeatSlot,
}

/// Source of blacklisted name fragments, one per line.
pub trait BlacklistSource {
    fn lines(&self) -> Vec<String>;
}

/// Reads the blacklist from a text file. A missing or unreadable file is an
/// empty blacklist, with a warning.
#[derive(Debug)]
pub struct FileBlacklist {
    path: PathBuf,
}

impl FileBlacklist {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl BlacklistSource for FileBlacklist {
    fn lines(&self) -> Vec<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => text.lines().map(str::to_string).collect(),
            Err(e) => {
                warn!("Couldn't read name blacklist '{}': {e}", self.path.display());
                Vec::new()
            }
        }
    }
}

/// Case-insensitive substring match against every non-empty blacklist line.
pub fn name_matches_blacklist(name: &str, lines: &[String]) -> bool {
    let name = name.to_uppercase();
    for line in lines {
        let fragment = line.trim().to_uppercase();
        if fragment.is_empty() {
            continue;
        }
        if name.contains(&fragment) {
            trace!("entered name \"{name}\" matches blacklisted item \"{fragment}\"");
            return true;
        }
    }
    false
}

fn scan_marker_slots<'a>(
    list: &'a [crate::game::profile::HighScore],
    marker: &str,
) -> impl Iterator<Item = (usize, &'a crate::game::profile::HighScore)> {
    list.iter()
        .enumerate()
        .filter(move |(_, hs)| hs.name == marker)
}

impl Session {
    /// All high-score slots this player earned in the game just played,
    /// machine board first.
    pub fn ranking_feats(&self, pn: PlayerId) -> Vec<RankingFeat> {
        if !self.is_human_player(pn) {
            return Vec::new();
        }
        let marker = ranking_to_fill_in_marker(pn);
        let mut feats = Vec::new();

        let play_mode = self
            .play_mode
            .expect("ranking feats requested before a play mode was set");
        match play_mode {
            PlayMode::Regular | PlayMode::Battle | PlayMode::Rave => {
                self.collect_song_feats(pn, marker, &mut feats);
                if self.theme.category_record_feats {
                    self.collect_category_feats(pn, marker, &mut feats);
                }
            }
            PlayMode::Oni | PlayMode::Nonstop | PlayMode::Endless => {
                self.collect_course_feats(pn, marker, &mut feats);
            }
        }
        feats
    }

    pub fn any_player_has_ranking_feats(&self) -> bool {
        PlayerId::ALL
            .into_iter()
            .any(|pn| !self.ranking_feats(pn).is_empty())
    }

    fn collect_song_feats(&self, pn: PlayerId, marker: &str, out: &mut Vec<RankingFeat>) {
        // Find unique songs and steps that were played; a song replayed in
        // event mode must not produce duplicate feats.
        let mut song_and_steps: Vec<(SongId, StepsId)> = Vec::new();
        for stage in self.deps.stats.played_stage_stats() {
            let Some(song) = stage.played_songs.first() else {
                continue;
            };
            let Some(steps) = stage.player(pn).possible_steps.first() else {
                continue;
            };
            song_and_steps.push((song.clone(), steps.clone()));
        }
        song_and_steps.sort();
        song_and_steps.dedup();

        let machine = self.deps.profiles.machine_profile();
        let personal = if self.theme.personal_record_feats {
            self.deps.profiles.profile(pn)
        } else {
            None
        };

        for (song_id, steps_id) in song_and_steps {
            let song = self.deps.catalog.song(&song_id);
            let title = song.map_or_else(|| song_id.to_string(), |s| s.title.clone());
            let banner = song.and_then(|s| s.banner_path.clone());
            let what = format!("{title} {}", steps_id.difficulty.as_str());

            if let Some(list) = machine.find_steps_high_scores(&steps_id) {
                for (ix, hs) in scan_marker_slots(&list.high_scores, marker) {
                    out.push(RankingFeat {
                        kind: FeatKind::Song,
                        song: Some(song_id.clone()),
                        steps: Some(steps_id.clone()),
                        course: None,
                        label: format!("MR #{} in {what}", ix + 1),
                        grade: hs.grade,
                        score: hs.score,
                        percent_dp: hs.percent_dp,
                        banner: banner.clone(),
                        slot: FeatSlot {
                            board: FeatBoard::Machine,
                            list: FeatList::Steps(steps_id.clone()),
                            index: ix,
                        },
                    });
                }
            }

            if let Some(profile) = personal
                && let Some(list) = profile.find_steps_high_scores(&steps_id)
            {
                for (ix, hs) in scan_marker_slots(&list.high_scores, marker) {
                    out.push(RankingFeat {
                        kind: FeatKind::Song,
                        song: Some(song_id.clone()),
                        steps: Some(steps_id.clone()),
                        course: None,
                        label: format!("PR #{} in {what}", ix + 1),
                        grade: hs.grade,
                        score: hs.score,
                        percent_dp: hs.percent_dp,
                        banner: banner.clone(),
                        slot: FeatSlot {
                            board: FeatBoard::Personal,
                            list: FeatList::Steps(steps_id.clone()),
                            index: ix,
                        },
                    });
                }
            }
        }
    }

    fn collect_category_feats(&self, pn: PlayerId, marker: &str, out: &mut Vec<RankingFeat>) {
        let Some(style) = self.cur_style else {
            return;
        };
        let st = style.steps_type;
        let meter = self.deps.stats.average_meter(pn);

        let machine = self.deps.profiles.machine_profile();
        let personal = if self.theme.personal_record_feats {
            self.deps.profiles.profile(pn)
        } else {
            None
        };

        for rc in RankingCategory::ALL {
            let what = format!("Type {} ({meter})", rc.letter());

            if let Some(list) = machine.find_category_high_scores(st, rc) {
                for (ix, hs) in scan_marker_slots(&list.high_scores, marker) {
                    out.push(RankingFeat {
                        kind: FeatKind::Category,
                        song: None,
                        steps: None,
                        course: None,
                        label: format!("MR #{} in {what}", ix + 1),
                        grade: Grade::NoData,
                        score: hs.score,
                        percent_dp: hs.percent_dp,
                        banner: None,
                        slot: FeatSlot {
                            board: FeatBoard::Machine,
                            list: FeatList::Category(st, rc),
                            index: ix,
                        },
                    });
                }
            }

            if let Some(profile) = personal
                && let Some(list) = profile.find_category_high_scores(st, rc)
            {
                for (ix, hs) in scan_marker_slots(&list.high_scores, marker) {
                    out.push(RankingFeat {
                        kind: FeatKind::Category,
                        song: None,
                        steps: None,
                        course: None,
                        label: format!("PR #{} in {what}", ix + 1),
                        grade: Grade::NoData,
                        score: hs.score,
                        percent_dp: hs.percent_dp,
                        banner: None,
                        slot: FeatSlot {
                            board: FeatBoard::Personal,
                            list: FeatList::Category(st, rc),
                            index: ix,
                        },
                    });
                }
            }
        }
    }

    fn collect_course_feats(&self, pn: PlayerId, marker: &str, out: &mut Vec<RankingFeat>) {
        let course_id = self
            .cur_course
            .clone()
            .expect("ranking feats requested in course mode with no course");
        let trail = self.slots[pn.index()]
            .cur_trail
            .clone()
            .expect("ranking feats requested in course mode with no trail");

        let course = self.deps.catalog.course(&course_id);
        let title = course.map_or_else(|| course_id.to_string(), |c| c.title.clone());
        let banner = course.and_then(|c| c.banner_path.clone());
        let mut what = title;
        if trail.difficulty != crate::game::catalog::Difficulty::Medium {
            what = format!("{what} {}", trail.difficulty.as_str());
        }

        let machine = self.deps.profiles.machine_profile();
        if let Some(list) = machine.find_course_high_scores(&trail) {
            for (ix, hs) in scan_marker_slots(&list.high_scores, marker) {
                out.push(RankingFeat {
                    kind: FeatKind::Course,
                    song: None,
                    steps: None,
                    course: Some(course_id.clone()),
                    label: format!("MR #{} in {what}", ix + 1),
                    grade: hs.grade,
                    score: hs.score,
                    percent_dp: hs.percent_dp,
                    banner: banner.clone(),
                    slot: FeatSlot {
                        board: FeatBoard::Machine,
                        list: FeatList::Course(trail.clone()),
                        index: ix,
                    },
                });
            }
        }

        if self.theme.personal_record_feats
            && let Some(profile) = self.deps.profiles.profile(pn)
            && let Some(list) = profile.find_course_high_scores(&trail)
        {
            for (ix, hs) in scan_marker_slots(&list.high_scores, marker) {
                out.push(RankingFeat {
                    kind: FeatKind::Course,
                    song: None,
                    steps: None,
                    course: Some(course_id.clone()),
                    label: format!("PR #{} in {what}", ix + 1),
                    grade: hs.grade,
                    score: hs.score,
                    percent_dp: hs.percent_dp,
                    banner: banner.clone(),
                    slot: FeatSlot {
                        board: FeatBoard::Personal,
                        list: FeatList::Course(trail.clone()),
                        index: ix,
                    },
                });
            }
        }
    }

    /// Write the entered name into every slot this player earned. The name
    /// is uppercased first; a blacklisted name fills nothing, leaving the
    /// markers in place. Either way the machine lists are then collapsed
    /// (when the operator disallows duplicate names) and clamped.
    pub fn store_ranking_name(&mut self, pn: PlayerId, name: &str) {
        let mut name = name.to_uppercase();

        if self.theme.use_name_blacklist
            && name_matches_blacklist(&name, &self.deps.blacklist.lines())
        {
            name.clear();
        }

        if !name.is_empty() {
            let feats = self.ranking_feats(pn);
            for feat in feats {
                if write_name_into_slot(self, pn, &feat.slot, &name) {
                    self.filled_name_slots.push(feat.slot);
                }
            }
        }

        let allow_duplicates = self.prefs.allow_multiple_high_score_with_same_name;
        let max_size = self.prefs.max_high_scores_per_list;
        let machine = self.deps.profiles.machine_profile_mut();
        if !allow_duplicates {
            machine.collapse_duplicate_names();
        }
        machine.clamp_high_score_sizes(max_size);
    }

    /// Slots whose markers were replaced by a real name this game.
    pub fn filled_name_slots(&self) -> &[FeatSlot] {
        &self.filled_name_slots
    }
}

fn write_name_into_slot(session: &mut Session, pn: PlayerId, slot: &FeatSlot, name: &str) -> bool {
    let profile: &mut Profile = match slot.board {
        FeatBoard::Machine => session.deps.profiles.machine_profile_mut(),
        FeatBoard::Personal => match session.deps.profiles.profile_mut(pn) {
            Some(profile) => profile,
            None => return false,
        },
    };
    let list = match &slot.list {
        FeatList::Steps(id) => profile.steps_high_score_list(id),
        FeatList::Course(id) => profile.course_high_score_list(id),
        FeatList::Category(st, rc) => profile.category_high_score_list(*st, *rc),
    };
    match list.high_scores.get_mut(slot.index) {
        Some(hs) => {
            hs.name = name.to_string();
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Preferences, ThemeMetrics};
    use crate::game::catalog::Difficulty;
    use crate::game::style::style_by_name;
    use crate::test_utils::fakes::{
        MemProfiles, SessionFixture, session_fixture, song, steps,
    };

    #[test]
    fn blacklist_matches_substrings_case_insensitively() {
        let lines = vec!["BAD".to_string(), "".to_string(), " rude ".to_string()];
        assert!(name_matches_blacklist("BADBOY", &lines));
        assert!(name_matches_blacklist("badboy", &lines));
        assert!(name_matches_blacklist("xXrUdEXx", &lines));
        assert!(!name_matches_blacklist("GOOD", &lines));
    }

    #[test]
    fn missing_blacklist_file_is_empty() {
        let blacklist = FileBlacklist::new("/nonexistent/blacklist.txt");
        assert!(blacklist.lines().is_empty());
    }

    /// One played and committed stage on "anubis" Hard, in regular mode.
    fn played_fixture(theme: ThemeMetrics, blacklist: Vec<String>) -> SessionFixture {
        let mut fx = session_fixture(
            Preferences::default(),
            theme,
            vec![song("anubis")],
            Vec::new(),
            MemProfiles::default(),
            blacklist,
        );
        let s = &mut fx.session;
        s.join_player(PlayerId::P1);
        s.set_current_style(style_by_name("single"));
        s.set_play_mode(Some(PlayMode::Regular));
        s.cur_song = Some(SongId::new("anubis"));
        s.slots[PlayerId::P1.index()].cur_steps = Some(steps("anubis", Difficulty::Hard));

        s.begin_stage();
        let stats = s.deps.stats.current_mut();
        stats.played_songs.push(SongId::new("anubis"));
        let pss = stats.player_mut(PlayerId::P1);
        pss.possible_steps.push(steps("anubis", Difficulty::Hard));
        pss.grade = Grade::Tier02;
        pss.score = 880_000;
        pss.percent_dp = 0.88;
        pss.meter = 9;
        s.commit_stage_stats();
        s.finish_stage();
        fx
    }

    #[test]
    fn committed_marker_scores_become_song_feats() {
        let fx = played_fixture(ThemeMetrics::default(), Vec::new());
        let feats = fx.session.ranking_feats(PlayerId::P1);

        // Machine board only; no personal profile is loaded.
        assert_eq!(feats.len(), 1);
        let feat = &feats[0];
        assert_eq!(feat.kind, FeatKind::Song);
        assert_eq!(feat.label, "MR #1 in anubis Hard");
        assert_eq!(feat.grade, Grade::Tier02);
        assert!(fx.session.any_player_has_ranking_feats());
        assert!(fx.session.ranking_feats(PlayerId::P2).is_empty());
    }

    #[test]
    fn replaying_a_song_yields_deduplicated_feats() {
        let mut fx = played_fixture(ThemeMetrics::default(), Vec::new());
        let s = &mut fx.session;
        s.prefs.event_mode = true;
        s.begin_stage();
        let stats = s.deps.stats.current_mut();
        stats.played_songs.push(SongId::new("anubis"));
        let pss = stats.player_mut(PlayerId::P1);
        pss.possible_steps.push(steps("anubis", Difficulty::Hard));
        pss.grade = Grade::Tier01;
        pss.score = 920_000;
        pss.percent_dp = 0.92;
        s.commit_stage_stats();
        s.finish_stage();

        // Two history entries, one (song, steps) pair; both marker slots in
        // that one list are reported.
        let feats = s.ranking_feats(PlayerId::P1);
        assert_eq!(feats.len(), 2);
        assert_eq!(feats[0].label, "MR #1 in anubis Hard");
        assert_eq!(feats[1].label, "MR #2 in anubis Hard");
    }

    #[test]
    fn category_feats_appear_when_the_theme_wants_them() {
        let mut theme = ThemeMetrics::default();
        theme.category_record_feats = true;
        let fx = played_fixture(theme, Vec::new());
        let feats = fx.session.ranking_feats(PlayerId::P1);
        assert!(feats.iter().any(|f| f.kind == FeatKind::Category));
        let category = feats.iter().find(|f| f.kind == FeatKind::Category).unwrap();
        assert_eq!(category.label, "MR #1 in Type A (9)");
    }

    #[test]
    fn stored_name_is_uppercased_and_fills_every_slot() {
        let mut fx = played_fixture(ThemeMetrics::default(), Vec::new());
        fx.session.store_ranking_name(PlayerId::P1, "alice");

        assert_eq!(fx.session.filled_name_slots().len(), 1);
        let machine = fx.session.deps.profiles.machine_profile();
        let list = machine
            .find_steps_high_scores(&steps("anubis", Difficulty::Hard))
            .unwrap();
        assert_eq!(list.high_scores[0].name, "ALICE");
    }

    #[test]
    fn blacklisted_name_fills_nothing() {
        let mut theme = ThemeMetrics::default();
        theme.use_name_blacklist = true;
        let mut fx = played_fixture(theme, vec!["BAD".to_string()]);
        fx.session.store_ranking_name(PlayerId::P1, "badboy");

        assert!(fx.session.filled_name_slots().is_empty());
        let machine = fx.session.deps.profiles.machine_profile();
        let list = machine
            .find_steps_high_scores(&steps("anubis", Difficulty::Hard))
            .unwrap();
        assert_eq!(
            list.high_scores[0].name,
            ranking_to_fill_in_marker(PlayerId::P1)
        );
    }

    #[test]
    fn storing_collapses_duplicates_when_the_operator_says_so() {
        let mut fx = played_fixture(ThemeMetrics::default(), Vec::new());
        fx.session.prefs.allow_multiple_high_score_with_same_name = false;

        // Seed an older score under the same name.
        fx.session
            .deps
            .profiles
            .machine_profile_mut()
            .steps_high_score_list(&steps("anubis", Difficulty::Hard))
            .add(crate::game::profile::HighScore::new(
                "ALICE",
                Grade::Tier05,
                500_000,
                0.5,
            ));

        fx.session.store_ranking_name(PlayerId::P1, "alice");
        let machine = fx.session.deps.profiles.machine_profile();
        let list = machine
            .find_steps_high_scores(&steps("anubis", Difficulty::Hard))
            .unwrap();
        assert_eq!(list.high_scores.len(), 1);
        assert_eq!(list.high_scores[0].score, 880_000);
    }

    #[test]
    fn course_mode_reports_trail_feats() {
        let mut fx = session_fixture(
            Preferences::default(),
            ThemeMetrics::default(),
            Vec::new(),
            Vec::new(),
            MemProfiles::default(),
            Vec::new(),
        );
        let s = &mut fx.session;
        s.join_player(PlayerId::P1);
        s.set_play_mode(Some(PlayMode::Oni));
        s.cur_course = Some(CourseId::new("legend"));
        let trail = TrailId {
            course: CourseId::new("legend"),
            steps_type: StepsType::DanceSingle,
            difficulty: Difficulty::Hard,
        };
        s.slots[PlayerId::P1.index()].cur_trail = Some(trail.clone());

        s.begin_stage();
        let pss = s.deps.stats.current_mut().player_mut(PlayerId::P1);
        pss.trail = Some(trail);
        pss.grade = Grade::Tier03;
        pss.score = 700_000;
        pss.percent_dp = 0.7;
        s.commit_stage_stats();
        s.finish_stage();

        let feats = s.ranking_feats(PlayerId::P1);
        assert_eq!(feats.len(), 1);
        assert_eq!(feats[0].kind, FeatKind::Course);
        assert_eq!(feats[0].label, "MR #1 in legend Hard");
    }
}
