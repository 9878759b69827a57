//! Machine preferences, theme metrics, and launch-time overrides.
//!
//! Preferences are operator policy (coin mode, stages per credit); theme
//! metrics are presentation-pack policy (extra-stage grade tiers, default
//! modifiers). Both load from a plain INI file and fall back to hard
//! defaults when the file or a key is missing.

use log::{info, warn};
use rustc_hash::FxHashMap;
use std::path::Path;
use std::str::FromStr;

use crate::game::PlayerId;
use crate::game::catalog::{Difficulty, SongId, SortOrder};
use crate::game::profile::Grade;

// --- Minimal INI reader ---
#[derive(Debug, Default)]
pub struct IniFile {
    sections: FxHashMap<String, FxHashMap<String, String>>,
}

impl IniFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<(), std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        self.sections.clear();

        let mut current_section: Option<String> = None;

        for raw_line in content.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') && line.len() >= 2 {
                let section = line[1..line.len() - 1].trim().to_string();
                current_section = Some(section.clone());
                self.sections.entry(section).or_default();
                continue;
            }

            if let Some(eq_idx) = line.find('=') {
                let (key_raw, value_raw) = line.split_at(eq_idx);
                let key = key_raw.trim();
                if key.is_empty() {
                    continue;
                }
                let value = value_raw[1..].trim().to_string();
                let section = current_section.clone().unwrap_or_default();
                self.sections
                    .entry(section)
                    .or_default()
                    .insert(key.to_string(), value);
            }
        }

        Ok(())
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(key))
            .map(String::as_str)
    }

    fn get_bool(&self, section: &str, key: &str, out: &mut bool) {
        if let Some(v) = self.get(section, key) {
            match v {
                "1" | "true" | "yes" => *out = true,
                "0" | "false" | "no" => *out = false,
                _ => warn!("Ignoring malformed boolean {section}::{key}={v}"),
            }
        }
    }

    fn get_parse<T: FromStr>(&self, section: &str, key: &str, out: &mut T) {
        if let Some(v) = self.get(section, key) {
            match v.parse::<T>() {
                Ok(parsed) => *out = parsed,
                Err(_) => warn!("Ignoring malformed value {section}::{key}={v}"),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoinMode {
    #[default]
    Home,
    Pay,
    Free,
}

impl FromStr for CoinMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "home" => Ok(Self::Home),
            "pay" => Ok(Self::Pay),
            "free" => Ok(Self::Free),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Premium {
    #[default]
    Off,
    /// Doubles play costs a single-player price.
    DoubleFor1Credit,
    /// A second player joins on the first player's credit.
    TwoPlayersFor1Credit,
}

impl FromStr for Premium {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "doublefor1credit" => Ok(Self::DoubleFor1Credit),
            "2playersfor1credit" | "twoplayersfor1credit" => Ok(Self::TwoPlayersFor1Credit),
            _ => Err(()),
        }
    }
}

/// Operator preferences, `[Options]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct Preferences {
    pub songs_per_play: u32,
    pub coins_per_credit: i32,
    pub coin_mode: CoinMode,
    pub premium: Premium,
    /// Persistent event mode; the session can also force it temporarily.
    pub event_mode: bool,
    pub allow_extra_stage: bool,
    /// Disqualify ranked scores earned with easier-than-normal modifiers.
    pub disqualification: bool,
    pub default_modifiers: String,
    pub allow_multiple_high_score_with_same_name: bool,
    pub max_high_scores_per_list: usize,
    pub minimum1_full_song_in_courses: bool,
    pub fail_off_for_first_stage_easy: bool,
    pub fail_off_in_beginner: bool,
    pub lock_course_difficulties: bool,
    /// Play attract sounds every Nth pass through the loop; 0 disables.
    pub attract_sound_frequency: u32,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            songs_per_play: 3,
            coins_per_credit: 1,
            coin_mode: CoinMode::Home,
            premium: Premium::Off,
            event_mode: false,
            allow_extra_stage: true,
            disqualification: false,
            default_modifiers: String::new(),
            allow_multiple_high_score_with_same_name: true,
            max_high_scores_per_list: 10,
            minimum1_full_song_in_courses: false,
            fail_off_for_first_stage_easy: false,
            fail_off_in_beginner: false,
            lock_course_difficulties: true,
            attract_sound_frequency: 1,
        }
    }
}

const OPTIONS: &str = "Options";
const THEME: &str = "Theme";

impl Preferences {
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let mut ini = IniFile::new();
        if let Err(e) = ini.load(&path) {
            info!(
                "No preferences at '{}' ({}); using defaults.",
                path.as_ref().display(),
                e
            );
            return Self::default();
        }
        Self::from_ini(&ini)
    }

    pub fn from_ini(ini: &IniFile) -> Self {
        let mut p = Self::default();
        ini.get_parse(OPTIONS, "SongsPerPlay", &mut p.songs_per_play);
        ini.get_parse(OPTIONS, "CoinsPerCredit", &mut p.coins_per_credit);
        ini.get_parse(OPTIONS, "CoinMode", &mut p.coin_mode);
        ini.get_parse(OPTIONS, "Premium", &mut p.premium);
        ini.get_bool(OPTIONS, "EventMode", &mut p.event_mode);
        ini.get_bool(OPTIONS, "AllowExtraStage", &mut p.allow_extra_stage);
        ini.get_bool(OPTIONS, "Disqualification", &mut p.disqualification);
        if let Some(v) = ini.get(OPTIONS, "DefaultModifiers") {
            p.default_modifiers = v.to_string();
        }
        ini.get_bool(
            OPTIONS,
            "AllowMultipleHighScoreWithSameName",
            &mut p.allow_multiple_high_score_with_same_name,
        );
        ini.get_parse(OPTIONS, "MaxHighScoresPerList", &mut p.max_high_scores_per_list);
        ini.get_bool(
            OPTIONS,
            "Minimum1FullSongInCourses",
            &mut p.minimum1_full_song_in_courses,
        );
        ini.get_bool(
            OPTIONS,
            "FailOffForFirstStageEasy",
            &mut p.fail_off_for_first_stage_easy,
        );
        ini.get_bool(OPTIONS, "FailOffInBeginner", &mut p.fail_off_in_beginner);
        ini.get_bool(
            OPTIONS,
            "LockCourseDifficulties",
            &mut p.lock_course_difficulties,
        );
        ini.get_parse(
            OPTIONS,
            "AttractSoundFrequency",
            &mut p.attract_sound_frequency,
        );
        p
    }
}

/// Theme-pack metrics, `[Theme]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct ThemeMetrics {
    pub allow_late_join: bool,
    pub use_name_blacklist: bool,
    pub grade_tier_for_extra_1: Grade,
    pub grade_tier_for_extra_2: Grade,
    pub stage_player_mods_forced: bool,
    pub stage_song_mods_forced: bool,
    pub default_modifiers: String,
    pub default_note_skin: String,
    pub personal_record_feats: bool,
    pub category_record_feats: bool,
    pub difficulties_to_show: Vec<Difficulty>,
    pub course_difficulties_to_show: Vec<Difficulty>,
    pub first_attract_screen: String,
    pub default_sort: Option<SortOrder>,
    pub default_song: Option<SongId>,
}

impl Default for ThemeMetrics {
    fn default() -> Self {
        Self {
            allow_late_join: false,
            use_name_blacklist: false,
            grade_tier_for_extra_1: Grade::Tier03,
            grade_tier_for_extra_2: Grade::Tier02,
            stage_player_mods_forced: false,
            stage_song_mods_forced: false,
            default_modifiers: String::new(),
            default_note_skin: "default".to_string(),
            personal_record_feats: true,
            category_record_feats: false,
            difficulties_to_show: vec![
                Difficulty::Beginner,
                Difficulty::Easy,
                Difficulty::Medium,
                Difficulty::Hard,
                Difficulty::Challenge,
            ],
            course_difficulties_to_show: vec![
                Difficulty::Easy,
                Difficulty::Medium,
                Difficulty::Hard,
            ],
            first_attract_screen: "ScreenTitleMenu".to_string(),
            default_sort: Some(SortOrder::Group),
            default_song: None,
        }
    }
}

impl ThemeMetrics {
    pub fn from_ini(ini: &IniFile) -> Self {
        let mut t = Self::default();
        ini.get_bool(THEME, "AllowLateJoin", &mut t.allow_late_join);
        ini.get_bool(THEME, "UseNameBlacklist", &mut t.use_name_blacklist);
        ini.get_parse(THEME, "GradeTierForExtra1", &mut t.grade_tier_for_extra_1);
        ini.get_parse(THEME, "GradeTierForExtra2", &mut t.grade_tier_for_extra_2);
        ini.get_bool(
            THEME,
            "AreStagePlayerModsForced",
            &mut t.stage_player_mods_forced,
        );
        ini.get_bool(THEME, "AreStageSongModsForced", &mut t.stage_song_mods_forced);
        if let Some(v) = ini.get(THEME, "DefaultModifiers") {
            t.default_modifiers = v.to_string();
        }
        if let Some(v) = ini.get(THEME, "DefaultNoteSkin") {
            t.default_note_skin = v.to_string();
        }
        ini.get_bool(THEME, "PersonalRecordFeats", &mut t.personal_record_feats);
        ini.get_bool(THEME, "CategoryRecordFeats", &mut t.category_record_feats);
        if let Some(v) = ini.get(THEME, "FirstAttractScreen") {
            t.first_attract_screen = v.to_string();
        }
        if let Some(v) = ini.get(THEME, "DefaultSort") {
            match v.parse::<SortOrder>() {
                Ok(sort) => t.default_sort = Some(sort),
                Err(()) => warn!("Ignoring malformed DefaultSort={v}"),
            }
        }
        if let Some(v) = ini.get(THEME, "DefaultSong") {
            if !v.is_empty() {
                t.default_song = Some(SongId::new(v));
            }
        }
        t
    }
}

/// Command-line join/mode overrides, re-applied at the end of every session
/// reset so they win over defaults. Malformed values are a startup bug and
/// abort, per the error-handling contract.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchOverrides {
    pub join_players: Vec<PlayerId>,
    pub mode_commands: Vec<String>,
}

impl LaunchOverrides {
    /// Parse repeatable `--player=N` / `--mode=CMD` arguments.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overrides = Self::default();
        for arg in args {
            let arg = arg.as_ref();
            if let Some(value) = arg.strip_prefix("--player=") {
                let ix = value
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(PlayerId::from_index);
                match ix {
                    Some(pn) => overrides.join_players.push(pn),
                    None => panic!("Invalid argument \"--player={value}\"."),
                }
            } else if let Some(value) = arg.strip_prefix("--mode=") {
                overrides.mode_commands.push(value.to_string());
            }
        }
        overrides
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ini_from(text: &str) -> IniFile {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.ini");
        std::fs::write(&path, text).unwrap();
        let mut ini = IniFile::new();
        ini.load(&path).unwrap();
        ini
    }

    #[test]
    fn preferences_parse_with_fallbacks() {
        let ini = ini_from(
            "[Options]\nSongsPerPlay = 5\nCoinMode = pay\nPremium = 2playersfor1credit\nEventMode = bogus\n",
        );
        let p = Preferences::from_ini(&ini);
        assert_eq!(p.songs_per_play, 5);
        assert_eq!(p.coin_mode, CoinMode::Pay);
        assert_eq!(p.premium, Premium::TwoPlayersFor1Credit);
        // Malformed values keep the default.
        assert!(!p.event_mode);
        assert_eq!(p.coins_per_credit, 1);
    }

    #[test]
    fn theme_metrics_parse_grade_tiers() {
        let ini = ini_from("[Theme]\nGradeTierForExtra1 = tier02\nAllowLateJoin = 1\n");
        let t = ThemeMetrics::from_ini(&ini);
        assert_eq!(t.grade_tier_for_extra_1, Grade::Tier02);
        assert!(t.allow_late_join);
        assert_eq!(t.grade_tier_for_extra_2, Grade::Tier02);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let p = Preferences::load("/nonexistent/prefs.ini");
        assert_eq!(p, Preferences::default());
    }

    #[test]
    fn launch_overrides_parse_players_and_modes() {
        let o = LaunchOverrides::from_args(["--player=1", "--mode=playmode,oni", "--player=2"]);
        assert_eq!(o.join_players, vec![PlayerId::P1, PlayerId::P2]);
        assert_eq!(o.mode_commands, vec!["playmode,oni".to_string()]);
    }

    #[test]
    #[should_panic(expected = "Invalid argument")]
    fn malformed_player_override_is_fatal() {
        let _ = LaunchOverrides::from_args(["--player=zero"]);
    }
}
