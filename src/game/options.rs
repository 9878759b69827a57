//! Player and song modifiers, the Preferred/Stage/Current override stack,
//! and the comma-separated string form used for profile persistence.
//!
//! Parsing is a *merge*: a string only touches the aspects it names, so
//! "mirror" applied on top of "2x" leaves the speed mod alone. Equality is
//! structural on the parsed sets, never on the strings themselves.

use bitflags::bitflags;
use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModsLevel {
    /// What the player picked on the options screens; survives across stages.
    Preferred,
    /// Snapshot taken for the stage being played.
    Stage,
    /// The effective level: Stage when set, else Preferred.
    Current,
}

/// Two-slot override stack. `Current` reads fall through to `Preferred`
/// until a `Stage` value has been assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct ModsStack<T: Clone + PartialEq> {
    preferred: T,
    stage: Option<T>,
}

impl<T: Clone + PartialEq> ModsStack<T> {
    pub fn new(preferred: T) -> Self {
        Self {
            preferred,
            stage: None,
        }
    }

    pub fn preferred(&self) -> &T {
        &self.preferred
    }

    pub fn stage(&self) -> Option<&T> {
        self.stage.as_ref()
    }

    pub fn current(&self) -> &T {
        self.stage.as_ref().unwrap_or(&self.preferred)
    }

    pub fn assign(&mut self, level: ModsLevel, value: T) {
        match level {
            ModsLevel::Preferred => self.preferred = value,
            // Current writes land on the top of the stack.
            ModsLevel::Stage | ModsLevel::Current => self.stage = Some(value),
        }
    }

    pub fn clear_stage(&mut self) {
        self.stage = None;
    }

    /// Merge `apply` into a copy of the given level, then assign it back.
    pub fn modify<F: FnOnce(&mut T)>(&mut self, level: ModsLevel, apply: F) {
        let mut value = match level {
            ModsLevel::Preferred => self.preferred.clone(),
            ModsLevel::Stage | ModsLevel::Current => self.current().clone(),
        };
        apply(&mut value);
        self.assign(level, value);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeedMod {
    /// Multiplier of the chart's native scroll rate.
    X(f32),
    /// Constant arrow speed.
    C(f32),
    /// Constant cap relative to the song's fastest BPM.
    M(f32),
}

impl Default for SpeedMod {
    fn default() -> Self {
        SpeedMod::X(1.0)
    }
}

fn fmt_num(v: f32) -> String {
    if (v - v.round()).abs() < 1e-6 {
        format!("{}", v.round() as i64)
    } else {
        format!("{v}")
    }
}

impl std::fmt::Display for SpeedMod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpeedMod::X(v) => write!(f, "{}x", fmt_num(*v)),
            SpeedMod::C(v) => write!(f, "c{}", fmt_num(*v)),
            SpeedMod::M(v) => write!(f, "m{}", fmt_num(*v)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnMod {
    #[default]
    None,
    Mirror,
    Left,
    Right,
    Shuffle,
    SuperShuffle,
}

impl TurnMod {
    const fn token(self) -> &'static str {
        match self {
            Self::None => "noturn",
            Self::Mirror => "mirror",
            Self::Left => "left",
            Self::Right => "right",
            Self::Shuffle => "shuffle",
            Self::SuperShuffle => "supershuffle",
        }
    }
}

/// Fail modes, ordered harshest-first so "take the least harsh" is `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum FailType {
    #[default]
    Immediate,
    /// Fail the player but let the song keep going.
    ImmediateContinue,
    AtEnd,
    Off,
}

impl FailType {
    const fn token(self) -> &'static str {
        match self {
            Self::Immediate => "failimmediate",
            Self::ImmediateContinue => "failimmediatecontinue",
            Self::AtEnd => "failatend",
            Self::Off => "failoff",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlayerOptions {
    pub speed: SpeedMod,
    pub turn: TurnMod,
    pub mines_off: bool,
    pub fail_type: FailType,
    /// Empty means "no explicit skin"; defaults fill this from the theme.
    pub note_skin: String,
}

fn parse_speed_token(token: &str) -> Option<SpeedMod> {
    if let Some(num) = token.strip_suffix('x') {
        return num.parse::<f32>().ok().map(SpeedMod::X);
    }
    if let Some(num) = token.strip_prefix('c') {
        return num.parse::<f32>().ok().map(SpeedMod::C);
    }
    if let Some(num) = token.strip_prefix('m') {
        return num.parse::<f32>().ok().map(SpeedMod::M);
    }
    None
}

impl PlayerOptions {
    /// Merge a modifier string into this option set. Unrecognized bare
    /// tokens name a note skin, matching the original engine's grammar.
    pub fn from_string(&mut self, s: &str) {
        for raw in s.split(',') {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            let token = trimmed.to_ascii_lowercase();

            match token.as_str() {
                "noturn" => {
                    self.turn = TurnMod::None;
                    continue;
                }
                "mirror" => {
                    self.turn = TurnMod::Mirror;
                    continue;
                }
                "left" => {
                    self.turn = TurnMod::Left;
                    continue;
                }
                "right" => {
                    self.turn = TurnMod::Right;
                    continue;
                }
                "shuffle" => {
                    self.turn = TurnMod::Shuffle;
                    continue;
                }
                "supershuffle" => {
                    self.turn = TurnMod::SuperShuffle;
                    continue;
                }
                "nomines" => {
                    self.mines_off = true;
                    continue;
                }
                "mines" => {
                    self.mines_off = false;
                    continue;
                }
                "failimmediate" => {
                    self.fail_type = FailType::Immediate;
                    continue;
                }
                "failimmediatecontinue" => {
                    self.fail_type = FailType::ImmediateContinue;
                    continue;
                }
                "failatend" => {
                    self.fail_type = FailType::AtEnd;
                    continue;
                }
                "failoff" => {
                    self.fail_type = FailType::Off;
                    continue;
                }
                _ => {}
            }

            // Song-option tokens can share a string with player options;
            // ignore them here rather than mistaking them for a skin name.
            if is_song_option_token(&token) {
                continue;
            }

            if let Some(speed) = parse_speed_token(&token) {
                self.speed = speed;
                continue;
            }

            if token.starts_with(|c: char| c.is_ascii_digit()) {
                warn!("Ignoring malformed modifier token \"{trimmed}\"");
                continue;
            }

            self.note_skin = trimmed.to_string();
        }
    }

    /// Serialize as a merge string; only non-default aspects are emitted, so
    /// re-parsing onto defaults reproduces the same set.
    pub fn to_mod_string(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if self.speed != SpeedMod::default() {
            parts.push(self.speed.to_string());
        }
        if self.turn != TurnMod::default() {
            parts.push(self.turn.token().to_string());
        }
        if self.mines_off {
            parts.push("nomines".to_string());
        }
        if self.fail_type != FailType::default() {
            parts.push(self.fail_type.token().to_string());
        }
        if !self.note_skin.is_empty() {
            parts.push(self.note_skin.clone());
        }
        parts.join(", ")
    }

    /// The subset of preferred modifiers a profile persists. Fail type is
    /// session policy, not a player preference, so it is excluded.
    pub fn saved_prefs_string(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if self.speed != SpeedMod::default() {
            parts.push(self.speed.to_string());
        }
        if self.turn != TurnMod::default() {
            parts.push(self.turn.token().to_string());
        }
        if self.mines_off {
            parts.push("nomines".to_string());
        }
        if !self.note_skin.is_empty() {
            parts.push(self.note_skin.clone());
        }
        parts.join(", ")
    }

    /// Clear only the profile-persisted subset, leaving session-only
    /// modifiers (fail type) intact.
    pub fn reset_saved_prefs(&mut self) {
        self.speed = SpeedMod::default();
        self.turn = TurnMod::default();
        self.mines_off = false;
        self.note_skin.clear();
    }

    /// Whether these options make the song easier than a clean pass;
    /// easier setups are disqualified from rankings.
    pub fn is_easier(&self) -> bool {
        self.mines_off || self.fail_type == FailType::Off
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AssistFlags: u8 {
        const CLAP = 1 << 0;
        const METRONOME = 1 << 1;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SongOptions {
    pub music_rate: f32,
    pub assists: AssistFlags,
}

impl Default for SongOptions {
    fn default() -> Self {
        Self {
            music_rate: 1.0,
            assists: AssistFlags::empty(),
        }
    }
}

fn is_song_option_token(token: &str) -> bool {
    token == "clap" || token == "metronome" || token.ends_with("xmusic")
}

impl SongOptions {
    pub fn from_string(&mut self, s: &str) {
        for raw in s.split(',') {
            let token = raw.trim().to_ascii_lowercase();
            if token.is_empty() {
                continue;
            }
            match token.as_str() {
                "clap" => {
                    self.assists |= AssistFlags::CLAP;
                    continue;
                }
                "metronome" => {
                    self.assists |= AssistFlags::METRONOME;
                    continue;
                }
                _ => {}
            }
            if let Some(num) = token.strip_suffix("xmusic") {
                match num.parse::<f32>() {
                    Ok(rate) if rate > 0.0 => self.music_rate = rate,
                    _ => warn!("Ignoring malformed music rate \"{}\"", raw.trim()),
                }
            }
            // Player-option tokens pass through silently; both sets are fed
            // the same strings.
        }
    }

    pub fn to_mod_string(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if (self.music_rate - 1.0).abs() > f32::EPSILON {
            parts.push(format!("{}xmusic", fmt_num(self.music_rate)));
        }
        if self.assists.contains(AssistFlags::CLAP) {
            parts.push("clap".to_string());
        }
        if self.assists.contains(AssistFlags::METRONOME) {
            parts.push("metronome".to_string());
        }
        parts.join(", ")
    }

    pub fn is_easier(&self) -> bool {
        self.music_rate < 1.0
    }
}

/// Default player options: a blank set, the machine operator's default
/// modifier string, then the theme's (later merges override earlier), with
/// an empty note skin falling back to the theme's default skin.
pub fn default_player_options(
    machine_mods: &str,
    theme_mods: &str,
    theme_note_skin: &str,
) -> PlayerOptions {
    let mut po = PlayerOptions::default();
    po.from_string(machine_mods);
    po.from_string(theme_mods);
    if po.note_skin.is_empty() {
        po.note_skin = theme_note_skin.to_string();
    }
    po
}

pub fn default_song_options(machine_mods: &str, theme_mods: &str) -> SongOptions {
    let mut so = SongOptions::default();
    so.from_string(machine_mods);
    so.from_string(theme_mods);
    so
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_merges_only_named_aspects() {
        let mut po = PlayerOptions::default();
        po.from_string("2x");
        po.from_string("mirror, nomines");
        assert_eq!(po.speed, SpeedMod::X(2.0));
        assert_eq!(po.turn, TurnMod::Mirror);
        assert!(po.mines_off);
        po.from_string("noturn");
        assert_eq!(po.turn, TurnMod::None);
        assert_eq!(po.speed, SpeedMod::X(2.0));
    }

    #[test]
    fn round_trip_is_idempotent() {
        for s in [
            "1.5x, mirror, nomines, failoff, cel",
            "c450, shuffle",
            "m550",
            "supershuffle, failatend",
        ] {
            let mut first = PlayerOptions::default();
            first.from_string(s);
            let serialized = first.to_mod_string();
            let mut second = PlayerOptions::default();
            second.from_string(&serialized);
            assert_eq!(first, second, "round trip of \"{s}\" via \"{serialized}\"");
        }
    }

    #[test]
    fn song_options_round_trip() {
        let mut so = SongOptions::default();
        so.from_string("0.8xmusic, clap");
        let mut again = SongOptions::default();
        again.from_string(&so.to_mod_string());
        assert_eq!(so, again);
        assert!(so.is_easier());
    }

    #[test]
    fn music_rate_token_is_not_a_speed_mod() {
        let mut po = PlayerOptions::default();
        po.from_string("1.2xmusic");
        assert_eq!(po.speed, SpeedMod::default());
        assert!(po.note_skin.is_empty());
    }

    #[test]
    fn unrecognized_token_names_a_note_skin() {
        let mut po = PlayerOptions::default();
        po.from_string("Metal");
        assert_eq!(po.note_skin, "Metal");
    }

    #[test]
    fn stage_overrides_preferred_until_cleared() {
        let mut stack = ModsStack::new(PlayerOptions::default());
        let mut staged = PlayerOptions::default();
        staged.from_string("mirror");
        stack.assign(ModsLevel::Stage, staged.clone());
        assert_eq!(stack.current(), &staged);
        stack.clear_stage();
        assert_eq!(stack.current(), stack.preferred());
    }

    #[test]
    fn reset_saved_prefs_keeps_fail_type() {
        let mut po = PlayerOptions::default();
        po.from_string("2x, mirror, nomines, failoff, cel");
        po.reset_saved_prefs();
        assert_eq!(po.speed, SpeedMod::default());
        assert_eq!(po.turn, TurnMod::None);
        assert!(!po.mines_off);
        assert!(po.note_skin.is_empty());
        assert_eq!(po.fail_type, FailType::Off);
    }

    #[test]
    fn defaults_merge_theme_over_machine() {
        let po = default_player_options("1.5x, cel", "2x", "default");
        assert_eq!(po.speed, SpeedMod::X(2.0));
        assert_eq!(po.note_skin, "cel");
        let po = default_player_options("", "", "default");
        assert_eq!(po.note_skin, "default");
    }
}
