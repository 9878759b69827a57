//! Stage classification and the stage lifecycle's explicit state.

use crate::game::catalog::Song;
use crate::game::style::StyleType;

/// The per-stage state machine. Idle means no stage is in progress; the
/// recorded cost is whatever `begin_stage` debited, so cancel can undo it
/// exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageState {
    #[default]
    Idle,
    Active {
        cost: u32,
    },
    /// Stats were committed, but the stage hasn't finished yet.
    Committed {
        cost: u32,
    },
}

impl StageState {
    /// The original engine exposed this as a raw count whose zero meant
    /// "no stage in progress"; the accessor preserves that reading.
    pub const fn num_stages_of_this_song(self) -> u32 {
        match self {
            StageState::Idle => 0,
            StageState::Active { cost } | StageState::Committed { cost } => cost,
        }
    }

    pub const fn is_active(self) -> bool {
        !matches!(self, StageState::Idle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayMode {
    Regular,
    /// Survival course play.
    Oni,
    Nonstop,
    Endless,
    Battle,
    Rave,
}

impl PlayMode {
    pub const fn is_course(self) -> bool {
        matches!(self, Self::Oni | Self::Nonstop | Self::Endless)
    }
}

impl std::str::FromStr for PlayMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "regular" => Ok(Self::Regular),
            "oni" => Ok(Self::Oni),
            "nonstop" => Ok(Self::Nonstop),
            "endless" => Ok(Self::Endless),
            "battle" => Ok(Self::Battle),
            "rave" => Ok(Self::Rave),
            _ => Err(()),
        }
    }
}

/// What kind of stage the machine is on right now, for announcers and
/// theme screens. "Event" outranks the play mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Demo,
    Event,
    Oni,
    Nonstop,
    Endless,
    Extra1,
    Extra2,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageResult {
    Win,
    Lose,
    Draw,
}

/// Song-length surcharge: marathons cost triple, long versions double.
pub fn num_stages_multiplier_for_song(song: &Song) -> u32 {
    let mut stages = 1;
    if song.is_marathon {
        stages *= 3;
    }
    if song.is_long {
        stages *= 2;
    }
    stages
}

/// Full stage cost for a song under a style. One player occupying two
/// sides pays double unless premium waives it.
pub fn num_stages_for_song_and_style_type(
    song: &Song,
    style_type: StyleType,
    premium_waives_double: bool,
) -> u32 {
    let mut stages = num_stages_multiplier_for_song(song);
    match style_type {
        StyleType::OnePlayerTwoSides => {
            if !premium_waives_double {
                stages *= 2;
            }
        }
        StyleType::OnePlayerOneSide
        | StyleType::TwoPlayersTwoSides
        | StyleType::TwoPlayersSharedSides => {}
    }
    stages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::catalog::SongId;

    fn song(is_marathon: bool, is_long: bool) -> Song {
        Song {
            id: SongId::new("s"),
            title: "s".to_string(),
            is_marathon,
            is_long,
            banner_path: None,
            background_path: None,
            times_played: 0,
        }
    }

    #[test]
    fn marathon_and_long_multipliers_stack() {
        assert_eq!(num_stages_multiplier_for_song(&song(false, false)), 1);
        assert_eq!(num_stages_multiplier_for_song(&song(false, true)), 2);
        assert_eq!(num_stages_multiplier_for_song(&song(true, false)), 3);
        assert_eq!(num_stages_multiplier_for_song(&song(true, true)), 6);
    }

    #[test]
    fn doubles_surcharge_respects_premium() {
        let s = song(false, false);
        assert_eq!(
            num_stages_for_song_and_style_type(&s, StyleType::OnePlayerTwoSides, false),
            2
        );
        assert_eq!(
            num_stages_for_song_and_style_type(&s, StyleType::OnePlayerTwoSides, true),
            1
        );
        assert_eq!(
            num_stages_for_song_and_style_type(&s, StyleType::TwoPlayersTwoSides, false),
            1
        );
    }

    #[test]
    fn idle_state_reads_as_zero_stages() {
        assert_eq!(StageState::Idle.num_stages_of_this_song(), 0);
        assert_eq!(StageState::Active { cost: 3 }.num_stages_of_this_song(), 3);
        assert!(StageState::Committed { cost: 1 }.is_active());
    }
}
