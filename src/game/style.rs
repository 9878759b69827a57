//! Play styles: which chart type a style uses, how many sides it occupies,
//! and how styles are matched to the number of joined players.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum StepsType {
    DanceSingle,
    DanceDouble,
    DanceCouple,
}

impl StepsType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DanceSingle => "dance-single",
            Self::DanceDouble => "dance-double",
            Self::DanceCouple => "dance-couple",
        }
    }
}

impl std::str::FromStr for StepsType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dance-single" => Ok(Self::DanceSingle),
            "dance-double" => Ok(Self::DanceDouble),
            "dance-couple" => Ok(Self::DanceCouple),
            _ => Err(()),
        }
    }
}

/// How a style maps players onto pad sides. One-player-two-sides (doubles)
/// costs extra stages unless a premium mode waives the surcharge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleType {
    OnePlayerOneSide,
    TwoPlayersTwoSides,
    OnePlayerTwoSides,
    TwoPlayersSharedSides,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Style {
    pub name: &'static str,
    pub steps_type: StepsType,
    pub style_type: StyleType,
    pub players_needed: usize,
    pub lock_difficulties: bool,
}

/// The fixed style table for the dance game. The original engine kept this
/// in a game-definition registry; the set is static data either way.
pub const STYLES: &[Style] = &[
    Style {
        name: "single",
        steps_type: StepsType::DanceSingle,
        style_type: StyleType::OnePlayerOneSide,
        players_needed: 1,
        lock_difficulties: false,
    },
    Style {
        name: "versus",
        steps_type: StepsType::DanceSingle,
        style_type: StyleType::TwoPlayersTwoSides,
        players_needed: 2,
        lock_difficulties: false,
    },
    Style {
        name: "double",
        steps_type: StepsType::DanceDouble,
        style_type: StyleType::OnePlayerTwoSides,
        players_needed: 1,
        lock_difficulties: false,
    },
    Style {
        name: "couple",
        steps_type: StepsType::DanceCouple,
        style_type: StyleType::TwoPlayersSharedSides,
        players_needed: 2,
        lock_difficulties: true,
    },
];

pub fn style_by_name(name: &str) -> Option<&'static Style> {
    STYLES.iter().find(|s| s.name.eq_ignore_ascii_case(name))
}

/// All styles playable with the given number of joined sides.
pub fn compatible_styles(num_sides_joined: usize) -> Vec<&'static Style> {
    STYLES
        .iter()
        .filter(|s| s.players_needed == num_sides_joined)
        .collect()
}

/// First style that fits both the player count and the chart type, if any.
pub fn first_compatible_style(num_sides_joined: usize, st: StepsType) -> Option<&'static Style> {
    STYLES
        .iter()
        .find(|s| s.players_needed == num_sides_joined && s.steps_type == st)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_and_double_are_one_player_styles() {
        let singles = compatible_styles(1);
        assert!(singles.iter().any(|s| s.name == "single"));
        assert!(singles.iter().any(|s| s.name == "double"));
        assert!(singles.iter().all(|s| s.players_needed == 1));
    }

    #[test]
    fn first_compatible_style_matches_steps_type() {
        let style = first_compatible_style(2, StepsType::DanceSingle).unwrap();
        assert_eq!(style.name, "versus");
        assert!(first_compatible_style(2, StepsType::DanceDouble).is_none());
    }
}
