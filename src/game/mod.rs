pub mod catalog;
pub mod feats;
pub mod memcard;
pub mod messages;
pub mod options;
pub mod profile;
pub mod session;
pub mod stage;
pub mod stats;
pub mod style;

use std::fmt;

pub const MAX_PLAYERS: usize = 2;

/// A fixed player side. The machine has exactly two of these; "no player"
/// is `Option<PlayerId>::None` everywhere, never a sentinel variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PlayerId {
    P1,
    P2,
}

impl PlayerId {
    pub const ALL: [PlayerId; MAX_PLAYERS] = [PlayerId::P1, PlayerId::P2];

    #[inline(always)]
    pub const fn index(self) -> usize {
        match self {
            PlayerId::P1 => 0,
            PlayerId::P2 => 1,
        }
    }

    pub const fn from_index(ix: usize) -> Option<PlayerId> {
        match ix {
            0 => Some(PlayerId::P1),
            1 => Some(PlayerId::P2),
            _ => None,
        }
    }

    pub const fn other(self) -> PlayerId {
        match self {
            PlayerId::P1 => PlayerId::P2,
            PlayerId::P2 => PlayerId::P1,
        }
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerId::P1 => write!(f, "P1"),
            PlayerId::P2 => write!(f, "P2"),
        }
    }
}
