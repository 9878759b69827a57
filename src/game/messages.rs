//! Fire-and-forget session notifications. The core broadcasts and moves
//! on; it never observes subscriber results.

use crate::game::PlayerId;
use crate::game::stage::PlayMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMessage {
    PlayerJoined { player: PlayerId },
    PlayerUnjoined { player: PlayerId },
    CurrentStyleChanged,
    PlayModeChanged { mode: Option<PlayMode> },
    CoinsChanged { coins: i32 },
}

pub trait MessageBus {
    fn broadcast(&mut self, msg: SessionMessage);
}

/// Discards everything; the default when no UI is attached.
#[derive(Debug, Default)]
pub struct NullBus;

impl MessageBus for NullBus {
    fn broadcast(&mut self, _msg: SessionMessage) {}
}
