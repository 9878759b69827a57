//! Memory-card collaborator. The core only sequences mount/lock calls
//! around profile loads; the actual hardware (or its absence) lives behind
//! this trait.

use crate::game::PlayerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CardState {
    #[default]
    NoCard,
    Checking,
    Ready,
    Removed,
    Error,
}

pub trait MemoryCards {
    fn card_inserted(&self, pn: PlayerId) -> bool;
    fn mount_card(&mut self, pn: PlayerId);
    fn unmount_card(&mut self, pn: PlayerId);
    /// Lock a successfully loaded card so it can't be swapped mid-session.
    fn lock_card(&mut self, pn: PlayerId);
    fn unlock_card(&mut self, pn: PlayerId);
    /// Block until background card checking settles. Synchronous by
    /// contract; implementations without background checks return at once.
    fn wait_for_checking_to_complete(&mut self);
    fn card_state(&self, pn: PlayerId) -> CardState;
}

/// For cabinets without card readers: nothing inserted, every operation a
/// no-op.
#[derive(Debug, Default)]
pub struct NoMemoryCards;

impl MemoryCards for NoMemoryCards {
    fn card_inserted(&self, _pn: PlayerId) -> bool {
        false
    }

    fn mount_card(&mut self, _pn: PlayerId) {}

    fn unmount_card(&mut self, _pn: PlayerId) {}

    fn lock_card(&mut self, _pn: PlayerId) {}

    fn unlock_card(&mut self, _pn: PlayerId) {}

    fn wait_for_checking_to_complete(&mut self) {}

    fn card_state(&self, _pn: PlayerId) -> CardState {
        CardState::NoCard
    }
}
