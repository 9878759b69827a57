//! Shared fakes and fixtures for unit tests.

/// Route `log` output through the test harness; safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub mod fakes {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::config::{LaunchOverrides, Preferences, ThemeMetrics};
    use crate::game::catalog::{Course, Difficulty, Song, SongId, StaticCatalog, StepsId};
    use crate::game::feats::BlacklistSource;
    use crate::game::memcard::NoMemoryCards;
    use crate::game::messages::{MessageBus, SessionMessage};
    use crate::game::profile::{Profile, ProfileManager};
    use crate::game::session::{Session, SessionDeps};
    use crate::game::stats::StatsBook;
    use crate::game::style::StepsType;
    use crate::game::{MAX_PLAYERS, PlayerId};

    /// In-memory profile manager: a machine profile, optional per-side
    /// loaded profiles, and save counters for assertions.
    #[derive(Debug, Default)]
    pub struct MemProfiles {
        pub machine: Profile,
        pub players: [Option<Profile>; MAX_PLAYERS],
        /// What `load_first_available_profile` will produce per side.
        pub loadable: [Option<Profile>; MAX_PLAYERS],
        pub machine_saves: usize,
        pub player_saves: usize,
    }

    impl ProfileManager for MemProfiles {
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
            match self.loadable[pn.index()].clone() {
                Some(profile) => {
                    self.players[pn.index()] = Some(profile);
                    true
                }
                None => false,
            }
        }

        fn save_profile(&mut self, pn: PlayerId) -> bool {
            if self.players[pn.index()].is_some() {
                self.player_saves += 1;
                true
            } else {
                false
            }
        }

        fn save_machine_profile(&mut self) -> bool {
            self.machine_saves += 1;
            true
        }

        fn unload_profile(&mut self, pn: PlayerId) {
            self.players[pn.index()] = None;
        }

        fn profile_was_loaded_from_memory_card(&self, _pn: PlayerId) -> bool {
            false
        }

        fn has_default_local_profile(&self, pn: PlayerId) -> bool {
            self.loadable[pn.index()].is_some()
        }
    }

    /// Appends every broadcast to a shared log the test keeps a handle to.
    pub struct RecordingBus {
        log: Rc<RefCell<Vec<SessionMessage>>>,
    }

    impl RecordingBus {
        pub fn new() -> (Self, Rc<RefCell<Vec<SessionMessage>>>) {
            let log = Rc::new(RefCell::new(Vec::new()));
            (Self { log: log.clone() }, log)
        }
    }

    impl MessageBus for RecordingBus {
        fn broadcast(&mut self, msg: SessionMessage) {
            self.log.borrow_mut().push(msg);
        }
    }

    #[derive(Debug, Default)]
    pub struct StaticBlacklist(pub Vec<String>);

    impl BlacklistSource for StaticBlacklist {
        fn lines(&self) -> Vec<String> {
            self.0.clone()
        }
    }

    pub fn song(id: &str) -> Song {
        Song {
            id: SongId::new(id),
            title: id.to_string(),
            is_marathon: false,
            is_long: false,
            banner_path: None,
            background_path: None,
            times_played: 0,
        }
    }

    pub fn steps(song: &str, difficulty: Difficulty) -> StepsId {
        StepsId {
            song: SongId::new(song),
            steps_type: StepsType::DanceSingle,
            difficulty,
        }
    }

    pub struct SessionFixture {
        pub session: Session,
        pub messages: Rc<RefCell<Vec<SessionMessage>>>,
    }

    /// A session wired to in-memory fakes, already reset.
    pub fn session_fixture(
        prefs: Preferences,
        theme: ThemeMetrics,
        songs: Vec<Song>,
        courses: Vec<Course>,
        profiles: MemProfiles,
        blacklist: Vec<String>,
    ) -> SessionFixture {
        super::init_logging();
        let (bus, messages) = RecordingBus::new();
        let deps = SessionDeps {
            profiles: Box::new(profiles),
            memcards: Box::new(NoMemoryCards),
            stats: Box::new(StatsBook::new()),
            catalog: Box::new(StaticCatalog::new(songs, courses)),
            bus: Box::new(bus),
            blacklist: Box::new(StaticBlacklist(blacklist)),
        };
        let mut session = Session::new(deps, prefs, theme, LaunchOverrides::default());
        session.reset();
        SessionFixture { session, messages }
    }

    pub fn default_fixture(songs: Vec<Song>) -> SessionFixture {
        session_fixture(
            Preferences::default(),
            ThemeMetrics::default(),
            songs,
            Vec::new(),
            MemProfiles::default(),
            Vec::new(),
        )
    }
}
