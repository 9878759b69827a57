//! The game session coordinator: player join/leave, coin accounting, the
//! stage lifecycle, and profile hooks.
//!
//! One `Session` exists per running game, constructed explicitly and passed
//! to whoever needs it; there is no ambient global. All mutation happens on
//! the game-update thread and the stage operations must be called in the
//! documented Begin → (Cancel | Commit → Finish) order per stage.

use log::{trace, warn};
use smallvec::SmallVec;
use std::time::Instant;

use crate::config::{CoinMode, LaunchOverrides, Preferences, Premium, ThemeMetrics};
use crate::game::catalog::{
    CourseId, Difficulty, SongCatalog, SongId, SortOrder, StepsId, TrailId,
};
use crate::game::feats::{BlacklistSource, FeatSlot};
use crate::game::memcard::MemoryCards;
use crate::game::messages::{MessageBus, SessionMessage};
use crate::game::options::{
    FailType, ModsLevel, ModsStack, PlayerOptions, SongOptions, default_player_options,
    default_song_options,
};
use crate::game::profile::ProfileManager;
use crate::game::stage::{
    PlayMode, Stage, StageResult, StageState, num_stages_for_song_and_style_type,
};
use crate::game::stats::StatsManager;
use crate::game::style::{Style, StyleType, compatible_styles, first_compatible_style};
use crate::game::{MAX_PLAYERS, PlayerId};

/// How often event mode autosaves profiles, in completed stages.
const SAVE_PROFILE_EVERY_STAGES: u32 = 3;

pub type PlayerIds = SmallVec<[PlayerId; MAX_PLAYERS]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditMode {
    Practice,
    CourseMods,
    Home,
    Full,
}

/// The external collaborators the session drives. Owned by the session for
/// its whole life; swap implementations at construction, not at runtime.
pub struct SessionDeps {
    pub profiles: Box<dyn ProfileManager>,
    pub memcards: Box<dyn MemoryCards>,
    pub stats: Box<dyn StatsManager>,
    pub catalog: Box<dyn SongCatalog>,
    pub bus: Box<dyn MessageBus>,
    pub blacklist: Box<dyn BlacklistSource>,
}

/// Everything the session tracks for one player side.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSlot {
    pub joined: bool,
    /// Stages this player may still start. Transiently negative between a
    /// multi-stage debit and the matching cancel.
    pub stage_tokens: i32,
    pub awarded_extra_stages: u8,
    pub cur_steps: Option<StepsId>,
    pub cur_trail: Option<TrailId>,
    pub preferred_difficulty: Option<Difficulty>,
    pub preferred_course_difficulty: Difficulty,
    pub options: ModsStack<PlayerOptions>,
}

impl PlayerSlot {
    fn new(default_options: PlayerOptions) -> Self {
        Self {
            joined: false,
            stage_tokens: 0,
            awarded_extra_stages: 0,
            cur_steps: None,
            cur_trail: None,
            preferred_difficulty: None,
            preferred_course_difficulty: Difficulty::Medium,
            options: ModsStack::new(default_options),
        }
    }
}

pub struct Session {
    pub deps: SessionDeps,
    pub prefs: Preferences,
    pub theme: ThemeMetrics,
    overrides: LaunchOverrides,

    pub slots: [PlayerSlot; MAX_PLAYERS],
    pub master_player: Option<PlayerId>,
    pub coins: i32,

    pub cur_style: Option<&'static Style>,
    pub play_mode: Option<PlayMode>,
    pub edit_mode: Option<EditMode>,
    pub sort_order: Option<SortOrder>,
    pub preferred_sort_order: Option<SortOrder>,
    pub preferred_steps_type: Option<crate::game::style::StepsType>,

    pub cur_song: Option<SongId>,
    pub preferred_song: Option<SongId>,
    pub cur_course: Option<CourseId>,
    pub preferred_course: Option<CourseId>,
    pub preferred_song_group: Option<String>,
    pub preferred_course_group: Option<String>,

    pub song_options: ModsStack<SongOptions>,
    pub changed_fail_type_on_song_options: bool,

    pub demonstration_or_jukebox: bool,
    pub jukebox_uses_modifiers: bool,
    pub multiplayer: bool,
    pub temporary_event_mode: bool,
    pub gameplay_lead_in: bool,
    pub loading_next_song: bool,
    pub backed_out_of_final_stage: bool,
    pub earned_extra_stage: bool,

    pub current_stage_index: u32,
    stage: StageState,
    pub game_seed: u64,
    pub stage_seed: u64,
    pub num_times_through_attract: i32,

    /// Battle/rave tug-of-war life, 0..=1 from P1's point of view.
    pub tug_life_percent_p1: f32,

    time_game_started: Option<Instant>,
    /// Rolls forward on every commit so play time accrues in deltas.
    time_play_accrued: Option<Instant>,
    pub(crate) filled_name_slots: Vec<FeatSlot>,
}

impl Session {
    /// Construct with everything zeroed; call [`Session::reset`] before the
    /// first screen, once collaborators are ready.
    pub fn new(
        deps: SessionDeps,
        prefs: Preferences,
        theme: ThemeMetrics,
        overrides: LaunchOverrides,
    ) -> Self {
        let default_po = default_player_options(
            &prefs.default_modifiers,
            &theme.default_modifiers,
            &theme.default_note_skin,
        );
        Self {
            deps,
            prefs,
            theme,
            overrides,
            slots: std::array::from_fn(|_| PlayerSlot::new(default_po.clone())),
            master_player: None,
            coins: 0,
            cur_style: None,
            play_mode: None,
            edit_mode: None,
            sort_order: None,
            preferred_sort_order: None,
            preferred_steps_type: None,
            cur_song: None,
            preferred_song: None,
            cur_course: None,
            preferred_course: None,
            preferred_song_group: None,
            preferred_course_group: None,
            song_options: ModsStack::new(SongOptions::default()),
            changed_fail_type_on_song_options: false,
            demonstration_or_jukebox: false,
            jukebox_uses_modifiers: false,
            multiplayer: false,
            temporary_event_mode: false,
            gameplay_lead_in: false,
            loading_next_song: false,
            backed_out_of_final_stage: false,
            earned_extra_stage: false,
            current_stage_index: 0,
            stage: StageState::Idle,
            game_seed: 0,
            stage_seed: 0,
            num_times_through_attract: -1,
            tug_life_percent_p1: 0.5,
            time_game_started: None,
            time_play_accrued: None,
            filled_name_slots: Vec::new(),
        }
    }

    // --- Reset / join / unjoin ---

    /// Return the whole session to the attract-loop baseline. Coins are
    /// deliberately left alone.
    pub fn reset(&mut self) {
        // Must clear the master first; unjoin re-derives it.
        self.master_player = None;
        for pn in PlayerId::ALL {
            self.unjoin_player(pn);
        }

        self.time_game_started = None;
        self.time_play_accrued = None;
        self.set_current_style(None);
        for pn in PlayerId::ALL {
            self.deps.memcards.unlock_card(pn);
        }
        // self.coins = 0;  // don't reset the coin count!
        self.multiplayer = false;
        self.preferred_song_group = None;
        self.preferred_course_group = None;
        self.changed_fail_type_on_song_options = false;
        self.sort_order = None;
        self.preferred_sort_order = self.theme.default_sort;
        self.set_play_mode(None);
        self.edit_mode = None;
        self.demonstration_or_jukebox = false;
        self.jukebox_uses_modifiers = false;
        self.current_stage_index = 0;
        self.gameplay_lead_in = false;
        self.stage = StageState::Idle;
        self.loading_next_song = false;

        self.game_seed = rand::random();

        self.cur_song = self
            .theme
            .default_song
            .clone()
            .filter(|id| self.deps.catalog.song(id).is_some())
            .or_else(|| self.deps.catalog.default_song());
        self.preferred_song = None;
        self.cur_course = None;
        self.preferred_course = None;

        self.song_options = ModsStack::new(SongOptions::default());

        self.reset_stage_statistics();

        self.deps.catalog.update_popular();
        self.deps.catalog.update_shuffled();
        // Trails cached before the catalog finished loading are stale.
        self.deps.catalog.regenerate_non_fixed_courses();

        self.deps.stats.reset();

        self.temporary_event_mode = false;
        self.backed_out_of_final_stage = false;
        self.earned_extra_stage = false;
        self.num_times_through_attract = -1;

        // Last, so command-line overrides beat the defaults above.
        self.apply_cmdline();
    }

    fn reset_player(&mut self, pn: PlayerId) {
        self.preferred_steps_type = None;
        let default_po = self.default_player_options();
        let slot = &mut self.slots[pn.index()];
        slot.preferred_difficulty = None;
        slot.preferred_course_difficulty = Difficulty::Medium;
        slot.stage_tokens = 0;
        slot.awarded_extra_stages = 0;
        slot.cur_steps = None;
        slot.cur_trail = None;
        slot.options = ModsStack::new(default_po);
    }

    /// Join a side. Fails silently once a style has been finalized (unless
    /// the theme allows late join) or if the side is already in.
    pub fn join_player(&mut self, pn: PlayerId) -> bool {
        if !self.players_can_join() {
            return false;
        }
        if self.slots[pn.index()].joined {
            return false;
        }

        // Under joint premium the 2nd join rides the 1st player's credit,
        // so it inherits the master's remaining tokens rather than getting
        // a fresh allotment.
        let tokens = if self.coin_mode() == CoinMode::Pay
            && self.premium() == Premium::TwoPlayersFor1Credit
            && self.num_sides_joined() == 1
        {
            let master = self
                .master_player
                .expect("a side is joined but no master player is set");
            self.slots[master.index()].stage_tokens
        } else {
            self.prefs.songs_per_play as i32
        };

        let slot = &mut self.slots[pn.index()];
        slot.joined = true;
        slot.stage_tokens = tokens;

        if self.master_player.is_none() {
            self.master_player = Some(pn);
        }

        // First player in: the game is starting.
        if self.num_sides_joined() == 1 {
            self.begin_game();
        }

        // Count each join as a play.
        self.deps.profiles.machine_profile_mut().total_plays += 1;

        // Late join: re-derive a style that fits the new player count.
        if self.theme.allow_late_join
            && let Some(style) = self.cur_style
        {
            let style = first_compatible_style(self.num_sides_joined(), style.steps_type);
            self.set_current_style(style);
        }

        self.deps
            .bus
            .broadcast(SessionMessage::PlayerJoined { player: pn });
        true
    }

    pub fn unjoin_player(&mut self, pn: PlayerId) {
        self.slots[pn.index()].joined = false;
        self.slots[pn.index()].stage_tokens = 0;

        self.reset_player(pn);

        if self.master_player == Some(pn) {
            self.master_player = self.first_joined();
        }

        // Release the player's stats first, so anything they hold on the
        // profile is gone before the profile unloads.
        self.deps.stats.unjoin_player(pn);
        self.deps.profiles.unload_profile(pn);

        self.deps
            .bus
            .broadcast(SessionMessage::PlayerUnjoined { player: pn });

        // Nobody left: session-wide modifier defaults go back too.
        if self.master_player.is_none() {
            let so = self.default_song_options();
            self.song_options.assign(ModsLevel::Preferred, so);
        }
    }

    /// Handle an input that can join a player. Consumes a credit on
    /// success; mutates nothing on failure.
    pub fn join_input(&mut self, pn: PlayerId) -> bool {
        if !self.players_can_join() {
            return false;
        }
        if self.slots[pn.index()].joined {
            return false;
        }

        let needed = self.coins_needed_to_join();
        if self.coins < needed {
            return false;
        }
        if needed > 0 {
            self.coins -= needed;
            self.deps
                .bus
                .broadcast(SessionMessage::CoinsChanged { coins: self.coins });
        }

        self.join_player(pn)
    }

    pub fn insert_coin(&mut self) {
        self.coins += 1;
        self.deps
            .bus
            .broadcast(SessionMessage::CoinsChanged { coins: self.coins });
    }

    pub fn coins_needed_to_join(&self) -> i32 {
        let mut coins = 0;
        if self.coin_mode() == CoinMode::Pay {
            coins = self.prefs.coins_per_credit;
        }
        // Joint premium: the 2nd join is on the house.
        if self.premium() == Premium::TwoPlayersFor1Credit && self.num_sides_joined() == 1 {
            coins = 0;
        }
        coins
    }

    /// The first player has joined; the game is starting.
    fn begin_game(&mut self) {
        let now = Instant::now();
        self.time_game_started = Some(now);
        self.time_play_accrued = Some(now);
        self.filled_name_slots.clear();

        // Play attract on the ending/ranking screens even if attract
        // sounds are otherwise off.
        self.num_times_through_attract = -1;

        for pn in PlayerId::ALL {
            self.deps.memcards.unlock_card(pn);
        }
    }

    fn apply_cmdline(&mut self) {
        // Players must join before a style can be derived for them.
        for pn in self.overrides.join_players.clone() {
            let _ = self.join_player(pn);
        }
        for command in self.overrides.mode_commands.clone() {
            self.apply_game_command(&command, None);
        }
    }

    // --- Game commands ---

    /// Apply a semicolon-separated mode command ("playmode,oni;difficulty,
    /// hard") to one player, or to everyone when `pn` is `None`. Malformed
    /// commands are a caller bug and fatal.
    pub fn apply_game_command(&mut self, command: &str, pn: Option<PlayerId>) {
        let cmd = match GameCommand::parse(command) {
            Ok(cmd) => cmd,
            Err(why) => panic!("Can't apply mode \"{command}\": {why}"),
        };
        let targets: PlayerIds = match pn {
            Some(pn) => SmallVec::from_slice(&[pn]),
            None => SmallVec::from_slice(&PlayerId::ALL),
        };
        if let Some(mode) = cmd.play_mode {
            self.set_play_mode(Some(mode));
        }
        if let Some(style) = cmd.style {
            self.set_current_style(Some(style));
        }
        if let Some(song) = cmd.song {
            self.cur_song = Some(song);
        }
        if let Some(course) = cmd.course {
            self.cur_course = Some(course);
        }
        for &target in &targets {
            if let Some(dc) = cmd.difficulty {
                self.slots[target.index()].preferred_difficulty = Some(dc);
            }
            if let Some(mods) = &cmd.mods {
                self.apply_preferred_modifiers(target, mods);
            }
        }
    }

    // --- Profiles ---

    pub fn load_profiles(&mut self, load_edits: bool) {
        // Unlock any cards we might want to load.
        for pn in self.human_players() {
            if !self.deps.profiles.is_persistent_profile(pn) {
                self.deps.memcards.unlock_card(pn);
            }
        }

        self.deps.memcards.wait_for_checking_to_complete();

        for pn in self.human_players() {
            // Already loaded means this already ran.
            if self.deps.profiles.is_persistent_profile(pn) {
                continue;
            }

            self.deps.memcards.mount_card(pn);
            let success = self.deps.profiles.load_first_available_profile(pn, load_edits);
            self.deps.memcards.unmount_card(pn);

            if !success {
                continue;
            }

            // Lock the card on successful load so it can't be swapped.
            self.deps.memcards.lock_card(pn);

            self.load_current_settings_from_profile(pn);

            if let Some(profile) = self.deps.profiles.profile_mut(pn) {
                profile.total_plays += 1;
            }
        }
    }

    pub fn save_profiles(&mut self) {
        for pn in self.human_players() {
            self.save_profile(pn);
        }
    }

    pub fn save_profile(&mut self, pn: PlayerId) {
        if !self.deps.profiles.is_persistent_profile(pn) {
            return;
        }

        let was_memory_card = self.deps.profiles.profile_was_loaded_from_memory_card(pn);
        if was_memory_card {
            self.deps.memcards.mount_card(pn);
        }
        self.deps.profiles.save_profile(pn);
        if was_memory_card {
            self.deps.memcards.unmount_card(pn);
        }
    }

    pub fn have_profile_to_load(&self) -> bool {
        for pn in self.human_players() {
            // Skip profiles that are already loaded.
            if self.deps.profiles.is_persistent_profile(pn) {
                continue;
            }
            if self.deps.memcards.card_inserted(pn) {
                return true;
            }
            if self.deps.profiles.has_default_local_profile(pn) {
                return true;
            }
        }
        false
    }

    pub fn have_profile_to_save(&self) -> bool {
        self.human_players()
            .iter()
            .any(|&pn| self.deps.profiles.is_persistent_profile(pn))
    }

    pub fn save_local_data(&mut self) {
        self.deps.profiles.save_machine_profile();
    }

    pub fn load_current_settings_from_profile(&mut self, pn: PlayerId) {
        if !self.deps.profiles.is_persistent_profile(pn) {
            return;
        }
        let Some(profile) = self.deps.profiles.profile(pn) else {
            return;
        };

        let saved_mods = profile.default_modifiers.clone();
        let sort_order = profile.sort_order;
        let last_difficulty = profile.last_difficulty;
        let last_course_difficulty = profile.last_course_difficulty;
        let last_steps_type = profile.last_steps_type;
        let last_song = profile.last_song.clone();
        let last_course = profile.last_course.clone();

        // Apply saved default modifiers, if any. Negative preferences
        // aren't saved, so clear the saved subset before merging, leaving
        // session-only modifiers untouched.
        if let Some(mods) = saved_mods {
            self.slots[pn.index()]
                .options
                .modify(ModsLevel::Preferred, |po| po.reset_saved_prefs());
            self.apply_preferred_modifiers(pn, &mods);
        }
        // Don't clobber choices made by a game command or an earlier profile.
        if self.preferred_sort_order.is_none() {
            self.preferred_sort_order = sort_order;
        }
        if last_difficulty.is_some() {
            self.slots[pn.index()].preferred_difficulty = last_difficulty;
        }
        if let Some(cd) = last_course_difficulty {
            self.slots[pn.index()].preferred_course_difficulty = cd;
        }
        if self.preferred_steps_type.is_none() {
            self.preferred_steps_type = last_steps_type;
        }
        if self.preferred_song.is_none() {
            self.preferred_song = last_song;
        }
        if self.preferred_course.is_none() {
            self.preferred_course = last_course;
        }
    }

    pub fn save_current_settings_to_profile(&mut self, pn: PlayerId) {
        if !self.deps.profiles.is_persistent_profile(pn) {
            return;
        }
        if self.demonstration_or_jukebox {
            return;
        }

        let saved_mods = self.slots[pn.index()].options.preferred().saved_prefs_string();
        let sort_order = self.preferred_sort_order.filter(|s| s.is_song_sort());
        let preferred_difficulty = self.slots[pn.index()].preferred_difficulty;
        let preferred_course_difficulty = self.slots[pn.index()].preferred_course_difficulty;
        let preferred_steps_type = self.preferred_steps_type;
        let preferred_song = self.preferred_song.clone();
        let preferred_course = self.preferred_course.clone();

        let Some(profile) = self.deps.profiles.profile_mut(pn) else {
            return;
        };
        profile.default_modifiers = Some(saved_mods);
        if sort_order.is_some() {
            profile.sort_order = sort_order;
        }
        if preferred_difficulty.is_some() {
            profile.last_difficulty = preferred_difficulty;
        }
        profile.last_course_difficulty = Some(preferred_course_difficulty);
        if preferred_steps_type.is_some() {
            profile.last_steps_type = preferred_steps_type;
        }
        if preferred_song.is_some() {
            profile.last_song = preferred_song;
        }
        if preferred_course.is_some() {
            profile.last_course = preferred_course;
        }
    }

    // --- Modifiers ---

    pub fn default_player_options(&self) -> PlayerOptions {
        default_player_options(
            &self.prefs.default_modifiers,
            &self.theme.default_modifiers,
            &self.theme.default_note_skin,
        )
    }

    pub fn default_song_options(&self) -> SongOptions {
        default_song_options(&self.prefs.default_modifiers, &self.theme.default_modifiers)
    }

    pub fn reset_to_default_song_options(&mut self, level: ModsLevel) {
        let so = self.default_song_options();
        self.song_options.assign(level, so);
    }

    pub fn apply_preferred_modifiers(&mut self, pn: PlayerId, modifiers: &str) {
        self.slots[pn.index()]
            .options
            .modify(ModsLevel::Preferred, |po| po.from_string(modifiers));
        self.song_options
            .modify(ModsLevel::Preferred, |so| so.from_string(modifiers));
    }

    pub fn apply_stage_modifiers(&mut self, pn: PlayerId, modifiers: &str) {
        self.slots[pn.index()]
            .options
            .modify(ModsLevel::Stage, |po| po.from_string(modifiers));
        self.song_options
            .modify(ModsLevel::Stage, |so| so.from_string(modifiers));
    }

    /// Is the player's effective option set exactly what applying
    /// `modifier` on top of it would produce? Structural comparison of the
    /// parsed sets, not a string match.
    pub fn player_is_using_modifier(&self, pn: PlayerId, modifier: &str) -> bool {
        let current_po = self.slots[pn.index()].options.current();
        let current_so = self.song_options.current();
        let mut po = current_po.clone();
        let mut so = current_so.clone();
        po.from_string(modifier);
        so.from_string(modifier);
        po == *current_po && so == *current_so
    }

    /// Judge the *preferred* (never the forced stage) options: easier-than-
    /// normal setups are ranked but disqualified.
    pub fn current_options_disqualify_player(&self, pn: PlayerId) -> bool {
        if !self.prefs.disqualification {
            return false;
        }
        if !self.is_human_player(pn) {
            return false;
        }
        let po = self.slots[pn.index()].options.preferred();
        po.is_easier() || self.song_options.preferred().is_easier()
    }

    /// Note skins in use this stage, including any forced by course
    /// entries; sorted, deduped.
    pub fn all_used_note_skins(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for pn in self.enabled_players() {
            out.push(self.slots[pn.index()].options.current().note_skin.clone());

            if self.is_course_mode()
                && let Some(trail) = &self.slots[pn.index()].cur_trail
                && let Some(course) = self.deps.catalog.course(&trail.course)
            {
                for entry in &course.entries {
                    let mut po = PlayerOptions::default();
                    po.from_string(&entry.modifiers);
                    if !po.note_skin.is_empty() {
                        out.push(po.note_skin);
                    }
                }
            }
        }
        out.sort();
        out.dedup();
        out
    }

    // --- Stage lifecycle ---

    /// Stage cost of the current selection. Uses the selected style when
    /// set; falls back to the style implied by the master player's steps,
    /// then to any style fitting the joined-player count. `None` only when
    /// neither a song nor a course is selected.
    pub fn num_stages_for_current_song_and_steps_or_course(&self) -> Option<u32> {
        if let Some(song_id) = &self.cur_song {
            let song = self
                .deps
                .catalog
                .song(song_id)
                .unwrap_or_else(|| panic!("current song '{song_id}' is not in the catalog"));

            let style = self.cur_style.or_else(|| {
                let master = self.master_player?;
                let steps = self.slots[master.index()].cur_steps.as_ref()?;
                first_compatible_style(self.num_sides_joined(), steps.steps_type)
            });
            let style = style.unwrap_or_else(|| {
                let joined = self.num_sides_joined().max(1);
                let styles = compatible_styles(joined);
                assert!(!styles.is_empty(), "no style compatible with {joined} player(s)");
                styles[0]
            });

            let waive_double = self.premium() != Premium::Off;
            let stages = num_stages_for_song_and_style_type(song, style.style_type, waive_double);
            Some(stages.max(1))
        } else if self.cur_course.is_some() {
            Some(self.prefs.songs_per_play.max(1))
        } else {
            None
        }
    }

    /// Gameplay is beginning: snapshot modifiers, debit stage tokens,
    /// evaluate disqualification. No-op in demonstration/jukebox.
    pub fn begin_stage(&mut self) {
        if self.demonstration_or_jukebox {
            return;
        }

        // Should only run once per stage. The previous debit is credited
        // back so a caller bug can't leak tokens.
        if self.stage.is_active() {
            let prev = self.stage.num_stages_of_this_song();
            warn!("begin_stage called with a stage still in progress (cost {prev}); undoing it");
            for pn in self.enabled_players() {
                self.slots[pn.index()].stage_tokens += prev as i32;
            }
            self.stage = StageState::Idle;
        }

        self.reset_stage_statistics();

        if !self.theme.stage_player_mods_forced {
            for pn in PlayerId::ALL {
                let slot = &mut self.slots[pn.index()];
                let preferred = slot.options.preferred().clone();
                slot.options.assign(ModsLevel::Stage, preferred);
            }
        }
        if !self.theme.stage_song_mods_forced {
            let preferred = self.song_options.preferred().clone();
            self.song_options.assign(ModsLevel::Stage, preferred);
        }

        self.deps.stats.current_mut().music_rate = self.song_options.current().music_rate;

        let cost = self
            .num_stages_for_current_song_and_steps_or_course()
            .expect("begin_stage called with no song or course selected");
        for pn in self.enabled_players() {
            self.slots[pn.index()].stage_tokens -= cost as i32;
        }

        for pn in self.human_players() {
            if self.current_options_disqualify_player(pn) {
                self.deps.stats.current_mut().player_mut(pn).disqualified = true;
            }
        }

        self.earned_extra_stage = false;
        self.stage = StageState::Active { cost };
    }

    /// Gameplay aborted: undo exactly what `begin_stage` debited.
    pub fn cancel_stage(&mut self) {
        let cost = self.stage.num_stages_of_this_song();
        for pn in self.enabled_players() {
            self.slots[pn.index()].stage_tokens += cost as i32;
        }
        self.stage = StageState::Idle;
        self.reset_stage_statistics();
    }

    /// Gameplay finished: push the stage's results into profiles so the
    /// evaluation screen sees fresh numbers. No-op for demonstration,
    /// jukebox, and multiplayer sessions.
    pub fn commit_stage_stats(&mut self) {
        if self.demonstration_or_jukebox {
            return;
        }
        if self.multiplayer {
            return;
        }

        let humans = self.human_players();

        // Accrue only the span since the previous commit, rolling the
        // marker forward; adding elapsed-since-start here would count the
        // early stages of a session once per later commit.
        let play_seconds = match self.time_play_accrued {
            Some(marker) => {
                let now = Instant::now();
                self.time_play_accrued = Some(now);
                now.duration_since(marker).as_secs()
            }
            None => 0,
        };

        let SessionDeps { stats, profiles, .. } = &mut self.deps;
        stats.commit_stats_to_profiles(profiles.as_mut());

        profiles.machine_profile_mut().total_play_seconds += play_seconds;
        for pn in humans {
            if let Some(profile) = profiles.profile_mut(pn) {
                profile.total_play_seconds += play_seconds;
            }
        }

        if let StageState::Active { cost } = self.stage {
            self.stage = StageState::Committed { cost };
        }
    }

    /// A stage has concluded (evaluation included). Always counts the
    /// stage and returns to idle, whatever the mode flags say; then awards
    /// extra stages and, in event mode, autosaves periodically.
    pub fn finish_stage(&mut self) {
        let old_stage_index = self.current_stage_index;
        self.current_stage_index += 1;
        self.stage = StageState::Idle;

        if self.has_earned_extra_stage_internal() {
            trace!("awarded extra stage");
            for pn in self.human_players() {
                let slot = &mut self.slots[pn.index()];
                if slot.awarded_extra_stages < 2 {
                    slot.awarded_extra_stages += 1;
                    slot.stage_tokens += 1;
                    self.earned_extra_stage = true;
                }
            }
        }

        if self.demonstration_or_jukebox {
            return;
        }

        if self.is_event_mode()
            && old_stage_index / SAVE_PROFILE_EVERY_STAGES
                < self.current_stage_index / SAVE_PROFILE_EVERY_STAGES
        {
            trace!("Played {SAVE_PROFILE_EVERY_STAGES} stages; saving profiles ...");
            self.deps.profiles.save_machine_profile();
            self.save_profiles();
        }
    }

    pub fn reset_stage_statistics(&mut self) {
        self.deps.stats.reset_current();
        self.tug_life_percent_p1 = 0.5;
        // Reseed here, not in finish_stage, so backing out of gameplay and
        // replaying gets a new shuffle pattern.
        self.stage_seed = rand::random();
    }

    fn has_earned_extra_stage_internal(&self) -> bool {
        if self.is_event_mode() {
            return false;
        }
        if !self.prefs.allow_extra_stage {
            return false;
        }
        if self.play_mode != Some(PlayMode::Regular) {
            return false;
        }
        if self.backed_out_of_final_stage {
            return false;
        }
        // Extra stages only trigger once the players are otherwise out.
        if self.smallest_num_stages_left_for_any_human_player() > 0 {
            return false;
        }
        let Some(master) = self.master_player else {
            return false;
        };
        if self.slots[master.index()].awarded_extra_stages >= 2 {
            return false;
        }

        let second_award = self.is_extra_stage();
        for pn in self.enabled_players() {
            let Some(steps) = &self.slots[pn.index()].cur_steps else {
                continue;
            };
            if steps.difficulty != Difficulty::Hard && steps.difficulty != Difficulty::Challenge {
                continue; // not hard enough!
            }

            let grade = self.deps.stats.current().player(pn).grade;
            let threshold = if second_award {
                self.theme.grade_tier_for_extra_2
            } else {
                self.theme.grade_tier_for_extra_1
            };
            if grade <= threshold {
                return true;
            }
        }
        false
    }

    // --- State queries ---

    pub fn stage_state(&self) -> StageState {
        self.stage
    }

    /// Zero exactly when no stage is in progress.
    pub fn num_stages_of_this_song(&self) -> u32 {
        self.stage.num_stages_of_this_song()
    }

    pub fn is_joined(&self, pn: PlayerId) -> bool {
        self.slots[pn.index()].joined
    }

    pub fn count_joined(&self) -> usize {
        self.slots.iter().filter(|s| s.joined).count()
    }

    pub fn num_sides_joined(&self) -> usize {
        self.count_joined()
    }

    pub fn first_joined(&self) -> Option<PlayerId> {
        PlayerId::ALL.into_iter().find(|&pn| self.is_joined(pn))
    }

    pub fn players_can_join(&self) -> bool {
        // Selecting a style finalizes the players.
        self.num_sides_joined() == 0 || self.cur_style.is_none() || self.theme.allow_late_join
    }

    pub fn is_human_player(&self, pn: PlayerId) -> bool {
        match self.cur_style {
            // No style chosen yet: while joining is open, only joined
            // sides give input; once it's closed we're on a shared screen.
            None => {
                if self.players_can_join() {
                    self.slots[pn.index()].joined
                } else {
                    true
                }
            }
            Some(style) => match style.style_type {
                StyleType::TwoPlayersTwoSides | StyleType::TwoPlayersSharedSides => true,
                StyleType::OnePlayerOneSide | StyleType::OnePlayerTwoSides => {
                    Some(pn) == self.master_player
                }
            },
        }
    }

    pub fn is_player_enabled(&self, pn: PlayerId) -> bool {
        // In battle/rave both sides are present; non-humans are CPUs.
        if matches!(self.play_mode, Some(PlayMode::Battle | PlayMode::Rave)) {
            return true;
        }
        self.is_human_player(pn)
    }

    pub fn is_cpu_player(&self, pn: PlayerId) -> bool {
        self.is_player_enabled(pn) && !self.is_human_player(pn)
    }

    pub fn any_players_are_cpu(&self) -> bool {
        PlayerId::ALL.into_iter().any(|pn| self.is_cpu_player(pn))
    }

    pub fn human_players(&self) -> PlayerIds {
        PlayerId::ALL
            .into_iter()
            .filter(|&pn| self.is_human_player(pn))
            .collect()
    }

    pub fn enabled_players(&self) -> PlayerIds {
        PlayerId::ALL
            .into_iter()
            .filter(|&pn| self.is_player_enabled(pn))
            .collect()
    }

    pub fn num_players_enabled(&self) -> usize {
        self.enabled_players().len()
    }

    pub fn first_human_player(&self) -> Option<PlayerId> {
        self.human_players().first().copied()
    }

    pub fn player_display_name(&self, pn: PlayerId) -> String {
        assert!(self.is_player_enabled(pn), "display name of a disabled player");
        if self.is_human_player(pn) {
            self.deps.profiles.player_name(pn).unwrap_or_else(|| {
                match pn {
                    PlayerId::P1 => "Player 1",
                    PlayerId::P2 => "Player 2",
                }
                .to_string()
            })
        } else {
            "CPU".to_string()
        }
    }

    pub fn set_current_style(&mut self, style: Option<&'static Style>) {
        self.cur_style = style;
        self.deps.bus.broadcast(SessionMessage::CurrentStyleChanged);
    }

    pub fn set_play_mode(&mut self, mode: Option<PlayMode>) {
        self.play_mode = mode;
        self.deps
            .bus
            .broadcast(SessionMessage::PlayModeChanged { mode });
    }

    pub fn is_course_mode(&self) -> bool {
        self.play_mode.is_some_and(PlayMode::is_course)
    }

    pub fn is_battle_mode(&self) -> bool {
        self.play_mode == Some(PlayMode::Battle)
    }

    /// Event mode is on when either forced for this session or set as a
    /// persistent preference; read once per decision to avoid tearing.
    pub fn is_event_mode(&self) -> bool {
        self.temporary_event_mode || self.prefs.event_mode
    }

    pub fn coin_mode(&self) -> CoinMode {
        if self.is_event_mode() && self.prefs.coin_mode == CoinMode::Pay {
            CoinMode::Free
        } else {
            self.prefs.coin_mode
        }
    }

    pub fn premium(&self) -> Premium {
        if self.is_event_mode() {
            Premium::Off
        } else {
            self.prefs.premium
        }
    }

    pub fn num_stages_left(&self, pn: PlayerId) -> i32 {
        self.slots[pn.index()].stage_tokens
    }

    pub fn smallest_num_stages_left_for_any_human_player(&self) -> i32 {
        if self.is_event_mode() {
            return 999;
        }
        self.human_players()
            .iter()
            .map(|&pn| self.slots[pn.index()].stage_tokens)
            .min()
            .unwrap_or(i32::MAX)
    }

    pub fn is_an_extra_stage(&self) -> bool {
        let Some(master) = self.master_player else {
            return false;
        };
        !self.is_event_mode()
            && !self.is_course_mode()
            && self.slots[master.index()].awarded_extra_stages > 0
    }

    pub fn is_extra_stage(&self) -> bool {
        let Some(master) = self.master_player else {
            return false;
        };
        !self.is_event_mode()
            && !self.is_course_mode()
            && self.slots[master.index()].awarded_extra_stages == 1
    }

    pub fn is_extra_stage2(&self) -> bool {
        let Some(master) = self.master_player else {
            return false;
        };
        !self.is_event_mode()
            && !self.is_course_mode()
            && self.slots[master.index()].awarded_extra_stages == 2
    }

    pub fn current_stage(&self) -> Stage {
        if self.demonstration_or_jukebox {
            Stage::Demo
        } else if self.is_event_mode() {
            // "event" has precedence
            Stage::Event
        } else if self.play_mode == Some(PlayMode::Oni) {
            Stage::Oni
        } else if self.play_mode == Some(PlayMode::Nonstop) {
            Stage::Nonstop
        } else if self.play_mode == Some(PlayMode::Endless) {
            Stage::Endless
        } else if self.is_extra_stage() {
            Stage::Extra1
        } else if self.is_extra_stage2() {
            Stage::Extra2
        } else {
            Stage::Normal
        }
    }

    /// Index of the course entry being played; songs-played counts the
    /// current song, so it's one behind.
    pub fn course_song_index(&self) -> i32 {
        let Some(master) = self.master_player else {
            return -1;
        };
        self.deps.stats.current().player(master).songs_played as i32 - 1
    }

    /// While the next course song loads, show its number early.
    pub fn loading_course_song_index(&self) -> i32 {
        let mut index = self.course_song_index();
        if self.loading_next_song {
            index += 1;
        }
        index
    }

    // --- Battle / rave results ---

    pub fn stage_result(&self, pn: PlayerId) -> StageResult {
        if matches!(self.play_mode, Some(PlayMode::Battle | PlayMode::Rave)) {
            if (self.tug_life_percent_p1 - 0.5).abs() < 1e-4 {
                return StageResult::Draw;
            }
            let p1_wins = self.tug_life_percent_p1 >= 0.5;
            return match (pn, p1_wins) {
                (PlayerId::P1, true) | (PlayerId::P2, false) => StageResult::Win,
                _ => StageResult::Lose,
            };
        }

        let stats = self.deps.stats.current();
        let own = stats.player(pn).actual_dance_points;
        let mut result = StageResult::Win;
        for other in PlayerId::ALL {
            if other == pn {
                continue;
            }
            let theirs = stats.player(other).actual_dance_points;
            // A tie anywhere is at best a draw; anyone better means a loss.
            if theirs == own {
                result = StageResult::Draw;
            }
            if theirs > own {
                return StageResult::Lose;
            }
        }
        result
    }

    pub fn best_player(&self) -> Option<PlayerId> {
        PlayerId::ALL
            .into_iter()
            .find(|&pn| self.stage_result(pn) == StageResult::Win)
    }

    // --- Fail policy ---

    /// Effective fail type for a player, after the machine's easing rules.
    /// An explicit change on the song-options screen always wins.
    pub fn player_fail_type(&self, pn: PlayerId) -> FailType {
        let mut ft = self.slots[pn.index()].options.current().fail_type;

        if self.changed_fail_type_on_song_options {
            return ft;
        }

        if self.is_course_mode() {
            if self.prefs.minimum1_full_song_in_courses && self.course_song_index() == 0 {
                // Take the less harsh of the two.
                ft = ft.max(FailType::ImmediateContinue);
            }
            return ft;
        }

        let Some(dc) = self.slots[pn.index()].cur_steps.as_ref().map(|s| s.difficulty) else {
            return ft;
        };

        // Called during gameplay, after the debit; hence the -1.
        let first_stage = !self.is_event_mode()
            && self.slots[pn.index()].stage_tokens == self.prefs.songs_per_play as i32 - 1;

        // Easy and beginner are never harsher than immediate-continue.
        if dc <= Difficulty::Easy {
            ft = ft.max(FailType::ImmediateContinue);
        }
        if dc <= Difficulty::Easy && first_stage && self.prefs.fail_off_for_first_stage_easy {
            ft = ft.max(FailType::Off);
        }
        if dc == Difficulty::Beginner && first_stage {
            ft = ft.max(FailType::Off);
        }
        if dc == Difficulty::Beginner && self.prefs.fail_off_in_beginner {
            ft = ft.max(FailType::Off);
        }
        ft
    }

    // --- Difficulty selection ---

    pub fn difficulties_locked(&self) -> bool {
        if self.play_mode == Some(PlayMode::Rave) {
            return true;
        }
        if self.is_course_mode() {
            return self.prefs.lock_course_difficulties;
        }
        self.cur_style.is_some_and(|s| s.lock_difficulties)
    }

    pub fn change_preferred_difficulty_and_steps_type(
        &mut self,
        pn: PlayerId,
        dc: Difficulty,
        st: crate::game::style::StepsType,
    ) -> bool {
        self.slots[pn.index()].preferred_difficulty = Some(dc);
        self.preferred_steps_type = Some(st);
        if self.difficulties_locked() {
            for other in PlayerId::ALL {
                if other != pn {
                    self.slots[other.index()].preferred_difficulty = Some(dc);
                }
            }
        }
        true
    }

    /// Step the preferred difficulty through the theme's shown list.
    pub fn change_preferred_difficulty(&mut self, pn: PlayerId, dir: i32) -> bool {
        let shown = &self.theme.difficulties_to_show;
        let mut dc = self.closest_shown_difficulty(pn);
        loop {
            let Some(next) = step_difficulty(dc, dir) else {
                return false;
            };
            dc = next;
            if shown.contains(&dc) {
                break;
            }
        }
        self.slots[pn.index()].preferred_difficulty = Some(dc);
        true
    }

    /// The player may prefer a difficulty that isn't shown (typically
    /// Edit); pick the closest shown one at or below it.
    pub fn closest_shown_difficulty(&self, pn: PlayerId) -> Difficulty {
        let preferred = self.slots[pn.index()]
            .preferred_difficulty
            .unwrap_or(Difficulty::Medium);
        self.theme
            .difficulties_to_show
            .iter()
            .copied()
            .filter(|&dc| dc <= preferred)
            .max()
            .unwrap_or(Difficulty::Beginner)
    }

    pub fn change_preferred_course_difficulty_and_steps_type(
        &mut self,
        pn: PlayerId,
        cd: Difficulty,
        st: crate::game::style::StepsType,
    ) -> bool {
        self.slots[pn.index()].preferred_course_difficulty = cd;
        self.preferred_steps_type = Some(st);
        if self.prefs.lock_course_difficulties {
            for other in PlayerId::ALL {
                if other != pn {
                    self.slots[other.index()].preferred_course_difficulty = cd;
                }
            }
        }
        true
    }

    pub fn change_preferred_course_difficulty(&mut self, pn: PlayerId, dir: i32) -> bool {
        let shown = &self.theme.course_difficulties_to_show;
        let mut cd = self.slots[pn.index()].preferred_course_difficulty;
        loop {
            let Some(next) = step_difficulty(cd, dir) else {
                return false;
            };
            cd = next;
            if shown.contains(&cd) {
                break;
            }
        }
        self.slots[pn.index()].preferred_course_difficulty = cd;
        true
    }

    pub fn is_course_difficulty_shown(&self, cd: Difficulty) -> bool {
        self.theme.course_difficulties_to_show.contains(&cd)
    }

    /// Easiest steps chosen by any human player, or `None` if nobody has
    /// picked yet.
    pub fn easiest_steps_difficulty(&self) -> Option<Difficulty> {
        let mut easiest: Option<Difficulty> = None;
        for pn in self.human_players() {
            let Some(steps) = &self.slots[pn.index()].cur_steps else {
                warn!("easiest_steps_difficulty called but {pn} hasn't chosen steps");
                continue;
            };
            easiest = Some(match easiest {
                Some(dc) => dc.min(steps.difficulty),
                None => steps.difficulty,
            });
        }
        easiest
    }

    // --- Attract loop ---

    pub fn is_time_to_play_attract_sounds(&self) -> bool {
        // -1 between the end of a game and the next first attract screen;
        // keep sound on in that span so the machine doesn't go abruptly
        // silent after a game.
        if self.num_times_through_attract == -1 {
            return true;
        }
        let freq = self.prefs.attract_sound_frequency;
        if freq == 0 {
            return false;
        }
        self.num_times_through_attract % freq as i32 == 0
    }

    pub fn visit_attract_screen(&mut self, screen_name: &str) {
        if screen_name == self.theme.first_attract_screen {
            self.num_times_through_attract += 1;
        }
    }

    /// Session wall-clock since the first join, if the game has started.
    pub fn seconds_since_game_started(&self) -> u64 {
        self.time_game_started
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }
}

fn step_difficulty(dc: Difficulty, dir: i32) -> Option<Difficulty> {
    if dir == 0 {
        return None;
    }
    let order = [
        Difficulty::Beginner,
        Difficulty::Easy,
        Difficulty::Medium,
        Difficulty::Hard,
        Difficulty::Challenge,
        Difficulty::Edit,
    ];
    let ix = order.iter().position(|&d| d == dc)? as i32 + dir.signum();
    if ix < 0 || ix as usize >= order.len() {
        None
    } else {
        Some(order[ix as usize])
    }
}

/// A parsed mode command: "name,value" pairs separated by semicolons.
#[derive(Debug, Default)]
struct GameCommand {
    play_mode: Option<PlayMode>,
    style: Option<&'static Style>,
    difficulty: Option<Difficulty>,
    song: Option<SongId>,
    course: Option<CourseId>,
    mods: Option<String>,
}

impl GameCommand {
    fn parse(command: &str) -> Result<Self, String> {
        let mut cmd = Self::default();
        for segment in command.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let (name, value) = segment
                .split_once(',')
                .ok_or_else(|| format!("segment \"{segment}\" has no value"))?;
            let name = name.trim().to_ascii_lowercase();
            let value = value.trim();
            match name.as_str() {
                "playmode" => {
                    cmd.play_mode = Some(
                        value
                            .parse()
                            .map_err(|()| format!("unknown play mode \"{value}\""))?,
                    );
                }
                "style" => {
                    cmd.style = Some(
                        crate::game::style::style_by_name(value)
                            .ok_or_else(|| format!("unknown style \"{value}\""))?,
                    );
                }
                "difficulty" => {
                    cmd.difficulty = Some(
                        value
                            .parse()
                            .map_err(|()| format!("unknown difficulty \"{value}\""))?,
                    );
                }
                "song" => cmd.song = Some(SongId::new(value)),
                "course" => cmd.course = Some(CourseId::new(value)),
                "mods" => cmd.mods = Some(value.to_string()),
                _ => return Err(format!("unknown command \"{name}\"")),
            }
        }
        Ok(cmd)
    }
}
