//! Song/course identities and the catalog collaborator.
//!
//! The session never holds references into catalog storage; it keeps stable
//! ids (`SongId`, `StepsId`, ...) and resolves them through [`SongCatalog`]
//! at point of use, so a catalog reload cannot leave it dangling.

use log::info;
use rand::seq::SliceRandom;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::game::style::StepsType;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SongId(pub String);

impl SongId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for SongId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CourseId(pub String);

impl CourseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for CourseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Difficulty {
    Beginner,
    Easy,
    #[default]
    Medium,
    Hard,
    Challenge,
    Edit,
}

impl Difficulty {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Beginner => "Beginner",
            Self::Easy => "Easy",
            Self::Medium => "Medium",
            Self::Hard => "Hard",
            Self::Challenge => "Challenge",
            Self::Edit => "Edit",
        }
    }
}

impl std::str::FromStr for Difficulty {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beginner" => Ok(Self::Beginner),
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            "challenge" => Ok(Self::Challenge),
            "edit" => Ok(Self::Edit),
            _ => Err(()),
        }
    }
}

/// Course difficulties reuse the steps scale.
pub type CourseDifficulty = Difficulty;

/// Stable address of one chart: song + chart type + difficulty. Doubles as
/// the high-score table key, so it is `Ord` + `Hash` + serde-friendly.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepsId {
    pub song: SongId,
    pub steps_type: StepsType,
    pub difficulty: Difficulty,
}

/// Stable address of one course trail (course + chart type + difficulty).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrailId {
    pub course: CourseId,
    pub steps_type: StepsType,
    pub difficulty: CourseDifficulty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    pub id: SongId,
    pub title: String,
    /// Marathon songs cost 3 stage tokens, long versions 2.
    pub is_marathon: bool,
    pub is_long: bool,
    pub banner_path: Option<String>,
    pub background_path: Option<String>,
    pub times_played: u32,
}

impl Song {
    pub fn has_banner(&self) -> bool {
        self.banner_path.is_some()
    }

    pub fn has_background(&self) -> bool {
        self.background_path.is_some()
    }
}

/// One per-trail modifier line, carried so note-skin discovery can see
/// skins forced by course entries.
#[derive(Debug, Clone, PartialEq)]
pub struct CourseEntry {
    pub song: SongId,
    pub modifiers: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Course {
    pub id: CourseId,
    pub title: String,
    pub banner_path: Option<String>,
    pub entries: Vec<CourseEntry>,
    /// Auto-generated courses are rebuilt whenever the catalog changes.
    pub is_fixed: bool,
}

impl Course {
    pub fn has_banner(&self) -> bool {
        self.banner_path.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Group,
    Title,
    Bpm,
    Popularity,
    TopGrades,
    Artist,
}

impl SortOrder {
    /// Whether this order sorts songs (as opposed to courses or modes);
    /// only song sorts are worth persisting to a profile.
    pub const fn is_song_sort(self) -> bool {
        matches!(
            self,
            Self::Group | Self::Title | Self::Bpm | Self::Popularity | Self::TopGrades | Self::Artist
        )
    }
}

impl std::str::FromStr for SortOrder {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "group" => Ok(Self::Group),
            "title" => Ok(Self::Title),
            "bpm" => Ok(Self::Bpm),
            "popularity" => Ok(Self::Popularity),
            "topgrades" => Ok(Self::TopGrades),
            "artist" => Ok(Self::Artist),
            _ => Err(()),
        }
    }
}

/// Ranking categories bucket scores by average chart meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RankingCategory {
    A,
    B,
    C,
    D,
}

impl RankingCategory {
    pub const ALL: [RankingCategory; 4] = [
        RankingCategory::A,
        RankingCategory::B,
        RankingCategory::C,
        RankingCategory::D,
    ];

    /// Bucket an average chart meter into a category.
    pub const fn from_average_meter(meter: u32) -> RankingCategory {
        match meter {
            9.. => Self::A,
            7..=8 => Self::B,
            5..=6 => Self::C,
            _ => Self::D,
        }
    }

    pub const fn letter(self) -> char {
        match self {
            Self::A => 'A',
            Self::B => 'B',
            Self::C => 'C',
            Self::D => 'D',
        }
    }
}

/// The song/course catalog collaborator. Lookup by id plus the derived-data
/// refresh hooks the session triggers on reset.
pub trait SongCatalog {
    fn song(&self, id: &SongId) -> Option<&Song>;
    fn course(&self, id: &CourseId) -> Option<&Course>;
    fn default_song(&self) -> Option<SongId>;

    /// Recompute the popularity-ordered cache.
    fn update_popular(&mut self);
    /// Reshuffle the random song ordering.
    fn update_shuffled(&mut self);
    /// Rebuild auto-generated courses; trails cached before the catalog was
    /// fully loaded are stale after this.
    fn regenerate_non_fixed_courses(&mut self);
}

/// In-memory catalog backed by fixed song/course lists. Good enough for
/// tests and for hosts that load their catalog up front.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    songs: FxHashMap<SongId, Song>,
    courses: FxHashMap<CourseId, Course>,
    popular: Vec<SongId>,
    shuffled: Vec<SongId>,
}

impl StaticCatalog {
    pub fn new(songs: Vec<Song>, courses: Vec<Course>) -> Self {
        let songs = songs.into_iter().map(|s| (s.id.clone(), s)).collect();
        let courses = courses.into_iter().map(|c| (c.id.clone(), c)).collect();
        Self {
            songs,
            courses,
            popular: Vec::new(),
            shuffled: Vec::new(),
        }
    }

    pub fn popular(&self) -> &[SongId] {
        &self.popular
    }

    pub fn shuffled(&self) -> &[SongId] {
        &self.shuffled
    }
}

impl SongCatalog for StaticCatalog {
    fn song(&self, id: &SongId) -> Option<&Song> {
        self.songs.get(id)
    }

    fn course(&self, id: &CourseId) -> Option<&Course> {
        self.courses.get(id)
    }

    fn default_song(&self) -> Option<SongId> {
        None
    }

    fn update_popular(&mut self) {
        let mut ids: Vec<&Song> = self.songs.values().collect();
        ids.sort_by(|a, b| b.times_played.cmp(&a.times_played).then_with(|| a.id.cmp(&b.id)));
        self.popular = ids.into_iter().map(|s| s.id.clone()).collect();
    }

    fn update_shuffled(&mut self) {
        let mut ids: Vec<SongId> = self.songs.keys().cloned().collect();
        ids.sort();
        ids.shuffle(&mut rand::rng());
        self.shuffled = ids;
    }

    fn regenerate_non_fixed_courses(&mut self) {
        let stale = self.courses.values().filter(|c| !c.is_fixed).count();
        if stale > 0 {
            info!("Regenerating {} non-fixed course(s)", stale);
        }
        // Static catalogs have nothing to rebuild from; dropping cached
        // entries of non-fixed courses keeps them from serving stale trails.
        for course in self.courses.values_mut().filter(|c| !c.is_fixed) {
            course.entries.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(id: &str, times_played: u32) -> Song {
        Song {
            id: SongId::new(id),
            title: id.to_string(),
            is_marathon: false,
            is_long: false,
            banner_path: None,
            background_path: None,
            times_played,
        }
    }

    #[test]
    fn popular_orders_by_play_count_then_id() {
        let mut catalog = StaticCatalog::new(
            vec![song("alpha", 2), song("beta", 9), song("gamma", 2)],
            Vec::new(),
        );
        catalog.update_popular();
        assert_eq!(
            catalog.popular(),
            &[SongId::new("beta"), SongId::new("alpha"), SongId::new("gamma")]
        );
    }

    #[test]
    fn shuffled_keeps_every_song() {
        let mut catalog =
            StaticCatalog::new(vec![song("a", 0), song("b", 0), song("c", 0)], Vec::new());
        catalog.update_shuffled();
        let mut ids = catalog.shuffled().to_vec();
        ids.sort();
        assert_eq!(ids, vec![SongId::new("a"), SongId::new("b"), SongId::new("c")]);
    }
}
