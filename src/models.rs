//! Plain data types shared by every layer of the engine.
//!
//! Nothing here knows about storage or HTTP. Persistence adapters and
//! upstream clients convert into and out of these structs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// External catalog identifier of a title (the AniList media id).
pub type TitleId = u64;

/// Local user identifier.
pub type UserId = u64;

/// Store-assigned identifier of a dub record.
pub type RecordId = u64;

/// Release status of the source title, as reported by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseStatus {
    NotYetReleased,
    #[default]
    Releasing,
    Finished,
    Cancelled,
    Hiatus,
}

impl ReleaseStatus {
    /// True once the source run is over and no further episodes will air.
    pub fn is_finished(self) -> bool {
        matches!(self, ReleaseStatus::Finished | ReleaseStatus::Cancelled)
    }
}

impl std::str::FromStr for ReleaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NOT_YET_RELEASED" => Ok(Self::NotYetReleased),
            "RELEASING" => Ok(Self::Releasing),
            "FINISHED" => Ok(Self::Finished),
            "CANCELLED" => Ok(Self::Cancelled),
            "HIATUS" => Ok(Self::Hiatus),
            other => Err(format!("unknown release status: {other}")),
        }
    }
}

/// A tracked series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Title {
    pub id: TitleId,
    /// Localized display name (English, falling back to romaji).
    pub name: String,
    pub cover_image: Option<String>,
    /// Total episode count, unknown for some titles until they finish.
    pub episodes: Option<u32>,
    pub status: ReleaseStatus,
}

/// The resolved dub fields of a record.
///
/// Constructors keep the invariants: `dubbed_episodes <= total_episodes`,
/// `total_episodes >= 1`, no dub means zero dubbed episodes, and a dub that
/// is not releasing is complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DubState {
    pub has_dub: bool,
    pub is_releasing: bool,
    pub dubbed_episodes: u32,
    pub total_episodes: u32,
    pub next_air: Option<DateTime<Utc>>,
}

impl DubState {
    /// No dub is scheduled.
    pub fn no_dub(total_episodes: u32) -> Self {
        Self {
            has_dub: false,
            is_releasing: false,
            dubbed_episodes: 0,
            total_episodes: total_episodes.max(1),
            next_air: None,
        }
    }

    /// The dub has every episode.
    pub fn complete(total_episodes: u32) -> Self {
        let total = total_episodes.max(1);
        Self {
            has_dub: true,
            is_releasing: false,
            dubbed_episodes: total,
            total_episodes: total,
            next_air: None,
        }
    }

    /// The dub is airing and `next_episode` is the next one announced.
    pub fn releasing(next_episode: u32, total_episodes: u32, next_air: DateTime<Utc>) -> Self {
        let total = total_episodes.max(1);
        Self {
            has_dub: true,
            is_releasing: true,
            dubbed_episodes: next_episode.saturating_sub(1).min(total),
            total_episodes: total,
            next_air: Some(next_air),
        }
    }

    /// Checks the record invariants.
    pub fn is_consistent(&self) -> bool {
        self.total_episodes >= 1
            && self.dubbed_episodes <= self.total_episodes
            && (self.has_dub || (self.dubbed_episodes == 0 && !self.is_releasing))
            && (self.is_releasing || !self.has_dub || self.dubbed_episodes == self.total_episodes)
    }

    /// Complete dubs never change again.
    pub fn is_complete(&self) -> bool {
        self.has_dub && !self.is_releasing
    }
}

/// Persisted dub status of one title. Unique per `title_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DubRecord {
    pub id: RecordId,
    pub title_id: TitleId,
    pub name: String,
    /// Route of the title on the schedule site.
    pub schedule_slug: String,
    pub cover_image: Option<String>,
    /// Last known release status of the source title.
    pub release_status: ReleaseStatus,
    #[serde(flatten)]
    pub state: DubState,
    pub last_resolved_at: DateTime<Utc>,
}

impl DubRecord {
    /// Rebuilds the catalog view of the title from the stored snapshot.
    pub fn to_title(&self) -> Title {
        Title {
            id: self.title_id,
            name: self.name.clone(),
            cover_image: self.cover_image.clone(),
            episodes: Some(self.state.total_episodes),
            status: self.release_status,
        }
    }
}

/// Everything a successful resolution writes. The store decides whether
/// this creates a record or overwrites an existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DubUpsert {
    pub title_id: TitleId,
    pub name: String,
    pub schedule_slug: String,
    pub cover_image: Option<String>,
    pub release_status: ReleaseStatus,
    pub state: DubState,
    pub resolved_at: DateTime<Utc>,
}

/// A user's interest in a title.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: UserId,
    pub title_id: TitleId,
    pub dub_id: RecordId,
}

/// Directed prequel -> sequel edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequelLink {
    pub title_id: TitleId,
    pub sequel_id: TitleId,
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Account id on the list site, used to query the watch-list.
    pub anilist_id: u64,
    /// Bearer token for the list site, if the user linked one.
    pub access_token: Option<String>,
    /// Where notifications go (e.g. a chat user id).
    pub contact: Option<String>,
}

/// One entry of a user's remote watch-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// The media the entry refers to.
    pub title_id: TitleId,
    /// Name of the list the entry sits in ("Planning", "Dropped", ...).
    pub list_name: String,
    /// Catalog data, `None` if the media has no usable title name.
    pub title: Option<Title>,
    /// Ids of direct sequels according to the catalog's relations.
    pub sequels: Vec<TitleId>,
}

/// A dub finished for a title a user subscribes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub user_id: UserId,
    pub title: Title,
    pub record: DubRecord,
}

impl NotificationEvent {
    /// Message text handed to the transport.
    pub fn message(&self) -> String {
        format!(
            "The dub for **{}** has officially finished airing ({} episodes). https://anilist.co/anime/{}",
            self.title.name, self.record.state.total_episodes, self.title.id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_states_are_consistent() {
        let air = Utc.with_ymd_and_hms(2026, 10, 20, 15, 30, 0).unwrap();
        assert!(DubState::no_dub(12).is_consistent());
        assert!(DubState::no_dub(0).is_consistent());
        assert!(DubState::complete(0).is_consistent());
        assert!(DubState::releasing(5, 12, air).is_consistent());
        assert!(DubState::releasing(40, 12, air).is_consistent());
        assert!(DubState::releasing(1, 12, air).is_consistent());
    }

    #[test]
    fn test_releasing_counts_episodes_before_announced() {
        let air = Utc.with_ymd_and_hms(2026, 10, 20, 15, 30, 0).unwrap();
        let state = DubState::releasing(5, 12, air);
        assert_eq!(state.dubbed_episodes, 4);
        assert!(state.is_releasing);
        assert_eq!(state.next_air, Some(air));
    }

    #[test]
    fn test_total_has_floor_of_one() {
        assert_eq!(DubState::no_dub(0).total_episodes, 1);
        let complete = DubState::complete(0);
        assert_eq!(complete.total_episodes, 1);
        assert_eq!(complete.dubbed_episodes, 1);
    }

    #[test]
    fn test_inconsistent_state_detected() {
        let state = DubState {
            has_dub: true,
            is_releasing: false,
            dubbed_episodes: 3,
            total_episodes: 12,
            next_air: None,
        };
        assert!(!state.is_consistent());
    }

    #[test]
    fn test_release_status_parse() {
        assert_eq!(
            "FINISHED".parse::<ReleaseStatus>().unwrap(),
            ReleaseStatus::Finished
        );
        assert_eq!(
            "not_yet_released".parse::<ReleaseStatus>().unwrap(),
            ReleaseStatus::NotYetReleased
        );
        assert!("SOMETIME".parse::<ReleaseStatus>().is_err());
        assert!(ReleaseStatus::Cancelled.is_finished());
        assert!(!ReleaseStatus::Hiatus.is_finished());
    }
}
