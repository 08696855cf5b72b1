//! Shared record types for the tt archive stores and their callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =====================================================
// Enumerations
// =====================================================

/// Authorization state of a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthFlag {
    #[default]
    None,
    Requested,
    Authenticated,
}

impl AuthFlag {
    pub fn as_i64(&self) -> i64 {
        match self {
            AuthFlag::None => 0,
            AuthFlag::Requested => 1,
            AuthFlag::Authenticated => 2,
        }
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(AuthFlag::None),
            1 => Some(AuthFlag::Requested),
            2 => Some(AuthFlag::Authenticated),
            _ => None,
        }
    }

    /// Short label used when listing profiles
    pub fn status_label(&self) -> &'static str {
        match self {
            AuthFlag::None => "Unknown",
            AuthFlag::Requested => "Need PIN",
            AuthFlag::Authenticated => "OK",
        }
    }
}

/// Which timeline a tweet was captured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineType {
    Home,
    User,
    Mentions,
    Favorites,
}

impl TimelineType {
    pub fn as_i64(&self) -> i64 {
        match self {
            TimelineType::Home => 1,
            TimelineType::User => 2,
            TimelineType::Mentions => 3,
            TimelineType::Favorites => 4,
        }
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            1 => Some(TimelineType::Home),
            2 => Some(TimelineType::User),
            3 => Some(TimelineType::Mentions),
            4 => Some(TimelineType::Favorites),
            _ => None,
        }
    }
}

/// Kind of work a schedule entry triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleTask {
    HomeTimeline,
    UserTimeline,
    Mentions,
    Followers,
}

impl ScheduleTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleTask::HomeTimeline => "home_timeline",
            ScheduleTask::UserTimeline => "user_timeline",
            ScheduleTask::Mentions => "mentions",
            ScheduleTask::Followers => "followers",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "home_timeline" => Some(ScheduleTask::HomeTimeline),
            "user_timeline" => Some(ScheduleTask::UserTimeline),
            "mentions" => Some(ScheduleTask::Mentions),
            "followers" => Some(ScheduleTask::Followers),
            _ => None,
        }
    }
}

impl std::fmt::Display for ScheduleTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =====================================================
// Domain Types
// =====================================================

/// A linked Twitter account used to make API calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub profile_alias: String,
    pub auth_flag: AuthFlag,
    /// Request token while `Requested`, access token once `Authenticated`
    pub auth_data: Option<serde_json::Value>,
    pub user_id: Option<i64>,
    pub priority: i64,
    pub purpose: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn new(profile_alias: impl Into<String>) -> Self {
        Self {
            profile_alias: profile_alias.into(),
            auth_flag: AuthFlag::None,
            auth_data: None,
            user_id: None,
            priority: 5,
            purpose: String::new(),
            created_at: None,
            updated_at: None,
        }
    }
}

/// Partial update of a profile; `None` fields are left untouched
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub auth_flag: Option<AuthFlag>,
    pub auth_data: Option<serde_json::Value>,
    pub user_id: Option<i64>,
    pub priority: Option<i64>,
    pub purpose: Option<String>,
}

/// One Twitter user grouped under a person
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: i64,
    pub person_id: Option<i64>,
    pub nick_name: Option<String>,
    pub user_name: String,
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPerson {
    pub nick_name: String,
    pub user_id: i64,
    pub user_name: Option<String>,
    pub person_id: Option<i64>,
}

/// Distinct (person, nick name) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonSummary {
    pub person_id: Option<i64>,
    pub nick_name: Option<String>,
}

/// A recurring fetch task bound to a profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub profile_alias: String,
    pub task: ScheduleTask,
    pub target: Option<String>,
    pub interval_secs: i64,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub options: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSchedule {
    pub profile_alias: String,
    pub task: ScheduleTask,
    pub target: Option<String>,
    pub interval_secs: Option<i64>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub options: Option<serde_json::Value>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ScheduleUpdate {
    pub target: Option<String>,
    pub interval_secs: Option<i64>,
    pub enabled: Option<bool>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub options: Option<serde_json::Value>,
}

/// Paging cursor for one timeline fetched through one profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineCursor {
    pub profile_alias: String,
    pub timeline_type: TimelineType,
    /// 0 means the authenticating user
    pub timeline_owner: i64,
    pub since_id: Option<i64>,
    pub max_id: Option<i64>,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

/// Membership of a tweet in a conversation thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadEntry {
    pub thread_id: i64,
    pub tweet_id: i64,
    pub in_reply_to: Option<i64>,
    pub position: i64,
}

/// An archived tweet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tweet {
    pub tweet_id: i64,
    pub timeline_type: TimelineType,
    pub timeline_owner: Option<i64>,
    pub plain_text: String,
    pub html_text: Option<String>,
    pub xml_text: Option<String>,
    pub coordinates: Option<serde_json::Value>,
    pub date: DateTime<Utc>,
    pub in_reply_to_tweet: Option<i64>,
    pub in_reply_to_user: Option<i64>,
    pub user: i64,
    pub is_retweet: bool,
    pub source: Option<String>,
    pub retweeted_count: i64,
    pub fav_count: Option<i64>,
    pub is_my_fav: bool,
}

// =====================================================
// Reports
// =====================================================

/// Outcome of a multi-row tweet insert
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertReport {
    pub inserted: usize,
    pub skipped: usize,
}

/// Archive overview
#[derive(Debug, Serialize, Deserialize)]
pub struct ArchiveSummary {
    pub profiles: usize,
    pub authenticated_profiles: usize,
    pub people: i64,
    pub schedules_due: usize,
    pub tweet_partitions: usize,
    pub tweets: i64,
}
