//! Core data model.
//!
//! Defines [`MediaType`], [`ApprovalStatus`], [`InteractionType`], the [`Memory`]
//! record the feed schedules, and the immutable [`Interaction`] log entry.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Kind of media behind a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Photo,
    Video,
}

impl MediaType {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "photo" => Ok(Self::Photo),
            "video" => Ok(Self::Video),
            _ => Err(format!("unknown media type: {s}")),
        }
    }
}

/// Caregiver curation state. Only `Approved` memories are schedulable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Uploaded, waiting for image analysis.
    Processing,
    /// Analysis done, waiting for a caregiver to check the script.
    NeedsReview,
    /// Eligible for the patient feed.
    Approved,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::NeedsReview => "needs_review",
            Self::Approved => "approved",
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(Self::Processing),
            "needs_review" => Ok(Self::NeedsReview),
            "approved" => Ok(Self::Approved),
            _ => Err(format!("unknown approval status: {s}")),
        }
    }
}

/// Type of an interaction log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    Like,
    Recall,
    Skip,
    VideoGenerated,
}

impl InteractionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Recall => "recall",
            Self::Skip => "skip",
            Self::VideoGenerated => "video_generated",
        }
    }
}

impl std::fmt::Display for InteractionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InteractionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "like" => Ok(Self::Like),
            "recall" => Ok(Self::Recall),
            "skip" => Ok(Self::Skip),
            "video_generated" => Ok(Self::VideoGenerated),
            _ => Err(format!("unknown interaction type: {s}")),
        }
    }
}

/// A memory record, matching the `memories` table schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    /// Patient whose feed this memory belongs to.
    pub patient_id: String,
    pub media_type: MediaType,
    /// Public URL (or storage reference) of the photo or video.
    pub media_url: String,
    pub status: ApprovalStatus,
    /// Cached narration text. Generated lazily when absent.
    pub script: Option<String>,
    /// Cached narration audio reference. Generated lazily when absent.
    pub audio_url: Option<String>,
    /// While in the future, the memory is suppressed from the candidate pool.
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Count of likes and recalls. Never decremented.
    pub engagement_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Memory {
    /// `true` while the suppression window is still open at `now`.
    pub fn is_cooling_down(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }

    /// Approved and outside any cooldown window.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Approved && !self.is_cooling_down(now)
    }

    /// Photos without both a script and an audio track need narration generated.
    pub fn needs_narration(&self) -> bool {
        self.media_type == MediaType::Photo && (self.script.is_none() || self.audio_url.is_none())
    }
}

/// An immutable interaction log entry, matching the `interactions` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: i64,
    pub memory_id: String,
    pub patient_id: String,
    #[serde(rename = "type")]
    pub interaction_type: InteractionType,
    pub created_at: DateTime<Utc>,
}

/// Fixed-width RFC 3339 (millisecond precision, `Z` suffix) so stored
/// timestamps compare correctly as strings in SQL.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored RFC 3339 timestamp.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp: {raw}"))
}
