//! Data model: subjects, profiles, and the published profile view

use chrono::{DateTime, Utc};
use pantry_common::events::ProfileSource;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identity handle issued by the identity backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Minimal identity established by sign-in, available without a profile fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub email: Option<String>,
    pub display_name_hint: Option<String>,
    pub avatar_hint: Option<String>,
}

impl Subject {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: SubjectId::new(id),
            email: None,
            display_name_hint: None,
            avatar_hint: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name_hint = Some(name.into());
        self
    }

    pub fn with_avatar(mut self, url: impl Into<String>) -> Self {
        self.avatar_hint = Some(url.into());
        self
    }
}

/// Measurement system preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Units {
    #[default]
    Metric,
    Imperial,
}

/// Self-reported cooking skill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillLevel {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

/// User profile record as owned by the profile store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: SubjectId,
    pub username: String,
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub locale: String,
    pub units: Units,
    pub time_per_meal_minutes: u32,
    pub skill_level: SkillLevel,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Profile as published to observers, tagged with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", content = "profile", rename_all = "snake_case")]
pub enum CurrentProfile {
    /// Locally synthesized stand-in
    Approximate(Profile),
    /// Record read from the profile store
    Authoritative(Profile),
}

impl CurrentProfile {
    pub fn profile(&self) -> &Profile {
        match self {
            CurrentProfile::Approximate(p) | CurrentProfile::Authoritative(p) => p,
        }
    }

    pub fn source(&self) -> ProfileSource {
        match self {
            CurrentProfile::Approximate(_) => ProfileSource::Approximate,
            CurrentProfile::Authoritative(_) => ProfileSource::Authoritative,
        }
    }

    pub fn is_authoritative(&self) -> bool {
        matches!(self, CurrentProfile::Authoritative(_))
    }
}
