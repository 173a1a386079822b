use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown session status: {0}")]
    UnknownStatus(String),
    #[error("invalid lesson date (expected YYYY-MM-DD): {0}")]
    InvalidDate(String),
    #[error("lesson date outside 0001-01-01..=9999-12-31: {0}")]
    DateOutOfRange(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Scheduled,
    Completed,
    Cancelled,
    RescheduledOut,
    Rescheduled,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::RescheduledOut => "rescheduled_out",
            Self::Rescheduled => "rescheduled",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Ok(Self::Scheduled),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "rescheduled_out" => Ok(Self::RescheduledOut),
            "rescheduled" => Ok(Self::Rescheduled),
            _ => Err(ModelError::UnknownStatus(s.to_string())),
        }
    }
}

/// One calendar occurrence of a lesson within a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonSession {
    pub id: String,
    pub lesson_date: NaiveDate,
    #[serde(default)]
    pub status: Option<SessionStatus>,
    #[serde(default)]
    pub payment_id: Option<String>,
    /// Per-plan creation order; breaks ties between sessions on the same date.
    #[serde(default)]
    pub seq: i64,
}

impl LessonSession {
    pub fn new(id: impl Into<String>, lesson_date: NaiveDate, seq: i64) -> Self {
        Self {
            id: id.into(),
            lesson_date,
            status: Some(SessionStatus::Scheduled),
            payment_id: None,
            seq,
        }
    }

    /// Sessions with no status count as scheduled.
    pub fn is_scheduled(&self) -> bool {
        matches!(self.status, None | Some(SessionStatus::Scheduled))
    }

    pub fn is_paid(&self) -> bool {
        self.payment_id.is_some()
    }
}

/// Stored dates compare as text, so only four-digit years keep their order.
pub fn check_lesson_date(date: NaiveDate) -> Result<NaiveDate, ModelError> {
    if (1..=9999).contains(&date.year()) {
        Ok(date)
    } else {
        Err(ModelError::DateOutOfRange(format_lesson_date(date)))
    }
}

pub fn parse_lesson_date(raw: &str) -> Result<NaiveDate, ModelError> {
    let date = NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|_| ModelError::InvalidDate(raw.to_string()))?;
    check_lesson_date(date)
}

pub fn format_lesson_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}
