use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Consider a snapshot stale after 1 hour.
const SNAPSHOT_STALE_MINUTES: i64 = 60;

/// Persisted form of a cache: its name, capture time and entities.
/// Dirty sets are session state and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot<T> {
    pub name: String,
    pub cached_at: DateTime<Utc>,
    pub entities: Vec<T>,
}

impl<T> Snapshot<T> {
    pub fn new(name: &str, entities: Vec<T>) -> Self {
        Self {
            name: name.to_string(),
            cached_at: Utc::now(),
            entities,
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    /// Short human-readable age, rounded to the nearest unit.
    pub fn age_display(&self) -> String {
        // Clock skew can make the age negative
        let minutes = self.age_minutes().max(0);
        match minutes {
            0 => "just now".to_string(),
            1..=59 => format!("{}m ago", minutes),
            60..=1439 => format!("{}h ago", round_to(minutes, 60)),
            _ => format!("{}d ago", round_to(minutes, 1440)),
        }
    }

    pub fn is_stale(&self) -> bool {
        self.age_minutes() > SNAPSHOT_STALE_MINUTES
    }
}

fn round_to(minutes: i64, unit: i64) -> i64 {
    (minutes + unit / 2) / unit
}
