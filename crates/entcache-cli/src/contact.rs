use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use entcache_core::{DescriptorBuilder, Entity};

/// A person tracked by the demo cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub name: String,
    pub status: String,
    pub email: Option<String>,
    pub visits: i32,
    pub last_seen: Option<DateTime<Utc>>,
}

impl Entity for Contact {
    type Key = i64;
    const NAME: &'static str = "contacts";

    fn descriptor() -> DescriptorBuilder<Self> {
        DescriptorBuilder::new()
            .field("id", |c: &Contact| &c.id, |c, v| c.id = v)
            .field("name", |c: &Contact| &c.name, |c, v| c.name = v)
            .field("status", |c: &Contact| &c.status, |c, v| c.status = v)
            .field("email", |c: &Contact| &c.email, |c, v| c.email = v)
            .field("visits", |c: &Contact| &c.visits, |c, v| c.visits = v)
            .field("last_seen", |c: &Contact| &c.last_seen, |c, v| c.last_seen = v)
    }
}
