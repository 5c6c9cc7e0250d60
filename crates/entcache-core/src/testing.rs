//! Shared fixtures for unit tests.

use serde::{Deserialize, Serialize};

use crate::reader::{DescriptorBuilder, Entity};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub name: String,
    pub status: String,
    pub email: Option<String>,
    pub visits: i32,
}

impl Contact {
    pub fn new(id: i64, name: &str, status: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            status: status.to_string(),
            email: None,
            visits: 0,
        }
    }
}

impl Entity for Contact {
    type Key = i64;
    const NAME: &'static str = "Contact";

    fn descriptor() -> DescriptorBuilder<Self> {
        DescriptorBuilder::new()
            .field("id", |c: &Contact| &c.id, |c, v| c.id = v)
            .field("name", |c: &Contact| &c.name, |c, v| c.name = v)
            .field("status", |c: &Contact| &c.status, |c, v| c.status = v)
            .field("email", |c: &Contact| &c.email, |c, v| c.email = v)
            .field("visits", |c: &Contact| &c.visits, |c, v| c.visits = v)
    }
}
