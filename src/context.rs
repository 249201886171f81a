//! Explicit request context passed into every engine call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub name: String,
}

impl Actor {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }
}

/// Who is acting and at what instant. Engines never read a clock themselves.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub actor: Actor,
    pub now: DateTime<Utc>,
}

impl RequestContext {
    pub fn new(actor: Actor) -> Self {
        Self { actor, now: Utc::now() }
    }

    pub fn at(actor: Actor, now: DateTime<Utc>) -> Self {
        Self { actor, now }
    }
}
