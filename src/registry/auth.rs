//! Caller identity and ownership checks.
//!
//! Identity resolution itself lives outside this crate; callers hand the
//! registry an already-resolved [`Actor`] or nothing at all.

use serde::{Deserialize, Serialize};

use crate::error::{PackError, Result};
use crate::registry::model::Skill;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
}

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Resolve the caller or fail with `NotAuthenticated`.
pub fn require_actor(actor: Option<&Actor>) -> Result<&Actor> {
    match actor {
        Some(actor) if !actor.id.trim().is_empty() => Ok(actor),
        _ => Err(PackError::NotAuthenticated),
    }
}

pub fn require_owner(actor: &Actor, skill: &Skill) -> Result<()> {
    if actor.id == skill.owner_id {
        Ok(())
    } else {
        Err(PackError::NotAuthorized(format!(
            "{} does not own skill {}",
            actor.id, skill.slug
        )))
    }
}
