//! Member directory lookups.
//!
//! The directory owns users; this crate only reads a member's role and display
//! name at login, and creates a `current_member` row when a `register`
//! challenge is verified for an unknown identity.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::{collections::HashMap, fmt, str::FromStr};
use tokio::sync::Mutex;
use tracing::Instrument;
use utoipa::ToSchema;

/// Membership role carried in the session token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Alumnus,
    CurrentMember,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Alumnus => "alumnus",
            Self::CurrentMember => "current_member",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "admin" => Ok(Self::Admin),
            "alumnus" => Ok(Self::Alumnus),
            "current_member" => Ok(Self::CurrentMember),
            _ => Err(format!("invalid role: {value}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    pub identity: String,
    pub role: Role,
    pub display_name: String,
}

impl Member {
    /// New members register as current students; alumni and admins are promoted elsewhere.
    #[must_use]
    pub fn new_registrant(identity: &str) -> Self {
        let display_name = identity
            .split('@')
            .next()
            .filter(|local| !local.is_empty())
            .unwrap_or(identity)
            .to_string();
        Self {
            identity: identity.to_string(),
            role: Role::CurrentMember,
            display_name,
        }
    }
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_member(&self, identity: &str) -> Result<Option<Member>>;

    /// Insert the member if the identity is unknown and return the stored row.
    async fn register_member(&self, member: Member) -> Result<Member>;
}

#[derive(Clone, Debug)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn member_from_row(row: &sqlx::postgres::PgRow) -> Result<Member> {
    let role: String = row.try_get("role")?;
    Ok(Member {
        identity: row.try_get("email")?,
        role: role.parse().map_err(anyhow::Error::msg)?,
        display_name: row.try_get("display_name")?,
    })
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_member(&self, identity: &str) -> Result<Option<Member>> {
        let query = "SELECT email, role, display_name FROM users WHERE email = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(identity)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup member")?;

        row.as_ref().map(member_from_row).transpose()
    }

    async fn register_member(&self, member: Member) -> Result<Member> {
        // A concurrent registration for the same email keeps the first row.
        let query = r"
            INSERT INTO users (email, role, display_name)
            VALUES ($1, $2, $3)
            ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
            RETURNING email, role, display_name
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(&member.identity)
            .bind(member.role.as_str())
            .bind(&member.display_name)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to register member")?;

        member_from_row(&row)
    }
}

/// Directory kept in process memory, used by tests and local development.
#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    members: Mutex<HashMap<String, Member>>,
}

impl MemoryUserDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_members(members: impl IntoIterator<Item = Member>) -> Self {
        let members = members
            .into_iter()
            .map(|member| (member.identity.clone(), member))
            .collect();
        Self {
            members: Mutex::new(members),
        }
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_member(&self, identity: &str) -> Result<Option<Member>> {
        Ok(self.members.lock().await.get(identity).cloned())
    }

    async fn register_member(&self, member: Member) -> Result<Member> {
        let mut members = self.members.lock().await;
        Ok(members
            .entry(member.identity.clone())
            .or_insert(member)
            .clone())
    }
}
