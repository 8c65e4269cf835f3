//! Target identity - the key that selects a logical pool.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The (account, user, database, schema, warehouse, role) tuple a session
/// is bound to. Two requests with equal identities share one pool.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetIdentity {
    pub account: String,
    pub user: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub warehouse: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl TargetIdentity {
    pub fn new(account: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            user: user.into(),
            database: None,
            schema: None,
            warehouse: None,
            role: None,
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_warehouse(mut self, warehouse: impl Into<String>) -> Self {
        self.warehouse = Some(warehouse.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

impl fmt::Display for TargetIdentity {
    /// Renders as `user@account/database.schema?warehouse=..&role=..`,
    /// omitting absent parts. Used as the `identity` field in logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.account)?;
        if let Some(db) = &self.database {
            write!(f, "/{}", db)?;
            if let Some(schema) = &self.schema {
                write!(f, ".{}", schema)?;
            }
        }
        let mut sep = '?';
        if let Some(wh) = &self.warehouse {
            write!(f, "{}warehouse={}", sep, wh)?;
            sep = '&';
        }
        if let Some(role) = &self.role {
            write!(f, "{}role={}", sep, role)?;
        }
        Ok(())
    }
}
