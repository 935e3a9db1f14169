//! `table:action:scope` permission strings and scope resolution.
//!
//! Permissions come from role rows (JSON arrays of strings). A check filters
//! the caller's set down to the table and action, then takes the highest
//! granted scope: `*` beats `org` beats `own`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
    Read,
    Write,
    Create,
    Delete,
    #[serde(rename = "*")]
    All,
}

impl fmt::Display for PermissionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PermissionAction::Read => "read",
            PermissionAction::Write => "write",
            PermissionAction::Create => "create",
            PermissionAction::Delete => "delete",
            PermissionAction::All => "*",
        };
        f.write_str(s)
    }
}

impl FromStr for PermissionAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "read" => PermissionAction::Read,
            "write" => PermissionAction::Write,
            "create" => PermissionAction::Create,
            "delete" => PermissionAction::Delete,
            "*" => PermissionAction::All,
            _ => return Err(()),
        })
    }
}

/// Ordered: None < Own < Org < All.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PermissionScope {
    None,
    Own,
    Org,
    All,
}

impl FromStr for PermissionScope {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "own" => PermissionScope::Own,
            "org" => PermissionScope::Org,
            "*" => PermissionScope::All,
            _ => return Err(()),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Permission {
    /// Table name or "*".
    pub table: String,
    pub action: PermissionAction,
    pub scope: PermissionScope,
}

impl Permission {
    /// Parse `table:action:scope`. Malformed strings are dropped by callers
    /// (a bad permission grants nothing).
    pub fn parse(s: &str) -> Option<Permission> {
        let mut parts = s.split(':');
        let table = parts.next()?.trim();
        let action = parts.next()?.trim().parse().ok()?;
        let scope = parts.next()?.trim().parse().ok()?;
        if parts.next().is_some() || table.is_empty() {
            return None;
        }
        Some(Permission {
            table: table.to_string(),
            action,
            scope,
        })
    }

    fn covers_table(&self, table: &str) -> bool {
        self.table == "*" || self.table == table
    }

    fn covers_action(&self, action: PermissionAction) -> bool {
        self.action == PermissionAction::All || self.action == action
    }
}

/// Highest scope granted for (table, action), or `PermissionScope::None` when
/// nothing matches.
pub fn resolve_scope(permissions: &[Permission], table: &str, action: PermissionAction) -> PermissionScope {
    permissions
        .iter()
        .filter(|p| p.covers_table(table) && p.covers_action(action))
        .map(|p| p.scope)
        .max()
        .unwrap_or(PermissionScope::None)
}

/// Row-level narrowing derived from a granted scope and the model's columns.
#[derive(Clone, Debug, PartialEq)]
pub enum ScopeFilter {
    Unrestricted,
    /// `owner_id = user`
    Owner(i64),
    /// `organization_id = org`
    Organization(i64),
    /// `pk = id` (the user reading itself, or its own organization row)
    SelfRow(i64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_strings() {
        let p = Permission::parse("invoice:read:org").unwrap();
        assert_eq!(p.table, "invoice");
        assert_eq!(p.action, PermissionAction::Read);
        assert_eq!(p.scope, PermissionScope::Org);

        let p = Permission::parse("*:*:*").unwrap();
        assert_eq!(p.table, "*");
        assert_eq!(p.action, PermissionAction::All);
        assert_eq!(p.scope, PermissionScope::All);
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!(Permission::parse("invoice:read").is_none());
        assert!(Permission::parse("invoice:read:org:extra").is_none());
        assert!(Permission::parse("invoice:peek:org").is_none());
        assert!(Permission::parse(":read:org").is_none());
    }

    #[test]
    fn highest_scope_wins() {
        let perms = vec![
            Permission::parse("invoice:read:own").unwrap(),
            Permission::parse("invoice:*:org").unwrap(),
        ];
        assert_eq!(resolve_scope(&perms, "invoice", PermissionAction::Read), PermissionScope::Org);
        assert_eq!(resolve_scope(&perms, "invoice", PermissionAction::Write), PermissionScope::Org);
    }

    #[test]
    fn wildcard_table_and_action() {
        let perms = vec![Permission::parse("*:*:*").unwrap()];
        assert_eq!(resolve_scope(&perms, "anything", PermissionAction::Delete), PermissionScope::All);
    }

    #[test]
    fn unmatched_table_denied() {
        let perms = vec![Permission::parse("invoice:read:org").unwrap()];
        assert_eq!(resolve_scope(&perms, "order", PermissionAction::Read), PermissionScope::None);
        assert_eq!(resolve_scope(&perms, "invoice", PermissionAction::Delete), PermissionScope::None);
    }
}
