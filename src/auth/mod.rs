//! Request authentication: bearer JWT decoding, user loading, and the
//! role-closure permission set.
//!
//! A request without a token resolves to the public user (string_id
//! `public_user` in the default organization) so anonymous access is governed
//! by that user's roles like everyone else's.

use crate::error::AppError;
use crate::service::permission::Permission;
use crate::settings::Settings;
use crate::state::AppState;
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};

pub const PUBLIC_USER_STRING_ID: &str = "public_user";
pub const SUPER_ADMIN_ROLE: &str = "super_admin_role";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub uid: i64,
    pub exp: i64,
    /// Token id; lets a deployment blacklist individual tokens.
    pub jti: uuid::Uuid,
}

#[derive(Clone, Debug)]
pub struct CurrentUser {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub string_id: Option<String>,
    pub organization_id: Option<i64>,
    /// string_ids of every role held, implied roles included.
    pub roles: Vec<String>,
    pub permissions: Vec<Permission>,
}

impl CurrentUser {
    pub fn is_super_admin(&self) -> bool {
        self.roles.iter().any(|r| r == SUPER_ADMIN_ROLE)
    }

    pub fn is_public(&self) -> bool {
        self.string_id.as_deref() == Some(PUBLIC_USER_STRING_ID)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|s| !s.is_empty());

        match token {
            None => load_public_user(&state.pool, state.settings.default_org_id).await,
            Some(token) => {
                let claims = decode_token(&state.settings, token)?;
                load_user_by_id(&state.pool, claims.uid)
                    .await?
                    .ok_or_else(|| AppError::Unauthorized("could not validate credentials".into()))
            }
        }
    }
}

pub fn issue_token(settings: &Settings, user_id: i64) -> Result<String, AppError> {
    let claims = Claims {
        uid: user_id,
        exp: (Utc::now() + chrono::Duration::minutes(settings.access_token_expire_minutes)).timestamp(),
        jti: uuid::Uuid::new_v4(),
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(settings.app_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("token encoding failed: {}", e)))
}

pub fn decode_token(settings: &Settings, token: &str) -> Result<Claims, AppError> {
    jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(settings.app_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Unauthorized("could not validate credentials".into()))
}

pub fn hash_password(plain: &str) -> Result<String, AppError> {
    bcrypt::hash(plain, bcrypt::DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("password hashing failed: {}", e)))
}

pub fn verify_password(plain: &str, hashed: &str) -> bool {
    bcrypt::verify(plain, hashed).unwrap_or(false)
}

pub async fn load_user_by_id(pool: &PgPool, id: i64) -> Result<Option<CurrentUser>, AppError> {
    let row: Option<(i64, String, Option<String>, Option<String>, Option<i64>)> = sqlx::query_as(
        r#"SELECT id::bigint, username, email, string_id, organization_id::bigint
           FROM "user" WHERE id = $1 AND active = TRUE"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    match row {
        None => Ok(None),
        Some(row) => Ok(Some(hydrate(pool, row).await?)),
    }
}

pub async fn load_public_user(pool: &PgPool, default_org_id: i64) -> Result<CurrentUser, AppError> {
    let row: Option<(i64, String, Option<String>, Option<String>, Option<i64>)> = sqlx::query_as(
        r#"SELECT id::bigint, username, email, string_id, organization_id::bigint
           FROM "user" WHERE string_id = $1 AND organization_id = $2"#,
    )
    .bind(PUBLIC_USER_STRING_ID)
    .bind(default_org_id)
    .fetch_optional(pool)
    .await?;
    let row = row.ok_or_else(|| AppError::Unauthorized("could not validate credentials".into()))?;
    hydrate(pool, row).await
}

async fn hydrate(
    pool: &PgPool,
    (id, username, email, string_id, organization_id): (i64, String, Option<String>, Option<String>, Option<i64>),
) -> Result<CurrentUser, AppError> {
    let (roles, permissions) = load_grants(pool, id).await?;
    Ok(CurrentUser {
        id,
        username,
        email,
        string_id,
        organization_id,
        roles,
        permissions,
    })
}

/// Load the user's direct roles and walk the implied-role closure; returns
/// (role string_ids, parsed permissions).
async fn load_grants(pool: &PgPool, user_id: i64) -> Result<(Vec<String>, Vec<Permission>), AppError> {
    let direct: Vec<(i64,)> = sqlx::query_as(r#"SELECT role_id::bigint FROM user_role WHERE user_id = $1"#)
        .bind(user_id)
        .fetch_all(pool)
        .await?;
    let all_roles: Vec<(i64, Option<String>, Option<String>)> =
        sqlx::query_as(r#"SELECT id::bigint, string_id, permissions FROM role WHERE active = TRUE"#)
            .fetch_all(pool)
            .await?;
    let implied: Vec<(i64, i64)> =
        sqlx::query_as(r#"SELECT role_id::bigint, implied_role_id::bigint FROM implied_role"#)
            .fetch_all(pool)
            .await?;

    let mut implied_by: HashMap<i64, Vec<i64>> = HashMap::new();
    for (role_id, implied_id) in implied {
        implied_by.entry(role_id).or_default().push(implied_id);
    }
    let role_by_id: HashMap<i64, &(i64, Option<String>, Option<String>)> =
        all_roles.iter().map(|r| (r.0, r)).collect();

    let mut visited: HashSet<i64> = HashSet::new();
    let mut queue: Vec<i64> = direct.into_iter().map(|(id,)| id).collect();
    while let Some(role_id) = queue.pop() {
        if !visited.insert(role_id) {
            continue;
        }
        if let Some(children) = implied_by.get(&role_id) {
            queue.extend(children.iter().copied());
        }
    }

    let mut role_string_ids = Vec::new();
    let mut permissions = Vec::new();
    for role_id in &visited {
        let Some((_, string_id, perms)) = role_by_id.get(role_id) else { continue };
        if let Some(sid) = string_id {
            role_string_ids.push(sid.clone());
        }
        if let Some(perms) = perms {
            let parsed: Vec<String> = serde_json::from_str(perms).unwrap_or_default();
            for p in parsed {
                if let Some(p) = Permission::parse(&p) {
                    permissions.push(p);
                } else {
                    tracing::warn!(permission = %p, role_id, "ignoring malformed permission string");
                }
            }
        }
    }
    role_string_ids.sort();
    Ok((role_string_ids, permissions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;

    fn settings() -> Settings {
        Settings {
            database_url: String::new(),
            bind_addr: String::new(),
            app_secret: "test-secret".into(),
            access_token_expire_minutes: 30,
            default_org_id: 1,
            installed_apps: vec![],
            data_dir: "data".into(),
            upload_size_limit: 5 * 1024 * 1024,
        }
    }

    #[test]
    fn token_round_trip() {
        let settings = settings();
        let token = issue_token(&settings, 42).unwrap();
        let claims = decode_token(&settings, &token).unwrap();
        assert_eq!(claims.uid, 42);
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[test]
    fn tampered_token_rejected() {
        let settings = settings();
        let token = issue_token(&settings, 42).unwrap();
        let other = Settings {
            app_secret: "other-secret".into(),
            ..settings
        };
        assert!(decode_token(&other, &token).is_err());
    }

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
    }

    #[test]
    fn super_admin_check_reads_roles() {
        let user = CurrentUser {
            id: 1,
            username: "root".into(),
            email: None,
            string_id: Some("super_user".into()),
            organization_id: Some(1),
            roles: vec![SUPER_ADMIN_ROLE.to_string()],
            permissions: vec![],
        };
        assert!(user.is_super_admin());
        assert!(!user.is_public());
    }
}
