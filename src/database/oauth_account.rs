use chrono::Utc;
use diesel::prelude::*;

use crate::database::{get_connection, DbResult, StoreError};
use crate::{db_rows, with_db};

pub const INITIAL_HEALTH_SCORE: i32 = 70;

db_rows! {
    #[derive(Queryable, Selectable, Identifiable, Insertable)]
    #[diesel(table_name = oauth_account)]
    pub struct OAuthAccount {
        pub id: String,
        pub provider_id: String,
        pub encrypted_access_token: String,
        pub encrypted_refresh_token: Option<String>,
        pub expires_at: i64,
        pub email: Option<String>,
        pub health_score: i32,
        pub last_used_at: Option<i64>,
        pub is_active: bool,
        pub created_at: i64,
    }
}

#[derive(Debug, Clone)]
pub struct NewOAuthAccount {
    pub provider_id: String,
    pub encrypted_access_token: String,
    pub encrypted_refresh_token: Option<String>,
    pub expires_at: i64,
    pub email: Option<String>,
}

impl OAuthAccount {
    pub fn create(data: NewOAuthAccount) -> DbResult<OAuthAccount> {
        let row = OAuthAccount {
            id: uuid::Uuid::new_v4().to_string(),
            provider_id: data.provider_id,
            encrypted_access_token: data.encrypted_access_token,
            encrypted_refresh_token: data.encrypted_refresh_token,
            expires_at: data.expires_at,
            email: data.email,
            health_score: INITIAL_HEALTH_SCORE,
            last_used_at: None,
            is_active: true,
            created_at: Utc::now().timestamp_millis(),
        };
        let conn = &mut get_connection()?;
        with_db!(conn => {
            let inserted = diesel::insert_into(oauth_account::table)
                .values(OAuthAccountRow::from(&row))
                .returning(OAuthAccountRow::as_returning())
                .get_result::<OAuthAccountRow>(conn)
                .map_err(|e| {
                    StoreError::Database(format!("failed to insert oauth account: {}", e))
                })?;
            Ok(inserted.into())
        })
    }

    /// Active accounts for a provider, least-recently-used first. Accounts
    /// that have never been used sort before all used ones.
    pub fn list_active_by_provider(provider_id: &str) -> DbResult<Vec<OAuthAccount>> {
        let conn = &mut get_connection()?;
        let mut accounts: Vec<OAuthAccount> = with_db!(conn => {
            let rows = oauth_account::table
                .filter(
                    oauth_account::dsl::provider_id
                        .eq(provider_id)
                        .and(oauth_account::dsl::is_active.eq(true)),
                )
                .select(OAuthAccountRow::as_select())
                .load::<OAuthAccountRow>(conn)
                .map_err(|e| {
                    StoreError::Database(format!(
                        "failed to list oauth accounts for provider {}: {}",
                        provider_id, e
                    ))
                })?;
            Ok::<_, StoreError>(rows.into_iter().map(OAuthAccount::from).collect())
        })?;
        accounts.sort_by_key(|a| a.last_used_at.unwrap_or(0));
        Ok(accounts)
    }

    /// Persists a refreshed token triple. `encrypted_refresh_token` is only
    /// replaced when the refresh endpoint issued a new one.
    pub fn update_tokens(
        account_id: &str,
        encrypted_access_token: &str,
        encrypted_refresh_token: Option<&str>,
        expires_at: i64,
    ) -> DbResult<OAuthAccount> {
        let conn = &mut get_connection()?;
        with_db!(conn => {
            let target = oauth_account::table.find(account_id);
            let result = match encrypted_refresh_token {
                Some(refresh) => diesel::update(target)
                    .set((
                        oauth_account::dsl::encrypted_access_token.eq(encrypted_access_token),
                        oauth_account::dsl::encrypted_refresh_token.eq(refresh),
                        oauth_account::dsl::expires_at.eq(expires_at),
                    ))
                    .returning(OAuthAccountRow::as_returning())
                    .get_result::<OAuthAccountRow>(conn),
                None => diesel::update(target)
                    .set((
                        oauth_account::dsl::encrypted_access_token.eq(encrypted_access_token),
                        oauth_account::dsl::expires_at.eq(expires_at),
                    ))
                    .returning(OAuthAccountRow::as_returning())
                    .get_result::<OAuthAccountRow>(conn),
            };
            result
                .map(OAuthAccount::from)
                .map_err(|e| match e {
                    diesel::result::Error::NotFound => {
                        StoreError::NotFound(format!("oauth account {}", account_id))
                    }
                    _ => StoreError::Database(format!(
                        "failed to update tokens for oauth account {}: {}",
                        account_id, e
                    )),
                })
        })
    }

    /// Best-effort selection marker; callers fire-and-forget this update.
    pub fn touch_last_used(account_id: &str, used_at: i64) -> DbResult<usize> {
        let conn = &mut get_connection()?;
        with_db!(conn => {
            diesel::update(oauth_account::table.find(account_id))
                .set(oauth_account::dsl::last_used_at.eq(used_at))
                .execute(conn)
                .map_err(|e| {
                    StoreError::Database(format!(
                        "failed to touch oauth account {}: {}",
                        account_id, e
                    ))
                })
        })
    }
}
