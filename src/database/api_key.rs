use chrono::Utc;
use diesel::prelude::*;
use sha2::{Digest, Sha256};

use crate::config::CONFIG;
use crate::database::{get_connection, DbResult, StoreError};
use crate::utils::random_alphanumeric;
use crate::{db_rows, with_db};

const KEY_PREFIX: &str = "sk-gw-";
const KEY_RANDOM_LEN: usize = 48;
const DISPLAY_PREFIX_LEN: usize = 12;

db_rows! {
    #[derive(Queryable, Selectable, Identifiable, Insertable)]
    #[diesel(table_name = api_key)]
    pub struct ApiKey {
        pub id: String,
        pub label: String,
        pub key_hash: String,
        pub key_prefix: String,
        pub rate_limit: i32,
        pub quota_limit: Option<i64>,
        pub is_active: bool,
        pub created_at: i64,
    }
}

/// A freshly generated key. `raw` is shown to the operator exactly once and
/// never persisted.
#[derive(Debug)]
pub struct GeneratedApiKey {
    pub key: ApiKey,
    pub raw: String,
}

pub fn hash_api_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl ApiKey {
    pub fn generate(
        label: &str,
        rate_limit: Option<i32>,
        quota_limit: Option<i64>,
    ) -> DbResult<GeneratedApiKey> {
        let raw = format!("{}{}", KEY_PREFIX, random_alphanumeric(KEY_RANDOM_LEN));
        let row = ApiKey {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.to_string(),
            key_hash: hash_api_key(&raw),
            key_prefix: format!("{}...", &raw[..DISPLAY_PREFIX_LEN]),
            rate_limit: rate_limit.unwrap_or(CONFIG.rate_limit_max_requests),
            quota_limit,
            is_active: true,
            created_at: Utc::now().timestamp_millis(),
        };
        let conn = &mut get_connection()?;
        let key = with_db!(conn => {
            let inserted = diesel::insert_into(api_key::table)
                .values(ApiKeyRow::from(&row))
                .returning(ApiKeyRow::as_returning())
                .get_result::<ApiKeyRow>(conn)
                .map_err(|e| StoreError::Database(format!("failed to insert api key: {}", e)))?;
            Ok::<ApiKey, StoreError>(inserted.into())
        })?;
        Ok(GeneratedApiKey { key, raw })
    }

    pub fn find_by_hash(hash: &str) -> DbResult<Option<ApiKey>> {
        let conn = &mut get_connection()?;
        with_db!(conn => {
            let row = api_key::table
                .filter(api_key::dsl::key_hash.eq(hash))
                .select(ApiKeyRow::as_select())
                .first::<ApiKeyRow>(conn)
                .optional()
                .map_err(|e| StoreError::Database(format!("error fetching api key: {}", e)))?;
            Ok(row.map(ApiKey::from))
        })
    }

    pub fn list() -> DbResult<Vec<ApiKey>> {
        let conn = &mut get_connection()?;
        with_db!(conn => {
            let rows = api_key::table
                .order(api_key::dsl::created_at.desc())
                .select(ApiKeyRow::as_select())
                .load::<ApiKeyRow>(conn)
                .map_err(|e| StoreError::Database(format!("failed to list api keys: {}", e)))?;
            Ok(rows.into_iter().map(ApiKey::from).collect())
        })
    }

    pub fn set_active(key_id: &str, active: bool) -> DbResult<usize> {
        let conn = &mut get_connection()?;
        with_db!(conn => {
            diesel::update(api_key::table.find(key_id))
                .set(api_key::dsl::is_active.eq(active))
                .execute(conn)
                .map_err(|e| {
                    StoreError::Database(format!("failed to update api key {}: {}", key_id, e))
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_sha256_hex() {
        let hash = hash_api_key("sk-gw-test");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, hash_api_key("sk-gw-test"));
        assert_ne!(hash, hash_api_key("sk-gw-testx"));
    }
}
