use chrono::Utc;
use diesel::prelude::*;

use crate::database::{get_connection, DbResult, StoreError};
use crate::schema::enum_def::{AuthKind, ProviderKind};
use crate::{db_rows, with_db};

db_rows! {
    #[derive(Queryable, Selectable, Identifiable, Insertable, AsChangeset)]
    #[diesel(table_name = provider)]
    pub struct Provider {
        pub id: String,
        pub name: String,
        pub provider_type: ProviderKind,
        pub base_url: String,
        pub auth_type: AuthKind,
        pub encrypted_credentials: Option<String>,
        pub timeout_ms: i64,
        pub is_active: bool,
        pub created_at: i64,
    }
}

/// Caller-supplied fields for a new provider row.
#[derive(Debug, Clone)]
pub struct NewProvider {
    pub name: String,
    pub provider_type: ProviderKind,
    pub base_url: String,
    pub auth_type: AuthKind,
    pub encrypted_credentials: Option<String>,
    pub timeout_ms: Option<i64>,
}

pub const DEFAULT_TIMEOUT_MS: i64 = 30_000;

impl Provider {
    pub fn create(data: NewProvider) -> DbResult<Provider> {
        let row = Provider {
            id: uuid::Uuid::new_v4().to_string(),
            name: data.name,
            provider_type: data.provider_type,
            base_url: data.base_url,
            auth_type: data.auth_type,
            encrypted_credentials: data.encrypted_credentials,
            timeout_ms: data.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
            is_active: true,
            created_at: Utc::now().timestamp_millis(),
        };
        let conn = &mut get_connection()?;
        with_db!(conn => {
            let inserted = diesel::insert_into(provider::table)
                .values(ProviderRow::from(&row))
                .returning(ProviderRow::as_returning())
                .get_result::<ProviderRow>(conn)
                .map_err(|e| StoreError::Database(format!("failed to insert provider: {}", e)))?;
            Ok(inserted.into())
        })
    }

    pub fn get_by_id(provider_id: &str) -> DbResult<Provider> {
        let conn = &mut get_connection()?;
        with_db!(conn => {
            let row = provider::table
                .find(provider_id)
                .select(ProviderRow::as_select())
                .first::<ProviderRow>(conn)
                .map_err(|e| match e {
                    diesel::result::Error::NotFound => {
                        StoreError::NotFound(format!("provider {}", provider_id))
                    }
                    _ => StoreError::Database(format!(
                        "error fetching provider {}: {}",
                        provider_id, e
                    )),
                })?;
            Ok(row.into())
        })
    }

    pub fn list_active() -> DbResult<Vec<Provider>> {
        let conn = &mut get_connection()?;
        with_db!(conn => {
            let rows = provider::table
                .filter(provider::dsl::is_active.eq(true))
                .order(provider::dsl::created_at.desc())
                .select(ProviderRow::as_select())
                .load::<ProviderRow>(conn)
                .map_err(|e| StoreError::Database(format!("failed to list providers: {}", e)))?;
            Ok(rows.into_iter().map(Provider::from).collect())
        })
    }
}
