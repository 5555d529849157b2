use chrono::Utc;
use diesel::prelude::*;

use crate::database::provider::Provider;
use crate::database::{get_connection, DbResult, StoreError};
use crate::schema::enum_def::{AuthKind, ProviderKind};
use crate::{db_rows, with_db};

db_rows! {
    #[derive(Queryable, Selectable, Identifiable, Insertable)]
    #[diesel(table_name = model)]
    pub struct Model {
        pub id: String,
        pub provider_id: String,
        pub public_name: String,
        pub upstream_model_name: String,
        pub supports_streaming: bool,
        pub priority: i32,
        pub is_active: bool,
        pub created_at: i64,
    }
}

#[derive(Debug, Clone)]
pub struct NewModel {
    pub provider_id: String,
    pub public_name: String,
    pub upstream_model_name: String,
    pub supports_streaming: bool,
    pub priority: i32,
}

/// One entry of a public model's fallback chain, already joined with the
/// provider that serves it.
#[derive(Debug, Clone)]
pub struct RouteCandidate {
    pub model: Model,
    pub provider: Provider,
}

// How many fallback-chain entries a single request will consider.
const ROUTE_CANDIDATE_LIMIT: i64 = 5;

impl Model {
    pub fn create(data: NewModel) -> DbResult<Model> {
        let row = Model {
            id: uuid::Uuid::new_v4().to_string(),
            provider_id: data.provider_id,
            public_name: data.public_name,
            upstream_model_name: data.upstream_model_name,
            supports_streaming: data.supports_streaming,
            priority: data.priority,
            is_active: true,
            created_at: Utc::now().timestamp_millis(),
        };
        let conn = &mut get_connection()?;
        with_db!(conn => {
            let inserted = diesel::insert_into(model::table)
                .values(ModelRow::from(&row))
                .returning(ModelRow::as_returning())
                .get_result::<ModelRow>(conn)
                .map_err(|e| StoreError::Database(format!("failed to insert model: {}", e)))?;
            Ok(inserted.into())
        })
    }

    /// Lists active models joined with their active provider, for `/v1/models`.
    pub fn list_active_with_provider() -> DbResult<Vec<RouteCandidate>> {
        Self::load_joined(None)
    }

    /// The fallback chain behind one public model name: active models on
    /// active providers, most-preferred (lowest `priority`) first.
    pub fn route_candidates(public_name: &str) -> DbResult<Vec<RouteCandidate>> {
        Self::load_joined(Some(public_name))
    }

    fn load_joined(public_name: Option<&str>) -> DbResult<Vec<RouteCandidate>> {
        let conn = &mut get_connection()?;
        with_db!(conn => {
            let mut query = model::table
                .inner_join(provider::table.on(model::dsl::provider_id.eq(provider::dsl::id)))
                .filter(model::dsl::is_active.eq(true))
                .filter(provider::dsl::is_active.eq(true))
                .into_boxed();

            if let Some(name) = public_name {
                query = query
                    .filter(model::dsl::public_name.eq(name))
                    .limit(ROUTE_CANDIDATE_LIMIT);
            }

            let rows = query
                .order(model::dsl::priority.asc())
                .select((
                    ModelRow::as_select(),
                    provider::dsl::id,
                    provider::dsl::name,
                    provider::dsl::provider_type,
                    provider::dsl::base_url,
                    provider::dsl::auth_type,
                    provider::dsl::encrypted_credentials,
                    provider::dsl::timeout_ms,
                    provider::dsl::is_active,
                    provider::dsl::created_at,
                ))
                .load::<(
                    ModelRow,
                    String,
                    String,
                    ProviderKind,
                    String,
                    AuthKind,
                    Option<String>,
                    i64,
                    bool,
                    i64,
                )>(conn)
                .map_err(|e| {
                    StoreError::Database(format!("failed to load route candidates: {}", e))
                })?;

            Ok(rows
                .into_iter()
                .map(
                    |(
                        model_row,
                        id,
                        name,
                        provider_type,
                        base_url,
                        auth_type,
                        encrypted_credentials,
                        timeout_ms,
                        is_active,
                        created_at,
                    )| RouteCandidate {
                        model: model_row.into(),
                        provider: Provider {
                            id,
                            name,
                            provider_type,
                            base_url,
                            auth_type,
                            encrypted_credentials,
                            timeout_ms,
                            is_active,
                            created_at,
                        },
                    },
                )
                .collect())
        })
    }
}
