use chrono::Utc;
use diesel::prelude::*;

use crate::database::{get_connection, DbResult, StoreError};
use crate::{db_rows, with_db};

db_rows! {
    #[derive(Queryable, Selectable, Identifiable, Insertable)]
    #[diesel(table_name = usage_log)]
    pub struct UsageLog {
        pub id: String,
        pub api_key_id: Option<String>,
        pub provider_id: Option<String>,
        pub model_id: Option<String>,
        pub model_name: String,
        pub input_tokens: i32,
        pub output_tokens: i32,
        pub latency_ms: i64,
        pub status_code: i32,
        pub cost: i64,
        pub created_at: i64,
    }
}

/// Per-request accounting record handed to the log worker.
#[derive(Debug, Clone, Default)]
pub struct NewUsageLog {
    pub api_key_id: Option<String>,
    pub provider_id: Option<String>,
    pub model_id: Option<String>,
    pub model_name: String,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub latency_ms: i64,
    pub status_code: i32,
}

impl UsageLog {
    pub fn insert(data: NewUsageLog) -> DbResult<UsageLog> {
        let row = UsageLog {
            id: uuid::Uuid::new_v4().to_string(),
            api_key_id: data.api_key_id,
            provider_id: data.provider_id,
            model_id: data.model_id,
            model_name: data.model_name,
            input_tokens: data.input_tokens,
            output_tokens: data.output_tokens,
            latency_ms: data.latency_ms,
            status_code: data.status_code,
            // Pricing is out of scope; the column is populated externally.
            cost: 0,
            created_at: Utc::now().timestamp_millis(),
        };
        let conn = &mut get_connection()?;
        with_db!(conn => {
            let inserted = diesel::insert_into(usage_log::table)
                .values(UsageLogRow::from(&row))
                .returning(UsageLogRow::as_returning())
                .get_result::<UsageLogRow>(conn)
                .map_err(|e| StoreError::Database(format!("failed to insert usage log: {}", e)))?;
            Ok(inserted.into())
        })
    }
}
