use std::fs::File;
use std::path::Path;

use diesel::{
    r2d2::{ConnectionManager, Pool, PooledConnection},
    Connection, PgConnection, SqliteConnection,
};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use once_cell::sync::Lazy;
use thiserror::Error;

use crate::config::CONFIG;

pub mod api_key;
pub mod model;
pub mod oauth_account;
pub mod provider;
pub mod usage_log;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("connection pool error: {0}")]
    Pool(String),
}

pub type DbResult<T> = Result<T, StoreError>;

pub enum DbType {
    Postgres,
    Sqlite,
}

pub enum DbPool {
    Postgres(Pool<ConnectionManager<PgConnection>>),
    Sqlite(Pool<ConnectionManager<SqliteConnection>>),
}

pub enum DbConnection {
    Postgres(PooledConnection<ConnectionManager<PgConnection>>),
    Sqlite(PooledConnection<ConnectionManager<SqliteConnection>>),
}

pub fn get_connection() -> DbResult<DbConnection> {
    match &*DB_POOL {
        DbPool::Postgres(pool) => pool
            .get()
            .map(DbConnection::Postgres)
            .map_err(|e| StoreError::Pool(e.to_string())),
        DbPool::Sqlite(pool) => pool
            .get()
            .map(DbConnection::Sqlite)
            .map_err(|e| StoreError::Pool(e.to_string())),
    }
}

fn parse_db_type(db_url: &str) -> DbType {
    if db_url.starts_with("postgres") {
        DbType::Postgres
    } else {
        DbType::Sqlite
    }
}

impl DbPool {
    pub fn establish() -> Self {
        let db_url = &CONFIG.database_url;
        match parse_db_type(db_url) {
            DbType::Postgres => DbPool::Postgres(init_pg_pool(db_url)),
            DbType::Sqlite => DbPool::Sqlite(init_sqlite_pool(db_url)),
        }
    }
}

#[path = "../schema/sqlite.rs"]
pub mod _sqlite_schema;

#[path = "../schema/postgres.rs"]
pub mod _postgres_schema;

/// Declares an API-level row struct together with one diesel twin per
/// backend. The twin (`<Name>Row`) lives in `_pg_rows` / `_lite_rows`,
/// carries the diesel attributes against that backend's schema module, and
/// converts to and from the API struct via `From`.
#[macro_export]
macro_rules! db_rows {
    (
        $(
            $( #[$attr:meta] )*
            pub struct $name:ident {
                $( pub $field:ident : $typ:ty ),+ $(,)?
            }
        )+
    ) => {
        $(
            #[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
            pub struct $name {
                $( pub $field: $typ, )+
            }
        )+

        pub mod _pg_rows {
            $crate::db_rows!(@backend _postgres_schema | $(
                $( #[$attr] )* $name { $( $field: $typ ),+ }
            )+);
        }
        pub mod _lite_rows {
            $crate::db_rows!(@backend _sqlite_schema | $(
                $( #[$attr] )* $name { $( $field: $typ ),+ }
            )+);
        }
    };
    ( @backend $schema:ident | $( $( #[$attr:meta] )* $name:ident { $( $field:ident : $typ:ty ),+ } )+ ) => {
        #[allow(unused_imports)]
        use super::*;
        #[allow(unused_imports)]
        use crate::database::$schema::*;
        #[allow(unused_imports)]
        use diesel::prelude::*;

        paste::paste! {
            $(
                $( #[$attr] )*
                pub struct [<$name Row>] {
                    $( pub $field: $typ, )+
                }

                impl From<[<$name Row>]> for super::$name {
                    fn from(row: [<$name Row>]) -> Self {
                        Self { $( $field: row.$field, )+ }
                    }
                }

                impl From<&super::$name> for [<$name Row>] {
                    fn from(value: &super::$name) -> Self {
                        Self { $( $field: value.$field.clone(), )+ }
                    }
                }
            )+
        }
    };
}

/// Runs one query block against whichever backend the pooled connection
/// belongs to. Inside the block `$conn` is rebound to the inner connection
/// and the matching schema, `*Row` twins, and diesel prelude are in scope.
#[macro_export]
macro_rules! with_db {
    ($conn:ident => $body:block) => {
        match $conn {
            crate::database::DbConnection::Postgres($conn) => {
                #[allow(unused_imports)]
                use crate::database::_postgres_schema::*;
                #[allow(unused_imports)]
                use self::_pg_rows::*;
                #[allow(unused_imports)]
                use diesel::prelude::*;

                $body
            }
            crate::database::DbConnection::Sqlite($conn) => {
                #[allow(unused_imports)]
                use crate::database::_sqlite_schema::*;
                #[allow(unused_imports)]
                use self::_lite_rows::*;
                #[allow(unused_imports)]
                use diesel::prelude::*;

                $body
            }
        }
    };
}

static DB_POOL: Lazy<DbPool> = Lazy::new(DbPool::establish);
const SQLITE_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/sqlite");
const POSTGRES_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/postgres");

fn init_sqlite_pool(db_url: &str) -> Pool<ConnectionManager<SqliteConnection>> {
    let db_path = Path::new(db_url);
    if !db_path.exists() {
        if let Some(parent_dir) = db_path.parent() {
            if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
                std::fs::create_dir_all(parent_dir).expect("failed to create database directory");
            }
        }
        File::create(db_path).expect("failed to create database file");
    }

    let mut connection =
        SqliteConnection::establish(db_url).expect("failed to establish migration connection");
    connection
        .run_pending_migrations(SQLITE_MIGRATIONS)
        .expect("failed to run migrations");

    let manager = ConnectionManager::<SqliteConnection>::new(db_url);
    Pool::builder()
        .test_on_check_out(true)
        .max_size(5)
        .build(manager)
        .expect("failed to create connection pool")
}

fn init_pg_pool(db_url: &str) -> Pool<ConnectionManager<PgConnection>> {
    let mut connection =
        PgConnection::establish(db_url).expect("failed to establish migration connection");
    connection
        .run_pending_migrations(POSTGRES_MIGRATIONS)
        .expect("failed to run migrations");

    let manager = ConnectionManager::<PgConnection>::new(db_url);
    Pool::builder()
        .max_size(5)
        .build(manager)
        .expect("failed to create connection pool")
}
