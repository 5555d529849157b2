use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, DbEnum, Default)]
#[PgType = "provider_kind_enum"]
#[DbValueStyle = "SCREAMING_SNAKE_CASE"]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Openai,
    Google,
    Anthropic,
    Oauth,
    Custom,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, DbEnum, Default)]
#[PgType = "auth_kind_enum"]
#[DbValueStyle = "SCREAMING_SNAKE_CASE"]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    #[default]
    Bearer,
    Header,
    Oauth,
    None,
}
