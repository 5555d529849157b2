diesel::table! {
    use crate::schema::enum_def::{AuthKindMapping, ProviderKindMapping};
    use diesel::sql_types::{BigInt, Bool, Nullable, Text};

    provider (id) {
        id -> Text,
        name -> Text,
        provider_type -> ProviderKindMapping,
        base_url -> Text,
        auth_type -> AuthKindMapping,
        encrypted_credentials -> Nullable<Text>,
        timeout_ms -> BigInt,
        is_active -> Bool,
        created_at -> BigInt,
    }
}

diesel::table! {
    model (id) {
        id -> Text,
        provider_id -> Text,
        public_name -> Text,
        upstream_model_name -> Text,
        supports_streaming -> Bool,
        priority -> Integer,
        is_active -> Bool,
        created_at -> BigInt,
    }
}

diesel::table! {
    api_key (id) {
        id -> Text,
        label -> Text,
        key_hash -> Text,
        key_prefix -> Text,
        rate_limit -> Integer,
        quota_limit -> Nullable<BigInt>,
        is_active -> Bool,
        created_at -> BigInt,
    }
}

diesel::table! {
    oauth_account (id) {
        id -> Text,
        provider_id -> Text,
        encrypted_access_token -> Text,
        encrypted_refresh_token -> Nullable<Text>,
        expires_at -> BigInt,
        email -> Nullable<Text>,
        health_score -> Integer,
        last_used_at -> Nullable<BigInt>,
        is_active -> Bool,
        created_at -> BigInt,
    }
}

diesel::table! {
    usage_log (id) {
        id -> Text,
        api_key_id -> Nullable<Text>,
        provider_id -> Nullable<Text>,
        model_id -> Nullable<Text>,
        model_name -> Text,
        input_tokens -> Integer,
        output_tokens -> Integer,
        latency_ms -> BigInt,
        status_code -> Integer,
        cost -> BigInt,
        created_at -> BigInt,
    }
}

diesel::joinable!(model -> provider (provider_id));
diesel::joinable!(oauth_account -> provider (provider_id));
diesel::joinable!(usage_log -> api_key (api_key_id));
diesel::joinable!(usage_log -> model (model_id));
diesel::joinable!(usage_log -> provider (provider_id));

diesel::allow_tables_to_appear_in_same_query!(provider, model, api_key, oauth_account, usage_log,);
