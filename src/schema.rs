// Kept in sync by hand with `src/migrations`.
// Timestamps are RFC 3339 UTC text on both backends.

diesel::table! {
    crawl_ledger (url) {
        url -> Text,
        source -> Text,
        state -> Text,
        discovered_at -> Text,
        updated_at -> Text,
        text_hash -> Nullable<Text>,
        minhash_signature -> Nullable<Text>,
        retry_count -> Integer,
        last_error -> Nullable<Text>,
        metadata -> Text,
        claimed_at -> Nullable<Text>,
        duplicate_of -> Nullable<Text>,
    }
}

diesel::table! {
    locks (source) {
        source -> Text,
        owner_id -> Text,
        acquired_at -> Text,
        expires_at -> Text,
    }
}

diesel::table! {
    daily_quotas (quota_date, source) {
        quota_date -> Text,
        source -> Text,
        records_ingested -> BigInt,
        quota_limit -> BigInt,
    }
}

diesel::table! {
    pipeline_runs (run_id) {
        run_id -> Text,
        source -> Text,
        status -> Text,
        start_time -> Text,
        end_time -> Nullable<Text>,
        records_processed -> BigInt,
        records_written -> BigInt,
        error_summary -> Nullable<Text>,
    }
}

diesel::table! {
    content_hashes (text_hash) {
        text_hash -> Text,
        url -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    lsh_buckets (bucket, url) {
        bucket -> Text,
        url -> Text,
    }
}

diesel::table! {
    ledger_meta (key) {
        key -> Text,
        value -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    crawl_ledger,
    locks,
    daily_quotas,
    pipeline_runs,
    content_hashes,
    lsh_buckets,
    ledger_meta,
);
