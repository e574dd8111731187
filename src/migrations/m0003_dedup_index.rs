use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0003_dedup_index")
        .depends_on(&["0001_ledger"])
        .operation(
            CreateTable::new("content_hashes")
                .add_field(Field::new("text_hash", FieldType::Text).primary_key())
                .add_field(Field::new("url", FieldType::Text).not_null())
                .add_field(Field::new("created_at", FieldType::Text).not_null()),
        )
        .operation(AddIndex::new(
            "content_hashes",
            Index::new("idx_content_hashes_url").column("url"),
        ))
        .operation(
            RunSql::portable()
                .for_backend(
                    "sqlite",
                    r#"CREATE TABLE lsh_buckets (
    bucket TEXT NOT NULL,
    url TEXT NOT NULL,
    PRIMARY KEY (bucket, url)
)"#,
                )
                .for_backend(
                    "postgres",
                    r#"CREATE TABLE lsh_buckets (
    bucket TEXT NOT NULL,
    url TEXT NOT NULL,
    PRIMARY KEY (bucket, url)
)"#,
                ),
        )
        .operation(AddIndex::new(
            "lsh_buckets",
            Index::new("idx_lsh_buckets_url").column("url"),
        ))
}
