use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0001_ledger")
        .operation(
            CreateTable::new("crawl_ledger")
                .add_field(Field::new("url", FieldType::Text).primary_key())
                .add_field(Field::new("source", FieldType::Text).not_null())
                .add_field(Field::new("state", FieldType::Text).not_null().default("'discovered'"))
                .add_field(Field::new("discovered_at", FieldType::Text).not_null())
                .add_field(Field::new("updated_at", FieldType::Text).not_null())
                .add_field(Field::new("text_hash", FieldType::Text))
                .add_field(Field::new("minhash_signature", FieldType::Text))
                .add_field(Field::new("retry_count", FieldType::Integer).not_null().default("0"))
                .add_field(Field::new("last_error", FieldType::Text))
                .add_field(Field::new("metadata", FieldType::Text).not_null().default("'{}'"))
                .add_field(Field::new("claimed_at", FieldType::Text))
                .add_field(Field::new("duplicate_of", FieldType::Text)),
        )
        .operation(AddIndex::new(
            "crawl_ledger",
            Index::new("idx_crawl_ledger_source_state")
                .column("source")
                .column("state"),
        ))
        .operation(AddIndex::new(
            "crawl_ledger",
            Index::new("idx_crawl_ledger_text_hash").column("text_hash"),
        ))
        .operation(AddIndex::new(
            "crawl_ledger",
            Index::new("idx_crawl_ledger_updated_at").column("updated_at"),
        ))
        .operation(
            CreateTable::new("ledger_meta")
                .add_field(Field::new("key", FieldType::Text).primary_key())
                .add_field(Field::new("value", FieldType::Text).not_null()),
        )
}
