use crate::error::{QuarryError, Result};
use crate::types::{CATEGORY_FIELD, NODE_ID_FIELD, TIMESTAMP_FIELD};
use tantivy::schema::{
    Field, IndexRecordOption, JsonObjectOptions, NumericOptions, Schema as TantivySchema,
    TextFieldIndexing, FAST, STORED, STRING,
};

/// Tokenized user fields (policy `Analyzed`).
pub const ANALYZED_FIELD: &str = "__Analyzed";
/// Single-term user fields, numbers, flattened dates and sort shadows.
pub const EXACT_FIELD: &str = "__Exact";
/// Stored-only user fields (policy `No`).
pub const STORED_FIELD: &str = "__Stored";

/// Simple tokenizer with lower-casing, registered on every opened index.
pub const TEXT_TOKENIZER: &str = "quarry_text";

/// Fixed schema: three reserved fields plus one JSON object per indexing mode.
pub fn build_schema() -> TantivySchema {
    let mut builder = TantivySchema::builder();

    builder.add_text_field(NODE_ID_FIELD, STRING | STORED | FAST);
    builder.add_text_field(CATEGORY_FIELD, STRING | STORED);

    let ts_opts = NumericOptions::default()
        .set_indexed()
        .set_fast()
        .set_stored();
    builder.add_i64_field(TIMESTAMP_FIELD, ts_opts);

    let analyzed_indexing = TextFieldIndexing::default()
        .set_tokenizer(TEXT_TOKENIZER)
        .set_index_option(IndexRecordOption::WithFreqsAndPositions);
    let analyzed_opts = JsonObjectOptions::default()
        .set_stored()
        .set_indexing_options(analyzed_indexing);
    builder.add_json_field(ANALYZED_FIELD, analyzed_opts);

    let exact_indexing = TextFieldIndexing::default()
        .set_tokenizer("raw")
        .set_index_option(IndexRecordOption::WithFreqsAndPositions);
    let exact_opts = JsonObjectOptions::default()
        .set_stored()
        .set_indexing_options(exact_indexing)
        .set_fast(None);
    builder.add_json_field(EXACT_FIELD, exact_opts);

    builder.add_json_field(STORED_FIELD, JsonObjectOptions::default().set_stored());

    builder.build()
}

/// Resolved field handles for the fixed schema.
#[derive(Debug, Clone, Copy)]
pub struct IndexFields {
    pub node_id: Field,
    pub category: Field,
    pub timestamp: Field,
    pub analyzed: Field,
    pub exact: Field,
    pub stored: Field,
}

impl IndexFields {
    pub fn resolve(schema: &TantivySchema) -> Result<Self> {
        let get = |name: &str| {
            schema.get_field(name).map_err(|_| {
                QuarryError::Tantivy(format!("index schema is missing field '{}'", name))
            })
        };
        Ok(IndexFields {
            node_id: get(NODE_ID_FIELD)?,
            category: get(CATEGORY_FIELD)?,
            timestamp: get(TIMESTAMP_FIELD)?,
            analyzed: get(ANALYZED_FIELD)?,
            exact: get(EXACT_FIELD)?,
            stored: get(STORED_FIELD)?,
        })
    }

    /// The JSON objects that hold user fields, in lookup order.
    pub fn user_objects(&self) -> [Field; 3] {
        [self.analyzed, self.exact, self.stored]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_resolves_all_fields() {
        let schema = build_schema();
        let fields = IndexFields::resolve(&schema).unwrap();
        assert_eq!(schema.get_field_name(fields.node_id), NODE_ID_FIELD);
        assert_eq!(schema.get_field_name(fields.timestamp), TIMESTAMP_FIELD);
        assert_eq!(schema.get_field_name(fields.stored), STORED_FIELD);
    }

    #[test]
    fn reserved_fields_are_stored() {
        let schema = build_schema();
        for name in [NODE_ID_FIELD, CATEGORY_FIELD, TIMESTAMP_FIELD, EXACT_FIELD] {
            let field = schema.get_field(name).unwrap();
            assert!(schema.get_field_entry(field).is_stored(), "{} not stored", name);
        }
    }

    #[test]
    fn foreign_schema_fails_to_resolve() {
        let mut builder = TantivySchema::builder();
        builder.add_text_field("_id", STRING | STORED);
        let schema = builder.build();
        assert!(IndexFields::resolve(&schema).is_err());
    }
}
