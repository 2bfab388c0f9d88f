use crate::config::{FieldIndexPolicy, IndexerConfig};
use crate::error::{QuarryError, Result};
use crate::events::{IndexEvents, IndexingError};
use crate::index::schema::IndexFields;
use crate::types::{
    is_special_field, DateResolution, FieldDataType, IndexItem, ItemField, CATEGORY_FIELD,
    NODE_ID_FIELD, SORT_FIELD_PREFIX,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tantivy::schema::{Field, OwnedValue};
use tantivy::TantivyDocument;

/// Which JSON object of the schema a native field lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeTarget {
    Analyzed,
    Exact,
    Stored,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Text(String),
    I64(i64),
    F64(f64),
}

impl From<NativeValue> for OwnedValue {
    fn from(v: NativeValue) -> Self {
        match v {
            NativeValue::Text(s) => OwnedValue::Str(s),
            NativeValue::I64(i) => OwnedValue::I64(i),
            NativeValue::F64(f) => OwnedValue::F64(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeField {
    pub name: String,
    pub target: NativeTarget,
    pub value: NativeValue,
}

/// Translate one item field into its native representation.
///
/// Text follows `policy`; numbers and dates always become single terms in the
/// exact object unless the policy is `No`, in which case the parsed value is
/// only stored.
pub fn build_native_field(
    name: &str,
    field: &ItemField,
    policy: FieldIndexPolicy,
) -> Result<NativeField> {
    let raw = field.value.trim();
    let parse_err = || QuarryError::FieldParse {
        value: field.value.clone(),
        data_type: field.data_type.to_string(),
    };

    let value = match field.data_type {
        FieldDataType::Text => NativeValue::Text(field.value.clone()),
        FieldDataType::Number | FieldDataType::Int => {
            NativeValue::I64(raw.parse::<i32>().map_err(|_| parse_err())? as i64)
        }
        FieldDataType::Long => NativeValue::I64(raw.parse::<i64>().map_err(|_| parse_err())?),
        FieldDataType::Float => {
            let v = raw.parse::<f64>().map_err(|_| parse_err())?;
            if !v.is_finite() || v.abs() > f32::MAX as f64 {
                return Err(parse_err());
            }
            NativeValue::F64(v)
        }
        FieldDataType::Double => {
            let v = raw.parse::<f64>().map_err(|_| parse_err())?;
            if !v.is_finite() {
                return Err(parse_err());
            }
            NativeValue::F64(v)
        }
        FieldDataType::Date(resolution) => {
            let date = parse_date(raw).ok_or_else(parse_err)?;
            NativeValue::I64(flatten_date(&date, resolution))
        }
    };

    let target = match (policy, &value) {
        (FieldIndexPolicy::No, _) => NativeTarget::Stored,
        (FieldIndexPolicy::Analyzed, NativeValue::Text(_)) => NativeTarget::Analyzed,
        _ => NativeTarget::Exact,
    };

    Ok(NativeField {
        name: name.to_string(),
        target,
        value,
    })
}

/// Accepts RFC 3339, `YYYY-MM-DD[ T]HH:MM:SS[.fff]` and `YYYY-MM-DD`.
pub fn parse_date(value: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// `yyyyMMddHHmmssSSS` truncated to `resolution`, as an integer.
///
/// Truncating the digit string keeps lexical and numeric order identical, so
/// range queries on the integer are exact at that resolution.
pub fn flatten_date(date: &NaiveDateTime, resolution: DateResolution) -> i64 {
    let full = date.format("%Y%m%d%H%M%S%3f").to_string();
    let digits = resolution.digits().min(full.len());
    full[..digits].parse::<i64>().unwrap_or(0)
}

static LAST_TICKS: AtomicI64 = AtomicI64::new(0);

/// 100ns ticks since the Unix epoch, strictly increasing within the process.
pub fn next_timestamp_ticks() -> i64 {
    let now = Utc::now()
        .timestamp_nanos_opt()
        .map(|n| n / 100)
        .unwrap_or_else(|| Utc::now().timestamp_micros() * 10);
    let mut last = LAST_TICKS.load(Ordering::Relaxed);
    loop {
        let next = if now > last { now } else { last + 1 };
        match LAST_TICKS.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

/// Builds tantivy documents from index items.
pub struct DocumentBuilder<'a> {
    fields: &'a IndexFields,
    config: &'a IndexerConfig,
}

impl<'a> DocumentBuilder<'a> {
    pub fn new(fields: &'a IndexFields, config: &'a IndexerConfig) -> Self {
        DocumentBuilder { fields, config }
    }

    /// Every valid user field plus the reserved id, category and timestamp.
    ///
    /// Fields that fail to parse are reported through `events` and left out;
    /// the rest of the document is still built.
    pub fn build(&self, item: &IndexItem, events: &dyn IndexEvents) -> TantivyDocument {
        let mut analyzed = BTreeMap::new();
        let mut exact = BTreeMap::new();
        let mut stored = BTreeMap::new();

        for (name, field) in &item.fields {
            if is_special_field(name) || field.is_blank() {
                continue;
            }
            if !IndexerConfig::is_valid_field_name(name) {
                events.indexing_error(
                    &IndexingError::new(format!("Invalid field name: {}", name))
                        .for_item(&item.id),
                );
                continue;
            }

            match build_native_field(name, field, self.config.policy_for(name)) {
                Ok(native) => {
                    let target = match native.target {
                        NativeTarget::Analyzed => &mut analyzed,
                        NativeTarget::Exact => &mut exact,
                        NativeTarget::Stored => &mut stored,
                    };
                    target.insert(native.name, OwnedValue::from(native.value));

                    if field.sortable {
                        exact.insert(
                            format!("{}{}", SORT_FIELD_PREFIX, name),
                            OwnedValue::Str(field.value.clone()),
                        );
                    }
                }
                Err(e) => {
                    tracing::debug!("[DOC {}] skipping field {}: {}", item.id, name, e);
                    events.indexing_error(&IndexingError::new(e.to_string()).for_item(&item.id));
                }
            }
        }

        let mut doc = TantivyDocument::new();
        doc.add_text(self.fields.node_id, item.id.to_lowercase());
        doc.add_text(self.fields.category, item.category.to_lowercase());
        doc.add_i64(self.fields.timestamp, next_timestamp_ticks());

        for (field, values) in [
            (self.fields.analyzed, analyzed),
            (self.fields.exact, exact),
            (self.fields.stored, stored),
        ] {
            if !values.is_empty() {
                doc.add_object(field, values);
            }
        }
        doc
    }
}

fn owned_to_string(value: OwnedValue) -> Option<String> {
    match value {
        OwnedValue::Str(s) => Some(s),
        OwnedValue::I64(i) => Some(i.to_string()),
        OwnedValue::U64(u) => Some(u.to_string()),
        OwnedValue::F64(f) => Some(f.to_string()),
        OwnedValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn first_string(doc: &TantivyDocument, field: Field) -> Option<String> {
    doc.get_first(field).and_then(|v| {
        let owned: OwnedValue = v.into();
        owned_to_string(owned)
    })
}

/// Stored write timestamp of a document, if present and numeric.
pub fn stored_timestamp(doc: &TantivyDocument, fields: &IndexFields) -> Option<i64> {
    doc.get_first(fields.timestamp).and_then(|v| {
        let owned: OwnedValue = v.into();
        match owned {
            OwnedValue::I64(i) => Some(i),
            OwnedValue::U64(u) => i64::try_from(u).ok(),
            OwnedValue::Str(s) => s.parse().ok(),
            _ => None,
        }
    })
}

/// Stored fields of a document as strings.
///
/// The reserved id and category come first under their reserved names; sort
/// shadows are hidden. Sort values are returned separately.
pub fn stored_fields(
    doc: &TantivyDocument,
    fields: &IndexFields,
) -> (IndexMap<String, String>, IndexMap<String, String>) {
    let mut values = IndexMap::new();
    let mut sort_values = IndexMap::new();

    if let Some(id) = first_string(doc, fields.node_id) {
        values.insert(NODE_ID_FIELD.to_string(), id);
    }
    if let Some(category) = first_string(doc, fields.category) {
        values.insert(CATEGORY_FIELD.to_string(), category);
    }

    for object_field in fields.user_objects() {
        let Some(value) = doc.get_first(object_field) else {
            continue;
        };
        let owned: OwnedValue = value.into();
        if let OwnedValue::Object(pairs) = owned {
            for (key, val) in pairs {
                let Some(text) = owned_to_string(val) else {
                    continue;
                };
                if let Some(sort_name) = key.strip_prefix(SORT_FIELD_PREFIX) {
                    sort_values.insert(sort_name.to_string(), text);
                } else if !is_special_field(&key) {
                    values.insert(key, text);
                }
            }
        }
    }
    (values, sort_values)
}
