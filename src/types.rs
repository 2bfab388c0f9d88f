use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix shared by every field the indexer injects on its own.
pub const SPECIAL_FIELD_PREFIX: &str = "__";
pub const NODE_ID_FIELD: &str = "__NodeId";
pub const CATEGORY_FIELD: &str = "__IndexCategory";
pub const TIMESTAMP_FIELD: &str = "__TimeStamp";
pub const SORT_FIELD_PREFIX: &str = "__Sort_";

/// Item identifier, stable per logical document.
pub type ItemId = String;

/// Granularity a date value is flattened to before indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DateResolution {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Millisecond,
}

impl DateResolution {
    /// Number of leading digits of `yyyyMMddHHmmssSSS` kept at this resolution.
    pub fn digits(self) -> usize {
        match self {
            DateResolution::Year => 4,
            DateResolution::Month => 6,
            DateResolution::Day => 8,
            DateResolution::Hour => 10,
            DateResolution::Minute => 12,
            DateResolution::Second => 14,
            DateResolution::Millisecond => 17,
        }
    }
}

/// Declared type of an item field's string payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldDataType {
    #[default]
    Text,
    Number,
    Int,
    Float,
    Double,
    Long,
    Date(DateResolution),
}

impl FieldDataType {
    pub fn name(&self) -> &'static str {
        match self {
            FieldDataType::Text => "String",
            FieldDataType::Number => "Number",
            FieldDataType::Int => "Int",
            FieldDataType::Float => "Float",
            FieldDataType::Double => "Double",
            FieldDataType::Long => "Long",
            FieldDataType::Date(DateResolution::Year) => "DateYear",
            FieldDataType::Date(DateResolution::Month) => "DateMonth",
            FieldDataType::Date(DateResolution::Day) => "DateDay",
            FieldDataType::Date(DateResolution::Hour) => "DateHour",
            FieldDataType::Date(DateResolution::Minute) => "DateMinute",
            FieldDataType::Date(DateResolution::Second) => "DateSecond",
            FieldDataType::Date(DateResolution::Millisecond) => "DateTime",
        }
    }
}

impl fmt::Display for FieldDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FieldDataType {
    type Err = crate::error::QuarryError;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        let parsed = match s.to_ascii_lowercase().as_str() {
            "string" | "text" => FieldDataType::Text,
            "number" => FieldDataType::Number,
            "int" => FieldDataType::Int,
            "float" => FieldDataType::Float,
            "double" => FieldDataType::Double,
            "long" => FieldDataType::Long,
            "dateyear" => FieldDataType::Date(DateResolution::Year),
            "datemonth" => FieldDataType::Date(DateResolution::Month),
            "dateday" => FieldDataType::Date(DateResolution::Day),
            "datehour" => FieldDataType::Date(DateResolution::Hour),
            "dateminute" => FieldDataType::Date(DateResolution::Minute),
            "datesecond" => FieldDataType::Date(DateResolution::Second),
            "datetime" | "datemillisecond" => FieldDataType::Date(DateResolution::Millisecond),
            other => {
                return Err(crate::error::QuarryError::Config(format!(
                    "Unknown field data type: {}",
                    other
                )))
            }
        };
        Ok(parsed)
    }
}

impl TryFrom<String> for FieldDataType {
    type Error = crate::error::QuarryError;

    fn try_from(s: String) -> crate::error::Result<Self> {
        s.parse()
    }
}

impl From<FieldDataType> for String {
    fn from(t: FieldDataType) -> Self {
        t.name().to_string()
    }
}

/// A single field value handed to the indexer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemField {
    pub value: String,
    #[serde(default)]
    pub data_type: FieldDataType,
    #[serde(default)]
    pub sortable: bool,
}

impl ItemField {
    pub fn text(value: impl Into<String>) -> Self {
        ItemField {
            value: value.into(),
            data_type: FieldDataType::Text,
            sortable: false,
        }
    }

    pub fn typed(value: impl Into<String>, data_type: FieldDataType) -> Self {
        ItemField {
            value: value.into(),
            data_type,
            sortable: false,
        }
    }

    pub fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }

    pub fn is_blank(&self) -> bool {
        self.value.trim().is_empty()
    }
}

/// A logical document: id, category tag and named fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexItem {
    pub id: ItemId,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub fields: IndexMap<String, ItemField>,
}

impl IndexItem {
    pub fn new(id: impl Into<String>, category: impl Into<String>) -> Self {
        IndexItem {
            id: id.into(),
            category: category.into(),
            fields: IndexMap::new(),
        }
    }

    /// Builder-style insert of a field.
    pub fn with_field(mut self, name: impl Into<String>, field: ItemField) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    pub fn with_text(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_field(name, ItemField::text(value))
    }

    /// Drop fields whose value is empty or whitespace.
    pub fn strip_blank_fields(&mut self) {
        self.fields.retain(|_, f| !f.is_blank());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    Add,
    Delete,
}

/// An add or delete request for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexOperation {
    pub item: IndexItem,
    pub kind: OperationKind,
}

impl IndexOperation {
    pub fn add(item: IndexItem) -> crate::error::Result<Self> {
        if item.id.trim().is_empty() {
            return Err(crate::error::QuarryError::InvalidItem(
                "item id must not be empty".to_string(),
            ));
        }
        Ok(IndexOperation {
            item,
            kind: OperationKind::Add,
        })
    }

    /// A delete carries a single field: the reserved id field.
    pub fn delete(id: impl Into<String>) -> Self {
        let id = id.into();
        let mut item = IndexItem::new(id.clone(), "");
        item.fields
            .insert(NODE_ID_FIELD.to_string(), ItemField::text(id));
        IndexOperation {
            item,
            kind: OperationKind::Delete,
        }
    }

    pub fn id(&self) -> &str {
        &self.item.id
    }
}

pub fn is_special_field(name: &str) -> bool {
    name.starts_with(SPECIAL_FIELD_PREFIX)
}
