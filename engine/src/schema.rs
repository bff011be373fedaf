//! Field definitions for both stores.
//!
//! Store A describes its custom fields with a storage type and an input
//! widget; Store B describes fields as members of field groups attached to
//! content types. Both are configuration and read-only to the engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Identifier of a Store A custom field.
pub type CustomFieldId = u64;

/// Prefix Store A uses for custom field API codes.
pub const CUSTOM_FIELD_PREFIX: &str = "custom_";

/// Storage type of a CRM field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrmDataType {
    String,
    Int,
    Float,
    Money,
    Memo,
    Date,
    Boolean,
    ContactReference,
    File,
    Link,
    Country,
    StateProvince,
}

impl fmt::Display for CrmDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Input widget of a CRM custom field. Multi-valued widgets store their
/// values as one separator-delimited string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HtmlType {
    #[default]
    Text,
    TextArea,
    RichTextEditor,
    Select,
    Radio,
    CheckBox,
    #[serde(rename = "Multi-Select")]
    MultiSelect,
    #[serde(rename = "Select Date")]
    SelectDate,
    File,
    Autocomplete,
    Link,
}

/// One selectable option of a CRM option list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionValue {
    pub value: String,
    pub label: String,
}

/// Definition of a CRM custom field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomFieldDef {
    pub id: CustomFieldId,
    /// Machine name
    pub name: String,
    #[serde(default)]
    pub label: String,
    pub data_type: CrmDataType,
    #[serde(default)]
    pub html_type: HtmlType,
    /// CRM types this field is attached to (e.g. "Individual", "Contact", "Activity")
    #[serde(default)]
    pub extends: Vec<String>,
    /// Whether a Date field also stores a time of day
    #[serde(default)]
    pub has_time: bool,
    #[serde(default)]
    pub options: Vec<OptionValue>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl CustomFieldDef {
    /// Create an active custom field definition.
    pub fn new(id: CustomFieldId, name: impl Into<String>, data_type: CrmDataType) -> Self {
        Self {
            id,
            name: name.into(),
            label: String::new(),
            data_type,
            html_type: HtmlType::default(),
            extends: Vec::new(),
            has_time: false,
            options: Vec::new(),
            is_active: true,
        }
    }

    pub fn with_html_type(mut self, html_type: HtmlType) -> Self {
        self.html_type = html_type;
        self
    }

    pub fn extending(mut self, crm_type: impl Into<String>) -> Self {
        self.extends.push(crm_type.into());
        self
    }

    pub fn with_time(mut self) -> Self {
        self.has_time = true;
        self
    }

    /// API code of this field, e.g. `custom_12`.
    pub fn code(&self) -> String {
        format!("{}{}", CUSTOM_FIELD_PREFIX, self.id)
    }

    /// Whether the field holds several option values at once.
    pub fn is_multiple(&self) -> bool {
        matches!(self.html_type, HtmlType::CheckBox | HtmlType::MultiSelect)
    }

    /// Whether this field is attached to records of the given CRM type.
    ///
    /// `top_level` is the parent entity of `crm_type` (e.g. "Contact" for
    /// "Individual"); a field extending the parent applies to every subtype.
    pub fn applies_to(&self, crm_type: &str, top_level: &str) -> bool {
        self.is_active
            && self
                .extends
                .iter()
                .any(|e| e == crm_type || e == top_level)
    }
}

/// Field types of Store B.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFieldType {
    Text,
    Textarea,
    Wysiwyg,
    Number,
    Email,
    Url,
    Select,
    Checkbox,
    Radio,
    TrueFalse,
    DatePicker,
    DateTimePicker,
    Image,
    File,
    Relationship,
    Repeater,
}

impl ContentFieldType {
    /// Whether the field stores a list of values.
    pub fn is_list(self) -> bool {
        matches!(
            self,
            ContentFieldType::Checkbox | ContentFieldType::Relationship | ContentFieldType::Repeater
        )
    }

    /// Whether the field references a local attachment.
    pub fn is_attachment(self) -> bool {
        matches!(self, ContentFieldType::Image | ContentFieldType::File)
    }
}

impl fmt::Display for ContentFieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Definition of a Store B field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentFieldDef {
    /// Stable field key, also the code the value is stored under
    pub key: String,
    #[serde(default)]
    pub name: String,
    pub field_type: ContentFieldType,
    /// Mapping setting naming the Store A field this one mirrors
    #[serde(default)]
    pub selector: Option<String>,
    /// Output format for dates (strftime syntax); storage format when unset
    #[serde(default)]
    pub return_format: Option<String>,
    /// Select fields: allow several values
    #[serde(default)]
    pub multiple: bool,
    /// Repeater rows: one definition per column
    #[serde(default)]
    pub sub_fields: Vec<ContentFieldDef>,
}

impl ContentFieldDef {
    pub fn new(key: impl Into<String>, field_type: ContentFieldType) -> Self {
        let key = key.into();
        Self {
            name: key.clone(),
            key,
            field_type,
            selector: None,
            return_format: None,
            multiple: false,
            sub_fields: Vec::new(),
        }
    }

    /// Builder-style method to set the mapping selector.
    pub fn mapped_to(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_return_format(mut self, format: impl Into<String>) -> Self {
        self.return_format = Some(format.into());
        self
    }

    pub fn with_multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    pub fn with_sub_field(mut self, field: ContentFieldDef) -> Self {
        self.sub_fields.push(field);
        self
    }

    /// Whether the stored value is a list.
    pub fn holds_list(&self) -> bool {
        self.field_type.is_list() || (self.field_type == ContentFieldType::Select && self.multiple)
    }
}

/// A group of Store B fields attached to one or more content types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldGroup {
    pub key: String,
    #[serde(default)]
    pub title: String,
    /// Content types the group is shown on
    pub content_types: Vec<String>,
    pub fields: Vec<ContentFieldDef>,
}

impl FieldGroup {
    pub fn new(key: impl Into<String>, content_types: Vec<String>) -> Self {
        Self {
            key: key.into(),
            title: String::new(),
            content_types,
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: ContentFieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn applies_to(&self, content_type: &str) -> bool {
        self.content_types.iter().any(|t| t == content_type)
    }
}

/// Human-readable JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn custom_field_code_and_scope() {
        let field = CustomFieldDef::new(12, "favourite_colour", CrmDataType::String)
            .with_html_type(HtmlType::CheckBox)
            .extending("Contact");

        assert_eq!(field.code(), "custom_12");
        assert!(field.is_multiple());
        assert!(field.applies_to("Individual", "Contact"));
        assert!(!field.applies_to("Meeting", "Activity"));
    }

    #[test]
    fn inactive_custom_field_applies_nowhere() {
        let mut field = CustomFieldDef::new(3, "legacy", CrmDataType::Memo).extending("Individual");
        field.is_active = false;
        assert!(!field.applies_to("Individual", "Contact"));
    }

    #[test]
    fn content_field_lists() {
        assert!(ContentFieldDef::new("tags", ContentFieldType::Checkbox).holds_list());
        assert!(!ContentFieldDef::new("colour", ContentFieldType::Select).holds_list());
        assert!(ContentFieldDef::new("colour", ContentFieldType::Select)
            .with_multiple()
            .holds_list());
        assert!(ContentFieldType::Image.is_attachment());
    }

    #[test]
    fn html_type_serialization() {
        let json = serde_json::to_string(&HtmlType::MultiSelect).unwrap();
        assert_eq!(json, r#""Multi-Select""#);
        let parsed: HtmlType = serde_json::from_str(r#""Select Date""#).unwrap();
        assert_eq!(parsed, HtmlType::SelectDate);
    }

    #[test]
    fn field_group_deserialization() {
        let group: FieldGroup = serde_json::from_value(json!({
            "key": "group_person",
            "contentTypes": ["person"],
            "fields": [
                {"key": "field_first", "fieldType": "text", "selector": "first_name"},
                {"key": "field_born", "fieldType": "date_picker", "returnFormat": "%d/%m/%Y"}
            ]
        }))
        .unwrap();

        assert!(group.applies_to("person"));
        assert_eq!(group.fields[0].selector.as_deref(), Some("first_name"));
        assert_eq!(group.fields[1].field_type, ContentFieldType::DatePicker);
    }

    #[test]
    fn json_type_names() {
        assert_eq!(json_type_name(&json!(1)), "Int");
        assert_eq!(json_type_name(&json!(1.5)), "Float");
        assert_eq!(json_type_name(&json!({})), "Object");
    }
}
