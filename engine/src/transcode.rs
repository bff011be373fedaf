//! Value transcoding between the two stores' field representations.
//!
//! Store A hands out dates in more than one raw encoding, packs option lists
//! into a single separator-delimited string and references files by path.
//! Store B stores dates in its own storage formats, lists as arrays and files
//! as local attachment ids. [`ValueTranscoder`] converts one field value at a
//! time in either direction.

use crate::{
    attachment::AttachmentStore,
    error::Result,
    mapping::{FieldKind, MappedField},
    reconcile::same_value,
    record::{is_empty_value, value_as_flag, value_as_id},
    schema::{json_type_name, ContentFieldType, CrmDataType},
    Error, RecordId,
};
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

/// Separator Store A uses inside multi-value option strings.
pub const CRM_SEPARATOR: char = '\u{1}';

/// Canonical date-time format every date passes through.
pub const CANONICAL_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Raw date encodings Store A is known to return, most specific first.
pub const CRM_DATE_FORMATS: &[&str] = &[
    "%Y%m%d%H%M%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d",
    "%Y%m%d",
];

/// Store A write format for date-time fields.
const CRM_DATETIME_OUT: &str = "%Y%m%d%H%M%S";
/// Store A write format for date-only fields.
const CRM_DATE_OUT: &str = "%Y%m%d";

/// Store B storage format of date picker fields.
pub const CONTENT_DATE_FORMAT: &str = "%Y%m%d";
/// Store B storage format of date-time picker fields.
pub const CONTENT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Outcome of transcoding one value.
#[derive(Debug, Clone, PartialEq)]
pub enum Transcoded {
    /// Write this value
    Value(Value),
    /// Leave the field out of the payload entirely
    Omit,
}

impl Transcoded {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Transcoded::Value(v) => Some(v),
            Transcoded::Omit => None,
        }
    }
}

/// Translates contact ids between the stores through the identity map.
pub trait ReferenceResolver {
    /// Store B id linked to a Store A contact.
    fn content_id_for(&mut self, crm_id: RecordId) -> Result<Option<RecordId>>;

    /// Store A contact linked to a Store B record.
    fn crm_id_for(&mut self, content_id: RecordId) -> Result<Option<RecordId>>;
}

/// Collaborators a transcode call may need.
pub struct TranscodeContext<'a> {
    pub attachments: &'a mut dyn AttachmentStore,
    pub references: &'a mut dyn ReferenceResolver,
    /// Store A file fields that had a value and were cleared, by field code
    pub cleared_files: Vec<String>,
}

impl<'a> TranscodeContext<'a> {
    pub fn new(
        attachments: &'a mut dyn AttachmentStore,
        references: &'a mut dyn ReferenceResolver,
    ) -> Self {
        Self {
            attachments,
            references,
            cleared_files: Vec::new(),
        }
    }
}

/// Parse a date in any of the given formats.
///
/// Date-only formats yield midnight.
pub fn parse_date(raw: &str, formats: &[&str]) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    formats.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(raw, format).ok().or_else(|| {
            NaiveDate::parse_from_str(raw, format)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
    })
}

/// Normalize a Store A date to [`CANONICAL_DATE_FORMAT`].
pub fn normalize_crm_date(raw: &str) -> Result<String> {
    parse_date(raw, CRM_DATE_FORMATS)
        .map(|dt| dt.format(CANONICAL_DATE_FORMAT).to_string())
        .ok_or_else(|| Error::transcode(raw, "unrecognised date format"))
}

/// Whether a store already holds `desired`, allowing for the other
/// encodings of the same date or option list.
pub fn equivalent(current: Option<&Value>, desired: &Value) -> bool {
    if same_value(current, desired) {
        return true;
    }
    let Some(current) = current else {
        return false;
    };
    if let (Some(a), Some(b)) = (current.as_str(), desired.as_str()) {
        if let (Some(x), Some(y)) = (parse_date(a, CRM_DATE_FORMATS), parse_date(b, CRM_DATE_FORMATS)) {
            return x == y;
        }
    }
    if is_option_list(current) && is_option_list(desired) {
        return split_multi(current) == split_multi(desired);
    }
    false
}

fn is_option_list(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().all(|item| scalar_string(item).is_some()),
        Value::String(_) => true,
        _ => false,
    }
}

/// Split a multi-value field into its items.
///
/// Accepts arrays, separator-delimited strings (`\x01a\x01b\x01`) and plain
/// scalars.
pub fn split_multi(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(scalar_string).collect(),
        Value::String(s) if s.contains(CRM_SEPARATOR) => s
            .split(CRM_SEPARATOR)
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect(),
        other => scalar_string(other).into_iter().collect(),
    }
}

/// Join items into Store A's separator-delimited form.
pub fn join_multi(items: &[String]) -> String {
    if items.is_empty() {
        return String::new();
    }
    let sep = CRM_SEPARATOR.to_string();
    format!("{sep}{}{sep}", items.join(&sep))
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        _ => None,
    }
}

pub(crate) fn ids_of(value: &Value) -> Vec<RecordId> {
    match value {
        Value::Array(items) => items.iter().filter_map(value_as_id).collect(),
        Value::String(s) if s.contains(CRM_SEPARATOR) || s.contains(',') => s
            .split([CRM_SEPARATOR, ','])
            .filter_map(|part| part.trim().parse().ok())
            .collect(),
        other => value_as_id(other).into_iter().collect(),
    }
}

pub(crate) fn file_reference(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(map) => ["url", "uri", "name", "path"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}

fn number_from(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value.clone()),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .map(Value::from)
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(Value::from))
        }
        Value::Bool(b) => Some(Value::from(u8::from(*b))),
        _ => None,
    }
}

/// Converts single field values between Store A and Store B.
#[derive(Debug, Clone, Default)]
pub struct ValueTranscoder {
    never_empty: Vec<String>,
}

impl ValueTranscoder {
    /// Create a transcoder that omits the given Store A codes when empty.
    pub fn new(never_empty: Vec<String>) -> Self {
        Self { never_empty }
    }

    fn guard_empty(&self, field: &MappedField, value: Value) -> Transcoded {
        if is_empty_value(&value) {
            if let Some(code) = field.resolved.kind.code() {
                if self.never_empty.contains(&code) {
                    tracing::debug!(code = %code, "empty value for never-empty field omitted");
                    return Transcoded::Omit;
                }
            }
        }
        Transcoded::Value(value)
    }

    /// Convert a Store A value into the representation of a Store B field.
    pub fn to_content(
        &self,
        ctx: &mut TranscodeContext<'_>,
        field: &MappedField,
        value: &Value,
    ) -> Result<Transcoded> {
        let def = &field.def;
        let value_type = field.resolved.value_type;
        let wants_list = def.holds_list() || value_type.multiple;

        if is_empty_value(value) {
            let empty = if wants_list {
                Value::Array(Vec::new())
            } else {
                Value::Null
            };
            return Ok(self.guard_empty(field, empty));
        }

        let converted = match value_type.data_type {
            CrmDataType::Date => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| Error::transcode(&def.key, format!("expected date string, got {}", json_type_name(value))))?;
                let parsed = parse_date(raw, CRM_DATE_FORMATS)
                    .ok_or_else(|| Error::transcode(&def.key, format!("unrecognised date '{}'", raw)))?;
                let format = match def.field_type {
                    ContentFieldType::DatePicker => CONTENT_DATE_FORMAT,
                    ContentFieldType::DateTimePicker => CONTENT_DATETIME_FORMAT,
                    _ => def.return_format.as_deref().unwrap_or(CANONICAL_DATE_FORMAT),
                };
                Value::String(parsed.format(format).to_string())
            }
            CrmDataType::Boolean => Value::Bool(value_as_flag(value)),
            CrmDataType::ContactReference => {
                let mut ids = Vec::new();
                for crm_id in ids_of(value) {
                    match ctx.references.content_id_for(crm_id)? {
                        Some(id) => ids.push(Value::from(id)),
                        None => {
                            tracing::debug!(field = %def.key, crm_id, "contact has no counterpart, reference dropped");
                        }
                    }
                }
                if wants_list {
                    Value::Array(ids)
                } else {
                    match ids.into_iter().next() {
                        Some(id) => id,
                        None => return Err(Error::transcode(&def.key, "referenced contact is not linked")),
                    }
                }
            }
            CrmDataType::File => {
                let reference = file_reference(value)
                    .ok_or_else(|| Error::transcode(&def.key, "file reference is not a path"))?;
                let id = match ctx.attachments.find_matching(&reference)? {
                    Some(id) => id,
                    None => ctx.attachments.import(&reference)?,
                };
                Value::from(id)
            }
            CrmDataType::Int | CrmDataType::Float | CrmDataType::Money
                if def.field_type == ContentFieldType::Number =>
            {
                number_from(value)
                    .ok_or_else(|| Error::transcode(&def.key, format!("not a number: {}", value)))?
            }
            _ if wants_list => Value::Array(split_multi(value).into_iter().map(Value::String).collect()),
            _ if def.field_type == ContentFieldType::TrueFalse => Value::Bool(value_as_flag(value)),
            _ => match value {
                Value::String(_) => value.clone(),
                other => scalar_string(other).map(Value::String).unwrap_or_else(|| other.clone()),
            },
        };

        Ok(self.guard_empty(field, converted))
    }

    /// Convert a Store B value into the representation of a Store A field.
    ///
    /// `previous` is the Store B value before the change, used to tell a
    /// cleared file apart from one that was never set.
    pub fn to_crm(
        &self,
        ctx: &mut TranscodeContext<'_>,
        field: &MappedField,
        value: &Value,
        previous: Option<&Value>,
    ) -> Result<Transcoded> {
        let def = &field.def;
        let value_type = field.resolved.value_type;
        let code = field.resolved.kind.code().unwrap_or_else(|| def.key.clone());

        if value_type.data_type == CrmDataType::File {
            if is_empty_value(value) {
                let was_set = previous.is_some_and(|p| !is_empty_value(p));
                if !was_set {
                    return Ok(Transcoded::Omit);
                }
                ctx.cleared_files.push(code);
                return Ok(Transcoded::Value(Value::Null));
            }
            let id = value_as_id(value)
                .ok_or_else(|| Error::transcode(&def.key, "attachment id expected"))?;
            let exported = ctx.attachments.export(id)?;
            let json = serde_json::to_value(&exported)
                .map_err(|e| Error::transcode(&def.key, e))?;
            return Ok(Transcoded::Value(json));
        }

        if is_empty_value(value) {
            let empty = match (&field.resolved.kind, value_type.multiple) {
                (FieldKind::Custom(_), true) => Value::String(String::new()),
                (_, true) => Value::Array(Vec::new()),
                _ => Value::Null,
            };
            return Ok(self.guard_empty(field, empty));
        }

        let converted = match value_type.data_type {
            CrmDataType::Date => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| Error::transcode(&def.key, format!("expected date string, got {}", json_type_name(value))))?;
                let mut formats: Vec<&str> = def.return_format.iter().map(String::as_str).collect();
                formats.extend([CONTENT_DATE_FORMAT, CONTENT_DATETIME_FORMAT]);
                formats.extend(CRM_DATE_FORMATS);
                let parsed = parse_date(raw, &formats)
                    .ok_or_else(|| Error::transcode(&def.key, format!("unrecognised date '{}'", raw)))?;
                let format = if value_type.has_time {
                    CRM_DATETIME_OUT
                } else {
                    CRM_DATE_OUT
                };
                Value::String(parsed.format(format).to_string())
            }
            CrmDataType::Boolean => Value::from(u8::from(value_as_flag(value))),
            CrmDataType::ContactReference => {
                let mut ids = Vec::new();
                for content_id in ids_of(value) {
                    match ctx.references.crm_id_for(content_id)? {
                        Some(id) => ids.push(Value::from(id)),
                        None => {
                            tracing::debug!(field = %def.key, content_id, "record has no counterpart, reference dropped");
                        }
                    }
                }
                if value_type.multiple {
                    Value::Array(ids)
                } else {
                    match ids.into_iter().next() {
                        Some(id) => id,
                        None => return Err(Error::transcode(&def.key, "referenced record is not linked")),
                    }
                }
            }
            CrmDataType::Int | CrmDataType::Float | CrmDataType::Money if !value_type.multiple => {
                number_from(value)
                    .ok_or_else(|| Error::transcode(&def.key, format!("not a number: {}", value)))?
            }
            _ if value_type.multiple => {
                let items = split_multi(value);
                match field.resolved.kind {
                    FieldKind::Custom(_) => Value::String(join_multi(&items)),
                    _ => Value::Array(items.into_iter().map(Value::String).collect()),
                }
            }
            _ => match value {
                Value::String(_) => value.clone(),
                Value::Array(items) if items.len() == 1 => items[0].clone(),
                Value::Array(_) => {
                    return Err(Error::transcode(&def.key, "list value for single-valued field"))
                }
                other => scalar_string(other).map(Value::String).unwrap_or_else(|| other.clone()),
            },
        };

        Ok(self.guard_empty(field, converted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::MemoryAttachments;
    use crate::mapping::{CrmValueType, ResolvedField};
    use crate::schema::ContentFieldDef;
    use serde_json::json;
    use std::collections::HashMap;

    /// CRM id -> content id
    #[derive(Default)]
    struct Links(HashMap<RecordId, RecordId>);

    impl ReferenceResolver for Links {
        fn content_id_for(&mut self, crm_id: RecordId) -> Result<Option<RecordId>> {
            Ok(self.0.get(&crm_id).copied())
        }

        fn crm_id_for(&mut self, content_id: RecordId) -> Result<Option<RecordId>> {
            Ok(self
                .0
                .iter()
                .find(|(_, c)| **c == content_id)
                .map(|(crm, _)| *crm))
        }
    }

    fn field(def: ContentFieldDef, kind: FieldKind, value_type: CrmValueType) -> MappedField {
        MappedField {
            def,
            resolved: ResolvedField { kind, value_type },
        }
    }

    fn native(code: &str) -> FieldKind {
        FieldKind::Native(code.to_string())
    }

    fn run_to_content(f: &MappedField, value: Value) -> Result<Transcoded> {
        let mut files = MemoryAttachments::new();
        let mut links = Links::default();
        let mut ctx = TranscodeContext::new(&mut files, &mut links);
        ValueTranscoder::default().to_content(&mut ctx, f, &value)
    }

    fn run_to_crm(f: &MappedField, value: Value) -> Result<Transcoded> {
        let mut files = MemoryAttachments::new();
        let mut links = Links::default();
        let mut ctx = TranscodeContext::new(&mut files, &mut links);
        ValueTranscoder::default().to_crm(&mut ctx, f, &value, None)
    }

    #[test]
    fn crm_dates_in_any_encoding_normalize() {
        assert_eq!(normalize_crm_date("20240315103000").unwrap(), "2024-03-15 10:30:00");
        assert_eq!(normalize_crm_date("2024-03-15 10:30:00").unwrap(), "2024-03-15 10:30:00");
        assert_eq!(normalize_crm_date("2024-03-15").unwrap(), "2024-03-15 00:00:00");
        assert_eq!(normalize_crm_date("20240315").unwrap(), "2024-03-15 00:00:00");
        assert!(normalize_crm_date("15/03/2024").is_err());
    }

    #[test]
    fn dates_to_content_storage_formats() {
        let birth = field(
            ContentFieldDef::new("field_born", ContentFieldType::DatePicker),
            native("birth_date"),
            CrmValueType::new(CrmDataType::Date),
        );
        assert_eq!(
            run_to_content(&birth, json!("1990-07-04")).unwrap(),
            Transcoded::Value(json!("19900704"))
        );

        let mut timed = CrmValueType::new(CrmDataType::Date);
        timed.has_time = true;
        let when = field(
            ContentFieldDef::new("field_when", ContentFieldType::DateTimePicker),
            native("activity_date_time"),
            timed,
        );
        assert_eq!(
            run_to_content(&when, json!("20240315103000")).unwrap(),
            Transcoded::Value(json!("2024-03-15 10:30:00"))
        );

        let display = field(
            ContentFieldDef::new("field_text", ContentFieldType::Text).with_return_format("%d/%m/%Y"),
            native("birth_date"),
            CrmValueType::new(CrmDataType::Date),
        );
        assert_eq!(
            run_to_content(&display, json!("1990-07-04")).unwrap(),
            Transcoded::Value(json!("04/07/1990"))
        );
    }

    #[test]
    fn dates_back_to_crm() {
        let birth = field(
            ContentFieldDef::new("field_born", ContentFieldType::DatePicker).with_return_format("%d/%m/%Y"),
            native("birth_date"),
            CrmValueType::new(CrmDataType::Date),
        );
        // Formatted (display) value and storage value both parse
        assert_eq!(
            run_to_crm(&birth, json!("04/07/1990")).unwrap(),
            Transcoded::Value(json!("19900704"))
        );
        assert_eq!(
            run_to_crm(&birth, json!("19900704")).unwrap(),
            Transcoded::Value(json!("19900704"))
        );
        assert!(matches!(
            run_to_crm(&birth, json!("sometime")),
            Err(Error::Transcode { .. })
        ));
    }

    #[test]
    fn custom_multi_values_split_and_rejoin() {
        let mut list = CrmValueType::new(CrmDataType::String);
        list.multiple = true;
        let colours = field(
            ContentFieldDef::new("field_colours", ContentFieldType::Checkbox),
            FieldKind::Custom(3),
            list,
        );

        assert_eq!(
            run_to_content(&colours, json!("\u{1}red\u{1}blue\u{1}")).unwrap(),
            Transcoded::Value(json!(["red", "blue"]))
        );
        assert_eq!(
            run_to_crm(&colours, json!(["red", "blue"])).unwrap(),
            Transcoded::Value(json!("\u{1}red\u{1}blue\u{1}"))
        );
        assert_eq!(
            run_to_crm(&colours, json!([])).unwrap(),
            Transcoded::Value(json!(""))
        );
    }

    #[test]
    fn native_lists_stay_arrays() {
        let mut list = CrmValueType::new(CrmDataType::String);
        list.multiple = true;
        let methods = field(
            ContentFieldDef::new("field_methods", ContentFieldType::Checkbox),
            native("preferred_communication_method"),
            list,
        );
        assert_eq!(
            run_to_crm(&methods, json!(["1", "2"])).unwrap(),
            Transcoded::Value(json!(["1", "2"]))
        );
    }

    #[test]
    fn booleans_normalize() {
        let flag = field(
            ContentFieldDef::new("field_no_email", ContentFieldType::TrueFalse),
            native("do_not_email"),
            CrmValueType::new(CrmDataType::Boolean),
        );
        assert_eq!(run_to_content(&flag, json!("1")).unwrap(), Transcoded::Value(json!(true)));
        assert_eq!(run_to_crm(&flag, json!(false)).unwrap(), Transcoded::Value(json!(0)));
    }

    #[test]
    fn never_empty_fields_are_omitted() {
        let transcoder = ValueTranscoder::new(vec!["created_date".into()]);
        let mut timed = CrmValueType::new(CrmDataType::Date);
        timed.has_time = true;
        let created = field(
            ContentFieldDef::new("field_created", ContentFieldType::DateTimePicker),
            native("created_date"),
            timed,
        );
        let mut files = MemoryAttachments::new();
        let mut links = Links::default();
        let mut ctx = TranscodeContext::new(&mut files, &mut links);

        assert_eq!(
            transcoder.to_crm(&mut ctx, &created, &json!(""), None).unwrap(),
            Transcoded::Omit
        );
        assert_eq!(
            transcoder.to_content(&mut ctx, &created, &Value::Null).unwrap(),
            Transcoded::Omit
        );
    }

    #[test]
    fn contact_references_go_through_links() {
        let mut list = CrmValueType::new(CrmDataType::ContactReference);
        list.multiple = true;
        let targets = field(
            ContentFieldDef::new("field_targets", ContentFieldType::Relationship),
            native("target_contact_id"),
            list,
        );

        let mut files = MemoryAttachments::new();
        let mut links = Links(HashMap::from([(100, 55), (101, 56)]));
        let mut ctx = TranscodeContext::new(&mut files, &mut links);
        let transcoder = ValueTranscoder::default();

        // 102 has no counterpart and is dropped
        assert_eq!(
            transcoder.to_content(&mut ctx, &targets, &json!(["100", 102, 101])).unwrap(),
            Transcoded::Value(json!([55, 56]))
        );
        assert_eq!(
            transcoder.to_crm(&mut ctx, &targets, &json!([56]), None).unwrap(),
            Transcoded::Value(json!([101]))
        );
    }

    #[test]
    fn images_import_once_and_export_with_mime() {
        let photo = field(
            ContentFieldDef::new("field_photo", ContentFieldType::Image),
            native("image_URL"),
            CrmValueType::new(CrmDataType::File),
        );
        let mut files = MemoryAttachments::new();
        files.put_crm_file("files/ada.png", b"png".to_vec());
        let mut links = Links::default();
        let transcoder = ValueTranscoder::default();

        let first = {
            let mut ctx = TranscodeContext::new(&mut files, &mut links);
            transcoder.to_content(&mut ctx, &photo, &json!("files/ada.png")).unwrap()
        };
        let second = {
            let mut ctx = TranscodeContext::new(&mut files, &mut links);
            transcoder.to_content(&mut ctx, &photo, &json!("files/ada.png")).unwrap()
        };
        assert_eq!(first, second);
        assert_eq!(files.local_count(), 1);

        let mut ctx = TranscodeContext::new(&mut files, &mut links);
        let out = transcoder.to_crm(&mut ctx, &photo, &json!(1), None).unwrap();
        assert_eq!(
            out,
            Transcoded::Value(json!({"name": "custom/ada.png", "type": "image/png"}))
        );
    }

    #[test]
    fn clearing_a_file_distinguishes_previous_state() {
        let photo = field(
            ContentFieldDef::new("field_photo", ContentFieldType::Image),
            FieldKind::Custom(8),
            CrmValueType::new(CrmDataType::File),
        );
        let mut files = MemoryAttachments::new();
        let mut links = Links::default();
        let transcoder = ValueTranscoder::default();
        let mut ctx = TranscodeContext::new(&mut files, &mut links);

        // Was empty before: nothing to do
        assert_eq!(
            transcoder.to_crm(&mut ctx, &photo, &Value::Null, Some(&Value::Null)).unwrap(),
            Transcoded::Omit
        );
        assert!(ctx.cleared_files.is_empty());

        // Had a value and was cleared
        assert_eq!(
            transcoder.to_crm(&mut ctx, &photo, &json!(""), Some(&json!(12))).unwrap(),
            Transcoded::Value(Value::Null)
        );
        assert_eq!(ctx.cleared_files, vec!["custom_8".to_string()]);
    }

    #[test]
    fn missing_file_is_a_transcode_failure() {
        let photo = field(
            ContentFieldDef::new("field_photo", ContentFieldType::Image),
            native("image_URL"),
            CrmValueType::new(CrmDataType::File),
        );
        assert!(matches!(
            run_to_content(&photo, json!("files/gone.png")),
            Err(Error::Transcode { .. })
        ));
    }

    #[test]
    fn separator_helpers() {
        assert_eq!(split_multi(&json!("\u{1}a\u{1}\u{1}b\u{1}")), vec!["a", "b"]);
        assert_eq!(split_multi(&json!("solo")), vec!["solo"]);
        assert_eq!(split_multi(&json!([1, "x", null])), vec!["1", "x"]);
        assert_eq!(join_multi(&[]), "");
    }

    #[test]
    fn equivalent_values_across_encodings() {
        assert!(equivalent(Some(&json!("2024-01-01 00:00:01")), &json!("20240101000001")));
        assert!(equivalent(Some(&json!("\u{1}red\u{1}blue\u{1}")), &json!(["red", "blue"])));
        assert!(equivalent(Some(&json!(" Ada ")), &json!("Ada")));
        assert!(equivalent(None, &Value::Null));
        assert!(equivalent(Some(&json!(1)), &json!(true)));

        assert!(!equivalent(Some(&json!("2024-01-01")), &json!("20240102")));
        assert!(!equivalent(Some(&json!(["red"])), &json!(["red", "blue"])));
        assert!(!equivalent(None, &json!([])));
        assert!(!equivalent(
            Some(&json!([{"row_id": 1}])),
            &json!([{"row_id": 2}])
        ));
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_datetime() -> impl Strategy<Value = NaiveDateTime> {
        (1900i32..2100, 1u32..=12, 1u32..=28, 0u32..24, 0u32..60, 0u32..60).prop_map(
            |(y, m, d, h, min, s)| {
                NaiveDate::from_ymd_opt(y, m, d)
                    .and_then(|date| date.and_hms_opt(h, min, s))
                    .unwrap()
            },
        )
    }

    proptest! {
        /// Every Store A encoding of the same instant normalizes identically
        #[test]
        fn prop_crm_encodings_normalize_identically(dt in arb_datetime()) {
            let canonical = dt.format(CANONICAL_DATE_FORMAT).to_string();
            for format in ["%Y%m%d%H%M%S", "%Y-%m-%d %H:%M:%S"] {
                let raw = dt.format(format).to_string();
                prop_assert_eq!(normalize_crm_date(&raw).unwrap(), canonical.clone());
            }
        }

        /// Normalizing a canonical date is a no-op
        #[test]
        fn prop_normalize_is_stable(dt in arb_datetime()) {
            let once = normalize_crm_date(&dt.format("%Y%m%d%H%M%S").to_string()).unwrap();
            let twice = normalize_crm_date(&once).unwrap();
            prop_assert_eq!(once, twice);
        }

        /// Splitting a joined list gives back the non-empty items
        #[test]
        fn prop_join_then_split(items in prop::collection::vec("[a-z0-9]{1,8}", 0..6)) {
            let joined = join_multi(&items);
            prop_assert_eq!(split_multi(&Value::String(joined)), items);
        }
    }
}
