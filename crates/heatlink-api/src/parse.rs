// Response normalization for the LOM320 `json_values.cgi` endpoint.
//
// The firmware answers with several shapes depending on version: a JSON
// array of `{id, name, value}`, a dict keyed by id, a comma-joined run of
// objects with the array brackets missing, and occasionally XML or plain
// `id=value` text. Everything funnels into one ordered `Vec<Record>`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::error::Error;

/// Keys under which some firmware nests the record list.
const NESTED_KEYS: [&str; 3] = ["values", "data", "items"];

/// Keys that mark a JSON object as a device error report.
const ERROR_KEYS: [&str; 4] = ["error", "message", "code", "status"];

/// One `(id, name, value)` triple as reported by the device.
///
/// `value` is the raw string form; typing happens downstream. An empty
/// string means the device reported no value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub id: String,
    pub name: String,
    pub value: String,
}

impl Record {
    fn new(id: impl Into<String>, name: Option<String>, value: impl Into<String>) -> Self {
        let id = id.into().trim().to_owned();
        let name = name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("entity_{id}"));
        Self {
            id,
            name,
            value: value.into(),
        }
    }

    /// Numeric register id, if the device sent a well-formed one.
    pub fn numeric_id(&self) -> Option<u32> {
        self.id.parse().ok()
    }
}

/// Normalize a successful response body into records.
///
/// Tries JSON (with bracket repair), then XML, then delimited text. Any
/// other shape, an HTML page, or an error-shaped JSON object is a parse
/// error carrying a truncated copy of the body.
pub fn parse(content_type: Option<&str>, body: &str) -> Result<Vec<Record>, Error> {
    let text = body.trim_start_matches('\u{feff}').trim();
    if text.is_empty() {
        return Err(Error::parse("empty response body", body));
    }

    if let Some(title) = detect_html_page(text) {
        return Err(Error::parse(
            format!("device returned an HTML page: {title}"),
            body,
        ));
    }

    if let Some(json) = parse_json(text) {
        return records_from_json(&json).map_err(|msg| Error::parse(msg, body));
    }

    let xml_hint = content_type.is_some_and(|ct| ct.contains("xml"));
    if xml_hint || text.starts_with('<') {
        trace!("falling back to XML");
        return parse_xml(text).map_err(|msg| Error::parse(msg, body));
    }

    trace!("falling back to delimited text");
    parse_delimited(text).ok_or_else(|| Error::parse("unrecognized response shape", body))
}

// ── JSON ─────────────────────────────────────────────────────────────

fn parse_json(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str(text) {
        return Some(value);
    }

    if needs_array_repair(text) {
        let repaired = format!("[{}]", text.trim_end_matches(',').trim_end());
        if let Ok(value) = serde_json::from_str(&repaired) {
            debug!("repaired object run missing its array brackets");
            return Some(value);
        }
    }

    None
}

/// `{..},{..}` without the enclosing `[`/`]`.
fn needs_array_repair(text: &str) -> bool {
    if !text.starts_with('{') {
        return false;
    }
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    compact.contains("},{")
}

fn records_from_json(json: &Value) -> Result<Vec<Record>, String> {
    match json {
        Value::Array(items) => records_from_array(items),
        Value::Object(map) => records_from_object(map),
        other => Err(format!("unsupported JSON payload: {}", json_type(other))),
    }
}

fn records_from_array(items: &[Value]) -> Result<Vec<Record>, String> {
    let records: Vec<Record> = items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|obj| {
            let id = obj.get("id")?;
            let value = obj.get("value")?;
            let name = obj.get("name").map(scalar_to_string);
            Some(Record::new(scalar_to_string(id), name, scalar_to_string(value)))
        })
        .collect();

    if records.is_empty() && !items.is_empty() {
        return Err(format!(
            "list of {} items contains no id/value records",
            items.len()
        ));
    }
    Ok(records)
}

fn records_from_object(map: &Map<String, Value>) -> Result<Vec<Record>, String> {
    for key in NESTED_KEYS {
        if let Some(nested @ Value::Array(_)) = map.get(key) {
            trace!(key, "descending into nested record list");
            return records_from_json(nested);
        }
    }

    let records: Vec<Record> = map
        .iter()
        .filter(|(key, _)| key.trim().parse::<u32>().is_ok())
        .filter_map(|(key, entry)| match entry {
            Value::Object(obj) => {
                let value = obj.get("value")?;
                let name = obj.get("name").map(scalar_to_string);
                Some(Record::new(key.as_str(), name, scalar_to_string(value)))
            }
            scalar => Some(Record::new(key.as_str(), None, scalar_to_string(scalar))),
        })
        .collect();

    if !records.is_empty() {
        return Ok(records);
    }

    if map
        .keys()
        .any(|k| ERROR_KEYS.contains(&k.to_ascii_lowercase().as_str()))
    {
        let detail = map
            .get("message")
            .or_else(|| map.get("error"))
            .map_or_else(|| "no details".to_owned(), scalar_to_string);
        return Err(format!("device reported an error: {detail}"));
    }

    let keys: Vec<&str> = map.keys().take(5).map(String::as_str).collect();
    Err(format!("unrecognized object with keys {keys:?}"))
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ── XML ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct XmlDocument {
    #[serde(rename = "value", default)]
    values: Vec<XmlValue>,
    #[serde(rename = "item", default)]
    items: Vec<XmlItem>,
}

/// `<value id="253">45.5</value>`
#[derive(Debug, Deserialize)]
struct XmlValue {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@name", default)]
    name: Option<String>,
    #[serde(rename = "$text", default)]
    text: String,
}

/// `<item id="253"><val>45.5</val></item>`
#[derive(Debug, Deserialize)]
struct XmlItem {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@name", default)]
    name: Option<String>,
    #[serde(default)]
    val: Option<String>,
}

fn parse_xml(text: &str) -> Result<Vec<Record>, String> {
    let doc: XmlDocument =
        quick_xml::de::from_str(text).map_err(|e| format!("invalid XML response: {e}"))?;

    let records: Vec<Record> = doc
        .values
        .into_iter()
        .map(|v| Record::new(v.id, v.name, v.text.trim()))
        .chain(
            doc.items
                .into_iter()
                .map(|i| Record::new(i.id, i.name, i.val.unwrap_or_default().trim())),
        )
        .collect();

    if records.is_empty() {
        return Err("XML response contains no value or item elements".into());
    }
    Ok(records)
}

// ── Delimited text ───────────────────────────────────────────────────

/// `id=value;id=value` or one `id value` pair per line.
fn parse_delimited(text: &str) -> Option<Vec<Record>> {
    let records: Vec<Record> = if text.contains('=') {
        text.split([';', '&', '\n'])
            .filter_map(|pair| {
                let (id, value) = pair.split_once('=')?;
                let id = id.trim();
                id.parse::<u32>().ok()?;
                Some(Record::new(id, None, value.trim()))
            })
            .collect()
    } else {
        text.lines()
            .filter_map(|line| {
                let line = line.trim();
                let (id, value) = line.split_once(char::is_whitespace)?;
                id.parse::<u32>().ok()?;
                Some(Record::new(id, None, value.trim()))
            })
            .collect()
    };

    (!records.is_empty()).then_some(records)
}

// ── HTML ─────────────────────────────────────────────────────────────

/// If `text` is an HTML document, return its title (or first heading).
fn detect_html_page(text: &str) -> Option<String> {
    let lower = text.to_ascii_lowercase();
    if !(lower.starts_with("<!doctype html") || lower.starts_with("<html")) {
        return None;
    }

    let title = tag_text(text, &lower, "title").or_else(|| tag_text(text, &lower, "h1"));
    Some(title.unwrap_or_else(|| "untitled HTML page".to_owned()))
}

/// Inner text of the first `<tag ...>...</tag>`. `lower` is `text` lowercased
/// with ASCII rules, so byte offsets line up.
fn tag_text(text: &str, lower: &str, tag: &str) -> Option<String> {
    let open = lower.find(&format!("<{tag}"))?;
    let start = open + lower[open..].find('>')? + 1;
    let end = start + lower[start..].find(&format!("</{tag}"))?;
    let inner = text.get(start..end)?.trim();
    (!inner.is_empty()).then(|| inner.to_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::{BODY_PREVIEW_LEN, ErrorKind};

    fn rec(id: &str, name: &str, value: &str) -> Record {
        Record {
            id: id.into(),
            name: name.into(),
            value: value.into(),
        }
    }

    #[test]
    fn parses_well_formed_array() {
        let body = r#"[{"id":"253","name":"Input.THeatSupply","value":"45.5"},
                      {"id":"254","name":"Input.TRetur","value":"38.0"}]"#;
        assert_eq!(
            parse(Some("application/json"), body).unwrap(),
            vec![
                rec("253", "Input.THeatSupply", "45.5"),
                rec("254", "Input.TRetur", "38.0"),
            ]
        );
    }

    #[test]
    fn repairs_missing_array_brackets() {
        let broken = r#"{"id":"1","value":"a"},{"id":"2","value":"b"}"#;
        let fixed = r#"[{"id":"1","value":"a"},{"id":"2","value":"b"}]"#;
        let records = parse(Some("text/html"), broken).unwrap();
        assert_eq!(records, parse(Some("text/html"), fixed).unwrap());
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn repairs_with_whitespace_and_trailing_comma() {
        let broken = "{\"id\":\"1\",\"value\":\"2\"},\n {\"id\":\"2\",\"value\":\"3\"},";
        let records = parse(None, broken).unwrap();
        assert_eq!(
            records,
            vec![rec("1", "entity_1", "2"), rec("2", "entity_2", "3")]
        );
    }

    #[test]
    fn numeric_ids_and_null_values_are_stringified() {
        let body = r#"[{"id":253,"value":45.5},{"id":254,"value":null},{"id":255,"value":true}]"#;
        assert_eq!(
            parse(None, body).unwrap(),
            vec![
                rec("253", "entity_253", "45.5"),
                rec("254", "entity_254", ""),
                rec("255", "entity_255", "true"),
            ]
        );
    }

    #[test]
    fn list_without_records_is_rejected() {
        let err = parse(None, r#"[{"foo":1},{"bar":2}]"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn empty_list_is_empty_result() {
        assert!(parse(None, "[]").unwrap().is_empty());
    }

    #[test]
    fn parses_dict_keyed_by_id() {
        let body = r#"{"253":{"name":"Input.THeatSupply","value":"45.5"},"254":{"value":"38"},"255":"12","note":"x"}"#;
        assert_eq!(
            parse(None, body).unwrap(),
            vec![
                rec("253", "Input.THeatSupply", "45.5"),
                rec("254", "entity_254", "38"),
                rec("255", "entity_255", "12"),
            ]
        );
    }

    #[test]
    fn parses_nested_list() {
        let body = r#"{"data":[{"id":"297","name":"HeatPump.State","value":"3"}]}"#;
        assert_eq!(
            parse(None, body).unwrap(),
            vec![rec("297", "HeatPump.State", "3")]
        );
    }

    #[test]
    fn error_shaped_object_is_parse_error() {
        let err = parse(None, r#"{"error":true,"message":"busy"}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert!(err.message().contains("busy"));
    }

    #[test]
    fn html_page_reports_title() {
        let body = "<!DOCTYPE html><html><head><title>401 Unauthorized</title></head><body/></html>";
        let err = parse(Some("text/html"), body).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert!(err.message().contains("401 Unauthorized"));
    }

    #[test]
    fn parses_xml_values_and_items() {
        let values = r#"<?xml version="1.0"?><values><value id="253">45.5</value><value id="254" name="Input.TRetur">38</value></values>"#;
        assert_eq!(
            parse(Some("text/xml"), values).unwrap(),
            vec![
                rec("253", "entity_253", "45.5"),
                rec("254", "Input.TRetur", "38"),
            ]
        );

        let items = r"<items><item id='297'><val>3</val></item></items>";
        assert_eq!(
            parse(None, items).unwrap(),
            vec![rec("297", "entity_297", "3")]
        );
    }

    #[test]
    fn parses_delimited_text() {
        assert_eq!(
            parse(Some("text/plain"), "253=45.5;254=38.0").unwrap(),
            vec![rec("253", "entity_253", "45.5"), rec("254", "entity_254", "38.0")]
        );
        assert_eq!(
            parse(Some("text/plain"), "253 45.5\n254 38.0\n").unwrap(),
            vec![rec("253", "entity_253", "45.5"), rec("254", "entity_254", "38.0")]
        );
    }

    #[test]
    fn garbage_is_parse_error_with_truncated_body() {
        let body = "x".repeat(1000);
        let err = parse(None, &body).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert_eq!(err.body().unwrap().len(), BODY_PREVIEW_LEN);
    }

    #[test]
    fn empty_body_is_parse_error() {
        assert_eq!(parse(None, "  \n").unwrap_err().kind(), ErrorKind::Parse);
    }

    #[test]
    fn record_numeric_id() {
        assert_eq!(rec("253", "x", "1").numeric_id(), Some(253));
        assert_eq!(rec("abc", "x", "1").numeric_id(), None);
    }
}
