//! Embedded JSON payloads: locating the container element and walking its keys.

use scraper::{Html, Selector};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid container selector `{0}`")]
    Selector(&'static str),
    #[error("malformed JSON in `{container}`")]
    Json {
        container: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("payload is missing key `{0}`")]
    MissingKey(String),
    #[error("key `{key}` is not {expected}")]
    WrongType { key: String, expected: &'static str },
    #[error("bundle `{0}` has no pricing tiers")]
    NoTiers(String),
}

/// Parse the JSON text of the first element matching `container`.
///
/// `Ok(None)` when the page has no such element; the caller treats that as nothing to ingest.
pub fn extract(html: &str, container: &'static str) -> Result<Option<Value>, PayloadError> {
    let selector = Selector::parse(container).map_err(|_| PayloadError::Selector(container))?;
    let document = Html::parse_document(html);
    let Some(element) = document.select(&selector).next() else {
        return Ok(None);
    };
    let text: String = element.text().collect();
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| PayloadError::Json { container, source })
}

pub fn field<'a>(value: &'a Value, key: &str) -> Result<&'a Value, PayloadError> {
    value
        .get(key)
        .ok_or_else(|| PayloadError::MissingKey(key.to_string()))
}

pub fn object<'a>(value: &'a Value, key: &str) -> Result<&'a Map<String, Value>, PayloadError> {
    field(value, key)?.as_object().ok_or_else(|| PayloadError::WrongType {
        key: key.to_string(),
        expected: "an object",
    })
}

pub fn array<'a>(value: &'a Value, key: &str) -> Result<&'a Vec<Value>, PayloadError> {
    field(value, key)?.as_array().ok_or_else(|| PayloadError::WrongType {
        key: key.to_string(),
        expected: "an array",
    })
}

/// Required non-null string.
pub fn string(value: &Value, key: &str) -> Result<String, PayloadError> {
    field(value, key)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| PayloadError::WrongType {
            key: key.to_string(),
            expected: "a string",
        })
}

/// Key must be present; `null` maps to `None`.
pub fn nullable_string(value: &Value, key: &str) -> Result<Option<String>, PayloadError> {
    match field(value, key)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        _ => Err(PayloadError::WrongType {
            key: key.to_string(),
            expected: "a string or null",
        }),
    }
}

/// `value[key].amount` as used by the `…|money` fields.
pub fn amount(value: &Value, key: &str) -> Result<f64, PayloadError> {
    field(field(value, key)?, "amount")?
        .as_f64()
        .ok_or_else(|| PayloadError::WrongType {
            key: format!("{}.amount", key),
            expected: "a number",
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CONTAINER: &str = "#landingPage-json-data";

    #[test]
    fn missing_container() {
        let html = "<html><body><p>Nothing here</p></body></html>";
        assert!(extract(html, CONTAINER).unwrap().is_none());
    }

    #[test]
    fn script_container() {
        let html = r#"<html><head>
            <script id="landingPage-json-data" type="application/json">{"data": {"x": 1}}</script>
            </head><body></body></html>"#;
        let value = extract(html, CONTAINER).unwrap().unwrap();
        assert_eq!(value, json!({"data": {"x": 1}}));
    }

    #[test]
    fn malformed_json() {
        let html = r#"<script id="landingPage-json-data">{"data": </script>"#;
        let err = extract(html, CONTAINER).unwrap_err();
        assert!(matches!(err, PayloadError::Json { .. }));
    }

    #[test]
    fn missing_key() {
        let v = json!({"a": 1});
        assert!(matches!(field(&v, "b"), Err(PayloadError::MissingKey(k)) if k == "b"));
    }

    #[test]
    fn nullable_string_requires_key() {
        let v = json!({"tile_stamp": null, "tile_logo": "logo.png"});
        assert_eq!(nullable_string(&v, "tile_stamp").unwrap(), None);
        assert_eq!(nullable_string(&v, "tile_logo").unwrap().as_deref(), Some("logo.png"));
        assert!(nullable_string(&v, "tile_image").is_err());
    }

    #[test]
    fn money_amount() {
        let v = json!({"msrp|money": {"amount": 123.45, "currency": "USD"}});
        assert_eq!(amount(&v, "msrp|money").unwrap(), 123.45);
        let bad = json!({"msrp|money": {"amount": "free"}});
        assert!(matches!(amount(&bad, "msrp|money"), Err(PayloadError::WrongType { .. })));
    }
}
