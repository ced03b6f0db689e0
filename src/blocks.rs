//! Guest-page content blocks.
//!
//! Pages are composed of an ordered list of typed blocks. The set is closed:
//! an unknown or malformed block fails the whole request instead of being
//! silently dropped, so a page never persists in a half-valid shape.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Welcome { title: String, message: String },
    Wifi { network: String, password: String },
    Rules { items: Vec<String> },
    Eco { message: String },
    Links { links: Vec<LinkEntry> },
    CheckoutTime { time: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkEntry {
    pub label: String,
    pub url: String,
}

/// Decode a raw JSON block list into typed blocks, or fail with a field-level
/// error message naming the offending block and field.
pub fn decode_blocks(raw: &[Value]) -> Result<Vec<ContentBlock>, AppError> {
    let mut blocks = Vec::with_capacity(raw.len());
    for (index, value) in raw.iter().enumerate() {
        blocks.push(decode_block(index, value)?);
    }
    Ok(blocks)
}

pub fn decode_block(index: usize, raw: &Value) -> Result<ContentBlock, AppError> {
    let object = raw
        .as_object()
        .ok_or_else(|| field_error(index, "", "block must be an object"))?;
    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| field_error(index, "type", "missing block type"))?;

    match kind {
        "welcome" => decode_welcome(index, raw),
        "wifi" => decode_wifi(index, raw),
        "rules" => decode_rules(index, raw),
        "eco" => decode_eco(index, raw),
        "links" => decode_links(index, raw),
        "checkout_time" => decode_checkout_time(index, raw),
        other => Err(field_error(
            index,
            "type",
            &format!("unknown block type '{other}'"),
        )),
    }
}

fn decode_welcome(index: usize, raw: &Value) -> Result<ContentBlock, AppError> {
    Ok(ContentBlock::Welcome {
        title: required_string(index, raw, "title")?,
        message: required_string(index, raw, "message")?,
    })
}

fn decode_wifi(index: usize, raw: &Value) -> Result<ContentBlock, AppError> {
    Ok(ContentBlock::Wifi {
        network: required_string(index, raw, "network")?,
        password: required_string(index, raw, "password")?,
    })
}

fn decode_rules(index: usize, raw: &Value) -> Result<ContentBlock, AppError> {
    let items = raw
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| field_error(index, "items", "must be an array of strings"))?;
    let mut rules = Vec::with_capacity(items.len());
    for (item_index, item) in items.iter().enumerate() {
        let text = item
            .as_str()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                field_error(
                    index,
                    &format!("items[{item_index}]"),
                    "must be a non-empty string",
                )
            })?;
        rules.push(text.to_string());
    }
    Ok(ContentBlock::Rules { items: rules })
}

fn decode_eco(index: usize, raw: &Value) -> Result<ContentBlock, AppError> {
    Ok(ContentBlock::Eco {
        message: required_string(index, raw, "message")?,
    })
}

fn decode_links(index: usize, raw: &Value) -> Result<ContentBlock, AppError> {
    let entries = raw
        .get("links")
        .and_then(Value::as_array)
        .ok_or_else(|| field_error(index, "links", "must be an array"))?;
    let mut links = Vec::with_capacity(entries.len());
    for (entry_index, entry) in entries.iter().enumerate() {
        let label = entry
            .get("label")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                field_error(index, &format!("links[{entry_index}].label"), "is required")
            })?;
        let url = entry
            .get("url")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                field_error(index, &format!("links[{entry_index}].url"), "is required")
            })?;
        Url::parse(url).map_err(|_| {
            field_error(
                index,
                &format!("links[{entry_index}].url"),
                "is not a well-formed URL",
            )
        })?;
        links.push(LinkEntry {
            label: label.to_string(),
            url: url.to_string(),
        });
    }
    Ok(ContentBlock::Links { links })
}

fn decode_checkout_time(index: usize, raw: &Value) -> Result<ContentBlock, AppError> {
    let time = required_string(index, raw, "time")?;
    NaiveTime::parse_from_str(&time, "%H:%M")
        .map_err(|_| field_error(index, "time", "must be a HH:MM time"))?;
    Ok(ContentBlock::CheckoutTime { time })
}

fn required_string(index: usize, raw: &Value, field: &str) -> Result<String, AppError> {
    raw.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .ok_or_else(|| field_error(index, field, "is required"))
}

fn field_error(index: usize, field: &str, message: &str) -> AppError {
    let location = if field.is_empty() {
        format!("blocks[{index}]")
    } else {
        format!("blocks[{index}].{field}")
    };
    AppError::UnprocessableEntity(format!("{location}: {message}"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{decode_blocks, ContentBlock};

    #[test]
    fn decodes_every_variant() {
        let raw = vec![
            json!({"type": "welcome", "title": "Hi", "message": "Enjoy your stay"}),
            json!({"type": "wifi", "network": "Loft-5G", "password": "hunter2"}),
            json!({"type": "rules", "items": ["No smoking", "Quiet after 22:00"]}),
            json!({"type": "eco", "message": "Please reuse towels"}),
            json!({"type": "links", "links": [{"label": "Menu", "url": "https://example.com/menu"}]}),
            json!({"type": "checkout_time", "time": "11:00"}),
        ];
        let blocks = decode_blocks(&raw).expect("all variants decode");
        assert_eq!(blocks.len(), 6);
        assert!(matches!(blocks[5], ContentBlock::CheckoutTime { .. }));
    }

    #[test]
    fn unknown_type_rejects_the_whole_list() {
        let raw = vec![
            json!({"type": "welcome", "title": "Hi", "message": "Hello"}),
            json!({"type": "countdown", "seconds": 30}),
        ];
        let error = decode_blocks(&raw).expect_err("unknown type must fail");
        assert!(error.to_string().contains("blocks[1].type"));
    }

    #[test]
    fn links_require_label_and_valid_url() {
        let missing_label = vec![json!({"type": "links", "links": [{"url": "https://a.example"}]})];
        assert!(decode_blocks(&missing_label).is_err());

        let bad_url = vec![json!({"type": "links", "links": [{"label": "x", "url": "not a url"}]})];
        let error = decode_blocks(&bad_url).expect_err("malformed url must fail");
        assert!(error.to_string().contains("links[0].url"));
    }

    #[test]
    fn checkout_time_must_be_hh_mm() {
        assert!(decode_blocks(&[json!({"type": "checkout_time", "time": "25:99"})]).is_err());
        assert!(decode_blocks(&[json!({"type": "checkout_time", "time": "09:30"})]).is_ok());
    }

    #[test]
    fn missing_required_field_names_the_field() {
        let raw = vec![json!({"type": "wifi", "network": "Loft-5G"})];
        let error = decode_blocks(&raw).expect_err("missing password must fail");
        assert!(error.to_string().contains("blocks[0].password"));
    }
}
