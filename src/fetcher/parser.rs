//! Response parsing: JSON page body into [`Page`]

use super::{Cursor, FetcherError, FetcherResult, Page};
use crate::config::ApiConfig;
use crate::dedup::canonical_json;
use crate::{PartitionSpec, Record};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

/// Turn a decoded page body into records plus pagination state.
///
/// `current` is the cursor the page was requested with.
pub fn parse_page(
    body: &Value,
    api: &ApiConfig,
    partition: &PartitionSpec,
    current: &Cursor,
    fetched_at: DateTime<Utc>,
) -> FetcherResult<Page> {
    if let Some(status) = body.get("status").and_then(Value::as_str) {
        if !matches!(status.to_ascii_lowercase().as_str(), "success" | "ok") {
            return Err(FetcherError::InvalidResponse(format!(
                "upstream reported status '{status}'"
            )));
        }
    }

    let items = match body {
        Value::Array(items) => items,
        _ => body
            .get(&api.items_field)
            .and_then(Value::as_array)
            .ok_or_else(|| {
                FetcherError::InvalidResponse(format!(
                    "response has no '{}' array",
                    api.items_field
                ))
            })?,
    };

    let mut records = Vec::with_capacity(items.len());
    let mut malformed = 0u64;
    for item in items {
        match item_to_record(item, api, partition, fetched_at) {
            Some(record) => records.push(record),
            None => {
                malformed += 1;
                debug!(partition_id = %partition.id, "Skipping item without content");
            }
        }
    }

    let total_count = body.get(&api.count_field).and_then(Value::as_u64);
    let explicit_more = body.get(&api.has_more_field).and_then(Value::as_bool);
    let token = body
        .get(&api.next_cursor_field)
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty());

    let (has_more, next_cursor) = match (token, current) {
        (Some(token), _) => (
            explicit_more.unwrap_or(true),
            Some(Cursor::Token(token.to_string())),
        ),
        (None, Cursor::Page(page)) => {
            let more = explicit_more.unwrap_or_else(|| {
                if items.is_empty() {
                    false
                } else if let Some(total) = total_count {
                    page.saturating_mul(api.page_size as u64) < total
                } else {
                    items.len() >= api.page_size as usize
                }
            });
            (more, Some(Cursor::Page(page + 1)))
        }
        // A token-paged response without a new token has nothing further to point at.
        (None, Cursor::Token(_)) => (false, None),
    };

    Ok(Page {
        records,
        next_cursor: if has_more { next_cursor } else { None },
        has_more,
        malformed,
        total_count,
    })
}

fn item_to_record(
    item: &Value,
    api: &ApiConfig,
    partition: &PartitionSpec,
    fetched_at: DateTime<Utc>,
) -> Option<Record> {
    let content = match &api.content_field {
        Some(field) => {
            let text = item.get(field).and_then(Value::as_str)?;
            if text.trim().is_empty() {
                return None;
            }
            text.to_string()
        }
        None => {
            if item.is_null() {
                return None;
            }
            canonical_json(item)
        }
    };

    let external_id = match item.get(&api.id_field) {
        Some(Value::String(id)) => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    };

    Some(Record::new(
        partition.id.clone(),
        external_id,
        &content,
        item.to_string(),
        fetched_at,
    ))
}
