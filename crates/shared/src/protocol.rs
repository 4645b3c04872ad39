use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::EventKind;

pub const DEFAULT_PAGE_LIMIT: u32 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: String,
    pub end: String,
}

impl TimeWindow {
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: start.to_rfc3339_opts(SecondsFormat::Millis, true),
            end: end.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Server-side constraints. Empty lists mean "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFilter {
    #[serde(default)]
    pub types: Vec<EventKind>,
    #[serde(default)]
    pub processes: Vec<String>,
    #[serde(default)]
    pub pids: Vec<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cgroup_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<QueryFilter>,
    /// 1-based.
    pub page: u32,
    pub limit: u32,
}

impl QueryRequest {
    pub fn first_page(filter: Option<QueryFilter>, limit: u32) -> Self {
        Self {
            filter,
            page: 1,
            limit,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCounts {
    #[serde(default, deserialize_with = "lenient::count_or_zero")]
    pub exec: u64,
    #[serde(default, deserialize_with = "lenient::count_or_zero")]
    pub file: u64,
    #[serde(default, deserialize_with = "lenient::count_or_zero")]
    pub connect: u64,
}

/// One page of the query endpoint's response. Only `events` is guaranteed;
/// every other field may be absent or wrong-typed and decodes to `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    #[serde(default, deserialize_with = "lenient::events")]
    pub events: Vec<Value>,
    #[serde(
        default,
        deserialize_with = "lenient::u64_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub total: Option<u64>,
    #[serde(
        default,
        deserialize_with = "lenient::u32_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub page: Option<u32>,
    #[serde(
        default,
        deserialize_with = "lenient::u32_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub limit: Option<u32>,
    #[serde(
        default,
        alias = "total_pages",
        deserialize_with = "lenient::u32_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub total_pages: Option<u32>,
    #[serde(
        default,
        rename = "type_counts",
        alias = "typeCounts",
        deserialize_with = "lenient::type_counts",
        skip_serializing_if = "Option::is_none"
    )]
    pub type_counts: Option<TypeCounts>,
}

mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    use super::TypeCounts;

    fn non_negative(value: &Value) -> Option<u64> {
        match value {
            Value::Number(number) => number.as_u64().or_else(|| {
                number
                    .as_f64()
                    .filter(|v| v.is_finite() && *v >= 0.0)
                    .map(|v| v.trunc() as u64)
            }),
            Value::String(raw) => {
                let raw = raw.trim();
                raw.parse::<u64>().ok().or_else(|| {
                    raw.parse::<f64>()
                        .ok()
                        .filter(|v| v.is_finite() && *v >= 0.0)
                        .map(|v| v.trunc() as u64)
                })
            }
            _ => None,
        }
    }

    pub fn events<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Value>, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::Array(items) => items,
            _ => Vec::new(),
        })
    }

    pub fn u64_opt<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value.as_ref().and_then(non_negative))
    }

    pub fn u32_opt<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value
            .as_ref()
            .and_then(non_negative)
            .and_then(|v| u32::try_from(v).ok()))
    }

    pub fn count_or_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        Ok(u64_opt(deserializer)?.unwrap_or(0))
    }

    pub fn type_counts<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<TypeCounts>, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value
            .filter(Value::is_object)
            .and_then(|v| serde_json::from_value(v).ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_result_defaults_missing_metadata() {
        let page: PageResult = serde_json::from_value(json!({ "events": [{ "pid": 1 }] }))
            .expect("decode");
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.total, None);
        assert_eq!(page.page, None);
        assert_eq!(page.limit, None);
        assert_eq!(page.total_pages, None);
        assert_eq!(page.type_counts, None);
    }

    #[test]
    fn page_result_accepts_snake_case_and_string_numbers() {
        let page: PageResult = serde_json::from_value(json!({
            "events": [],
            "total": "532",
            "page": 2,
            "limit": 50.0,
            "total_pages": 11,
            "type_counts": { "exec": 120, "file": "300" }
        }))
        .expect("decode");
        assert_eq!(page.total, Some(532));
        assert_eq!(page.page, Some(2));
        assert_eq!(page.limit, Some(50));
        assert_eq!(page.total_pages, Some(11));
        assert_eq!(
            page.type_counts,
            Some(TypeCounts {
                exec: 120,
                file: 300,
                connect: 0
            })
        );
    }

    #[test]
    fn page_result_tolerates_wrong_typed_fields() {
        let page: PageResult = serde_json::from_value(json!({
            "events": { "not": "a list" },
            "total": -4,
            "page": "first",
            "totalPages": null,
            "type_counts": "many"
        }))
        .expect("decode");
        assert!(page.events.is_empty());
        assert_eq!(page.total, None);
        assert_eq!(page.page, None);
        assert_eq!(page.total_pages, None);
        assert_eq!(page.type_counts, None);
    }

    #[test]
    fn request_serializes_camel_case_filter() {
        let request = QueryRequest::first_page(
            Some(QueryFilter {
                types: vec![EventKind::Exec],
                time_window: Some(TimeWindow {
                    start: "2024-01-01T00:00:00.000Z".into(),
                    end: "2024-01-02T00:00:00.000Z".into(),
                }),
                ..QueryFilter::default()
            }),
            50,
        );
        let encoded = serde_json::to_value(&request).expect("encode");
        assert_eq!(
            encoded,
            json!({
                "filter": {
                    "types": ["exec"],
                    "processes": [],
                    "pids": [],
                    "timeWindow": {
                        "start": "2024-01-01T00:00:00.000Z",
                        "end": "2024-01-02T00:00:00.000Z"
                    }
                },
                "page": 1,
                "limit": 50
            })
        );
    }

    #[test]
    fn time_window_uses_millisecond_utc_format() {
        let start = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .expect("start")
            .with_timezone(&Utc);
        let end = DateTime::parse_from_rfc3339("2024-05-01T11:30:15.250Z")
            .expect("end")
            .with_timezone(&Utc);
        let window = TimeWindow::between(start, end);
        assert_eq!(window.start, "2024-05-01T10:00:00.000Z");
        assert_eq!(window.end, "2024-05-01T11:30:15.250Z");
    }
}
