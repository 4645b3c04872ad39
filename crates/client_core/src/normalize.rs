//! Folds heterogeneous backend event payloads into [`NormalizedEvent`].
//!
//! The backend has shipped events both flat (`{type, timestamp, pid, comm, ..}`)
//! and with a nested `header` object. Each shape gets its own adapter producing a
//! partial header; the flat reading wins wherever both shapes carry a value,
//! except `ppid`, where the nested header has the final word.

use serde_json::{Map, Value};
use shared::domain::{EventHeader, EventKind, EventPayload, NormalizedEvent};

const UNKNOWN_COMM: &str = "Unknown";

/// Header values as read from one raw shape, before defaults are applied.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct HeaderFields {
    timestamp: Option<i64>,
    pid: Option<u32>,
    comm: Option<String>,
    cgroup_id: Option<String>,
    ppid: Option<u32>,
}

impl HeaderFields {
    /// Fills gaps in `self` from `fallback`. `ppid` goes the other way: the
    /// nested header carries the authoritative parent pid.
    fn or(self, fallback: HeaderFields) -> HeaderFields {
        HeaderFields {
            timestamp: self.timestamp.or(fallback.timestamp),
            pid: self.pid.or(fallback.pid),
            comm: self.comm.or(fallback.comm),
            cgroup_id: self.cgroup_id.or(fallback.cgroup_id),
            ppid: fallback.ppid.or(self.ppid),
        }
    }

    fn finish(self, received_at: i64) -> EventHeader {
        EventHeader {
            timestamp: self.timestamp.unwrap_or(received_at),
            pid: self.pid.unwrap_or(0),
            cgroup_id: self.cgroup_id.unwrap_or_default(),
            comm: self.comm.unwrap_or_else(|| UNKNOWN_COMM.to_string()),
            ppid: self.ppid,
        }
    }
}

fn flat_header(raw: &Map<String, Value>) -> HeaderFields {
    HeaderFields {
        timestamp: truthy_int(raw.get("timestamp")),
        pid: truthy_int(raw.get("pid")).and_then(|v| u32::try_from(v).ok()),
        comm: truthy_text(raw.get("comm")).or_else(|| truthy_text(raw.get("processName"))),
        cgroup_id: truthy_text(raw.get("cgroupId")),
        ppid: present_int(raw.get("ppid")).and_then(|v| u32::try_from(v).ok()),
    }
}

fn nested_header(raw: &Map<String, Value>) -> HeaderFields {
    match raw.get("header").and_then(Value::as_object) {
        Some(header) => flat_header(header),
        None => HeaderFields::default(),
    }
}

/// Maps one raw event into the canonical record. Total: every missing or
/// wrong-typed field falls back to a default, and `received_at` stands in for
/// a missing timestamp so that the result depends only on the arguments.
pub fn normalize(raw: &Value, index: usize, received_at: i64) -> NormalizedEvent {
    let empty = Map::new();
    let object = raw.as_object().unwrap_or(&empty);

    let header = flat_header(object)
        .or(nested_header(object))
        .finish(received_at);
    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .map(EventKind::from_wire)
        .unwrap_or(EventKind::Unknown);

    let id = truthy_text(object.get("id")).unwrap_or_else(|| {
        format!(
            "{}-{}-{}-{}",
            kind.as_str(),
            header.timestamp,
            header.pid,
            index
        )
    });

    let payload = match kind {
        EventKind::Exec => exec_payload(object, &header),
        EventKind::File => EventPayload::File {
            filename: truthy_text(object.get("filename")).unwrap_or_default(),
            flags: truthy_int(object.get("flags"))
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(0),
            ino: present_int(object.get("ino")).and_then(|v| u64::try_from(v).ok()),
            dev: present_int(object.get("dev")).and_then(|v| u64::try_from(v).ok()),
        },
        EventKind::Connect => EventPayload::Connect {
            family: truthy_int(object.get("family"))
                .and_then(|v| u16::try_from(v).ok())
                .unwrap_or(0),
            port: truthy_int(object.get("port"))
                .and_then(|v| u16::try_from(v).ok())
                .unwrap_or(0),
            addr: truthy_text(object.get("addr")).unwrap_or_default(),
        },
        EventKind::Unknown => EventPayload::Unknown,
    };

    NormalizedEvent {
        id,
        header,
        blocked: object
            .get("blocked")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        payload,
    }
}

fn exec_payload(raw: &Map<String, Value>, header: &EventHeader) -> EventPayload {
    let filename = truthy_text(raw.get("filename"));
    let command_line = truthy_text(raw.get("commandLine"))
        .or_else(|| filename.clone())
        .unwrap_or_else(|| header.comm.clone());
    EventPayload::Exec {
        parent_comm: truthy_text(raw.get("parentComm")).unwrap_or_default(),
        filename: filename.unwrap_or_default(),
        command_line,
    }
}

/// Normalizes a whole response batch; the position in the batch feeds the
/// derived id, so events lacking an id never collide within one batch.
pub fn normalize_batch(raw: &[Value], received_at: i64) -> Vec<NormalizedEvent> {
    raw.iter()
        .enumerate()
        .map(|(index, event)| normalize(event, index, received_at))
        .collect()
}

fn present_int(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|v| v.is_finite()).map(|v| v.trunc() as i64)),
        Value::String(raw) => raw.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Like [`present_int`] but zero counts as missing.
fn truthy_int(value: Option<&Value>) -> Option<i64> {
    present_int(value).filter(|v| *v != 0)
}

fn truthy_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) if number.as_f64() != Some(0.0) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/normalize_tests.rs"]
mod tests;
