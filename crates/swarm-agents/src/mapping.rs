//! Upstream JSON objects to [`Record`]s.
//!
//! Search tools answer with whatever shape their upstream API uses. Two are
//! understood: YouTube-style video objects (`videoId`, `channelTitle`,
//! `publishedAt`, ...) and Twitter-style posts (`id`, `text`, `author`,
//! `created_at`, ...). Objects that already carry a `source_id` are read as
//! records directly.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use swarm_core::Record;

/// Watch URL prefix for YouTube ids without an explicit URL.
pub const YOUTUBE_WATCH_URL: &str = "https://www.youtube.com/watch?v=";

const YOUTUBE_METRICS: &[&str] = &["viewCount", "likeCount", "commentCount", "durationSeconds"];
const TWITTER_METRICS: &[&str] = &["like_count", "retweet_count", "reply_count", "quote_count"];

/// Map one upstream object. Returns `None` for shapes without an id.
pub fn record_from_upstream(value: &Value) -> Option<Record> {
    let obj = value.as_object()?;

    if obj.contains_key("source_id") {
        return serde_json::from_value(value.clone()).ok();
    }
    if let Some(video_id) = text(obj, "videoId") {
        return Some(youtube_record(obj, video_id));
    }
    text(obj, "id").map(|id| twitter_record(obj, id))
}

fn youtube_record(obj: &Map<String, Value>, video_id: String) -> Record {
    let url = text(obj, "url").unwrap_or_else(|| format!("{}{}", YOUTUBE_WATCH_URL, video_id));
    let mut record = Record::new(video_id, text(obj, "title").unwrap_or_default()).with_url(url);
    record.author = text(obj, "channelTitle");
    record.created_at = timestamp(obj, "publishedAt");
    collect_metrics(&mut record, obj, YOUTUBE_METRICS);
    record
}

fn twitter_record(obj: &Map<String, Value>, id: String) -> Record {
    let title = text(obj, "text")
        .or_else(|| text(obj, "title"))
        .unwrap_or_default();
    let mut record = Record::new(id, title);
    record.author = text(obj, "author").or_else(|| text(obj, "username"));
    record.created_at = timestamp(obj, "created_at");
    record.url = text(obj, "url");
    collect_metrics(&mut record, obj, TWITTER_METRICS);
    record
}

/// Non-empty string, or a number rendered as one (ids are sometimes numeric).
fn text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn timestamp(obj: &Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    let raw = obj.get(key)?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// YouTube returns counters as strings.
fn counter(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn collect_metrics(record: &mut Record, obj: &Map<String, Value>, keys: &[&str]) {
    for key in keys {
        if let Some(value) = obj.get(*key).and_then(counter) {
            record.metrics.insert((*key).to_string(), value);
        }
    }
}
