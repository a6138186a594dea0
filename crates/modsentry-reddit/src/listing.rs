//! Wire types for Reddit listings and their conversion into [`Item`]s.

use chrono::{DateTime, TimeZone, Utc};
use modsentry_types::Item;
use serde::Deserialize;
use tracing::debug;

/// Fullname prefix for comments.
const COMMENT_PREFIX: &str = "t1_";

/// `t1_<id>` for a bare comment id; ids that already carry the prefix are
/// returned unchanged.
pub fn fullname(id: &str) -> String {
    if id.starts_with(COMMENT_PREFIX) {
        id.to_string()
    } else {
        format!("{COMMENT_PREFIX}{id}")
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Listing {
    pub data: ListingData,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListingData {
    #[serde(default)]
    pub children: Vec<Thing>,
    /// Fullname cursor for the next (older) page; null on the last page.
    #[serde(default)]
    pub after: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Thing {
    pub kind: String,
    pub data: CommentData,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommentData {
    pub id: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub permalink: Option<String>,
    /// Present (and only meaningful) when the account moderates the subreddit.
    #[serde(default)]
    pub removed: Option<bool>,
    /// Moderator name, `true` for spam filter, or null.
    #[serde(default)]
    pub banned_by: Option<serde_json::Value>,
}

impl CommentData {
    pub fn is_removed(&self) -> bool {
        let banned = match &self.banned_by {
            Some(serde_json::Value::String(s)) => !s.is_empty(),
            Some(serde_json::Value::Bool(b)) => *b,
            _ => false,
        };
        self.removed.unwrap_or(false) || banned
    }
}

fn timestamp(secs: f64) -> Option<DateTime<Utc>> {
    let whole = secs.trunc() as i64;
    let nanos = ((secs - secs.trunc()) * 1e9) as u32;
    Utc.timestamp_opt(whole, nanos).single()
}

impl Listing {
    /// Comments in the listing, skipping other kinds and unusable entries.
    pub fn into_items(self) -> Vec<Item> {
        self.data
            .children
            .into_iter()
            .filter(|t| t.kind == "t1")
            .filter_map(|t| {
                let d = t.data;
                let Some(created_at) = timestamp(d.created_utc) else {
                    debug!(id = %d.id, created_utc = d.created_utc, "bad timestamp, skipping");
                    return None;
                };
                Some(Item {
                    id: d.id,
                    body: d.body.unwrap_or_default(),
                    author: d.author.unwrap_or_else(|| "[deleted]".into()),
                    created_at,
                    permalink: d.permalink.unwrap_or_default(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fullname_prefix() {
        assert_eq!(fullname("abc"), "t1_abc");
        assert_eq!(fullname("t1_abc"), "t1_abc");
    }

    #[test]
    fn listing_to_items() {
        let raw = serde_json::json!({
            "kind": "Listing",
            "data": {
                "after": null,
                "children": [
                    {"kind": "t1", "data": {
                        "id": "k1", "name": "t1_k1", "author": "alice",
                        "body": "hello", "created_utc": 1714564800.5,
                        "permalink": "/r/test/comments/p/x/k1/"
                    }},
                    {"kind": "t3", "data": {"id": "post", "created_utc": 1714564800.0}},
                    {"kind": "t1", "data": {
                        "id": "k2", "author": null, "body": "[deleted]",
                        "created_utc": 1714564801.0
                    }}
                ]
            }
        });
        let listing: Listing = serde_json::from_value(raw).unwrap();
        assert_eq!(listing.data.after, None);
        let items = listing.into_items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "k1");
        assert_eq!(items[0].author, "alice");
        assert_eq!(items[0].created_at.timestamp(), 1714564800);
        assert_eq!(items[0].created_at.timestamp_subsec_millis(), 500);
        assert_eq!(items[1].author, "[deleted]");
        assert_eq!(items[1].permalink, "");
    }

    #[test]
    fn removed_detection() {
        let parse = |v: serde_json::Value| -> CommentData { serde_json::from_value(v).unwrap() };
        assert!(parse(serde_json::json!({"id": "a", "removed": true})).is_removed());
        assert!(parse(serde_json::json!({"id": "a", "banned_by": "mod_x"})).is_removed());
        assert!(parse(serde_json::json!({"id": "a", "banned_by": true})).is_removed());
        assert!(!parse(serde_json::json!({"id": "a", "banned_by": null})).is_removed());
        assert!(!parse(serde_json::json!({"id": "a", "removed": false})).is_removed());
    }
}
