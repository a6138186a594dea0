//! Pre-analysis filter: items that are never sent to a backend.

use modsentry_types::Item;
use modsentry_types::config::ModerationConfig;

const GONE_BODIES: [&str; 2] = ["[deleted]", "[removed]"];

#[derive(Debug, Clone)]
pub struct ItemFilter {
    bot_username: String,
    moderation: ModerationConfig,
}

impl ItemFilter {
    pub fn new(bot_username: impl Into<String>, moderation: ModerationConfig) -> Self {
        Self {
            bot_username: bot_username.into(),
            moderation,
        }
    }

    /// Reason to skip `item`, or `None` if it should be analyzed.
    pub fn check(&self, item: &Item) -> Option<String> {
        let body = item.body.trim();
        if body.is_empty() {
            return Some("empty body".into());
        }
        if GONE_BODIES.contains(&body) {
            return Some(format!("comment already {}", body.trim_matches(['[', ']'])));
        }
        if !self.bot_username.is_empty() && item.author.eq_ignore_ascii_case(&self.bot_username) {
            return Some("own comment".into());
        }
        if self.moderation.is_whitelisted(&item.author) {
            return Some(format!("whitelisted author {}", item.author));
        }
        None
    }
}
