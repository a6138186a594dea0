//! Reddit implementation of [`ContentSource`](modsentry_core::ContentSource).
//!
//! Authenticates with the OAuth2 password grant (a "script" app), lists the
//! newest comments of a subreddit, removes comments and checks whether a
//! comment is already removed. [`wiki`] keeps an optional public log of
//! removals on a subreddit wiki page.

mod client;
mod listing;
mod status;
pub mod wiki;

pub use client::RedditClient;
pub use listing::fullname;
pub use wiki::{WikiPublisher, WikiSink, WikiStore};
