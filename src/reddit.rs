use anyhow::Context;
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::config::RedditConfig;

const BASE_URL: &str = "https://www.reddit.com";
const AGENT: &str = "redditshorts/0.1";

#[derive(Debug, Deserialize)]
pub struct RedditListing {
    pub data: RedditListingData,
}

#[derive(Debug, Deserialize)]
pub struct RedditListingData {
    pub children: Vec<RedditChild>,
}

#[derive(Debug, Deserialize)]
pub struct RedditChild {
    pub data: RedditPost,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditPost {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    pub is_self: Option<bool>,
    pub over_18: Option<bool>,
    #[serde(default)]
    pub stickied: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RedditComment {
    pub id: String,
    pub body: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub stickied: bool,
}

/// Untyped listing used for the comments endpoint, where `t1` comments and
/// `more` stubs share one array.
#[derive(Debug, Deserialize)]
struct ThingListing {
    data: ThingListingData,
}

#[derive(Debug, Deserialize)]
struct ThingListingData {
    children: Vec<Thing>,
}

#[derive(Debug, Deserialize)]
struct Thing {
    kind: String,
    data: serde_json::Value,
}

/// A thread chosen for rendering.
#[derive(Debug, Clone)]
pub struct RedditThread {
    pub id: String,
    pub title: String,
    pub selftext: String,
    pub comments: Vec<RedditComment>,
}

pub struct RedditClient {
    client: reqwest::Client,
    base_url: String,
}

impl RedditClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: BASE_URL.to_string(),
        }
    }

    async fn get_text(&self, url: &str) -> anyhow::Result<String> {
        debug!("GET {}", url);
        let body = self
            .client
            .get(url)
            .header(USER_AGENT, AGENT)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body)
    }

    /// Pick a thread: the configured `post_id`, or the first unused SFW post of
    /// the hot listing. Ids in `used_path` are skipped; recording the chosen
    /// one is left to [`mark_used`] once the video exists.
    pub async fn fetch_thread(
        &self,
        config: &RedditConfig,
        story: bool,
        used_path: &Path,
    ) -> anyhow::Result<RedditThread> {
        let used_ids = load_used_ids(used_path)?;

        let id = match &config.post_id {
            Some(id) => id.clone(),
            None => {
                let url = format!(
                    "{}/r/{}/hot.json?limit={}",
                    self.base_url, config.subreddit, config.try_posts
                );
                let listing: RedditListing = serde_json::from_str(&self.get_text(&url).await?)
                    .context("Failed to parse subreddit listing")?;
                let post = select_post(listing, &used_ids, story).with_context(|| {
                    format!("No suitable posts found in subreddit {}", config.subreddit)
                })?;
                post.id
            }
        };

        let url = format!("{}/comments/{}.json?sort=top", self.base_url, id);
        let body = self.get_text(&url).await?;
        let thread = parse_thread(&body, config.max_comment_length, config.max_comments)?;
        info!(
            "Selected thread {}: {} ({} comments)",
            thread.id,
            thread.title,
            thread.comments.len()
        );
        Ok(thread)
    }
}

impl Default for RedditClient {
    fn default() -> Self {
        Self::new()
    }
}

/// First post that is not NSFW, not pinned and not used before. Story mode
/// additionally needs a self post with a body.
pub fn select_post(
    listing: RedditListing,
    used_ids: &HashSet<String>,
    story: bool,
) -> Option<RedditPost> {
    listing.data.children.into_iter().map(|c| c.data).find(|post| {
        let nsfw = post.over_18.unwrap_or(false);
        if nsfw || post.stickied || used_ids.contains(&post.id) {
            debug!("Skipping post (NSFW, pinned or already used): {}", post.title);
            return false;
        }
        !story || (post.is_self.unwrap_or(true) && !post.selftext.trim().is_empty())
    })
}

/// Parse the `/comments/<id>.json` response into a thread with at most
/// `max_count` usable top-level comments.
pub fn parse_thread(body: &str, max_len: usize, max_count: usize) -> anyhow::Result<RedditThread> {
    let listings: Vec<ThingListing> =
        serde_json::from_str(body).context("Failed to parse thread response")?;
    let mut listings = listings.into_iter();

    let post = listings
        .next()
        .and_then(|l| l.data.children.into_iter().find(|t| t.kind == "t3"))
        .context("Thread response has no post")?;
    let post: RedditPost = serde_json::from_value(post.data)?;

    let comments = match listings.next() {
        Some(listing) => listing
            .data
            .children
            .into_iter()
            .filter(|t| t.kind == "t1")
            .filter_map(|t| serde_json::from_value::<RedditComment>(t.data).ok())
            .filter(|c| usable_comment(c, max_len))
            .take(max_count)
            .collect(),
        None => Vec::new(),
    };

    Ok(RedditThread {
        id: post.id,
        title: post.title.trim().to_string(),
        selftext: post.selftext.trim().to_string(),
        comments,
    })
}

fn usable_comment(comment: &RedditComment, max_len: usize) -> bool {
    let body = comment.body.trim();
    !comment.stickied
        && !body.is_empty()
        && body != "[deleted]"
        && body != "[removed]"
        && body.chars().count() <= max_len
}

/// Record `id` in the used-posts file so later runs skip it.
pub fn mark_used(path: &Path, id: &str) -> anyhow::Result<()> {
    let mut used_ids = load_used_ids(path)?;
    if used_ids.insert(id.to_string()) {
        save_used_ids(path, &used_ids)?;
        debug!("Marked thread {} as used", id);
    }
    Ok(())
}

fn load_used_ids(path: &Path) -> anyhow::Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let data = fs::read_to_string(path)?;
    let ids: Vec<String> = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(ids.into_iter().collect())
}

fn save_used_ids(path: &Path, ids: &HashSet<String>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut ids: Vec<&String> = ids.iter().collect();
    ids.sort();
    fs::write(path, serde_json::to_string_pretty(&ids)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREAD: &str = r#"[
      {"kind": "Listing", "data": {"children": [
        {"kind": "t3", "data": {"id": "abc", "title": " What is it? ", "selftext": "", "over_18": false}}
      ]}},
      {"kind": "Listing", "data": {"children": [
        {"kind": "t1", "data": {"id": "c0", "body": "Pinned", "stickied": true}},
        {"kind": "t1", "data": {"id": "c1", "body": "First", "author": "a"}},
        {"kind": "t1", "data": {"id": "c2", "body": "[deleted]"}},
        {"kind": "t1", "data": {"id": "c3", "body": "This one is far too long to narrate"}},
        {"kind": "t1", "data": {"id": "c4", "body": "Second"}},
        {"kind": "t1", "data": {"id": "c5", "body": "Third"}},
        {"kind": "more", "data": {"count": 12, "children": ["x"]}}
      ]}}
    ]"#;

    #[test]
    fn parse_thread_filters_and_caps_comments() {
        let thread = parse_thread(THREAD, 20, 2).unwrap();
        assert_eq!(thread.id, "abc");
        assert_eq!(thread.title, "What is it?");
        let bodies: Vec<_> = thread.comments.iter().map(|c| c.body.as_str()).collect();
        assert_eq!(bodies, ["First", "Second"]);
    }

    #[test]
    fn thread_without_comment_listing_has_no_comments() {
        let body = r#"[{"kind": "Listing", "data": {"children": [
            {"kind": "t3", "data": {"id": "z", "title": "Alone"}}]}}]"#;
        let thread = parse_thread(body, 100, 10).unwrap();
        assert!(thread.comments.is_empty());
    }

    fn listing(posts: &str) -> RedditListing {
        serde_json::from_str(&format!(r#"{{"data": {{"children": [{posts}]}}}}"#)).unwrap()
    }

    #[test]
    fn select_post_skips_nsfw_and_used() {
        let listing = listing(
            r#"{"data": {"id": "a", "title": "nsfw", "over_18": true}},
               {"data": {"id": "b", "title": "used"}},
               {"data": {"id": "c", "title": "fresh"}}"#,
        );
        let used: HashSet<String> = ["b".to_string()].into();
        assert_eq!(select_post(listing, &used, false).unwrap().id, "c");
    }

    #[test]
    fn story_mode_needs_a_body() {
        let listing = listing(
            r#"{"data": {"id": "a", "title": "link", "selftext": ""}},
               {"data": {"id": "b", "title": "story", "selftext": "Once upon a time", "is_self": true}}"#,
        );
        assert_eq!(select_post(listing, &HashSet::new(), true).unwrap().id, "b");
    }

    #[test]
    fn used_ids_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config/used_posts.json");
        let ids: HashSet<String> = ["x".to_string(), "y".to_string()].into();
        save_used_ids(&path, &ids).unwrap();
        assert_eq!(load_used_ids(&path).unwrap(), ids);
    }

    #[test]
    fn mark_used_appends_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config/used_posts.json");
        assert!(load_used_ids(&path).unwrap().is_empty());

        mark_used(&path, "abc").unwrap();
        mark_used(&path, "def").unwrap();
        mark_used(&path, "abc").unwrap();

        let stored: Vec<String> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored, ["abc", "def"]);
    }
}
