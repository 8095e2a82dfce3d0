use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{Config, RedditCredentials, REDDIT_API_URL, REDDIT_PAGE_SIZE, REDDIT_PUBLIC_URL, REDDIT_TOKEN_URL};
use crate::types::RawPost;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("r/{subreddit} answered HTTP {status}")]
    Status { subreddit: String, status: u16 },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unexpected listing shape: {0}")]
    Malformed(String),
}

/// Source of raw posts.
#[async_trait]
pub trait RedditClient: Send + Sync {
    /// Posts in `subreddit` created at or after `since` (all recent posts when
    /// `None`), oldest first.
    async fn fetch(
        &self,
        subreddit: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawPost>, FetchError>;
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

/// Reddit's `/new` listing over HTTP. Authenticated through the password
/// grant when credentials are configured, otherwise the public JSON listing.
pub struct HttpRedditClient {
    client: reqwest::Client,
    credentials: Option<RedditCredentials>,
    token: Mutex<Option<AccessToken>>,
    fetch_limit: usize,
}

impl HttpRedditClient {
    pub fn new(cfg: &Config) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(cfg.http_timeout)
            .user_agent(cfg.reddit_user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            credentials: cfg.reddit_credentials.clone(),
            token: Mutex::new(None),
            fetch_limit: cfg.fetch_limit,
        })
    }

    async fn bearer(&self) -> Result<Option<String>, FetchError> {
        let Some(creds) = &self.credentials else {
            return Ok(None);
        };
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(Some(token.value.clone()));
            }
        }

        let resp = self
            .client
            .post(REDDIT_TOKEN_URL)
            .basic_auth(&creds.client_id, Some(&creds.client_secret))
            .form(&[
                ("grant_type", "password"),
                ("username", creds.username.as_str()),
                ("password", creds.password.as_str()),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(FetchError::Auth(format!("token endpoint answered HTTP {}", resp.status())));
        }
        let body: serde_json::Value = resp.json().await?;
        let value = body
            .get("access_token")
            .and_then(|t| t.as_str())
            .ok_or_else(|| FetchError::Auth("token response has no access_token".to_string()))?
            .to_string();
        let ttl = body.get("expires_in").and_then(|e| e.as_u64()).unwrap_or(3600);
        // Refresh a minute early.
        let expires_at = Instant::now() + Duration::from_secs(ttl.saturating_sub(60));
        *cached = Some(AccessToken { value: value.clone(), expires_at });
        info!("Obtained reddit access token (expires in {ttl}s)");
        Ok(Some(value))
    }
}

#[async_trait]
impl RedditClient for HttpRedditClient {
    async fn fetch(
        &self,
        subreddit: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawPost>, FetchError> {
        let bearer = self.bearer().await?;
        let base = if bearer.is_some() { REDDIT_API_URL } else { REDDIT_PUBLIC_URL };

        let mut walk = ListingWalk::new(since, self.fetch_limit);
        let mut after: Option<String> = None;

        while walk.wants_more() {
            let url = listing_url(base, subreddit, walk.page_size(), after.as_deref());
            let mut req = self.client.get(&url);
            if let Some(token) = &bearer {
                req = req.bearer_auth(token);
            }
            let resp = req.send().await?;
            if !resp.status().is_success() {
                return Err(FetchError::Status {
                    subreddit: subreddit.to_string(),
                    status: resp.status().as_u16(),
                });
            }
            let body: serde_json::Value = resp.json().await?;
            let (page, next) = parse_listing(&body)?;
            debug!(subreddit, items = page.len(), "Fetched listing page");
            after = walk.take_page(page, next);
        }

        if walk.stopped_short_of_watermark() {
            warn!(
                subreddit,
                fetched = walk.collected(),
                "Listing ended before the watermark; older posts are no longer served"
            );
        }
        Ok(walk.into_posts())
    }
}

/// Paging decisions for one walk down a `/new` listing (newest first).
///
/// With a watermark the walk continues until it reaches a post older than the
/// watermark or the listing runs out, however many posts that takes. Without
/// one it stops after `first_run_limit` posts.
#[derive(Debug)]
pub struct ListingWalk {
    since: Option<DateTime<Utc>>,
    first_run_limit: usize,
    posts: Vec<RawPost>,
    reached_watermark: bool,
    done: bool,
}

impl ListingWalk {
    pub fn new(since: Option<DateTime<Utc>>, first_run_limit: usize) -> Self {
        Self {
            since,
            first_run_limit: first_run_limit.max(1),
            posts: Vec::new(),
            reached_watermark: false,
            done: false,
        }
    }

    pub fn wants_more(&self) -> bool {
        !self.done
    }

    /// `limit` for the next request.
    pub fn page_size(&self) -> usize {
        match self.since {
            Some(_) => REDDIT_PAGE_SIZE,
            None => REDDIT_PAGE_SIZE.min(self.first_run_limit.saturating_sub(self.posts.len())).max(1),
        }
    }

    /// Consume one page. Returns the cursor to request next, or None when the
    /// walk is over.
    pub fn take_page(&mut self, page: Vec<RawPost>, next: Option<String>) -> Option<String> {
        if page.is_empty() {
            self.done = true;
            return None;
        }
        for post in page {
            if self.since.is_some_and(|s| post.created_at < s) {
                self.reached_watermark = true;
                self.done = true;
                return None;
            }
            if self.since.is_none() && self.posts.len() >= self.first_run_limit {
                self.done = true;
                return None;
            }
            self.posts.push(post);
        }
        if self.since.is_none() && self.posts.len() >= self.first_run_limit {
            self.done = true;
            return None;
        }
        if next.is_none() {
            self.done = true;
        }
        next
    }

    /// A watermark was set but the listing ran out before any post older than
    /// it showed up, so posts in between may be beyond reach.
    pub fn stopped_short_of_watermark(&self) -> bool {
        self.done && self.since.is_some() && !self.reached_watermark && !self.posts.is_empty()
    }

    pub fn collected(&self) -> usize {
        self.posts.len()
    }

    /// Collected posts, oldest first.
    pub fn into_posts(mut self) -> Vec<RawPost> {
        self.posts
            .sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        self.posts
    }
}

fn listing_url(base: &str, subreddit: &str, limit: usize, after: Option<&str>) -> String {
    let mut url = format!("{base}/r/{subreddit}/new.json?limit={limit}&raw_json=1");
    if let Some(cursor) = after {
        url.push_str("&after=");
        url.push_str(cursor);
    }
    url
}

/// Split one listing response into its posts and the `after` cursor.
/// Items that are not usable posts are skipped.
pub fn parse_listing(body: &serde_json::Value) -> Result<(Vec<RawPost>, Option<String>), FetchError> {
    let data = body
        .get("data")
        .ok_or_else(|| FetchError::Malformed("listing has no data object".to_string()))?;
    let children = data
        .get("children")
        .and_then(|c| c.as_array())
        .ok_or_else(|| FetchError::Malformed("listing has no children array".to_string()))?;
    let posts = children
        .iter()
        .filter_map(|child| child.get("data"))
        .filter_map(parse_listing_item)
        .collect();
    let after = data
        .get("after")
        .and_then(|a| a.as_str())
        .filter(|a| !a.is_empty())
        .map(|a| a.to_string());
    Ok((posts, after))
}

/// Parse a `t3` listing item. Returns None when the id or timestamp is
/// missing; every other field falls back to empty.
pub fn parse_listing_item(v: &serde_json::Value) -> Option<RawPost> {
    let id = v.get("id")?.as_str()?.to_string();
    let created_utc = v.get("created_utc")?.as_f64()?;
    let created_at = DateTime::from_timestamp(created_utc.floor() as i64, 0)?;

    let text = |key: &str| v.get(key).and_then(|s| s.as_str()).unwrap_or("").to_string();

    Some(RawPost {
        id,
        subreddit: text("subreddit"),
        author: text("author"),
        created_at,
        title: text("title"),
        selftext: text("selftext"),
        permalink: text("permalink"),
        upvotes: v.get("score").and_then(|s| s.as_i64()).unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::types::from_unix;

    fn listing() -> serde_json::Value {
        json!({
            "kind": "Listing",
            "data": {
                "after": "t3_abc2",
                "children": [
                    {"kind": "t3", "data": {
                        "id": "abc3", "subreddit": "stocks", "author": "bull",
                        "created_utc": 1_700_000_300.0, "title": "TSLA to the moon",
                        "selftext": "", "permalink": "/r/stocks/comments/abc3/", "score": 42
                    }},
                    {"kind": "t3", "data": {
                        "id": "abc2", "subreddit": "stocks", "author": "bear",
                        "created_utc": 1_700_000_200.5, "title": "Puts on $ON",
                        "selftext": "Earnings look weak", "permalink": "/r/stocks/comments/abc2/",
                        "score": 3
                    }},
                    {"kind": "t3", "data": {"title": "no id or time"}}
                ]
            }
        })
    }

    #[test]
    fn parses_posts_and_cursor() {
        let (posts, after) = parse_listing(&listing()).unwrap();
        assert_eq!(after.as_deref(), Some("t3_abc2"));
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].id, "abc3");
        assert_eq!(posts[0].upvotes, 42);
        assert_eq!(posts[1].created_at.timestamp(), 1_700_000_200);
        assert_eq!(posts[1].raw_text(), "Puts on $ON. Earnings look weak");
    }

    #[test]
    fn last_page_has_no_cursor() {
        let body = json!({"data": {"after": null, "children": []}});
        let (posts, after) = parse_listing(&body).unwrap();
        assert!(posts.is_empty());
        assert!(after.is_none());
    }

    #[test]
    fn error_payload_is_malformed() {
        let body = json!({"message": "Forbidden", "error": 403});
        assert!(matches!(parse_listing(&body), Err(FetchError::Malformed(_))));
    }

    /// A `/new` page of posts created at `times` (newest first), with a cursor
    /// when more pages follow.
    fn page(times: std::ops::Range<i64>, after: Option<&str>) -> serde_json::Value {
        let children: Vec<serde_json::Value> = times
            .rev()
            .map(|t| json!({"kind": "t3", "data": {"id": format!("p{t}"), "created_utc": t as f64}}))
            .collect();
        json!({"data": {"after": after, "children": children}})
    }

    fn walk_pages(walk: &mut ListingWalk, pages: &[serde_json::Value]) -> usize {
        let mut requested = 0;
        for body in pages {
            if !walk.wants_more() {
                break;
            }
            requested += 1;
            let (posts, next) = parse_listing(body).unwrap();
            walk.take_page(posts, next);
        }
        requested
    }

    #[test]
    fn catch_up_walks_past_the_first_run_limit_to_the_watermark() {
        // 300 posts arrived since the watermark at t=1000; the limit is 200.
        let pages = [
            page(1201..1301, Some("t3_p1201")),
            page(1101..1201, Some("t3_p1101")),
            page(1001..1101, Some("t3_p1001")),
            page(901..1001, Some("t3_p901")),
            page(801..901, None),
        ];
        let mut walk = ListingWalk::new(Some(from_unix(1000)), 200);
        assert_eq!(walk.page_size(), REDDIT_PAGE_SIZE);

        let requested = walk_pages(&mut walk, &pages);
        assert_eq!(requested, 4);
        assert!(!walk.wants_more());
        assert!(!walk.stopped_short_of_watermark());

        let posts = walk.into_posts();
        // Everything from the watermark (inclusive) up, oldest first.
        assert_eq!(posts.len(), 301);
        assert_eq!(posts[0].created_at, from_unix(1000));
        assert_eq!(posts[300].created_at, from_unix(1300));
    }

    #[test]
    fn first_run_stops_at_the_limit() {
        let pages = [page(201..301, Some("t3_p201")), page(101..201, Some("t3_p101")), page(1..101, None)];
        let mut walk = ListingWalk::new(None, 150);
        assert_eq!(walk.page_size(), 100);

        let (posts, next) = parse_listing(&pages[0]).unwrap();
        assert_eq!(walk.take_page(posts, next).as_deref(), Some("t3_p201"));
        assert_eq!(walk.page_size(), 50);

        walk_pages(&mut walk, &pages[1..]);
        assert!(!walk.wants_more());
        let posts = walk.into_posts();
        assert_eq!(posts.len(), 150);
        assert_eq!(posts[0].created_at, from_unix(151));
    }

    #[test]
    fn listing_that_ends_above_the_watermark_is_reported() {
        let pages = [page(500..600, Some("t3_p500")), page(400..500, None)];
        let mut walk = ListingWalk::new(Some(from_unix(100)), 200);
        walk_pages(&mut walk, &pages);
        assert!(walk.stopped_short_of_watermark());
        assert_eq!(walk.collected(), 200);
    }

    #[test]
    fn listing_url_carries_cursor() {
        assert_eq!(
            listing_url(REDDIT_PUBLIC_URL, "stocks", 100, None),
            "https://www.reddit.com/r/stocks/new.json?limit=100&raw_json=1"
        );
        assert!(listing_url(REDDIT_API_URL, "investing", 50, Some("t3_x")).ends_with("&after=t3_x"));
    }
}
