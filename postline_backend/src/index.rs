use crate::model::{split_words, Post, SearchParams};
use anyhow::{anyhow, Result};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Ranked post ids plus the terms each one matched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexHits {
    pub post_ids: Vec<String>,
    pub matches: HashMap<String, Vec<String>>,
}

/// Secondary search backend kept in sync by the write pipeline.
///
/// `search_posts` receives params whose channel and user filters already
/// hold ids, not names, and only returns posts from `channel_ids`.
pub trait SearchIndex: Send + Sync {
    fn index_post(&self, post: &Post, team_id: &str) -> Result<()>;
    fn delete_post(&self, post_id: &str) -> Result<()>;
    fn search_posts(
        &self,
        channel_ids: &[String],
        params: &[SearchParams],
        page: usize,
        per_page: usize,
    ) -> Result<IndexHits>;
}

#[derive(Debug, Clone)]
struct IndexedPost {
    channel_id: String,
    user_id: String,
    create_at: i64,
    message: String,
    words: HashSet<String>,
    hashtags: HashSet<String>,
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Linear-scan in-memory index; fine for a single node and for tests.
#[derive(Default)]
pub struct MemoryIndex {
    posts: RwLock<HashMap<String, IndexedPost>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.posts.read().map(|p| p.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, post_id: &str) -> bool {
        self.posts
            .read()
            .map(|p| p.contains_key(post_id))
            .unwrap_or_default()
    }
}

fn term_matches(entry: &IndexedPost, term: &str, is_hashtag: bool) -> bool {
    let term = term.to_lowercase();
    if term.starts_with('"') {
        let phrase = term.trim_matches('"');
        return !phrase.is_empty() && entry.message.contains(phrase);
    }
    if is_hashtag {
        return entry.hashtags.contains(&term);
    }
    match term.strip_suffix('*') {
        Some(prefix) => entry.words.iter().any(|w| w.starts_with(prefix)),
        None => entry.words.contains(&term),
    }
}

fn params_match(entry: &IndexedPost, params: &SearchParams) -> Option<Vec<String>> {
    if !params.in_channels.is_empty() && !params.in_channels.contains(&entry.channel_id) {
        return None;
    }
    if params.excluded_channels.contains(&entry.channel_id) {
        return None;
    }
    if !params.from_users.is_empty() && !params.from_users.contains(&entry.user_id) {
        return None;
    }
    if params.excluded_users.contains(&entry.user_id) {
        return None;
    }
    if params.after_millis().is_some_and(|after| entry.create_at < after) {
        return None;
    }
    if params.before_millis().is_some_and(|before| entry.create_at >= before) {
        return None;
    }
    if let Some((start, end)) = params.on_millis() {
        if entry.create_at < start || entry.create_at >= end {
            return None;
        }
    }
    if split_words(&params.excluded_terms)
        .iter()
        .any(|term| term_matches(entry, term, params.is_hashtag))
    {
        return None;
    }

    let terms = params.term_words();
    if terms.is_empty() {
        return Some(Vec::new());
    }
    let matched: Vec<String> = terms
        .iter()
        .filter(|term| term_matches(entry, term, params.is_hashtag))
        .cloned()
        .collect();
    let accepted = if params.or_terms {
        !matched.is_empty()
    } else {
        matched.len() == terms.len()
    };
    accepted.then_some(matched)
}

impl SearchIndex for MemoryIndex {
    fn index_post(&self, post: &Post, _team_id: &str) -> Result<()> {
        let entry = IndexedPost {
            channel_id: post.channel_id.clone(),
            user_id: post.user_id.clone(),
            create_at: post.create_at,
            message: post.message.to_lowercase(),
            words: tokenize(&post.message),
            hashtags: post
                .hashtags
                .split_whitespace()
                .map(str::to_lowercase)
                .collect(),
        };
        self.posts
            .write()
            .map_err(|_| anyhow!("search index lock poisoned"))?
            .insert(post.id.clone(), entry);
        Ok(())
    }

    fn delete_post(&self, post_id: &str) -> Result<()> {
        self.posts
            .write()
            .map_err(|_| anyhow!("search index lock poisoned"))?
            .remove(post_id);
        Ok(())
    }

    fn search_posts(
        &self,
        channel_ids: &[String],
        params: &[SearchParams],
        page: usize,
        per_page: usize,
    ) -> Result<IndexHits> {
        let posts = self
            .posts
            .read()
            .map_err(|_| anyhow!("search index lock poisoned"))?;
        let mut hits: Vec<(i64, String, Vec<String>)> = Vec::new();
        for (id, entry) in posts.iter() {
            if !channel_ids.contains(&entry.channel_id) {
                continue;
            }
            let mut matched: Option<Vec<String>> = None;
            for p in params {
                if let Some(terms) = params_match(entry, p) {
                    let all = matched.get_or_insert_with(Vec::new);
                    for term in terms {
                        if !all.contains(&term) {
                            all.push(term);
                        }
                    }
                }
            }
            if let Some(terms) = matched {
                hits.push((entry.create_at, id.clone(), terms));
            }
        }
        hits.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let mut result = IndexHits::default();
        for (_, id, terms) in hits.into_iter().skip(page.saturating_mul(per_page)).take(per_page) {
            if !terms.is_empty() {
                result.matches.insert(id.clone(), terms);
            }
            result.post_ids.push(id);
        }
        Ok(result)
    }
}
