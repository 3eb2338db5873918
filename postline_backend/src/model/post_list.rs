use super::post::Post;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ordered post ids plus the posts they refer to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostList {
    pub order: Vec<String>,
    pub posts: HashMap<String, Post>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_post_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_post_id: Option<String>,
}

impl PostList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_post(&mut self, post: Post) {
        self.posts.insert(post.id.clone(), post);
    }

    pub fn add_order(&mut self, id: impl Into<String>) {
        self.order.push(id.into());
    }

    /// Appends the posts of `other` that this list does not hold yet.
    pub fn extend(&mut self, other: PostList) {
        let PostList {
            order, mut posts, ..
        } = other;
        for id in order {
            if self.posts.contains_key(&id) {
                continue;
            }
            if let Some(post) = posts.remove(&id) {
                self.add_post(post);
                self.add_order(id);
            }
        }
    }

    /// Newest first; equal timestamps fall back to id order.
    pub fn sort_by_create_at(&mut self) {
        let posts = &self.posts;
        self.order.sort_by(|a, b| {
            let a_at = posts.get(a).map(|p| p.create_at).unwrap_or_default();
            let b_at = posts.get(b).map(|p| p.create_at).unwrap_or_default();
            b_at.cmp(&a_at).then_with(|| a.cmp(b))
        });
    }

    pub fn is_channel_id(&self, channel_id: &str) -> bool {
        self.posts.values().all(|p| p.channel_id == channel_id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn first(&self) -> Option<&Post> {
        self.order.first().and_then(|id| self.posts.get(id))
    }

    pub fn last(&self) -> Option<&Post> {
        self.order.last().and_then(|id| self.posts.get(id))
    }

    /// Posts in list order.
    pub fn ordered(&self) -> impl Iterator<Item = &Post> {
        self.order.iter().filter_map(|id| self.posts.get(id))
    }
}

impl FromIterator<Post> for PostList {
    fn from_iter<I: IntoIterator<Item = Post>>(iter: I) -> Self {
        let mut list = PostList::new();
        for post in iter {
            list.add_order(post.id.clone());
            list.add_post(post);
        }
        list
    }
}

/// Search hits together with the terms that matched each post.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostSearchResults {
    #[serde(flatten)]
    pub list: PostList,
    pub matches: HashMap<String, Vec<String>>,
}

impl PostSearchResults {
    pub fn new(list: PostList, matches: Option<HashMap<String, Vec<String>>>) -> Self {
        Self {
            list,
            matches: matches.unwrap_or_default(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}
