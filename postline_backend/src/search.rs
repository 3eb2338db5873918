//! Query fan-out over the store and the optional search index.

use crate::config::SearchSettings;
use crate::database::models::{direct_channel_name, group_channel_name, ChannelRecord};
use crate::database::repositories::{ChannelRepository, PostRepository, PostSearcher, UserRepository};
use crate::database::Database;
use crate::error::{PostError, PostResult};
use crate::index::SearchIndex;
use crate::model::{parse_search_params, PostList, PostSearchResults, SearchParams};
use anyhow::{anyhow, Context, Result};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::task::JoinSet;

#[derive(Clone)]
pub struct SearchService {
    database: Database,
    searcher: Arc<dyn PostSearcher>,
    index: Option<Arc<dyn SearchIndex>>,
    settings: SearchSettings,
}

impl SearchService {
    pub fn new(database: Database, searcher: Arc<dyn PostSearcher>, settings: SearchSettings) -> Self {
        Self {
            database,
            searcher,
            index: None,
            settings,
        }
    }

    pub fn with_index(mut self, index: Arc<dyn SearchIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn search_posts_in_team_for_user(
        &self,
        terms: &str,
        user_id: &str,
        team_id: &str,
        is_or_search: bool,
        include_deleted_channels: bool,
        time_zone_offset: i64,
        page: usize,
        per_page: usize,
    ) -> PostResult<PostSearchResults> {
        self.ensure_enabled()?;
        let include_deleted = include_deleted_channels && self.settings.view_archived_channels;
        let params_list: Vec<SearchParams> = parse_search_params(terms, time_zone_offset)
            .into_iter()
            .map(|params| SearchParams {
                or_terms: is_or_search,
                include_deleted_channels: include_deleted,
                ..params
            })
            .collect();

        if self.settings.enable_index_search {
            if let Some(index) = self.index.clone() {
                match self
                    .search_in_index(index, user_id, team_id, params_list.clone(), page, per_page)
                    .await
                {
                    Ok(results) => return Ok(results),
                    Err(err) => {
                        tracing::warn!(team_id, user_id, error = ?err, "index search failed, using the store");
                    }
                }
            }
        }

        // The store has no paging; only the first page is served from it.
        if page != 0 {
            return Ok(PostSearchResults::empty());
        }
        let params_list = self.resolve_member_channel_names(user_id, params_list).await?;
        let list = self.search_in_store(team_id, user_id, params_list).await?;
        Ok(PostSearchResults::new(client_list(list), None))
    }

    /// Team-wide search that ignores channel membership.
    pub async fn search_posts_in_team(&self, team_id: &str, params_list: Vec<SearchParams>) -> PostResult<PostList> {
        self.ensure_enabled()?;
        let params_list = params_list
            .into_iter()
            .map(|params| SearchParams {
                search_without_user_id: true,
                ..params
            })
            .collect();
        let list = self.search_in_store(team_id, "", params_list).await?;
        Ok(client_list(list))
    }

    fn ensure_enabled(&self) -> PostResult<()> {
        if self.settings.enable_post_search {
            Ok(())
        } else {
            Err(PostError::NotImplemented {
                id: "store.sql_post.search.disabled",
            })
        }
    }

    /// The store filters channels by name, so `@user` and `@a,b` filters are
    /// rewritten to the direct or group channel name. Entries that do not
    /// resolve are kept as typed.
    async fn resolve_member_channel_names(
        &self,
        user_id: &str,
        params_list: Vec<SearchParams>,
    ) -> PostResult<Vec<SearchParams>> {
        let needs_lookup = params_list.iter().any(|params| {
            params
                .in_channels
                .iter()
                .chain(&params.excluded_channels)
                .any(|name| name.starts_with('@'))
        });
        if !needs_lookup {
            return Ok(params_list);
        }

        let database = self.database.clone();
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || {
            database.with_repositories(|repos| {
                let rename = |names: &[String], include_deleted: bool| -> Vec<String> {
                    names
                        .iter()
                        .map(|name| {
                            if !name.starts_with('@') {
                                return name.clone();
                            }
                            match resolve_channel(&repos, "", &user_id, name, include_deleted) {
                                Ok(Some(channel)) => channel.name,
                                Ok(None) => {
                                    tracing::debug!(channel = %name, "search channel filter matched nothing");
                                    name.clone()
                                }
                                Err(err) => {
                                    tracing::warn!(channel = %name, error = ?err, "failed to resolve search channel filter");
                                    name.clone()
                                }
                            }
                        })
                        .collect()
                };
                Ok(params_list
                    .into_iter()
                    .map(|params| SearchParams {
                        in_channels: rename(&params.in_channels, params.include_deleted_channels),
                        excluded_channels: rename(&params.excluded_channels, params.include_deleted_channels),
                        ..params
                    })
                    .collect())
            })
        })
        .await
        .map_err(|err| anyhow!("channel name lookup task failed: {err}"))
        .and_then(|resolved| resolved)
        .map_err(PostError::internal("searchPostsInTeamForUser", "app.post.search.app_error"))
    }

    /// One blocking query per params group. Waits for every group; any
    /// failure fails the whole search.
    async fn search_in_store(
        &self,
        team_id: &str,
        user_id: &str,
        params_list: Vec<SearchParams>,
    ) -> PostResult<PostList> {
        let mut tasks = JoinSet::new();
        for (position, params) in params_list.into_iter().enumerate() {
            if params.is_match_all() {
                continue;
            }
            let searcher = Arc::clone(&self.searcher);
            let (team_id, user_id) = (team_id.to_string(), user_id.to_string());
            tasks.spawn_blocking(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    searcher.search_posts(&team_id, &user_id, &params)
                }));
                let result = outcome.unwrap_or_else(|payload| {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(position, panic = %message, "search query panicked");
                    Err(anyhow!("search query panicked: {message}"))
                });
                (position, result)
            });
        }

        let mut lists: Vec<(usize, PostList)> = Vec::new();
        let mut failure: Option<(usize, anyhow::Error)> = None;
        while let Some(joined) = tasks.join_next().await {
            let (position, result) = match joined {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::error!(error = ?err, "search query task failed");
                    (usize::MAX, Err(anyhow::Error::from(err)))
                }
            };
            match result {
                Ok(list) => lists.push((position, list)),
                Err(err) => {
                    if failure.as_ref().map_or(true, |(first, _)| position < *first) {
                        failure = Some((position, err));
                    }
                }
            }
        }
        if let Some((_, err)) = failure {
            return Err(PostError::internal("searchPostsInTeamForUser", "app.post.search.app_error")(err));
        }

        lists.sort_by_key(|(position, _)| *position);
        let mut merged = PostList::new();
        for (_, list) in lists {
            merged.extend(list);
        }
        merged.sort_by_create_at();
        Ok(merged)
    }

    async fn search_in_index(
        &self,
        index: Arc<dyn SearchIndex>,
        user_id: &str,
        team_id: &str,
        params_list: Vec<SearchParams>,
        page: usize,
        per_page: usize,
    ) -> Result<PostSearchResults> {
        let database = self.database.clone();
        let (user_id, team_id) = (user_id.to_string(), team_id.to_string());
        tokio::task::spawn_blocking(move || {
            let include_deleted = params_list.iter().any(|p| p.include_deleted_channels);
            let (channel_ids, resolved) = database.with_repositories(|repos| {
                let channel_ids: Vec<String> = repos
                    .channels()
                    .list_for_user(&team_id, &user_id, include_deleted)?
                    .into_iter()
                    .map(|channel| channel.id)
                    .collect();
                let resolved: Vec<SearchParams> = params_list
                    .into_iter()
                    .filter(|params| !params.is_match_all())
                    .map(|params| resolve_names(&repos, &team_id, &user_id, params))
                    .collect();
                Ok((channel_ids, resolved))
            })?;

            let hits = index
                .search_posts(&channel_ids, &resolved, page, per_page)
                .context("search index query failed")?;
            let posts = database.with_repositories(|repos| repos.posts().get_many(&hits.post_ids))?;

            let mut list = PostList::new();
            for id in &hits.post_ids {
                match posts.iter().find(|post| post.id == *id) {
                    Some(post) if post.delete_at == 0 => {
                        list.add_order(id.clone());
                        list.add_post(post.prepare_for_client());
                    }
                    Some(_) => {}
                    None => tracing::debug!(post_id = %id, "index returned a post the store does not have"),
                }
            }
            Ok(PostSearchResults::new(list, Some(hits.matches)))
        })
        .await
        .map_err(|err| anyhow!("index search task failed: {err}"))?
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn client_list(list: PostList) -> PostList {
    let PostList {
        order,
        posts,
        next_post_id,
        prev_post_id,
    } = list;
    PostList {
        order,
        posts: posts
            .into_iter()
            .map(|(id, post)| (id, post.prepare_for_client()))
            .collect(),
        next_post_id,
        prev_post_id,
    }
}

/// Swaps channel names and usernames for ids. Names that do not resolve are
/// kept as they are so the filter matches nothing.
fn resolve_names(
    repos: &crate::database::repositories::SqliteRepositories<'_>,
    team_id: &str,
    user_id: &str,
    params: SearchParams,
) -> SearchParams {
    let channel_ids = |names: &[String]| -> Vec<String> {
        names
            .iter()
            .filter_map(|name| match resolve_channel(repos, team_id, user_id, name, params.include_deleted_channels) {
                Ok(Some(channel)) => Some(channel.id),
                Ok(None) => {
                    tracing::debug!(channel = %name, "search channel filter matched nothing");
                    Some(name.clone())
                }
                Err(err) => {
                    tracing::warn!(channel = %name, error = ?err, "failed to resolve search channel filter");
                    Some(name.clone())
                }
            })
            .collect()
    };
    let user_ids = |names: &[String]| -> Vec<String> {
        match repos.users().get_by_usernames(names) {
            Ok(users) => names
                .iter()
                .map(|name| {
                    users
                        .iter()
                        .find(|user| user.username == *name)
                        .map(|user| user.id.clone())
                        .unwrap_or_else(|| name.clone())
                })
                .collect(),
            Err(err) => {
                tracing::warn!(error = ?err, "failed to resolve search user filter");
                names.to_vec()
            }
        }
    };
    SearchParams {
        in_channels: channel_ids(&params.in_channels),
        excluded_channels: channel_ids(&params.excluded_channels),
        from_users: user_ids(&params.from_users),
        excluded_users: user_ids(&params.excluded_users),
        ..params.clone()
    }
}

/// `@a,b` names a group channel, `@user` the direct channel with `user_id`,
/// anything else a team channel.
fn resolve_channel(
    repos: &crate::database::repositories::SqliteRepositories<'_>,
    team_id: &str,
    user_id: &str,
    name: &str,
    include_deleted: bool,
) -> Result<Option<ChannelRecord>> {
    let channel = match name.strip_prefix('@') {
        Some(members) if members.contains(',') => {
            let usernames: Vec<String> = members.split(',').map(|u| u.trim().to_string()).collect();
            let ids: Vec<String> = repos
                .users()
                .get_by_usernames(&usernames)?
                .into_iter()
                .map(|user| user.id)
                .collect();
            if ids.is_empty() {
                return Ok(None);
            }
            repos.channels().get_by_name("", &group_channel_name(&ids), include_deleted)?
        }
        Some(username) => {
            let Some(other) = repos.users().get_by_username(username)? else {
                return Ok(None);
            };
            repos
                .channels()
                .get_by_name("", &direct_channel_name(user_id, &other.id), include_deleted)?
        }
        None => repos.channels().get_by_name(team_id, name, include_deleted)?,
    };
    Ok(channel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexHits;
    use crate::model::Post;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Answers each query from a fixed table keyed by its terms.
    struct ScriptedSearcher {
        answers: Vec<(&'static str, Result<Vec<Post>, &'static str>)>,
        seen: Mutex<Vec<String>>,
    }

    impl PostSearcher for ScriptedSearcher {
        fn search_posts(&self, _team_id: &str, _user_id: &str, params: &SearchParams) -> Result<PostList> {
            self.seen.lock().unwrap().push(params.terms.clone());
            if params.terms == "explodes" {
                panic!("searcher exploded");
            }
            let (_, answer) = self
                .answers
                .iter()
                .find(|(terms, _)| *terms == params.terms)
                .expect("scripted terms");
            match answer {
                Ok(posts) => Ok(posts.iter().cloned().collect()),
                Err(message) => Err(anyhow!(*message)),
            }
        }
    }

    /// Every query fails.
    #[derive(Default)]
    struct FailingIndex {
        calls: AtomicUsize,
    }

    impl SearchIndex for FailingIndex {
        fn index_post(&self, _post: &Post, _team_id: &str) -> Result<()> {
            Ok(())
        }

        fn delete_post(&self, _post_id: &str) -> Result<()> {
            Ok(())
        }

        fn search_posts(
            &self,
            _channel_ids: &[String],
            _params: &[SearchParams],
            _page: usize,
            _per_page: usize,
        ) -> Result<IndexHits> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("index unreachable"))
        }
    }

    fn post(id: &str, create_at: i64) -> Post {
        Post {
            id: id.into(),
            channel_id: "c1".into(),
            user_id: "u1".into(),
            create_at,
            ..Default::default()
        }
    }

    fn service(answers: Vec<(&'static str, Result<Vec<Post>, &'static str>)>) -> (SearchService, Arc<ScriptedSearcher>) {
        let searcher = Arc::new(ScriptedSearcher {
            answers,
            seen: Mutex::new(Vec::new()),
        });
        let db = Database::in_memory().expect("db");
        let service = SearchService::new(db, searcher.clone(), SearchSettings::default());
        (service, searcher)
    }

    #[tokio::test]
    async fn groups_are_unioned_newest_first() {
        let (service, _) = service(vec![
            ("alpha", Ok(vec![post("a", 1), post("shared", 5)])),
            ("#beta", Ok(vec![post("shared", 5), post("b", 9)])),
        ]);
        let results = service
            .search_posts_in_team_for_user("alpha #beta", "u1", "t1", false, false, 0, 0, 60)
            .await
            .unwrap();
        assert_eq!(results.list.order, vec!["b", "shared", "a"]);
        assert!(results.matches.is_empty());
    }

    #[tokio::test]
    async fn one_failing_group_fails_the_search() {
        let (service, searcher) = service(vec![
            ("alpha", Ok(vec![post("a", 1)])),
            ("#beta", Err("store offline")),
        ]);
        let err = service
            .search_posts_in_team_for_user("alpha #beta", "u1", "t1", false, false, 0, 0, 60)
            .await
            .unwrap_err();
        assert_eq!(err.id(), "app.post.search.app_error");
        assert!(err.to_string().contains("store offline"));
        assert_eq!(searcher.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn wildcard_and_later_pages_skip_the_store() {
        let (service, searcher) = service(vec![]);
        let results = service
            .search_posts_in_team_for_user("*", "u1", "t1", false, false, 0, 0, 60)
            .await
            .unwrap();
        assert!(results.list.is_empty());
        let results = service
            .search_posts_in_team_for_user("anything", "u1", "t1", false, false, 0, 2, 60)
            .await
            .unwrap();
        assert!(results.list.is_empty());
        assert!(searcher.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn panicking_group_fails_the_search_in_order() {
        let (service, _) = service(vec![("explodes", Ok(vec![])), ("#beta", Err("store offline"))]);
        let err = service
            .search_posts_in_team_for_user("explodes #beta", "u1", "t1", false, false, 0, 0, 60)
            .await
            .unwrap_err();
        assert_eq!(err.id(), "app.post.search.app_error");
        assert!(err.to_string().contains("panicked"), "{err}");
    }

    #[tokio::test]
    async fn index_errors_fall_back_to_the_store() {
        let (service, searcher) = service(vec![("alpha", Ok(vec![post("a", 1)]))]);
        let index = Arc::new(FailingIndex::default());
        let mut service = service.with_index(index.clone());
        service.settings.enable_index_search = true;

        let results = service
            .search_posts_in_team_for_user("alpha", "u1", "t1", false, false, 0, 0, 60)
            .await
            .unwrap();
        assert_eq!(results.list.order, vec!["a"]);
        assert!(results.matches.is_empty());
        assert_eq!(index.calls.load(Ordering::SeqCst), 1);

        let later = service
            .search_posts_in_team_for_user("alpha", "u1", "t1", false, false, 0, 1, 60)
            .await
            .unwrap();
        assert!(later.list.is_empty());
        assert_eq!(index.calls.load(Ordering::SeqCst), 2);
        assert_eq!(searcher.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn index_is_ignored_unless_enabled() {
        let (service, searcher) = service(vec![("alpha", Ok(vec![post("a", 1)]))]);
        let index = Arc::new(FailingIndex::default());
        let service = service.with_index(index.clone());
        assert!(!service.settings().enable_index_search);

        let results = service
            .search_posts_in_team_for_user("alpha", "u1", "t1", false, false, 0, 0, 60)
            .await
            .unwrap();
        assert_eq!(results.list.order, vec!["a"]);
        assert_eq!(index.calls.load(Ordering::SeqCst), 0);
        assert_eq!(*searcher.seen.lock().unwrap(), vec!["alpha".to_string()]);
    }

    #[tokio::test]
    async fn disabled_search_is_not_implemented() {
        let (mut service, _) = service(vec![]);
        service.settings.enable_post_search = false;
        let err = service
            .search_posts_in_team("t1", vec![SearchParams::default()])
            .await
            .unwrap_err();
        assert_eq!(err.id(), "store.sql_post.search.disabled");
    }
}
