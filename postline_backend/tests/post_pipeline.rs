use postline_backend::config::{PostSettings, SearchSettings};
use postline_backend::database::models::{
    direct_channel_name, ChannelMemberRecord, ChannelRecord, ChannelType, FileInfoRecord, PreferenceRecord,
    TeamRecord, UserRecord, PREFERENCE_CATEGORY_FLAGGED_POST,
};
use postline_backend::database::repositories::{
    ChannelRepository, FileRepository, PostRepository, PreferenceRepository, TeamRepository, UserRepository,
};
use postline_backend::database::Database;
use postline_backend::effects::{BackgroundTasks, PostEffects};
use postline_backend::error::PostError;
use postline_backend::index::{MemoryIndex, SearchIndex};
use postline_backend::metrics::CountingMetrics;
use postline_backend::model::{Post, PostPatch, POST_AUTO_RESPONDER};
use postline_backend::plugins::{HookContext, HookOutcome, PluginRegistry, PostHooks, DISMISS_POST_ERROR};
use postline_backend::posting::PostService;
use postline_backend::realtime::{EventHub, EventKind};
use postline_backend::search::SearchService;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Harness {
    db: Database,
    posts: PostService,
    search: SearchService,
    hub: EventHub,
    metrics: CountingMetrics,
    index: Arc<MemoryIndex>,
}

impl Harness {
    async fn settle(&self) {
        self.posts.effects().tasks().wait_idle().await;
    }
}

fn channel(id: &str, team_id: &str, name: &str, channel_type: ChannelType) -> ChannelRecord {
    ChannelRecord {
        id: id.into(),
        team_id: team_id.into(),
        name: name.into(),
        display_name: name.into(),
        channel_type,
        create_at: 1,
        delete_at: 0,
    }
}

fn user(id: &str, roles: &str) -> UserRecord {
    UserRecord {
        id: id.into(),
        username: id.into(),
        locale: "en".into(),
        roles: roles.into(),
        is_bot: false,
        auto_responder_active: false,
        auto_responder_message: None,
    }
}

fn member(channel_id: &str, user_id: &str) -> ChannelMemberRecord {
    ChannelMemberRecord {
        channel_id: channel_id.into(),
        user_id: user_id.into(),
        last_viewed_at: 0,
    }
}

fn seed(db: &Database) {
    db.with_repositories(|repos| {
        repos.teams().save(&TeamRecord {
            id: "t1".into(),
            name: "core".into(),
            display_name: "Core".into(),
        })?;
        repos.users().save(&user("u1", "system_user"))?;
        repos.users().save(&UserRecord {
            auto_responder_active: true,
            auto_responder_message: Some("Out of office".into()),
            ..user("u2", "system_user")
        })?;
        repos.users().save(&user("admin", "system_user system_admin"))?;
        repos.channels().save(&channel("c1", "t1", "town-square", ChannelType::Open))?;
        repos.channels().save(&channel("c2", "t1", "dev", ChannelType::Open))?;
        repos.channels().save(&channel("c3", "t1", "secret", ChannelType::Private))?;
        repos.channels().save(&ChannelRecord {
            delete_at: 5,
            ..channel("c4", "t1", "archived", ChannelType::Open)
        })?;
        repos.channels().save(&channel(
            "dm",
            "",
            &direct_channel_name("u1", "u2"),
            ChannelType::Direct,
        ))?;
        for (channel_id, user_id) in [
            ("c1", "u1"),
            ("c1", "u2"),
            ("c1", "admin"),
            ("c2", "u1"),
            ("c3", "u1"),
            ("c4", "u1"),
            ("dm", "u1"),
            ("dm", "u2"),
        ] {
            repos.channels().save_member(&member(channel_id, user_id))?;
        }
        Ok(())
    })
    .expect("seed");
}

fn harness_with(settings: PostSettings, search_settings: SearchSettings, plugins: PluginRegistry) -> Harness {
    let db = Database::in_memory().expect("db");
    seed(&db);
    let hub = EventHub::default();
    let metrics = CountingMetrics::default();
    let index = Arc::new(MemoryIndex::new());
    let effects = PostEffects::new(
        db.clone(),
        BackgroundTasks::new(),
        hub.clone(),
        Arc::new(plugins),
        Arc::new(metrics.clone()),
    )
    .with_index(index.clone());
    let posts = PostService::new(db.clone(), settings, effects);
    let search = SearchService::new(db.clone(), Arc::new(db.clone()), search_settings).with_index(index.clone());
    Harness {
        db,
        posts,
        search,
        hub,
        metrics,
        index,
    }
}

fn harness() -> Harness {
    harness_with(PostSettings::default(), SearchSettings::default(), PluginRegistry::new())
}

fn draft(channel_id: &str, user_id: &str, message: &str) -> Post {
    Post {
        channel_id: channel_id.into(),
        user_id: user_id.into(),
        message: message.into(),
        ..Default::default()
    }
}

/// Holds the first post whose message is `gated` until released.
struct Gate {
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl PostHooks for Gate {
    fn name(&self) -> &str {
        "gate"
    }

    fn message_will_be_posted(&self, _ctx: &HookContext, post: &Post) -> HookOutcome {
        if post.message == "gated" {
            let _ = self.entered.lock().unwrap().send(());
            let _ = self.release.lock().unwrap().recv_timeout(Duration::from_secs(5));
        }
        HookOutcome::Continue
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_pending_ids_are_reported_then_replayed() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let mut plugins = PluginRegistry::new();
    plugins.register(Arc::new(Gate {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    }));
    let h = harness_with(PostSettings::default(), SearchSettings::default(), plugins);

    let request = Post {
        pending_post_id: Some("client-1".into()),
        ..draft("c2", "u1", "gated")
    };
    let posts = h.posts.clone();
    let first_request = request.clone();
    let first = tokio::spawn(async move { posts.create_post_as_user(first_request).await });

    tokio::task::spawn_blocking(move || entered_rx.recv_timeout(Duration::from_secs(5)))
        .await
        .unwrap()
        .expect("first create reached the hooks");

    let err = h.posts.create_post_as_user(request.clone()).await.unwrap_err();
    assert!(matches!(err, PostError::Pending));
    assert!(err.is_retryable());

    release_tx.send(()).unwrap();
    let created = first.await.unwrap().unwrap();

    let replayed = h.posts.create_post_as_user(request).await.unwrap();
    assert_eq!(replayed.id, created.id);

    let page = h.posts.get_posts_page("c2", 0, 10).await.unwrap();
    assert_eq!(page.order, vec![created.id.clone()]);
    h.settle().await;
    assert_eq!(h.metrics.creates(), 1);
}

#[tokio::test]
async fn failed_create_frees_its_pending_id() {
    let h = harness();
    let broken = Post {
        pending_post_id: Some("client-2".into()),
        root_id: Some("missing".into()),
        ..draft("c2", "u1", "hello")
    };
    let err = h.posts.create_post_as_user(broken.clone()).await.unwrap_err();
    assert_eq!(err.id(), "api.post.create_post.root_id");

    let fixed = Post { root_id: None, ..broken };
    let created = h.posts.create_post_as_user(fixed).await.unwrap();
    assert_eq!(created.message, "hello");
}

#[tokio::test(start_paused = true)]
async fn pending_ids_expire_after_their_ttl() {
    let h = harness();
    let request = Post {
        pending_post_id: Some("client-3".into()),
        ..draft("c2", "u1", "once")
    };
    let first = h.posts.create_post_as_user(request.clone()).await.unwrap();
    tokio::time::advance(Duration::from_secs(29)).await;
    let again = h.posts.create_post_as_user(request.clone()).await.unwrap();
    assert_eq!(again.id, first.id);

    tokio::time::advance(Duration::from_secs(31)).await;
    let fresh = h.posts.create_post_as_user(request).await.unwrap();
    assert_ne!(fresh.id, first.id);
}

#[tokio::test]
async fn replies_must_hang_off_a_root_in_the_same_channel() {
    let h = harness();
    let root = h.posts.create_post_as_user(draft("c2", "u1", "root")).await.unwrap();

    let reply = h
        .posts
        .create_post_as_user(Post {
            root_id: Some(root.id.clone()),
            ..draft("c2", "u1", "reply")
        })
        .await
        .unwrap();
    assert_eq!(reply.parent_id.as_deref(), Some(root.id.as_str()));

    let nested = h
        .posts
        .create_post_as_user(Post {
            root_id: Some(reply.id.clone()),
            ..draft("c2", "u1", "nested")
        })
        .await
        .unwrap_err();
    assert_eq!(nested.id(), "api.post.create_post.root_id");

    let elsewhere = h
        .posts
        .create_post_as_user(Post {
            root_id: Some(root.id.clone()),
            ..draft("c1", "u1", "wrong channel")
        })
        .await
        .unwrap_err();
    assert_eq!(elsewhere.id(), "api.post.create_post.channel_root_id");

    let thread = h.posts.get_post_thread(&reply.id).await.unwrap();
    assert_eq!(thread.len(), 2);
}

#[tokio::test]
async fn channel_and_type_checks_guard_creation() {
    let h = harness();
    let missing = h.posts.create_post_as_user(draft("nope", "u1", "x")).await.unwrap_err();
    assert!(matches!(missing, PostError::NotFound { .. }));

    let archived = h.posts.create_post_as_user(draft("c4", "u1", "x")).await.unwrap_err();
    assert_eq!(archived.id(), "api.post.create_post.can_not_post_to_deleted.error");

    let system = h
        .posts
        .create_post_as_user(Post {
            post_type: "system_join_channel".into(),
            ..draft("c2", "u1", "x")
        })
        .await
        .unwrap_err();
    assert_eq!(system.id(), "api.context.invalid_param.app_error");
}

#[tokio::test]
async fn edits_respect_the_time_limit() {
    let settings = PostSettings {
        edit_time_limit_secs: 60,
        ..PostSettings::default()
    };
    let h = harness_with(settings, SearchSettings::default(), PluginRegistry::new());
    let old = h
        .posts
        .create_post_as_user(Post {
            create_at: postline_backend::utils::now_millis() - 120_000,
            ..draft("c2", "u1", "original")
        })
        .await
        .unwrap();

    let edit = Post {
        message: "rewritten".into(),
        ..old.clone()
    };
    let err = h.posts.update_post(edit, false).await.unwrap_err();
    assert_eq!(err.id(), "api.post.update_post.permissions_time_limit");

    let pin = Post {
        is_pinned: true,
        ..old.clone()
    };
    let pinned = h.posts.update_post(pin, false).await.unwrap();
    assert!(pinned.is_pinned);
    assert_eq!(pinned.message, "original");
}

#[tokio::test]
async fn safe_updates_only_change_the_message() {
    let h = harness();
    let mut original = draft("c2", "u1", "first");
    original.add_prop("custom", "kept");
    let created = h.posts.create_post_as_user(original).await.unwrap();

    let mut incoming = created.clone();
    incoming.message = "second".into();
    incoming.is_pinned = true;
    incoming.props.clear();
    let updated = h.posts.update_post(incoming, true).await.unwrap();
    assert_eq!(updated.message, "second");
    assert!(!updated.is_pinned);
    assert_eq!(updated.props["custom"], "kept");
    assert!(updated.edit_at > 0);
    assert!(updated.update_at > created.update_at);

    let patched = h
        .posts
        .patch_post(
            &created.id,
            PostPatch {
                is_pinned: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(patched.is_pinned);
    assert_eq!(patched.message, "second");

    let stored = h.posts.get_single_post(&created.id).await.unwrap();
    assert!(stored.is_pinned);
}

#[tokio::test]
async fn deletion_succeeds_when_cleanup_fails() {
    let h = harness();
    h.db.with_repositories(|repos| {
        repos.files().save(&FileInfoRecord {
            id: "f1".into(),
            creator_id: "u1".into(),
            post_id: None,
            name: "plan.txt".into(),
            size_bytes: 12,
            delete_at: 0,
        })
    })
    .unwrap();

    let root = h
        .posts
        .create_post_as_user(Post {
            file_ids: vec!["f1".into(), "not-uploaded".into()],
            ..draft("c2", "u1", "with file")
        })
        .await
        .unwrap();
    assert_eq!(root.file_ids, vec!["f1".to_string()]);
    let reply = h
        .posts
        .create_post_as_user(Post {
            root_id: Some(root.id.clone()),
            ..draft("c2", "u1", "reply")
        })
        .await
        .unwrap();
    h.db.with_repositories(|repos| {
        repos.preferences().save(&PreferenceRecord {
            user_id: "u1".into(),
            category: PREFERENCE_CATEGORY_FLAGGED_POST.into(),
            name: root.id.clone(),
            value: "true".into(),
        })
    })
    .unwrap();
    h.settle().await;
    assert!(h.index.contains(&root.id));
    assert_eq!(h.metrics.attachments(), 1);

    h.db.with_repositories(|repos| Ok(repos.conn().execute_batch("DROP TABLE file_infos")?))
        .unwrap();
    let mut events = h.hub.subscribe();

    let deleted = h.posts.delete_post(&root.id, "u1").await.unwrap();
    assert!(deleted.delete_at > 0);
    assert_eq!(deleted.props["deleteBy"], "u1");
    assert_eq!(events.recv().await.unwrap().kind, EventKind::PostDeleted);
    h.settle().await;

    assert!(matches!(
        h.posts.get_single_post(&reply.id).await.unwrap_err(),
        PostError::NotFound { .. }
    ));
    let flag = h
        .db
        .with_repositories(|repos| repos.preferences().get("u1", PREFERENCE_CATEGORY_FLAGGED_POST, &root.id))
        .unwrap();
    assert!(flag.is_none());
    assert!(!h.index.contains(&root.id));

    let again = h.posts.delete_post(&root.id, "u1").await.unwrap_err();
    assert!(matches!(again, PostError::NotFound { .. }));
}

struct Moderator;

impl PostHooks for Moderator {
    fn message_will_be_posted(&self, _ctx: &HookContext, post: &Post) -> HookOutcome {
        if post.message.contains("spam") {
            HookOutcome::Reject("no spam".into())
        } else if post.message.contains("drop") {
            HookOutcome::Reject(DISMISS_POST_ERROR.into())
        } else {
            let mut post = post.clone();
            post.message = post.message.replace("darn", "****");
            HookOutcome::Replace(post)
        }
    }
}

#[tokio::test]
async fn hooks_can_rewrite_reject_or_dismiss() {
    let mut plugins = PluginRegistry::new();
    plugins.register(Arc::new(Moderator));
    let h = harness_with(PostSettings::default(), SearchSettings::default(), plugins);

    let rewritten = h.posts.create_post_as_user(draft("c2", "u1", "darn it")).await.unwrap();
    assert_eq!(rewritten.message, "**** it");

    let rejected = h.posts.create_post_as_user(draft("c2", "u1", "buy spam")).await.unwrap_err();
    assert!(matches!(rejected, PostError::Rejected { ref reason } if reason == "no spam"));

    let dismissed = h.posts.create_post_as_user(draft("c2", "u1", "drop me")).await.unwrap_err();
    assert!(matches!(dismissed, PostError::Dismissed));

    let page = h.posts.get_posts_page("c2", 0, 10).await.unwrap();
    assert_eq!(page.len(), 1);
}

#[tokio::test]
async fn read_only_town_square_notifies_the_author() {
    let settings = PostSettings {
        town_square_read_only: true,
        ..PostSettings::default()
    };
    let h = harness_with(settings, SearchSettings::default(), PluginRegistry::new());
    let mut events = h.hub.subscribe();

    let err = h.posts.create_post_as_user(draft("c1", "u1", "hi all")).await.unwrap_err();
    assert!(matches!(err, PostError::Forbidden { .. }));
    let notice = events.recv().await.unwrap();
    assert_eq!(notice.kind, EventKind::EphemeralMessage);
    assert_eq!(notice.broadcast.user_id.as_deref(), Some("u1"));
    assert!(notice.payload.post.message.contains("read-only"));

    h.posts.create_post_as_user(draft("c1", "admin", "announcement")).await.unwrap();
}

#[tokio::test]
async fn ephemeral_posts_are_never_stored() {
    let h = harness();
    let mut events = h.hub.subscribe();
    let sent = h.posts.send_ephemeral_post("u1", draft("c2", "admin", "only you"));
    assert_eq!(events.recv().await.unwrap().kind, EventKind::EphemeralMessage);
    assert!(h.posts.get_single_post(&sent.id).await.is_err());

    let edited = h.posts.update_ephemeral_post("u1", Post { message: "changed".into(), ..sent.clone() });
    assert_eq!(edited.message, "changed");
    let removed = h.posts.delete_ephemeral_post("u1", sent);
    assert!(removed.delete_at > 0);
    assert_eq!(events.recv().await.unwrap().kind, EventKind::PostEdited);
    assert_eq!(events.recv().await.unwrap().kind, EventKind::PostDeleted);
}

#[tokio::test]
async fn direct_messages_trigger_the_auto_responder() {
    let h = harness();
    let mut events = h.hub.subscribe();
    let sent = h.posts.create_post_as_user(draft("dm", "u1", "are you there?")).await.unwrap();
    h.settle().await;

    let page = h.posts.get_posts_page("dm", 0, 10).await.unwrap();
    assert_eq!(page.len(), 2);
    let reply = page
        .ordered()
        .find(|post| post.post_type == POST_AUTO_RESPONDER)
        .expect("auto response stored")
        .clone();
    assert_eq!(reply.user_id, "u2");
    assert_eq!(reply.root_id.as_deref(), Some(sent.id.as_str()));

    // The reply goes through the same commit path as any other post.
    assert!(h.index.contains(&sent.id));
    assert!(h.index.contains(&reply.id));
    assert_eq!(h.metrics.creates(), 2);
    let mut announced = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.kind == EventKind::Posted {
            announced.push(event.payload.post.id.clone());
        }
    }
    assert_eq!(announced, vec![sent.id.clone(), reply.id.clone()]);
    assert_eq!(
        h.posts.get_posts_etag("dm").await.unwrap(),
        format!("{}.{}", env!("CARGO_PKG_VERSION"), reply.update_at.max(sent.update_at))
    );
}

#[tokio::test]
async fn auto_responder_only_answers_direct_messages() {
    let h = harness();
    h.posts.create_post_as_user(draft("c1", "u1", "anyone around?")).await.unwrap();
    h.settle().await;
    let page = h.posts.get_posts_page("c1", 0, 10).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(h.metrics.creates(), 1);
}

#[tokio::test]
async fn channel_mentions_resolve_to_open_channels() {
    let h = harness();
    let mut events = h.hub.subscribe();
    let post = h
        .posts
        .create_post_as_user(draft("c2", "u1", "see ~town-square and ~secret"))
        .await
        .unwrap();
    let mentions = &post.props["channel_mentions"];
    assert_eq!(mentions["town-square"]["display_name"], "town-square");
    assert!(mentions.get("secret").is_none());
    let event = events.recv().await.unwrap();
    assert_eq!(event.payload.mentions.len(), 1);
}

async fn post_at(h: &Harness, channel_id: &str, create_at: i64, message: &str) -> Post {
    h.posts
        .create_post_as_user(Post {
            create_at,
            ..draft(channel_id, "u1", message)
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn pages_and_cursors_walk_the_channel() {
    let h = harness();
    let mut ids = Vec::new();
    for (i, at) in [1_000, 2_000, 3_000, 4_000].into_iter().enumerate() {
        ids.push(post_at(&h, "c2", at, &format!("m{i}")).await.id);
    }

    let mut page = h.posts.get_posts_page("c2", 0, 2).await.unwrap();
    assert_eq!(page.order, vec![ids[3].clone(), ids[2].clone()]);
    h.posts.add_cursor_ids_for_post_list(&mut page, "", "", 0, 0, 2).await;
    assert_eq!(page.next_post_id, None);
    assert_eq!(page.prev_post_id.as_deref(), Some(ids[1].as_str()));

    let options = postline_backend::reads::PostsOptions::new("c2", &ids[1], 0, 5);
    let mut before = h.posts.get_posts_around_post(true, &options).await.unwrap();
    assert_eq!(before.order, vec![ids[0].clone()]);
    h.posts.add_cursor_ids_for_post_list(&mut before, "", &ids[1], 0, 0, 5).await;
    assert_eq!(before.next_post_id.as_deref(), Some(ids[1].as_str()));
    assert_eq!(before.prev_post_id, None);

    let after = h.posts.get_posts_after_post(&options).await.unwrap();
    assert_eq!(after.order, vec![ids[3].clone(), ids[2].clone()]);

    assert_eq!(
        h.posts.get_post_id_after_time("c2", 2_500).await.unwrap().as_deref(),
        Some(ids[2].as_str())
    );
    assert_eq!(
        h.posts.get_post_id_before_time("c2", 2_500).await.unwrap().as_deref(),
        Some(ids[1].as_str())
    );

    let etag = h.posts.get_posts_etag("c2").await.unwrap();
    assert!(etag.starts_with(env!("CARGO_PKG_VERSION")));
    h.posts.delete_post(&ids[0], "u1").await.unwrap();
    assert_ne!(h.posts.get_posts_etag("c2").await.unwrap(), etag);

    let since = h.posts.get_posts_since("c2", 3_500).await.unwrap();
    assert!(since.posts.contains_key(&ids[0]));

    assert!(h.posts.get_posts_page("c2", usize::MAX, 60).await.unwrap().is_empty());
    let far = postline_backend::reads::PostsOptions::new("c2", &ids[3], usize::MAX, 60);
    assert!(h.posts.get_posts_before_post(&far).await.unwrap().is_empty());
}

#[tokio::test]
async fn unread_window_centres_on_the_first_unread_post() {
    let h = harness();
    let mut ids = Vec::new();
    for (i, at) in [1_000, 2_000, 3_000, 4_000, 5_000].into_iter().enumerate() {
        ids.push(post_at(&h, "c1", at, &format!("m{i}")).await.id);
    }

    let empty = h
        .posts
        .get_posts_for_channel_around_last_unread("c1", "u2", 1, 2)
        .await
        .unwrap();
    assert!(empty.is_empty());

    h.db.with_repositories(|repos| {
        repos.channels().save_member(&ChannelMemberRecord {
            last_viewed_at: 2_500,
            ..member("c1", "u2")
        })
    })
    .unwrap();
    let list = h
        .posts
        .get_posts_for_channel_around_last_unread("c1", "u2", 1, 2)
        .await
        .unwrap();
    assert_eq!(list.order, vec![ids[3].clone(), ids[2].clone(), ids[1].clone()]);

    let missing = h
        .posts
        .get_posts_for_channel_around_last_unread("c2", "u2", 1, 2)
        .await
        .unwrap_err();
    assert!(matches!(missing, PostError::NotFound { .. }));
}

#[tokio::test]
async fn permalinks_join_open_channels_only() {
    let h = harness();
    let open = h.posts.create_post_as_user(draft("c2", "u1", "public")).await.unwrap();
    let private = h.posts.create_post_as_user(draft("c3", "u1", "hidden")).await.unwrap();

    let list = h.posts.get_permalink_post(&open.id, "u2").await.unwrap();
    assert_eq!(list.order, vec![open.id.clone()]);
    let joined = h
        .db
        .with_repositories(|repos| repos.channels().get_member("c2", "u2"))
        .unwrap();
    assert!(joined.is_some());

    let err = h.posts.get_permalink_post(&private.id, "u2").await.unwrap_err();
    assert!(matches!(err, PostError::Forbidden { .. }));
}

#[tokio::test]
async fn flagged_posts_are_scoped() {
    let h = harness();
    let a = h.posts.create_post_as_user(draft("c1", "u1", "a")).await.unwrap();
    let b = h.posts.create_post_as_user(draft("c2", "u1", "b")).await.unwrap();
    h.db.with_repositories(|repos| {
        for id in [&a.id, &b.id] {
            repos.preferences().save(&PreferenceRecord {
                user_id: "u2".into(),
                category: PREFERENCE_CATEGORY_FLAGGED_POST.into(),
                name: id.clone(),
                value: "true".into(),
            })?;
        }
        Ok(())
    })
    .unwrap();

    assert_eq!(h.posts.get_flagged_posts("u2", 0, 10).await.unwrap().len(), 2);
    assert_eq!(h.posts.get_flagged_posts_in_team("u2", "t1", 0, 10).await.unwrap().len(), 2);
    let in_channel = h.posts.get_flagged_posts_in_channel("u2", "c2", 0, 10).await.unwrap();
    assert_eq!(in_channel.order, vec![b.id.clone()]);
}

#[tokio::test]
async fn store_search_merges_terms_and_hashtags() {
    let h = harness();
    let alpha = h.posts.create_post_as_user(draft("c2", "u1", "alpha release")).await.unwrap();
    let ship = h.posts.create_post_as_user(draft("c2", "u1", "time to #ship")).await.unwrap();
    h.posts.create_post_as_user(draft("c2", "u1", "unrelated")).await.unwrap();

    let results = h
        .search
        .search_posts_in_team_for_user("alpha #ship", "u1", "t1", false, false, 0, 0, 20)
        .await
        .unwrap();
    let mut found = results.list.order.clone();
    found.sort();
    let mut expected = vec![alpha.id.clone(), ship.id.clone()];
    expected.sort();
    assert_eq!(found, expected);

    let outsider = h
        .search
        .search_posts_in_team_for_user("alpha", "u2", "t1", false, false, 0, 0, 20)
        .await
        .unwrap();
    assert!(outsider.list.is_empty());
}

#[tokio::test]
async fn store_search_resolves_direct_channel_filters() {
    let h = harness();
    let direct = h.posts.create_post_as_user(draft("dm", "u1", "secretplan for two")).await.unwrap();
    let team = h.posts.create_post_as_user(draft("c2", "u1", "secretplan for the team")).await.unwrap();
    h.settle().await;

    let inside = h
        .search
        .search_posts_in_team_for_user("secretplan in:@u2", "u1", "t1", false, false, 0, 0, 20)
        .await
        .unwrap();
    assert_eq!(inside.list.order, vec![direct.id.clone()]);

    let outside = h
        .search
        .search_posts_in_team_for_user("secretplan -in:@u2", "u1", "t1", false, false, 0, 0, 20)
        .await
        .unwrap();
    assert_eq!(outside.list.order, vec![team.id.clone()]);

    let nobody = h
        .search
        .search_posts_in_team_for_user("secretplan in:@ghost", "u1", "t1", false, false, 0, 0, 20)
        .await
        .unwrap();
    assert!(nobody.list.is_empty());
}

#[tokio::test]
async fn index_search_reports_matches() {
    let search_settings = SearchSettings {
        enable_indexing: true,
        enable_index_search: true,
        ..SearchSettings::default()
    };
    let h = harness_with(PostSettings::default(), search_settings, PluginRegistry::new());
    let hit = h.posts.create_post_as_user(draft("c2", "u1", "deploy finished")).await.unwrap();
    h.posts.create_post_as_user(draft("c1", "u1", "deploy in town")).await.unwrap();
    h.settle().await;
    assert_eq!(h.index.len(), 2);

    let results = h
        .search
        .search_posts_in_team_for_user("deploy in:dev", "u1", "t1", false, false, 0, 0, 20)
        .await
        .unwrap();
    assert_eq!(results.list.order, vec![hit.id.clone()]);
    assert_eq!(results.matches[&hit.id], vec!["deploy".to_string()]);

    h.index.delete_post(&hit.id).unwrap();
    let results = h
        .search
        .search_posts_in_team_for_user("deploy in:dev", "u1", "t1", false, false, 0, 0, 20)
        .await
        .unwrap();
    assert!(results.list.is_empty());
}
