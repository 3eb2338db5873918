mod channels;
mod files;
mod posts;
mod preferences;
mod search;
mod teams;
mod users;
mod webhooks;

use super::models::{
    ChannelMemberRecord, ChannelRecord, FileInfoRecord, OutgoingWebhookRecord, PreferenceRecord,
    TeamRecord, UserRecord,
};
use crate::model::{Post, PostList, SearchParams};
use anyhow::Result;
use rusqlite::Connection;

pub use search::PostSearcher;

pub trait PostRepository {
    /// Inserts a post that already carries its id and timestamps.
    fn save(&self, post: &Post) -> Result<()>;
    /// Replaces every column of an existing row without version checks.
    fn overwrite(&self, post: &Post) -> Result<()>;
    /// Writes `new` only if the stored row still has `old.update_at`, and
    /// keeps `old` as a deleted history row. Returns false on a lost race.
    fn update(&self, new: &Post, old: &Post) -> Result<bool>;
    /// Soft-deletes the post and its replies.
    fn delete(&self, post_id: &str, delete_at: i64, deleted_by: &str) -> Result<()>;
    /// Any row with this id, deleted or not.
    fn get(&self, id: &str) -> Result<Option<Post>>;
    /// The live root and replies of the thread `id` belongs to.
    fn get_thread(&self, id: &str) -> Result<PostList>;
    fn get_many(&self, ids: &[String]) -> Result<Vec<Post>>;
    fn list_for_channel(&self, channel_id: &str, offset: usize, limit: usize) -> Result<PostList>;
    /// Posts touched after `since`, deletions included.
    fn list_since(&self, channel_id: &str, since: i64) -> Result<PostList>;
    fn list_before(&self, channel_id: &str, post_id: &str, offset: usize, limit: usize) -> Result<PostList>;
    fn list_after(&self, channel_id: &str, post_id: &str, offset: usize, limit: usize) -> Result<PostList>;
    fn id_after_time(&self, channel_id: &str, time: i64) -> Result<Option<String>>;
    fn id_before_time(&self, channel_id: &str, time: i64) -> Result<Option<String>>;
    fn last_update_at(&self, channel_id: &str) -> Result<i64>;
    /// Live posts with their channel's team, oldest first, for index backfill.
    fn list_indexable(&self, offset: usize, limit: usize) -> Result<Vec<(Post, String)>>;
    fn flagged(
        &self,
        user_id: &str,
        team_id: Option<&str>,
        channel_id: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> Result<PostList>;
}

pub trait ChannelRepository {
    fn save(&self, record: &ChannelRecord) -> Result<()>;
    fn get(&self, id: &str) -> Result<Option<ChannelRecord>>;
    fn get_by_name(&self, team_id: &str, name: &str, include_deleted: bool) -> Result<Option<ChannelRecord>>;
    fn get_by_names(&self, team_id: &str, names: &[String]) -> Result<Vec<ChannelRecord>>;
    /// Channels the user belongs to within the team, plus their direct and
    /// group channels.
    fn list_for_user(&self, team_id: &str, user_id: &str, include_deleted: bool) -> Result<Vec<ChannelRecord>>;
    fn save_member(&self, record: &ChannelMemberRecord) -> Result<()>;
    fn get_member(&self, channel_id: &str, user_id: &str) -> Result<Option<ChannelMemberRecord>>;
    fn member_ids(&self, channel_id: &str) -> Result<Vec<String>>;
    fn mark_viewed(&self, channel_ids: &[String], user_id: &str, at: i64) -> Result<usize>;
}

pub trait UserRepository {
    fn save(&self, record: &UserRecord) -> Result<()>;
    fn get(&self, id: &str) -> Result<Option<UserRecord>>;
    fn get_by_username(&self, username: &str) -> Result<Option<UserRecord>>;
    fn get_by_usernames(&self, usernames: &[String]) -> Result<Vec<UserRecord>>;
}

pub trait TeamRepository {
    fn save(&self, record: &TeamRecord) -> Result<()>;
    fn get(&self, id: &str) -> Result<Option<TeamRecord>>;
}

pub trait FileRepository {
    fn save(&self, record: &FileInfoRecord) -> Result<()>;
    fn get(&self, id: &str) -> Result<Option<FileInfoRecord>>;
    /// Claims an unattached upload for `post_id`. Fails when the file is
    /// missing, owned by someone else, or already attached.
    fn attach_to_post(&self, file_id: &str, post_id: &str, creator_id: &str) -> Result<()>;
    fn list_for_post(&self, post_id: &str) -> Result<Vec<FileInfoRecord>>;
    fn delete_for_post(&self, post_id: &str, delete_at: i64) -> Result<usize>;
}

pub trait PreferenceRepository {
    fn save(&self, record: &PreferenceRecord) -> Result<()>;
    fn get(&self, user_id: &str, category: &str, name: &str) -> Result<Option<PreferenceRecord>>;
    fn list_category(&self, user_id: &str, category: &str) -> Result<Vec<PreferenceRecord>>;
    /// Removes the preference for every user.
    fn delete_category_and_name(&self, category: &str, name: &str) -> Result<usize>;
}

pub trait WebhookRepository {
    fn save(&self, record: &OutgoingWebhookRecord) -> Result<()>;
    fn list_for_team(&self, team_id: &str) -> Result<Vec<OutgoingWebhookRecord>>;
}

pub struct SqliteRepositories<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRepositories<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn posts(&self) -> impl PostRepository + '_ {
        posts::SqlitePostRepository { conn: self.conn }
    }

    pub fn channels(&self) -> impl ChannelRepository + '_ {
        channels::SqliteChannelRepository { conn: self.conn }
    }

    pub fn users(&self) -> impl UserRepository + '_ {
        users::SqliteUserRepository { conn: self.conn }
    }

    pub fn teams(&self) -> impl TeamRepository + '_ {
        teams::SqliteTeamRepository { conn: self.conn }
    }

    pub fn files(&self) -> impl FileRepository + '_ {
        files::SqliteFileRepository { conn: self.conn }
    }

    pub fn preferences(&self) -> impl PreferenceRepository + '_ {
        preferences::SqlitePreferenceRepository { conn: self.conn }
    }

    pub fn webhooks(&self) -> impl WebhookRepository + '_ {
        webhooks::SqliteWebhookRepository { conn: self.conn }
    }

    pub fn search(&self, team_id: &str, user_id: &str, params: &SearchParams) -> Result<PostList> {
        search::search_posts(self.conn, team_id, user_id, params)
    }

    pub fn conn(&self) -> &'conn Connection {
        self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{ChannelType, PREFERENCE_CATEGORY_FLAGGED_POST};
    use crate::database::Database;

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

    fn user(id: &str) -> UserRecord {
        UserRecord {
            id: id.into(),
            username: format!("{id}-name"),
            locale: "en".into(),
            roles: "system_user".into(),
            is_bot: false,
            auto_responder_active: false,
            auto_responder_message: None,
        }
    }

    fn post(id: &str, channel_id: &str, create_at: i64, message: &str) -> Post {
        Post {
            id: id.into(),
            channel_id: channel_id.into(),
            user_id: "u1".into(),
            create_at,
            update_at: create_at,
            message: message.into(),
            ..Default::default()
        }
    }

    fn seeded() -> Database {
        let db = Database::in_memory().expect("db");
        db.with_repositories(|repos| {
            repos.teams().save(&TeamRecord {
                id: "t1".into(),
                name: "core".into(),
                display_name: "Core".into(),
            })?;
            repos.users().save(&user("u1"))?;
            repos.users().save(&user("u2"))?;
            repos.channels().save(&channel("c1", "t1", "town-square", ChannelType::Open))?;
            repos.channels().save(&channel("c2", "t1", "secret", ChannelType::Private))?;
            repos.channels().save_member(&ChannelMemberRecord {
                channel_id: "c1".into(),
                user_id: "u1".into(),
                last_viewed_at: 0,
            })?;
            Ok(())
        })
        .expect("seed");
        db
    }

    #[test]
    fn post_round_trip_and_thread() {
        let db = seeded();
        db.with_repositories(|repos| {
            let posts = repos.posts();
            posts.save(&post("root", "c1", 10, "root message"))?;
            let mut reply = post("reply", "c1", 20, "a reply");
            reply.root_id = Some("root".into());
            reply.parent_id = Some("root".into());
            reply.file_ids = vec!["f1".into()];
            reply.add_prop("k", "v");
            posts.save(&reply)?;
            posts.save(&post("other", "c1", 30, "unrelated"))?;

            let fetched = posts.get("reply")?.expect("reply");
            assert_eq!(fetched, reply);

            let thread = posts.get_thread("reply")?;
            assert_eq!(thread.order, vec!["reply", "root"]);
            assert!(posts.get_thread("missing")?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn update_is_compare_and_swap_and_keeps_history() {
        let db = seeded();
        db.with_repositories(|repos| {
            let posts = repos.posts();
            let old = post("p1", "c1", 10, "before");
            posts.save(&old)?;

            let mut new = old.clone();
            new.message = "after".into();
            new.update_at = 20;
            assert!(posts.update(&new, &old)?);

            // The stored update_at moved on, so a second writer loses.
            let mut late = old.clone();
            late.message = "late".into();
            late.update_at = 25;
            assert!(!posts.update(&late, &old)?);

            assert_eq!(posts.get("p1")?.unwrap().message, "after");
            let history: Vec<Post> = {
                let mut stmt = repos
                    .conn()
                    .prepare("SELECT id FROM posts WHERE original_id = 'p1'")?;
                let ids = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                posts.get_many(&ids)?
            };
            assert_eq!(history.len(), 1);
            assert_eq!(history[0].message, "before");
            assert_eq!(history[0].delete_at, 20);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn delete_cascades_to_replies() {
        let db = seeded();
        db.with_repositories(|repos| {
            let posts = repos.posts();
            posts.save(&post("root", "c1", 10, "root"))?;
            let mut reply = post("reply", "c1", 20, "reply");
            reply.root_id = Some("root".into());
            posts.save(&reply)?;

            posts.delete("root", 99, "u2")?;
            let root = posts.get("root")?.unwrap();
            assert_eq!(root.delete_at, 99);
            assert_eq!(root.props.get("deleteBy").and_then(|v| v.as_str()), Some("u2"));
            assert_eq!(posts.get("reply")?.unwrap().delete_at, 99);
            assert!(posts.get_thread("root")?.is_empty());

            let since = posts.list_since("c1", 50)?;
            assert_eq!(since.len(), 2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn paging_helpers_walk_the_channel() {
        let db = seeded();
        db.with_repositories(|repos| {
            let posts = repos.posts();
            for (i, id) in ["a", "b", "c", "d"].iter().enumerate() {
                posts.save(&post(id, "c1", (i as i64 + 1) * 10, id))?;
            }
            assert_eq!(posts.list_for_channel("c1", 0, 2)?.order, vec!["d", "c"]);
            assert_eq!(posts.list_for_channel("c1", 2, 2)?.order, vec!["b", "a"]);
            assert!(posts.list_for_channel("c1", usize::MAX, usize::MAX)?.is_empty());
            assert_eq!(posts.list_before("c1", "c", 0, 10)?.order, vec!["b", "a"]);
            assert_eq!(posts.list_after("c1", "b", 0, 10)?.order, vec!["d", "c"]);
            assert_eq!(posts.id_after_time("c1", 20)?, Some("c".into()));
            assert_eq!(posts.id_before_time("c1", 20)?, Some("a".into()));
            assert_eq!(posts.id_after_time("c1", 40)?, None);
            assert_eq!(posts.last_update_at("c1")?, 40);
            assert_eq!(posts.last_update_at("c2")?, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn flagged_posts_filter_by_channel_and_team() {
        let db = seeded();
        db.with_repositories(|repos| {
            let posts = repos.posts();
            posts.save(&post("p1", "c1", 10, "one"))?;
            posts.save(&post("p2", "c2", 20, "two"))?;
            for id in ["p1", "p2"] {
                repos.preferences().save(&PreferenceRecord {
                    user_id: "u1".into(),
                    category: PREFERENCE_CATEGORY_FLAGGED_POST.into(),
                    name: id.into(),
                    value: "true".into(),
                })?;
            }
            assert_eq!(posts.flagged("u1", None, None, 0, 10)?.order, vec!["p2", "p1"]);
            assert_eq!(posts.flagged("u1", None, Some("c1"), 0, 10)?.order, vec!["p1"]);
            assert_eq!(posts.flagged("u1", Some("t1"), None, 0, 10)?.len(), 2);
            assert!(posts.flagged("u2", None, None, 0, 10)?.is_empty());

            assert_eq!(repos.preferences().delete_category_and_name(PREFERENCE_CATEGORY_FLAGGED_POST, "p1")?, 1);
            assert_eq!(posts.flagged("u1", None, None, 0, 10)?.order, vec!["p2"]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn files_attach_once_to_their_creator() {
        let db = seeded();
        db.with_repositories(|repos| {
            let files = repos.files();
            files.save(&FileInfoRecord {
                id: "f1".into(),
                creator_id: "u1".into(),
                post_id: None,
                name: "notes.txt".into(),
                size_bytes: 12,
                delete_at: 0,
            })?;
            assert!(files.attach_to_post("f1", "p1", "u2").is_err());
            files.attach_to_post("f1", "p1", "u1")?;
            assert!(files.attach_to_post("f1", "p2", "u1").is_err());
            assert!(files.attach_to_post("missing", "p1", "u1").is_err());
            assert_eq!(files.list_for_post("p1")?.len(), 1);
            assert_eq!(files.delete_for_post("p1", 5)?, 1);
            assert!(files.list_for_post("p1")?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn channels_resolve_for_members() {
        let db = seeded();
        db.with_repositories(|repos| {
            let channels = repos.channels();
            let dm = channel(
                "dm1",
                "",
                &crate::database::models::direct_channel_name("u2", "u1"),
                ChannelType::Direct,
            );
            channels.save(&dm)?;
            channels.save_member(&ChannelMemberRecord {
                channel_id: "dm1".into(),
                user_id: "u1".into(),
                last_viewed_at: 0,
            })?;

            let visible: Vec<String> = channels
                .list_for_user("t1", "u1", false)?
                .into_iter()
                .map(|c| c.id)
                .collect();
            assert!(visible.contains(&"c1".to_string()));
            assert!(visible.contains(&"dm1".to_string()));
            assert!(!visible.contains(&"c2".to_string()));

            assert_eq!(channels.get_by_name("t1", "town-square", false)?.unwrap().id, "c1");
            assert_eq!(channels.get_by_names("t1", &["secret".into(), "nope".into()])?.len(), 1);
            assert_eq!(channels.mark_viewed(&["c1".into()], "u1", 77)?, 1);
            assert_eq!(channels.get_member("c1", "u1")?.unwrap().last_viewed_at, 77);
            assert_eq!(channels.member_ids("dm1")?, vec!["u1"]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn users_and_webhooks_round_trip() {
        let db = seeded();
        db.with_repositories(|repos| {
            assert_eq!(repos.users().get_by_username("u2-name")?.unwrap().id, "u2");
            assert_eq!(
                repos.users().get_by_usernames(&["u1-name".into(), "ghost".into()])?.len(),
                1
            );
            let hook = OutgoingWebhookRecord {
                id: "h1".into(),
                team_id: "t1".into(),
                channel_id: None,
                trigger_words: vec!["deploy".into()],
                trigger_on_prefix: false,
                callback_urls: vec!["http://localhost:9/hook".into()],
            };
            repos.webhooks().save(&hook)?;
            assert_eq!(repos.webhooks().list_for_team("t1")?, vec![hook]);
            assert_eq!(repos.teams().get("t1")?.unwrap().name, "core");
            Ok(())
        })
        .unwrap();
    }
}
