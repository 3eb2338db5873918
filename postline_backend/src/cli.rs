use crate::bootstrap::{DEFAULT_CHANNEL_ID, DEFAULT_TEAM_ID, LOCAL_ADMIN_ID};
use crate::model::{Post, PostList};
use crate::node::NodeSnapshot;
use crate::posting::PostService;
use crate::search::SearchService;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Interactive shell over the post services, acting as one local user.
pub async fn run_cli(snapshot: NodeSnapshot) -> Result<()> {
    let mut session = CliSession {
        posts: snapshot.posts,
        search: snapshot.search,
        user_id: LOCAL_ADMIN_ID.to_string(),
        team_id: DEFAULT_TEAM_ID.to_string(),
        channel_id: DEFAULT_CHANNEL_ID.to_string(),
        seen: HashSet::new(),
    };

    println!("Postline CLI ready. Type 'help' for a list of commands.");
    println!("Posting as {} in {}", session.user_id, session.channel_id);

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);

    loop {
        print!("postline> ");
        io::stdout().flush()?;

        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            println!("Exiting");
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let tokens = match shell_words::split(trimmed) {
            Ok(tokens) if !tokens.is_empty() => tokens,
            Ok(_) => continue,
            Err(err) => {
                println!("Unable to parse command: {err}");
                continue;
            }
        };

        match session.handle_command(&tokens).await {
            Ok(LoopAction::Continue) => {}
            Ok(LoopAction::Exit) => break,
            Err(err) => println!("Error: {err:#}"),
        }
    }

    session.posts.effects().tasks().wait_idle().await;
    Ok(())
}

struct CliSession {
    posts: PostService,
    search: SearchService,
    user_id: String,
    team_id: String,
    channel_id: String,
    seen: HashSet<String>,
}

enum LoopAction {
    Continue,
    Exit,
}

impl CliSession {
    async fn handle_command(&mut self, tokens: &[String]) -> Result<LoopAction> {
        let args = &tokens[1..];
        match tokens[0].as_str() {
            "help" => self.print_help(),
            "as" => match args.first() {
                Some(user_id) => {
                    self.user_id = user_id.clone();
                    println!("Now acting as {user_id}");
                }
                None => println!("Usage: as <user_id>"),
            },
            "channel" => match args.first() {
                Some(channel_id) => {
                    self.channel_id = channel_id.clone();
                    println!("Switched to channel {channel_id}");
                }
                None => println!("Current channel: {}", self.channel_id),
            },
            "post" => {
                if args.is_empty() {
                    println!("Usage: post MESSAGE");
                } else {
                    self.create(None, args.join(" ")).await?;
                }
            }
            "reply" => {
                if args.len() < 2 {
                    println!("Usage: reply <root_id> MESSAGE");
                } else {
                    self.create(Some(args[0].clone()), args[1..].join(" ")).await?;
                }
            }
            "edit" => {
                if args.len() < 2 {
                    println!("Usage: edit <post_id> MESSAGE");
                } else {
                    let mut post = self.posts.get_single_post(&args[0]).await?;
                    post.message = args[1..].join(" ");
                    let updated = self.posts.update_post(post, true).await?;
                    println!("Edited {}", updated.id);
                }
            }
            "delete" => match args.first() {
                Some(post_id) => {
                    let deleted = self.posts.delete_post(post_id, &self.user_id).await?;
                    println!("Deleted {}", deleted.id);
                }
                None => println!("Usage: delete <post_id>"),
            },
            "thread" => match args.first() {
                Some(post_id) => {
                    let mut thread = self.posts.get_post_thread(post_id).await?;
                    thread.sort_by_create_at();
                    self.print_list(&thread, true);
                }
                None => println!("Usage: thread <post_id>"),
            },
            "recent" => {
                let limit = args.first().and_then(|v| v.parse::<usize>().ok()).unwrap_or(20);
                let list = self.posts.get_posts_page(&self.channel_id, 0, limit).await?;
                self.print_list(&list, true);
            }
            "check" => {
                let list = self.posts.get_posts_page(&self.channel_id, 0, 60).await?;
                let fresh: PostList = list
                    .ordered()
                    .filter(|post| !self.seen.contains(&post.id))
                    .cloned()
                    .collect();
                if fresh.is_empty() {
                    println!("No new messages.");
                } else {
                    self.print_list(&fresh, true);
                }
            }
            "search" => {
                if args.is_empty() {
                    println!("Usage: search TERMS");
                } else {
                    let results = self
                        .search
                        .search_posts_in_team_for_user(&args.join(" "), &self.user_id, &self.team_id, false, false, 0, 0, 20)
                        .await?;
                    if results.list.is_empty() {
                        println!("No matches.");
                    } else {
                        self.print_list(&results.list, false);
                    }
                }
            }
            "exit" | "quit" => return Ok(LoopAction::Exit),
            other => println!("Unknown command '{other}'. Type 'help' for a list of commands."),
        }
        Ok(LoopAction::Continue)
    }

    async fn create(&mut self, root_id: Option<String>, message: String) -> Result<()> {
        let post = Post {
            channel_id: self.channel_id.clone(),
            user_id: self.user_id.clone(),
            root_id,
            message,
            ..Default::default()
        };
        let created = self.posts.create_post_as_user(post).await?;
        self.seen.insert(created.id.clone());
        println!("Posted {}", created.id);
        Ok(())
    }

    fn print_help(&self) {
        println!("Available commands:");
        println!("  help                   Show this help message");
        println!("  as <user_id>           Act as another user");
        println!("  channel [id]           Show or switch the current channel");
        println!("  post MSG               Post to the current channel");
        println!("  reply <root_id> MSG    Reply in a thread");
        println!("  edit <post_id> MSG     Change a post's message");
        println!("  delete <post_id>       Delete a post and its replies");
        println!("  thread <post_id>       Show a whole thread");
        println!("  recent [N]             List recent posts (default 20)");
        println!("  check                  Show posts not seen in this session");
        println!("  search TERMS           Search the current team");
        println!("  exit                   Quit the CLI");
    }

    fn print_list(&mut self, list: &PostList, mark_seen: bool) {
        if list.is_empty() {
            println!("  (no posts)");
            return;
        }
        for post in list.ordered() {
            let at = DateTime::<Utc>::from_timestamp_millis(post.create_at)
                .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            let indent = if post.root().is_some() { "    " } else { "" };
            let edited = if post.edit_at > 0 { " (edited)" } else { "" };
            println!("{indent}[{at}] {} {}: {}{edited}", post.id, post.user_id, post.message);
            if mark_seen {
                self.seen.insert(post.id.clone());
            }
        }
    }
}
