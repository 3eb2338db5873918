use crate::model::Post;
use std::sync::Arc;

/// Rejection reason that drops a post silently instead of erroring.
pub const DISMISS_POST_ERROR: &str = "plugin.message_will_be_posted.dismiss_post";

/// Per-request data handed to every hook.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub request_id: String,
    pub user_id: Option<String>,
}

impl HookContext {
    pub fn new(user_id: Option<&str>) -> Self {
        Self {
            request_id: crate::utils::new_id(),
            user_id: user_id.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    Continue,
    Replace(Post),
    Reject(String),
}

/// Extension points around post writes. Every method defaults to a no-op.
pub trait PostHooks: Send + Sync {
    fn name(&self) -> &str {
        "unnamed"
    }

    fn message_will_be_posted(&self, _ctx: &HookContext, _post: &Post) -> HookOutcome {
        HookOutcome::Continue
    }

    fn message_has_been_posted(&self, _ctx: &HookContext, _post: &Post) {}

    fn message_will_be_updated(&self, _ctx: &HookContext, _new: &Post, _old: &Post) -> HookOutcome {
        HookOutcome::Continue
    }

    fn message_has_been_updated(&self, _ctx: &HookContext, _new: &Post, _old: &Post) {}
}

/// Result of running a pre-commit chain.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainResult {
    Accepted(Post),
    Rejected(String),
}

#[derive(Clone, Default)]
pub struct PluginRegistry {
    hooks: Vec<Arc<dyn PostHooks>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hooks: Arc<dyn PostHooks>) {
        tracing::debug!(plugin = hooks.name(), "registered post hooks");
        self.hooks.push(hooks);
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn run_will_be_posted(&self, ctx: &HookContext, post: Post) -> ChainResult {
        self.run_chain(post, |hooks, current| hooks.message_will_be_posted(ctx, current))
    }

    pub fn run_will_be_updated(&self, ctx: &HookContext, new: Post, old: &Post) -> ChainResult {
        self.run_chain(new, |hooks, current| {
            hooks.message_will_be_updated(ctx, current, old)
        })
    }

    pub fn run_has_been_posted(&self, ctx: &HookContext, post: &Post) {
        for hooks in &self.hooks {
            hooks.message_has_been_posted(ctx, post);
        }
    }

    pub fn run_has_been_updated(&self, ctx: &HookContext, new: &Post, old: &Post) {
        for hooks in &self.hooks {
            hooks.message_has_been_updated(ctx, new, old);
        }
    }

    fn run_chain<F>(&self, mut post: Post, mut call: F) -> ChainResult
    where
        F: FnMut(&dyn PostHooks, &Post) -> HookOutcome,
    {
        for hooks in &self.hooks {
            match call(hooks.as_ref(), &post) {
                HookOutcome::Continue => {}
                HookOutcome::Replace(replacement) => post = replacement,
                HookOutcome::Reject(reason) => {
                    tracing::debug!(plugin = hooks.name(), %reason, "post rejected by hook");
                    return ChainResult::Rejected(reason);
                }
            }
        }
        ChainResult::Accepted(post)
    }
}
