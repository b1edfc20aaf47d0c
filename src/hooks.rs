//! Per-node parse hooks.
//!
//! Hooks fire whenever a url node is newly seen or its title hash changed,
//! before the node is persisted. Ordering is an explicit integer priority
//! with a stable sort at registration time.

use crate::tree::Node;
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

pub type HookFn = fn(&mut Node);

#[derive(Clone)]
pub struct Hook {
    pub name: &'static str,
    /// Lower runs first; ties keep registration order.
    pub priority: i32,
    pub func: HookFn,
}

/// Ordered hook registry. Browser modules select hooks by name through
/// their config.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Vec<Hook>,
}

impl HookRegistry {
    pub fn new() -> Self {
        HookRegistry { hooks: Vec::new() }
    }

    /// Registry preloaded with the built-in hooks.
    pub fn with_defaults() -> Self {
        let mut registry = HookRegistry::new();
        registry.register(Hook {
            name: "title-tags",
            priority: 10,
            func: title_tags,
        });
        registry
    }

    pub fn register(&mut self, hook: Hook) {
        self.hooks.push(hook);
        self.hooks.sort_by_key(|h| h.priority);
    }

    /// Run every registered hook on `node`, in priority order.
    pub fn run(&self, node: &mut Node) {
        for hook in &self.hooks {
            (hook.func)(node);
        }
    }

    /// Run only the hooks named in `names`, in priority order.
    pub fn run_named(&self, names: &[String], node: &mut Node) {
        for hook in &self.hooks {
            if names.iter().any(|n| n == hook.name) {
                (hook.func)(node);
            }
        }
    }
}

/// Extract `#hashtag` tokens from the node title and append them as tags.
pub fn title_tags(node: &mut Node) {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\B#(\w+)").expect("valid tag regex"));

    let mut found = Vec::new();
    for cap in re.captures_iter(&node.name) {
        found.push(cap[1].to_string());
    }

    if !found.is_empty() {
        debug!(title = %node.name, tags = ?found, "extracted tags from title");
        for tag in found {
            node.add_tag(&tag);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_tags_extracts_hashtags() {
        let mut node = Node::url("https://x", "reading list #rust #cli", "");
        title_tags(&mut node);
        assert_eq!(node.tags, ["rust", "cli"]);
    }

    #[test]
    fn title_tags_dedups_against_existing() {
        let mut node = Node::url("https://x", "notes #rust", "");
        node.add_tag("rust");
        title_tags(&mut node);
        assert_eq!(node.tags, ["rust"]);
    }

    #[test]
    fn hooks_run_in_priority_order() {
        fn first(node: &mut Node) {
            node.tags.push("first".into());
        }
        fn second(node: &mut Node) {
            node.tags.push("second".into());
        }

        let mut registry = HookRegistry::new();
        registry.register(Hook {
            name: "second",
            priority: 20,
            func: second,
        });
        registry.register(Hook {
            name: "first",
            priority: 1,
            func: first,
        });

        let mut node = Node::url("https://x", "x", "");
        registry.run(&mut node);
        assert_eq!(node.tags, ["first", "second"]);
    }

    #[test]
    fn run_named_filters() {
        let registry = HookRegistry::with_defaults();
        let mut node = Node::url("https://x", "#tagged", "");
        registry.run_named(&["nonexistent".to_string()], &mut node);
        assert!(node.tags.is_empty());
        registry.run_named(&["title-tags".to_string()], &mut node);
        assert_eq!(node.tags, ["tagged"]);
    }
}
