use crate::{
    http::types::Method,
    router::middleware::{HandlerFn, Middleware},
};
use std::{collections::HashMap, sync::Arc};

/// A trie node: static children keyed by literal segment, at most one
/// dynamic child (`:name`) per depth, and at most one wildcard child
/// (`*`) per depth. Lookup prefers static, then dynamic, then
/// wildcard, backtracking across siblings if a deeper match fails.
#[derive(Default)]
pub(crate) struct RouterNode {
    static_children: HashMap<String, RouterNode>,
    dynamic_child: Option<(String, Box<RouterNode>)>,
    wildcard_child: Option<Box<RouterNode>>,
    handlers: HashMap<Method, HandlerFn>,
    /// Fallback handler registered via `ALL`, used when no method-specific
    /// handler exists at this node.
    all_handler: Option<HandlerFn>,
    middleware: Vec<Arc<dyn Middleware>>,
    /// Set on the node reached by descending a `mount()` prefix. Lookup
    /// records the text actually consumed to reach such a node as the
    /// matched request's base URL.
    is_mount_point: bool,
}

/// `(handler, path params leaf-to-root, middleware root-to-leaf, base_url)`.
pub(crate) type MatchedRoute = (HandlerFn, Vec<(String, String)>, Vec<Arc<dyn Middleware>>, String);

impl RouterNode {
    pub(crate) fn insert(&mut self, segments: &[&str], method: Method, handler: HandlerFn) {
        self.descend(segments).handlers.insert(method, handler);
    }

    /// Registers `handler` as the fallback for any method that has no
    /// method-specific handler at this route (spec's `ALL` token).
    pub(crate) fn insert_all(&mut self, segments: &[&str], handler: HandlerFn) {
        self.descend(segments).all_handler = Some(handler);
    }

    /// Walks (creating as needed) the child chain for `segments`,
    /// honoring the same static/`:name`/`*` precedence as `insert()`.
    /// Shared by `insert`/`insert_all` and `mount()` so a parameterized
    /// or wildcard segment anywhere in a path -- including a mount
    /// prefix -- is always bound as a path param, never a literal.
    fn descend(&mut self, segments: &[&str]) -> &mut RouterNode {
        match segments.split_first() {
            None => self,
            Some((seg, rest)) if seg.starts_with(':') => {
                let name = seg[1..].to_string();
                if let Some((existing, _)) = &self.dynamic_child {
                    debug_assert_eq!(
                        *existing, name,
                        "conflicting dynamic segment name at the same depth"
                    );
                }
                self.dynamic_child
                    .get_or_insert_with(|| (name, Box::new(RouterNode::default())))
                    .1
                    .descend(rest)
            }
            Some((seg, rest)) if *seg == "*" => self
                .wildcard_child
                .get_or_insert_with(|| Box::new(RouterNode::default()))
                .descend(rest),
            Some((seg, rest)) => self
                .static_children
                .entry((*seg).to_string())
                .or_default()
                .descend(rest),
        }
    }

    /// Grafts `sub`'s entire route tree under `prefix`, for mounting a
    /// sub-router at a path. `prefix` may itself contain `:name`
    /// segments, bound the same way a registered route would bind them.
    pub(crate) fn mount(&mut self, prefix: &[&str], sub: RouterNode) {
        let node = self.descend(prefix);
        node.is_mount_point = true;
        node.merge_in_place(&sub);
    }

    /// Recursively folds `other`'s handlers, middleware and children
    /// into `self`, cloning only the `Arc`-backed leaf values. Used to
    /// graft a mounted sub-router without ever dropping routes nested
    /// under a segment that collides with an existing sibling.
    fn merge_in_place(&mut self, other: &RouterNode) {
        for (method, handler) in &other.handlers {
            self.handlers.insert(method.clone(), handler.clone());
        }
        if let Some(all_handler) = &other.all_handler {
            self.all_handler = Some(all_handler.clone());
        }
        self.middleware.extend(other.middleware.iter().cloned());

        for (seg, node) in &other.static_children {
            self.static_children
                .entry(seg.clone())
                .or_default()
                .merge_in_place(node);
        }
        if let Some((name, node)) = &other.dynamic_child {
            self.dynamic_child
                .get_or_insert_with(|| (name.clone(), Box::new(RouterNode::default())))
                .1
                .merge_in_place(node);
        }
        if let Some(node) = &other.wildcard_child {
            self.wildcard_child
                .get_or_insert_with(|| Box::new(RouterNode::default()))
                .merge_in_place(node);
        }
    }

    pub(crate) fn use_middleware(&mut self, mw: Arc<dyn Middleware>) {
        self.middleware.push(mw);
    }

    /// Matches `segments` starting at this node. On success, path
    /// parameters are returned leaf-to-root; callers reverse them.
    pub(crate) fn lookup(&self, segments: &[&str], method: &Method) -> Option<MatchedRoute> {
        let mut consumed = Vec::new();
        let mut base_url = None;
        let (handler, params, middleware) = self.lookup_inner(segments, method, &mut consumed, &mut base_url)?;
        Some((handler, params, middleware, base_url.unwrap_or_default()))
    }

    fn lookup_inner(
        &self,
        segments: &[&str],
        method: &Method,
        consumed: &mut Vec<String>,
        base_url: &mut Option<String>,
    ) -> Option<(HandlerFn, Vec<(String, String)>, Vec<Arc<dyn Middleware>>)> {
        if self.is_mount_point {
            *base_url = Some(format!("/{}", consumed.join("/")));
        }

        match segments.split_first() {
            None => {
                let handler = self.handlers.get(method).or(self.all_handler.as_ref())?.clone();
                Some((handler, Vec::new(), self.middleware.clone()))
            }
            Some((seg, rest)) => {
                if let Some(child) = self.static_children.get(*seg) {
                    let saved_base_url = base_url.clone();
                    consumed.push((*seg).to_string());
                    let found = child.lookup_inner(rest, method, consumed, base_url);
                    consumed.pop();
                    match found {
                        Some((handler, params, mut mw)) => {
                            return Some((handler, params, self.prepend_middleware(&mut mw)));
                        }
                        None => *base_url = saved_base_url,
                    }
                }
                if let Some((name, child)) = &self.dynamic_child {
                    let saved_base_url = base_url.clone();
                    consumed.push((*seg).to_string());
                    let found = child.lookup_inner(rest, method, consumed, base_url);
                    consumed.pop();
                    match found {
                        Some((handler, mut params, mut mw)) => {
                            params.push((name.clone(), (*seg).to_string()));
                            return Some((handler, params, self.prepend_middleware(&mut mw)));
                        }
                        None => *base_url = saved_base_url,
                    }
                }
                if let Some(child) = &self.wildcard_child {
                    let handler = child.handlers.get(method).or(child.all_handler.as_ref())?.clone();
                    let mut mw = child.middleware.clone();
                    return Some((
                        handler,
                        vec![("*".to_string(), segments.join("/"))],
                        self.prepend_middleware(&mut mw),
                    ));
                }
                None
            }
        }
    }

    fn prepend_middleware(&self, tail: &mut Vec<Arc<dyn Middleware>>) -> Vec<Arc<dyn Middleware>> {
        let mut combined = self.middleware.clone();
        combined.append(tail);
        combined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Response, StatusCode};

    fn ok_handler(tag: &'static str) -> HandlerFn {
        Arc::new(move |_req, resp| resp.status(StatusCode::Ok).body(tag))
    }

    #[test]
    fn static_route_matches_exactly() {
        let mut root = RouterNode::default();
        root.insert(&["users"], Method::Get, ok_handler("users"));

        assert!(root.lookup(&["users"], &Method::Get).is_some());
        assert!(root.lookup(&["users"], &Method::Post).is_none());
        assert!(root.lookup(&["other"], &Method::Get).is_none());
    }

    #[test]
    fn static_beats_dynamic_at_same_depth() {
        let mut root = RouterNode::default();
        root.insert(&["users", "me"], Method::Get, ok_handler("me"));
        root.insert(&["users", ":id"], Method::Get, ok_handler("id"));

        let (_, params, _, _) = root.lookup(&["users", "me"], &Method::Get).unwrap();
        assert!(params.is_empty(), "the static /users/me route should win, not :id");

        let (_, params, _, _) = root.lookup(&["users", "42"], &Method::Get).unwrap();
        assert_eq!(params, vec![("id".to_string(), "42".to_string())]);
    }

    #[test]
    fn dynamic_beats_wildcard() {
        let mut root = RouterNode::default();
        root.insert(&["a", ":b"], Method::Get, ok_handler("dyn"));
        root.insert(&["a", "*"], Method::Get, ok_handler("wild"));

        let (_, params, _, _) = root.lookup(&["a", "x"], &Method::Get).unwrap();
        assert_eq!(params, vec![("b".to_string(), "x".to_string())]);
    }

    #[test]
    fn wildcard_captures_remaining_segments() {
        let mut root = RouterNode::default();
        root.insert(&["static", "*"], Method::Get, ok_handler("assets"));

        let (_, params, _, _) = root.lookup(&["static", "css", "app.css"], &Method::Get).unwrap();
        assert_eq!(params, vec![("*".to_string(), "css/app.css".to_string())]);
    }

    #[test]
    fn all_token_falls_back_when_no_method_specific_handler() {
        let mut root = RouterNode::default();
        root.insert_all(&["health"], ok_handler("any"));
        root.insert(&["health"], Method::Get, ok_handler("get"));

        assert!(root.lookup(&["health"], &Method::Get).is_some());
        assert!(root.lookup(&["health"], &Method::Post).is_some());
        assert!(root.lookup(&["health"], &Method::Delete).is_some());
    }

    #[test]
    fn mount_grafts_subrouter_under_prefix() {
        let mut sub = RouterNode::default();
        sub.insert(&["ping"], Method::Get, ok_handler("ping"));

        let mut root = RouterNode::default();
        root.mount(&["api", "v1"], sub);

        assert!(root.lookup(&["api", "v1", "ping"], &Method::Get).is_some());
    }

    #[test]
    fn mount_binds_parameterized_prefix_segments() {
        let mut sub = RouterNode::default();
        sub.insert(&["ping"], Method::Get, ok_handler("ping"));

        let mut root = RouterNode::default();
        root.mount(&["tenant", ":id"], sub);

        let (_, params, _, _) = root.lookup(&["tenant", "42", "ping"], &Method::Get).unwrap();
        assert_eq!(params, vec![("id".to_string(), "42".to_string())]);
    }

    #[test]
    fn mount_rewrites_base_url_to_the_traversed_prefix() {
        let mut sub = RouterNode::default();
        sub.insert(&["ping"], Method::Get, ok_handler("ping"));

        let mut root = RouterNode::default();
        root.mount(&["api", "v1"], sub);

        let (_, _, _, base_url) = root.lookup(&["api", "v1", "ping"], &Method::Get).unwrap();
        assert_eq!(base_url, "/api/v1");

        let mut root_unmounted = RouterNode::default();
        root_unmounted.insert(&["ping"], Method::Get, ok_handler("ping"));
        let (_, _, _, base_url) = root_unmounted.lookup(&["ping"], &Method::Get).unwrap();
        assert_eq!(base_url, "");
    }

    #[test]
    fn merge_preserves_nested_routes_on_sibling_collision() {
        let mut existing = RouterNode::default();
        existing.insert(&["api", "status"], Method::Get, ok_handler("status"));

        let mut mounted = RouterNode::default();
        mounted.insert(&["api", "users", "list"], Method::Get, ok_handler("list"));

        existing.mount(&[], mounted);

        assert!(existing.lookup(&["api", "status"], &Method::Get).is_some());
        assert!(existing.lookup(&["api", "users", "list"], &Method::Get).is_some());
    }

    #[test]
    fn middleware_is_collected_root_to_leaf() {
        use crate::router::middleware::{Middleware, Next};
        use crate::{Handled, Request};
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct Tag(Arc<AtomicUsize>, usize);
        impl Middleware for Tag {
            fn handle(&self, req: &Request, resp: &mut Response, next: Next<'_>) -> Handled {
                self.0.store(self.1, Ordering::SeqCst);
                next.call(req, resp)
            }
        }

        let order = Arc::new(AtomicUsize::new(0));
        let mut leaf = RouterNode::default();
        leaf.use_middleware(Arc::new(Tag(order.clone(), 2)));
        leaf.insert(&[], Method::Get, ok_handler("leaf"));

        let mut root = RouterNode::default();
        root.use_middleware(Arc::new(Tag(order.clone(), 1)));
        root.mount(&["nested"], leaf);

        let (_, _, mw, _) = root.lookup(&["nested"], &Method::Get).unwrap();
        assert_eq!(mw.len(), 2);
    }
}
