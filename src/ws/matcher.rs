//! Path matching and handler resolution
//!
//! Patterns are `/`-separated segments: a literal segment matches exactly,
//! `{name}` matches one non-empty segment and captures it, and `*` matches
//! whatever remains of the path (including nothing).

use std::collections::HashMap;

use tracing::warn;

use super::{HandlerEntry, HandlerType, WsHandler};

/// Resolves the handler entries that apply to a normalized request path
pub trait HandlerResolver: Send + Sync {
    /// Before-handlers matching the path, in registration order
    fn find_before_handler_entries(&self, path: &str) -> Vec<&HandlerEntry>;

    /// The endpoint handler for the path
    fn find_endpoint_handler_entry(&self, path: &str) -> Option<&HandlerEntry>;

    /// After-handlers matching the path, in registration order
    fn find_after_handler_entries(&self, path: &str) -> Vec<&HandlerEntry>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

/// A compiled path pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Self {
        let segments = split_path(raw)
            .map(|segment| {
                if segment == "*" {
                    Segment::Wildcard
                } else if let Some(name) = segment
                    .strip_prefix('{')
                    .and_then(|rest| rest.strip_suffix('}'))
                {
                    Segment::Param(name.to_string())
                } else {
                    Segment::Literal(segment.to_string())
                }
            })
            .collect();

        Self {
            raw: raw.to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, path: &str) -> bool {
        self.captures(path).is_some()
    }

    /// Captured `{name}` values, or `None` if the path does not match
    pub fn captures(&self, path: &str) -> Option<HashMap<String, String>> {
        let mut parts = split_path(path);
        let mut params = HashMap::new();

        for segment in &self.segments {
            match segment {
                Segment::Wildcard => return Some(params),
                Segment::Literal(literal) => {
                    if parts.next()? != literal.as_str() {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.insert(name.clone(), parts.next()?.to_string());
                }
            }
        }

        match parts.next() {
            Some(_) => None,
            None => Some(params),
        }
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

/// Extract `{name}` values of `pattern` from `path`
pub fn path_params(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    PathPattern::parse(pattern).captures(path)
}

/// Handler registry keyed by resolution tier
///
/// Built before the server starts; read only while dispatching.
#[derive(Debug, Default)]
pub struct WsPathMatcher {
    before: Vec<HandlerEntry>,
    endpoints: Vec<HandlerEntry>,
    after: Vec<HandlerEntry>,
}

impl WsPathMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under the given tier
    pub fn add(&mut self, handler_type: HandlerType, path: &str, handler: WsHandler) {
        if handler.is_empty() {
            warn!(?handler_type, path, "Registered a WebSocket handler without callbacks");
        }
        let entry = HandlerEntry::new(path, handler);
        match handler_type {
            HandlerType::Before => self.before.push(entry),
            HandlerType::Endpoint => self.endpoints.push(entry),
            HandlerType::After => self.after.push(entry),
        }
    }

    /// Register an endpoint handler
    pub fn ws(mut self, path: &str, handler: WsHandler) -> Self {
        self.add(HandlerType::Endpoint, path, handler);
        self
    }

    /// Register a before-handler for matching paths
    pub fn ws_before(mut self, path: &str, handler: WsHandler) -> Self {
        self.add(HandlerType::Before, path, handler);
        self
    }

    /// Register a before-handler for every path
    pub fn ws_before_all(self, handler: WsHandler) -> Self {
        self.ws_before("*", handler)
    }

    /// Register an after-handler for matching paths
    pub fn ws_after(mut self, path: &str, handler: WsHandler) -> Self {
        self.add(HandlerType::After, path, handler);
        self
    }

    /// Register an after-handler for every path
    pub fn ws_after_all(self, handler: WsHandler) -> Self {
        self.ws_after("*", handler)
    }

    /// Number of registered entries for a tier
    pub fn entry_count(&self, handler_type: HandlerType) -> usize {
        match handler_type {
            HandlerType::Before => self.before.len(),
            HandlerType::Endpoint => self.endpoints.len(),
            HandlerType::After => self.after.len(),
        }
    }
}

impl HandlerResolver for WsPathMatcher {
    fn find_before_handler_entries(&self, path: &str) -> Vec<&HandlerEntry> {
        self.before.iter().filter(|e| e.matches(path)).collect()
    }

    fn find_endpoint_handler_entry(&self, path: &str) -> Option<&HandlerEntry> {
        self.endpoints.iter().find(|e| e.matches(path))
    }

    fn find_after_handler_entries(&self, path: &str) -> Vec<&HandlerEntry> {
        self.after.iter().filter(|e| e.matches(path)).collect()
    }
}
