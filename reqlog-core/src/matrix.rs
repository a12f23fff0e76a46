use crate::flags::Flags;
use std::collections::HashMap;
use tracing::debug;

/// Separator between a handler identity and its method name.
pub const KEY_SEPARATOR: &str = "::";

/// Immutable lookup table from routing key to [`Flags`].
///
/// Two independent matrices exist per `SystemLog`: one keyed by
/// `handler::method` for completed dispatches, one keyed by exception type
/// name for errors. Built once at startup and shared read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutingMatrix {
    entries: HashMap<String, Flags>,
}

impl RoutingMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a matrix, normalising every configured key.
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Flags)>,
        K: AsRef<str>,
    {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (normalize_key(k.as_ref()), v))
            .collect();
        Self { entries }
    }

    /// Flags configured for `key`, or [`Flags::STANDARD`] when absent.
    pub fn resolve(&self, key: &str) -> Flags {
        let key = normalize_key(key);
        match self.entries.get(&key) {
            Some(flags) => {
                debug!(key = %key, flags = %flags, "Matrix hit");
                *flags
            }
            None => Flags::STANDARD,
        }
    }

    /// Flags for a completed dispatch of `handler`'s `method`.
    pub fn resolve_dispatch(&self, handler: &str, method: &str) -> Flags {
        self.resolve(&dispatch_key(handler, method))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured keys, normalised.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().map(String::as_str)
    }
}

/// Routing key for a completed dispatch: `handler::method`, with any leading
/// namespace separator removed from the handler identity.
pub fn dispatch_key(handler: &str, method: &str) -> String {
    format!("{}{}{}", strip_namespace_root(handler), KEY_SEPARATOR, method)
}

/// Strip leading `::` (Rust paths) and `\` (backslash-separated namespaces).
fn strip_namespace_root(identity: &str) -> &str {
    let mut s = identity.trim();
    loop {
        let next = s.trim_start_matches('\\').trim_start_matches(KEY_SEPARATOR);
        if next.len() == s.len() {
            return s;
        }
        s = next;
    }
}

fn normalize_key(key: &str) -> String {
    strip_namespace_root(key).replace('\\', KEY_SEPARATOR)
}
