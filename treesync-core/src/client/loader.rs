//! Dependency loading collaborator.

use indexmap::IndexSet;

use crate::protocol::Dependencies;

/// Outcome of starting an eager load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// Everything is available; changes may be applied now.
    Ready,
    /// Loading continues in the background. Message handling stays
    /// suspended until [`MessageHandler::dependencies_loaded`] is called.
    ///
    /// [`MessageHandler::dependencies_loaded`]: super::MessageHandler::dependencies_loaded
    Pending,
}

/// Loads resources named in a message's dependency buckets.
///
/// Implementations load each URL at most once.
pub trait DependencyLoader {
    /// Start loading resources that must be present before changes apply.
    fn load_eager(&mut self, urls: &[String]) -> LoadStatus;

    /// Start loading resources that may arrive after changes apply.
    fn load_lazy(&mut self, urls: &[String]);

    /// Install resources whose contents travel inside the message.
    fn load_inline(&mut self, contents: &[String]);
}

/// Loader that records every resource and reports it available at once.
#[derive(Debug, Default)]
pub struct ImmediateLoader {
    loaded: IndexSet<String>,
    inline: Vec<String>,
}

impl ImmediateLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// URLs loaded so far, in first-request order.
    pub fn loaded(&self) -> impl Iterator<Item = &str> {
        self.loaded.iter().map(String::as_str)
    }

    pub fn inline_count(&self) -> usize {
        self.inline.len()
    }

    fn record(&mut self, urls: &[String]) {
        for url in urls {
            if self.loaded.insert(url.clone()) {
                tracing::debug!(url = %url, "loading dependency");
            }
        }
    }
}

impl DependencyLoader for ImmediateLoader {
    fn load_eager(&mut self, urls: &[String]) -> LoadStatus {
        self.record(urls);
        LoadStatus::Ready
    }

    fn load_lazy(&mut self, urls: &[String]) {
        self.record(urls);
    }

    fn load_inline(&mut self, contents: &[String]) {
        self.inline.extend(contents.iter().cloned());
    }
}

/// Hand a message's buckets to `loader` in eager, inline, lazy order.
///
/// Returns [`LoadStatus::Pending`] when eager resources are still loading;
/// lazy resources are requested only once the eager ones are available.
pub(crate) fn load_before_apply(
    loader: &mut dyn DependencyLoader,
    dependencies: &Dependencies,
) -> LoadStatus {
    if !dependencies.inline.is_empty() {
        loader.load_inline(&dependencies.inline);
    }
    if dependencies.eager.is_empty() {
        return LoadStatus::Ready;
    }
    loader.load_eager(&dependencies.eager)
}
