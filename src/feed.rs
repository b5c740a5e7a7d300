use std::time::{Duration, Instant};

use anyhow::Result;

use crate::data::GalleryService;
use crate::error::ActionError;
use crate::gallery::{FeedResponse, Post};

pub const DEFAULT_RESIZE_DEBOUNCE: Duration = Duration::from_millis(250);

/// Number of masonry columns for a viewport width in pixels.
pub fn column_count(viewport_px: u32) -> usize {
    if viewport_px >= 900 {
        4
    } else if viewport_px >= 600 {
        3
    } else {
        2
    }
}

/// Assigns item `i` to column `i % columns`, keeping input order inside each column.
pub fn distribute(count: usize, columns: usize) -> Vec<Vec<usize>> {
    let columns = columns.max(1);
    let mut out = vec![Vec::with_capacity(count / columns + 1); columns];
    for index in 0..count {
        out[index % columns].push(index);
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MasonryLayout {
    pub columns: Vec<Vec<usize>>,
}

impl MasonryLayout {
    pub fn build(count: usize, viewport_px: u32) -> Self {
        Self {
            columns: distribute(count, column_count(viewport_px)),
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Column and row of a post index.
    pub fn position_of(&self, index: usize) -> Option<(usize, usize)> {
        self.columns.iter().enumerate().find_map(|(col, items)| {
            items
                .iter()
                .position(|&item| item == index)
                .map(|row| (col, row))
        })
    }
}

/// Debounced resize listener owned by the feed. Replacing it drops the previous one.
#[derive(Debug)]
pub struct ResizeSubscription {
    id: u64,
    debounce: Duration,
    pending: Option<Instant>,
}

impl ResizeSubscription {
    fn new(id: u64, debounce: Duration) -> Self {
        Self {
            id,
            debounce,
            pending: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending
    }

    fn notify(&mut self, now: Instant) {
        self.pending = Some(now + self.debounce);
    }

    fn take_due(&mut self, now: Instant) -> bool {
        match self.pending {
            Some(deadline) if now >= deadline => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }
}

impl Drop for ResizeSubscription {
    fn drop(&mut self) {
        tracing::trace!(id = self.id, "resize subscription disposed");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedState {
    #[default]
    Idle,
    Loading,
    Ready,
    Empty,
    Failed,
}

#[derive(Debug)]
pub struct Feed {
    posts: Vec<Post>,
    state: FeedState,
    layout: MasonryLayout,
    resize: Option<ResizeSubscription>,
    debounce: Duration,
    next_subscription: u64,
}

impl Default for Feed {
    fn default() -> Self {
        Self::new(DEFAULT_RESIZE_DEBOUNCE)
    }
}

impl Feed {
    pub fn new(debounce: Duration) -> Self {
        Self {
            posts: Vec::new(),
            state: FeedState::Idle,
            layout: MasonryLayout::default(),
            resize: None,
            debounce,
            next_subscription: 1,
        }
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn post(&self, index: usize) -> Option<&Post> {
        self.posts.get(index)
    }

    pub fn find(&self, post_id: &str) -> Option<&Post> {
        self.posts.iter().find(|post| post.post_id == post_id)
    }

    pub fn find_mut(&mut self, post_id: &str) -> Option<&mut Post> {
        self.posts.iter_mut().find(|post| post.post_id == post_id)
    }

    pub fn layout(&self) -> &MasonryLayout {
        &self.layout
    }

    pub fn subscription(&self) -> Option<&ResizeSubscription> {
        self.resize.as_ref()
    }

    /// Shows the loading state and clears whatever was on screen.
    pub fn begin_load(&mut self) {
        self.state = FeedState::Loading;
        self.posts.clear();
        self.layout = MasonryLayout::default();
        self.resize = None;
    }

    pub fn apply_load(
        &mut self,
        result: Result<FeedResponse>,
        viewport_px: u32,
    ) -> Result<(), ActionError> {
        match result {
            Ok(response) if response.success && !response.posts.is_empty() => {
                tracing::info!(posts = response.posts.len(), "feed loaded");
                self.posts = response.posts;
                self.state = FeedState::Ready;
                self.render(viewport_px);
                Ok(())
            }
            Ok(response) => {
                if !response.success {
                    tracing::warn!(error = ?response.error, "feed request unsuccessful");
                }
                self.state = FeedState::Empty;
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %format!("{err:#}"), "error loading feed");
                self.state = FeedState::Failed;
                Err(ActionError::FeedUnavailable {
                    reason: format!("{err:#}"),
                })
            }
        }
    }

    pub fn load(
        &mut self,
        service: &dyn GalleryService,
        viewport_px: u32,
    ) -> Result<(), ActionError> {
        self.begin_load();
        let result = service.load_feed();
        self.apply_load(result, viewport_px)
    }

    /// Lays the cached posts out for `viewport_px` and replaces the resize subscription.
    pub fn render(&mut self, viewport_px: u32) -> &MasonryLayout {
        self.layout = MasonryLayout::build(self.posts.len(), viewport_px);
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.resize = Some(ResizeSubscription::new(id, self.debounce));
        &self.layout
    }

    pub fn on_resize(&mut self, now: Instant) {
        if let Some(subscription) = self.resize.as_mut() {
            subscription.notify(now);
        }
    }

    /// Re-renders once the debounce window after the last resize has elapsed.
    pub fn poll_resize(&mut self, viewport_px: u32, now: Instant) -> bool {
        let due = self
            .resize
            .as_mut()
            .map(|subscription| subscription.take_due(now))
            .unwrap_or(false);
        if due {
            self.render(viewport_px);
        }
        due
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.resize.as_ref().and_then(ResizeSubscription::deadline)
    }
}
