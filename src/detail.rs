use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;

use crate::data::GalleryService;
use crate::error::{self, Action, ActionError, Notice};
use crate::feed::Feed;
use crate::gallery::{Ack, Comment, CommentAck, CommentKey, Post, Secret, COMMENT_AUTHOR};
use crate::storage::Store;

/// How long the like icon stays enlarged after a confirmed like.
pub const LIKE_PULSE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone)]
pub struct LikeRequest {
    pub post_id: String,
    pub username: String,
}

impl LikeRequest {
    pub fn send(&self, service: &dyn GalleryService) -> Result<Ack> {
        service.add_like(&self.post_id, &self.username)
    }
}

#[derive(Debug, Clone)]
pub struct CommentRequest {
    pub post_id: String,
    pub text: String,
}

impl CommentRequest {
    pub fn send(&self, service: &dyn GalleryService) -> Result<CommentAck> {
        service.add_comment(&self.post_id, COMMENT_AUTHOR, &self.text)
    }
}

#[derive(Debug, Clone)]
pub struct DeleteCommentRequest {
    pub post_id: String,
    pub key: CommentKey,
    pub index: usize,
    pub secret: Secret,
}

impl DeleteCommentRequest {
    pub fn send(&self, service: &dyn GalleryService) -> Result<Ack> {
        service.delete_comment(&self.post_id, &self.key, &self.secret)
    }
}

#[derive(Debug, Clone)]
pub struct DeletePhotoRequest {
    pub post_id: String,
    pub secret: Secret,
}

impl DeletePhotoRequest {
    pub fn send(&self, service: &dyn GalleryService) -> Result<Ack> {
        service.delete_photo(&self.post_id, &self.secret)
    }
}

/// State of the open photo: which post, whether this device liked it, and the
/// comment list as rendered. Everything resets on `open` and `close`.
///
/// Mutations come in three steps: `prepare_*` validates and builds a request,
/// the request is sent, and `apply_*` turns the confirmed response into a state
/// change. Nothing local changes before the server answers.
#[derive(Debug, Default)]
pub struct DetailView {
    post: Option<Post>,
    liked: bool,
    pulse_until: Option<Instant>,
    comment_form: Option<String>,
    selected_comment: usize,
}

impl DetailView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, post: &Post, store: &Store) {
        let liked = store.is_liked(&post.post_id).unwrap_or_else(|err| {
            tracing::warn!(error = %format!("{err:#}"), "could not read liked posts");
            false
        });
        self.post = Some(post.clone());
        self.liked = liked;
        self.pulse_until = None;
        self.comment_form = None;
        self.selected_comment = 0;
    }

    pub fn close(&mut self) {
        self.post = None;
        self.liked = false;
        self.pulse_until = None;
        self.comment_form = None;
        self.selected_comment = 0;
    }

    pub fn is_open(&self) -> bool {
        self.post.is_some()
    }

    pub fn post(&self) -> Option<&Post> {
        self.post.as_ref()
    }

    pub fn post_id(&self) -> Option<&str> {
        self.post.as_ref().map(|post| post.post_id.as_str())
    }

    pub fn is_liked(&self) -> bool {
        self.liked
    }

    pub fn like_count(&self) -> u64 {
        self.post.as_ref().map(|post| post.like_count).unwrap_or(0)
    }

    pub fn is_pulsing(&self, now: Instant) -> bool {
        self.pulse_until.map(|until| now < until).unwrap_or(false)
    }

    pub fn pulse_deadline(&self) -> Option<Instant> {
        self.pulse_until
    }

    pub fn comments(&self) -> &[Comment] {
        self.post
            .as_ref()
            .map(|post| post.comments.as_slice())
            .unwrap_or(&[])
    }

    pub fn selected_comment(&self) -> Option<(usize, &Comment)> {
        let index = self.selected_comment;
        self.comments().get(index).map(|comment| (index, comment))
    }

    pub fn select_next_comment(&mut self) {
        let len = self.comments().len();
        if len > 0 {
            self.selected_comment = (self.selected_comment + 1).min(len - 1);
        }
    }

    pub fn select_previous_comment(&mut self) {
        self.selected_comment = self.selected_comment.saturating_sub(1);
    }

    pub fn open_comment_form(&mut self) {
        if self.is_open() && self.comment_form.is_none() {
            self.comment_form = Some(String::new());
        }
    }

    pub fn cancel_comment(&mut self) {
        self.comment_form = None;
    }

    pub fn comment_input(&self) -> Option<&str> {
        self.comment_form.as_deref()
    }

    pub fn comment_input_mut(&mut self) -> Option<&mut String> {
        self.comment_form.as_mut()
    }

    fn showing(&mut self, post_id: &str) -> Option<&mut Post> {
        self.post.as_mut().filter(|post| post.post_id == post_id)
    }

    pub fn prepare_like(&self) -> Option<LikeRequest> {
        let post = self.post.as_ref()?;
        if self.liked {
            return None;
        }
        Some(LikeRequest {
            post_id: post.post_id.clone(),
            username: like_username(),
        })
    }

    /// Failures are logged only; the like button stays as it was.
    pub fn apply_like(
        &mut self,
        request: &LikeRequest,
        result: Result<Ack>,
        store: &Store,
        feed: &mut Feed,
        now: Instant,
    ) -> Notice {
        match result {
            Ok(ack) if ack.success => {}
            Ok(ack) => {
                tracing::warn!(post_id = %request.post_id, error = ?ack.error, "like not accepted");
                return Notice::Unchanged;
            }
            Err(err) => {
                tracing::error!(post_id = %request.post_id, error = %format!("{err:#}"), "error adding like");
                return Notice::Unchanged;
            }
        }

        if let Err(err) = store.add_liked_post(&request.post_id) {
            tracing::warn!(error = %format!("{err:#}"), "could not persist like");
        }
        if let Some(cached) = feed.find_mut(&request.post_id) {
            cached.like_count += 1;
        }
        if let Some(post) = self.showing(&request.post_id) {
            post.like_count += 1;
            self.liked = true;
            self.pulse_until = Some(now + LIKE_PULSE);
        }
        Notice::Liked
    }

    pub fn like(&mut self, service: &dyn GalleryService, store: &Store, feed: &mut Feed) -> Notice {
        let Some(request) = self.prepare_like() else {
            return Notice::Unchanged;
        };
        let result = request.send(service);
        self.apply_like(&request, result, store, feed, Instant::now())
    }

    pub fn prepare_comment(&self, text: &str) -> Result<Option<CommentRequest>, ActionError> {
        let Some(post) = self.post.as_ref() else {
            return Ok(None);
        };
        let text = text.trim();
        if text.is_empty() {
            return Err(ActionError::Validation("Please enter a comment!"));
        }
        Ok(Some(CommentRequest {
            post_id: post.post_id.clone(),
            text: text.to_string(),
        }))
    }

    pub fn apply_comment(
        &mut self,
        request: &CommentRequest,
        result: Result<CommentAck>,
        feed: &mut Feed,
    ) -> Result<Notice, ActionError> {
        let ack = result.map_err(|err| ActionError::transport(Action::AddComment, &err))?;
        if !ack.success {
            tracing::warn!(error = ?ack.error, "comment not accepted");
            return Err(ActionError::Failed(Action::AddComment));
        }
        let Some(created) = ack.comment else {
            tracing::error!("addComment response is missing the created comment");
            return Err(ActionError::Transport {
                action: Action::AddComment,
                reason: "response missing comment".into(),
            });
        };

        let comment = Comment {
            text: request.text.clone(),
            timestamp: created.timestamp,
            username: COMMENT_AUTHOR.to_string(),
        };
        if let Some(cached) = feed.find_mut(&request.post_id) {
            cached.comments.push(comment.clone());
        }
        if let Some(post) = self.showing(&request.post_id) {
            post.comments.push(comment);
            let last = post.comments.len() - 1;
            self.selected_comment = last;
            self.comment_form = None;
        }
        Ok(Notice::CommentAdded)
    }

    pub fn add_comment(
        &mut self,
        text: &str,
        service: &dyn GalleryService,
        feed: &mut Feed,
    ) -> Result<Notice, ActionError> {
        let Some(request) = self.prepare_comment(text)? else {
            return Ok(Notice::Unchanged);
        };
        let result = request.send(service);
        self.apply_comment(&request, result, feed)
    }

    /// `None` for the secret means the prompt was cancelled.
    pub fn prepare_delete_comment(
        &self,
        secret: Option<Secret>,
        timestamp: &str,
        index: usize,
        feed: &Feed,
    ) -> Result<Option<DeleteCommentRequest>, ActionError> {
        let Some(post) = self.post.as_ref() else {
            return Ok(None);
        };
        let Some(secret) = secret else {
            return Ok(None);
        };
        let cached = feed
            .find(&post.post_id)
            .and_then(|cached| cached.comments.get(index));
        if cached.is_none() {
            return Err(ActionError::NotFound("Comment not found"));
        }
        Ok(Some(DeleteCommentRequest {
            post_id: post.post_id.clone(),
            key: CommentKey::for_timestamp(timestamp),
            index,
            secret,
        }))
    }

    pub fn apply_delete_comment(
        &mut self,
        request: &DeleteCommentRequest,
        result: Result<Ack>,
        feed: &mut Feed,
    ) -> Result<Notice, ActionError> {
        error::settle(Action::DeleteComment, result)?;

        if let Some(cached) = feed.find_mut(&request.post_id) {
            if request.index < cached.comments.len() {
                cached.comments.remove(request.index);
            }
        }
        if let Some(post) = self.showing(&request.post_id) {
            if request.index < post.comments.len() {
                post.comments.remove(request.index);
            }
            let len = post.comments.len();
            self.selected_comment = self.selected_comment.min(len.saturating_sub(1));
        }
        Ok(Notice::CommentDeleted)
    }

    pub fn delete_comment(
        &mut self,
        secret: Option<Secret>,
        timestamp: &str,
        index: usize,
        service: &dyn GalleryService,
        feed: &mut Feed,
    ) -> Result<Notice, ActionError> {
        let Some(request) = self.prepare_delete_comment(secret, timestamp, index, feed)? else {
            return Ok(Notice::Unchanged);
        };
        let result = request.send(service);
        self.apply_delete_comment(&request, result, feed)
    }

    pub fn prepare_delete_photo(
        &self,
        secret: Option<Secret>,
        confirmed: bool,
    ) -> Option<DeletePhotoRequest> {
        let post = self.post.as_ref()?;
        let secret = secret?;
        if !confirmed {
            return None;
        }
        Some(DeletePhotoRequest {
            post_id: post.post_id.clone(),
            secret,
        })
    }

    pub fn apply_delete_photo(
        &mut self,
        request: &DeletePhotoRequest,
        result: Result<Ack>,
    ) -> Result<Notice, ActionError> {
        error::settle(Action::DeletePhoto, result)?;
        if self.post_id() == Some(request.post_id.as_str()) {
            self.close();
        }
        Ok(Notice::PhotoDeleted)
    }

    pub fn delete_photo(
        &mut self,
        secret: Option<Secret>,
        confirmed: bool,
        service: &dyn GalleryService,
    ) -> Result<Notice, ActionError> {
        let Some(request) = self.prepare_delete_photo(secret, confirmed) else {
            return Ok(Notice::Unchanged);
        };
        let result = request.send(service);
        self.apply_delete_photo(&request, result)
    }
}

// One username per click so the API records every like separately.
fn like_username() -> String {
    format!("{COMMENT_AUTHOR}{}", Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MockGalleryService;
    use crate::gallery::INVALID_PASSWORD;
    use crate::storage::{self, Store};
    use anyhow::anyhow;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: Store,
        service: MockGalleryService,
        feed: Feed,
        detail: DetailView,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(storage::Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap();
        let service = MockGalleryService::with_sample_posts("pw");
        let mut feed = Feed::default();
        feed.load(&service, 1000).unwrap();
        Fixture {
            _dir: dir,
            store,
            service,
            feed,
            detail: DetailView::new(),
        }
    }

    fn open(fx: &mut Fixture, post_id: &str) {
        let post = fx.feed.find(post_id).unwrap().clone();
        fx.detail.open(&post, &fx.store);
    }

    fn secret() -> Option<Secret> {
        Secret::new("pw")
    }

    #[test]
    fn open_reads_liked_state_from_store() {
        let mut fx = fixture();
        fx.store.add_liked_post("sample-2").unwrap();
        open(&mut fx, "sample-2");
        assert!(fx.detail.is_liked());
        open(&mut fx, "sample-3");
        assert!(!fx.detail.is_liked());
    }

    #[test]
    fn like_increments_once_and_persists() {
        let mut fx = fixture();
        open(&mut fx, "sample-3");
        let before = fx.detail.like_count();

        let notice = fx.detail.like(&fx.service, &fx.store, &mut fx.feed);
        assert_eq!(notice, Notice::Liked);
        assert_eq!(fx.detail.like_count(), before + 1);
        assert!(fx.detail.is_liked());
        assert!(fx.detail.is_pulsing(Instant::now()));
        assert_eq!(fx.store.liked_posts().unwrap(), vec!["sample-3"]);
        assert_eq!(fx.feed.find("sample-3").unwrap().like_count, before + 1);

        let again = fx.detail.like(&fx.service, &fx.store, &mut fx.feed);
        assert_eq!(again, Notice::Unchanged);
        assert_eq!(fx.detail.like_count(), before + 1);
        assert_eq!(fx.store.liked_posts().unwrap(), vec!["sample-3"]);
        assert_eq!(
            fx.service.calls().iter().filter(|c| **c == "addLike").count(),
            1
        );
    }

    #[test]
    fn like_on_previously_liked_post_makes_no_call() {
        let mut fx = fixture();
        fx.store.add_liked_post("sample-1").unwrap();
        open(&mut fx, "sample-1");
        let before = fx.detail.like_count();
        assert!(fx.detail.prepare_like().is_none());
        assert_eq!(fx.detail.like(&fx.service, &fx.store, &mut fx.feed), Notice::Unchanged);
        assert_eq!(fx.detail.like_count(), before);
        assert!(!fx.service.calls().contains(&"addLike"));
    }

    #[test]
    fn failed_like_leaves_state_unchanged() {
        let mut fx = fixture();
        open(&mut fx, "sample-4");
        let before = fx.detail.like_count();
        fx.service.set_offline(true);
        assert_eq!(fx.detail.like(&fx.service, &fx.store, &mut fx.feed), Notice::Unchanged);
        assert_eq!(fx.detail.like_count(), before);
        assert!(!fx.detail.is_liked());
        assert!(fx.store.liked_posts().unwrap().is_empty());

        let request = LikeRequest {
            post_id: "sample-4".into(),
            username: "User1".into(),
        };
        let notice = fx.detail.apply_like(
            &request,
            Ok(Ack::default()),
            &fx.store,
            &mut fx.feed,
            Instant::now(),
        );
        assert_eq!(notice, Notice::Unchanged);
        assert!(!fx.detail.is_liked());
    }

    #[test]
    fn like_username_is_unique_per_click() {
        let name = like_username();
        assert!(name.starts_with("User"));
        assert!(name["User".len()..].parse::<i64>().is_ok());
    }

    #[test]
    fn add_comment_to_empty_post_renders_at_index_zero() {
        let mut fx = fixture();
        open(&mut fx, "sample-2");
        assert!(fx.detail.comments().is_empty());
        fx.detail.open_comment_form();
        fx.detail.comment_input_mut().unwrap().push_str("  hello ");

        let text = fx.detail.comment_input().unwrap().to_string();
        let notice = fx.detail.add_comment(&text, &fx.service, &mut fx.feed).unwrap();
        assert_eq!(notice, Notice::CommentAdded);

        let server_ts = fx.service.posts()[1].comments[0].timestamp.clone();
        assert_eq!(fx.detail.comments().len(), 1);
        let (index, comment) = fx.detail.selected_comment().unwrap();
        assert_eq!(index, 0);
        assert_eq!(comment.text, "hello");
        assert_eq!(comment.timestamp, server_ts);
        assert_eq!(comment.username, COMMENT_AUTHOR);
        assert_eq!(fx.feed.find("sample-2").unwrap().comments, fx.detail.comments());
        assert!(fx.detail.comment_input().is_none());
    }

    #[test]
    fn blank_comment_is_rejected_before_any_call() {
        let mut fx = fixture();
        open(&mut fx, "sample-2");
        let err = fx.detail.add_comment("   ", &fx.service, &mut fx.feed).unwrap_err();
        assert_eq!(err.to_string(), "Please enter a comment!");
        assert!(!fx.service.calls().contains(&"addComment"));
    }

    #[test]
    fn comment_failures_map_to_alerts() {
        let mut fx = fixture();
        open(&mut fx, "sample-2");
        let request = fx.detail.prepare_comment("hi").unwrap().unwrap();
        let err = fx
            .detail
            .apply_comment(&request, Ok(CommentAck::default()), &mut fx.feed)
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to add comment");

        let err = fx
            .detail
            .apply_comment(&request, Err(anyhow!("timeout")), &mut fx.feed)
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to add comment. Please try again.");
        assert!(fx.detail.comments().is_empty());
    }

    #[test]
    fn delete_comment_removes_exact_index_and_shifts() {
        let mut fx = fixture();
        open(&mut fx, "sample-5");
        for text in ["a", "b", "c"] {
            fx.detail.add_comment(text, &fx.service, &mut fx.feed).unwrap();
        }
        let timestamp = fx.detail.comments()[1].timestamp.clone();

        let notice = fx
            .detail
            .delete_comment(secret(), &timestamp, 1, &fx.service, &mut fx.feed)
            .unwrap();
        assert_eq!(notice, Notice::CommentDeleted);
        let texts: Vec<_> = fx.detail.comments().iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "c"]);
        let cached: Vec<_> = fx
            .feed
            .find("sample-5")
            .unwrap()
            .comments
            .iter()
            .map(|c| c.text.as_str())
            .collect();
        assert_eq!(cached, vec!["a", "c"]);
        assert_eq!(fx.service.posts()[4].comments.len(), 2);
    }

    #[test]
    fn delete_missing_comment_alerts_without_call() {
        let mut fx = fixture();
        open(&mut fx, "sample-1");
        let err = fx
            .detail
            .delete_comment(secret(), "whatever", 5, &fx.service, &mut fx.feed)
            .unwrap_err();
        assert_eq!(err.to_string(), "Comment not found");
        assert!(!fx.service.calls().contains(&"deleteComment"));
    }

    #[test]
    fn delete_comment_without_secret_is_a_no_op() {
        let mut fx = fixture();
        open(&mut fx, "sample-1");
        let timestamp = fx.detail.comments()[0].timestamp.clone();
        let notice = fx
            .detail
            .delete_comment(None, &timestamp, 0, &fx.service, &mut fx.feed)
            .unwrap();
        assert_eq!(notice, Notice::Unchanged);
        assert_eq!(fx.detail.comments().len(), 1);
    }

    #[test]
    fn delete_comment_with_wrong_secret_keeps_comment() {
        let mut fx = fixture();
        open(&mut fx, "sample-1");
        let timestamp = fx.detail.comments()[0].timestamp.clone();
        let err = fx
            .detail
            .delete_comment(Secret::new("nope"), &timestamp, 0, &fx.service, &mut fx.feed)
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidSecret));
        assert_eq!(fx.detail.comments().len(), 1);

        let request = fx
            .detail
            .prepare_delete_comment(secret(), &timestamp, 0, &fx.feed)
            .unwrap()
            .unwrap();
        assert_eq!(request.key.as_str(), format!("COMMENT#{timestamp}"));
        let err = fx
            .detail
            .apply_delete_comment(&request, Ok(Ack::rejected(INVALID_PASSWORD)), &mut fx.feed)
            .unwrap_err();
        assert_eq!(err.to_string(), "Incorrect password!");
    }

    #[test]
    fn delete_photo_requires_secret_and_confirmation() {
        let mut fx = fixture();
        open(&mut fx, "sample-6");
        assert_eq!(
            fx.detail.delete_photo(secret(), false, &fx.service).unwrap(),
            Notice::Unchanged
        );
        assert_eq!(
            fx.detail.delete_photo(None, true, &fx.service).unwrap(),
            Notice::Unchanged
        );
        assert!(fx.service.calls().iter().all(|c| *c != "deletePhoto"));

        let notice = fx.detail.delete_photo(secret(), true, &fx.service).unwrap();
        assert_eq!(notice, Notice::PhotoDeleted);
        assert!(notice.reloads_feed());
        assert!(!fx.detail.is_open());
        assert!(fx.service.posts().iter().all(|p| p.post_id != "sample-6"));
    }

    #[test]
    fn delete_photo_rejection_keeps_view_open() {
        let mut fx = fixture();
        open(&mut fx, "sample-6");
        let err = fx
            .detail
            .delete_photo(Secret::new("bad"), true, &fx.service)
            .unwrap_err();
        assert_eq!(err.to_string(), "Incorrect password!");
        assert!(fx.detail.is_open());
    }

    #[test]
    fn close_clears_post_and_liked_flag() {
        let mut fx = fixture();
        fx.store.add_liked_post("sample-1").unwrap();
        open(&mut fx, "sample-1");
        fx.detail.open_comment_form();
        fx.detail.close();
        assert!(!fx.detail.is_open());
        assert!(!fx.detail.is_liked());
        assert!(fx.detail.post_id().is_none());
        assert!(fx.detail.comment_input().is_none());
        assert!(fx.detail.prepare_like().is_none());
    }
}
