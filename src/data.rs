use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{SecondsFormat, TimeZone, Utc};
use parking_lot::Mutex;

use crate::gallery::{
    self, Ack, AddCommentRequest, AddLikeRequest, CommentAck, CommentKey, CreatedComment,
    DeleteCommentRequest, DeletePhotoRequest, FeedResponse, Post, Secret, Timestamp,
    UploadRequest, INVALID_PASSWORD,
};

/// Remote operations the controllers depend on.
pub trait GalleryService: Send + Sync {
    fn load_feed(&self) -> Result<FeedResponse>;
    fn upload_photo(&self, image: &str, caption: &str, secret: &Secret) -> Result<Ack>;
    fn delete_photo(&self, post_id: &str, secret: &Secret) -> Result<Ack>;
    fn add_comment(&self, post_id: &str, username: &str, text: &str) -> Result<CommentAck>;
    fn delete_comment(&self, post_id: &str, key: &CommentKey, secret: &Secret) -> Result<Ack>;
    fn add_like(&self, post_id: &str, username: &str) -> Result<Ack>;
}

pub struct HttpGalleryService {
    client: Arc<gallery::Client>,
}

impl HttpGalleryService {
    pub fn new(client: Arc<gallery::Client>) -> Self {
        Self { client }
    }
}

impl GalleryService for HttpGalleryService {
    fn load_feed(&self) -> Result<FeedResponse> {
        self.client.feed().context("fetch feed")
    }

    fn upload_photo(&self, image: &str, caption: &str, secret: &Secret) -> Result<Ack> {
        self.client
            .upload_photo(&UploadRequest {
                image,
                caption,
                password: secret.expose(),
            })
            .context("upload photo")
    }

    fn delete_photo(&self, post_id: &str, secret: &Secret) -> Result<Ack> {
        self.client
            .delete_photo(&DeletePhotoRequest {
                post_id,
                password: secret.expose(),
            })
            .context("delete photo")
    }

    fn add_comment(&self, post_id: &str, username: &str, text: &str) -> Result<CommentAck> {
        self.client
            .add_comment(&AddCommentRequest {
                post_id,
                username,
                text,
            })
            .context("add comment")
    }

    fn delete_comment(&self, post_id: &str, key: &CommentKey, secret: &Secret) -> Result<Ack> {
        self.client
            .delete_comment(&DeleteCommentRequest {
                post_id,
                comment_sk: key.as_str(),
                password: secret.expose(),
            })
            .context("delete comment")
    }

    fn add_like(&self, post_id: &str, username: &str) -> Result<Ack> {
        self.client
            .add_like(&AddLikeRequest { post_id, username })
            .context("add like")
    }
}

/// In-memory gallery used by `--offline` and by tests.
pub struct MockGalleryService {
    state: Mutex<MockState>,
}

struct MockState {
    password: String,
    posts: Vec<Post>,
    calls: Vec<&'static str>,
    uploads: Vec<(String, String)>,
    offline: bool,
    next_id: i64,
}

impl MockGalleryService {
    pub fn new(password: impl Into<String>, posts: Vec<Post>) -> Self {
        Self {
            state: Mutex::new(MockState {
                password: password.into(),
                posts,
                calls: Vec::new(),
                uploads: Vec::new(),
                offline: false,
                next_id: 1,
            }),
        }
    }

    pub fn with_sample_posts(password: impl Into<String>) -> Self {
        Self::new(password, sample_posts())
    }

    /// Makes every following call fail like an unreachable server.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.clone()
    }

    pub fn uploads(&self) -> Vec<(String, String)> {
        self.state.lock().uploads.clone()
    }

    pub fn posts(&self) -> Vec<Post> {
        self.state.lock().posts.clone()
    }

    fn enter(&self, call: &'static str) -> Result<parking_lot::MutexGuard<'_, MockState>> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if state.offline {
            return Err(anyhow!("mock: {call}: connection refused"));
        }
        Ok(state)
    }
}

impl MockState {
    fn authorize(&self, secret: &Secret) -> Option<Ack> {
        if secret.expose() == self.password {
            None
        } else {
            Some(Ack::rejected(INVALID_PASSWORD))
        }
    }

    fn post_mut(&mut self, post_id: &str) -> Option<&mut Post> {
        self.posts.iter_mut().find(|post| post.post_id == post_id)
    }

    fn tick(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl GalleryService for MockGalleryService {
    fn load_feed(&self) -> Result<FeedResponse> {
        let state = self.enter("getFeed")?;
        Ok(FeedResponse {
            success: true,
            posts: state.posts.clone(),
            error: None,
        })
    }

    fn upload_photo(&self, image: &str, caption: &str, secret: &Secret) -> Result<Ack> {
        let mut state = self.enter("uploadPhoto")?;
        if let Some(rejection) = state.authorize(secret) {
            return Ok(rejection);
        }
        let id = state.tick();
        state.uploads.push((image.to_string(), caption.to_string()));
        state.posts.insert(
            0,
            Post {
                post_id: format!("upload-{id}"),
                image_url: format!("mock://uploads/{id}.jpg"),
                caption: Some(caption.to_string()).filter(|c| !c.is_empty()),
                timestamp: Some(Timestamp::Millis(Utc::now().timestamp_millis())),
                like_count: 0,
                comments: Vec::new(),
            },
        );
        Ok(Ack::ok())
    }

    fn delete_photo(&self, post_id: &str, secret: &Secret) -> Result<Ack> {
        let mut state = self.enter("deletePhoto")?;
        if let Some(rejection) = state.authorize(secret) {
            return Ok(rejection);
        }
        let before = state.posts.len();
        state.posts.retain(|post| post.post_id != post_id);
        if state.posts.len() == before {
            return Ok(Ack::rejected("Post not found"));
        }
        Ok(Ack::ok())
    }

    fn add_comment(&self, post_id: &str, username: &str, text: &str) -> Result<CommentAck> {
        let mut state = self.enter("addComment")?;
        let id = state.tick();
        let timestamp = mock_timestamp(id);
        let Some(post) = state.post_mut(post_id) else {
            return Ok(CommentAck {
                success: false,
                error: Some("Post not found".into()),
                comment: None,
            });
        };
        post.comments.push(gallery::Comment {
            text: text.to_string(),
            timestamp: timestamp.clone(),
            username: username.to_string(),
        });
        Ok(CommentAck {
            success: true,
            error: None,
            comment: Some(CreatedComment { timestamp }),
        })
    }

    fn delete_comment(&self, post_id: &str, key: &CommentKey, secret: &Secret) -> Result<Ack> {
        let mut state = self.enter("deleteComment")?;
        if let Some(rejection) = state.authorize(secret) {
            return Ok(rejection);
        }
        let Some(post) = state.post_mut(post_id) else {
            return Ok(Ack::rejected("Post not found"));
        };
        let before = post.comments.len();
        post.comments
            .retain(|comment| CommentKey::for_timestamp(&comment.timestamp) != *key);
        if post.comments.len() == before {
            return Ok(Ack::rejected("Comment not found"));
        }
        Ok(Ack::ok())
    }

    fn add_like(&self, post_id: &str, _username: &str) -> Result<Ack> {
        let mut state = self.enter("addLike")?;
        match state.post_mut(post_id) {
            Some(post) => {
                post.like_count += 1;
                Ok(Ack::ok())
            }
            None => Ok(Ack::rejected("Post not found")),
        }
    }
}

fn mock_timestamp(seq: i64) -> String {
    Utc.timestamp_millis_opt(1_700_000_000_000 + seq)
        .single()
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn sample_posts() -> Vec<Post> {
    let captions = [
        "Morning light over the harbour",
        "Street market colours",
        "",
        "First snow in the park",
        "Coffee and a good book",
        "Night train window",
        "Garden tomatoes",
    ];
    captions
        .iter()
        .enumerate()
        .map(|(idx, caption)| Post {
            post_id: format!("sample-{}", idx + 1),
            image_url: format!("mock://samples/{}.jpg", idx + 1),
            caption: Some(caption.to_string()).filter(|c| !c.is_empty()),
            timestamp: Some(Timestamp::Millis(1_700_000_000_000 - idx as i64 * 86_400_000)),
            like_count: (idx as u64 * 3) % 7,
            comments: if idx == 0 {
                vec![gallery::Comment {
                    text: "Gorgeous!".into(),
                    timestamp: mock_timestamp(0),
                    username: gallery::COMMENT_AUTHOR.into(),
                }]
            } else {
                Vec::new()
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_rejects_wrong_password() {
        let service = MockGalleryService::with_sample_posts("letmein");
        let wrong = Secret::new("nope").unwrap();
        let ack = service.delete_photo("sample-1", &wrong).unwrap();
        assert_eq!(ack, Ack::rejected(INVALID_PASSWORD));
        assert_eq!(service.posts().len(), 7);
    }

    #[test]
    fn mock_comment_round_trip_uses_opaque_key() {
        let service = MockGalleryService::new("pw", sample_posts());
        let created = service.add_comment("sample-2", "User", "nice").unwrap();
        let timestamp = created.comment.unwrap().timestamp;
        let secret = Secret::new("pw").unwrap();
        let ack = service
            .delete_comment("sample-2", &CommentKey::for_timestamp(&timestamp), &secret)
            .unwrap();
        assert!(ack.success);
        assert_eq!(
            service.calls(),
            vec!["addComment", "deleteComment"]
        );
    }

    #[test]
    fn offline_mock_fails_every_call() {
        let service = MockGalleryService::with_sample_posts("pw");
        service.set_offline(true);
        assert!(service.load_feed().is_err());
        assert!(service.add_like("sample-1", "User1").is_err());
    }
}
