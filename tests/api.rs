use std::io::Read;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use crossbeam_channel::{unbounded, Receiver};
use galleria::compress::{CompressOptions, DATA_URL_PREFIX};
use galleria::data::HttpGalleryService;
use galleria::detail::DetailView;
use galleria::error::{ActionError, Notice};
use galleria::feed::{Feed, FeedState};
use galleria::gallery::{Client, ClientConfig, Endpoints, Secret};
use galleria::storage::{Options as StoreOptions, Store};
use galleria::upload::UploadSession;
use image::{ImageBuffer, ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};
use tempfile::TempDir;
use tiny_http::{Header, Response, Server};

struct Captured {
    path: String,
    body: Value,
}

struct FakeApi {
    base_url: String,
    requests: Receiver<Captured>,
}

impl FakeApi {
    /// Serves `respond(path, body) -> (status, json)` on a local port.
    fn start<F>(respond: F) -> Self
    where
        F: Fn(&str, &Value) -> (u16, Value) + Send + 'static,
    {
        let server = Server::http("127.0.0.1:0").expect("bind fake api");
        let addr = server
            .server_addr()
            .to_ip()
            .expect("fake api listens on tcp");
        let (tx, rx) = unbounded();
        thread::spawn(move || {
            for mut request in server.incoming_requests() {
                let mut raw = String::new();
                let _ = request.as_reader().read_to_string(&mut raw);
                let body = serde_json::from_str(&raw).unwrap_or(Value::Null);
                let path = request.url().trim_start_matches('/').to_string();
                let (status, reply) = respond(&path, &body);
                let _ = tx.send(Captured { path, body });
                let response = Response::from_string(reply.to_string())
                    .with_status_code(status)
                    .with_header(
                        Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                            .expect("header"),
                    );
                let _ = request.respond(response);
            }
        });
        Self {
            base_url: format!("http://{addr}/api"),
            requests: rx,
        }
    }

    fn service(&self) -> HttpGalleryService {
        let client = Client::new(ClientConfig {
            base_url: self.base_url.clone(),
            endpoints: Endpoints::default(),
            user_agent: "galleria-tests".into(),
            timeout: Duration::from_secs(5),
            upload_timeout: Duration::from_secs(10),
            http_client: None,
        })
        .expect("client");
        HttpGalleryService::new(Arc::new(client))
    }

    fn next(&self) -> Captured {
        self.requests
            .recv_timeout(Duration::from_secs(5))
            .expect("request reached fake api")
    }
}

fn feed_body() -> Value {
    json!({
        "success": true,
        "posts": [
            {
                "postId": "p1",
                "imageUrl": "https://cdn.example/p1.jpg",
                "caption": "Harbour",
                "timestamp": 1700000000000i64,
                "likeCount": 4,
                "comments": [
                    {"text": "Nice", "timestamp": "1700000001000", "username": "User"}
                ]
            },
            {
                "postId": "p2",
                "imageUrl": "https://cdn.example/p2.jpg",
                "timestamp": "2024-03-01T10:00:00Z",
                "likeCount": 0,
                "comments": null
            }
        ]
    })
}

fn open_store() -> (TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(StoreOptions {
        path: Some(dir.path().join("state.db")),
    })
    .unwrap();
    (dir, store)
}

#[test]
fn feed_loads_over_http_and_lays_out_columns() {
    let api = FakeApi::start(|path, _| match path {
        "api/getFeed" => (200, feed_body()),
        _ => (404, json!({"success": false, "error": "not found"})),
    });
    let service = api.service();
    let mut feed = Feed::default();
    feed.load(&service, 1000).unwrap();

    assert_eq!(feed.state(), FeedState::Ready);
    assert_eq!(feed.posts().len(), 2);
    assert_eq!(feed.layout().column_count(), 4);
    assert!(feed.find("p2").unwrap().comments.is_empty());
    assert_eq!(api.next().path, "api/getFeed");
}

#[test]
fn upload_posts_a_downscaled_jpeg_data_url() {
    let api = FakeApi::start(|_, _| (200, json!({"success": true})));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.png");
    let img: RgbImage = ImageBuffer::from_fn(3000, 2000, |x, y| {
        Rgb([(x % 251) as u8, (y % 241) as u8, 128])
    });
    img.save_with_format(&path, ImageFormat::Png).unwrap();

    let mut session = UploadSession::new(CompressOptions::default());
    assert!(session.open(Secret::new("hunter2")));
    assert!(session.select_file(&path).unwrap());
    session.set_caption("Sunset");
    let notice = session.submit(&api.service()).unwrap();
    assert_eq!(notice, Notice::Uploaded);

    let request = api.next();
    assert_eq!(request.path, "api/uploadPhoto");
    assert_eq!(request.body["caption"], "Sunset");
    assert_eq!(request.body["password"], "hunter2");
    let image = request.body["image"].as_str().unwrap();
    let payload = image.strip_prefix(DATA_URL_PREFIX).unwrap();
    let bytes = general_purpose::STANDARD.decode(payload).unwrap();
    assert_eq!(
        image::guess_format(&bytes).unwrap(),
        ImageFormat::Jpeg
    );
    let decoded = image::load_from_memory(&bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (1920, 1280));
}

#[test]
fn wrong_password_is_reported_even_with_error_status() {
    let api = FakeApi::start(|path, _| match path {
        "api/getFeed" => (200, feed_body()),
        _ => (401, json!({"success": false, "error": "Invalid password"})),
    });
    let service = api.service();
    let (_dir, store) = open_store();
    let mut feed = Feed::default();
    feed.load(&service, 800).unwrap();
    let mut detail = DetailView::new();
    detail.open(feed.post(0).unwrap(), &store);

    let err = detail
        .delete_photo(Secret::new("nope"), true, &service)
        .unwrap_err();
    assert!(matches!(err, ActionError::InvalidSecret));
    assert_eq!(err.to_string(), "Incorrect password!");
    assert!(detail.is_open());

    api.next();
    let request = api.next();
    assert_eq!(request.path, "api/deletePhoto");
    assert_eq!(request.body, json!({"postId": "p1", "password": "nope"}));
}

#[test]
fn comment_round_trip_uses_server_timestamp() {
    let api = FakeApi::start(|path, _| match path {
        "api/getFeed" => (200, feed_body()),
        "api/addComment" => (
            200,
            json!({"success": true, "comment": {"timestamp": "1700000050000"}}),
        ),
        "api/deleteComment" => (200, json!({"success": true})),
        _ => (404, json!({"success": false})),
    });
    let service = api.service();
    let (_dir, store) = open_store();
    let mut feed = Feed::default();
    feed.load(&service, 800).unwrap();
    api.next();

    let mut detail = DetailView::new();
    detail.open(feed.find("p2").unwrap(), &store);
    let notice = detail.add_comment("  hello  ", &service, &mut feed).unwrap();
    assert_eq!(notice, Notice::CommentAdded);
    let (index, comment) = detail.selected_comment().unwrap();
    assert_eq!(index, 0);
    assert_eq!(comment.text, "hello");
    assert_eq!(comment.username, "User");
    assert_eq!(feed.find("p2").unwrap().comments.len(), 1);

    let request = api.next();
    assert_eq!(
        request.body,
        json!({"postId": "p2", "username": "User", "text": "hello"})
    );

    let timestamp = comment.timestamp.clone();
    let notice = detail
        .delete_comment(Secret::new("pw"), &timestamp, 0, &service, &mut feed)
        .unwrap();
    assert_eq!(notice, Notice::CommentDeleted);
    assert!(detail.comments().is_empty());
    assert!(feed.find("p2").unwrap().comments.is_empty());

    let request = api.next();
    assert_eq!(request.path, "api/deleteComment");
    assert_eq!(
        request.body,
        json!({"postId": "p2", "commentSK": "COMMENT#1700000050000", "password": "pw"})
    );
}

#[test]
fn unreachable_server_leaves_feed_failed() {
    let service = {
        let client = Client::new(ClientConfig {
            base_url: "http://127.0.0.1:9/api".into(),
            endpoints: Endpoints::default(),
            user_agent: "galleria-tests".into(),
            timeout: Duration::from_secs(2),
            upload_timeout: Duration::from_secs(2),
            http_client: None,
        })
        .unwrap();
        HttpGalleryService::new(Arc::new(client))
    };
    let mut feed = Feed::default();
    let err = feed.load(&service, 800).unwrap_err();
    assert!(matches!(err, ActionError::FeedUnavailable { .. }));
    assert_eq!(feed.state(), FeedState::Failed);
}
