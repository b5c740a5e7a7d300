use std::io::{self, Stdout};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::event::{
    self, DisableBracketedPaste, DisableMouseCapture, EnableBracketedPaste, EnableMouseCapture,
    Event, KeyCode, KeyEventKind, MouseButton, MouseEvent, MouseEventKind,
};
use crossterm::terminal::{
    self as term, disable_raw_mode, enable_raw_mode, window_size, EnterAlternateScreen,
    LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, BorderType, Borders, Clear, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use textwrap::{wrap, Options as WrapOptions};
use unicode_width::UnicodeWidthStr;

use crate::compress::CompressOptions;
use crate::data::GalleryService;
use crate::detail::{
    CommentRequest, DeleteCommentRequest, DeletePhotoRequest, DetailView, LikeRequest,
};
use crate::error::{ActionError, Notice};
use crate::feed::{Feed, FeedState};
use crate::gallery::{Ack, CommentAck, FeedResponse, Post, Secret};
use crate::gesture::{SwipeGesture, SwipeOutcome, TouchTarget};
use crate::storage::Store;
use crate::upload::{SubmitState, UploadSession, UploadTicket};

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_PANEL_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_PHOTO: Color = Color::Rgb(88, 91, 112);
const COLOR_LIKE: Color = Color::Rgb(243, 139, 168);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const ICON_LIKED: &str = "♥";
const ICON_UNLIKED: &str = "♡";
const ICON_COMMENTS: &str = "✎";
const PHOTO_ROWS_MIN: usize = 3;
const DELETE_PHOTO_CONFIRM: &str =
    "Are you sure you want to delete this photo? This cannot be undone.";

#[derive(Debug, Clone, Copy, PartialEq)]
struct CellMetrics {
    width: f64,
    height: f64,
}

impl CellMetrics {
    fn measure(fallback_width: u16, fallback_height: u16) -> Self {
        let fallback = CellMetrics {
            width: f64::from(fallback_width.max(1)),
            height: f64::from(fallback_height.max(1)),
        };
        match window_size() {
            Ok(size) => Self::from_window(size.columns, size.rows, size.width, size.height, fallback),
            Err(_) => fallback,
        }
    }

    // Terminals that do not report pixel sizes answer with zeros.
    fn from_window(columns: u16, rows: u16, width_px: u16, height_px: u16, fallback: Self) -> Self {
        let width = if width_px > 0 && columns > 0 {
            f64::from(width_px) / f64::from(columns)
        } else {
            fallback.width
        };
        let height = if height_px > 0 && rows > 0 {
            f64::from(height_px) / f64::from(rows)
        } else {
            fallback.height
        };
        CellMetrics { width, height }
    }

    fn viewport_px(&self, columns: u16) -> u32 {
        (f64::from(columns) * self.width).round() as u32
    }

    fn row_to_px(&self, row: u16) -> f32 {
        (f64::from(row) * self.height) as f32
    }

    fn px_to_rows(&self, px: f32) -> u16 {
        (f64::from(px) / self.height)
            .round()
            .clamp(0.0, f64::from(u16::MAX)) as u16
    }
}

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

#[derive(Debug, Clone, PartialEq)]
enum PromptPurpose {
    Upload,
    DeletePhoto,
    DeleteComment { timestamp: String, index: usize },
}

impl PromptPurpose {
    fn title(&self) -> &'static str {
        match self {
            PromptPurpose::Upload => "Enter password to upload:",
            PromptPurpose::DeletePhoto => "Enter password to delete this photo:",
            PromptPurpose::DeleteComment { .. } => "Enter password to delete this comment:",
        }
    }
}

#[derive(Debug)]
enum Modal {
    Prompt {
        purpose: PromptPurpose,
        input: String,
    },
    ConfirmDelete {
        secret: Secret,
    },
    Alert {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadField {
    Path,
    Caption,
}

enum AsyncResponse {
    Feed {
        request_id: u64,
        result: Result<FeedResponse>,
    },
    Like {
        request: LikeRequest,
        result: Result<Ack>,
    },
    Comment {
        request: CommentRequest,
        result: Result<CommentAck>,
    },
    DeleteComment {
        request: DeleteCommentRequest,
        result: Result<Ack>,
    },
    DeletePhoto {
        request: DeletePhotoRequest,
        result: Result<Ack>,
    },
    UploadProgress {
        ticket: UploadTicket,
        state: SubmitState,
    },
    Upload {
        ticket: UploadTicket,
        result: Result<(), ActionError>,
    },
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let percent_x = percent_x.min(100);
    let percent_y = percent_y.min(100);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage(100 - percent_x - (100 - percent_x) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage(100 - percent_y - (100 - percent_y) / 2),
        ])
        .split(horizontal[1]);
    vertical[1]
}

fn pad_lines_to_width(lines: &mut [Line<'static>], width: u16) {
    let width = width as usize;
    if width == 0 {
        return;
    }

    for line in lines {
        let mut current_width = 0usize;
        for span in &line.spans {
            current_width =
                current_width.saturating_add(UnicodeWidthStr::width(span.content.as_ref()));
        }
        if current_width >= width {
            continue;
        }
        let pad_style = line.spans.last().map(|span| span.style).unwrap_or_default();
        let padding = " ".repeat(width - current_width);
        line.spans.push(Span::styled(padding, pad_style));
    }
}

fn hit(area: Rect, column: u16, row: u16) -> bool {
    column >= area.x && column < area.right() && row >= area.y && row < area.bottom()
}

fn wrapped(text: &str, width: usize) -> Vec<String> {
    wrap(text, WrapOptions::new(width.max(1)))
        .into_iter()
        .map(|line| line.into_owned())
        .collect()
}

// Stand-in rows for the photo, varied per post so the columns stagger.
fn photo_rows(post: &Post) -> usize {
    let seed: u32 = post.post_id.bytes().map(u32::from).sum();
    PHOTO_ROWS_MIN + (seed % 3) as usize
}

fn card_lines(post: &Post, width: u16) -> Vec<Line<'static>> {
    let inner = width.saturating_sub(2).max(1) as usize;
    let mut lines = Vec::new();
    for _ in 0..photo_rows(post) {
        lines.push(Line::from(Span::styled(
            "░".repeat(inner),
            Style::default().fg(COLOR_PHOTO),
        )));
    }
    let caption = post.caption_text().trim();
    if !caption.is_empty() {
        for line in wrapped(caption, inner) {
            lines.push(Line::from(Span::styled(
                line,
                Style::default().fg(COLOR_TEXT_PRIMARY),
            )));
        }
    }
    lines.push(Line::from(vec![
        Span::styled(
            format!("{ICON_LIKED} {}", post.like_count),
            Style::default().fg(COLOR_LIKE),
        ),
        Span::styled(
            format!("  {ICON_COMMENTS} {}", post.comments.len()),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        ),
    ]));
    lines
}

fn card_height(post: &Post, width: u16) -> u16 {
    let rows = card_lines(post, width).len() + 2;
    rows.min(usize::from(u16::MAX)) as u16
}

/// Turns typed or pasted text into a file path: quotes, `file://` and `~/` are handled.
fn clean_path(raw: &str) -> Option<PathBuf> {
    let trimmed = raw.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .or_else(|| {
            trimmed
                .strip_prefix('\'')
                .and_then(|rest| rest.strip_suffix('\''))
        })
        .unwrap_or(trimmed);
    let path = unquoted.strip_prefix("file://").unwrap_or(unquoted);
    if path.is_empty() {
        return None;
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return Some(home.join(rest));
        }
    }
    Some(PathBuf::from(path))
}

pub struct Options {
    pub status_message: String,
    pub service: Arc<dyn GalleryService>,
    pub store: Arc<Store>,
    pub compress: CompressOptions,
    pub cell_width_px: u16,
    pub cell_height_px: u16,
    pub resize_debounce: Duration,
    pub config_path: String,
}

pub struct Model {
    status_message: String,
    service: Arc<dyn GalleryService>,
    store: Arc<Store>,
    feed: Feed,
    detail: DetailView,
    upload: UploadSession,
    upload_field: UploadField,
    path_input: String,
    gesture: SwipeGesture,
    modal: Option<Modal>,
    selected: usize,
    feed_scroll: u16,
    card_hits: Vec<(Rect, usize)>,
    photo_area: Option<Rect>,
    sidebar_area: Option<Rect>,
    cells: CellMetrics,
    fallback_cell: (u16, u16),
    viewport_px: u32,
    pulse_drawn: bool,
    like_pending: bool,
    detail_pending: bool,
    pending_feed: Option<u64>,
    next_request_id: u64,
    spinner: Spinner,
    needs_redraw: bool,
    config_path: String,
    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        let (response_tx, response_rx) = unbounded();
        let cells = CellMetrics::measure(opts.cell_width_px, opts.cell_height_px);
        let columns = term::size().map(|(columns, _)| columns).unwrap_or(80);
        Self {
            status_message: opts.status_message,
            service: opts.service,
            store: opts.store,
            feed: Feed::new(opts.resize_debounce),
            detail: DetailView::new(),
            upload: UploadSession::new(opts.compress),
            upload_field: UploadField::Path,
            path_input: String::new(),
            gesture: SwipeGesture::new(),
            modal: None,
            selected: 0,
            feed_scroll: 0,
            card_hits: Vec::new(),
            photo_area: None,
            sidebar_area: None,
            cells,
            fallback_cell: (opts.cell_width_px, opts.cell_height_px),
            viewport_px: cells.viewport_px(columns),
            pulse_drawn: false,
            like_pending: false,
            detail_pending: false,
            pending_feed: None,
            next_request_id: 1,
            spinner: Spinner::new(),
            needs_redraw: true,
            config_path: opts.config_path,
            response_tx,
            response_rx,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        stdout.execute(EnableMouseCapture)?;
        stdout.execute(EnableBracketedPaste)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        self.reload_feed();
        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(DisableBracketedPaste)?;
        terminal.backend_mut().execute(DisableMouseCapture)?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            if self.poll_async() {
                self.mark_dirty();
            }
            if self.poll_timers(Instant::now()) {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let mut timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));
            if let Some(deadline) = self.next_deadline() {
                timeout = timeout.min(deadline.saturating_duration_since(Instant::now()));
            }

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        match self.handle_key(key.code) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => {
                                self.status_message = format!("Error: {}", err);
                            }
                        }
                        self.mark_dirty();
                    }
                    Event::Mouse(mouse) => self.handle_mouse(mouse),
                    Event::Paste(text) => self.handle_paste(&text),
                    Event::Resize(columns, _) => self.handle_resize(columns, Instant::now()),
                    _ => {}
                }
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                if self.is_loading() {
                    if self.spinner.advance() {
                        self.mark_dirty();
                    }
                } else {
                    self.spinner.reset();
                }
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn is_loading(&self) -> bool {
        self.pending_feed.is_some()
            || self.like_pending
            || self.detail_pending
            || self.upload.state().is_busy()
    }

    fn alert(&mut self, message: impl Into<String>) {
        self.modal = Some(Modal::Alert {
            message: message.into(),
        });
        self.mark_dirty();
    }

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.feed.next_deadline(),
            self.gesture.deadline(),
            self.detail.pulse_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn poll_timers(&mut self, now: Instant) -> bool {
        let mut changed = false;
        if self.feed.poll_resize(self.viewport_px, now) {
            tracing::debug!(viewport_px = self.viewport_px, "feed re-rendered after resize");
            self.clamp_selection();
            changed = true;
        }
        if self.gesture.tick(now) {
            self.detail.close();
            changed = true;
        }
        let pulsing = self.detail.is_pulsing(now);
        if pulsing != self.pulse_drawn {
            self.pulse_drawn = pulsing;
            changed = true;
        }
        changed
    }

    fn handle_resize(&mut self, columns: u16, now: Instant) {
        let (fallback_width, fallback_height) = self.fallback_cell;
        self.cells = CellMetrics::measure(fallback_width, fallback_height);
        self.viewport_px = self.cells.viewport_px(columns);
        self.feed.on_resize(now);
        self.mark_dirty();
    }

    fn spawn<F>(&self, job: F)
    where
        F: FnOnce(&dyn GalleryService) -> AsyncResponse + Send + 'static,
    {
        let service = Arc::clone(&self.service);
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let message = job(service.as_ref());
            let _ = tx.send(message);
        });
    }

    fn reload_feed(&mut self) {
        self.feed.begin_load();
        self.selected = 0;
        self.feed_scroll = 0;
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.pending_feed = Some(request_id);
        self.status_message = "Loading photos...".to_string();
        self.spawn(move |service| AsyncResponse::Feed {
            request_id,
            result: service.load_feed(),
        });
        self.mark_dirty();
    }

    fn poll_async(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.response_rx.try_recv() {
            self.handle_async_response(message);
            changed = true;
        }
        changed
    }

    fn handle_async_response(&mut self, message: AsyncResponse) {
        match message {
            AsyncResponse::Feed { request_id, result } => {
                if self.pending_feed != Some(request_id) {
                    return;
                }
                self.pending_feed = None;
                match self.feed.apply_load(result, self.viewport_px) {
                    Ok(()) => {
                        self.status_message = match self.feed.state() {
                            FeedState::Ready => format!("{} photos", self.feed.posts().len()),
                            _ => "No photos yet".to_string(),
                        };
                    }
                    Err(err) => {
                        self.status_message = "Could not load photos".to_string();
                        self.alert(err.to_string());
                    }
                }
                self.clamp_selection();
            }
            AsyncResponse::Like { request, result } => {
                self.like_pending = false;
                let notice = self.detail.apply_like(
                    &request,
                    result,
                    &self.store,
                    &mut self.feed,
                    Instant::now(),
                );
                if notice == Notice::Liked {
                    self.status_message = "Liked".to_string();
                }
            }
            AsyncResponse::Comment { request, result } => {
                self.detail_pending = false;
                let outcome = self.detail.apply_comment(&request, result, &mut self.feed);
                self.settle(outcome);
            }
            AsyncResponse::DeleteComment { request, result } => {
                self.detail_pending = false;
                let outcome = self
                    .detail
                    .apply_delete_comment(&request, result, &mut self.feed);
                self.settle(outcome);
            }
            AsyncResponse::DeletePhoto { request, result } => {
                self.detail_pending = false;
                let outcome = self.detail.apply_delete_photo(&request, result);
                if outcome.is_ok() {
                    self.gesture.reset();
                }
                self.settle(outcome);
            }
            AsyncResponse::UploadProgress { ticket, state } => {
                self.upload.set_progress(ticket, state);
            }
            AsyncResponse::Upload { ticket, result } => {
                let outcome = self.upload.finish(ticket, result);
                if outcome.is_ok() && !self.upload.is_open() {
                    self.path_input.clear();
                    self.upload_field = UploadField::Path;
                }
                self.settle(outcome);
            }
        }
    }

    fn settle(&mut self, outcome: Result<Notice, ActionError>) {
        match outcome {
            Ok(notice) => {
                if let Some(message) = notice.message() {
                    self.status_message = message.to_string();
                    self.alert(message);
                }
                if notice.reloads_feed() {
                    self.reload_feed();
                }
            }
            Err(err) => self.alert(err.to_string()),
        }
    }

    fn clamp_selection(&mut self) {
        let len = self.feed.posts().len();
        if len == 0 {
            self.selected = 0;
        } else if self.selected >= len {
            self.selected = len - 1;
        }
    }

    fn open_selected(&mut self) {
        let Some(post) = self.feed.post(self.selected).cloned() else {
            return;
        };
        tracing::debug!(post_id = %post.post_id, "opening photo");
        self.gesture.reset();
        self.detail.open(&post, &self.store);
    }

    fn close_detail(&mut self) {
        self.detail.close();
        self.gesture.reset();
    }

    fn move_selection(&mut self, dx: isize, dy: isize) {
        let layout = self.feed.layout();
        let Some((column, row)) = layout.position_of(self.selected) else {
            self.selected = 0;
            return;
        };
        let last_column = layout.column_count().saturating_sub(1) as isize;
        let target_column = (column as isize + dx).clamp(0, last_column) as usize;
        let Some(items) = layout.columns.get(target_column).filter(|items| !items.is_empty())
        else {
            return;
        };
        let last_row = items.len() as isize - 1;
        let target_row = (row as isize + dy).clamp(0, last_row) as usize;
        self.selected = items[target_row];
    }

    fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        if let Some(modal) = self.modal.take() {
            self.handle_modal_key(modal, code);
            return Ok(false);
        }
        if self.upload.is_open() {
            self.handle_upload_key(code);
            return Ok(false);
        }
        if self.detail.is_open() {
            if !self.gesture.is_dismissing() {
                self.handle_detail_key(code);
            }
            return Ok(false);
        }
        self.handle_feed_key(code)
    }

    fn handle_feed_key(&mut self, code: KeyCode) -> Result<bool> {
        match code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('r') => self.reload_feed(),
            KeyCode::Char('u') => {
                self.modal = Some(Modal::Prompt {
                    purpose: PromptPurpose::Upload,
                    input: String::new(),
                });
            }
            KeyCode::Enter => self.open_selected(),
            KeyCode::Left | KeyCode::Char('h') => self.move_selection(-1, 0),
            KeyCode::Right | KeyCode::Char('l') => self.move_selection(1, 0),
            KeyCode::Up | KeyCode::Char('k') => self.move_selection(0, -1),
            KeyCode::Down | KeyCode::Char('j') => self.move_selection(0, 1),
            _ => {}
        }
        Ok(false)
    }

    fn handle_modal_key(&mut self, modal: Modal, code: KeyCode) {
        match modal {
            Modal::Alert { message } => {
                if !matches!(code, KeyCode::Enter | KeyCode::Esc | KeyCode::Char(' ')) {
                    self.modal = Some(Modal::Alert { message });
                }
            }
            Modal::Prompt { purpose, mut input } => match code {
                KeyCode::Enter => self.submit_prompt(purpose, Secret::new(input)),
                KeyCode::Esc => self.submit_prompt(purpose, None),
                KeyCode::Backspace => {
                    input.pop();
                    self.modal = Some(Modal::Prompt { purpose, input });
                }
                KeyCode::Char(ch) => {
                    input.push(ch);
                    self.modal = Some(Modal::Prompt { purpose, input });
                }
                _ => self.modal = Some(Modal::Prompt { purpose, input }),
            },
            Modal::ConfirmDelete { secret } => match code {
                KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => {
                    self.confirm_delete_photo(secret, true)
                }
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                    self.confirm_delete_photo(secret, false)
                }
                _ => self.modal = Some(Modal::ConfirmDelete { secret }),
            },
        }
    }

    fn submit_prompt(&mut self, purpose: PromptPurpose, secret: Option<Secret>) {
        match purpose {
            PromptPurpose::Upload => {
                if self.upload.open(secret) {
                    self.upload_field = UploadField::Path;
                    self.path_input.clear();
                    self.status_message = "Paste or type the path of a photo".to_string();
                }
            }
            PromptPurpose::DeletePhoto => {
                if let Some(secret) = secret {
                    self.modal = Some(Modal::ConfirmDelete { secret });
                }
            }
            PromptPurpose::DeleteComment { timestamp, index } => {
                if self.detail_pending {
                    return;
                }
                match self
                    .detail
                    .prepare_delete_comment(secret, &timestamp, index, &self.feed)
                {
                    Ok(Some(request)) => {
                        self.detail_pending = true;
                        self.spawn(move |service| {
                            let result = request.send(service);
                            AsyncResponse::DeleteComment { request, result }
                        });
                    }
                    Ok(None) => {}
                    Err(err) => self.alert(err.to_string()),
                }
            }
        }
    }

    fn confirm_delete_photo(&mut self, secret: Secret, confirmed: bool) {
        if self.detail_pending {
            return;
        }
        let Some(request) = self.detail.prepare_delete_photo(Some(secret), confirmed) else {
            return;
        };
        self.detail_pending = true;
        self.spawn(move |service| {
            let result = request.send(service);
            AsyncResponse::DeletePhoto { request, result }
        });
    }

    fn handle_detail_key(&mut self, code: KeyCode) {
        if self.detail.comment_input().is_some() {
            match code {
                KeyCode::Esc => self.detail.cancel_comment(),
                KeyCode::Enter => self.submit_comment(),
                KeyCode::Backspace => {
                    if let Some(input) = self.detail.comment_input_mut() {
                        input.pop();
                    }
                }
                KeyCode::Char(ch) => {
                    if let Some(input) = self.detail.comment_input_mut() {
                        input.push(ch);
                    }
                }
                _ => {}
            }
            return;
        }

        match code {
            KeyCode::Esc | KeyCode::Char('q') => self.close_detail(),
            KeyCode::Char('l') => self.like(),
            KeyCode::Char('c') => self.detail.open_comment_form(),
            KeyCode::Down | KeyCode::Char('j') => self.detail.select_next_comment(),
            KeyCode::Up | KeyCode::Char('k') => self.detail.select_previous_comment(),
            KeyCode::Char('x') => {
                if let Some((index, comment)) = self.detail.selected_comment() {
                    self.modal = Some(Modal::Prompt {
                        purpose: PromptPurpose::DeleteComment {
                            timestamp: comment.timestamp.clone(),
                            index,
                        },
                        input: String::new(),
                    });
                }
            }
            KeyCode::Char('D') => {
                self.modal = Some(Modal::Prompt {
                    purpose: PromptPurpose::DeletePhoto,
                    input: String::new(),
                });
            }
            _ => {}
        }
    }

    fn like(&mut self) {
        if self.like_pending {
            return;
        }
        let Some(request) = self.detail.prepare_like() else {
            return;
        };
        self.like_pending = true;
        self.spawn(move |service| {
            let result = request.send(service);
            AsyncResponse::Like { request, result }
        });
    }

    fn submit_comment(&mut self) {
        if self.detail_pending {
            return;
        }
        let text = self.detail.comment_input().unwrap_or_default().to_string();
        match self.detail.prepare_comment(&text) {
            Ok(Some(request)) => {
                self.detail_pending = true;
                self.spawn(move |service| {
                    let result = request.send(service);
                    AsyncResponse::Comment { request, result }
                });
            }
            Ok(None) => {}
            Err(err) => self.alert(err.to_string()),
        }
    }

    fn handle_upload_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Esc => {
                self.upload.close();
                self.path_input.clear();
                self.status_message = if self.upload.is_uploading() {
                    "Upload continues in the background".to_string()
                } else {
                    "Upload cancelled".to_string()
                };
            }
            KeyCode::Tab | KeyCode::BackTab => {
                self.upload_field = match self.upload_field {
                    UploadField::Path => UploadField::Caption,
                    UploadField::Caption => UploadField::Path,
                };
            }
            KeyCode::Enter => match self.upload_field {
                UploadField::Path => self.select_upload_path(),
                UploadField::Caption => self.start_upload(),
            },
            KeyCode::Backspace => match self.upload_field {
                UploadField::Path => {
                    self.path_input.pop();
                }
                UploadField::Caption => {
                    self.upload.caption_mut().pop();
                }
            },
            KeyCode::Char(ch) => match self.upload_field {
                UploadField::Path => self.path_input.push(ch),
                UploadField::Caption => self.upload.caption_mut().push(ch),
            },
            _ => {}
        }
    }

    fn select_upload_path(&mut self) {
        let Some(path) = clean_path(&self.path_input) else {
            return;
        };
        match self.upload.select_file(&path) {
            Ok(true) => {
                self.status_message = self
                    .upload
                    .preview()
                    .map(|preview| format!("Ready: {}", preview.summary()))
                    .unwrap_or_else(|| "Photo selected".to_string());
                self.upload_field = UploadField::Caption;
            }
            Ok(false) => {
                self.status_message = format!("{} is not an image", path.display());
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %format!("{err:#}"), "could not select photo");
                self.status_message = format!("Could not open {}", path.display());
            }
        }
    }

    fn start_upload(&mut self) {
        let job = match self.upload.begin() {
            Ok(job) => job,
            Err(err) => {
                self.alert(err.to_string());
                return;
            }
        };
        let ticket = job.ticket();
        let service = Arc::clone(&self.service);
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let progress_tx = tx.clone();
            let result = job.run(service.as_ref(), |state| {
                let _ = progress_tx.send(AsyncResponse::UploadProgress { ticket, state });
            });
            let _ = tx.send(AsyncResponse::Upload { ticket, result });
        });
    }

    fn handle_paste(&mut self, text: &str) {
        let single_line = text.replace(['\r', '\n'], " ");
        if let Some(Modal::Prompt { input, .. }) = self.modal.as_mut() {
            input.push_str(single_line.trim());
        } else if self.modal.is_some() {
            return;
        } else if self.upload.is_open() {
            match self.upload_field {
                UploadField::Path => {
                    self.path_input = single_line.trim().to_string();
                    self.select_upload_path();
                }
                UploadField::Caption => self.upload.caption_mut().push_str(&single_line),
            }
        } else if let Some(input) = self.detail.comment_input_mut() {
            input.push_str(&single_line);
        }
        self.mark_dirty();
    }

    fn touch_target(&self, column: u16, row: u16) -> TouchTarget {
        if self.sidebar_area.is_some_and(|area| hit(area, column, row)) {
            TouchTarget::Sidebar
        } else if self.photo_area.is_some_and(|area| hit(area, column, row)) {
            TouchTarget::Photo
        } else {
            TouchTarget::Overlay
        }
    }

    fn handle_mouse(&mut self, event: MouseEvent) {
        if self.modal.is_some() || self.upload.is_open() {
            return;
        }
        let y = self.cells.row_to_px(event.row);

        if self.detail.is_open() {
            match event.kind {
                MouseEventKind::Down(MouseButton::Left) => {
                    let target = self.touch_target(event.column, event.row);
                    self.gesture.start(y, target);
                }
                MouseEventKind::Drag(MouseButton::Left) => {
                    if self.gesture.drag(y).is_some() {
                        self.mark_dirty();
                    }
                }
                MouseEventKind::Up(MouseButton::Left) => {
                    if self.gesture.end(y, Instant::now()) != SwipeOutcome::Ignored {
                        self.mark_dirty();
                    }
                }
                MouseEventKind::ScrollDown => {
                    self.detail.select_next_comment();
                    self.mark_dirty();
                }
                MouseEventKind::ScrollUp => {
                    self.detail.select_previous_comment();
                    self.mark_dirty();
                }
                _ => {}
            }
            return;
        }

        match event.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                let clicked = self
                    .card_hits
                    .iter()
                    .find(|(area, _)| hit(*area, event.column, event.row))
                    .map(|(_, index)| *index);
                if let Some(index) = clicked {
                    self.selected = index;
                    self.open_selected();
                    self.mark_dirty();
                }
            }
            MouseEventKind::ScrollDown => {
                self.move_selection(0, 1);
                self.mark_dirty();
            }
            MouseEventKind::ScrollUp => {
                self.move_selection(0, -1);
                self.mark_dirty();
            }
            _ => {}
        }
    }

    fn footer_text(&self) -> &'static str {
        if self.modal.is_some() {
            "Enter: confirm • Esc: cancel"
        } else if self.upload.is_open() {
            "Tab: switch field • Enter: select photo / upload • paste a path • Esc: close"
        } else if self.detail.comment_input().is_some() {
            "Enter: post comment • Esc: cancel"
        } else if self.detail.is_open() {
            "l: like • c: comment • j/k: select comment • x: delete comment • D: delete photo • Esc: close • drag down to dismiss"
        } else {
            "←↓↑→/hjkl: move • Enter: open • u: upload • r: reload • q: quit"
        }
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        let status_text = if self.is_loading() {
            format!("{} {}", self.spinner.frame(), self.status_message)
                .trim()
                .to_string()
        } else {
            self.status_message.clone()
        };
        let status_line = Paragraph::new(status_text).style(
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .bg(COLOR_PANEL_FOCUSED_BG)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_widget(status_line, layout[0]);

        self.draw_feed(frame, layout[1]);

        self.photo_area = None;
        self.sidebar_area = None;
        if self.detail.is_open() && !self.gesture.off_screen() {
            self.draw_detail(frame, layout[1]);
        }
        if self.upload.is_open() {
            self.draw_upload(frame, layout[1]);
        }
        if let Some(modal) = &self.modal {
            draw_modal(frame, layout[1], modal);
        }

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(COLOR_TEXT_SECONDARY)
                    .bg(COLOR_PANEL_BG)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        frame.render_widget(footer, layout[2]);
    }

    fn draw_feed(&mut self, frame: &mut Frame<'_>, area: Rect) {
        self.card_hits.clear();
        let block = Block::default()
            .title(Span::styled(
                " Galleria ",
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(COLOR_BORDER_IDLE))
            .style(Style::default().bg(COLOR_PANEL_BG));
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let placeholder = match self.feed.state() {
            FeedState::Idle | FeedState::Loading => {
                Some(format!("{} Loading photos...", self.spinner.frame()))
            }
            FeedState::Empty => Some("No photos yet. Press u to upload the first one.".to_string()),
            FeedState::Failed => Some(format!(
                "Could not load photos. Check the API settings in {} and press r to retry.",
                self.config_path
            )),
            FeedState::Ready => None,
        };
        if let Some(text) = placeholder {
            let paragraph = Paragraph::new(text)
                .style(Style::default().fg(COLOR_TEXT_SECONDARY))
                .alignment(Alignment::Center)
                .wrap(Wrap { trim: true });
            let middle = Rect {
                y: inner.y + inner.height / 2,
                height: (inner.height - inner.height / 2).min(2),
                ..inner
            };
            frame.render_widget(paragraph, middle);
            return;
        }

        self.draw_masonry(frame, inner);
    }

    fn draw_masonry(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let layout = self.feed.layout().clone();
        let count = layout.column_count().max(1);
        let constraints: Vec<Constraint> = (0..count)
            .map(|_| Constraint::Ratio(1, count as u32))
            .collect();
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(constraints)
            .split(area);

        if let Some((column, row)) = layout.position_of(self.selected) {
            let width = columns[column].width;
            let heights: Vec<u32> = layout.columns[column][..=row]
                .iter()
                .filter_map(|&index| self.feed.post(index))
                .map(|post| u32::from(card_height(post, width)))
                .collect();
            let bottom: u32 = heights.iter().sum();
            let top = bottom - heights.last().copied().unwrap_or(0);
            let scroll = u32::from(self.feed_scroll);
            let view = u32::from(area.height);
            if top < scroll {
                self.feed_scroll = top.min(u32::from(u16::MAX)) as u16;
            } else if bottom > scroll + view {
                self.feed_scroll = (bottom - view).min(u32::from(u16::MAX)) as u16;
            }
        }

        for (column, items) in layout.columns.iter().enumerate() {
            let column_area = columns[column];
            let mut y = i32::from(column_area.y) - i32::from(self.feed_scroll);
            for &index in items {
                let Some(post) = self.feed.post(index) else {
                    continue;
                };
                let lines = card_lines(post, column_area.width);
                let height = lines.len() as i32 + 2;
                let top = y;
                y += height;
                if top < i32::from(column_area.y) {
                    continue;
                }
                if top >= i32::from(column_area.bottom()) {
                    break;
                }
                let visible = (i32::from(column_area.bottom()) - top).min(height);
                let card = Rect {
                    x: column_area.x,
                    y: top as u16,
                    width: column_area.width,
                    height: visible as u16,
                };
                self.card_hits.push((card, index));

                let selected = index == self.selected;
                let border = if selected {
                    COLOR_BORDER_FOCUSED
                } else {
                    COLOR_BORDER_IDLE
                };
                let bg = if selected {
                    COLOR_PANEL_SELECTED_BG
                } else {
                    COLOR_PANEL_BG
                };
                let block = Block::default()
                    .borders(Borders::ALL)
                    .border_type(BorderType::Rounded)
                    .border_style(Style::default().fg(border))
                    .style(Style::default().bg(bg));
                frame.render_widget(Paragraph::new(Text::from(lines)).block(block), card);
            }
        }
    }

    fn draw_detail(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let Some(post) = self.detail.post() else {
            return;
        };
        let base = centered_rect(90, 90, area);
        let offset_rows = self.cells.px_to_rows(self.gesture.offset_px());
        let top = base.y.saturating_add(offset_rows);
        if top >= area.bottom() {
            return;
        }
        let overlay = Rect {
            y: top,
            height: base.height.min(area.bottom() - top),
            ..base
        };

        let mut base_style = Style::default().fg(COLOR_TEXT_PRIMARY).bg(COLOR_PANEL_BG);
        if self.gesture.opacity() < 0.75 {
            base_style = base_style.add_modifier(Modifier::DIM);
        }
        frame.render_widget(Clear, overlay);
        let block = Block::default()
            .title(Span::styled(
                " Photo ",
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(COLOR_BORDER_FOCUSED))
            .style(base_style);
        let inner = block.inner(overlay);
        frame.render_widget(block, overlay);

        let halves = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(inner);
        let (photo_area, sidebar_area) = (halves[0], halves[1]);

        let photo_width = photo_area.width.saturating_sub(1).max(1) as usize;
        let mut photo: Vec<Line<'static>> = Vec::new();
        let fill_rows = photo_area.height.saturating_sub(2) as usize;
        for _ in 0..fill_rows {
            photo.push(Line::from(Span::styled(
                "░".repeat(photo_width),
                Style::default().fg(COLOR_PHOTO),
            )));
        }
        photo.push(Line::from(Span::styled(
            post.image_url.clone(),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        )));
        frame.render_widget(
            Paragraph::new(Text::from(photo))
                .style(base_style)
                .wrap(Wrap { trim: false }),
            photo_area,
        );

        let side_width = sidebar_area.width.saturating_sub(2).max(1);
        let mut lines: Vec<Line<'static>> = Vec::new();
        for line in wrapped(post.caption_text(), side_width as usize) {
            lines.push(Line::from(Span::styled(
                line,
                Style::default().add_modifier(Modifier::BOLD),
            )));
        }
        lines.push(Line::from(Span::styled(
            post.posted_at(),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        )));
        lines.push(Line::default());

        let (icon, mut like_style) = if self.detail.is_liked() {
            (ICON_LIKED, Style::default().fg(COLOR_LIKE))
        } else {
            (ICON_UNLIKED, Style::default().fg(COLOR_TEXT_SECONDARY))
        };
        if self.detail.is_pulsing(Instant::now()) {
            like_style = like_style.add_modifier(Modifier::BOLD | Modifier::REVERSED);
        }
        lines.push(Line::from(vec![
            Span::styled(format!(" {icon} "), like_style),
            Span::raw(format!(" {}", self.detail.like_count())),
        ]));
        lines.push(Line::default());

        let comments = self.detail.comments();
        lines.push(Line::from(Span::styled(
            format!("Comments ({})", comments.len()),
            Style::default()
                .fg(COLOR_ACCENT)
                .add_modifier(Modifier::BOLD),
        )));
        let selected = self.detail.selected_comment().map(|(index, _)| index);
        let mut selected_line = 0usize;
        if comments.is_empty() {
            lines.push(Line::from(Span::styled(
                "No comments yet",
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )));
        }
        for (index, comment) in comments.iter().enumerate() {
            let mut block: Vec<Line<'static>> =
                wrapped(&format!("{}: {}", comment.username, comment.text), side_width as usize)
                    .into_iter()
                    .map(Line::from)
                    .collect();
            block.push(Line::from(Span::styled(
                comment.posted_at(),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )));
            if Some(index) == selected {
                selected_line = lines.len();
                for line in block.iter_mut() {
                    for span in line.spans.iter_mut() {
                        span.style = span.style.bg(COLOR_PANEL_SELECTED_BG);
                    }
                }
                pad_lines_to_width(&mut block, side_width);
            }
            lines.extend(block);
        }

        if let Some(input) = self.detail.comment_input() {
            lines.push(Line::default());
            lines.push(Line::from(vec![
                Span::styled("> ", Style::default().fg(COLOR_ACCENT)),
                Span::raw(format!("{input}▏")),
            ]));
        }

        let view = sidebar_area.height as usize;
        let scroll = if selected_line + 3 > view {
            selected_line + 3 - view
        } else {
            0
        };
        let sidebar = Paragraph::new(Text::from(lines))
            .style(base_style)
            .block(Block::default().borders(Borders::LEFT).border_style(
                Style::default().fg(COLOR_BORDER_IDLE),
            ))
            .scroll((scroll.min(usize::from(u16::MAX)) as u16, 0));
        frame.render_widget(sidebar, sidebar_area);

        self.photo_area = Some(photo_area);
        self.sidebar_area = Some(sidebar_area);
    }

    fn draw_upload(&self, frame: &mut Frame<'_>, area: Rect) {
        let popup = centered_rect(60, 50, area);
        frame.render_widget(Clear, popup);
        let block = Block::default()
            .title(Span::styled(
                " Upload photo ",
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(COLOR_BORDER_FOCUSED))
            .style(Style::default().fg(COLOR_TEXT_PRIMARY).bg(COLOR_PANEL_BG));

        let field = |label: &str, value: &str, active: bool| -> Line<'static> {
            let style = if active {
                Style::default()
                    .fg(COLOR_TEXT_PRIMARY)
                    .bg(COLOR_PANEL_SELECTED_BG)
            } else {
                Style::default().fg(COLOR_TEXT_SECONDARY)
            };
            let cursor = if active { "▏" } else { "" };
            Line::from(vec![
                Span::styled(format!("{label:>8} "), Style::default().fg(COLOR_ACCENT)),
                Span::styled(format!("{value}{cursor}"), style),
            ])
        };

        let mut lines = vec![
            field(
                "File:",
                &self.path_input,
                self.upload_field == UploadField::Path,
            ),
            field(
                "Caption:",
                self.upload.caption(),
                self.upload_field == UploadField::Caption,
            ),
            Line::default(),
        ];
        match self.upload.preview() {
            Some(preview) => lines.push(Line::from(Span::styled(
                format!("Preview: {}", preview.summary()),
                Style::default().fg(COLOR_SUCCESS),
            ))),
            None => lines.push(Line::from(Span::styled(
                "Paste or type the path of a photo, then press Enter",
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ))),
        }
        lines.push(Line::default());
        let state = self.upload.state();
        let button_style = if state.is_busy() {
            Style::default().fg(COLOR_TEXT_SECONDARY)
        } else {
            Style::default()
                .fg(COLOR_BG)
                .bg(COLOR_ACCENT)
                .add_modifier(Modifier::BOLD)
        };
        lines.push(Line::from(Span::styled(
            format!(" {} ", state.label()),
            button_style,
        )));

        frame.render_widget(
            Paragraph::new(Text::from(lines))
                .block(block)
                .wrap(Wrap { trim: false }),
            popup,
        );
    }
}

fn draw_modal(frame: &mut Frame<'_>, area: Rect, modal: &Modal) {
    let popup = centered_rect(50, 30, area);
    frame.render_widget(Clear, popup);
    let (title, lines): (&str, Vec<Line<'static>>) = match modal {
        Modal::Prompt { purpose, input } => (
            " Password ",
            vec![
                Line::from(purpose.title()),
                Line::default(),
                Line::from(Span::styled(
                    format!("{}▏", "•".repeat(input.chars().count())),
                    Style::default().fg(COLOR_ACCENT),
                )),
            ],
        ),
        Modal::ConfirmDelete { .. } => (
            " Delete photo ",
            vec![
                Line::from(DELETE_PHOTO_CONFIRM),
                Line::default(),
                Line::from(Span::styled(
                    "[y] Delete   [n] Cancel",
                    Style::default().fg(COLOR_ACCENT),
                )),
            ],
        ),
        Modal::Alert { message } => (
            " Galleria ",
            vec![
                Line::from(message.clone()),
                Line::default(),
                Line::from(Span::styled(
                    "Press Enter",
                    Style::default().fg(COLOR_TEXT_SECONDARY),
                )),
            ],
        ),
    };
    let block = Block::default()
        .title(Span::styled(
            title,
            Style::default()
                .fg(COLOR_ACCENT)
                .add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(COLOR_BORDER_FOCUSED))
        .style(Style::default().fg(COLOR_TEXT_PRIMARY).bg(COLOR_PANEL_FOCUSED_BG));
    frame.render_widget(
        Paragraph::new(Text::from(lines))
            .block(block)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true }),
        popup,
    );
}
