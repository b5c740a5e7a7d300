use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::compress::{self, CompressOptions, CompressedImage};
use crate::data::GalleryService;
use crate::error::{self, Action, ActionError, Notice};
use crate::gallery::Secret;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmitState {
    #[default]
    Idle,
    Compressing,
    Uploading,
}

impl SubmitState {
    pub fn label(self) -> &'static str {
        match self {
            SubmitState::Idle => "Upload",
            SubmitState::Compressing => "Compressing...",
            SubmitState::Uploading => "Uploading...",
        }
    }

    pub fn is_busy(self) -> bool {
        self != SubmitState::Idle
    }
}

/// Identifies one upload job and the form it was started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadTicket {
    job: u64,
    form: u64,
}

/// The upload modal's form. The secret lives here for as long as the modal is
/// open and is dropped by `close`.
///
/// A running job outlives its form: closing the modal keeps the submit control
/// busy until that job settles, so only one upload is ever in flight.
#[derive(Debug, Default)]
pub struct UploadSession {
    open: bool,
    secret: Option<Secret>,
    file: Option<PathBuf>,
    caption: String,
    preview: Option<CompressedImage>,
    state: SubmitState,
    options: CompressOptions,
    form: u64,
    next_job: u64,
    in_flight: Option<u64>,
}

impl UploadSession {
    pub fn new(options: CompressOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Opens the form. `None` (cancelled or empty prompt) leaves it closed.
    pub fn open(&mut self, secret: Option<Secret>) -> bool {
        let Some(secret) = secret else {
            return false;
        };
        self.clear_form();
        self.form += 1;
        self.secret = Some(secret);
        self.open = true;
        true
    }

    pub fn close(&mut self) {
        self.clear_form();
        self.open = false;
    }

    fn clear_form(&mut self) {
        self.secret = None;
        self.file = None;
        self.caption.clear();
        self.preview = None;
        if self.in_flight.is_none() {
            self.state = SubmitState::Idle;
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn preview(&self) -> Option<&CompressedImage> {
        self.preview.as_ref()
    }

    pub fn caption(&self) -> &str {
        &self.caption
    }

    pub fn caption_mut(&mut self) -> &mut String {
        &mut self.caption
    }

    pub fn set_caption(&mut self, caption: impl Into<String>) {
        self.caption = caption.into();
    }

    pub fn state(&self) -> SubmitState {
        self.state
    }

    pub fn is_uploading(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Picks the photo to upload. Returns `false` and keeps the previous choice
    /// when the file is not an image.
    pub fn select_file(&mut self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("upload: read {}", path.display()))?;
        if !compress::is_image(&bytes) {
            tracing::debug!(path = %path.display(), "ignoring non-image selection");
            return Ok(false);
        }
        let preview = compress::compress(&bytes, self.options)
            .with_context(|| format!("upload: preview {}", path.display()))?;
        self.file = Some(path.to_path_buf());
        self.preview = preview;
        Ok(true)
    }

    pub fn begin(&mut self) -> Result<UploadJob, ActionError> {
        if self.in_flight.is_some() || self.state.is_busy() {
            return Err(ActionError::Busy);
        }
        let Some(path) = self.file.clone() else {
            return Err(ActionError::Validation("Please select a photo first!"));
        };
        let Some(secret) = self.secret.clone() else {
            return Err(ActionError::Validation("No password provided"));
        };
        self.next_job += 1;
        let ticket = UploadTicket {
            job: self.next_job,
            form: self.form,
        };
        self.in_flight = Some(ticket.job);
        self.state = SubmitState::Compressing;
        Ok(UploadJob {
            ticket,
            path,
            caption: self.caption.clone(),
            secret,
            options: self.options,
        })
    }

    pub fn set_progress(&mut self, ticket: UploadTicket, state: SubmitState) {
        if self.in_flight == Some(ticket.job) {
            self.state = state;
        }
    }

    /// Settles a finished job. The submit control always returns to idle. The
    /// form closes on success, but only if it is still the one the job came
    /// from; a form reopened in the meantime is left alone.
    pub fn finish(
        &mut self,
        ticket: UploadTicket,
        result: Result<(), ActionError>,
    ) -> Result<Notice, ActionError> {
        if self.in_flight != Some(ticket.job) {
            tracing::warn!(job = ticket.job, "ignoring result of an unknown upload job");
            return Ok(Notice::Unchanged);
        }
        self.in_flight = None;
        self.state = SubmitState::Idle;
        result?;
        if self.open && self.form == ticket.form {
            self.close();
        }
        Ok(Notice::Uploaded)
    }

    pub fn submit(&mut self, service: &dyn GalleryService) -> Result<Notice, ActionError> {
        let job = self.begin()?;
        let result = job.run(service, |_| {});
        self.finish(job.ticket(), result)
    }
}

/// Everything a worker thread needs to compress and upload one photo.
#[derive(Debug, Clone)]
pub struct UploadJob {
    ticket: UploadTicket,
    path: PathBuf,
    caption: String,
    secret: Secret,
    options: CompressOptions,
}

impl UploadJob {
    pub fn ticket(&self) -> UploadTicket {
        self.ticket
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run(
        &self,
        service: &dyn GalleryService,
        mut progress: impl FnMut(SubmitState),
    ) -> Result<(), ActionError> {
        let compressed = match compress::compress_file(&self.path, self.options) {
            Ok(Some(compressed)) => compressed,
            Ok(None) => return Err(ActionError::Validation("Please select a photo first!")),
            Err(err) => return Err(ActionError::transport(Action::ProcessPhoto, &err)),
        };
        tracing::info!(summary = %compressed.summary(), "uploading photo");

        progress(SubmitState::Uploading);
        let result = service.upload_photo(&compressed.data_url, &self.caption, &self.secret);
        error::settle(Action::UploadPhoto, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MockGalleryService;
    use base64::{engine::general_purpose, Engine as _};
    use image::{ImageBuffer, ImageFormat, Rgb, RgbImage};
    use tempfile::TempDir;

    fn write_png(dir: &TempDir, name: &str, width: u32, height: u32) -> PathBuf {
        let img: RgbImage = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 200) as u8, (y % 200) as u8, 90])
        });
        let path = dir.path().join(name);
        img.save_with_format(&path, ImageFormat::Png).unwrap();
        path
    }

    fn small_options() -> CompressOptions {
        CompressOptions {
            max_width: 120,
            max_height: 120,
            quality: 0.85,
        }
    }

    fn session_with_secret(secret: &str) -> UploadSession {
        let mut session = UploadSession::new(small_options());
        assert!(session.open(Secret::new(secret)));
        session
    }

    #[test]
    fn labels_follow_submit_state() {
        assert_eq!(SubmitState::Idle.label(), "Upload");
        assert_eq!(SubmitState::Compressing.label(), "Compressing...");
        assert_eq!(SubmitState::Uploading.label(), "Uploading...");
    }

    #[test]
    fn open_requires_a_secret() {
        let mut session = UploadSession::default();
        assert!(!session.open(Secret::new("")));
        assert!(!session.is_open());
    }

    #[test]
    fn submit_without_file_is_rejected_before_any_call() {
        let service = MockGalleryService::with_sample_posts("pw");
        let mut session = session_with_secret("pw");
        let err = session.submit(&service).unwrap_err();
        assert_eq!(err.to_string(), "Please select a photo first!");
        assert!(service.calls().is_empty());
        assert_eq!(session.state(), SubmitState::Idle);
    }

    #[test]
    fn non_image_selection_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("notes.txt");
        std::fs::write(&text, "shopping list").unwrap();
        let mut session = session_with_secret("pw");
        assert!(!session.select_file(&text).unwrap());
        assert!(session.file().is_none());
        assert!(session.preview().is_none());
    }

    #[test]
    fn upload_sends_compressed_jpeg_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(&dir, "wide.png", 300, 200);
        let service = MockGalleryService::with_sample_posts("pw");
        let mut session = session_with_secret("pw");
        assert!(session.select_file(&path).unwrap());
        assert_eq!(session.preview().map(|p| (p.width, p.height)), Some((120, 80)));
        session.set_caption("beach day");

        let notice = session.submit(&service).unwrap();
        assert_eq!(notice, Notice::Uploaded);
        assert_eq!(notice.message(), Some("✨ Photo uploaded successfully!"));
        assert!(notice.reloads_feed());
        assert!(!session.is_open());
        assert!(!session.has_secret());
        assert!(session.file().is_none());
        assert_eq!(session.caption(), "");
        assert_eq!(session.state(), SubmitState::Idle);

        let uploads = service.uploads();
        assert_eq!(uploads.len(), 1);
        let (image, caption) = &uploads[0];
        assert_eq!(caption, "beach day");
        let payload = image.strip_prefix(compress::DATA_URL_PREFIX).unwrap();
        let bytes = general_purpose::STANDARD.decode(payload).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (120, 80));
    }

    #[test]
    fn wrong_secret_keeps_form_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(&dir, "a.png", 40, 30);
        let service = MockGalleryService::with_sample_posts("pw");
        let mut session = session_with_secret("guess");
        session.select_file(&path).unwrap();

        let err = session.submit(&service).unwrap_err();
        assert_eq!(err.to_string(), "Incorrect password!");
        assert!(session.is_open());
        assert_eq!(session.file(), Some(path.as_path()));
        assert_eq!(session.state(), SubmitState::Idle);
        assert!(service.uploads().is_empty());
    }

    #[test]
    fn transport_failure_reports_retry_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(&dir, "a.png", 40, 30);
        let service = MockGalleryService::with_sample_posts("pw");
        service.set_offline(true);
        let mut session = session_with_secret("pw");
        session.select_file(&path).unwrap();
        let err = session.submit(&service).unwrap_err();
        assert_eq!(err.to_string(), "Failed to upload photo. Please try again.");
        assert_eq!(session.state().label(), "Upload");
    }

    #[test]
    fn second_begin_while_busy_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(&dir, "a.png", 40, 30);
        let mut session = session_with_secret("pw");
        session.select_file(&path).unwrap();

        let job = session.begin().unwrap();
        assert_eq!(job.path(), path.as_path());
        assert_eq!(session.state(), SubmitState::Compressing);
        assert!(matches!(session.begin(), Err(ActionError::Busy)));

        session.set_progress(job.ticket(), SubmitState::Uploading);
        assert_eq!(session.state().label(), "Uploading...");
        session
            .finish(job.ticket(), Err(ActionError::Failed(Action::UploadPhoto)))
            .unwrap_err();
        assert_eq!(session.state(), SubmitState::Idle);
        assert!(!session.is_uploading());
    }

    #[test]
    fn closing_mid_upload_keeps_the_guard_and_spares_the_new_form() {
        let dir = tempfile::tempdir().unwrap();
        let first_path = write_png(&dir, "first.png", 40, 30);
        let second_path = write_png(&dir, "second.png", 30, 40);
        let service = MockGalleryService::with_sample_posts("pw");
        let mut session = session_with_secret("pw");
        session.select_file(&first_path).unwrap();
        let first = session.begin().unwrap();

        session.close();
        assert!(session.is_uploading());
        assert_eq!(session.state(), SubmitState::Compressing);

        assert!(session.open(Secret::new("pw")));
        session.select_file(&second_path).unwrap();
        session.set_caption("second");
        assert!(matches!(session.begin(), Err(ActionError::Busy)));

        let result = first.run(&service, |_| {});
        let notice = session.finish(first.ticket(), result).unwrap();
        assert_eq!(notice, Notice::Uploaded);
        assert_eq!(service.uploads().len(), 1);

        assert!(session.is_open());
        assert!(session.has_secret());
        assert_eq!(session.caption(), "second");
        assert_eq!(session.file(), Some(second_path.as_path()));
        assert_eq!(session.state(), SubmitState::Idle);

        let second = session.begin().unwrap();
        assert_ne!(second.ticket(), first.ticket());
        assert_eq!(
            session.finish(first.ticket(), Ok(())).unwrap(),
            Notice::Unchanged
        );
        assert_eq!(session.state(), SubmitState::Compressing);
    }

    #[test]
    fn job_reports_progress_before_upload() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(&dir, "a.png", 40, 30);
        let service = MockGalleryService::with_sample_posts("pw");
        let mut session = session_with_secret("pw");
        session.select_file(&path).unwrap();
        let job = session.begin().unwrap();

        let mut seen = Vec::new();
        job.run(&service, |state| seen.push(state)).unwrap();
        assert_eq!(seen, vec![SubmitState::Uploading]);
    }

    #[test]
    fn close_forgets_secret() {
        let mut session = session_with_secret("pw");
        session.set_caption("x");
        session.close();
        assert!(!session.has_secret());
        assert_eq!(session.caption(), "");
        let err = session.begin().unwrap_err();
        assert_eq!(err.to_string(), "Please select a photo first!");
    }
}
