use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config;
use crate::data::{GalleryService, HttpGalleryService, MockGalleryService};
use crate::gallery;
use crate::storage;
use crate::ui;

/// Password accepted by the built-in sample gallery.
pub const OFFLINE_PASSWORD: &str = "galleria";

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_file: Option<PathBuf>,
    pub offline: bool,
}

pub fn run(opts: RunOptions) -> Result<()> {
    let cfg = config::load(config::LoadOptions {
        config_file: opts.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;
    let config_path = opts.config_file.clone().or_else(config::default_path);
    let display_path = friendly_path(config_path.as_ref());

    let store = Arc::new(
        storage::Store::open(storage::Options {
            path: cfg.storage.path.clone(),
        })
        .context("open storage")?,
    );

    let (service, status): (Arc<dyn GalleryService>, String) = if opts.offline {
        tracing::info!("using the built-in sample gallery");
        (
            Arc::new(MockGalleryService::with_sample_posts(OFFLINE_PASSWORD)),
            format!("Offline sample gallery (password: {OFFLINE_PASSWORD})"),
        )
    } else {
        let client = gallery::Client::new(cfg.api.client_config()).with_context(|| {
            format!(
                "create gallery client (set api.base_url in {display_path} or run with --offline)"
            )
        })?;
        tracing::info!(base_url = %cfg.api.base_url, "gallery client ready");
        (
            Arc::new(HttpGalleryService::new(Arc::new(client))),
            "Loading photos...".to_string(),
        )
    };

    let options = ui::Options {
        status_message: status,
        service,
        store: store.clone(),
        compress: cfg.upload.compress_options(),
        cell_width_px: cfg.ui.cell_width_px,
        cell_height_px: cfg.ui.cell_height_px,
        resize_debounce: cfg.ui.resize_debounce,
        config_path: display_path,
    };

    let mut model = ui::Model::new(options);
    let result = model.run();
    drop(model);

    if let Ok(store) = Arc::try_unwrap(store) {
        store.close().context("close storage")?;
    }
    result
}

fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/galleria/config.yaml".to_string()
    }
}
