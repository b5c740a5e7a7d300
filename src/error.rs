use std::fmt;

use crate::gallery::{Ack, INVALID_PASSWORD};

/// User action a failure is reported against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    LoadPhotos,
    ProcessPhoto,
    UploadPhoto,
    DeletePhoto,
    AddComment,
    DeleteComment,
    AddLike,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Action::LoadPhotos => "load photos",
            Action::ProcessPhoto => "process photo",
            Action::UploadPhoto => "upload photo",
            Action::DeletePhoto => "delete photo",
            Action::AddComment => "add comment",
            Action::DeleteComment => "delete comment",
            Action::AddLike => "add like",
        };
        f.write_str(label)
    }
}

/// Failure of a user action. `Display` is the text shown in the alert.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("{0}")]
    Validation(&'static str),

    #[error("{0}")]
    NotFound(&'static str),

    #[error("Incorrect password!")]
    InvalidSecret,

    #[error("Failed to {action}: {}", .detail.as_deref().unwrap_or("Unknown error"))]
    Rejected {
        action: Action,
        detail: Option<String>,
    },

    #[error("Failed to {0}")]
    Failed(Action),

    #[error("Failed to {action}. Please try again.")]
    Transport { action: Action, reason: String },

    #[error("Failed to load photos. Please check your API endpoints in the config file")]
    FeedUnavailable { reason: String },

    #[error("An upload is already in progress")]
    Busy,
}

impl ActionError {
    pub fn transport(action: Action, err: &anyhow::Error) -> Self {
        tracing::error!(%action, error = %format!("{err:#}"), "request failed");
        ActionError::Transport {
            action,
            reason: format!("{err:#}"),
        }
    }
}

/// Outcome of an action the server confirmed (or one that had nothing to do).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Unchanged,
    Uploaded,
    PhotoDeleted,
    CommentAdded,
    CommentDeleted,
    Liked,
}

impl Notice {
    pub fn message(&self) -> Option<&'static str> {
        match self {
            Notice::Uploaded => Some("✨ Photo uploaded successfully!"),
            Notice::PhotoDeleted => Some("Photo deleted successfully!"),
            _ => None,
        }
    }

    pub fn reloads_feed(&self) -> bool {
        matches!(self, Notice::Uploaded | Notice::PhotoDeleted)
    }
}

/// Maps a mutating call's settled result onto the shared error taxonomy.
pub fn settle(action: Action, result: anyhow::Result<Ack>) -> Result<(), ActionError> {
    match result {
        Ok(ack) if ack.success => Ok(()),
        Ok(ack) if ack.error.as_deref() == Some(INVALID_PASSWORD) => {
            tracing::warn!(%action, "server rejected password");
            Err(ActionError::InvalidSecret)
        }
        Ok(ack) => {
            tracing::warn!(%action, error = ?ack.error, "server rejected request");
            Err(ActionError::Rejected {
                action,
                detail: ack.error.filter(|detail| !detail.is_empty()),
            })
        }
        Err(err) => Err(ActionError::transport(action, &err)),
    }
}
