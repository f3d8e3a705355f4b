//! User-supplied upload metadata.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum title length accepted by the remote.
pub const MAX_TITLE_LEN: usize = 128;

/// Who may view the uploaded video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Privacy {
    /// Anyone
    Anybody,
    /// Only the uploader
    #[default]
    Nobody,
    /// Only the listed recipients
    Users,
    /// Anyone with the link
    Unlisted,
}

/// Validation failure for [`VideoSettings`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("Title must not exceed {max} characters", max = MAX_TITLE_LEN)]
    TitleTooLong,

    #[error("Privacy 'users' requires at least one recipient")]
    MissingRecipients,
}

/// Metadata attached to an upload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct VideoSettings {
    /// Video title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Video description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Visibility
    #[serde(default)]
    pub privacy: Privacy,

    /// Recipients when privacy is `users`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<String>>,
}

impl VideoSettings {
    /// Create settings with a title and default privacy.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_privacy(mut self, privacy: Privacy) -> Self {
        self.privacy = privacy;
        self
    }

    pub fn with_users(mut self, users: Vec<String>) -> Self {
        self.users = Some(users);
        self
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if let Some(title) = &self.title {
            if title.chars().count() > MAX_TITLE_LEN {
                return Err(SettingsError::TitleTooLong);
            }
        }

        if self.privacy == Privacy::Users
            && self.users.as_ref().map_or(true, |users| users.is_empty())
        {
            return Err(SettingsError::MissingRecipients);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(VideoSettings::default().validate().is_ok());
        assert!(VideoSettings::new("hey").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_long_title() {
        let settings = VideoSettings::new("x".repeat(MAX_TITLE_LEN + 1));
        assert_eq!(settings.validate(), Err(SettingsError::TitleTooLong));
    }

    #[test]
    fn test_users_privacy_requires_recipients() {
        let settings = VideoSettings::new("hey").with_privacy(Privacy::Users);
        assert_eq!(settings.validate(), Err(SettingsError::MissingRecipients));

        let settings = settings.with_users(vec!["alice".into()]);
        assert!(settings.validate().is_ok());
    }
}
