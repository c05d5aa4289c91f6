//! Collaborators the capture endpoint delegates to: window enumeration,
//! pixel capture and input injection.

use std::collections::BTreeMap;

use async_trait::async_trait;
use panelcast_common::protocol::Blob;
use panelcast_common::{new_id, ProviderError};
use serde::{Deserialize, Serialize};

use crate::control::InputEvent;

/// One capturable surface as published in the window catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowInfo {
    pub source_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    /// Provider-specific fields passed through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Blob>,
}

impl WindowInfo {
    pub fn new(source_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            name: name.into(),
            thumbnail: None,
            extra: BTreeMap::new(),
        }
    }

    /// Parse a catalogue entry received from the broker.
    pub fn from_blob(blob: &Blob) -> Option<Self> {
        serde_json::from_value(blob.clone()).ok()
    }
}

/// A live capture of one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    pub id: String,
    pub source_id: String,
}

impl MediaStream {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            source_id: source_id.into(),
        }
    }
}

#[async_trait]
pub trait WindowProvider: Send + Sync {
    async fn list_windows(&self) -> Result<Vec<WindowInfo>, ProviderError>;
}

#[async_trait]
pub trait CaptureProvider: Send + Sync {
    async fn start_capture(&self, source_id: &str) -> Result<MediaStream, ProviderError>;
}

#[async_trait]
pub trait InputInjector: Send + Sync {
    async fn inject(&self, source_id: &str, event: &InputEvent) -> Result<(), ProviderError>;
}

// ---------------------------------------------------------------------------
// Headless implementations
// ---------------------------------------------------------------------------

/// Fixed window list. Capture requests succeed only for listed sources.
#[derive(Debug, Clone, Default)]
pub struct StaticWindows {
    windows: Vec<WindowInfo>,
}

impl StaticWindows {
    pub fn new(windows: Vec<WindowInfo>) -> Self {
        Self { windows }
    }
}

#[async_trait]
impl WindowProvider for StaticWindows {
    async fn list_windows(&self) -> Result<Vec<WindowInfo>, ProviderError> {
        Ok(self.windows.clone())
    }
}

#[async_trait]
impl CaptureProvider for StaticWindows {
    async fn start_capture(&self, source_id: &str) -> Result<MediaStream, ProviderError> {
        if self.windows.iter().any(|w| w.source_id == source_id) {
            Ok(MediaStream::new(source_id))
        } else {
            Err(ProviderError::SourceNotFound(source_id.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn window_info_keeps_extra_fields() {
        let blob = json!({
            "sourceId": "window:42",
            "name": "Editor",
            "thumbnail": "data:image/png;base64,AAAA",
            "appName": "code"
        });
        let info = WindowInfo::from_blob(&blob).unwrap();
        assert_eq!(info.source_id, "window:42");
        assert_eq!(info.extra.get("appName"), Some(&json!("code")));
        assert_eq!(serde_json::to_value(&info).unwrap(), blob);
    }

    #[test]
    fn window_info_rejects_entries_without_source() {
        assert!(WindowInfo::from_blob(&json!({"name": "x"})).is_none());
    }

    #[tokio::test]
    async fn static_windows_capture_known_sources_only() {
        let provider = StaticWindows::new(vec![WindowInfo::new("screen:0", "Primary")]);
        let stream = provider.start_capture("screen:0").await.unwrap();
        assert_eq!(stream.source_id, "screen:0");
        assert!(matches!(
            provider.start_capture("screen:9").await,
            Err(ProviderError::SourceNotFound(_))
        ));
        assert_eq!(provider.list_windows().await.unwrap().len(), 1);
    }
}
