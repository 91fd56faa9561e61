//! The control panel: keeps the OCR credential, asks the page agent for the open chapter and
//! shows or copies the result.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

use crate::agent::PageAgentHandle;
use crate::clipboard::ClipboardWriter;
use crate::messages::{self, PageRequest, PanelMessage, clipboard_text};
use crate::site;
use crate::storage::{self, KeyValueStore};
use crate::ui::NoticeKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub kind: NoticeKind,
    pub message: String,
}

impl Status {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Info,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == NoticeKind::Error
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

pub struct ControlPanel {
    store: Arc<dyn KeyValueStore>,
    agent: Option<PageAgentHandle>,
    clipboard: Option<Box<dyn ClipboardWriter>>,
    updates: Option<broadcast::Receiver<PanelMessage>>,
    key_input: String,
    key_visible: bool,
    display: String,
    alerts: Vec<String>,
}

impl ControlPanel {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            agent: None,
            clipboard: None,
            updates: None,
            key_input: String::new(),
            key_visible: false,
            display: String::new(),
            alerts: Vec::new(),
        }
    }

    /// Connects the panel to the page agent of the active chapter.
    pub fn with_agent(mut self, agent: PageAgentHandle) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn with_clipboard(mut self, clipboard: Box<dyn ClipboardWriter>) -> Self {
        self.clipboard = Some(clipboard);
        self
    }

    pub fn with_updates(mut self, updates: broadcast::Receiver<PanelMessage>) -> Self {
        self.updates = Some(updates);
        self
    }

    /// Loads the stored credential into the key field.
    pub async fn open(&mut self) -> Status {
        match storage::load_api_key(self.store.as_ref()).await {
            Ok(Some(api_key)) => {
                self.key_input = api_key;
                Status::success("API Key is set (hidden).")
            }
            Ok(None) => Status::error("API Key not set. Please save your key."),
            Err(err) => {
                tracing::error!(error = %format!("{err:#}"), "load api key");
                Status::error("Error loading API key.")
            }
        }
    }

    pub async fn save_key(&mut self, input: &str) -> Status {
        if input.trim().is_empty() {
            return Status::error("API Key cannot be empty.");
        }
        match storage::save_api_key(self.store.as_ref(), input).await {
            Ok(saved) => {
                self.key_input = saved;
                self.key_visible = false;
                Status::success("API Key saved successfully!")
            }
            Err(err) => {
                tracing::error!(error = %format!("{err:#}"), "save api key");
                Status::error("Error saving API key.")
            }
        }
    }

    /// Flips between masked and clear display of the key; returns whether it is now visible.
    pub fn toggle_key_visibility(&mut self) -> bool {
        self.key_visible = !self.key_visible;
        self.key_visible
    }

    pub fn key_visible(&self) -> bool {
        self.key_visible
    }

    pub fn key_field(&self) -> String {
        if self.key_visible {
            self.key_input.clone()
        } else {
            "•".repeat(self.key_input.chars().count())
        }
    }

    pub fn display(&self) -> &str {
        &self.display
    }

    pub fn alerts(&self) -> &[String] {
        &self.alerts
    }

    /// Asks the page agent of `tab_url` for its chapter and copies the result.
    pub async fn fetch_chapter(&mut self, tab_url: &str) -> Status {
        self.display.clear();

        let api_key = match storage::load_api_key(self.store.as_ref()).await {
            Ok(Some(api_key)) => api_key,
            Ok(None) => {
                self.alert("API Key is not set. Save it with `chapterclip key set`.");
                return Status::error("API Key not set. Please save your key.");
            }
            Err(err) => {
                tracing::error!(error = %format!("{err:#}"), "load api key for fetch");
                return Status::error("Error fetching API key for operation.");
            }
        };

        if !site::is_chapter_url(tab_url) {
            return Status::error("Not a Faloo chapter page. Please navigate to a chapter.");
        }
        let Some(agent) = self.agent.as_ref() else {
            return Status::error("Cannot access active tab.");
        };

        tracing::info!(url = %tab_url, "requesting chapter from page agent");
        let response =
            match messages::call(agent, PageRequest::ProcessChapterForPopup { api_key }).await {
                Ok(response) => response,
                Err(err) => {
                    let reason = err.to_string();
                    let reason = reason.trim_end_matches('.');
                    self.display = format!("Error from content script: {reason}");
                    return Status::error(format!(
                        "Error: {reason}. Is Faloo page open & script running correctly?"
                    ));
                }
            };

        if !response.success {
            let error = response
                .error
                .unwrap_or_else(|| "Failed to fetch chapter content.".to_owned());
            self.display = format!(
                "Error: {error}\nTitle: {}",
                response.title.unwrap_or_default()
            );
            return Status::error(format!("Failed: {error}"));
        }

        let text = clipboard_text(
            response.title.as_deref().unwrap_or_default(),
            response.content.as_deref().unwrap_or_default(),
        );
        self.display = text;

        let Some(clipboard) = self.clipboard.as_mut() else {
            return Status::success("Chapter fetched.");
        };
        match clipboard.write_text(&self.display) {
            Ok(()) => Status::success("Chapter fetched & copied to clipboard!"),
            Err(err) => {
                tracing::warn!(error = %err, "copy fetched chapter");
                Status::error("Chapter fetched, but failed to copy. Copy the displayed text instead.")
            }
        }
    }

    /// Copies the displayed chapter; error text is never copied.
    pub fn copy_display(&mut self) -> Status {
        if self.display.is_empty() {
            return Status::info("Nothing to copy.");
        }
        if self.display.starts_with("Error") {
            return Status::info("Cannot copy an error message.");
        }

        let Some(clipboard) = self.clipboard.as_mut() else {
            return Status::error("Failed to copy text.");
        };
        match clipboard.write_text(&self.display) {
            Ok(()) => Status::success("Text copied to clipboard!"),
            Err(err) => {
                tracing::warn!(error = %err, "copy displayed text");
                Status::error("Failed to copy text.")
            }
        }
    }

    pub fn apply_update(&mut self, message: PanelMessage) {
        match message {
            PanelMessage::UpdatePopupDisplay(result) => {
                self.display = if result.success {
                    clipboard_text(
                        result.title.as_deref().unwrap_or_default(),
                        result.content.as_deref().unwrap_or_default(),
                    )
                } else {
                    format!(
                        "Error from content script: {}\nTitle: {}",
                        result.error.as_deref().unwrap_or("Unknown error"),
                        result.title.as_deref().unwrap_or_default()
                    )
                };
            }
        }
    }

    /// Applies every unsolicited update received since the last poll.
    pub fn poll_updates(&mut self) -> usize {
        let mut pending = Vec::new();
        if let Some(updates) = self.updates.as_mut() {
            loop {
                match updates.try_recv() {
                    Ok(message) => pending.push(message),
                    Err(TryRecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "control panel missed updates");
                    }
                    Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                }
            }
        }

        let applied = pending.len();
        for message in pending {
            self.apply_update(message);
        }
        applied
    }

    fn alert(&mut self, message: &str) {
        tracing::error!(message, "alert");
        self.alerts.push(message.to_owned());
    }
}
