//! Message contracts between the control panel, the page agent and the fetch relay.
//!
//! Requests travel as [`Envelope`]s over an mpsc channel. The reply sender is moved into the
//! envelope, so a handler that drops a request without answering is observed by the caller
//! as [`ChannelError::NoResponse`] rather than as an endless wait.

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum PageRequest {
    #[serde(rename = "processChapterForPopup", rename_all = "camelCase")]
    ProcessChapterForPopup {
        #[serde(default)]
        api_key: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractionResult {
    pub fn succeeded(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            success: true,
            title: Some(title.into()),
            content: Some(content.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, title: Option<String>) -> Self {
        Self {
            success: false,
            title,
            content: None,
            error: Some(error.into()),
        }
    }

    /// The text that goes to the clipboard for a successful extraction.
    pub fn clipboard_text(&self) -> Option<String> {
        if !self.success {
            return None;
        }
        Some(clipboard_text(
            self.title.as_deref().unwrap_or_default(),
            self.content.as_deref().unwrap_or_default(),
        ))
    }
}

pub fn clipboard_text(title: &str, content: &str) -> String {
    format!("Title: {title}\n\n{content}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum RelayRequest {
    #[serde(rename = "fetchImageAsBase64", rename_all = "camelCase")]
    FetchImageAsBase64 {
        #[serde(default)]
        image_url: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl RelayResponse {
    pub fn data_url(data_url: String) -> Self {
        Self {
            success: true,
            data_url: Some(data_url),
            error: None,
            details: None,
        }
    }

    pub fn failed(error: impl Into<String>, details: Option<String>) -> Self {
        Self {
            success: false,
            data_url: None,
            error: Some(error.into()),
            details,
        }
    }
}

/// Unsolicited messages for whichever control panel happens to be open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum PanelMessage {
    #[serde(rename = "updatePopupDisplay")]
    UpdatePopupDisplay(ExtractionResult),
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Could not establish connection. Receiving end does not exist.")]
    NoReceiver,
    #[error("The message port closed before a response was received.")]
    NoResponse,
}

pub struct Envelope<Req, Resp> {
    pub request: Req,
    reply: oneshot::Sender<Resp>,
}

impl<Req, Resp> Envelope<Req, Resp> {
    pub fn into_parts(self) -> (Req, Responder<Resp>) {
        (self.request, Responder(self.reply))
    }
}

/// Answers one request. Consumed by [`Responder::respond`], so a reply is sent at most once.
pub struct Responder<Resp>(oneshot::Sender<Resp>);

impl<Resp> Responder<Resp> {
    /// Returns false when the caller stopped waiting.
    pub fn respond(self, response: Resp) -> bool {
        self.0.send(response).is_ok()
    }
}

pub type Sender<Req, Resp> = mpsc::Sender<Envelope<Req, Resp>>;
pub type Receiver<Req, Resp> = mpsc::Receiver<Envelope<Req, Resp>>;

pub fn channel<Req, Resp>(capacity: usize) -> (Sender<Req, Resp>, Receiver<Req, Resp>) {
    mpsc::channel(capacity.max(1))
}

/// Sends `request` and waits for its single reply.
pub async fn call<Req, Resp>(tx: &Sender<Req, Resp>, request: Req) -> Result<Resp, ChannelError> {
    let (reply, response) = oneshot::channel();
    tx.send(Envelope { request, reply })
        .await
        .map_err(|_| ChannelError::NoReceiver)?;
    response.await.map_err(|_| ChannelError::NoResponse)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered(usize),
    NoSubscriber,
}

/// Best-effort fan-out to open control panels.
#[derive(Debug, Clone)]
pub struct PanelChannel {
    tx: broadcast::Sender<PanelMessage>,
}

impl Default for PanelChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl PanelChannel {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelMessage> {
        self.tx.subscribe()
    }

    pub fn publish(&self, message: PanelMessage) -> Delivery {
        match self.tx.send(message) {
            Ok(receivers) => Delivery::Delivered(receivers),
            Err(_) => {
                tracing::debug!("no control panel is listening; update dropped");
                Delivery::NoSubscriber
            }
        }
    }
}
