//! The page agent: classifies the open chapter, extracts its text (directly, or through the
//! VIP image pipeline), and answers control panel requests.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use kuchikiki::NodeRef;

use crate::capture::EditLog;
use crate::clipboard::ClipboardWriter;
use crate::messages::{
    self, ExtractionResult, PageRequest, PanelChannel, PanelMessage, RelayResponse,
};
use crate::ocr::OcrClient;
use crate::page::{self, ChapterKind, ChapterPage};
use crate::raster::Rasterizer;
use crate::relay::ImageRelay;
use crate::site;
use crate::storage::{self, KeyValueStore};
use crate::ui::{self, NoticeKind, PageUi};

pub const BUSY: &str = "Another chapter extraction is already in progress.";
pub const NO_ACTION: &str = "No chapter action is available on this page.";
pub const KEY_NOT_PROVIDED: &str = "API Key not provided by popup.";
pub const CONTENT_NOT_FOUND: &str = "Main content element not found on page.";
pub const UNDETERMINED: &str = "Chapter type undetermined on this page.";
pub const KEY_NOT_SET: &str = "OpenRouter API Key not set. Save it with `chapterclip key set`.";
pub const KEY_STORAGE_ERROR: &str = "Error accessing API key storage.";
const CLIPBOARD_FALLBACK: &str = "Use `chapterclip fetch`, which prints the chapter, instead.";

pub type PageAgentHandle = messages::Sender<PageRequest, ExtractionResult>;

#[derive(Debug, thiserror::Error)]
pub enum VipError {
    #[error("VIP image container area not found.")]
    ContainerNotFound,

    #[error("No individual VIP image divs found.")]
    NoImageDivs,

    #[error("Rasterization failed: {0:#}")]
    Rasterize(anyhow::Error),

    #[error("Rasterization failed to produce a valid image.")]
    EmptyImage,

    #[error("{0:#}")]
    Ocr(anyhow::Error),
}

/// Collaborators of a page agent.
pub struct AgentDeps {
    pub relay: Arc<dyn ImageRelay>,
    pub rasterizer: Box<dyn Rasterizer>,
    pub ocr: OcrClient,
    pub store: Arc<dyn KeyValueStore>,
    pub clipboard: Box<dyn ClipboardWriter>,
    pub panel: PanelChannel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// The on-page control: nobody waits for a structured reply, so the agent copies.
    Button,
    /// A control panel request: the panel copies.
    Panel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Text,
    Vip,
}

impl Flow {
    fn copied_notice(self) -> &'static str {
        match self {
            Flow::Text => "Text chapter copied to clipboard!",
            Flow::Vip => "VIP Chapter OCR'd and copied to clipboard!",
        }
    }

    fn panel_notice(self) -> &'static str {
        match self {
            Flow::Text => "Text chapter processed for control panel.",
            Flow::Vip => "VIP chapter processed for control panel.",
        }
    }

    fn error_notice(self, error: &str) -> (String, Duration) {
        match self {
            Flow::Text => (format!("Error: {error}"), ui::NORMAL),
            Flow::Vip => (format!("VIP Processing Error: {error}"), ui::ERROR),
        }
    }
}

pub struct PageAgent {
    page: ChapterPage,
    ui: PageUi,
    installed: Cell<bool>,
    running: Cell<bool>,
    relay: Arc<dyn ImageRelay>,
    rasterizer: Box<dyn Rasterizer>,
    ocr: OcrClient,
    store: Arc<dyn KeyValueStore>,
    clipboard: RefCell<Box<dyn ClipboardWriter>>,
    panel: PanelChannel,
}

/// Held for the duration of one extraction; a second one cannot start meanwhile.
struct RunGuard<'a>(&'a Cell<bool>);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl PageAgent {
    pub fn new(page: ChapterPage, deps: AgentDeps) -> Self {
        Self {
            page,
            ui: PageUi::new(),
            installed: Cell::new(false),
            running: Cell::new(false),
            relay: deps.relay,
            rasterizer: deps.rasterizer,
            ocr: deps.ocr,
            store: deps.store,
            clipboard: RefCell::new(deps.clipboard),
            panel: deps.panel,
        }
    }

    pub fn page(&self) -> &ChapterPage {
        &self.page
    }

    pub fn ui(&self) -> &PageUi {
        &self.ui
    }

    /// Page start-up: installs the action control matching the chapter type.
    pub fn install(&self) -> ChapterKind {
        if self.page.title_element().is_none() || self.page.content_element().is_none() {
            tracing::info!("title or content element not found; nothing to install");
            return ChapterKind::Undetermined;
        }

        let kind = self.page.classify();
        match kind {
            ChapterKind::Vip => self.ui.install_button(ui::VIP_BUTTON_LABEL),
            ChapterKind::Text => self.ui.install_button(ui::TEXT_BUTTON_LABEL),
            ChapterKind::Undetermined => {
                tracing::info!("chapter type undetermined");
                return kind;
            }
        }
        self.installed.set(true);
        kind
    }

    /// The on-page action: extracts the chapter and writes it to the clipboard. The page is
    /// classified again on every press.
    pub async fn press_button(&self) -> ExtractionResult {
        if !self.installed.get() {
            return ExtractionResult::failed(NO_ACTION, None);
        }
        let Some(_run) = self.begin_run() else {
            return self.reject_busy();
        };

        match self.page.classify() {
            ChapterKind::Text => self.handle_text(Trigger::Button),
            ChapterKind::Vip => match self.api_key_from_storage().await {
                Some(api_key) => self.handle_vip(&api_key, Trigger::Button).await,
                None => ExtractionResult::failed(KEY_NOT_SET, self.page.title_text()),
            },
            ChapterKind::Undetermined => ExtractionResult::failed(UNDETERMINED, None),
        }
    }

    pub async fn handle_request(&self, request: PageRequest) -> ExtractionResult {
        match request {
            PageRequest::ProcessChapterForPopup { api_key } => {
                self.process_for_panel(api_key.trim()).await
            }
        }
    }

    /// Answers requests until every sender is gone. Each request runs as its own local task,
    /// so overlapping requests meet the run guard instead of queueing.
    pub async fn serve(self: Rc<Self>, mut rx: messages::Receiver<PageRequest, ExtractionResult>) {
        while let Some(envelope) = rx.recv().await {
            let agent = Rc::clone(&self);
            tokio::task::spawn_local(async move {
                let (request, responder) = envelope.into_parts();
                let response = agent.handle_request(request).await;
                if !responder.respond(response) {
                    tracing::debug!("control panel stopped waiting for the chapter");
                }
            });
        }
        tracing::debug!("page agent stopped");
    }

    /// Starts [`PageAgent::serve`] on the current `LocalSet`.
    pub fn spawn_local(self: Rc<Self>) -> (PageAgentHandle, tokio::task::JoinHandle<()>) {
        let (tx, rx) = messages::channel(8);
        let task = tokio::task::spawn_local(self.serve(rx));
        (tx, task)
    }

    async fn process_for_panel(&self, api_key: &str) -> ExtractionResult {
        tracing::info!(
            api_key_present = !api_key.is_empty(),
            "chapter requested by control panel"
        );
        if api_key.is_empty() {
            return ExtractionResult::failed(KEY_NOT_PROVIDED, None);
        }
        let Some(content) = self.page.content_element() else {
            return ExtractionResult::failed(CONTENT_NOT_FOUND, None);
        };
        let Some(_run) = self.begin_run() else {
            return self.reject_busy();
        };

        match page::classify_content(&content) {
            ChapterKind::Vip => self.handle_vip(api_key, Trigger::Panel).await,
            ChapterKind::Text => self.handle_text(Trigger::Panel),
            ChapterKind::Undetermined => ExtractionResult::failed(UNDETERMINED, None),
        }
    }

    fn begin_run(&self) -> Option<RunGuard<'_>> {
        if self.running.replace(true) {
            return None;
        }
        Some(RunGuard(&self.running))
    }

    fn reject_busy(&self) -> ExtractionResult {
        self.ui.notify(BUSY, NoticeKind::Error, ui::NORMAL);
        ExtractionResult::failed(BUSY, self.page.title_text())
    }

    async fn api_key_from_storage(&self) -> Option<String> {
        match storage::load_api_key(self.store.as_ref()).await {
            Ok(Some(api_key)) => Some(api_key),
            Ok(None) => {
                self.ui.notify(KEY_NOT_SET, NoticeKind::Error, ui::LONG);
                self.ui.alert(KEY_NOT_SET);
                None
            }
            Err(err) => {
                tracing::error!(error = %format!("{err:#}"), "read api key from storage");
                self.ui.notify(KEY_STORAGE_ERROR, NoticeKind::Error, ui::LONG);
                self.ui.alert(format!("{KEY_STORAGE_ERROR} Save the key again."));
                None
            }
        }
    }

    fn handle_text(&self, trigger: Trigger) -> ExtractionResult {
        tracing::info!(?trigger, "text chapter");
        self.ui.notify("Processing text chapter...", NoticeKind::Info, ui::NORMAL);

        let title = self
            .page
            .title_text()
            .unwrap_or_else(|| "Untitled".to_owned());
        let content = self.page.content_text().unwrap_or_default();
        self.deliver(Flow::Text, trigger, title, content)
    }

    async fn handle_vip(&self, api_key: &str, trigger: Trigger) -> ExtractionResult {
        tracing::info!(?trigger, "vip chapter");
        let title = self
            .page
            .title_text()
            .unwrap_or_else(|| "Untitled VIP Chapter".to_owned());

        self.ui.notify(
            "Processing VIP chapter: Pre-fetching images...",
            NoticeKind::Info,
            ui::PREFETCH,
        );
        self.ui.set_button(ui::VIP_BUSY_LABEL, false);
        let outcome = self.capture_and_recognize(api_key).await;
        self.ui.set_button(ui::VIP_BUTTON_LABEL, true);

        match outcome {
            Ok(text) => self.deliver(Flow::Vip, trigger, title, text),
            Err(err) => self.fail(Flow::Vip, err.to_string(), Some(title)),
        }
    }

    async fn capture_and_recognize(&self, api_key: &str) -> Result<String, VipError> {
        let area = self
            .page
            .vip_image_area()
            .ok_or(VipError::ContainerNotFound)?;
        let placeholders = ChapterPage::image_placeholders(&area);
        tracing::info!(count = placeholders.len(), "vip image placeholders");
        if placeholders.is_empty() {
            return Err(VipError::NoImageDivs);
        }

        let mut edits = EditLog::new();
        let outcome = self
            .capture_with_edits(&area, &placeholders, &mut edits, api_key)
            .await;
        edits.restore();
        tracing::info!("vip processing finished; page restored");
        outcome
    }

    async fn capture_with_edits(
        &self,
        area: &NodeRef,
        placeholders: &[NodeRef],
        edits: &mut EditLog,
        api_key: &str,
    ) -> Result<String, VipError> {
        let total = placeholders.len();
        let mut inlined = 0usize;
        for placeholder in placeholders {
            let Some(image_url) = background_image_url(placeholder) else {
                continue;
            };

            match self.relay.fetch_image_as_base64(&image_url).await {
                RelayResponse {
                    success: true,
                    data_url: Some(data_url),
                    ..
                } => {
                    edits.set_style_property(
                        placeholder,
                        "background-image",
                        &format!("url(\"{data_url}\")"),
                    );
                    inlined += 1;
                    self.ui.notify(
                        format!("Fetching images: {inlined}/{total}"),
                        NoticeKind::Info,
                        ui::PROGRESS,
                    );
                }
                RelayResponse { error, details, .. } => {
                    tracing::warn!(
                        url = %image_url,
                        error = error.as_deref().unwrap_or("no data url"),
                        details = details.as_deref().unwrap_or(""),
                        "image left unresolved"
                    );
                }
            }
        }

        let mut removed = 0usize;
        for image in ChapterPage::problem_images(area) {
            if edits.detach(&image) {
                removed += 1;
            }
        }
        tracing::debug!(inlined, total, removed, "capture prepared");

        let image = self
            .rasterizer
            .rasterize(area)
            .map_err(VipError::Rasterize)?;
        if image.is_empty() || image == "data:," {
            return Err(VipError::EmptyImage);
        }

        self.ocr
            .extract_text(api_key, &image)
            .await
            .map_err(VipError::Ocr)
    }

    fn deliver(
        &self,
        flow: Flow,
        trigger: Trigger,
        title: String,
        content: String,
    ) -> ExtractionResult {
        if trigger == Trigger::Button {
            let text = messages::clipboard_text(&title, &content);
            if let Err(err) = self.clipboard.borrow_mut().write_text(&text) {
                let error = format!("Could not copy to clipboard: {err}. {CLIPBOARD_FALLBACK}");
                return self.fail(flow, error, Some(title));
            }
            self.ui.notify(flow.copied_notice(), NoticeKind::Success, ui::NORMAL);
        } else {
            self.ui.notify(flow.panel_notice(), NoticeKind::Info, ui::SHORT);
        }

        let result = ExtractionResult::succeeded(title, content);
        self.publish(&result);
        result
    }

    fn fail(&self, flow: Flow, error: String, title: Option<String>) -> ExtractionResult {
        let (notice, duration) = flow.error_notice(&error);
        self.ui.notify(notice, NoticeKind::Error, duration);

        let result = ExtractionResult::failed(error, title);
        self.publish(&result);
        result
    }

    fn publish(&self, result: &ExtractionResult) {
        let delivery = self
            .panel
            .publish(PanelMessage::UpdatePopupDisplay(result.clone()));
        tracing::debug!(?delivery, "control panel update");
    }
}

fn background_image_url(element: &NodeRef) -> Option<String> {
    let data = element.as_element()?;
    let attributes = data.attributes.borrow();
    let style = attributes.get("style")?;
    site::style_declaration(style, "background-image").and_then(site::extract_css_url)
}
