mod http_stub;

use std::rc::Rc;
use std::sync::{Arc, Mutex};

use chapterclip::agent::{self, AgentDeps, PageAgent};
use chapterclip::clipboard::{ClipboardError, ClipboardWriter};
use chapterclip::messages::{self, ExtractionResult, PageRequest, PanelChannel, PanelMessage};
use chapterclip::ocr::OcrClient;
use chapterclip::page::{ChapterKind, ChapterPage};
use chapterclip::raster::CompositeRasterizer;
use chapterclip::relay::{self, FetchRelay};
use chapterclip::storage::{self, KeyValueStore, LocalFsStore};
use chapterclip::ui::{self, NoticeKind};
use http_stub::{HttpStub, StubResponse, png};

const OCR_PATH: &str = "/api/v1/chat/completions";

#[derive(Clone, Default)]
struct SharedClipboard(Arc<Mutex<Vec<String>>>);

impl SharedClipboard {
    fn writes(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl ClipboardWriter for SharedClipboard {
    fn write_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        self.0.lock().unwrap().push(text.to_owned());
        Ok(())
    }
}

struct RejectingClipboard;

impl ClipboardWriter for RejectingClipboard {
    fn write_text(&mut self, _text: &str) -> Result<(), ClipboardError> {
        Err(ClipboardError::Rejected("document is not focused".to_owned()))
    }
}

struct Harness {
    agent: PageAgent,
    panel: PanelChannel,
    clipboard: SharedClipboard,
    store: Arc<dyn KeyValueStore>,
    _temp: tempfile::TempDir,
}

fn harness(html: &str, stub: &HttpStub) -> Harness {
    harness_with_clipboard(html, stub, None)
}

fn harness_with_clipboard(
    html: &str,
    stub: &HttpStub,
    clipboard: Option<Box<dyn ClipboardWriter>>,
) -> Harness {
    let temp = tempfile::TempDir::new().unwrap();
    let store: Arc<dyn KeyValueStore> =
        Arc::new(LocalFsStore::new(temp.path().join("storage.json")));
    let client = reqwest::Client::new();
    let (relay, _task) = relay::spawn(FetchRelay::new(client.clone()));
    let shared = SharedClipboard::default();
    let panel = PanelChannel::new();

    let agent = PageAgent::new(
        ChapterPage::parse(html),
        AgentDeps {
            relay: Arc::new(relay),
            rasterizer: Box::new(CompositeRasterizer::default()),
            ocr: OcrClient::new(client, &stub.url("/api/v1"), "test/ocr-model"),
            store: Arc::clone(&store),
            clipboard: clipboard.unwrap_or_else(|| Box::new(shared.clone())),
            panel: panel.clone(),
        },
    );
    Harness {
        agent,
        panel,
        clipboard: shared,
        store,
        _temp: temp,
    }
}

fn vip_page(image_urls: &[String]) -> String {
    let placeholders: String = image_urls
        .iter()
        .enumerate()
        .map(|(i, url)| {
            format!(
                r#"<div id="img_src_cok_{i}" class="img_item" style="width: 600px; background-image: url(&quot;{url}&quot;)"></div>"#
            )
        })
        .collect();
    format!(
        r#"<html><head><title>faloo</title></head><body>
<div class="c_l_title"><h1>第12章 归来</h1></div>
<div class="noveContent">
<div class="con_img">{placeholders}<img src="https://s.faloo.com/adimages/beijing_page.gif"></div>
</div>
</body></html>"#
    )
}

const TEXT_PAGE: &str = r#"<html><body>
<div class="c_l_title"><h1>第3章 开端</h1></div>
<div class="noveContent readline"><p>　　第一段。</p><p>　　第二段。</p></div>
</body></html>"#;

fn panel_request(api_key: &str) -> PageRequest {
    PageRequest::ProcessChapterForPopup {
        api_key: api_key.to_owned(),
    }
}

fn image_stub(ocr: StubResponse) -> HttpStub {
    HttpStub::spawn(vec![
        ("/img/1.png", StubResponse::bytes("image/png", png(8, 4, [0, 0, 0, 255]))),
        ("/img/2.png", StubResponse::bytes("image/png", png(6, 4, [40, 40, 40, 255]))),
        (OCR_PATH, ocr),
    ])
}

fn image_urls(stub: &HttpStub) -> Vec<String> {
    vec![stub.url("/img/1.png"), stub.url("/img/2.png")]
}

#[tokio::test]
async fn panel_request_runs_the_vip_pipeline_and_restores_the_page() {
    let stub = image_stub(StubResponse::completion("  第一段\n\n第二段  "));
    let h = harness(&vip_page(&image_urls(&stub)), &stub);
    let mut updates = h.panel.subscribe();

    assert_eq!(h.agent.install(), ChapterKind::Vip);
    let before = h.agent.page().to_html();

    let result = h.agent.handle_request(panel_request(" sk-or-test ")).await;
    assert_eq!(result, ExtractionResult::succeeded("第12章 归来", "第一段\n\n第二段"));

    // The page looks exactly as before the capture.
    assert_eq!(h.agent.page().to_html(), before);
    let button = h.agent.ui().button().unwrap();
    assert_eq!(button.label, ui::VIP_BUTTON_LABEL);
    assert!(button.enabled);

    assert_eq!(stub.requests_to("/img/1.png").len(), 1);
    assert_eq!(stub.requests_to("/img/2.png").len(), 1);
    let ocr = stub.requests_to(OCR_PATH);
    assert_eq!(ocr.len(), 1);
    assert_eq!(ocr[0].header("Authorization"), Some("Bearer sk-or-test"));
    let body = ocr[0].json();
    assert_eq!(body["model"], "test/ocr-model");
    let image = body
        .pointer("/messages/0/content/1/image_url/url")
        .and_then(|v| v.as_str())
        .unwrap();
    assert!(image.starts_with("data:image/png;base64,"));

    let progress: Vec<_> = h
        .agent
        .ui()
        .notifications()
        .into_iter()
        .filter(|notice| notice.duration == ui::PROGRESS)
        .map(|notice| notice.message)
        .collect();
    assert_eq!(progress, ["Fetching images: 1/2", "Fetching images: 2/2"]);

    // The panel path never writes the clipboard itself.
    assert!(h.clipboard.writes().is_empty());
    assert_eq!(
        updates.try_recv().unwrap(),
        PanelMessage::UpdatePopupDisplay(result)
    );
}

#[tokio::test]
async fn button_press_copies_the_vip_chapter() {
    let stub = image_stub(StubResponse::completion("正文"));
    let h = harness(&vip_page(&image_urls(&stub)), &stub);
    storage::save_api_key(h.store.as_ref(), "sk-or-saved").await.unwrap();

    assert_eq!(h.agent.install(), ChapterKind::Vip);
    let result = h.agent.press_button().await;

    assert!(result.success, "{result:?}");
    assert_eq!(h.clipboard.writes(), vec!["Title: 第12章 归来\n\n正文".to_owned()]);
    let notice = h.agent.ui().notification().unwrap();
    assert_eq!(notice.message, "VIP Chapter OCR'd and copied to clipboard!");
    assert_eq!(notice.kind, NoticeKind::Success);
    assert_eq!(
        stub.requests_to(OCR_PATH)[0].header("Authorization"),
        Some("Bearer sk-or-saved")
    );
}

#[tokio::test]
async fn button_press_follows_the_page_as_it_is_now() {
    let stub = image_stub(StubResponse::completion("unused"));
    let h = harness(&vip_page(&image_urls(&stub)), &stub);
    assert_eq!(h.agent.install(), ChapterKind::Vip);

    let content = h.agent.page().content_element().unwrap();
    content
        .as_element()
        .unwrap()
        .attributes
        .borrow_mut()
        .insert("class", "noveContent readline".to_owned());

    let result = h.agent.press_button().await;

    assert!(result.success, "{result:?}");
    assert_eq!(result.title.as_deref(), Some("第12章 归来"));
    let writes = h.clipboard.writes();
    assert_eq!(writes.len(), 1);
    assert!(writes[0].starts_with("Title: 第12章 归来\n\n"), "{writes:?}");
    assert_eq!(
        h.agent.ui().notification().unwrap().message,
        "Text chapter copied to clipboard!"
    );
    assert!(h.agent.ui().alerts().is_empty());
    assert!(stub.requests().is_empty());
}

#[tokio::test]
async fn button_press_without_saved_key_alerts_and_fetches_nothing() {
    let stub = image_stub(StubResponse::completion("unused"));
    let h = harness(&vip_page(&image_urls(&stub)), &stub);

    h.agent.install();
    let result = h.agent.press_button().await;

    assert_eq!(result.error.as_deref(), Some(agent::KEY_NOT_SET));
    assert_eq!(h.agent.ui().alerts(), vec![agent::KEY_NOT_SET.to_owned()]);
    assert!(stub.requests().is_empty());
}

#[tokio::test]
async fn area_without_placeholders_fails_before_any_request() {
    let stub = image_stub(StubResponse::completion("unused"));
    let h = harness(&vip_page(&[]), &stub);
    let mut updates = h.panel.subscribe();

    let result = h.agent.handle_request(panel_request("sk")).await;

    assert_eq!(
        result,
        ExtractionResult::failed(
            "No individual VIP image divs found.",
            Some("第12章 归来".to_owned())
        )
    );
    assert!(stub.requests().is_empty());
    assert!(updates.try_recv().is_ok());
}

#[tokio::test]
async fn ocr_error_is_reported_and_the_page_is_still_restored() {
    let stub = image_stub(
        StubResponse::json(serde_json::json!({
            "error": { "message": "No auth credentials found", "code": 401 }
        }))
        .with_status(401),
    );
    let h = harness(&vip_page(&image_urls(&stub)), &stub);
    h.agent.install();
    let before = h.agent.page().to_html();

    let result = h.agent.handle_request(panel_request("sk-bad")).await;

    assert_eq!(
        result.error.as_deref(),
        Some("OCR API Error: No auth credentials found")
    );
    assert_eq!(result.title.as_deref(), Some("第12章 归来"));
    assert_eq!(h.agent.page().to_html(), before);

    let notice = h.agent.ui().notification().unwrap();
    assert_eq!(
        notice.message,
        "VIP Processing Error: OCR API Error: No auth credentials found"
    );
    assert_eq!(notice.kind, NoticeKind::Error);
    assert_eq!(notice.duration, ui::ERROR);
    assert_eq!(h.agent.ui().button().unwrap().label, ui::VIP_BUTTON_LABEL);
}

#[tokio::test]
async fn unreachable_image_leaves_a_gap_but_the_chapter_is_still_read() {
    let stub = image_stub(StubResponse::completion("部分正文"));
    let urls = vec![stub.url("/img/1.png"), stub.url("/img/missing.png")];
    let h = harness(&vip_page(&urls), &stub);

    let result = h.agent.handle_request(panel_request("sk")).await;

    assert_eq!(result.content.as_deref(), Some("部分正文"));
    assert_eq!(stub.requests_to("/img/missing.png").len(), 1);
    assert_eq!(stub.requests_to(OCR_PATH).len(), 1);
}

#[tokio::test]
async fn image_that_is_not_an_image_leaves_a_gap_but_the_chapter_is_still_read() {
    let stub = HttpStub::spawn(vec![
        ("/img/1.png", StubResponse::bytes("image/png", png(8, 4, [0, 0, 0, 255]))),
        ("/img/bad.png", StubResponse::bytes("text/html", "<html>hotlink</html>")),
        (OCR_PATH, StubResponse::completion("部分正文")),
    ]);
    let urls = vec![stub.url("/img/1.png"), stub.url("/img/bad.png")];
    let h = harness(&vip_page(&urls), &stub);
    h.agent.install();
    let before = h.agent.page().to_html();

    let result = h.agent.handle_request(panel_request("sk")).await;

    assert_eq!(result, ExtractionResult::succeeded("第12章 归来", "部分正文"));
    assert_eq!(stub.requests_to("/img/bad.png").len(), 1);
    assert_eq!(stub.requests_to(OCR_PATH).len(), 1);
    assert_eq!(h.agent.page().to_html(), before);
}

#[tokio::test]
async fn overlapping_requests_are_rejected_while_one_is_running() {
    let stub = image_stub(StubResponse::completion("正文"));
    let h = harness(&vip_page(&image_urls(&stub)), &stub);

    let (first, second) = tokio::join!(
        h.agent.handle_request(panel_request("sk")),
        h.agent.handle_request(panel_request("sk")),
    );

    assert!(first.success, "{first:?}");
    assert_eq!(
        second,
        ExtractionResult::failed(agent::BUSY, Some("第12章 归来".to_owned()))
    );
    assert_eq!(stub.requests_to(OCR_PATH).len(), 1);

    // The guard is released once the run is over.
    let third = h.agent.handle_request(panel_request("sk")).await;
    assert!(third.success, "{third:?}");
}

#[tokio::test]
async fn text_chapter_is_served_over_the_message_channel() {
    let stub = HttpStub::spawn(Vec::new());
    let h = harness(TEXT_PAGE, &stub);
    let local = tokio::task::LocalSet::new();

    local
        .run_until(async move {
            let page_agent = Rc::new(h.agent);
            assert_eq!(page_agent.install(), ChapterKind::Text);
            let (tx, task) = Rc::clone(&page_agent).spawn_local();

            let missing_key = messages::call(&tx, panel_request("   ")).await.unwrap();
            assert_eq!(missing_key.error.as_deref(), Some(agent::KEY_NOT_PROVIDED));

            let result = messages::call(&tx, panel_request("sk")).await.unwrap();
            assert_eq!(
                result,
                ExtractionResult::succeeded("第3章 开端", "第一段。\n　　第二段。")
            );
            assert_eq!(
                page_agent.ui().notification().unwrap().message,
                "Text chapter processed for control panel."
            );

            drop(tx);
            task.await.unwrap();
        })
        .await;

    assert!(stub.requests().is_empty());
}

#[tokio::test]
async fn clipboard_failure_on_button_press_is_reported() {
    let stub = HttpStub::spawn(Vec::new());
    let h = harness_with_clipboard(TEXT_PAGE, &stub, Some(Box::new(RejectingClipboard)));

    h.agent.install();
    let result = h.agent.press_button().await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(
        error.starts_with("Could not copy to clipboard: clipboard write was rejected"),
        "{error}"
    );
    assert_eq!(h.agent.ui().notification().unwrap().kind, NoticeKind::Error);
}

#[tokio::test]
async fn page_without_chapter_elements_gets_no_action() {
    let stub = HttpStub::spawn(Vec::new());
    let h = harness("<html><body><p>index</p></body></html>", &stub);

    assert_eq!(h.agent.install(), ChapterKind::Undetermined);
    assert_eq!(h.agent.ui().button(), None);
    assert_eq!(
        h.agent.press_button().await.error.as_deref(),
        Some(agent::NO_ACTION)
    );
    assert_eq!(
        h.agent.handle_request(panel_request("sk")).await.error.as_deref(),
        Some(agent::CONTENT_NOT_FOUND)
    );
}
