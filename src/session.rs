//! One CLI invocation: wires the fetch relay, the page agent and the control panel together.

use std::rc::Rc;
use std::sync::Arc;

use anyhow::Context as _;

use crate::agent::{AgentDeps, PageAgent};
use crate::cli::{FetchArgs, PageArgs};
use crate::clipboard::{ClipboardWriter, SystemClipboard};
use crate::config::{self, Settings};
use crate::messages::PanelChannel;
use crate::page::{ChapterKind, ChapterPage};
use crate::panel::{ControlPanel, Status};
use crate::raster::CompositeRasterizer;
use crate::relay::{self, FetchRelay, HttpRelay, ImageRelay};
use crate::site;
use crate::storage::KeyValueStore;

pub async fn key_set(settings: &Settings, key: &str) -> anyhow::Result<()> {
    let mut panel = ControlPanel::new(store(settings));
    report(panel.save_key(key).await)
}

pub async fn key_show(settings: &Settings, reveal: bool) -> anyhow::Result<()> {
    let mut panel = ControlPanel::new(store(settings));
    let status = panel.open().await;
    if status.is_error() {
        return report(status);
    }
    if reveal {
        panel.toggle_key_visibility();
    }
    println!("{}", panel.key_field());
    report(status)
}

pub async fn inspect(settings: &Settings, args: &PageArgs) -> anyhow::Result<()> {
    let client = settings.http_client()?;
    let page = load_page(settings, &client, args).await?;

    println!("kind: {}", page.classify());
    println!("title: {}", page.title_text().unwrap_or_default());
    if let Some(area) = page.vip_image_area() {
        println!(
            "image placeholders: {}",
            ChapterPage::image_placeholders(&area).len()
        );
    }
    Ok(())
}

/// The control panel path: asks the page agent for the chapter and prints what the panel shows.
pub async fn fetch(settings: &Settings, args: &FetchArgs) -> anyhow::Result<()> {
    let local = tokio::task::LocalSet::new();
    local.run_until(fetch_local(settings, args)).await
}

async fn fetch_local(settings: &Settings, args: &FetchArgs) -> anyhow::Result<()> {
    let mut panel = ControlPanel::new(store(settings));
    if !args.no_copy {
        panel = panel.with_clipboard(Box::new(SystemClipboard::handing_off(
            settings.clipboard_hold,
        )));
    }

    let mut agent_task = None;
    if site::is_chapter_url(&args.page.url) {
        let client = settings.http_client()?;
        let page = load_page(settings, &client, &args.page).await?;
        let agent = Rc::new(PageAgent::new(
            page,
            agent_deps(settings, client, PanelChannel::new()),
        ));
        let kind = agent.install();
        tracing::debug!(%kind, "page agent ready");

        let (handle, task) = agent.spawn_local();
        panel = panel.with_agent(handle);
        agent_task = Some(task);
    }

    let status = panel.fetch_chapter(&args.page.url).await;
    if !panel.display().is_empty() && !status.is_error() {
        println!("{}", panel.display());
    }
    drop(panel);
    if let Some(task) = agent_task {
        task.await.context("page agent task")?;
    }
    report(status)
}

/// The on-page path: runs the agent's action control as if it had been clicked.
pub async fn copy(settings: &Settings, args: &PageArgs) -> anyhow::Result<()> {
    if !site::is_chapter_url(&args.url) {
        anyhow::bail!("Not a Faloo chapter page. Please navigate to a chapter.");
    }

    let client = settings.http_client()?;
    let page = load_page(settings, &client, args).await?;
    let channel = PanelChannel::new();
    let mut panel = ControlPanel::new(store(settings)).with_updates(channel.subscribe());
    let agent = PageAgent::new(page, agent_deps(settings, client, channel));

    if agent.install() == ChapterKind::Undetermined {
        anyhow::bail!("{}", crate::agent::NO_ACTION);
    }
    let result = agent.press_button().await;
    panel.poll_updates();

    if let Some(notification) = agent.ui().notification() {
        eprintln!("{}", notification.message);
    }
    if !result.success {
        anyhow::bail!(
            "{}",
            result.error.as_deref().unwrap_or("Chapter extraction failed.")
        );
    }
    println!("{}", panel.display());
    Ok(())
}

pub async fn relay(settings: &Settings, listen: std::net::SocketAddr) -> anyhow::Result<()> {
    let client = settings.http_client()?;
    relay::serve(listen, FetchRelay::new(client)).await
}

fn store(settings: &Settings) -> Arc<dyn KeyValueStore> {
    Arc::new(settings.store())
}

async fn load_page(
    settings: &Settings,
    client: &reqwest::Client,
    args: &PageArgs,
) -> anyhow::Result<ChapterPage> {
    let source = config::page_source(args)?;
    ChapterPage::load(
        &source,
        client,
        &settings.user_agent,
        settings.cookie.as_deref(),
    )
    .await
    .context("load chapter page")
}

fn agent_deps(settings: &Settings, client: reqwest::Client, panel: PanelChannel) -> AgentDeps {
    let image_relay: Arc<dyn ImageRelay> = match &settings.relay_url {
        Some(url) => Arc::new(HttpRelay::new(client.clone(), url.as_str())),
        None => {
            let (handle, _task) = relay::spawn(FetchRelay::new(client.clone()));
            Arc::new(handle)
        }
    };
    let clipboard: Box<dyn ClipboardWriter> =
        Box::new(SystemClipboard::handing_off(settings.clipboard_hold));

    AgentDeps {
        relay: image_relay,
        rasterizer: Box::new(CompositeRasterizer::default()),
        ocr: settings.ocr_client(client),
        store: store(settings),
        clipboard,
        panel,
    }
}

fn report(status: Status) -> anyhow::Result<()> {
    if status.is_error() {
        anyhow::bail!("{status}");
    }
    eprintln!("{status}");
    Ok(())
}
