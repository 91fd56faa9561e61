use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use url::Url;

use crate::cli::{GlobalArgs, PageArgs};
use crate::ocr::OcrClient;
use crate::page::PageSource;
use crate::storage::LocalFsStore;

pub const DEFAULT_USER_AGENT: &str = concat!("chapterclip/", env!("CARGO_PKG_VERSION"));

/// Resolved settings for one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub storage_path: PathBuf,
    pub ocr_base_url: String,
    pub ocr_model: String,
    pub referer: Option<String>,
    pub app_title: Option<String>,
    pub cookie: Option<String>,
    pub user_agent: String,
    pub relay_url: Option<Url>,
    pub timeout: Duration,
    pub clipboard_hold: Duration,
}

impl Settings {
    pub fn from_args(args: &GlobalArgs) -> anyhow::Result<Self> {
        let storage_path = match &args.storage {
            Some(path) => path.clone(),
            None => default_storage_path()?,
        };
        let relay_url = args
            .relay_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(|url| Url::parse(url).with_context(|| format!("parse --relay-url: {url}")))
            .transpose()?;
        if args.timeout_secs == 0 {
            anyhow::bail!("--timeout-secs must be greater than zero");
        }

        Ok(Self {
            storage_path,
            ocr_base_url: args.ocr_base_url.clone(),
            ocr_model: args.ocr_model.clone(),
            referer: non_empty(args.referer.as_deref()),
            app_title: non_empty(args.app_title.as_deref()),
            cookie: non_empty(args.cookie.as_deref()),
            user_agent: args.user_agent.clone(),
            relay_url,
            timeout: Duration::from_secs(args.timeout_secs),
            clipboard_hold: Duration::from_secs(args.clipboard_hold_secs),
        })
    }

    pub fn store(&self) -> LocalFsStore {
        LocalFsStore::new(&self.storage_path)
    }

    pub fn http_client(&self) -> anyhow::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .build()
            .context("build http client")
    }

    pub fn ocr_client(&self, client: reqwest::Client) -> OcrClient {
        OcrClient::new(client, &self.ocr_base_url, &self.ocr_model)
            .with_attribution(self.referer.clone(), self.app_title.clone())
    }
}

pub fn default_storage_path() -> anyhow::Result<PathBuf> {
    let dir = dirs::config_dir().context("resolve user config directory")?;
    Ok(dir.join("chapterclip").join("storage.json"))
}

/// Where the page comes from: the snapshot when one is given, else the URL itself.
pub fn page_source(args: &PageArgs) -> anyhow::Result<PageSource> {
    if let Some(path) = &args.html {
        return Ok(PageSource::File(path.clone()));
    }
    let url = Url::parse(args.url.trim()).with_context(|| format!("parse --url: {}", args.url))?;
    if !matches!(url.scheme(), "http" | "https") {
        anyhow::bail!("--url must be http/https: {url}");
    }
    Ok(PageSource::Remote(url))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}
