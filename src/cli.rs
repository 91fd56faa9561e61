use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{config, ocr};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
    /// JSON file holding the saved API key (default: `<config dir>/chapterclip/storage.json`).
    #[arg(long, global = true, env = "CHAPTERCLIP_STORAGE")]
    pub storage: Option<PathBuf>,

    /// OpenAI-compatible API base URL used for OCR.
    #[arg(long, global = true, env = "CHAPTERCLIP_OCR_BASE_URL", default_value = ocr::DEFAULT_BASE_URL)]
    pub ocr_base_url: String,

    /// Multimodal model used for OCR.
    #[arg(long, global = true, env = "CHAPTERCLIP_OCR_MODEL", default_value = ocr::DEFAULT_MODEL)]
    pub ocr_model: String,

    /// `HTTP-Referer` attribution header sent with OCR requests.
    #[arg(long, global = true, env = "CHAPTERCLIP_REFERER")]
    pub referer: Option<String>,

    /// `X-Title` attribution header sent with OCR requests.
    #[arg(long, global = true, env = "CHAPTERCLIP_APP_TITLE")]
    pub app_title: Option<String>,

    /// `Cookie` header for page downloads (reuse a logged-in session for VIP chapters).
    #[arg(long, global = true, env = "CHAPTERCLIP_COOKIE", hide_env_values = true)]
    pub cookie: Option<String>,

    #[arg(long, global = true, env = "CHAPTERCLIP_USER_AGENT", default_value = config::DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Use the fetch relay served at this URL instead of an in-process one.
    #[arg(long, global = true, env = "CHAPTERCLIP_RELAY_URL")]
    pub relay_url: Option<String>,

    /// Timeout for every HTTP request, in seconds.
    #[arg(long, global = true, default_value_t = 120)]
    pub timeout_secs: u64,

    /// How long a copy keeps serving the clipboard, in seconds, when no clipboard manager takes
    /// it over (Linux only; 0 returns at once and the contents go when the process exits).
    #[arg(long, global = true, env = "CHAPTERCLIP_CLIPBOARD_HOLD_SECS", default_value_t = 30)]
    pub clipboard_hold_secs: u64,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage the saved OpenRouter API key.
    Key {
        #[command(subcommand)]
        command: KeyCommand,
    },
    /// Print how a chapter page is classified.
    Inspect(PageArgs),
    /// Fetch the chapter through the control panel and print it.
    Fetch(FetchArgs),
    /// Run the on-page copy action.
    Copy(PageArgs),
    /// Serve the fetch relay over HTTP.
    Relay(RelayArgs),
}

#[derive(Debug, Subcommand)]
pub enum KeyCommand {
    Set(KeySetArgs),
    Show(KeyShowArgs),
}

#[derive(Debug, Args)]
pub struct KeySetArgs {
    pub key: String,
}

#[derive(Debug, Args)]
pub struct KeyShowArgs {
    /// Print the key in clear instead of masked.
    #[arg(long)]
    pub reveal: bool,
}

#[derive(Debug, Clone, Args)]
pub struct PageArgs {
    /// Chapter URL (the active tab).
    #[arg(long)]
    pub url: String,

    /// Saved HTML snapshot of the page, used instead of downloading `--url`.
    #[arg(long)]
    pub html: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    #[command(flatten)]
    pub page: PageArgs,

    /// Print the chapter without writing the clipboard.
    #[arg(long)]
    pub no_copy: bool,
}

#[derive(Debug, Args)]
pub struct RelayArgs {
    /// Listen address.
    #[arg(long, default_value = "127.0.0.1:8787")]
    pub listen: SocketAddr,
}
