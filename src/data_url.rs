use anyhow::Context as _;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

pub fn encode(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Splits a base64 data URL into its media type and decoded payload.
pub fn decode(data_url: &str) -> anyhow::Result<(String, Vec<u8>)> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| anyhow::anyhow!("not a data url"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| anyhow::anyhow!("data url has no payload separator"))?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| anyhow::anyhow!("data url is not base64 encoded"))?;

    let bytes = STANDARD
        .decode(payload.trim())
        .context("decode data url payload")?;
    Ok((mime.to_owned(), bytes))
}
