use url::Url;

use crate::error::PipelineError;

/// Derive the stable content identifier of an article from its URL.
///
/// Two URL shapes are recognised:
/// - short form `https://host/s/<id>`
/// - long form `https://host/s?__biz=..&mid=..&sn=<id>`
pub fn derive(raw_url: &str) -> Result<String, PipelineError> {
    let invalid = || PipelineError::InvalidUrl(raw_url.to_string());

    let url = Url::parse(raw_url.trim()).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid());
    }

    if let Some(id) = short_form_id(&url) {
        return Ok(id);
    }

    url.query_pairs()
        .find(|(key, value)| key == "sn" && !value.is_empty())
        .map(|(_, value)| value.into_owned())
        .ok_or_else(invalid)
}

fn short_form_id(url: &Url) -> Option<String> {
    let mut segments = url.path_segments()?;
    while let Some(segment) = segments.next() {
        if segment == "s" {
            let candidate = segments.next()?;
            if !candidate.is_empty() && candidate.chars().all(is_id_char) {
                return Some(candidate.to_string());
            }
            return None;
        }
    }
    None
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}
