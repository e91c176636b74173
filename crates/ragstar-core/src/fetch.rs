//! Repository content fetching
//!
//! The build pipeline only needs a bounded text blob per repository. The
//! GitHub implementation assembles it from the README and the root-level
//! `.toml`/`.txt` files, which is what the summarizer prompt is written
//! against.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::config::FetchConfig;
use crate::error::{FetchError, SearchError, SearchResult};

const README_MISSING: &str = "(README missing or empty)";
const ROOT_DOCS_MISSING: &str = "(No root .toml/.txt files captured)";
const DOC_SEPARATOR: &str = "\n\n---\n\n";

/// Bounds on the fetched content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    pub max_files: usize,
    pub max_bytes: usize,
}

impl From<&FetchConfig> for FetchLimits {
    fn from(config: &FetchConfig) -> Self {
        Self {
            max_files: config.max_files,
            max_bytes: config.max_bytes,
        }
    }
}

/// Returns a bounded text blob describing a repository
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str, limits: FetchLimits) -> Result<String, FetchError>;
}

/// Entry of the GitHub contents listing
#[derive(Debug, Clone, Deserialize)]
struct ContentEntry {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

impl ContentEntry {
    fn is_file(&self) -> bool {
        self.kind == "file"
    }
}

/// Fetches README and root docs through the GitHub REST API
pub struct GithubFetcher {
    config: FetchConfig,
    client: Client,
}

impl GithubFetcher {
    pub fn new(config: FetchConfig) -> SearchResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("ragstar/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SearchError::Config(format!("fetch client: {e}")))?;
        Ok(Self { config, client })
    }

    fn request(&self, url: &str, accept: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .get(url)
            .header(header::ACCEPT, accept)
            .header("X-GitHub-Api-Version", "2022-11-28");
        match self.config.github_token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn list_root(&self, owner: &str, repo: &str) -> Result<Vec<ContentEntry>, FetchError> {
        let url = format!(
            "{}/repos/{}/{}/contents",
            self.config.api_base.trim_end_matches('/'),
            owner,
            repo
        );
        let response = self.request(&url, "application/vnd.github+json").send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(status_error(status, message));
        }
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| FetchError::Transport(format!("bad listing: {e}")))
    }

    async fn download(&self, owner: &str, repo: &str, name: &str) -> Result<String, FetchError> {
        let url = format!(
            "{}/repos/{}/{}/contents/{}",
            self.config.api_base.trim_end_matches('/'),
            owner,
            repo,
            name
        );
        let response = self.request(&url, "application/vnd.github.raw").send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(status_error(status, message));
        }
        Ok(response.text().await?)
    }

    /// Download a file, logging and skipping it on failure
    async fn download_lenient(&self, owner: &str, repo: &str, name: &str) -> Option<String> {
        match self.download(owner, repo, name).await {
            Ok(text) => Some(text),
            Err(e) => {
                log::warn!("[Fetch] Skipping {}/{}/{}: {}", owner, repo, name, e);
                None
            }
        }
    }
}

#[async_trait]
impl ContentFetcher for GithubFetcher {
    async fn fetch(&self, url: &str, limits: FetchLimits) -> Result<String, FetchError> {
        let (owner, repo) = parse_github_url(url)?;
        log::debug!("[Fetch] Listing {}/{}", owner, repo);

        let entries = self.list_root(&owner, &repo).await?;
        let (readme, docs) = select_files(&entries, limits.max_files);

        let readme_text = match readme {
            Some(entry) => self.download_lenient(&owner, &repo, &entry.name).await,
            None => None,
        };

        let (owner_ref, repo_ref) = (owner.as_str(), repo.as_str());
        let downloads = docs.iter().map(|entry| async move {
            self.download_lenient(owner_ref, repo_ref, &entry.name)
                .await
                .map(|text| (entry.name.clone(), text))
        });
        let root_docs: Vec<(String, String)> = futures::future::join_all(downloads)
            .await
            .into_iter()
            .flatten()
            .collect();

        let blob = assemble_blob(readme_text.as_deref(), &root_docs, &self.config, limits.max_bytes)?;
        log::debug!(
            "[Fetch] {}/{}: {} root docs, {} bytes",
            owner,
            repo,
            root_docs.len(),
            blob.len()
        );
        Ok(blob)
    }
}

fn status_error(status: StatusCode, message: String) -> FetchError {
    FetchError::Status {
        status: status.as_u16(),
        message,
    }
}

/// Owner and repository of a GitHub URL
fn parse_github_url(raw: &str) -> Result<(String, String), FetchError> {
    let parsed = Url::parse(raw.trim()).map_err(|e| FetchError::InvalidUrl(format!("{raw}: {e}")))?;

    match parsed.host_str() {
        Some("github.com") | Some("www.github.com") => {}
        Some(host) => return Err(FetchError::UnsupportedHost(host.to_string())),
        None => return Err(FetchError::InvalidUrl(raw.to_string())),
    }

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    match segments.as_slice() {
        [owner, repo, ..] => {
            let repo = repo.strip_suffix(".git").unwrap_or(repo);
            if repo.is_empty() {
                return Err(FetchError::InvalidUrl(raw.to_string()));
            }
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(FetchError::InvalidUrl(raw.to_string())),
    }
}

/// Pick the README and the root docs from a root listing.
///
/// The README is the first file whose lowercase name starts with `readme`,
/// else the first that contains it. Root docs are `.toml`/`.txt` files in
/// name order, capped so the README and the docs together stay within
/// `max_files`.
fn select_files(entries: &[ContentEntry], max_files: usize) -> (Option<&ContentEntry>, Vec<&ContentEntry>) {
    let files: Vec<&ContentEntry> = entries.iter().filter(|e| e.is_file()).collect();

    let readme = files
        .iter()
        .find(|e| e.name.to_lowercase().starts_with("readme"))
        .or_else(|| files.iter().find(|e| e.name.to_lowercase().contains("readme")))
        .copied();

    let mut docs: Vec<&ContentEntry> = files
        .iter()
        .filter(|e| {
            let lower = e.name.to_lowercase();
            lower.ends_with(".toml") || lower.ends_with(".txt")
        })
        .filter(|e| readme.map_or(true, |r| r.name != e.name))
        .copied()
        .collect();
    docs.sort_by(|a, b| a.name.cmp(&b.name));
    docs.truncate(max_files.saturating_sub(1));

    (readme, docs)
}

fn take_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn truncate_to_bytes(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

/// Assemble the labelled content blob handed to the summarizer
fn assemble_blob(
    readme: Option<&str>,
    root_docs: &[(String, String)],
    config: &FetchConfig,
    max_bytes: usize,
) -> Result<String, FetchError> {
    let readme = readme
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(|text| take_chars(text, config.max_readme_chars));

    let doc_chunks: Vec<String> = root_docs
        .iter()
        .filter_map(|(name, body)| {
            let preview = take_chars(body.trim(), config.max_file_preview_chars);
            (!preview.is_empty()).then(|| format!("FILE: {name}\n{preview}"))
        })
        .collect();

    if readme.is_none() && doc_chunks.is_empty() {
        return Err(FetchError::Empty);
    }

    let docs_block = if doc_chunks.is_empty() {
        ROOT_DOCS_MISSING.to_string()
    } else {
        doc_chunks.join(DOC_SEPARATOR)
    };

    let mut blob = format!(
        "[README]\n{}\n\n[ROOT_DOCS]\n{}",
        readme.unwrap_or(README_MISSING),
        docs_block
    );
    truncate_to_bytes(&mut blob, max_bytes);
    Ok(blob)
}
