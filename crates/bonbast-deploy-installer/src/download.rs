use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use crate::fs_utils::remove_file_if_exists;

pub trait Downloader {
    /// Fetches `url` into `destination`, returning the number of bytes written.
    /// A failed download leaves no file at `destination`.
    fn download(&self, url: &str, destination: &Path) -> Result<u64>;
}

#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::blocking::Client,
}

impl HttpDownloader {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("bonbast-deploy/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(300))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl Downloader for HttpDownloader {
    fn download(&self, url: &str, destination: &Path) -> Result<u64> {
        tracing::debug!(url, destination = %destination.display(), "downloading");
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let part_path = destination.with_file_name(format!(
            "{}.part",
            destination
                .file_name()
                .and_then(|v| v.to_str())
                .unwrap_or("download")
        ));

        let result = fetch_into(&self.client, url, &part_path);
        let bytes = match result {
            Ok(bytes) => bytes,
            Err(err) => {
                let _ = remove_file_if_exists(&part_path);
                return Err(err);
            }
        };

        fs::rename(&part_path, destination).with_context(|| {
            format!(
                "failed to move downloaded file into place: {}",
                destination.display()
            )
        })?;
        Ok(bytes)
    }
}

fn fetch_into(client: &reqwest::blocking::Client, url: &str, part_path: &Path) -> Result<u64> {
    let mut response = client
        .get(url)
        .send()
        .with_context(|| format!("request failed: {url}"))?
        .error_for_status()
        .with_context(|| format!("server rejected request: {url}"))?;

    let mut file = fs::File::create(part_path)
        .with_context(|| format!("failed to create {}", part_path.display()))?;
    io::copy(&mut response, &mut file)
        .with_context(|| format!("failed to write {}", part_path.display()))
}
