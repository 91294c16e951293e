//! JSON page archive.
//!
//! Every scraped page is kept as one JSON document, upserted by link:
//! ```text
//! archive_dir/
//! ├── 3f1c…9a.json   # fingerprint of the page link
//! └── …
//! ```
//! Writes go to a temporary file first and are renamed into place, so a
//! reader never sees a half-written page.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, instrument};

use crate::fingerprint::fingerprint;
use crate::models::Page;

#[derive(Debug, Clone)]
pub struct PageArchive {
    dir: PathBuf,
}

impl PageArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, link: &str) -> PathBuf {
        self.dir.join(format!("{}.json", fingerprint(link).to_hex()))
    }

    /// Insert or replace the archived copy of `page`.
    #[instrument(level = "debug", skip_all, fields(link = %page.link))]
    pub async fn upsert(&self, page: &Page) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_vec_pretty(page)?;
        let path = self.path_for(&page.link);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), "Page archived");
        Ok(())
    }

    /// The archived page for `link`, if any.
    pub async fn get(&self, link: &str) -> std::io::Result<Option<Page>> {
        match fs::read(self.path_for(link)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Number of archived pages.
    pub async fn len(&self) -> std::io::Result<usize> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                count += 1;
            }
        }
        Ok(count)
    }
}
