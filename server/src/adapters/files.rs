//! Attachment storage on the local filesystem.
//!
//! Layout under the attachment directory:
//!
//! - `crm/` is the CRM file area; relative references resolve against it and
//!   exported uploads land in `crm/custom/`
//! - `library/` is the content store's media library, one file per
//!   attachment named `<id>-<file name>`
//!
//! References that are `http(s)` URLs are downloaded when a runtime handle is
//! configured.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tandem_engine::attachment::{file_name, mime_for};
use tandem_engine::{error::Result, AttachmentId, AttachmentStore, Error, ExportedFile};
use tokio::runtime::Handle;

const UPLOAD_DIR: &str = "custom";

#[derive(Debug, Clone)]
struct Remote {
    client: reqwest::Client,
    runtime: Handle,
}

/// [`AttachmentStore`] over two directories.
#[derive(Debug)]
pub struct FsAttachments {
    crm_root: PathBuf,
    library: PathBuf,
    index: BTreeMap<AttachmentId, PathBuf>,
    next_id: AttachmentId,
    remote: Option<Remote>,
}

fn io_error(reference: impl Into<String>, e: std::io::Error) -> Error {
    Error::transcode(reference, e)
}

fn is_url(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}

impl FsAttachments {
    /// Open (and create if needed) the attachment directory.
    pub fn open(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = dir.as_ref();
        let crm_root = dir.join("crm");
        let library = dir.join("library");
        fs::create_dir_all(crm_root.join(UPLOAD_DIR))?;
        fs::create_dir_all(&library)?;

        let mut index = BTreeMap::new();
        for entry in fs::read_dir(&library)? {
            let path = entry?.path();
            let id = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.split_once('-'))
                .and_then(|(id, _)| id.parse::<AttachmentId>().ok());
            if let Some(id) = id {
                index.insert(id, path);
            }
        }
        let next_id = index.keys().next_back().map_or(1, |id| id + 1);

        tracing::info!(
            library = %library.display(),
            attachments = index.len(),
            "Opened attachment library"
        );

        Ok(Self {
            crm_root,
            library,
            index,
            next_id,
            remote: None,
        })
    }

    /// Allow URL references, downloaded with `client` on `runtime`.
    pub fn with_remote(mut self, client: reqwest::Client, runtime: Handle) -> Self {
        self.remote = Some(Remote { client, runtime });
        self
    }

    fn crm_path(&self, reference: &str) -> PathBuf {
        let path = Path::new(reference);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.crm_root.join(path)
        }
    }

    /// Bytes of a CRM file, or `None` when it does not exist.
    fn read_crm(&self, reference: &str) -> Result<Option<Vec<u8>>> {
        if is_url(reference) {
            let Some(remote) = &self.remote else {
                return Err(Error::transcode(reference, "URL references are not enabled"));
            };
            return remote.runtime.block_on(async {
                let response = remote
                    .client
                    .get(reference)
                    .send()
                    .await
                    .map_err(|e| Error::transcode(reference, format!("download failed: {e}")))?;
                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                if !response.status().is_success() {
                    return Err(Error::transcode(
                        reference,
                        format!("download failed: {}", response.status()),
                    ));
                }
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| Error::transcode(reference, format!("download failed: {e}")))?;
                Ok(Some(bytes.to_vec()))
            });
        }

        match fs::read(self.crm_path(reference)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(reference, e)),
        }
    }

    fn local_name(path: &Path) -> &str {
        path.file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.split_once('-'))
            .map_or("", |(_, name)| name)
    }
}

impl AttachmentStore for FsAttachments {
    fn find_matching(&self, reference: &str) -> Result<Option<AttachmentId>> {
        let content = self
            .read_crm(reference)?
            .ok_or_else(|| Error::transcode(reference, "referenced file does not exist"))?;
        let name = file_name(reference);

        for (id, path) in &self.index {
            if Self::local_name(path) != name {
                continue;
            }
            let local = fs::read(path).map_err(|e| io_error(reference, e))?;
            if local == content {
                return Ok(Some(*id));
            }
        }
        Ok(None)
    }

    fn import(&mut self, reference: &str) -> Result<AttachmentId> {
        let content = self
            .read_crm(reference)?
            .ok_or_else(|| Error::transcode(reference, "referenced file does not exist"))?;

        let id = self.next_id;
        let path = self.library.join(format!("{}-{}", id, file_name(reference)));
        fs::write(&path, content).map_err(|e| io_error(reference, e))?;
        self.index.insert(id, path);
        self.next_id += 1;

        tracing::debug!(attachment = id, reference, "Imported CRM file");
        Ok(id)
    }

    fn export(&mut self, id: AttachmentId) -> Result<ExportedFile> {
        let source = self
            .index
            .get(&id)
            .ok_or_else(|| Error::transcode(id.to_string(), "attachment does not exist"))?;
        let name = Self::local_name(source).to_string();
        let relative = format!("{}/{}", UPLOAD_DIR, name);
        fs::copy(source, self.crm_root.join(&relative)).map_err(|e| io_error(id.to_string(), e))?;

        Ok(ExportedFile {
            mime: mime_for(&name),
            name: relative,
        })
    }

    fn delete_crm_file(&mut self, reference: &str) -> Result<bool> {
        if is_url(reference) {
            tracing::warn!(reference, "Cannot delete a CRM file referenced by URL");
            return Ok(false);
        }
        match fs::remove_file(self.crm_path(reference)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(reference, e)),
        }
    }
}
