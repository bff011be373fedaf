//! Attachment handling for image and file fields.
//!
//! Store A references files by path or URL; Store B keeps its own copy as a
//! local attachment with an opaque id. Copying is the adapter's business, the
//! transcoder only decides when to copy, reuse or delete.

use crate::error::Result;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier of a local attachment in Store B.
pub type AttachmentId = u64;

/// A file as Store A's API expects it on create/update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedFile {
    /// Path the file was copied to
    pub name: String,
    /// Mime type of the file
    #[serde(rename = "type")]
    pub mime: String,
}

/// Adapter over both stores' file storage.
pub trait AttachmentStore {
    /// Find a local attachment whose content matches the referenced Store A file.
    fn find_matching(&self, reference: &str) -> Result<Option<AttachmentId>>;

    /// Copy the referenced Store A file into local storage.
    ///
    /// The original is never moved or modified; Store A may still use it.
    fn import(&mut self, reference: &str) -> Result<AttachmentId>;

    /// Copy a local attachment to where Store A expects uploads.
    fn export(&mut self, id: AttachmentId) -> Result<ExportedFile>;

    /// Delete a file on the Store A side.
    fn delete_crm_file(&mut self, reference: &str) -> Result<bool>;
}

/// Guess a mime type from a file name.
pub fn mime_for(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// File name part of a path or URL.
pub fn file_name(reference: &str) -> &str {
    let trimmed = reference.split(['?', '#']).next().unwrap_or(reference);
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LocalAttachment {
    name: String,
    mime: String,
    content: Vec<u8>,
}

/// In-memory attachment store.
///
/// Holds both the Store A file area (keyed by reference) and the Store B
/// media library (keyed by attachment id).
#[derive(Debug, Default)]
pub struct MemoryAttachments {
    crm_files: BTreeMap<String, Vec<u8>>,
    local: BTreeMap<AttachmentId, LocalAttachment>,
    next_id: AttachmentId,
    upload_dir: String,
}

impl MemoryAttachments {
    pub fn new() -> Self {
        Self {
            upload_dir: "custom".to_string(),
            next_id: 1,
            ..Default::default()
        }
    }

    /// Put a file into the Store A file area.
    pub fn put_crm_file(&mut self, reference: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.crm_files.insert(reference.into(), content.into());
    }

    /// Add a file to the Store B media library.
    pub fn put_local(&mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) -> AttachmentId {
        let name = name.into();
        let id = self.next_id;
        self.next_id += 1;
        self.local.insert(
            id,
            LocalAttachment {
                mime: mime_for(&name),
                name,
                content: content.into(),
            },
        );
        id
    }

    pub fn crm_file(&self, reference: &str) -> Option<&[u8]> {
        self.crm_files.get(reference).map(Vec::as_slice)
    }

    pub fn local_count(&self) -> usize {
        self.local.len()
    }

    pub fn crm_file_count(&self) -> usize {
        self.crm_files.len()
    }
}

impl AttachmentStore for MemoryAttachments {
    fn find_matching(&self, reference: &str) -> Result<Option<AttachmentId>> {
        let Some(content) = self.crm_files.get(reference) else {
            return Err(Error::transcode(reference, "referenced file does not exist"));
        };
        let name = file_name(reference);
        Ok(self
            .local
            .iter()
            .find(|(_, a)| a.name == name && &a.content == content)
            .map(|(id, _)| *id))
    }

    fn import(&mut self, reference: &str) -> Result<AttachmentId> {
        let content = self
            .crm_files
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::transcode(reference, "referenced file does not exist"))?;
        Ok(self.put_local(file_name(reference), content))
    }

    fn export(&mut self, id: AttachmentId) -> Result<ExportedFile> {
        let attachment = self
            .local
            .get(&id)
            .ok_or_else(|| Error::transcode(id.to_string(), "attachment does not exist"))?;
        let path = format!("{}/{}", self.upload_dir, attachment.name);
        let exported = ExportedFile {
            name: path.clone(),
            mime: attachment.mime.clone(),
        };
        let content = attachment.content.clone();
        self.crm_files.insert(path, content);
        Ok(exported)
    }

    fn delete_crm_file(&mut self, reference: &str) -> Result<bool> {
        Ok(self.crm_files.remove(reference).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_copies_without_touching_original() {
        let mut store = MemoryAttachments::new();
        store.put_crm_file("https://crm.example/files/ada.png", b"png-bytes".to_vec());

        assert_eq!(
            store.find_matching("https://crm.example/files/ada.png").unwrap(),
            None
        );
        let id = store.import("https://crm.example/files/ada.png").unwrap();

        assert_eq!(store.local_count(), 1);
        assert!(store.crm_file("https://crm.example/files/ada.png").is_some());
        assert_eq!(
            store.find_matching("https://crm.example/files/ada.png").unwrap(),
            Some(id)
        );
    }

    #[test]
    fn same_name_different_content_is_not_a_match() {
        let mut store = MemoryAttachments::new();
        store.put_local("ada.png", b"old".to_vec());
        store.put_crm_file("files/ada.png", b"new".to_vec());
        assert_eq!(store.find_matching("files/ada.png").unwrap(), None);
    }

    #[test]
    fn export_emits_path_and_mime() {
        let mut store = MemoryAttachments::new();
        let id = store.put_local("report.pdf", b"%PDF".to_vec());

        let exported = store.export(id).unwrap();
        assert_eq!(exported.name, "custom/report.pdf");
        assert_eq!(exported.mime, "application/pdf");
        assert!(store.crm_file("custom/report.pdf").is_some());

        let json = serde_json::to_value(&exported).unwrap();
        assert_eq!(json["type"], "application/pdf");
    }

    #[test]
    fn missing_files_are_transcode_errors() {
        let mut store = MemoryAttachments::new();
        assert!(matches!(store.import("nope.png"), Err(Error::Transcode { .. })));
        assert!(matches!(store.export(42), Err(Error::Transcode { .. })));
        assert!(!store.delete_crm_file("nope.png").unwrap());
    }

    #[test]
    fn names_and_mimes() {
        assert_eq!(file_name("https://x.org/a/b/photo.JPG?v=2"), "photo.JPG");
        assert_eq!(mime_for("photo.JPG"), "image/jpeg");
        assert_eq!(
            mime_for("budget.xlsx"),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        );
        assert_eq!(mime_for("noext"), "application/octet-stream");
    }
}
