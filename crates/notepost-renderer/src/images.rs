//! Local image resolution and upload.
//!
//! Embeds (`![[pic.png]]`, `![[pic.png|caption]]`) and standard images
//! (`![alt](img/pic.png)`) that point into the vault are uploaded to the
//! publishing service and rewritten to the hosted URL. Anything that cannot be
//! resolved, read or uploaded is left exactly as written.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::LazyLock;

use notepost_common::{DocumentRef, DocumentStore, ImageUpload, Owner, PublishService};
use regex::Regex;

use crate::code::CodeRegions;
use crate::utils::{image_mime_type, is_image_path, is_local_path, normalize_link_target, parent_dir};

static WIKI_EMBED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[\[([^\]|]+?)(?:\|([^\]]*))?\]\]").unwrap());

static MARKDOWN_IMAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]+)\)").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSyntax {
    /// `![[name]]`; the caption is dropped on rewrite.
    WikiEmbed,
    /// `![alt](path)`; the alt text is kept.
    Markdown { alt: String },
}

/// A local image reference found in the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub range: Range<usize>,
    /// Vault name or path the reference points at.
    pub target: String,
    pub syntax: ImageSyntax,
}

impl ImageRef {
    fn rewrite(&self, url: &str) -> String {
        match &self.syntax {
            ImageSyntax::WikiEmbed => format!("![]({url})"),
            ImageSyntax::Markdown { alt } => format!("![{alt}]({url})"),
        }
    }
}

/// Local image references outside code, in text order.
pub fn find_image_refs(text: &str) -> Vec<ImageRef> {
    let code = CodeRegions::detect(text);
    let mut refs = Vec::new();

    for caps in WIKI_EMBED_RE.captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let target = name.as_str().trim();
        if code.contains(whole.start()) || !is_image_path(target) {
            continue;
        }
        refs.push(ImageRef {
            range: whole.range(),
            target: target.to_owned(),
            syntax: ImageSyntax::WikiEmbed,
        });
    }

    for caps in MARKDOWN_IMAGE_RE.captures_iter(text) {
        let (Some(whole), Some(alt), Some(dest)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        // drop an optional link title: ![alt](path "title")
        let raw = dest.as_str().split_whitespace().next().unwrap_or_default();
        if code.contains(whole.start()) || !is_local_path(raw) {
            continue;
        }
        let target = normalize_link_target(raw);
        if !is_image_path(&target) {
            continue;
        }
        refs.push(ImageRef {
            range: whole.range(),
            target: target.into_owned(),
            syntax: ImageSyntax::Markdown {
                alt: alt.as_str().to_owned(),
            },
        });
    }

    refs.sort_by_key(|r| r.range.start);
    refs
}

/// Find the document an image reference names.
///
/// Tried in order: the exact path, the path relative to the source note's
/// folder, a document with exactly that file name, a document whose path ends
/// in `/<name>`.
///
/// The folder-relative step extends the plain path / file name / suffix order
/// so that `![alt](pic.png)` next to a note picks the sibling file even when
/// another folder holds an image of the same name.
pub fn resolve_image<'d>(
    documents: &'d [DocumentRef],
    target: &str,
    source: &DocumentRef,
) -> Option<&'d DocumentRef> {
    let exact = |path: &str| documents.iter().find(|d| d.path() == path);
    let suffix = format!("/{target}");

    exact(target)
        .or_else(|| {
            parent_dir(source.path()).and_then(|dir| exact(&format!("{dir}/{target}")))
        })
        .or_else(|| documents.iter().find(|d| d.name() == target))
        .or_else(|| documents.iter().find(|d| d.path().ends_with(&suffix)))
}

/// Uploads images for one transformation, once per resolved document.
pub struct ImageUploader<'a, S, P> {
    store: &'a S,
    service: &'a P,
    owner: &'a Owner,
    uploaded: HashMap<String, Option<String>>,
}

impl<'a, S: DocumentStore, P: PublishService> ImageUploader<'a, S, P> {
    pub fn new(store: &'a S, service: &'a P, owner: &'a Owner) -> Self {
        Self {
            store,
            service,
            owner,
            uploaded: HashMap::new(),
        }
    }

    /// Upload every resolvable local image in `text` and return the text
    /// with those references pointing at the hosted copies.
    pub async fn process(&mut self, text: &str, source: &DocumentRef) -> String {
        let refs = find_image_refs(text);
        if refs.is_empty() {
            return text.to_owned();
        }
        let documents = match self.store.list().await {
            Ok(documents) => documents,
            Err(error) => {
                tracing::warn!(%error, "could not list documents, leaving images as-is");
                return text.to_owned();
            }
        };

        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for image in refs {
            // overlapping matches: the earlier one wins
            if image.range.start < last {
                continue;
            }
            let Some(doc) = resolve_image(&documents, &image.target, source) else {
                tracing::debug!(image = %image.target, "image not found in vault");
                continue;
            };
            let Some(url) = self.upload(doc).await else {
                continue;
            };
            out.push_str(&text[last..image.range.start]);
            out.push_str(&image.rewrite(&url));
            last = image.range.end;
        }
        out.push_str(&text[last..]);
        out
    }

    async fn upload(&mut self, doc: &DocumentRef) -> Option<String> {
        if let Some(known) = self.uploaded.get(doc.path()) {
            return known.clone();
        }
        let url = self.try_upload(doc).await;
        self.uploaded.insert(doc.path().to_owned(), url.clone());
        url
    }

    async fn try_upload(&self, doc: &DocumentRef) -> Option<String> {
        let mime_type = image_mime_type(doc.path())?;
        let data = match self.store.read_binary(doc.path()).await {
            Ok(data) => data,
            Err(error) => {
                tracing::warn!(path = %doc, %error, "failed to read image");
                return None;
            }
        };
        tracing::debug!(path = %doc, bytes = data.len(), mime_type, "uploading image");
        let upload = ImageUpload {
            data,
            filename: doc.name().to_owned(),
            mime_type,
        };
        match self.service.upload_image(self.owner, upload).await {
            Ok(url) => Some(url),
            Err(error) => {
                tracing::warn!(path = %doc, %error, "image upload failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use notepost_common::MemoryStore;
    use notepost_common::testing::{RecordingService, ServiceCall};

    use super::*;

    fn owner() -> Owner {
        Owner::Anonymous {
            device_id: "device".into(),
        }
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new().with("notes/post.md", "");
        store.insert_binary("attachments/diagram.png", &b"png"[..]);
        store.insert_binary("attachments/My Pic.jpg", &b"jpg"[..]);
        store.insert_binary("notes/local.gif", &b"gif"[..]);
        store.insert_binary("docs/manual.pdf", &b"pdf"[..]);
        store
    }

    async fn run(text: &str, store: &MemoryStore, service: &RecordingService) -> String {
        let owner = owner();
        let mut uploader = ImageUploader::new(store, service, &owner);
        uploader
            .process(text, &DocumentRef::new("notes/post.md"))
            .await
    }

    #[test]
    fn finds_only_local_images_outside_code() {
        let text = "![[a.png|cap]] ![x](https://e.com/b.png) ![y](c.pdf) `![[d.png]]` ![z](./e%20f.webp)";
        let refs = find_image_refs(text);
        let targets: Vec<_> = refs.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(targets, vec!["a.png", "e f.webp"]);
        assert_eq!(refs[0].syntax, ImageSyntax::WikiEmbed);
    }

    #[test]
    fn resolution_order() {
        let docs = vec![
            DocumentRef::new("x/pic.png"),
            DocumentRef::new("pic.png"),
            DocumentRef::new("notes/pic.png"),
            DocumentRef::new("deep/dir/other.png"),
        ];
        let source = DocumentRef::new("notes/post.md");
        assert_eq!(
            resolve_image(&docs, "pic.png", &source).map(DocumentRef::path),
            Some("pic.png")
        );
        assert_eq!(
            resolve_image(&docs, "dir/other.png", &source).map(DocumentRef::path),
            Some("deep/dir/other.png")
        );
        assert_eq!(
            resolve_image(&docs[..1], "pic.png", &source).map(DocumentRef::path),
            Some("x/pic.png")
        );
        assert!(resolve_image(&docs, "missing.png", &source).is_none());

        // a sibling of the note beats a same-named file elsewhere
        let siblings = [docs[0].clone(), docs[2].clone()];
        assert_eq!(
            resolve_image(&siblings, "pic.png", &source).map(DocumentRef::path),
            Some("notes/pic.png")
        );
        assert_eq!(
            resolve_image(&siblings, "pic.png", &DocumentRef::new("other/post.md"))
                .map(DocumentRef::path),
            Some("x/pic.png")
        );
    }

    #[tokio::test]
    async fn rewrites_both_syntaxes() {
        let store = store();
        let service = RecordingService::new();
        let out = run(
            "![[diagram.png|A caption]]\n\n![Alt text](../attachments/My%20Pic.jpg)",
            &store,
            &service,
        )
        .await;
        // `..` is not normalised, so that reference matches nothing
        assert_eq!(
            out,
            "![](https://cdn.notepost.test/diagram.png)\n\n![Alt text](../attachments/My%20Pic.jpg)"
        );
        let out = run("![Alt text](My%20Pic.jpg) ![[local.gif]]", &store, &service).await;
        assert_eq!(
            out,
            "![Alt text](https://cdn.notepost.test/My Pic.jpg) ![](https://cdn.notepost.test/local.gif)"
        );
    }

    #[tokio::test]
    async fn uploads_each_image_once_and_skips_code() {
        let store = store();
        let service = RecordingService::new();
        let text = "![[diagram.png]]\n```\n![[diagram.png]]\n```\n![[diagram.png]]";
        let out = run(text, &store, &service).await;
        assert_eq!(
            out,
            "![](https://cdn.notepost.test/diagram.png)\n```\n![[diagram.png]]\n```\n![](https://cdn.notepost.test/diagram.png)"
        );
        assert_eq!(
            service.calls(),
            vec![ServiceCall::Upload {
                filename: "diagram.png".into(),
                mime_type: "image/png",
            }]
        );
    }

    #[tokio::test]
    async fn failures_leave_references_untouched() {
        let store = store();
        let service = RecordingService::new();
        service.fail_uploads(true);
        let text = "![[diagram.png]] ![[nowhere.png]]";
        assert_eq!(run(text, &store, &service).await, text);
        assert_eq!(service.calls().len(), 1);
    }
}
