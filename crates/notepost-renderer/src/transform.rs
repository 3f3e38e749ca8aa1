use notepost_common::{DocumentRef, DocumentStore, Owner, PublishService, strip_frontmatter};

use crate::images::ImageUploader;
use crate::passes::{convert_wiki_links, strip_comments};
use crate::tags::strip_tags;

/// Turns a vault note into portable markdown.
///
/// The passes run in a fixed order: metadata header, comments, images, wiki
/// links, tags (when enabled), then surrounding whitespace. Images go before
/// links because embeds are wiki-link shaped.
pub struct Transformer<'a, S, P> {
    store: &'a S,
    service: &'a P,
    owner: &'a Owner,
    strip_tags: bool,
}

impl<'a, S: DocumentStore, P: PublishService> Transformer<'a, S, P> {
    pub fn new(store: &'a S, service: &'a P, owner: &'a Owner) -> Self {
        Self {
            store,
            service,
            owner,
            strip_tags: false,
        }
    }

    pub fn strip_tags(mut self, enabled: bool) -> Self {
        self.strip_tags = enabled;
        self
    }

    pub async fn transform(&self, content: &str, source: &DocumentRef) -> String {
        let body = strip_frontmatter(content);
        let body = strip_comments(body);
        tracing::debug!(document = %source, "resolving images");
        let body = ImageUploader::new(self.store, self.service, self.owner)
            .process(&body, source)
            .await;
        let body = convert_wiki_links(&body);
        let body = if self.strip_tags {
            strip_tags(&body)
        } else {
            body
        };
        body.trim().to_owned()
    }
}
