//! Publish service
//!
//! Stores new notes and hands them to the outbox dispatcher.

use std::sync::Arc;

use crate::data::{Note, NoteStore};
use crate::error::AppError;
use crate::federation::{DeliveryReport, OutboxDispatcher};

/// A stored note together with its fan-out report
#[derive(Debug, Clone)]
pub struct Published {
    pub note: Note,
    pub report: DeliveryReport,
}

/// Publish service
pub struct PublishService {
    notes: Arc<dyn NoteStore>,
    dispatcher: Arc<OutboxDispatcher>,
}

impl PublishService {
    pub fn new(notes: Arc<dyn NoteStore>, dispatcher: Arc<OutboxDispatcher>) -> Self {
        Self { notes, dispatcher }
    }

    /// Publish a note
    ///
    /// # Arguments
    /// * `content` - HTML content; sanitised before it is stored
    ///
    /// # Side Effects
    /// - Inserts into database
    /// - Delivers a Create to every follower
    ///
    /// # Errors
    /// `Validation` when nothing is left after sanitising. Delivery failures
    /// never fail the call; they are reported per follower.
    pub async fn publish(&self, content: &str) -> Result<Published, AppError> {
        let content = sanitize_content(content);
        if content.is_empty() {
            return Err(AppError::Validation("note content is required".to_string()));
        }

        let note = self.notes.insert_note(&content).await?;
        tracing::info!(note = %note.id, "Note stored");

        let report = self.dispatcher.publish(&note).await;

        Ok(Published { note, report })
    }
}

/// Strip unsafe markup, keeping text formatting and links
fn sanitize_content(content: &str) -> String {
    ammonia::clean(content.trim()).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::sanitize_content;

    #[test]
    fn sanitize_drops_scripts_and_keeps_links() {
        let cleaned = sanitize_content(
            r#"<p>New book: <a href="https://books.example/1">Dune</a></p><script>alert(1)</script>"#,
        );

        assert!(cleaned.contains("<p>New book: "));
        assert!(cleaned.contains(r#"href="https://books.example/1""#));
        assert!(!cleaned.contains("script"));
    }

    #[test]
    fn sanitize_of_markup_only_content_is_empty() {
        assert!(sanitize_content("  <script>alert(1)</script>  ").is_empty());
    }
}
