//! File-backed transient resources.
//!
//! Two areas are managed here:
//! - Staging areas: scratch directories for uploaded attachments and avatars
//!   that only live as long as the operation they accompany.
//! - The persisted attachment directory: files the backend delivered, kept
//!   until a client deletes them.

mod attachments;
mod error;
mod staging;

pub use attachments::{AttachmentFile, AttachmentStore};
pub use error::{StorageError, StorageResult};
pub use staging::{StagedFile, StagingArea, release_all};
