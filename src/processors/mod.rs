//! Reference engines shipped with the crate.
//!
//! | Processor | Id | Origin | Roles |
//! |-----------|----|--------|-------|
//! | [`PlainTextProcessor`] | `local-text` | local | text extraction, markdown conversion |
//! | [`RemoteTaskProcessor`] | caller-chosen | remote API | text extraction, markdown conversion, status polling, disposal |
//!
//! Real OCR and layout engines live outside this crate and plug in through
//! the [`crate::processor::Processor`] trait the same way these do.

pub mod plain_text;
pub mod remote;
pub(crate) mod text;

pub use plain_text::PlainTextProcessor;
pub use remote::RemoteTaskProcessor;
