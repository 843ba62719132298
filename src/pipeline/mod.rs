//! Pipeline stages shared by the extraction oracles.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ encode ──▶ llm
//! (path/URL)  (base64)  (request + JSON parse)
//! ```
//!
//! 1. [`input`] : load the user-supplied path or URL into a [`input::Document`]
//! 2. [`encode`]: base64-wrap PDF bytes for the multimodal request body
//! 3. [`llm`]   : one provider round trip, response cleanup and
//!    deserialisation into [`crate::model::Invoice`]

pub mod encode;
pub mod input;
pub mod llm;
