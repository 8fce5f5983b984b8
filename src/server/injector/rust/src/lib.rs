/* src/server/injector/rust/src/lib.rs */

mod helpers;
mod render;

pub use helpers::escape_html;
pub use render::{DocumentParts, STATE_GLOBAL, extract_state, inject_state, split_document, state_script};
