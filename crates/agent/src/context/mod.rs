//! Context budgeting.
//!
//! The loop never sends the raw conversation: it prepends the phase system
//! prompt and runs the result through [`trim`] so the request fits the
//! configured token budget. Tool results are shortened with
//! [`truncate_middle`] before they are committed.

pub mod budget;

pub use budget::{
    estimate_conversation_tokens, estimate_message_tokens, estimate_tokens, trim, truncate_middle,
};
