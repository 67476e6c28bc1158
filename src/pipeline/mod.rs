//! Pipeline stages for one conversion attempt.
//!
//! Each submodule implements exactly one transformation step. Keeping stages
//! separate makes each independently testable and keeps the degradation
//! rules local: the profile stage may degrade, the conversion stage may not.
//!
//! ## Data Flow
//!
//! ```text
//! scan ──▶ layout ──▶ profile ──▶ convert ──▶ archive
//! (item)   (seed)     (ICC merge) (strategy)  (move source)
//! ```
//!
//! 1. [`layout`]  — create the mirrored output/archive directories on first
//!    sight of a relative path and seed the output side with placeholders
//!    before anything real is written there
//! 2. [`profile`] — optionally merge the configured extra ICC profile with
//!    the source's embedded profile into a working copy; every failure here
//!    degrades to the unmodified original
//! 3. [`convert`] — dispatch on (extension, MIME) to a conversion strategy
//!    and produce the pyramidal tiled TIFF at the destination
//!
//! The archiver in [`layout`] runs only for terminal outcomes (success,
//! fallback, tiled shortcut) — never for an item that will be retried.

pub mod convert;
pub mod layout;
pub mod profile;
