#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::items_after_statements,
    clippy::map_unwrap_or,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::needless_pass_by_value,
    clippy::return_self_not_must_use,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::struct_field_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::unused_self
)]

pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod gateway;
pub mod language;
pub mod outbound;
pub mod pipeline;
pub mod providers;
pub mod status;
pub mod store;
pub mod tools;
pub mod util;
pub mod webhook;
