//! Quantity takeoff table: model-reply parsing, local recomputation and export.
//!
//! The model only proposes rows. Every number shown or exported is
//! re-derived here from the row dimensions and the calculation mode.

pub mod error;
pub mod export;
pub mod model;
pub mod parse;
pub mod recompute;

pub use error::TakeoffError;
pub use export::{export_bytes, export_to_path, ExportFormat};
pub use model::{CalcMode, ReplyRow, RowInput, TakeoffRow, TakeoffTable, Unit, DEFAULT_WALL_HEIGHT};
pub use parse::{extract_json_from_response, parse_reply, parse_table};
pub use recompute::{coerce_f64, format_total, recompute, recompute_reply};
