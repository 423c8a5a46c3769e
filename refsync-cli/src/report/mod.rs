//! Rendering of migration summaries and comparison results

pub mod console;
pub mod excel;
pub mod json;

pub use console::{print_comparison, print_summary};
pub use excel::{export_comparison, export_summary};
pub use json::{write_comparison, write_summary};
