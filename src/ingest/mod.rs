/// Raw input loading.
///
/// Submodules:
/// - `wide_csv`: directory of per-station wide CSV exports → `WideTable`.

pub mod wide_csv;

pub use wide_csv::{list_csv_files, load_wide_directory, load_wide_reader};
