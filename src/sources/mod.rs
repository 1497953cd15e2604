//! Workbook decoding.

mod sheet;
mod xlsx;

pub use sheet::{DateSystem, RawCell, Sheet, SheetSource};
pub use xlsx::XlsxSource;
