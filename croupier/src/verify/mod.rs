//! Visual verification: pixel colors, OCR text and comparisons.

pub mod color;
pub mod compare;
pub mod ocr;

pub use color::{color_match, ColorTolerance, ColorWait};
pub use compare::{evaluate, parse_date, CompareOp, Comparison, Operand, Resolution};
pub use ocr::TextReader;
