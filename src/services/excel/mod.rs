pub mod analyzer;
pub mod chart;
pub mod error;
pub mod processor;
pub mod types;
pub mod utils;

pub use analyzer::SheetAnalyzer;
pub use error::{AnalysisError, ExtractError};
pub use processor::TabularExtractor;
