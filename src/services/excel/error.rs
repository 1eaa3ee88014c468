use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Error parsing Excel file: {0}")]
    Unreadable(String),
    #[error("No valid data found in file")]
    NoValidData,
}

impl From<calamine::Error> for ExtractError {
    fn from(err: calamine::Error) -> Self {
        ExtractError::Unreadable(err.to_string())
    }
}

impl From<csv::Error> for ExtractError {
    fn from(err: csv::Error) -> Self {
        ExtractError::Unreadable(err.to_string())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum AnalysisError {
    #[error("Invalid column name: {0}")]
    InvalidColumn(String),
}
