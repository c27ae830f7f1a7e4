use thiserror::Error;

#[derive(Error, Debug)]
pub enum MailroomError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Ledger rebuild failed, previous state restored: {source}")]
    Rebuild {
        #[source]
        source: Box<MailroomError>,
    },

    #[error("Roster error: {0}")]
    Roster(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, MailroomError>;
