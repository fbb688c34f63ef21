use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value could not be read back as the column's row type.
    #[error("cannot decode {table}.{column}: {detail}")]
    Decode {
        table: &'static str,
        column: &'static str,
        detail: String,
    },

    /// A record does not fit the target table's column contract.
    #[error("{table}.{column}: {detail}")]
    Shape {
        table: &'static str,
        column: String,
        detail: String,
    },

    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    pub(crate) fn decode(table: &'static str, column: &'static str, detail: impl Into<String>) -> Self {
        Error::Decode {
            table,
            column,
            detail: detail.into(),
        }
    }
}
