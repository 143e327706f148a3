use thiserror::Error;
use tokio_postgres::error::SqlState;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The node or the database could not be reached, or the connection broke mid-call.
    #[error("transport error: {0}")]
    Transport(String),

    /// A response arrived but did not have the expected shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The node or the database answered with an explicit error payload.
    #[error("remote error: {0}")]
    Remote(String),

    /// Decoded or stored data violates an invariant.
    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("failed to load block {height}: {source}")]
    Load {
        height: u64,
        #[source]
        source: Box<Error>,
    },

    /// Another writer committed this height between the checkpoint read and our write.
    #[error("block {0} was already loaded by another writer")]
    Conflict(u64),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Transport and remote failures may clear up on their own and are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transport(_) | Error::Remote(_) => true,
            Error::Load { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    pub fn load(height: u64, source: Error) -> Self {
        match source {
            Error::Conflict(_) => source,
            source => Error::Load {
                height,
                source: Box::new(source),
            },
        }
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Error::Integrity(msg.into())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Error::Protocol(e.to_string())
        } else {
            Error::Transport(e.to_string())
        }
    }
}

impl From<tokio_postgres::Error> for Error {
    fn from(e: tokio_postgres::Error) -> Self {
        match e.as_db_error() {
            Some(db) => Error::Remote(format!(
                "postgres {}: {}",
                db.code().code(),
                db.message()
            )),
            None => Error::Transport(format!("postgres: {e}")),
        }
    }
}

impl From<bb8::RunError<tokio_postgres::Error>> for Error {
    fn from(e: bb8::RunError<tokio_postgres::Error>) -> Self {
        match e {
            bb8::RunError::User(e) => e.into(),
            bb8::RunError::TimedOut => {
                Error::Transport("timed out waiting for a database connection".into())
            }
        }
    }
}

/// Unique violations on the `blocks` relation mean the height is already present.
pub(crate) fn is_block_conflict(e: &tokio_postgres::Error) -> bool {
    e.as_db_error().map_or(false, |db| {
        db.code() == &SqlState::UNIQUE_VIOLATION
            && matches!(db.constraint(), Some("blocks_pkey") | Some("blocks_height_key"))
    })
}
