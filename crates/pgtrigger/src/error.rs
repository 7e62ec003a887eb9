//! Error types for pgtrigger

use thiserror::Error;

/// Result type alias for pgtrigger operations
pub type TriggerResult<T> = Result<T, TriggerError>;

/// Error types for trigger definition, registration and installation
#[derive(Debug, Error)]
pub enum TriggerError {
    /// Invalid trigger definition (bad name, forbidden level/timing combination, ...)
    #[error("Invalid trigger definition: {0}")]
    Definition(String),

    /// Two different triggers share a name on the same table
    #[error("Trigger name \"{name}\" already used for table \"{table}\" ({existing})")]
    NameAlreadyUsed {
        name: String,
        table: String,
        existing: String,
    },

    /// Two registered triggers compile to the same database identifier
    #[error("Trigger function \"{pgid}\" already used by {existing}; choose a different trigger name")]
    FunctionNameAlreadyUsed { pgid: String, existing: String },

    /// A condition or trigger references a field the entity does not have
    #[error("Unknown field \"{field}\" on {entity}")]
    UnknownField { entity: String, field: String },

    /// A row reference that is not prefixed with `old__` or `new__`
    #[error("Invalid row reference \"{0}\": must start with \"old__\" or \"new__\"")]
    InvalidReference(String),

    /// Malformed `entity:trigger` URI
    #[error("Invalid trigger URI \"{0}\": expected \"<entity>:<trigger>\"")]
    InvalidUri(String),

    /// URI that has no registry entry
    #[error("No trigger registered for URI \"{0}\"")]
    NotRegistered(String),

    /// API used in a state where it cannot work
    #[error("Usage error: {0}")]
    Usage(String),

    /// Catalog row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Database connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution error
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Settings could not be read or parsed
    #[error("Config error: {0}")]
    Config(String),

    /// Pool error
    #[cfg(feature = "pool")]
    #[error("Pool error: {0}")]
    Pool(String),

    /// Migration error
    #[cfg(feature = "migrate")]
    #[error("Migration error: {0}")]
    Migration(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl TriggerError {
    /// Create a definition error
    pub fn definition(message: impl Into<String>) -> Self {
        Self::Definition(message.into())
    }

    /// Create a usage error
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// Create an unknown field error
    pub fn unknown_field(entity: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            entity: entity.into(),
            field: field.into(),
        }
    }

    /// Check if this is a usage error
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }

    /// Check if this is a definition error
    pub fn is_definition(&self) -> bool {
        matches!(self, Self::Definition(_))
    }

    /// SQLSTATE code of the underlying database error, if any
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Self::Query(err) => err.as_db_error().map(|db| db.code().code()),
            _ => None,
        }
    }

    /// The relation referenced by a statement does not exist (42P01)
    pub fn is_undefined_table(&self) -> bool {
        self.sqlstate() == Some("42P01")
    }

    /// "cannot alter type of a column used in a trigger definition"
    pub fn is_column_used_in_trigger(&self) -> bool {
        match self {
            Self::Query(err) => err.as_db_error().is_some_and(|db| {
                db.code().code() == "0A000" && db.message().contains("used in a trigger definition")
            }),
            _ => false,
        }
    }

    /// Detail line of the database error, if any
    pub fn db_detail(&self) -> Option<&str> {
        match self {
            Self::Query(err) => err.as_db_error().and_then(|db| db.detail()),
            _ => None,
        }
    }

    /// Parse a tokio_postgres error, keeping trigger-raised exceptions untouched
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        if err.is_closed() {
            return Self::Connection(err.to_string());
        }
        Self::Query(err)
    }
}

#[cfg(feature = "pool")]
impl From<deadpool_postgres::PoolError> for TriggerError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

#[cfg(feature = "migrate")]
impl From<refinery::Error> for TriggerError {
    fn from(err: refinery::Error) -> Self {
        Self::Migration(err.to_string())
    }
}

impl From<toml::de::Error> for TriggerError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}
