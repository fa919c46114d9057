use std::fmt;

/// Errors that occur during tenant storage operations.
///
/// All variants carry enough context to produce actionable error messages.
/// Uses `String` for external error details to maintain `Clone` + `Eq`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreError {
    /// The schema defines no entity with this name.
    UnknownEntity { entity: String },
    /// Row not found by key within the bound tenant.
    NotFound { entity: String, id: String },
    /// Pre-write validation failed; `message` names the first failing rule.
    Validation { message: String },
    /// The store rejected a write for violating the primary-key constraint.
    Conflict { entity: String, id: String },
    /// Table provisioning (DDL) failed; fatal at startup.
    Provisioning { message: String },
    /// A value could not be encoded for, or decoded from, the store.
    Serialization { column: String, message: String },
    /// Connection or query-level database error.
    Database { message: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownEntity { entity } => {
                write!(f, "unknown entity '{entity}'")
            }
            Self::NotFound { entity, id } => {
                write!(f, "'{entity}' row '{id}' not found")
            }
            Self::Validation { message } => {
                write!(f, "validation failed: {message}")
            }
            Self::Conflict { entity, id } => {
                write!(f, "'{entity}' row '{id}' already exists")
            }
            Self::Provisioning { message } => {
                write!(f, "table provisioning failed: {message}")
            }
            Self::Serialization { column, message } => {
                write!(f, "column '{column}': {message}")
            }
            Self::Database { message } => {
                write!(f, "database error: {message}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl StoreError {
    /// Classifies a raw sqlx error against the row the statement targeted.
    ///
    /// Unique-constraint violations (SQLSTATE 23505) become `Conflict`;
    /// everything else is an opaque `Database` error.
    pub fn from_sqlx(err: sqlx::Error, entity: &str, id: &str) -> Self {
        if let sqlx::Error::Database(ref db) = err {
            if db.code().as_deref() == Some("23505") {
                return Self::Conflict {
                    entity: entity.to_string(),
                    id: id.to_string(),
                };
            }
        }
        Self::Database {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_entity_display() {
        let err = StoreError::UnknownEntity {
            entity: "deals".into(),
        };
        assert_eq!(err.to_string(), "unknown entity 'deals'");
    }

    #[test]
    fn not_found_display() {
        let err = StoreError::NotFound {
            entity: "contacts".into(),
            id: "c-1".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("contacts"));
        assert!(msg.contains("c-1"));
    }

    #[test]
    fn validation_display() {
        let err = StoreError::Validation {
            message: "required property 'email' is missing".into(),
        };
        assert!(err.to_string().contains("email"));
    }

    #[test]
    fn conflict_display() {
        let err = StoreError::Conflict {
            entity: "contacts".into(),
            id: "c-1".into(),
        };
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn provisioning_display() {
        let err = StoreError::Provisioning {
            message: "permission denied".into(),
        };
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn serialization_display() {
        let err = StoreError::Serialization {
            column: "price".into(),
            message: "not a valid decimal".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("price"));
        assert!(msg.contains("decimal"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StoreError>();
    }
}
