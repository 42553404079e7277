use r2e_orm::OrmError;

/// Extension trait for converting `sqlx::Error` into `OrmError`.
///
/// Due to Rust's orphan rules, we can't implement `From<sqlx::Error> for OrmError`
/// in this crate. Use `.into_orm_error()` instead.
pub trait SqlxErrorExt {
    fn into_orm_error(self) -> OrmError;
}

impl SqlxErrorExt for sqlx::Error {
    fn into_orm_error(self) -> OrmError {
        match &self {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                OrmError::mapping(self.to_string())
            }
            sqlx::Error::Configuration(_) => OrmError::Config(self.to_string()),
            _ => OrmError::database(self),
        }
    }
}

/// Convenience alias for driver results using `OrmError`.
pub type SqlxResult<T> = Result<T, OrmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_errors_keep_source() {
        let err = sqlx::Error::PoolClosed.into_orm_error();
        assert!(matches!(err, OrmError::Database(_)));
        assert!(std::error::Error::source(&err).is_some());
    }
}
