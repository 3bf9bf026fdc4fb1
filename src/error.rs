use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use snafu::Snafu;
use std::{num::ParseIntError, path::PathBuf};
use uuid::Uuid;

pub type RegistrarResult<T> = Result<T, RegistrarError>;

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RegistrarError {
    #[snafu(display("Error opening database"))]
    OpenDatabase { source: sqlx::Error },
    #[snafu(display("Error making SQL query"))]
    MakeQuery { source: sqlx::Error },
    #[snafu(display("Error migrating DB schema"))]
    MigrateError { source: sqlx::migrate::MigrateError },
    #[snafu(display("Unable to parse `{}` as a number: {:?}", name, original))]
    ParseNumber {
        source: ParseIntError,
        name: &'static str,
        original: String,
    },
    #[snafu(display("Unable to create log directory {}", path.display()))]
    CreateLogDirectory {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("Unable to read process memory statistics"))]
    ReadMemoryStats { source: std::io::Error },
    #[snafu(display("Process memory statistics were missing {}", field))]
    MalformedMemoryStats { field: &'static str },
    #[snafu(display("Unable to parse uuid {:?}", original))]
    ParseUuid {
        source: uuid::Error,
        original: String,
    },
    #[snafu(display("{}", source.body_text()))]
    BadBody { source: JsonRejection },
    #[snafu(display("{}", source.body_text()))]
    BadQuery { source: QueryRejection },
    #[snafu(display("Unable to read request body"))]
    ReadBody { source: axum::Error },
    #[snafu(display("Request body is larger than {} bytes", limit))]
    BodyTooLarge { limit: usize },
    #[snafu(display("{:?} is not a valid email address", original))]
    InvalidEmail {
        source: email_address::Error,
        original: String,
    },
    #[snafu(display("`{}` is required", field))]
    MissingField { field: &'static str },
    #[snafu(display("`{}` cannot be negative", field))]
    NegativeValue { field: &'static str },
    #[snafu(display("A {} with {} {:?} already exists", kind, field, value))]
    Duplicate {
        kind: &'static str,
        field: &'static str,
        value: String,
    },
    #[snafu(display("Unable to find {} with UUID: {}", kind, id))]
    MissingRecord { kind: &'static str, id: Uuid },
    #[snafu(display(
        "Cannot delete course {:?}: {} student(s) are still enrolled",
        name,
        count
    ))]
    CourseHasStudents { name: String, count: i64 },
    #[snafu(display("Route not found"))]
    UnknownRoute,
}

impl RegistrarError {
    /// Maps a query failure onto [`RegistrarError::Duplicate`] when Postgres reports a unique
    /// violation, and onto [`RegistrarError::MakeQuery`] otherwise.
    pub fn from_write(
        source: sqlx::Error,
        kind: &'static str,
        field: &'static str,
        value: impl Into<String>,
    ) -> Self {
        let is_unique_violation = source
            .as_database_error()
            .and_then(|db_error| db_error.code())
            .is_some_and(|code| code == UNIQUE_VIOLATION);

        if is_unique_violation {
            Self::Duplicate {
                kind,
                field,
                value: value.into(),
            }
        } else {
            Self::MakeQuery { source }
        }
    }

    pub fn status_code(&self) -> StatusCode {
        const ISE: StatusCode = StatusCode::INTERNAL_SERVER_ERROR; //internal server error
        const NF: StatusCode = StatusCode::NOT_FOUND; //not found
        const BI: StatusCode = StatusCode::BAD_REQUEST; //bad input
        const TL: StatusCode = StatusCode::PAYLOAD_TOO_LARGE; //too large

        match self {
            Self::OpenDatabase { .. } | Self::MakeQuery { .. } | Self::MigrateError { .. } => ISE,
            Self::ParseNumber { .. } | Self::CreateLogDirectory { .. } => ISE,
            Self::ReadMemoryStats { .. } | Self::MalformedMemoryStats { .. } => ISE,
            // an id that isn't a uuid can't name any record
            Self::ParseUuid { .. } => NF,
            Self::BadBody { .. } | Self::BadQuery { .. } | Self::ReadBody { .. } => BI,
            Self::InvalidEmail { .. } | Self::MissingField { .. } | Self::NegativeValue { .. } => {
                BI
            }
            Self::Duplicate { .. } | Self::CourseHasStudents { .. } => BI,
            Self::BodyTooLarge { .. } => TL,
            Self::MissingRecord { .. } | Self::UnknownRoute => NF,
        }
    }

    fn kind(&self) -> &'static str {
        match self.status_code() {
            StatusCode::NOT_FOUND => "NotFound",
            StatusCode::BAD_REQUEST => "ValidationError",
            StatusCode::PAYLOAD_TOO_LARGE => "PayloadTooLarge",
            _ => "InternalServerError",
        }
    }
}

impl From<JsonRejection> for RegistrarError {
    fn from(source: JsonRejection) -> Self {
        Self::BadBody { source }
    }
}

impl From<QueryRejection> for RegistrarError {
    fn from(source: QueryRejection) -> Self {
        Self::BadQuery { source }
    }
}

impl IntoResponse for RegistrarError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();

        if status_code.is_server_error() {
            error!(?self, "Error!");
        } else {
            warn!(error = %self, status = status_code.as_u16(), "Request rejected");
        }

        let body = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        (status_code, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_keep_their_message() {
        let err = RegistrarError::Duplicate {
            kind: "Student",
            field: "email",
            value: "a@x.com".into(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            err.to_string(),
            "A Student with email \"a@x.com\" already exists"
        );
    }

    #[test]
    fn malformed_ids_are_not_found() {
        let source = Uuid::try_parse("nope").unwrap_err();
        let err = RegistrarError::ParseUuid {
            source,
            original: "nope".into(),
        };
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.kind(), "NotFound");
    }

    #[derive(Debug)]
    struct FakeDbError {
        code: &'static str,
    }

    impl std::fmt::Display for FakeDbError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "database error {}", self.code)
        }
    }

    impl std::error::Error for FakeDbError {}

    impl sqlx::error::DatabaseError for FakeDbError {
        fn message(&self) -> &str {
            "duplicate key value violates unique constraint"
        }

        fn code(&self) -> Option<std::borrow::Cow<'_, str>> {
            Some(self.code.into())
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            if self.code == UNIQUE_VIOLATION {
                sqlx::error::ErrorKind::UniqueViolation
            } else {
                sqlx::error::ErrorKind::Other
            }
        }
    }

    #[test]
    fn unique_violations_become_duplicates() {
        let source = sqlx::Error::Database(Box::new(FakeDbError { code: "23505" }));
        let err = RegistrarError::from_write(source, "Student", "email", "a@x.com");
        assert!(matches!(
            &err,
            RegistrarError::Duplicate {
                kind: "Student",
                field: "email",
                value,
            } if value == "a@x.com"
        ));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn other_database_errors_stay_internal() {
        // foreign key violation
        let source = sqlx::Error::Database(Box::new(FakeDbError { code: "23503" }));
        let err = RegistrarError::from_write(source, "Course", "name", "CS101");
        assert!(matches!(err, RegistrarError::MakeQuery { .. }));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn oversized_bodies_have_their_own_status() {
        let err = RegistrarError::BodyTooLarge { limit: 1024 };
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(err.kind(), "PayloadTooLarge");
    }

    #[test]
    fn non_database_failures_are_not_duplicates() {
        let err = RegistrarError::from_write(sqlx::Error::PoolTimedOut, "Course", "name", "CS101");
        assert!(matches!(err, RegistrarError::MakeQuery { .. }));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
