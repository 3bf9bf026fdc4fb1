use crate::error::{
    InvalidEmailSnafu, MissingFieldSnafu, ParseUuidSnafu, RegistrarError, RegistrarResult,
};
use async_trait::async_trait;
use email_address::EmailAddress;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use snafu::{ResultExt, ensure};
use std::{cmp::Ordering, fmt::Debug, str::FromStr};
use uuid::Uuid;

pub mod course;
pub mod memory;
pub mod postgres;
pub mod student;
pub mod teacher;

#[derive(Serialize, Deserialize, sqlx::Type, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "record_status", rename_all = "lowercase")]
pub enum Status {
    #[default]
    Active,
    Inactive,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Connecting,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CourseEnrollment {
    pub course: String,
    pub count: i64,
}

/// Boundary checks run on every create/update body before it reaches a store.
///
/// Implementations normalise as well as check (trimming names, lowercasing emails), so the
/// value that comes back is the one that gets persisted.
pub trait Validate: Sized {
    fn validate(self) -> RegistrarResult<Self>;
}

/// A statically-typed record stored in one collection.
///
/// The hooks below the associated types are what the in-memory store needs to behave like the
/// Postgres one: the Postgres store expresses the same rules in SQL.
pub trait Record: Serialize + Clone + Debug + Send + Sync + 'static {
    /// Human name used in messages and logs
    const KIND: &'static str;
    /// Field carrying the unique constraint
    const UNIQUE_FIELD: &'static str;

    type New: DeserializeOwned + Validate + Debug + Send + Sync + 'static;
    type Patch: DeserializeOwned + Validate + Debug + Send + Sync + 'static;
    type Filter: Debug + Send + Sync + 'static;

    fn id(&self) -> Uuid;
    fn collection(store: &dyn Store) -> &dyn Collection<Self>;

    fn create(new: Self::New, id: Uuid, now: time::OffsetDateTime) -> Self;
    fn apply(&mut self, patch: Self::Patch, now: time::OffsetDateTime);
    fn unique_value(&self) -> &str;
    fn searchable_fields(&self) -> Vec<&str>;
    fn matches(&self, filter: &Self::Filter) -> bool;
    fn list_order(a: &Self, b: &Self) -> Ordering;

    fn mentions(&self, query: &str) -> bool {
        self.searchable_fields()
            .into_iter()
            .any(|field| contains_ignore_case(field, query))
    }
}

#[async_trait]
pub trait Collection<R: Record>: Send + Sync {
    async fn insert(&self, new: R::New) -> RegistrarResult<R>;
    async fn find_all(&self) -> RegistrarResult<Vec<R>>;
    async fn find_by_id(&self, id: Uuid) -> RegistrarResult<Option<R>>;
    /// `Ok(None)` when no record has the id
    async fn update(&self, id: Uuid, patch: R::Patch) -> RegistrarResult<Option<R>>;
    /// `Ok(false)` when no record has the id
    async fn remove(&self, id: Uuid) -> RegistrarResult<bool>;
    async fn search(&self, query: &str) -> RegistrarResult<Vec<R>>;
    async fn count(&self, filter: R::Filter) -> RegistrarResult<i64>;
}

/// The persistence client handed to every route via [`crate::state::RegistrarState`].
#[async_trait]
pub trait Store: Send + Sync + Debug {
    fn students(&self) -> &dyn Collection<student::Student>;
    fn courses(&self) -> &dyn Collection<course::Course>;
    fn teachers(&self) -> &dyn Collection<teacher::Teacher>;

    async fn students_per_course(&self) -> RegistrarResult<Vec<CourseEnrollment>>;
    /// Never fails: an unreachable backend is reported as [`ConnectionState::Disconnected`].
    async fn connection_state(&self) -> ConnectionState;
}

pub fn parse_id(original: &str) -> RegistrarResult<Uuid> {
    Uuid::try_parse(original).context(ParseUuidSnafu { original })
}

pub fn required_text(field: &'static str, value: String) -> RegistrarResult<String> {
    let trimmed = value.trim();
    ensure!(!trimmed.is_empty(), MissingFieldSnafu { field });
    Ok(trimmed.to_string())
}

pub fn optional_text(field: &'static str, value: Option<String>) -> RegistrarResult<Option<String>> {
    value.map(|value| required_text(field, value)).transpose()
}

pub fn email(value: String) -> RegistrarResult<String> {
    let original = required_text("email", value)?.to_lowercase();
    let parsed = EmailAddress::from_str(&original).context(InvalidEmailSnafu {
        original: original.clone(),
    })?;
    Ok(parsed.as_str().to_string())
}

/// Case-insensitive substring test used by the in-memory store's search.
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

pub fn missing<R: Record>(id: Uuid) -> RegistrarError {
    RegistrarError::MissingRecord { kind: R::KIND, id }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_normalised() {
        assert_eq!(email("  Ann@X.com ".into()).unwrap(), "ann@x.com");
        assert!(matches!(
            email("not-an-email".into()),
            Err(RegistrarError::InvalidEmail { .. })
        ));
        assert!(matches!(
            email("   ".into()),
            Err(RegistrarError::MissingField { field: "email" })
        ));
    }

    #[test]
    fn blank_optional_text_is_rejected_but_absent_is_fine() {
        assert_eq!(optional_text("name", None).unwrap(), None);
        assert_eq!(
            optional_text("name", Some(" Ann ".into())).unwrap(),
            Some("Ann".into())
        );
        assert!(optional_text("name", Some(String::new())).is_err());
    }

    #[test]
    fn connection_states_serialize_by_name() {
        let states = [
            ConnectionState::Disconnected,
            ConnectionState::Connected,
            ConnectionState::Connecting,
        ];
        assert_eq!(
            serde_json::to_value(states).unwrap(),
            serde_json::json!(["Disconnected", "Connected", "Connecting"])
        );
    }

    #[test]
    fn search_is_case_insensitive() {
        assert!(contains_ignore_case("Computer Science", "SCIENCE"));
        assert!(!contains_ignore_case("Physics", "chem"));
    }
}
