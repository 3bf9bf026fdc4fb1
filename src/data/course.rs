use crate::data::{Collection, Record, Status, Store, Validate, optional_text, required_text};
use crate::error::RegistrarResult;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Serialize, sqlx::FromRow, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub duration: Option<String>,
    pub status: Status,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewCourse {
    pub name: String,
    pub description: Option<String>,
    pub duration: Option<String>,
    #[serde(default)]
    pub status: Status,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CoursePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub duration: Option<String>,
    pub status: Option<Status>,
}

impl Validate for NewCourse {
    fn validate(self) -> RegistrarResult<Self> {
        Ok(Self {
            name: required_text("name", self.name)?,
            ..self
        })
    }
}

impl Validate for CoursePatch {
    fn validate(self) -> RegistrarResult<Self> {
        Ok(Self {
            name: optional_text("name", self.name)?,
            ..self
        })
    }
}

impl Record for Course {
    const KIND: &'static str = "Course";
    const UNIQUE_FIELD: &'static str = "name";

    type New = NewCourse;
    type Patch = CoursePatch;
    type Filter = Option<Status>;

    fn id(&self) -> Uuid {
        self.id
    }

    fn collection(store: &dyn Store) -> &dyn Collection<Self> {
        store.courses()
    }

    fn create(new: NewCourse, id: Uuid, now: OffsetDateTime) -> Self {
        Self {
            id,
            name: new.name,
            description: new.description,
            duration: new.duration,
            status: new.status,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply(&mut self, patch: CoursePatch, now: OffsetDateTime) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if patch.description.is_some() {
            self.description = patch.description;
        }
        if patch.duration.is_some() {
            self.duration = patch.duration;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        self.updated_at = now;
    }

    fn unique_value(&self) -> &str {
        &self.name
    }

    fn searchable_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.name.as_str()];
        fields.extend(self.description.as_deref());
        fields
    }

    fn matches(&self, filter: &Option<Status>) -> bool {
        filter.is_none_or(|status| self.status == status)
    }

    fn list_order(a: &Self, b: &Self) -> Ordering {
        a.name.cmp(&b.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_is_searchable_when_present() {
        let new = NewCourse {
            name: " Intro to Rust ".into(),
            description: Some("Ownership and borrowing".into()),
            duration: Some("12 weeks".into()),
            status: Status::default(),
        };
        let course = Course::create(new.validate().unwrap(), Uuid::new_v4(), OffsetDateTime::now_utc());

        assert_eq!(course.name, "Intro to Rust");
        assert!(course.mentions("BORROW"));
        assert!(!course.mentions("python"));
    }

    #[test]
    fn status_filter() {
        let mut course = Course::create(
            NewCourse {
                name: "CS101".into(),
                description: None,
                duration: None,
                status: Status::Active,
            },
            Uuid::new_v4(),
            OffsetDateTime::now_utc(),
        );
        assert!(course.matches(&None));
        assert!(course.matches(&Some(Status::Active)));

        course.apply(
            CoursePatch {
                status: Some(Status::Inactive),
                ..CoursePatch::default()
            },
            OffsetDateTime::now_utc(),
        );
        assert!(!course.matches(&Some(Status::Active)));
        assert_eq!(course.duration, None);
    }
}
