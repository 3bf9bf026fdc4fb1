use crate::data::{
    Collection, Record, Status, Store, Validate, email, optional_text, required_text,
};
use crate::error::RegistrarResult;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Serialize, sqlx::FromRow, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    /// Course name or id; not a foreign key
    pub course: String,
    #[serde(with = "time::serde::rfc3339")]
    pub enrollment_date: OffsetDateTime,
    pub status: Status,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewStudent {
    pub name: String,
    pub email: String,
    pub course: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub enrollment_date: Option<OffsetDateTime>,
    #[serde(default)]
    pub status: Status,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StudentPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub course: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub enrollment_date: Option<OffsetDateTime>,
    pub status: Option<Status>,
}

#[derive(Debug, Clone)]
pub enum StudentFilter {
    All,
    Status(Status),
    /// Students whose `course` is the course's name or its id
    EnrolledIn { name: String, id: Uuid },
}

impl Validate for NewStudent {
    fn validate(self) -> RegistrarResult<Self> {
        Ok(Self {
            name: required_text("name", self.name)?,
            email: email(self.email)?,
            course: required_text("course", self.course)?,
            ..self
        })
    }
}

impl Validate for StudentPatch {
    fn validate(self) -> RegistrarResult<Self> {
        Ok(Self {
            name: optional_text("name", self.name)?,
            email: self.email.map(email).transpose()?,
            course: optional_text("course", self.course)?,
            ..self
        })
    }
}

impl Record for Student {
    const KIND: &'static str = "Student";
    const UNIQUE_FIELD: &'static str = "email";

    type New = NewStudent;
    type Patch = StudentPatch;
    type Filter = StudentFilter;

    fn id(&self) -> Uuid {
        self.id
    }

    fn collection(store: &dyn Store) -> &dyn Collection<Self> {
        store.students()
    }

    fn create(new: NewStudent, id: Uuid, now: OffsetDateTime) -> Self {
        Self {
            id,
            name: new.name,
            email: new.email,
            course: new.course,
            enrollment_date: new.enrollment_date.unwrap_or(now),
            status: new.status,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply(&mut self, patch: StudentPatch, now: OffsetDateTime) {
        let StudentPatch {
            name,
            email,
            course,
            enrollment_date,
            status,
        } = patch;

        if let Some(name) = name {
            self.name = name;
        }
        if let Some(email) = email {
            self.email = email;
        }
        if let Some(course) = course {
            self.course = course;
        }
        if let Some(enrollment_date) = enrollment_date {
            self.enrollment_date = enrollment_date;
        }
        if let Some(status) = status {
            self.status = status;
        }
        self.updated_at = now;
    }

    fn unique_value(&self) -> &str {
        &self.email
    }

    fn searchable_fields(&self) -> Vec<&str> {
        vec![self.name.as_str(), self.email.as_str(), self.course.as_str()]
    }

    fn matches(&self, filter: &StudentFilter) -> bool {
        match filter {
            StudentFilter::All => true,
            StudentFilter::Status(status) => self.status == *status,
            StudentFilter::EnrolledIn { name, id } => {
                self.course == *name || self.course == id.to_string()
            }
        }
    }

    fn list_order(a: &Self, b: &Self) -> Ordering {
        b.created_at.cmp(&a.created_at)
    }
}
