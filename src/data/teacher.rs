use crate::data::{Collection, Record, Store, Validate, email, optional_text, required_text};
use crate::error::{NegativeValueSnafu, RegistrarResult};
use serde::{Deserialize, Serialize};
use snafu::ensure;
use std::cmp::Ordering;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Serialize, sqlx::FromRow, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Teacher {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub subject: String,
    pub years_of_experience: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewTeacher {
    pub name: String,
    pub email: String,
    pub subject: String,
    #[serde(default)]
    pub years_of_experience: i32,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TeacherPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub subject: Option<String>,
    pub years_of_experience: Option<i32>,
}

fn experience(years: i32) -> RegistrarResult<i32> {
    ensure!(
        years >= 0,
        NegativeValueSnafu {
            field: "yearsOfExperience"
        }
    );
    Ok(years)
}

impl Validate for NewTeacher {
    fn validate(self) -> RegistrarResult<Self> {
        Ok(Self {
            name: required_text("name", self.name)?,
            email: email(self.email)?,
            subject: required_text("subject", self.subject)?,
            years_of_experience: experience(self.years_of_experience)?,
        })
    }
}

impl Validate for TeacherPatch {
    fn validate(self) -> RegistrarResult<Self> {
        Ok(Self {
            name: optional_text("name", self.name)?,
            email: self.email.map(email).transpose()?,
            subject: optional_text("subject", self.subject)?,
            years_of_experience: self.years_of_experience.map(experience).transpose()?,
        })
    }
}

impl Record for Teacher {
    const KIND: &'static str = "Teacher";
    const UNIQUE_FIELD: &'static str = "email";

    type New = NewTeacher;
    type Patch = TeacherPatch;
    type Filter = ();

    fn id(&self) -> Uuid {
        self.id
    }

    fn collection(store: &dyn Store) -> &dyn Collection<Self> {
        store.teachers()
    }

    fn create(new: NewTeacher, id: Uuid, now: OffsetDateTime) -> Self {
        Self {
            id,
            name: new.name,
            email: new.email,
            subject: new.subject,
            years_of_experience: new.years_of_experience,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply(&mut self, patch: TeacherPatch, now: OffsetDateTime) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(email) = patch.email {
            self.email = email;
        }
        if let Some(subject) = patch.subject {
            self.subject = subject;
        }
        if let Some(years) = patch.years_of_experience {
            self.years_of_experience = years;
        }
        self.updated_at = now;
    }

    fn unique_value(&self) -> &str {
        &self.email
    }

    fn searchable_fields(&self) -> Vec<&str> {
        vec![self.name.as_str(), self.email.as_str(), self.subject.as_str()]
    }

    fn matches(&self, _filter: &()) -> bool {
        true
    }

    fn list_order(a: &Self, b: &Self) -> Ordering {
        a.name.cmp(&b.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistrarError;

    #[test]
    fn experience_defaults_to_zero_and_cannot_go_negative() {
        let new: NewTeacher = serde_json::from_value(serde_json::json!({
            "name": "Grace",
            "email": "grace@school.edu",
            "subject": "Mathematics",
        }))
        .unwrap();
        assert_eq!(new.validate().unwrap().years_of_experience, 0);

        let patch = TeacherPatch {
            years_of_experience: Some(-3),
            ..TeacherPatch::default()
        };
        assert!(matches!(
            patch.validate(),
            Err(RegistrarError::NegativeValue { .. })
        ));
    }
}
