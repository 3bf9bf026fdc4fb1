//! A [`Store`] kept entirely in process memory.
//!
//! Selected with `DATABASE_URL=memory://`. Every rule the Postgres schema enforces (unique keys,
//! defaults, ordering) is reproduced here through the [`Record`] hooks, so routes behave the same
//! against either backend.

use crate::data::{
    Collection, ConnectionState, CourseEnrollment, Record, Store, course::Course,
    student::Student, teacher::Teacher,
};
use crate::error::{RegistrarError, RegistrarResult};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug)]
pub struct MemoryCollection<R> {
    records: RwLock<Vec<R>>,
}

impl<R> Default for MemoryCollection<R> {
    fn default() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }
}

fn ensure_unique<R: Record>(records: &[R], candidate: &R) -> RegistrarResult<()> {
    let clash = records.iter().any(|existing| {
        existing.id() != candidate.id() && existing.unique_value() == candidate.unique_value()
    });

    if clash {
        Err(RegistrarError::Duplicate {
            kind: R::KIND,
            field: R::UNIQUE_FIELD,
            value: candidate.unique_value().to_string(),
        })
    } else {
        Ok(())
    }
}

fn sorted<R: Record>(mut records: Vec<R>) -> Vec<R> {
    records.sort_by(R::list_order);
    records
}

#[async_trait]
impl<R: Record> Collection<R> for MemoryCollection<R> {
    async fn insert(&self, new: R::New) -> RegistrarResult<R> {
        let record = R::create(new, Uuid::new_v4(), OffsetDateTime::now_utc());

        let mut records = self.records.write().await;
        ensure_unique(&records, &record)?;
        records.push(record.clone());

        Ok(record)
    }

    async fn find_all(&self) -> RegistrarResult<Vec<R>> {
        Ok(sorted(self.records.read().await.clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> RegistrarResult<Option<R>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .find(|record| record.id() == id)
            .cloned())
    }

    async fn update(&self, id: Uuid, patch: R::Patch) -> RegistrarResult<Option<R>> {
        let mut records = self.records.write().await;
        let Some(position) = records.iter().position(|record| record.id() == id) else {
            return Ok(None);
        };

        let mut updated = records[position].clone();
        updated.apply(patch, OffsetDateTime::now_utc());
        ensure_unique(&records, &updated)?;
        records[position] = updated.clone();

        Ok(Some(updated))
    }

    async fn remove(&self, id: Uuid) -> RegistrarResult<bool> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|record| record.id() != id);
        Ok(records.len() != before)
    }

    async fn search(&self, query: &str) -> RegistrarResult<Vec<R>> {
        let matches = self
            .records
            .read()
            .await
            .iter()
            .filter(|record| record.mentions(query))
            .cloned()
            .collect();
        Ok(sorted(matches))
    }

    async fn count(&self, filter: R::Filter) -> RegistrarResult<i64> {
        let count = self
            .records
            .read()
            .await
            .iter()
            .filter(|record| record.matches(&filter))
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }
}

#[derive(Debug)]
pub struct MemoryStore {
    students: MemoryCollection<Student>,
    courses: MemoryCollection<Course>,
    teachers: MemoryCollection<Teacher>,
    connected: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            students: MemoryCollection::default(),
            courses: MemoryCollection::default(),
            teachers: MemoryCollection::default(),
            connected: AtomicBool::new(true),
        }
    }
}

impl MemoryStore {
    /// Simulates the backend going away (or coming back) for connectivity reporting.
    #[cfg(test)]
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn students(&self) -> &dyn Collection<Student> {
        &self.students
    }

    fn courses(&self) -> &dyn Collection<Course> {
        &self.courses
    }

    fn teachers(&self) -> &dyn Collection<Teacher> {
        &self.teachers
    }

    async fn students_per_course(&self) -> RegistrarResult<Vec<CourseEnrollment>> {
        let mut counts: HashMap<String, i64> = HashMap::new();
        for student in self.students.records.read().await.iter() {
            *counts.entry(student.course.clone()).or_default() += 1;
        }

        let mut enrollments: Vec<_> = counts
            .into_iter()
            .map(|(course, count)| CourseEnrollment { course, count })
            .collect();
        enrollments.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.course.cmp(&b.course)));
        Ok(enrollments)
    }

    async fn connection_state(&self) -> ConnectionState {
        if self.connected.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{
        Status,
        course::NewCourse,
        student::{NewStudent, StudentFilter, StudentPatch},
    };

    fn new_student(name: &str, email: &str, course: &str) -> NewStudent {
        NewStudent {
            name: name.into(),
            email: email.into(),
            course: course.into(),
            enrollment_date: None,
            status: Status::Active,
        }
    }

    #[tokio::test]
    async fn duplicate_unique_keys_are_rejected() {
        let store = MemoryStore::default();
        store
            .students()
            .insert(new_student("Ann", "a@x.com", "CS101"))
            .await
            .unwrap();

        let err = store
            .students()
            .insert(new_student("Another Ann", "a@x.com", "CS102"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RegistrarError::Duplicate {
                field: "email",
                ..
            }
        ));
        assert_eq!(store.students().count(StudentFilter::All).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn updates_cannot_steal_another_records_key() {
        let store = MemoryStore::default();
        let students = store.students();
        students
            .insert(new_student("Ann", "a@x.com", "CS101"))
            .await
            .unwrap();
        let bob = students
            .insert(new_student("Bob", "b@x.com", "CS101"))
            .await
            .unwrap();

        let patch = StudentPatch {
            email: Some("a@x.com".into()),
            ..StudentPatch::default()
        };
        assert!(students.update(bob.id, patch).await.is_err());

        // re-saving your own key is fine
        let patch = StudentPatch {
            email: Some("b@x.com".into()),
            name: Some("Robert".into()),
            ..StudentPatch::default()
        };
        let updated = students.update(bob.id, patch).await.unwrap().unwrap();
        assert_eq!(updated.name, "Robert");
    }

    #[tokio::test]
    async fn missing_ids_report_absence() {
        let store = MemoryStore::default();
        let id = Uuid::new_v4();
        assert!(store.courses().find_by_id(id).await.unwrap().is_none());
        assert!(!store.courses().remove(id).await.unwrap());
        assert!(
            store
                .teachers()
                .update(id, Default::default())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn courses_list_by_name() {
        let store = MemoryStore::default();
        for name in ["Physics", "Art", "Chemistry"] {
            store
                .courses()
                .insert(NewCourse {
                    name: name.into(),
                    description: None,
                    duration: None,
                    status: Status::Active,
                })
                .await
                .unwrap();
        }

        let names: Vec<_> = store
            .courses()
            .find_all()
            .await
            .unwrap()
            .into_iter()
            .map(|course| course.name)
            .collect();
        assert_eq!(names, ["Art", "Chemistry", "Physics"]);
    }

    #[tokio::test]
    async fn enrollments_group_by_course() {
        let store = MemoryStore::default();
        let students = store.students();
        for (i, course) in ["CS101", "MATH200", "CS101"].into_iter().enumerate() {
            students
                .insert(new_student("S", &format!("s{i}@x.com"), course))
                .await
                .unwrap();
        }

        let per_course = store.students_per_course().await.unwrap();
        assert_eq!(
            per_course,
            [
                CourseEnrollment {
                    course: "CS101".into(),
                    count: 2
                },
                CourseEnrollment {
                    course: "MATH200".into(),
                    count: 1
                },
            ]
        );
    }

    #[tokio::test]
    async fn connectivity_can_be_toggled() {
        let store = MemoryStore::default();
        assert_eq!(store.connection_state().await, ConnectionState::Connected);
        store.set_connected(false);
        assert_eq!(store.connection_state().await, ConnectionState::Disconnected);
    }
}
