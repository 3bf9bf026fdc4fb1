use crate::{
    config::DbConfig,
    data::{
        Collection, ConnectionState, CourseEnrollment, Record, Status, Store,
        course::{Course, CoursePatch, NewCourse},
        student::{NewStudent, Student, StudentFilter, StudentPatch},
        teacher::{NewTeacher, Teacher, TeacherPatch},
    },
    error::{MakeQuerySnafu, MigrateSnafu, OpenDatabaseSnafu, RegistrarError, RegistrarResult},
};
use async_trait::async_trait;
use snafu::ResultExt;
use sqlx::{Pool, Postgres, postgres::PgPoolOptions};
use std::time::Duration;
use uuid::Uuid;

const STUDENT_COLUMNS: &str =
    "id, name, email, course, enrollment_date, status, created_at, updated_at";
const COURSE_COLUMNS: &str = "id, name, description, duration, status, created_at, updated_at";
const TEACHER_COLUMNS: &str = "id, name, email, subject, years_of_experience, created_at, updated_at";

const PING_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    pub async fn connect(db_config: &DbConfig) -> RegistrarResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(db_config.max_connections())
            .connect(db_config.get_db_path())
            .await
            .context(OpenDatabaseSnafu)?;

        sqlx::migrate!().run(&pool).await.context(MigrateSnafu)?;

        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Turns a free-text query into an `ILIKE` pattern that matches it literally.
fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn duplicate<R: Record>(value: &str) -> impl FnOnce(sqlx::Error) -> RegistrarError + '_ {
    move |source| RegistrarError::from_write(source, R::KIND, R::UNIQUE_FIELD, value)
}

async fn remove_by_id(pool: &Pool<Postgres>, table: &str, id: Uuid) -> RegistrarResult<bool> {
    let result = sqlx::query(&format!("DELETE FROM public.{table} WHERE id = $1"))
        .bind(id)
        .execute(pool)
        .await
        .context(MakeQuerySnafu)?;
    Ok(result.rows_affected() > 0)
}

async fn count_where(
    pool: &Pool<Postgres>,
    table: &str,
    status: Option<Status>,
) -> RegistrarResult<i64> {
    let sql = match status {
        Some(_) => format!("SELECT COUNT(*) FROM public.{table} WHERE status = $1"),
        None => format!("SELECT COUNT(*) FROM public.{table}"),
    };

    let mut query = sqlx::query_scalar::<Postgres, i64>(&sql);
    if let Some(status) = status {
        query = query.bind(status);
    }
    query.fetch_one(pool).await.context(MakeQuerySnafu)
}

#[async_trait]
impl Collection<Student> for PostgresStore {
    async fn insert(&self, new: NewStudent) -> RegistrarResult<Student> {
        let NewStudent {
            name,
            email,
            course,
            enrollment_date,
            status,
        } = new;

        sqlx::query_as(&format!(
            "INSERT INTO public.students (name, email, course, enrollment_date, status) VALUES ($1, $2, $3, COALESCE($4, now()), $5) RETURNING {STUDENT_COLUMNS}"
        ))
        .bind(name)
        .bind(&email)
        .bind(course)
        .bind(enrollment_date)
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(duplicate::<Student>(&email))
    }

    async fn find_all(&self) -> RegistrarResult<Vec<Student>> {
        sqlx::query_as(&format!(
            "SELECT {STUDENT_COLUMNS} FROM public.students ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .context(MakeQuerySnafu)
    }

    async fn find_by_id(&self, id: Uuid) -> RegistrarResult<Option<Student>> {
        sqlx::query_as(&format!(
            "SELECT {STUDENT_COLUMNS} FROM public.students WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context(MakeQuerySnafu)
    }

    async fn update(&self, id: Uuid, patch: StudentPatch) -> RegistrarResult<Option<Student>> {
        let StudentPatch {
            name,
            email,
            course,
            enrollment_date,
            status,
        } = patch;
        let email_for_error = email.clone().unwrap_or_default();

        sqlx::query_as(&format!(
            "UPDATE public.students SET name = COALESCE($2, name), email = COALESCE($3, email), course = COALESCE($4, course), enrollment_date = COALESCE($5, enrollment_date), status = COALESCE($6, status), updated_at = now() WHERE id = $1 RETURNING {STUDENT_COLUMNS}"
        ))
        .bind(id)
        .bind(name)
        .bind(email)
        .bind(course)
        .bind(enrollment_date)
        .bind(status)
        .fetch_optional(&self.pool)
        .await
        .map_err(duplicate::<Student>(&email_for_error))
    }

    async fn remove(&self, id: Uuid) -> RegistrarResult<bool> {
        remove_by_id(&self.pool, "students", id).await
    }

    async fn search(&self, query: &str) -> RegistrarResult<Vec<Student>> {
        sqlx::query_as(&format!(
            "SELECT {STUDENT_COLUMNS} FROM public.students WHERE name ILIKE $1 OR email ILIKE $1 OR course ILIKE $1 ORDER BY created_at DESC"
        ))
        .bind(like_pattern(query))
        .fetch_all(&self.pool)
        .await
        .context(MakeQuerySnafu)
    }

    async fn count(&self, filter: StudentFilter) -> RegistrarResult<i64> {
        match filter {
            StudentFilter::All => count_where(&self.pool, "students", None).await,
            StudentFilter::Status(status) => {
                count_where(&self.pool, "students", Some(status)).await
            }
            StudentFilter::EnrolledIn { name, id } => sqlx::query_scalar::<Postgres, i64>(
                "SELECT COUNT(*) FROM public.students WHERE course = $1 OR course = $2",
            )
            .bind(name)
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await
            .context(MakeQuerySnafu),
        }
    }
}

#[async_trait]
impl Collection<Course> for PostgresStore {
    async fn insert(&self, new: NewCourse) -> RegistrarResult<Course> {
        let NewCourse {
            name,
            description,
            duration,
            status,
        } = new;

        sqlx::query_as(&format!(
            "INSERT INTO public.courses (name, description, duration, status) VALUES ($1, $2, $3, $4) RETURNING {COURSE_COLUMNS}"
        ))
        .bind(&name)
        .bind(description)
        .bind(duration)
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(duplicate::<Course>(&name))
    }

    async fn find_all(&self) -> RegistrarResult<Vec<Course>> {
        sqlx::query_as(&format!(
            "SELECT {COURSE_COLUMNS} FROM public.courses ORDER BY name ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .context(MakeQuerySnafu)
    }

    async fn find_by_id(&self, id: Uuid) -> RegistrarResult<Option<Course>> {
        sqlx::query_as(&format!(
            "SELECT {COURSE_COLUMNS} FROM public.courses WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context(MakeQuerySnafu)
    }

    async fn update(&self, id: Uuid, patch: CoursePatch) -> RegistrarResult<Option<Course>> {
        let CoursePatch {
            name,
            description,
            duration,
            status,
        } = patch;
        let name_for_error = name.clone().unwrap_or_default();

        sqlx::query_as(&format!(
            "UPDATE public.courses SET name = COALESCE($2, name), description = COALESCE($3, description), duration = COALESCE($4, duration), status = COALESCE($5, status), updated_at = now() WHERE id = $1 RETURNING {COURSE_COLUMNS}"
        ))
        .bind(id)
        .bind(name)
        .bind(description)
        .bind(duration)
        .bind(status)
        .fetch_optional(&self.pool)
        .await
        .map_err(duplicate::<Course>(&name_for_error))
    }

    async fn remove(&self, id: Uuid) -> RegistrarResult<bool> {
        remove_by_id(&self.pool, "courses", id).await
    }

    async fn search(&self, query: &str) -> RegistrarResult<Vec<Course>> {
        sqlx::query_as(&format!(
            "SELECT {COURSE_COLUMNS} FROM public.courses WHERE name ILIKE $1 OR description ILIKE $1 ORDER BY name ASC"
        ))
        .bind(like_pattern(query))
        .fetch_all(&self.pool)
        .await
        .context(MakeQuerySnafu)
    }

    async fn count(&self, filter: Option<Status>) -> RegistrarResult<i64> {
        count_where(&self.pool, "courses", filter).await
    }
}

#[async_trait]
impl Collection<Teacher> for PostgresStore {
    async fn insert(&self, new: NewTeacher) -> RegistrarResult<Teacher> {
        let NewTeacher {
            name,
            email,
            subject,
            years_of_experience,
        } = new;

        sqlx::query_as(&format!(
            "INSERT INTO public.teachers (name, email, subject, years_of_experience) VALUES ($1, $2, $3, $4) RETURNING {TEACHER_COLUMNS}"
        ))
        .bind(name)
        .bind(&email)
        .bind(subject)
        .bind(years_of_experience)
        .fetch_one(&self.pool)
        .await
        .map_err(duplicate::<Teacher>(&email))
    }

    async fn find_all(&self) -> RegistrarResult<Vec<Teacher>> {
        sqlx::query_as(&format!(
            "SELECT {TEACHER_COLUMNS} FROM public.teachers ORDER BY name ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .context(MakeQuerySnafu)
    }

    async fn find_by_id(&self, id: Uuid) -> RegistrarResult<Option<Teacher>> {
        sqlx::query_as(&format!(
            "SELECT {TEACHER_COLUMNS} FROM public.teachers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context(MakeQuerySnafu)
    }

    async fn update(&self, id: Uuid, patch: TeacherPatch) -> RegistrarResult<Option<Teacher>> {
        let TeacherPatch {
            name,
            email,
            subject,
            years_of_experience,
        } = patch;
        let email_for_error = email.clone().unwrap_or_default();

        sqlx::query_as(&format!(
            "UPDATE public.teachers SET name = COALESCE($2, name), email = COALESCE($3, email), subject = COALESCE($4, subject), years_of_experience = COALESCE($5, years_of_experience), updated_at = now() WHERE id = $1 RETURNING {TEACHER_COLUMNS}"
        ))
        .bind(id)
        .bind(name)
        .bind(email)
        .bind(subject)
        .bind(years_of_experience)
        .fetch_optional(&self.pool)
        .await
        .map_err(duplicate::<Teacher>(&email_for_error))
    }

    async fn remove(&self, id: Uuid) -> RegistrarResult<bool> {
        remove_by_id(&self.pool, "teachers", id).await
    }

    async fn search(&self, query: &str) -> RegistrarResult<Vec<Teacher>> {
        sqlx::query_as(&format!(
            "SELECT {TEACHER_COLUMNS} FROM public.teachers WHERE name ILIKE $1 OR email ILIKE $1 OR subject ILIKE $1 ORDER BY name ASC"
        ))
        .bind(like_pattern(query))
        .fetch_all(&self.pool)
        .await
        .context(MakeQuerySnafu)
    }

    async fn count(&self, _filter: ()) -> RegistrarResult<i64> {
        count_where(&self.pool, "teachers", None).await
    }
}

#[derive(sqlx::FromRow)]
struct EnrollmentRow {
    course: String,
    count: i64,
}

#[async_trait]
impl Store for PostgresStore {
    fn students(&self) -> &dyn Collection<Student> {
        self
    }

    fn courses(&self) -> &dyn Collection<Course> {
        self
    }

    fn teachers(&self) -> &dyn Collection<Teacher> {
        self
    }

    async fn students_per_course(&self) -> RegistrarResult<Vec<CourseEnrollment>> {
        let rows: Vec<EnrollmentRow> = sqlx::query_as(
            "SELECT course, COUNT(*) AS count FROM public.students GROUP BY course ORDER BY count DESC, course ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context(MakeQuerySnafu)?;

        Ok(rows
            .into_iter()
            .map(|EnrollmentRow { course, count }| CourseEnrollment { course, count })
            .collect())
    }

    async fn connection_state(&self) -> ConnectionState {
        if self.pool.is_closed() {
            return ConnectionState::Disconnected;
        }

        let ping = sqlx::query("SELECT 1").execute(&self.pool);
        match tokio::time::timeout(PING_TIMEOUT, ping).await {
            Ok(Ok(_)) => ConnectionState::Connected,
            Ok(Err(e)) => {
                warn!(?e, "Database ping failed");
                ConnectionState::Disconnected
            }
            Err(_) => {
                warn!("Database ping timed out");
                ConnectionState::Connecting
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfiguration;

    /// Connects to the database named by `REGISTRAR_TEST_DATABASE_URL`; those tests are skipped
    /// when it is unset.
    async fn test_store() -> Option<PostgresStore> {
        let Ok(url) = dotenvy::var("REGISTRAR_TEST_DATABASE_URL") else {
            eprintln!("REGISTRAR_TEST_DATABASE_URL unset, skipping");
            return None;
        };
        let config =
            RuntimeConfiguration::from_lookup(|name| (name == "DATABASE_URL").then(|| url.clone()))
                .unwrap();
        Some(PostgresStore::connect(&config.db_config()).await.unwrap())
    }

    fn new_student(email: &str, course: &str, status: Status) -> NewStudent {
        NewStudent {
            name: "Ann".into(),
            email: email.into(),
            course: course.into(),
            enrollment_date: None,
            status,
        }
    }

    #[tokio::test]
    async fn students_round_trip_and_reject_duplicates() {
        let Some(store) = test_store().await else {
            return;
        };
        let tag = Uuid::new_v4().simple().to_string();
        let email = format!("ann-{tag}@x.com");
        let students = store.students();

        let ann = students
            .insert(new_student(&email, "CS101", Status::Active))
            .await
            .unwrap();
        assert_eq!(ann.status, Status::Active);
        assert_eq!(students.find_by_id(ann.id).await.unwrap(), Some(ann.clone()));

        let err = students
            .insert(new_student(&email, "CS102", Status::Active))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrarError::Duplicate { field: "email", .. }));

        let patch = StudentPatch {
            status: Some(Status::Inactive),
            ..StudentPatch::default()
        };
        let updated = students.update(ann.id, patch).await.unwrap().unwrap();
        assert_eq!(updated.status, Status::Inactive);
        assert_eq!(updated.email, email);
        assert_eq!(updated.course, "CS101");
        assert!(updated.updated_at >= ann.updated_at);

        let found = students.search(&tag).await.unwrap();
        assert_eq!(found.len(), 1);

        assert!(students.remove(ann.id).await.unwrap());
        assert!(!students.remove(ann.id).await.unwrap());
        assert_eq!(students.find_by_id(ann.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn enrollments_are_grouped_and_ordered() {
        let Some(store) = test_store().await else {
            return;
        };
        let tag = Uuid::new_v4().simple().to_string();
        let big = format!("big-{tag}");
        let small = format!("small-{tag}");

        let mut ids = Vec::new();
        for (i, course) in [&small, &big, &big].into_iter().enumerate() {
            let student = store
                .students()
                .insert(new_student(&format!("s{i}-{tag}@x.com"), course, Status::Active))
                .await
                .unwrap();
            ids.push(student.id);
        }

        let ours: Vec<_> = store
            .students_per_course()
            .await
            .unwrap()
            .into_iter()
            .filter(|enrollment| enrollment.course.ends_with(&tag))
            .collect();
        assert_eq!(
            ours,
            [
                CourseEnrollment {
                    course: big.clone(),
                    count: 2
                },
                CourseEnrollment {
                    course: small,
                    count: 1
                },
            ]
        );

        let enrolled = StudentFilter::EnrolledIn {
            name: big,
            id: Uuid::new_v4(),
        };
        assert_eq!(store.students().count(enrolled).await.unwrap(), 2);

        for id in ids {
            store.students().remove(id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn course_partial_updates_keep_unset_fields() {
        let Some(store) = test_store().await else {
            return;
        };
        let name = format!("Course {}", Uuid::new_v4());
        let courses = store.courses();

        let course = courses
            .insert(NewCourse {
                name: name.clone(),
                description: Some("Intro".into()),
                duration: Some("12 weeks".into()),
                status: Status::Inactive,
            })
            .await
            .unwrap();
        assert_eq!(course.status, Status::Inactive);

        let patch = CoursePatch {
            duration: Some("6 weeks".into()),
            ..CoursePatch::default()
        };
        let updated = courses.update(course.id, patch).await.unwrap().unwrap();
        assert_eq!(updated.name, name);
        assert_eq!(updated.description.as_deref(), Some("Intro"));
        assert_eq!(updated.duration.as_deref(), Some("6 weeks"));
        assert_eq!(updated.status, Status::Inactive);

        assert!(courses.count(Some(Status::Inactive)).await.unwrap() >= 1);
        assert_eq!(store.connection_state().await, ConnectionState::Connected);

        assert!(courses.remove(course.id).await.unwrap());
    }

    #[test]
    fn like_patterns_escape_wildcards() {
        assert_eq!(like_pattern("ann"), "%ann%");
        assert_eq!(like_pattern("100%_\\"), "%100\\%\\_\\\\%");
        assert_eq!(like_pattern(""), "%%");
    }
}
