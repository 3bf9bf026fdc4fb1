use crate::{
    data::{CourseEnrollment, Status, student::StudentFilter},
    error::RegistrarResult,
    state::RegistrarState,
};
use axum::{Json, extract::State};
use serde::Serialize;

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_students: i64,
    pub active_students: i64,
    pub graduates: i64,
    pub total_courses: i64,
    pub active_courses: i64,
    pub total_teachers: i64,
    pub success_rate: i64,
    pub students_by_course: Vec<CourseEnrollment>,
}

/// Percentage of students who graduated, rounded to the nearest whole number; 0 with no students.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn success_rate(graduates: i64, total_students: i64) -> i64 {
    if total_students == 0 {
        return 0;
    }
    (100.0 * graduates as f64 / total_students as f64).round() as i64
}

/// Each figure is its own read, so under concurrent writes they may not agree with each other.
pub async fn get_stats(State(state): State<RegistrarState>) -> RegistrarResult<Json<DashboardStats>> {
    let students = state.students();
    let courses = state.courses();

    let (
        total_students,
        active_students,
        graduates,
        total_courses,
        active_courses,
        total_teachers,
        students_by_course,
    ) = futures::try_join!(
        students.count(StudentFilter::All),
        students.count(StudentFilter::Status(Status::Active)),
        students.count(StudentFilter::Status(Status::Inactive)),
        courses.count(None),
        courses.count(Some(Status::Active)),
        state.teachers().count(()),
        state.students_per_course(),
    )?;

    let stats = DashboardStats {
        total_students,
        active_students,
        graduates,
        total_courses,
        active_courses,
        total_teachers,
        success_rate: success_rate(graduates, total_students),
        students_by_course,
    };
    info!(?stats, "Computed dashboard stats");
    Ok(Json(stats))
}
