use crate::{
    data::{course::Course, missing, parse_id, student::StudentFilter},
    error::{RegistrarError, RegistrarResult},
    routes::resources::{self, Deleted},
    state::RegistrarState,
};
use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

pub fn routes(router: Router<RegistrarState>) -> Router<RegistrarState> {
    router
        .route(
            "/api/courses",
            get(resources::list::<Course>).post(resources::create::<Course>),
        )
        .route("/api/courses/search", get(resources::search::<Course>))
        .route(
            "/api/courses/{id}",
            get(resources::get_one::<Course>)
                .put(resources::update::<Course>)
                .delete(delete_course),
        )
}

/// Deletes a course unless a student still names it.
///
/// The enrolment count and the delete are separate statements, so a student added in between
/// is not seen.
pub async fn delete_course(
    State(state): State<RegistrarState>,
    Path(id): Path<String>,
) -> RegistrarResult<Json<Deleted>> {
    let id = parse_id(&id)?;
    let course = state
        .courses()
        .find_by_id(id)
        .await?
        .ok_or_else(|| missing::<Course>(id))?;

    let enrolled = state
        .students()
        .count(StudentFilter::EnrolledIn {
            name: course.name.clone(),
            id,
        })
        .await?;
    if enrolled > 0 {
        return Err(RegistrarError::CourseHasStudents {
            name: course.name,
            count: enrolled,
        });
    }

    if !state.courses().remove(id).await? {
        return Err(missing::<Course>(id));
    }
    info!(%id, name = %course.name, "Deleted course");
    Ok(Json(Deleted::new("Course")))
}
