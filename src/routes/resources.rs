use crate::{
    data::{Record, Validate, missing, parse_id},
    error::{RegistrarError, RegistrarResult},
    state::RegistrarState,
};
use axum::{
    Json, Router,
    extract::{FromRequest, FromRequestParts, Path, State},
    http::StatusCode,
    routing::get,
};
use serde::{Deserialize, Serialize};

/// `axum::Json`, but rejections come back as [`RegistrarError`]s.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(RegistrarError))]
pub struct ApiJson<T>(pub T);

/// `axum::extract::Query`, but rejections come back as [`RegistrarError`]s.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(RegistrarError))]
pub struct ApiQuery<T>(pub T);

#[derive(Deserialize, Debug, Default)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Serialize, Debug)]
pub struct Deleted {
    pub message: String,
}

impl Deleted {
    pub fn new(kind: &str) -> Self {
        Self {
            message: format!("{kind} deleted successfully"),
        }
    }
}

/// Registers list/create, search and get/update/delete under `base` for one record type.
pub fn routes<R: Record>(router: Router<RegistrarState>, base: &str) -> Router<RegistrarState> {
    router
        .route(base, get(list::<R>).post(create::<R>))
        .route(&format!("{base}/search"), get(search::<R>))
        .route(
            &format!("{base}/{{id}}"),
            get(get_one::<R>).put(update::<R>).delete(delete::<R>),
        )
}

pub async fn create<R: Record>(
    State(state): State<RegistrarState>,
    ApiJson(new): ApiJson<R::New>,
) -> RegistrarResult<(StatusCode, Json<R>)> {
    let record = R::collection(&*state).insert(new.validate()?).await?;
    info!(kind = R::KIND, id = %record.id(), "Created record");
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn list<R: Record>(State(state): State<RegistrarState>) -> RegistrarResult<Json<Vec<R>>> {
    let records = R::collection(&*state).find_all().await?;
    info!(kind = R::KIND, count = records.len(), "Listed records");
    Ok(Json(records))
}

pub async fn get_one<R: Record>(
    State(state): State<RegistrarState>,
    Path(id): Path<String>,
) -> RegistrarResult<Json<R>> {
    let id = parse_id(&id)?;
    let record = R::collection(&*state)
        .find_by_id(id)
        .await?
        .ok_or_else(|| missing::<R>(id))?;
    info!(kind = R::KIND, %id, "Fetched record");
    Ok(Json(record))
}

pub async fn update<R: Record>(
    State(state): State<RegistrarState>,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<R::Patch>,
) -> RegistrarResult<Json<R>> {
    let id = parse_id(&id)?;
    let record = R::collection(&*state)
        .update(id, patch.validate()?)
        .await?
        .ok_or_else(|| missing::<R>(id))?;
    info!(kind = R::KIND, %id, "Updated record");
    Ok(Json(record))
}

pub async fn delete<R: Record>(
    State(state): State<RegistrarState>,
    Path(id): Path<String>,
) -> RegistrarResult<Json<Deleted>> {
    let id = parse_id(&id)?;
    if !R::collection(&*state).remove(id).await? {
        return Err(missing::<R>(id));
    }
    info!(kind = R::KIND, %id, "Deleted record");
    Ok(Json(Deleted::new(R::KIND)))
}

pub async fn search<R: Record>(
    State(state): State<RegistrarState>,
    ApiQuery(SearchQuery { q }): ApiQuery<SearchQuery>,
) -> RegistrarResult<Json<Vec<R>>> {
    let matches = R::collection(&*state).search(q.trim()).await?;
    info!(kind = R::KIND, query = %q, count = matches.len(), "Searched records");
    Ok(Json(matches))
}
