//! Generic list/create/retrieve/update/delete endpoints for an [`Entity`].

use std::marker::PhantomData;

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use crate::{
    crud,
    error::AppError,
    models::{
        base::{Entity, Record},
        session::{DbSession, Session},
    },
    types::ListParams,
};

/// CRUD operations for `E` that commit on every write.
pub struct BaseCrudEndpoint<E>(PhantomData<fn() -> E>);

impl<E> Default for BaseCrudEndpoint<E> {
    fn default() -> Self { Self(PhantomData) }
}

impl<E: Entity> BaseCrudEndpoint<E> {
    pub fn new() -> Self { Self::default() }

    pub async fn list(&self, session: &Session, params: &ListParams) -> Result<Vec<Record>, AppError> {
        params.validate()?;
        let filter = params.filter_spec()?;
        let sort = params.sort_specs()?;
        crud::list_instances::<E>(session, filter.as_ref(), &sort, params.offset, Some(params.limit)).await
    }

    pub async fn create(&self, session: &Session, data: Record) -> Result<Record, AppError> {
        crud::create_instance::<E>(session, data, true).await
    }

    pub async fn retrieve(&self, session: &Session, id: Uuid) -> Result<Record, AppError> {
        crud::retrieve_instance::<E>(session, id).await
    }

    pub async fn update(&self, session: &Session, id: Uuid, data: Record) -> Result<Record, AppError> {
        crud::update_instance::<E>(session, id, data, true).await
    }

    pub async fn delete(&self, session: &Session, id: Uuid) -> Result<Record, AppError> {
        crud::delete_instance::<E>(session, id, true).await
    }
}

async fn list<E: Entity>(DbSession(session): DbSession, Query(params): Query<ListParams>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(BaseCrudEndpoint::<E>::new().list(&session, &params).await?))
}

async fn create<E: Entity>(DbSession(session): DbSession, Json(data): Json<Record>) -> Result<impl IntoResponse, AppError> {
    let created = BaseCrudEndpoint::<E>::new().create(&session, data).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn retrieve<E: Entity>(DbSession(session): DbSession, Path(id): Path<Uuid>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(BaseCrudEndpoint::<E>::new().retrieve(&session, id).await?))
}

async fn update<E: Entity>(
    DbSession(session): DbSession,
    Path(id): Path<Uuid>,
    Json(data): Json<Record>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(BaseCrudEndpoint::<E>::new().update(&session, id, data).await?))
}

async fn delete<E: Entity>(DbSession(session): DbSession, Path(id): Path<Uuid>) -> Result<impl IntoResponse, AppError> {
    BaseCrudEndpoint::<E>::new().delete(&session, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET|POST /` and `GET|PUT|PATCH|DELETE /:id` for `E`.
///
/// PUT and PATCH both apply a partial update.
pub fn crud_router<E: Entity, S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/", get(list::<E>).post(create::<E>))
        .route("/:id", get(retrieve::<E>).put(update::<E>).patch(update::<E>).delete(delete::<E>))
}
