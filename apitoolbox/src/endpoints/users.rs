//! User management: CRUD plus the user's direct permissions.

use std::{marker::PhantomData, sync::Arc};

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use crate::{
    crud,
    error::AppError,
    models::{
        associations::AssociationKind,
        base::{Entity, Record},
        relations,
        schema::Metadata,
        session::{DbSession, Session},
        users::UserModel,
    },
};

use super::{base::crud_router, replace_related};

pub struct UsersEndpoint<U, P> {
    metadata: Arc<Metadata>,
    _models: PhantomData<fn() -> (U, P)>,
}

impl<U: UserModel, P: Entity> UsersEndpoint<U, P> {
    pub fn new(metadata: Arc<Metadata>) -> Self { Self { metadata, _models: PhantomData } }

    async fn user(&self, session: &Session, user_id: Uuid) -> Result<U, AppError> {
        crud::fetch::<U>(session, user_id).await?.ok_or_else(AppError::not_found)
    }

    pub async fn get_permissions(&self, session: &Session, user_id: Uuid) -> Result<Vec<Record>, AppError> {
        let user = self.user(session, user_id).await?;
        let association = self.metadata.require_association(AssociationKind::UserPermissions)?;
        let permissions: Vec<P> = relations::related(session, association, user.id()).await?;
        permissions.iter().map(|p| p.as_dict()).collect()
    }

    /// Replace the user's permissions; every id must exist.
    pub async fn put_permissions(&self, session: &Session, user_id: Uuid, permission_ids: Vec<Uuid>) -> Result<Vec<Record>, AppError> {
        let user = self.user(session, user_id).await?;
        let association = self.metadata.require_association(AssociationKind::UserPermissions)?;
        replace_related::<P>(session, association, user.id(), permission_ids, "permission").await
    }
}

async fn get_permissions<U: UserModel, P: Entity>(
    State(endpoint): State<Arc<UsersEndpoint<U, P>>>,
    DbSession(session): DbSession,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(endpoint.get_permissions(&session, id).await?))
}

async fn put_permissions<U: UserModel, P: Entity>(
    State(endpoint): State<Arc<UsersEndpoint<U, P>>>,
    DbSession(session): DbSession,
    Path(id): Path<Uuid>,
    Json(permission_ids): Json<Vec<Uuid>>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(endpoint.put_permissions(&session, id, permission_ids).await?))
}

/// CRUD for `U` plus `GET|PUT /:id/permissions`.
pub fn users_router<U: UserModel, P: Entity>(metadata: Arc<Metadata>) -> Router {
    crud_router::<U, _>()
        .route("/:id/permissions", get(get_permissions::<U, P>).put(put_permissions::<U, P>))
        .with_state(Arc::new(UsersEndpoint::<U, P>::new(metadata)))
}
