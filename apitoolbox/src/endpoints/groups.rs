//! Group management: CRUD plus group permissions and members.

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
    },
};

use super::{base::crud_router, replace_related};

pub struct GroupsEndpoint<G, U, P> {
    metadata: Arc<Metadata>,
    _models: PhantomData<fn() -> (G, U, P)>,
}

impl<G: Entity, U: Entity, P: Entity> GroupsEndpoint<G, U, P> {
    pub fn new(metadata: Arc<Metadata>) -> Self { Self { metadata, _models: PhantomData } }

    async fn group(&self, session: &Session, group_id: Uuid) -> Result<G, AppError> {
        crud::fetch::<G>(session, group_id).await?.ok_or_else(AppError::not_found)
    }

    async fn list<T: Entity>(&self, session: &Session, kind: AssociationKind, group_id: Uuid) -> Result<Vec<Record>, AppError> {
        let group = self.group(session, group_id).await?;
        let association = self.metadata.require_association(kind)?;
        let rows: Vec<T> = relations::related(session, association, group.id()).await?;
        rows.iter().map(|row| row.as_dict()).collect()
    }

    pub async fn get_permissions(&self, session: &Session, group_id: Uuid) -> Result<Vec<Record>, AppError> {
        self.list::<P>(session, AssociationKind::GroupPermissions, group_id).await
    }

    pub async fn put_permissions(&self, session: &Session, group_id: Uuid, permission_ids: Vec<Uuid>) -> Result<Vec<Record>, AppError> {
        let group = self.group(session, group_id).await?;
        let association = self.metadata.require_association(AssociationKind::GroupPermissions)?;
        replace_related::<P>(session, association, group.id(), permission_ids, "permission").await
    }

    pub async fn get_members(&self, session: &Session, group_id: Uuid) -> Result<Vec<Record>, AppError> {
        self.list::<U>(session, AssociationKind::GroupMembership, group_id).await
    }

    pub async fn put_members(&self, session: &Session, group_id: Uuid, user_ids: Vec<Uuid>) -> Result<Vec<Record>, AppError> {
        let group = self.group(session, group_id).await?;
        let association = self.metadata.require_association(AssociationKind::GroupMembership)?;
        replace_related::<U>(session, association, group.id(), user_ids, "user").await
    }
}

type Endpoint<G, U, P> = State<Arc<GroupsEndpoint<G, U, P>>>;

async fn get_permissions<G: Entity, U: Entity, P: Entity>(
    State(endpoint): Endpoint<G, U, P>,
    DbSession(session): DbSession,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(endpoint.get_permissions(&session, id).await?))
}

async fn put_permissions<G: Entity, U: Entity, P: Entity>(
    State(endpoint): Endpoint<G, U, P>,
    DbSession(session): DbSession,
    Path(id): Path<Uuid>,
    Json(ids): Json<Vec<Uuid>>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(endpoint.put_permissions(&session, id, ids).await?))
}

async fn get_members<G: Entity, U: Entity, P: Entity>(
    State(endpoint): Endpoint<G, U, P>,
    DbSession(session): DbSession,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(endpoint.get_members(&session, id).await?))
}

async fn put_members<G: Entity, U: Entity, P: Entity>(
    State(endpoint): Endpoint<G, U, P>,
    DbSession(session): DbSession,
    Path(id): Path<Uuid>,
    Json(ids): Json<Vec<Uuid>>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(endpoint.put_members(&session, id, ids).await?))
}

/// CRUD for `G` plus `GET|PUT /:id/permissions` and `GET|PUT /:id/members`.
pub fn groups_router<G: Entity, U: Entity, P: Entity>(metadata: Arc<Metadata>) -> Router {
    crud_router::<G, _>()
        .route("/:id/permissions", get(get_permissions::<G, U, P>).put(put_permissions::<G, U, P>))
        .route("/:id/members", get(get_members::<G, U, P>).put(put_members::<G, U, P>))
        .with_state(Arc::new(GroupsEndpoint::<G, U, P>::new(metadata)))
}
