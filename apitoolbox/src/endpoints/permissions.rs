use axum::Router;

use crate::models::base::Entity;

use super::base::crud_router;

/// Plain CRUD over the permission model.
pub fn permissions_router<P: Entity>() -> Router { crud_router::<P, ()>() }
