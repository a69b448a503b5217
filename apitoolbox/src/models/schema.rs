//! Table metadata: which entities exist, which of them play the
//! user/group/permission roles and which association tables link them.

use sqlx::SqlitePool;

use crate::error::AppError;

use super::{
    associations::{self, AssociationKind, AssociationTable},
    base::{Entity, ModelMapping, ModelRole, TableDef},
    groups::Group,
    permissions::Permission,
    users::User,
};

#[derive(Debug, Clone, Default)]
pub struct Metadata {
    tables: Vec<TableDef>,
    models: ModelMapping,
    associations: Vec<AssociationTable>,
}

impl Metadata {
    pub fn new() -> Self { Self::default() }

    /// The built-in `User`, `Group` and `Permission` models with the three
    /// default association tables.
    pub fn standard() -> Result<Self, AppError> {
        let mut metadata = Self::new();
        metadata.register_model::<User>(ModelRole::User)?;
        metadata.register_model::<Group>(ModelRole::Group)?;
        metadata.register_model::<Permission>(ModelRole::Permission)?;
        for association in associations::default_associations() {
            metadata.add_association(association)?;
        }
        metadata.configure()?;
        Ok(metadata)
    }

    /// Register a plain table. Registering the same table twice is a no-op.
    pub fn register<E: Entity>(&mut self) -> &mut Self {
        self.add_table(E::table());
        self
    }

    /// Register a table and map it to `role`. Each role may be mapped once.
    pub fn register_model<E: Entity>(&mut self, role: ModelRole) -> Result<&mut Self, AppError> {
        self.models.insert(role, E::table())?;
        self.add_table(E::table());
        Ok(self)
    }

    pub fn add_association(&mut self, association: AssociationTable) -> Result<&mut Self, AppError> {
        if self.association(association.kind).is_some() {
            return Err(AppError::Configuration(format!(
                "Multiple '{}' associations found. Only a single table may have a specific association kind",
                association.kind
            )));
        }
        self.add_table(association.table.clone());
        self.associations.push(association);
        Ok(self)
    }

    fn add_table(&mut self, table: TableDef) {
        if !self.tables.iter().any(|t| t.name == table.name) {
            self.tables.push(table);
        }
    }

    pub fn tables(&self) -> &[TableDef] { &self.tables }

    pub fn model(&self, role: ModelRole) -> Option<&TableDef> { self.models.get(role) }

    pub fn association(&self, kind: AssociationKind) -> Option<&AssociationTable> {
        self.associations.iter().find(|a| a.kind == kind)
    }

    /// Association `kind`, or a configuration error naming it.
    pub fn require_association(&self, kind: AssociationKind) -> Result<&AssociationTable, AppError> {
        self.association(kind)
            .ok_or_else(|| AppError::Configuration(format!("no '{kind}' association table defined")))
    }

    /// Check that every association has both of its endpoint models.
    pub fn configure(&self) -> Result<(), AppError> {
        for association in &self.associations {
            let roles = match association.kind {
                AssociationKind::GroupMembership => [ModelRole::User, ModelRole::Group],
                AssociationKind::UserPermissions => [ModelRole::User, ModelRole::Permission],
                AssociationKind::GroupPermissions => [ModelRole::Group, ModelRole::Permission],
            };
            for role in roles {
                if self.model(role).is_none() {
                    return Err(AppError::Configuration(format!(
                        "'{}' association table found, but no {role} table defined.",
                        association.kind
                    )));
                }
            }
        }
        Ok(())
    }

    /// Create every registered table, entities first.
    pub async fn create_all(&self, pool: &SqlitePool) -> Result<(), AppError> {
        self.configure()?;
        for table in &self.tables {
            sqlx::query(&table.create_sql()).execute(pool).await?;
        }
        tracing::debug!(tables = self.tables.len(), "schema created");
        Ok(())
    }

    /// Drop every registered table in reverse creation order.
    pub async fn drop_all(&self, pool: &SqlitePool) -> Result<(), AppError> {
        for table in self.tables.iter().rev() {
            sqlx::query(&table.drop_sql()).execute(pool).await?;
        }
        Ok(())
    }
}
