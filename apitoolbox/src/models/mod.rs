pub mod associations;
pub mod base;
pub mod groups;
pub mod mixins;
pub mod permissions;
pub mod relations;
pub mod schema;
pub mod session;
pub mod types;
pub mod users;

pub use associations::{
    create_group_membership_table, create_group_permissions_table, create_user_permissions_table, AssociationKind,
    AssociationTable,
};
pub use base::{Column, ColumnDefault, Entity, ModelRole, Record, TableDef};
pub use groups::Group;
pub use permissions::Permission;
pub use schema::Metadata;
pub use session::{DbSession, Session, Statement};
pub use types::ColumnType;
pub use users::{ConfirmationModel, User, UserModel};
