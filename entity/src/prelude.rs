//! `SeaORM` Entity prelude

pub use super::products::Entity as Products;
pub use super::purchases::Entity as Purchases;
pub use super::users::Entity as Users;
