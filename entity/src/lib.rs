//! `SeaORM` Entity definitions

pub mod prelude;

pub mod products;
pub mod purchases;
pub mod sea_orm_active_enums;
pub mod users;
