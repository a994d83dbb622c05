// Domain models
pub mod entitlement;
pub mod iap;
pub mod products_ext; // Extension methods for entity::products
pub mod users_ext; // Extension methods for entity::users
