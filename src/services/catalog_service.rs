use entity::products;
use sea_orm::{ConnectionTrait, EntityTrait};

use crate::error::{ReconcileError, Result};

/// Read-only product catalog lookups
pub struct CatalogService;

impl CatalogService {
    pub async fn find_product<C: ConnectionTrait>(
        conn: &C,
        product_id: &str,
    ) -> Result<Option<products::Model>> {
        Ok(products::Entity::find_by_id(product_id.to_string())
            .one(conn)
            .await?)
    }

    /// Like `find_product`, but a missing product is a catalog error
    pub async fn require_product<C: ConnectionTrait>(
        conn: &C,
        product_id: &str,
    ) -> Result<products::Model> {
        Self::find_product(conn, product_id)
            .await?
            .ok_or_else(|| ReconcileError::Catalog(format!("Product {} not found", product_id)))
    }
}
