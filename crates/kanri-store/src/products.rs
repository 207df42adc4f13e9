use serde::{Deserialize, Serialize};
use tracing::instrument;

use kanri_core::ids::{ProductId, TenantId};

use crate::database::Database;
use crate::error::StoreError;
use crate::key::{CompositeKey, IndexKey};
use crate::unit_of_work::{ReadView, UnitOfWork, WorkContext};

const PRIMARY: &str = "product#pk";
const OF_TENANT: &str = "product#tenant";
const OF_DISCUSSION: &str = "product#discussion";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub name: String,
    pub description: String,
    /// Set once a collaboration discussion has been requested for the
    /// product; indexes the product by its discussion.
    pub discussion_initiation_id: Option<String>,
}

impl Product {
    fn primary_key(&self) -> CompositeKey {
        CompositeKey::of(PRIMARY, &[self.tenant_id.as_str(), self.product_id.as_str()])
    }
}

pub struct ProductRepo {
    db: Database,
}

impl ProductRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn next_identity(&self) -> ProductId {
        ProductId::new()
    }

    #[instrument(skip(self), fields(tenant = %tenant_id, product = %product_id))]
    pub fn product_of_id(
        &self,
        tenant_id: &TenantId,
        product_id: &ProductId,
    ) -> Result<Option<Product>, StoreError> {
        let key = CompositeKey::of(PRIMARY, &[tenant_id.as_str(), product_id.as_str()]);
        ReadView::new(&self.db).read_object(&key)
    }

    #[instrument(skip(self), fields(tenant = %tenant_id))]
    pub fn all_products_of_tenant(&self, tenant_id: &TenantId) -> Result<Vec<Product>, StoreError> {
        let view = ReadView::new(&self.db);
        let index = CompositeKey::of(OF_TENANT, &[tenant_id.as_str()]);
        let mut products = Vec::new();
        for primary in view.read_keys(&index)? {
            if let Some(product) = view.read_object_at(&primary)? {
                products.push(product);
            }
        }
        Ok(products)
    }

    /// The product whose discussion was initiated under the given id, if
    /// any. A discussion belongs to at most one product.
    #[instrument(skip(self), fields(tenant = %tenant_id))]
    pub fn product_of_discussion_initiation_id(
        &self,
        tenant_id: &TenantId,
        discussion_initiation_id: &str,
    ) -> Result<Option<Product>, StoreError> {
        let view = ReadView::new(&self.db);
        let index = CompositeKey::of(OF_DISCUSSION, &[tenant_id.as_str(), discussion_initiation_id]);
        match view.read_keys(&index)?.first() {
            Some(primary) => view.read_object_at(primary),
            None => Ok(None),
        }
    }

    #[instrument(skip_all, fields(tenant = %product.tenant_id, product = %product.product_id))]
    pub fn save(&self, ctx: &mut WorkContext, product: &Product) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        uow.lock(&tenant_partition(&product.tenant_id));
        Self::stage_save(uow, product)
    }

    pub fn save_all(&self, ctx: &mut WorkContext, products: &[Product]) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        let mut locked = false;
        for product in products {
            if !locked {
                uow.lock(&tenant_partition(&product.tenant_id));
                locked = true;
            }
            Self::stage_save(uow, product)?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(tenant = %product.tenant_id, product = %product.product_id))]
    pub fn remove(&self, ctx: &mut WorkContext, product: &Product) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        uow.lock(&tenant_partition(&product.tenant_id));
        Self::stage_remove(uow, product)
    }

    pub fn remove_all(&self, ctx: &mut WorkContext, products: &[Product]) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        let mut locked = false;
        for product in products {
            if !locked {
                uow.lock(&tenant_partition(&product.tenant_id));
                locked = true;
            }
            Self::stage_remove(uow, product)?;
        }
        Ok(())
    }

    fn stage_save(uow: &mut UnitOfWork, product: &Product) -> Result<(), StoreError> {
        let primary = product.primary_key();
        let tenant = product.tenant_id.as_str();

        let prior: Option<Product> = uow.pending_object(&primary)?;
        if let Some(prior) = prior {
            if let Some(former) = prior.discussion_initiation_id.as_deref() {
                if product.discussion_initiation_id.as_deref() != Some(former) {
                    uow.remove_key_reference(&IndexKey::linking(
                        &primary,
                        OF_DISCUSSION,
                        &[tenant, former],
                    ))?;
                }
            }
        }

        uow.write(&primary, product)?;
        uow.update_key_reference(&IndexKey::linking(&primary, OF_TENANT, &[tenant]))?;
        if let Some(discussion) = product.discussion_initiation_id.as_deref() {
            uow.update_key_reference(&IndexKey::linking(
                &primary,
                OF_DISCUSSION,
                &[tenant, discussion],
            ))?;
        }
        Ok(())
    }

    fn stage_remove(uow: &mut UnitOfWork, product: &Product) -> Result<(), StoreError> {
        let primary = product.primary_key();
        let tenant = product.tenant_id.as_str();

        uow.remove(&primary);
        uow.remove_key_reference(&IndexKey::linking(&primary, OF_TENANT, &[tenant]))?;
        if let Some(discussion) = product.discussion_initiation_id.as_deref() {
            uow.remove_key_reference(&IndexKey::linking(
                &primary,
                OF_DISCUSSION,
                &[tenant, discussion],
            ))?;
        }
        Ok(())
    }
}

fn tenant_partition(tenant_id: &TenantId) -> String {
    CompositeKey::of(PRIMARY, &[tenant_id.as_str()])
        .as_str()
        .to_owned()
}
