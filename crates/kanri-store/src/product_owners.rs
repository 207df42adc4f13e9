use serde::{Deserialize, Serialize};
use tracing::instrument;

use kanri_core::ids::TenantId;

use crate::database::Database;
use crate::error::StoreError;
use crate::key::{CompositeKey, IndexKey};
use crate::unit_of_work::{ReadView, UnitOfWork, WorkContext};

const PRIMARY: &str = "product_owner#pk";
const OF_TENANT: &str = "product_owner#tenant";

/// A product owner is addressed by username within the tenant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductOwner {
    pub tenant_id: TenantId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email_address: String,
}

impl ProductOwner {
    fn primary_key(&self) -> CompositeKey {
        CompositeKey::of(PRIMARY, &[self.tenant_id.as_str(), &self.username])
    }
}

pub struct ProductOwnerRepo {
    db: Database,
}

impl ProductOwnerRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(tenant = %tenant_id, username))]
    pub fn product_owner_of_identity(
        &self,
        tenant_id: &TenantId,
        username: &str,
    ) -> Result<Option<ProductOwner>, StoreError> {
        let key = CompositeKey::of(PRIMARY, &[tenant_id.as_str(), username]);
        ReadView::new(&self.db).read_object(&key)
    }

    #[instrument(skip(self), fields(tenant = %tenant_id))]
    pub fn all_product_owners_of_tenant(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<ProductOwner>, StoreError> {
        let view = ReadView::new(&self.db);
        let index = CompositeKey::of(OF_TENANT, &[tenant_id.as_str()]);
        let mut owners = Vec::new();
        for primary in view.read_keys(&index)? {
            if let Some(owner) = view.read_object_at(&primary)? {
                owners.push(owner);
            }
        }
        Ok(owners)
    }

    #[instrument(skip_all, fields(tenant = %owner.tenant_id, username = %owner.username))]
    pub fn save(&self, ctx: &mut WorkContext, owner: &ProductOwner) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        uow.lock(&tenant_partition(&owner.tenant_id));
        Self::stage_save(uow, owner)
    }

    pub fn save_all(
        &self,
        ctx: &mut WorkContext,
        owners: &[ProductOwner],
    ) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        let mut locked = false;
        for owner in owners {
            if !locked {
                uow.lock(&tenant_partition(&owner.tenant_id));
                locked = true;
            }
            Self::stage_save(uow, owner)?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(tenant = %owner.tenant_id, username = %owner.username))]
    pub fn remove(&self, ctx: &mut WorkContext, owner: &ProductOwner) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        uow.lock(&tenant_partition(&owner.tenant_id));
        Self::stage_remove(uow, owner)
    }

    pub fn remove_all(
        &self,
        ctx: &mut WorkContext,
        owners: &[ProductOwner],
    ) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        let mut locked = false;
        for owner in owners {
            if !locked {
                uow.lock(&tenant_partition(&owner.tenant_id));
                locked = true;
            }
            Self::stage_remove(uow, owner)?;
        }
        Ok(())
    }

    fn stage_save(uow: &mut UnitOfWork, owner: &ProductOwner) -> Result<(), StoreError> {
        let primary = owner.primary_key();
        uow.write(&primary, owner)?;
        uow.update_key_reference(&IndexKey::linking(
            &primary,
            OF_TENANT,
            &[owner.tenant_id.as_str()],
        ))?;
        Ok(())
    }

    fn stage_remove(uow: &mut UnitOfWork, owner: &ProductOwner) -> Result<(), StoreError> {
        let primary = owner.primary_key();
        uow.remove(&primary);
        uow.remove_key_reference(&IndexKey::linking(
            &primary,
            OF_TENANT,
            &[owner.tenant_id.as_str()],
        ))?;
        Ok(())
    }
}

fn tenant_partition(tenant_id: &TenantId) -> String {
    CompositeKey::of(PRIMARY, &[tenant_id.as_str()])
        .as_str()
        .to_owned()
}
