use serde::{Deserialize, Serialize};
use tracing::instrument;

use kanri_core::ids::{BacklogItemId, ProductId, ReleaseId, SprintId, TenantId};

use crate::database::Database;
use crate::error::StoreError;
use crate::key::{CompositeKey, IndexKey};
use crate::unit_of_work::{ReadView, UnitOfWork, WorkContext};

const PRIMARY: &str = "bli#pk";
const OF_PRODUCT: &str = "bli#product";
const BY_RELEASE: &str = "bli#release";
const BY_SPRINT: &str = "bli#sprint";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BacklogItemType {
    Feature,
    Enhancement,
    Defect,
    Foundation,
    Integration,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BacklogItemStatus {
    Planned,
    Scheduled,
    Committed,
    Done,
    Removed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BacklogItem {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub backlog_item_id: BacklogItemId,
    pub summary: String,
    pub category: String,
    pub item_type: BacklogItemType,
    pub status: BacklogItemStatus,
    pub story_points: u32,
    pub release_id: Option<ReleaseId>,
    pub sprint_id: Option<SprintId>,
}

impl BacklogItem {
    pub fn is_scheduled_for_release(&self) -> bool {
        self.release_id.is_some()
    }

    pub fn is_committed_to_sprint(&self) -> bool {
        self.sprint_id.is_some()
    }

    pub fn is_done(&self) -> bool {
        self.status == BacklogItemStatus::Done
    }

    pub fn is_removed(&self) -> bool {
        self.status == BacklogItemStatus::Removed
    }

    fn primary_key(&self) -> CompositeKey {
        CompositeKey::of(
            PRIMARY,
            &[self.tenant_id.as_str(), self.backlog_item_id.as_str()],
        )
    }
}

pub struct BacklogItemRepo {
    db: Database,
}

impl BacklogItemRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn next_identity(&self) -> BacklogItemId {
        BacklogItemId::new()
    }

    #[instrument(skip(self), fields(tenant = %tenant_id, backlog_item = %backlog_item_id))]
    pub fn backlog_item_of_id(
        &self,
        tenant_id: &TenantId,
        backlog_item_id: &BacklogItemId,
    ) -> Result<Option<BacklogItem>, StoreError> {
        let key = CompositeKey::of(PRIMARY, &[tenant_id.as_str(), backlog_item_id.as_str()]);
        ReadView::new(&self.db).read_object(&key)
    }

    #[instrument(skip(self), fields(tenant = %tenant_id, product = %product_id))]
    pub fn all_product_backlog_items(
        &self,
        tenant_id: &TenantId,
        product_id: &ProductId,
    ) -> Result<Vec<BacklogItem>, StoreError> {
        self.scan(CompositeKey::of(
            OF_PRODUCT,
            &[tenant_id.as_str(), product_id.as_str()],
        ))
    }

    pub fn all_outstanding_product_backlog_items(
        &self,
        tenant_id: &TenantId,
        product_id: &ProductId,
    ) -> Result<Vec<BacklogItem>, StoreError> {
        let mut items = self.all_product_backlog_items(tenant_id, product_id)?;
        items.retain(|item| !item.is_done() && !item.is_removed());
        Ok(items)
    }

    #[instrument(skip(self), fields(tenant = %tenant_id, release = %release_id))]
    pub fn all_backlog_items_scheduled_for(
        &self,
        tenant_id: &TenantId,
        release_id: &ReleaseId,
    ) -> Result<Vec<BacklogItem>, StoreError> {
        self.scan(CompositeKey::of(
            BY_RELEASE,
            &[tenant_id.as_str(), release_id.as_str()],
        ))
    }

    #[instrument(skip(self), fields(tenant = %tenant_id, sprint = %sprint_id))]
    pub fn all_backlog_items_committed_to(
        &self,
        tenant_id: &TenantId,
        sprint_id: &SprintId,
    ) -> Result<Vec<BacklogItem>, StoreError> {
        self.scan(CompositeKey::of(
            BY_SPRINT,
            &[tenant_id.as_str(), sprint_id.as_str()],
        ))
    }

    #[instrument(skip_all, fields(tenant = %item.tenant_id, backlog_item = %item.backlog_item_id))]
    pub fn save(&self, ctx: &mut WorkContext, item: &BacklogItem) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        uow.lock(&tenant_partition(&item.tenant_id));
        Self::stage_save(uow, item)
    }

    pub fn save_all(&self, ctx: &mut WorkContext, items: &[BacklogItem]) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        let mut locked = false;
        for item in items {
            if !locked {
                uow.lock(&tenant_partition(&item.tenant_id));
                locked = true;
            }
            Self::stage_save(uow, item)?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(tenant = %item.tenant_id, backlog_item = %item.backlog_item_id))]
    pub fn remove(&self, ctx: &mut WorkContext, item: &BacklogItem) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        uow.lock(&tenant_partition(&item.tenant_id));
        Self::stage_remove(uow, item)
    }

    pub fn remove_all(
        &self,
        ctx: &mut WorkContext,
        items: &[BacklogItem],
    ) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        let mut locked = false;
        for item in items {
            if !locked {
                uow.lock(&tenant_partition(&item.tenant_id));
                locked = true;
            }
            Self::stage_remove(uow, item)?;
        }
        Ok(())
    }

    fn scan(&self, index: CompositeKey) -> Result<Vec<BacklogItem>, StoreError> {
        let view = ReadView::new(&self.db);
        let mut items = Vec::new();
        for primary in view.read_keys(&index)? {
            if let Some(item) = view.read_object_at(&primary)? {
                items.push(item);
            }
        }
        Ok(items)
    }

    fn stage_save(uow: &mut UnitOfWork, item: &BacklogItem) -> Result<(), StoreError> {
        let primary = item.primary_key();
        let tenant = item.tenant_id.as_str();

        // Membership is re-derived from the aggregate's current state:
        // reassignment away from a product, release, or sprint drops the
        // former index entry before the new one is staged.
        let prior: Option<BacklogItem> = uow.pending_object(&primary)?;
        if let Some(prior) = prior {
            if prior.product_id != item.product_id {
                uow.remove_key_reference(&IndexKey::linking(
                    &primary,
                    OF_PRODUCT,
                    &[tenant, prior.product_id.as_str()],
                ))?;
            }
            if let Some(former) = prior.release_id.as_ref() {
                if item.release_id.as_ref() != Some(former) {
                    uow.remove_key_reference(&IndexKey::linking(
                        &primary,
                        BY_RELEASE,
                        &[tenant, former.as_str()],
                    ))?;
                }
            }
            if let Some(former) = prior.sprint_id.as_ref() {
                if item.sprint_id.as_ref() != Some(former) {
                    uow.remove_key_reference(&IndexKey::linking(
                        &primary,
                        BY_SPRINT,
                        &[tenant, former.as_str()],
                    ))?;
                }
            }
        }

        uow.write(&primary, item)?;
        uow.update_key_reference(&IndexKey::linking(
            &primary,
            OF_PRODUCT,
            &[tenant, item.product_id.as_str()],
        ))?;
        if let Some(release_id) = item.release_id.as_ref() {
            uow.update_key_reference(&IndexKey::linking(
                &primary,
                BY_RELEASE,
                &[tenant, release_id.as_str()],
            ))?;
        }
        if let Some(sprint_id) = item.sprint_id.as_ref() {
            uow.update_key_reference(&IndexKey::linking(
                &primary,
                BY_SPRINT,
                &[tenant, sprint_id.as_str()],
            ))?;
        }
        Ok(())
    }

    fn stage_remove(uow: &mut UnitOfWork, item: &BacklogItem) -> Result<(), StoreError> {
        let primary = item.primary_key();
        let tenant = item.tenant_id.as_str();

        uow.remove(&primary);
        uow.remove_key_reference(&IndexKey::linking(
            &primary,
            OF_PRODUCT,
            &[tenant, item.product_id.as_str()],
        ))?;
        if let Some(release_id) = item.release_id.as_ref() {
            uow.remove_key_reference(&IndexKey::linking(
                &primary,
                BY_RELEASE,
                &[tenant, release_id.as_str()],
            ))?;
        }
        if let Some(sprint_id) = item.sprint_id.as_ref() {
            uow.remove_key_reference(&IndexKey::linking(
                &primary,
                BY_SPRINT,
                &[tenant, sprint_id.as_str()],
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
