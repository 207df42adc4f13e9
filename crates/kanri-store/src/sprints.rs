use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use kanri_core::ids::{ProductId, SprintId, TenantId};

use crate::database::Database;
use crate::error::StoreError;
use crate::key::{CompositeKey, IndexKey};
use crate::unit_of_work::{ReadView, UnitOfWork, WorkContext};

const PRIMARY: &str = "sprint#pk";
const OF_PRODUCT: &str = "sprint#product";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sprint {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub sprint_id: SprintId,
    pub name: String,
    pub goals: String,
    pub begins: DateTime<Utc>,
    pub ends: DateTime<Utc>,
}

impl Sprint {
    fn primary_key(&self) -> CompositeKey {
        CompositeKey::of(PRIMARY, &[self.tenant_id.as_str(), self.sprint_id.as_str()])
    }
}

pub struct SprintRepo {
    db: Database,
}

impl SprintRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn next_identity(&self) -> SprintId {
        SprintId::new()
    }

    #[instrument(skip(self), fields(tenant = %tenant_id, sprint = %sprint_id))]
    pub fn sprint_of_id(
        &self,
        tenant_id: &TenantId,
        sprint_id: &SprintId,
    ) -> Result<Option<Sprint>, StoreError> {
        let key = CompositeKey::of(PRIMARY, &[tenant_id.as_str(), sprint_id.as_str()]);
        ReadView::new(&self.db).read_object(&key)
    }

    #[instrument(skip(self), fields(tenant = %tenant_id, product = %product_id))]
    pub fn all_product_sprints(
        &self,
        tenant_id: &TenantId,
        product_id: &ProductId,
    ) -> Result<Vec<Sprint>, StoreError> {
        let view = ReadView::new(&self.db);
        let index = CompositeKey::of(OF_PRODUCT, &[tenant_id.as_str(), product_id.as_str()]);
        let mut sprints = Vec::new();
        for primary in view.read_keys(&index)? {
            if let Some(sprint) = view.read_object_at(&primary)? {
                sprints.push(sprint);
            }
        }
        Ok(sprints)
    }

    #[instrument(skip_all, fields(tenant = %sprint.tenant_id, sprint = %sprint.sprint_id))]
    pub fn save(&self, ctx: &mut WorkContext, sprint: &Sprint) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        uow.lock(&tenant_partition(&sprint.tenant_id));
        Self::stage_save(uow, sprint)
    }

    pub fn save_all(&self, ctx: &mut WorkContext, sprints: &[Sprint]) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        let mut locked = false;
        for sprint in sprints {
            if !locked {
                uow.lock(&tenant_partition(&sprint.tenant_id));
                locked = true;
            }
            Self::stage_save(uow, sprint)?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(tenant = %sprint.tenant_id, sprint = %sprint.sprint_id))]
    pub fn remove(&self, ctx: &mut WorkContext, sprint: &Sprint) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        uow.lock(&tenant_partition(&sprint.tenant_id));
        Self::stage_remove(uow, sprint)
    }

    pub fn remove_all(&self, ctx: &mut WorkContext, sprints: &[Sprint]) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        let mut locked = false;
        for sprint in sprints {
            if !locked {
                uow.lock(&tenant_partition(&sprint.tenant_id));
                locked = true;
            }
            Self::stage_remove(uow, sprint)?;
        }
        Ok(())
    }

    fn stage_save(uow: &mut UnitOfWork, sprint: &Sprint) -> Result<(), StoreError> {
        let primary = sprint.primary_key();
        let tenant = sprint.tenant_id.as_str();

        let prior: Option<Sprint> = uow.pending_object(&primary)?;
        if let Some(prior) = prior {
            if prior.product_id != sprint.product_id {
                uow.remove_key_reference(&IndexKey::linking(
                    &primary,
                    OF_PRODUCT,
                    &[tenant, prior.product_id.as_str()],
                ))?;
            }
        }

        uow.write(&primary, sprint)?;
        uow.update_key_reference(&IndexKey::linking(
            &primary,
            OF_PRODUCT,
            &[tenant, sprint.product_id.as_str()],
        ))?;
        Ok(())
    }

    fn stage_remove(uow: &mut UnitOfWork, sprint: &Sprint) -> Result<(), StoreError> {
        let primary = sprint.primary_key();
        uow.remove(&primary);
        uow.remove_key_reference(&IndexKey::linking(
            &primary,
            OF_PRODUCT,
            &[sprint.tenant_id.as_str(), sprint.product_id.as_str()],
        ))?;
        Ok(())
    }
}

fn tenant_partition(tenant_id: &TenantId) -> String {
    CompositeKey::of(PRIMARY, &[tenant_id.as_str()])
        .as_str()
        .to_owned()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn sprint(tenant: &str, product: &str, id: &str) -> Sprint {
        Sprint {
            tenant_id: TenantId::from_raw(tenant),
            product_id: ProductId::from_raw(product),
            sprint_id: SprintId::from_raw(id),
            name: format!("Sprint {id}"),
            goals: "Ship the iteration.".to_owned(),
            begins: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
            ends: Utc.with_ymd_and_hms(2026, 2, 14, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn save_all_and_scan() {
        let db = Database::temporary().unwrap();
        let repo = SprintRepo::new(db.clone());
        let sprints = vec![sprint("12345", "p1", "s1"), sprint("12345", "p1", "s2")];

        let mut ctx = WorkContext::new();
        ctx.start(&db).unwrap();
        repo.save_all(&mut ctx, &sprints).unwrap();
        assert_eq!(ctx.current().unwrap().held_partitions().len(), 1);
        ctx.commit().unwrap();

        let tenant = TenantId::from_raw("12345");
        let all = repo.all_product_sprints(&tenant, &ProductId::from_raw("p1")).unwrap();
        assert_eq!(all.len(), 2);

        let found = repo.sprint_of_id(&tenant, &SprintId::from_raw("s1")).unwrap();
        assert_eq!(found, Some(sprints[0].clone()));
    }

    #[test]
    fn remove_all_prunes_everything() {
        let db = Database::temporary().unwrap();
        let repo = SprintRepo::new(db.clone());
        let sprints = vec![sprint("12345", "p1", "s1"), sprint("12345", "p1", "s2")];

        let mut ctx = WorkContext::new();
        ctx.start(&db).unwrap();
        repo.save_all(&mut ctx, &sprints).unwrap();
        ctx.commit().unwrap();

        ctx.start(&db).unwrap();
        repo.remove_all(&mut ctx, &sprints).unwrap();
        ctx.commit().unwrap();

        let tenant = TenantId::from_raw("12345");
        assert!(repo
            .all_product_sprints(&tenant, &ProductId::from_raw("p1"))
            .unwrap()
            .is_empty());
    }
}
