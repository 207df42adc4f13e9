use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use kanri_core::ids::{ProductId, ReleaseId, TenantId};

use crate::database::Database;
use crate::error::StoreError;
use crate::key::{CompositeKey, IndexKey};
use crate::unit_of_work::{ReadView, UnitOfWork, WorkContext};

const PRIMARY: &str = "release#pk";
const OF_PRODUCT: &str = "release#product";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub release_id: ReleaseId,
    pub name: String,
    pub description: String,
    pub begins: DateTime<Utc>,
    pub ends: DateTime<Utc>,
    pub archived: bool,
}

impl Release {
    fn primary_key(&self) -> CompositeKey {
        CompositeKey::of(PRIMARY, &[self.tenant_id.as_str(), self.release_id.as_str()])
    }
}

pub struct ReleaseRepo {
    db: Database,
}

impl ReleaseRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn next_identity(&self) -> ReleaseId {
        ReleaseId::new()
    }

    #[instrument(skip(self), fields(tenant = %tenant_id, release = %release_id))]
    pub fn release_of_id(
        &self,
        tenant_id: &TenantId,
        release_id: &ReleaseId,
    ) -> Result<Option<Release>, StoreError> {
        let key = CompositeKey::of(PRIMARY, &[tenant_id.as_str(), release_id.as_str()]);
        ReadView::new(&self.db).read_object(&key)
    }

    #[instrument(skip(self), fields(tenant = %tenant_id, product = %product_id))]
    pub fn all_product_releases(
        &self,
        tenant_id: &TenantId,
        product_id: &ProductId,
    ) -> Result<Vec<Release>, StoreError> {
        let view = ReadView::new(&self.db);
        let index = CompositeKey::of(OF_PRODUCT, &[tenant_id.as_str(), product_id.as_str()]);
        let mut releases = Vec::new();
        for primary in view.read_keys(&index)? {
            if let Some(release) = view.read_object_at(&primary)? {
                releases.push(release);
            }
        }
        Ok(releases)
    }

    #[instrument(skip_all, fields(tenant = %release.tenant_id, release = %release.release_id))]
    pub fn save(&self, ctx: &mut WorkContext, release: &Release) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        uow.lock(&tenant_partition(&release.tenant_id));
        Self::stage_save(uow, release)
    }

    pub fn save_all(&self, ctx: &mut WorkContext, releases: &[Release]) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        let mut locked = false;
        for release in releases {
            if !locked {
                uow.lock(&tenant_partition(&release.tenant_id));
                locked = true;
            }
            Self::stage_save(uow, release)?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(tenant = %release.tenant_id, release = %release.release_id))]
    pub fn remove(&self, ctx: &mut WorkContext, release: &Release) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        uow.lock(&tenant_partition(&release.tenant_id));
        Self::stage_remove(uow, release)
    }

    pub fn remove_all(&self, ctx: &mut WorkContext, releases: &[Release]) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        let mut locked = false;
        for release in releases {
            if !locked {
                uow.lock(&tenant_partition(&release.tenant_id));
                locked = true;
            }
            Self::stage_remove(uow, release)?;
        }
        Ok(())
    }

    fn stage_save(uow: &mut UnitOfWork, release: &Release) -> Result<(), StoreError> {
        let primary = release.primary_key();
        let tenant = release.tenant_id.as_str();

        let prior: Option<Release> = uow.pending_object(&primary)?;
        if let Some(prior) = prior {
            if prior.product_id != release.product_id {
                uow.remove_key_reference(&IndexKey::linking(
                    &primary,
                    OF_PRODUCT,
                    &[tenant, prior.product_id.as_str()],
                ))?;
            }
        }

        uow.write(&primary, release)?;
        uow.update_key_reference(&IndexKey::linking(
            &primary,
            OF_PRODUCT,
            &[tenant, release.product_id.as_str()],
        ))?;
        Ok(())
    }

    fn stage_remove(uow: &mut UnitOfWork, release: &Release) -> Result<(), StoreError> {
        let primary = release.primary_key();
        uow.remove(&primary);
        uow.remove_key_reference(&IndexKey::linking(
            &primary,
            OF_PRODUCT,
            &[release.tenant_id.as_str(), release.product_id.as_str()],
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

    fn release(tenant: &str, product: &str, id: &str, name: &str) -> Release {
        Release {
            tenant_id: TenantId::from_raw(tenant),
            product_id: ProductId::from_raw(product),
            release_id: ReleaseId::from_raw(id),
            name: name.to_owned(),
            description: format!("Release {name}."),
            begins: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            ends: Utc.with_ymd_and_hms(2026, 3, 31, 0, 0, 0).unwrap(),
            archived: false,
        }
    }

    #[test]
    fn save_and_read_back() {
        let db = Database::temporary().unwrap();
        let repo = ReleaseRepo::new(db.clone());
        let r = release("12345", "p1", "r1", "Release 1.0");

        let mut ctx = WorkContext::new();
        ctx.start(&db).unwrap();
        repo.save(&mut ctx, &r).unwrap();
        ctx.commit().unwrap();

        let found = repo.release_of_id(&r.tenant_id, &r.release_id).unwrap();
        assert_eq!(found, Some(r.clone()));

        let all = repo.all_product_releases(&r.tenant_id, &r.product_id).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn remove_prunes_the_product_index() {
        let db = Database::temporary().unwrap();
        let repo = ReleaseRepo::new(db.clone());
        let r = release("12345", "p1", "r1", "Release 1.0");

        let mut ctx = WorkContext::new();
        ctx.start(&db).unwrap();
        repo.save(&mut ctx, &r).unwrap();
        ctx.commit().unwrap();

        ctx.start(&db).unwrap();
        repo.remove(&mut ctx, &r).unwrap();
        ctx.commit().unwrap();

        assert!(repo.release_of_id(&r.tenant_id, &r.release_id).unwrap().is_none());
        assert!(repo.all_product_releases(&r.tenant_id, &r.product_id).unwrap().is_empty());
    }

    #[test]
    fn unknown_release_is_none() {
        let db = Database::temporary().unwrap();
        let repo = ReleaseRepo::new(db);
        let found = repo
            .release_of_id(&TenantId::from_raw("12345"), &ReleaseId::from_raw("nope"))
            .unwrap();
        assert!(found.is_none());
    }
}
