use serde::{Deserialize, Serialize};
use tracing::instrument;

use kanri_core::ids::TenantId;

use crate::database::Database;
use crate::error::StoreError;
use crate::key::{CompositeKey, IndexKey};
use crate::unit_of_work::{ReadView, UnitOfWork, WorkContext};

const PRIMARY: &str = "team_member#pk";
const OF_TENANT: &str = "team_member#tenant";

/// A team member is addressed by username within the tenant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TeamMember {
    pub tenant_id: TenantId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email_address: String,
}

impl TeamMember {
    fn primary_key(&self) -> CompositeKey {
        CompositeKey::of(PRIMARY, &[self.tenant_id.as_str(), &self.username])
    }
}

pub struct TeamMemberRepo {
    db: Database,
}

impl TeamMemberRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(tenant = %tenant_id, username))]
    pub fn team_member_of_identity(
        &self,
        tenant_id: &TenantId,
        username: &str,
    ) -> Result<Option<TeamMember>, StoreError> {
        let key = CompositeKey::of(PRIMARY, &[tenant_id.as_str(), username]);
        ReadView::new(&self.db).read_object(&key)
    }

    #[instrument(skip(self), fields(tenant = %tenant_id))]
    pub fn all_team_members_of_tenant(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<TeamMember>, StoreError> {
        let view = ReadView::new(&self.db);
        let index = CompositeKey::of(OF_TENANT, &[tenant_id.as_str()]);
        let mut members = Vec::new();
        for primary in view.read_keys(&index)? {
            if let Some(member) = view.read_object_at(&primary)? {
                members.push(member);
            }
        }
        Ok(members)
    }

    #[instrument(skip_all, fields(tenant = %member.tenant_id, username = %member.username))]
    pub fn save(&self, ctx: &mut WorkContext, member: &TeamMember) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        uow.lock(&tenant_partition(&member.tenant_id));
        Self::stage_save(uow, member)
    }

    pub fn save_all(
        &self,
        ctx: &mut WorkContext,
        members: &[TeamMember],
    ) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        let mut locked = false;
        for member in members {
            if !locked {
                uow.lock(&tenant_partition(&member.tenant_id));
                locked = true;
            }
            Self::stage_save(uow, member)?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(tenant = %member.tenant_id, username = %member.username))]
    pub fn remove(&self, ctx: &mut WorkContext, member: &TeamMember) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        uow.lock(&tenant_partition(&member.tenant_id));
        Self::stage_remove(uow, member)
    }

    pub fn remove_all(
        &self,
        ctx: &mut WorkContext,
        members: &[TeamMember],
    ) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        let mut locked = false;
        for member in members {
            if !locked {
                uow.lock(&tenant_partition(&member.tenant_id));
                locked = true;
            }
            Self::stage_remove(uow, member)?;
        }
        Ok(())
    }

    fn stage_save(uow: &mut UnitOfWork, member: &TeamMember) -> Result<(), StoreError> {
        let primary = member.primary_key();
        uow.write(&primary, member)?;
        uow.update_key_reference(&IndexKey::linking(
            &primary,
            OF_TENANT,
            &[member.tenant_id.as_str()],
        ))?;
        Ok(())
    }

    fn stage_remove(uow: &mut UnitOfWork, member: &TeamMember) -> Result<(), StoreError> {
        let primary = member.primary_key();
        uow.remove(&primary);
        uow.remove_key_reference(&IndexKey::linking(
            &primary,
            OF_TENANT,
            &[member.tenant_id.as_str()],
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
    use super::*;

    fn member(tenant: &str, username: &str) -> TeamMember {
        TeamMember {
            tenant_id: TenantId::from_raw(tenant),
            username: username.to_owned(),
            first_name: "Jo".to_owned(),
            last_name: "Doe".to_owned(),
            email_address: format!("{username}@example.com"),
        }
    }

    #[test]
    fn save_and_find_by_identity() {
        let db = Database::temporary().unwrap();
        let repo = TeamMemberRepo::new(db.clone());
        let m = member("12345", "jdoe");

        let mut ctx = WorkContext::new();
        ctx.start(&db).unwrap();
        repo.save(&mut ctx, &m).unwrap();
        ctx.commit().unwrap();

        let found = repo.team_member_of_identity(&m.tenant_id, "jdoe").unwrap();
        assert_eq!(found, Some(m.clone()));
        assert!(repo
            .team_member_of_identity(&m.tenant_id, "someone-else")
            .unwrap()
            .is_none());
    }

    #[test]
    fn save_all_batches_under_one_lock() {
        let db = Database::temporary().unwrap();
        let repo = TeamMemberRepo::new(db.clone());
        let members = vec![member("12345", "a"), member("12345", "b"), member("12345", "c")];

        let mut ctx = WorkContext::new();
        ctx.start(&db).unwrap();
        repo.save_all(&mut ctx, &members).unwrap();
        assert_eq!(ctx.current().unwrap().held_partitions().len(), 1);
        ctx.commit().unwrap();

        let all = repo
            .all_team_members_of_tenant(&TenantId::from_raw("12345"))
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn remove_all_empties_the_tenant_index() {
        let db = Database::temporary().unwrap();
        let repo = TeamMemberRepo::new(db.clone());
        let members = vec![member("12345", "a"), member("12345", "b")];

        let mut ctx = WorkContext::new();
        ctx.start(&db).unwrap();
        repo.save_all(&mut ctx, &members).unwrap();
        ctx.commit().unwrap();

        ctx.start(&db).unwrap();
        repo.remove_all(&mut ctx, &members).unwrap();
        ctx.commit().unwrap();

        assert!(repo
            .all_team_members_of_tenant(&TenantId::from_raw("12345"))
            .unwrap()
            .is_empty());
    }
}
