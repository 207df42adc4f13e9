use serde::{Deserialize, Serialize};
use tracing::instrument;

use kanri_core::ids::TenantId;

use crate::database::Database;
use crate::error::StoreError;
use crate::key::{CompositeKey, IndexKey};
use crate::unit_of_work::{ReadView, UnitOfWork, WorkContext};

const PRIMARY: &str = "team#pk";
const OF_TENANT: &str = "team#tenant";

/// A team is addressed by its name; there is no surrogate id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub tenant_id: TenantId,
    pub name: String,
}

impl Team {
    fn primary_key(&self) -> CompositeKey {
        CompositeKey::of(PRIMARY, &[self.tenant_id.as_str(), &self.name])
    }
}

pub struct TeamRepo {
    db: Database,
}

impl TeamRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(tenant = %tenant_id, team = name))]
    pub fn team_named(
        &self,
        tenant_id: &TenantId,
        name: &str,
    ) -> Result<Option<Team>, StoreError> {
        let key = CompositeKey::of(PRIMARY, &[tenant_id.as_str(), name]);
        ReadView::new(&self.db).read_object(&key)
    }

    #[instrument(skip(self), fields(tenant = %tenant_id))]
    pub fn all_teams_of_tenant(&self, tenant_id: &TenantId) -> Result<Vec<Team>, StoreError> {
        let view = ReadView::new(&self.db);
        let index = CompositeKey::of(OF_TENANT, &[tenant_id.as_str()]);
        let mut teams = Vec::new();
        for primary in view.read_keys(&index)? {
            if let Some(team) = view.read_object_at(&primary)? {
                teams.push(team);
            }
        }
        Ok(teams)
    }

    #[instrument(skip_all, fields(tenant = %team.tenant_id, team = %team.name))]
    pub fn save(&self, ctx: &mut WorkContext, team: &Team) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        uow.lock(&tenant_partition(&team.tenant_id));
        Self::stage_save(uow, team)
    }

    pub fn save_all(&self, ctx: &mut WorkContext, teams: &[Team]) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        let mut locked = false;
        for team in teams {
            if !locked {
                uow.lock(&tenant_partition(&team.tenant_id));
                locked = true;
            }
            Self::stage_save(uow, team)?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(tenant = %team.tenant_id, team = %team.name))]
    pub fn remove(&self, ctx: &mut WorkContext, team: &Team) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        uow.lock(&tenant_partition(&team.tenant_id));
        Self::stage_remove(uow, team)
    }

    pub fn remove_all(&self, ctx: &mut WorkContext, teams: &[Team]) -> Result<(), StoreError> {
        let uow = ctx.current()?;
        let mut locked = false;
        for team in teams {
            if !locked {
                uow.lock(&tenant_partition(&team.tenant_id));
                locked = true;
            }
            Self::stage_remove(uow, team)?;
        }
        Ok(())
    }

    fn stage_save(uow: &mut UnitOfWork, team: &Team) -> Result<(), StoreError> {
        let primary = team.primary_key();
        uow.write(&primary, team)?;
        uow.update_key_reference(&IndexKey::linking(
            &primary,
            OF_TENANT,
            &[team.tenant_id.as_str()],
        ))?;
        Ok(())
    }

    fn stage_remove(uow: &mut UnitOfWork, team: &Team) -> Result<(), StoreError> {
        let primary = team.primary_key();
        uow.remove(&primary);
        uow.remove_key_reference(&IndexKey::linking(
            &primary,
            OF_TENANT,
            &[team.tenant_id.as_str()],
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

    #[test]
    fn save_and_find_by_name() {
        let db = Database::temporary().unwrap();
        let repo = TeamRepo::new(db.clone());
        let team = Team {
            tenant_id: TenantId::from_raw("12345"),
            name: "Identity and Access".to_owned(),
        };

        let mut ctx = WorkContext::new();
        ctx.start(&db).unwrap();
        repo.save(&mut ctx, &team).unwrap();
        ctx.commit().unwrap();

        let found = repo.team_named(&team.tenant_id, "Identity and Access").unwrap();
        assert_eq!(found, Some(team.clone()));
        assert_eq!(repo.all_teams_of_tenant(&team.tenant_id).unwrap().len(), 1);
    }

    #[test]
    fn name_containing_the_delimiter_is_a_distinct_key() {
        let db = Database::temporary().unwrap();
        let repo = TeamRepo::new(db.clone());
        let tenant = TenantId::from_raw("12345");
        let tricky = Team {
            tenant_id: tenant.clone(),
            name: "core:platform".to_owned(),
        };

        let mut ctx = WorkContext::new();
        ctx.start(&db).unwrap();
        repo.save(&mut ctx, &tricky).unwrap();
        ctx.commit().unwrap();

        assert!(repo.team_named(&tenant, "core:platform").unwrap().is_some());
        assert!(repo.team_named(&tenant, "core").unwrap().is_none());
    }

    #[test]
    fn remove_unindexes_the_team() {
        let db = Database::temporary().unwrap();
        let repo = TeamRepo::new(db.clone());
        let team = Team {
            tenant_id: TenantId::from_raw("12345"),
            name: "Agile PM".to_owned(),
        };

        let mut ctx = WorkContext::new();
        ctx.start(&db).unwrap();
        repo.save(&mut ctx, &team).unwrap();
        ctx.commit().unwrap();

        ctx.start(&db).unwrap();
        repo.remove(&mut ctx, &team).unwrap();
        ctx.commit().unwrap();

        assert!(repo.team_named(&team.tenant_id, "Agile PM").unwrap().is_none());
        assert!(repo.all_teams_of_tenant(&team.tenant_id).unwrap().is_empty());
    }
}
