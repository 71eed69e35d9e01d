//! Project import: one destination group per project, membership overwritten
//! to match the export on every run.

use super::ImportContext;
use super::stats::ImportStats;
use crate::correlation::{CorrelationEntry, EntryMeta};
use crate::destination::{Destination, NewGroup};
use crate::error::{ImportError, ImportResult};
use crate::ident;
use crate::models::{CorrelationRecord, DestinationId, EntityKind, ProjectRecord};
use std::io::Write;

pub async fn import_projects<D: Destination, W: Write>(
    ctx: &mut ImportContext<'_, D, W>,
    projects: &[ProjectRecord],
) -> ImportResult<ImportStats> {
    let mut stats = ImportStats::default();

    for project in projects {
        let key = ident::encode(&project.guid)?;
        let group_id = match ctx
            .store
            .lookup_destination_id_by_internal_key(EntityKind::Project, key)
        {
            Some(id) => {
                stats.skipped += 1;
                id
            }
            None => {
                let id = ctx
                    .destination
                    .create_group(&NewGroup {
                        key,
                        guid: &project.guid,
                        visible: project.is_public,
                        deleted: project.is_deleted,
                    })
                    .await?;
                ctx.store.record_created(CorrelationEntry::new(
                    EntityKind::Project,
                    project.guid.as_str(),
                    key,
                    id,
                    EntryMeta::Project {
                        deleted: project.is_deleted,
                    },
                ));
                log::debug!("created group {} ({})", project.guid, id);
                stats.created += 1;
                id
            }
        };

        let member_ids = project
            .contributors
            .iter()
            .map(|guid| {
                ctx.store
                    .require(EntityKind::User, guid)
                    .map(|entry| entry.destination_id)
            })
            .collect::<ImportResult<Vec<DestinationId>>>()?;
        ctx.destination
            .set_group_members(group_id, &member_ids)
            .await?;

        verify_group(ctx, project, group_id).await?;

        ctx.emitter.emit(&CorrelationRecord::Project {
            guid: project.guid.clone(),
            group_id,
            group_public: project.is_public,
            group_users: project.contributors.clone(),
        })?;
    }

    Ok(stats)
}

async fn verify_group<D: Destination, W: Write>(
    ctx: &ImportContext<'_, D, W>,
    project: &ProjectRecord,
    group_id: DestinationId,
) -> ImportResult<()> {
    let state = ctx.destination.group_state(group_id).await?.ok_or_else(|| {
        ImportError::Consistency(format!(
            "group {} ({}) is correlated but missing at the destination",
            project.guid, group_id
        ))
    })?;

    if state.visible != project.is_public {
        return Err(ImportError::Consistency(format!(
            "group {} ({}) has visible={} but the project is_public={}",
            project.guid, group_id, state.visible, project.is_public
        )));
    }
    if state.deleted != project.is_deleted {
        return Err(ImportError::Consistency(format!(
            "group {} ({}) has is_deleted={} but the project says {}",
            project.guid, group_id, state.deleted, project.is_deleted
        )));
    }

    Ok(())
}
