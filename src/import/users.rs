//! User import: create, merge by email, or skip already-correlated accounts.

use super::ImportContext;
use super::stats::ImportStats;
use crate::correlation::{CorrelationEntry, EntryMeta};
use crate::destination::{Destination, NewUser};
use crate::error::{ImportError, ImportResult};
use crate::ident;
use crate::models::{CorrelationRecord, DestinationId, EntityKind, UserRecord};
use std::io::Write;

pub async fn import_users<D: Destination, W: Write>(
    ctx: &mut ImportContext<'_, D, W>,
    users: &[UserRecord],
) -> ImportResult<ImportStats> {
    let mut stats = ImportStats::default();

    for user in users {
        let key = ident::encode(&user.username)?;
        if ctx.store.lookup_by_key(EntityKind::User, key).is_some() {
            log::trace!("user {} already imported", user.username);
            stats.skipped += 1;
            continue;
        }

        let user_id = match ctx.destination.find_user_by_email(&user.email).await? {
            Some(existing) => {
                // One account per email: a second export user cannot claim it.
                if let Some(owner) = ctx
                    .store
                    .lookup_internal_key_by_destination_id(EntityKind::User, existing)
                    .filter(|owner| *owner != key)
                {
                    let owner = ctx
                        .store
                        .lookup_by_key(EntityKind::User, owner)
                        .map(|entry| entry.external_id.clone())
                        .unwrap_or_else(|| owner.to_string());
                    return Err(ImportError::Consistency(format!(
                        "users {} and {} share email {} (account {})",
                        owner, user.username, user.email, existing
                    )));
                }
                ctx.destination
                    .annotate_user(existing, key, &user.username, user.is_disabled)
                    .await?;
                log::info!(
                    "merged user {} into existing account {} with email {}",
                    user.username,
                    existing,
                    user.email
                );
                stats.merged += 1;
                existing
            }
            None => {
                let id = ctx
                    .destination
                    .create_user(&NewUser {
                        key,
                        username: &user.username,
                        name: user.name.as_deref(),
                        email: &user.email,
                        avatar_url: user.avatar_url.as_deref().filter(|url| !url.is_empty()),
                        disabled: user.is_disabled,
                    })
                    .await?;
                log::debug!("created user {} ({})", user.username, id);
                stats.created += 1;
                id
            }
        };

        ctx.store.record_created(CorrelationEntry::new(
            EntityKind::User,
            user.username.as_str(),
            key,
            user_id,
            EntryMeta::User {
                disabled: user.is_disabled,
            },
        ));
    }

    for user in users {
        let user_id = ctx.store.require(EntityKind::User, &user.username)?.destination_id;
        verify_user(ctx, user, user_id).await?;
        ctx.emitter.emit(&CorrelationRecord::User {
            guid: user.username.clone(),
            user_id,
        })?;
    }

    Ok(stats)
}

async fn verify_user<D: Destination, W: Write>(
    ctx: &ImportContext<'_, D, W>,
    user: &UserRecord,
    user_id: DestinationId,
) -> ImportResult<()> {
    let state = ctx.destination.user_state(user_id).await?.ok_or_else(|| {
        ImportError::Consistency(format!(
            "user {} ({}) is correlated but missing at the destination",
            user.username, user_id
        ))
    })?;

    if state.disabled != user.is_disabled {
        return Err(ImportError::Consistency(format!(
            "user {} ({}) has disabled={} but the export says {}",
            user.username, user_id, state.disabled, user.is_disabled
        )));
    }

    let avatar_url = user.avatar_url.as_deref().unwrap_or_default();
    if !state.has_avatar && !avatar_url.is_empty() {
        // Retried on the next run when the fetch fails.
        if let Err(err) = ctx.destination.attach_avatar(user_id, avatar_url).await {
            log::warn!(
                "could not attach avatar {} to user {}: {}",
                avatar_url,
                user.username,
                err
            );
        }
    }

    Ok(())
}
