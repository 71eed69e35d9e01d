//! Category bootstrap.
//!
//! The three fixed categories are looked up by tag and created only when
//! missing, before any batch is dispatched.

use super::stats::ImportStats;
use crate::correlation::{CorrelationEntry, CorrelationStore, EntryMeta};
use crate::destination::{Destination, NewCategory};
use crate::error::ImportResult;
use crate::ident;
use crate::models::{Category, DestinationId, EntityKind};
use std::collections::HashMap;

/// Destination ids of the fixed categories.
#[derive(Debug, Clone, Default)]
pub struct CategoryIds {
    ids: HashMap<Category, DestinationId>,
}

impl CategoryIds {
    pub fn get(&self, category: Category) -> Option<DestinationId> {
        self.ids.get(&category).copied()
    }

    /// Resolve a post record's `type` tag.
    pub fn for_tag(&self, tag: &str) -> Option<DestinationId> {
        Category::from_tag(tag).and_then(|category| self.get(category))
    }
}

pub async fn bootstrap_categories<D: Destination>(
    destination: &D,
    store: &mut CorrelationStore,
) -> ImportResult<(CategoryIds, ImportStats)> {
    let mut ids = CategoryIds::default();
    let mut stats = ImportStats::default();

    for category in Category::ALL {
        let key = ident::encode(category.tag())?;
        let id = match store.lookup_destination_id_by_internal_key(EntityKind::Category, key) {
            Some(id) => {
                stats.skipped += 1;
                id
            }
            None => {
                let id = destination
                    .create_category(&NewCategory {
                        tag: category.tag(),
                        name: category.name(),
                        color: category.color(),
                    })
                    .await?;
                store.record_created(CorrelationEntry::new(
                    EntityKind::Category,
                    category.tag(),
                    key,
                    id,
                    EntryMeta::None,
                ));
                log::info!("created category {} ({})", category.name(), id);
                stats.created += 1;
                id
            }
        };
        ids.ids.insert(category, id);
    }

    Ok((ids, stats))
}
