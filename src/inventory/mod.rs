//! Per-view collections, the detail cache, and the reconciliation rules that
//! keep overlapping views consistent.
//!
//! `Inventory` is plain data. Callers hold it behind one async mutex and
//! never across an external call, so each method below is one atomic merge
//! as far as readers are concerned.
pub mod collection;
pub mod decode;
pub mod sizes;

use crate::error::{EngineError, Result};
use crate::models::{Entity, PartialFields, Repository, ViewEntries, ViewKind, ViewSnapshot};
use collection::ViewCollection;
use std::collections::{HashMap, HashSet};

/// Taken before a fetch starts; a load is only applied while its ticket is
/// the newest one issued for that view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    pub view: ViewKind,
    generation: u64,
}

#[derive(Debug, Default)]
pub struct Inventory {
    entities: HashMap<ViewKind, ViewCollection<Entity>>,
    repositories: ViewCollection<Repository>,
    details: HashMap<String, Entity>,
    /// Last known size per name, so views loaded later start with it.
    sizes: HashMap<String, u64>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    fn entity_view(&self, view: ViewKind) -> Option<&ViewCollection<Entity>> {
        self.entities.get(&view)
    }

    fn entity_view_mut(&mut self, view: ViewKind) -> &mut ViewCollection<Entity> {
        self.entities.entry(view).or_default()
    }

    fn generation_mut(&mut self, view: ViewKind) -> &mut u64 {
        match view {
            ViewKind::Repositories => &mut self.repositories.generation,
            other => &mut self.entity_view_mut(other).generation,
        }
    }

    fn generation(&self, view: ViewKind) -> u64 {
        match view {
            ViewKind::Repositories => self.repositories.generation,
            other => self.entity_view(other).map_or(0, |c| c.generation),
        }
    }

    pub fn begin_load(&mut self, view: ViewKind) -> LoadTicket {
        let generation = self.generation_mut(view);
        *generation += 1;
        LoadTicket {
            view,
            generation: *generation,
        }
    }

    /// The ticket of the newest load already issued for `view`, without
    /// starting a new one.
    pub fn peek_load(&self, view: ViewKind) -> LoadTicket {
        LoadTicket {
            view,
            generation: self.generation(view),
        }
    }

    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        self.generation(ticket.view) == ticket.generation
    }

    /// Replaces a view's contents with a bulk fetch result.
    pub fn apply_base_load(&mut self, view: ViewKind, entries: ViewEntries) -> Result<()> {
        match (view, entries) {
            (ViewKind::Repositories, ViewEntries::Repositories(repos)) => {
                self.repositories.replace(repos);
                Ok(())
            }
            (ViewKind::Repositories, ViewEntries::Entities(_)) => Err(EngineError::Decode(
                "entity rows cannot load the repositories view".to_string(),
            )),
            (_, ViewEntries::Repositories(_)) => Err(EngineError::Decode(format!(
                "repository rows cannot load the {} view",
                view.as_str()
            ))),
            (view, ViewEntries::Entities(mut entities)) => {
                if view == ViewKind::Installed {
                    // A size belongs to an installed keg; it goes with it.
                    let present: HashSet<&str> = entities.iter().map(|e| e.name.as_str()).collect();
                    self.sizes.retain(|name, _| present.contains(name.as_str()));
                }
                for entity in &mut entities {
                    if entity.installed_version.is_none() {
                        entity.installed_version = self.known_installed_version(view, &entity.name);
                    }
                    if !entity.is_installed {
                        entity.is_installed = self.entity(ViewKind::Installed, &entity.name).is_some();
                    }
                    match entity.size_kb {
                        Some(kb) => {
                            self.sizes.insert(entity.name.clone(), kb);
                        }
                        None => entity.size_kb = self.sizes.get(&entity.name).copied(),
                    }
                }
                let shared: Vec<(String, PartialFields)> = entities
                    .iter()
                    .map(|e| {
                        let fields = PartialFields {
                            installed_version: e.installed_version.clone(),
                            size_kb: e.size_kb,
                            ..PartialFields::default()
                        };
                        (e.name.clone(), fields)
                    })
                    .filter(|(_, f)| !f.is_empty())
                    .collect();

                self.entity_view_mut(view).replace(entities);
                for (name, fields) in &shared {
                    self.mirror(view, name, fields);
                }
                Ok(())
            }
        }
    }

    /// Applies the result of a fetch started with `ticket`.
    ///
    /// Returns `Ok(false)` when a newer load of the same view has started
    /// since; the result is dropped. A failed fetch empties and unloads the
    /// view and hands the error back.
    pub fn apply_load(&mut self, ticket: LoadTicket, fetched: Result<ViewEntries>) -> Result<bool> {
        if !self.is_current(&ticket) {
            log::debug!(
                "Discarding superseded load of the {} view",
                ticket.view.as_str()
            );
            return Ok(false);
        }
        match fetched {
            Ok(entries) => {
                self.apply_base_load(ticket.view, entries)?;
                Ok(true)
            }
            Err(e) => {
                self.fail(ticket.view, e.to_string());
                Err(e)
            }
        }
    }

    pub fn fail(&mut self, view: ViewKind, message: String) {
        log::warn!("Loading the {} view failed: {}", view.as_str(), message);
        match view {
            ViewKind::Repositories => self.repositories.fail(message),
            other => self.entity_view_mut(other).fail(message),
        }
    }

    /// Merges late-arriving attributes into `view` by name.
    ///
    /// Only names already present are touched and only the provided fields
    /// change; nothing is added, removed or reordered. Shared attributes
    /// (size, installed version, description, homepage) are mirrored into
    /// every other view holding the same name. Returns the number of entries
    /// updated in `view`.
    pub fn apply_enrichment(
        &mut self,
        view: ViewKind,
        updates: &HashMap<String, PartialFields>,
    ) -> usize {
        if view == ViewKind::Repositories {
            return 0;
        }
        let mut touched = Vec::new();
        {
            let collection = self.entity_view_mut(view);
            for (name, fields) in updates {
                if let Some(entity) = collection.get_mut(name) {
                    fields.apply_to(entity);
                    touched.push(name.as_str());
                }
            }
        }
        for name in &touched {
            let shared = updates[*name].shared();
            if let Some(kb) = shared.size_kb {
                self.sizes.insert(name.to_string(), kb);
            }
            if !shared.is_empty() {
                self.mirror(view, name, &shared);
            }
        }
        touched.len()
    }

    fn known_installed_version(&self, except: ViewKind, name: &str) -> Option<String> {
        ViewKind::ALL
            .iter()
            .filter(|view| **view != except)
            .filter_map(|view| self.entity(*view, name))
            .find_map(|e| e.installed_version.clone())
    }

    /// Copies `fields` onto `name` in every view except `source`, and onto
    /// its detail-cache entry.
    fn mirror(&mut self, source: ViewKind, name: &str, fields: &PartialFields) {
        for (view, collection) in self.entities.iter_mut() {
            if *view == source {
                continue;
            }
            if let Some(entity) = collection.get_mut(name) {
                fields.apply_to(entity);
            }
        }
        if let Some(detail) = self.details.get_mut(name) {
            fields.apply_to(detail);
        }
    }

    pub fn is_loaded(&self, view: ViewKind) -> bool {
        match view {
            ViewKind::Repositories => self.repositories.is_loaded(),
            other => self.entity_view(other).is_some_and(|c| c.is_loaded()),
        }
    }

    pub fn len(&self, view: ViewKind) -> usize {
        match view {
            ViewKind::Repositories => self.repositories.len(),
            other => self.entity_view(other).map_or(0, |c| c.len()),
        }
    }

    pub fn position(&self, view: ViewKind, name: &str) -> Option<usize> {
        match view {
            ViewKind::Repositories => self.repositories.position(name),
            other => self.entity_view(other).and_then(|c| c.position(name)),
        }
    }

    pub fn names(&self, view: ViewKind) -> Vec<String> {
        match view {
            ViewKind::Repositories => self.repositories.names(),
            other => self.entity_view(other).map(|c| c.names()).unwrap_or_default(),
        }
    }

    pub fn entity(&self, view: ViewKind, name: &str) -> Option<&Entity> {
        self.entity_view(view).and_then(|c| c.get(name))
    }

    pub fn entities(&self, view: ViewKind) -> Vec<Entity> {
        self.entity_view(view).map(|c| c.to_vec()).unwrap_or_default()
    }

    pub fn repositories(&self) -> Vec<Repository> {
        self.repositories.to_vec()
    }

    /// The base row for `name`, looking at installed views first.
    pub fn find_entity(&self, name: &str) -> Option<&Entity> {
        ViewKind::ALL
            .iter()
            .filter(|v| **v != ViewKind::Repositories)
            .find_map(|v| self.entity(*v, name))
    }

    pub fn snapshot(&self, view: ViewKind) -> ViewSnapshot {
        let (loaded, error, entries) = match view {
            ViewKind::Repositories => (
                self.repositories.is_loaded(),
                self.repositories.last_error().map(String::from),
                ViewEntries::Repositories(self.repositories.to_vec()),
            ),
            other => match self.entity_view(other) {
                Some(c) => (
                    c.is_loaded(),
                    c.last_error().map(String::from),
                    ViewEntries::Entities(c.to_vec()),
                ),
                None => (false, None, ViewEntries::Entities(Vec::new())),
            },
        };
        ViewSnapshot {
            view,
            loaded,
            error,
            entries,
        }
    }

    // -------------------------------------------------------------------------
    // Detail cache
    // -------------------------------------------------------------------------
    pub fn cached_details(&self, name: &str) -> Option<Entity> {
        self.details.get(name).cloned()
    }

    /// Stores an enriched entity unless one is already cached, and returns
    /// the cached value. Missing fields are filled from the base row.
    pub fn cache_details(&mut self, mut entity: Entity) -> Entity {
        if let Some(existing) = self.details.get(&entity.name) {
            return existing.clone();
        }
        if let Some(base) = self.find_entity(&entity.name) {
            entity.fill_missing_from(base);
        }
        self.details.insert(entity.name.clone(), entity.clone());
        entity
    }

    pub fn invalidate_details<S: AsRef<str>>(&mut self, names: &[S]) {
        for name in names {
            self.details.remove(name.as_ref());
        }
    }

    pub fn clear_details(&mut self) {
        self.details.clear();
    }
}
