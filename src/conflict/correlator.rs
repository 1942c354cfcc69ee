// SPDX-License-Identifier: MIT

//! Pairs cache components with their project counterparts, driven by the
//! server's file-property index so each logical component is visited once.

use std::collections::{HashMap, HashSet};

use crate::cache::props::FileProperties;
use crate::component::{Component, ComponentKey};

/// A matched cache/project pair plus the server-side modification stamp of
/// the logical component that produced it.
#[derive(Debug, Clone)]
pub struct CorrelatedComponent {
    pub cache_component: Component,
    pub project_component: Component,
    pub last_modified_date: String,
}

/// One side's view of a logical component: the component itself when it was
/// resolved standalone, plus any addressable children filed under it.
#[derive(Default)]
struct KeyedComponents<'a> {
    primary: Option<&'a Component>,
    children: HashMap<ComponentKey, &'a Component>,
}

fn index(components: &[Component]) -> HashMap<ComponentKey, KeyedComponents<'_>> {
    let mut map: HashMap<ComponentKey, KeyedComponents> = HashMap::new();
    for component in components {
        match &component.parent {
            // Children register under the parent's key; a later parentless
            // sighting of the parent keeps them.
            Some(parent) => {
                map.entry(parent.clone())
                    .or_default()
                    .children
                    .insert(component.key(), component);
            }
            None => {
                map.entry(component.key()).or_default().primary = Some(component);
            }
        }
    }
    map
}

/// Correlate both sides. When a key resolves to a primary on each side one
/// pair is produced; otherwise each child key present on both sides yields a
/// pair carrying the parent property's modification stamp.
pub fn correlate_results(
    cache_components: &[Component],
    properties: &[FileProperties],
    project_components: &[Component],
) -> Vec<CorrelatedComponent> {
    let cache_index = index(cache_components);
    let project_index = index(project_components);
    let mut seen: HashSet<ComponentKey> = HashSet::new();
    let mut correlated = Vec::new();

    for property in properties {
        let key = property.key();
        if !seen.insert(key.clone()) {
            continue;
        }
        let (Some(cache_entry), Some(project_entry)) =
            (cache_index.get(&key), project_index.get(&key))
        else {
            continue;
        };
        match (cache_entry.primary, project_entry.primary) {
            (Some(cache), Some(project)) => correlated.push(CorrelatedComponent {
                cache_component: cache.clone(),
                project_component: project.clone(),
                last_modified_date: property.last_modified_date.clone(),
            }),
            _ => {
                let mut child_keys: Vec<&ComponentKey> = cache_entry.children.keys().collect();
                child_keys.sort();
                for child_key in child_keys {
                    if let Some(project_child) = project_entry.children.get(child_key) {
                        correlated.push(CorrelatedComponent {
                            cache_component: cache_entry.children[child_key].clone(),
                            project_component: (*project_child).clone(),
                            last_modified_date: property.last_modified_date.clone(),
                        });
                    }
                }
            }
        }
    }
    correlated
}
