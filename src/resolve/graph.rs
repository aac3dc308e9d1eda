use std::collections::{BTreeMap, BTreeSet};

use super::references;
use crate::{error::ResolveError, template::Template};

/// resource -> the resources it has to wait for. An edge comes either from
/// an explicit DependsOn, or from a Ref/GetAtt/Sub to another resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn from_template(template: &Template) -> Result<Self, ResolveError> {
        let mut edges = BTreeMap::new();
        for (logical_id, resource) in &template.resources {
            let mut deps = BTreeSet::new();
            for dep in &resource.depends_on {
                if !template.resources.contains_key(dep) {
                    return Err(ResolveError::MissingDependency {
                        resource: logical_id.clone(),
                        missing: dep.clone(),
                    });
                }
                deps.insert(dep.clone());
            }
            for name in references(&resource.properties) {
                if template.resources.contains_key(&name) {
                    deps.insert(name);
                }
            }
            deps.remove(logical_id);
            edges.insert(logical_id.clone(), deps);
        }
        Ok(Self { edges })
    }

    pub fn dependencies(&self, logical_id: &str) -> impl Iterator<Item = &String> {
        self.edges.get(logical_id).into_iter().flatten()
    }

    /// true when `logical_id` waits on `other`, directly or through other resources
    pub fn depends_on(&self, logical_id: &str, other: &str) -> bool {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = vec![logical_id];
        while let Some(current) = stack.pop() {
            for dep in self.dependencies(current) {
                if dep == other {
                    return true;
                }
                if seen.insert(dep.as_str()) {
                    stack.push(dep);
                }
            }
        }
        false
    }

    /// every resource after all of its dependencies. Resources that are ready
    /// at the same time are ordered by logical id, so the order is stable.
    pub fn topological_order(&self) -> Result<Vec<String>, ResolveError> {
        let mut remaining: BTreeMap<&str, usize> = self
            .edges
            .iter()
            .map(|(id, deps)| (id.as_str(), deps.len()))
            .collect();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (id, deps) in &self.edges {
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(id.as_str());
            }
        }
        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut out = Vec::with_capacity(self.edges.len());
        while let Some(id) = ready.pop_first() {
            remaining.remove(id);
            out.push(id.to_string());
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }
        if !remaining.is_empty() {
            return Err(ResolveError::DependencyCycle(self.find_cycle(&remaining)));
        }
        Ok(out)
    }

    fn find_cycle(&self, remaining: &BTreeMap<&str, usize>) -> Vec<String> {
        // every remaining node waits on at least one other remaining node,
        // so walking those edges must eventually revisit a node
        let mut path: Vec<&str> = vec![];
        let mut current = remaining.keys().next().copied();
        while let Some(id) = current {
            if let Some(pos) = path.iter().position(|p| *p == id) {
                let mut cycle: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
                cycle.push(id.to_string());
                return cycle;
            }
            path.push(id);
            current = self
                .dependencies(id)
                .find(|d| remaining.contains_key(d.as_str()))
                .map(|d| d.as_str());
        }
        path.into_iter().map(|s| s.to_string()).collect()
    }
}
