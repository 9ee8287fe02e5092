use crate::component::Priority;
use crate::registry::ComponentRegistry;
use std::collections::{BTreeSet, HashMap};
use tracing::{error, warn};

/// Result of resolving the dependency graph
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Startup order; cycle members are placed once everything ahead of them is
    pub order: Vec<String>,
    /// Components on a dependency cycle, started in name order
    pub cyclic: Vec<String>,
    /// `(component, dependency)` pairs naming unregistered dependencies
    pub unknown: Vec<(String, String)>,
}

impl Resolution {
    pub fn position(&self, name: &str) -> Option<usize> {
        self.order.iter().position(|n| n == name)
    }
}

/// Order components with Kahn's algorithm
///
/// The ready set is ordered by `(priority, name)`, so the same registry always yields the
/// same order. Unknown dependencies are ignored with a warning. Components on a cycle are
/// logged and released together in name order rather than rejected; components that
/// depend on a cycle still come after all of its members.
pub fn resolve(registry: &ComponentRegistry) -> Resolution {
    resolve_graph(registry.dependency_graph())
}

pub fn resolve_graph(graph: Vec<(String, Priority, Vec<String>)>) -> Resolution {
    let priorities: HashMap<String, Priority> = graph
        .iter()
        .map(|(name, priority, _)| (name.clone(), *priority))
        .collect();

    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut unknown = Vec::new();

    for (name, _, dependencies) in &graph {
        in_degree.entry(name.as_str()).or_insert(0);
        let known: BTreeSet<&str> = dependencies
            .iter()
            .filter_map(|dep| {
                if priorities.contains_key(dep) {
                    Some(dep.as_str())
                } else {
                    warn!("Component '{}' depends on unknown component '{}'", name, dep);
                    unknown.push((name.clone(), dep.clone()));
                    None
                }
            })
            .collect();

        for dep in known {
            *in_degree.entry(name.as_str()).or_insert(0) += 1;
            dependents.entry(dep).or_default().push(name.as_str());
        }
    }

    let mut ready: BTreeSet<(Priority, &str)> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| (priorities[*name], *name))
        .collect();

    let mut order = Vec::with_capacity(graph.len());
    drain_ready(&mut ready, &mut in_degree, &dependents, &priorities, &mut order);

    let blocked: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree > 0)
        .map(|(name, _)| *name)
        .collect();
    let cyclic: Vec<String> = blocked
        .iter()
        .filter(|name| on_cycle(name, &blocked, &dependents))
        .map(|name| name.to_string())
        .collect();

    if !cyclic.is_empty() {
        error!(
            "Circular dependency detected among components: {:?}; starting them unordered",
            cyclic
        );
        // Release the cycle members so their dependents keep their ordering
        for member in &cyclic {
            order.push(member.clone());
            in_degree.remove(member.as_str());
        }
        for member in &cyclic {
            release(member, &mut ready, &mut in_degree, &dependents, &priorities);
        }
        drain_ready(&mut ready, &mut in_degree, &dependents, &priorities, &mut order);
    }

    Resolution {
        order,
        cyclic,
        unknown,
    }
}

fn drain_ready<'a>(
    ready: &mut BTreeSet<(Priority, &'a str)>,
    in_degree: &mut HashMap<&'a str, usize>,
    dependents: &HashMap<&'a str, Vec<&'a str>>,
    priorities: &HashMap<String, Priority>,
    order: &mut Vec<String>,
) {
    while let Some((_, name)) = ready.pop_first() {
        order.push(name.to_string());
        in_degree.remove(name);
        release(name, ready, in_degree, dependents, priorities);
    }
}

/// Count `name` as started for each of its dependents
fn release<'a>(
    name: &str,
    ready: &mut BTreeSet<(Priority, &'a str)>,
    in_degree: &mut HashMap<&'a str, usize>,
    dependents: &HashMap<&'a str, Vec<&'a str>>,
    priorities: &HashMap<String, Priority>,
) {
    let Some(children) = dependents.get(name) else {
        return;
    };
    for child in children {
        if let Some(degree) = in_degree.get_mut(child) {
            *degree = degree.saturating_sub(1);
            if *degree == 0 {
                ready.insert((priorities[*child], *child));
            }
        }
    }
}

/// Whether `name` can reach itself through blocked components
fn on_cycle(name: &str, blocked: &BTreeSet<&str>, dependents: &HashMap<&str, Vec<&str>>) -> bool {
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut stack: Vec<&str> = dependents.get(name).cloned().unwrap_or_default();
    while let Some(next) = stack.pop() {
        if next == name {
            return true;
        }
        if !blocked.contains(next) || !seen.insert(next) {
            continue;
        }
        if let Some(children) = dependents.get(next) {
            stack.extend(children.iter().copied());
        }
    }
    false
}
