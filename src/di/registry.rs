use super::{BeanDescriptor, Cardinality, Contract, ScopeKind};
use crate::error::{BeanstalkError, Result};
use std::any::TypeId;
use std::collections::{HashMap, HashSet};

/// Immutable catalog of bean descriptors.
///
/// Built once at boot by [`Registry::load`], which validates the whole model
/// up front so that no lookup can later discover a structural problem.
#[derive(Debug)]
pub struct Registry {
    descriptors: Vec<BeanDescriptor>,
    by_type: HashMap<TypeId, Vec<usize>>,
}

impl Registry {
    /// Loads and validates a descriptor set.
    ///
    /// # Errors
    /// - `Model` for structurally invalid descriptors
    /// - `UnsatisfiedDependency` / `AmbiguousDependency` for unresolvable edges
    /// - `CyclicDependency` for a cycle made only of transient beans
    /// - `ProxyUnsupported` for a lazy singleton on a cycle without a proxy
    pub fn load(descriptors: impl IntoIterator<Item = BeanDescriptor>) -> Result<Self> {
        let descriptors: Vec<BeanDescriptor> = descriptors.into_iter().collect();
        let mut by_type: HashMap<TypeId, Vec<usize>> = HashMap::new();
        for (index, descriptor) in descriptors.iter().enumerate() {
            by_type
                .entry(descriptor.contract().type_id())
                .or_default()
                .push(index);
        }

        let registry = Self {
            descriptors,
            by_type,
        };
        registry.check_structure()?;
        registry.check_dependencies()?;
        registry.check_cycles()?;

        tracing::debug!(
            "Bean registry loaded ({} descriptors, {} contract types)",
            registry.descriptors.len(),
            registry.by_type.len()
        );
        Ok(registry)
    }

    /// Returns every descriptor satisfying `contract`, in registration order.
    pub fn find(&self, contract: &Contract) -> Vec<&BeanDescriptor> {
        self.matches(contract)
            .into_iter()
            .map(|index| &self.descriptors[index])
            .collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BeanDescriptor> {
        self.descriptors.iter()
    }

    pub(crate) fn matches(&self, contract: &Contract) -> Vec<usize> {
        self.by_type
            .get(&contract.type_id())
            .map(|indices| {
                indices
                    .iter()
                    .copied()
                    .filter(|&index| contract.is_satisfied_by(self.descriptors[index].contract()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn descriptor(&self, index: usize) -> &BeanDescriptor {
        &self.descriptors[index]
    }

    pub(crate) fn indices(&self) -> std::ops::Range<usize> {
        0..self.descriptors.len()
    }

    pub(crate) fn names(&self, indices: &[usize]) -> Vec<String> {
        indices
            .iter()
            .map(|&index| self.descriptors[index].name().to_string())
            .collect()
    }

    pub(crate) fn describe_chain(&self, chain: &[usize]) -> String {
        self.names(chain).join(" -> ")
    }

    fn check_structure(&self) -> Result<()> {
        let mut qualified = HashSet::new();
        for descriptor in &self.descriptors {
            let contract = descriptor.contract();
            if contract.qualifier().is_some() && !qualified.insert(contract.clone()) {
                return Err(BeanstalkError::model(format!(
                    "more than one bean is registered as {}",
                    contract
                )));
            }

            if descriptor.scope() == ScopeKind::Transient {
                if descriptor.is_proxiable() {
                    return Err(BeanstalkError::model(format!(
                        "transient bean '{}' cannot declare a lazy proxy",
                        descriptor.name()
                    )));
                }
                if descriptor.is_eager() {
                    return Err(BeanstalkError::model(format!(
                        "transient bean '{}' cannot be eager",
                        descriptor.name()
                    )));
                }
                if descriptor.has_destroy_hook() || descriptor.is_auto_close() {
                    tracing::warn!(
                        "Transient bean '{}' declares teardown hooks that will never run",
                        descriptor.name()
                    );
                }
            }
        }
        Ok(())
    }

    fn check_dependencies(&self) -> Result<()> {
        for descriptor in &self.descriptors {
            for dependency in descriptor.dependencies() {
                let contract = dependency.contract();
                let matches = self.matches(contract);
                match (dependency.cardinality(), matches.len()) {
                    (Cardinality::Single, 0) => {
                        return Err(BeanstalkError::UnsatisfiedDependency {
                            contract: contract.to_string(),
                            required_by: Some(descriptor.name().to_string()),
                        });
                    }
                    (Cardinality::Single | Cardinality::Optional, n) if n > 1 => {
                        return Err(BeanstalkError::AmbiguousDependency {
                            contract: contract.to_string(),
                            candidates: self.names(&matches),
                        });
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Construction edges: bean -> every bean that may be resolved while
    /// building it. Deferred edges are resolved after construction and are
    /// left out.
    fn edges(&self, index: usize) -> Vec<usize> {
        self.descriptors[index]
            .dependencies()
            .iter()
            .filter(|dependency| !dependency.is_deferred())
            .flat_map(|dependency| self.matches(dependency.contract()))
            .collect()
    }

    fn check_cycles(&self) -> Result<()> {
        let graph: Vec<Vec<usize>> = self.indices().map(|index| self.edges(index)).collect();

        // A cycle of transients can never terminate: no stored instance exists
        // that could stand in for a bean still under construction.
        let transient_graph: Vec<Vec<usize>> = graph
            .iter()
            .enumerate()
            .map(|(index, targets)| {
                if self.descriptors[index].scope() != ScopeKind::Transient {
                    return Vec::new();
                }
                targets
                    .iter()
                    .copied()
                    .filter(|&target| self.descriptors[target].scope() == ScopeKind::Transient)
                    .collect()
            })
            .collect();
        if let Some(cycle) = find_cycle(&transient_graph) {
            return Err(BeanstalkError::CyclicDependency {
                cycle: self.describe_chain(&cycle),
            });
        }

        // Every singleton on a cycle may be the one revisited first, depending
        // on where a lookup enters the cycle, so each must be proxiable.
        for component in strongly_connected(&graph) {
            let cyclic = component.len() > 1 || graph[component[0]].contains(&component[0]);
            if !cyclic {
                continue;
            }
            if let Some(&offender) = component.iter().find(|&&index| {
                let descriptor = &self.descriptors[index];
                descriptor.scope() == ScopeKind::LazySingleton && !descriptor.is_proxiable()
            }) {
                let mut cycle = component.clone();
                cycle.push(component[0]);
                return Err(BeanstalkError::ProxyUnsupported {
                    bean: self.descriptors[offender].name().to_string(),
                    cycle: self.describe_chain(&cycle),
                });
            }
            tracing::debug!(
                "Construction cycle among [{}] will be broken by lazy proxies",
                self.names(&component).join(", ")
            );
        }
        Ok(())
    }
}

/// Finds one cycle in `graph`, returned as a closed path (first node repeated
/// at the end).
fn find_cycle(graph: &[Vec<usize>]) -> Option<Vec<usize>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        OnPath,
        Done,
    }

    fn visit(
        node: usize,
        graph: &[Vec<usize>],
        marks: &mut [Mark],
        path: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        marks[node] = Mark::OnPath;
        path.push(node);
        for &next in &graph[node] {
            match marks[next] {
                Mark::OnPath => {
                    let start = path.iter().position(|&n| n == next).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(next);
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(next, graph, marks, path) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }
        path.pop();
        marks[node] = Mark::Done;
        None
    }

    let mut marks = vec![Mark::Unvisited; graph.len()];
    let mut path = Vec::new();
    for node in 0..graph.len() {
        if marks[node] == Mark::Unvisited {
            if let Some(cycle) = visit(node, graph, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

/// Tarjan's strongly connected components.
fn strongly_connected(graph: &[Vec<usize>]) -> Vec<Vec<usize>> {
    struct Tarjan<'g> {
        graph: &'g [Vec<usize>],
        next_index: usize,
        index: Vec<Option<usize>>,
        lowlink: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        components: Vec<Vec<usize>>,
    }

    impl Tarjan<'_> {
        fn connect(&mut self, node: usize) {
            self.index[node] = Some(self.next_index);
            self.lowlink[node] = self.next_index;
            self.next_index += 1;
            self.stack.push(node);
            self.on_stack[node] = true;

            for &next in &self.graph[node] {
                match self.index[next] {
                    None => {
                        self.connect(next);
                        self.lowlink[node] = self.lowlink[node].min(self.lowlink[next]);
                    }
                    Some(next_index) if self.on_stack[next] => {
                        self.lowlink[node] = self.lowlink[node].min(next_index);
                    }
                    Some(_) => {}
                }
            }

            if Some(self.lowlink[node]) == self.index[node] {
                let mut component = Vec::new();
                while let Some(member) = self.stack.pop() {
                    self.on_stack[member] = false;
                    component.push(member);
                    if member == node {
                        break;
                    }
                }
                component.sort_unstable();
                self.components.push(component);
            }
        }
    }

    let mut tarjan = Tarjan {
        graph,
        next_index: 0,
        index: vec![None; graph.len()],
        lowlink: vec![0; graph.len()],
        on_stack: vec![false; graph.len()],
        stack: Vec::new(),
        components: Vec::new(),
    };
    for node in 0..graph.len() {
        if tarjan.index[node].is_none() {
            tarjan.connect(node);
        }
    }
    tarjan.components
}
