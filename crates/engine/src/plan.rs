//! Plans: steps arranged into dependency-ordered stages.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use stagehand_types::PlanKind;
use stagehand_util::config::Credentials;
use thiserror::Error;

use crate::step::Step;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("duplicate step identifier detected: '{step}'")]
    DuplicateStep { step: String },

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("step '{step}' cannot depend on itself")]
    SelfDependency { step: String },

    #[error("step '{step}' depends on '{dependency}' but both belong to concurrent group '{group}'")]
    IntraGroupDependency { step: String, dependency: String, group: String },

    #[error("cycle detected in plan steps involving: {}", steps.join(", "))]
    Cycle { steps: Vec<String> },
}

/// Unit of sequential execution.
#[derive(Debug, Clone)]
pub enum Stage {
    Single(Step),
    /// Members run concurrently and are joined before the next stage starts.
    Group { name: String, steps: Vec<Step> },
}

impl Stage {
    pub fn steps(&self) -> &[Step] {
        match self {
            Stage::Single(step) => std::slice::from_ref(step),
            Stage::Group { steps, .. } => steps,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Stage::Single(step) => step.name(),
            Stage::Group { name, .. } => name,
        }
    }
}

/// Ordered, validated collection of steps for one goal.
#[derive(Debug, Clone)]
pub struct Plan {
    name: String,
    description: Option<String>,
    kind: PlanKind,
    required_credentials: Vec<String>,
    stages: Vec<Stage>,
}

impl Plan {
    pub fn builder(name: impl Into<String>) -> PlanBuilder {
        PlanBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn kind(&self) -> PlanKind {
        self.kind
    }

    pub fn required_credentials(&self) -> &[String] {
        &self.required_credentials
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Steps in execution order.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.stages.iter().flat_map(Stage::steps)
    }

    pub fn step_count(&self) -> usize {
        self.stages.iter().map(|stage| stage.steps().len()).sum()
    }

    /// Required credentials the configuration does not provide.
    pub fn missing_credentials(&self, credentials: &Credentials) -> Vec<String> {
        credentials.missing(&self.required_credentials)
    }
}

/// Collects steps in declaration order and orders them on [`PlanBuilder::build`].
#[derive(Debug, Clone)]
pub struct PlanBuilder {
    name: String,
    description: Option<String>,
    kind: PlanKind,
    required_credentials: Vec<String>,
    steps: Vec<Step>,
}

impl PlanBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            kind: PlanKind::Provision,
            required_credentials: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn kind(mut self, kind: PlanKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn require_credentials<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            if !self.required_credentials.contains(&name) {
                self.required_credentials.push(name);
            }
        }
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps.extend(steps);
        self
    }

    /// Validate dependencies and arrange steps into stages.
    ///
    /// Members of a group collapse into one node; a stage is emitted once every node it depends on
    /// has been emitted. Ties keep declaration order.
    pub fn build(self) -> Result<Plan, PlanError> {
        let mut nodes: IndexMap<String, Vec<Step>> = IndexMap::new();
        let mut node_of_step: HashMap<String, usize> = HashMap::new();

        for step in self.steps {
            if node_of_step.contains_key(step.name()) {
                return Err(PlanError::DuplicateStep {
                    step: step.name().to_string(),
                });
            }
            let key = match step.group_name() {
                Some(group) => format!("group:{group}"),
                None => format!("step:{}", step.name()),
            };
            let entry = nodes.entry(key);
            let index = entry.index();
            node_of_step.insert(step.name().to_string(), index);
            entry.or_default().push(step);
        }

        let mut in_degrees = vec![0usize; nodes.len()];
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        let mut seen_edges = HashSet::new();

        for (index, steps) in nodes.values().enumerate() {
            for step in steps {
                for dependency in step.dependencies() {
                    let Some(&dependency_index) = node_of_step.get(dependency) else {
                        return Err(PlanError::UnknownDependency {
                            step: step.name().to_string(),
                            dependency: dependency.clone(),
                        });
                    };
                    if dependency == step.name() {
                        return Err(PlanError::SelfDependency {
                            step: step.name().to_string(),
                        });
                    }
                    if dependency_index == index {
                        return Err(PlanError::IntraGroupDependency {
                            step: step.name().to_string(),
                            dependency: dependency.clone(),
                            group: step.group_name().unwrap_or_default().to_string(),
                        });
                    }
                    if seen_edges.insert((dependency_index, index)) {
                        in_degrees[index] += 1;
                        adjacency[dependency_index].push(index);
                    }
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..nodes.len()).filter(|index| in_degrees[*index] == 0).collect();
        let mut ordered = Vec::with_capacity(nodes.len());
        while let Some(index) = queue.pop_front() {
            ordered.push(index);
            for &child in &adjacency[index] {
                in_degrees[child] -= 1;
                if in_degrees[child] == 0 {
                    queue.push_back(child);
                }
            }
        }

        if ordered.len() != nodes.len() {
            let mut steps: Vec<String> = nodes
                .values()
                .enumerate()
                .filter(|(index, _)| in_degrees[*index] > 0)
                .flat_map(|(_, steps)| steps.iter().map(|step| step.name().to_string()))
                .collect();
            steps.sort();
            return Err(PlanError::Cycle { steps });
        }

        let mut slots: Vec<Option<(String, Vec<Step>)>> = nodes.into_iter().map(Some).collect();
        let stages = ordered
            .into_iter()
            .filter_map(|index| slots[index].take())
            .map(|(key, mut steps)| match key.strip_prefix("group:") {
                Some(group) => Stage::Group {
                    name: group.to_string(),
                    steps,
                },
                None => Stage::Single(steps.remove(0)),
            })
            .collect();

        Ok(Plan {
            name: self.name,
            description: self.description,
            kind: self.kind,
            required_credentials: self.required_credentials,
            stages,
        })
    }
}

#[cfg(test)]
mod tests {
    use stagehand_types::{ReadinessState, ResourceRef};

    use super::*;
    use crate::{check::Check, testing::ScriptedProbe};

    fn step(name: &str) -> Step {
        Step::new(name, Check::present(ScriptedProbe::always(ReadinessState::Ready), ResourceRef::namespace(name)))
    }

    fn stage_labels(plan: &Plan) -> Vec<&str> {
        plan.stages().iter().map(Stage::label).collect()
    }

    #[test]
    fn respects_dependencies_declared_out_of_order() {
        let plan = Plan::builder("demo")
            .step(step("second").depends_on(["first"]))
            .step(step("first"))
            .build()
            .expect("plan");
        assert_eq!(stage_labels(&plan), vec!["first", "second"]);
    }

    #[test]
    fn collapses_groups_into_one_stage() {
        let plan = Plan::builder("teardown")
            .step(step("uninstall"))
            .step(step("delete-data").group("namespaces").depends_on(["uninstall"]))
            .step(step("delete-jenkins").group("namespaces").depends_on(["uninstall"]))
            .step(step("delete-cluster").depends_on(["delete-data", "delete-jenkins"]))
            .build()
            .expect("plan");

        assert_eq!(stage_labels(&plan), vec!["uninstall", "namespaces", "delete-cluster"]);
        assert_eq!(plan.stages()[1].steps().len(), 2);
        assert_eq!(plan.step_count(), 4);
    }

    #[test]
    fn rejects_unknown_self_and_duplicate() {
        let unknown = Plan::builder("p").step(step("only").depends_on(["missing"])).build();
        assert!(matches!(unknown, Err(PlanError::UnknownDependency { .. })));

        let itself = Plan::builder("p").step(step("loop").depends_on(["loop"])).build();
        assert!(matches!(itself, Err(PlanError::SelfDependency { .. })));

        let duplicate = Plan::builder("p").step(step("a")).step(step("a")).build();
        assert_eq!(duplicate.unwrap_err(), PlanError::DuplicateStep { step: "a".into() });
    }

    #[test]
    fn rejects_dependencies_inside_a_group() {
        let error = Plan::builder("p")
            .step(step("a").group("g"))
            .step(step("b").group("g").depends_on(["a"]))
            .build()
            .expect_err("intra-group");
        assert!(error.to_string().contains("concurrent group 'g'"));
    }

    #[test]
    fn reports_cycles() {
        let error = Plan::builder("p")
            .step(step("first").depends_on(["second"]))
            .step(step("second").depends_on(["first"]))
            .build()
            .expect_err("cycle");
        assert_eq!(
            error,
            PlanError::Cycle {
                steps: vec!["first".into(), "second".into()]
            }
        );
    }

    #[test]
    fn deduplicates_required_credentials() {
        let plan = Plan::builder("data-plane")
            .require_credentials(["mongodb_username", "mongodb_password"])
            .require_credentials(["mongodb_password"])
            .step(step("ns"))
            .build()
            .expect("plan");
        assert_eq!(plan.required_credentials(), ["mongodb_username", "mongodb_password"]);

        let mut credentials = Credentials::new();
        credentials.insert("mongodb_username", "admin");
        temp_env::with_var("STAGEHAND_MONGODB_PASSWORD", None::<&str>, || {
            assert_eq!(plan.missing_credentials(&credentials), vec!["mongodb_password".to_string()]);
        });
    }
}
