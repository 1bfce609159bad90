//! Plan documents: authored YAML or JSON plans turned into executable ones.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use stagehand_types::{CheckDefinition, PlanDefinition, ResourceKind, plan::validation::validate_plan_definition};

use crate::{
    actions::action_from_definition,
    check::Check,
    plan::Plan,
    probe::ProbeSet,
    step::Step,
};

/// Parse a plan document; `.json` files are JSON, everything else YAML.
pub fn parse_plan_document(path: &Path) -> Result<PlanDefinition> {
    let content = fs::read_to_string(path).with_context(|| format!("read plan document {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
    let definition: PlanDefinition = if is_json {
        serde_json::from_str(&content).with_context(|| format!("parse plan document {}", path.display()))?
    } else {
        serde_yaml::from_str(&content).with_context(|| format!("parse plan document {}", path.display()))?
    };
    validate_plan_definition(&definition).with_context(|| format!("invalid plan document {}", path.display()))?;
    Ok(definition)
}

/// Build an executable plan from a validated definition.
pub fn plan_from_definition(definition: &PlanDefinition, probes: &ProbeSet) -> Result<Plan> {
    let mut builder = Plan::builder(&definition.plan)
        .kind(definition.kind)
        .require_credentials(definition.required_credentials.iter().cloned());
    if let Some(description) = &definition.description {
        builder = builder.describe(description);
    }

    for step_definition in &definition.steps {
        let mut step = Step::new(&step_definition.id, check_from_definition(&step_definition.postcondition, probes))
            .on_failure(step_definition.on_failure)
            .depends_on(step_definition.depends_on.iter().cloned());
        if let Some(description) = &step_definition.description {
            step = step.describe(description);
        }
        if let Some(precondition) = &step_definition.precondition {
            step = step.precondition(check_from_definition(precondition, probes));
        }
        if let Some(action) = &step_definition.action {
            let action = action_from_definition(action).with_context(|| format!("step '{}'", step_definition.id))?;
            step = step.action(action);
        }
        if let Some(retry) = &step_definition.retry {
            step = step.retry(retry.clone());
        }
        if let Some(decision) = step_definition.prompt_default {
            step = step.prompt_default(decision);
        }
        if let Some(budget) = step_definition.budget {
            step = step.budget(budget);
        }
        if let Some(group) = &step_definition.group {
            step = step.group(group);
        }
        builder = builder.step(step);
    }

    Ok(builder.build()?)
}

/// Parse, validate, and build a plan document in one go.
pub fn load_plan_document(path: &Path, probes: &ProbeSet) -> Result<Plan> {
    let definition = parse_plan_document(path)?;
    plan_from_definition(&definition, probes)
}

fn check_from_definition(definition: &CheckDefinition, probes: &ProbeSet) -> Check {
    let probe = if definition.resource.kind == ResourceKind::Endpoint {
        probes.endpoint_accepting(&definition.accept_status)
    } else {
        probes.for_kind(definition.resource.kind)
    };
    Check::with_expectation(probe, definition.resource.clone(), definition.expect)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use stagehand_types::{Expectation, OnFailure, PlanKind};
    use stagehand_util::config::StagehandConfig;

    use super::*;
    use crate::{plan::Stage, testing::ScriptedTools};

    const DOCUMENT: &str = r#"
plan: cleanup
kind: teardown
steps:
  - id: delete-ml-pipeline
    group: namespaces
    on_failure: continue
    precondition: { kind: namespace, name: ml-pipeline, expect: gone }
    action:
      strip_finalizers: { namespace: ml-pipeline }
    postcondition: { kind: namespace, name: ml-pipeline, expect: gone }
  - id: delete-data
    group: namespaces
    on_failure: continue
    action:
      run: kubectl --context ${{ kube_context }} delete namespace data --wait=false
    postcondition: { kind: namespace, name: data, expect: gone }
  - id: delete-cluster
    depends_on: [delete-ml-pipeline, delete-data]
    budget: 5m
    action:
      run: kind delete cluster --name ${{ cluster }}
    postcondition: { kind: cluster, name: dota2-ml, expect: gone }
"#;

    fn probes() -> ProbeSet {
        ProbeSet::new(Arc::new(ScriptedTools::new()), &StagehandConfig::default()).expect("probes")
    }

    #[test]
    fn loads_yaml_document_into_staged_plan() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("cleanup.yaml");
        fs::write(&path, DOCUMENT).unwrap();

        let plan = load_plan_document(&path, &probes()).expect("plan");
        assert_eq!(plan.name(), "cleanup");
        assert_eq!(plan.kind(), PlanKind::Teardown);
        assert_eq!(plan.stages().len(), 2);
        assert!(matches!(&plan.stages()[0], Stage::Group { name, steps } if name == "namespaces" && steps.len() == 2));

        let first = plan.steps().next().expect("step");
        assert_eq!(first.policy(), OnFailure::Continue);
        assert_eq!(first.postcondition().expectation(), Expectation::Gone);
        assert!(first.has_action());
    }

    #[test]
    fn loads_json_documents() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("check.json");
        fs::write(
            &path,
            r#"{"plan": "api", "steps": [{"id": "health", "postcondition": {"kind": "endpoint", "name": "http://localhost:8080/health", "accept_status": [200]}}]}"#,
        )
        .unwrap();
        let plan = load_plan_document(&path, &probes()).expect("plan");
        assert_eq!(plan.step_count(), 1);
    }

    #[test]
    fn rejects_documents_with_cycles_or_bad_fields() {
        let directory = tempfile::tempdir().unwrap();
        let cyclic = directory.path().join("cyclic.yaml");
        fs::write(
            &cyclic,
            "plan: loop\nsteps:\n  - id: a\n    depends_on: [b]\n    postcondition: { kind: namespace, name: a }\n  - id: b\n    depends_on: [a]\n    postcondition: { kind: namespace, name: b }\n",
        )
        .unwrap();
        let error = load_plan_document(&cyclic, &probes()).expect_err("cycle");
        assert!(format!("{error:#}").contains("cycle detected"));

        let invalid = directory.path().join("invalid.yaml");
        fs::write(&invalid, "plan: Bad Name\nsteps: []\n").unwrap();
        let error = load_plan_document(&invalid, &probes()).expect_err("invalid");
        assert!(format!("{error:#}").contains("invalid plan identifier"));
    }
}
