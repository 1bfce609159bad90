//! End-to-end plan behavior against scripted tools and probes.

use std::{sync::Arc, time::Duration};

use stagehand_engine::{
    Check, Plan, RunContext, RunEvent, RunSettings, Runner, Step, StepSettings,
    testing::{ScriptedProbe, ScriptedTools, SpyAction},
};
use stagehand_types::{
    EXIT_ABORTED, EXIT_PARTIAL, EXIT_SUCCESS, FailureKind, OnFailure, ReadinessState, ResourceRef, RetryPolicy, RunStatus,
    SkipReason, StepState,
};
use stagehand_util::config::StagehandConfig;

fn context() -> Arc<RunContext> {
    Arc::new(RunContext::new(
        Arc::new(StagehandConfig::default()),
        Default::default(),
        Arc::new(ScriptedTools::new()),
    ))
}

fn runner() -> Runner {
    Runner::new(RunSettings {
        step: StepSettings {
            retry: RetryPolicy::fixed(3, Duration::from_millis(1)),
            probe_timeout: Duration::from_secs(1),
        },
        ..RunSettings::default()
    })
}

/// Namespace `data` then `mongodb-secret`, each guarded by its own presence.
fn namespace_then_secret(namespace: Arc<ScriptedProbe>, secret: Arc<ScriptedProbe>) -> (Plan, Arc<SpyAction>, Arc<SpyAction>) {
    let create_namespace = SpyAction::succeeding("kubectl create namespace data");
    let create_secret = SpyAction::succeeding("kubectl create secret generic mongodb-secret -n data");
    let namespace_ref = ResourceRef::namespace("data");
    let secret_ref = ResourceRef::secret("mongodb-secret", "data");

    let plan = Plan::builder("data-plane")
        .step(
            Step::new("create-namespace", Check::present(namespace.clone(), namespace_ref.clone()))
                .precondition(Check::present(namespace, namespace_ref))
                .action(create_namespace.clone()),
        )
        .step(
            Step::new("create-secret", Check::present(secret.clone(), secret_ref.clone()))
                .precondition(Check::present(secret, secret_ref))
                .action(create_secret.clone())
                .depends_on(["create-namespace"]),
        )
        .build()
        .expect("plan");
    (plan, create_namespace, create_secret)
}

#[tokio::test]
async fn fresh_cluster_creates_namespace_before_secret() {
    let (plan, create_namespace, create_secret) = namespace_then_secret(
        ScriptedProbe::states([ReadinessState::Absent, ReadinessState::Ready]),
        ScriptedProbe::states([ReadinessState::Absent, ReadinessState::Ready]),
    );

    let report = runner().execute(&plan, context()).await;

    let order: Vec<(&str, StepState)> = report.outcomes.iter().map(|outcome| (outcome.step.as_str(), outcome.state)).collect();
    assert_eq!(
        order,
        vec![("create-namespace", StepState::Success), ("create-secret", StepState::Success)]
    );
    assert_eq!(create_namespace.invocations(), 1);
    assert_eq!(create_secret.invocations(), 1);
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.exit_code(), EXIT_SUCCESS);
}

#[tokio::test]
async fn rerun_after_success_skips_everything() {
    let (plan, create_namespace, create_secret) = namespace_then_secret(
        ScriptedProbe::always(ReadinessState::Ready),
        ScriptedProbe::always(ReadinessState::Ready),
    );

    let report = runner().execute(&plan, context()).await;

    assert!(report.outcomes.iter().all(|outcome| outcome.skip_reason == Some(SkipReason::AlreadySatisfied)));
    assert_eq!(create_namespace.invocations(), 0);
    assert_eq!(create_secret.invocations(), 0);
    assert!(report.outcomes.iter().all(|outcome| outcome.duration < Duration::from_secs(1)));
    assert_eq!(report.exit_code(), EXIT_SUCCESS);
}

#[tokio::test]
async fn unreachable_cluster_aborts_before_deploying() {
    let deploy_mongodb = SpyAction::succeeding("helm upgrade --install mongodb");
    let deploy_redis = SpyAction::succeeding("helm upgrade --install redis");
    let plan = Plan::builder("data-plane")
        .step(
            Step::new(
                "cluster-connectivity",
                Check::present(ScriptedProbe::always(ReadinessState::Pending), ResourceRef::cluster("dota2-ml")),
            )
            .on_failure(OnFailure::Abort),
        )
        .step(
            Step::new(
                "deploy-mongodb",
                Check::present(ScriptedProbe::always(ReadinessState::Ready), ResourceRef::release("mongodb", "data")),
            )
            .action(deploy_mongodb.clone()),
        )
        .step(
            Step::new(
                "deploy-redis",
                Check::present(ScriptedProbe::always(ReadinessState::Ready), ResourceRef::release("redis", "data")),
            )
            .action(deploy_redis.clone()),
        )
        .build()
        .expect("plan");

    let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();
    let report = runner().events(sender).execute(&plan, context()).await;

    let connectivity = report.outcome("cluster-connectivity").expect("outcome");
    assert_eq!(connectivity.failure, Some(FailureKind::PostconditionTimeout));
    assert_eq!(connectivity.attempts, 3);
    for step in ["deploy-mongodb", "deploy-redis"] {
        assert_eq!(report.outcome(step).and_then(|outcome| outcome.skip_reason), Some(SkipReason::PlanAborted));
    }
    assert_eq!(deploy_mongodb.invocations(), 0);
    assert_eq!(deploy_redis.invocations(), 0);
    assert_eq!(report.aborted_by.as_deref(), Some("cluster-connectivity"));
    assert_eq!(report.exit_code(), EXIT_ABORTED);

    let mut finished = Vec::new();
    let mut halted = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        match event {
            RunEvent::StepFinished(outcome) => finished.push(outcome.step),
            RunEvent::Halted { cause, remaining } => halted.push((cause, remaining)),
            RunEvent::StepStarted { .. } => {}
        }
    }
    assert_eq!(finished, vec!["cluster-connectivity".to_string()]);
    assert_eq!(halted, vec![("cluster-connectivity".to_string(), 2)]);
}

#[tokio::test]
async fn continue_failure_is_isolated_and_exits_partial() {
    let plan = Plan::builder("teardown")
        .step(
            Step::new(
                "remove-metrics-server",
                Check::gone(
                    ScriptedProbe::always(ReadinessState::Absent),
                    ResourceRef::deployment("metrics-server", "kube-system"),
                ),
            )
            .action(SpyAction::failing("kubectl delete -f components.yaml", "connection reset by peer"))
            .on_failure(OnFailure::Continue),
        )
        .step(
            Step::new(
                "delete-namespace",
                Check::gone(
                    ScriptedProbe::states([ReadinessState::Ready, ReadinessState::Absent]),
                    ResourceRef::namespace("ml-pipeline"),
                ),
            )
            .action(SpyAction::succeeding("kubectl delete namespace ml-pipeline")),
        )
        .build()
        .expect("plan");

    let report = runner().execute(&plan, context()).await;

    let metrics = report.outcome("remove-metrics-server").expect("outcome");
    assert_eq!(metrics.failure, Some(FailureKind::ActionFailed));
    assert!(report.outcome("delete-namespace").is_some_and(|outcome| outcome.is_success()));
    assert_eq!(report.status, RunStatus::Failure);
    assert_eq!(report.exit_code(), EXIT_PARTIAL);
}

#[tokio::test]
async fn failed_dependency_skips_dependents_only() {
    let plan = Plan::builder("p")
        .step(
            Step::new("flaky", Check::present(ScriptedProbe::always(ReadinessState::Failed), ResourceRef::namespace("a")))
                .on_failure(OnFailure::Continue),
        )
        .step(
            Step::new("dependent", Check::present(ScriptedProbe::always(ReadinessState::Ready), ResourceRef::namespace("b")))
                .depends_on(["flaky"]),
        )
        .step(Step::new(
            "independent",
            Check::present(ScriptedProbe::always(ReadinessState::Ready), ResourceRef::namespace("c")),
        ))
        .build()
        .expect("plan");

    let report = runner().execute(&plan, context()).await;

    let flaky = report.outcome("flaky").expect("outcome");
    assert_eq!(flaky.failure, Some(FailureKind::PostconditionFailed));
    assert_eq!(flaky.attempts, 1);
    assert_eq!(
        report.outcome("dependent").and_then(|outcome| outcome.skip_reason),
        Some(SkipReason::DependencyNotSatisfied)
    );
    assert!(report.outcome("independent").is_some_and(|outcome| outcome.is_success()));
    assert_eq!(report.exit_code(), EXIT_PARTIAL);
}

#[tokio::test]
async fn unknown_precondition_aborts_even_under_continue() {
    let tools = Arc::new(ScriptedTools::new());
    tools.not_installed("kubectl");
    let config = Arc::new(StagehandConfig::default());
    let probes = stagehand_engine::ProbeSet::new(tools.clone(), &config).expect("probes");
    let namespace = ResourceRef::namespace("jenkins");
    let action = SpyAction::succeeding("kubectl create namespace jenkins");

    let plan = Plan::builder("ci")
        .step(
            Step::new("namespace-jenkins", Check::present(probes.for_kind(namespace.kind), namespace.clone()))
                .precondition(Check::present(probes.for_kind(namespace.kind), namespace))
                .action(action.clone())
                .on_failure(OnFailure::Continue),
        )
        .step(Step::new(
            "later",
            Check::present(ScriptedProbe::always(ReadinessState::Ready), ResourceRef::namespace("x")),
        ))
        .build()
        .expect("plan");

    let context = Arc::new(RunContext::new(config, Default::default(), tools));
    let report = runner().execute(&plan, context).await;

    assert_eq!(
        report.outcome("namespace-jenkins").and_then(|outcome| outcome.failure),
        Some(FailureKind::PreconditionUnknown)
    );
    assert_eq!(action.invocations(), 0);
    assert_eq!(report.outcome("later").and_then(|outcome| outcome.skip_reason), Some(SkipReason::PlanAborted));
    assert_eq!(report.exit_code(), EXIT_ABORTED);
}

#[tokio::test]
async fn concurrent_group_joins_before_next_stage() {
    let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();
    let slow = |name: &str| {
        Step::new(
            name,
            Check::gone(
                ScriptedProbe::slow(ReadinessState::Absent, Duration::from_millis(30)),
                ResourceRef::namespace(name),
            ),
        )
        .group("namespaces")
        .on_failure(OnFailure::Continue)
    };
    let plan = Plan::builder("teardown")
        .step(slow("delete-data"))
        .step(slow("delete-jenkins"))
        .step(slow("delete-ml-pipeline"))
        .step(
            Step::new("delete-cluster", Check::gone(ScriptedProbe::always(ReadinessState::Absent), ResourceRef::cluster("dota2-ml")))
                .depends_on(["delete-data", "delete-jenkins", "delete-ml-pipeline"]),
        )
        .build()
        .expect("plan");

    let report = runner().max_parallel(2).events(sender).execute(&plan, context()).await;

    assert_eq!(report.outcomes.len(), 4);
    assert!(report.outcomes.iter().all(|outcome| outcome.is_success()));
    assert_eq!(report.outcomes.last().map(|outcome| outcome.step.as_str()), Some("delete-cluster"));

    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    let cluster_started = events
        .iter()
        .position(|event| matches!(event, RunEvent::StepStarted { step } if step == "delete-cluster"))
        .expect("cluster started");
    let group_finished = events
        .iter()
        .filter(|event| matches!(event, RunEvent::StepFinished(outcome) if outcome.step.starts_with("delete-") && outcome.step != "delete-cluster"))
        .count();
    assert_eq!(group_finished, 3);
    assert!(events[..cluster_started]
        .iter()
        .filter(|event| matches!(event, RunEvent::StepFinished(_)))
        .count()
        >= 3);
}

#[tokio::test]
async fn port_forward_leases_are_released_when_the_run_ends() {
    let tools = Arc::new(ScriptedTools::new());
    let context = Arc::new(RunContext::new(Arc::new(StagehandConfig::default()), Default::default(), tools.clone()));
    let plan = Plan::builder("ml-pipeline")
        .step(
            Step::new(
                "api-port-forward",
                Check::present(ScriptedProbe::always(ReadinessState::Ready), ResourceRef::endpoint("http://localhost:8080/health")),
            )
            .action(Arc::new(stagehand_engine::PortForward::new("svc/dota2-predictor", "ml-pipeline", 8080, 80))),
        )
        .step(
            Step::new(
                "api-health",
                Check::present(ScriptedProbe::always(ReadinessState::Failed), ResourceRef::endpoint("http://localhost:8080/health")),
            )
            .depends_on(["api-port-forward"]),
        )
        .build()
        .expect("plan");

    let report = runner().execute(&plan, context.clone()).await;

    assert_eq!(report.exit_code(), EXIT_ABORTED);
    assert_eq!(tools.calls_matching("kubectl --context kind-dota2-ml port-forward"), 1);
    assert_eq!(tools.released(), 1);
    assert!(context.leases.is_empty().await);
}
