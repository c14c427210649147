// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end tests of the resolve/generate/execute pipeline against the
//! in-memory mock backends

use camino::Utf8Path;
use camino_tempfile::Utf8TempDir;
use sdc_clients::MockSdc;
use sdcadm_common::SdcadmError;
use sdcadm_types::Change;
use sdcadm_types::ChangeKind;
use sdcadm_types::ImageRef;
use sdcadm_types::InstanceRef;
use sdcadm_types::PlanFile;
use sdcadm_types::ServiceType;
use sdcadm_update::coordinator;
use sdcadm_update::coordinator::ExecOptions;
use sdcadm_update::generate;
use sdcadm_update::generate::Policy;
use sdcadm_update::history::HistoryFilter;
use sdcadm_update::history::HistoryStore;
use sdcadm_update::resolve;
use sdcadm_update::resolve::ResolveOptions;
use sdcadm_update::rollback;
use sdcadm_update::topology::Topology;
use sdcadm_update::ExecContext;
use sdcadm_update::SdcadmConfig;
use slog::o;
use slog::Drain;
use slog::Logger;
use uuid::Uuid;

fn test_logger() -> Logger {
    let decorator =
        slog_term::PlainDecorator::new(slog_term::TestStdoutWriter);
    let drain =
        std::sync::Mutex::new(slog_term::FullFormat::new(decorator).build())
            .fuse();
    Logger::root(drain, o!())
}

fn test_config(run_dir: &Utf8Path) -> SdcadmConfig {
    SdcadmConfig {
        run_dir: run_dir.to_path_buf(),
        poll_interval_ms: 1,
        task_timeout_ms: 5_000,
        job_timeout_ms: 5_000,
        vm_timeout_ms: 5_000,
        ..SdcadmConfig::default()
    }
}

struct TestEnv {
    mock: MockSdc,
    ctx: ExecContext,
    history: HistoryStore,
    _run_dir: Utf8TempDir,
}

impl TestEnv {
    fn new() -> TestEnv {
        let run_dir = Utf8TempDir::new().unwrap();
        let log = test_logger();
        let mock = MockSdc::new();
        let config = test_config(run_dir.path());
        let history = HistoryStore::new(config.history_dir(), &log);
        let ctx =
            ExecContext { clients: mock.clients(), config, log };
        TestEnv { mock, ctx, history, _run_dir: run_dir }
    }

    async fn topology(&self) -> Topology {
        Topology::load(&self.ctx.log, &self.ctx.clients).await.unwrap()
    }

    async fn resolve(&self, args: &[&str]) -> Vec<Change> {
        let args: Vec<String> =
            args.iter().map(|s| s.to_string()).collect();
        resolve::resolve_changes(
            &self.ctx.log,
            &args,
            &ResolveOptions::default(),
            &self.topology().await,
            &self.ctx.clients,
        )
        .await
        .unwrap()
    }

    async fn execute(
        &self,
        plan: &sdcadm_update::Plan,
    ) -> Result<Option<Uuid>, SdcadmError> {
        coordinator::execute_plan(
            &self.ctx,
            plan,
            &self.history,
            &ExecOptions { dry_run: false, username: "test".to_string() },
        )
        .await
    }
}

fn image_ref(image: &sdc_clients::Image) -> ImageRef {
    ImageRef {
        uuid: image.uuid,
        name: image.name.clone(),
        version: image.version.clone(),
    }
}

fn service_ref(service: &sdc_clients::Service) -> sdcadm_types::ServiceRef {
    sdcadm_types::ServiceRef {
        name: service.name.clone(),
        uuid: service.uuid,
        service_type: service.service_type,
    }
}

#[tokio::test]
async fn test_create_instances_change_provisions_on_named_servers() {
    let env = TestEnv::new();
    let v1 = env.mock.add_local_image("myapp", "1.0.0");
    let service =
        env.mock.add_service("myapp", ServiceType::Vm, Some(v1.uuid));
    let server_a = env.mock.add_server("cn0");
    let server_b = env.mock.add_server("cn1");
    env.mock.add_instance(service.uuid, server_a.uuid, v1.uuid);

    let change = Change {
        kind: ChangeKind::CreateInstances,
        service: service_ref(&service),
        image: Some(image_ref(&v1)),
        prior_image: None,
        instance: None,
        insts: vec![
            sdcadm_types::InstanceAssignment {
                server: Some(server_a.uuid),
                service: "myapp".to_string(),
                image: v1.uuid,
                instance: None,
            },
            sdcadm_types::InstanceAssignment {
                server: Some(server_b.uuid),
                service: "myapp".to_string(),
                image: v1.uuid,
                instance: None,
            },
        ],
    };
    let plan = generate::gen_plan(
        &env.ctx.log,
        vec![change],
        &env.topology().await,
        &Policy::default(),
    )
    .unwrap();

    let creates: Vec<_> = plan
        .procs
        .iter()
        .filter(|p| p.kind() == "CreateInstanceProcedure")
        .collect();
    assert_eq!(creates.len(), 2);
    // aliases continue the existing numbering
    assert!(creates.iter().any(|p| p.summarize().contains("\"myapp1\"")));
    assert!(creates.iter().any(|p| p.summarize().contains("\"myapp2\"")));

    env.execute(&plan).await.unwrap();
    let topology = env.topology().await;
    assert_eq!(topology.instances_of(service.uuid).len(), 3);
}

#[tokio::test]
async fn test_delete_instance_change_removes_the_instance() {
    let env = TestEnv::new();
    let v1 = env.mock.add_local_image("myapp", "1.0.0");
    let service =
        env.mock.add_service("myapp", ServiceType::Vm, Some(v1.uuid));
    let server = env.mock.add_server("cn0");
    let keep = env.mock.add_instance(service.uuid, server.uuid, v1.uuid);
    let doomed = env.mock.add_instance(service.uuid, server.uuid, v1.uuid);

    let change = Change {
        kind: ChangeKind::DeleteInstance,
        service: service_ref(&service),
        image: None,
        prior_image: None,
        instance: Some(InstanceRef {
            uuid: doomed.uuid,
            service: "myapp".to_string(),
            server: Some(server.uuid),
        }),
        insts: Vec::new(),
    };
    let plan = generate::gen_plan(
        &env.ctx.log,
        vec![change],
        &env.topology().await,
        &Policy::default(),
    )
    .unwrap();
    assert_eq!(plan.procs.len(), 1);
    assert_eq!(plan.procs[0].kind(), "DeleteInstanceProcedure");

    env.execute(&plan).await.unwrap();
    let topology = env.topology().await;
    assert!(topology.instance(doomed.uuid).is_none());
    assert!(topology.instance(keep.uuid).is_some());
}

#[tokio::test]
async fn test_remove_services_deletes_instances_and_agents() {
    use sdcadm_update::procedures::Procedure;
    use sdcadm_update::procedures::RemoveServicesProcedure;

    let env = TestEnv::new();
    let vm_image = env.mock.add_local_image("oldapp", "1.0.0");
    let agent_image = env.mock.add_local_image("old-agent", "1.0.0");
    let vm_service =
        env.mock.add_service("oldapp", ServiceType::Vm, Some(vm_image.uuid));
    let agent_service = env.mock.add_service(
        "old-agent",
        ServiceType::Agent,
        Some(agent_image.uuid),
    );
    let server = env.mock.add_server("cn0");
    env.mock.add_instance(vm_service.uuid, server.uuid, vm_image.uuid);
    env.mock.add_server_agent(server.uuid, "old-agent", agent_image.uuid);

    let proc = RemoveServicesProcedure {
        services: vec![service_ref(&vm_service), service_ref(&agent_service)],
        servers: vec![server.uuid],
        allow_empty_servers: false,
    };
    proc.execute(&env.ctx).await.unwrap();

    let topology = env.topology().await;
    assert!(topology.service(vm_service.uuid).is_none());
    assert!(topology.service(agent_service.uuid).is_none());
    assert!(topology.instances_of(vm_service.uuid).is_empty());
    assert_eq!(
        env.mock.server_agent_image(server.uuid, "old-agent"),
        None
    );
}

#[tokio::test]
async fn test_remove_agents_refuses_empty_server_selection() {
    use sdcadm_update::procedures::Procedure;
    use sdcadm_update::procedures::RemoveServicesProcedure;

    let env = TestEnv::new();
    let agent_image = env.mock.add_local_image("old-agent", "1.0.0");
    let agent_service = env.mock.add_service(
        "old-agent",
        ServiceType::Agent,
        Some(agent_image.uuid),
    );

    let proc = RemoveServicesProcedure {
        services: vec![service_ref(&agent_service)],
        servers: Vec::new(),
        allow_empty_servers: false,
    };
    let error = proc.execute(&env.ctx).await.unwrap_err();
    assert!(matches!(error, SdcadmError::Validation(_)));

    let allowed = RemoveServicesProcedure {
        services: vec![service_ref(&agent_service)],
        servers: Vec::new(),
        allow_empty_servers: true,
    };
    allowed.execute(&env.ctx).await.unwrap();
    assert!(env.topology().await.service(agent_service.uuid).is_none());
}

#[tokio::test]
async fn test_up_to_date_service_yields_empty_plan() {
    let env = TestEnv::new();
    let v1 = env.mock.add_local_image("myapp", "1.0.0");
    let service =
        env.mock.add_service("myapp", ServiceType::Vm, Some(v1.uuid));
    let server = env.mock.add_server("cn0");
    env.mock.add_instance(service.uuid, server.uuid, v1.uuid);

    let changes = env.resolve(&["myapp"]).await;
    let plan = generate::gen_plan(
        &env.ctx.log,
        changes,
        &env.topology().await,
        &Policy::default(),
    )
    .unwrap();

    assert!(plan.is_noop());
    let result = env.execute(&plan).await.unwrap();
    assert!(result.is_none());
    // no lock taken, no history written, nothing imported
    assert!(!env.ctx.config.lock_path().exists());
    assert!(env
        .history
        .list(&HistoryFilter::default())
        .unwrap()
        .is_empty());
    assert!(env.mock.imports().is_empty());
}

#[tokio::test]
async fn test_update_service_reprovisions_stale_instances_only() {
    let env = TestEnv::new();
    let v1 = env.mock.add_local_image("myapp", "1.0.0");
    let v2 = env.mock.add_remote_image("myapp", "2.0.0");
    let service =
        env.mock.add_service("myapp", ServiceType::Vm, Some(v1.uuid));
    let server = env.mock.add_server("cn0");
    let stale = env.mock.add_instance(service.uuid, server.uuid, v1.uuid);
    let fresh = env.mock.add_instance(service.uuid, server.uuid, v2.uuid);

    let changes = env.resolve(&["myapp"]).await;
    let plan = generate::gen_plan(
        &env.ctx.log,
        changes,
        &env.topology().await,
        &Policy::default(),
    )
    .unwrap();

    // download first, then one grouped update covering only the stale
    // instance
    assert_eq!(plan.procs.len(), 2);
    assert_eq!(plan.procs[0].kind(), "DownloadImages");
    assert_eq!(plan.procs[1].kind(), "UpdateStatelessServiceV1");
    assert!(plan.procs[1].summarize().contains("1 instance"));

    let record = env.execute(&plan).await.unwrap();
    assert!(record.is_some());
    assert_eq!(env.mock.instance_image(stale.uuid), Some(v2.uuid));
    assert_eq!(env.mock.instance_image(fresh.uuid), Some(v2.uuid));
    assert_eq!(env.mock.imports(), vec![v2.uuid]);
    assert!(!env.ctx.config.lock_path().exists());

    // history finalized with no error
    let records = env.history.list(&HistoryFilter::default()).unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].is_finished());
    assert!(records[0].error.is_none());
}

#[tokio::test]
async fn test_force_same_image_includes_current_instances() {
    let env = TestEnv::new();
    let v1 = env.mock.add_local_image("myapp", "1.0.0");
    let service =
        env.mock.add_service("myapp", ServiceType::Vm, Some(v1.uuid));
    let server = env.mock.add_server("cn0");
    env.mock.add_instance(service.uuid, server.uuid, v1.uuid);
    env.mock.add_instance(service.uuid, server.uuid, v1.uuid);

    let changes = env.resolve(&["myapp"]).await;
    let topology = env.topology().await;

    let plan = generate::gen_plan(
        &env.ctx.log,
        changes.clone(),
        &topology,
        &Policy::default(),
    )
    .unwrap();
    assert!(plan.is_noop());

    let forced = generate::gen_plan(
        &env.ctx.log,
        changes,
        &topology,
        &Policy { force_same_image: true, ..Policy::default() },
    )
    .unwrap();
    assert!(!forced.is_noop());
    let update = forced
        .procs
        .iter()
        .find(|p| p.kind() == "UpdateStatelessServiceV1")
        .unwrap();
    // both instances reinstalled onto the image they already run
    assert!(update.summarize().contains("2 instances"));
    assert!(update.summarize().contains(&v1.uuid.to_string()));
}

#[tokio::test]
async fn test_procedures_run_in_fixed_service_order() {
    let env = TestEnv::new();
    let server = env.mock.add_server("cn0");
    for name in ["myapp", "moray", "binder"] {
        let v1 = env.mock.add_local_image(name, "1.0.0");
        env.mock.add_remote_image(name, "2.0.0");
        let service =
            env.mock.add_service(name, ServiceType::Vm, Some(v1.uuid));
        env.mock.add_instance(service.uuid, server.uuid, v1.uuid);
    }

    // argument order deliberately scrambled
    let changes = env.resolve(&["myapp", "moray", "binder"]).await;
    let plan = generate::gen_plan(
        &env.ctx.log,
        changes,
        &env.topology().await,
        &Policy::default(),
    )
    .unwrap();

    let kinds: Vec<_> = plan.procs.iter().map(|p| p.kind()).collect();
    assert_eq!(kinds[0], "DownloadImages");
    let order: Vec<usize> = ["binder", "moray", "myapp"]
        .iter()
        .map(|name| {
            plan.procs
                .iter()
                .position(|p| p.summarize().contains(name))
                .unwrap()
        })
        .collect();
    assert!(order[0] < order[1]);
    assert!(order[1] < order[2]);
}

#[tokio::test]
async fn test_sensitive_services_require_force_flags() {
    let env = TestEnv::new();
    let v1 = env.mock.add_local_image("rabbitmq", "1.0.0");
    env.mock.add_remote_image("rabbitmq", "2.0.0");
    let service =
        env.mock.add_service("rabbitmq", ServiceType::Vm, Some(v1.uuid));
    let server = env.mock.add_server("cn0");
    env.mock.add_instance(service.uuid, server.uuid, v1.uuid);

    let changes = env.resolve(&["rabbitmq"]).await;
    let topology = env.topology().await;

    let error = generate::gen_plan(
        &env.ctx.log,
        changes.clone(),
        &topology,
        &Policy::default(),
    )
    .unwrap_err();
    assert!(matches!(error, SdcadmError::Validation(_)));
    assert!(error.to_string().contains("--force-rabbitmq"));

    let plan = generate::gen_plan(
        &env.ctx.log,
        changes,
        &topology,
        &Policy { force_rabbitmq: true, ..Policy::default() },
    )
    .unwrap();
    assert!(!plan.is_noop());
}

#[tokio::test]
async fn test_minimum_image_version_gate() {
    let env = TestEnv::new();
    let old = env.mock.add_local_image("sapi", "release-20130101-0001");
    let target = env.mock.add_remote_image("sapi", "release-20140101-0001");
    let service =
        env.mock.add_service("sapi", ServiceType::Vm, Some(old.uuid));
    let server = env.mock.add_server("cn0");
    env.mock.add_instance(service.uuid, server.uuid, old.uuid);

    let changes =
        env.resolve(&[&format!("sapi@{}", target.uuid)]).await;
    let topology = env.topology().await;

    let error = generate::gen_plan(
        &env.ctx.log,
        changes.clone(),
        &topology,
        &Policy::default(),
    )
    .unwrap_err();
    assert!(error.to_string().contains("--force-bypass-min-image"));

    let plan = generate::gen_plan(
        &env.ctx.log,
        changes,
        &topology,
        &Policy { force_bypass_min_image: true, ..Policy::default() },
    )
    .unwrap();
    assert!(!plan.is_noop());
}

#[tokio::test]
async fn test_minimum_image_version_gate_ignores_mixed_formats() {
    let env = TestEnv::new();
    let old = env.mock.add_local_image("binder", "release-20160101-0001");
    env.mock.add_remote_image("binder", "2.0.0");
    let service =
        env.mock.add_service("binder", ServiceType::Vm, Some(old.uuid));
    let server = env.mock.add_server("cn0");
    env.mock.add_instance(service.uuid, server.uuid, old.uuid);

    // A semver-versioned target has no order against the build-stamp
    // minimum and must not be rejected as "older".
    let changes = env.resolve(&["binder"]).await;
    let plan = generate::gen_plan(
        &env.ctx.log,
        changes,
        &env.topology().await,
        &Policy::default(),
    )
    .unwrap();
    assert!(!plan.is_noop());
}

#[tokio::test]
async fn test_agent_update_bounds_concurrency_and_refreshes_sysinfo() {
    let env = TestEnv::new();
    let v1 = env.mock.add_local_image("cn-agent", "1.0.0");
    env.mock.add_remote_image("cn-agent", "2.0.0");
    env.mock.add_service("cn-agent", ServiceType::Agent, Some(v1.uuid));
    let mut servers = Vec::new();
    for i in 0..6 {
        let server = env.mock.add_server(&format!("cn{}", i));
        env.mock.add_server_agent(server.uuid, "cn-agent", v1.uuid);
        servers.push(server);
    }

    let changes = env.resolve(&["cn-agent"]).await;
    let plan = generate::gen_plan(
        &env.ctx.log,
        changes,
        &env.topology().await,
        &Policy { agent_concurrency: 2, ..Policy::default() },
    )
    .unwrap();
    env.execute(&plan).await.unwrap();

    assert!(env.mock.max_inflight_installs() <= 2);
    let mut refreshed = env.mock.sysinfo_refreshes();
    refreshed.sort();
    let mut expected: Vec<Uuid> =
        servers.iter().map(|s| s.uuid).collect();
    expected.sort();
    assert_eq!(refreshed, expected);
    for server in &servers {
        assert_eq!(
            env.mock.server_agent_image(server.uuid, "cn-agent"),
            env.mock.imports().first().copied(),
        );
    }
}

#[tokio::test]
async fn test_agent_update_collects_per_server_failures() {
    let env = TestEnv::new();
    let v1 = env.mock.add_local_image("cn-agent", "1.0.0");
    let v2 = env.mock.add_remote_image("cn-agent", "2.0.0");
    env.mock.add_service("cn-agent", ServiceType::Agent, Some(v1.uuid));
    let mut servers = Vec::new();
    for i in 0..5 {
        let server = env.mock.add_server(&format!("cn{}", i));
        env.mock.add_server_agent(server.uuid, "cn-agent", v1.uuid);
        servers.push(server);
    }
    let bad = &servers[2];
    env.mock.fail_installs_on(bad.uuid);

    let changes = env.resolve(&["cn-agent"]).await;
    let plan = generate::gen_plan(
        &env.ctx.log,
        changes,
        &env.topology().await,
        &Policy::default(),
    )
    .unwrap();
    let error = env.execute(&plan).await.unwrap_err();

    // exactly the one failing server is named; the other four finished
    assert!(error.to_string().contains("1 error(s)"));
    assert!(error.to_string().contains(&bad.uuid.to_string()));
    for server in &servers {
        let expected = if server.uuid == bad.uuid { v1.uuid } else { v2.uuid };
        assert_eq!(
            env.mock.server_agent_image(server.uuid, "cn-agent"),
            Some(expected),
        );
    }
    let refreshed = env.mock.sysinfo_refreshes();
    assert_eq!(refreshed.len(), 4);
    assert!(!refreshed.contains(&bad.uuid));
    assert!(!env.ctx.config.lock_path().exists());

    // history finalized with the error recorded
    let records = env.history.list(&HistoryFilter::default()).unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].is_finished());
    assert!(records[0].error.as_deref().unwrap().contains("error"));
}

#[tokio::test]
async fn test_execution_refused_while_lock_held() {
    let env = TestEnv::new();
    let v1 = env.mock.add_local_image("myapp", "1.0.0");
    env.mock.add_remote_image("myapp", "2.0.0");
    let service =
        env.mock.add_service("myapp", ServiceType::Vm, Some(v1.uuid));
    let server = env.mock.add_server("cn0");
    let instance =
        env.mock.add_instance(service.uuid, server.uuid, v1.uuid);

    let changes = env.resolve(&["myapp"]).await;
    let plan = generate::gen_plan(
        &env.ctx.log,
        changes,
        &env.topology().await,
        &Policy::default(),
    )
    .unwrap();

    let _guard = sdcadm_update::lock::acquire(
        &env.ctx.config.lock_path(),
        "somebody-else",
        &env.ctx.log,
    )
    .unwrap();

    let error = env.execute(&plan).await.unwrap_err();
    assert!(error.to_string().contains("another operation is in progress"));
    assert!(error.to_string().contains("somebody-else"));
    // nothing ran, nothing was recorded
    assert_eq!(env.mock.instance_image(instance.uuid), Some(v1.uuid));
    assert!(env
        .history
        .list(&HistoryFilter::default())
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_dry_run_mutates_nothing() {
    let env = TestEnv::new();
    let v1 = env.mock.add_local_image("myapp", "1.0.0");
    env.mock.add_remote_image("myapp", "2.0.0");
    let service =
        env.mock.add_service("myapp", ServiceType::Vm, Some(v1.uuid));
    let server = env.mock.add_server("cn0");
    let instance =
        env.mock.add_instance(service.uuid, server.uuid, v1.uuid);

    let changes = env.resolve(&["myapp"]).await;
    let plan = generate::gen_plan(
        &env.ctx.log,
        changes,
        &env.topology().await,
        &Policy::default(),
    )
    .unwrap();

    let result = coordinator::execute_plan(
        &env.ctx,
        &plan,
        &env.history,
        &ExecOptions { dry_run: true, username: "test".to_string() },
    )
    .await
    .unwrap();

    assert!(result.is_none());
    assert_eq!(env.mock.instance_image(instance.uuid), Some(v1.uuid));
    assert!(env.mock.imports().is_empty());
    assert!(!env.ctx.config.lock_path().exists());
    assert!(env
        .history
        .list(&HistoryFilter::default())
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_plan_file_roundtrip_preserves_changes_and_order() {
    let env = TestEnv::new();
    let server = env.mock.add_server("cn0");
    for name in ["binder", "myapp"] {
        let v1 = env.mock.add_local_image(name, "1.0.0");
        env.mock.add_remote_image(name, "2.0.0");
        let service =
            env.mock.add_service(name, ServiceType::Vm, Some(v1.uuid));
        env.mock.add_instance(service.uuid, server.uuid, v1.uuid);
    }

    let changes = env.resolve(&["myapp", "binder"]).await;
    let plan = generate::gen_plan(
        &env.ctx.log,
        changes,
        &env.topology().await,
        &Policy::default(),
    )
    .unwrap();

    let path = plan.save(&env.ctx.config.updates_dir()).unwrap();
    let loaded = sdcadm_update::Plan::load_file(&path).unwrap();

    assert_eq!(loaded.changes, plan.changes);
    let summaries: Vec<String> =
        plan.procs.iter().map(|p| p.summarize()).collect();
    let loaded_summaries: Vec<String> =
        loaded.procs.iter().map(|p| p.summary.clone()).collect();
    assert_eq!(loaded_summaries, summaries);
}

#[tokio::test]
async fn test_rollback_requires_force() {
    let env = TestEnv::new();
    let plan_file = PlanFile::new(Vec::new(), Vec::new());
    let error = rollback::gen_rollback_plan(
        &env.ctx.log,
        &plan_file,
        &env.ctx.clients,
        false,
    )
    .await
    .unwrap_err();
    assert!(error.is_usage());
    assert!(error.to_string().contains("migrations"));
    assert!(error.to_string().contains("version dependencies"));
    // the refusal happens before any backend is consulted
    assert_eq!(env.mock.list_calls(), 0);
    assert!(!env.ctx.config.lock_path().exists());
}

#[tokio::test]
async fn test_rollback_reinstalls_prior_images() {
    let env = TestEnv::new();
    let v1 = env.mock.add_local_image("myapp", "1.0.0");
    let v2 = env.mock.add_remote_image("myapp", "2.0.0");
    let service =
        env.mock.add_service("myapp", ServiceType::Vm, Some(v1.uuid));
    let server = env.mock.add_server("cn0");
    let instance =
        env.mock.add_instance(service.uuid, server.uuid, v1.uuid);

    // forward update to v2
    let changes = env.resolve(&["myapp"]).await;
    let plan = generate::gen_plan(
        &env.ctx.log,
        changes,
        &env.topology().await,
        &Policy::default(),
    )
    .unwrap();
    let path = plan.save(&env.ctx.config.updates_dir()).unwrap();
    env.execute(&plan).await.unwrap();
    assert_eq!(env.mock.instance_image(instance.uuid), Some(v2.uuid));

    // roll back to v1
    let plan_file = sdcadm_update::Plan::load_file(&path).unwrap();
    let rollback_plan = rollback::gen_rollback_plan(
        &env.ctx.log,
        &plan_file,
        &env.ctx.clients,
        true,
    )
    .await
    .unwrap();
    env.execute(&rollback_plan).await.unwrap();
    assert_eq!(env.mock.instance_image(instance.uuid), Some(v1.uuid));

    // one history record per executed plan
    let records = env.history.list(&HistoryFilter::default()).unwrap();
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn test_rollback_fails_when_instance_is_gone() {
    let env = TestEnv::new();
    let v1 = env.mock.add_local_image("myapp", "1.0.0");
    let v2 = env.mock.add_local_image("myapp", "2.0.0");
    let service =
        env.mock.add_service("myapp", ServiceType::Vm, Some(v2.uuid));
    let server = env.mock.add_server("cn0");
    env.mock.add_instance(service.uuid, server.uuid, v2.uuid);

    let missing = Uuid::new_v4();
    let plan_file = PlanFile::new(
        vec![Change {
            kind: ChangeKind::UpdateInstance,
            service: service_ref(&service),
            image: Some(image_ref(&v2)),
            prior_image: Some(image_ref(&v1)),
            instance: Some(InstanceRef {
                uuid: missing,
                service: service.name.clone(),
                server: Some(server.uuid),
            }),
            insts: Vec::new(),
        }],
        Vec::new(),
    );

    let error = rollback::gen_rollback_plan(
        &env.ctx.log,
        &plan_file,
        &env.ctx.clients,
        true,
    )
    .await
    .unwrap_err();
    assert!(matches!(error, SdcadmError::SdcClient { .. }));
    assert!(error.to_string().contains(&missing.to_string()));
}

#[tokio::test]
async fn test_rollback_fails_without_recorded_prior_image() {
    let env = TestEnv::new();
    let v2 = env.mock.add_local_image("myapp", "2.0.0");
    let service =
        env.mock.add_service("myapp", ServiceType::Vm, Some(v2.uuid));
    let server = env.mock.add_server("cn0");
    env.mock.add_instance(service.uuid, server.uuid, v2.uuid);

    let plan_file = PlanFile::new(
        vec![Change {
            kind: ChangeKind::UpdateService,
            service: service_ref(&service),
            image: Some(image_ref(&v2)),
            prior_image: None,
            instance: None,
            insts: Vec::new(),
        }],
        Vec::new(),
    );

    let error = rollback::gen_rollback_plan(
        &env.ctx.log,
        &plan_file,
        &env.ctx.clients,
        true,
    )
    .await
    .unwrap_err();
    assert!(error.to_string().contains("no prior image"));
}

#[tokio::test]
async fn test_failed_reprovision_finalizes_history_with_error() {
    let env = TestEnv::new();
    let v1 = env.mock.add_local_image("myapp", "1.0.0");
    env.mock.add_remote_image("myapp", "2.0.0");
    let service =
        env.mock.add_service("myapp", ServiceType::Vm, Some(v1.uuid));
    let server = env.mock.add_server("cn0");
    let instance =
        env.mock.add_instance(service.uuid, server.uuid, v1.uuid);
    env.mock.fail_reprovision_on(instance.uuid);

    let changes = env.resolve(&["myapp"]).await;
    let plan = generate::gen_plan(
        &env.ctx.log,
        changes,
        &env.topology().await,
        &Policy::default(),
    )
    .unwrap();
    let error = env.execute(&plan).await.unwrap_err();
    assert!(error.to_string().contains("failed"));

    let records = env.history.list(&HistoryFilter::default()).unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].is_finished());
    assert!(records[0].error.is_some());
    // lock released even on the failure path, and the temporary
    // replacement instance torn down
    assert!(!env.ctx.config.lock_path().exists());
    assert_eq!(env.topology().await.instances_of(service.uuid).len(), 1);
}

#[tokio::test]
async fn test_download_skips_images_already_present() {
    let env = TestEnv::new();
    let v1 = env.mock.add_local_image("myapp", "1.0.0");
    let v2 = env.mock.add_local_image("myapp", "2.0.0");
    let service =
        env.mock.add_service("myapp", ServiceType::Vm, Some(v1.uuid));
    let server = env.mock.add_server("cn0");
    env.mock.add_instance(service.uuid, server.uuid, v1.uuid);

    let changes = env.resolve(&[&format!("myapp@{}", v2.uuid)]).await;
    let plan = generate::gen_plan(
        &env.ctx.log,
        changes,
        &env.topology().await,
        &Policy::default(),
    )
    .unwrap();
    env.execute(&plan).await.unwrap();
    assert!(env.mock.imports().is_empty());
}

#[tokio::test]
async fn test_just_images_downloads_without_touching_instances() {
    let env = TestEnv::new();
    let v1 = env.mock.add_local_image("myapp", "1.0.0");
    let v2 = env.mock.add_remote_image("myapp", "2.0.0");
    let service =
        env.mock.add_service("myapp", ServiceType::Vm, Some(v1.uuid));
    let server = env.mock.add_server("cn0");
    let instance =
        env.mock.add_instance(service.uuid, server.uuid, v1.uuid);

    let changes = env.resolve(&["myapp"]).await;
    let plan = generate::gen_plan(
        &env.ctx.log,
        changes,
        &env.topology().await,
        &Policy { just_images: true, ..Policy::default() },
    )
    .unwrap();

    assert_eq!(plan.procs.len(), 1);
    assert_eq!(plan.procs[0].kind(), "DownloadImages");
    env.execute(&plan).await.unwrap();
    assert_eq!(env.mock.imports(), vec![v2.uuid]);
    assert_eq!(env.mock.instance_image(instance.uuid), Some(v1.uuid));
}

#[tokio::test]
async fn test_update_stands_up_replacement_before_reprovision() {
    let env = TestEnv::new();
    let v1 = env.mock.add_local_image("myapp", "1.0.0");
    let v2 = env.mock.add_remote_image("myapp", "2.0.0");
    let service =
        env.mock.add_service("myapp", ServiceType::Vm, Some(v1.uuid));
    let server = env.mock.add_server("cn0");
    let instance =
        env.mock.add_instance(service.uuid, server.uuid, v1.uuid);

    let changes = env.resolve(&["myapp"]).await;
    let plan = generate::gen_plan(
        &env.ctx.log,
        changes,
        &env.topology().await,
        &Policy::default(),
    )
    .unwrap();
    env.execute(&plan).await.unwrap();

    // one temporary instance carried the load during the swap and is gone
    // again afterwards
    assert_eq!(
        env.mock.created_aliases(),
        vec!["myapp-tmp0".to_string()]
    );
    assert_eq!(env.topology().await.instances_of(service.uuid).len(), 1);
    assert_eq!(env.mock.instance_image(instance.uuid), Some(v2.uuid));
}

// A procedure that rips the lock file out from under the run and then
// fails, so both the execution and the subsequent lock release go wrong.
struct FailWithVanishedLock {
    lock_path: camino::Utf8PathBuf,
}

#[async_trait::async_trait]
impl sdcadm_update::procedures::Procedure for FailWithVanishedLock {
    fn kind(&self) -> &'static str {
        "FailWithVanishedLock"
    }

    fn summarize(&self) -> String {
        "fail while the lock file vanishes".to_string()
    }

    async fn execute(
        &self,
        _ctx: &ExecContext,
    ) -> Result<(), SdcadmError> {
        std::fs::remove_file(&self.lock_path).unwrap();
        Err(SdcadmError::update("provisioning backend unavailable"))
    }
}

#[tokio::test]
async fn test_lock_release_failure_does_not_mask_execution_error() {
    let env = TestEnv::new();
    let plan = sdcadm_update::Plan {
        procs: vec![Box::new(FailWithVanishedLock {
            lock_path: env.ctx.config.lock_path(),
        })],
        changes: Vec::new(),
    };

    let error = env.execute(&plan).await.unwrap_err();
    assert!(error.to_string().contains("provisioning backend unavailable"));
    assert!(!error.to_string().contains("lock"));

    // the run was still finalized with its own error
    let records = env.history.list(&HistoryFilter::default()).unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].is_finished());
    assert!(records[0]
        .error
        .as_deref()
        .unwrap()
        .contains("unavailable"));
}

#[derive(Clone)]
struct MessageCapture(std::sync::Arc<std::sync::Mutex<Vec<String>>>);

impl Drain for MessageCapture {
    type Ok = ();
    type Err = slog::Never;

    fn log(
        &self,
        record: &slog::Record<'_>,
        _values: &slog::OwnedKVList,
    ) -> Result<(), slog::Never> {
        self.0.lock().unwrap().push(record.msg().to_string());
        Ok(())
    }
}

#[tokio::test]
async fn test_dry_run_reports_completion() {
    let env = TestEnv::new();
    let v1 = env.mock.add_local_image("myapp", "1.0.0");
    env.mock.add_remote_image("myapp", "2.0.0");
    let service =
        env.mock.add_service("myapp", ServiceType::Vm, Some(v1.uuid));
    let server = env.mock.add_server("cn0");
    env.mock.add_instance(service.uuid, server.uuid, v1.uuid);

    let changes = env.resolve(&["myapp"]).await;
    let plan = generate::gen_plan(
        &env.ctx.log,
        changes,
        &env.topology().await,
        &Policy::default(),
    )
    .unwrap();

    let messages =
        std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let ctx = ExecContext {
        clients: env.ctx.clients.clone(),
        config: env.ctx.config.clone(),
        log: Logger::root(
            MessageCapture(std::sync::Arc::clone(&messages)),
            o!(),
        ),
    };
    coordinator::execute_plan(
        &ctx,
        &plan,
        &env.history,
        &ExecOptions { dry_run: true, username: "test".to_string() },
    )
    .await
    .unwrap();

    let messages = messages.lock().unwrap();
    assert!(messages.iter().any(|m| m.contains("would execute")));
    assert!(messages.last().unwrap().contains("dry run complete"));
}

