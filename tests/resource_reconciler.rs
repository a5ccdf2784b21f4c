// tests/resource_reconciler.rs

use std::collections::HashSet;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use cloudbench::dag::Dag;
use cloudbench::errors::CloudbenchError;
use cloudbench::resource::builder::DEFAULT_NAMESPACE;
use cloudbench::resource::model::{MachineInfo, Strategy};
use cloudbench::resource::reconciler::{all_dag_nodes_status, any_dag_node_in_statuses};
use cloudbench::resource::{
    Cloud, Deployment, DeploymentBuilder, Reconciler, ResourceStatus, TreeNode, VmSpec,
};
use cloudbench::uow::{self, UnitOfWork};
use cloudbench_test_utils::builders::vm_tree;
use cloudbench_test_utils::fake_actor::FakeActor;
use cloudbench_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

const WINDOW: Duration = Duration::from_secs(600);

fn deployment() -> Result<Deployment, Box<dyn Error>> {
    let builder = DeploymentBuilder::with_default_clouds(DEFAULT_NAMESPACE, "10.3.0.0/24".parse()?);
    let vm = VmSpec {
        machine: MachineInfo::default(),
        public_ip: true,
        internal_ip: Some("10.3.0.10".to_string()),
        ssh_user: "ubuntu".to_string(),
        strategy: Strategy::PrebuiltImage {
            image_id: "postgres-16".to_string(),
        },
    };
    Ok(builder.build_vm_deployment(Cloud::Local, "run-1", vm)?)
}

fn statuses(tree: &TreeNode) -> Vec<ResourceStatus> {
    tree.resources().iter().map(|r| r.status).collect()
}

#[tokio::test]
async fn deployment_becomes_ready_once_the_remote_side_is() -> TestResult {
    init_tracing();

    let actor = Arc::new(FakeActor::pending());
    let reconciler = Reconciler::new(actor.clone(), WINDOW);
    let mut deployment = deployment()?;

    reconciler.create_deployment(&mut deployment.dag).await?;
    assert_eq!(actor.created().len(), 3);
    // Parents are created before their children.
    let kinds: Vec<_> = actor.created().iter().map(|r| r.kind.clone()).collect();
    assert_eq!(kinds, vec!["Network", "Subnet", "Instance"]);

    reconciler.process_deployment_status(&mut deployment.dag).await?;
    assert!(all_dag_nodes_status(&deployment.dag, ResourceStatus::Creating));

    actor.set_ready(true);
    reconciler.process_deployment_status(&mut deployment.dag).await?;
    assert!(all_dag_nodes_status(&deployment.dag, ResourceStatus::Ready));
    assert!(deployment.dag.all_by(|r| r.external_id.starts_with("fake-")));
    assert!(actor.deleted().is_empty());
    Ok(())
}

#[tokio::test]
async fn stuck_resources_degrade_and_are_deleted_exactly_once() -> TestResult {
    init_tracing();

    let actor = Arc::new(FakeActor::pending());
    let reconciler = Reconciler::new(actor.clone(), Duration::from_millis(1));
    let mut deployment = deployment()?;

    reconciler.create_deployment(&mut deployment.dag).await?;
    tokio::time::sleep(Duration::from_millis(20)).await;

    reconciler.process_deployment_status(&mut deployment.dag).await?;
    assert!(all_dag_nodes_status(&deployment.dag, ResourceStatus::Degraded));
    assert_eq!(actor.deleted().len(), 3);

    // Degraded resources are gone remotely; another pass must not delete again.
    reconciler.process_deployment_status(&mut deployment.dag).await?;
    assert!(all_dag_nodes_status(&deployment.dag, ResourceStatus::Degraded));
    let deleted = actor.deleted();
    let unique: HashSet<_> = deleted.iter().collect();
    assert_eq!(deleted.len(), 3);
    assert_eq!(unique.len(), 3);
    Ok(())
}

#[tokio::test]
async fn destroy_marks_destroyed_and_tolerates_missing_resources() -> TestResult {
    init_tracing();

    let actor = Arc::new(FakeActor::ready());
    let reconciler = Reconciler::new(actor.clone(), WINDOW);
    let mut deployment = deployment()?;

    reconciler.create_deployment(&mut deployment.dag).await?;
    let network = deployment.dag.nodes[0].reference.clone();
    actor.forget(&network);

    reconciler.destroy_deployment(&mut deployment.dag).await?;
    assert!(all_dag_nodes_status(&deployment.dag, ResourceStatus::Destroying));
    assert_eq!(actor.live_count(), 0);

    // Children are deleted before their parents.
    let kinds: Vec<_> = actor.deleted().iter().map(|r| r.kind.clone()).collect();
    assert_eq!(kinds, vec!["Instance", "Subnet"]);

    reconciler.process_deployment_status(&mut deployment.dag).await?;
    assert!(all_dag_nodes_status(&deployment.dag, ResourceStatus::Destroyed));
    assert!(!any_dag_node_in_statuses(
        &deployment.dag,
        &[ResourceStatus::Creating, ResourceStatus::Destroying]
    ));

    // Destroying twice is a no-op.
    reconciler.destroy_deployment(&mut deployment.dag).await?;
    assert_eq!(actor.deleted().len(), 2);
    Ok(())
}

#[tokio::test]
async fn failed_tree_creation_rolls_back_newest_first() -> TestResult {
    init_tracing();

    let actor = Arc::new(FakeActor::ready());
    actor.fail_creates_of("Instance");
    let reconciler = Reconciler::new(actor.clone(), WINDOW);
    let mut tree = vm_tree("db");

    let result = uow::with(async |uow: &mut UnitOfWork| reconciler.create_tree(&mut tree, uow).await)
        .await;
    assert!(matches!(result, Err(CloudbenchError::Actor(_))));

    let created: Vec<_> = actor.created().iter().map(|r| r.name.clone()).collect();
    assert_eq!(created, vec!["db-network", "db-subnet"]);
    let deleted: Vec<_> = actor.deleted().iter().map(|r| r.name.clone()).collect();
    assert_eq!(deleted, vec!["db-subnet", "db-network"]);
    assert_eq!(actor.live_count(), 0);
    Ok(())
}

#[tokio::test]
async fn tree_reconciles_bottom_up_and_tears_down() -> TestResult {
    init_tracing();

    let actor = Arc::new(FakeActor::pending());
    let reconciler = Reconciler::new(actor.clone(), WINDOW);
    let mut tree = vm_tree("load");

    let mut unit = UnitOfWork::new();
    reconciler.create_tree(&mut tree, &mut unit).await?;
    assert_eq!(unit.len(), 3);
    unit.commit();

    reconciler.reconcile_tree(&mut tree).await?;
    assert_eq!(statuses(&tree), vec![ResourceStatus::Creating; 3]);

    actor.set_ready(true);
    reconciler.reconcile_tree(&mut tree).await?;
    assert_eq!(statuses(&tree), vec![ResourceStatus::Ready; 3]);
    assert!(tree.is_node_and_descendants_ready());

    reconciler.stop_tree(&mut tree).await?;
    assert_eq!(statuses(&tree), vec![ResourceStatus::Destroying; 3]);

    reconciler.reconcile_tree(&mut tree).await?;
    assert_eq!(statuses(&tree), vec![ResourceStatus::Destroyed; 3]);
    assert_eq!(actor.deleted().len(), 3);
    Ok(())
}

#[tokio::test]
async fn missing_resource_is_left_alone_while_creating() -> TestResult {
    init_tracing();

    let actor = Arc::new(FakeActor::ready());
    let reconciler = Reconciler::new(actor.clone(), WINDOW);
    let mut tree = vm_tree("gone");

    let mut unit = UnitOfWork::new();
    reconciler.create_tree(&mut tree, &mut unit).await?;
    unit.commit();

    let vm = tree
        .find(|n| n.resource.reference.kind == "Instance")
        .map(|n| n.resource.reference.clone())
        .unwrap();
    actor.forget(&vm);

    reconciler.reconcile_tree(&mut tree).await?;
    // The VM stays CREATING, so its ancestors cannot become READY either.
    assert_eq!(statuses(&tree), vec![ResourceStatus::Creating; 3]);
    Ok(())
}

#[tokio::test]
async fn degraded_resources_recover_once_the_remote_side_is_ready() -> TestResult {
    init_tracing();

    let actor = Arc::new(FakeActor::ready());
    let reconciler = Reconciler::new(actor.clone(), WINDOW);
    let mut deployment = deployment()?;
    reconciler.create_deployment(&mut deployment.dag).await?;

    deployment.dag.nodes[0].status = ResourceStatus::Degraded;
    deployment.dag.nodes[1].status = ResourceStatus::Degraded;
    deployment.dag.nodes[2].status = ResourceStatus::Destroying;

    reconciler.process_deployment_status(&mut deployment.dag).await?;
    let after: Vec<_> = deployment.dag.nodes.iter().map(|r| r.status).collect();
    assert_eq!(
        after,
        vec![
            ResourceStatus::Ready,
            ResourceStatus::Ready,
            ResourceStatus::Destroying,
        ]
    );
    assert!(actor.deleted().is_empty());
    Ok(())
}

#[tokio::test]
async fn degraded_tree_node_recovers_with_its_subtree() -> TestResult {
    init_tracing();

    let actor = Arc::new(FakeActor::ready());
    let reconciler = Reconciler::new(actor.clone(), WINDOW);
    let mut tree = vm_tree("flaky");

    let mut unit = UnitOfWork::new();
    reconciler.create_tree(&mut tree, &mut unit).await?;
    unit.commit();

    let root = tree.id();
    if let Some(node) = tree.find_mut(root) {
        node.resource.status = ResourceStatus::Degraded;
    }

    reconciler.reconcile_tree(&mut tree).await?;
    assert_eq!(statuses(&tree), vec![ResourceStatus::Ready; 3]);
    Ok(())
}
