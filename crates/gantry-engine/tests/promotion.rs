//! End-to-end promotion scenarios against in-memory clusters.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use gantry_api::{JobSpec, ProjectImageBuildConfiguration, PromotionConfiguration};
use gantry_cluster::fakes::FakeCluster;
use gantry_cluster::{
    ClusterClient, ImageStream, ImageStreamStatus, NamedTagEventList, ObjectKey, ObjectMeta,
    Secret, TagEvent,
};
use gantry_engine::{PromotionStep, Step, StepContext};

const REGISTRY: &str = "registry.svc.ci.example.com";

fn job_spec() -> Arc<JobSpec> {
    Arc::new(JobSpec {
        namespace: "ci-op-1234".to_string(),
        ..JobSpec::default()
    })
}

fn image(to: &str, optional: bool) -> ProjectImageBuildConfiguration {
    ProjectImageBuildConfiguration {
        to: to.to_string(),
        optional,
        ..ProjectImageBuildConfiguration::default()
    }
}

fn pipeline_with_tags(tags: &[&str]) -> ImageStream {
    ImageStream {
        meta: ObjectMeta::named("ci-op-1234", "pipeline"),
        status: ImageStreamStatus {
            public_docker_image_repository: format!("{REGISTRY}/ci-op-1234/pipeline"),
            tags: tags
                .iter()
                .map(|tag| NamedTagEventList {
                    tag: tag.to_string(),
                    items: vec![TagEvent {
                        docker_image_reference: format!(
                            "docker-registry.default.svc:5000/ci-op-1234/pipeline@sha256:{tag}"
                        ),
                        image: format!("sha256:{tag}"),
                    }],
                })
                .collect(),
            ..ImageStreamStatus::default()
        },
        ..ImageStream::default()
    }
}

fn step_with(
    config: PromotionConfiguration,
    images: Vec<ProjectImageBuildConfiguration>,
    required: &[&str],
    src: Arc<FakeCluster>,
    dst: Arc<FakeCluster>,
    push_secret: Option<Secret>,
    image_creator: Option<Arc<FakeCluster>>,
) -> PromotionStep {
    PromotionStep::new(
        config,
        images,
        required.iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
        src,
        dst,
        job_spec(),
        push_secret,
        image_creator.map(|c| c as Arc<dyn gantry_cluster::ClusterClient>),
        REGISTRY,
    )
}

#[tokio::test]
async fn in_cluster_promotion_to_a_named_stream() {
    let src = Arc::new(FakeCluster::new("build01"));
    let dst = Arc::new(FakeCluster::new("central"));
    src.seed_image_stream(pipeline_with_tags(&["foo", "bar", "baz"]));

    let step = step_with(
        PromotionConfiguration {
            namespace: "ocp".to_string(),
            name: "4.6".to_string(),
            ..PromotionConfiguration::default()
        },
        vec![image("foo", false), image("bar", true), image("baz", false)],
        &["bar"],
        src,
        dst.clone(),
        None,
        None,
    );

    step.run(&StepContext::new()).await.unwrap();

    let stream = dst
        .image_stream(&ObjectKey::new("ocp", "4.6"))
        .expect("destination stream created");
    let mut tags: Vec<String> = stream.spec.tags.iter().map(|t| t.name.clone()).collect();
    tags.sort();
    assert_eq!(tags, vec!["bar", "baz", "foo"]);
    for tag in &stream.spec.tags {
        assert!(tag
            .from
            .as_ref()
            .unwrap()
            .name
            .contains("ci-op-1234/pipeline@sha256:"));
    }
}

#[tokio::test]
async fn name_prefix_rewrites_destinations() {
    let src = Arc::new(FakeCluster::new("build01"));
    let dst = Arc::new(FakeCluster::new("central"));
    src.seed_image_stream(pipeline_with_tags(&["foo", "bar", "baz"]));

    let step = step_with(
        PromotionConfiguration {
            namespace: "ocp".to_string(),
            name: "4.6".to_string(),
            name_prefix: "some".to_string(),
            ..PromotionConfiguration::default()
        },
        vec![image("foo", false), image("bar", true), image("baz", false)],
        &["bar"],
        src,
        dst.clone(),
        None,
        None,
    );

    step.run(&StepContext::new()).await.unwrap();

    let stream = dst.image_stream(&ObjectKey::new("ocp", "4.6")).unwrap();
    let mut tags: Vec<String> = stream.spec.tags.iter().map(|t| t.name.clone()).collect();
    tags.sort();
    assert_eq!(tags, vec!["somebar", "somebaz", "somefoo"]);
}

#[tokio::test]
async fn per_stream_promotion_by_tag() {
    let src = Arc::new(FakeCluster::new("build01"));
    let dst = Arc::new(FakeCluster::new("central"));
    src.seed_image_stream(pipeline_with_tags(&["foo"]));

    let step = step_with(
        PromotionConfiguration {
            namespace: "roger".to_string(),
            tag: "fred".to_string(),
            ..PromotionConfiguration::default()
        },
        vec![image("foo", false)],
        &[],
        src,
        dst.clone(),
        None,
        None,
    );

    step.run(&StepContext::new()).await.unwrap();

    let stream = dst
        .image_stream(&ObjectKey::new("roger", "foo"))
        .expect("per-component stream created");
    assert!(stream.spec.lookup_policy_local);
    let tag = dst
        .image_stream_tag(&ObjectKey::new("roger", "foo:fred"))
        .expect("tag created");
    assert_eq!(tag.tag.unwrap().name, "fred");
}

#[tokio::test]
async fn promotion_survives_update_conflicts() {
    let src = Arc::new(FakeCluster::new("build01"));
    let dst = Arc::new(FakeCluster::new("central"));
    src.seed_image_stream(pipeline_with_tags(&["foo"]));
    dst.seed_image_stream(ImageStream {
        meta: ObjectMeta::named("ocp", "4.6"),
        ..ImageStream::default()
    });
    dst.force_update_conflicts(3);

    let step = step_with(
        PromotionConfiguration {
            namespace: "ocp".to_string(),
            name: "4.6".to_string(),
            ..PromotionConfiguration::default()
        },
        vec![image("foo", false)],
        &[],
        src,
        dst.clone(),
        None,
        None,
    );

    step.run(&StepContext::new()).await.unwrap();
    let stream = dst.image_stream(&ObjectKey::new("ocp", "4.6")).unwrap();
    assert_eq!(stream.spec.tags.len(), 1);
}

#[tokio::test]
async fn push_secret_promotion_spawns_one_mirror_pod() {
    let src = Arc::new(FakeCluster::new("build01"));
    let dst = Arc::new(FakeCluster::new("central"));
    let image_creator = Arc::new(FakeCluster::new("creator"));
    // Only two of the three sources exist in the pipeline status.
    src.seed_image_stream(pipeline_with_tags(&["foo", "bar"]));

    let step = step_with(
        PromotionConfiguration {
            namespace: "ocp".to_string(),
            name: "4.6".to_string(),
            ..PromotionConfiguration::default()
        },
        vec![image("foo", false), image("bar", false), image("missing", false)],
        &[],
        src.clone(),
        dst,
        Some(Secret::default()),
        Some(image_creator.clone()),
    );

    step.run(&StepContext::new()).await.unwrap();

    // Namespace and destination stream were ensured on the creator cluster.
    assert!(image_creator.get_namespace("ocp").await.is_ok());
    assert!(image_creator
        .image_stream(&ObjectKey::new("ocp", "4.6"))
        .is_some());

    let pods = src.submitted_pods();
    assert_eq!(pods.len(), 1);
    let pod = &pods[0];
    assert_eq!(pod.meta.name, "promotion");
    assert_eq!(pod.meta.namespace, "ci-op-1234");

    let args = &pod.spec.containers[0].args[0];
    let commands: Vec<&str> = args.split(" && ").collect();
    assert_eq!(commands.len(), 2, "one mirror command per present tag");
    // Lexicographic order of the public source pull specs.
    let mut sorted = commands.clone();
    sorted.sort();
    assert_eq!(commands, sorted);
    for command in commands {
        assert!(command.starts_with(
            "oc image mirror --registry-config=/etc/push-secret/.dockerconfigjson"
        ));
        // Internal registry host was rewritten to the public hostname.
        assert!(command.contains(&format!("{REGISTRY}/ci-op-1234/pipeline@sha256:")));
        assert!(!command.contains("docker-registry.default.svc:5000"));
    }
}

#[tokio::test]
async fn push_secret_without_image_creator_client_is_an_error() {
    let src = Arc::new(FakeCluster::new("build01"));
    let dst = Arc::new(FakeCluster::new("central"));
    src.seed_image_stream(pipeline_with_tags(&["foo"]));

    let step = step_with(
        PromotionConfiguration {
            namespace: "ocp".to_string(),
            name: "4.6".to_string(),
            ..PromotionConfiguration::default()
        },
        vec![image("foo", false)],
        &[],
        src,
        dst,
        Some(Secret::default()),
        None,
    );

    let err = step.run(&StepContext::new()).await.unwrap_err();
    assert!(err.to_string().contains("image-creator client"));
}

#[tokio::test]
async fn absent_sources_make_promotion_a_noop() {
    let src = Arc::new(FakeCluster::new("build01"));
    let dst = Arc::new(FakeCluster::new("central"));
    src.seed_image_stream(pipeline_with_tags(&[]));

    let step = step_with(
        PromotionConfiguration {
            namespace: "roger".to_string(),
            tag: "fred".to_string(),
            ..PromotionConfiguration::default()
        },
        vec![image("foo", false)],
        &[],
        src,
        dst.clone(),
        None,
        None,
    );

    step.run(&StepContext::new()).await.unwrap();
    assert!(dst.image_stream(&ObjectKey::new("roger", "foo")).is_none());
}

#[test]
fn disabled_promotion_fails_validation() {
    let src = Arc::new(FakeCluster::new("build01"));
    let dst = Arc::new(FakeCluster::new("central"));
    let step = step_with(
        PromotionConfiguration {
            namespace: "ocp".to_string(),
            name: "4.6".to_string(),
            disabled: true,
            ..PromotionConfiguration::default()
        },
        vec![],
        &[],
        src,
        dst,
        None,
        None,
    );
    assert!(step.validate().is_err());
}
