//! Objects the orchestrator creates for a WorkItem: the target list
//! ConfigMap, the remover pod template and the per-node pods.

use crate::error::Result;
use prune_core::{
    ConfigMap, DesiredState, Node, OwnerReference, Pod, PodPhase, PodTemplate, PruneConfig,
    VolumeMount, WorkItem, WorkItemSpec,
};
use std::collections::BTreeMap;

/// The only DesiredState the orchestrator acts on
pub const DESIRED_STATE_NAME: &str = "imagelist";

pub const WORK_ITEM_PREFIX: &str = "imagejob-";
pub const TARGETS_PREFIX: &str = "imagelist-";

/// ConfigMap key holding the JSON target list
pub const TARGETS_KEY: &str = "images";
pub const TARGETS_MOUNT: &str = "/run/prune/imagelist";

/// ConfigMaps labelled `EXCLUSION_LABEL=true` are mounted as exclusion lists
pub const EXCLUSION_LABEL: &str = "prune.dev/exclude.list";
pub const EXCLUSION_MOUNT: &str = "/run/prune/excluded";

pub const REMOVER_CONTAINER: &str = "remover";
pub const NODE_NAME_ENV: &str = "NODE_NAME";

/// Immutable ConfigMap carrying the DesiredState's image list
pub fn targets_config_map(
    namespace: &str,
    desired: &DesiredState,
) -> Result<ConfigMap> {
    let mut data = BTreeMap::new();
    data.insert(
        TARGETS_KEY.to_string(),
        serde_json::to_string(&desired.spec.images)?,
    );

    Ok(ConfigMap {
        generate_name: TARGETS_PREFIX.to_string(),
        namespace: namespace.to_string(),
        data,
        owner: Some(desired.controller_ref()),
        immutable: true,
        ..Default::default()
    })
}

/// Remover pod template mounting the target list and every exclusion list
pub fn remover_template(
    config: &PruneConfig,
    targets: &ConfigMap,
    exclusions: &[ConfigMap],
) -> PodTemplate {
    let remover = &config.components.remover;

    let mut mounts = vec![VolumeMount {
        config_map: targets.name.clone(),
        mount_path: TARGETS_MOUNT.to_string(),
    }];
    mounts.extend(exclusions.iter().map(|cm| VolumeMount {
        config_map: cm.name.clone(),
        mount_path: format!("{}/{}", EXCLUSION_MOUNT, cm.name),
    }));

    PodTemplate {
        container_name: REMOVER_CONTAINER.to_string(),
        image: remover.image.reference(),
        args: vec![
            "--log-level".to_string(),
            config.log_level.clone(),
            "--runtime".to_string(),
            config.runtime.clone(),
            "remove".to_string(),
            "--imagelist".to_string(),
            format!("{}/{}", TARGETS_MOUNT, TARGETS_KEY),
            "--exclusion-dir".to_string(),
            EXCLUSION_MOUNT.to_string(),
        ],
        env: BTreeMap::new(),
        mounts,
        cpu_request: remover.request.cpu.clone(),
        memory_request: remover.request.mem.clone(),
        cpu_limit: remover.limit.cpu.clone(),
        memory_limit: remover.limit.mem.clone(),
        service_account: "prune-remover".to_string(),
        priority_class_name: config.priority_class_name.clone(),
        pull_secrets: config.pull_secrets.clone(),
    }
}

/// A fresh WorkItem owned by `desired`, named by the cluster
pub fn work_item(desired: &DesiredState, template: PodTemplate) -> WorkItem {
    WorkItem {
        generate_name: WORK_ITEM_PREFIX.to_string(),
        owner: Some(desired.controller_ref()),
        spec: WorkItemSpec {
            template,
            desired_generation: desired.generation,
        },
        ..Default::default()
    }
}

pub fn pod_name(item: &WorkItem, node: &Node) -> String {
    format!("{}-{}", item.name, node.name)
}

/// The pod that runs `item` on `node`
pub fn pod_for_node(item: &WorkItem, node: &Node) -> Pod {
    let mut template = item.spec.template.clone();
    template
        .env
        .insert(NODE_NAME_ENV.to_string(), node.name.clone());

    Pod {
        name: pod_name(item, node),
        node_name: node.name.clone(),
        owner: item.controller_ref(),
        template,
        phase: PodPhase::Pending,
        resource_version: 0,
    }
}

/// Whether `pod` belongs to the object behind `owner`
pub fn is_owned_by(pod: &Pod, owner: &OwnerReference) -> bool {
    pod.owner.controller && pod.owner.kind == owner.kind && pod.owner.uid == owner.uid
}
