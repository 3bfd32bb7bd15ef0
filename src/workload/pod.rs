//! Pod construction for test workloads.

use std::collections::BTreeMap;

use rand::Rng;
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvVar, HTTPGetAction, Pod, PodSpec, Probe,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;

use super::{MANIFEST_FILE, WorkloadSpec};

/// Label selecting a workload's pod from its service.
pub const APP_LABEL: &str = "app";

/// Name of the container port results are served on.
pub const RESULTS_PORT_NAME: &str = "results";

const RESULTS_VOLUME: &str = "results";

/// Readiness probe period for the results server.
const PROBE_PERIOD_SECONDS: i32 = 7;

/// Random base36 suffix keeping per-run resource names unique.
pub fn random_suffix() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..5)
        .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
        .collect()
}

/// `<name>-<suffix>`, lowercased and truncated to a valid DNS label.
pub fn resource_name(name: &str, suffix: &str) -> String {
    let base: String = name
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let base = base.trim_matches('-');
    let max_base = 63 - suffix.len() - 1;
    let base = if base.len() > max_base {
        base[..max_base].trim_end_matches('-')
    } else {
        base
    };
    format!("{base}-{suffix}")
}

/// Shell script run by the main container: run the test command, write the
/// results manifest, then serve the output directory until deleted.
pub fn wrapper_script(spec: &WorkloadSpec) -> String {
    let out = &spec.output_dir;
    format!(
        r#"mkdir -p {out}
export RESULTS_DIR={out}
{command}
echo $? > {out}/exit-code
cd {out} && python3 - <<'PY'
import json, os
files = sorted(
    os.path.relpath(os.path.join(root, name), ".")
    for root, _, names in os.walk(".")
    for name in names
    if name != "{manifest}"
)
with open("{manifest}", "w") as f:
    json.dump(files, f)
PY
exec python3 -m http.server {port} --directory {out}
"#,
        out = out,
        command = spec.command,
        manifest = MANIFEST_FILE,
        port = spec.results_port,
    )
}

/// Build the workload pod.
pub fn build_pod(spec: &WorkloadSpec, name: &str, git_image: &str) -> Pod {
    let labels = BTreeMap::from([(APP_LABEL.to_string(), name.to_string())]);

    let mut volumes = vec![Volume {
        name: RESULTS_VOLUME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }];
    let mut mounts = vec![VolumeMount {
        name: RESULTS_VOLUME.to_string(),
        mount_path: spec.output_dir.clone(),
        ..Default::default()
    }];
    let mut init_containers = Vec::new();

    for repo in &spec.repos {
        let volume = format!("repo-{}", repo.name);
        let mount_path = repo.mount_path();
        volumes.push(Volume {
            name: volume.clone(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        });
        let mount = VolumeMount {
            name: volume,
            mount_path: mount_path.clone(),
            ..Default::default()
        };
        let mut args = vec!["clone".to_string(), "--depth=1".to_string()];
        if let Some(branch) = &repo.branch {
            args.push(format!("--branch={branch}"));
        }
        args.push(repo.url.clone());
        args.push(mount_path);

        init_containers.push(Container {
            name: format!("clone-{}", repo.name),
            image: Some(git_image.to_string()),
            command: Some(vec!["git".to_string()]),
            args: Some(args),
            volume_mounts: Some(vec![mount.clone()]),
            ..Default::default()
        });
        mounts.push(mount);
    }

    let env: Vec<EnvVar> = spec
        .env
        .iter()
        .map(|(k, v)| EnvVar {
            name: k.clone(),
            value: Some(v.clone()),
            ..Default::default()
        })
        .collect();

    let main = Container {
        name: "runner".to_string(),
        image: Some(spec.image.clone()),
        command: Some(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            wrapper_script(spec),
        ]),
        env: (!env.is_empty()).then_some(env),
        ports: Some(vec![ContainerPort {
            name: Some(RESULTS_PORT_NAME.to_string()),
            container_port: i32::from(spec.results_port),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/".to_string()),
                port: IntOrString::Int(i32::from(spec.results_port)),
                ..Default::default()
            }),
            period_seconds: Some(PROBE_PERIOD_SECONDS),
            ..Default::default()
        }),
        volume_mounts: Some(mounts),
        ..Default::default()
    };

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PodSpec {
            init_containers: (!init_containers.is_empty()).then_some(init_containers),
            containers: vec![main],
            volumes: Some(volumes),
            restart_policy: Some("Never".to_string()),
            service_account_name: spec.service_account.clone(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Pod phase, `Unknown` when not reported.
pub fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown")
}

/// Names of all containers (init containers first).
pub fn container_names(pod: &Pod) -> Vec<String> {
    pod.spec
        .as_ref()
        .map(|spec| {
            spec.init_containers
                .iter()
                .flatten()
                .chain(spec.containers.iter())
                .map(|c| c.name.clone())
                .collect()
        })
        .unwrap_or_default()
}
