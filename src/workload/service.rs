//! Service exposing a workload pod's ports.

use k8s_openapi::api::core::v1::{Endpoints, Pod, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;

/// Build a service selecting `pod`'s labels and exposing every container port.
pub fn build_service(pod: &Pod) -> Service {
    let ports: Vec<ServicePort> = pod
        .spec
        .iter()
        .flat_map(|spec| spec.containers.iter())
        .flat_map(|c| c.ports.iter().flatten())
        .map(|p| ServicePort {
            name: p.name.clone(),
            port: p.container_port,
            target_port: Some(IntOrString::Int(p.container_port)),
            protocol: p.protocol.clone(),
            ..Default::default()
        })
        .collect();

    Service {
        metadata: ObjectMeta {
            name: pod.metadata.name.clone(),
            labels: pod.metadata.labels.clone(),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: pod.metadata.labels.clone(),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Returns true once any subset lists a ready address.
pub fn endpoints_ready(endpoints: &Endpoints) -> bool {
    endpoints
        .subsets
        .iter()
        .flatten()
        .any(|subset| subset.addresses.as_ref().is_some_and(|a| !a.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::WorkloadSpec;
    use crate::workload::pod::build_pod;
    use k8s_openapi::api::core::v1::{EndpointAddress, EndpointSubset};

    #[test]
    fn test_build_service_mirrors_pod() {
        let pod = build_pod(&WorkloadSpec::default(), "e2e-abcde", "alpine/git");
        let svc = build_service(&pod);
        assert_eq!(svc.metadata.name.as_deref(), Some("e2e-abcde"));

        let spec = svc.spec.unwrap();
        assert_eq!(spec.selector, pod.metadata.labels);
        let ports = spec.ports.unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].port, 8000);
        assert_eq!(ports[0].name.as_deref(), Some("results"));
    }

    #[test]
    fn test_endpoints_ready() {
        let mut endpoints = Endpoints {
            subsets: Some(vec![EndpointSubset {
                not_ready_addresses: Some(vec![EndpointAddress {
                    ip: "10.0.0.1".into(),
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
            ..Default::default()
        };
        assert!(!endpoints_ready(&endpoints));

        endpoints.subsets.as_mut().unwrap()[0].addresses = Some(vec![EndpointAddress {
            ip: "10.0.0.1".into(),
            ..Default::default()
        }]);
        assert!(endpoints_ready(&endpoints));
        assert!(!endpoints_ready(&Endpoints::default()));
    }
}
