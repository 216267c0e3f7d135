use super::ServiceRef;
use super::resources::{
    CONDITION_LOAD_BALANCER_READY, CONDITION_NETWORK_CONFIGURED, CONDITION_READY, Ingress,
    LoadBalancerIngressStatus, LoadBalancerStatus,
};

/// Cluster internal hostname of a service.
pub fn service_hostname(service: &ServiceRef) -> String {
    format!("{}.{}.svc.cluster.local", service.name, service.namespace)
}

/// True unless the ingress is already network configured at its current generation.
pub fn needs_status_update(ingress: &Ingress) -> bool {
    !ingress.status.is_true(CONDITION_NETWORK_CONFIGURED)
        || ingress.metadata.generation != ingress.status.observed_generation
}

fn load_balancer(service: &ServiceRef) -> LoadBalancerStatus {
    LoadBalancerStatus {
        ingress: vec![LoadBalancerIngressStatus {
            domain_internal: Some(service_hostname(service)),
            ..Default::default()
        }],
    }
}

/// Marks the load balancers ready and the network configured at the current generation.
pub fn mark_configured(ingress: &mut Ingress, public: &ServiceRef, private: &ServiceRef) {
    let status = &mut ingress.status;
    status.public_load_balancer = Some(load_balancer(public));
    status.private_load_balancer = Some(load_balancer(private));
    status.mark_true(CONDITION_LOAD_BALANCER_READY);
    status.mark_true(CONDITION_NETWORK_CONFIGURED);
    status.mark_true(CONDITION_READY);
    status.observed_generation = ingress.metadata.generation;
}
