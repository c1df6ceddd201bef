//! Conversions between registry records and wire messages

use std::collections::HashSet;

use super::endpoints::EndpointSummary;
use super::instances::InstanceSummary;
use super::register::MultiRegisterRequest;
use super::services::ServiceSummary;
use crate::registry::{Endpoint, Instance, Instances, Sla};

/// Build the instance record a multi-register request describes
pub fn multi_register_to_instance(request: &MultiRegisterRequest) -> Instance {
    let service = &request.service;
    Instance {
        id: request.instance_id.clone(),
        hostname: request.hostname.clone(),
        machine_class: request.machine_class.clone(),
        name: service.name.clone(),
        description: service.description.clone(),
        version: service.version,
        az_name: request.az_name.clone(),
        source: service.source.clone(),
        owner_email: service.owner_email.clone(),
        owner_mobile: service.owner_mobile.clone(),
        owner_team: service.owner_team.clone(),
        endpoints: request
            .endpoints
            .iter()
            .map(|ep| Endpoint {
                name: ep.name.clone(),
                subscribe: ep.subscribe.clone(),
                sla: Sla {
                    mean: ep.mean,
                    upper95: ep.upper95,
                },
            })
            .collect(),
    }
}

/// One entry per instance
pub fn instances_to_summaries(instances: &Instances) -> Vec<InstanceSummary> {
    instances
        .iter()
        .map(|inst| InstanceSummary {
            instance_id: inst.id.clone(),
            hostname: inst.hostname.clone(),
            machine_class: inst.machine_class.clone(),
            service_name: inst.name.clone(),
            service_description: inst.description.clone(),
            service_version: inst.version,
            az_name: inst.az_name.clone(),
            sub_topic: inst.subscription_topics(),
        })
        .collect()
}

/// One entry per (service, version), in first-seen order
pub fn instances_to_services(instances: &Instances) -> Vec<ServiceSummary> {
    let mut seen = HashSet::new();
    instances
        .iter()
        .filter(|inst| seen.insert(format!("{}|{}", inst.name, inst.version)))
        .map(|inst| ServiceSummary {
            name: inst.name.clone(),
            description: inst.description.clone(),
            version: inst.version,
            source: inst.source.clone(),
            owner_email: inst.owner_email.clone(),
            owner_mobile: inst.owner_mobile.clone(),
            owner_team: inst.owner_team.clone(),
        })
        .collect()
}

/// One entry per (service.endpoint, version), in first-seen order
pub fn instances_to_endpoints(instances: &Instances) -> Vec<EndpointSummary> {
    let mut seen = HashSet::new();
    let mut endpoints = Vec::new();
    for inst in instances {
        for ep in &inst.endpoints {
            let fq_name = format!("{}.{}", inst.name, ep.name);
            if !seen.insert(format!("{}|{}", fq_name, inst.version)) {
                continue;
            }
            endpoints.push(EndpointSummary {
                fq_name,
                version: inst.version,
                mean: ep.sla.mean,
                upper95: ep.sla.upper95,
            });
        }
    }
    endpoints
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::register::{EndpointRegistration, ServiceDescriptor};
    use crate::registry::types::instance;

    fn with_endpoint(mut inst: Instance, name: &str, mean: u32, upper95: u32) -> Instance {
        inst.endpoints.push(Endpoint {
            name: name.into(),
            subscribe: String::new(),
            sla: Sla { mean, upper95 },
        });
        inst
    }

    #[test]
    fn test_endpoints_dedupe_on_name_and_version() {
        let instances: Instances = vec![
            with_endpoint(instance("a", "svc", 3, "az1"), "bar", 10, 20),
            with_endpoint(instance("b", "svc", 3, "az2"), "bar", 99, 99),
            with_endpoint(instance("c", "svc", 4, "az1"), "bar", 5, 6),
        ]
        .into();

        let endpoints = instances_to_endpoints(&instances);
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].fq_name, "svc.bar");
        assert_eq!(endpoints[0].version, 3);
        // first seen wins
        assert_eq!(endpoints[0].mean, 10);
        assert_eq!(endpoints[1].version, 4);
    }

    #[test]
    fn test_services_dedupe_on_name_and_version() {
        let instances: Instances = vec![
            instance("a", "svc", 1, "az1"),
            instance("b", "other", 1, "az1"),
            instance("c", "svc", 1, "az2"),
            instance("d", "svc", 2, "az1"),
        ]
        .into();

        let services: Vec<(String, u64)> = instances_to_services(&instances)
            .into_iter()
            .map(|s| (s.name, s.version))
            .collect();
        assert_eq!(
            services,
            vec![
                ("svc".to_string(), 1),
                ("other".to_string(), 1),
                ("svc".to_string(), 2)
            ]
        );
    }

    #[test]
    fn test_instance_summaries_list_subscriptions_only() {
        let mut inst = with_endpoint(instance("a", "svc", 1, "az1"), "bar", 1, 2);
        inst.endpoints.push(Endpoint {
            name: "onEvent".into(),
            subscribe: "com.example.event".into(),
            sla: Sla::default(),
        });

        let summaries = instances_to_summaries(&vec![inst].into());
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].service_name, "svc");
        assert_eq!(summaries[0].sub_topic, vec!["com.example.event".to_string()]);
    }

    #[test]
    fn test_multi_register_to_instance() {
        let request = MultiRegisterRequest {
            instance_id: "i1".into(),
            hostname: "host".into(),
            machine_class: "default".into(),
            az_name: "az1".into(),
            service: ServiceDescriptor {
                name: "foo".into(),
                version: 7,
                owner_team: "core".into(),
                ..Default::default()
            },
            endpoints: vec![EndpointRegistration {
                name: "bar".into(),
                mean: 10,
                upper95: 20,
                ..Default::default()
            }],
        };

        let inst = multi_register_to_instance(&request);
        assert_eq!(inst.id, "i1");
        assert_eq!(inst.name, "foo");
        assert_eq!(inst.version, 7);
        assert_eq!(inst.owner_team, "core");
        assert_eq!(inst.endpoints[0].sla, Sla { mean: 10, upper95: 20 });
    }
}
