//! Container cluster and the load-balanced serverless container service.

use super::iam;
use super::network::VpcHandles;
use crate::core::intrinsic;
use crate::core::stack::Stack;
use crate::core::types::*;
use crate::error::Result;
use serde_json::{json, Value};

/// Name of the single container in each task.
pub const CONTAINER_NAME: &str = "web";

pub fn cluster() -> ResourceDecl {
    ResourceDecl::new(ResourceType::Cluster, json!({}))
}

/// Registry URI the engine pushes a built image asset to.
pub fn image_uri(asset: &Asset) -> Value {
    intrinsic::sub(&format!(
        "${{AWS::AccountId}}.dkr.ecr.${{AWS::Region}}.${{AWS::URLSuffix}}/wwapi-container-assets-${{AWS::AccountId}}-${{AWS::Region}}:{}",
        asset.digest()
    ))
}

pub fn load_balancer_dns(load_balancer_id: &str) -> Value {
    intrinsic::get_att(load_balancer_id, "DNSName")
}

/// Inputs for [`add_load_balanced_service`].
#[derive(Debug, Clone)]
pub struct ServiceProps<'a> {
    pub cluster: &'a str,
    pub vpc: &'a VpcHandles,
    pub image: &'a Asset,
    /// Role the running container assumes
    pub task_role: &'a str,
    pub settings: &'a FrontendConfig,
}

/// Logical ids of a declared load-balanced service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandles {
    pub load_balancer: String,
    pub listener: String,
    pub target_group: String,
    pub task_definition: String,
    pub execution_role: String,
    pub service: String,
}

/// Declare a container service behind an application load balancer.
///
/// The service waits for the listener so the target group is attached
/// before tasks register. Without private subnets the tasks run in public
/// subnets with a public address.
pub fn add_load_balanced_service(
    stack: &mut Stack,
    id: &str,
    props: ServiceProps<'_>,
) -> Result<ServiceHandles> {
    let settings = props.settings;
    let handles = ServiceHandles {
        load_balancer: format!("{}LB", id),
        listener: format!("{}LBPublicListener", id),
        target_group: format!("{}TargetGroup", id),
        task_definition: format!("{}TaskDef", id),
        execution_role: format!("{}TaskExecutionRole", id),
        service: format!("{}Service", id),
    };
    let lb_sg = format!("{}LBSecurityGroup", id);
    let service_sg = format!("{}ServiceSecurityGroup", id);
    let log_group = format!("{}LogGroup", id);

    stack.add(
        &lb_sg,
        ResourceDecl::new(
            ResourceType::SecurityGroup,
            json!({
                "GroupDescription": format!("Load balancer for {}", id),
                "VpcId": intrinsic::reference(&props.vpc.vpc),
                "SecurityGroupIngress": [{
                    "CidrIp": "0.0.0.0/0",
                    "IpProtocol": "tcp",
                    "FromPort": settings.listener_port,
                    "ToPort": settings.listener_port,
                }],
            }),
        ),
    )?;

    let lb_subnets = if settings.public_load_balancer {
        props.vpc.public_subnets.as_slice()
    } else {
        props.vpc.workload_subnets()
    };
    let mut load_balancer = ResourceDecl::new(
        ResourceType::LoadBalancer,
        json!({
            "Type": "application",
            "Scheme": if settings.public_load_balancer { "internet-facing" } else { "internal" },
            "Subnets": lb_subnets.iter().map(|s| intrinsic::reference(s)).collect::<Vec<_>>(),
            "SecurityGroups": [intrinsic::get_att(&lb_sg, "GroupId")],
        }),
    );
    if settings.public_load_balancer {
        for subnet in &props.vpc.public_subnets {
            load_balancer = load_balancer.depends_on(&format!("{}DefaultRoute", subnet));
        }
    }
    stack.add(&handles.load_balancer, load_balancer)?;

    stack.add(
        &handles.target_group,
        ResourceDecl::new(
            ResourceType::TargetGroup,
            json!({
                "Port": settings.container_port,
                "Protocol": "HTTP",
                "TargetType": "ip",
                "VpcId": intrinsic::reference(&props.vpc.vpc),
            }),
        ),
    )?;
    stack.add(
        &handles.listener,
        ResourceDecl::new(
            ResourceType::Listener,
            json!({
                "LoadBalancerArn": intrinsic::reference(&handles.load_balancer),
                "Port": settings.listener_port,
                "Protocol": "HTTP",
                "DefaultActions": [{
                    "Type": "forward",
                    "TargetGroupArn": intrinsic::reference(&handles.target_group),
                }],
            }),
        ),
    )?;

    stack.add(
        &log_group,
        ResourceDecl::new(ResourceType::LogGroup, json!({})).retain(),
    )?;
    stack.add(
        &handles.execution_role,
        iam::service_role("ecs-tasks.amazonaws.com", None, &[]),
    )?;
    stack.grant(
        &handles.execution_role,
        GrantTarget::Any,
        Access::Actions(vec![
            "ecr:GetAuthorizationToken".to_string(),
            "ecr:BatchCheckLayerAvailability".to_string(),
            "ecr:GetDownloadUrlForLayer".to_string(),
            "ecr:BatchGetImage".to_string(),
        ]),
    );
    stack.grant(
        &handles.execution_role,
        GrantTarget::Resource(log_group.clone()),
        Access::Actions(vec![
            "logs:CreateLogStream".to_string(),
            "logs:PutLogEvents".to_string(),
        ]),
    );

    stack.add(
        &handles.task_definition,
        ResourceDecl::new(
            ResourceType::TaskDefinition,
            json!({
                "Cpu": settings.cpu.to_string(),
                "Memory": settings.memory_mib.to_string(),
                "NetworkMode": "awsvpc",
                "RequiresCompatibilities": ["FARGATE"],
                "RuntimePlatform": {
                    "OperatingSystemFamily": "LINUX",
                    "CpuArchitecture": settings.architecture.provider_name(),
                },
                "ExecutionRoleArn": intrinsic::get_att(&handles.execution_role, "Arn"),
                "TaskRoleArn": intrinsic::get_att(props.task_role, "Arn"),
                "ContainerDefinitions": [{
                    "Name": CONTAINER_NAME,
                    "Image": image_uri(props.image),
                    "Essential": true,
                    "PortMappings": [{ "ContainerPort": settings.container_port, "Protocol": "tcp" }],
                    "LogConfiguration": {
                        "LogDriver": "awslogs",
                        "Options": {
                            "awslogs-group": intrinsic::reference(&log_group),
                            "awslogs-stream-prefix": id,
                            "awslogs-region": intrinsic::reference("AWS::Region"),
                        },
                    },
                }],
            }),
        ),
    )?;

    stack.add(
        &service_sg,
        ResourceDecl::new(
            ResourceType::SecurityGroup,
            json!({
                "GroupDescription": format!("Tasks of {}", id),
                "VpcId": intrinsic::reference(&props.vpc.vpc),
                "SecurityGroupIngress": [{
                    "IpProtocol": "tcp",
                    "FromPort": settings.container_port,
                    "ToPort": settings.container_port,
                    "SourceSecurityGroupId": intrinsic::get_att(&lb_sg, "GroupId"),
                }],
            }),
        ),
    )?;

    let public_tasks = props.vpc.private_subnets.is_empty();
    let service = ResourceDecl::new(
        ResourceType::Service,
        json!({
            "Cluster": intrinsic::reference(props.cluster),
            "LaunchType": "FARGATE",
            "PlatformVersion": settings.platform_version,
            "DesiredCount": settings.desired_count,
            "TaskDefinition": intrinsic::reference(&handles.task_definition),
            "HealthCheckGracePeriodSeconds": 60,
            "DeploymentConfiguration": { "MaximumPercent": 200, "MinimumHealthyPercent": 50 },
            "NetworkConfiguration": {
                "AwsvpcConfiguration": {
                    "AssignPublicIp": if public_tasks { "ENABLED" } else { "DISABLED" },
                    "Subnets": props.vpc.workload_subnets().iter().map(|s| intrinsic::reference(s)).collect::<Vec<_>>(),
                    "SecurityGroups": [intrinsic::get_att(&service_sg, "GroupId")],
                },
            },
            "LoadBalancers": [{
                "ContainerName": CONTAINER_NAME,
                "ContainerPort": settings.container_port,
                "TargetGroupArn": intrinsic::reference(&handles.target_group),
            }],
        }),
    )
    .depends_on(&handles.listener);
    stack.add(&handles.service, service)?;

    tracing::debug!(service = %handles.service, public_tasks, "container service declared");
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::network;
    use std::path::PathBuf;

    fn image() -> Asset {
        Asset {
            id: "Image".to_string(),
            kind: AssetKind::DockerImage,
            source: PathBuf::from("frontend"),
            hash: "blake3:cafe".to_string(),
        }
    }

    fn declare(nat: u32) -> (Stack, ServiceHandles) {
        let mut stack = Stack::new("F");
        let vpc = network::add_vpc(&mut stack, "Vpc", "10.0.0.0/16", 2, nat).unwrap();
        stack.add("Cluster", cluster()).unwrap();
        stack
            .add("TaskRole", iam::service_role("ecs-tasks.amazonaws.com", None, &[]))
            .unwrap();
        let image = image();
        let settings = FrontendConfig::default();
        let handles = add_load_balanced_service(
            &mut stack,
            "App",
            ServiceProps {
                cluster: "Cluster",
                vpc: &vpc,
                image: &image,
                task_role: "TaskRole",
                settings: &settings,
            },
        )
        .unwrap();
        (stack, handles)
    }

    #[test]
    fn test_container_task_definition() {
        let (stack, handles) = declare(2);
        let task = stack.resource(&handles.task_definition).unwrap();
        assert_eq!(task.prop_str("Cpu"), Some("256"));
        assert_eq!(task.prop_str("Memory"), Some("512"));
        assert_eq!(task.properties["RuntimePlatform"]["CpuArchitecture"], "ARM64");
        assert_eq!(
            task.properties["ContainerDefinitions"][0]["PortMappings"][0]["ContainerPort"],
            8501
        );
        assert!(task.properties["ContainerDefinitions"][0]["Image"]["Fn::Sub"]
            .as_str()
            .unwrap()
            .ends_with(":cafe"));
    }

    #[test]
    fn test_container_service_waits_for_listener() {
        let (stack, handles) = declare(2);
        let service = stack.resource(&handles.service).unwrap();
        assert_eq!(service.depends_on, vec![handles.listener.clone()]);
        assert_eq!(
            service.properties["NetworkConfiguration"]["AwsvpcConfiguration"]["AssignPublicIp"],
            "DISABLED"
        );
        let lb = stack.resource(&handles.load_balancer).unwrap();
        assert_eq!(lb.prop_str("Scheme"), Some("internet-facing"));
    }

    #[test]
    fn test_container_public_tasks_without_nat() {
        let (stack, handles) = declare(0);
        let service = stack.resource(&handles.service).unwrap();
        let network = &service.properties["NetworkConfiguration"]["AwsvpcConfiguration"];
        assert_eq!(network["AssignPublicIp"], "ENABLED");
        assert_eq!(network["Subnets"][0], json!({"Ref": "VpcPublicSubnet1"}));
    }

    #[test]
    fn test_container_execution_role_grants() {
        let (stack, handles) = declare(1);
        let policies = iam::compile_grants(&stack).unwrap();
        let policy = &policies[&iam::policy_id(&handles.execution_role)];
        let statements = policy.properties["PolicyDocument"]["Statement"]
            .as_array()
            .unwrap();
        assert_eq!(statements.len(), 2);
    }
}
