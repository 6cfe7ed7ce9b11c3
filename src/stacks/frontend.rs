//! Frontend stack: network, container cluster, image build, and the
//! load-balanced web service that reads the backend's gateway URL.

use super::backend::directory_asset;
use crate::core::stack::Stack;
use crate::core::types::*;
use crate::error::Result;
use crate::resources::container::{self, ServiceProps};
use crate::resources::{iam, network};
use std::path::Path;

pub const VPC: &str = "StreamlitVpc";
pub const CLUSTER: &str = "StreamlitCluster";
pub const TASK_ROLE: &str = "FargateTaskRole";
pub const SERVICE: &str = "FargateService";

pub fn build(config: &WwapiConfig, root: &Path) -> Result<Stack> {
    let frontend = &config.frontend;
    let mut stack = Stack::new(&frontend.stack_name);
    stack.description = Some(format!("{} frontend", config.name));

    let nat = frontend.nat_gateways.unwrap_or(frontend.max_azs);
    let vpc = network::add_vpc(&mut stack, VPC, &frontend.cidr, frontend.max_azs, nat)?;
    stack.add(CLUSTER, container::cluster())?;

    let image = stack.add_asset(directory_asset(
        "StreamlitDockerImage",
        root,
        &frontend.build_dir,
        AssetKind::DockerImage,
    )?);

    stack.add(TASK_ROLE, iam::service_role("ecs-tasks.amazonaws.com", None, &[]))?;
    let api_url = stack.import_parameter(&frontend.api_url_parameter);
    stack.grant(TASK_ROLE, api_url, Access::ParameterRead);

    let service = container::add_load_balanced_service(
        &mut stack,
        SERVICE,
        ServiceProps {
            cluster: CLUSTER,
            vpc: &vpc,
            image: &image,
            task_role: TASK_ROLE,
            settings: frontend,
        },
    )?;

    stack.add_output(
        "FargateAppUrl",
        container::load_balancer_dns(&service.load_balancer),
        Some("The URL of the Fargate application"),
        None,
    );

    tracing::info!(stack = %stack.name, resources = stack.resources.len(), "frontend declared");
    Ok(stack)
}
