//! Isolated network: address space, public and private subnets per zone,
//! internet gateway, and NAT egress.

use crate::core::intrinsic;
use crate::core::stack::Stack;
use crate::core::types::{ResourceDecl, ResourceType};
use crate::error::{Error, Result};
use serde_json::json;
use std::net::Ipv4Addr;

/// Smallest subnet the provider accepts.
const MAX_SUBNET_PREFIX: u32 = 28;

/// Logical ids of a declared network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpcHandles {
    pub vpc: String,
    pub public_subnets: Vec<String>,
    /// Empty when no NAT gateway provides egress
    pub private_subnets: Vec<String>,
}

impl VpcHandles {
    /// Subnets workloads should run in.
    pub fn workload_subnets(&self) -> &[String] {
        if self.private_subnets.is_empty() {
            &self.public_subnets
        } else {
            &self.private_subnets
        }
    }
}

/// Split `cidr` into `count` equal blocks, in address order.
pub fn split_cidr(cidr: &str, count: u32) -> Result<Vec<String>> {
    let invalid = |reason: &str| Error::Other(format!("invalid cidr '{}': {}", cidr, reason));
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| invalid("missing prefix length"))?;
    let addr: Ipv4Addr = addr.parse().map_err(|_| invalid("bad address"))?;
    let prefix: u32 = prefix.parse().map_err(|_| invalid("bad prefix length"))?;
    if prefix > 32 {
        return Err(invalid("prefix length above 32"));
    }
    if count == 0 {
        return Ok(Vec::new());
    }

    let extra_bits = u32::BITS - (count - 1).leading_zeros();
    let new_prefix = prefix + extra_bits;
    if new_prefix > MAX_SUBNET_PREFIX {
        return Err(invalid(&format!(
            "too small for {} subnets (would need /{})",
            count, new_prefix
        )));
    }

    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    let base = u32::from(addr) & mask;
    let step = 1u32 << (32 - new_prefix);
    Ok((0..count)
        .map(|i| format!("{}/{}", Ipv4Addr::from(base + i * step), new_prefix))
        .collect())
}

/// Declare a network spanning `max_azs` zones with `nat_gateways` NAT
/// gateways in the first public subnets.
pub fn add_vpc(
    stack: &mut Stack,
    id: &str,
    cidr: &str,
    max_azs: u32,
    nat_gateways: u32,
) -> Result<VpcHandles> {
    let blocks = split_cidr(cidr, max_azs * 2)?;
    let (public_blocks, private_blocks) = blocks.split_at(max_azs as usize);

    stack.add(
        id,
        ResourceDecl::new(
            ResourceType::Vpc,
            json!({
                "CidrBlock": cidr,
                "EnableDnsHostnames": true,
                "EnableDnsSupport": true,
                "InstanceTenancy": "default",
                "Tags": [{ "Key": "Name", "Value": format!("{}/{}", stack.name, id) }],
            }),
        ),
    )?;

    let igw = format!("{}IGW", id);
    let attachment = format!("{}VPCGW", id);
    stack.add(&igw, ResourceDecl::new(ResourceType::InternetGateway, json!({})))?;
    stack.add(
        &attachment,
        ResourceDecl::new(
            ResourceType::GatewayAttachment,
            json!({
                "VpcId": intrinsic::reference(id),
                "InternetGatewayId": intrinsic::reference(&igw),
            }),
        ),
    )?;

    let mut handles = VpcHandles {
        vpc: id.to_string(),
        public_subnets: Vec::new(),
        private_subnets: Vec::new(),
    };
    let mut nats = Vec::new();

    for (i, block) in public_blocks.iter().enumerate() {
        let subnet = format!("{}PublicSubnet{}", id, i + 1);
        add_subnet(stack, id, &subnet, block, i, true)?;
        let route = ResourceDecl::new(
            ResourceType::Route,
            json!({
                "RouteTableId": intrinsic::reference(&format!("{}RouteTable", subnet)),
                "DestinationCidrBlock": "0.0.0.0/0",
                "GatewayId": intrinsic::reference(&igw),
            }),
        )
        .depends_on(&attachment);
        stack.add(&format!("{}DefaultRoute", subnet), route)?;

        if (i as u32) < nat_gateways {
            let eip = format!("{}EIP", subnet);
            let nat = format!("{}NATGateway", subnet);
            stack.add(
                &eip,
                ResourceDecl::new(ResourceType::ElasticIp, json!({ "Domain": "vpc" })),
            )?;
            stack.add(
                &nat,
                ResourceDecl::new(
                    ResourceType::NatGateway,
                    json!({
                        "AllocationId": intrinsic::get_att(&eip, "AllocationId"),
                        "SubnetId": intrinsic::reference(&subnet),
                    }),
                )
                .depends_on(&format!("{}DefaultRoute", subnet))
                .depends_on(&format!("{}RouteTableAssociation", subnet)),
            )?;
            nats.push(nat);
        }
        handles.public_subnets.push(subnet);
    }

    if !nats.is_empty() {
        for (i, block) in private_blocks.iter().enumerate() {
            let subnet = format!("{}PrivateSubnet{}", id, i + 1);
            add_subnet(stack, id, &subnet, block, i, false)?;
            stack.add(
                &format!("{}DefaultRoute", subnet),
                ResourceDecl::new(
                    ResourceType::Route,
                    json!({
                        "RouteTableId": intrinsic::reference(&format!("{}RouteTable", subnet)),
                        "DestinationCidrBlock": "0.0.0.0/0",
                        "NatGatewayId": intrinsic::reference(&nats[i % nats.len()]),
                    }),
                ),
            )?;
            handles.private_subnets.push(subnet);
        }
    }

    tracing::debug!(
        vpc = id,
        public = handles.public_subnets.len(),
        private = handles.private_subnets.len(),
        nat = nats.len(),
        "network declared"
    );
    Ok(handles)
}

fn add_subnet(
    stack: &mut Stack,
    vpc: &str,
    subnet: &str,
    block: &str,
    zone: usize,
    public: bool,
) -> Result<()> {
    stack.add(
        subnet,
        ResourceDecl::new(
            ResourceType::Subnet,
            json!({
                "VpcId": intrinsic::reference(vpc),
                "CidrBlock": block,
                "AvailabilityZone": intrinsic::select(zone as u32, intrinsic::get_azs()),
                "MapPublicIpOnLaunch": public,
            }),
        ),
    )?;
    let table = format!("{}RouteTable", subnet);
    stack.add(
        &table,
        ResourceDecl::new(
            ResourceType::RouteTable,
            json!({ "VpcId": intrinsic::reference(vpc) }),
        ),
    )?;
    stack.add(
        &format!("{}RouteTableAssociation", subnet),
        ResourceDecl::new(
            ResourceType::RouteTableAssociation,
            json!({
                "RouteTableId": intrinsic::reference(&table),
                "SubnetId": intrinsic::reference(subnet),
            }),
        ),
    )
}
