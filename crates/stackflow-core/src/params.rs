//! Stack parameter validation
//!
//! Runs before rendering so a bad parameter set never reaches a provider.

use crate::error::{FlowError, Result};
use crate::model::{Project, StackParameters, is_valid_node_name};
use crate::secret;
use std::net::Ipv4Addr;

/// IPv4 network in CIDR notation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    pub network: Ipv4Addr,
    pub prefix: u8,
}

impl Cidr {
    pub fn parse(raw: &str) -> Option<Self> {
        let (addr, prefix) = raw.trim().split_once('/')?;
        let network: Ipv4Addr = addr.parse().ok()?;
        let prefix: u8 = prefix.parse().ok()?;
        if prefix > 32 {
            return None;
        }
        Some(Self { network, prefix })
    }

    fn mask(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - self.prefix)
        }
    }

    /// Whether `other` lies entirely inside this network
    pub fn contains(&self, other: &Cidr) -> bool {
        other.prefix >= self.prefix
            && (u32::from(other.network) & self.mask()) == (u32::from(self.network) & self.mask())
    }

    pub fn overlaps(&self, other: &Cidr) -> bool {
        self.contains(other) || other.contains(self)
    }
}

/// No stack's `{project}-{stack}` namespace may sit inside another's.
/// Stacks `app` and `app-task` would both own `{project}-app-task-role`.
pub fn validate_namespaces(project: &Project) -> Result<()> {
    let prefixes: Vec<(&str, String)> = project
        .stacks
        .iter()
        .map(|(stack, params)| {
            let owner = params.project.as_deref().unwrap_or(&project.name);
            (stack.as_str(), format!("{owner}-{stack}"))
        })
        .collect();

    for (stack, prefix) in &prefixes {
        for (other, other_prefix) in &prefixes {
            if stack != other
                && (other_prefix == prefix || other_prefix.starts_with(&format!("{prefix}-")))
            {
                return Err(FlowError::validation(
                    format!("stack '{other}'"),
                    format!("namespace '{other_prefix}' overlaps the namespace of stack '{stack}'"),
                ));
            }
        }
    }
    Ok(())
}

/// Validate one stack's parameters
pub fn validate_parameters(stack: &str, params: &StackParameters) -> Result<()> {
    let invalid = |message: String| FlowError::validation(format!("stack '{stack}'"), message);

    if !is_valid_node_name(stack) {
        return Err(invalid("stack names must be identifiers".to_string()));
    }

    if params.region.trim().is_empty() {
        return Err(invalid("region must not be empty".to_string()));
    }

    if let Some(account) = &params.account_id
        && (account.len() != 12 || !account.chars().all(|c| c.is_ascii_digit()))
    {
        return Err(invalid(format!("account-id '{account}' must be 12 digits")));
    }

    let vpc = match &params.vpc_cidr {
        Some(raw) => Some(
            Cidr::parse(raw).ok_or_else(|| invalid(format!("vpc-cidr '{raw}' is not a CIDR")))?,
        ),
        None => None,
    };

    let mut subnets: Vec<Cidr> = Vec::new();
    for raw in &params.public_subnet_cidrs {
        let subnet = Cidr::parse(raw)
            .ok_or_else(|| invalid(format!("subnet '{raw}' is not a CIDR")))?;
        if let Some(vpc) = &vpc
            && !vpc.contains(&subnet)
        {
            return Err(invalid(format!("subnet '{raw}' lies outside the VPC range")));
        }
        if subnets.iter().any(|s| s.overlaps(&subnet)) {
            return Err(invalid(format!("subnet '{raw}' overlaps another subnet")));
        }
        subnets.push(subnet);
    }

    for rule in &params.ingress {
        if rule.port == 0 {
            return Err(invalid("ingress port must be between 1 and 65535".to_string()));
        }
        for source in &rule.sources {
            if Cidr::parse(source).is_none() {
                return Err(invalid(format!(
                    "ingress source '{source}' for port {} is not a CIDR",
                    rule.port
                )));
            }
        }
    }

    if let Some(prefix) = &params.secret_prefix {
        let normalized = secret::normalize_prefix(prefix);
        if !secret::is_valid_path(&normalized) {
            return Err(invalid(format!("secret-prefix '{prefix}' is malformed")));
        }
        for name in &params.secrets {
            let handle = secret::handle_for(&normalized, name);
            secret::validate_handle(&format!("stack '{stack}'"), &handle, Some(&normalized))?;
        }
    } else if !params.secrets.is_empty() {
        return Err(invalid("secrets require a secret-prefix".to_string()));
    }

    Ok(())
}
