//! Command line interface of the `olm-webhook-lifecycle` binary.
//!
//! Every option can also be provided as an environment variable, e.g. `--owner-namespace` as
//! `OWNER_NAMESPACE`.
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::owner::Owner;

pub const DEFAULT_FIELD_MANAGER: &str = "olm-webhook-lifecycle";
pub const DEFAULT_OWNER_KIND: &str = "ClusterServiceVersion";

#[derive(Debug, PartialEq, Eq, Parser)]
#[command(author, version, about = "Installs admission webhooks on behalf of OLM managed operators")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Check webhook descriptions against the safety policy.
    Validate(DescriptionArguments),

    /// Print the drift hash of webhook descriptions.
    Hash(DescriptionArguments),

    /// Install webhook descriptions into the cluster.
    Reconcile(ReconcileArguments),
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct DescriptionArguments {
    /// A YAML file containing a list of webhook descriptions.
    #[arg(long, short = 'd', value_name = "FILE", env)]
    pub descriptions: PathBuf,
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct ReconcileArguments {
    /// A PEM file with the CA certificates the API server uses to verify the webhooks.
    #[arg(long, value_name = "FILE", env)]
    pub ca_bundle: PathBuf,

    /// The field manager used when writing objects.
    #[arg(long, env, default_value = DEFAULT_FIELD_MANAGER)]
    pub field_manager: String,

    // Flattened structs go last to keep the help headings intact.
    #[command(flatten)]
    pub descriptions: DescriptionArguments,

    #[command(flatten)]
    pub owner: OwnerOptions,
}

#[derive(Debug, PartialEq, Eq, Args)]
#[command(next_help_heading = "Owner Options")]
pub struct OwnerOptions {
    /// Name of the resource declaring the webhooks, usually a ClusterServiceVersion.
    #[arg(long, env)]
    pub owner_name: String,

    /// Namespace of the owner, which is also the namespace of the webhook services.
    #[arg(long, env)]
    pub owner_namespace: String,

    #[arg(long, env, default_value = DEFAULT_OWNER_KIND)]
    pub owner_kind: String,
}

impl From<OwnerOptions> for Owner {
    fn from(options: OwnerOptions) -> Self {
        Self::new(options.owner_name, options.owner_namespace, options.owner_kind)
    }
}
