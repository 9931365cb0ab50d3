use std::path::{Path, PathBuf};

use clap::Parser;
use olm_webhook_lifecycle::{
    WebhookDescription, WebhookReconciler,
    cli::{Cli, Command, DescriptionArguments, ReconcileArguments},
    hash::hash_webhook_description,
    logging,
    policy::{self, validate_descriptions},
    reconciler,
    store::KubeStore,
};
use snafu::{ResultExt, Snafu};

const APP_NAME: &str = "olm-webhook-lifecycle";
const LOG_ENV: &str = "OLM_WEBHOOK_LIFECYCLE_LOG";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize logging"))]
    InitializeLogging { source: logging::Error },

    #[snafu(display("failed to read {path:?}"))]
    ReadFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse webhook descriptions from {path:?}"))]
    ParseDescriptions {
        source: serde_yaml::Error,
        path: PathBuf,
    },

    #[snafu(display("invalid webhook descriptions"))]
    InvalidDescriptions { source: policy::DescriptionError },

    #[snafu(display("failed to create Kubernetes client"))]
    CreateClient { source: kube::Error },

    #[snafu(display("failed to reconcile webhook descriptions"))]
    Reconcile { source: reconciler::Error },
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    logging::initialize_logging(LOG_ENV, APP_NAME).context(InitializeLoggingSnafu)?;

    match cli.command {
        Command::Validate(arguments) => {
            let descriptions = read_descriptions(&arguments)?;
            validate_descriptions(&descriptions).context(InvalidDescriptionsSnafu)?;
            tracing::info!(count = descriptions.len(), "webhook descriptions are valid");
        }
        Command::Hash(arguments) => {
            for description in read_descriptions(&arguments)? {
                println!(
                    "{generate_name}\t{hash}",
                    generate_name = description.generate_name,
                    hash = hash_webhook_description(&description)
                );
            }
        }
        Command::Reconcile(arguments) => reconcile(arguments).await?,
    }

    Ok(())
}

async fn reconcile(arguments: ReconcileArguments) -> Result<(), Error> {
    let descriptions = read_descriptions(&arguments.descriptions)?;
    let ca_bundle = read_file(&arguments.ca_bundle)?;

    let client = kube::Client::try_default()
        .await
        .context(CreateClientSnafu)?;
    let reconciler = WebhookReconciler::new(
        KubeStore::new(client, arguments.field_manager),
        arguments.owner.into(),
    );

    let outcomes = match reconciler.reconcile_all(&ca_bundle, &descriptions).await {
        Ok(outcomes) => outcomes,
        Err(err) => {
            tracing::error!(reason = err.status_reason(), "reconciliation failed");
            return Err(err).context(ReconcileSnafu);
        }
    };

    for outcome in &outcomes {
        tracing::info!(
            webhook.generate_name = outcome.generate_name,
            webhook.kind = %outcome.admission_type,
            created = outcome.created().count(),
            updated = outcome.updated().count(),
            "reconciled webhook description"
        );
    }

    Ok(())
}

fn read_descriptions(arguments: &DescriptionArguments) -> Result<Vec<WebhookDescription>, Error> {
    let path = &arguments.descriptions;
    let contents = read_file(path)?;

    serde_yaml::from_slice(&contents).context(ParseDescriptionsSnafu { path })
}

fn read_file(path: &Path) -> Result<Vec<u8>, Error> {
    std::fs::read(path).context(ReadFileSnafu { path })
}
