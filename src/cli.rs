//! Terminal front end.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::apim::ApimService;
use crate::commands;
use crate::config::{AppConfig, ConfigLoader};
use crate::credentials::StaticTokenCredential;
use crate::host::{Host, TerminalHost};
use crate::telemetry::init_tracing;
use crate::tree::{NodeId, ResourceTree};

#[derive(Debug, Parser)]
#[command(
    name = "apim-authz",
    version,
    about = "Manage API Management authorization providers, authorizations and permissions"
)]
pub struct Cli {
    /// Configuration profile (selects `.env.{profile}` files)
    #[arg(long, global = true)]
    pub profile: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the resource tree of the service
    Tree,
    /// Authorization provider commands
    #[command(subcommand)]
    Providers(ProviderCommand),
    /// Authorization commands
    #[command(subcommand)]
    Authorizations(AuthorizationCommand),
    /// Permission commands
    #[command(subcommand)]
    Permissions(PermissionCommand),
    /// Start the OAuth login flow of an authorization
    Authorize(AuthorizationArgs),
    /// Copy a policy snippet that uses an authorization
    Policy(AuthorizationArgs),
    /// Report the result of an OAuth redirect callback
    Callback {
        /// Callback URI or its query string
        uri: String,
    },
    /// Self-hosted gateway commands
    #[command(subcommand)]
    Gateways(GatewayCommand),
    /// Turn on the system-assigned managed identity of the service
    EnableManagedIdentity,
    /// Print the effective configuration with secrets redacted
    Config,
}

#[derive(Debug, Subcommand)]
pub enum ProviderCommand {
    Create,
    Edit { provider: String },
    Delete { provider: String },
}

#[derive(Debug, Subcommand)]
pub enum AuthorizationCommand {
    Create { provider: String },
    Delete(AuthorizationArgs),
}

#[derive(Debug, Subcommand)]
pub enum PermissionCommand {
    Create(AuthorizationArgs),
    Delete {
        #[command(flatten)]
        authorization: AuthorizationArgs,
        permission: String,
    },
}

#[derive(Debug, Clone, Args)]
pub struct AuthorizationArgs {
    pub provider: String,
    pub authorization: String,
}

#[derive(Debug, Subcommand)]
pub enum GatewayCommand {
    List,
    Apis {
        gateway: String,
    },
    AddApi {
        gateway: String,
        api: String,
    },
    RemoveApi {
        gateway: String,
        api: String,
    },
    /// Generate an access token for a self-hosted gateway
    Token {
        gateway: String,
        /// Days until the token expires
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(1..=3650))]
        days: u32,
        #[arg(long, default_value = "primary", value_parser = ["primary", "secondary"])]
        key_type: String,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    let loader = ConfigLoader::new().with_profile(cli.profile);
    let config = loader.load().context("loading configuration")?;

    if let Err(err) = init_tracing(&config) {
        eprintln!("Warning: telemetry initialization failed: {}", err);
    }
    info!(profile = %config.profile, "Configuration loaded");

    let host = TerminalHost::new();
    match cli.command {
        Command::Config => {
            println!("{}", config.redacted_json()?);
            Ok(())
        }
        Command::Callback { uri } => {
            commands::handle_authorization_callback(&host, &uri).await;
            Ok(())
        }
        command => {
            let service = connect(&config)?;
            dispatch(command, &config, service, &host).await
        }
    }
}

fn connect(config: &AppConfig) -> Result<ApimService> {
    let raw = config
        .access_token
        .as_deref()
        .ok_or_else(|| anyhow!("APIM_ACCESS_TOKEN is not set"))?;
    let credential = StaticTokenCredential::from_jwt(raw).context("reading access token")?;
    Ok(ApimService::from_config(config, Arc::new(credential))?)
}

async fn dispatch<H>(command: Command, config: &AppConfig, service: ApimService, host: &H) -> Result<()>
where
    H: Host + ?Sized,
{
    let mut tree = ResourceTree::new(service);
    let root = tree.root();

    match command {
        Command::Tree => {
            let mut lines = Vec::new();
            render(&mut tree, root, 0, &mut lines).await?;
            println!("{}", lines.join("\n"));
        }
        Command::Providers(ProviderCommand::Create) => {
            commands::create_authorization_provider(&mut tree, host, root).await?;
        }
        Command::Providers(ProviderCommand::Edit { provider }) => {
            let node = locate(&mut tree, &[&provider]).await?;
            commands::edit_authorization_provider(&mut tree, host, node).await?;
        }
        Command::Providers(ProviderCommand::Delete { provider }) => {
            let node = locate(&mut tree, &[&provider]).await?;
            commands::delete_node(&mut tree, host, node).await?;
        }
        Command::Authorizations(AuthorizationCommand::Create { provider }) => {
            let node = locate(&mut tree, &[&provider]).await?;
            commands::create_authorization(&mut tree, host, node, &config.redirect).await?;
        }
        Command::Authorizations(AuthorizationCommand::Delete(args)) => {
            let node = locate(&mut tree, &[&args.provider, &args.authorization]).await?;
            commands::delete_node(&mut tree, host, node).await?;
        }
        Command::Permissions(PermissionCommand::Create(args)) => {
            let node = locate(&mut tree, &[&args.provider, &args.authorization]).await?;
            commands::create_authorization_permission(
                &mut tree,
                host,
                node,
                &config.identity_discovery,
            )
            .await?;
        }
        Command::Permissions(PermissionCommand::Delete {
            authorization,
            permission,
        }) => {
            let node = locate(
                &mut tree,
                &[&authorization.provider, &authorization.authorization, &permission],
            )
            .await?;
            commands::delete_node(&mut tree, host, node).await?;
        }
        Command::Authorize(args) => {
            let node = locate(&mut tree, &[&args.provider, &args.authorization]).await?;
            commands::authorize(&tree, host, node, &config.redirect).await?;
        }
        Command::Policy(args) => {
            let node = locate(&mut tree, &[&args.provider, &args.authorization]).await?;
            commands::copy_authorization_policy(&tree, host, node).await?;
        }
        Command::Gateways(GatewayCommand::List) => {
            for gateway in tree.service().list_gateways().await? {
                println!(
                    "{}\t{}\t{}",
                    gateway.name, gateway.properties.region, gateway.properties.heartbeat
                );
            }
        }
        Command::Gateways(GatewayCommand::Apis { gateway }) => {
            for api in tree.service().list_gateway_apis(&gateway).await? {
                println!("{}", api.name);
            }
        }
        Command::Gateways(GatewayCommand::AddApi { gateway, api }) => {
            let created = tree.service().create_gateway_api(&gateway, &api).await?;
            host.info(&format!("Added API '{}' to gateway '{}'.", created.name, gateway))
                .await;
        }
        Command::Gateways(GatewayCommand::RemoveApi { gateway, api }) => {
            tree.service().delete_gateway_api(&gateway, &api).await?;
            host.info(&format!("Removed API '{}' from gateway '{}'.", api, gateway))
                .await;
        }
        Command::Gateways(GatewayCommand::Token {
            gateway,
            days,
            key_type,
        }) => {
            commands::generate_gateway_token(tree.service(), host, &gateway, days, &key_type)
                .await?;
        }
        Command::EnableManagedIdentity => {
            commands::enable_managed_identity(tree.service(), host).await?;
        }
        Command::Config | Command::Callback { .. } => {}
    }
    Ok(())
}

/// Walks provider → authorization → permission by name from the root.
async fn locate(tree: &mut ResourceTree, path: &[&String]) -> Result<NodeId> {
    let mut node = tree.root();
    // Collection nodes sit between every named level.
    for name in path {
        let collection = tree
            .load_children(node)
            .await?
            .first()
            .copied()
            .ok_or_else(|| anyhow!("'{}' has no children", name))?;
        tree.load_children(collection).await?;
        node = tree
            .find_child(collection, name)
            .ok_or_else(|| anyhow!("'{}' was not found", name))?;
    }
    Ok(node)
}

async fn render(
    tree: &mut ResourceTree,
    node: NodeId,
    depth: usize,
    lines: &mut Vec<String>,
) -> Result<()> {
    let mut pending = vec![(node, depth)];
    while let Some((id, depth)) = pending.pop() {
        let current = tree.node(id)?;
        let mut line = format!("{}{}", "  ".repeat(depth), current.label());
        if let Some(description) = current.description() {
            line.push_str(&format!("  ({})", description));
        }
        lines.push(line);

        let children = tree.load_children(id).await?;
        pending.extend(children.into_iter().rev().map(|child| (child, depth + 1)));
    }
    Ok(())
}
