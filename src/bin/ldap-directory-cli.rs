use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use reqwest::Client;
use serde_json::Value;
use std::path::PathBuf;

use ldap_directory_rs::models::Principal;
use ldap_directory_rs::password;
use ldap_directory_rs::redis_db::RedisDirectoryStore;
use ldap_directory_rs::schema::SchemaCatalog;

#[derive(Parser)]
#[command(name = "ldap-directory-cli")]
#[command(about = "Provisioning and admin tool for the LDAP directory service", long_about = None)]
struct Cli {
    /// API base URL (defaults to http://localhost:8080)
    #[arg(
        short,
        long,
        env = "LDAP_DIRECTORY_URL",
        default_value = "http://localhost:8080"
    )]
    url: String,

    /// Bearer token for the admin routes
    #[arg(short, long, env = "LDAP_DIRECTORY_TOKEN")]
    token: Option<String>,

    /// Path to CA certificate file for TLS verification
    #[arg(long, env = "LDAP_DIRECTORY_CA_CERT")]
    ca_cert: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a principal record with a fresh hash and salt
    HashPassword {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },

    /// Check a password against a stored hash and salt
    VerifyPassword {
        #[arg(short, long)]
        password: String,
        #[arg(long)]
        hash: String,
        #[arg(long)]
        salt: String,
    },

    /// Print one section of the standard schema, one description per line
    Schema {
        #[arg(value_enum)]
        section: SchemaSection,
    },

    /// Provision a Redis store with the standard schema and example tree
    SeedRedis {
        #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
        redis_url: String,
        #[arg(long, env = "LDAP_SEED_ADMIN_PASSWORD", default_value = "admin")]
        admin_password: String,
    },

    /// Query the service health endpoint
    Health,

    /// Ask the running service to reload its schema from storage
    ReloadSchema,
}

#[derive(Clone, Copy, ValueEnum)]
enum SchemaSection {
    LdapSyntaxes,
    MatchingRules,
    AttributeTypes,
    ObjectClasses,
}

fn render_section(catalog: &SchemaCatalog, section: SchemaSection) -> Vec<String> {
    match section {
        SchemaSection::LdapSyntaxes => catalog.syntaxes().iter().map(|s| s.render()).collect(),
        SchemaSection::MatchingRules => catalog
            .matching_rules()
            .iter()
            .map(|r| r.render())
            .collect(),
        SchemaSection::AttributeTypes => catalog
            .attribute_types()
            .iter()
            .map(|a| a.render())
            .collect(),
        SchemaSection::ObjectClasses => catalog
            .object_classes()
            .iter()
            .map(|c| c.render())
            .collect(),
    }
}

async fn make_request(
    client: &Client,
    method: reqwest::Method,
    url: &str,
    token: Option<&str>,
) -> Result<Value> {
    let mut req = client.request(method, url);

    if let Some(token) = token {
        req = req.header("Authorization", format!("Bearer {}", token));
    }

    let response = req.send().await.context("Failed to send request")?;
    let status = response.status();
    let text = response.text().await.context("Failed to read response")?;

    if !status.is_success() {
        anyhow::bail!("Request failed with status {}: {}", status, text);
    }

    serde_json::from_str(&text).context("Failed to parse response as JSON")
}

fn print_response(response: &Value) -> Result<()> {
    let shown = match response.get("success").and_then(Value::as_bool) {
        Some(true) => response.get("data").unwrap_or(response),
        Some(false) => {
            let error = response
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            anyhow::bail!("Error: {}", error);
        }
        None => response,
    };
    println!("{}", serde_json::to_string_pretty(shown)?);
    Ok(())
}

fn build_client(ca_cert: Option<&PathBuf>) -> Result<Client> {
    let mut client_builder = Client::builder();

    if let Some(ca_cert_path) = ca_cert {
        let ca_cert_contents = std::fs::read(ca_cert_path)
            .with_context(|| format!("Failed to read CA certificate from {:?}", ca_cert_path))?;
        let ca_cert = reqwest::Certificate::from_pem(&ca_cert_contents)
            .context("Failed to parse CA certificate")?;
        client_builder = client_builder.add_root_certificate(ca_cert);
    }

    client_builder
        .build()
        .context("Failed to build HTTP client")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::HashPassword { username, password } => {
            let principal = Principal::new(username, &password);
            println!("{}", serde_json::to_string_pretty(&principal)?);
        }

        Commands::VerifyPassword {
            password,
            hash,
            salt,
        } => {
            if password::verify_password(&password, &hash, &salt)? {
                println!("✓ Password matches");
            } else {
                anyhow::bail!("Password does not match");
            }
        }

        Commands::Schema { section } => {
            for line in render_section(&SchemaCatalog::standard(), section) {
                println!("{}", line);
            }
        }

        Commands::SeedRedis {
            redis_url,
            admin_password,
        } => {
            let store = RedisDirectoryStore::new(&redis_url, Some(3))
                .await
                .context("Failed to connect to Redis")?;
            if store.seed_if_empty(&admin_password).await? {
                println!("✓ Seeded {}", redis_url);
            } else {
                println!("Directory already provisioned, nothing to do");
            }
        }

        Commands::Health => {
            let client = build_client(cli.ca_cert.as_ref())?;
            let url = format!("{}/health", cli.url);
            let response = make_request(&client, reqwest::Method::GET, &url, None).await?;
            print_response(&response)?;
        }

        Commands::ReloadSchema => {
            let token = cli
                .token
                .as_deref()
                .context("Token required for this operation")?;
            let client = build_client(cli.ca_cert.as_ref())?;
            let url = format!("{}/admin/schema/reload", cli.url);
            let response =
                make_request(&client, reqwest::Method::POST, &url, Some(token)).await?;
            print_response(&response)?;
        }
    }

    Ok(())
}
