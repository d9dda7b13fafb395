use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

use pension_gateway::config::schema::AuthConfig;
use pension_gateway::security::authenticator::Authenticator;
use pension_gateway::security::identity::{Identity, Permission, Role};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the pension portal gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Bearer token for the administrative API
    #[arg(short, long, env = "GATEWAY_TOKEN", default_value = "")]
    token: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the caller's effective permissions
    Permissions,
    /// List roles and their default permissions
    Roles,
    /// Check whether the caller holds a permission
    Check { action: String, resource: String },
    /// Page through the audit log, newest first
    Audit {
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Remaining quota for the caller
    RateStatus {
        #[arg(long, default_value = "/")]
        path: String,
    },
    /// Aggregate rate limiting metrics
    RateMetrics,
    /// IP filter status for the caller's address
    IpStatus,
    /// Add a pattern to the whitelist or blacklist
    IpAdd { list: String, pattern: String },
    /// Remove a pattern from a list
    IpRemove { list: String, pattern: String },
    /// Empty a list
    IpClear { list: String },
    /// Show sanitizer settings
    Sanitizer,
    /// Mint a development token locally
    Token {
        #[arg(long, env = "GATEWAY_JWT_SECRET")]
        secret: String,
        #[arg(long, default_value = "pension-portal")]
        issuer: String,
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "")]
        email: String,
        #[arg(long, default_value = "member")]
        role: Role,
        #[arg(long)]
        organization: Option<String>,
        #[arg(long = "permission")]
        permissions: Vec<Permission>,
        #[arg(long, default_value_t = 3600)]
        ttl_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let client = reqwest::Client::new();
    let mut headers = HeaderMap::new();
    if !cli.token.is_empty() {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", cli.token))?,
        );
    }
    let base = cli.url.trim_end_matches('/');

    let request = match cli.command {
        Commands::Token {
            secret,
            issuer,
            user,
            email,
            role,
            organization,
            permissions,
            ttl_secs,
        } => {
            let authenticator = Authenticator::new(&AuthConfig {
                jwt_secret: secret,
                issuer,
                token_ttl_secs: ttl_secs,
                ..AuthConfig::default()
            });
            let mut identity = Identity::new(user, email, role).with_permissions(permissions);
            identity.organization_id = organization;
            println!("{}", authenticator.issue(&identity)?);
            return Ok(());
        }
        Commands::Permissions => client.get(format!("{}/api/rbac/me/permissions", base)),
        Commands::Roles => client.get(format!("{}/api/rbac/roles", base)),
        Commands::Check { action, resource } => client
            .post(format!("{}/api/rbac/check", base))
            .json(&json!({ "action": action, "resource": resource })),
        Commands::Audit { offset, limit } => client
            .get(format!("{}/api/rbac/audit", base))
            .query(&[("offset", offset), ("limit", limit)]),
        Commands::RateStatus { path } => client
            .get(format!("{}/api/rate-limit/status", base))
            .query(&[("path", path)]),
        Commands::RateMetrics => client.get(format!("{}/api/rate-limit/metrics", base)),
        Commands::IpStatus => client.get(format!("{}/api/ip-filter/status", base)),
        Commands::IpAdd { list, pattern } => client
            .post(format!("{}/api/ip-filter/{}", base, list))
            .json(&json!({ "pattern": pattern })),
        Commands::IpRemove { list, pattern } => client.delete(format!(
            "{}/api/ip-filter/{}/{}",
            base,
            list,
            url::form_urlencoded::byte_serialize(pattern.as_bytes()).collect::<String>()
        )),
        Commands::IpClear { list } => client.delete(format!("{}/api/ip-filter/{}", base, list)),
        Commands::Sanitizer => client.get(format!("{}/api/sanitizer/config", base)),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
