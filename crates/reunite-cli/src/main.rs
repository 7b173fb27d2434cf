use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.reunite.Registry1",
    default_service = "org.reunite.Registry1",
    default_path = "/org/reunite/Registry1"
)]
trait Registry {
    async fn login(&self, username: &str, password: &str) -> zbus::Result<String>;
    async fn logout(&self, token: &str) -> zbus::Result<bool>;
    async fn scan_frame(&self, token: &str, frame_b64: &str) -> zbus::Result<String>;
    async fn submit_report(&self, details_json: &str, image_b64: &str) -> zbus::Result<i64>;
    async fn delete_case(&self, token: &str, case_id: i64) -> zbus::Result<bool>;
    async fn list_cases(&self, token: &str, limit: u32) -> zbus::Result<String>;
    async fn reembed_pending(&self, token: &str) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "reunite", about = "Missing-person case registry CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in as an officer and cache the session token
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    /// Close the cached officer session
    Logout,
    /// Scan a frame image against the registry
    Scan {
        /// Path to the frame image (JPEG/PNG)
        #[arg(short, long)]
        image: PathBuf,
    },
    /// File a new missing-person report
    Report {
        /// Full name of the missing person
        #[arg(long)]
        name: String,
        /// Path to a photo of the missing person
        #[arg(long)]
        image: PathBuf,
        #[arg(long)]
        gender: Option<String>,
        #[arg(long)]
        age: Option<String>,
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        city: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        complainant_name: Option<String>,
        #[arg(long)]
        relationship: Option<String>,
        #[arg(long)]
        complainant_phone: Option<String>,
    },
    /// List recent cases
    List {
        #[arg(short, long, default_value_t = 10)]
        limit: u32,
    },
    /// Hard-delete a case
    Remove {
        /// Case ID to remove
        case_id: i64,
    },
    /// Attach embeddings to cases still missing one
    Reembed,
    /// Show daemon status
    Status,
}

fn token_path() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir())
        .join("reunite-token")
}

fn load_token() -> Result<String> {
    let path = token_path();
    let token = std::fs::read_to_string(&path)
        .with_context(|| format!("no cached session at {} — run `reunite login`", path.display()))?;
    Ok(token.trim().to_string())
}

fn read_image_b64(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(BASE64.encode(bytes))
}

fn print_results(payload: &str) {
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(payload) else {
        println!("{payload}");
        return;
    };
    let Some(results) = parsed["results"].as_array() else {
        println!("{payload}");
        return;
    };

    if results.is_empty() {
        println!("No candidates within the include threshold.");
        return;
    }
    for result in results {
        let flag = if result["matched"].as_bool().unwrap_or(false) {
            "MATCH"
        } else {
            "near "
        };
        println!(
            "[{flag}] #{:<5} {:<30} distance {:.3}",
            result["case_id"],
            result["name"].as_str().unwrap_or("?"),
            result["distance"].as_f64().unwrap_or(f64::NAN),
        );
    }
}

fn print_cases(payload: &str) {
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(payload) else {
        println!("{payload}");
        return;
    };
    let Some(cases) = parsed["cases"].as_array() else {
        println!("{payload}");
        return;
    };

    if cases.is_empty() {
        println!("No cases on file.");
        return;
    }
    for case in cases {
        let embedded = if case["has_embedding"].as_bool().unwrap_or(false) {
            "embedded"
        } else {
            "pending"
        };
        println!(
            "#{:<5} {:<30} {:<10} reported {}",
            case["id"],
            case["missing_full_name"].as_str().unwrap_or("?"),
            embedded,
            case["created_at"].as_str().unwrap_or("?"),
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus — is reunited running?")?;
    let proxy = RegistryProxy::new(&connection).await?;

    match cli.command {
        Commands::Login { username, password } => {
            let token = proxy.login(&username, &password).await?;
            let path = token_path();
            std::fs::write(&path, &token)
                .with_context(|| format!("failed to cache token at {}", path.display()))?;
            println!("Logged in as {username}");
        }
        Commands::Logout => {
            let token = load_token()?;
            proxy.logout(&token).await?;
            let _ = std::fs::remove_file(token_path());
            println!("Session closed");
        }
        Commands::Scan { image } => {
            let token = load_token()?;
            let frame_b64 = read_image_b64(&image)?;
            let payload = proxy.scan_frame(&token, &frame_b64).await?;
            print_results(&payload);
        }
        Commands::Report {
            name,
            image,
            gender,
            age,
            state,
            city,
            description,
            complainant_name,
            relationship,
            complainant_phone,
        } => {
            let details = serde_json::json!({
                "missing_full_name": name,
                "gender": gender,
                "age": age,
                "missing_state": state,
                "missing_city": city,
                "description": description,
                "complainant_name": complainant_name,
                "relationship": relationship,
                "complainant_phone": complainant_phone,
            });
            let image_b64 = read_image_b64(&image)?;
            let case_id = proxy
                .submit_report(&details.to_string(), &image_b64)
                .await?;
            println!("Report registered as case #{case_id}");
        }
        Commands::List { limit } => {
            let token = load_token()?;
            let payload = proxy.list_cases(&token, limit).await?;
            print_cases(&payload);
        }
        Commands::Remove { case_id } => {
            let token = load_token()?;
            if proxy.delete_case(&token, case_id).await? {
                println!("Case #{case_id} removed");
            } else {
                println!("Case #{case_id} not found");
            }
        }
        Commands::Reembed => {
            let token = load_token()?;
            let payload = proxy.reembed_pending(&token).await?;
            println!("{payload}");
        }
        Commands::Status => {
            let payload = proxy.status().await?;
            println!("{payload}");
        }
    }

    Ok(())
}
