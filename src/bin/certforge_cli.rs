//! CertForge CLI
//!
//! Commands: keygen, sign, verify, encrypt, decrypt, reference, run
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 when a signature does not verify or a batch has failed rows

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use certforge_core::{
    document::Page, spawn_bulk_issuance, Actor, BulkReport, CertForge, Document, EngineConfig,
    Error, FsBlobStore, KeyManager, MemoryRecipientDirectory, Placement, Recipient,
    RequestContext, ReviewStatus, Signer, Values, VariablePosition,
};

#[derive(Parser)]
#[command(name = "certforge-cli")]
#[command(about = "CertForge CLI - document signing and certificate issuance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to an engine configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an RSA keypair and write it as PEM files
    Keygen {
        #[arg(short, long)]
        out_dir: PathBuf,
        #[arg(short, long)]
        passphrase: Option<String>,
    },

    /// Sign a file with a PKCS#8 private key
    Sign {
        #[arg(short, long)]
        key: PathBuf,
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        passphrase: Option<String>,
    },

    /// Verify a base64 signature over a file
    Verify {
        #[arg(short = 'k', long)]
        public_key: PathBuf,
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        signature: String,
    },

    /// Encrypt a small file with a public key
    Encrypt {
        #[arg(short = 'k', long)]
        public_key: PathBuf,
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Decrypt base64 ciphertext with a private key
    Decrypt {
        #[arg(short, long)]
        key: PathBuf,
        #[arg(short, long)]
        ciphertext: String,
        #[arg(short, long)]
        passphrase: Option<String>,
    },

    /// Print the verification URL for an entity
    Reference {
        #[arg(short, long)]
        entity: Uuid,
    },

    /// Register, sign and approve a template, then issue certificates
    Run {
        /// JSON job file
        #[arg(short, long)]
        job: PathBuf,
        #[arg(short, long)]
        out_dir: PathBuf,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobFile {
    title: String,
    pages: Vec<Page>,
    signers: Vec<JobSigner>,
    #[serde(default)]
    variables: Vec<VariablePosition>,
    #[serde(default)]
    recipients: Vec<JobRecipient>,
    #[serde(default)]
    rows: Vec<Values>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobSigner {
    name: String,
    placement: Placement,
    /// PNG/JPEG for a physical signature; absent means digital.
    #[serde(default)]
    image: Option<PathBuf>,
    #[serde(default)]
    passphrase: Option<String>,
}

#[derive(Deserialize)]
struct JobRecipient {
    name: String,
    email: String,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match EngineConfig::load(path) {
            Ok(c) => c,
            Err(e) => return fail(&e),
        },
        None => EngineConfig::default(),
    };

    let result = match cli.command {
        Commands::Keygen { out_dir, passphrase } => {
            keygen(&config, &out_dir, passphrase.as_deref())
        }
        Commands::Sign { key, input, passphrase } => {
            sign(&config, &key, &input, passphrase.as_deref())
        }
        Commands::Verify { public_key, input, signature } => {
            verify(&config, &public_key, &input, &signature)
        }
        Commands::Encrypt { public_key, input } => encrypt(&config, &public_key, &input),
        Commands::Decrypt { key, ciphertext, passphrase } => {
            decrypt(&config, &key, &ciphertext, passphrase.as_deref())
        }
        Commands::Reference { entity } => {
            let base_url = &config.verification.base_url;
            Ok(print_json(&serde_json::json!({
                "entity_id": entity,
                "url": certforge_core::verification::reference_url(base_url, &entity),
            })))
        }
        Commands::Run { job, out_dir } => run(config, &job, &out_dir),
    };

    match result {
        Ok(code) => code,
        Err(e) => fail(&e),
    }
}

fn fail(e: &Error) -> ExitCode {
    tracing::error!(error = %e, "command failed");
    let output = serde_json::json!({
        "success": false,
        "kind": e.kind(),
        "error": e.public_message(),
    });
    println!("{}", output);
    ExitCode::FAILURE
}

fn print_json(value: &serde_json::Value) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(s) => {
            println!("{}", s);
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e.into()),
    }
}

fn decode_base64(value: &str) -> Result<Vec<u8>, Error> {
    BASE64
        .decode(value.trim())
        .map_err(|e| Error::Validation(format!("invalid base64: {}", e)))
}

fn keygen(
    config: &EngineConfig,
    out_dir: &Path,
    passphrase: Option<&str>,
) -> Result<ExitCode, Error> {
    let keys = KeyManager::new(config.keys.clone());
    let owner = Actor::new(Uuid::new_v4(), "cli");
    let ctx = RequestContext::new(owner.clone());
    let keypair = keys.generate_keypair(&ctx, owner.id, passphrase)?;
    fs::create_dir_all(out_dir)?;
    fs::write(out_dir.join("public.pem"), &keypair.public_key_pem)?;
    fs::write(out_dir.join("private.pem"), &keypair.private_key_pem)?;
    let info = keys.key_info(&owner.id)?;
    Ok(print_json(&serde_json::to_value(info)?))
}

fn sign(
    config: &EngineConfig,
    key: &Path,
    input: &Path,
    passphrase: Option<&str>,
) -> Result<ExitCode, Error> {
    let keys = KeyManager::new(config.keys.clone());
    let pem = fs::read_to_string(key)?;
    let signature = keys.sign(&fs::read(input)?, &pem, passphrase)?;
    Ok(print_json(&serde_json::json!({ "signature": BASE64.encode(signature) })))
}

fn verify(
    config: &EngineConfig,
    public_key: &Path,
    input: &Path,
    signature: &str,
) -> Result<ExitCode, Error> {
    let keys = KeyManager::new(config.keys.clone());
    let pem = fs::read_to_string(public_key)?;
    let valid = keys.verify(&fs::read(input)?, &decode_base64(signature)?, &pem)?;
    print_json(&serde_json::json!({ "valid": valid }));
    Ok(if valid { ExitCode::SUCCESS } else { ExitCode::from(2) })
}

fn encrypt(config: &EngineConfig, public_key: &Path, input: &Path) -> Result<ExitCode, Error> {
    let keys = KeyManager::new(config.keys.clone());
    let pem = fs::read_to_string(public_key)?;
    let ciphertext = keys.encrypt(&fs::read(input)?, &pem)?;
    Ok(print_json(&serde_json::json!({ "ciphertext": BASE64.encode(ciphertext) })))
}

fn decrypt(
    config: &EngineConfig,
    key: &Path,
    ciphertext: &str,
    passphrase: Option<&str>,
) -> Result<ExitCode, Error> {
    let keys = KeyManager::new(config.keys.clone());
    let pem = fs::read_to_string(key)?;
    let plaintext = keys.decrypt(&decode_base64(ciphertext)?, &pem, passphrase)?;
    Ok(print_json(&serde_json::json!({ "plaintext": BASE64.encode(plaintext) })))
}

fn run(config: EngineConfig, job_path: &Path, out_dir: &Path) -> Result<ExitCode, Error> {
    let job: JobFile = serde_json::from_str(&fs::read_to_string(job_path)?)?;
    let blobs = Arc::new(FsBlobStore::new(out_dir.join("blobs"))?);
    let directory = Arc::new(MemoryRecipientDirectory::new());
    for r in &job.recipients {
        directory.add(Recipient {
            id: Uuid::new_v4(),
            name: r.name.clone(),
            email: r.email.clone(),
        });
    }
    let forge = CertForge::new(config, blobs, directory)?;

    let owner = Actor::new(Uuid::new_v4(), "cli");
    let owner_ctx = RequestContext::new(owner.clone());
    let actors: Vec<Actor> = job
        .signers
        .iter()
        .map(|s| Actor::new(Uuid::new_v4(), s.name.clone()))
        .collect();
    let signers = actors
        .iter()
        .enumerate()
        .map(|(idx, a)| Signer::new(a.id, a.name.clone(), idx as u32 + 1))
        .collect();

    let original = Document::new(job.pages).to_bytes()?;
    let template = forge.signing.register_template(&owner_ctx, &job.title, &original, signers)?;
    forge.signing.review(&owner_ctx, &template.id, ReviewStatus::Approved, None)?;

    for (signer, actor) in job.signers.iter().zip(&actors) {
        let ctx = RequestContext::new(actor.clone());
        let passphrase = signer.passphrase.as_deref();
        match &signer.image {
            Some(image) => {
                let image = fs::read(image)?;
                forge
                    .signing
                    .record_physical_signature(&ctx, &template.id, &image, signer.placement)?;
            }
            None => {
                forge.keys.generate_keypair(&ctx, actor.id, passphrase)?;
                forge
                    .signing
                    .record_digital_signature(&ctx, &template.id, signer.placement, passphrase)?;
            }
        }
    }

    forge.certificates.set_variable_positions(&owner_ctx, &template.id, job.variables)?;
    let engine = Arc::clone(&forge.certificates);
    let batch = spawn_bulk_issuance(engine, owner_ctx, template.id, job.rows)?;
    let (status, outcomes) = batch.wait();
    let report = BulkReport::from_outcomes(outcomes);

    let ids: Vec<Uuid> = report.generated.iter().map(|c| c.id).collect();
    let archive = forge.certificates.package_bulk(&ids)?;
    let archive_path = out_dir.join("certificates.zip");
    fs::write(&archive_path, archive)?;

    let output = serde_json::json!({
        "success": report.error_count == 0,
        "template": forge.verification.get_status(&template.id)?,
        "integrity": forge.verification.verify_integrity(&template.id)?,
        "batch": status,
        "report": report,
        "archive": archive_path,
    });
    print_json(&output);
    Ok(if report.error_count == 0 { ExitCode::SUCCESS } else { ExitCode::from(2) })
}
