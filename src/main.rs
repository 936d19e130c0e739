use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use veriwipe::certificate::store;
use veriwipe::crypto::public_key_fingerprint;
use veriwipe::devices::{DeviceFactsProvider, LsblkProvider, SandboxProvider};
use veriwipe::operation::{FileOverwriteExecutor, OperationState, ZeroFillProbe};
use veriwipe::ui::{human_bytes, ProgressBar};
use veriwipe::{
    decide, verify_certificate, CertificateBuilder, CoreError, DeviceFacts, OperationRegistry,
    OperatorIdentity, PolicyAnswers, Sensitivity, Signer, VerificationStatus,
};

#[derive(Parser)]
#[command(name = "veriwipe")]
#[command(about = "NIST SP 800-88 sanitization decisioning with signed wipe certificates")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SensitivityArg {
    Low,
    Moderate,
    High,
}

impl From<SensitivityArg> for Sensitivity {
    fn from(value: SensitivityArg) -> Self {
        match value {
            SensitivityArg::Low => Sensitivity::Low,
            SensitivityArg::Moderate => Sensitivity::Moderate,
            SensitivityArg::High => Sensitivity::High,
        }
    }
}

/// Policy flags shared by `decide` and `wipe`.
#[derive(Debug, clap::Args)]
struct PolicyFlags {
    /// The device will be reused after sanitization
    #[arg(long)]
    reuse: bool,

    /// Data sensitivity level
    #[arg(long, value_enum, default_value = "moderate")]
    sensitivity: SensitivityArg,

    /// The device will leave your physical control
    #[arg(long)]
    leaves_control: bool,

    /// The device is encrypted
    #[arg(long)]
    encrypted: bool,

    /// Attest that the device has been encrypted since first use
    #[arg(long)]
    always_encrypted: bool,
}

impl PolicyFlags {
    fn answers(&self) -> PolicyAnswers {
        PolicyAnswers {
            will_be_reused: self.reuse,
            sensitivity: self.sensitivity.into(),
            leaves_physical_control: self.leaves_control,
        }
    }

    /// Overlay the operator's encryption attestation onto detected facts.
    /// Contradictions are left intact for the decision engine to reject.
    fn apply_to(&self, facts: &mut DeviceFacts) {
        if self.encrypted {
            facts.is_encrypted = true;
        }
        if self.always_encrypted {
            facts.encryption_always_on = true;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List detected devices
    List {
        /// Treat *.img files in DIR as virtual devices instead of scanning
        /// block devices
        #[arg(long, value_name = "DIR")]
        sandbox: Option<PathBuf>,

        /// Print the raw device facts as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the sanitization decision flow for a device without touching it
    Decide {
        /// Device path (block device, or sandbox image file)
        device: String,

        #[command(flatten)]
        policy: PolicyFlags,

        /// Print the decision as JSON
        #[arg(long)]
        json: bool,
    },

    /// Sanitize a sandbox image end-to-end and emit a signed certificate
    Wipe {
        /// Sandbox image path (the wipe command refuses raw devices)
        device: String,

        #[command(flatten)]
        policy: PolicyFlags,

        /// RSA private key (unencrypted PKCS#8 DER)
        #[arg(short, long, value_name = "FILE")]
        key: PathBuf,

        /// Where to write the signed certificate
        #[arg(short, long, default_value = "certificate.json", value_name = "FILE")]
        cert_output: PathBuf,

        /// Also write the DER public key for independent verification
        #[arg(long, value_name = "FILE")]
        public_key_output: Option<PathBuf>,

        /// Operator name recorded on the certificate
        #[arg(long, value_name = "NAME")]
        operator_name: String,

        /// Operator title recorded on the certificate
        #[arg(long, value_name = "TITLE")]
        operator_title: String,
    },

    /// Verify a signed certificate against a public key
    Verify {
        /// Signed certificate JSON
        cert: PathBuf,

        /// Public key (DER-encoded RSAPublicKey)
        #[arg(long, value_name = "FILE")]
        public_key: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    if let Err(e) = run(cli.command).await {
        eprintln!("Error: {e:#}");
        let code = e
            .downcast_ref::<CoreError>()
            .map(CoreError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::List { sandbox, json } => cmd_list(sandbox, json),
        Commands::Decide {
            device,
            policy,
            json,
        } => cmd_decide(&device, &policy, json),
        Commands::Wipe {
            device,
            policy,
            key,
            cert_output,
            public_key_output,
            operator_name,
            operator_title,
        } => {
            cmd_wipe(
                &device,
                &policy,
                &key,
                &cert_output,
                public_key_output.as_deref(),
                OperatorIdentity {
                    name: operator_name,
                    title: operator_title,
                },
            )
            .await
        }
        Commands::Verify { cert, public_key } => cmd_verify(&cert, &public_key),
    }
}

fn provider_for(sandbox: Option<PathBuf>) -> Box<dyn DeviceFactsProvider> {
    match sandbox {
        Some(dir) => Box::new(SandboxProvider::new(dir)),
        None => Box::new(LsblkProvider::new()),
    }
}

/// Regular files are sandbox devices; anything else goes through lsblk.
fn describe(device: &str) -> Result<DeviceFacts> {
    let provider: Box<dyn DeviceFactsProvider> = if Path::new(device).is_file() {
        let parent = Path::new(device).parent().unwrap_or(Path::new("."));
        Box::new(SandboxProvider::new(parent))
    } else {
        Box::new(LsblkProvider::new())
    };
    Ok(provider.describe_device(device)?)
}

fn cmd_list(sandbox: Option<PathBuf>, json: bool) -> Result<()> {
    let devices = provider_for(sandbox).list_devices()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }
    if devices.is_empty() {
        println!("No devices detected.");
        return Ok(());
    }
    println!(
        "{:<24} {:<28} {:<20} {:>10} {:<9} {:<4}",
        "PATH", "MODEL", "SERIAL", "SIZE", "MEDIA", "ENC"
    );
    for d in devices {
        println!(
            "{:<24} {:<28} {:<20} {:>10} {:<9} {:<4}",
            d.device_path,
            truncate(&d.model, 28),
            truncate(&d.serial_number, 20),
            human_bytes(d.size_bytes as f64),
            d.media_type.to_string(),
            if d.is_encrypted { "yes" } else { "no" },
        );
    }
    Ok(())
}

fn cmd_decide(device: &str, policy: &PolicyFlags, json: bool) -> Result<()> {
    let mut facts = describe(device)?;
    policy.apply_to(&mut facts);
    let decision = decide(&facts, &policy.answers())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&decision)?);
        return Ok(());
    }
    println!("Device:    {} ({})", facts.device_path, facts.media_type);
    println!("Method:    {}", decision.method);
    println!("Technique: {}", decision.technique);
    for warning in &decision.warnings {
        println!("Warning:   {}", warning.message());
    }
    Ok(())
}

async fn cmd_wipe(
    device: &str,
    policy: &PolicyFlags,
    key_path: &Path,
    cert_output: &Path,
    public_key_output: Option<&Path>,
    operator: OperatorIdentity,
) -> Result<()> {
    // Load the signing key up front: refusing to start beats wiping a
    // device we then cannot certify.
    let key_der = std::fs::read(key_path)
        .with_context(|| format!("reading signing key {}", key_path.display()))?;
    let signer = Signer::from_pkcs8_der(&key_der)?;

    let mut facts = describe(device)?;
    policy.apply_to(&mut facts);
    let decision = decide(&facts, &policy.answers())?;

    println!(
        "Device:    {} ({})",
        facts.device_path,
        human_bytes(facts.size_bytes as f64)
    );
    println!("Method:    {} / {}", decision.method, decision.technique);
    for warning in &decision.warnings {
        println!("Warning:   {}", warning.message());
    }

    let registry = OperationRegistry::new();
    let handle = registry.start(
        &facts,
        &decision,
        Arc::new(FileOverwriteExecutor::new()),
        Arc::new(ZeroFillProbe::new()),
    )?;

    let started = std::time::Instant::now();
    let mut bar = ProgressBar::new(40);
    let mut cancel_requested = false;
    let snapshot = loop {
        if cancel_requested {
            tokio::time::sleep(Duration::from_millis(100)).await;
        } else {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    cancel_requested = true;
                    registry.cancel(&handle);
                    eprintln!("\nCancellation requested; stopping at the next safe checkpoint");
                }
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }

        let snap = registry.poll(&handle);
        let written = (snap.progress_percent / 100.0 * facts.size_bytes as f64) as u64;
        bar.render(
            snap.progress_percent,
            snap.throughput_bytes_per_sec,
            Some(written),
            Some(facts.size_bytes),
        );
        if snap.state.is_terminal() {
            break snap;
        }
    };
    bar.finish();

    match snapshot.state {
        OperationState::Completed => {}
        OperationState::Cancelled => {
            registry.release(&handle)?;
            bail!("operation cancelled; no certificate was produced");
        }
        _ => {
            let detail = snapshot
                .error_detail
                .clone()
                .unwrap_or_else(|| "unknown failure".to_string());
            registry.release(&handle)?;
            if snapshot.verification_status == VerificationStatus::Failed {
                return Err(CoreError::VerificationFailed(detail).into());
            }
            bail!("sanitization failed: {detail}");
        }
    }

    let certificate = CertificateBuilder::new().build(&facts, &decision, &snapshot, &operator)?;
    let signed = signer.sign(&certificate)?;
    store::save_certificate(&signed, cert_output)?;
    registry.release(&handle)?;

    let public_der = signer.public_key_der();
    if let Some(path) = public_key_output {
        std::fs::write(path, &public_der)
            .with_context(|| format!("writing public key {}", path.display()))?;
    }

    println!(
        "Completed in {} (verification {})",
        humantime::format_duration(Duration::from_secs(started.elapsed().as_secs())),
        snapshot.verification_status,
    );
    println!("Certificate: {}", cert_output.display());
    println!(
        "Certificate ID {} signed with key {}",
        signed.certificate.certificate_id,
        public_key_fingerprint(&public_der)
    );
    Ok(())
}

fn cmd_verify(cert: &Path, public_key: &Path) -> Result<()> {
    let signed = store::load_certificate(cert)?;
    let public_der = std::fs::read(public_key)
        .with_context(|| format!("reading public key {}", public_key.display()))?;

    let report = verify_certificate(&signed, &public_der);
    for reason in &report.reasons {
        println!("  {reason}");
    }
    if report.valid {
        println!(
            "VALID: certificate {} verifies",
            signed.certificate.certificate_id
        );
        Ok(())
    } else {
        Err(CoreError::VerificationFailed(format!(
            "certificate {} failed verification",
            signed.certificate.certificate_id
        ))
        .into())
    }
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        value.to_string()
    } else {
        let cut: String = value.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
