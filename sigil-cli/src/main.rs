use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use sigil_attest::cache::VerificationCache;
use sigil_attest::{BundleVerifier, SealStatus, VerifierConfig};
use sigil_core::jwk::EcJwk;
use sigil_core::store::{FileStore, KeyValueStore};
use sigil_proof::bundle::{build_bundle_unsigned, hash_bundle, ProofBundle};
use sigil_proof::capsule::ProofCapsule;
use sigil_proof::owner::{public_key_id, OwnerKeyDerivation};
use sigil_proof::svg::{parse_embedded, EmbeddedPayload};
use sigil_proof::zk::groth16::VERIFICATION_KEY_PATH;
use sigil_proof::zk::Groth16Verifier;
use sigil_proof::SharedReceipt;

#[derive(Parser)]
#[command(name = "sigil")]
#[command(about = "Offline verifier for sigil proof bundles")]
#[command(version)]
struct Cli {
    /// Verifier config file (default: ~/.sigil/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a sigil SVG or a bundle JSON file
    Verify {
        /// Path to .svg or .json
        input: String,

        /// Groth16 verification key (snarkjs JSON)
        #[arg(long)]
        vkey: Option<PathBuf>,

        /// Enforce this relying party id on the author signature
        #[arg(long)]
        rp_id: Option<String>,

        /// Current pulse, for cache expiry
        #[arg(long, default_value = "0")]
        pulse: u64,

        /// Fail if the bundle carries no author signature
        #[arg(long)]
        require_author: bool,

        /// Skip the verification cache
        #[arg(long)]
        no_cache: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the capsule hash of a capsule, bundle or SVG
    CapsuleHash {
        input: String,
    },

    /// Recompute the bundle hash of a bundle or SVG
    BundleHash {
        input: String,
    },

    /// Shareable receipt links
    Receipt {
        #[command(subcommand)]
        action: ReceiptAction,
    },

    /// Derive the owner key for a receiver
    OwnerKey {
        /// Receiver public key (JWK JSON file)
        #[arg(long)]
        jwk: PathBuf,

        /// Pulse at which the sigil was received
        #[arg(long)]
        pulse: u64,

        /// Hash of the receive bundle
        #[arg(long)]
        bundle_hash: String,

        /// Identity key of the previous owner
        #[arg(long)]
        origin: Option<String>,

        /// Check a claimed owner key instead of printing one
        #[arg(long)]
        check: Option<String>,
    },

    /// Inspect or clear the verification cache
    Cache {
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Subcommand)]
enum ReceiptAction {
    /// Build a receipt parameter from a sealed SVG or bundle
    Encode { input: String },
    /// Decode and check a receipt URL or parameter
    Decode { url: String },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let config = match VerifierConfig::load_or_default(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: cannot load config: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Verify {
            input,
            vkey,
            rp_id,
            pulse,
            require_author,
            no_cache,
            json,
        } => {
            let mut config = config;
            if rp_id.is_some() {
                config.rp_id = rp_id;
            }
            if vkey.is_some() {
                config.vkey_path = vkey;
            }
            cmd_verify(&input, &config, pulse, require_author, !no_cache, json)
        }
        Commands::CapsuleHash { input } => cmd_capsule_hash(&input),
        Commands::BundleHash { input } => cmd_bundle_hash(&input),
        Commands::Receipt { action } => match action {
            ReceiptAction::Encode { input } => cmd_receipt_encode(&input),
            ReceiptAction::Decode { url } => cmd_receipt_decode(&url),
        },
        Commands::OwnerKey {
            jwk,
            pulse,
            bundle_hash,
            origin,
            check,
        } => cmd_owner_key(&jwk, pulse, &bundle_hash, origin, check.as_deref()),
        Commands::Cache { clear } => cmd_cache(&config, clear),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

enum Loaded {
    Svg(String),
    Bundle(ProofBundle),
    Capsule(ProofCapsule),
}

fn load(input: &str) -> anyhow::Result<Loaded> {
    let path = Path::new(input);
    if !path.exists() {
        bail!("file not found: {input}");
    }
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {input}"))?;
    if text.trim_start().starts_with('<') {
        return Ok(Loaded::Svg(text));
    }
    let value: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("{input} is neither SVG nor JSON"))?;
    if value.get("proofCapsule").is_some() {
        Ok(Loaded::Bundle(ProofBundle::from_value(value)?))
    } else {
        Ok(Loaded::Capsule(ProofCapsule::from_value(&value)?))
    }
}

fn load_bundle(input: &str) -> anyhow::Result<ProofBundle> {
    match load(input)? {
        Loaded::Bundle(b) => Ok(b),
        Loaded::Svg(svg) => match parse_embedded(&svg)? {
            EmbeddedPayload::Bundle(b) => Ok(*b),
            EmbeddedPayload::Capsule(_) => bail!("{input} embeds only a capsule, no bundle"),
        },
        Loaded::Capsule(_) => bail!("{input} is a capsule, not a bundle"),
    }
}

fn open_cache_store(config: &VerifierConfig) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    let store = match &config.cache_dir {
        Some(dir) => FileStore::open_at(dir.clone()),
        None => FileStore::open_default("cache"),
    }
    .context("opening verification cache")?;
    Ok(Arc::new(store))
}

fn cmd_verify(
    input: &str,
    config: &VerifierConfig,
    pulse: u64,
    require_author: bool,
    use_cache: bool,
    json: bool,
) -> anyhow::Result<()> {
    let mut verifier = BundleVerifier::new(config).require_author_sig(require_author);

    let vkey_path = config
        .vkey_path
        .clone()
        .or_else(|| Some(PathBuf::from(VERIFICATION_KEY_PATH)).filter(|p| p.exists()));
    if let Some(path) = &vkey_path {
        let groth16 = Groth16Verifier::from_file(path)
            .with_context(|| format!("loading verification key {}", path.display()))?;
        tracing::debug!(
            path = %path.display(),
            n_public = groth16.n_public(),
            "loaded verification key"
        );
        verifier = verifier.with_groth16(groth16);
    }
    if use_cache {
        verifier = verifier.with_cache(open_cache_store(config)?);
    }

    let start = Instant::now();
    let report = match load(input)? {
        Loaded::Svg(svg) => verifier.verify_svg(&svg, pulse)?,
        Loaded::Bundle(bundle) => verifier.verify_bundle(&bundle, pulse)?,
        Loaded::Capsule(_) => bail!("{input} is a bare capsule; nothing to verify against"),
    };
    let elapsed = start.elapsed();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("verifying: {input}");
    println!();
    println!("  pulse:        {}", report.capsule.pulse);
    println!("  day:          {}", report.capsule.day_label);
    println!("  identity:     {}", report.capsule.identity_key);
    println!("  slug:         {}", report.capsule.verifier_slug);
    println!("  capsule hash: {}", report.capsule_hash);
    println!("  svg hash:     {}", report.svg_hash);
    if let Some(h) = &report.bundle_hash {
        println!("  bundle hash:  {h}");
    }
    println!("  author sig:   {}", seal_label(report.author));
    println!("  zk proof:     {}", seal_label(report.zk));
    if let Some(curve) = &report.zk_curve {
        println!("  zk curve:     {curve}");
    }
    if report.cached {
        println!("  (cached result)");
    }
    println!("  verify time:  {:.1}ms", elapsed.as_secs_f64() * 1000.0);
    println!();
    println!("  VERIFICATION COMPLETE");
    Ok(())
}

fn seal_label(status: SealStatus) -> &'static str {
    match status {
        SealStatus::Verified => "verified",
        SealStatus::NotPresent => "not present",
        SealStatus::Unchecked => "present, not checked (no verification key)",
    }
}

fn cmd_capsule_hash(input: &str) -> anyhow::Result<()> {
    let capsule = match load(input)? {
        Loaded::Capsule(c) => c,
        Loaded::Bundle(b) => b.capsule()?,
        Loaded::Svg(svg) => match parse_embedded(&svg)? {
            EmbeddedPayload::Bundle(b) => b.capsule()?,
            EmbeddedPayload::Capsule(c) => c,
        },
    };
    println!("{}", capsule.hash()?);
    Ok(())
}

fn cmd_bundle_hash(input: &str) -> anyhow::Result<()> {
    let bundle = load_bundle(input)?;
    let computed = hash_bundle(&build_bundle_unsigned(&bundle))?;
    println!("{computed}");
    match bundle.bundle_hash() {
        Some(claimed) if claimed == computed => {}
        Some(claimed) => {
            eprintln!("warning: embedded bundleHash {claimed} does not match");
            std::process::exit(2);
        }
        None => eprintln!("note: bundle carries no bundleHash"),
    }
    Ok(())
}

fn cmd_receipt_encode(input: &str) -> anyhow::Result<()> {
    let bundle = load_bundle(input)?;
    let receipt = SharedReceipt::from_bundle(&bundle)?;
    println!("{}={}", sigil_proof::receipt::RECEIPT_PARAM, receipt.encode()?);
    Ok(())
}

fn cmd_receipt_decode(url: &str) -> anyhow::Result<()> {
    let receipt = SharedReceipt::from_url(url)
        .or_else(|_| SharedReceipt::decode(url))
        .context("no valid receipt in input")?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

fn cmd_owner_key(
    jwk_path: &Path,
    pulse: u64,
    bundle_hash: &str,
    origin: Option<String>,
    check: Option<&str>,
) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(jwk_path)
        .with_context(|| format!("reading {}", jwk_path.display()))?;
    let jwk: EcJwk = serde_json::from_str(&text).context("parsing receiver JWK")?;
    let kid = public_key_id(&jwk)?;
    let derivation = OwnerKeyDerivation::new(origin, pulse, bundle_hash);

    match check {
        Some(claimed) => {
            derivation.verify(&kid, claimed)?;
            println!("owner key: VALID");
        }
        None => {
            println!("  key id:    {kid}");
            println!("  owner key: {}", derivation.derive(&kid));
            println!("  binding:   {}", serde_json::to_string(&derivation)?);
        }
    }
    Ok(())
}

fn cmd_cache(config: &VerifierConfig, clear: bool) -> anyhow::Result<()> {
    let store = open_cache_store(config)?;
    let cache = VerificationCache::new(Arc::clone(&store));
    let records = cache.records();

    if clear {
        for r in &records {
            cache.remove(&r.bundle_hash, &r.zk_poseidon_hash, &r.verification_version)?;
        }
        println!("removed {} cache records", records.len());
        return Ok(());
    }

    if records.is_empty() {
        println!("no verification cache records found");
        return Ok(());
    }
    for r in &records {
        println!("  bundle:   {}", r.bundle_hash);
        if !r.zk_poseidon_hash.is_empty() {
            println!("  zk hash:  {}", r.zk_poseidon_hash);
        }
        println!("  version:  {}", r.verification_version);
        println!("  verified: pulse {}", r.verified_at_pulse);
        if let Some(exp) = r.expires_at_pulse {
            println!("  expires:  pulse {exp}");
        }
        println!();
    }
    Ok(())
}
