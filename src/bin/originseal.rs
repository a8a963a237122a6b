//! Command-line front end for issuing and inspecting originality proofs.
//!
//! `certify` runs the full issuance flow against an in-process cluster of
//! seed-derived verifier nodes; `inspect` audits a proof offline against a
//! verifier registry; `ledger` maintains a ledger snapshot on disk.

use chrono::{DateTime, Utc};
use origin_seal::{
    keys::{encode_public_key_base64, load_signing_key},
    local_cluster, CertificationIndex, ConsensusEngine, HashChainAnchor, HashCommitProver,
    KeySource, ProofLedger, ProofOrchestrator, ProofStatus, SealConfig, VerificationProof,
    VerifierRegistry, Work, WorkMetadata,
};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_SEED_PREFIX: &str = "originseal-node";

fn fatal(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn print_usage() {
    println!("Usage: originseal <keygen|registry|certify|inspect|ledger> ...");
    println!("  keygen [--seed <s> | <key-file>] [--out <secret.hex>]");
    println!("  registry --nodes <N> [--seed-prefix <P>] --out <registry.json>");
    println!("  certify --file <F> --creator <C> [--id <ID>] [--title <T>] [--config <cfg.json>]");
    println!("          [--ledger <snapshot.json>] [--anchor-journal <anchors.jsonl>]");
    println!("          [--seed-prefix <P>] [--out <proof.json>]");
    println!("  inspect --proof <proof.json> --registry <registry.json> [--quorum <N>]");
    println!("  ledger show <snapshot.json>");
    println!("  ledger sweep <snapshot.json>");
    println!("  ledger revoke <snapshot.json> <verification_id> <reason>");
}

fn print_ledger_help() {
    println!("Usage: originseal ledger <show|sweep|revoke> <snapshot.json> ...");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let mut args = env::args().skip(1);
    let command = args.next();
    match command.as_deref() {
        Some("keygen") => cmd_keygen(args.collect()),
        Some("registry") => cmd_registry(args.collect()),
        Some("certify") => cmd_certify(args.collect()).await,
        Some("inspect") => cmd_inspect(args.collect()),
        Some("ledger") => {
            let sub = args.next().unwrap_or_else(|| {
                print_ledger_help();
                std::process::exit(1);
            });
            handle_ledger(&sub, args.collect());
        }
        Some("help") | Some("--help") | None => print_usage(),
        Some(other) => {
            print_usage();
            fatal(&format!("unknown command: {other}"));
        }
    }
}

fn next_value(iter: &mut impl Iterator<Item = String>, flag: &str) -> String {
    iter.next()
        .unwrap_or_else(|| fatal(&format!("{flag} expects a value")))
}

fn cmd_keygen(args: Vec<String>) {
    let mut key_spec: Option<String> = None;
    let mut out_path: Option<PathBuf> = None;
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--seed" => {
                key_spec = Some(format!("ed25519://{}", next_value(&mut iter, "--seed")));
            }
            "--out" => out_path = Some(PathBuf::from(next_value(&mut iter, "--out"))),
            value => {
                if key_spec.is_none() {
                    key_spec = Some(value.to_string());
                } else {
                    fatal(&format!("unknown argument: {value}"));
                }
            }
        }
    }

    let source = KeySource::from_spec(key_spec.as_deref());
    let signing = load_signing_key(&source)
        .unwrap_or_else(|err| fatal(&format!("failed to derive key: {err}")));
    if let Some(path) = &out_path {
        write_file(path, &format!("{}\n", hex::encode(signing.to_bytes())));
        println!("secret_path: {}", path.display());
    }
    println!(
        "public_key_b64: {}",
        encode_public_key_base64(&signing.verifying_key())
    );
}

fn cmd_registry(args: Vec<String>) {
    let mut nodes: Option<usize> = None;
    let mut prefix = DEFAULT_SEED_PREFIX.to_string();
    let mut out_path: Option<PathBuf> = None;
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--nodes" => {
                nodes = Some(
                    next_value(&mut iter, "--nodes")
                        .parse()
                        .unwrap_or_else(|_| fatal("--nodes expects an integer")),
                );
            }
            "--seed-prefix" => prefix = next_value(&mut iter, "--seed-prefix"),
            "--out" => out_path = Some(PathBuf::from(next_value(&mut iter, "--out"))),
            other => fatal(&format!("unknown argument: {other}")),
        }
    }
    let nodes = nodes.unwrap_or_else(|| fatal("--nodes is required"));
    let out_path = out_path.unwrap_or_else(|| fatal("--out is required"));
    let cluster = local_cluster(&prefix, nodes, None, 0.0);
    let json = cluster
        .registry
        .to_json_string()
        .unwrap_or_else(|err| fatal(&format!("failed to encode registry: {err}")));
    write_file(&out_path, &json);
    println!("registry: {} nodes -> {}", nodes, out_path.display());
}

struct CertifyOptions {
    file: PathBuf,
    creator: String,
    id: Option<String>,
    title: Option<String>,
    config: Option<PathBuf>,
    ledger: Option<PathBuf>,
    anchor_journal: Option<PathBuf>,
    seed_prefix: String,
    out: Option<PathBuf>,
}

fn parse_certify(args: Vec<String>) -> CertifyOptions {
    let mut file = None;
    let mut creator = None;
    let mut opts = CertifyOptions {
        file: PathBuf::new(),
        creator: String::new(),
        id: None,
        title: None,
        config: None,
        ledger: None,
        anchor_journal: None,
        seed_prefix: DEFAULT_SEED_PREFIX.to_string(),
        out: None,
    };
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--file" => file = Some(PathBuf::from(next_value(&mut iter, "--file"))),
            "--creator" => creator = Some(next_value(&mut iter, "--creator")),
            "--id" => opts.id = Some(next_value(&mut iter, "--id")),
            "--title" => opts.title = Some(next_value(&mut iter, "--title")),
            "--config" => opts.config = Some(PathBuf::from(next_value(&mut iter, "--config"))),
            "--ledger" => opts.ledger = Some(PathBuf::from(next_value(&mut iter, "--ledger"))),
            "--anchor-journal" => {
                opts.anchor_journal = Some(PathBuf::from(next_value(&mut iter, "--anchor-journal")))
            }
            "--seed-prefix" => opts.seed_prefix = next_value(&mut iter, "--seed-prefix"),
            "--out" => opts.out = Some(PathBuf::from(next_value(&mut iter, "--out"))),
            other => fatal(&format!("unknown argument: {other}")),
        }
    }
    opts.file = file.unwrap_or_else(|| fatal("--file is required"));
    opts.creator = creator.unwrap_or_else(|| fatal("--creator is required"));
    opts
}

fn created_at(path: &Path) -> DateTime<Utc> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

async fn cmd_certify(args: Vec<String>) {
    let opts = parse_certify(args);
    let config = SealConfig::load(opts.config.as_deref())
        .unwrap_or_else(|err| fatal(&format!("failed to load config: {err}")));
    let content = fs::read(&opts.file)
        .unwrap_or_else(|err| fatal(&format!("failed to read {}: {err}", opts.file.display())));
    let ledger = Arc::new(match &opts.ledger {
        Some(path) => load_ledger(path),
        None => ProofLedger::new(),
    });

    let index: Arc<dyn CertificationIndex> = ledger.clone();
    let cluster = local_cluster(
        &opts.seed_prefix,
        config.total_nodes,
        Some(index),
        config.min_entropy_score,
    );
    let engine = ConsensusEngine::new(
        cluster.nodes,
        Arc::new(cluster.registry),
        config.consensus_timeout(),
    );
    let anchor = match &opts.anchor_journal {
        Some(path) => HashChainAnchor::new()
            .with_journal(path)
            .unwrap_or_else(|err| fatal(&format!("failed to open anchor journal: {err}"))),
        None => HashChainAnchor::new(),
    };
    let orchestrator = ProofOrchestrator::new(
        config,
        Arc::new(HashCommitProver),
        Arc::new(engine),
        Arc::new(anchor),
        ledger.clone(),
    );

    let id = opts.id.clone().unwrap_or_else(|| {
        opts.file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "work".to_string())
    });
    let metadata = WorkMetadata {
        title: opts.title.clone().unwrap_or_default(),
        ..WorkMetadata::default()
    };
    let work = Work::ingest(id, opts.creator.clone(), created_at(&opts.file), metadata, &content);

    let proof = match orchestrator.certify_content(&work, &content).await {
        Ok(proof) => proof,
        Err(err) if err.is_duplicate() => fatal(&format!("already verified: {err}")),
        Err(err) => fatal(&format!("verification failed: {err}")),
    };
    if let Some(path) = &opts.ledger {
        save_ledger(path, &ledger);
    }
    let json = proof
        .to_json_string()
        .unwrap_or_else(|err| fatal(&format!("failed to encode proof: {err}")));
    match &opts.out {
        Some(path) => {
            write_file(path, &json);
            println!("verification_id: {}", proof.verification_id);
            println!("proof_path: {}", path.display());
        }
        None => println!("{json}"),
    }
}

fn cmd_inspect(args: Vec<String>) {
    let mut proof_path: Option<PathBuf> = None;
    let mut registry_path: Option<PathBuf> = None;
    let mut quorum = SealConfig::default().quorum_threshold;
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--proof" => proof_path = Some(PathBuf::from(next_value(&mut iter, "--proof"))),
            "--registry" => {
                registry_path = Some(PathBuf::from(next_value(&mut iter, "--registry")))
            }
            "--quorum" => {
                quorum = next_value(&mut iter, "--quorum")
                    .parse()
                    .unwrap_or_else(|_| fatal("--quorum expects an integer"));
            }
            other => fatal(&format!("unknown argument: {other}")),
        }
    }
    let proof_path = proof_path.unwrap_or_else(|| fatal("--proof is required"));
    let registry_path = registry_path.unwrap_or_else(|| fatal("--registry is required"));
    let text = fs::read_to_string(&proof_path)
        .unwrap_or_else(|err| fatal(&format!("failed to read proof: {err}")));
    let proof = VerificationProof::from_json_str(&text)
        .unwrap_or_else(|err| fatal(&format!("failed to parse proof: {err}")));
    let registry = VerifierRegistry::from_json_path(&registry_path)
        .unwrap_or_else(|err| fatal(&format!("failed to load registry: {err}")));

    println!("verification_id: {}", proof.verification_id);
    println!("work_hash: {}", proof.work_hash);
    println!("origin_score: {:.2}", proof.origin_score);
    println!("anchor_id: {}", proof.anchor_id);
    println!("issued_at: {}", proof.issued_at.to_rfc3339());
    println!("expires_at: {}", proof.expires_at.to_rfc3339());
    match proof.audit(&registry, quorum) {
        Ok(valid) => println!("seals: {valid} valid (quorum {quorum})"),
        Err(err) => fatal(&format!("audit failed: {err}")),
    }
    if proof.is_expired(Utc::now()) {
        fatal("proof has expired");
    }
    println!("status: valid");
}

fn handle_ledger(sub: &str, args: Vec<String>) {
    let path = args
        .first()
        .map(PathBuf::from)
        .unwrap_or_else(|| fatal("ledger commands expect a snapshot path"));
    match sub {
        "show" => {
            let ledger = load_ledger(&path);
            let snapshot = ledger.snapshot();
            println!("works: {}  records: {}", ledger.len(), snapshot.records.len());
            for record in snapshot.records {
                let status = match &record.status {
                    ProofStatus::Active => "active".to_string(),
                    ProofStatus::Expired => "expired".to_string(),
                    ProofStatus::Revoked { reason, .. } => format!("revoked ({reason})"),
                };
                println!(
                    "{}  work={}  expires={}  {}",
                    record.proof.verification_id,
                    record.proof.work_hash,
                    record.proof.expires_at.to_rfc3339(),
                    status
                );
            }
        }
        "sweep" => {
            let ledger = load_ledger(&path);
            let expired = ledger.expire_sweep(Utc::now());
            save_ledger(&path, &ledger);
            println!("expired: {expired}");
        }
        "revoke" => {
            let (Some(id), Some(reason)) = (args.get(1), args.get(2)) else {
                fatal("Usage: originseal ledger revoke <snapshot.json> <verification_id> <reason>");
            };
            let ledger = load_ledger(&path);
            let proof = ledger
                .revoke(id, reason)
                .unwrap_or_else(|err| fatal(&format!("revoke failed: {err}")));
            save_ledger(&path, &ledger);
            println!("revoked: {} (work {})", proof.verification_id, proof.work_hash);
        }
        other => {
            print_ledger_help();
            fatal(&format!("unknown ledger command: {other}"));
        }
    }
}

fn load_ledger(path: &Path) -> ProofLedger {
    ProofLedger::load(path).unwrap_or_else(|err| {
        fatal(&format!("failed to load ledger {}: {err}", path.display()))
    })
}

fn save_ledger(path: &Path, ledger: &ProofLedger) {
    ledger.save(path).unwrap_or_else(|err| {
        fatal(&format!("failed to save ledger {}: {err}", path.display()))
    });
}

fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).unwrap_or_else(|err| {
                fatal(&format!("failed to create {}: {err}", parent.display()))
            });
        }
    }
    fs::write(path, contents)
        .unwrap_or_else(|err| fatal(&format!("failed to write {}: {err}", path.display())));
}
