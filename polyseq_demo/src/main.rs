use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use hex::encode as hex_encode;
use log::{LevelFilter, debug, info};
use polyseq_core::{
    EncryptedPayload, FunctionSequence, Initiator, KeyTable, PresetName, QSource, Record,
    Responder, SessionPreset, Transport, calculate_psn, decrypt, derive_key_table, encrypt,
    establish, memory, serve, session_preset,
};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

#[derive(Parser)]
#[command(
    name = "polyseq",
    author,
    version,
    about = "Polymorphic sequence cipher demo (not secure)"
)]
struct Cli {
    #[arg(long, global = true)]
    debug: bool,
    #[arg(long, global = true, value_enum, default_value = "classic")]
    preset: PresetArg,
    /// Seed scalar P (decimal, negative decimal or 0x hex).
    #[arg(long, global = true, value_parser = parse_scalar)]
    p: Option<u64>,
    /// Salt scalar S.
    #[arg(long, global = true, value_parser = parse_scalar)]
    s: Option<u64>,
    /// Multiplier Q the responder answers with.
    #[arg(long, global = true, value_parser = parse_scalar)]
    q: Option<u64>,
    #[arg(long, global = true)]
    num_keys: Option<usize>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PresetArg {
    Classic,
    Tiny,
}

impl From<PresetArg> for PresetName {
    fn from(arg: PresetArg) -> Self {
        match arg {
            PresetArg::Classic => PresetName::Classic,
            PresetArg::Tiny => PresetName::Tiny,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the key table derived from the session scalars.
    Keytable,
    /// Show the transform chain a PSN selects.
    Sequence {
        #[arg(long, value_name = "N")]
        psn: u64,
    },
    /// Encrypt a message and write the payload as JSON.
    Encrypt {
        #[arg(long, value_name = "TEXT")]
        message: Option<String>,
        #[arg(long, value_name = "FILE")]
        input: Option<PathBuf>,
        /// Use this PSN instead of deriving one from the message.
        #[arg(long, value_name = "N")]
        psn: Option<u64>,
        /// PSN of the previous message in the session.
        #[arg(long, value_name = "N", conflicts_with = "psn")]
        previous_psn: Option<u64>,
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
    },
    /// Decrypt a payload produced by `encrypt`.
    Decrypt {
        #[arg(long, value_name = "FILE")]
        cipher: PathBuf,
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Run initiator and responder against each other in-process.
    Demo {
        #[arg(long = "message", value_name = "TEXT")]
        messages: Vec<String>,
        /// Send a key update after this many messages.
        #[arg(long, value_name = "N")]
        rekey_after: Option<usize>,
        /// Draw Q from OS entropy instead of the preset value.
        #[arg(long)]
        random_q: bool,
        /// Draw Q deterministically from this label.
        #[arg(long, value_name = "TEXT", conflicts_with = "random_q")]
        q_label: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);
    let base = session_preset(cli.preset.into());
    let preset = SessionPreset {
        p: cli.p.unwrap_or(base.p),
        s: cli.s.unwrap_or(base.s),
        q: cli.q.unwrap_or(base.q),
        num_keys: cli.num_keys.unwrap_or(base.num_keys),
        ..base
    };
    debug!("using preset {preset:?}");
    match cli.command {
        Commands::Keytable => cmd_keytable(&preset),
        Commands::Sequence { psn } => cmd_sequence(psn),
        Commands::Encrypt {
            message,
            input,
            psn,
            previous_psn,
            out,
        } => cmd_encrypt(&preset, message, input, psn, previous_psn, out),
        Commands::Decrypt { cipher, out } => cmd_decrypt(&preset, cipher, out),
        Commands::Demo {
            messages,
            rekey_after,
            random_q,
            q_label,
        } => cmd_demo(&preset, messages, rekey_after, random_q, q_label),
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(default));
    builder.format_timestamp(None);
    if debug {
        builder.filter_level(LevelFilter::Debug);
    }
    let _ = builder.try_init();
}

fn build_table(preset: &SessionPreset) -> Result<KeyTable> {
    KeyTable::generate(&preset.shared_parameters()).with_context(|| {
        format!(
            "deriving key table for P={} Q={} S={}",
            preset.p, preset.q, preset.s
        )
    })
}

fn cmd_keytable(preset: &SessionPreset) -> Result<()> {
    let (table, final_s) = derive_key_table(preset.p, preset.q, preset.s, preset.num_keys)?;
    println!(
        "P={} Q={} S={} ({} keys)",
        preset.p,
        preset.q,
        preset.s,
        table.len()
    );
    for (index, key) in table.keys().iter().enumerate() {
        println!("{index:>4}  {key:#018x}  {key}");
    }
    println!("Final S after derivation: {final_s}");
    Ok(())
}

fn cmd_sequence(psn: u64) -> Result<()> {
    let sequence = FunctionSequence::for_psn(psn);
    let steps: Vec<String> = sequence
        .steps()
        .iter()
        .map(|step| format!("{step:?}"))
        .collect();
    println!("PSN {psn}: {}", steps.join(" -> "));
    Ok(())
}

fn cmd_encrypt(
    preset: &SessionPreset,
    message: Option<String>,
    input: Option<PathBuf>,
    psn: Option<u64>,
    previous_psn: Option<u64>,
    out: PathBuf,
) -> Result<()> {
    let plaintext = resolve_plaintext(message, input)?;
    let psn = match psn {
        Some(psn) => psn,
        None => calculate_psn(&plaintext, previous_psn)?,
    };
    let table = build_table(preset)?;
    let payload = encrypt(&plaintext, &table, psn);
    save_json(&out, "payload", &payload)?;
    println!(
        "Encrypted {} bytes with PSN {} -> {}",
        plaintext.len(),
        psn,
        hex_encode(&payload.bytes)
    );
    println!("Wrote payload to {}", out.display());
    Ok(())
}

fn cmd_decrypt(preset: &SessionPreset, cipher: PathBuf, out: Option<PathBuf>) -> Result<()> {
    let payload: EncryptedPayload = load_json(&cipher, "payload")?;
    let table = build_table(preset)?;
    let plaintext = decrypt(&payload, &table);
    debug!(
        "decrypt psn={} len={} chain={:?}",
        payload.psn,
        payload.len(),
        FunctionSequence::for_psn(payload.psn).steps()
    );
    match out {
        Some(path) => {
            fs::write(&path, &plaintext)
                .with_context(|| format!("writing plaintext to {}", path.display()))?;
            println!(
                "Recovered {} bytes and wrote them to {}",
                plaintext.len(),
                path.display()
            );
        }
        None => {
            println!("Recovered plaintext ({} bytes):", plaintext.len());
            println!("{}", String::from_utf8_lossy(&plaintext));
        }
    }
    Ok(())
}

fn cmd_demo(
    preset: &SessionPreset,
    messages: Vec<String>,
    rekey_after: Option<usize>,
    random_q: bool,
    q_label: Option<String>,
) -> Result<()> {
    let messages = if messages.is_empty() {
        vec![
            "Hola servidor".to_string(),
            "Second message".to_string(),
            "Sent after the key update".to_string(),
        ]
    } else {
        messages
    };
    let rekey_after = rekey_after.unwrap_or(2);
    let q_source = match (random_q, q_label) {
        (true, _) => QSource::from_entropy(),
        (false, Some(label)) => QSource::seeded(label.as_bytes()),
        (false, None) => QSource::fixed(preset.q),
    };

    let (mut client, server) = memory::pair();
    let responder_thread = thread::spawn(move || {
        let mut responder = Responder::new(q_source);
        serve(&mut responder, server, |delivered| {
            println!(
                "[responder] PSN {:>2} -> '{}'",
                delivered.psn,
                delivered.text()
            );
        })
    });

    let mut initiator = Initiator::from_preset(preset)?;
    establish(&mut initiator, &mut client)?;
    let status = initiator.status();
    println!(
        "[initiator] session established: P={} Q={} S={} keys={}",
        status.p,
        status.q.unwrap_or_default(),
        status.s,
        status.key_count
    );
    for (index, message) in messages.iter().enumerate() {
        if index > 0 && index == rekey_after {
            let new_s = initiator.next_salt();
            client.send(&initiator.update_keys(new_s)?)?;
            println!("[initiator] keys updated, S={new_s}");
        }
        let payload = initiator.seal(message.as_bytes())?;
        println!(
            "[initiator] sending PSN {:>2}: {}",
            payload.psn,
            hex_encode(&payload.bytes)
        );
        client.send(&Record::from(payload))?;
    }
    client.send(&initiator.release()?)?;

    let summary = responder_thread
        .join()
        .map_err(|_| anyhow!("responder thread panicked"))??;
    info!(
        "responder finished: {:?}, delivered={} key_updates={} violations={}",
        summary.end, summary.delivered, summary.key_updates, summary.violations
    );
    Ok(())
}

fn resolve_plaintext(message: Option<String>, input: Option<PathBuf>) -> Result<Vec<u8>> {
    match (message, input) {
        (Some(text), None) => Ok(text.into_bytes()),
        (None, Some(path)) => {
            fs::read(&path).with_context(|| format!("reading plaintext from {}", path.display()))
        }
        (Some(_), Some(_)) => bail!("Provide either --message or --input, not both."),
        (None, None) => bail!("Provide --message TEXT or --input FILE for data to encrypt."),
    }
}

fn load_json<T: DeserializeOwned>(path: &Path, label: &str) -> Result<T> {
    let data =
        fs::read(path).with_context(|| format!("reading {} from {}", label, path.display()))?;
    let value = serde_json::from_slice(&data)
        .with_context(|| format!("parsing {} from {}", label, path.display()))?;
    Ok(value)
}

fn save_json<T: ?Sized + serde::Serialize>(path: &Path, label: &str, value: &T) -> Result<()> {
    let serialized = serde_json::to_string_pretty(value)?;
    fs::write(path, serialized)
        .with_context(|| format!("writing {} to {}", label, path.display()))?;
    Ok(())
}

/// Accepts decimal, negative decimal (kept as its two's-complement bits) or
/// `0x` hex.
fn parse_scalar(raw: &str) -> Result<u64, String> {
    let trimmed = raw.trim();
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16)
            .map_err(|err| format!("invalid hex scalar '{raw}': {err}"));
    }
    if trimmed.starts_with('-') {
        return trimmed
            .parse::<i64>()
            .map(|value| value as u64)
            .map_err(|err| format!("invalid scalar '{raw}': {err}"));
    }
    trimmed
        .parse::<u64>()
        .map_err(|err| format!("invalid scalar '{raw}': {err}"))
}
