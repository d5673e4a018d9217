use clap::{Parser, Subcommand};
use diskdelta::{DeltaCoordinator, DeltaOptions, Instruction};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "diff-disk", version = "1.0.0", about = "Block-level binary delta for equal-sized raw disk images")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute a delta from an initial image to a target image
    Encode {
        #[arg(short = 'i', long)]
        initial_image: PathBuf,
        #[arg(short = 't', long)]
        target_image: PathBuf,
        #[arg(short = 'b', long)]
        block_size: u32,
        #[arg(short = 'd', long)]
        digest_size: u32,
        #[arg(short = 'o', long)]
        output: PathBuf,
        /// Known-block store path (defaults next to the output delta)
        #[arg(long)]
        known_block_store: Option<PathBuf>,
    },
    /// Apply a delta to an initial image, reconstructing the target image
    Apply {
        #[arg(short = 'i', long)]
        initial_image: PathBuf,
        #[arg(short = 'f', long = "delta")]
        delta: PathBuf,
        #[arg(short = 'o', long)]
        output: PathBuf,
        #[arg(short = 'b', long)]
        block_size: u32,
        #[arg(short = 'g', long = "digest-size")]
        digest_size: u32,
        #[arg(long)]
        known_block_store: Option<PathBuf>,
    },
    /// Parse a delta and print instruction-kind counts and header widths
    Inspect {
        delta: PathBuf,
        #[arg(short = 'i', long)]
        initial_image: PathBuf,
        #[arg(short = 'b', long)]
        block_size: u32,
        #[arg(short = 'g', long = "digest-size")]
        digest_size: u32,
        #[arg(long)]
        known_block_store: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    match Cli::parse().command {
        // ── Encode ───────────────────────────────────────────────────────────
        Commands::Encode { initial_image, target_image, block_size, digest_size, output, known_block_store } => {
            let store_path = known_block_store.unwrap_or_else(|| default_store_path(&output, block_size, digest_size));
            let coordinator = DeltaCoordinator::new(DeltaOptions {
                block_size,
                digest_size_bits: digest_size,
                known_block_store_path: store_path,
            })?;

            let mut last_pct = 0u64;
            let mut progress = |scanned: u64, total: u64| {
                let pct = scanned * 100 / total.max(1);
                if pct >= last_pct + 5 || scanned == total {
                    println!("  build: {scanned}/{total} blocks ({pct}%)");
                    last_pct = pct;
                }
            };
            let message = coordinator.encode(&initial_image, &target_image, Some(&mut progress))?;
            coordinator.write_delta(&message, &output)?;

            let check_path = self_check_path(&output);
            coordinator.apply_message(&message, &initial_image, &check_path)?;
            let matches = std::fs::read(&check_path)? == std::fs::read(&target_image)?;
            let _ = std::fs::remove_file(&check_path);

            if !matches {
                eprintln!("self-decoded round trip did not match target image");
                std::process::exit(1);
            }

            let delta_size = std::fs::metadata(&output)?.len();
            println!("── Encode summary ───────────────────────────────────────");
            println!("  Instructions:       {}", message.instructions.len());
            println!("  Delta size:         {delta_size} B");
            println!("  Self-check:         matches target");
            println!("  Output:             {}", output.display());
        }

        // ── Apply ────────────────────────────────────────────────────────────
        Commands::Apply { initial_image, delta, output, block_size, digest_size, known_block_store } => {
            let store_path = known_block_store.unwrap_or_else(|| default_store_path(&delta, block_size, digest_size));
            let coordinator = DeltaCoordinator::new(DeltaOptions {
                block_size,
                digest_size_bits: digest_size,
                known_block_store_path: store_path,
            })?;
            coordinator.decode_and_apply(&delta, &initial_image, &output)?;
            println!("Applied {} -> {}", delta.display(), output.display());
        }

        // ── Inspect ──────────────────────────────────────────────────────────
        Commands::Inspect { delta, initial_image, block_size, digest_size, known_block_store } => {
            let store_path = known_block_store.unwrap_or_else(|| default_store_path(&delta, block_size, digest_size));
            let coordinator = DeltaCoordinator::new(DeltaOptions {
                block_size,
                digest_size_bits: digest_size,
                known_block_store_path: store_path,
            })?;

            let initial_len = std::fs::metadata(&initial_image)?.len();
            let block_count = (initial_len / block_size as u64) as u32;
            let digest_len = coordinator.hasher().digest_len_bytes();
            let file = std::fs::File::open(&delta)?;
            let message = diskdelta::serializer::deserialize(file, block_count, block_size, digest_len)?;

            let mut literal = 0;
            let mut hash = 0;
            let mut disk_ref = 0;
            let mut msg_ref = 0;
            for instruction in &message.instructions {
                match instruction {
                    Instruction::Literal { .. } => literal += 1,
                    Instruction::Hash { .. } => hash += 1,
                    Instruction::DiskReference { .. } => disk_ref += 1,
                    Instruction::MessageReference { .. } => msg_ref += 1,
                }
            }

            println!("── Delta inspection ─────────────────────────────────────");
            println!("  Path:               {}", delta.display());
            println!("  header_bits:        {}", message.header_bits);
            println!("  changed_index_bits: {}", message.changed_index_bits);
            println!("  disk_ref_bits:      {}", message.disk_ref_bits);
            println!("  msg_ref_bits:       {}", message.msg_ref_bits);
            println!("  Instructions:       {}", message.instructions.len());
            println!("    Literal:          {literal}");
            println!("    Hash:             {hash}");
            println!("    DiskReference:    {disk_ref}");
            println!("    MessageReference: {msg_ref}");
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn default_store_path(near: &std::path::Path, block_size: u32, digest_size: u32) -> PathBuf {
    let dir = near.parent().unwrap_or_else(|| std::path::Path::new("."));
    dir.join(format!("hashes_{block_size}_{digest_size}"))
}

fn self_check_path(output: &std::path::Path) -> PathBuf {
    let mut name = output.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".selfcheck-{}", std::process::id()));
    output.with_file_name(name)
}
