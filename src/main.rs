use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use stegim::builder::{
    parse_cipher, parse_compression, parse_kdf, parse_mask, parse_mode, parse_rect, parse_version,
    StegBuilder,
};
use stegim::crypto::StaticPasswords;
use stegim::loadopts::{self, LoadOpts};
use stegim::raster::{FsProvider, ImageRef};
use stegim::section::{HonorMask, TableSpec};

#[derive(Parser)]
#[command(name = "stegim", about = "Steganographic PNG container CLI")]
struct Cli {
    /// Increase log detail (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed files and text into a carrier image
    Pack {
        /// Carrier PNG, optionally frame|N|path
        input: String,
        #[arg(short, long)]
        output: String,
        /// Pixel mode as opaque/transparent payload bits: 0,3,6,9,12,15,24,32
        #[arg(short, long, default_value = "3/3")]
        mode: String,
        /// Channel subset the depth modes write to
        #[arg(long, default_value = "rgb")]
        mask: String,
        /// Alpha threshold level 0-7
        #[arg(long, default_value = "0")]
        alpha: u8,
        /// Header mode, negotiated out of band
        #[arg(long)]
        head_mode: Option<String>,
        #[arg(long)]
        head_mask: Option<String>,
        /// Wire version, e.g. 1.5
        #[arg(short = 'V', long, default_value = "1.5")]
        version: String,
        /// Seed phrase for randomized pixel placement
        #[arg(short, long)]
        rand: Option<String>,
        /// Seed phrase for per-run bit shuffling (v1.4+)
        #[arg(long)]
        shuffle: Option<String>,
        /// Start cursor as x,y
        #[arg(long)]
        cursor: Option<String>,
        /// Confine writes to x,y,w,h
        #[arg(long)]
        rect: Option<String>,
        /// Salt phrase for key derivation (v1.4+)
        #[arg(long)]
        salt: Option<String>,
        /// Files to embed
        #[arg(short, long)]
        file: Vec<PathBuf>,
        /// Inline text to embed
        #[arg(short, long)]
        text: Option<String>,
        /// Pipeline stages text honors: none, compress, encrypt, both
        #[arg(long, default_value = "none")]
        text_honor: String,
        /// gzip[:level] or brotli[:level[:text]]
        #[arg(short, long)]
        compress: Option<String>,
        /// aes256, camellia256, aria256, chacha20 or blowfish
        #[arg(short, long)]
        encrypt: Option<String>,
        /// pbkdf2, argon2i, argon2d, argon2id or scrypt (v1.4+)
        #[arg(long, default_value = "argon2id")]
        kdf: String,
        #[arg(short, long)]
        password: Option<String>,
        /// Additional carriers as name=path pairs, written as an image table
        #[arg(long)]
        carrier: Vec<String>,
        /// Used-pixel sidecar to preload for the master carrier
        #[arg(long)]
        map: Option<String>,
        /// Compute capacity statistics without writing images
        #[arg(long)]
        dry_run: bool,
        /// Write settings needed at load time into a .stglo bundle
        #[arg(long)]
        opts_out: Option<PathBuf>,
        /// Password protecting the .stglo bundle
        #[arg(long)]
        opts_password: Option<String>,
    },
    /// Extract everything embedded in an image
    Unpack {
        input: String,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
        #[arg(long)]
        head_mode: Option<String>,
        #[arg(long)]
        head_mask: Option<String>,
        #[arg(short, long)]
        rand: Option<String>,
        #[arg(long)]
        shuffle: Option<String>,
        #[arg(long)]
        cursor: Option<String>,
        #[arg(short, long)]
        password: Vec<String>,
        /// Load settings from a .stglo bundle first
        #[arg(long)]
        opts: Option<PathBuf>,
        #[arg(long)]
        opts_password: Option<String>,
    },
    /// List embedded payloads without extracting them
    List {
        input: String,
        #[arg(short, long)]
        rand: Option<String>,
        #[arg(long)]
        shuffle: Option<String>,
        #[arg(short, long)]
        password: Vec<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let default = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .init();

    match cli.command {

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack {
            input, output, mode, mask, alpha, head_mode, head_mask, version,
            rand, shuffle, cursor, rect, salt, file, text, text_honor,
            compress, encrypt, kdf, password, carrier, map, dry_run,
            opts_out, opts_password,
        } => {
            let (major, minor) = parse_version(&version)?;
            let mut b = StegBuilder::new()
                .version(major, minor)
                .input(parse_carrier_ref(&input, map.as_deref()))
                .output(ImageRef::parse(&output))
                .mode(parse_mode(&mode)?)
                .mask(parse_mask(&mask)?)
                .alpha(alpha)
                .dry_run(dry_run);
            if let Some(m) = &head_mode {
                b = b.head_mode(parse_mode(m)?);
            }
            if let Some(m) = &head_mask {
                b = b.head_mask(parse_mask(m)?);
            }
            if let Some(phrase) = &rand {
                b = b.global_rand(phrase.clone());
            }
            if let Some(phrase) = &shuffle {
                b = b.global_shuffle(phrase.clone());
            }
            if let Some(c) = &cursor {
                let (x, y) = parse_xy(c)?;
                b = b.cursor(x, y);
            }
            if let Some(phrase) = &salt {
                b = b.salt_phrase(phrase);
            }
            if !carrier.is_empty() {
                b = b.set_image_table(parse_table(&carrier)?);
            }
            if let Some(r) = &rect {
                let (x, y, w, h) = parse_rect(r)?;
                b = b.set_rect(x, y, w, h);
            }
            if let Some(c) = &compress {
                b = b.set_compression(parse_compression(c)?);
            }
            if let Some(cipher) = &encrypt {
                b = b.set_encryption_with(
                    parse_cipher(cipher)?,
                    parse_kdf(&kdf)?,
                    None,
                    password.as_deref(),
                );
            }
            for path in &file {
                b = b.add_file_path(path);
            }
            if let Some(t) = &text {
                b = b.add_text(t.clone(), parse_honor(&text_honor)?);
            }

            let mut provider = FsProvider::new(".");
            let mut passwords = StaticPasswords::new(Vec::<String>::new());
            let out = b.save(&mut provider, &mut passwords)?;

            for st in &out.stats {
                println!(
                    "{:<24} {:>8} payload px   {:>8} visited   {:>8} total",
                    st.label, st.payload_pixels, st.visited_pixels, st.total_pixels
                );
            }
            if !dry_run {
                stegim::saver::write_all(&out, Path::new("."))?;
                for img in &out.images {
                    println!("Wrote: {}", img.output.path);
                }
            }
            if let Some(path) = &opts_out {
                let opts = LoadOpts {
                    head_mode: head_mode.map(|m| parse_mode(&m)).transpose()?.map(|m| m.wire()),
                    head_mask: head_mask.map(|m| parse_mask(&m)).transpose()?.map(|m| m.wire()),
                    rand,
                    shuffle,
                    cursor: cursor.map(|c| parse_xy(&c)).transpose()?,
                    salt,
                };
                let blob = loadopts::pack(&opts, opts_password.as_deref())?;
                std::fs::write(path, blob)?;
                println!("Wrote: {}", path.display());
            }
        }

        // ── Unpack ───────────────────────────────────────────────────────────
        Commands::Unpack {
            input, output_dir, head_mode, head_mask, rand, shuffle, cursor,
            password, opts, opts_password,
        } => {
            let mut b = StegBuilder::new().input(ImageRef::parse(&input));
            if let Some(path) = &opts {
                let blob = std::fs::read(path)?;
                b = b.apply_load_opts(&loadopts::unpack(&blob, opts_password.as_deref())?);
            }
            if let Some(m) = &head_mode {
                b = b.head_mode(parse_mode(m)?);
            }
            if let Some(m) = &head_mask {
                b = b.head_mask(parse_mask(m)?);
            }
            if let Some(phrase) = rand {
                b = b.global_rand(phrase);
            }
            if let Some(phrase) = shuffle {
                b = b.global_shuffle(phrase);
            }
            if let Some(c) = &cursor {
                let (x, y) = parse_xy(c)?;
                b = b.cursor(x, y);
            }

            let mut provider = FsProvider::new(".");
            let mut passwords = StaticPasswords::new(password);
            let (mut proto, loaded) = b.load(&mut provider, &mut passwords)?;

            std::fs::create_dir_all(&output_dir)?;
            for f in &loaded.files {
                let data = proto.extract_file(f)?;
                let dest = output_dir.join(sanitize_name(&f.name));
                std::fs::write(&dest, data)?;
                println!("  extracted  {}", dest.display());
            }
            for p in &loaded.partials {
                let data = proto.extract_partial(p)?;
                let dest = output_dir.join(sanitize_name(&p.name));
                std::fs::write(&dest, data)?;
                println!("  extracted  {}", dest.display());
            }
            for (i, t) in loaded.texts.iter().enumerate() {
                println!("  text[{}]: {}", i, proto.extract_text(t)?);
            }
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input, rand, shuffle, password } => {
            let mut b = StegBuilder::new().input(ImageRef::parse(&input));
            if let Some(phrase) = rand {
                b = b.global_rand(phrase);
            }
            if let Some(phrase) = shuffle {
                b = b.global_shuffle(phrase);
            }
            let mut provider = FsProvider::new(".");
            let mut passwords = StaticPasswords::new(password);
            let (_, loaded) = b.load(&mut provider, &mut passwords)?;

            println!("{:<30} {:>12}  Kind", "Name", "Stored size");
            for f in &loaded.files {
                println!("{:<30} {:>12}  file", f.name, f.size);
            }
            for p in &loaded.partials {
                println!("{:<30} {:>12}  partial ({} pieces)", p.name, p.size, p.piece_count());
            }
            for (i, t) in loaded.texts.iter().enumerate() {
                println!("{:<30} {:>12}  text", format!("text[{}]", i), t.size);
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn parse_carrier_ref(s: &str, map: Option<&str>) -> ImageRef {
    let r = ImageRef::parse(s);
    match map {
        Some(m) => r.with_map(m),
        None => r,
    }
}

fn parse_xy(s: &str) -> Result<(u16, u16), Box<dyn std::error::Error>> {
    let (x, y) = s.split_once(',').ok_or("expected x,y")?;
    Ok((x.trim().parse()?, y.trim().parse()?))
}

fn parse_honor(s: &str) -> Result<HonorMask, Box<dyn std::error::Error>> {
    Ok(match s {
        "none" => HonorMask::default(),
        "compress" => HonorMask::new(true, false),
        "encrypt" => HonorMask::new(false, true),
        "both" => HonorMask::new(true, true),
        other => return Err(format!("unknown honor set '{}'", other).into()),
    })
}

fn parse_table(specs: &[String]) -> Result<Vec<TableSpec>, Box<dyn std::error::Error>> {
    specs
        .iter()
        .map(|s| {
            let (name, out) = s
                .split_once('=')
                .ok_or_else(|| format!("expected name=output, got '{}'", s))?;
            Ok(TableSpec {
                input: ImageRef::parse(name),
                output: ImageRef::parse(out),
            })
        })
        .collect()
}

/// Strips any directory components an embedded name might carry.
fn sanitize_name(name: &str) -> String {
    let flat = name.replace('\\', "/");
    let base = flat.rsplit('/').next().unwrap_or(name);
    if base.is_empty() || base == "." || base == ".." {
        "unnamed".to_string()
    } else {
        base.to_string()
    }
}
