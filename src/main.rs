use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tracing::debug;

use palette_studio::clock::SystemClock;
use palette_studio::color::{self, ColorFormat};
use palette_studio::config::StudioConfig;
use palette_studio::logging;
use palette_studio::remote::HttpArtworkSource;
use palette_studio::state::{SavedPalette, SqliteStorage, Swatch};
use palette_studio::studio::Studio;

/// Namespace shared by the palette library and the lookup cache
const STORAGE_NAMESPACE: &str = "palette-studio";

#[derive(Parser)]
#[command(name = "palette-studio")]
#[command(about = "Extract, save and inspect color palettes from creature artwork", long_about = None)]
pub struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract the dominant colors of a subject's artwork
    Extract {
        name: String,

        /// Use the alternate-coloring artwork
        #[arg(long)]
        variant: bool,

        /// Save the extracted palette to the library
        #[arg(long)]
        save: bool,

        /// Owner id to save under (anonymous when omitted)
        #[arg(long)]
        owner: Option<String>,

        /// Palette name (defaults to the subject name)
        #[arg(long = "name")]
        palette_name: Option<String>,

        #[arg(long, default_value = "rgb")]
        format: ColorFormat,
    },

    /// Extract the dominant colors of a local image file
    ExtractFile {
        path: PathBuf,

        /// Number of colors (defaults to the configured count)
        #[arg(long)]
        count: Option<usize>,

        #[arg(long, default_value = "rgb")]
        format: ColorFormat,
    },

    /// List saved palettes, newest first
    List {
        /// Only palettes of this owner (anonymous palettes when omitted)
        #[arg(long)]
        owner: Option<String>,

        /// List every palette regardless of owner
        #[arg(long, conflicts_with = "owner")]
        all: bool,
    },

    /// Delete a saved palette by id
    Delete { id: String },

    /// Show luminance and the accessible text color for a color
    Contrast { color: String },

    /// Convert a color between rgb, hex and hsl
    Convert {
        color: String,

        #[arg(long)]
        to: ColorFormat,
    },

    /// Drop the cached subject lookups
    ClearCache,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = StudioConfig::load_or_default(cli.config.as_deref())?;

    if let Err(e) = logging::init(&config.log_level) {
        eprintln!("⚠️  Logging disabled: {e}");
    }
    debug!("Loaded config: {:?}", config);

    match cli.cmd {
        Commands::Contrast { color } => contrast(&color),
        Commands::Convert { color, to } => {
            println!("{}", color::convert(&color, to));
            Ok(())
        }
        Commands::ExtractFile { path, count, format } => {
            let mut config = config.clone();
            if let Some(count) = count {
                config.extraction.color_count = count;
            }
            let studio = open_studio(&config)?;
            let extracted = studio
                .extract_file(&path)
                .await
                .ok_or_else(|| anyhow!("extraction of {} was superseded", path.display()))?;

            if extracted.fallback {
                println!("⚠️  Could not read {}, showing fallback colors", path.display());
            }
            for color in &extracted.colors {
                print_swatch(color, format);
            }
            Ok(())
        }
        Commands::Extract {
            name,
            variant,
            save,
            owner,
            palette_name,
            format,
        } => {
            let studio = open_studio(&config)?;
            let loaded = studio
                .load_palette(&name, variant)
                .await?
                .ok_or_else(|| anyhow!("extraction for {name} was superseded"))?;

            println!("🎨 {} (#{})", loaded.subject.name, loaded.subject.id);
            if loaded.extracted.fallback {
                println!("⚠️  Artwork unavailable, showing fallback colors");
            }
            for color in &loaded.extracted.colors {
                print_swatch(color, format);
            }

            if save {
                let saved = studio.save(&loaded, palette_name.as_deref(), owner.as_deref())?;
                println!("💾 Saved as \"{}\" ({})", saved.name, saved.id);
            } else if studio.is_saved(&loaded, owner.as_deref()) {
                println!("✅ Already in your library");
            }
            Ok(())
        }
        Commands::List { owner, all } => {
            let studio = open_studio(&config)?;
            let palettes = if all {
                studio.library().all()
            } else {
                studio.library().list_by_owner(owner.as_deref())
            };
            if palettes.is_empty() {
                println!("No saved palettes.");
            }
            for palette in &palettes {
                print_palette(palette);
            }
            Ok(())
        }
        Commands::Delete { id } => {
            let studio = open_studio(&config)?;
            if studio.library().delete(&id)? {
                println!("🗑️  Deleted {id}");
            } else {
                println!("No palette with id {id}");
            }
            Ok(())
        }
        Commands::ClearCache => {
            open_studio(&config)?.clear_cache();
            println!("🧹 Lookup cache cleared");
            Ok(())
        }
    }
}

/// Studio over the SQLite store and the HTTP artwork source
fn open_studio(config: &StudioConfig) -> anyhow::Result<Studio> {
    let db_path = config
        .storage
        .database_path()
        .ok_or_else(|| anyhow!("could not determine a data directory; set storage.data_dir"))?;
    let storage = Arc::new(
        SqliteStorage::open(&db_path, STORAGE_NAMESPACE)
            .with_context(|| format!("failed to open palette store at {}", db_path.display()))?,
    );
    let source = Arc::new(HttpArtworkSource::new(&config.api, &config.retry)?);
    let (studio, _events) = Studio::from_config(config, source, storage, Arc::new(SystemClock));
    Ok(studio)
}

fn contrast(input: &str) -> anyhow::Result<()> {
    let rgb = color::parse_color(input);
    let best = color::accessible_text_color(rgb);

    println!("{}  {}  {}", rgb, rgb.to_hex(), rgb.to_hsl());
    println!("Luminance: {:.4}", color::relative_luminance(rgb));
    println!("Text: {:?} ({:.2}:1)", best.text, best.ratio);
    if best.needs_overlay {
        println!("⚠️  Below {}:1, add an overlay behind text", color::WCAG_AA_CONTRAST);
    }
    Ok(())
}

fn print_swatch(color: &str, format: ColorFormat) {
    let swatch = Swatch::from_color(color);
    let overlay = if swatch.needs_overlay { " (overlay)" } else { "" };
    println!(
        "  {:<20} text: {:?}{}",
        color::convert(color, format),
        swatch.text,
        overlay
    );
}

fn print_palette(palette: &SavedPalette) {
    let owner = palette.owner_id.as_deref().unwrap_or("anonymous");
    println!(
        "📋 {}  \"{}\"  {}  [{}]",
        palette.id,
        palette.name,
        palette.created_at.format("%Y-%m-%d %H:%M"),
        owner
    );
    let hexes: Vec<String> = palette.swatches().iter().map(|s| s.hex.clone()).collect();
    println!("   {}", hexes.join("  "));
}
