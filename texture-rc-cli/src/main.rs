//! Texture Resource Compiler CLI
//!
//! Compiles source images (PNG, TGA, JPEG, ...) into engine-ready DDS
//! textures driven by a preset property bag, and inspects compiled files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use texture_rc_core::{CubemapKind, ImageObject, ImageProperties, PixelFormat, PropertySet};
use texture_rc_pipeline::{read_dds, TextureCompiler};

#[derive(Parser)]
#[command(name = "texture-rc")]
#[command(about = "A texture resource compiler producing engine-ready DDS files")]
#[command(version)]
struct Cli {
    /// Verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a source image into a DDS texture
    Compile {
        /// Input image path
        #[arg(short, long)]
        input: PathBuf,

        /// Output DDS path (defaults to the input with a .dds extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Preset file with one key=value per line
        #[arg(short, long)]
        preset: Option<PathBuf>,

        /// Property overrides applied after the preset, e.g. -D pixelformat=DXT5
        #[arg(short = 'D', value_name = "KEY=VALUE")]
        define: Vec<String>,
    },

    /// Print the metadata of a compiled DDS texture
    Info {
        /// Compiled DDS file path
        #[arg(short, long)]
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Compile {
            input,
            output,
            preset,
            define,
        } => compile_command(&input, output, preset.as_deref(), &define),
        Commands::Info { input } => info_command(&input),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn compile_command(
    input: &Path,
    output: Option<PathBuf>,
    preset: Option<&Path>,
    defines: &[String],
) -> Result<()> {
    let mut set = PropertySet::new();
    if let Some(path) = preset {
        load_preset(path, &mut set)
            .with_context(|| format!("failed to load preset {}", path.display()))?;
    }
    for define in defines {
        let Some((key, value)) = define.split_once('=') else {
            bail!("override '{}' is not of the form key=value", define);
        };
        set.set_from_pair(key.trim(), value.trim());
    }

    let source = load_source(input)?;
    let output = output.unwrap_or_else(|| input.with_extension("dds"));
    info!(
        input = %input.display(),
        output = %output.display(),
        "compiling texture"
    );

    let compiler = TextureCompiler::new();
    let mut props = ImageProperties::new(set);
    compiler
        .compile_to_file(&source, &mut props, &output)
        .with_context(|| format!("failed to compile {}", input.display()))?;

    println!("✓ {} -> {}", input.display(), output.display());
    Ok(())
}

/// Read a preset file: key=value lines, `#` comments, blank lines ignored
fn load_preset(path: &Path, set: &mut PropertySet) -> Result<()> {
    let text = fs::read_to_string(path)?;
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            bail!("line {}: expected key=value, got '{}'", number + 1, line);
        };
        set.set_from_pair(key.trim(), value.trim());
    }
    Ok(())
}

/// Decode a source image into the canonical 8-bit BGRA image object
fn load_source(path: &Path) -> Result<ImageObject> {
    let decoded =
        image::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let rgba = decoded.to_rgba8();
    let (w, h) = rgba.dimensions();

    let mut source = ImageObject::new(w, h, 1, PixelFormat::A8R8G8B8, CubemapKind::No)?;
    let (data, pitch) = source.mip_data_mut(0);
    for (y, row) in rgba.rows().enumerate() {
        for (x, px) in row.enumerate() {
            let off = y * pitch + x * 4;
            data[off] = px[2];
            data[off + 1] = px[1];
            data[off + 2] = px[0];
            data[off + 3] = px[3];
        }
    }
    Ok(source)
}

fn info_command(input: &Path) -> Result<()> {
    let mut file = fs::File::open(input)
        .with_context(|| format!("failed to open {}", input.display()))?;
    let image = read_dds(&mut file)
        .with_context(|| format!("failed to parse {}", input.display()))?;

    println!("File: {}", input.display());
    print_image("", &image);
    if let Some(attached) = image.attached_image() {
        println!("Attached alpha image:");
        print_image("  ", attached);
    }
    Ok(())
}

fn print_image(indent: &str, image: &ImageObject) {
    println!("{}Format: {}", indent, image.format().info().name);
    println!(
        "{}Size: {}x{}, {} mip(s)",
        indent,
        image.width(0),
        image.height(0),
        image.mip_count()
    );
    if image.cubemap() == CubemapKind::Yes {
        println!("{}Cubemap: 6 faces of {}x{}", indent, image.height(0), image.height(0));
    }
    println!("{}Color model: {:?}", indent, image.color_model());
    println!("{}Average brightness: {:.4}", indent, image.average_brightness());
    if image.persistent_mips() > 0 && image.persistent_mips() < image.mip_count() {
        println!("{}Persistent mips: {}", indent, image.persistent_mips());
    }

    let flags = image.flags();
    let mut names = Vec::new();
    if flags.cubemap {
        names.push("cubemap");
    }
    if flags.greyscale {
        names.push("greyscale");
    }
    if flags.srgb_read {
        names.push("srgb-read");
    }
    if flags.renormalized {
        names.push("renormalized");
    }
    if flags.attached_alpha {
        names.push("attached-alpha");
    }
    if flags.decal {
        names.push("decal");
    }
    if !names.is_empty() {
        println!("{}Flags: {}", indent, names.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_preset_file_parsing() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# diffuse preset").unwrap();
        writeln!(file, "pixelformat = DXT5").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "mipmaps=1").unwrap();

        let mut set = PropertySet::new();
        load_preset(file.path(), &mut set).unwrap();
        assert_eq!(set.get_as_string("pixelformat", ""), "DXT5");
        assert!(set.get_as_bool("mipmaps", false));
    }

    #[test]
    fn test_preset_rejects_malformed_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "pixelformat DXT5").unwrap();
        let mut set = PropertySet::new();
        assert!(load_preset(file.path(), &mut set).is_err());
    }
}
