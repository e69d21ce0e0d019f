use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use sha2::{Digest, Sha256};

use labellens::assets::{load_image_and_labels, AssetSource, LoadedAssets, LocalAssetStore};
use labellens::codec::label_histogram;
use labellens::compositor::{Compositor, SoftwareCompositor};
use labellens::config::ViewerConfig;
use labellens::error_codes::{
    envelope_for, error_code, find_coded_error, CodedError, CodedErrorKind, NO_GPU_ADAPTER, USAGE,
};
use labellens::palette::{PaletteCatalog, PaletteQuery, PaletteSource};
use labellens::selection::Selection;
use labellens::texture_stage::{GpuDevice, RenderContext};

#[derive(Debug, Parser)]
#[command(name = "labellens")]
#[command(version = env!("LABELLENS_BUILD_VERSION"))]
#[command(about = "Highlight one label of a per-pixel label map over its image")]
struct Cli {
    /// Config file (defaults to ./labellens.yaml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Machine-readable output and error envelopes.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render one frame to a PNG.
    Render {
        image_id: String,
        /// Label to highlight; every other pixel is dimmed.
        #[arg(long)]
        select: Option<u8>,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
        /// Use the CPU compositor even when a GPU adapter is available.
        #[arg(long)]
        software: bool,
        /// Print the SHA-256 of the rendered RGBA frame.
        #[arg(long)]
        hash: bool,
    },
    /// Load an image/label pair and report whether it is consistent.
    Check { image_id: String },
    /// List label ids and their pixel counts.
    Labels { image_id: String },
    /// Look up the palette for today, a given day, or an image id.
    Palette {
        #[arg(long, conflicts_with = "date")]
        image_id: Option<String>,
        /// Day as MM-DD.
        #[arg(long)]
        date: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _logger = match labellens::logging::init(cli.verbose) {
        Ok(handle) => Some(handle),
        Err(error) => {
            eprintln!("warning: {error:#}");
            None
        }
    };

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            if cli.json {
                match serde_json::to_string_pretty(&envelope_for(&error)) {
                    Ok(text) => println!("{text}"),
                    Err(_) => eprintln!("error: {error:#}"),
                }
            } else {
                eprintln!("error [{}]: {error:#}", error_code(&error));
            }
            exit_code_for(&error)
        }
    }
}

/// Usage and configuration mistakes exit with 2, like clap's own argument
/// errors; everything else exits with 1.
fn exit_code_for(error: &anyhow::Error) -> ExitCode {
    match find_coded_error(error).map(|coded| coded.kind) {
        Some(CodedErrorKind::Usage) => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = ViewerConfig::discover(cli.config.as_deref())?;

    match &cli.command {
        Commands::Render {
            image_id,
            select,
            output,
            software,
            hash,
        } => run_render(
            &config,
            image_id,
            Selection::from(*select),
            output,
            *software,
            *hash,
            cli.json,
        ),
        Commands::Check { image_id } => run_check(&config, image_id, cli.json),
        Commands::Labels { image_id } => run_labels(&config, image_id, cli.json),
        Commands::Palette { image_id, date } => {
            let query = match (image_id, date) {
                (Some(image_id), _) => PaletteQuery::ImageId(image_id.clone()),
                (None, Some(date)) => PaletteQuery::parse_date(date).map_err(|error| {
                    anyhow!(CodedError::usage(USAGE, format!("{error:#}")))
                })?,
                (None, None) => PaletteQuery::today(),
            };
            run_palette(&config, &query, cli.json)
        }
    }
}

fn run_render(
    config: &ViewerConfig,
    image_id: &str,
    selection: Selection,
    output: &Path,
    force_software: bool,
    print_hash: bool,
    json_output: bool,
) -> Result<()> {
    let assets = load_assets(config, image_id)?;
    let (width, height) = (assets.width, assets.height);
    let compositor = build_compositor(config, assets, force_software)?;

    let frame = compositor.render_frame_rgba(selection)?;
    let backend = compositor.backend_name();
    compositor.release();

    image::RgbaImage::from_raw(width, height, frame.clone())
        .ok_or_else(|| anyhow!("rendered frame does not match {width}x{height}"))?
        .save(output)
        .with_context(|| format!("failed writing {}", output.display()))?;

    let digest = print_hash.then(|| format!("{:x}", Sha256::digest(&frame)));
    if json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "ok": true,
                "output": output.display().to_string(),
                "width": width,
                "height": height,
                "selection": selection.label(),
                "backend": backend,
                "sha256": digest,
            }))?
        );
    } else {
        if let Some(digest) = digest {
            println!("{digest}");
        }
        println!(
            "Wrote {} ({}x{}, selection {}, {})",
            output.display(),
            width,
            height,
            selection,
            backend
        );
    }
    Ok(())
}

fn run_check(config: &ViewerConfig, image_id: &str, json_output: bool) -> Result<()> {
    let assets = load_assets(config, image_id)?;
    let label_count = label_histogram(&assets.raw_labels).len();

    if json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "ok": true,
                "image_id": assets.image_id,
                "width": assets.width,
                "height": assets.height,
                "labels": label_count,
            }))?
        );
    } else {
        println!(
            "OK: {} ({}x{}, {} distinct labels)",
            assets.image_id, assets.width, assets.height, label_count
        );
    }
    Ok(())
}

fn run_labels(config: &ViewerConfig, image_id: &str, json_output: bool) -> Result<()> {
    let assets = load_assets(config, image_id)?;
    let histogram = label_histogram(&assets.raw_labels);
    let total = assets.raw_labels.len().max(1) as f64;

    if json_output {
        let labels = histogram
            .iter()
            .map(|(label, pixels)| json!({ "label": label, "pixels": pixels }))
            .collect::<Vec<_>>();
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "ok": true,
                "image_id": assets.image_id,
                "width": assets.width,
                "height": assets.height,
                "labels": labels,
            }))?
        );
    } else {
        println!("{:>5}  {:>10}  {:>7}", "label", "pixels", "share");
        for (label, pixels) in &histogram {
            let share = *pixels as f64 / total * 100.0;
            println!("{label:>5}  {pixels:>10}  {share:>6.2}%");
        }
    }
    Ok(())
}

fn run_palette(config: &ViewerConfig, query: &PaletteQuery, json_output: bool) -> Result<()> {
    let source = palette_source(config)?;
    let record = source.lookup(query)?;

    if json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "query": query.to_string(), "record": record }))?
        );
        return Ok(());
    }

    match record {
        Some(record) => {
            println!("image: {}", record.image_id);
            for (label, color) in &record.label_colors {
                println!("{label:>5}  {color}");
            }
            if !record.art_info.is_null() {
                println!("art_info: {}", serde_json::to_string(&record.art_info)?);
            }
        }
        None => println!("no palette scheduled for {query}"),
    }
    Ok(())
}

fn load_assets(config: &ViewerConfig, image_id: &str) -> Result<LoadedAssets> {
    let source = asset_source(config)?;
    Ok(load_image_and_labels(source.as_ref(), image_id)?)
}

fn asset_source(config: &ViewerConfig) -> Result<Box<dyn AssetSource>> {
    #[cfg(feature = "remote")]
    {
        if let Some(remote) = config.remote_settings()? {
            return Ok(Box::new(labellens::assets::HttpAssetStore::new(
                reqwest::blocking::Client::new(),
                remote.url,
                remote.bucket,
            )));
        }
    }

    #[cfg(not(feature = "remote"))]
    {
        if config.remote_settings()?.is_some() {
            log::warn!(
                "remote store configured but this build lacks the `remote` feature; using local assets"
            );
        }
    }

    Ok(Box::new(LocalAssetStore::new(config.assets.root.clone())))
}

fn palette_source(config: &ViewerConfig) -> Result<Box<dyn PaletteSource>> {
    if let Some(catalog) = &config.palette.catalog {
        return Ok(Box::new(PaletteCatalog::load(catalog)?));
    }

    #[cfg(feature = "remote")]
    {
        if let Some(remote) = config.remote_settings()? {
            return Ok(Box::new(labellens::palette::RestPaletteSource::new(
                reqwest::blocking::Client::new(),
                remote.url,
                remote.key,
                remote.palette_table,
            )));
        }
    }

    Err(anyhow!(CodedError::usage(
        labellens::error_codes::INVALID_CONFIG,
        "no palette source configured; set palette.catalog in the config file",
    )))
}

fn build_compositor(
    config: &ViewerConfig,
    assets: LoadedAssets,
    force_software: bool,
) -> Result<Compositor> {
    let options = config.context_options()?;
    let (width, height) = (assets.width, assets.height);
    let software = |assets: LoadedAssets| -> Result<Compositor> {
        Ok(Compositor::Software(SoftwareCompositor::new(
            assets.image,
            assets.labels,
            width,
            height,
            options.dim,
        )?))
    };

    if force_software || config.render.software {
        return software(assets);
    }

    match pollster::block_on(GpuDevice::new(config.render.power_preference)) {
        Ok(gpu) => {
            log::debug!("rendering on '{}'", gpu.adapter_name());
            let context = pollster::block_on(RenderContext::initialize(
                &gpu,
                &assets.image,
                &assets.labels,
                width,
                height,
                &options,
            ))?;
            Ok(Compositor::Gpu(context))
        }
        Err(error) if error_code(&error) == NO_GPU_ADAPTER => {
            log::warn!("{error}; falling back to the software compositor");
            software(assets)
        }
        Err(error) => Err(error),
    }
}
