//! rtscene CLI - build the demonstration scene and inspect its acceleration structures.

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use rtscene::accel::{IntersectionFunctionLibrary, IntersectionFunctionTable, SceneQuery};
use rtscene::config::Settings;
use rtscene::device::software::SoftwareDevice;
use rtscene::device::{Device, DeviceBuffer};
use rtscene::geometry::Geometry;
use rtscene::scene::Scene;
use rtscene::util::{mask, Vec2};

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("RTSCENE_BUILD_DATE"), ")");

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env("RTSCENE_LOG").unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the fmt subscriber. `RTSCENE_LOG` overrides `default_level`.
/// With `RTSCENE_TRACE=1`, spans also go to trace.json.
#[cfg(feature = "profiling")]
fn init_tracing(default_level: &str) -> Option<tracing_chrome::FlushGuard> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(env_filter(default_level)).with(fmt_layer);

    if env::var("RTSCENE_TRACE").ok().as_deref() != Some("1") {
        let _ = registry.try_init();
        return None;
    }

    let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
        .file("trace.json")
        .build();
    registry.with(chrome_layer).try_init().ok().map(|()| guard)
}

/// Install the fmt subscriber. `RTSCENE_LOG` overrides `default_level`.
#[cfg(not(feature = "profiling"))]
fn init_tracing(default_level: &str) {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(fmt_layer)
        .try_init();
}

/// Parsed command line.
struct Args {
    command: String,
    config: Option<PathBuf>,
    output: Option<PathBuf>,
    no_spheres: bool,
    ascii: bool,
    budget: Option<u64>,
    grid: Option<u32>,
}

fn parse_args(argv: &[String]) -> Result<(Args, &'static str)> {
    let mut level = "info";
    let mut args = Args {
        command: String::new(),
        config: None,
        output: None,
        no_spheres: false,
        ascii: false,
        budget: None,
        grid: None,
    };

    let mut it = argv.iter().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-v" | "--verbose" => level = "debug",
            "-vv" | "--trace" => level = "trace",
            "-q" | "--quiet" => level = "error",
            "-c" | "--config" => {
                args.config = Some(it.next().context("--config needs a path")?.into());
            }
            "--budget" => {
                let v = it.next().context("--budget needs a byte count")?;
                args.budget = Some(v.parse().with_context(|| format!("invalid budget '{v}'"))?);
            }
            "--grid" => {
                let v = it.next().context("--grid needs a radius")?;
                args.grid = Some(v.parse().with_context(|| format!("invalid grid radius '{v}'"))?);
            }
            "--no-spheres" => args.no_spheres = true,
            "--ascii" => args.ascii = true,
            other if other.starts_with('-') => bail!("unknown option: {other}"),
            other if args.command.is_empty() => args.command = other.to_string(),
            other if args.output.is_none() => args.output = Some(other.into()),
            other => bail!("unexpected argument: {other}"),
        }
    }
    Ok((args, level))
}

fn main() -> Result<()> {
    let argv: Vec<String> = env::args().collect();
    let (args, level) = parse_args(&argv)?;
    #[allow(clippy::let_unit_value)]
    let _guard = init_tracing(level);

    match args.command.as_str() {
        "stats" | "s" => cmd_stats(&load_settings(&args)?),
        "probe" | "p" => cmd_probe(&load_settings(&args)?, args.ascii),
        "init-config" => {
            let path = args.output.clone().context("init-config needs an output path")?;
            Settings::default().save(&path)?;
            println!("Wrote default settings to {}", path.display());
            Ok(())
        }
        "version" | "-V" | "--version" => {
            println!("rtscene {VERSION}");
            Ok(())
        }
        "" | "help" | "h" | "-h" | "--help" => {
            print_usage(&argv[0]);
            Ok(())
        }
        other => {
            print_usage(&argv[0]);
            bail!("unknown command: {other}")
        }
    }
}

fn print_usage(prog: &str) {
    println!("rtscene {VERSION} - ray tracing scene and acceleration structure tool");
    println!();
    println!("Usage: {} [options] <command>", prog);
    println!();
    println!("Commands:");
    println!("  s, stats            Build the Cornell box grid and report structure sizes");
    println!("  p, probe            Trace primary rays and report what they hit");
    println!("  init-config <path>  Write default settings");
    println!("  version             Show version");
    println!();
    println!("Options:");
    println!("  -c, --config <path>  Settings file (JSON)");
    println!("  --budget <bytes>     Device memory budget");
    println!("  --grid <radius>      Instance grid radius");
    println!("  --no-spheres         Use a short box instead of the sphere");
    println!("  --ascii              Print the probe image");
    println!("  -v, --verbose        Debug output");
    println!("  -vv, --trace         Trace output (very verbose)");
    println!("  -q, --quiet          Errors only");
}

fn load_settings(args: &Args) -> Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => Settings::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Settings::default(),
    };
    if args.no_spheres {
        settings.use_intersection_functions = false;
    }
    if args.budget.is_some() {
        settings.memory_budget = args.budget;
    }
    if let Some(grid) = args.grid {
        settings.grid_radius = grid;
    }
    settings.validate()?;
    Ok(settings)
}

fn build_scene(settings: &Settings) -> Result<Scene<SoftwareDevice>> {
    let device = SoftwareDevice::with_budget(settings.memory_budget).with_unified_memory(settings.unified_memory);
    let mut scene = Scene::instanced_cornell_box(device, &settings.cornell_box_options())?;
    scene.upload_to_buffers().context("uploading scene")?;
    Ok(scene)
}

fn cmd_stats(settings: &Settings) -> Result<()> {
    let scene = build_scene(settings)?;
    let report = scene.build_report();

    println!("Device: {}", scene.device().name());
    println!(
        "Scene: {} geometries, {} instances, {} lights",
        scene.geometries().len(),
        scene.instances().len(),
        scene.light_count()
    );
    println!();
    println!("{:<24} {:>10} {:>12} {:>12} {:>12}", "structure", "prims", "build", "scratch", "compacted");
    for s in report.primitive_structures.iter().chain(report.instance_structure.iter()) {
        println!(
            "{:<24} {:>10} {:>12} {:>12} {:>12}",
            s.label, s.primitive_count, s.build_size, s.scratch_size, s.compacted_size
        );
    }
    println!();

    let build = report.total_build_size();
    let compacted = report.total_compacted_size();
    println!("Total build size:     {build} bytes");
    println!("Total compacted size: {compacted} bytes");
    if build > 0 {
        println!("Compaction saves:     {:.1}%", 100.0 * (build - compacted) as f64 / build as f64);
    }

    if let Some(instances) = scene.manager().instance_buffer() {
        println!("Instance buffer:      {} bytes ({:?})", instances.len(), instances.storage_mode());
    }

    let mem = scene.device().memory_stats();
    println!("Device memory:        {} bytes in use, {} peak, {} allocations", mem.allocated, mem.peak, mem.allocations);
    if let Some(budget) = scene.device().memory_budget() {
        println!("Memory budget:        {budget} bytes ({:.1}% peak)", 100.0 * mem.peak as f64 / budget as f64);
    }
    Ok(())
}

fn cmd_probe(settings: &Settings, ascii: bool) -> Result<()> {
    let scene = build_scene(settings)?;
    let library = IntersectionFunctionLibrary::with_builtins();
    let table = IntersectionFunctionTable::for_scene(&scene, &library)?;
    let tlas = scene.instance_structure()?;
    let query = SceneQuery::new(tlas, &table)?;

    let (w, h) = (settings.probe_width, settings.probe_height);
    let aspect = w as f32 / h as f32;
    let fov = settings.field_of_view.to_radians();
    let camera = scene.camera();
    let rays: Vec<_> = (0..h)
        .flat_map(|y| (0..w).map(move |x| (x, y)))
        .map(|(x, y)| {
            let uv = Vec2::new(
                (x as f32 + 0.5) / w as f32 * 2.0 - 1.0,
                1.0 - (y as f32 + 0.5) / h as f32 * 2.0,
            );
            camera.primary_ray(uv, aspect, fov)
        })
        .collect();

    let hits = query.closest_hits(&rays, mask::RAY_MASK_PRIMARY);

    let mut per_geometry = vec![0usize; scene.geometries().len()];
    for hit in hits.iter().flatten() {
        per_geometry[hit.geometry_index as usize] += 1;
    }
    let missed = hits.iter().filter(|h| h.is_none()).count();

    println!("Probe: {w}x{h} primary rays");
    for (i, (geometry, count)) in scene.geometries().iter().zip(&per_geometry).enumerate() {
        println!("  geometry {i} ({}): {count} hits", geometry.kind_name());
    }
    println!("  miss: {missed}");

    if ascii {
        println!();
        for row in hits.chunks(w as usize) {
            let line: String = row
                .iter()
                .map(|hit| match hit {
                    None => ' ',
                    Some(hit) => match scene.geometries().get(hit.geometry_index as usize) {
                        Some(Geometry::Sphere(_)) => 'o',
                        _ if hit.geometry_index == 0 => '*',
                        _ => '#',
                    },
                })
                .collect();
            println!("{line}");
        }
    }
    Ok(())
}
