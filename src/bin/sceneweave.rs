use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sceneweave::{
    CacheStore, CancelToken, DirTemplateRegistry, FfmpegBackend, PlaceholderRenderer, RenderOpts,
    ResolveContext, SpecTarget, Specification, TemplateRegistry, Timeline,
};

#[derive(Parser, Debug)]
#[command(name = "sceneweave", version, about = "Render videos from declarative YAML specs")]
struct Cli {
    /// Log debug details (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render the video described by a spec (requires `ffmpeg` on PATH).
    Generate(GenerateArgs),
    /// Print the resolved timeline as JSON without rendering.
    Resolve(ResolveArgs),
    /// Remove every cached scene for a spec.
    Clean(CleanArgs),
    /// Write a starter spec.
    Create(CreateArgs),
    /// Inspect available templates.
    #[command(subcommand)]
    Template(TemplateCommand),
}

#[derive(Parser, Debug)]
struct GenerateArgs {
    /// Spec file, optionally followed by `:<scene or invocation id>`.
    target: String,

    /// Re-render cached scenes.
    #[arg(long)]
    force: bool,

    /// Number of scenes rendered in parallel.
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Cache directory (overrides `settings.cache.dir`).
    #[arg(long)]
    cache_dir: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct ResolveArgs {
    /// Spec file, optionally followed by `:<scene or invocation id>`.
    target: String,
}

#[derive(Parser, Debug)]
struct CleanArgs {
    spec: PathBuf,

    #[arg(long)]
    cache_dir: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct CreateArgs {
    /// Path of the new spec file.
    path: PathBuf,

    /// Overwrite an existing file.
    #[arg(long)]
    force: bool,
}

#[derive(Subcommand, Debug)]
enum TemplateCommand {
    /// List template names.
    List,
    /// Show a template's description and parameters.
    Info { name: String },
}

const STARTER_SPEC: &str = r##"settings:
  width: 1920
  height: 1080
  fps: 30
  output_file: output.mp4
  scene_defaults:
    cache: true

scenes:
  - type: template
    name: title_and_subtitle
    id: intro
    with:
      title: My video
      subtitle: Made with sceneweave
    transition:
      type: cross-fade
      duration: 0.5

  - id: outro
    type: color
    color: "#101820"
    duration: 2
"##;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.cmd {
        Command::Generate(args) => cmd_generate(args),
        Command::Resolve(args) => cmd_resolve(args),
        Command::Clean(args) => cmd_clean(args),
        Command::Create(args) => cmd_create(args),
        Command::Template(TemplateCommand::List) => cmd_template_list(),
        Command::Template(TemplateCommand::Info { name }) => cmd_template_info(&name),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_spec(path: &Path) -> anyhow::Result<Specification> {
    Specification::from_path(path).with_context(|| format!("load spec '{}'", path.display()))
}

fn resolve_timeline(spec: &Specification, backend: &FfmpegBackend) -> anyhow::Result<Timeline> {
    let registry = DirTemplateRegistry::with_default_roots();
    let ctx = ResolveContext {
        registry: &registry,
        renderer: &PlaceholderRenderer,
        probe: backend,
    };
    Ok(sceneweave::resolve(spec, ctx)?)
}

fn cache_root(spec: &Specification, flag: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    flag.or_else(|| spec.cache_dir())
        .or_else(sceneweave::default_cache_root)
        .context("no cache directory available; pass --cache-dir")
}

fn open_store(spec: &Specification, flag: Option<PathBuf>) -> anyhow::Result<CacheStore> {
    let root = cache_root(spec, flag)?;
    let store = CacheStore::open(&root, spec.settings.cache.max_size)
        .with_context(|| format!("open cache '{}'", root.display()))?;
    tracing::debug!(root = %root.display(), entries = store.entries().len(), "cache opened");
    Ok(store)
}

fn cmd_generate(args: GenerateArgs) -> anyhow::Result<()> {
    let target = SpecTarget::parse(&args.target);
    let spec = load_spec(&target.path)?;
    let backend = FfmpegBackend::new();
    backend.check_available()?;

    let timeline = resolve_timeline(&spec, &backend)?;
    let store = open_store(&spec, args.cache_dir)?;
    let opts = RenderOpts {
        scope: target.scope,
        force: args.force,
        threads: args.jobs,
        work_dir: None,
    };
    let report = sceneweave::render(&timeline, &store, &backend, &opts, &CancelToken::new())?;
    eprintln!(
        "wrote {} ({} rendered, {} cached, {} uncached)",
        report.output.display(),
        report.rendered.len(),
        report.reused.len(),
        report.uncached.len()
    );
    Ok(())
}

fn cmd_resolve(args: ResolveArgs) -> anyhow::Result<()> {
    let target = SpecTarget::parse(&args.target);
    let spec = load_spec(&target.path)?;
    let mut timeline = resolve_timeline(&spec, &FfmpegBackend::new())?;
    if let Some(scope) = &target.scope {
        timeline = timeline.scoped(scope)?;
    }
    let json = serde_json::to_string_pretty(&timeline.view()).context("serialize timeline")?;
    println!("{json}");
    Ok(())
}

fn cmd_clean(args: CleanArgs) -> anyhow::Result<()> {
    let spec = load_spec(&args.spec)?;
    let store = open_store(&spec, args.cache_dir)?;
    let report = store.clean()?;
    eprintln!(
        "removed {} cached scene(s), {} bytes from {}",
        report.entries,
        report.bytes,
        store.root().display()
    );
    Ok(())
}

fn cmd_create(args: CreateArgs) -> anyhow::Result<()> {
    if args.path.exists() && !args.force {
        anyhow::bail!(
            "'{}' already exists (pass --force to overwrite)",
            args.path.display()
        );
    }
    if let Some(parent) = args.path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create directory '{}'", parent.display()))?;
    }
    std::fs::write(&args.path, STARTER_SPEC)
        .with_context(|| format!("write spec '{}'", args.path.display()))?;
    eprintln!("wrote {}", args.path.display());
    Ok(())
}

fn cmd_template_list() -> anyhow::Result<()> {
    let registry = DirTemplateRegistry::with_default_roots();
    for name in registry.names() {
        let description = registry
            .lookup(&name)
            .ok()
            .and_then(|t| t.description.clone())
            .unwrap_or_default();
        println!("{name}\t{description}");
    }
    Ok(())
}

fn cmd_template_info(name: &str) -> anyhow::Result<()> {
    let registry = DirTemplateRegistry::with_default_roots();
    let def = registry.lookup(name)?;
    println!("{}", def.name);
    if let Some(d) = &def.description {
        println!("  {d}");
    }
    println!("  directory: {}", def.base_dir.display());
    println!("  scenes: {}", def.scenes.len());
    if def.params.is_empty() {
        println!("  params: none");
    } else {
        println!("  params:");
        for (pname, p) in &def.params {
            let mut line = format!("    {pname}");
            if p.required {
                line.push_str(" (required)");
            }
            if let Some(default) = &p.default {
                line.push_str(&format!(" [default: {default}]"));
            }
            if let Some(d) = &p.description {
                line.push_str(&format!(" - {d}"));
            }
            println!("{line}");
        }
    }
    Ok(())
}
