//! corrtrack CLI: displacement fields from image sequences.

use clap::{Args, Parser, Subcommand, ValueEnum};
use image::GrayImage;
use std::path::{Path, PathBuf};

use corrtrack::{
    correlation_surface, crop, AffineFit, CorrelationConfig, Correlator, DisplacementField, Grid,
    Offsets, RegistrationMethod, TrackingMode,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "corrtrack")]
#[command(about = "Sub-pixel image correlation and surface tracking by phase cross-correlation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Displacement of one point between two images.
    Register(CliRegisterArgs),

    /// Dump the correlation surface around one point.
    Surface(CliSurfaceArgs),

    /// Print the size of the centered grid for an image.
    Grid(CliGridArgs),

    /// Displacement field over an image sequence.
    Track(CliTrackArgs),
}

#[derive(Debug, Clone, Args)]
struct CliMethodArgs {
    /// JSON correlation config; command-line flags override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Half size of the correlation window (window side is 2w + 1).
    #[arg(long)]
    window_half_size: Option<usize>,

    /// Registration method.
    #[arg(long, value_enum)]
    method: Option<MethodArg>,

    /// Upsampling factor of the upsampled method (accuracy 1/factor px).
    #[arg(long)]
    upsample_factor: Option<usize>,

    /// Optimized method: Blackman window and phase normalization.
    #[arg(long)]
    phase: bool,

    /// Disable the coarse integer search on a larger window.
    #[arg(long)]
    no_coarse_search: bool,

    /// Attach noise-model uncertainty to each registration.
    #[arg(long)]
    uncertainty: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MethodArg {
    Upsampled,
    Optimized,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Eulerian,
    Lagrangian,
    Reference,
}

impl ModeArg {
    fn to_core(self) -> TrackingMode {
        match self {
            Self::Eulerian => TrackingMode::Eulerian,
            Self::Lagrangian => TrackingMode::Lagrangian,
            Self::Reference => TrackingMode::Reference,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct CliRegisterArgs {
    /// Reference image.
    #[arg(long)]
    source: PathBuf,

    /// Deformed image.
    #[arg(long)]
    target: PathBuf,

    /// Point x coordinate (px).
    #[arg(long)]
    x: f64,

    /// Point y coordinate (px).
    #[arg(long)]
    y: f64,

    /// Prior displacement guess along x (px).
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    dx: f64,

    /// Prior displacement guess along y (px).
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    dy: f64,

    #[command(flatten)]
    method: CliMethodArgs,

    /// Path to write the registration (JSON); printed when omitted.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CliSurfaceArgs {
    #[arg(long)]
    source: PathBuf,

    #[arg(long)]
    target: PathBuf,

    #[arg(long)]
    x: f64,

    #[arg(long)]
    y: f64,

    /// Half size of the correlation window.
    #[arg(long, default_value = "15")]
    half_size: usize,

    /// Blackman window and phase normalization.
    #[arg(long)]
    phase: bool,

    /// Surface sampling is 1/factor px.
    #[arg(long, default_value = "1")]
    upsample_factor: usize,

    /// Path to write the surface (JSON).
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct CliGridArgs {
    #[arg(long)]
    image: PathBuf,

    /// Minimal distance between grid points and image borders (px).
    #[arg(long)]
    margin: f64,

    /// Distance between grid points (px).
    #[arg(long)]
    spacing: f64,

    /// Path to write the grid axes (JSON).
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CliTrackArgs {
    /// Image sequence, in order.
    #[arg(long, num_args = 2.., required = true)]
    images: Vec<PathBuf>,

    /// Minimal distance between grid points and image borders (px).
    #[arg(long)]
    margin: f64,

    /// Distance between grid points (px).
    #[arg(long)]
    spacing: f64,

    #[arg(long, value_enum, default_value_t = ModeArg::Lagrangian)]
    mode: ModeArg,

    /// Lagrangian tracking plus the two-step triangle-closure check.
    #[arg(long, conflicts_with = "mode")]
    two_step: bool,

    /// Fit an affine model and Green-Lagrange strain per step.
    #[arg(long)]
    fit: bool,

    #[command(flatten)]
    method: CliMethodArgs,

    /// Path to write the displacement field (JSON).
    #[arg(long)]
    out: PathBuf,
}

/// Affine fit of one step with its strain.
#[derive(serde::Serialize)]
struct StepFit {
    #[serde(flatten)]
    fit: AffineFit,
    rms_residual: f64,
    green_lagrange_strain: [[f64; 2]; 2],
}

impl From<AffineFit> for StepFit {
    fn from(fit: AffineFit) -> Self {
        let e = fit.green_lagrange_strain();
        Self {
            rms_residual: fit.rms_residual(),
            green_lagrange_strain: [[e[(0, 0)], e[(0, 1)]], [e[(1, 0)], e[(1, 1)]]],
            fit,
        }
    }
}

#[derive(serde::Serialize)]
struct TrackOutput {
    images: Vec<String>,
    grid: Grid,
    field: DisplacementField,
    #[serde(skip_serializing_if = "Option::is_none")]
    triangle_gap: Option<Vec<Vec<f64>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fits: Option<Vec<Option<StepFit>>>,
}

fn build_config(args: &CliMethodArgs) -> CliResult<CorrelationConfig> {
    let mut config = match &args.config {
        Some(path) => CorrelationConfig::from_json_file(path)?,
        None => CorrelationConfig::default(),
    };

    if let Some(w) = args.window_half_size {
        config.window_half_size = w;
    }
    match args.method {
        Some(MethodArg::Upsampled) => {
            if !matches!(config.method, RegistrationMethod::Upsampled { .. }) {
                config.method = RegistrationMethod::default();
            }
        }
        Some(MethodArg::Optimized) => {
            if !matches!(config.method, RegistrationMethod::Optimized { .. }) {
                config.method = RegistrationMethod::optimized(args.phase);
            }
        }
        None => {}
    }
    match &mut config.method {
        RegistrationMethod::Upsampled {
            upsample_factor, ..
        } => {
            if let Some(uf) = args.upsample_factor {
                *upsample_factor = uf;
            }
        }
        RegistrationMethod::Optimized { phase, .. } => {
            if args.upsample_factor.is_some() {
                tracing::warn!("--upsample-factor is ignored by the optimized method");
            }
            *phase |= args.phase;
        }
    }
    if args.no_coarse_search {
        config.coarse_search.enable = false;
    }
    if args.uncertainty {
        config.uncertainty.enable = true;
    }

    config.validate()?;
    Ok(config)
}

fn load_gray(path: &Path) -> CliResult<GrayImage> {
    let img = image::open(path).map_err(|e| -> CliError {
        format!("Failed to open image {}: {}", path.display(), e).into()
    })?;
    Ok(img.to_luma8())
}

fn write_json<T: serde::Serialize>(value: &T, path: &Path) -> CliResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    tracing::info!("Results written to {}", path.display());
    Ok(())
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Register(args) => run_register(&args),
        Commands::Surface(args) => run_surface(&args),
        Commands::Grid(args) => run_grid(&args),
        Commands::Track(args) => run_track(&args),
    }
}

// ── register ───────────────────────────────────────────────────────────

fn run_register(args: &CliRegisterArgs) -> CliResult<()> {
    let correlator = Correlator::new(build_config(&args.method)?);
    let source = load_gray(&args.source)?;
    let target = load_gray(&args.target)?;

    let r = correlator.register(&source, &target, [args.x, args.y], [args.dx, args.dy])?;
    tracing::info!(
        "Displacement at ({:.1}, {:.1}): ({:.3}, {:.3}) px, error={:.4}",
        args.x,
        args.y,
        r.displacement[0],
        r.displacement[1],
        r.error
    );

    match &args.out {
        Some(path) => write_json(&r, path),
        None => {
            println!("{}", serde_json::to_string_pretty(&r)?);
            Ok(())
        }
    }
}

// ── surface ────────────────────────────────────────────────────────────

fn run_surface(args: &CliSurfaceArgs) -> CliResult<()> {
    let source = load_gray(&args.source)?;
    let target = load_gray(&args.target)?;
    let (a, _) = crop(&source, [args.x, args.y], args.half_size)?;
    let (b, _) = crop(&target, [args.x, args.y], args.half_size)?;

    let surface = correlation_surface(&a, &b, args.upsample_factor, args.phase)?;
    tracing::info!(
        "Surface {}x{}, peak at ({:.3}, {:.3}) px",
        surface.lags_x.len(),
        surface.lags_y.len(),
        surface.peak_displacement[0],
        surface.peak_displacement[1]
    );
    write_json(&surface, &args.out)
}

// ── grid ───────────────────────────────────────────────────────────────

fn run_grid(args: &CliGridArgs) -> CliResult<()> {
    let image = load_gray(&args.image)?;
    let grid = Correlator::default().grid(&image, args.margin, args.spacing)?;

    println!("grid size: {}x{}", grid.xs.len(), grid.ys.len());
    println!(" i.e. {} points", grid.len());
    if let Some(path) = &args.out {
        write_json(&grid, path)?;
    }
    Ok(())
}

// ── track ──────────────────────────────────────────────────────────────

fn run_track(args: &CliTrackArgs) -> CliResult<()> {
    let correlator = Correlator::new(build_config(&args.method)?);

    let images = args
        .images
        .iter()
        .map(|p| load_gray(p))
        .collect::<CliResult<Vec<GrayImage>>>()?;
    let (w, h) = images[0].dimensions();
    if let Some((i, _)) = images.iter().enumerate().find(|(_, im)| im.dimensions() != (w, h)) {
        return Err(format!(
            "image {} has size {:?}, expected {}x{}",
            args.images[i].display(),
            images[i].dimensions(),
            w,
            h
        )
        .into());
    }
    tracing::info!("Loaded {} images of {}x{}", images.len(), w, h);

    let grid = correlator.grid(&images[0], args.margin, args.spacing)?;
    let points = grid.points();

    let (field, triangle_gap) = if args.two_step {
        let res = correlator.track_two_steps(&images, &points, &Offsets::Zero)?;
        (res.field, Some(res.triangle_gap))
    } else {
        let field = correlator.track(&images, &points, args.mode.to_core(), &Offsets::Zero)?;
        (field, None)
    };

    if let Some(gaps) = &triangle_gap {
        let finite: Vec<f64> = gaps.iter().flatten().copied().filter(|g| g.is_finite()).collect();
        if !finite.is_empty() {
            let mean = finite.iter().sum::<f64>() / finite.len() as f64;
            tracing::info!("Triangle gap: mean {:.3} px over {} triangles", mean, finite.len());
        }
    }

    let fits = args.fit.then(|| {
        correlator
            .fit(&field)
            .into_iter()
            .enumerate()
            .map(|(k, fit)| {
                let fit = fit.map(StepFit::from);
                if let Some(f) = &fit {
                    let e = f.green_lagrange_strain;
                    tracing::info!(
                        "Step {:02}: Exx={:.4} Eyy={:.4} Exy={:.4} rms={:.3}px",
                        k,
                        e[0][0],
                        e[1][1],
                        e[0][1],
                        f.rms_residual
                    );
                }
                fit
            })
            .collect()
    });

    let output = TrackOutput {
        images: args.images.iter().map(|p| p.display().to_string()).collect(),
        grid,
        field,
        triangle_gap,
        fits,
    };
    write_json(&output, &args.out)
}
