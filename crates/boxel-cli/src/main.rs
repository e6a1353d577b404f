use anyhow::Result;
use boxel_cluster::ClusterConfig;
use boxel_core::{Aabb, DepthFrame};
use boxel_session::{BoxSink, FrameOutcome, Pipeline, PipelineConfig};
use boxel_viewer::NullSink;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ---------- helpers (metrics / utils) ----------

fn t0() -> std::time::Instant { std::time::Instant::now() }
fn lap(t: std::time::Instant, label: &str) {
    let ms = t.elapsed().as_secs_f64() * 1000.0;
    println!("[{label}] {ms:.1} ms");
}

fn init_logger() {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.target(env_logger::Target::Stderr);
    if let Err(err) = builder.try_init() {
        eprintln!("Failed to initialize logger: {}", err);
    }
}

fn pipeline_config(threshold: f32, min_size: usize, min_confidence: f32) -> PipelineConfig {
    PipelineConfig {
        min_confidence,
        cluster: ClusterConfig { distance_threshold: threshold, min_cluster_size: min_size },
    }
}

fn print_box(b: &Aabb) {
    let e = b.extent();
    println!(
        "  [{:+.3} {:+.3} {:+.3}]..[{:+.3} {:+.3} {:+.3}]  extent {:.3}x{:.3}x{:.3}  n={}",
        b.min[0], b.min[1], b.min[2], b.max[0], b.max[1], b.max[2], e[0], e[1], e[2], b.point_count
    );
}

/// Sink that prints each frame's boxes as they arrive.
struct ConsoleBoxes { frame: usize }

impl BoxSink for ConsoleBoxes {
    fn draw(&mut self, boxes: &[Aabb]) -> Result<()> {
        self.frame += 1;
        println!("frame {:>4}: {} boxes", self.frame, boxes.len());
        for b in boxes { print_box(b); }
        Ok(())
    }
}

// ---------- CLI ----------

#[derive(Parser)]
#[command(name = "boxel", version, about = "boxel — depth point-cloud clustering tools")]
struct Args {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print basic info about a frame file
    Info { input: String },

    /// Drop points below a confidence floor
    Filter {
        input: String,
        output: String,
        #[arg(short, long, default_value_t = 0.5)] min_confidence: f32,
    },

    /// Cluster one frame and print (or dump) its bounding boxes
    Cluster {
        input: String,
        #[arg(short, long, default_value_t = 0.05)] threshold: f32,
        #[arg(short = 'n', long, default_value_t = 30)] min_size: usize,
        #[arg(short, long, default_value_t = 0.5)] min_confidence: f32,
        /// write the full JSON report here instead of printing boxes
        #[arg(long)] json: Option<String>,
    },

    /// Quick view of a frame's clusters (placeholder)
    View { input: String },

    /// Make a synthetic frame of blobs (ground-truth clusters)
    GenScene {
        output: String,
        #[arg(long, default_value_t = 3)] objects: usize,
        #[arg(long, default_value_t = 400)] points_per_object: usize,
        /// how far apart the blob centers spread, meters
        #[arg(long, default_value_t = 2.0)] spread: f32,
        /// half-width of per-point jitter around each center, meters
        #[arg(long, default_value_t = 0.02)] noise: f32,
        #[arg(long, default_value_t = 7)] seed: u64,
    },

    /// Bundle PLY frames into a session stream
    Record {
        session: String,
        frames: Vec<String>,
    },

    /// Replay a recorded session through the full pipeline
    Play {
        session: String,
        #[arg(short, long, default_value_t = 0.05)] threshold: f32,
        #[arg(short = 'n', long, default_value_t = 30)] min_size: usize,
        #[arg(short, long, default_value_t = 0.5)] min_confidence: f32,
    },
}

fn main() -> Result<()> {
    init_logger();
    let args = Args::parse();
    match args.cmd {
        Cmd::Info { input } => cmd_info(&input),
        Cmd::Filter { input, output, min_confidence } => cmd_filter(&input, &output, min_confidence),
        Cmd::Cluster { input, threshold, min_size, min_confidence, json } =>
            cmd_cluster(&input, threshold, min_size, min_confidence, json.as_deref()),
        Cmd::View { input } => cmd_view(&input),
        Cmd::GenScene { output, objects, points_per_object, spread, noise, seed } =>
            cmd_gen_scene(&output, objects, points_per_object, spread, noise, seed),
        Cmd::Record { session, frames } => cmd_record(&session, &frames),
        Cmd::Play { session, threshold, min_size, min_confidence } =>
            cmd_play(&session, threshold, min_size, min_confidence),
    }
}

// ---------- commands ----------

fn cmd_info(path: &str) -> Result<()> {
    let frame = boxel_io::read_auto(path)?;
    println!("points: {}", frame.len());
    if frame.is_empty() {
        return Ok(());
    }
    let (mut lo, mut hi) = (f32::INFINITY, f32::NEG_INFINITY);
    for &c in &frame.confidence {
        lo = lo.min(c);
        hi = hi.max(c);
    }
    println!("confidence: {:.3}..{:.3}", lo, hi);
    let mut bounds = Aabb::from_point([frame.x[0], frame.y[0], frame.z[0]]);
    for i in 1..frame.len() {
        bounds.merge([frame.x[i], frame.y[i], frame.z[i]]);
    }
    print_box(&bounds);
    Ok(())
}

fn cmd_filter(input: &str, output: &str, min_confidence: f32) -> Result<()> {
    let frame = boxel_io::read_auto(input)?;
    let kept = boxel_session::filter_confidence(&frame, min_confidence);
    boxel_io::write_ply_ascii(output, &kept)?;
    println!("filter: {} -> {} (min_confidence={})", frame.len(), kept.len(), min_confidence);
    Ok(())
}

fn cmd_cluster(
    input: &str,
    threshold: f32,
    min_size: usize,
    min_confidence: f32,
    json: Option<&str>,
) -> Result<()> {
    let t_read = t0();
    let frame = boxel_io::read_auto(input)?;
    lap(t_read, "read");

    let cfg = pipeline_config(threshold, min_size, min_confidence);
    let t_cluster = t0();
    let report = boxel_bridge::process_frame(&frame, &cfg)?;
    lap(t_cluster, "cluster");

    println!(
        "cluster: {} pts -> {} kept -> {} boxes (threshold={}, min_size={})",
        report.points_in, report.points_kept, report.boxes.len(), threshold, min_size
    );
    match json {
        Some(path) => {
            serde_json::to_writer_pretty(std::fs::File::create(path)?, &report)?;
            println!("wrote report -> {}", path);
        }
        None => {
            for b in &report.boxes { print_box(b); }
        }
    }
    Ok(())
}

fn cmd_view(input: &str) -> Result<()> {
    let frame = boxel_io::read_auto(input)?;
    let report = boxel_bridge::process_frame(&frame, &PipelineConfig::default())?;
    boxel_viewer::show("boxel", &report.boxes)?;
    Ok(())
}

fn cmd_gen_scene(
    output: &str,
    objects: usize,
    points_per_object: usize,
    spread: f32,
    noise: f32,
    seed: u64,
) -> Result<()> {
    anyhow::ensure!(objects > 0 && points_per_object > 0, "nothing to generate");
    anyhow::ensure!(spread > 0.0 && noise > 0.0, "spread and noise must be positive");
    let mut rng = StdRng::seed_from_u64(seed);
    let mut frame = DepthFrame::default();
    frame.reserve(objects * points_per_object);

    for _ in 0..objects {
        // camera-space blobs: x/y around the axis, z forward
        let cx = rng.gen_range(-spread..spread);
        let cy = rng.gen_range(-spread * 0.5..spread * 0.5);
        let cz = rng.gen_range(1.0..1.0 + spread);
        for _ in 0..points_per_object {
            frame.push(
                cx + rng.gen_range(-noise..noise),
                cy + rng.gen_range(-noise..noise),
                cz + rng.gen_range(-noise..noise),
                rng.gen_range(0.5..1.0),
            );
        }
    }

    boxel_io::write_ply_ascii(output, &frame)?;
    println!("gen-scene: {} objects x {} pts -> {}", objects, points_per_object, output);
    Ok(())
}

fn cmd_record(session: &str, frames: &[String]) -> Result<()> {
    anyhow::ensure!(!frames.is_empty(), "no input frames given");

    let mut pipeline = Pipeline::new(PipelineConfig::default())?;
    let mut sink = NullSink;

    pipeline.start_recording(session)?;
    for path in frames {
        let frame = boxel_io::read_auto(path)?;
        pipeline.process_frame(frame, &mut sink)?;
    }
    let recorded = pipeline.stop_recording()?;
    println!("record: {} frames -> {}", recorded, session);
    Ok(())
}

fn cmd_play(session: &str, threshold: f32, min_size: usize, min_confidence: f32) -> Result<()> {
    let cfg = pipeline_config(threshold, min_size, min_confidence);
    let mut pipeline = Pipeline::new(cfg)?;
    let mut sink = ConsoleBoxes { frame: 0 };

    let t_play = t0();
    let outcomes = pipeline.play_session(session, &mut sink)?;
    lap(t_play, "play");

    let rendered = outcomes.iter().filter(|o| matches!(o, FrameOutcome::Rendered(_))).count();
    let skipped = outcomes.len() - rendered;
    println!("play: {} frames ({} rendered, {} skipped)", outcomes.len(), rendered, skipped);
    Ok(())
}
