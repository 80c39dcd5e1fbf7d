use anyhow::{bail, Context, Result};
use attendant_core::{Embedding, IdentityId};
use attendant_hw::{Camera, Frame, FrameSource, SourceSpec};
use attendant_store::Database;
use attendant_vision::{DetectionModel, FaceEncoder};
use chrono::{Datelike, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

mod output;
mod report;

#[derive(Parser)]
#[command(name = "attendant", about = "Attendant face-recognition attendance CLI")]
struct Cli {
    /// SQLite database (default: $ATTENDANT_DB_PATH or $XDG_DATA_HOME/attendant/attendance.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new identity from one or more photos
    Enroll {
        /// Display name
        #[arg(short, long)]
        name: String,
        /// External reference shown alongside the name
        #[arg(short, long)]
        employee_id: Option<String>,
        /// Face detection model: fast or accurate
        #[arg(long, default_value = "accurate")]
        model: DetectionModel,
        /// ONNX model directory (default: $ATTENDANT_MODEL_DIR or $XDG_DATA_HOME/attendant/models)
        #[arg(long)]
        model_dir: Option<PathBuf>,
        /// Photos containing the person's face
        #[arg(required = true)]
        photos: Vec<PathBuf>,
    },
    /// List enrolled identities
    List,
    /// Deactivate an identity; it stops being recognised
    Remove {
        /// Identity ID
        id: String,
    },
    /// Show first and last marks per identity for one day (UTC)
    Attendance {
        /// Day as YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show days present per identity for one month
    Summary {
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        month: Option<u32>,
    },
    /// Export every attendance mark of one month as CSV
    Report {
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        month: Option<u32>,
        /// Destination file
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Show one identity's attendance marks, newest first
    History {
        /// Identity ID
        id: String,
        /// First day to include (YYYY-MM-DD, UTC)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last day to include (YYYY-MM-DD, UTC)
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Show recent recognition log entries
    Logs {
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
    /// Run camera diagnostics
    Test {
        /// Camera index, device path or http(s) URL (default: $ATTENDANT_CAMERA_SOURCE or 0)
        #[arg(long)]
        source: Option<String>,
        /// Frames to capture
        #[arg(long, default_value_t = 3)]
        frames: u32,
        /// Save the last captured frame as JPEG
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // stderr keeps stdout clean for --json.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = cli
        .db
        .clone()
        .or_else(|| std::env::var_os("ATTENDANT_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(attendant_store::default_db_path);

    match cli.command {
        Commands::Enroll {
            name,
            employee_id,
            model,
            model_dir,
            photos,
        } => {
            let model_dir = model_dir
                .or_else(|| std::env::var_os("ATTENDANT_MODEL_DIR").map(PathBuf::from))
                .unwrap_or_else(attendant_vision::default_model_dir);
            let references = encode_photos(model, &model_dir, &photos)?;

            let mut db = open_db(&db_path)?;
            let id = db.enroll(&name, employee_id.as_deref(), &references, Utc::now())?;
            if cli.json {
                print_json(&serde_json::json!({
                    "id": id,
                    "name": name,
                    "references": references.len(),
                }))?;
            } else {
                println!("Enrolled {name} ({id}) with {} reference(s)", references.len());
            }
        }
        Commands::List => {
            let identities = open_db(&db_path)?.list_identities()?;
            if cli.json {
                print_json(&identities)?;
            } else if identities.is_empty() {
                println!("No identities enrolled");
            } else {
                print!("{}", output::identities_table(&identities));
            }
        }
        Commands::Remove { id } => {
            let id = IdentityId(id);
            open_db(&db_path)?.deactivate(&id)?;
            println!("Deactivated {id}");
        }
        Commands::Attendance { date } => {
            let day = date.unwrap_or_else(|| Utc::now().date_naive());
            let rows = open_db(&db_path)?.attendance_on(day)?;
            if cli.json {
                print_json(&rows)?;
            } else if rows.is_empty() {
                println!("No attendance on {day}");
            } else {
                println!("Attendance for {day} (UTC)");
                print!("{}", output::attendance_table(&rows));
            }
        }
        Commands::Summary { year, month } => {
            let today = Utc::now().date_naive();
            let year = year.unwrap_or(today.year());
            let month = month.unwrap_or(today.month());
            let rows = open_db(&db_path)?.monthly_summary(year, month)?;
            if cli.json {
                print_json(&rows)?;
            } else if rows.is_empty() {
                println!("No attendance in {year:04}-{month:02}");
            } else {
                println!("Summary for {year:04}-{month:02}");
                print!("{}", output::summary_table(&rows));
            }
        }
        Commands::Report { year, month, out } => {
            let today = Utc::now().date_naive();
            let year = year.unwrap_or(today.year());
            let month = month.unwrap_or(today.month());
            let entries = open_db(&db_path)?.month_entries(year, month)?;
            if entries.is_empty() {
                bail!("no attendance recorded in {year:04}-{month:02}");
            }
            report::export(&out, &entries).with_context(|| format!("failed to write {}", out.display()))?;
            tracing::info!(path = %out.display(), rows = entries.len(), "report written");
            if cli.json {
                print_json(&serde_json::json!({ "path": out, "rows": entries.len() }))?;
            } else {
                println!("Wrote {} mark(s) for {year:04}-{month:02} to {}", entries.len(), out.display());
            }
        }
        Commands::History { id, from, to } => {
            let id = IdentityId(id);
            let entries = open_db(&db_path)?.identity_history(&id, from, to)?;
            if cli.json {
                print_json(&entries)?;
            } else if entries.is_empty() {
                println!("No attendance for {id} in the selected range");
            } else {
                println!("Attendance history for {} ({id}, UTC)", entries[0].name);
                print!("{}", output::history_table(&entries));
            }
        }
        Commands::Logs { limit } => {
            let logs = open_db(&db_path)?.recent_logs(limit)?;
            if cli.json {
                print_json(&logs)?;
            } else if logs.is_empty() {
                println!("No recognition log entries (enable ATTENDANT_LOG_RECOGNITIONS on the daemon)");
            } else {
                print!("{}", output::logs_table(&logs));
            }
        }
        Commands::Test {
            source,
            frames,
            save,
        } => {
            let source = source
                .or_else(|| std::env::var("ATTENDANT_CAMERA_SOURCE").ok())
                .unwrap_or_else(|| "0".to_string());
            run_camera_test(&source, frames, save.as_deref(), cli.json)?;
        }
    }

    Ok(())
}

fn open_db(path: &Path) -> Result<Database> {
    Database::open(path).with_context(|| format!("failed to open database {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One reference embedding per usable photo: the highest-scoring face.
fn encode_photos(model: DetectionModel, model_dir: &Path, photos: &[PathBuf]) -> Result<Vec<Embedding>> {
    let mut encoder = attendant_vision::load_encoder(model, model_dir)
        .with_context(|| format!("failed to load face models from {}", model_dir.display()))?;

    let mut references = Vec::new();
    for (i, photo) in photos.iter().enumerate() {
        let image = match image::open(photo) {
            Ok(image) => image.to_rgb8(),
            Err(e) => {
                tracing::warn!(photo = %photo.display(), error = %e, "unreadable photo skipped");
                continue;
            }
        };
        let frame = Frame::from_image(image, i as u32);
        let observations = encoder
            .encode(&frame)
            .with_context(|| format!("face encoding failed for {}", photo.display()))?;

        let best = observations
            .into_iter()
            .max_by(|a, b| a.region.confidence.total_cmp(&b.region.confidence));
        match best {
            Some(observation) => {
                tracing::info!(
                    photo = %photo.display(),
                    score = observation.region.confidence,
                    "face found"
                );
                references.push(observation.embedding);
            }
            None => tracing::warn!(photo = %photo.display(), "no face detected; photo skipped"),
        }
    }

    if references.is_empty() {
        bail!("no usable face found in {} photo(s)", photos.len());
    }
    Ok(references)
}

#[derive(Serialize)]
struct CaptureReport {
    source: String,
    width: u32,
    height: u32,
    frames: u32,
    avg_ms: f64,
}

fn run_camera_test(source: &str, frames: u32, save: Option<&Path>, json: bool) -> Result<()> {
    let devices = Camera::list_devices();
    if !json {
        println!("V4L2 capture devices:");
        if devices.is_empty() {
            println!("  (none)");
        }
        for d in &devices {
            println!("  {}  {} [{}] {}", d.path, d.name, d.driver, d.bus);
        }
        println!();
    }

    let spec = SourceSpec::parse(source)?;
    let mut camera = attendant_hw::open_source(&spec, 640, 480, Duration::from_secs(5))
        .with_context(|| format!("failed to open camera source '{source}'"))?;

    let mut last = None;
    let started = Instant::now();
    for _ in 0..frames.max(1) {
        last = Some(camera.next_frame().context("frame capture failed")?);
    }
    let elapsed = started.elapsed();
    let Some(frame) = last else {
        bail!("no frame captured");
    };

    let report = CaptureReport {
        source: camera.describe(),
        width: frame.width,
        height: frame.height,
        frames: frames.max(1),
        avg_ms: elapsed.as_secs_f64() * 1000.0 / frames.max(1) as f64,
    };

    if let Some(path) = save {
        let image = frame.to_image().context("captured frame has an invalid buffer")?;
        image
            .save(path)
            .with_context(|| format!("failed to save {}", path.display()))?;
    }

    if json {
        let devices: Vec<_> = devices
            .iter()
            .map(|d| serde_json::json!({ "path": d.path, "name": d.name, "driver": d.driver, "bus": d.bus }))
            .collect();
        print_json(&serde_json::json!({ "devices": devices, "capture": report }))?;
    } else {
        println!(
            "Captured {} frame(s) from {}: {}x{}, {:.1} ms/frame",
            report.frames, report.source, report.width, report.height, report.avg_ms
        );
        if let Some(path) = save {
            println!("Saved last frame to {}", path.display());
        }
    }
    Ok(())
}
