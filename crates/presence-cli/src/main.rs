use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDateTime};
use clap::{Args, Parser, Subcommand};
use presence_core::{
    export, reports, staff, AttendanceService, BackupManager, ConfirmOutcome, Database, EncodingStore,
    ExportFormat, LogSummary, NewStaff, PhotoStore, RebuildReport, RecognitionOutcome, ScanOutcome,
};
use presence_vision::OnnxAnalyzer;
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "presence", version, about = "Face-recognition staff attendance")]
struct Cli {
    /// Path to a TOML config file (default: $PRESENCE_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and data directories
    Init,
    /// Register a staff member from a photo
    Register(RegisterArgs),
    /// Manage registered staff
    #[command(subcommand)]
    Staff(StaffCommand),
    /// Rebuild the face encodings from every registered photo
    Encode,
    /// Recognise a face in an image and record attendance
    Scan {
        /// Image file to scan
        image: PathBuf,
        /// Record check-out immediately when one is pending
        #[arg(long)]
        confirm: bool,
    },
    /// Confirm a pending check-out
    Confirm {
        /// Attendance record id reported by `scan`
        attendance_id: i64,
    },
    /// Show today's attendance
    Today,
    /// Show the full attendance log
    Logs,
    /// Show dashboard figures
    Overview,
    /// Export the attendance log
    Export {
        /// csv, json or xlsx
        #[arg(long, short, default_value = "csv", value_parser = parse_format)]
        format: ExportFormat,
        #[arg(long, short)]
        output: PathBuf,
    },
    /// Manage database backups
    #[command(subcommand)]
    Backup(BackupCommand),
    /// Show database and backup sizes
    Storage,
}

#[derive(Args)]
struct RegisterArgs {
    #[arg(long)]
    name: String,
    /// Frontal photo (png, jpg, jpeg)
    #[arg(long)]
    photo: PathBuf,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    department: Option<String>,
    #[arg(long)]
    gender: Option<String>,
    /// Joining date (YYYY-MM-DD)
    #[arg(long)]
    joining_date: Option<String>,
    /// Date of birth (YYYY-MM-DD)
    #[arg(long)]
    dob: Option<String>,
    #[arg(long)]
    native: Option<String>,
}

impl RegisterArgs {
    fn into_parts(self) -> (NewStaff, PathBuf) {
        let details = NewStaff {
            name: self.name,
            email: self.email,
            phone: self.phone,
            department: self.department,
            gender: self.gender,
            joining_date: self.joining_date,
            dob: self.dob,
            native: self.native,
        };
        (details, self.photo)
    }
}

#[derive(Subcommand)]
enum StaffCommand {
    /// List registered staff, newest first
    List,
    /// Remove a staff member (attendance history is kept)
    Remove { id: i64 },
}

#[derive(Subcommand)]
enum BackupCommand {
    /// Snapshot the database
    Create,
    /// List backups, newest first
    List,
    /// Print the newest backup name
    Latest,
    /// Delete a backup by file name
    Delete { name: String },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let json = cli.json;

    match cli.command {
        Commands::Init => {
            let db = open_db(&config)?;
            for dir in [&config.uploads_dir, &config.backup_dir] {
                std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
            }
            println!("database:  {}", db.path().display());
            println!("encodings: {}", config.encodings_path.display());
            println!("uploads:   {}", config.uploads_dir.display());
            println!("backups:   {}", config.backup_dir.display());
        }
        Commands::Register(args) => {
            let (details, photo) = args.into_parts();
            let mut service = service(&config)?;
            let reg = service.register_staff(&details, &photo, now())?;
            println!("Registered {} as staff #{}", reg.staff.name, reg.staff.id);
            if !reg.encoded() {
                println!("warning: no usable face in the photo; this person will not be recognised");
            }
            print_rebuild(&reg.rebuild);
        }
        Commands::Staff(StaffCommand::List) => {
            let db = open_db(&config)?;
            let list = staff::list_staff(&db.connect()?)?;
            if json {
                return print_json(&list);
            }
            if list.is_empty() {
                println!("No staff registered");
            }
            for s in list {
                println!(
                    "{:>5}  {:<24} {:<16} {}",
                    s.id,
                    s.name,
                    s.department.as_deref().unwrap_or("-"),
                    s.photo_path.display()
                );
            }
        }
        Commands::Staff(StaffCommand::Remove { id }) => {
            let mut service = service(&config)?;
            match service.remove_staff(id)? {
                Some(removed) => println!("Removed staff #{} ({})", removed.id, removed.name),
                None => bail!("no staff with id {id}"),
            }
        }
        Commands::Encode => {
            let mut service = service(&config)?;
            let report = service.rebuild_encodings()?;
            print_rebuild(&report);
        }
        Commands::Scan { image, confirm } => {
            let bytes = std::fs::read(&image).with_context(|| format!("failed to read {}", image.display()))?;
            let mut service = service(&config)?;
            let outcome = service.scan(&bytes, now())?;
            report_scan(&service, outcome, confirm)?;
        }
        Commands::Confirm { attendance_id } => {
            let db = open_db(&config)?;
            let outcome = presence_core::attendance::confirm(&mut db.connect()?, attendance_id, now())?;
            report_confirm(outcome)?;
        }
        Commands::Today => {
            let db = open_db(&config)?;
            let rows = reports::today(&db.connect()?, now().date())?;
            if json {
                return print_json(&rows);
            }
            print_rows(&rows);
        }
        Commands::Logs => {
            let db = open_db(&config)?;
            let rows = reports::log(&db.connect()?)?;
            let summary = LogSummary::from_rows(&rows);
            if json {
                return print_json(&LogReport { summary: &summary, rows: &rows });
            }
            print_rows(&rows);
            println!();
            println!(
                "{} records, {} employees, {}% present, average {:.1} h",
                summary.total_records,
                summary.unique_employees,
                summary.present_percent,
                summary.average_duration_hours
            );
        }
        Commands::Overview => {
            let db = open_db(&config)?;
            let o = reports::overview(&db.connect()?, now().date())?;
            if json {
                return print_json(&o);
            }
            println!("Total staff:     {}", o.total_staff);
            println!("Present today:   {}", o.present_today);
            println!("Absent today:    {}", o.absent_today);
            println!("7-day attendance: {}%", o.week_attendance_percent);
            println!();
            println!("Recent activity:");
            print_rows(&o.recent);
        }
        Commands::Export { format, output } => {
            let db = open_db(&config)?;
            let rows = reports::log(&db.connect()?)?;
            export::export_to_path(&rows, format, &output)
                .with_context(|| format!("failed to export to {}", output.display()))?;
            println!("Exported {} rows to {}", rows.len(), output.display());
        }
        Commands::Backup(cmd) => {
            let db = open_db(&config)?;
            let backups = BackupManager::new(db.path(), &config.backup_dir);
            match cmd {
                BackupCommand::Create => {
                    let name = backups.create(&db.connect()?, now())?;
                    println!("Backup created: {name}");
                }
                BackupCommand::List => {
                    let list = backups.list()?;
                    if json {
                        return print_json(&list);
                    }
                    if list.is_empty() {
                        println!("No backups");
                    }
                    for b in list {
                        println!("{:<40} {}  {:>10.2} KB", b.name, b.modified, b.size_kb);
                    }
                }
                BackupCommand::Latest => match backups.latest()? {
                    Some(name) => println!("{name}"),
                    None => bail!("no backups in {}", config.backup_dir.display()),
                },
                BackupCommand::Delete { name } => {
                    if !backups.delete(&name)? {
                        bail!("no backup named {name}");
                    }
                    println!("Deleted {name}");
                }
            }
        }
        Commands::Storage => {
            let db = open_db(&config)?;
            let summary = BackupManager::new(db.path(), &config.backup_dir).storage_summary()?;
            if json {
                return print_json(&summary);
            }
            println!("Database: {:.2} MB", summary.database_mb);
            println!("Backups:  {} ({:.2} MB)", summary.backup_count, summary.backups_mb);
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct LogReport<'a> {
    summary: &'a LogSummary,
    rows: &'a [reports::AttendanceRow],
}

fn parse_format(s: &str) -> Result<ExportFormat, String> {
    s.parse().map_err(|e: presence_core::Error| e.to_string())
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn open_db(config: &Config) -> Result<Database> {
    Database::open(&config.db_path).with_context(|| format!("failed to open database {}", config.db_path.display()))
}

/// Build the recognition service. Only commands that encode or match faces
/// call this, so the ONNX models are never loaded otherwise.
fn service(config: &Config) -> Result<AttendanceService<OnnxAnalyzer>> {
    let db = open_db(config)?;
    let analyzer = OnnxAnalyzer::load(&config.model_dir)
        .with_context(|| format!("failed to load models from {}", config.model_dir.display()))?;
    Ok(AttendanceService::new(
        db,
        EncodingStore::new(&config.encodings_path),
        PhotoStore::new(&config.uploads_dir, config.max_upload_bytes),
        analyzer,
        config.match_threshold,
    )
    .with_scan_archive(config.archive_scans))
}

fn report_scan(service: &AttendanceService<OnnxAnalyzer>, outcome: ScanOutcome, confirm: bool) -> Result<()> {
    let (face, staff, attendance) = match outcome {
        ScanOutcome::Unrecognized { faces: 0 } => {
            println!("No face found in the image");
            return Ok(());
        }
        ScanOutcome::Unrecognized { faces } => {
            println!("Person not registered ({faces} face(s) found)");
            return Ok(());
        }
        ScanOutcome::Recognized { face, staff, attendance } => (face, staff, attendance),
    };

    println!("Recognised {} (#{}, distance {:.3})", staff.name, staff.id, face.distance);
    match attendance {
        RecognitionOutcome::CheckedIn(record) => {
            println!("Welcome! Time in recorded at {}", record.time_in.as_deref().unwrap_or("-"));
        }
        RecognitionOutcome::ConfirmCheckOut { attendance_id, .. } if confirm => {
            report_confirm(service.confirm(attendance_id, now())?)?;
        }
        RecognitionOutcome::ConfirmCheckOut { attendance_id, .. } => {
            println!("Already checked in today. Run `presence confirm {attendance_id}` to record time out.");
        }
        RecognitionOutcome::AlreadyCompleted(_) => {
            println!("Already checked out. See you tomorrow!");
        }
    }
    Ok(())
}

fn report_confirm(outcome: ConfirmOutcome) -> Result<()> {
    match outcome {
        ConfirmOutcome::CheckedOut(record) => {
            print!("Time out recorded at {}", record.time_out.as_deref().unwrap_or("-"));
            match record.duration_hours() {
                Some(hours) => println!(" ({hours:.2} h)"),
                None => println!(),
            }
            Ok(())
        }
        ConfirmOutcome::AlreadyCompleted(record) => {
            bail!("time out already recorded for attendance #{}", record.id)
        }
        ConfirmOutcome::NotFound(id) => bail!("attendance record #{id} not found"),
    }
}

fn print_rebuild(report: &RebuildReport) {
    println!("Encoded {} staff photo(s)", report.encoded);
    for skipped in &report.skipped {
        println!("  skipped #{}: {}", skipped.staff_id, skipped.reason);
    }
}

fn print_rows(rows: &[reports::AttendanceRow]) {
    if rows.is_empty() {
        println!("No attendance records");
        return;
    }
    println!("{:>6}  {:<24} {:<10}  {:<8}  {:<8}  {:>6}  Status", "EMP ID", "Name", "Date", "In", "Out", "Hours");
    for r in rows {
        let hours = r.duration_hours.map(|h| format!("{h:.2}")).unwrap_or_else(|| "-".into());
        println!(
            "{:>6}  {:<24} {:<10}  {:<8}  {:<8}  {:>6}  {}",
            r.staff_id,
            r.name,
            r.date,
            r.time_in.as_deref().unwrap_or("-"),
            r.time_out.as_deref().unwrap_or("-"),
            hours,
            r.status
        );
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
