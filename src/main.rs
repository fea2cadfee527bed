use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

mod cases;
mod db;
mod merge;
mod models;
mod report;
mod risk;
mod seen;

use crate::models::{AttentionLevel, CaseStatus, NewObservation, Role};
use crate::seen::SeenStore;

#[derive(Parser)]
#[command(name = "behavior-early-warning")]
#[command(about = "Classroom behavior observations, risk scoring and counselor cases", long_about = None)]
struct Cli {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 5)]
    max_connections: u32,
    /// Where per-user "last seen" markers are kept
    #[arg(long, env = "SEEN_STORE_PATH", default_value = "seen-store.json")]
    seen_store: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import observations from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Create a teacher, counselor or admin account
    AddUser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        /// teacher, counselor or admin
        #[arg(long)]
        role: Role,
    },
    /// Record one observation, for a known student id or by name and group
    #[command(group(
        ArgGroup::new("who")
            .args(["student", "student_name"])
            .required(true)
            .multiple(false)
    ))]
    Observe {
        #[arg(long)]
        student: Option<Uuid>,
        /// Creates the student in the group when they are not known yet
        #[arg(long, requires = "group")]
        student_name: Option<String>,
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        teacher: Uuid,
        #[arg(long)]
        behavior: String,
        #[arg(long)]
        attention: AttentionLevel,
        #[arg(long)]
        social: i32,
        #[arg(long)]
        following: i32,
        #[arg(long)]
        concentration: i32,
        #[arg(long)]
        observed_on: Option<NaiveDate>,
    },
    /// Score students from their observations and store the result
    #[command(group(
        ArgGroup::new("scope")
            .args(["student", "all"])
            .required(true)
            .multiple(false)
    ))]
    Score {
        #[arg(long)]
        student: Option<Uuid>,
        #[arg(long)]
        all: bool,
        /// Counselor who requested the scoring
        #[arg(long)]
        evaluator: Uuid,
    },
    /// List observed students with their current risk and case status
    Cases {
        #[arg(long)]
        group: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show the full scoring and observation history of a student
    History {
        #[arg(long)]
        student: Uuid,
    },
    /// Generate the global markdown report
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Generate a markdown report for one student
    StudentReport {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Record an improvement noticed by a teacher
    Improve {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        teacher: Uuid,
        #[arg(long)]
        note: String,
        #[arg(long)]
        noted_on: Option<NaiveDate>,
    },
    /// Add a counselor comment to a student
    Comment {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        counselor: Uuid,
        #[arg(long)]
        body: String,
    },
    /// Open, progress or close a student's case
    CaseStatus {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        counselor: Uuid,
        #[arg(long)]
        status: CaseStatus,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Remove a student from every list, keeping their history
    DeleteStudent {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        actor: Option<Uuid>,
    },
    /// Count records a user has not seen yet
    Unseen {
        #[arg(long)]
        user: Uuid,
        /// observations, scorings, comments or improvements
        #[arg(long)]
        subject: String,
        /// Mark everything as seen afterwards
        #[arg(long)]
        mark: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the info default
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    let pool = PgPoolOptions::new()
        .max_connections(cli.max_connections)
        .connect(&cli.database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} observations from {}.", csv.display());
        }
        Commands::AddUser { email, name, role } => {
            let user = db::insert_user(&pool, &email, &name, role).await?;
            println!(
                "User {} created: {} <{}>, {} (since {}).",
                user.id,
                user.full_name,
                user.email,
                user.role,
                user.created_at.date_naive()
            );
        }
        Commands::Observe {
            student,
            student_name,
            group,
            teacher,
            behavior,
            attention,
            social,
            following,
            concentration,
            observed_on,
        } => {
            let target = match (student, student_name, group) {
                (Some(id), _, _) => db::find_student(&pool, id).await?,
                (None, Some(name), Some(group)) => {
                    let mut conn = pool.acquire().await?;
                    db::upsert_student(&mut conn, name.trim(), group.trim()).await?
                }
                _ => anyhow::bail!("pass --student, or --student-name with --group"),
            };
            target.ensure_active()?;

            let mut conn = pool.acquire().await?;
            let id = db::insert_observation(
                &mut conn,
                &NewObservation {
                    student_id: target.id,
                    teacher_id: teacher,
                    behavior,
                    attention_level: attention,
                    social_interaction: social,
                    instruction_following: following,
                    concentration,
                    observed_on,
                    source_key: None,
                },
            )
            .await?;
            if let Some(id) = id {
                println!(
                    "Observation {id} recorded for {} ({}).",
                    target.full_name, target.group_name
                );
            }
        }
        Commands::Score {
            student,
            all: _,
            evaluator,
        } => {
            let students = db::fetch_students(&pool).await?;
            let observations = merge::retain_active(&db::fetch_observations(&pool, student).await?, &students);

            let targets: Vec<&models::Student> = students
                .iter()
                .filter(|s| s.is_active())
                .filter(|s| student.map_or(true, |id| id == s.id))
                .collect();

            if targets.is_empty() {
                anyhow::bail!("no active student matches the requested scope");
            }

            for target in targets {
                let history = cases::observations_for(&observations, target.id);
                if history.is_empty() && student.is_none() {
                    continue;
                }
                let result = risk::compute_score(&history);
                let record = db::insert_scoring(&pool, target.id, evaluator, &result).await?;
                println!(
                    "- {} ({}) risk {} score {:.1} across {} observations",
                    target.full_name,
                    target.group_name,
                    record.risk_level,
                    record.score,
                    history.len()
                );
            }
        }
        Commands::Cases { group, limit } => {
            let students = db::fetch_students(&pool).await?;
            let observations = db::fetch_observations(&pool, None).await?;
            let scorings = db::fetch_scorings(&pool, None).await?;
            let case_records = db::fetch_cases(&pool).await?;
            let board = cases::build_case_board(&students, &observations, &scorings, &case_records);

            let rows: Vec<_> = board
                .iter()
                .filter(|row| group.as_deref().map_or(true, |g| row.group_name == g))
                .take(limit)
                .collect();

            if rows.is_empty() {
                println!("No students with observations.");
                return Ok(());
            }

            println!("Students by current risk:");
            for row in rows {
                let risk = match (row.risk_level, row.score) {
                    (Some(level), Some(score)) => format!("{level} ({score:.1})"),
                    _ => "not scored".to_string(),
                };
                let status = row
                    .status
                    .map(|status| status.to_string())
                    .unwrap_or_else(|| "no case".to_string());
                println!(
                    "- {} [{}] {} ({}) {} observations, {}",
                    row.student_name,
                    row.student_id,
                    row.group_name,
                    risk,
                    row.observation_count,
                    status
                );
            }
        }
        Commands::History { student } => {
            let target = db::find_student(&pool, student).await?;
            let scorings = db::fetch_scorings(&pool, Some(student)).await?;
            let observations = db::fetch_observations(&pool, Some(student)).await?;

            println!("{} ({})", target.full_name, target.group_name);
            if !target.is_active() {
                println!("Removed from active lists.");
            }
            println!("Scorings:");
            for record in merge::history_for(&scorings, student) {
                println!(
                    "- {} by {}: {} ({:.1})",
                    record.created_at.format("%Y-%m-%d %H:%M"),
                    record.evaluator_id,
                    record.risk_level,
                    record.score
                );
            }
            println!("Observations:");
            for record in merge::history_for(&observations, student) {
                println!(
                    "- {} by {}: attention {}, social {}, following {}, concentration {}: {}",
                    record.display_date(),
                    record.teacher_id,
                    record.attention_level,
                    record.social_interaction,
                    record.instruction_following,
                    record.concentration,
                    record.behavior
                );
            }
        }
        Commands::Report { out } => {
            let users = db::fetch_users(&pool).await?;
            let students = db::fetch_students(&pool).await?;
            let observations = db::fetch_observations(&pool, None).await?;
            let scorings = db::fetch_scorings(&pool, None).await?;
            let case_records = db::fetch_cases(&pool).await?;
            let deletions = db::fetch_deletions(&pool).await?;

            let active_users: Vec<_> = users.into_iter().filter(|user| user.active).collect();
            let report = report::build_global_report(
                Utc::now().date_naive(),
                &active_users,
                &students,
                &observations,
                &scorings,
                &case_records,
                &deletions,
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::StudentReport { student, out } => {
            let target = db::find_student(&pool, student).await?;
            let observations = db::fetch_observations(&pool, Some(student)).await?;
            let scorings = db::fetch_scorings(&pool, Some(student)).await?;
            let improvements = db::fetch_improvements(&pool, Some(student)).await?;
            let comments = db::fetch_comments(&pool, Some(student)).await?;
            let case_records = db::fetch_cases(&pool).await?;
            let case = case_records.iter().find(|case| case.student_id == student);

            let today = Utc::now().date_naive();
            let report = report::build_student_report(
                today,
                &report::StudentReportData {
                    student: &target,
                    observations: &observations,
                    scorings: &scorings,
                    improvements: &improvements,
                    comments: &comments,
                    case,
                },
            );
            let out = out.unwrap_or_else(|| {
                PathBuf::from(format!(
                    "report-{}-{}.md",
                    target.full_name.split_whitespace().collect::<Vec<_>>().join("-"),
                    today
                ))
            });
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Improve {
            student,
            teacher,
            note,
            noted_on,
        } => {
            let noted_on = noted_on.unwrap_or_else(|| Utc::now().date_naive());
            let id = db::insert_improvement(&pool, student, teacher, noted_on, &note).await?;
            println!("Improvement {id} recorded.");
        }
        Commands::Comment {
            student,
            counselor,
            body,
        } => {
            let id = db::insert_comment(&pool, student, counselor, &body).await?;
            println!("Comment {id} added.");
        }
        Commands::CaseStatus {
            student,
            counselor,
            status,
            notes,
        } => {
            let case = db::upsert_case_status(&pool, student, counselor, status, notes.as_deref()).await?;
            println!(
                "Case {} for student {} is {} (opened {}, counselor {}).",
                case.id,
                case.student_id,
                case.status,
                case.created_at.date_naive(),
                case.counselor_id
            );
        }
        Commands::DeleteStudent { student, actor } => {
            let deleted_at = db::tombstone_student(&pool, student, actor).await?;
            println!("Student {student} removed at {}.", deleted_at.format("%Y-%m-%d %H:%M"));
        }
        Commands::Unseen { user, subject, mark } => {
            let mut store = seen::FileSeenStore::open(&cli.seen_store)?;
            let students = db::fetch_students(&pool).await?;
            let last_seen = store.last_seen(user, &subject);

            let count = match subject.as_str() {
                "observations" => seen::count_unseen(
                    &merge::retain_active(&db::fetch_observations(&pool, None).await?, &students),
                    last_seen,
                ),
                "scorings" => seen::count_unseen(
                    &merge::retain_active(&db::fetch_scorings(&pool, None).await?, &students),
                    last_seen,
                ),
                "comments" => seen::count_unseen(
                    &merge::retain_active(&db::fetch_comments(&pool, None).await?, &students),
                    last_seen,
                ),
                "improvements" => seen::count_unseen(
                    &merge::retain_active(&db::fetch_improvements(&pool, None).await?, &students),
                    last_seen,
                ),
                other => anyhow::bail!("unknown subject '{other}'"),
            };

            println!("{count} new {subject}.");
            if mark {
                store.mark_seen(user, &subject, Utc::now())?;
            }
        }
    }

    Ok(())
}
