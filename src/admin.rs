use colored::Colorize;
use env_logger::Env;
use log::{error, info};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use selfiequiz::auth::AuthState;
use selfiequiz::db::SqliteDatabase;
use selfiequiz::entry::{copy_to_clipboard, ShareLink, DEFAULT_ENTRY_PATH};
use selfiequiz::panel::{describe_question, AdminPanel, Gallery};
use selfiequiz::question::QuestionDraft;
use selfiequiz::render::render_gallery;
use selfiequiz::Error;

#[derive(Parser, Debug)]
#[command(name = "Selfie Quiz Admin")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, default_value = "info")]
    log_level: String,
    #[arg(short, long, value_name = "FILE", default_value = "quiz.db")]
    db: PathBuf,
    /// The signed-in admin.
    #[arg(short, long)]
    uid: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add one question.
    Add {
        question: String,
        a: String,
        b: String,
        c: String,
        d: String,
        #[arg(long, default_value = "a")]
        correct: String,
    },
    /// Add every question from a JSON file.
    Import { json: PathBuf },
    /// Write all questions to a JSON file.
    Export { json: PathBuf },
    /// List the stored questions.
    Questions {
        #[arg(short, long, default_value = "false")]
        watch: bool,
    },
    /// Show the selfies taken through your quiz link.
    Gallery {
        #[arg(short, long, default_value = "false")]
        watch: bool,
        /// Also write every selfie as a PNG into this directory.
        #[arg(long)]
        save_to: Option<PathBuf>,
    },
    /// Copy your personal quiz link to the clipboard.
    Link {
        #[arg(long, default_value = "http://localhost:8080")]
        origin: String,
        #[arg(long, default_value = DEFAULT_ENTRY_PATH)]
        entry_path: String,
    },
}

const WATCH_INTERVAL: Duration = Duration::from_secs(2);

fn main() {
    let args = Args::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(args.log_level.as_str())).init();

    let db = match SqliteDatabase::create_or_open(&args.db) {
        Ok(d) => d,
        Err(e) => {
            error!("{}{}", "Unable to open Database: ".red(), e);
            std::process::exit(1);
        }
    };
    info!("{}", format!("Database at {:?}", args.db).cyan());

    let share = match &args.command {
        Commands::Link { origin, entry_path } => ShareLink::new(origin, entry_path),
        _ => ShareLink::new("http://localhost:8080", DEFAULT_ENTRY_PATH),
    };
    let panel = AdminPanel::new(&db, share);
    let mut auth = AuthState::new(args.uid.clone());
    panel.attach(&mut auth);

    let result = run(&db, &panel, args.command);
    drop(panel);
    if let Err(err) = result {
        error!("{}", format!("{}", err).red());
    }
    if let Err(err) = db.close() {
        error!("[DB] {}", err);
    }
}

fn run(
    db: &SqliteDatabase,
    panel: &AdminPanel<'_, SqliteDatabase>,
    command: Commands,
) -> Result<(), Error> {
    match command {
        Commands::Add {
            question,
            a,
            b,
            c,
            d,
            correct,
        } => {
            let draft = QuestionDraft {
                question,
                answers: [a, b, c, d],
                correct_answer: Some(correct),
            };
            match panel.add_question(&draft) {
                Ok(_) => println!("{}", "Question added and saved!".bright_green()),
                Err(Error::InvalidQuestion(reason)) => {
                    println!("{}", format!("Please fill in all fields: {}", reason).yellow())
                }
                Err(err) => {
                    println!("{}", "Error saving the question.".red());
                    return Err(err);
                }
            }
        }
        Commands::Import { json } => {
            let content = std::fs::read_to_string(&json)?;
            let report = panel.import_questions(&content)?;
            info!(
                "{}",
                format!("Imported {} questions from {:?}", report.added.len(), json).blue()
            );
            for (position, reason) in report.rejected {
                error!(
                    "{}",
                    format!("├ ✘ Question {}: {}", position + 1, reason)
                        .red()
                        .strikethrough()
                );
            }
        }
        Commands::Export { json } => {
            std::fs::write(&json, panel.export_questions()?)?;
            info!("{}", format!("Exported questions to {:?}", json).blue());
        }
        Commands::Questions { watch } => {
            if watch {
                let _subscription = panel.watch_questions(print_questions);
                loop {
                    thread::sleep(WATCH_INTERVAL);
                    db.poll_changes();
                }
            }
            print_questions(panel.questions()?);
        }
        Commands::Gallery { watch, save_to } => {
            if !watch {
                return show_gallery(&panel.gallery()?, save_to.as_deref());
            }
            let subscription = panel.watch_gallery(gallery_watcher(save_to));
            if subscription.is_none() {
                render_gallery(&Gallery::SignedOut);
                return Ok(());
            }
            loop {
                thread::sleep(WATCH_INTERVAL);
                db.poll_changes();
            }
        }
        Commands::Link { .. } => match panel.share_link() {
            Some(link) => match copy_to_clipboard(&link) {
                Ok(_) => println!("{}", "Link copied to the clipboard!".bright_green()),
                Err(err) => {
                    error!("[Admin] Failed to copy link: {}", err);
                    println!(
                        "{}",
                        format!("Could not copy the link. Please copy it manually: {}", link)
                            .yellow()
                    );
                }
            },
            None => println!(
                "{}",
                "Sign in (--uid) to generate your personal quiz link.".yellow()
            ),
        },
    }
    Ok(())
}

/// Writes every selfie as `<key>.png` into `save_to`, then lists the gallery.
fn show_gallery(gallery: &Gallery, save_to: Option<&Path>) -> Result<(), Error> {
    if let (Some(dir), Gallery::Selfies(records)) = (save_to, gallery) {
        std::fs::create_dir_all(dir)?;
        for record in records {
            let path = dir.join(format!("{}.png", record.key));
            std::fs::write(&path, record.image_data.png_bytes()?)?;
            info!("{}", format!("Wrote {:?}", path).blue());
        }
    }
    render_gallery(gallery);
    Ok(())
}

fn gallery_watcher(save_to: Option<PathBuf>) -> impl FnMut(Result<Gallery, Error>) {
    move |gallery| {
        let shown = gallery.and_then(|gallery| show_gallery(&gallery, save_to.as_deref()));
        if let Err(err) = shown {
            error!("[Gallery] {}", err);
            println!("{}", "Error loading selfies.".red());
        }
    }
}

fn print_questions(questions: Vec<selfiequiz::question::Question>) {
    if questions.is_empty() {
        println!("{}", "No questions added yet.".yellow());
        return;
    }
    for (i, question) in questions.iter().enumerate() {
        println!("{}", describe_question(i + 1, question));
    }
}
