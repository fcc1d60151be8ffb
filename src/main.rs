use clap::Parser;
use colored::Colorize;
use env_logger::Env;
use log::{debug, error, warn};
use selfiequiz::camera::{camera_from_arg, CameraDevice, SelfieCapture};
use selfiequiz::db::SqliteDatabase;
use selfiequiz::entry::admin_uid_from_url;
use selfiequiz::question::ChoiceKey;
use selfiequiz::question_store::QuestionStore;
use selfiequiz::render::TerminalRenderer;
use selfiequiz::selfie::{ImageData, OwnerScope, SelfieSink};
use selfiequiz::session::{QuizSession, SessionState};
use selfiequiz::Error;
use std::io::Write;
use std::path::PathBuf;
use text_io::read;

#[derive(Debug, PartialEq)]
enum Choice {
    Option(ChoiceKey),
    Invalid,
    Quit,
}

impl Choice {
    fn from_str(input: &str) -> Choice {
        match input.trim() {
            "q" => Choice::Quit,
            input => match input.parse::<ChoiceKey>() {
                Ok(key) => Choice::Option(key),
                Err(_) => Choice::Invalid,
            },
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "Selfie Quiz")]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "quiz.db")]
    db: PathBuf,
    /// Quiz link, e.g. `https://host/index.html?adminUid=<uid>`.
    #[arg(long)]
    entry_url: Option<String>,
    /// Attribute the selfie to this admin; overrides `--entry-url`.
    #[arg(long)]
    admin_uid: Option<String>,
    /// `synthetic`, `none`, or an image file to use as the camera feed.
    #[arg(short, long, default_value = "synthetic")]
    camera: String,
    #[arg(long, default_value = "false")]
    skip_selfie: bool,
    #[arg(short, long, default_value = "error")]
    log_level: String,
}

fn prompt(message: &str) -> String {
    print!("{} ", message.cyan());
    let _ = std::io::stdout().flush();
    let line: String = read!("{}\n");
    line.trim().to_string()
}

fn main() -> Result<(), Error> {
    let args = Args::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(args.log_level.as_str())).init();

    let db = SqliteDatabase::create_or_open(&args.db)?;
    debug!("[DB] Database Connection Successful!");

    let uid = args
        .admin_uid
        .clone()
        .or_else(|| args.entry_url.as_deref().and_then(admin_uid_from_url));
    let scope = OwnerScope::from_uid(uid.as_deref());
    debug!("[Setup] Selfies go to {}", scope.path());

    println!("{}", "==========> Selfie Quiz <==========".cyan());

    if !args.skip_selfie {
        if let Some(image) = take_selfie(camera_from_arg(&args.camera)) {
            save_selfie(&db, &image, &scope);
        }
    }

    let result = run_quiz(&db);
    finish(db, result)
}

/// Returns the accepted still, or `None` when the camera is unavailable or
/// the taker skips; the quiz goes on either way.
fn take_selfie(camera: Box<dyn CameraDevice>) -> Option<ImageData> {
    let mut capture = SelfieCapture::new(camera);
    let mut preview = match capture.request_device() {
        Ok(preview) => preview,
        Err(err) => {
            warn!("[Camera] {}", err);
            println!(
                "{}",
                "Could not access the camera. Please check its permissions. Continuing without a selfie."
                    .yellow()
            );
            return None;
        }
    };

    loop {
        println!(
            "{}",
            format!("Take a selfie to start! ({}x{} preview)", preview.width, preview.height)
                .cyan()
        );
        if prompt("Press Enter to take the selfie, s to skip:") == "s" {
            capture.release();
            return None;
        }
        let image = match capture.capture() {
            Ok(image) => image,
            Err(err) => {
                error!("[Camera] Capture failed: {}", err);
                println!("{}", "Could not take the selfie. Continuing without one.".red());
                return None;
            }
        };
        println!("{}", "Selfie captured!".bright_green());

        if prompt("Press Enter to start the quiz, r to retake:") != "r" {
            return Some(image);
        }
        preview = match capture.retake() {
            Ok(preview) => preview,
            Err(err) => {
                warn!("[Camera] Retake failed: {}", err);
                println!("{}", "Could not restart the camera. Keeping the first selfie.".yellow());
                return Some(image);
            }
        };
    }
}

fn save_selfie(db: &SqliteDatabase, image: &ImageData, scope: &OwnerScope) {
    match SelfieSink::new(db).save(image, scope) {
        Ok(_) => debug!("[Selfie] Selfie saved."),
        Err(err) => {
            error!("[Selfie] {}", err);
            println!("{}", "Could not save your selfie. The quiz will start anyway.".red());
        }
    }
}

fn run_quiz(db: &SqliteDatabase) -> Result<(), Error> {
    let store = QuestionStore::new(db);
    let loaded = match store.load_all() {
        Ok(loaded) => loaded,
        Err(err) => {
            error!("[Setup] {}", err);
            println!("{}", "Error loading the quiz. Try again later.".red());
            return Ok(());
        }
    };

    let mut session = QuizSession::new();
    let mut renderer = TerminalRenderer::new();
    let started = session.start(&loaded.entries);
    renderer.handle_all(session.drain_events());
    if let Err(Error::NoQuestions) = started {
        return Ok(());
    }
    started?;

    while let SessionState::Presenting(_) = session.state() {
        let choice = Choice::from_str(&prompt("Answer (a-d, q to quit):"));
        debug!("choice: {:?}", choice);
        match choice {
            Choice::Option(key) => {
                session.select_answer(key)?;
                renderer.handle_all(session.drain_events());
            }
            Choice::Invalid => {
                println!("{}", "Please answer with a, b, c or d.".bright_red());
                continue;
            }
            Choice::Quit => {
                println!("{}", "Quitting Early!".cyan());
                return Ok(());
            }
        }

        prompt("Press Enter for the next question:");
        session.advance()?;
        renderer.handle_all(session.drain_events());
    }
    Ok(())
}

fn finish(db: SqliteDatabase, result: Result<(), Error>) -> Result<(), Error> {
    if let Err(err) = db.close() {
        error!("[DB] {}", err);
    }
    result
}
