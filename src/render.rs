use crate::error::Result;
use crate::panel::Gallery;
use crate::question::Question;
use crate::selfie::SelfieRecord;
use crate::session::{Mark, SessionEvent};
use colored::Colorize;
use log::debug;

/// Draws session events on the terminal as they are drained.
#[derive(Default)]
pub struct TerminalRenderer<'a> {
    current: Option<&'a Question>,
}

impl<'a> TerminalRenderer<'a> {
    pub fn new() -> Self {
        TerminalRenderer { current: None }
    }

    pub fn handle_all(&mut self, events: Vec<SessionEvent<'a>>) {
        for event in events {
            self.handle(event);
        }
    }

    pub fn handle(&mut self, event: SessionEvent<'a>) {
        debug!("[Render] {:?}", event);
        match event {
            SessionEvent::Presented {
                number,
                total,
                question,
                ..
            } => {
                self.current = Some(question);
                let leading = format!("{}/{}. ", number, total);
                println!(
                    "{}{}",
                    leading.cyan(),
                    question.text.as_str().black().bold().on_white()
                );
                let indent = " ".repeat(leading.len());
                for (key, answer) in question.options() {
                    println!("{}{}: {}", indent, key.to_string().bold(), answer);
                }
            }
            SessionEvent::Skipped { index, reason, .. } => {
                println!(
                    "{}",
                    format!("Question {} could not be shown ({}), skipping.", index + 1, reason)
                        .yellow()
                );
            }
            SessionEvent::Scored(scoring) => {
                let Some(question) = self.current else {
                    return;
                };
                for mark in scoring.marks.iter() {
                    let line = format!("  {}: {}", mark.key, question.answer(mark.key));
                    let chosen = if mark.key == scoring.chosen { " <" } else { "" };
                    match mark.mark {
                        Mark::Correct => println!("{}{}", line.bright_green(), chosen),
                        Mark::Incorrect => println!("{}{}", line.bright_red().dimmed(), chosen),
                    }
                }
                if scoring.is_correct {
                    println!("{}", "Correct!".bright_green());
                } else {
                    println!(
                        "{}",
                        format!("Incorrect! The correct answer was {}.", scoring.correct)
                            .bright_red()
                    );
                }
            }
            SessionEvent::Completed(summary) => {
                self.current = None;
                println!("{}", "You completed the quiz!".cyan().bold());
                println!(
                    "{}",
                    format!("Score: {}/{}", summary.correct, summary.answered).cyan()
                );
            }
            SessionEvent::NoQuestions => {
                println!(
                    "{}",
                    "No questions available. Add some questions in the admin panel!".yellow()
                );
            }
        }
    }
}

pub fn render_gallery(gallery: &Gallery) {
    match gallery {
        Gallery::SignedOut => println!("{}", "Sign in to see your selfies.".yellow()),
        Gallery::Empty => println!("{}", "No selfies sent for this admin yet.".yellow()),
        Gallery::Selfies(records) => {
            for (i, record) in records.iter().enumerate() {
                println!(
                    "{} {} ({} bytes)",
                    format!("Selfie {}:", i + 1).cyan(),
                    record.captured_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    record.image_data.as_data_url().len()
                );
                if let Err(err) = show_selfie(record) {
                    println!("{}", format!("  cannot display selfie: {}", err).red());
                }
            }
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "kittygfx")] {
        use kitty_image::{Action, Command, WrappedCommand};

        /// Draws the selfie inline through the kitty graphics protocol.
        pub fn show_selfie(record: &SelfieRecord) -> Result<()> {
            use std::io::Write;

            let path = scratch_path(record);
            std::fs::write(&path, record.image_data.png_bytes()?)?;
            let shown = transmit(&path);
            std::io::stdout().flush()?;
            std::fs::remove_file(&path)?;
            shown
        }

        /// Where the terminal reads a selfie from while it is drawn.
        fn scratch_path(record: &SelfieRecord) -> std::path::PathBuf {
            std::env::temp_dir().join(format!("selfiequiz-{}-{}.png", std::process::id(), record.key))
        }

        fn transmit(path: &std::path::Path) -> Result<()> {
            let (width, height) = image::image_dimensions(path)?;
            let action = Action::TransmitAndDisplay(
                kitty_image::ActionTransmission {
                    format: kitty_image::Format::Png,
                    medium: kitty_image::Medium::File,
                    width,
                    height,
                    ..Default::default()
                },
                kitty_image::ActionPut {
                    x_offset: 20,
                    ..Default::default()
                },
            );
            let image_path = path.to_string_lossy().into_owned();
            let command = WrappedCommand::new(Command::with_payload_from_path(action, std::path::Path::new(&image_path)));
            println!("{command}");
            print!("{}", "\n".repeat(height as usize / 20));
            Ok(())
        }
    } else {
        /// Without inline graphics only the image size is shown.
        pub fn show_selfie(record: &SelfieRecord) -> Result<()> {
            use image::GenericImageView;

            let bytes = record.image_data.png_bytes()?;
            let (width, height) = image::load_from_memory(&bytes)?.dimensions();
            println!("  {}x{} PNG", width, height);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{SelfieCapture, SyntheticCamera};
    use crate::selfie::OwnerScope;
    use chrono::Utc;

    fn record(key: &str) -> SelfieRecord {
        let mut capture = SelfieCapture::new(SyntheticCamera::new(8, 6));
        capture.request_device().unwrap();
        SelfieRecord {
            key: key.to_string(),
            image_data: capture.capture().unwrap(),
            captured_at: Utc::now(),
            owner_scope: OwnerScope::Anonymous,
        }
    }

    #[cfg(feature = "kittygfx")]
    #[test]
    fn showing_a_selfie_leaves_no_file_behind() {
        let record = record("shown-once");
        show_selfie(&record).unwrap();
        assert!(!scratch_path(&record).exists());
    }

    #[test]
    fn showing_a_selfie_succeeds() {
        show_selfie(&record("shown")).unwrap();
    }

    #[test]
    fn broken_image_data_is_reported() {
        let mut record = record("broken");
        record.image_data = crate::selfie::ImageData::from_png(b"not a png");
        assert!(show_selfie(&record).is_err());
        #[cfg(feature = "kittygfx")]
        assert!(!scratch_path(&record).exists());
    }
}
