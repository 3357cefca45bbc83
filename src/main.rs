mod console;

use chatlink::conversation::{Collaborators, Conversation};
use chatlink::error::ChatError;
use chatlink::message::Sender;
use chatlink::settings::Settings;
use chatlink::supervisor::Supervisor;
use console::{ConsoleCapture, ConsoleSynthesis};
use log::{info, warn};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

fn main() {
    env_logger::init();

    let settings = match Settings::from_env() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("[chatlink] {}", e);
            std::process::exit(2);
        }
    };
    let runtime = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");
    if let Err(e) = runtime.block_on(run(settings)) {
        eprintln!("[chatlink] {}", e);
        std::process::exit(1);
    }
}

/// Prints transcript entries and error changes the console has not shown yet.
struct Printer {
    shown: usize,
    last_error: Option<String>,
}

impl Printer {
    fn flush(&mut self, conversation: &Conversation) {
        for message in &conversation.transcript()[self.shown..] {
            match message.sender {
                Sender::User => println!("you> {}", message.text),
                Sender::Bot => println!("bot> {}", message.text),
            }
        }
        self.shown = conversation.transcript().len();

        let error = conversation.error().map(str::to_string);
        if error != self.last_error {
            if let Some(e) = &error {
                println!("  ! {}", e);
            }
            self.last_error = error;
        }
    }
}

async fn run(settings: Settings) -> Result<(), ChatError> {
    info!(
        "[chatlink] endpoint {} ({:?} transport)",
        settings.endpoint, settings.transport
    );
    let transport = settings.transport()?;
    let detector = settings.language_detector()?;

    let (capture_tx, mut capture_rx) = mpsc::unbounded_channel();
    let capture = Arc::new(ConsoleCapture::new(capture_tx, &settings.speech_language));
    let (supervisor, events) = Supervisor::spawn(transport, settings.supervisor_config());
    let mut conversation = Conversation::new(
        supervisor,
        events,
        settings.conversation_config(),
        Collaborators {
            synthesis: Arc::new(ConsoleSynthesis),
            capture: Some(capture.clone()),
            detector,
        },
    );

    println!("commands: /voice (next line is spoken), /read (read last answer), /quit");
    let mut printer = Printer {
        shown: 0,
        last_error: None,
    };
    printer.flush(&conversation);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("[chatlink] stdin error: {}", e);
                        break;
                    }
                };
                match line.trim() {
                    "/quit" => break,
                    "/read" => {
                        if !conversation.read_aloud() {
                            println!("  (no typed answer to read)");
                        }
                    }
                    "/voice" => match conversation.start_listening() {
                        Ok(()) => println!("  (listening...)"),
                        Err(e) => println!("  ! {}", e),
                    },
                    _ if capture.is_listening() => capture.hear(&line),
                    text => {
                        if let Err(e) = conversation.submit_typed(text).await {
                            info!("[chatlink] submission refused: {}", e);
                        }
                    }
                }
            }
            Some(heard) = capture_rx.recv() => {
                if let Err(e) = conversation.on_capture_event(heard).await {
                    info!("[chatlink] voice submission refused: {}", e);
                }
            }
            event = conversation.next_event() => {
                if event.is_none() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
        printer.flush(&conversation);
    }

    conversation.shutdown().await;
    Ok(())
}
