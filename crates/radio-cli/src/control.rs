//! Interactive commands read from stdin while playing.

use std::io::BufRead;
use std::thread;

use crossbeam_channel::{Receiver, Sender};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    Toggle,
    Next,
    Status,
    Volume(u8),
    Quit,
}

pub const HELP: &str = "commands: [p]ause, [n]ext, [s]tatus, [v]olume <0-255>, [q]uit";

pub fn parse_control(line: &str) -> Result<Control, String> {
    let mut parts = line.split_whitespace();
    let Some(word) = parts.next() else {
        return Err(HELP.to_string());
    };
    let control = match word.to_ascii_lowercase().as_str() {
        "p" | "pause" | "play" | "toggle" => Control::Toggle,
        "n" | "next" => Control::Next,
        "s" | "status" => Control::Status,
        "q" | "quit" | "exit" => Control::Quit,
        "v" | "volume" => {
            let value = parts.next().ok_or("volume needs a value")?;
            let volume = value
                .parse::<u8>()
                .map_err(|_| format!("volume {value:?} is not in 0-255"))?;
            Control::Volume(volume)
        }
        other => return Err(format!("unknown command {other:?}; {HELP}")),
    };
    if parts.next().is_some() {
        return Err(format!("unexpected arguments; {HELP}"));
    }
    Ok(control)
}

/// Read stdin lines on a background thread. EOF is reported as [`Control::Quit`].
pub fn spawn_stdin_reader() -> Receiver<Control> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::spawn(move || read_lines(std::io::stdin().lock(), &tx));
    rx
}

fn read_lines(input: impl BufRead, tx: &Sender<Control>) {
    for line in input.lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match parse_control(&line) {
            Ok(control) => {
                if tx.send(control).is_err() {
                    return;
                }
            }
            Err(msg) => eprintln!("{msg}"),
        }
    }
    let _ = tx.send(Control::Quit);
}
