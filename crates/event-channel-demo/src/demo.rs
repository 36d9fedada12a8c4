//! The walkthrough itself.
//!
//! Each step prints what it does, then waits until the worker has caught
//! up, so handler output lands under the step that caused it.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use event_channel::{send, ChannelConfig, EventChannel, Result};
use tracing::{debug, info};

/// Lines printed by handlers, in the order the walkthrough saw them.
pub type Transcript = Arc<Mutex<Vec<String>>>;

/// Receiver object with one method per payload type.
pub struct Widget {
    name: &'static str,
    transcript: Transcript,
}

impl Widget {
    pub fn new(name: &'static str, transcript: Transcript) -> Self {
        Self { name, transcript }
    }

    pub fn print_int(&self, value: &i32) {
        record(&self.transcript, format!("{}::print_int({})", self.name, value));
    }

    pub fn print_float(&self, value: &f64) {
        record(&self.transcript, format!("{}::print_float({})", self.name, value));
    }
}

fn step(title: &str) {
    println!("{}", title);
}

fn print_number(value: &i32) {
    println!("  print_number({})", value);
}

fn record(transcript: &Transcript, line: String) {
    println!("  {}", line);
    if let Ok(mut lines) = transcript.lock() {
        lines.push(line);
    }
}

/// Runs every step against a fresh channel and returns what the widget and
/// the closure printed.
pub fn run(config: ChannelConfig, pause: Duration) -> Result<Vec<String>> {
    info!(dispatch = ?config.dispatch, idle = ?config.idle_policy, "starting walkthrough");

    let channel = EventChannel::new(config)?;
    let transcript: Transcript = Arc::new(Mutex::new(Vec::new()));
    step("subscribe print_number, send 1");
    channel.subscribe_fn(print_number)?;
    send!(channel, 1)?;
    settle(&channel, pause)?;

    step("subscribe widget (strong, i32) and widget (weak, f64), send 2 and 33.3");
    let widget = Arc::new(Widget::new("widget", transcript.clone()));
    channel.subscribe_method(&widget, Widget::print_int)?;
    channel.subscribe_weak(&widget, Widget::print_float)?;
    send!(channel, 2)?;
    send!(channel, 33.3)?;
    settle(&channel, pause)?;

    step("unsubscribe widget (weak, f64), send 4 and 55.5");
    channel.unsubscribe_weak(&widget, Widget::print_float)?;
    send!(channel, 4)?;
    send!(channel, 55.5)?;
    settle(&channel, pause)?;

    step("subscribe a closure on String, send two strings");
    let sink = transcript.clone();
    let tag = channel.subscribe(move |s: &String| record(&sink, format!("closure({})", s)))?;
    send!(channel, "apple".to_string())?;
    send!(channel, "banana".to_string())?;
    settle(&channel, pause)?;

    step("remove the closure by tag, send a third string");
    channel.unsubscribe(tag)?;
    send!(channel, "cherry".to_string())?;
    settle(&channel, pause)?;

    step("stop");
    channel.stop()?;

    let lines = transcript
        .lock()
        .map(|lines| lines.clone())
        .unwrap_or_default();
    info!(lines = lines.len(), "walkthrough finished");
    Ok(lines)
}

/// Waits until every event sent so far has been dispatched, then pauses.
fn settle(channel: &EventChannel, pause: Duration) -> Result<()> {
    struct Checkpoint;

    let (tx, rx) = mpsc::channel();
    let token = channel.subscribe_scoped(move |_: &Checkpoint| {
        let _ = tx.send(());
    })?;
    send!(channel, Checkpoint)?;

    if rx.recv_timeout(Duration::from_secs(5)).is_err() {
        debug!("checkpoint not reached; continuing");
    }
    token.release();

    if !pause.is_zero() {
        thread::sleep(pause);
    }
    Ok(())
}
