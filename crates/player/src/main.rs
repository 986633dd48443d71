//! Headless host: restores the last session (or imports a snapshot), plays it
//! on the default output device and autosaves until Ctrl-C.
//!
//! Usage: `seq_player [SNAPSHOT] [--record OUT.wav]`

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, anyhow};
use seq_core::{
    Config, CpalConfig, CpalEngine, FileAutosaveStore, Session, SessionEvent, Snapshot,
    spawn_poll_loop,
};
use tokio::sync::mpsc;

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

struct Args {
    snapshot: Option<PathBuf>,
    record: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        snapshot: None,
        record: None,
    };
    let mut raw = std::env::args_os().skip(1);
    while let Some(arg) = raw.next() {
        if arg == "--record" {
            let path = raw.next().ok_or_else(|| anyhow!("--record needs a path"))?;
            args.record = Some(path.into());
        } else {
            args.snapshot = Some(arg.into());
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args()?;
    let config = Config::load();
    let engine = CpalEngine::new(CpalConfig::default(), &config.assets_root);
    let store = FileAutosaveStore::new(&config.autosave_path);
    let mut session = Session::new(engine, store, &config, now())?;

    match session.restore() {
        Ok(true) => {}
        Ok(false) => log::info!("no autosave, starting empty"),
        Err(err) => log::warn!("could not restore autosave: {err}"),
    }

    if let Some(path) = &args.snapshot {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let snapshot = Snapshot::from_bytes(&bytes)?;
        let report = session.import_snapshot(&snapshot, now())?;
        log::info!(
            "imported {}: {} samples loaded, {} without a slot",
            path.display(),
            report.loaded,
            report.unplaced.len()
        );
    }

    if let Some(path) = &args.record {
        session.start_recording(path)?;
    }
    session.play(now())?;

    let period = config.timings.ui_poll();
    let session = Arc::new(Mutex::new(session));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let poll = spawn_poll_loop(Arc::clone(&session), period, tx);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = rx.recv() => match event {
                Some(SessionEvent::Step(step)) => log::trace!("step {step}"),
                Some(SessionEvent::AutosaveFailed(err)) => log::warn!("autosave failed: {err}"),
                Some(_) => {}
                None => break,
            },
        }
    }
    drop(poll);

    let mut session = session
        .lock()
        .map_err(|_| anyhow!("session lock poisoned"))?;
    session.stop();
    if let Some(path) = session.stop_recording()? {
        log::info!("recorded output to {}", path.display());
    }
    session.flush(now())?;
    Ok(())
}
