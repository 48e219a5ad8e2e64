//! Starting teller processes and watching them until they exit.
//!
//! Every teller gets its own watcher task. Watchers forward the teller's
//! output to the log and report a single [`TellerOutcome`] when the process
//! exits. Output on stderr marks the teller as failed but never stops it or
//! its siblings.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    sync::{mpsc, watch},
    task::JoinHandle,
};

/// How a single teller process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TellerOutcome {
    /// 1-based teller index.
    pub teller: u32,
    /// `None` if the process was terminated by a signal or couldn't be waited on.
    pub exit_code: Option<i32>,
    pub saw_stderr: bool,
}

impl TellerOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0) && !self.saw_stderr
    }
}

/// A teller that could not be started at all, as opposed to one that ran and failed.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("No tellers to launch")]
    NoTellers,
    #[error("Could not start teller {teller} ({}): {source}", program.display())]
    Spawn {
        teller: u32,
        program: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What to run for every teller of a phase.
#[derive(Debug, Clone, Copy)]
pub struct TellerCommand<'a> {
    pub interpreter: Option<&'a Path>,
    pub program: &'a Path,
    /// Must already exist.
    pub working_dir: &'a Path,
}

impl TellerCommand<'_> {
    fn command(&self, args: &[String]) -> Command {
        let mut command = match self.interpreter {
            Some(interpreter) => {
                let mut command = Command::new(interpreter);
                command.arg(self.program);
                command
            }
            None => Command::new(self.program),
        };
        command
            .args(args)
            .current_dir(self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

/// The running tellers of one phase.
pub struct Tellers {
    outcomes: mpsc::UnboundedReceiver<TellerOutcome>,
    kill: watch::Sender<bool>,
    watchers: Vec<JoinHandle<()>>,
}

impl Tellers {
    pub fn count(&self) -> usize {
        self.watchers.len()
    }

    /// Wait for the next teller to exit. Returns `None` once every teller has
    /// reported.
    pub async fn next_outcome(&mut self) -> Option<TellerOutcome> {
        self.outcomes.recv().await
    }

    /// Kill every teller that is still running. Each still reports an outcome.
    pub fn kill_all(&self) {
        // Only fails if every watcher has already finished.
        let _ = self.kill.send(true);
    }
}

/// Start one process per argument vector, teller `i` getting `args[i - 1]`.
///
/// Either every teller is started or none is: if any spawn fails, the ones
/// already started are killed.
pub fn launch(command: TellerCommand<'_>, args: Vec<Vec<String>>) -> Result<Tellers, LaunchError> {
    if args.is_empty() {
        return Err(LaunchError::NoTellers);
    }

    let mut children = Vec::with_capacity(args.len());
    for (teller, argv) in (1..).zip(args) {
        match command.command(&argv).spawn() {
            Ok(child) => {
                debug!("Started teller {teller} (pid {:?})", child.id());
                children.push((teller, child));
            }
            Err(source) => {
                for (_, mut child) in children {
                    let _ = child.start_kill();
                }
                return Err(LaunchError::Spawn {
                    teller,
                    program: command.program.to_path_buf(),
                    source,
                });
            }
        }
    }

    let (outcome_tx, outcomes) = mpsc::unbounded_channel();
    let (kill, kill_rx) = watch::channel(false);
    let watchers = children
        .into_iter()
        .map(|(teller, child)| {
            tokio::spawn(watch_teller(
                teller,
                child,
                outcome_tx.clone(),
                kill_rx.clone(),
            ))
        })
        .collect();

    Ok(Tellers {
        outcomes,
        kill,
        watchers,
    })
}

/// Resolves once a kill has been requested, or the `Tellers` handle is gone.
async fn killed(kill: &mut watch::Receiver<bool>) {
    while !*kill.borrow_and_update() {
        if kill.changed().await.is_err() {
            return;
        }
    }
}

async fn watch_teller(
    teller: u32,
    mut child: Child,
    outcomes: mpsc::UnboundedSender<TellerOutcome>,
    mut kill: watch::Receiver<bool>,
) {
    let saw_stderr = Arc::new(AtomicBool::new(false));
    let mut streams = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        streams.push(tokio::spawn(forward_output(teller, stdout, None)));
    }
    if let Some(stderr) = child.stderr.take() {
        streams.push(tokio::spawn(forward_output(
            teller,
            stderr,
            Some(saw_stderr.clone()),
        )));
    }

    let status = tokio::select! {
        status = child.wait() => status,
        _ = killed(&mut kill) => {
            warn!("Killing teller {teller}");
            if let Err(e) = child.start_kill() {
                warn!("Failed to kill teller {teller}: {e}");
            }
            child.wait().await
        }
    };
    let exit_code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            error!("Failed to wait for teller {teller}: {e}");
            None
        }
    };

    // Collect the rest of the output, unless we're told to give up on it.
    let drain = async {
        for stream in streams.iter_mut() {
            let _ = stream.await;
        }
    };
    tokio::select! {
        _ = drain => {}
        _ = killed(&mut kill) => {
            for stream in &streams {
                stream.abort();
            }
        }
    }

    let outcome = TellerOutcome {
        teller,
        exit_code,
        saw_stderr: saw_stderr.load(Ordering::SeqCst),
    };
    info!("Teller {teller} exited with code {exit_code:?}");
    if outcomes.send(outcome).is_err() {
        debug!("Nobody is waiting for teller {teller} any more");
    }
}

/// Log every line of a teller's output. Lines on stderr set `saw_stderr`.
async fn forward_output(
    teller: u32,
    stream: impl AsyncRead + Unpin,
    saw_stderr: Option<Arc<AtomicBool>>,
) {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                let text = text.trim_end();
                match saw_stderr {
                    Some(ref flag) => {
                        flag.store(true, Ordering::SeqCst);
                        error!("Teller {teller} stderr: {text}");
                    }
                    None => info!("Teller {teller} stdout: {text}"),
                }
            }
            Err(e) => {
                warn!("Lost output of teller {teller}: {e}");
                break;
            }
        }
    }
}
