//! TeXpresso entrypoint: CLI, logging bootstrap, and the cooperative main
//! loop tying editor commands to the speculative executor.

mod driver;

use std::io::Write;
use std::os::unix::io::BorrowedFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use core_dvi::backend::NoBackend;
use core_dvi::display::DisplayList;
use core_dvi::resmanager::ResourceManager;
use core_editor::{CommandReader, EditorCommand, EditorOut, Framing};
use core_engine::bundle::{BundleServer, TectonicBackend, TexliveBackend};
use core_engine::engine::WorkerConfig;
use core_engine::{EngineStatus, TexEngine};

use driver::DelayedChanges;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "texpresso", version, about = "Interactive incremental TeX previewer")]
struct Args {
    /// Path of the root document.
    pub document: PathBuf,
    /// Use the Tectonic subprocess bundle.
    #[arg(long = "tectonic")]
    pub tectonic: bool,
    /// Use an installed TeX Live distribution.
    #[arg(long = "texlive")]
    pub texlive: bool,
    /// Internal: serve file I/O over the TeXpresso protocol channel
    /// (used when this binary is re-invoked as a typesetting worker).
    #[arg(long = "texpresso", hide = true)]
    pub texpresso: bool,
    /// Configuration file (overrides discovery of `texpresso.toml`).
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    /// Speak JSON instead of S-expressions on stdin/stdout.
    #[arg(long = "json")]
    pub json: bool,
    /// Report output line by line (`append-lines`/`truncate-lines`).
    #[arg(long = "lines")]
    pub lines: bool,
}

fn configure_logging(document_dir: &Path, filter: Option<&str>) -> Result<WorkerGuard> {
    let log_path = document_dir.join("texpresso.log");
    if log_path.exists() {
        let _ = std::fs::remove_file(&log_path);
    }
    let appender = tracing_appender::rolling::never(document_dir, "texpresso.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let env_filter = match filter {
        Some(f) => EnvFilter::try_new(f)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}

fn install_panic_hook() {
    let default = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        tracing::error!(target: "runtime", %panic, "panic");
        default(panic);
    }));
}

/// Locate the worker binary: configuration wins, then a `texpresso-tonic`
/// beside this executable, then whatever `$PATH` offers.
fn find_tectonic(configured: Option<&str>) -> String {
    if let Some(path) = configured {
        return path.to_owned();
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join("texpresso-tonic");
            if sibling.exists() {
                return sibling.to_string_lossy().into_owned();
            }
        }
    }
    "texpresso-tonic".to_owned()
}

enum Backend {
    Texlive(TexliveBackend),
    Tectonic(std::rc::Rc<std::cell::RefCell<BundleServer>>),
}

fn select_backend(
    args: &Args,
    config: &core_config::Config,
    tectonic_path: &str,
    document_dir: &Path,
) -> Result<Backend> {
    let try_texlive = || TexliveBackend::discover(document_dir).map(Backend::Texlive);
    let try_tectonic = || {
        BundleServer::start(tectonic_path)
            .ok()
            .map(|s| Backend::Tectonic(std::rc::Rc::new(std::cell::RefCell::new(s))))
    };

    if args.tectonic {
        return try_tectonic().context("cannot start the Tectonic bundle server");
    }
    if args.texlive {
        return try_texlive().context("no usable TeX Live distribution found");
    }

    let order: [&dyn Fn() -> Option<Backend>; 2] =
        match config.file.bundle.prefer {
            Some(core_config::BundlePreference::Tectonic) => [&try_tectonic, &try_texlive],
            _ => [&try_texlive, &try_tectonic],
        };
    for attempt in order {
        if let Some(backend) = attempt() {
            return Ok(backend);
        }
    }
    bail!("neither a TeX Live distribution nor a Tectonic bundle is available")
}

/// What the stdin notifier thread reports.
enum WakeEvent {
    StdinReady,
}

/// The notifier thread owns no state: it waits for a `c` token, polls
/// stdin for readability, reports, and repeats; `q` shuts it down.
fn spawn_stdin_notifier(commands: Receiver<u8>, events: Sender<WakeEvent>) {
    std::thread::spawn(move || {
        loop {
            match commands.recv() {
                Ok(b'q') | Err(_) => return,
                Ok(b'c') => {}
                Ok(_) => continue,
            }
            let stdin = unsafe { BorrowedFd::borrow_raw(0) };
            let mut fds = [nix::poll::PollFd::new(stdin, nix::poll::PollFlags::POLLIN)];
            loop {
                match nix::poll::poll(&mut fds, nix::poll::PollTimeout::NONE) {
                    Err(nix::errno::Errno::EINTR) => continue,
                    _ => break,
                }
            }
            if events.send(WakeEvent::StdinReady).is_err() {
                return;
            }
        }
    });
}

fn stdin_readable() -> bool {
    let stdin = unsafe { BorrowedFd::borrow_raw(0) };
    let mut fds = [nix::poll::PollFd::new(stdin, nix::poll::PollFlags::POLLIN)];
    matches!(
        nix::poll::poll(&mut fds, nix::poll::PollTimeout::ZERO),
        Ok(n) if n > 0
    )
}

struct App {
    engine: TexEngine,
    reader: CommandReader,
    delayed: DelayedChanges,
    doc_dir: String,
    page: usize,
    need_synctex: bool,
    pending_hit: Option<core_engine::SynctexHit>,
    current_frame: Option<DisplayList>,
    stdin_eof: bool,
}

impl App {
    /// More stepping is useful while the displayed page (or an unresolved
    /// forward search) is still ahead of the typeset output. A forward
    /// search resolving during the probe parks its hit for the main loop.
    fn need_advance(&mut self) -> bool {
        let mut need = self.engine.page_count() <= self.page;
        if !need {
            if self.need_synctex && self.engine.synctex_page_count() <= self.page {
                need = true;
            } else if self.engine.synctex_has_target() {
                match self.engine.synctex_find_target() {
                    Some(hit) => self.pending_hit = Some(hit),
                    None => need = self.engine.synctex_has_target(),
                }
            }
        }
        need && self.engine.status() == EngineStatus::Running
    }

    /// Step in batches of 10 queries or 1 ms, whichever comes first.
    fn advance_engine(&mut self) -> bool {
        let mut need = self.need_advance();
        if !need {
            return false;
        }
        let start = Instant::now();
        let mut steps = 10;
        while need {
            if !self.engine.step(false) {
                break;
            }
            steps -= 1;
            need = self.need_advance();
            if steps == 0 {
                steps = 10;
                if start.elapsed() > Duration::from_millis(1) {
                    break;
                }
            }
        }
        need
    }

    fn display_page(&mut self) {
        if let Some(frame) = self.engine.render_page(self.page) {
            info!(target: "runtime", page = self.page, items = frame.items.len(),
                  "page displayed");
            self.current_frame = Some(frame);
        }
    }

    fn clamp_page_to_finished_document(&mut self) {
        let count = self.engine.page_count();
        if self.page >= count && self.engine.status() == EngineStatus::Terminated && count > 0 {
            self.page = count - 1;
        }
    }

    fn apply_command(&mut self, cmd: EditorCommand) {
        match cmd {
            EditorCommand::Open { path, data } => {
                self.delayed.flush(&mut self.engine, &self.doc_dir);
                driver::apply_open(&mut self.engine, &self.doc_dir, &path, &data);
            }
            EditorCommand::Close { path } => {
                self.delayed.flush(&mut self.engine, &self.doc_dir);
                driver::apply_close(&mut self.engine, &self.doc_dir, &path);
            }
            EditorCommand::Change { path, span, data } => {
                driver::apply_change(
                    &mut self.engine,
                    &mut self.delayed,
                    &self.doc_dir,
                    self.page,
                    &path,
                    &span,
                    &data,
                );
            }
            EditorCommand::PreviousPage => {
                self.engine.synctex_set_target(0, None, 0);
                if self.page > 0 {
                    self.page -= 1;
                    self.clamp_page_to_finished_document();
                    self.display_page();
                }
            }
            EditorCommand::NextPage => {
                self.engine.synctex_set_target(0, None, 0);
                self.page += 1;
                self.display_page();
            }
            EditorCommand::SynctexForward { path, line } => {
                match driver::relative_path(&path, &self.doc_dir) {
                    Some(rel) => {
                        let rel = rel.to_owned();
                        self.engine.synctex_set_target(self.page, Some(&rel), line);
                    }
                    None => {
                        warn!(target: "editor", path = path.as_str(),
                              "synctex-forward: file has a different root, skipping");
                    }
                }
            }
            EditorCommand::Rescan => {
                self.delayed.flush(&mut self.engine, &self.doc_dir);
                self.engine.detect_changes();
            }
            EditorCommand::Theme { .. }
            | EditorCommand::MoveWindow { .. }
            | EditorCommand::MapWindow { .. }
            | EditorCommand::UnmapWindow
            | EditorCommand::StayOnTop(_)
            | EditorCommand::Crop
            | EditorCommand::Invert => {
                // Window dressing; meaningful only to a windowed front end.
            }
        }
    }

    /// Drain stdin inside one change transaction. Returns true when a
    /// rewind happened.
    fn process_stdin(&mut self) -> bool {
        self.engine.begin_changes();
        let mut buffer = [0u8; 4096];
        while !self.stdin_eof && stdin_readable() {
            let n = loop {
                match nix::unistd::read(0, &mut buffer) {
                    Err(nix::errno::Errno::EINTR) => continue,
                    Err(_) => break 0,
                    Ok(n) => break n,
                }
            };
            if n == 0 {
                self.stdin_eof = true;
                break;
            }
            match self.reader.feed(&buffer[..n]) {
                Ok(values) => {
                    let framing = self.reader.framing();
                    for value in values {
                        match core_editor::command::parse(framing, &value) {
                            Ok(cmd) => self.apply_command(cmd),
                            Err(err) => warn!(target: "editor", %err, "command rejected"),
                        }
                    }
                }
                Err(err) => {
                    warn!(target: "editor", %err, "error while reading stdin commands");
                }
            }
        }
        self.engine.end_changes()
    }
}

fn run(args: Args) -> Result<i32> {
    let document = args
        .document
        .canonicalize()
        .with_context(|| format!("cannot open {}", args.document.display()))?;
    let document_dir = document
        .parent()
        .context("document has no parent directory")?
        .to_owned();
    let document_name = document
        .file_name()
        .context("document has no file name")?
        .to_string_lossy()
        .into_owned();

    let config = core_config::load(args.config.as_deref(), &document_dir)?;
    let _log_guard = configure_logging(&document_dir, config.file.log.filter.as_deref())?;
    install_panic_hook();
    info!(target: "runtime", document = %document.display(), "startup");

    let tectonic_path = find_tectonic(config.file.bundle.tectonic_path.as_deref());
    let backend = select_backend(&args, &config, &tectonic_path, &document_dir)?;

    let framing = if args.json { Framing::Json } else { Framing::Sexp };
    let editor = EditorOut::new(
        Box::new(std::io::stdout()) as Box<dyn Write>,
        framing,
        args.lines,
    );

    let (resmanager, worker) = match backend {
        Backend::Texlive(texlive) => (
            ResourceManager::new(Box::new(texlive), Box::new(NoBackend), Box::new(NoBackend)),
            WorkerConfig {
                tectonic_path: tectonic_path.clone(),
                bundle_fds: None,
            },
        ),
        Backend::Tectonic(server) => {
            let worker = WorkerConfig::for_bundle(tectonic_path.clone(), &server.borrow());
            let backend = TectonicBackend::new(server.clone(), &document_dir);
            (
                ResourceManager::new(Box::new(backend), Box::new(NoBackend), Box::new(NoBackend)),
                worker,
            )
        }
    };

    let mut engine = TexEngine::new(
        &document_dir,
        &document_name,
        worker,
        resmanager,
        editor,
        "",
    );
    engine.set_snapshot_interval(config.file.engine.snapshot_interval_ms);

    let mut app = App {
        engine,
        reader: CommandReader::new(framing),
        delayed: DelayedChanges::default(),
        doc_dir: document_dir.to_string_lossy().into_owned(),
        page: 0,
        need_synctex: true,
        pending_hit: None,
        current_frame: None,
        stdin_eof: false,
    };

    let (cmd_tx, cmd_rx) = bounded::<u8>(1);
    let (event_tx, event_rx) = bounded::<WakeEvent>(1);
    spawn_stdin_notifier(cmd_rx, event_tx);

    let _ = app.engine.editor_mut().reset_sync();
    app.engine.step(true);
    app.display_page();

    let mut advancing = false;
    loop {
        if app.process_stdin() {
            app.engine.step(true);
            app.display_page();
        }

        let before = app.engine.page_count();
        let advance = app.advance_engine();
        if !advance && advancing {
            let _ = app.engine.editor_mut().flush_message();
        }
        advancing = advance;
        let after = app.engine.page_count();
        if app.page >= before && app.page < after {
            app.display_page();
        }

        let hit = app.pending_hit.take().or_else(|| {
            app.engine
                .synctex_has_target()
                .then(|| app.engine.synctex_find_target())
                .flatten()
        });
        if let Some(hit) = hit {
            info!(target: "runtime", page = hit.page, x = hit.x, y = hit.y,
                  "forward search hit");
            if hit.page != app.page {
                app.page = hit.page;
                app.display_page();
            }
            app.engine.synctex_set_target(0, None, 0);
        }

        if !advance && !app.delayed.is_empty() {
            // The worker went quiet: release the buffered keystrokes.
            let doc_dir = app.doc_dir.clone();
            app.engine.begin_changes();
            let mut delayed = std::mem::take(&mut app.delayed);
            delayed.flush(&mut app.engine, &doc_dir);
            if app.engine.end_changes() {
                app.engine.step(true);
                app.display_page();
            }
        }

        let _ = app.engine.editor_mut().sink_mut().flush();

        if advance {
            continue;
        }
        if app.stdin_eof {
            if app.engine.status() == EngineStatus::Terminated || !app.need_advance() {
                break;
            }
            continue;
        }
        let _ = cmd_tx.try_send(b'c');
        match event_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(WakeEvent::StdinReady) => {}
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    let _ = cmd_tx.try_send(b'q');
    app.clamp_page_to_finished_document();
    info!(target: "runtime", "shutdown");
    Ok(0)
}

fn main() {
    let args = Args::parse();
    if args.texpresso {
        // Typesetting-side I/O lives in the worker binary; this flag only
        // exists so a misdirected invocation fails loudly.
        eprintln!("--texpresso is internal to the typesetting worker");
        std::process::exit(1);
    }
    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("texpresso: {err:#}");
            std::process::exit(1);
        }
    }
}
