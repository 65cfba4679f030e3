//! kioskd - attendance kiosk daemon
//!
//! The daemon:
//! 1. Loads kiosk configuration (file, environment, flags)
//! 2. Builds the frame source for the configured session mode
//! 3. Runs the recognition loop and the detection poller on their cadences
//! 4. Renders prompts, stability and roster state to the terminal
//! 5. Stops both loops cleanly on Ctrl-C
//!
//! `kioskd enroll` runs a scripted enrollment from the command line
//! instead of the capture loops. `kioskd status` and `kioskd tune` read
//! and adjust the backend's recognition parameters.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use ponto_kiosk::config::Overrides;
use ponto_kiosk::confirm::{PromptState, PromptView};
use ponto_kiosk::display::{self, DisplaySurface};
use ponto_kiosk::enroll::{EnrollmentView, IdentityForm, Step, MIN_PHOTOS};
use ponto_kiosk::frame::FramePayload;
use ponto_kiosk::roster::{self, RosterView};
use ponto_kiosk::source::CameraStatus;
use ponto_kiosk::stability::IndicatorState;
use ponto_kiosk::{
    BackendClient, ConfirmFlow, EnrollmentFlow, EpochCounter, FrameSource, KioskConfig, Pacing,
    RecognitionLoop,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about = "Attendance kiosk daemon")]
struct Args {
    /// Path to the kiosk configuration file.
    #[arg(long, env = "KIOSK_CONFIG")]
    config: Option<PathBuf>,

    /// Session mode: 'local' or 'snapshot'. Wins over file and environment.
    #[arg(long)]
    mode: Option<String>,

    /// Recognition backend base URL.
    #[arg(long)]
    backend_url: Option<String>,

    /// Camera device path, or stub:// for a synthetic feed.
    #[arg(long)]
    camera: Option<String>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the capture and confirmation loops (the default).
    Run {
        /// Tick each loop once, print the outcomes and exit.
        #[arg(long)]
        once: bool,

        /// Confirm prompts as soon as they open, for unattended kiosks.
        #[arg(long)]
        auto_confirm: bool,
    },
    /// Enroll a volunteer from the command line.
    Enroll {
        /// Volunteer's full name.
        #[arg(long)]
        nome: String,

        /// Volunteer's CPF, formatted or bare digits.
        #[arg(long)]
        cpf: String,

        /// Volunteer's registration number.
        #[arg(long)]
        matricula: String,

        /// Contact email, optional.
        #[arg(long, default_value = "")]
        email: String,

        /// Photos to capture before finalizing.
        #[arg(long, default_value_t = MIN_PHOTOS)]
        photos: u32,
    },
    /// Show backend state: model, today's attendance, last recognition.
    Status,
    /// Adjust the backend's recognition parameters.
    Tune {
        /// New confidence threshold.
        #[arg(long)]
        threshold: Option<f64>,

        /// Seconds a face must hold still before a detection fires.
        #[arg(long)]
        stable_seconds: Option<f64>,

        /// Cooldown before the same person can be detected again.
        #[arg(long)]
        cooldown_seconds: Option<f64>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::from_flag(Some(&args.ui));

    let config = {
        let _stage = ui.stage("load configuration");
        let mut config = KioskConfig::load_from(args.config.as_deref())?;
        config.apply_overrides(&Overrides {
            mode: args.mode.clone(),
            backend_url: args.backend_url.clone(),
            camera_device: args.camera.clone(),
        })?;
        config
    };
    log::info!(
        "kioskd starting in {} mode against {}",
        config.mode,
        config.backend_url
    );

    match args.command.unwrap_or(Command::Run {
        once: false,
        auto_confirm: false,
    }) {
        Command::Run { once, auto_confirm } => run(config, &ui, once, auto_confirm),
        Command::Enroll {
            nome,
            cpf,
            matricula,
            email,
            photos,
        } => enroll(
            config,
            &ui,
            IdentityForm {
                nome,
                cpf,
                matricula,
                email,
            },
            photos,
        ),
        Command::Status => status(config, &ui),
        Command::Tune {
            threshold,
            stable_seconds,
            cooldown_seconds,
        } => tune(config, &ui, threshold, stable_seconds, cooldown_seconds),
    }
}

fn run(config: KioskConfig, ui: &ui::Ui, once: bool, auto_confirm: bool) -> Result<()> {
    let client = BackendClient::new(&config.backend_url, config.http_timeout)?;
    let epochs = EpochCounter::default();
    let surface = display::shared(TerminalSurface::default());

    {
        let _stage = ui.stage("probe backend");
        match client.model_status() {
            Ok(status) => ui.note(&format!(
                "model trained={} threshold={:.1} datasets={}",
                status.trained,
                status.threshold,
                status.datasets.len()
            )),
            Err(err) => log::warn!("model status unavailable: {:#}", err),
        }
        roster::refresh(&client, &surface);
    }

    let source = {
        let _stage = ui.stage("open frame source");
        let mut source = FrameSource::from_config(&config)?;
        source.connect()?;
        if let Some(status) = source.camera_status() {
            display::lock(&surface).show_camera_status(&status);
        }
        source
    };

    let recognition = Arc::new(Mutex::new(RecognitionLoop::new(
        client.clone(),
        source,
        epochs.clone(),
        surface.clone(),
    )));
    let confirm = Arc::new(Mutex::new(ConfirmFlow::new(
        client,
        surface,
        epochs,
        config.timers.confirm_autoclose,
    )));

    if once {
        let outcome = lock(&recognition).tick();
        println!("recognition tick: {:?}", outcome);
        let poll = lock(&confirm).poll_tick();
        println!("detection poll: {:?}", poll);
        lock(&recognition).source_mut().stop();
        return Ok(());
    }

    let recognition_handle = RecognitionLoop::spawn(
        recognition.clone(),
        RecognitionLoop::pacing(config.mode, &config.timers),
    );
    let confirm_handle = ConfirmFlow::spawn(
        confirm.clone(),
        Pacing::FixedInterval(config.timers.detection_poll),
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");
    log::info!("kioskd running. Ctrl-C stops the loops.");

    let mut last_health_log = Instant::now();
    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        if auto_confirm {
            let mut guard = lock(&confirm);
            if matches!(guard.state(), PromptState::Open { .. }) {
                guard.confirm();
            }
        }

        if last_health_log.elapsed() >= Duration::from_secs(5) {
            let guard = lock(&recognition);
            let stats = guard.stats();
            log::info!(
                "recognition source={} finished={} dropped={} stale={}",
                guard.source().describe(),
                stats.cycles_finished,
                stats.ticks_dropped,
                stats.cycles_stale
            );
            drop(guard);
            let polls = lock(&confirm).stats();
            log::debug!(
                "detection polls finished={} dropped={}",
                polls.cycles_finished,
                polls.ticks_dropped
            );
            last_health_log = Instant::now();
        }
    }

    log::info!("shutdown signal received, stopping loops...");
    recognition_handle.stop()?;
    confirm_handle.stop()?;
    lock(&recognition).source_mut().stop();
    Ok(())
}

fn enroll(config: KioskConfig, ui: &ui::Ui, form: IdentityForm, photos: u32) -> Result<()> {
    let client = BackendClient::new(&config.backend_url, config.http_timeout)?;
    let epochs = EpochCounter::default();
    let surface = display::shared(TerminalSurface::default());
    let source = FrameSource::from_config(&config)?;
    let mut flow = EnrollmentFlow::new(
        client,
        surface,
        epochs,
        config.mode,
        Some(source),
        &config.timers,
    );

    {
        let _stage = ui.stage("submit identity");
        flow.begin();
        flow.submit_identity(&form);
    }
    if flow.session().step != Step::Step2 {
        return Err(anyhow!("identity was not accepted"));
    }

    let preview_delay = match EnrollmentFlow::preview_pacing(config.mode, &config.timers) {
        Pacing::FixedInterval(period) => period,
        Pacing::DelayAfterCompletion { initial, delay } => {
            // The initial delay applies once, before the first preview tick.
            std::thread::sleep(initial);
            delay
        }
    };
    {
        let _stage = ui.stage("unlock capture");
        let mut attempts = 0;
        while !flow.session().capture_enabled {
            attempts += 1;
            if attempts > 50 {
                return Err(anyhow!("preview never unlocked photo capture"));
            }
            flow.preview_tick();
            flow.service(Instant::now());
            std::thread::sleep(preview_delay);
        }
    }

    {
        let _stage = ui.stage("capture photos");
        let mut stalled = 0;
        while flow.session().photo_count < photos {
            let before = flow.session().photo_count;
            flow.preview_tick();
            flow.service(Instant::now());
            flow.capture_photo();
            if flow.session().photo_count > before {
                stalled = 0;
                ui.note(&EnrollmentFlow::counter_copy(flow.session().photo_count));
            } else {
                stalled += 1;
                if stalled >= 20 {
                    return Err(anyhow!("photo capture is not making progress"));
                }
                std::thread::sleep(preview_delay);
            }
        }
    }
    let previews = flow.stats();
    log::debug!(
        "enrollment previews finished={} dropped={} stale={}",
        previews.cycles_finished,
        previews.ticks_dropped,
        previews.cycles_stale
    );

    {
        let _stage = ui.stage("retrain model");
        flow.finalize();
    }
    if flow.session().step != Step::Redirecting {
        return Err(anyhow!("model retrain failed"));
    }
    ui.note("enrollment complete");
    Ok(())
}

fn status(config: KioskConfig, ui: &ui::Ui) -> Result<()> {
    let client = BackendClient::new(&config.backend_url, config.http_timeout)?;
    {
        let _stage = ui.stage("model status");
        let status = client.model_status()?;
        ui.note(&format!(
            "trained={} threshold={:.1}",
            status.trained, status.threshold
        ));
        for dataset in &status.datasets {
            ui.note(&format!("{}: {} images", dataset.cpf, dataset.imagens));
        }
    }
    {
        let _stage = ui.stage("today's attendance");
        let entries = client.today_attendance()?;
        if entries.is_empty() {
            ui.note("no entries yet");
        }
        for entry in &entries {
            match entry.confianca {
                Some(confianca) => {
                    ui.note(&format!("{} {} ({:.1})", entry.hora, entry.nome, confianca))
                }
                None => ui.note(&format!("{} {}", entry.hora, entry.nome)),
            }
        }
    }
    {
        let _stage = ui.stage("last recognition");
        let last = client.last_recognition()?;
        match last.nome {
            Some(nome) => ui.note(&format!(
                "{} ({})",
                nome,
                last.horario.as_deref().unwrap_or("-")
            )),
            None => ui.note("none yet"),
        }
    }
    Ok(())
}

fn tune(
    config: KioskConfig,
    ui: &ui::Ui,
    threshold: Option<f64>,
    stable_seconds: Option<f64>,
    cooldown_seconds: Option<f64>,
) -> Result<()> {
    if threshold.is_none() && stable_seconds.is_none() && cooldown_seconds.is_none() {
        return Err(anyhow!(
            "nothing to adjust; pass --threshold, --stable-seconds or --cooldown-seconds"
        ));
    }
    let client = BackendClient::new(&config.backend_url, config.http_timeout)?;
    if let Some(threshold) = threshold {
        let _stage = ui.stage("adjust threshold");
        let reply = client.set_threshold(threshold)?;
        if !reply.success {
            return Err(anyhow!("backend rejected threshold {}", threshold));
        }
        ui.note(&format!("threshold={:.1}", reply.threshold));
    }
    if stable_seconds.is_some() || cooldown_seconds.is_some() {
        let _stage = ui.stage("adjust timings");
        let reply = client.set_timings(stable_seconds, cooldown_seconds)?;
        if !reply.success {
            return Err(anyhow!("backend rejected the timing adjustment"));
        }
        ui.note(&format!(
            "stable={:.1}s cooldown={:.1}s",
            reply.stable_seconds, reply.cooldown_seconds
        ));
    }
    Ok(())
}

fn lock<T>(shared: &Arc<Mutex<T>>) -> std::sync::MutexGuard<'_, T> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Renders kiosk state as log lines. Stands in for the kiosk's screen.
#[derive(Default)]
struct TerminalSurface {
    overlay: Option<(u32, u32)>,
    stability_visible: bool,
}

impl DisplaySurface for TerminalSurface {
    fn resize_overlay(&mut self, width: u32, height: u32) {
        if self.overlay != Some((width, height)) {
            self.overlay = Some((width, height));
            log::debug!("overlay sized to {}x{}", width, height);
        }
    }

    fn paint_processed_frame(&mut self, payload: &FramePayload, width: u32, height: u32) {
        log::debug!("frame painted {}x{} ({})", width, height, payload);
    }

    fn render_stability(&mut self, indicator: &IndicatorState) {
        if indicator.visible {
            self.stability_visible = true;
            if let Some(label) = &indicator.label {
                log::debug!("stability {}% {}", indicator.percent, label);
            } else {
                log::debug!("stability {}%", indicator.percent);
            }
        } else if self.stability_visible {
            self.stability_visible = false;
            log::debug!("stability hidden");
        }
    }

    fn render_prompt(&mut self, prompt: Option<&PromptView>) {
        match prompt {
            Some(view) => log::info!(
                "prompt: {} ({}) {} [{}]",
                view.record.nome,
                view.record.matricula,
                view.record.horario,
                view.status.as_deref().unwrap_or("-")
            ),
            None => log::debug!("prompt closed"),
        }
    }

    fn render_enrollment(&mut self, view: &EnrollmentView) {
        if let Some((text, kind)) = &view.status {
            log::info!("enrollment [{:?}] {}", kind, text);
        }
        if let Some(overlay) = &view.training_overlay {
            log::info!("enrollment overlay: {}", overlay);
        }
        log::debug!("enrollment: {} | {}", view.stage_label, view.counter_text);
    }

    fn render_roster(&mut self, view: &RosterView) {
        match &view.placeholder {
            Some(placeholder) => log::info!("roster: {}", placeholder),
            None => log::info!("roster: {} registered", view.rows.len()),
        }
    }

    fn show_camera_status(&mut self, status: &CameraStatus) {
        log::info!("camera: {:?}", status);
    }

    fn navigate(&mut self, path: &str) {
        log::info!("navigate -> {}", path);
    }
}
