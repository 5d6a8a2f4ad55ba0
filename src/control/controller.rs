//! Operating-mode state machine.
//!
//! This module provides `ModeController`, which runs one mode iteration at a
//! time over the source selector, speech sink, display and describer, along
//! with the fixed announcement texts it speaks.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::command::{is_exit_keyword, Command, CommandChannel};
use crate::describe::{
    first_sentence, DescriptionRequest, PendingDescription, Poll, VisionDescriber,
    OBSTACLE_PROMPT, SCENE_PROMPT,
};
use crate::display::DisplaySink;
use crate::error::{InputError, ServiceError};
use crate::frame::{ClosenessMap, Frame};
use crate::ingest::SourceSelector;
use crate::obstacle::{ObstacleCooldown, ObstacleEvent};
use crate::speech::{Announcer, SpeechInput, SpeechSink};

pub const MENU: &str = "Press A for Navigation, B for Interactive, C for Continuous description, \
E to switch camera, T to test speech, or Q to quit.";
pub const INVALID_INPUT: &str = "Invalid input. Please use A, B, C, E, T, or Q.";
pub const CAMERA_FAILURE: &str = "Could not read from camera.";
pub const OBSTACLE_WARNING: &str = "Warning! Obstacle detected!";
pub const PROCESSING: &str = "Processing image. Please wait...";
pub const QUESTION_PROMPT: &str = "What would you like to know about what I can see?";
pub const NOT_HEARD: &str =
    "I didn't hear anything. Please try again or say navigate to switch to navigation mode.";
pub const INPUT_UNAVAILABLE: &str = "Question input is unavailable. Returning to the menu.";
pub const EXITING_INTERACTIVE: &str = "Exiting interactive mode.";
pub const SWITCHING_TO_NAVIGATION: &str = "Switching to navigation mode";
pub const SCENE_ANALYSIS: &str = "Analyzing the current scene...";
pub const SPEECH_TEST: &str =
    "Testing speech output. If you can hear this message, speech is working correctly.";
pub const SPEECH_TEST_DONE: &str = "Speech test complete.";
pub const GOODBYE: &str = "Shutting down Vision Assistant. Goodbye!";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatingMode {
    Idle,
    Navigation,
    Interactive,
    ContinuousDescription,
}

impl OperatingMode {
    fn entry_announcement(self) -> &'static str {
        match self {
            OperatingMode::Idle => MENU,
            OperatingMode::Navigation => {
                "Navigation Mode activated. Processing video to detect obstacles."
            }
            OperatingMode::Interactive => {
                "Interactive Mode activated. You can ask questions about what the camera sees."
            }
            OperatingMode::ContinuousDescription => {
                "Continuous description mode activated. I will describe what I see every few seconds."
            }
        }
    }
}

/// `Quit` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Active(OperatingMode),
    Quit,
}

#[derive(Clone, Debug)]
pub struct ControllerSettings {
    pub obstacle_cooldown: Duration,
    pub description_interval: Duration,
    pub retry_pause: Duration,
    pub warning_repeats: u32,
    pub question_timeout: Duration,
    /// Input wait per automatic-mode iteration; also the slice used while a
    /// description is in flight.
    pub poll_interval: Duration,
    /// Upper bound on waiting for one description.
    pub service_deadline: Duration,
    pub shutdown_wait: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            obstacle_cooldown: Duration::from_secs(3),
            description_interval: Duration::from_secs(10),
            retry_pause: Duration::from_secs(1),
            warning_repeats: 3,
            question_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            service_deadline: Duration::from_secs(35),
            shutdown_wait: Duration::from_secs(1),
        }
    }
}

/// What happened during one controller run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    pub frames: u64,
    pub acquisition_failures: u64,
    pub descriptions_requested: u64,
    pub speech_drained: bool,
}

/// Owns every resource of the assistant and runs one mode loop at a time.
pub struct ModeController {
    selector: SourceSelector,
    speech: SpeechSink,
    announcer: Announcer,
    describer: Arc<dyn VisionDescriber>,
    display: Box<dyn DisplaySink>,
    commands: CommandChannel,
    questions: Option<Box<dyn SpeechInput>>,
    settings: ControllerSettings,
    state: ControllerState,
    cooldown: ObstacleCooldown,
    last_description: Option<Instant>,
    deferred: VecDeque<String>,
    /// Set after a failed acquisition until the next frame arrives.
    camera_failing: bool,
    report: RunReport,
}

impl ModeController {
    pub fn new(
        selector: SourceSelector,
        speech: SpeechSink,
        describer: Arc<dyn VisionDescriber>,
        display: Box<dyn DisplaySink>,
        commands: CommandChannel,
        settings: ControllerSettings,
    ) -> Self {
        let announcer = speech.announcer();
        Self {
            selector,
            speech,
            announcer,
            describer,
            display,
            commands,
            questions: None,
            cooldown: ObstacleCooldown::new(settings.obstacle_cooldown),
            settings,
            state: ControllerState::Active(OperatingMode::Idle),
            last_description: None,
            deferred: VecDeque::new(),
            camera_failing: false,
            report: RunReport::default(),
        }
    }

    /// Take Interactive questions from `input` instead of the command channel.
    pub fn with_speech_input(mut self, input: Box<dyn SpeechInput>) -> Self {
        self.questions = Some(input);
        self
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Run until quit, then release every resource.
    pub fn run(mut self) -> RunReport {
        self.announcer.say(MENU);
        while self.state != ControllerState::Quit {
            self.step();
        }
        self.shutdown()
    }

    /// One iteration of the active mode.
    pub fn step(&mut self) {
        let ControllerState::Active(mode) = self.state else {
            return;
        };
        match mode {
            OperatingMode::Idle => self.step_idle(),
            OperatingMode::Navigation => {
                self.step_navigation();
                self.poll_commands(mode);
            }
            OperatingMode::Interactive => {
                if self.questions.is_some() {
                    self.poll_commands(mode);
                    if self.state != ControllerState::Active(mode) {
                        return;
                    }
                }
                self.step_interactive();
            }
            OperatingMode::ContinuousDescription => {
                self.step_continuous();
                self.poll_commands(mode);
            }
        }
    }

    fn shutdown(mut self) -> RunReport {
        self.announcer.say(GOODBYE);
        self.selector.close_all();
        self.display.close();
        let mut report = std::mem::take(&mut self.report);
        report.speech_drained = self.speech.shutdown(self.settings.shutdown_wait);
        log::info!(
            "ModeController: stopped after {} frames, {} descriptions",
            report.frames,
            report.descriptions_requested
        );
        report
    }

    // ------------------------------------------------------------------
    // Modes
    // ------------------------------------------------------------------

    fn step_idle(&mut self) {
        match self.next_line(self.settings.poll_interval) {
            Ok(line) => match Command::parse(&line) {
                Some(command) => self.apply_command(command),
                None => self.announcer.say(INVALID_INPUT),
            },
            Err(InputError::Timeout) => {}
            Err(err) => {
                log::info!("ModeController: {}, quitting", err);
                self.state = ControllerState::Quit;
            }
        }
    }

    fn step_navigation(&mut self) {
        let Some(frame) = self.acquire() else {
            return;
        };
        let event = ObstacleEvent::observe(&frame);
        self.show(&frame, Some(&event.map));
        if !event.is_obstacle || !self.cooldown.try_fire(event.at) {
            return;
        }
        log::info!("ModeController: obstacle detected");
        for _ in 0..self.settings.warning_repeats {
            self.announcer.say(OBSTACLE_WARNING);
        }
        self.announcer.say(PROCESSING);
        match self.describe(&frame, OBSTACLE_PROMPT) {
            Some(Ok(text)) => self
                .announcer
                .say(format!("Obstacle appears to be: {}", first_sentence(&text))),
            Some(Err(err)) => self.announce_service_error(&err),
            None => {}
        }
    }

    fn step_interactive(&mut self) {
        let Some(frame) = self.acquire() else {
            return;
        };
        self.show(&frame, None);
        self.announcer.say(QUESTION_PROMPT);

        let question = match self.listen() {
            Ok(question) => question,
            Err(InputError::Transport(reason)) => {
                log::warn!("ModeController: question input failed: {}", reason);
                self.announcer.say(INPUT_UNAVAILABLE);
                self.enter(OperatingMode::Idle);
                return;
            }
            Err(err) => {
                log::debug!("ModeController: no question: {}", err);
                self.announcer.say(NOT_HEARD);
                return;
            }
        };

        if Command::parse(&question) == Some(Command::Quit) {
            self.state = ControllerState::Quit;
            return;
        }
        if is_exit_keyword(&question) {
            self.announcer.say(EXITING_INTERACTIVE);
            self.enter(OperatingMode::Idle);
            return;
        }
        if question.to_lowercase().contains("navigate") {
            self.announcer.say(SWITCHING_TO_NAVIGATION);
            self.enter(OperatingMode::Navigation);
            return;
        }

        self.announcer
            .say(format!("Analyzing the image to answer: {}", question));
        match self.describe(&frame, &question) {
            Some(Ok(answer)) => self.announcer.say(format!("Answer: {}", answer)),
            Some(Err(err)) => self.announce_service_error(&err),
            None => {}
        }
    }

    fn step_continuous(&mut self) {
        let Some(frame) = self.acquire() else {
            return;
        };
        self.show(&frame, None);
        let due = self
            .last_description
            .map_or(true, |at| at.elapsed() >= self.settings.description_interval);
        if !due {
            return;
        }
        self.announcer.say(SCENE_ANALYSIS);
        match self.describe(&frame, SCENE_PROMPT) {
            Some(Ok(text)) => self.announcer.say(format!("I can see: {}", text)),
            Some(Err(err)) => self.announce_service_error(&err),
            None => {}
        }
        self.last_description = Some(Instant::now());
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    fn enter(&mut self, mode: OperatingMode) {
        log::info!("ModeController: entering {:?}", mode);
        self.state = ControllerState::Active(mode);
        match mode {
            OperatingMode::Navigation => self.cooldown.reset(),
            OperatingMode::ContinuousDescription => self.last_description = None,
            OperatingMode::Idle | OperatingMode::Interactive => {}
        }
        self.announcer.say(mode.entry_announcement());
    }

    fn switch_to(&mut self, mode: OperatingMode) {
        if self.state != ControllerState::Active(mode) {
            self.enter(mode);
        }
    }

    fn apply_command(&mut self, command: Command) {
        match command {
            Command::Navigation => self.switch_to(OperatingMode::Navigation),
            Command::Interactive => self.switch_to(OperatingMode::Interactive),
            Command::ContinuousDescription => {
                self.switch_to(OperatingMode::ContinuousDescription)
            }
            Command::ToggleCamera => {
                let name = self.selector.toggle().to_string();
                self.camera_failing = false;
                log::info!("ModeController: active source is now {}", name);
            }
            Command::SpeechTest => {
                self.announcer.say(SPEECH_TEST);
                self.announcer.say(SPEECH_TEST_DONE);
            }
            Command::Quit => self.state = ControllerState::Quit,
        }
    }

    /// Drain control input for an automatic mode. Waits at most one poll
    /// interval for the first line and stops once the state changes.
    fn poll_commands(&mut self, mode: OperatingMode) {
        let mut wait = self.settings.poll_interval;
        while self.state == ControllerState::Active(mode) {
            let line = match self.next_line(wait) {
                Ok(line) => line,
                Err(_) => break,
            };
            if let Some(command) = Command::parse(&line) {
                self.apply_command(command);
            } else if is_exit_keyword(&line) {
                self.enter(OperatingMode::Idle);
            } else if !line.trim().is_empty() {
                log::debug!("ModeController: ignoring '{}'", line.trim());
            }
            wait = Duration::ZERO;
        }
    }

    // ------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------

    fn acquire(&mut self) -> Option<Frame> {
        match self.selector.get_frame() {
            Ok(frame) => {
                self.report.frames += 1;
                self.camera_failing = false;
                Some(frame)
            }
            Err(err) => {
                self.report.acquisition_failures += 1;
                if self.camera_failing {
                    log::debug!("ModeController: acquisition still failing: {}", err);
                } else {
                    log::warn!("ModeController: acquisition failed: {}", err);
                    self.announcer.say(CAMERA_FAILURE);
                    self.camera_failing = true;
                }
                std::thread::sleep(self.settings.retry_pause);
                None
            }
        }
    }

    fn show(&mut self, frame: &Frame, closeness: Option<&ClosenessMap>) {
        if let Err(err) = self.display.show(frame, closeness) {
            log::warn!("ModeController: display failed: {:#}", err);
        }
    }

    /// Run one description off-loop. Returns `None` when a quit arrived while
    /// waiting; any other input received meanwhile is deferred.
    fn describe(&mut self, frame: &Frame, prompt: &str) -> Option<Result<String, ServiceError>> {
        let image_jpeg = match frame.encode_jpeg() {
            Ok(bytes) => bytes,
            Err(err) => {
                return Some(Err(ServiceError::Transport(format!(
                    "encode frame: {:#}",
                    err
                ))))
            }
        };
        self.report.descriptions_requested += 1;
        let pending = PendingDescription::spawn(
            self.describer.clone(),
            DescriptionRequest {
                prompt: prompt.to_string(),
                image_jpeg,
            },
            self.settings.service_deadline,
        );
        loop {
            if let Poll::Ready(result) = pending.poll(self.settings.poll_interval) {
                return Some(result);
            }
            while let Some(line) = self.commands.try_next() {
                if Command::parse(&line) == Some(Command::Quit) {
                    log::info!("ModeController: quit while waiting for description");
                    self.state = ControllerState::Quit;
                    return None;
                }
                self.deferred.push_back(line);
            }
        }
    }

    fn announce_service_error(&self, err: &ServiceError) {
        log::warn!("ModeController: description failed: {}", err);
        self.announcer.say(err.apology());
    }

    fn next_line(&mut self, wait: Duration) -> Result<String, InputError> {
        if let Some(line) = self.deferred.pop_front() {
            return Ok(line);
        }
        self.commands.next_timeout(wait)
    }

    fn listen(&mut self) -> Result<String, InputError> {
        let timeout = self.settings.question_timeout;
        if let Some(input) = self.questions.as_mut() {
            return input.listen(timeout);
        }
        if let Some(line) = self.deferred.pop_front() {
            let line = line.trim();
            if line.is_empty() {
                return Err(InputError::Unrecognized);
            }
            return Ok(line.to_string());
        }
        self.commands.listen(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::NullDisplay;
    use crate::error::{ConnectionError, FrameError};
    use crate::frame::tests::solid_frame;
    use crate::ingest::{ConnectionState, FrameSource, SourceStats};
    use crate::speech::SpeechOutput;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StillCamera {
        state: ConnectionState,
        rgb: [u8; 3],
    }

    impl FrameSource for StillCamera {
        fn name(&self) -> &str {
            "still camera"
        }

        fn state(&self) -> ConnectionState {
            self.state
        }

        fn open(&mut self) -> Result<(), ConnectionError> {
            self.state = ConnectionState::Connected;
            Ok(())
        }

        fn read_frame(&mut self) -> Result<Frame, FrameError> {
            Ok(solid_frame(100, 100, self.rgb))
        }

        fn close(&mut self) {
            self.state = ConnectionState::Disconnected;
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: 0,
                frames_failed: 0,
                source: "still camera".to_string(),
            }
        }
    }

    #[derive(Clone, Default)]
    struct Transcript(Arc<Mutex<Vec<String>>>);

    impl SpeechOutput for Transcript {
        fn speak(&mut self, text: &str) -> Result<(), ServiceError> {
            self.0.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl VisionDescriber for Counting {
        fn describe(&self, _request: &DescriptionRequest) -> Result<String, ServiceError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok("A wall. Painted white.".to_string())
        }
    }

    fn settings() -> ControllerSettings {
        ControllerSettings {
            retry_pause: Duration::from_millis(1),
            question_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(5),
            service_deadline: Duration::from_secs(5),
            shutdown_wait: Duration::from_secs(5),
            ..ControllerSettings::default()
        }
    }

    fn controller(
        rgb: [u8; 3],
        describer: Arc<Counting>,
        transcript: &Transcript,
        commands: CommandChannel,
    ) -> anyhow::Result<ModeController> {
        let speech = SpeechSink::spawn(Box::new(transcript.clone()))?;
        let camera = StillCamera {
            state: ConnectionState::Disconnected,
            rgb,
        };
        let selector = SourceSelector::new(vec![Box::new(camera)], speech.announcer())?;
        Ok(ModeController::new(
            selector,
            speech,
            describer,
            Box::new(NullDisplay),
            commands,
            settings(),
        ))
    }

    #[test]
    fn invalid_idle_input_keeps_state() -> anyhow::Result<()> {
        let transcript = Transcript::default();
        let commands = CommandChannel::new();
        commands.sender().send("z");
        let mut controller =
            controller([0, 0, 0], Arc::new(Counting::default()), &transcript, commands)?;
        controller.step();
        assert_eq!(
            controller.state(),
            ControllerState::Active(OperatingMode::Idle)
        );
        let report = controller.run_after_quit();
        assert!(report.speech_drained);
        assert!(transcript.0.lock().unwrap().iter().any(|t| t == INVALID_INPUT));
        Ok(())
    }

    #[test]
    fn continuous_mode_describes_once_per_interval() -> anyhow::Result<()> {
        let transcript = Transcript::default();
        let describer = Arc::new(Counting::default());
        let commands = CommandChannel::new();
        commands.sender().send("c");
        let mut controller = controller([40, 40, 40], describer.clone(), &transcript, commands)?;
        controller.step();
        for _ in 0..5 {
            controller.step();
        }
        assert_eq!(describer.0.load(Ordering::SeqCst), 1);
        controller.run_after_quit();
        let lines = transcript.0.lock().unwrap().clone();
        assert!(lines.contains(&"I can see: A wall. Painted white.".to_string()));
        Ok(())
    }

    #[test]
    fn closed_input_quits_from_idle() -> anyhow::Result<()> {
        let transcript = Transcript::default();
        let commands = CommandChannel::new();
        commands.sender().close();
        let controller =
            controller([0, 0, 0], Arc::new(Counting::default()), &transcript, commands)?;
        controller.run();
        assert_eq!(
            transcript.0.lock().unwrap().last().map(String::as_str),
            Some(GOODBYE)
        );
        Ok(())
    }

    /// Replays a fixed list of read outcomes, then keeps succeeding.
    struct FlakyCamera {
        state: ConnectionState,
        outcomes: VecDeque<bool>,
    }

    impl FrameSource for FlakyCamera {
        fn name(&self) -> &str {
            "flaky camera"
        }

        fn state(&self) -> ConnectionState {
            self.state
        }

        fn open(&mut self) -> Result<(), ConnectionError> {
            self.state = ConnectionState::Connecting;
            Ok(())
        }

        fn read_frame(&mut self) -> Result<Frame, FrameError> {
            if self.outcomes.pop_front().unwrap_or(true) {
                self.state = ConnectionState::Connected;
                Ok(solid_frame(100, 100, [10, 10, 10]))
            } else {
                self.state = ConnectionState::Failed;
                Err(FrameError::Timeout)
            }
        }

        fn close(&mut self) {
            self.state = ConnectionState::Disconnected;
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: 0,
                frames_failed: 0,
                source: "flaky camera".to_string(),
            }
        }
    }

    #[test]
    fn camera_failure_is_announced_once_per_outage() -> anyhow::Result<()> {
        let transcript = Transcript::default();
        let speech = SpeechSink::spawn(Box::new(transcript.clone()))?;
        let camera = FlakyCamera {
            state: ConnectionState::Disconnected,
            outcomes: [false, false, false, false, true, false, false]
                .into_iter()
                .collect(),
        };
        let selector = SourceSelector::new(vec![Box::new(camera)], speech.announcer())?;
        let commands = CommandChannel::new();
        commands.sender().send("a");
        let mut controller = ModeController::new(
            selector,
            speech,
            Arc::new(Counting::default()),
            Box::new(NullDisplay),
            commands,
            settings(),
        );

        // Idle -> Navigation, two failing reads, one frame, one more failure.
        for _ in 0..5 {
            controller.step();
        }
        let report = controller.run_after_quit();
        assert_eq!(report.frames, 1);
        assert_eq!(report.acquisition_failures, 3);

        let lines = transcript.0.lock().unwrap().clone();
        let failures = lines.iter().filter(|line| *line == CAMERA_FAILURE).count();
        assert_eq!(failures, 2);
        Ok(())
    }

    impl ModeController {
        fn run_after_quit(mut self) -> RunReport {
            self.state = ControllerState::Quit;
            self.shutdown()
        }
    }
}
