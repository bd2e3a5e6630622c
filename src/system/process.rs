//! 외부 명령 실행기
//!
//! 여러 개의 서브프로세스 호출을 큐에 쌓아 순서대로 실행한다.
//! stdout/stderr는 리더 스레드가 라인 단위로 채널에 넣고, 호스트 루프가
//! [`ProcessRunner::poll`]을 호출해 블로킹 없이 꺼내 처리한다.
//!
//! 인자는 항상 인자 벡터로 전달되며 셸 문자열로 합쳐지지 않는다.

use crate::models::{CapturedOutput, FileEntry, ProcError, ProcErrorKind};
use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;
use std::time::Duration;

/// 출력 스트림 구분
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// 라인 파서가 만들어내는 이벤트
#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
    /// 완성된 엔트리 하나
    Entry(FileEntry),
    /// 진행률 (0.0 ~ 1.0)
    Progress(f64),
    /// 사람이 읽을 수 있는 진행 메시지
    Message(String),
    /// 분할 압축 감지
    MultiVolume,
}

/// 호출 하나에 붙는 출력 라인 파서
///
/// 상태는 파서 값 자체가 가진다. 라인 벡터를 직접 넣어서 테스트할 수 있다.
pub trait OutputParser {
    fn parse_line(&mut self, stream: OutputStream, line: &str, events: &mut Vec<ParseEvent>);

    /// 스트림이 모두 닫힌 뒤 한 번 호출
    fn finish(&mut self, _events: &mut Vec<ParseEvent>) {}
}

/// 실행 중 알림을 받는 쪽
pub trait ProcessObserver {
    /// 각 호출의 첫 라인보다 먼저 호출
    fn command_began(&mut self, _index: usize, _program: &str) {}

    fn output_line(&mut self, _stream: OutputStream, _line: &str) {}

    fn parse_event(&mut self, _event: ParseEvent) {}
}

impl ProcessObserver for () {}

/// 큐 전체 실행 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// 첫 번째 실패 (없으면 None 종류)
    pub error: ProcError,
    /// 모든 호출의 출력 (sticky 호출 포함)
    pub output: CapturedOutput,
}

#[derive(Debug, Clone)]
struct CommandArg {
    value: String,
    /// 로그에 표시할 문자열 (비밀 인자면 가려짐)
    display: String,
}

struct Invocation {
    program: String,
    args: Vec<CommandArg>,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
    sticky: bool,
    parser: Option<Box<dyn OutputParser>>,
}

impl Invocation {
    fn new(program: String) -> Self {
        Self {
            program,
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            sticky: false,
            parser: None,
        }
    }

    fn display_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.display);
        }
        line
    }
}

enum ReaderMessage {
    Line(OutputStream, String),
    Closed,
    Failed(String),
}

struct RunningCommand {
    index: usize,
    child: Child,
    rx: Receiver<ReaderMessage>,
    open_streams: usize,
    io_error: Option<String>,
    parser: Option<Box<dyn OutputParser>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunnerState {
    Idle,
    Running,
    /// 큐가 끝났고 결과를 아직 돌려주지 않음
    Finished,
}

/// 서브프로세스 큐 실행기
pub struct ProcessRunner {
    pending: Option<Invocation>,
    queue: VecDeque<Invocation>,
    running: Option<RunningCommand>,
    state: RunnerState,
    error: ProcError,
    output: CapturedOutput,
    next_index: usize,
    spawned: usize,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self {
            pending: None,
            queue: VecDeque::new(),
            running: None,
            state: RunnerState::Idle,
            error: ProcError::none(),
            output: CapturedOutput::default(),
            next_index: 0,
            spawned: 0,
        }
    }

    /// 새 호출 작성 시작 (닫히지 않은 이전 호출은 자동으로 큐에 들어감)
    pub fn begin_command(&mut self, program: impl Into<String>) {
        self.end_command();
        self.pending = Some(Invocation::new(program.into()));
    }

    pub fn add_arg(&mut self, arg: impl Into<String>) {
        let value = arg.into();
        self.with_pending(|inv| {
            inv.args.push(CommandArg {
                display: value.clone(),
                value,
            })
        });
    }

    pub fn add_args<I, S>(&mut self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for arg in args {
            self.add_arg(arg);
        }
    }

    /// 암호처럼 로그에 남기면 안 되는 인자 (`prefix`만 표시)
    pub fn add_secret_arg(&mut self, prefix: &str, secret: &str) {
        let value = format!("{}{}", prefix, secret);
        let display = format!("{}***", prefix);
        self.with_pending(|inv| inv.args.push(CommandArg { value, display }));
    }

    pub fn set_working_dir(&mut self, dir: impl AsRef<Path>) {
        let dir = dir.as_ref().to_path_buf();
        self.with_pending(|inv| inv.working_dir = Some(dir));
    }

    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let pair = (key.into(), value.into());
        self.with_pending(|inv| inv.env.push(pair));
    }

    /// 앞선 호출이 실패해도 실행할지 (정리 단계용)
    pub fn set_sticky(&mut self, sticky: bool) {
        self.with_pending(|inv| inv.sticky = sticky);
    }

    pub fn set_parser(&mut self, parser: Box<dyn OutputParser>) {
        self.with_pending(|inv| inv.parser = Some(parser));
    }

    pub fn end_command(&mut self) {
        if let Some(inv) = self.pending.take() {
            self.queue.push_back(inv);
        }
    }

    /// 대기 중인 호출 모두 제거 (실행 중에는 무시)
    pub fn clear(&mut self) {
        if self.state == RunnerState::Running {
            log::warn!("process runner: clear ignored while running");
            return;
        }
        self.pending = None;
        self.queue.clear();
    }

    /// 대기 중인 호출의 명령줄 (비밀 인자는 가려짐)
    pub fn describe_queue(&self) -> Vec<String> {
        self.queue
            .iter()
            .chain(self.pending.iter())
            .map(|inv| {
                let mut line = inv.display_line();
                if inv.sticky {
                    line.push_str(" [sticky]");
                }
                line
            })
            .collect()
    }

    pub fn is_running(&self) -> bool {
        self.state == RunnerState::Running
    }

    /// 지금까지 생성한 서브프로세스 수
    pub fn spawned_count(&self) -> usize {
        self.spawned
    }

    /// 큐 실행 시작 (즉시 반환)
    pub fn start(&mut self) {
        if self.state != RunnerState::Idle {
            log::warn!("process runner: start ignored, queue already running");
            return;
        }
        self.end_command();
        self.error = ProcError::none();
        self.output = CapturedOutput::default();
        self.next_index = 0;
        self.state = RunnerState::Running;
    }

    /// 실행 중인 프로세스 종료, 시작 안 한 호출은 버림
    pub fn stop(&mut self) {
        if self.state != RunnerState::Running {
            return;
        }
        self.queue.clear();
        self.pending = None;
        self.error = ProcError::new(ProcErrorKind::Stopped);

        if let Some(mut running) = self.running.take() {
            if let Err(e) = running.child.kill() {
                log::warn!("process runner: kill failed: {}", e);
            }
            if let Err(e) = running.child.wait() {
                log::warn!("process runner: wait after kill failed: {}", e);
            }
            // 이미 도착한 출력은 보존
            while let Ok(message) = running.rx.try_recv() {
                if let ReaderMessage::Line(stream, line) = message {
                    self.record_line(stream, line);
                }
            }
        }
        log::info!("process runner: stopped");
        self.state = RunnerState::Finished;
    }

    /// 채널에 쌓인 출력을 처리하고, 큐가 끝나면 결과 반환
    pub fn poll(&mut self, observer: &mut dyn ProcessObserver) -> Option<ProcessOutcome> {
        loop {
            match self.state {
                RunnerState::Idle => return None,
                RunnerState::Finished => return Some(self.take_outcome()),
                RunnerState::Running => {}
            }

            if self.running.is_none() && !self.spawn_next(observer) {
                self.state = RunnerState::Finished;
                continue;
            }

            if !self.pump_running(observer) {
                return None;
            }
        }
    }

    /// 끝날 때까지 폴링 (CLI, 테스트용)
    pub fn run_to_completion(&mut self, observer: &mut dyn ProcessObserver) -> ProcessOutcome {
        if self.state == RunnerState::Idle {
            self.start();
        }
        loop {
            if let Some(outcome) = self.poll(observer) {
                return outcome;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn with_pending(&mut self, apply: impl FnOnce(&mut Invocation)) {
        match self.pending.as_mut() {
            Some(inv) => apply(inv),
            None => log::warn!("process runner: argument given outside begin_command/end_command"),
        }
    }

    fn take_outcome(&mut self) -> ProcessOutcome {
        self.state = RunnerState::Idle;
        ProcessOutcome {
            error: std::mem::take(&mut self.error),
            output: std::mem::take(&mut self.output),
        }
    }

    fn record_line(&mut self, stream: OutputStream, line: String) {
        match stream {
            OutputStream::Stdout => self.output.stdout.push(line),
            OutputStream::Stderr => self.output.stderr.push(line),
        }
    }

    fn record_failure(&mut self, error: ProcError) {
        if !self.error.is_error() {
            self.error = error;
        }
    }

    /// 다음 실행 가능한 호출 생성. 큐가 비면 false
    fn spawn_next(&mut self, observer: &mut dyn ProcessObserver) -> bool {
        while let Some(inv) = self.queue.pop_front() {
            let index = self.next_index;
            self.next_index += 1;

            if self.error.is_error() && !inv.sticky {
                log::debug!("process runner: skipping [{}] {}", index, inv.display_line());
                continue;
            }

            observer.command_began(index, &inv.program);
            log::debug!("process runner: spawning [{}] {}", index, inv.display_line());

            match spawn_invocation(&inv) {
                Ok(mut child) => {
                    self.spawned += 1;
                    let (tx, rx) = mpsc::channel();
                    let mut open_streams = 0;
                    if let Some(stdout) = child.stdout.take() {
                        spawn_reader(stdout, OutputStream::Stdout, tx.clone());
                        open_streams += 1;
                    }
                    if let Some(stderr) = child.stderr.take() {
                        spawn_reader(stderr, OutputStream::Stderr, tx);
                        open_streams += 1;
                    }
                    self.running = Some(RunningCommand {
                        index,
                        child,
                        rx,
                        open_streams,
                        io_error: None,
                        parser: inv.parser,
                    });
                    return true;
                }
                Err(e) => {
                    log::warn!("process runner: could not spawn {}: {}", inv.program, e);
                    self.record_failure(classify_spawn_error(&e));
                }
            }
        }
        false
    }

    /// 실행 중인 호출의 출력 처리. 호출이 끝났으면 true
    fn pump_running(&mut self, observer: &mut dyn ProcessObserver) -> bool {
        let Some(mut running) = self.running.take() else {
            return true;
        };
        let mut events = Vec::new();

        while running.open_streams > 0 {
            match running.rx.try_recv() {
                Ok(ReaderMessage::Line(stream, line)) => {
                    observer.output_line(stream, &line);
                    if let Some(parser) = running.parser.as_mut() {
                        parser.parse_line(stream, &line, &mut events);
                        for event in events.drain(..) {
                            observer.parse_event(event);
                        }
                    }
                    self.record_line(stream, line);
                }
                Ok(ReaderMessage::Closed) => running.open_streams -= 1,
                Ok(ReaderMessage::Failed(message)) => {
                    running.open_streams -= 1;
                    if running.io_error.is_none() {
                        running.io_error = Some(message);
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => running.open_streams = 0,
            }
        }

        if running.open_streams > 0 {
            self.running = Some(running);
            return false;
        }

        let status = match running.child.try_wait() {
            Ok(Some(status)) => Ok(status),
            Ok(None) => {
                self.running = Some(running);
                return false;
            }
            Err(e) => Err(e),
        };

        if let Some(parser) = running.parser.as_mut() {
            parser.finish(&mut events);
            for event in events.drain(..) {
                observer.parse_event(event);
            }
        }

        let error = match (status, running.io_error) {
            (Err(e), _) => ProcError::with_details(ProcErrorKind::IoChannel, e.to_string()),
            (Ok(_), Some(message)) => ProcError::with_details(ProcErrorKind::IoChannel, message),
            (Ok(status), None) if status.success() => ProcError::none(),
            (Ok(status), None) => match status.code() {
                Some(code) => ProcError::exited(code),
                None => ProcError::with_details(
                    ProcErrorKind::ExitedAbnormally,
                    "Command terminated by a signal.",
                ),
            },
        };

        log::debug!(
            "process runner: [{}] finished: {}",
            running.index,
            if error.is_error() { error.reason() } else { "ok".to_string() }
        );
        if error.is_error() {
            self.record_failure(error);
        }
        true
    }
}

fn spawn_invocation(inv: &Invocation) -> io::Result<Child> {
    let mut command = Command::new(&inv.program);
    command
        .args(inv.args.iter().map(|arg| arg.value.as_str()))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = &inv.working_dir {
        command.current_dir(dir);
    }
    for (key, value) in &inv.env {
        command.env(key, value);
    }
    command.spawn()
}

fn classify_spawn_error(e: &io::Error) -> ProcError {
    match e.kind() {
        io::ErrorKind::NotFound => {
            ProcError::with_details(ProcErrorKind::CommandNotFound, e.to_string())
        }
        _ => ProcError::with_details(ProcErrorKind::Spawn, e.to_string()),
    }
}

/// 스트림을 라인 단위로 읽어 채널로 전달
///
/// 개행 없는 마지막 조각은 EOF에서 한 라인으로 전달된다.
fn spawn_reader<R: Read + Send + 'static>(source: R, stream: OutputStream, tx: Sender<ReaderMessage>) {
    thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => {
                    let _ = tx.send(ReaderMessage::Closed);
                    return;
                }
                Ok(_) => {
                    while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
                        buf.pop();
                    }
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    if tx.send(ReaderMessage::Line(stream, line)).is_err() {
                        return;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let _ = tx.send(ReaderMessage::Failed(e.to_string()));
                    return;
                }
            }
        }
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Instant;
    use tempfile::tempdir;

    #[derive(Default)]
    struct Recorder {
        began: Vec<(usize, String)>,
        lines: Vec<(OutputStream, String)>,
        events: Vec<ParseEvent>,
    }

    impl ProcessObserver for Recorder {
        fn command_began(&mut self, index: usize, program: &str) {
            self.began.push((index, program.to_string()));
        }

        fn output_line(&mut self, stream: OutputStream, line: &str) {
            self.lines.push((stream, line.to_string()));
        }

        fn parse_event(&mut self, event: ParseEvent) {
            self.events.push(event);
        }
    }

    struct EchoParser;

    impl OutputParser for EchoParser {
        fn parse_line(&mut self, stream: OutputStream, line: &str, events: &mut Vec<ParseEvent>) {
            if stream == OutputStream::Stdout {
                events.push(ParseEvent::Message(line.to_uppercase()));
            }
        }

        fn finish(&mut self, events: &mut Vec<ParseEvent>) {
            events.push(ParseEvent::Progress(1.0));
        }
    }

    fn shell(runner: &mut ProcessRunner, script: &str) {
        runner.begin_command("sh");
        runner.add_arg("-c");
        runner.add_arg(script);
    }

    #[test]
    fn test_lines_are_delivered_in_order_including_partial_tail() {
        let mut runner = ProcessRunner::new();
        shell(&mut runner, "printf 'first\\nsecond\\nthird'");
        runner.end_command();

        let mut recorder = Recorder::default();
        let outcome = runner.run_to_completion(&mut recorder);

        assert!(!outcome.error.is_error());
        assert_eq!(outcome.output.stdout, vec!["first", "second", "third"]);
        assert_eq!(recorder.began, vec![(0, "sh".to_string())]);
        assert_eq!(recorder.lines.len(), 3);
    }

    #[test]
    fn test_parser_receives_lines_and_finish() {
        let mut runner = ProcessRunner::new();
        shell(&mut runner, "echo one; echo two");
        runner.set_parser(Box::new(EchoParser));
        runner.end_command();

        let mut recorder = Recorder::default();
        runner.run_to_completion(&mut recorder);

        assert_eq!(
            recorder.events,
            vec![
                ParseEvent::Message("ONE".to_string()),
                ParseEvent::Message("TWO".to_string()),
                ParseEvent::Progress(1.0),
            ]
        );
    }

    #[test]
    fn test_sticky_invocation_runs_after_failure() {
        let mut runner = ProcessRunner::new();
        shell(&mut runner, "echo broken >&2; exit 3");
        runner.end_command();
        shell(&mut runner, "echo skipped");
        runner.end_command();
        shell(&mut runner, "echo cleanup");
        runner.set_sticky(true);
        runner.end_command();

        let outcome = runner.run_to_completion(&mut ());

        assert_eq!(outcome.error.kind, ProcErrorKind::ExitedAbnormally);
        assert_eq!(outcome.error.status, Some(3));
        assert_eq!(outcome.output.stdout, vec!["cleanup"]);
        assert_eq!(outcome.output.stderr, vec!["broken"]);
        assert_eq!(runner.spawned_count(), 2);
    }

    #[test]
    fn test_first_failure_is_reported() {
        let mut runner = ProcessRunner::new();
        shell(&mut runner, "exit 2");
        runner.end_command();
        shell(&mut runner, "exit 5");
        runner.set_sticky(true);
        runner.end_command();

        let outcome = runner.run_to_completion(&mut ());
        assert_eq!(outcome.error.status, Some(2));
    }

    #[test]
    fn test_missing_program_is_command_not_found() {
        let mut runner = ProcessRunner::new();
        runner.begin_command("bokslarc-no-such-tool-hopefully");
        runner.end_command();

        let outcome = runner.run_to_completion(&mut ());
        assert_eq!(outcome.error.kind, ProcErrorKind::CommandNotFound);
        assert_eq!(runner.spawned_count(), 0);
    }

    #[test]
    fn test_working_dir_and_env_are_applied() {
        let temp = tempdir().expect("create tempdir");
        let mut runner = ProcessRunner::new();
        shell(&mut runner, "pwd -P; echo \"$BOKSLARC_TEST_VALUE\"");
        runner.set_working_dir(temp.path());
        runner.set_env("BOKSLARC_TEST_VALUE", "hello world");
        runner.end_command();

        let outcome = runner.run_to_completion(&mut ());
        let expected = fs::canonicalize(temp.path()).expect("canonicalize");
        assert_eq!(outcome.output.stdout[0], expected.to_string_lossy());
        assert_eq!(outcome.output.stdout[1], "hello world");
    }

    #[test]
    fn test_arguments_are_not_shell_interpreted() {
        let mut runner = ProcessRunner::new();
        runner.begin_command("printf");
        runner.add_args(["%s\\n", "a b; echo injected", "$HOME"]);
        runner.end_command();

        let outcome = runner.run_to_completion(&mut ());
        assert_eq!(outcome.output.stdout, vec!["a b; echo injected", "$HOME"]);
    }

    #[test]
    fn test_secret_arg_is_passed_verbatim_but_redacted_for_display() {
        let mut runner = ProcessRunner::new();
        runner.begin_command("printf");
        runner.add_arg("%s\\n");
        runner.add_secret_arg("-p", "hunter2");
        let display = runner
            .pending
            .as_ref()
            .map(Invocation::display_line)
            .expect("pending invocation");
        runner.end_command();

        assert_eq!(display, "printf %s\\n -p***");
        let outcome = runner.run_to_completion(&mut ());
        assert_eq!(outcome.output.stdout, vec!["-phunter2"]);
    }

    #[test]
    fn test_stop_kills_child_and_discards_queue() {
        let mut runner = ProcessRunner::new();
        shell(&mut runner, "echo started; exec sleep 10");
        runner.end_command();
        shell(&mut runner, "echo never");
        runner.set_sticky(true);
        runner.end_command();

        runner.start();
        let began = Instant::now();
        // 첫 라인이 도착할 때까지 폴링
        let mut recorder = Recorder::default();
        while recorder.lines.is_empty() && began.elapsed() < Duration::from_secs(5) {
            assert!(runner.poll(&mut recorder).is_none());
            thread::sleep(Duration::from_millis(5));
        }
        runner.stop();
        let outcome = runner.poll(&mut recorder).expect("outcome after stop");

        assert_eq!(outcome.error.kind, ProcErrorKind::Stopped);
        assert_eq!(outcome.output.stdout, vec!["started"]);
        assert_eq!(runner.spawned_count(), 1);
        assert!(began.elapsed() < Duration::from_secs(5));
        assert!(!runner.is_running());
    }

    #[test]
    fn test_empty_queue_finishes_immediately() {
        let mut runner = ProcessRunner::new();
        assert!(runner.poll(&mut ()).is_none());
        runner.start();
        let outcome = runner.poll(&mut ()).expect("empty queue outcome");
        assert!(!outcome.error.is_error());
        assert!(outcome.output.is_empty());
    }

    #[test]
    fn test_runner_is_reusable_after_outcome() {
        let mut runner = ProcessRunner::new();
        shell(&mut runner, "exit 1");
        runner.end_command();
        assert!(runner.run_to_completion(&mut ()).error.is_error());

        shell(&mut runner, "echo again");
        runner.end_command();
        let outcome = runner.run_to_completion(&mut ());
        assert!(!outcome.error.is_error());
        assert_eq!(outcome.output.stdout, vec!["again"]);
        assert_eq!(runner.spawned_count(), 2);
    }
}
