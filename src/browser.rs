use std::collections::HashMap;
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use fnv::FnvHashMap;

use crate::error::{MonkeyError, Result};
use crate::protocol::{cmd, ClickKind, Inbound, LogRecord, MouseButton, PlotCmd, WindowEvent};
use crate::pump::{EventPump, TimerToken};
use crate::transport::Transport;
use crate::window::{Window, WindowId};

/// Default deadline for blocking operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// One credential record. Absent fields are wildcards when scoring a login
/// prompt; see [`Browser::add_auth`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthEntry {
    pub url: Option<String>,
    pub realm: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// One certificate-error exception record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertEntry {
    pub url: Option<String>,
}

/// A pending authentication prompt raised by the child.
#[derive(Debug, Clone)]
pub struct LoginWindow {
    pub id: String,
    pub url: String,
    pub realm: String,
    pub username: String,
}

/// A pending certificate-decision prompt raised by the child.
#[derive(Debug, Clone)]
pub struct CertWindow {
    pub id: String,
    pub url: String,
}

/// Filter for [`Browser::wait_for_log`]. A record matches when every
/// provided field matches.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub source: Option<String>,
    pub foldable: Option<bool>,
    pub level: Option<String>,
    pub substring: Option<String>,
}

impl LogFilter {
    pub fn matches(&self, record: &LogRecord) -> bool {
        self.source.as_deref().map_or(true, |s| s == record.source)
            && self.foldable.map_or(true, |f| f == record.foldable)
            && self.level.as_deref().map_or(true, |l| l == record.level)
            && self
                .substring
                .as_deref()
                .map_or(true, |s| record.message.contains(s))
    }
}

/// How to launch the browser child.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Path to the browser child binary.
    ///
    /// If unspecified, the builder will try to automatically detect a
    /// suitable binary; see [`default_executable`].
    executable: PathBuf,
    /// Argv prefix placed before the executable, e.g. a valgrind wrapper.
    wrapper: Vec<String>,
    /// Options passed on the child's command line at launch.
    launch_options: Vec<String>,
    /// Environment variables overlaid on the current environment.
    envs: HashMap<String, String>,
    /// Value for the child's `LANGUAGE` environment variable.
    language: Option<String>,
    /// Default deadline for blocking operations.
    timeout: Duration,
}

impl BrowserConfig {
    pub fn builder() -> BrowserConfigBuilder {
        BrowserConfigBuilder::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BrowserConfigBuilder {
    executable: Option<PathBuf>,
    wrapper: Vec<String>,
    launch_options: Vec<String>,
    envs: HashMap<String, String>,
    language: Option<String>,
    timeout: Option<Duration>,
}

impl BrowserConfigBuilder {
    pub fn executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }

    pub fn wrapper<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.wrapper.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn launch_option(mut self, opt: impl Into<String>) -> Self {
        self.launch_options.push(opt.into());
        self
    }

    pub fn launch_options<I, S>(mut self, opts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.launch_options.extend(opts.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> std::result::Result<BrowserConfig, String> {
        let executable = match self.executable {
            Some(path) => path,
            None => default_executable()?,
        };
        Ok(BrowserConfig {
            executable,
            wrapper: self.wrapper,
            launch_options: self.launch_options,
            envs: self.envs,
            language: self.language,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
        })
    }
}

/// Returns the path to the browser child's executable.
///
/// If the `NSMONKEY` environment variable is set, `default_executable` will
/// use it as the default path. Otherwise the filenames `nsmonkey` and
/// `monkey` are searched for in standard places. If both fail, an error is
/// returned.
pub fn default_executable() -> std::result::Result<PathBuf, String> {
    if let Ok(path) = std::env::var("NSMONKEY") {
        if std::path::Path::new(&path).exists() {
            return Ok(path.into());
        }
    }
    for app in &["nsmonkey", "monkey"] {
        if let Ok(path) = which::which(app) {
            return Ok(path);
        }
    }
    Err("could not auto detect a browser child executable".to_string())
}

/// A session with one browser child.
///
/// The session is the single owner of the child, the event pump and all
/// per-window state. Every blocking operation is a loop over one pump
/// iteration and re-reads state after each suspension; handlers run to
/// completion between iterations, so no locking is involved anywhere.
pub struct Browser {
    pump: EventPump,
    windows: FnvHashMap<WindowId, Window>,
    /// The window whose redraw bracket is open, if any.
    current_draw_target: Option<WindowId>,
    login_windows: FnvHashMap<String, LoginWindow>,
    cert_windows: FnvHashMap<String, CertWindow>,
    auth_db: Vec<AuthEntry>,
    cert_db: Vec<CertEntry>,
    started: bool,
    stopped: bool,
    timeout: Duration,
}

impl Browser {
    /// Spawn the browser child described by `config` and wrap it in a
    /// session.
    pub fn launch(config: BrowserConfig) -> Result<Self> {
        let mut argv: Vec<OsString> = config.wrapper.iter().map(OsString::from).collect();
        argv.push(config.executable.clone().into_os_string());
        argv.extend(config.launch_options.iter().map(OsString::from));

        let mut envs = config.envs.clone();
        if let Some(language) = &config.language {
            envs.insert("LANGUAGE".to_string(), language.clone());
        }

        let program = argv.remove(0);
        let transport = Transport::spawn(program, argv, envs)?;

        Ok(Self {
            pump: EventPump::new(transport),
            windows: Default::default(),
            current_draw_target: None,
            login_windows: Default::default(),
            cert_windows: Default::default(),
            auth_db: Vec::new(),
            cert_db: Vec::new(),
            started: true,
            stopped: false,
            timeout: config.timeout,
        })
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }

    pub fn window(&self, id: &WindowId) -> Option<&Window> {
        self.windows.get(id)
    }

    pub fn windows(&self) -> impl Iterator<Item = &Window> {
        self.windows.values()
    }

    pub fn alive_windows(&self) -> impl Iterator<Item = &Window> {
        self.windows.values().filter(|win| win.alive())
    }

    /// The window currently inside a redraw bracket.
    pub fn current_draw_target(&self) -> Option<&WindowId> {
        self.current_draw_target.as_ref()
    }

    pub fn login_windows(&self) -> impl Iterator<Item = &LoginWindow> {
        self.login_windows.values()
    }

    pub fn cert_windows(&self) -> impl Iterator<Item = &CertWindow> {
        self.cert_windows.values()
    }

    // ---- timers ------------------------------------------------------

    /// Schedule `callback` to run on the pump after `delay`.
    pub fn schedule(
        &mut self,
        delay: Duration,
        callback: impl FnOnce(&mut Browser) + 'static,
    ) -> TimerToken {
        self.pump.schedule(delay, callback)
    }

    /// Schedule `callback` to run on the pump at `deadline`.
    pub fn schedule_at(
        &mut self,
        deadline: Instant,
        callback: impl FnOnce(&mut Browser) + 'static,
    ) -> TimerToken {
        self.pump.schedule_at(deadline, callback)
    }

    /// Drop every pending callback scheduled under `token`.
    pub fn unschedule(&mut self, token: TimerToken) {
        self.pump.unschedule(token);
    }

    // ---- pump --------------------------------------------------------

    /// Run one pump iteration: deliver one queued line if any, otherwise
    /// run due timers, wait for I/O (or the next timer deadline) once, and
    /// deliver at most one newly arrived line.
    pub async fn pump_once(&mut self) {
        self.pump_inner(true, None).await
    }

    /// Like [`Browser::pump_once`], but never waits on I/O past `deadline`.
    pub async fn pump_once_until(&mut self, deadline: Instant) {
        self.pump_inner(true, Some(deadline)).await
    }

    /// Pump until the child dies, then drain whatever lines remain.
    pub async fn pump_until_dead(&mut self) {
        self.pump_inner(false, None).await;
        while let Some(line) = self.pump.pop_line() {
            self.dispatch(&line);
        }
    }

    async fn pump_inner(&mut self, once: bool, limit: Option<Instant>) {
        if let Some(line) = self.pump.pop_line() {
            self.dispatch(&line);
            if once {
                return;
            }
        }
        while !self.pump.is_dead() {
            let mut now = Instant::now();
            while let Some(callback) = self.pump.pop_due_timer(now) {
                callback(self);
                now = Instant::now();
            }
            let wait = match (self.pump.next_deadline(), limit) {
                (Some(timer), Some(limit)) => {
                    Some(timer.min(limit).saturating_duration_since(now))
                }
                (Some(timer), None) => Some(timer.saturating_duration_since(now)),
                (None, Some(limit)) => Some(limit.saturating_duration_since(now)),
                (None, None) => None,
            };
            self.pump.wait_io(wait).await;
            if let Some(line) = self.pump.pop_line() {
                self.dispatch(&line);
            }
            if once {
                break;
            }
            if let Some(limit) = limit {
                if Instant::now() >= limit {
                    break;
                }
            }
        }
    }

    /// Fail once the child is dead and every already-received line has been
    /// dispatched. Blocking predicates call this between iterations so
    /// events that raced with death still land first.
    fn ensure_alive(&mut self) -> Result<()> {
        if self.pump.is_dead() && !self.pump.has_queued_lines() {
            self.stopped = true;
            Err(MonkeyError::ChildDied)
        } else {
            Ok(())
        }
    }

    fn tell(&mut self, line: &str) -> Result<()> {
        if self.stopped {
            return Err(MonkeyError::usage("session is stopped"));
        }
        self.pump.send(line)
    }

    // ---- session verbs -----------------------------------------------

    /// Pass additional runtime options to the child. Sending an empty list
    /// is a no-op.
    pub fn pass_options<I, S>(&mut self, opts: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let opts: Vec<String> = opts.into_iter().map(Into::into).collect();
        if opts.is_empty() {
            return Ok(());
        }
        self.tell(&cmd::options(&opts))
    }

    /// Ask the child for a new window, optionally already navigating to
    /// `url`, and wait for it to be reported back.
    pub async fn new_window(&mut self, url: Option<&str>) -> Result<WindowId> {
        let known: HashSet<WindowId> = self.windows.keys().cloned().collect();
        self.tell(&cmd::window_new(url))?;
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(id) = self.windows.keys().find(|id| !known.contains(id)) {
                return Ok(id.clone());
            }
            self.ensure_alive()?;
            if Instant::now() >= deadline {
                return Err(MonkeyError::Timeout("a new window"));
            }
            self.pump_inner(true, Some(deadline)).await;
        }
    }

    /// Ask the child to quit. Use [`Browser::quit_and_wait`] to also reap
    /// it.
    pub fn quit(&mut self) -> Result<()> {
        self.tell(cmd::QUIT)
    }

    /// Ask the child to quit, pump until it exits and reap it. Returns
    /// whether the child exited cleanly. If the child outlives the
    /// deadline it is killed, reaped and a `Timeout` error is returned.
    pub async fn quit_and_wait(&mut self, timeout: Option<Duration>) -> Result<bool> {
        // if the child is already gone, skip straight to draining and reaping
        if !self.stopped && !self.pump.is_dead() {
            self.quit()?;
        }
        let deadline = Instant::now() + timeout.unwrap_or(self.timeout);
        while !self.pump.is_dead() {
            if Instant::now() >= deadline {
                return self.kill_and_reap().await;
            }
            self.pump_inner(true, Some(deadline)).await;
        }
        while let Some(line) = self.pump.pop_line() {
            self.dispatch(&line);
        }
        self.pump.close_stdin();

        let status = {
            use futures::future::{self, Either};
            let remaining = deadline
                .saturating_duration_since(Instant::now())
                .max(Duration::from_millis(100));
            let wait = self.pump.wait_child();
            futures::pin_mut!(wait);
            match future::select(wait, futures_timer::Delay::new(remaining)).await {
                Either::Left((status, _)) => Some(status.map_err(MonkeyError::Io)?),
                Either::Right(_) => None,
            }
        };
        match status {
            Some(status) => {
                self.stopped = true;
                tracing::debug!("child exited with {status}");
                Ok(status.success())
            }
            None => self.kill_and_reap().await,
        }
    }

    async fn kill_and_reap(&mut self) -> Result<bool> {
        let _ = self.pump.kill_child().await;
        let _ = self.pump.wait_child().await;
        self.pump.close_stdin();
        self.stopped = true;
        Err(MonkeyError::Timeout("child exit"))
    }

    /// Graceful teardown for error paths: quit, drain, reap, and fall back
    /// to killing the child if it will not exit.
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        match self.quit_and_wait(None).await {
            Ok(_) => Ok(()),
            Err(MonkeyError::ChildDied) => {
                // already gone, reap whatever is left
                let _ = self.pump.try_wait_child();
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    // ---- credential databases ----------------------------------------

    /// Record credentials for the default login policy. `None` fields are
    /// wildcards: they never disqualify a prompt, but only provided fields
    /// count towards the match score.
    pub fn add_auth(
        &mut self,
        url: Option<&str>,
        realm: Option<&str>,
        username: Option<&str>,
        password: Option<&str>,
    ) {
        self.auth_db.push(AuthEntry {
            url: url.map(str::to_string),
            realm: realm.map(str::to_string),
            username: username.map(str::to_string),
            password: password.map(str::to_string),
        });
    }

    /// Remove every credential record whose provided fields all match the
    /// provided arguments; `None` on either side matches anything.
    pub fn remove_auth(
        &mut self,
        url: Option<&str>,
        realm: Option<&str>,
        username: Option<&str>,
        password: Option<&str>,
    ) {
        self.auth_db.retain(|entry| {
            !(wild_eq(url, entry.url.as_deref())
                && wild_eq(realm, entry.realm.as_deref())
                && wild_eq(username, entry.username.as_deref())
                && wild_eq(password, entry.password.as_deref()))
        });
    }

    /// Record a certificate-error exception.
    pub fn add_cert(&mut self, url: Option<&str>) {
        self.cert_db.push(CertEntry { url: url.map(str::to_string) });
    }

    pub fn remove_cert(&mut self, url: Option<&str>) {
        self.cert_db
            .retain(|entry| !wild_eq(url, entry.url.as_deref()));
    }

    // ---- window operations -------------------------------------------

    fn win(&self, id: &WindowId) -> Result<&Window> {
        self.windows
            .get(id)
            .ok_or_else(|| MonkeyError::usage(format!("no such window: {id}")))
    }

    /// Start navigating `win` to `url`.
    pub fn go(&mut self, win: &WindowId, url: &str, referer: Option<&str>) -> Result<()> {
        self.win(win)?;
        self.tell(&cmd::window_go(win.as_str(), url, referer))
    }

    /// Navigate and wait for the load to finish.
    pub async fn load_page(
        &mut self,
        win: &WindowId,
        url: &str,
        referer: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.go(win, url, referer)?;
        self.wait_loaded(win, timeout).await
    }

    pub fn reload(&mut self, win: &WindowId) -> Result<()> {
        self.win(win)?;
        self.tell(&cmd::window_reload(win.as_str()))
    }

    pub async fn reload_and_wait(
        &mut self,
        win: &WindowId,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.reload(win)?;
        self.wait_loaded(win, timeout).await
    }

    /// Stop any load in progress in `win`.
    pub fn stop(&mut self, win: &WindowId) -> Result<()> {
        self.win(win)?;
        self.tell(&cmd::window_stop(win.as_str()))
    }

    /// Ask the child to destroy `win`. The window stays in the table with
    /// `alive == false` once the DESTROY event arrives; pair with
    /// [`Browser::wait_until_dead`].
    pub fn kill(&mut self, win: &WindowId) -> Result<()> {
        if !self.win(win)?.alive() {
            return Err(MonkeyError::usage(format!("window {win} is already dead")));
        }
        self.tell(&cmd::window_destroy(win.as_str()))
    }

    pub fn click(
        &mut self,
        win: &WindowId,
        x: i32,
        y: i32,
        button: MouseButton,
        kind: ClickKind,
    ) -> Result<()> {
        self.win(win)?;
        self.tell(&cmd::window_click(win.as_str(), x, y, button, kind))
    }

    /// Run a snippet of JavaScript in `win`. Results only surface through
    /// the window's log.
    pub fn js_exec(&mut self, win: &WindowId, js: &str) -> Result<()> {
        self.win(win)?;
        self.tell(&cmd::window_exec(win.as_str(), js))
    }

    /// Forget every log record captured for `win` so far. Local only.
    pub fn clear_log(&mut self, win: &WindowId) -> Result<()> {
        self.windows
            .get_mut(win)
            .ok_or_else(|| MonkeyError::usage(format!("no such window: {win}")))?
            .truncate_log();
        Ok(())
    }

    // ---- blocking predicates -----------------------------------------

    fn check_window(&self, win: &WindowId) -> Result<()> {
        if !self.win(win)?.alive() {
            Err(MonkeyError::WindowDied(win.clone()))
        } else {
            Ok(())
        }
    }

    /// Wait until a load begins in `win` (`throbbing` observed true).
    pub async fn wait_start_loading(
        &mut self,
        win: &WindowId,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout.unwrap_or(self.timeout);
        while !self.win(win)?.throbbing() {
            self.check_window(win)?;
            self.ensure_alive()?;
            if Instant::now() >= deadline {
                return Err(MonkeyError::Timeout("load to start"));
            }
            self.pump_inner(true, Some(deadline)).await;
        }
        Ok(())
    }

    /// Wait for a full load: `throbbing` observed true (skipped when a load
    /// is already in progress) and then observed false again.
    pub async fn wait_loaded(&mut self, win: &WindowId, timeout: Option<Duration>) -> Result<()> {
        let deadline = Instant::now() + timeout.unwrap_or(self.timeout);
        while !self.win(win)?.throbbing() {
            self.check_window(win)?;
            self.ensure_alive()?;
            if Instant::now() >= deadline {
                return Err(MonkeyError::Timeout("load to start"));
            }
            self.pump_inner(true, Some(deadline)).await;
        }
        while self.win(win)?.throbbing() {
            self.check_window(win)?;
            self.ensure_alive()?;
            if Instant::now() >= deadline {
                return Err(MonkeyError::Timeout("load to finish"));
            }
            self.pump_inner(true, Some(deadline)).await;
        }
        Ok(())
    }

    /// Wait until `win` has been destroyed.
    pub async fn wait_until_dead(
        &mut self,
        win: &WindowId,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout.unwrap_or(self.timeout);
        while self.win(win)?.alive() {
            self.ensure_alive()?;
            if Instant::now() >= deadline {
                return Err(MonkeyError::Timeout("window destruction"));
            }
            self.pump_inner(true, Some(deadline)).await;
        }
        Ok(())
    }

    /// Request a redraw of `win` (optionally of the given rectangle) and
    /// return the drawing commands captured between the child's REDRAW
    /// START and STOP.
    pub async fn redraw(
        &mut self,
        win: &WindowId,
        coords: Option<[i32; 4]>,
        timeout: Option<Duration>,
    ) -> Result<Vec<PlotCmd>> {
        self.win(win)?;
        self.tell(&cmd::window_redraw(win.as_str(), coords))?;
        let deadline = Instant::now() + timeout.unwrap_or(self.timeout);
        while !self.win(win)?.plotting() {
            self.check_window(win)?;
            self.ensure_alive()?;
            if Instant::now() >= deadline {
                return Err(MonkeyError::Timeout("redraw to start"));
            }
            self.pump_inner(true, Some(deadline)).await;
        }
        while self.win(win)?.plotting() {
            self.check_window(win)?;
            self.ensure_alive()?;
            if Instant::now() >= deadline {
                return Err(MonkeyError::Timeout("redraw to finish"));
            }
            self.pump_inner(true, Some(deadline)).await;
        }
        Ok(self.win(win)?.plotted().to_vec())
    }

    /// Wait for a log record matching `filter` to arrive in `win`. Records
    /// already captured when the wait begins never satisfy it.
    pub async fn wait_for_log(
        &mut self,
        win: &WindowId,
        filter: LogFilter,
        timeout: Option<Duration>,
    ) -> Result<LogRecord> {
        let mark = self.win(win)?.log().len();
        let deadline = Instant::now() + timeout.unwrap_or(self.timeout);
        loop {
            let log = self.win(win)?.log();
            let from = mark.min(log.len());
            if let Some(record) = log[from..].iter().find(|record| filter.matches(record)) {
                return Ok(record.clone());
            }
            self.check_window(win)?;
            self.ensure_alive()?;
            if Instant::now() >= deadline {
                return Err(MonkeyError::Timeout("a matching log record"));
            }
            self.pump_inner(true, Some(deadline)).await;
        }
    }

    // ---- modal sub-dialogs -------------------------------------------

    pub fn login_send_username(&mut self, id: &str, username: &str) -> Result<()> {
        self.require_login_window(id)?;
        self.tell(&cmd::login_username(id, username))
    }

    pub fn login_send_password(&mut self, id: &str, password: &str) -> Result<()> {
        self.require_login_window(id)?;
        self.tell(&cmd::login_password(id, password))
    }

    /// Submit the login prompt. Removes the prompt from the session.
    pub fn login_go(&mut self, id: &str) -> Result<()> {
        self.require_login_window(id)?;
        self.tell(&cmd::login_go(id))?;
        self.login_windows.remove(id);
        Ok(())
    }

    /// Cancel the login prompt. Removes the prompt from the session.
    pub fn login_destroy(&mut self, id: &str) -> Result<()> {
        self.require_login_window(id)?;
        self.tell(&cmd::login_destroy(id))?;
        self.login_windows.remove(id);
        Ok(())
    }

    /// Accept the certificate prompt. Removes the prompt from the session.
    pub fn sslcert_go(&mut self, id: &str) -> Result<()> {
        self.require_cert_window(id)?;
        self.tell(&cmd::sslcert_go(id))?;
        self.cert_windows.remove(id);
        Ok(())
    }

    /// Reject the certificate prompt. Removes the prompt from the session.
    pub fn sslcert_destroy(&mut self, id: &str) -> Result<()> {
        self.require_cert_window(id)?;
        self.tell(&cmd::sslcert_destroy(id))?;
        self.cert_windows.remove(id);
        Ok(())
    }

    fn require_login_window(&self, id: &str) -> Result<()> {
        if self.login_windows.contains_key(id) {
            Ok(())
        } else {
            Err(MonkeyError::usage(format!("no such login window: {id}")))
        }
    }

    fn require_cert_window(&self, id: &str) -> Result<()> {
        if self.cert_windows.contains_key(id) {
            Ok(())
        } else {
            Err(MonkeyError::usage(format!("no such cert window: {id}")))
        }
    }

    // ---- event handling ----------------------------------------------

    fn dispatch(&mut self, line: &str) {
        let inbound = match Inbound::parse(line) {
            Ok(Some(inbound)) => inbound,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!("{err}");
                return;
            }
        };
        match inbound {
            Inbound::Window { id, event } => self.handle_window_event(id, event),
            Inbound::Plot(plot) => {
                if let Some(target) = self.current_draw_target.clone() {
                    if let Some(win) = self.windows.get_mut(&target) {
                        win.push_plot(plot);
                    }
                }
            }
            Inbound::LoginReady { id, url, realm, username } => {
                self.handle_login_ready(id, url, realm, username)
            }
            Inbound::SslCertReady { id, url } => self.handle_sslcert_ready(id, url),
            Inbound::Log { win, record } => self.handle_log(win, record),
            Inbound::PageInfoState { id, state } => {
                let winid = WindowId::from(id.as_str());
                match self.windows.get_mut(&winid) {
                    Some(win) => win.set_page_info_state(state),
                    None => tracing::warn!("unknown window id {id}"),
                }
            }
            Inbound::Generic => {}
            Inbound::Quit => tracing::debug!("child announced quit"),
        }
    }

    fn handle_window_event(&mut self, id: String, event: WindowEvent) {
        match event {
            WindowEvent::New { coreid, existing, newtab, clone } => {
                let winid = WindowId::from(id);
                self.windows.insert(
                    winid.clone(),
                    Window::new(winid, coreid, existing, newtab, clone),
                );
            }
            event => {
                let winid = WindowId::from(id.as_str());
                if !self.windows.contains_key(&winid) {
                    tracing::warn!("unknown window id {id}");
                    return;
                }
                match event {
                    WindowEvent::RedrawStart => self.current_draw_target = Some(winid.clone()),
                    WindowEvent::RedrawStop => self.current_draw_target = None,
                    _ => {}
                }
                self.windows
                    .get_mut(&winid)
                    .expect("window checked above")
                    .apply(event);
            }
        }
    }

    /// Default policy for a login prompt: pick the best-scoring credential
    /// record and submit it, or cancel the prompt when nothing matches.
    fn handle_login_ready(&mut self, id: String, url: String, realm: String, username: String) {
        let best = best_auth_candidate(&self.auth_db, &url, &realm, &username).cloned();
        self.login_windows
            .insert(id.clone(), LoginWindow { id: id.clone(), url, realm, username });
        match best {
            Some(entry) => {
                let username = entry.username.unwrap_or_default();
                let password = entry.password.unwrap_or_default();
                tracing::debug!("login {id}: submitting credentials for {username:?}");
                let _ = self.login_send_username(&id, &username);
                let _ = self.login_send_password(&id, &password);
                let _ = self.login_go(&id);
            }
            None => {
                tracing::debug!("login {id}: no matching credentials, cancelling");
                let _ = self.login_destroy(&id);
            }
        }
    }

    /// Default policy for a certificate prompt, over the exception list.
    fn handle_sslcert_ready(&mut self, id: String, url: String) {
        let accept = best_cert_candidate(&self.cert_db, &url).is_some();
        self.cert_windows
            .insert(id.clone(), CertWindow { id: id.clone(), url });
        if accept {
            tracing::debug!("sslcert {id}: exception found, accepting");
            let _ = self.sslcert_go(&id);
        } else {
            tracing::debug!("sslcert {id}: no exception, cancelling");
            let _ = self.sslcert_destroy(&id);
        }
    }

    fn handle_log(&mut self, win: Option<String>, record: LogRecord) {
        match win {
            Some(id) => {
                let winid = WindowId::from(id.as_str());
                match self.windows.get_mut(&winid) {
                    Some(win) => win.push_log(record),
                    None => tracing::warn!("unknown window id {id}"),
                }
            }
            // un-scoped records go to every live window
            None => {
                for win in self.windows.values_mut().filter(|win| win.alive()) {
                    win.push_log(record.clone());
                }
            }
        }
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        if !self.stopped {
            tracing::debug!("session dropped without quit, killing child");
            let _ = self.pump.start_kill();
            let _ = self.pump.try_wait_child();
        }
    }
}

fn wild_eq(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

/// Score each record by its number of provided-and-matching fields; pick
/// the highest positive score, ties going to the latest inserted record.
fn best_auth_candidate<'a>(
    db: &'a [AuthEntry],
    url: &str,
    realm: &str,
    username: &str,
) -> Option<&'a AuthEntry> {
    let mut best: Option<(usize, &AuthEntry)> = None;
    for entry in db {
        let score = [
            (entry.url.as_deref(), url),
            (entry.realm.as_deref(), realm),
            (entry.username.as_deref(), username),
        ]
        .iter()
        .filter(|(provided, actual)| *provided == Some(*actual))
        .count();
        if score == 0 {
            continue;
        }
        if best.map_or(true, |(top, _)| score >= top) {
            best = Some((score, entry));
        }
    }
    best.map(|(_, entry)| entry)
}

fn best_cert_candidate<'a>(db: &'a [CertEntry], url: &str) -> Option<&'a CertEntry> {
    let mut best = None;
    for entry in db {
        if entry.url.as_deref() == Some(url) {
            best = Some(entry);
        }
    }
    best
}
